//! Secret and PII redaction for anything bound for the structured log store.
//!
//! Device session transcripts and job output routinely echo back the very
//! credentials used to authenticate, plus anything the device itself leaks
//! (SNMP community strings, radius secrets printed by a misbehaving `show
//! run`). Every line written to the Log Entry table or the session
//! transcript NDJSON files passes through [`redact_pii`] first; there is no
//! opt-out.

use lazy_static::lazy_static;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PiiType {
    Email,
    Phone,
    Ssn,
    CreditCard,
    IpAddress,
    /// `password`/`secret`/`key` style `name: value` or `name value` pairs,
    /// the dominant case for device-output redaction.
    Secret,
}

#[derive(Debug, Clone)]
pub struct PiiMatch {
    pub pii_type: PiiType,
    pub start: usize,
    pub end: usize,
    pub value: String,
}

#[derive(Debug, Clone, Default)]
pub struct PiiFindings {
    pub matches: Vec<PiiMatch>,
}

impl PiiFindings {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap();
    static ref PHONE_RE: Regex =
        Regex::new(r"(\+?1[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}").unwrap();
    static ref SSN_RE: Regex = Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap();
    static ref CREDIT_CARD_RE: Regex = Regex::new(r"\b(?:\d[ -]?){13,16}\b").unwrap();
    static ref IPV4_RE: Regex = Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").unwrap();
    static ref SECRET_RE: Regex = Regex::new(
        r"(?i)\b(password|secret|enable secret|community|pre-shared-key|psk|api[_-]?key|token)\s*[:=]?\s+(\S+)"
    )
    .unwrap();
}

/// Runs every built-in structured detector over `text` and returns every
/// non-overlapping match found, in source order.
pub fn detect_structured_pii(text: &str) -> PiiFindings {
    let mut matches = Vec::new();

    for m in SECRET_RE.captures_iter(text) {
        if let Some(value) = m.get(2) {
            matches.push(PiiMatch {
                pii_type: PiiType::Secret,
                start: value.start(),
                end: value.end(),
                value: value.as_str().to_string(),
            });
        }
    }
    for m in EMAIL_RE.find_iter(text) {
        matches.push(PiiMatch {
            pii_type: PiiType::Email,
            start: m.start(),
            end: m.end(),
            value: m.as_str().to_string(),
        });
    }
    for m in SSN_RE.find_iter(text) {
        matches.push(PiiMatch {
            pii_type: PiiType::Ssn,
            start: m.start(),
            end: m.end(),
            value: m.as_str().to_string(),
        });
    }
    for m in PHONE_RE.find_iter(text) {
        matches.push(PiiMatch {
            pii_type: PiiType::Phone,
            start: m.start(),
            end: m.end(),
            value: m.as_str().to_string(),
        });
    }
    for m in CREDIT_CARD_RE.find_iter(text) {
        matches.push(PiiMatch {
            pii_type: PiiType::CreditCard,
            start: m.start(),
            end: m.end(),
            value: m.as_str().to_string(),
        });
    }
    for m in IPV4_RE.find_iter(text) {
        matches.push(PiiMatch {
            pii_type: PiiType::IpAddress,
            start: m.start(),
            end: m.end(),
            value: m.as_str().to_string(),
        });
    }

    matches.sort_by_key(|m| m.start);
    dedup_overlaps(&mut matches);
    PiiFindings { matches }
}

/// Drops a later match whose span overlaps an earlier one already kept
/// (e.g. a secret value that also happens to look like a phone number).
fn dedup_overlaps(matches: &mut Vec<PiiMatch>) {
    let mut kept: Vec<PiiMatch> = Vec::with_capacity(matches.len());
    for m in matches.drain(..) {
        let overlaps = kept.iter().any(|k| m.start < k.end && k.start < m.end);
        if !overlaps {
            kept.push(m);
        }
    }
    *matches = kept;
}

/// Strategy for redacting PII once detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedactionStrategy {
    /// Replace the matched span with `[REDACTED]`.
    FullRemoval,
    /// Partially mask the value while preserving some readability.
    PartialMask,
    /// Replace with a typed token, e.g. `[EMAIL]`, `[SECRET]`.
    TokenReplacement,
}

/// Redacts every match in `findings` out of `text` according to `strategy`.
/// This is the only sanctioned path from raw device output to anything
/// persisted in the structured log store.
pub fn redact_pii(text: &str, findings: &PiiFindings, strategy: RedactionStrategy) -> String {
    if findings.is_empty() {
        return text.to_string();
    }

    let mut sorted_matches: Vec<&PiiMatch> = findings.matches.iter().collect();
    sorted_matches.sort_by(|a, b| b.start.cmp(&a.start));

    let mut result = text.to_string();

    for pii_match in sorted_matches {
        let replacement = match strategy {
            RedactionStrategy::FullRemoval => "[REDACTED]".to_string(),
            RedactionStrategy::PartialMask => mask_value(&pii_match.value, pii_match.pii_type),
            RedactionStrategy::TokenReplacement => {
                format!("[{}]", type_to_token(pii_match.pii_type))
            }
        };

        result.replace_range(pii_match.start..pii_match.end, &replacement);
    }

    result
}

fn type_to_token(pii_type: PiiType) -> &'static str {
    match pii_type {
        PiiType::Email => "EMAIL",
        PiiType::Phone => "PHONE",
        PiiType::Ssn => "SSN",
        PiiType::CreditCard => "CREDIT_CARD",
        PiiType::IpAddress => "IP_ADDRESS",
        PiiType::Secret => "SECRET",
    }
}

fn mask_value(value: &str, pii_type: PiiType) -> String {
    match pii_type {
        PiiType::Email => mask_email(value),
        PiiType::Phone => mask_phone(value),
        PiiType::Ssn => mask_ssn(value),
        PiiType::CreditCard => mask_credit_card(value),
        PiiType::IpAddress => mask_ip(value),
        PiiType::Secret => "***".to_string(),
    }
}

fn mask_email(email: &str) -> String {
    if let Some(at_pos) = email.find('@') {
        let (local, domain) = email.split_at(at_pos);
        if let Some(first_char) = local.chars().next() {
            format!("{first_char}***{domain}")
        } else {
            format!("***{domain}")
        }
    } else {
        "***@***.***".to_string()
    }
}

fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    let mut last_digit_group_start = None;
    let mut in_digit_group = false;

    for (i, ch) in chars.iter().enumerate().rev() {
        if ch.is_ascii_digit() {
            if !in_digit_group {
                in_digit_group = true;
                last_digit_group_start = Some(i);
            }
        } else if in_digit_group {
            if let Some(start) = last_digit_group_start {
                if start - i >= 3 {
                    let mut result = phone.to_string();
                    result.replace_range((i + 1)..=start, &"*".repeat(start - i));
                    return result;
                }
            }
            break;
        }
    }

    if phone.len() > 4 {
        let visible = &phone[..phone.len() - 4];
        format!("{visible}****")
    } else {
        "***-****".to_string()
    }
}

fn mask_ssn(ssn: &str) -> String {
    if ssn.len() >= 11 && ssn.contains('-') {
        let parts: Vec<&str> = ssn.split('-').collect();
        if parts.len() == 3 {
            return format!("***-**-{}", parts[2]);
        }
    }
    "***-**-****".to_string()
}

fn mask_credit_card(card: &str) -> String {
    let digits: String = card.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.len() >= 4 {
        let last_four = &digits[digits.len() - 4..];
        if card.contains('-') {
            format!("****-****-****-{last_four}")
        } else if card.contains(' ') {
            format!("**** **** **** {last_four}")
        } else {
            format!("************{last_four}")
        }
    } else {
        "****-****-****-****".to_string()
    }
}

fn mask_ip(ip: &str) -> String {
    if ip.contains(':') {
        let parts: Vec<&str> = ip.split(':').collect();
        if parts.len() >= 4 {
            let visible = &parts[..parts.len() - 4];
            return format!("{}:*:*:*:*", visible.join(":"));
        }
        "*:*:*:*:*:*:*:*".to_string()
    } else {
        let parts: Vec<&str> = ip.split('.').collect();
        if parts.len() == 4 {
            format!("{}.{}.*.*", parts[0], parts[1])
        } else {
            "*.*.*.*".to_string()
        }
    }
}

/// Bundles the built-in structured detectors with operator-supplied regex
/// patterns (§4.7/§6: "REDACT_PATTERNS: additional regexes, beyond the
/// built-in set"). Shared by the log sink and the worker pool so both ends
/// of the hot path honor the same configured patterns.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    custom: Vec<Regex>,
}

impl Redactor {
    /// Compiles `patterns` as additional detectors. Fails closed: a bad
    /// regex in operator config is a startup error, not a silently-ignored
    /// pattern.
    pub fn new(patterns: &[String]) -> Result<Self, regex::Error> {
        let custom = patterns.iter().map(|p| Regex::new(p)).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { custom })
    }

    pub fn detect(&self, text: &str) -> PiiFindings {
        let mut findings = detect_structured_pii(text);
        for re in &self.custom {
            for m in re.find_iter(text) {
                findings.matches.push(PiiMatch {
                    pii_type: PiiType::Secret,
                    start: m.start(),
                    end: m.end(),
                    value: m.as_str().to_string(),
                });
            }
        }
        if !self.custom.is_empty() {
            findings.matches.sort_by_key(|m| m.start);
            dedup_overlaps(&mut findings.matches);
        }
        findings
    }

    /// Detects then redacts in one call; the usual entry point for callers
    /// that don't need the raw findings.
    pub fn redact(&self, text: &str, strategy: RedactionStrategy) -> String {
        let findings = self.detect(text);
        redact_pii(text, &findings, strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_removal_strategy() {
        let text = "Contact john@example.com or (555) 123-4567";
        let findings = detect_structured_pii(text);
        let result = redact_pii(text, &findings, RedactionStrategy::FullRemoval);
        assert!(result.contains("[REDACTED]"));
        assert!(!result.contains("john@example.com"));
    }

    #[test]
    fn partial_mask_strategy() {
        let text = "Email: john@example.com";
        let findings = detect_structured_pii(text);
        let result = redact_pii(text, &findings, RedactionStrategy::PartialMask);
        assert!(result.contains("j***@example.com"));
    }

    #[test]
    fn token_replacement_strategy() {
        let text = "Contact john@example.com or (555) 123-4567";
        let findings = detect_structured_pii(text);
        let result = redact_pii(text, &findings, RedactionStrategy::TokenReplacement);
        assert!(result.contains("[EMAIL]"));
        assert!(result.contains("[PHONE]"));
    }

    #[test]
    fn redacts_enable_secret_from_device_output() {
        let text = "enable secret 5 $1$abc$xyzxyzxyz\nhostname router1";
        let findings = detect_structured_pii(text);
        let result = redact_pii(text, &findings, RedactionStrategy::TokenReplacement);
        assert!(result.contains("[SECRET]"));
        assert!(!result.contains("$1$abc$xyzxyzxyz"));
        assert!(result.contains("hostname router1"));
    }

    #[test]
    fn redacts_snmp_community_string() {
        let text = "snmp-server community public RO";
        let findings = detect_structured_pii(text);
        assert!(!findings.is_empty());
        let result = redact_pii(text, &findings, RedactionStrategy::PartialMask);
        assert!(!result.contains("public"));
    }

    #[test]
    fn mask_ip_hides_last_two_octets() {
        assert_eq!(mask_ip("192.168.1.100"), "192.168.*.*");
    }

    #[test]
    fn no_pii_leaves_text_untouched() {
        let text = "interface GigabitEthernet0/1\n description uplink";
        let findings = detect_structured_pii(text);
        assert!(findings.is_empty());
        assert_eq!(redact_pii(text, &findings, RedactionStrategy::PartialMask), text);
    }

    #[test]
    fn overlapping_matches_do_not_double_count() {
        let text = "a@b.com and c@d.com";
        let findings = detect_structured_pii(text);
        let result = redact_pii(text, &findings, RedactionStrategy::TokenReplacement);
        assert_eq!(result.matches("[EMAIL]").count(), 2);
    }

    #[test]
    fn redactor_applies_custom_patterns_alongside_built_ins() {
        let redactor = Redactor::new(&[r"TACACS-KEY-\w+".to_string()]).unwrap();
        let text = "tacacs key TACACS-KEY-abc123 for john@example.com";
        let result = redactor.redact(text, RedactionStrategy::TokenReplacement);
        assert!(!result.contains("TACACS-KEY-abc123"));
        assert!(result.contains("[SECRET]"));
        assert!(result.contains("[EMAIL]"));
    }

    #[test]
    fn redactor_rejects_invalid_custom_pattern() {
        assert!(Redactor::new(&["(unclosed".to_string()]).is_err());
    }
}
