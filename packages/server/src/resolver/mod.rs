//! C6 Credential Resolver (§4.6): ranks a Device's candidate Credentials by
//! effective priority, with deterministic tie-breaks, and feeds session
//! outcomes back into the ranking via the catalog's conditional counter
//! updates.

use crate::catalog::Catalog;
use crate::entities::{Credential, CredentialTagBinding};
use crate::error::{DeviceErrorKind, Result};
use crate::id::{CredentialId, DeviceId};

/// One ranked candidate: the credential plus the effective priority it was
/// ranked under, so a caller can log which binding actually won without a
/// second lookup.
#[derive(Debug, Clone)]
pub struct RankedCredential {
    pub credential: Credential,
    pub effective_priority: i32,
}

#[derive(Clone)]
pub struct CredentialResolver {
    catalog: Catalog,
}

impl CredentialResolver {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    /// §4.6: "the candidate credential list is the union of Credentials
    /// bound to any Tag that D is a member of", ordered by effective
    /// priority ascending (lower tried first), ties broken by success rate
    /// descending, then `last_used_at` descending, then id ascending.
    pub async fn candidates_for_device(&self, device_id: DeviceId) -> Result<Vec<RankedCredential>> {
        let pairs = self.catalog.candidate_credentials_for_device(device_id).await?;
        let mut ranked = dedup_by_credential(pairs);
        ranked.sort_by(|a, b| rank_key(a).cmp(&rank_key(b)));
        Ok(ranked)
    }

    /// "Smart credential selection" (§4.6): the top `n` candidates, ordered
    /// identically to `candidates_for_device`.
    pub async fn top_n_for_device(&self, device_id: DeviceId, n: usize) -> Result<Vec<RankedCredential>> {
        let mut candidates = self.candidates_for_device(device_id).await?;
        candidates.truncate(n);
        Ok(candidates)
    }

    /// §4.6: feeds a session attempt's outcome back into the ranking.
    /// `success` and `auth_failure` are evidence about the credential;
    /// every other outcome says nothing about it and leaves counters alone.
    pub async fn record_outcome(&self, credential_id: CredentialId, outcome: DeviceErrorKind) -> Result<()> {
        match outcome {
            DeviceErrorKind::Success => self.catalog.record_credential_success(credential_id).await,
            DeviceErrorKind::AuthFailure => self.catalog.record_credential_auth_failure(credential_id).await,
            _ => Ok(()),
        }
    }

    /// "Optimize priorities" (§4.6): re-numbers `credential.priority` within
    /// a Tag so the stored priority matches the resolver's current
    /// effective order exactly — cosmetic compaction, order-preserving.
    pub async fn optimize_priorities_for_device(&self, device_id: DeviceId) -> Result<()> {
        let ranked = self.candidates_for_device(device_id).await?;
        for (index, candidate) in ranked.iter().enumerate() {
            self.catalog
                .set_credential_priority(candidate.credential.id, index as i32)
                .await?;
        }
        Ok(())
    }
}

/// A credential can be bound to more than one Tag a device belongs to; only
/// its best (lowest) effective priority across those bindings matters.
fn dedup_by_credential(pairs: Vec<(CredentialTagBinding, Credential)>) -> Vec<RankedCredential> {
    let mut best: std::collections::HashMap<CredentialId, RankedCredential> = std::collections::HashMap::new();
    for (binding, credential) in pairs {
        let effective_priority = binding.effective_priority(&credential);
        best.entry(credential.id)
            .and_modify(|existing| {
                if effective_priority < existing.effective_priority {
                    existing.effective_priority = effective_priority;
                }
            })
            .or_insert(RankedCredential { credential, effective_priority });
    }
    best.into_values().collect()
}

/// Sort key implementing §4.6's tie-break chain: effective priority
/// ascending, success rate descending, `last_used_at` descending (ties:
/// "never used" sorts after any recorded use), id ascending.
fn rank_key(ranked: &RankedCredential) -> (i32, NegF64, std::cmp::Reverse<i64>, CredentialId) {
    let success_rate = ranked.credential.success_rate();
    let last_used = ranked.credential.last_used_at.map(|ts| ts.timestamp()).unwrap_or(i64::MIN);
    (
        ranked.effective_priority,
        NegF64(success_rate),
        std::cmp::Reverse(last_used),
        ranked.credential.id,
    )
}

/// Wraps an `f64` so it orders descending (higher success rate first) and
/// can sit in a tuple sorted with `Ord`, since `f64` itself is only
/// `PartialOrd`. Success rates are always finite (`0.0..=1.0`), so total
/// ordering is safe here.
#[derive(Debug, Clone, Copy, PartialEq)]
struct NegF64(f64);

impl Eq for NegF64 {}

impl PartialOrd for NegF64 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NegF64 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Descending: a higher success rate must sort *before* a lower one.
        other.0.partial_cmp(&self.0).unwrap_or(std::cmp::Ordering::Equal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{EncryptionKeyId, TagId};

    fn credential(priority: i32, successes: i64, failures: i64) -> Credential {
        let mut c = Credential::builder()
            .username("admin")
            .secret_ciphertext(vec![])
            .encryption_key_id(EncryptionKeyId::new())
            .priority(priority)
            .build();
        for _ in 0..successes {
            c.record_success();
        }
        for _ in 0..failures {
            c.record_auth_failure();
        }
        c
    }

    fn binding(credential_id: CredentialId, priority: i32) -> CredentialTagBinding {
        CredentialTagBinding::builder().tag_id(TagId::new()).credential_id(credential_id).priority(priority).build()
    }

    #[test]
    fn lower_effective_priority_ranks_first() {
        let high_priority_cred = credential(0, 0, 0);
        let low_priority_cred = credential(5, 0, 0);
        let pairs = vec![
            (binding(low_priority_cred.id, 5), low_priority_cred.clone()),
            (binding(high_priority_cred.id, 0), high_priority_cred.clone()),
        ];
        let ranked = dedup_by_credential(pairs);
        let mut ranked = ranked;
        ranked.sort_by(|a, b| rank_key(a).cmp(&rank_key(b)));
        assert_eq!(ranked[0].credential.id, high_priority_cred.id);
    }

    #[test]
    fn same_priority_ties_break_on_success_rate() {
        let reliable = credential(0, 9, 1);
        let unreliable = credential(0, 1, 9);
        let pairs = vec![
            (binding(unreliable.id, 0), unreliable.clone()),
            (binding(reliable.id, 0), reliable.clone()),
        ];
        let mut ranked = dedup_by_credential(pairs);
        ranked.sort_by(|a, b| rank_key(a).cmp(&rank_key(b)));
        assert_eq!(ranked[0].credential.id, reliable.id);
    }

    #[test]
    fn duplicate_bindings_keep_best_effective_priority() {
        let cred = credential(5, 0, 0);
        let pairs = vec![
            (binding(cred.id, 5), cred.clone()),
            (binding(cred.id, 1), cred.clone()),
        ];
        let ranked = dedup_by_credential(pairs);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].effective_priority, 1);
    }
}
