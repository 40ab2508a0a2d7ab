//! C1 Job Catalog persistence layer (§3, §9 design notes).
//!
//! One `Catalog` wraps the shared Postgres pool. Every multi-row invariant
//! (enqueue + next-fire advance, sub-result + terminal status, credential
//! rotation) takes an explicit `&mut Transaction<'_, Postgres>` rather than
//! leaning on ambient connection state — the generalization of the teacher's
//! `ServerKernel`-scoped `Record` trait (`common::sql::Record`) into an
//! explicit-transaction interface per §9 ("one catalog interface with
//! explicit transactions").
//!
//! Submodules group queries by entity; each contributes its own `impl
//! Catalog` block rather than one file per CRUD verb, matching the grouping
//! the teacher uses for its own model files (`job.rs`, `tag.rs`, ...).

pub mod credential;
pub mod device;
pub mod encryption_key;
pub mod job;
pub mod job_run;
pub mod lease;
pub mod log_entry;
pub mod schedule;
pub mod snapshot;
pub mod sub_result;
pub mod tag;

use sqlx::PgPool;

/// Handle to the relational store backing C1 (and, by extension, C3's
/// `queue_items` table and C9's `encryption_keys` table — §4.2's resolved
/// Open Question keeps everything on one pool).
#[derive(Clone)]
pub struct Catalog {
    pool: PgPool,
}

impl Catalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
