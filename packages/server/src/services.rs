//! Dependency container (§9 resolved design note: "pass a `Services` value
//! ... through constructors; no ambient state" — directly replacing the
//! teacher's scattered module-level singletons and its own `ServerDeps`
//! bundle, generalized from "HTTP handler dependencies" to "everything a
//! worker loop or API collaborator needs to touch the catalog, queue,
//! vault, and log store").

use crate::catalog::Catalog;
use crate::logstore::LogSink;
use crate::queue::Queue;
use crate::vault::Vault;

/// Cheap to clone: every field is itself a handle (pool, channel sender, or
/// a struct wrapping one), never owned heavyweight state.
#[derive(Clone)]
pub struct Services {
    pub catalog: Catalog,
    pub queue: Queue,
    pub vault: Vault,
    pub log_sink: LogSink,
}

impl Services {
    pub fn new(catalog: Catalog, queue: Queue, vault: Vault, log_sink: LogSink) -> Self {
        Self { catalog, queue, vault, log_sink }
    }
}
