//! NetRaven core — network configuration management platform.
//!
//! This crate implements the durable execution core: a recurring job
//! dispatcher, a Postgres-backed durable queue, a fan-out worker pool that
//! drives SSH/Telnet/REST device sessions, a content-addressed snapshot
//! store, a structured log store with mandatory secret redaction, and a
//! secret vault. `netraven-worker` (`src/bin/worker.rs`) wires these into a
//! long-running process; everything else is a library other binaries (a
//! future HTTP/GraphQL surface, a CLI) can depend on.

pub mod catalog;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod entities;
pub mod error;
pub mod id;
pub mod logstore;
pub mod queue;
pub mod redaction;
pub mod resolver;
pub mod services;
pub mod snapshot;
pub mod vault;
pub mod worker;

pub use config::NetRavenConfig;
pub use error::{NetRavenError, Result};
pub use services::Services;
