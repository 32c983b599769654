//! Durable persistence for the Skein engine.
//!
//! Single-writer SQLite storage for the four entity kinds: workflows,
//! executions, templates, and log lines. All mutations are serialized
//! through one connection; the store is the sole authority on persisted
//! execution status.

mod sqlite;

pub use sqlite::{
    ExecutionPatch, SqliteStore, Template, WorkflowPatch,
};
