//! Memoria - Memory-as-a-Service core
//!
//! Multi-tenant semantic memory store: embedding generation, vector
//! similarity search with relational filtering, access tracking, and
//! versioning-on-update.

pub mod embedding;
pub mod error;
pub mod search;
pub mod service;
pub mod storage;
pub mod types;

pub use error::{MemoriaError, Result};
pub use service::MemoryService;
pub use storage::Storage;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
