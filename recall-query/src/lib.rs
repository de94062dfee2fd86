//! # Recall Query
//!
//! Matching engine and query surface over the recall store:
//! - Exact identifier lookup (UPC/GTIN in any padding, model and lot numbers)
//! - Trigram-ranked free-text search with a substring fallback
//! - Opaque, query-bound pagination cursors
//!
//! The HTTP layer in front of this crate lives elsewhere; everything here is
//! plain async functions over a `SqlitePool`.

pub mod cursor;
pub mod engine;
pub mod error;
pub mod models;
pub mod service;
pub mod validation;

pub use error::QueryError;
pub use models::{IdentifierInput, IngestionStatus, MatchKind, SearchHit, SearchRequest, SearchResponse};
pub use service::QueryService;
