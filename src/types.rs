//! Type definitions shared by every storage implementation
//!
//! This module contains the error taxonomy and identifier helpers.

/// Identifier conversion
pub mod ids;
/// Storage error types
pub mod error;

// Re-export commonly used types for convenience
pub use error::{BoxError, Result, StorageError, TransientKind};
pub use ids::{object_id, try_object_id, zero_object_id};
pub use mongodb::bson::oid::ObjectId;
pub use mongodb::bson::Document;
