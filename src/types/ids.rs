//! Document identifier conversion
//!
//! Domain code usually carries identifiers as hex strings (often newtypes over
//! `String`). The store addresses documents by 12-byte [`ObjectId`]s.

use mongodb::bson::oid::ObjectId;

use crate::constants::OBJECT_ID_LENGTH;
use crate::types::error::{Result, StorageError};

/// Convert a hex string identifier into an [`ObjectId`].
///
/// Input that does not parse yields the all-zero id. Identifiers are expected
/// to have been validated by the domain layer already; use [`try_object_id`]
/// where that is not the case.
pub fn object_id<T: AsRef<str>>(domain_id: T) -> ObjectId {
    ObjectId::parse_str(domain_id.as_ref()).unwrap_or_else(|_| zero_object_id())
}

/// Convert a hex string identifier into an [`ObjectId`], rejecting bad input
pub fn try_object_id<T: AsRef<str>>(domain_id: T) -> Result<ObjectId> {
    let raw = domain_id.as_ref();
    ObjectId::parse_str(raw).map_err(|_| StorageError::InvalidId(raw.to_string()))
}

/// The sentinel id produced for unparsable input
pub fn zero_object_id() -> ObjectId {
    ObjectId::from_bytes([0u8; OBJECT_ID_LENGTH])
}
