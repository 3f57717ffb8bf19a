//! Dataset Module - record types and the persisted schema

pub mod record;
pub mod schema;

pub use record::{ClassLabel, RawRecord, Record};
pub use schema::{field_type, FieldType, SCHEMA};
