//! Domain layer: data model and the ports plugins and adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DatabaseError, MergeError, QcError};
