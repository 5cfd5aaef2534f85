//! Convenient re-exports for downstream crates.

pub use crate::attributes::Attributes;
pub use crate::config::EngineConfig;
pub use crate::error::{Error, Result};
pub use crate::id::{RunId, SpillId};
pub use crate::key::{KeyField, KeyValues, RecordKey};
pub use crate::schema::{DataType, Field, Schema};
pub use crate::types::{Record, Scalar};
