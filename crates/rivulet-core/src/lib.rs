#![forbid(unsafe_code)]
//! rivulet-core: records, schemas, record keys and configuration.
//!
//! Everything in here is pure data plus comparison logic. Spilling, ports and
//! operators live in the downstream crates; they all speak the types below.

pub mod attributes;
pub mod budget;
pub mod config;
pub mod error;
pub mod hash;
pub mod id;
pub mod key;
pub mod prelude;
pub mod schema;
pub mod types;
