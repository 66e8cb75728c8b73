//! Domain models and pure algorithms shared by the sync engine: the data
//! model from the sync config down to checkpoints, the field mapper, the
//! linked-record resolution algorithm, and the conflict detector.
//!
//! Nothing in this crate performs I/O. HTTP clients, encryption, and
//! persistence live in `sync-clients`, `sync-credentials`, and
//! `sync-storage` respectively; this crate is what they all agree on.

pub mod config;
pub mod conflict;
pub mod field;
pub mod linking;
pub mod mapping;
pub mod model;

pub use config::EngineConfig;
pub use field::{FieldType, FieldValue};
pub use model::*;
