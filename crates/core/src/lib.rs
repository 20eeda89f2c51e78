//! Domain model for tracking thumbnail generation batches.
//!
//! Everything in this crate is synchronous and free of I/O: status
//! normalization, wire-shape tolerant snapshot parsing, and the
//! [`store::JobStatusStore`] that folds observations into a view model.

pub mod error;
pub mod item;
pub mod snapshot;
pub mod status;
pub mod store;
pub mod types;
