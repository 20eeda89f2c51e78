//! Client-side tracking of remote thumbnail generation batches.
//!
//! Polls the generation REST API, subscribes to push events over
//! WebSocket (falling back to long-polling), and reconciles both
//! sources into a single [`thumbmaker_core::store::GenerationView`]
//! per generation set.

pub mod api;
pub mod config;
pub mod events;
pub mod messages;
pub mod polling;
pub mod push;
pub mod reconciler;
pub mod reconnect;
pub mod registry;
pub mod tracker;
pub mod transport;
