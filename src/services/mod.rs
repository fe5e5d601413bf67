//! Async workflows over the shared editor state.
//!
//! ARCHITECTURE
//! ============
//! Service modules own multi-step work that crosses await points (remote
//! calls, raster encode/decode, polling) so the Layer Manager can stay a
//! synchronous aggregate mutated only under the document lock.

pub mod actions;
pub mod compose;
pub mod history;
pub mod persistence;
pub mod processor;
pub mod upload;
