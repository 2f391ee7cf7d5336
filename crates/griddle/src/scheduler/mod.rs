//! # Scheduling Core
//!
//! The background machinery behind [`AsyncEngine`](crate::AsyncEngine).
//!
//! ## Module Structure
//!
//! * [`virtual_engine`] - The per-stage scheduling loop. Drains pending adds and
//!   aborts from the tracker, steps the executor while the stage has work, and
//!   parks on the new-request event when it does not.
//!
//! * [`worker`] - Spawning, waking and gracefully shutting down the set of
//!   per-stage background tasks. The `LoopWorkerHandle` type owns their
//!   join handles and the shared running flag.
//!
pub mod worker;
pub mod virtual_engine;
