//! # Griddle
//!
//! An asynchronous front-end for stepping inference engines.
//!
//! ## Overview
//!
//! Griddle accepts a continuous stream of generation requests, multiplexes
//! them onto an executor that advances all of its in-flight requests one step
//! at a time, and streams each request's outputs back to its caller as they
//! are produced. Token generation itself is delegated to the executor; this
//! crate owns the orchestration around it:
//!
//! - when to invoke the executor, and when to sleep instead
//! - waking promptly when new work or an abort arrives
//! - routing outputs to the right caller, and tearing down cleanly on cancellation
//!
//! ## Architecture
//!
//! ### Executor
//!
//! The [`ExecutorAdapter`] trait is the capability set the engine needs from
//! the executor: report unfinished work per stage, step a stage, admit and
//! abort requests, and stop remote execution on shutdown.
//!
//! ### Virtual engines
//!
//! A deployment with pipeline parallelism has several stages, each driven by
//! its own [`VirtualEngineLoop`](scheduler::virtual_engine::VirtualEngineLoop) task.
//! A loop steps continuously while its stage has work and parks on the shared
//! [`NewRequestEvent`] otherwise, so an idle engine performs no steps at all.
//!
//! ### Request tracking
//!
//! The [`RequestTracker`] maps request ids to their output streams and holds
//! adds and aborts until a loop forwards them to the executor. Outputs for
//! requests that have already finished or been aborted are dropped.
//!
//! ## Example
//!
//! ```ignore
//! use futures::StreamExt;
//! use griddle::{AsyncEngine, EngineConfig};
//!
//! let engine = AsyncEngine::new(executor, EngineConfig::default());
//! engine.start_background_loop()?;
//!
//! let mut outputs = engine.generate(prompt, params, "request-0")?;
//! while let Some(output) = outputs.next().await {
//!     println!("{:?}", output?.output);
//! }
//! ```
//!
//! ## Logging
//!
//! Everything is reported through `tracing`. Binaries can call
//! [`logging::init`] to install a subscriber filtered by `GRIDDLE_LOG`.

mod communication;
mod engine;
mod error;
mod executor;
mod tracker;

pub mod config;
pub mod scheduler;
pub mod logging;

#[cfg(test)]
pub(crate) mod mock_executor;

pub use communication::{ItemStream, NewRequestEvent, RequestOutput, RequestStream, StreamItem};
pub use config::EngineConfig;
pub use scheduler::virtual_engine::LoopState;
pub use engine::{AsyncEngine, GenerateStream};
pub use error::{EngineError, ExecutorError, Result};
pub use executor::{EngineRequest, ExecutorAdapter, StepOutput};
pub use tracker::RequestTracker;
