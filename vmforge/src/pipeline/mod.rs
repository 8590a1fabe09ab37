//! Step pipeline runtime.
//!
//! This module provides the sequencing core every build runs on:
//! - An ordered list of steps sharing one [`StateBag`]
//! - Fail-fast halting and cooperative cancellation
//! - Cleanup of every started step, in reverse order, on every exit path
//!
//! ## Architecture
//!
//! ```text
//! Runner → Steps → StateBag
//!
//! - Runner: runs steps in order, pauses in debug mode, unwinds cleanup
//! - Step: run() returns Continue / Halt / AskForInput; cleanup() tears down
//! - StateBag: typed key/value store (driver, ui, vmName, ip, error, ...)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use pipeline::{BasicRunner, Runner, StateBag, keys};
//!
//! let mut state = StateBag::new();
//! state.put(keys::UI, ui);
//!
//! let mut runner = BasicRunner::new(vec![Box::new(StepA), Box::new(StepB)]);
//! let metrics = runner.run(&mut state).await;
//! if let Some(err) = state.error() {
//!     eprintln!("build failed after {}ms: {}", metrics.total_duration_ms, err);
//! }
//! ```

mod metrics;
mod runner;
mod state;
mod step;

pub use metrics::{PipelineMetrics, RunOutcome, StepMetrics};
pub use runner::{BasicRunner, DebugPause, DebugRunner, PauseLocation, Runner, UiPause};
pub use state::{StateBag, StateValue, keys};
pub use step::{BoxedStep, Step, StepAction};
