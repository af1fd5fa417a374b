//! Sandbox: static vetting and resource-limited execution of candidate code.
//!
//! Candidates are validated before anything runs, executed once in a
//! restricted namespace inside their own runner process, and reported back
//! over a one-line JSON protocol. Runner processes are single-shot; the
//! [`supervisor`] on the caller side owns the wall-clock budget.
//!
//! # Modules
//!
//! - [`validator`]  — `validate()` (breadth-first walk, first violation wins)
//! - [`namespace`]  — `build_namespace()` (builtin whitelist + `math`)
//! - [`limits`]     — `ResourceLimits`, `install_cpu_limit_handler()`
//! - [`protocol`]   — `ExecutionResult`, payloads, argument cascade, wire lines
//! - [`runner`]     — `run_strategy()`, `run_scoring()`, `serve()`, `spawn_worker()`
//! - [`supervisor`] — `SupervisorConfig`, `launch()` (async, caller side)
//! - [`error`]      — `SandboxError` / `SandboxResult`

pub mod error;
pub mod limits;
pub mod namespace;
pub mod protocol;
pub mod runner;
pub mod supervisor;
pub mod validator;

pub use error::{SandboxError, SandboxResult, Stage};
pub use limits::ResourceLimits;
pub use namespace::build_namespace;
pub use protocol::{resolve_argument, ExecutionResult, RunnerKind, ScoringPayload, StrategyPayload};
pub use runner::{run_scoring, run_strategy, serve, spawn_worker};
pub use supervisor::{launch, RunnerBinary, RunnerOutcome, SupervisorConfig};
pub use validator::validate;
