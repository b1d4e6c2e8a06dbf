// src/exec/mod.rs

//! Step execution layer.
//!
//! - [`template`] substitutes `{inputs.*}`, `{outputs.*}` and `{params.*}`
//!   placeholders into command templates.
//! - [`process`] defines the `ToolInvoker` capability and the process-backed
//!   `ProcessInvoker`.
//! - [`executor_loop`] owns the main executor loop which manages running steps.
//! - [`step_runner`] runs one step through the Working-Directory Manager and
//!   reports back to the runtime.
//! - [`backend`] provides the `ExecutorBackend` trait and the concrete
//!   `RealExecutorBackend` that the runtime uses in production, and which
//!   tests can replace with a fake implementation.

pub mod backend;
pub mod executor_loop;
pub mod process;
pub mod step_runner;
pub mod template;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use process::{Invocation, InvocationResult, ProcessInvoker, ToolInvoker};
