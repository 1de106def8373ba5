//! Testing utilities for the sandcell workspace
//!
//! An in-memory container runtime with fault injection, plus shared programs,
//! inputs and cell fixtures.

#![allow(missing_docs)]

pub mod fake;
pub mod fixtures;

pub use fake::{Behavior, ExecContext, FakeRuntime, FaultStep, FAKE_IMAGE};
pub use fixtures::*;
