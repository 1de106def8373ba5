//! Sandcell execution cell
//!
//! Runs one untrusted program in one throwaway container and always removes
//! the container afterwards.
//!
//! # Cell lifecycle
//!
//! 1. create from the base image (network disabled, read-only root, memory,
//!    CPU and process limits, all capabilities dropped)
//! 2. start the idle process
//! 3. stage input artifacts into the input root as one tar archive
//! 4. run `<interpreter> -` as the unprivileged user with the program on
//!    stdin, bounded by the wall-clock timeout and the output cap
//! 5. harvest the output root as one size-capped tar archive
//! 6. stop and remove, on every exit path
//!
//! Only steps 1 and 2 can fail the call ([`CellError`]); anything later is
//! reported in the [`ExecutionOutcome`].
//!
//! The container engine sits behind [`CellRuntime`]; [`DockerCli`] drives the
//! `docker` binary.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod archive;
mod cell;
mod config;
mod docker;
mod error;
mod outcome;
mod runtime;

pub use cell::IsolatedExecutionCell;
pub use config::{CellConfig, DEFAULT_MAX_ARTIFACT_BYTES, DEFAULT_MAX_OUTPUT_BYTES, MIN_MEMORY_BYTES};
pub use docker::DockerCli;
pub use error::{CellError, RuntimeError};
pub use outcome::{ExecutionFailure, ExecutionOutcome, INFRA_EXIT_STATUS, TIMEOUT_EXIT_STATUS};
pub use runtime::{CellId, CellRuntime, CellSpec, ExecCapture, ExecRequest};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
