//! Sandcell Core - the task orchestrator
//!
//! Sequences one untrusted program through:
//! - Static risk classification
//! - Blocking (HIGH) or asking for human approval (MEDIUM)
//! - Execution in a fresh, isolated cell (LOW, or approved MEDIUM)
//!
//! # Example
//!
//! ```rust,ignore
//! use sandcell_core::{SandcellConfig, TaskOrchestrator, TaskResult};
//! use sandcell_types::ProgramText;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = TaskOrchestrator::from_config(SandcellConfig::new()).await?;
//!
//! let program = ProgramText::from("import requests\nrequests.get('https://x')");
//! let result = orchestrator.execute(program.clone(), vec![]).await?;
//!
//! if let TaskResult::NeedsApproval { grant, code_preview, .. } = result {
//!     println!("review:\n{code_preview}");
//!     let approved = orchestrator.execute_approved(program, vec![], &grant).await?;
//!     println!("{}", approved.status());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod result;

pub use config::{
    ConfigError, SandcellConfig, DEFAULT_MAX_CONCURRENT_CELLS, ENV_DOCKER, ENV_IMAGE,
    ENV_TIMEOUT_SECS,
};
pub use error::OrchestratorError;
pub use orchestrator::TaskOrchestrator;
pub use result::{ApprovalGrant, TaskResult};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running untrusted programs
    pub use crate::{ApprovalGrant, SandcellConfig, TaskOrchestrator, TaskResult};
    pub use sandcell_cell::{ExecutionOutcome, IsolatedExecutionCell};
    pub use sandcell_classifier::{RiskClassifier, RiskTier, RiskVerdict};
    pub use sandcell_types::{InputArtifact, ProgramText, SandboxRoots};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
