//! Sandcell shared types
//!
//! Value types passed between the classifier, the execution cell and the
//! orchestrator.
//!
//! # Core Concepts
//!
//! - [`ProgramText`]: immutable, untrusted program source
//! - [`ProgramDigest`]: 32-byte BLAKE3 digest binding approvals to a program
//! - [`ArtifactName`] / [`InputArtifact`]: validated files staged into a cell
//! - [`OutputArtifacts`]: files harvested from a cell's output root
//! - [`SandboxRoots`]: the only two writable locations inside a cell
//!
//! # Example
//!
//! ```rust
//! use sandcell_types::{InputArtifact, ProgramText, SandboxRoots};
//!
//! let program = ProgramText::from("import pandas as pd");
//! let input = InputArtifact::named("data.csv", b"a,b\n1,2\n".to_vec()).unwrap();
//!
//! assert!(SandboxRoots::default().contains("/tmp/input/data.csv"));
//! assert_eq!(input.name.as_str(), "data.csv");
//! assert_eq!(program.digest(), ProgramText::from("import pandas as pd").digest());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod artifact;
mod program;
mod roots;

pub use artifact::{ArtifactName, ArtifactNameError, InputArtifact, OutputArtifacts, MAX_NAME_LEN};
pub use program::{DigestError, ProgramDigest, ProgramText};
pub use roots::{normalize_posix, RootsError, SandboxRoots, DEFAULT_INPUT_ROOT, DEFAULT_OUTPUT_ROOT};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
