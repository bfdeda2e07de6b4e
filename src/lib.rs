//! Download core: probe a target, plan chunks, fetch them in parallel with
//! positional writes into a pre-sized file, report progress, and hand
//! completed companion tracks to an external muxer.
//!
//! The command surface, site-specific extractors, AI post-processing, and
//! authentication flows live around this crate, not in it. This crate
//! only owns the byte-correctness and throughput of one download.

pub mod assembler;
pub mod client;
pub mod error;
pub mod extractor;
pub mod plan;
pub mod probe;
pub mod progress;
pub mod session;
pub mod types;
pub mod webdav;

pub use error::{DownloadError, Result};
pub use session::DownloadSession;
pub use types::{DownloadPlan, ProgressSnapshot, ResolvedFormat, SessionOutcome};
