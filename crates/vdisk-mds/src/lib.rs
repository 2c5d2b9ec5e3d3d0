//! vdisk-ops MDS safety
//!
//! Every vDisk keeps its metadata on a master MDS service plus slaves, up
//! to the safety of its vPool. This crate decides where:
//!
//! - [`load`]: how busy a service is, in integer percent of its capacity
//! - [`topology`]: the services of a vPool with their StorageRouter and domains
//! - [`candidates`]: services ordered for one vDisk by tier, load and previous use
//! - [`safety`]: the [`SafetyEngine`] that moves masters, picks slaves and
//!   writes the configuration to the volume driver and the store
//!
//! # Example
//!
//! ```ignore
//! let engine = SafetyEngine::new(ctx, &config);
//! let report = engine.mds_checkup(&"vpool-1".into()).await?;
//! for vdisk in report.checkup_required() {
//!     println!("{vdisk} waits for its new master to catch up");
//! }
//! ```

pub mod candidates;
pub mod load;
pub mod outcome;
pub mod safety;
pub mod topology;

pub use candidates::{Candidate, CandidateSelector};
pub use load::{Load, LoadPair, load};
pub use outcome::{CheckupReport, Deferral, SafetyOutcome, VDiskFailure};
pub use safety::{CHECKUP_REQUIRED, SafetyEngine, SafetyStats};
pub use topology::{MdsNode, MdsTopology, Tier};
