#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_docs)]
// Only the signal module needs `unsafe` (libc sigaction); see there.
#![deny(unsafe_code)]

//! # Overview
//!
//! `cowsync_engine` is the decision-making half of cowsync. Given a source
//! and a destination [`Root`] — a local btrfs mount, the same over SSH, a
//! directory of raw stream dumps, or a pipe — it discovers subvolumes,
//! relates them through their COW history, plans which transfers can be
//! incremental, and drives one `btrfs send | btrfs receive` flow per plan.
//!
//! # Design
//!
//! - [`Root`] is a closed tagged enum with a uniform capability surface.
//!   Unsupported operations are explicit [`EngineError::Configuration`]
//!   values, never silent no-ops.
//! - [`plan`] is pure: it reads two [`CowForest`](cowsync_btrfs::CowForest)s
//!   and emits an ordered [`PlanSet`]. Everything it decides is
//!   reproducible from its inputs, regardless of input order.
//! - [`Syncer`] executes plans strictly in order, one flow at a time; the
//!   kernel schedules the per-flow process parallelism. A per-plan stage
//!   failure is recorded and the run continues; configuration, protocol,
//!   consistency, and spawn errors abort the run.
//!
//! # Invariants
//!
//! - A plan's parent and clones exist at the source and have received
//!   counterparts at the destination; the parent never appears among the
//!   clones.
//! - When several stages of one flow fail, the earliest stage is reported
//!   as the primary cause; every stage's stderr tail is retained.
//!
//! # Errors
//!
//! [`EngineError`] carries the taxonomy; see [`SyncReport`] for how
//! per-plan failures and fatal aborts are surfaced together.

mod error;
mod exit_code;
mod plan;
mod root;
pub mod signal;
mod sync;

pub use error::{EngineError, FsErrorKind};
pub use exit_code::ExitCode;
pub use plan::{plan, Layout, Plan, PlanSet, SkipReason, Skipped};
pub use root::{
    Caps, DumpReadRoot, DumpWriteRoot, LocalRoot, PipeRoot, Receive, Root, SshRoot,
};
pub use sync::{
    ProgressObserver, SyncOptions, SyncReport, Syncer, TransferOutcome, TransferResult,
};
