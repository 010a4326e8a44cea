#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_docs)]

//! # Overview
//!
//! `cowsync_btrfs` holds everything cowsync knows about btrfs subvolumes
//! without touching a filesystem: the [`Vol`] record, the parser for
//! `btrfs subvolume list` output, the [`CowForest`] tying subvolumes
//! together along snapshot and received-from relations, and builders for
//! the `btrfs` invocations the engine runs.
//!
//! # Design
//!
//! - [`Vol`] carries the three UUIDs btrfs maintains per subvolume. The
//!   `uuid` identifies the subvolume itself; `parent_uuid` names its
//!   snapshot source; `received_uuid` names the subvolume a received copy
//!   originated from. The `-` placeholder printed by btrfs maps to
//!   [`Uuid::nil`](uuid::Uuid::nil) and back.
//! - [`parse_list`] consumes the tabular (`-t`) listing format. Column
//!   lookup is driven by the header line so added columns are ignored,
//!   while a missing required column fails loudly.
//! - [`CowForest`] is an arena with a uuid index. Snapshot edges are
//!   resolved in [`CowForest::build`]; a `parent_uuid` that resolves to
//!   nothing (a deleted snapshot source) simply makes the child a forest
//!   root.
//!
//! # Invariants
//!
//! - After [`CowForest::build`], every subvolume has exactly one forest
//!   root, every resolved edge satisfies
//!   `child.parent_uuid == parent.uuid`, and the uuid index holds each
//!   subvolume exactly once.
//! - Snapshot edges are acyclic; a cycle reported by btrfs is a
//!   [`CowError::Cycle`], never an infinite loop.
//!
//! # Errors
//!
//! Parsing failures are [`ParseError`]; forest inconsistencies are
//! [`CowError`]. Both are plain data for the engine to wrap.

mod cmd;
mod cow;
mod error;
mod list;
mod vol;

pub use cmd::{list_cmd, list_readonly_cmd, receive_cmd, send_cmd};
pub use cow::CowForest;
pub use error::{CowError, ParseError};
pub use list::{parse_list, FS_TREE};
pub use vol::Vol;
