#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_docs)]

//! # Overview
//!
//! `cowsync_cli` is the user-facing shell around the cowsync engine:
//! argument parsing, location-URL interpretation, include/exclude
//! matching, the confirmation prompt, progress rendering, and exit-code
//! mapping. The engine never sees any of this — it consumes parsed
//! locations and emits a structured report; everything here is
//! presentation.
//!
//! # Design
//!
//! - [`Args`] is a `clap` derive parser mirroring the tool's option set.
//! - [`parse_location`] turns the accepted endpoint forms (`path`,
//!   `user@host:path`, `file://dir`, `ssh://[user@]host[:port]/path`,
//!   `-`) into a [`Location`] value.
//! - [`run`] drives plan → confirm → execute per source and folds the
//!   per-source reports into one process exit code.

mod args;
mod location;
mod progress;
mod run;

pub use args::Args;
pub use location::{parse_location, Location, LocationError};
pub use progress::humanbytes;
pub use run::run;
