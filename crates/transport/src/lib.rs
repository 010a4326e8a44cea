#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_docs)]
// Raw-fd plumbing and child signalling need `unsafe` in two audited spots;
// everything else in the crate is forbidden from using it.
#![deny(unsafe_code)]

//! # Overview
//!
//! `cowsync_transport` models external commands as values and runs them as
//! wired process pipelines. It is the data plane underneath the cowsync
//! engine: the engine decides *what* to run (`btrfs send`, `btrfs receive`,
//! `ssh`, `cat`, user filters) and this crate decides *how* — argv
//! assembly, shell quoting, pipe wiring, the byte pump, and child
//! lifecycle.
//!
//! # Design
//!
//! - [`Cmd`] is an immutable description of one command invocation: argv,
//!   environment overrides, and [`StreamSpec`] dispositions for the three
//!   standard streams. Commands stay values until the moment of execution.
//! - [`Pipeline`] composes commands stdout-to-stdin. Local pipelines are
//!   wired with OS pipes; remote composition renders a single quoted shell
//!   string instead (see [`SshTarget`]).
//! - [`SshTarget`] wraps a command for execution on a remote host. Wrapping
//!   an already-piped local pipeline is rejected: local pipe wiring and
//!   remote shell pipelines are different operations and must not be mixed.
//! - [`Flow`] materializes a producer pipeline, an optional consumer
//!   pipeline, and a [`FlowSink`] into running processes joined by kernel
//!   pipes, with a single splice-based byte pump bridging the producer and
//!   consumer sides.
//!
//! # Invariants
//!
//! - Every intermediate pipe end is owned by exactly one stage after
//!   spawning; no stage can observe bytes destined for another.
//! - A [`Flow`] releases every child handle and every pipe descriptor on
//!   every exit path, including spawn failure and cancellation.
//! - Quoting through [`shell_quote`] round-trips arbitrary argument bytes
//!   through a POSIX shell unchanged.
//!
//! # Errors
//!
//! Fallible operations return [`TransportError`]. Spawn failures carry the
//! offending program name; refusing to overwrite a sink file is its own
//! variant so callers can treat it as a per-transfer failure rather than a
//! fatal error.

mod cmd;
mod error;
mod flow;
mod pump;
mod quote;
mod spawn;
mod ssh;

pub use cmd::{Cmd, Pipeline, StreamSpec};
pub use error::TransportError;
pub use flow::{Flow, FlowOutcome, FlowSink, StageStatus};
pub use quote::{needs_quoting, shell_quote};
pub use spawn::{run_capture, Capture};
pub use ssh::SshTarget;
