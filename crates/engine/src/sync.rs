//! The transfer executor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{info, warn};

use cowsync_btrfs::{CowForest, Vol};
use cowsync_transport::{Flow, FlowOutcome, StageStatus, TransportError};

use crate::error::{EngineError, FsErrorKind};
use crate::exit_code::ExitCode;
use crate::plan::{plan, Layout, Plan, PlanSet, Skipped};
use crate::root::Root;

/// Tunables of a sync run.
#[derive(Clone, Debug)]
pub struct SyncOptions {
    /// Skip subvolumes that would need a full transfer.
    pub incremental_only: bool,
    /// Destination path layout.
    pub layout: Layout,
    /// Drain deadline for flow stages after EOF or cancellation.
    pub shutdown_grace: Duration,
    /// Byte interval between progress callbacks.
    pub progress_threshold: u64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            incremental_only: false,
            layout: Layout::Flatten,
            shutdown_grace: Duration::from_secs(5),
            progress_threshold: 1 << 20,
        }
    }
}

/// Callbacks surfaced while transfers run. All methods default to no-ops
/// so observers implement only what they render.
pub trait ProgressObserver {
    /// A plan is about to run.
    fn plan_started(&mut self, _plan: &Plan) {}
    /// The running plan's byte tally crossed a reporting threshold; also
    /// called once with the final tally.
    fn bytes_moved(&mut self, _plan: &Plan, _total: u64) {}
    /// A plan finished, successfully or not.
    fn plan_finished(&mut self, _outcome: &TransferOutcome) {}
}

/// How one plan ended.
#[derive(Debug)]
pub enum TransferResult {
    /// Every stage exited 0.
    Completed {
        /// Bytes the bridge pump moved.
        bytes: u64,
        /// Exit records of every stage, including stderr tails.
        stages: Vec<StageStatus>,
    },
    /// Some stage exited nonzero.
    Failed {
        /// Index of the earliest failing stage — the primary cause, even
        /// when a later stage also failed.
        first_failed: usize,
        /// Exit records of every stage.
        stages: Vec<StageStatus>,
    },
    /// The flow could not run at all (e.g. the dump file already exists).
    Error(EngineError),
}

/// One plan paired with its result.
#[derive(Debug)]
pub struct TransferOutcome {
    /// The plan that ran.
    pub plan: Plan,
    /// What happened.
    pub result: TransferResult,
}

impl TransferOutcome {
    /// Whether the transfer completed successfully.
    #[must_use]
    pub fn success(&self) -> bool {
        matches!(self.result, TransferResult::Completed { .. })
    }

    /// Bytes moved, for completed transfers.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        match &self.result {
            TransferResult::Completed { bytes, .. } => *bytes,
            _ => 0,
        }
    }

    /// The primary failing stage, for failed transfers.
    #[must_use]
    pub fn first_failed_stage(&self) -> Option<&StageStatus> {
        match &self.result {
            TransferResult::Failed {
                first_failed,
                stages,
            } => stages.get(*first_failed),
            _ => None,
        }
    }
}

/// Aggregated result of a run.
#[derive(Debug)]
pub struct SyncReport {
    /// Plans that completed.
    pub completed: Vec<TransferOutcome>,
    /// Plans that failed; the run continued past them.
    pub failed: Vec<TransferOutcome>,
    /// Subvolumes the planner left out.
    pub skipped: Vec<Skipped>,
    /// Set when the run stopped early: [`EngineError::Cancelled`] on
    /// interrupt, any other fatal error otherwise.
    pub aborted: Option<EngineError>,
}

impl SyncReport {
    /// Whether everything planned was transferred.
    #[must_use]
    pub fn all_ok(&self) -> bool {
        self.failed.is_empty() && self.aborted.is_none()
    }

    /// The process exit code this run maps to.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match &self.aborted {
            Some(EngineError::Cancelled) => ExitCode::Interrupted,
            Some(_) => ExitCode::Usage,
            None if !self.failed.is_empty() => ExitCode::Partial,
            None => ExitCode::Ok,
        }
    }
}

enum PlanError {
    /// Recorded against the plan; the run continues.
    PerPlan(EngineError),
    /// Aborts the run.
    Fatal(EngineError),
}

/// Drives planned transfers from a source root to a destination root,
/// one flow at a time, in plan order.
#[derive(Debug)]
pub struct Syncer {
    src: Root,
    dst: Root,
    opts: SyncOptions,
}

impl Syncer {
    /// Pairs two roots, checking their capabilities up front.
    ///
    /// # Errors
    ///
    /// [`EngineError::Configuration`] when the source cannot send or the
    /// destination cannot receive.
    pub fn new(src: Root, dst: Root, opts: SyncOptions) -> Result<Self, EngineError> {
        if !src.capabilities().can_send {
            return Err(EngineError::Configuration(format!(
                "{} cannot be used as a source",
                src.name()
            )));
        }
        if !dst.capabilities().can_receive {
            return Err(EngineError::Configuration(format!(
                "{} cannot be used as a destination",
                dst.name()
            )));
        }
        Ok(Self { src, dst, opts })
    }

    /// The source root.
    #[must_use]
    pub fn src(&self) -> &Root {
        &self.src
    }

    /// The destination root.
    #[must_use]
    pub fn dst(&self) -> &Root {
        &self.dst
    }

    /// Lists both roots and plans transfers for the subvolumes `select`
    /// accepts.
    ///
    /// # Errors
    ///
    /// Listing, parsing, and consistency failures; all fatal.
    pub fn plan(&self, select: &dyn Fn(&Vol) -> bool) -> Result<PlanSet, EngineError> {
        let src_forest = self.src.list()?;
        let dst_forest = if self.dst.capabilities().needs_list_for_planning {
            self.dst.list()?
        } else {
            CowForest::new()
        };
        Ok(plan(
            &src_forest,
            &dst_forest,
            select,
            self.opts.layout,
            self.opts.incremental_only,
        ))
    }

    /// Runs every plan in order, collecting per-plan outcomes.
    ///
    /// A failing stage is recorded and the next plan still runs; fatal
    /// errors (configuration, spawn, pre-flight filesystem checks) and
    /// cancellation stop the run and are recorded in
    /// [`SyncReport::aborted`].
    pub fn execute(
        &self,
        set: PlanSet,
        mut observer: Option<&mut dyn ProgressObserver>,
        cancel: Option<&AtomicBool>,
    ) -> SyncReport {
        let mut report = SyncReport {
            completed: Vec::new(),
            failed: Vec::new(),
            skipped: set.skipped,
            aborted: None,
        };

        for plan in set.plans {
            if cancel.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                report.aborted = Some(EngineError::Cancelled);
                break;
            }

            if let Some(obs) = observer.as_deref_mut() {
                obs.plan_started(&plan);
            }
            info!(
                subvol = %plan.src_vol.path,
                kind = plan.kind(),
                dst = %plan.dst_path,
                "starting transfer"
            );

            match self.run_plan(&plan, observer.as_deref_mut(), cancel) {
                Ok(outcome) => {
                    let cancelled = outcome.cancelled;
                    let first_failed = outcome.first_failure().map(|stage| stage.index);
                    let result = match first_failed {
                        None => TransferResult::Completed {
                            bytes: outcome.bytes,
                            stages: outcome.stages,
                        },
                        Some(first_failed) => TransferResult::Failed {
                            first_failed,
                            stages: outcome.stages,
                        },
                    };
                    let transfer = TransferOutcome { plan, result };
                    if let Some(obs) = observer.as_deref_mut() {
                        obs.plan_finished(&transfer);
                    }
                    if transfer.success() {
                        report.completed.push(transfer);
                    } else {
                        report.failed.push(transfer);
                    }
                    if cancelled {
                        report.aborted = Some(EngineError::Cancelled);
                        break;
                    }
                }
                Err(PlanError::PerPlan(err)) => {
                    warn!(subvol = %plan.src_vol.path, error = %err, "transfer failed");
                    let transfer = TransferOutcome {
                        plan,
                        result: TransferResult::Error(err),
                    };
                    if let Some(obs) = observer.as_deref_mut() {
                        obs.plan_finished(&transfer);
                    }
                    report.failed.push(transfer);
                }
                Err(PlanError::Fatal(err)) => {
                    report.aborted = Some(err);
                    break;
                }
            }
        }
        report
    }

    /// Convenience: plan then execute in one call.
    ///
    /// # Errors
    ///
    /// Propagates planning failures; execution failures are inside the
    /// returned report.
    pub fn sync(
        &self,
        select: &dyn Fn(&Vol) -> bool,
        observer: Option<&mut dyn ProgressObserver>,
        cancel: Option<&AtomicBool>,
    ) -> Result<SyncReport, EngineError> {
        let set = self.plan(select)?;
        Ok(self.execute(set, observer, cancel))
    }

    fn run_plan(
        &self,
        plan: &Plan,
        observer: Option<&mut (dyn ProgressObserver + '_)>,
        cancel: Option<&AtomicBool>,
    ) -> Result<FlowOutcome, PlanError> {
        let producer = self
            .src
            .send_pipeline(&plan.src_vol, plan.parent.as_ref(), &plan.clones)
            .map_err(PlanError::Fatal)?;
        self.dst
            .prepare_receive(&plan.dst_path)
            .map_err(PlanError::Fatal)?;
        let receive = self.dst.receive(&plan.dst_path).map_err(PlanError::Fatal)?;

        let flow = Flow::new(producer, receive.consumer, receive.sink)
            .map_err(|err| PlanError::Fatal(err.into()))?
            .grace(self.opts.shutdown_grace)
            .progress_threshold(self.opts.progress_threshold);

        let mut observer = observer;
        let has_observer = observer.is_some();
        let mut on_bytes = |total: u64| {
            if let Some(obs) = observer.as_deref_mut() {
                obs.bytes_moved(plan, total);
            }
        };
        let progress: Option<&mut dyn FnMut(u64)> = if has_observer {
            Some(&mut on_bytes)
        } else {
            None
        };

        flow.run(cancel, progress).map_err(|err| match err {
            TransportError::SinkExists(path) => PlanError::PerPlan(EngineError::Filesystem {
                kind: FsErrorKind::FileExists,
                path,
            }),
            err @ TransportError::Spawn { .. } => PlanError::Fatal(err.into()),
            err => PlanError::PerPlan(err.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::root::{DumpReadRoot, DumpWriteRoot, PipeRoot};
    use std::path::Path;

    fn dump_pair(src: &Path, dst: &Path) -> Syncer {
        Syncer::new(
            Root::DumpRead(DumpReadRoot::new(src)),
            Root::DumpWrite(DumpWriteRoot::new(dst)),
            SyncOptions::default(),
        )
        .unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        started: Vec<String>,
        finished: Vec<bool>,
        last_bytes: u64,
    }

    impl ProgressObserver for Recorder {
        fn plan_started(&mut self, plan: &Plan) {
            self.started.push(plan.src_vol.path.clone());
        }
        fn bytes_moved(&mut self, _plan: &Plan, total: u64) {
            self.last_bytes = total;
        }
        fn plan_finished(&mut self, outcome: &TransferOutcome) {
            self.finished.push(outcome.success());
        }
    }

    #[test]
    fn dump_to_dump_round_trip() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("alpha.stream"), b"alpha bytes").unwrap();
        std::fs::write(src.path().join("beta.stream"), b"beta bytes").unwrap();

        let syncer = dump_pair(src.path(), dst.path());
        let set = syncer.plan(&|_| true).unwrap();
        assert_eq!(set.plans.len(), 2);
        assert!(set.plans.iter().all(|p| !p.is_incremental()));

        let mut recorder = Recorder::default();
        let report = syncer.execute(set, Some(&mut recorder), None);

        assert!(report.all_ok());
        assert_eq!(report.exit_code(), ExitCode::Ok);
        assert_eq!(report.completed.len(), 2);
        assert_eq!(recorder.started, ["alpha", "beta"]);
        assert_eq!(recorder.finished, [true, true]);
        assert_eq!(recorder.last_bytes, 10);

        assert_eq!(
            std::fs::read(dst.path().join("alpha.stream")).unwrap(),
            b"alpha bytes"
        );
        assert_eq!(
            std::fs::read(dst.path().join("beta.stream")).unwrap(),
            b"beta bytes"
        );
    }

    #[test]
    fn existing_dump_fails_the_plan_but_not_the_run() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.stream"), b"new").unwrap();
        std::fs::write(src.path().join("b.stream"), b"fresh").unwrap();
        std::fs::write(dst.path().join("a.stream"), b"old").unwrap();

        let syncer = dump_pair(src.path(), dst.path());
        let report = syncer.sync(&|_| true, None, None).unwrap();

        assert_eq!(report.completed.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert!(report.aborted.is_none());
        assert_eq!(report.exit_code(), ExitCode::Partial);

        match &report.failed[0].result {
            TransferResult::Error(EngineError::Filesystem { kind, .. }) => {
                assert_eq!(*kind, FsErrorKind::FileExists);
            }
            other => panic!("expected filesystem error, got {other:?}"),
        }
        // The existing dump is untouched and the other transfer landed.
        assert_eq!(std::fs::read(dst.path().join("a.stream")).unwrap(), b"old");
        assert_eq!(std::fs::read(dst.path().join("b.stream")).unwrap(), b"fresh");
    }

    #[test]
    fn preset_cancel_flag_aborts_before_any_transfer() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.stream"), b"data").unwrap();

        let syncer = dump_pair(src.path(), dst.path());
        let cancel = AtomicBool::new(true);
        let report = syncer.sync(&|_| true, None, Some(&cancel)).unwrap();

        assert!(matches!(report.aborted, Some(EngineError::Cancelled)));
        assert!(report.completed.is_empty());
        assert_eq!(report.exit_code(), ExitCode::Interrupted);
        assert!(!dst.path().join("a.stream").exists());
    }

    #[test]
    fn incremental_only_reports_skips_for_dump_sources() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.stream"), b"data").unwrap();

        let syncer = Syncer::new(
            Root::DumpRead(DumpReadRoot::new(src.path())),
            Root::DumpWrite(DumpWriteRoot::new(dst.path())),
            SyncOptions {
                incremental_only: true,
                ..SyncOptions::default()
            },
        )
        .unwrap();

        let report = syncer.sync(&|_| true, None, None).unwrap();
        assert!(report.completed.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.exit_code(), ExitCode::Ok);
    }

    #[test]
    fn selection_narrows_the_run() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("keep.stream"), b"k").unwrap();
        std::fs::write(src.path().join("drop.stream"), b"d").unwrap();

        let syncer = dump_pair(src.path(), dst.path());
        let report = syncer
            .sync(&|v: &Vol| v.path == "keep", None, None)
            .unwrap();

        assert_eq!(report.completed.len(), 1);
        assert!(dst.path().join("keep.stream").exists());
        assert!(!dst.path().join("drop.stream").exists());
    }

    #[test]
    fn capability_mismatch_is_a_configuration_error() {
        let err = Syncer::new(
            Root::Pipe(PipeRoot),
            Root::Pipe(PipeRoot),
            SyncOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }
}
