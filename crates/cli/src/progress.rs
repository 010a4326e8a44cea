//! Transfer reporting: per-plan lines and the live progress ticker.

use std::io::Write;
use std::time::{Duration, Instant};

use cowsync_engine::{Plan, ProgressObserver, TransferOutcome, TransferResult};

/// Renders `n` bytes in human-readable IEC units.
///
/// # Examples
///
/// ```
/// use cowsync_cli::humanbytes;
///
/// assert_eq!(humanbytes(512), "512.0   B");
/// assert_eq!(humanbytes(6 * 1024), "  6.0 KiB");
/// ```
#[must_use]
pub fn humanbytes(n: u64) -> String {
    const UNITS: [&str; 6] = ["  B", "KiB", "MiB", "GiB", "TiB", "EiB"];
    let mut value = n as f64;
    for unit in &UNITS[..UNITS.len() - 1] {
        if value < 1024.0 {
            return format!("{value:5.1} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:5.1} {}", UNITS[UNITS.len() - 1])
}

/// Formats the one-line (or verbose multi-line) account of a plan.
#[must_use]
pub fn format_transfer(plan: &Plan, verbose: bool) -> String {
    if verbose {
        let basis = match &plan.parent {
            Some(parent) => format!("incremental from {}", parent.path),
            None => "full".to_owned(),
        };
        format!(
            "\n{}\n\t{}\n\tinto {}",
            plan.src_vol.path, basis, plan.dst_path
        )
    } else {
        let kind = if plan.is_incremental() { "incr" } else { "full" };
        format!("{}\t{} -> {}", plan.src_vol.path, kind, plan.dst_path)
    }
}

const SPINNER: [char; 4] = ['|', '/', '-', '\\'];

/// Observer printing transfer lines and, optionally, a live byte ticker.
pub struct CliReporter {
    verbose: bool,
    quiet: bool,
    show_progress: bool,
    period: Duration,
    spinner: usize,
    started: Instant,
    last_print: Option<Instant>,
    last_bytes: u64,
    ticking: bool,
}

impl CliReporter {
    /// Creates a reporter.
    ///
    /// `quiet` suppresses the per-transfer lines; `show_progress` enables
    /// the in-place ticker, refreshed every `period`.
    #[must_use]
    pub fn new(verbose: bool, quiet: bool, show_progress: bool, period: Duration) -> Self {
        Self {
            verbose,
            quiet,
            show_progress,
            period,
            spinner: 0,
            started: Instant::now(),
            last_print: None,
            last_bytes: 0,
            ticking: false,
        }
    }

    fn tick(&mut self, total: u64) {
        let now = Instant::now();
        let elapsed = match self.last_print {
            Some(last) if now.duration_since(last) < self.period => return,
            Some(last) => now.duration_since(last),
            None => now.duration_since(self.started).max(Duration::from_millis(1)),
        };
        let rate = (total.saturating_sub(self.last_bytes)) as f64 / elapsed.as_secs_f64();
        print!(
            "\r{} {} {}/sec",
            SPINNER[self.spinner],
            humanbytes(total),
            humanbytes(rate as u64)
        );
        let _ = std::io::stdout().flush();
        self.spinner = (self.spinner + 1) % SPINNER.len();
        self.last_print = Some(now);
        self.last_bytes = total;
        self.ticking = true;
    }
}

impl ProgressObserver for CliReporter {
    fn plan_started(&mut self, plan: &Plan) {
        if !self.quiet {
            println!("{}", format_transfer(plan, self.verbose));
        }
        self.started = Instant::now();
        self.last_print = None;
        self.last_bytes = 0;
        self.ticking = false;
    }

    fn bytes_moved(&mut self, _plan: &Plan, total: u64) {
        if self.show_progress {
            self.tick(total);
        }
    }

    fn plan_finished(&mut self, outcome: &TransferOutcome) {
        if self.ticking {
            println!();
            self.ticking = false;
        }
        if self.quiet {
            return;
        }
        match &outcome.result {
            TransferResult::Completed { bytes, .. } => {
                println!(" - done ({})", humanbytes(*bytes).trim_start());
            }
            TransferResult::Failed { .. } | TransferResult::Error(_) => {
                println!(" - failed");
            }
        }
    }
}
