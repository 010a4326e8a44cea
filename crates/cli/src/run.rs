//! The CLI driver: build roots, plan, confirm, execute, render.

use std::io::{self, BufRead, Write};
use std::time::Duration;

use clap::Parser;
use globset::{Glob, GlobSet, GlobSetBuilder};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use cowsync_engine::{
    signal, DumpReadRoot, DumpWriteRoot, EngineError, ExitCode, Layout, LocalRoot, PipeRoot,
    PlanSet, ProgressObserver, Root, SshRoot, SyncOptions, SyncReport, Syncer, TransferResult,
};
use cowsync_transport::SshTarget;

use crate::args::Args;
use crate::location::{parse_location, Location, LocationError};
use crate::progress::{format_transfer, CliReporter};

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Location(#[from] LocationError),
    #[error("invalid glob: {0}")]
    Glob(#[from] globset::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Parses the process arguments, runs the sync, and returns the process
/// exit code.
#[must_use]
pub fn run() -> std::process::ExitCode {
    let args = Args::parse();
    init_tracing(&args);

    match drive(&args) {
        Ok(code) => code.into(),
        Err(err) => {
            eprintln!("cowsync: {err}");
            ExitCode::Usage.into()
        }
    }
}

fn init_tracing(args: &Args) {
    let default = if args.quiet > 0 {
        "error"
    } else if args.verbose {
        "debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn drive(args: &Args) -> Result<ExitCode, CliError> {
    signal::install()?;

    let matcher = Matcher::new(&args.include, &args.exclude)?;
    let dst_root = dest_root(parse_location(args.dest())?, args)?;
    let opts = SyncOptions {
        incremental_only: args.incremental_only,
        layout: if args.replicate_dirs {
            Layout::Replicate
        } else {
            Layout::Flatten
        },
        ..SyncOptions::default()
    };

    let mut code = ExitCode::Ok;
    'sources: for source in args.sources() {
        // A signal during the prompt or an earlier source stops here
        // before any further root is touched.
        if signal::is_cancelled() {
            code = worst(code, ExitCode::Interrupted);
            break;
        }
        let src_root = source_root(parse_location(source)?, args)?;
        let syncer = Syncer::new(src_root, dst_root.clone(), opts.clone())?;

        let set = syncer.plan(&|vol| matcher.matches(&vol.path))?;
        if args.quiet == 0 {
            preview(source, &set, args.verbose);
        }
        if args.dry_run || set.is_empty() {
            continue;
        }
        if !args.yes {
            match ask_confirmation()? {
                Answer::Yes => {}
                Answer::Skip => continue,
                Answer::No => break 'sources,
            }
        }

        let mut reporter = CliReporter::new(
            args.verbose,
            args.quiet > 0,
            args.progress && args.quiet == 0,
            Duration::from_secs(1),
        );
        let observer: Option<&mut dyn ProgressObserver> = Some(&mut reporter);
        let report = syncer.execute(set, observer, Some(signal::cancel_flag()));

        // A second signal means stop now: no rendering, no further
        // sources.
        if signal::is_abort_requested() {
            return Ok(worst(code, ExitCode::Interrupted));
        }

        render_failures(&report, args);
        code = worst(code, report.exit_code());
        if let Some(aborted) = &report.aborted {
            if args.quiet < 2 {
                eprintln!("cowsync: {aborted}");
            }
            break;
        }
    }
    Ok(code)
}

/// Prefer the most severe of two exit codes, with interruption trumping
/// everything.
fn worst(a: ExitCode, b: ExitCode) -> ExitCode {
    let rank = |code: ExitCode| match code {
        ExitCode::Ok => 0,
        ExitCode::Partial => 1,
        ExitCode::Usage => 2,
        ExitCode::Interrupted => 3,
    };
    if rank(b) > rank(a) { b } else { a }
}

fn preview(source: &str, set: &PlanSet, verbose: bool) {
    println!("At source {source}");
    if set.plans.is_empty() {
        println!("Nothing to do");
    } else {
        for plan in &set.plans {
            println!("{}", format_transfer(plan, verbose));
        }
    }
    if verbose {
        for skip in &set.skipped {
            println!("skipping {}: {}", skip.vol.path, skip.reason);
        }
    }
}

fn render_failures(report: &SyncReport, args: &Args) {
    if args.quiet >= 2 {
        return;
    }
    for failure in &report.failed {
        match &failure.result {
            TransferResult::Error(err) => {
                eprintln!("Error: {err}");
                eprintln!("@ {}", failure.plan.src_vol.path);
            }
            TransferResult::Failed { stages, .. } => {
                let primary = failure
                    .first_failed_stage()
                    .expect("failed result has a failing stage");
                eprintln!("Error: {}", primary.describe());
                if !primary.stderr_tail.is_empty() {
                    eprintln!("{}", primary.stderr_tail.trim_end());
                }
                if args.verbose {
                    for stage in stages {
                        if stage.index != primary.index && !stage.stderr_tail.is_empty() {
                            eprintln!(
                                "stage {} ({}): {}",
                                stage.index,
                                stage.program,
                                stage.stderr_tail.trim_end()
                            );
                        }
                    }
                }
                eprintln!("@ {}", failure.plan.src_vol.path);
            }
            TransferResult::Completed { .. } => {}
        }
    }
}

enum Answer {
    Yes,
    No,
    Skip,
}

fn ask_confirmation() -> io::Result<Answer> {
    let stdin = io::stdin();
    loop {
        print!("Proceed? [y/N/(s)kip]: ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(Answer::No);
        }
        match line.trim().to_ascii_uppercase().as_str() {
            "Y" | "YES" => return Ok(Answer::Yes),
            "" | "N" | "NO" => return Ok(Answer::No),
            "S" | "SKIP" => return Ok(Answer::Skip),
            _ => continue,
        }
    }
}

/// Include/exclude matching over subvolume paths. With no includes,
/// everything not excluded matches.
struct Matcher {
    include: Option<GlobSet>,
    exclude: GlobSet,
}

impl Matcher {
    fn new(include: &[String], exclude: &[String]) -> Result<Self, globset::Error> {
        Ok(Self {
            include: if include.is_empty() {
                None
            } else {
                Some(build_globset(include)?)
            },
            exclude: build_globset(exclude)?,
        })
    }

    fn matches(&self, path: &str) -> bool {
        if let Some(include) = &self.include {
            if !include.is_match(path) {
                return false;
            }
        }
        !self.exclude.is_match(path)
    }
}

fn build_globset(globs: &[String]) -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for glob in globs {
        builder.add(Glob::new(glob)?);
    }
    builder.build()
}

fn ssh_target(user: Option<String>, host: String, port: Option<u16>) -> SshTarget {
    let mut target = SshTarget::new(host);
    if let Some(user) = user {
        target = target.user(user);
    }
    if let Some(port) = port {
        target = target.port(port);
    }
    target
}

fn source_root(location: Location, args: &Args) -> Result<Root, CliError> {
    match location {
        Location::Local { path } => Ok(Root::Local(LocalRoot::new(path).sudo(args.src_sudo()))),
        Location::Ssh {
            user,
            host,
            port,
            path,
        } => Ok(Root::Ssh(
            SshRoot::new(ssh_target(user, host, port), path).sudo(args.src_sudo()),
        )),
        Location::Dump { path } => Ok(Root::DumpRead(DumpReadRoot::new(path))),
        Location::Pipe => Err(CliError::Engine(EngineError::Configuration(
            "`-` cannot be used as a source".to_owned(),
        ))),
    }
}

fn dest_root(location: Location, args: &Args) -> Result<Root, CliError> {
    let create = args.effective_create_destpath();
    match location {
        Location::Local { path } => Ok(Root::Local(
            LocalRoot::new(path)
                .sudo(args.dst_sudo())
                .create_destpath(create),
        )),
        Location::Ssh {
            user,
            host,
            port,
            path,
        } => Ok(Root::Ssh(
            SshRoot::new(ssh_target(user, host, port), path)
                .sudo(args.dst_sudo())
                .create_destpath(create),
        )),
        Location::Dump { path } => Ok(Root::DumpWrite(
            DumpWriteRoot::new(path).create_destpath(create),
        )),
        Location::Pipe => Ok(Root::Pipe(PipeRoot)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn matcher_defaults_to_everything() {
        let matcher = Matcher::new(&[], &[]).unwrap();
        assert!(matcher.matches("anything/at/all"));
    }

    #[test]
    fn matcher_applies_includes_then_excludes() {
        let matcher = Matcher::new(
            &["daily/*".to_owned()],
            &["daily/scratch*".to_owned()],
        )
        .unwrap();
        assert!(matcher.matches("daily/root"));
        assert!(!matcher.matches("weekly/root"));
        assert!(!matcher.matches("daily/scratch-1"));
    }

    #[test]
    fn pipe_source_is_rejected() {
        let args = args(&["cowsync", "-", "/dst"]);
        assert!(source_root(Location::Pipe, &args).is_err());
    }

    #[test]
    fn dump_destination_inherits_create_destpath() {
        let args = args(&["cowsync", "-r", "/src", "file:///dumps"]);
        let root = dest_root(
            Location::Dump {
                path: "/dumps".into(),
            },
            &args,
        )
        .unwrap();
        assert!(matches!(root, Root::DumpWrite(_)));
    }

    #[test]
    fn worst_orders_exit_codes() {
        assert_eq!(worst(ExitCode::Ok, ExitCode::Partial), ExitCode::Partial);
        assert_eq!(worst(ExitCode::Partial, ExitCode::Ok), ExitCode::Partial);
        assert_eq!(
            worst(ExitCode::Partial, ExitCode::Interrupted),
            ExitCode::Interrupted
        );
    }
}
