//! Command-line argument definitions.

use clap::{ArgAction, Parser};

/// Sync btrfs subvolumes between local and remote roots.
#[derive(Debug, Parser)]
#[command(name = "cowsync", version, about)]
pub struct Args {
    /// Source location(s) followed by the destination location.
    ///
    /// Accepted forms: a local path, `user@host:path`, `file://dir` (raw
    /// stream dumps), `ssh://[user@]host[:port]/path`, and `-` (write the
    /// stream to stdout; destination only).
    #[arg(value_name = "LOCATION", required = true, num_args = 2..)]
    pub locations: Vec<String>,

    /// Exclude subvolumes matching GLOB; repeatable.
    #[arg(short = 'x', long = "exclude", value_name = "GLOB")]
    pub exclude: Vec<String>,

    /// Include only subvolumes matching GLOB, overriding the default of
    /// including everything not excluded; repeatable.
    #[arg(short = 'i', long = "include", value_name = "GLOB")]
    pub include: Vec<String>,

    /// Only perform incremental transfers, skip the rest.
    #[arg(short = 'I', long = "incremental-only")]
    pub incremental_only: bool,

    /// Do not perform transfers, print what would have been done.
    #[arg(short = 'n', long = "dry-run")]
    pub dry_run: bool,

    /// Do not ask for confirmation, perform transfers immediately.
    #[arg(short = 'y', long = "yes")]
    pub yes: bool,

    /// Print progress during transfers.
    #[arg(short = 'p', long = "progress")]
    pub progress: bool,

    /// Print more details.
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Suppress output down to errors; twice to silence everything
    /// except confirmation prompts.
    #[arg(short = 'q', long = "quiet", action = ArgAction::Count)]
    pub quiet: u8,

    /// Replicate the directory structure containing subvolumes over to
    /// the destination (implies --create-destpath).
    #[arg(short = 'r', long = "replicate-dirs")]
    pub replicate_dirs: bool,

    /// Create the destination path if it does not exist.
    #[arg(short = 'c', long = "create-destpath")]
    pub create_destpath: bool,

    /// Use sudo for commands on both source and destination.
    #[arg(short = 's', long = "sudo")]
    pub sudo: bool,

    /// Use sudo for commands executed at the source.
    #[arg(long = "sudo-src")]
    pub sudo_src: bool,

    /// Use sudo for commands executed at the destination.
    #[arg(long = "sudo-dest")]
    pub sudo_dest: bool,
}

impl Args {
    /// The source locations (all but the last positional).
    #[must_use]
    pub fn sources(&self) -> &[String] {
        &self.locations[..self.locations.len() - 1]
    }

    /// The destination location (the last positional).
    #[must_use]
    pub fn dest(&self) -> &str {
        self.locations.last().expect("clap enforces two positionals")
    }

    /// Whether source commands run under sudo.
    #[must_use]
    pub fn src_sudo(&self) -> bool {
        self.sudo || self.sudo_src
    }

    /// Whether destination commands run under sudo.
    #[must_use]
    pub fn dst_sudo(&self) -> bool {
        self.sudo || self.sudo_dest
    }

    /// Whether missing destination directories get created.
    #[must_use]
    pub fn effective_create_destpath(&self) -> bool {
        self.create_destpath || self.replicate_dirs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).expect("arguments parse")
    }

    #[test]
    fn splits_sources_and_destination() {
        let args = parse(&["cowsync", "/a", "/b", "host:/c"]);
        assert_eq!(args.sources(), ["/a", "/b"]);
        assert_eq!(args.dest(), "host:/c");
    }

    #[test]
    fn requires_two_locations() {
        assert!(Args::try_parse_from(["cowsync", "/only-one"]).is_err());
    }

    #[test]
    fn sudo_flag_covers_both_ends() {
        let args = parse(&["cowsync", "-s", "/a", "/b"]);
        assert!(args.src_sudo());
        assert!(args.dst_sudo());

        let args = parse(&["cowsync", "--sudo-dest", "/a", "/b"]);
        assert!(!args.src_sudo());
        assert!(args.dst_sudo());
    }

    #[test]
    fn replicate_dirs_implies_create_destpath() {
        let args = parse(&["cowsync", "-r", "/a", "/b"]);
        assert!(args.effective_create_destpath());
    }

    #[test]
    fn quiet_counts_repetitions() {
        let args = parse(&["cowsync", "-qq", "/a", "/b"]);
        assert_eq!(args.quiet, 2);
    }

    #[test]
    fn globs_accumulate() {
        let args = parse(&[
            "cowsync", "-x", "*.tmp", "-x", "scratch/*", "-i", "daily/*", "/a", "/b",
        ]);
        assert_eq!(args.exclude, ["*.tmp", "scratch/*"]);
        assert_eq!(args.include, ["daily/*"]);
    }
}
