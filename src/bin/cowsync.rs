//! The cowsync binary.

fn main() -> std::process::ExitCode {
    cowsync_cli::run()
}
