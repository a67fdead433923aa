// ============================================================================
// renderfe: headless batch entry point
// ============================================================================

use std::process::ExitCode;

use clap::Parser;

use renderfe::cli::CliArgs;

fn main() -> ExitCode {
    renderfe::logger::init();
    let args = CliArgs::parse();
    renderfe::cli::run(args)
}
