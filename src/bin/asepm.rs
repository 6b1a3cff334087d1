use std::process::ExitCode;

use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use ase_pipeline_manager::config::ConfigLoader;
use ase_pipeline_manager::driver::{self, RunOptions};
use ase_pipeline_manager::error::AsepmError;

#[derive(Parser)]
#[command(name = "asepm")]
#[command(about = "Dependency-driven process manager for the ASE genomics pipeline")]
#[command(version, author)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long)]
    configuration: Option<String>,

    /// Check cross-stage consistency; refuse to emit scripts on violations.
    #[arg(short = 'd', long)]
    check_dependencies: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<AsepmError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &AsepmError) -> u8 {
    match error {
        AsepmError::MissingConfig(_)
        | AsepmError::ConfigRead(_)
        | AsepmError::ConfigParse(_)
        | AsepmError::NoDataDirectories => 2,
        AsepmError::DependencyViolations(_) | AsepmError::UnresolvedStagingRoot(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.configuration.as_deref()).into_diagnostic()?;
    let options = RunOptions {
        check_dependencies: cli.check_dependencies,
    };

    let summary = driver::run(&config, &options).into_diagnostic()?;
    print!("{}", summary.progress_table());
    println!("{}", summary.closing_line());
    Ok(())
}
