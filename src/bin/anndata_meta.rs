use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use anndata_metadata::app::{App, StderrSink};
use anndata_metadata::config::{ConfigLoader, ConfigOverrides};
use anndata_metadata::error::MetaError;
use anndata_metadata::output::{OutputTarget, write_result};
use anndata_metadata::remote::S3Store;

#[derive(Parser)]
#[command(name = "anndata-meta")]
#[command(about = "Extract AnnData metadata from file(s) or S3 object(s)")]
#[command(version, author)]
struct Cli {
    /// Input file, directory, S3 URI, or S3 prefix URI
    input_path: String,

    /// Output filename (JSON for a single file, Parquet for a directory or prefix, '-' for stdout)
    output: String,

    /// Path to an anndata-meta.json configuration file
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    region: Option<String>,

    /// Custom S3-compatible endpoint, e.g. http://localhost:9000
    #[arg(long)]
    endpoint_url: Option<String>,

    /// Send unsigned requests
    #[arg(long)]
    anonymous: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<MetaError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &MetaError) -> u8 {
    match error {
        MetaError::FileNotFound(_) | MetaError::InvalidUri(_) => 2,
        MetaError::RemoteAccess(_) | MetaError::RemoteStatus { .. } => 3,
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
    let overrides = ConfigOverrides {
        region: cli.region,
        endpoint_url: cli.endpoint_url,
        anonymous: cli.anonymous,
    };
    let config_path = cli.config;
    let app = App::with_connector(move || {
        let config = ConfigLoader::resolve(config_path.as_deref(), overrides.clone())?;
        S3Store::new(config)
    });

    let target = OutputTarget::from_arg(&cli.output);
    let result = app.run(&cli.input_path, &StderrSink)?;
    write_result(&result, &target)?;
    Ok(())
}
