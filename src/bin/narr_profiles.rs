use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use narr_fire_profiles::app::App;
use narr_fire_profiles::cancel::CancellationToken;
use narr_fire_profiles::catalog::CatalogLoader;
use narr_fire_profiles::config::{ConfigLoader, ResolvedConfig};
use narr_fire_profiles::domain::FetchMode;
use narr_fire_profiles::error::ProfileError;
use narr_fire_profiles::executor::DelayRange;
use narr_fire_profiles::output::{JsonOutput, OutputMode, TextOutput};
use narr_fire_profiles::transport::HttpTransport;

#[cfg(feature = "netcdf")]
use narr_fire_profiles::netcdf_io::NetcdfCodec as Codec;

#[derive(Parser)]
#[command(name = "narr-profiles")]
#[command(about = "Fetch NARR pressure-level subsets for wildfire events and merge per-event profiles")]
#[command(version)]
struct Cli {
    /// JSON config file (default: ./narr-profiles.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// JSON event catalog
    #[arg(long, global = true)]
    catalog: Option<String>,

    /// Output root directory
    #[arg(long, global = true)]
    output: Option<String>,

    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[arg(long, global = true, value_enum)]
    mode: Option<FetchMode>,

    /// Degrees added on every side of the footprint
    #[arg(long, global = true)]
    padding: Option<f64>,

    /// Per-request timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[arg(long, global = true)]
    retries: Option<u32>,

    /// Disable the politeness delay between requests
    #[arg(long, global = true)]
    no_delay: bool,

    /// Refetch and re-merge even when outputs exist
    #[arg(long, global = true)]
    force: bool,

    #[arg(long, global = true)]
    json: bool,

    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Print the deduplicated fetch plan")]
    Plan,
    #[command(about = "Plan and download subsets without merging")]
    Fetch,
    #[command(about = "Merge per-event profiles from already downloaded subsets")]
    Merge,
    #[command(about = "Plan, download and merge")]
    Run,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<ProfileError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ProfileError) -> u8 {
    match error {
        ProfileError::ConfigRead(_)
        | ProfileError::ConfigParse(_)
        | ProfileError::InvalidConfig(_)
        | ProfileError::InvalidVariable(_)
        | ProfileError::InvalidMode(_)
        | ProfileError::CatalogRead(_)
        | ProfileError::CatalogParse(_) => 2,
        ProfileError::Filesystem(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    let config = apply_overrides(ConfigLoader::resolve(cli.config.as_deref())?, &cli)?;
    let catalog = cli
        .catalog
        .clone()
        .map(Utf8PathBuf::from)
        .or_else(|| config.catalog.clone())
        .ok_or_else(|| {
            ProfileError::InvalidConfig("no event catalog given (use --catalog)".to_string())
        })?;
    let events = CatalogLoader::load(&catalog)?;

    let transport = HttpTransport::new(config.timeout)?;
    let app = App::new(&config, transport, Codec::default());
    let cancel = match config.run_timeout {
        Some(timeout) => CancellationToken::with_timeout(timeout),
        None => CancellationToken::new(),
    };
    trap_interrupt(&cancel)?;
    let text = TextOutput::default();

    match cli.command {
        Commands::Plan => {
            let plan = match output_mode {
                OutputMode::Json => app.plan(&events, &JsonOutput),
                OutputMode::Text => app.plan(&events, &text),
            };
            match output_mode {
                OutputMode::Json => JsonOutput::print_plan(&plan).into_diagnostic()?,
                OutputMode::Text => TextOutput::print_plan(&plan),
            }
        }
        Commands::Fetch | Commands::Merge | Commands::Run => {
            let summary = match (&cli.command, output_mode) {
                (Commands::Fetch, OutputMode::Json) => app.fetch(&events, &cancel, &JsonOutput)?,
                (Commands::Fetch, OutputMode::Text) => app.fetch(&events, &cancel, &text)?,
                (Commands::Merge, OutputMode::Json) => app.merge(&events, &JsonOutput)?,
                (Commands::Merge, OutputMode::Text) => app.merge(&events, &text)?,
                (_, OutputMode::Json) => app.run(&events, &cancel, &JsonOutput)?,
                (_, OutputMode::Text) => app.run(&events, &cancel, &text)?,
            };
            match output_mode {
                OutputMode::Json => JsonOutput::print_summary(&summary).into_diagnostic()?,
                OutputMode::Text => TextOutput::print_summary(&summary),
            }
        }
    }
    Ok(())
}

/// Ctrl-C cancels the run instead of killing the process: in-flight fetches
/// are abandoned as cancelled and the summary is still written.
fn trap_interrupt(cancel: &CancellationToken) -> Result<(), ProfileError> {
    let token = cancel.clone();
    ctrlc::set_handler(move || {
        warn!("interrupt received, cancelling run");
        token.cancel();
    })
    .map_err(|err| ProfileError::Interrupt(err.to_string()))
}

fn apply_overrides(mut config: ResolvedConfig, cli: &Cli) -> Result<ResolvedConfig, ProfileError> {
    if let Some(output) = &cli.output {
        config.output_root = Utf8PathBuf::from(output);
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    if let Some(padding) = cli.padding {
        config.padding_degrees = padding;
    }
    if let Some(timeout) = cli.timeout {
        config.timeout = Duration::from_secs(timeout);
    }
    if let Some(retries) = cli.retries {
        config.retries = retries;
    }
    if cli.no_delay {
        config.delay = DelayRange::NONE;
    }
    if cli.force {
        config.skip_existing = false;
    }
    config.validate()?;
    Ok(config)
}

/// Stand-in when built without libnetcdf: planning and fetching still work,
/// merging reports the missing capability per event.
#[cfg(not(feature = "netcdf"))]
#[derive(Default)]
struct Codec;

#[cfg(not(feature = "netcdf"))]
impl narr_fire_profiles::dataset::DatasetCodec for Codec {
    fn read(
        &self,
        _path: &camino::Utf8Path,
    ) -> Result<narr_fire_profiles::dataset::Dataset, ProfileError> {
        Err(unsupported())
    }

    fn write(
        &self,
        _path: &camino::Utf8Path,
        _dataset: &narr_fire_profiles::dataset::Dataset,
    ) -> Result<(), ProfileError> {
        Err(unsupported())
    }
}

#[cfg(not(feature = "netcdf"))]
fn unsupported() -> ProfileError {
    ProfileError::Dataset("built without the `netcdf` feature".to_string())
}
