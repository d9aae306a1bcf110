//! grid2point: convert georeferenced grids into point datasets.
//!
//! ```text
//! grid2point convert prism/ppt --output-dir out --format csv --target-crs EPSG:4326
//! grid2point run jobs.yaml --max-concurrent 4 --report report.json
//! grid2point inspect prism/ppt
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use grid_source::OpenOptions;
use point_converter::{
    CancellationToken, ConversionRequest, Converter, EngineConfig, ErrorPolicy, NodataPolicy,
    OutputFormat, OutputMode, Unit,
};
use projection::Crs;
use tracing::{error, info, warn};

use converter::jobs::{load_jobs, Job};
use converter::logging::{init_tracing, LogFormat};
use converter::report::RunReport;
use converter::runner::run_jobs;
use converter::{EXIT_FAILED, EXIT_OK, EXIT_USAGE};

#[derive(Parser, Debug)]
#[command(name = "grid2point")]
#[command(version, about = "Convert georeferenced grids into point datasets")]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "G2P_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert one grid source
    Convert(ConvertArgs),
    /// Run every job in a YAML job file
    Run(RunArgs),
    /// Print a source's CRS, geometry and layers as JSON
    Inspect(InspectArgs),
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Grid file, tar archive or directory of grids
    source: PathBuf,

    #[arg(short, long)]
    output_dir: PathBuf,

    /// Base name of the output datasets (default: source name)
    #[arg(long)]
    output_name: Option<String>,

    #[arg(short, long, default_value = "geojson")]
    format: OutputFormat,

    /// per-layer or multi-column
    #[arg(long, default_value = "per-layer")]
    mode: OutputMode,

    /// Output CRS, e.g. EPSG:3857 (default: source CRS)
    #[arg(long)]
    target_crs: Option<String>,

    /// Source CRS, used instead of any .prj sidecar
    #[arg(long)]
    source_crs: Option<String>,

    /// Product to read from a SNODAS archive, e.g. "Snow Depth" (default: SWE)
    #[arg(long)]
    variable: Option<String>,

    /// drop, pass-through or substitute=VALUE
    #[arg(long, default_value = "drop")]
    nodata: NodataPolicy,

    #[arg(long, default_value_t = 1.0, allow_negative_numbers = true)]
    scale: f64,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    offset: f64,

    #[arg(long, requires = "to_units")]
    from_units: Option<Unit>,

    #[arg(long, requires = "from_units")]
    to_units: Option<Unit>,

    /// Skip cells that cannot be reprojected instead of failing
    #[arg(long)]
    skip_bad_cells: bool,

    /// Layer labels or file names to convert (default: all)
    #[arg(long, value_delimiter = ',')]
    layers: Vec<String>,

    /// Attribute name of the value in per-layer output
    #[arg(long)]
    value_field: Option<String>,

    /// Add row and col attributes
    #[arg(long)]
    cell_index: bool,

    /// Write the JSON run report here instead of stdout
    #[arg(long)]
    report: Option<PathBuf>,
}

impl ConvertArgs {
    fn request(&self) -> ConversionRequest {
        let mut request = ConversionRequest::new(&self.source, &self.output_dir)
            .with_format(self.format)
            .with_mode(self.mode)
            .with_nodata(self.nodata)
            .with_scale_offset(self.scale, self.offset);

        if let Some(name) = &self.output_name {
            request = request.with_output_name(name);
        }
        if let Some(crs) = &self.target_crs {
            request = request.with_target_crs(crs);
        }
        if let Some(crs) = &self.source_crs {
            request = request.with_source_crs(crs);
        }
        if let Some(variable) = &self.variable {
            request = request.with_variable(variable);
        }
        if let (Some(from), Some(to)) = (self.from_units, self.to_units) {
            request = request.with_units(from, to);
        }
        if self.skip_bad_cells {
            request = request.with_error_policy(ErrorPolicy::SkipCell);
        }
        if !self.layers.is_empty() {
            request = request.with_layers(self.layers.iter().cloned());
        }
        if let Some(field) = &self.value_field {
            request.attributes.value_field = field.clone();
        }
        if self.cell_index {
            request = request.with_cell_index();
        }
        request
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    /// YAML job file
    jobs: PathBuf,

    /// Maximum jobs converting at once
    #[arg(long, env = "G2P_MAX_CONCURRENT", default_value = "2")]
    max_concurrent: usize,

    /// Write the JSON run report here instead of stdout
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct InspectArgs {
    source: PathBuf,

    /// Source CRS, used instead of any .prj sidecar
    #[arg(long)]
    source_crs: Option<String>,

    /// Product to read from a SNODAS archive (default: SWE)
    #[arg(long)]
    variable: Option<String>,
}

/// Failure before any job ran: exit with the usage code.
#[derive(Debug)]
struct UsageError(anyhow::Error);

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = init_tracing(&cli.log_level, cli.log_format) {
        eprintln!("Failed to initialise logging: {:#}", e);
        return ExitCode::from(EXIT_USAGE);
    }

    let outcome = match cli.command {
        Command::Convert(args) => convert(args).await,
        Command::Run(args) => run(args).await,
        Command::Inspect(args) => inspect(args).map(|()| EXIT_OK),
    };

    match outcome {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            let usage = e.downcast_ref::<UsageError>().is_some();
            error!(error = %format!("{:#}", e), "grid2point failed");
            ExitCode::from(if usage { EXIT_USAGE } else { EXIT_FAILED })
        }
    }
}

impl std::fmt::Display for UsageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

impl std::error::Error for UsageError {}

fn usage(e: anyhow::Error) -> anyhow::Error {
    anyhow!(UsageError(e))
}

fn engine_config() -> Result<EngineConfig> {
    let config = EngineConfig::from_env();
    config
        .validate()
        .map_err(|e| usage(anyhow!("invalid engine config: {}", e)))?;
    Ok(config)
}

async fn convert(args: ConvertArgs) -> Result<u8> {
    let config = engine_config()?;
    let request = args.request();
    request
        .validate()
        .context("invalid conversion request")
        .map_err(usage)?;

    let name = request.output_base();
    let jobs = vec![Job { name, request }];
    finish(execute(jobs, config, 1).await, args.report.as_ref())
}

async fn run(args: RunArgs) -> Result<u8> {
    if args.max_concurrent == 0 {
        return Err(usage(anyhow!("--max-concurrent must be at least 1")));
    }
    let file = load_jobs(&args.jobs).map_err(usage)?;
    info!(path = %args.jobs.display(), jobs = file.jobs.len(), "Loaded job file");
    finish(
        execute(file.jobs, file.engine, args.max_concurrent).await,
        args.report.as_ref(),
    )
}

async fn execute(jobs: Vec<Job>, config: EngineConfig, max_concurrent: usize) -> RunReport {
    let started_at = Utc::now();
    let token = CancellationToken::new();
    cancel_on_ctrl_c(token.clone());

    let outcomes = run_jobs(jobs, Converter::new(config), max_concurrent, token).await;
    RunReport::new(started_at, outcomes)
}

fn finish(report: RunReport, path: Option<&PathBuf>) -> Result<u8> {
    match path {
        Some(path) => {
            report.write(path)?;
            info!(path = %path.display(), "Wrote run report");
        }
        None => println!("{}", report.to_json()?),
    }
    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        cancelled = report.cancelled,
        "Run finished"
    );
    Ok(if report.all_completed() { EXIT_OK } else { EXIT_FAILED })
}

fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received interrupt, cancelling at the next layer boundary");
            token.cancel();
        }
    });
}

fn inspect(args: InspectArgs) -> Result<()> {
    let mut options = OpenOptions::default();
    if let Some(crs) = &args.source_crs {
        let crs = Crs::parse(crs)
            .with_context(|| format!("invalid source CRS '{}'", crs))
            .map_err(usage)?;
        options = options.with_source_crs(crs);
    }
    if let Some(variable) = &args.variable {
        options = options.with_variable(variable);
    }
    if !args.source.exists() {
        bail!("{} does not exist", args.source.display());
    }

    let mut dataset = grid_source::open(&args.source, &options)
        .with_context(|| format!("Failed to open {}", args.source.display()))?;
    let summary = dataset.summary();
    dataset.close();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
