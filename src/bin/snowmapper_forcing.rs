use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use snowmapper_forcing::app::{self, App};
use snowmapper_forcing::cdo::{CdoConverter, GribConverter};
use snowmapper_forcing::codec::DatasetCodec;
use snowmapper_forcing::config::{ConfigLoader, ResolvedConfig};
use snowmapper_forcing::domain::{BoundingBox, GroupSpec, parse_date};
use snowmapper_forcing::error::ForcingError;
use snowmapper_forcing::netcdf_io::NetcdfCodec;
use snowmapper_forcing::output::{HumanOutput, JsonOutput, OutputMode, TracingSink};
use snowmapper_forcing::providers::{
    CdsClient, CdsCredentials, EcmwfOpenDataClient, ForecastProvider, ForecastRequest,
    ReanalysisProvider,
};

const EXIT_FAILURE: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_FETCH_FAILED: u8 = 3;
const EXIT_ASSEMBLY_FAILED: u8 = 4;

#[derive(Parser)]
#[command(name = "snowmapper-forcing")]
#[command(about = "Keeps the ERA5 + IFS climate forcing of a SnowMapper domain current")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Stage,
}

#[derive(Subcommand)]
enum Stage {
    #[command(about = "Scan local files and list the fetch obligations")]
    Plan(StageArgs),
    #[command(about = "Fetch missing reanalysis days and forecast cycles")]
    Fetch(StageArgs),
    #[command(about = "Merge all sources into one forcing timeline per group")]
    Assemble(StageArgs),
    #[command(about = "Audit the merged forcing timelines")]
    Audit(StageArgs),
    #[command(about = "Plan, fetch, assemble and audit")]
    Run(StageArgs),
}

#[derive(Args, Clone)]
struct StageArgs {
    /// Domain or simulation directory.
    dir: PathBuf,

    /// Run as if today were this date (YYYY-MM-DD).
    #[arg(long, value_parser = parse_day)]
    today: Option<NaiveDate>,

    /// Skip the provider query for the latest reanalysis day.
    #[arg(long, value_parser = parse_day)]
    latest_available: Option<NaiveDate>,

    #[arg(long)]
    json: bool,
}

impl StageArgs {
    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }
}

fn parse_day(value: &str) -> Result<NaiveDate, String> {
    parse_date(value).map_err(|err| err.to_string())
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<ForcingError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn map_exit_code(error: &ForcingError) -> u8 {
    match error {
        ForcingError::ConfigRead(_)
        | ForcingError::ConfigParse(_)
        | ForcingError::InvalidConfig(_)
        | ForcingError::MissingCredentials(_)
        | ForcingError::InvalidDate(_) => EXIT_CONFIG,
        ForcingError::CdsHttp(_)
        | ForcingError::CdsStatus { .. }
        | ForcingError::EcmwfHttp(_)
        | ForcingError::EcmwfStatus { .. } => EXIT_FETCH_FAILED,
        _ => EXIT_FAILURE,
    }
}

fn run() -> miette::Result<u8> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Stage::Plan(args) => {
            let config = load_config(&args.dir)?;
            if args.latest_available.is_some() {
                let app = App::new(config, NetcdfCodec::new(), NopReanalysis, NopForecast, NopConverter);
                return run_plan(&args, &app);
            }
            let app = App::new(config, NetcdfCodec::new(), cds_client()?, NopForecast, NopConverter);
            run_plan(&args, &app)
        }
        Stage::Fetch(args) => {
            let app = App::new(
                load_config(&args.dir)?,
                NetcdfCodec::new(),
                cds_client()?,
                EcmwfOpenDataClient::new()?,
                cdo_converter(),
            );
            run_fetch(&args, &app)
        }
        Stage::Assemble(args) => {
            let config = load_config(&args.dir)?;
            let app = App::new(config, NetcdfCodec::new(), NopReanalysis, NopForecast, NopConverter);
            run_assemble(&args, &app)
        }
        Stage::Audit(args) => {
            let config = load_config(&args.dir)?;
            let app = App::new(config, NetcdfCodec::new(), NopReanalysis, NopForecast, NopConverter);
            run_audit(&args, &app)
        }
        Stage::Run(args) => {
            let app = App::new(
                load_config(&args.dir)?,
                NetcdfCodec::new(),
                cds_client()?,
                EcmwfOpenDataClient::new()?,
                cdo_converter(),
            );
            run_all(&args, &app)
        }
    }
}

fn load_config(dir: &Path) -> miette::Result<ResolvedConfig> {
    let config = ConfigLoader::resolve(dir)?;
    match &config.config_file {
        Some(path) => tracing::info!(config = %path.display(), climate_dir = %config.climate_dir, "configuration loaded"),
        None => tracing::info!(climate_dir = %config.climate_dir, "no snowmapper.yml found, using defaults"),
    }
    Ok(config)
}

fn cds_client() -> miette::Result<CdsClient> {
    let credentials = CdsCredentials::discover()?;
    Ok(CdsClient::new(credentials)?)
}

fn cdo_converter() -> CdoConverter {
    let converter = CdoConverter::new();
    if converter.is_available() {
        tracing::debug!(version = ?converter.version(), "cdo found");
    } else {
        tracing::warn!("cdo not found in PATH, forecast cycles will fail to convert");
    }
    converter
}

fn run_plan<C, R, F, G>(args: &StageArgs, app: &App<C, R, F, G>) -> miette::Result<u8>
where
    C: DatasetCodec,
    R: ReanalysisProvider,
    F: ForecastProvider,
    G: GribConverter,
{
    let result = app.plan(args.today(), args.latest_available, &TracingSink);
    match args.output_mode() {
        OutputMode::Json => JsonOutput::print(&result).into_diagnostic()?,
        OutputMode::Human => HumanOutput::print_plan(&result),
    }
    Ok(if result.latest_available_failed() {
        EXIT_FETCH_FAILED
    } else {
        0
    })
}

fn run_fetch<C, R, F, G>(args: &StageArgs, app: &App<C, R, F, G>) -> miette::Result<u8>
where
    C: DatasetCodec,
    R: ReanalysisProvider,
    F: ForecastProvider,
    G: GribConverter,
{
    let plan = app.plan(args.today(), args.latest_available, &TracingSink);
    let report = app.fetch(&plan.plan, &TracingSink);
    match args.output_mode() {
        OutputMode::Json => JsonOutput::print(&report).into_diagnostic()?,
        OutputMode::Human => HumanOutput::print_fetch(&report),
    }
    Ok(if report.has_failures() || plan.latest_available_failed() {
        EXIT_FETCH_FAILED
    } else {
        0
    })
}

fn run_assemble<C, R, F, G>(args: &StageArgs, app: &App<C, R, F, G>) -> miette::Result<u8>
where
    C: DatasetCodec,
    R: ReanalysisProvider,
    F: ForecastProvider,
    G: GribConverter,
{
    let gaps = app.permanent_gaps(args.today());
    let groups = app.assemble(&gaps, &TracingSink);
    match args.output_mode() {
        OutputMode::Json => JsonOutput::print(&groups).into_diagnostic()?,
        OutputMode::Human => HumanOutput::print_assembly(&groups),
    }
    Ok(if app::assembly_failed(&groups) {
        EXIT_ASSEMBLY_FAILED
    } else {
        0
    })
}

fn run_audit<C, R, F, G>(args: &StageArgs, app: &App<C, R, F, G>) -> miette::Result<u8>
where
    C: DatasetCodec,
    R: ReanalysisProvider,
    F: ForecastProvider,
    G: GribConverter,
{
    let gaps = app.permanent_gaps(args.today());
    let groups = app.audit(&gaps, &TracingSink);
    match args.output_mode() {
        OutputMode::Json => JsonOutput::print(&groups).into_diagnostic()?,
        OutputMode::Human => HumanOutput::print_audit(&groups),
    }
    // Audit is diagnostic only; an unreadable timeline is still a failure.
    Ok(if groups.iter().any(|group| group.report.is_none()) {
        EXIT_ASSEMBLY_FAILED
    } else {
        0
    })
}

fn run_all<C, R, F, G>(args: &StageArgs, app: &App<C, R, F, G>) -> miette::Result<u8>
where
    C: DatasetCodec,
    R: ReanalysisProvider,
    F: ForecastProvider,
    G: GribConverter,
{
    let summary = app.run(args.today(), args.latest_available, &TracingSink);
    match args.output_mode() {
        OutputMode::Json => JsonOutput::print(&summary).into_diagnostic()?,
        OutputMode::Human => HumanOutput::print_run(&summary),
    }
    Ok(if summary.fetch_failed() {
        EXIT_FETCH_FAILED
    } else if summary.assembly_failed() {
        EXIT_ASSEMBLY_FAILED
    } else {
        0
    })
}

struct NopReanalysis;
struct NopForecast;
struct NopConverter;

impl ReanalysisProvider for NopReanalysis {
    fn latest_available(&self) -> Result<NaiveDate, ForcingError> {
        Err(ForcingError::MissingCredentials(
            "reanalysis provider not configured".to_string(),
        ))
    }

    fn retrieve_day(
        &self,
        _group: &GroupSpec,
        _day: NaiveDate,
        _bbox: &BoundingBox,
        _destination: &Path,
    ) -> Result<(), ForcingError> {
        Err(ForcingError::MissingCredentials(
            "reanalysis provider not configured".to_string(),
        ))
    }
}

impl ForecastProvider for NopForecast {
    fn retrieve(&self, _request: &ForecastRequest, _destination: &Path) -> Result<(), ForcingError> {
        Err(ForcingError::EcmwfHttp(
            "forecast provider not configured".to_string(),
        ))
    }
}

impl GribConverter for NopConverter {
    fn to_netcdf(&self, _grib: &Path, _netcdf: &Path) -> Result<(), ForcingError> {
        Err(ForcingError::MissingTool("GRIB converter not configured".to_string()))
    }
}
