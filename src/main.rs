//! lattice-scan - vulnerability scan Jobs for Kubernetes workloads
//!
//! Compiles a workload manifest into a scan Job (plus credentials Secret) and
//! converts finished scan container logs into vulnerability reports. Applying
//! the manifests and fetching logs is left to kubectl or the controller.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;

use lattice_scanner::telemetry::{init_logging, LogFormat};
use lattice_scanner::workload::pod_spec_from_manifest;
use lattice_scanner::{
    scanner_from_config, ContainerImages, RegistryCredentials, ScanJobStatus, ScannerConfig,
};

/// lattice-scan - compile vulnerability scan Jobs and convert their output
#[derive(Parser, Debug)]
#[command(name = "lattice-scan", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ScannerConfig,

    /// Log output format (text or json)
    #[arg(long, env = "LATTICE_LOG_FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile a scan Job (and credentials Secret) for a workload manifest
    Compile(CompileArgs),
    /// Convert a scan container's output into a vulnerability report
    Parse(ParseArgs),
    /// Print the container to image map recorded on a scan Job
    Images(ImagesArgs),
    /// Print whether a scan Job has finished and its logs can be parsed
    Status(StatusArgs),
}

#[derive(Args, Debug)]
struct CompileArgs {
    /// Workload manifest (Pod, Deployment, StatefulSet, DaemonSet, Job, CronJob, ...)
    #[arg(short = 'f', long = "file")]
    manifest: PathBuf,

    /// YAML or JSON map of image reference to {username, password}
    #[arg(long, env = "LATTICE_SCAN_CREDENTIALS_FILE")]
    credentials: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
    format: OutputFormat,
}

#[derive(Args, Debug)]
struct ParseArgs {
    /// Image reference the output was produced for
    #[arg(long)]
    image: String,

    /// Scan container logs (reads stdin when omitted)
    #[arg(short = 'f', long = "file")]
    file: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
    format: OutputFormat,
}

#[derive(Args, Debug)]
struct ImagesArgs {
    /// Scan Job manifest
    #[arg(short = 'f', long = "file")]
    job: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
    format: OutputFormat,
}

#[derive(Args, Debug)]
struct StatusArgs {
    /// Scan Job manifest, as returned by `kubectl get job -o yaml`
    #[arg(short = 'f', long = "file")]
    job: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
    format: OutputFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.log_format)?;

    match cli.command {
        Commands::Compile(args) => compile(&cli.config, args),
        Commands::Parse(args) => parse(&cli.config, args),
        Commands::Images(args) => images(args),
        Commands::Status(args) => status(args),
    }
}

fn compile(config: &ScannerConfig, args: CompileArgs) -> anyhow::Result<()> {
    let scanner = scanner_from_config(config)?;

    let manifest: serde_json::Value = read_yaml(&args.manifest)?;
    let (workload, spec) = pod_spec_from_manifest(manifest)?;

    let credentials: HashMap<String, RegistryCredentials> = match &args.credentials {
        Some(path) => read_yaml(path)?,
        None => HashMap::new(),
    };

    let scan = scanner.new_scan_job(&workload, &spec, &config.scan_options(credentials))?;
    info!(
        workload = %workload,
        job = scan.job.metadata.name.as_deref().unwrap_or_default(),
        secret = scan.secret.is_some(),
        "Compiled scan job"
    );

    let mut items = vec![serde_json::to_value(&scan.job)?];
    if let Some(secret) = &scan.secret {
        items.push(serde_json::to_value(secret)?);
    }

    let rendered = match args.format {
        OutputFormat::Yaml => items
            .iter()
            .map(serde_yaml::to_string)
            .collect::<Result<Vec<_>, _>>()?
            .join("---\n"),
        OutputFormat::Json => render(
            &serde_json::json!({"apiVersion": "v1", "kind": "List", "items": items}),
            OutputFormat::Json,
        )?,
    };
    print!("{}", rendered);
    Ok(())
}

fn parse(config: &ScannerConfig, args: ParseArgs) -> anyhow::Result<()> {
    let scanner = scanner_from_config(config)?;

    let mut input: Box<dyn Read> = match &args.file {
        Some(path) => Box::new(
            fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?,
        ),
        None => Box::new(io::stdin().lock()),
    };

    let report = scanner.parse_vulnerability_report(&args.image, &mut input)?;
    info!(
        image = %report.image_ref,
        vulnerabilities = report.vulnerabilities.len(),
        critical = report.summary.critical_count,
        high = report.summary.high_count,
        "Parsed vulnerability report"
    );

    print!("{}", render(&report, args.format)?);
    Ok(())
}

fn images(args: ImagesArgs) -> anyhow::Result<()> {
    let job = read_yaml(&args.job)?;
    let images = ContainerImages::from_job(&job)?;
    print!("{}", render(&images, args.format)?);
    Ok(())
}

fn status(args: StatusArgs) -> anyhow::Result<()> {
    let job = read_yaml(&args.job)?;
    let status = ScanJobStatus::of(&job);
    info!(
        job = job.metadata.name.as_deref().unwrap_or_default(),
        status = %status,
        finished = status.is_finished(),
        "Checked scan job"
    );
    print!("{}", render(&status, args.format)?);
    Ok(())
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

fn render<T: Serialize>(value: &T, format: OutputFormat) -> anyhow::Result<String> {
    Ok(match format {
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
        OutputFormat::Json => format!("{}\n", serde_json::to_string_pretty(value)?),
    })
}
