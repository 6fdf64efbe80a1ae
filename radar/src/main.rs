use backend::{AnalysisBackend, HttpBackend};
use clap::{Parser, Subcommand};
use radar::config::RadarConfig;
use radar::{pipeline, scanner, Report};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "radar")]
#[command(about = "Discover, execute, and analyze tests with LLM assistance")]
struct Cli {
    /// Path to a radar.toml configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: scan, execute, analyze, report
    Run {
        /// Root directory to scan for tests
        #[arg(short, long)]
        root: Option<PathBuf>,
        /// Glob patterns for test files (repeatable)
        #[arg(short, long)]
        include: Vec<String>,
        /// Glob patterns to exclude (repeatable)
        #[arg(short, long)]
        exclude: Vec<String>,
        /// Number of parallel test subprocesses
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Per-unit timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Collect per-unit coverage
        #[arg(long)]
        coverage: bool,
        /// Remote analysis model identifier
        #[arg(short, long)]
        model: Option<String>,
        /// Remote backend base URL
        #[arg(long)]
        backend_url: Option<String>,
        /// Write the JSON report to this path instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Analyze discovered tests without executing them
    Analyze {
        /// Root directory to scan for tests
        #[arg(short, long)]
        root: Option<PathBuf>,
        /// Glob patterns for test files (repeatable)
        #[arg(short, long)]
        include: Vec<String>,
        /// Glob patterns to exclude (repeatable)
        #[arg(short, long)]
        exclude: Vec<String>,
        /// Remote analysis model identifier
        #[arg(short, long)]
        model: Option<String>,
        /// Remote backend base URL
        #[arg(long)]
        backend_url: Option<String>,
        /// Write the JSON report to this path as well
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Discover test units without running them
    Scan {
        /// Root directory to scan for tests
        #[arg(short, long)]
        root: Option<PathBuf>,
        /// Glob patterns for test files (repeatable)
        #[arg(short, long)]
        include: Vec<String>,
        /// Glob patterns to exclude (repeatable)
        #[arg(short, long)]
        exclude: Vec<String>,
    },
    /// Check connectivity to the remote analysis backend
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = RadarConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            root,
            include,
            exclude,
            jobs,
            timeout,
            coverage,
            model,
            backend_url,
            output,
        } => {
            if let Some(root) = root {
                config.test.root = root;
            }
            if !include.is_empty() {
                config.test.include_patterns = include;
            }
            if !exclude.is_empty() {
                config.test.exclude_patterns = exclude;
            }
            if let Some(jobs) = jobs {
                config.test.parallel_jobs = jobs;
            }
            if let Some(timeout) = timeout {
                config.test.timeout_seconds = timeout;
            }
            if coverage {
                config.test.collect_coverage = true;
            }
            if let Some(model) = model {
                config.backend.model_id = model;
            }
            if let Some(url) = backend_url {
                config.backend.base_url = url;
            }
            config.validate()?;

            run(&config, output).await?;
        }
        Commands::Analyze {
            root,
            include,
            exclude,
            model,
            backend_url,
            output,
        } => {
            if let Some(root) = root {
                config.test.root = root;
            }
            if !include.is_empty() {
                config.test.include_patterns = include;
            }
            if !exclude.is_empty() {
                config.test.exclude_patterns = exclude;
            }
            if let Some(model) = model {
                config.backend.model_id = model;
            }
            if let Some(url) = backend_url {
                config.backend.base_url = url;
            }
            config.validate()?;

            analyze_only(&config, output).await?;
        }
        Commands::Scan {
            root,
            include,
            exclude,
        } => {
            if let Some(root) = root {
                config.test.root = root;
            }
            if !include.is_empty() {
                config.test.include_patterns = include;
            }
            if !exclude.is_empty() {
                config.test.exclude_patterns = exclude;
            }

            let units = scanner::scan(
                &config.test.root,
                &config.test.include_patterns,
                &config.test.exclude_patterns,
            )?;
            println!("Discovered {} test units:", units.len());
            for unit in units {
                match unit.line_number {
                    Some(line) => println!("  {} (line {})", unit.id, line),
                    None => println!("  {}", unit.id),
                }
            }
        }
        Commands::Health => {
            let http = HttpBackend::new(config.backend_config())?;
            match http.health_check().await {
                Ok(()) => println!("Backend {} is healthy", config.backend.base_url),
                Err(e) => {
                    error!("Backend health check failed: {}", e);
                    return Err(e.into());
                }
            }
        }
    }

    Ok(())
}

async fn run(
    config: &RadarConfig,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let http = HttpBackend::new(config.backend_config())?;
    let analysis_backend: Arc<dyn AnalysisBackend> = Arc::new(http);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run (partial results will be reported)");
            let _ = cancel_tx.send(true);
        }
    });

    let report = pipeline::run_pipeline(config, analysis_backend, cancel_rx).await?;
    print_summary(&report);

    let json = serde_json::to_string_pretty(&report)?;
    match output {
        Some(path) => {
            std::fs::write(&path, json)?;
            info!("Report written to {}", path.display());
        }
        None => println!("{}", json),
    }

    // Failing tests are an analyzed outcome, not a pipeline error; the exit
    // code stays zero as long as every unit reached a terminal state.
    Ok(())
}

async fn analyze_only(
    config: &RadarConfig,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let http = HttpBackend::new(config.backend_config())?;
    let analysis_backend: Arc<dyn AnalysisBackend> = Arc::new(http);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling analysis");
            let _ = cancel_tx.send(true);
        }
    });

    let report = pipeline::run_analysis(config, analysis_backend, cancel_rx).await?;

    for entry in &report.entries {
        println!("\n{}", entry.unit.id);
        if entry.analysis.findings.is_empty() {
            println!("  no findings");
        }
        for finding in &entry.analysis.findings {
            println!(
                "  [{:?}] {}: {}",
                finding.severity, finding.category, finding.message
            );
        }
    }

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(&path, json)?;
        info!("Report written to {}", path.display());
    }

    Ok(())
}

fn print_summary(report: &Report) {
    let s = &report.summary;
    eprintln!("Test run summary:");
    eprintln!("  total:     {}", s.total_units);
    eprintln!("  passed:    {}", s.passed);
    eprintln!("  failed:    {}", s.failed);
    eprintln!("  errored:   {}", s.errored);
    eprintln!("  timed out: {}", s.timed_out);
    eprintln!("  skipped:   {}", s.skipped);
    eprintln!("  pass rate: {:.1}%", s.pass_rate * 100.0);
    if let Some(percent) = s.coverage.percent {
        eprintln!("  coverage:  {:.1}%", percent);
    } else {
        eprintln!("  coverage:  {} lines", s.coverage.lines_covered);
    }
    eprintln!("  findings:  {}", s.total_findings);
}
