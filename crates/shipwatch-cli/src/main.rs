use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use shipwatch::config::WatchConfig;
use shipwatch::orchestrator::ReleaseOutcome;
use shipwatch::reconcile::{CycleReport, Plan, Watchdog};
use shipwatch::{Version, schedule};

mod logging;

use logging::LogFormat;

#[derive(Parser, Debug)]
#[command(name = "shipwatch", version)]
#[command(about = "Keep a downstream image repository in step with an upstream release feed")]
struct Cli {
    /// Path to the configuration file (default: ./shipwatch.toml when present)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile on the configured interval until interrupted.
    Run,
    /// Run a single reconciliation cycle and exit.
    ///
    /// Exits non-zero when the cycle fails or any release aborts.
    Once {
        /// Print the cycle report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show what the next cycle would publish, without publishing.
    Plan {
        /// Print the plan as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the artifact checksum for a version, downloading it if needed.
    Checksum {
        /// Release version (major.minor.patch)
        version: String,
    },
    /// Write an annotated starting configuration.
    Init {
        /// Destination file
        #[arg(default_value = shipwatch::config::DEFAULT_CONFIG_FILE)]
        path: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    if let Commands::Init { path, force } = &cli.cmd {
        return run_init(path, *force);
    }

    let config = WatchConfig::load(cli.config.as_deref())?;
    // Blocking HTTP clients are built here, outside any async runtime.
    let mut watchdog = Watchdog::from_config(&config)?;

    match cli.cmd {
        Commands::Run => run_daemon(watchdog, &config),
        Commands::Once { json } => {
            let report = watchdog.run_cycle()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            if report.aborted() > 0 {
                bail!("{} release(s) aborted", report.aborted());
            }
            Ok(())
        }
        Commands::Plan { json } => {
            let plan = watchdog.plan()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                print_plan(&plan);
            }
            Ok(())
        }
        Commands::Checksum { version } => {
            let version: Version = version.parse()?;
            let checksum = watchdog.checksum(version)?;
            if checksum.is_empty() {
                bail!("artifact for {version} is not downloadable yet");
            }
            println!("{checksum}");
            Ok(())
        }
        Commands::Init { .. } => Ok(()),
    }
}

fn run_daemon(watchdog: Watchdog, config: &WatchConfig) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let cycles = runtime.block_on(schedule::watch(
        watchdog,
        config.schedule.interval,
        async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        },
    ));

    info!(cycles, "watchdog stopped");
    Ok(())
}

fn run_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    fs::write(path, WatchConfig::default_toml_template())
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}

fn print_plan(plan: &Plan) {
    println!("latest: {}", plan.catalog.latest);
    match plan.stable {
        Some(stable) => println!("stable: {stable}"),
        None => println!("stable: none"),
    }
    if !plan.below_floor.is_empty() {
        let dropped: Vec<_> = plan.below_floor.iter().map(ToString::to_string).collect();
        println!("below floor: {}", dropped.join(", "));
    }
    println!();

    for release in &plan.work.releases {
        println!("{}: publish [{}]", release.version, release.tags.join(", "));
    }
    for skipped in &plan.work.skipped {
        println!("{}: skip ({:?})", skipped.version, skipped.reason);
    }
    if plan.work.is_empty() {
        println!("nothing to publish");
    }
}

fn print_report(report: &CycleReport) {
    println!("cycle: {}", report.cycle);
    println!("latest: {}", report.latest);
    println!();

    for release in &report.releases {
        let outcome = match &release.outcome {
            ReleaseOutcome::Published => "published".to_string(),
            ReleaseOutcome::Unchanged => "unchanged".to_string(),
            ReleaseOutcome::Aborted { stage, error } => format!("aborted at {stage}: {error}"),
        };
        println!("{} [{}]: {outcome}", release.version, release.tags.join(", "));
    }
    println!(
        "published={} unchanged={} aborted={} skipped={}",
        report.published(),
        report.unchanged(),
        report.aborted(),
        report.skipped
    );
}
