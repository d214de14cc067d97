use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing::{debug, error, info};
use tracing_subscriber::prelude::*;

use cs3_packager::{
    deploy, Adb, AnnotationScanner, BuildEvent, Error, PackagerConfig, PackagingSession,
    SessionReport,
};

#[derive(Parser, Debug)]
#[command(name = "cs3")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Package compiled plugin modules into .cs3 archives")]
struct Cli {
    #[arg(short, long, global = true, action = clap::ArgAction::Count, help = "Increase verbosity (-v for debug, -vv for trace)")]
    verbose: u8,

    #[arg(short, long, global = true, help = "Only print warnings and errors")]
    quiet: bool,

    /// Packager configuration file (defaults to packager.toml under --root)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Workspace root containing the units
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build archives for the given units, or every unit under the root
    Make {
        /// Unit directories
        units: Vec<PathBuf>,

        /// Run every stage even if its inputs are unchanged
        #[arg(long)]
        rerun_tasks: bool,
    },
    /// Build a unit and push its archive to a connected device
    Deploy {
        /// Unit directory
        unit: PathBuf,

        /// Run every stage even if its inputs are unchanged
        #[arg(long)]
        rerun_tasks: bool,
    },
    /// Print the plugin class found in class directories or jars
    Scan {
        /// Class directories or jar files
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Marker annotation descriptor
        #[arg(long)]
        marker: Option<String>,
    },
}

fn init_logging(verbose: u8, quiet: bool) {
    let default = match (quiet, verbose) {
        (true, _) => "cs3_packager=warn,cs3=warn",
        (false, 0) => "cs3_packager=info,cs3=info",
        (false, 1) => "cs3_packager=debug,cs3=debug",
        (false, _) => "cs3_packager=trace,cs3=trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().compact().with_target(false))
        .init();
}

fn load_config(cli: &Cli, rerun_tasks: bool) -> Result<PackagerConfig, Error> {
    let config = match &cli.config {
        Some(path) => PackagerConfig::load(path)?,
        None => PackagerConfig::load_or_default(&cli.root)?,
    };
    Ok(if rerun_tasks {
        config.with_rerun_tasks(true)
    } else {
        config
    })
}

fn print_failures(report: &SessionReport) {
    for unit in report.failed_units() {
        for failure in &unit.failures {
            match failure.stage {
                Some(stage) => eprintln!("{} > {}: {}", unit.module, stage, failure.error),
                None => eprintln!("{}: {}", unit.module, failure.error),
            }
        }
    }
}

fn new_session(cli: &Cli, config: PackagerConfig) -> PackagingSession {
    let session = PackagingSession::new(&cli.root, config);
    let started = Instant::now();
    session.on_event(move |event| {
        if let BuildEvent::UnitFinished { unit, success, .. } = event {
            let elapsed = event.timestamp().saturating_duration_since(started);
            debug!("{} finished after {:.2?} (success: {})", unit, elapsed, success);
        }
    });
    session
}

fn run(cli: &Cli) -> Result<bool, Error> {
    match &cli.command {
        Commands::Make { units, rerun_tasks } => {
            let config = load_config(cli, *rerun_tasks)?;
            let session = new_session(cli, config);
            let report = if units.is_empty() {
                session.run_all()?
            } else {
                session.run(units)?
            };
            print_failures(&report);
            Ok(report.success())
        }
        Commands::Deploy { unit, rerun_tasks } => {
            let config = load_config(cli, *rerun_tasks)?;
            let session = new_session(cli, config.clone());
            let report = session.run(std::slice::from_ref(unit))?;
            print_failures(&report);

            let Some(archive) = report.units.first().and_then(|u| u.archive.clone()) else {
                return Ok(false);
            };
            let loaded = session.load_unit(unit)?;
            let bridge = Adb::for_unit(&config, &loaded)?;
            deploy(&bridge, &archive, &config.device_plugin_dir)?;
            Ok(true)
        }
        Commands::Scan { paths, marker } => {
            let marker = match marker {
                Some(marker) => marker.clone(),
                None => load_config(cli, false)?.marker,
            };
            match AnnotationScanner::new(marker).scan_roots(paths)? {
                Some(name) => println!("{}", name),
                None => info!("No plugin class found"),
            }
            Ok(true)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
