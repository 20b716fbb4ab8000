use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use scirust_vna::config::VnaConfig;
use scirust_vna::dataset::{self, TouchstoneLoader};
use scirust_vna::ordering::MeasurementBatch;
use scirust_vna::{MeasurementPlan, Sequencer, SessionController};

#[derive(Parser, Debug)]
#[command(author, version, about = "Network analyzer measurement and stitching assistant")]
struct Cli {
    /// Config file (defaults to ./vna.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the VISA address from the config
    #[arg(long, global = true)]
    address: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Query the instrument identity
    Identify,
    /// Measure calibration states start..=end
    Measure {
        #[arg(long)]
        start: i32,
        #[arg(long)]
        end: i32,
        #[arg(long)]
        name: String,
    },
    /// Full band in a single segment
    Coarse {
        #[arg(long)]
        name: String,
    },
    /// Every fine sub-band
    Fine {
        #[arg(long)]
        name: String,
        /// Last sub-band (defaults to the config's fine_end)
        #[arg(long)]
        end: Option<i32>,
    },
    /// Time-domain reflectometry measurement
    Tdr {
        #[arg(long)]
        name: String,
    },
    /// Stitch the fine sub-band files of a directory into one network
    Stitch {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Print measurement files in ordinal order
    Sort { files: Vec<PathBuf> },
}

fn init_logging(verbose: u8, configured: &str) -> Result<()> {
    let level = match verbose {
        0 => configured.parse::<Level>().unwrap_or(Level::INFO),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn measure(config: &VnaConfig, plan: MeasurementPlan, name: &str) -> Result<()> {
    let mut session: SessionController = SessionController::new(config.timing.clone());
    session
        .connect(&config.address, &config.open_options())
        .context("connecting to analyzer")?;
    let identity = session.identify().context("identifying analyzer")?;
    info!(%identity, "connected");

    let outcome = Sequencer::new(&mut session).run(plan, name);
    session.disconnect();
    for saved in outcome.context("measurement run failed")? {
        println!("{}\t{}.s2p", saved.id, saved.name);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = VnaConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(address) = cli.address {
        config.address = address;
    }
    init_logging(cli.verbose, &config.log_level)?;

    match cli.command {
        Command::Identify => {
            let mut session: SessionController = SessionController::new(config.timing.clone());
            session
                .connect(&config.address, &config.open_options())
                .context("connecting to analyzer")?;
            let identity = session.identify();
            session.disconnect();
            println!("{}", identity?);
        }
        Command::Measure { start, end, name } => {
            measure(&config, MeasurementPlan::Range { start, end }, &name)?
        }
        Command::Coarse { name } => measure(&config, MeasurementPlan::Coarse, &name)?,
        Command::Fine { name, end } => {
            let end = end.unwrap_or(config.fine_end);
            measure(&config, MeasurementPlan::Fine { end }, &name)?
        }
        Command::Tdr { name } => measure(&config, MeasurementPlan::Tdr, &name)?,
        Command::Stitch { dir, output } => {
            let network = dataset::stitch_directory(&dir, &TouchstoneLoader)
                .with_context(|| format!("stitching {}", dir.display()))?;
            let written = dataset::save_stitched(&network, &output)?;
            println!("{}", written.display());
        }
        Command::Sort { files } => {
            let batch = MeasurementBatch::from_paths(&files)?;
            for coarse in &batch.coarse {
                println!("-\t{}", coarse.display());
            }
            for file in &batch.fine {
                println!("{}\t{}", file.ordinal, file.path.display());
            }
        }
    }
    Ok(())
}
