use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::ai::ClipScorer;
use crate::config::{load_config, save_config};
use crate::daemon::{run_daemon, DaemonOptions};
use crate::errors::{HatCheckError, HatCheckResult};
use crate::feedback::Feedback;
use crate::frame::Frame;
use crate::ipc::{send_command, ControlMessage, Reply};
use crate::policy::{decide, HAT_LABEL};
use crate::scores::Vocabulary;
use crate::scoring::Scorer;

#[derive(Parser)]
#[command(
    name = "hat-check",
    version,
    about = "Live webcam hat check"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the screening service
    Daemon {
        /// Camera device index
        #[arg(short, long)]
        camera: Option<u32>,
        /// Start screening as soon as the model is loaded
        #[arg(long)]
        autostart: bool,
    },
    /// Start screening in a running daemon
    Start,
    /// Stop screening in a running daemon
    Stop,
    /// Print the daemon state and latest result
    Status,
    /// Score a single image file
    Check { image: PathBuf },
    /// Inspect or change the configuration
    Config {
        #[command(subcommand)]
        action: ConfigSubcommand,
    },
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the current configuration
    Show,
    /// Set the concepts scored for every frame
    Vocabulary {
        #[arg(required = true)]
        labels: Vec<String>,
    },
    /// Set the scoring timeout in milliseconds (0 disables it)
    Timeout { ms: u64 },
    /// Set the camera device index
    Camera { index: u32 },
}

pub fn run_cli() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();
    if let Err(e) = execute(cli) {
        error!("{e}");
        std::process::exit(1);
    }
}

pub fn execute(cli: Cli) -> HatCheckResult<()> {
    match cli.command {
        Commands::Daemon { camera, autostart } => run_daemon(DaemonOptions { camera, autostart }),
        Commands::Start => control(ControlMessage::Start),
        Commands::Stop => control(ControlMessage::Stop),
        Commands::Status => control(ControlMessage::Status),
        Commands::Check { image } => check(image),
        Commands::Config { action } => configure(action),
    }
}

fn control(msg: ControlMessage) -> HatCheckResult<()> {
    match send_command(&msg)? {
        Reply::Ack => info!(?msg, "daemon acknowledged"),
        Reply::Status(report) => println!("{}: {}", report.state, report.feedback),
        Reply::Error(e) => return Err(HatCheckError::Refused(e)),
    }
    Ok(())
}

fn check(image: PathBuf) -> HatCheckResult<()> {
    let cfg = load_config();
    let vocabulary = Vocabulary::new(cfg.vocabulary.clone())?;
    let frame = Frame::from_file(&image)?;
    let scorer = ClipScorer::load(&cfg.model)?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let scores = rt.block_on(scorer.classify(&frame, &vocabulary))?;
    for entry in &scores {
        println!("{:<12} {:.4}", entry.label, entry.score);
    }
    println!("{}", Feedback::from_verdict(decide(&scores)));
    Ok(())
}

fn configure(action: ConfigSubcommand) -> HatCheckResult<()> {
    let mut cfg = load_config();
    match action {
        ConfigSubcommand::Show => {
            println!("{}", serde_json::to_string_pretty(&cfg)?);
            return Ok(());
        }
        ConfigSubcommand::Vocabulary { labels } => {
            let vocabulary = Vocabulary::new(labels)?;
            if !vocabulary.labels().iter().any(|l| l == HAT_LABEL) {
                return Err(HatCheckError::Vocabulary(format!(
                    "vocabulary must include {:?}",
                    HAT_LABEL
                )));
            }
            cfg.vocabulary = vocabulary.into();
        }
        ConfigSubcommand::Timeout { ms } => cfg.scoring_timeout_ms = (ms > 0).then_some(ms),
        ConfigSubcommand::Camera { index } => cfg.camera_index = index,
    }
    save_config(&cfg)?;
    info!("configuration updated, restart the daemon to apply it");
    Ok(())
}
