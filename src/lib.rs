pub mod analysis;
pub mod commands;
pub mod error;
pub mod models;

use clap::{Parser, Subcommand};
use commands::{
    scan::{get_health_trend, get_latest_stats, get_scan_history, open_profile, scan_image},
    settings::{get_settings, save_settings},
};
use serde_json::Value;

#[derive(Debug, Parser)]
#[command(name = "skinlens", about = "Skin health scans, history and trends")]
struct Cli {
    /// Profile directory holding `.skinlens/`
    #[arg(long, default_value = ".")]
    data_dir: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Initialize the profile and show its metadata
    Open,
    /// Send a photo for analysis and record the result
    Scan { image: String },
    /// List recorded scans, newest first
    History,
    /// Chart-ready health score series
    Trend,
    /// Latest score and improvement
    Stats,
    /// Show settings, or merge a partial JSON document into them
    Settings {
        #[arg(long)]
        set: Option<String>,
    },
}

async fn dispatch(cli: Cli) -> Result<Value, Value> {
    let data_dir = cli.data_dir.as_str();
    match cli.command {
        Command::Open => open_profile(data_dir)
            .map(|meta| serde_json::json!(meta))
            .map_err(Value::String),
        Command::Scan { image } => scan_image(data_dir, &image)
            .await
            .map(|report| serde_json::json!(report))
            .map_err(|e| serde_json::json!(e)),
        Command::History => get_scan_history(data_dir)
            .await
            .map(|records| serde_json::json!(records))
            .map_err(|e| serde_json::json!(e)),
        Command::Trend => get_health_trend(data_dir)
            .await
            .map(|trend| serde_json::json!(trend))
            .map_err(|e| serde_json::json!(e)),
        Command::Stats => get_latest_stats(data_dir)
            .await
            .map(|stats| serde_json::json!(stats))
            .map_err(|e| serde_json::json!(e)),
        Command::Settings { set: None } => get_settings(data_dir).map_err(Value::String),
        Command::Settings { set: Some(raw) } => {
            let partial: Value = serde_json::from_str(&raw)
                .map_err(|e| Value::String(format!("INVALID_JSON: {e}")))?;
            save_settings(data_dir, partial).map_err(Value::String)
        }
    }
}

pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Runtime::new().expect("error while starting async runtime");

    match runtime.block_on(dispatch(cli)) {
        Ok(output) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&output).unwrap_or_else(|_| output.to_string())
            );
        }
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(1);
        }
    }
}
