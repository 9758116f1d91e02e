use std::path::PathBuf;

use bbtag::eval::ContextOptions;
use bbtag::services::{Channel, Guild, Message, User};
use bbtag::{Engine, EngineConfig, Error, Services};
use chrono::Utc;
use clap::Parser;
use serde_json::Value;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the script to run
    #[arg(short, long)]
    script: PathBuf,

    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed a variable before running, as `name=value`
    #[arg(long = "var", value_parser = parse_var)]
    vars: Vec<(String, String)>,

    /// Name the script runs as
    #[arg(short, long, default_value = "cli")]
    tag: String,

    /// Print recorded errors and the debug trail
    #[arg(short, long)]
    debug: bool,
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected name=value, got {}", raw))
}

fn cli_options(tag: &str) -> ContextOptions {
    let author = User {
        id: "cli-user".to_string(),
        name: "cli".to_string(),
    };
    ContextOptions {
        message: Message {
            id: "cli-message".to_string(),
            channel_id: "cli-channel".to_string(),
            author,
            content: String::new(),
            timestamp: Utc::now(),
        },
        channel: Channel {
            id: "cli-channel".to_string(),
            guild_id: "cli-guild".to_string(),
            name: "cli".to_string(),
        },
        guild: Guild {
            id: "cli-guild".to_string(),
            name: "cli".to_string(),
        },
        tag_name: tag.to_string(),
        silent: true,
        ..ContextOptions::default()
    }
}

async fn run(cli: &Cli) -> Result<(), Error> {
    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    info!("config loaded.");
    debug!("config: {:?}", config);

    let source = std::fs::read_to_string(&cli.script)
        .map_err(|e| Error::internal(format!("Failed to read script file: {}", e)))?;

    let engine = Engine::builder(Services::in_memory()).config(config).build()?;
    let mut ctx = engine.create_context(cli_options(&cli.tag)).await;
    for (name, value) in &cli.vars {
        let value = serde_json::from_str::<Value>(value)
            .ok()
            .filter(Value::is_array)
            .unwrap_or_else(|| Value::String(value.clone()));
        ctx.set_variable(name, Some(value)).await;
    }

    let result = engine.execute_with(&mut ctx, &source).await?;
    println!("{}", result.content);

    if cli.debug {
        eprintln!("state: {} in {:?}", result.state, result.duration);
        for error in &result.errors {
            eprintln!("error: {}", error);
        }
        for entry in &result.debug {
            eprintln!(
                "debug: {} {}",
                entry.subtag.as_deref().unwrap_or("-"),
                entry.text
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(&cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
