use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::time::Duration;
use swarmux_core::{classify_prefix, scrape_pane, EngineConfig};
use swarmux_discovery::{DiscoveredTask, DiscoveryService, DiscoverySnapshot};
use swarmux_storage::{NameResolver, WorkspaceLayout};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "swarmux")]
#[command(about = "Inspect orchestrator task windows across tmux servers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one discovery pass and print the board
    Discover {
        #[arg(long)]
        json: bool,
        /// Abandon the pass after this many milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,
    },
    /// Print every token generation for a task name
    Encode { name: String },
    /// Decode a window name into token and status
    Decode { window_name: String },
    /// Record a task name in a workspace's window-name map
    Record {
        #[arg(long)]
        workspace: PathBuf,
        name: String,
    },
    /// Print the merged window-name map of a workspace
    Names {
        #[arg(long)]
        workspace: PathBuf,
    },
    /// Scrape a captured agent pane read from a file or stdin
    Scrape {
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = EngineConfig::from_env();
    debug!(
        event = "config_resolved",
        socket_dir = %config.socket_dir.display(),
        socket_prefix = %config.socket_prefix
    );

    match cli.command {
        Commands::Discover { json, deadline_ms } => {
            let service = DiscoveryService::with_tmux(config);
            let snapshot = match deadline_ms {
                Some(ms) => service
                    .discover_with_deadline(Duration::from_millis(ms))
                    .await
                    .with_context(|| format!("discovery pass exceeded {ms}ms deadline"))?,
                None => service.discover_all().await,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print!("{}", render_board(&snapshot));
            }
        }
        Commands::Encode { name } => {
            let codec = config.codec();
            println!("current\t{}", codec.encode(&name));
            println!("legacy\t{}", codec.legacy_token(&name));
            println!("hashed\t{}", codec.hashed_token(&name));
        }
        Commands::Decode { window_name } => {
            let Some((token, raw_status)) = classify_prefix(&window_name) else {
                bail!("{window_name:?} is not a task window");
            };
            println!("token\t{token}");
            println!("status\t{}", raw_status.folded());
            println!("raw_status\t{raw_status}");
        }
        Commands::Record { workspace, name } => {
            let layout = WorkspaceLayout::new(workspace);
            let token = swarmux_storage::record(&layout, &config.codec(), &name)
                .with_context(|| format!("Failed to record {name:?}"))?;
            println!("{token}");
        }
        Commands::Names { workspace } => {
            let layout = WorkspaceLayout::new(workspace);
            let resolver = NameResolver::load(&layout, config.codec())
                .context("Failed to load window-name map")?;
            println!("{}", serde_json::to_string_pretty(&resolver.merged())?);
        }
        Commands::Scrape { file } => {
            let text = match file {
                Some(path) => fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                None => {
                    let mut text = String::new();
                    io::stdin()
                        .read_to_string(&mut text)
                        .context("Failed to read stdin")?;
                    text
                }
            };
            println!("{}", serde_json::to_string_pretty(&scrape_pane(&text))?);
        }
    }

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(resolve_log_level()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn resolve_log_level() -> String {
    if let Ok(value) = std::env::var("SWARMUX_LOG_LEVEL") {
        if !value.trim().is_empty() {
            return value.trim().to_string();
        }
    }
    "warn".to_string()
}

fn render_board(snapshot: &DiscoverySnapshot) -> String {
    let mut out = String::new();
    for (title, tasks) in [
        ("WORKING", &snapshot.working),
        ("WAITING", &snapshot.waiting),
        ("DONE", &snapshot.done),
    ] {
        out.push_str(&format!("{title} ({})\n", tasks.len()));
        for task in tasks.iter() {
            out.push_str(&render_row(task));
            out.push('\n');
        }
    }
    out
}

fn render_row(task: &DiscoveredTask) -> String {
    let location = format!("{}:{}", task.session, task.window_id);
    let mut row = format!("  {:<24} {:<16}", task.name, location);
    for field in [&task.duration, &task.tokens, &task.current_action] {
        if !field.is_empty() {
            row.push_str("  ");
            row.push_str(field);
        }
    }
    row.trim_end().to_string()
}
