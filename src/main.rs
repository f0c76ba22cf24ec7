use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use navigator::config::Config;
use navigator::orchestration::{run_research, ExecutionEvent};
use navigator::research::research_graph;
use navigator::{telemetry, Error, Query, Result};

/// Navigator - evidence-backed research answers from a graph of model workers
#[derive(Parser, Debug)]
#[command(name = "navigator")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    NAVIGATOR_DEBUG=1     Enable debug logging (alternative to --debug)\n    RUST_LOG              Override the log filter")]
pub struct Cli {
    /// Enable debug logging (written to stderr)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Configuration file (defaults to ~/.navigator/navigator.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Research a question and print the reply as JSON
    Run {
        /// The research question
        query: String,

        /// Additional context for the question
        #[arg(long)]
        context: Option<String>,

        /// Additional parameter as KEY=VALUE (VALUE may be JSON)
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,

        /// Print execution events to stderr
        #[arg(long)]
        progress: bool,
    },

    /// Print the nodes and edges of the research graph
    Graph,
}

fn parse_param(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn main() {
    let cli = Cli::parse();
    telemetry::init(cli.debug);

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    debug!(?config, "starting navigator");

    match cli.command {
        Command::Run {
            query,
            context,
            params,
            progress,
        } => {
            let mut query = Query::new(&query)?;
            if let Some(context) = context {
                query = query.with_context(&context);
            }
            for (key, value) in params {
                query = query.with_param(&key, value);
            }
            run_query(&config, query, progress)
        }
        Command::Graph => {
            print_graph()?;
            Ok(0)
        }
    }
}

/// Execute one query and print the reply body on stdout.
fn run_query(config: &Config, query: Query, progress: bool) -> Result<i32> {
    let capabilities = config.capabilities()?;
    let executor_config = config.executor_config();

    let rt = tokio::runtime::Runtime::new()?;
    let reply = rt.block_on(async {
        let cancel = CancellationToken::new();
        let interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling run");
                interrupt.cancel();
            }
        });

        let (events, printer) = if progress {
            let (tx, rx) = mpsc::channel(64);
            (Some(tx), Some(tokio::spawn(print_events(rx))))
        } else {
            (None, None)
        };

        let reply = run_research(&query, &capabilities, &executor_config, events, cancel).await;
        if let Some(printer) = printer {
            let _ = printer.await;
        }
        reply
    })?;

    info!(status = reply.status_code(), "research finished");
    eprintln!("status: {}", reply.status_code());
    println!("{}", serde_json::to_string_pretty(&reply.body())?);
    Ok(reply.exit_code())
}

async fn print_events(mut rx: mpsc::Receiver<ExecutionEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            ExecutionEvent::NodeStarted { task_id } => eprintln!("[started]   {}", task_id),
            ExecutionEvent::NodeSucceeded { task_id } => eprintln!("[succeeded] {}", task_id),
            ExecutionEvent::NodeFailed { task_id, reason } => {
                eprintln!("[failed]    {}: {}", task_id, reason)
            }
            ExecutionEvent::GateRejected { verdict } => {
                eprintln!("[rejected]  {:?}", verdict.reasons.unwrap_or_default())
            }
            ExecutionEvent::RunFinished { completed } => {
                eprintln!("[finished]  completed={}", completed)
            }
        }
    }
}

fn print_graph() -> Result<()> {
    // The structure is query-independent.
    let graph = research_graph(&Query::new("example")?)?;
    println!("NODES");
    for spec in graph.tasks() {
        let mut flags = Vec::new();
        if spec.gate {
            flags.push("gate".to_string());
        }
        if spec.concurrent {
            flags.push("concurrent".to_string());
        }
        if let Some(schema) = spec.schema {
            flags.push(format!("schema={}", schema));
        }
        for tool in &spec.tools {
            flags.push(format!("tool={}", tool));
        }
        if &spec.id == graph.sink() {
            flags.push("sink".to_string());
        }
        println!("  {:<18} {:<34} {}", spec.id.as_str(), spec.role.name, flags.join(" "));
    }
    println!("EDGES");
    for (from, to) in graph.edges() {
        println!("  {} -> {}", from, to);
    }
    let levels = graph.levels()?;
    if levels.is_empty() {
        return Err(Error::InvalidGraph("no levels after the gate".to_string()));
    }
    println!("LEVELS");
    for (n, level) in levels.iter().enumerate() {
        let ids: Vec<&str> = level.iter().map(|id| id.as_str()).collect();
        println!("  {}: {}", n + 1, ids.join(", "));
    }
    Ok(())
}
