//! Hoist - site deployment agent
//!
//! Usage:
//!   hoist deploy              # Fetch the configured branch and deploy it
//!   hoist deploy --zip a.zip  # Deploy the contents of an archive
//!   hoist history             # Show recent deployments
//!   hoist lock                # Show who holds the deployment lock

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hoist_core::config::Environment;
use hoist_core::context::AppContext;
use hoist_core::deploy::LockStatus;
use hoist_core::status::{LogEntry, LogLevel};
use hoist_core::types::{
    DeployResult, DeployStatus, DeploymentRequest, DeploymentResponse, DeploymentSource,
    RequestMode,
};

/// Exit code when another deployment holds the lock.
const EXIT_CONFLICT: i32 = 2;

#[derive(Parser)]
#[command(name = "hoist")]
#[command(about = "Site deployment agent", long_about = None)]
struct Cli {
    /// Site root (defaults to the user state directory)
    #[arg(long, global = true)]
    site: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and deploy
    Deploy {
        /// Wait in line behind a running deployment instead of failing
        #[arg(long)]
        queued: bool,

        /// Remote repository (overrides repository_url)
        #[arg(long, conflicts_with = "zip")]
        repo: Option<String>,

        /// Branch to deploy (overrides branch)
        #[arg(long, conflicts_with = "zip")]
        branch: Option<String>,

        /// Deploy this commit after fetching
        #[arg(long, conflicts_with = "zip")]
        commit: Option<String>,

        /// Deploy a zip archive instead of fetching
        #[arg(long)]
        zip: Option<PathBuf>,

        /// Skip when the fetched change set is already active
        #[arg(long)]
        continuous: bool,

        /// Name recorded as the deployer
        #[arg(long, default_value = "hoist")]
        deployer: String,

        /// Message recorded with the deployment
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Deploy a previous change set again
    Redeploy {
        id: String,

        /// Wait in line behind a running deployment instead of failing
        #[arg(long)]
        queued: bool,
    },

    /// List deployments, most recent first
    History {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show one deployment
    Show {
        id: String,

        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Print a deployment's log
    Log { id: String },

    /// Delete a deployment that is not active
    #[command(alias = "rm")]
    Delete { id: String },

    /// Show the deployment lock state
    Lock {
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hoist=info,hoist_core=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let root = match cli.site {
        Some(root) => root,
        None => Environment::default_root()?,
    };
    let context = AppContext::load(&root)?;

    let code = run(&context, cli.command).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn run(context: &AppContext, command: Commands) -> Result<i32> {
    let orchestrator = context.orchestrator();
    match command {
        Commands::Deploy {
            queued,
            repo,
            branch,
            commit,
            zip,
            continuous,
            deployer,
            message,
        } => {
            let source = match zip {
                Some(archive) => DeploymentSource::Zip { archive },
                None => DeploymentSource::Repository {
                    repo_url: repo,
                    branch,
                    commit_id: commit,
                },
            };
            let mut request = DeploymentRequest::new(source).with_deployer(deployer);
            if let Some(message) = message {
                request = request.with_message(message);
            }
            if continuous {
                request = request.continuous();
            }

            let response = orchestrator
                .request_deployment(request, mode(queued))
                .await?;
            finish(context, response).await
        }
        Commands::Redeploy { id, queued } => {
            let response = orchestrator.redeploy(&id, "hoist", mode(queued)).await?;
            finish(context, response).await
        }
        Commands::History { format } => {
            let history = orchestrator.get_history()?;
            match format {
                OutputFormat::Table => print_history_table(&history),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&history)?),
            }
            Ok(0)
        }
        Commands::Show { id, format } => {
            let result = orchestrator.get_result(&id)?;
            match format {
                OutputFormat::Table => print_result(&result),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
            }
            Ok(0)
        }
        Commands::Log { id } => {
            for entry in orchestrator.get_log(&id)? {
                print_log_entry(&entry);
            }
            Ok(0)
        }
        Commands::Delete { id } => {
            orchestrator.delete(&id)?;
            println!("Deleted {}", id);
            Ok(0)
        }
        Commands::Lock { format } => {
            let status = orchestrator.lock_status();
            match format {
                OutputFormat::Table => print_lock_status(&status),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
            }
            Ok(0)
        }
    }
}

fn mode(queued: bool) -> RequestMode {
    if queued {
        RequestMode::Queued
    } else {
        RequestMode::Synchronous
    }
}

async fn finish(context: &AppContext, response: DeploymentResponse) -> Result<i32> {
    let orchestrator = context.orchestrator();
    match response {
        DeploymentResponse::Completed(result) => {
            print_result(&result);
            Ok(if result.status == DeployStatus::Success { 0 } else { 1 })
        }
        DeploymentResponse::Accepted { id } => {
            println!("Queued as {}; waiting for the running deployment...", id);
            orchestrator.wait_for_background().await;
            match orchestrator.get_history()?.into_iter().next() {
                Some(latest) => {
                    print_result(&latest);
                    Ok(0)
                }
                None => Ok(0),
            }
        }
        DeploymentResponse::NoChange => {
            println!("Nothing to deploy.");
            Ok(0)
        }
        DeploymentResponse::Conflict => {
            eprintln!("Another deployment is in progress; the request was recorded.");
            Ok(EXIT_CONFLICT)
        }
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

fn print_history_table(history: &[DeployResult]) {
    if history.is_empty() {
        println!("No deployments.");
        return;
    }
    println!(
        "  {:<14} {:<10} {:<20} {:<12} Message",
        "Id", "Status", "Started", "Author"
    );
    for result in history {
        let marker = if result.current { "*" } else { " " };
        println!(
            "{} {:<14} {:<10} {:<20} {:<12} {}",
            marker,
            short_id(&result.id),
            result.status.to_string(),
            result.start_time.format("%Y-%m-%d %H:%M:%S"),
            result.author,
            result.message.lines().next().unwrap_or_default()
        );
    }
}

fn print_result(result: &DeployResult) {
    println!("Id:       {}", result.id);
    println!(
        "Status:   {}{}",
        result.status,
        if result.current { " (active)" } else { "" }
    );
    if !result.status_text.is_empty() {
        println!("Detail:   {}", result.status_text);
    }
    println!("Author:   {}", result.author);
    println!("Deployer: {}", result.deployer);
    println!("Message:  {}", result.message);
    println!("Started:  {}", result.start_time.format("%Y-%m-%d %H:%M:%S"));
    if let Some(end) = result.end_time {
        println!("Finished: {}", end.format("%Y-%m-%d %H:%M:%S"));
    }
}

fn print_log_entry(entry: &LogEntry) {
    let level = match entry.level {
        LogLevel::Info => "info",
        LogLevel::Warning => "warning",
        LogLevel::Error => "error",
    };
    println!(
        "{} {:<7} {}",
        entry.timestamp.format("%H:%M:%S"),
        level,
        entry.message
    );
}

fn print_lock_status(status: &LockStatus) {
    if !status.held {
        println!("Deployment lock is free.");
        return;
    }
    match &status.info {
        Some(info) => println!(
            "Held by '{}' (pid {}) since {}",
            info.operation,
            info.pid,
            info.acquired_at.format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!("Held by another process."),
    }
    if status.queued > 0 {
        println!("{} request(s) waiting in this process.", status.queued);
    }
}
