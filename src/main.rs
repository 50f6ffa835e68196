//! task-warden CLI
//!
//! Wires the config, store, worker registry, delegation engine, and tick
//! driver together; `serve` runs the coordinator loop, the rest are
//! operator commands against the same store.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use task_warden::collab::{Mailbox, SqliteAuditSink, SqliteBoard, SqliteMailbox};
use task_warden::config::Config;
use task_warden::db::Database;
use task_warden::engine::{DelegationEngine, TaskOutcome};
use task_warden::tick::{TickDriver, TickKind};
use task_warden::types::{NewTask, TaskStatus};
use task_warden::worker::{TmuxConnector, WorkerRegistry};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "task-warden", version, about = "Task-tree delegation engine for a fleet of agent workers")]
struct Cli {
    /// Config file path (YAML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database path; overrides the config file.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the coordinator loop: periodic ticks plus message ticks for any
    /// unread mail.
    Serve,
    /// Run a single periodic tick and exit.
    Tick,
    /// Task operations.
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },
    /// Probe fleet health.
    Workers,
    /// Task counts by status.
    Stats,
    /// Show recent audit morsels.
    Audit {
        #[arg(long)]
        tag: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Mailbox operations.
    Msg {
        #[command(subcommand)]
        command: MsgCommand,
    },
}

#[derive(Subcommand)]
enum TaskCommand {
    /// Create a task.
    Create {
        #[arg(long)]
        creator: String,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        prompt: String,
        /// Pin the task to a specific worker.
        #[arg(long)]
        assignee: Option<String>,
        #[arg(long)]
        parent: Option<i64>,
        /// Gate task that must finish first.
        #[arg(long)]
        blocked_by: Option<i64>,
        #[arg(long)]
        card: Option<String>,
        /// Follow-up instructions surfaced when the task finishes.
        #[arg(long)]
        follow_up: Option<String>,
    },
    /// List tasks, optionally by status.
    List {
        #[arg(long)]
        status: Option<String>,
    },
    Show {
        id: i64,
    },
    /// Show a task with its descendants.
    Tree {
        id: i64,
    },
    /// Show a task's status transition history.
    History {
        id: i64,
    },
    /// Worker signal: execution has begun.
    Started {
        id: i64,
        #[arg(long)]
        worker: String,
    },
    /// Worker signal: execution finished. Triggers an event tick.
    Finished {
        id: i64,
        #[arg(long)]
        worker: String,
        #[arg(long)]
        failed: bool,
        #[arg(long)]
        output: Option<String>,
    },
    /// Kill a task and its gated dependents.
    Kill {
        id: i64,
        #[arg(long)]
        reason: Option<String>,
    },
}

#[derive(Subcommand)]
enum MsgCommand {
    Send {
        #[arg(long)]
        sender: String,
        #[arg(long, required = true)]
        to: Vec<String>,
        #[arg(long)]
        body: String,
    },
    Unread,
}

struct App {
    engine: Arc<DelegationEngine>,
    driver: TickDriver,
    mailbox: Arc<SqliteMailbox>,
    db: Database,
    tick_interval: Duration,
}

fn build(cli: &Cli) -> Result<App> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db_path) = &cli.db {
        config.database.path = Some(db_path.clone());
    }

    let db = Database::open(config.database_path())?;

    let mut registry = WorkerRegistry::new(Duration::from_millis(config.engine.health_timeout_ms));
    for w in &config.workers {
        registry.register(
            &w.name,
            Arc::new(TmuxConnector::new(&w.session, w.command.clone())),
        );
    }
    if config.workers.is_empty() {
        warn!("no workers declared; tasks will stay pending");
    }

    let mailbox = Arc::new(SqliteMailbox::new(db.clone()));
    let board = Arc::new(SqliteBoard::new(db.clone()));
    let audit = Arc::new(SqliteAuditSink::new(db.clone()));

    let engine = Arc::new(DelegationEngine::new(
        db.clone(),
        Arc::new(registry),
        board,
        audit.clone(),
        config.engine.clone(),
    ));

    let driver = TickDriver::new(
        Arc::clone(&engine),
        mailbox.clone(),
        audit,
        Duration::from_millis(config.tick.lock_wait_ms),
    );

    Ok(App {
        engine,
        driver,
        mailbox,
        db,
        tick_interval: Duration::from_millis(config.tick.interval_ms),
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let app = build(&cli)?;

    match cli.command {
        Command::Serve => {
            info!(interval_ms = app.tick_interval.as_millis() as u64, "coordinator started");
            let mut timer = tokio::time::interval(app.tick_interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                timer.tick().await;

                // Inbound mail first: each unread message is its own tick.
                match app.mailbox.list_unread().await {
                    Ok(unread) => {
                        for msg in unread {
                            if let Err(e) = app.driver.run(TickKind::Message(msg.id)).await {
                                warn!(message = msg.id, error = %e, "message tick failed");
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "unread poll failed"),
                }

                if let Err(e) = app.driver.run(TickKind::Periodic).await {
                    warn!(error = %e, "periodic tick failed");
                }
            }
        }
        Command::Tick => {
            let outcome = app.driver.run(TickKind::Periodic).await?;
            print_json(&outcome)?;
        }
        Command::Task { command } => match command {
            TaskCommand::Create {
                creator,
                subject,
                prompt,
                assignee,
                parent,
                blocked_by,
                card,
                follow_up,
            } => {
                let task = app
                    .engine
                    .create_task(NewTask {
                        creator,
                        subject,
                        prompt,
                        assignee,
                        parent_task_id: parent,
                        blocked_by_task_id: blocked_by,
                        card_id: card,
                        follow_up,
                    })
                    .await?;
                print_json(&task)?;
            }
            TaskCommand::List { status } => {
                let status = match status.as_deref() {
                    Some(s) => Some(
                        TaskStatus::parse(s)
                            .ok_or_else(|| anyhow::anyhow!("unknown status: {}", s))?,
                    ),
                    None => None,
                };
                let tasks = app.db.list_tasks(status)?;
                let summaries: Vec<task_warden::types::TaskSummary> =
                    tasks.iter().map(Into::into).collect();
                print_json(&summaries)?;
            }
            TaskCommand::Show { id } => {
                let task = app.db.require_task(id)?;
                print_json(&task)?;
            }
            TaskCommand::Tree { id } => {
                let tree = app
                    .db
                    .get_task_tree(id)?
                    .ok_or_else(|| anyhow::anyhow!("task {} not found", id))?;
                print_json(&tree)?;
            }
            TaskCommand::History { id } => {
                let history = app.db.get_task_history(id)?;
                print_json(&history)?;
            }
            TaskCommand::Started { id, worker } => {
                let task = app.engine.record_task_started(id, &worker)?;
                print_json(&task)?;
            }
            TaskCommand::Finished {
                id,
                worker,
                failed,
                output,
            } => {
                let outcome = if failed {
                    TaskOutcome::Failed
                } else {
                    TaskOutcome::Completed
                };
                app.engine
                    .record_task_outcome(id, &worker, outcome, output.as_deref())?;
                // Terminal outcome drives an event tick: follow-ups,
                // unblocking, and a placement pass.
                let tick = app.driver.run(TickKind::TaskEvent(id)).await?;
                print_json(&tick)?;
            }
            TaskCommand::Kill { id, reason } => {
                let propagated = app.engine.kill_task(id, reason.as_deref()).await?;
                println!("killed task {} (+{} dependents)", id, propagated.len());
            }
        },
        Command::Workers => {
            let registry = app.engine.registry();
            let snapshot = registry.health_snapshot().await;
            for name in registry.names() {
                match snapshot.get(&name) {
                    Some(h) if h.reachable => {
                        println!("{}: reachable, {} active", name, h.active_count)
                    }
                    _ => println!("{}: unreachable", name),
                }
            }
        }
        Command::Stats => {
            let stats = app.db.stats()?;
            print_json(&stats)?;
        }
        Command::Audit { tag, limit } => {
            let morsels = app.db.list_morsels(tag.as_deref(), limit)?;
            print_json(&morsels)?;
        }
        Command::Msg { command } => match command {
            MsgCommand::Send { sender, to, body } => {
                let id = app.mailbox.send_message(&sender, &to, &body).await?;
                println!("message {} sent", id);
            }
            MsgCommand::Unread => {
                let unread = app.mailbox.list_unread().await?;
                print_json(&unread)?;
            }
        },
    }

    Ok(())
}
