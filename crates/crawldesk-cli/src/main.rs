mod worklist;

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crawldesk_core::config::{EngineConfig, SiteConfig};
use crawldesk_core::logging::{DEFAULT_FILTER, init_tracing};
use crawldesk_core::models::{TaskItem, TaskStatus};
use crawldesk_core::orchestration::BroadcastObserver;
use crawldesk_core::output::{NoopRevealer, OutputLayout};
use crawldesk_core::session::ProcessSessionFactory;
use crawldesk_core::sites::{ComsiganItem, NaraG2bItem, OpenGoKrItem, Site};
use crawldesk_core::{TaskEngine, TaskId};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::worklist::Worklist;

#[derive(Debug, Parser)]
#[command(name = "crawldesk", version, about = "Runs and schedules portal scraping tasks")]
struct Cli {
    /// Engine configuration file (defaults to ./crawldesk.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run every task of a worklist, honouring scheduled times.
    Run {
        worklist: PathBuf,

        /// Do not open output folders when tasks finish.
        #[arg(long)]
        no_reveal: bool,
    },
    /// Validate a worklist against the configuration without running anything.
    Check { worklist: PathBuf },
}

#[derive(Debug)]
struct TaskSummary {
    site: Site,
    id: TaskId,
    status: Option<TaskStatus>,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing(DEFAULT_FILTER);

    match real_main().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

async fn real_main() -> Result<bool> {
    let cli = Cli::parse();
    let mut config = EngineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Check { worklist } => {
            let worklist = Worklist::load(&worklist)?;
            check(&config, &worklist)?;
            Ok(true)
        }
        Command::Run {
            worklist,
            no_reveal,
        } => {
            if no_reveal {
                config.output.reveal = false;
            }
            let worklist = Arc::new(Worklist::load(&worklist)?);
            let summaries = run(Arc::new(config), worklist).await?;
            print_summary(&summaries);
            Ok(summaries
                .iter()
                .all(|summary| summary.status != Some(TaskStatus::Failed)))
        }
    }
}

fn check(config: &EngineConfig, worklist: &Worklist) -> Result<()> {
    for site in worklist.sites() {
        site_config(config, site)?;
    }

    for task in &worklist.tasks {
        let item_count = match task.site {
            Site::NaraG2b => task.to_new_task::<NaraG2bItem>()?.items.map(|items| items.len()),
            Site::Comsigan => task.to_new_task::<ComsiganItem>()?.items.map(|items| items.len()),
            Site::OpenGoKr => task.to_new_task::<OpenGoKrItem>()?.items.map(|items| items.len()),
        };
        let destination = task.base_dir.as_ref().map(|base_dir| {
            OutputLayout::resolve(base_dir, task.output_name.as_deref(), &config.output)
                .sheet_path
                .display()
                .to_string()
        });

        println!(
            "{:<12} {:<20} items={:<4} when={:<28} sheet={}",
            task.site,
            task.id,
            item_count.map_or("-".to_string(), |count| count.to_string()),
            task.scheduled_time.as_deref().unwrap_or("now"),
            destination.as_deref().unwrap_or("<no base_dir>"),
        );
    }
    Ok(())
}

async fn run(config: Arc<EngineConfig>, worklist: Arc<Worklist>) -> Result<Vec<TaskSummary>> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling all tasks");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut drivers: Vec<JoinHandle<Result<Vec<TaskSummary>>>> = Vec::new();
    for site in worklist.sites() {
        let site_config = site_config(&config, site)?.clone();
        let config = config.clone();
        let worklist = worklist.clone();
        let shutdown = shutdown_rx.clone();

        drivers.push(match site {
            Site::NaraG2b => tokio::spawn(drive_site::<NaraG2bItem>(
                site, site_config, config, worklist, shutdown,
            )),
            Site::Comsigan => tokio::spawn(drive_site::<ComsiganItem>(
                site, site_config, config, worklist, shutdown,
            )),
            Site::OpenGoKr => tokio::spawn(drive_site::<OpenGoKrItem>(
                site, site_config, config, worklist, shutdown,
            )),
        });
    }

    let mut summaries = Vec::new();
    for driver in drivers {
        summaries.extend(driver.await.context("site driver panicked")??);
    }
    Ok(summaries)
}

/// One engine per site. Tasks with a scheduled time are armed, the rest
/// start immediately; then waits until every task settles or shutdown.
async fn drive_site<I: TaskItem>(
    site: Site,
    site_config: SiteConfig,
    config: Arc<EngineConfig>,
    worklist: Arc<Worklist>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<Vec<TaskSummary>> {
    let observer = Arc::new(BroadcastObserver::<I>::new(64));
    let mut builder = TaskEngine::<I>::builder(Arc::new(ProcessSessionFactory::<I>::new(site_config)))
        .observer(observer.clone())
        .config((*config).clone());
    if !config.output.reveal {
        builder = builder.revealer(Arc::new(NoopRevealer));
    }
    let engine = builder.build();
    let printer = tokio::spawn(print_transitions(site, observer.subscribe()));

    let mut ids = Vec::new();
    let mut runs = Vec::new();
    for task in worklist.for_site(site) {
        let snapshot = engine.add_task(task.to_new_task::<I>()?)?;
        let id = snapshot.id;
        if snapshot.scheduled_time.is_some() {
            engine.schedule(&id)?;
        } else {
            let engine = engine.clone();
            let run_id = id.clone();
            runs.push(tokio::spawn(async move { engine.run(&run_id).await }));
        }
        ids.push(id);
    }

    let settle = async {
        for id in &ids {
            if let Err(error) = engine.wait_for_terminal(id, None).await {
                tracing::warn!(task_id = %id, error = %error, "stopped waiting for task");
            }
        }
    };
    tokio::select! {
        () = settle => {}
        Ok(()) = shutdown.changed() => {
            for id in &ids {
                engine.cancel_task(id).await;
            }
        }
    }

    for run in runs {
        match run.await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => tracing::warn!(site = %site, error = %error, "run rejected"),
            Err(error) => tracing::error!(site = %site, error = %error, "run panicked"),
        }
    }
    printer.abort();

    let statuses: HashMap<TaskId, TaskStatus> = engine
        .get_all_tasks()?
        .into_iter()
        .map(|task| (task.id, task.status))
        .collect();
    Ok(ids
        .into_iter()
        .map(|id| TaskSummary {
            site,
            status: statuses.get(&id).copied(),
            id,
        })
        .collect())
}

async fn print_transitions<I: TaskItem>(
    site: Site,
    mut updates: broadcast::Receiver<crawldesk_core::orchestration::SnapshotBatch<I>>,
) {
    let mut last_seen: HashMap<TaskId, TaskStatus> = HashMap::new();
    loop {
        match updates.recv().await {
            Ok(batch) => {
                for task in batch.iter() {
                    if last_seen.insert(task.id.clone(), task.status) != Some(task.status) {
                        println!("[{site}] {} -> {}", task.id, task.status);
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(site = %site, skipped, "snapshot stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn site_config(config: &EngineConfig, site: Site) -> Result<&SiteConfig> {
    config
        .site(site)
        .with_context(|| format!("no [sites.{site}] section in the configuration"))
}

fn print_summary(summaries: &[TaskSummary]) {
    println!();
    for summary in summaries {
        let status = summary
            .status
            .map_or("removed".to_string(), |status| status.to_string());
        println!("{:<12} {:<20} {status}", summary.site, summary.id);
    }
}
