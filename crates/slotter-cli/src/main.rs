use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use slotter_core::domain::{CalendarId, InboundEvent, LocalRange, TaskId, TaskStatus};
use slotter_core::impls::{InMemoryCalendar, InMemoryTaskStore, MemoryFeedbackSink, StaticClassifier};
use slotter_core::observability::OutcomeCounts;
use slotter_core::ports::{Classification, FixedClock};
use slotter_core::{EngineBuilder, EventDispatcher, SchedulerConfig};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(
    name = "slotter",
    about = "Place tasks onto free calendar time, one locked decision per task",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every event of a fixture through the engine with in-memory adapters
    Run {
        /// Scheduler configuration (TOML)
        #[arg(long)]
        config: PathBuf,

        /// Calendars, task statuses, classifier rules and events (JSON)
        #[arg(long)]
        fixture: PathBuf,

        /// Pin the clock (RFC 3339), e.g. 2025-03-10T08:00:00Z
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },

    /// Validate a configuration file
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

/// Input for `slotter run`.
#[derive(Debug, Default, Deserialize)]
struct Fixture {
    #[serde(default)]
    calendars: Vec<FixtureCalendar>,
    #[serde(default)]
    tasks: Vec<FixtureTask>,
    #[serde(default)]
    classifier: Vec<ClassifierRule>,
    #[serde(default)]
    events: Vec<InboundEvent>,
}

#[derive(Debug, Deserialize)]
struct FixtureCalendar {
    id: CalendarId,
    /// Wall-clock times in the calendar's own timezone.
    #[serde(default)]
    busy: Vec<LocalRange>,
}

#[derive(Debug, Deserialize)]
struct FixtureTask {
    task_id: TaskId,
    status: TaskStatus,
}

#[derive(Debug, Deserialize)]
struct ClassifierRule {
    keyword: String,
    #[serde(flatten)]
    classification: Classification,
}

#[derive(Debug, Serialize)]
struct Summary {
    reports: usize,
    events_created: usize,
    outcomes: OutcomeCounts,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // logs go to stderr; stdout carries the JSON reports
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Run {
            config,
            fixture,
            now,
        } => run(&config, &fixture, now).await,
        Commands::CheckConfig { config } => check_config(&config),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(config_path: &Path, fixture_path: &Path, now: Option<DateTime<Utc>>) -> anyhow::Result<()> {
    let config = SchedulerConfig::load(config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;
    let text = std::fs::read_to_string(fixture_path)
        .with_context(|| format!("reading fixture {}", fixture_path.display()))?;
    let fixture: Fixture = serde_json::from_str(&text)
        .with_context(|| format!("parsing fixture {}", fixture_path.display()))?;
    let max_concurrent = config.engine.max_concurrent_attempts;

    let calendar = Arc::new(InMemoryCalendar::new());
    for cal in &fixture.calendars {
        calendar.add_calendar(cal.id.clone()).await;
        for busy in &cal.busy {
            calendar.add_busy(cal.id.clone(), *busy).await;
        }
    }
    let tasks = Arc::new(InMemoryTaskStore::new());
    for task in fixture.tasks {
        tasks.insert(task.task_id, task.status).await;
    }
    let classifier = fixture
        .classifier
        .into_iter()
        .fold(StaticClassifier::new(), |c, rule| {
            c.with_rule(rule.keyword, rule.classification)
        });
    let feedback = Arc::new(MemoryFeedbackSink::new());

    let mut builder = EngineBuilder::new(config)
        .calendar(calendar.clone())
        .task_store(tasks)
        .feedback(feedback.clone())
        .classifier(Arc::new(classifier));
    if let Some(now) = now {
        builder = builder.clock(Arc::new(FixedClock::new(now)));
    }
    let engine = Arc::new(builder.build().context("building engine")?);

    let (reports_tx, mut reports_rx) = mpsc::unbounded_channel();
    let dispatcher = EventDispatcher::spawn(engine, max_concurrent, reports_tx);

    let printer = tokio::spawn(async move {
        let mut printed = 0usize;
        while let Some(report) = reports_rx.recv().await {
            match serde_json::to_string(&report) {
                Ok(line) => println!("{line}"),
                Err(err) => tracing::error!(task_id = %report.task_id, error = %err, "report not serializable"),
            }
            printed += 1;
        }
        printed
    });

    for event in fixture.events {
        dispatcher
            .submit(event)
            .await
            .context("submitting event")?;
    }
    dispatcher.finish().await;
    let reports = printer.await.context("report printer")?;

    let summary = Summary {
        reports,
        events_created: calendar.events().await.len(),
        outcomes: feedback.counts().await,
    };
    println!("{}", serde_json::to_string(&serde_json::json!({ "summary": summary }))?);
    Ok(())
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = SchedulerConfig::load(path)
        .with_context(|| format!("loading config {}", path.display()))?;
    println!(
        "config ok: {} scope(s), reference timezone {}, lease {}s",
        config.scopes.len(),
        config.engine.reference_timezone,
        config.lock.lease_secs
    );
    Ok(())
}
