//! Run a complete scripted session: bus, floor, memory and speakers

use crate::speaker::{Reasoner, Speaker, TurnBudget};
use anyhow::{bail, Result};
use console::style;
use parley_core::balance;
use parley_core::bus::{Event, EventBus, EventKind, Message, MessageKind};
use parley_core::config::Config;
use parley_core::floor::FloorArbitrator;
use parley_core::memory::{MemoryIngestor, MemorySnapshot, MemoryStats, MemoryStore, MemoryUsage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

pub struct SimulationOptions {
    pub speakers: Vec<String>,
    pub turns: usize,
    pub goal: String,
    /// Print the transcript while the session runs
    pub echo: bool,
}

/// Everything a finished session leaves behind
pub struct SimulationReport {
    pub session_id: String,
    pub goal: String,
    pub messages: Vec<Message>,
    pub stats: MemoryStats,
    pub usage: MemoryUsage,
    pub counts: BTreeMap<String, usize>,
    pub balanced: bool,
    pub looping: bool,
    pub dominant: Option<String>,
    pub snapshot: MemorySnapshot,
}

/// On-disk form written by `simulate --snapshot`
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionExport {
    pub session_id: String,
    pub goal: String,
    pub memory: MemorySnapshot,
    pub messages: Vec<Message>,
}

pub async fn run_simulation(
    config: &Config,
    options: SimulationOptions,
    reasoner: Arc<dyn Reasoner>,
) -> Result<SimulationReport> {
    let bus = EventBus::new(config.bus);
    let report = run_simulation_on(&bus, config, options, reasoner).await;
    bus.stop("simulation complete");
    report
}

/// Run a session on `bus`, dropping every subscription it made before returning
pub async fn run_simulation_on(
    bus: &EventBus,
    config: &Config,
    options: SimulationOptions,
    reasoner: Arc<dyn Reasoner>,
) -> Result<SimulationReport> {
    if options.speakers.is_empty() {
        bail!("at least one speaker is required");
    }

    bus.spawn_dispatcher();
    let floor = FloorArbitrator::new(bus.clone(), config.floor);
    floor.attach();
    let store = Arc::new(Mutex::new(MemoryStore::new(config.memory)));
    let ingestor = MemoryIngestor::attach(bus, store.clone());

    let mut subscriptions = Vec::new();
    if options.echo {
        let messages = bus.subscribe(EventKind::MessageAppended, "transcript", |event| {
            if let Event::MessageAppended { message, .. } = &event {
                print_message(message);
            }
            async { Ok(()) }
        });
        let summaries = bus.subscribe(EventKind::SummaryCreated, "transcript", |event| {
            if let Event::SummaryCreated { start, end, .. } = event {
                println!("{}", style(format!("  (summarized messages {}-{})", start, end)).dim());
            }
            async { Ok(()) }
        });
        subscriptions.extend([messages, summaries]);
    }

    let session_id = new_session_id();
    bus.start(session_id.clone(), options.goal.clone());
    bus.append_message(Message::system(format!("Session goal: {}", options.goal)));
    info!(
        session_id = %session_id,
        speakers = options.speakers.len(),
        turns = options.turns,
        "Simulation started"
    );

    let budget = Arc::new(TurnBudget::new(options.turns));
    let cooldown = Duration::from_millis(config.floor.cooldown_ms);
    let mut speakers = Vec::with_capacity(options.speakers.len());
    for (index, id) in options.speakers.iter().enumerate() {
        let speaker = Speaker::new(
            id.clone(),
            index,
            bus.clone(),
            store.clone(),
            reasoner.clone(),
            budget.clone(),
            cooldown,
        );
        subscriptions.extend(speaker.join());
        speakers.push(speaker);
    }

    budget.finished().await;
    ingestor.wait_for(bus.total_message_count()).await;

    let messages = bus.message_log();
    let report = {
        let store = store.lock().await;
        let counts = balance::speaker_counts(&messages);
        SimulationReport {
            session_id,
            goal: options.goal,
            balanced: balance::is_balanced(&config.balance, &counts),
            looping: balance::loop_detected(&config.balance, &messages),
            dominant: balance::dominant_speaker(&config.balance, &counts),
            counts,
            stats: store.stats(),
            usage: store.usage(),
            snapshot: store.snapshot(),
            messages,
        }
    };

    for subscription in subscriptions {
        subscription.unsubscribe();
    }
    ingestor.detach();
    floor.detach();
    floor.reset();
    info!(speakers = speakers.len(), "Simulation finished");
    Ok(report)
}

/// Write the memory snapshot and message log as one JSON document
pub async fn write_export(report: &SimulationReport, path: &Path) -> Result<()> {
    let export = SessionExport {
        session_id: report.session_id.clone(),
        goal: report.goal.clone(),
        memory: report.snapshot.clone(),
        messages: report.messages.clone(),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, serde_json::to_string_pretty(&export)?).await?;
    Ok(())
}

pub fn print_report(report: &SimulationReport) {
    let stats = &report.stats;
    println!();
    println!("{}", style("Memory").bold().cyan());
    println!("  Messages seen:     {}", stats.total_messages);
    println!("  Summaries:         {}", stats.summary_count);
    println!("  Decisions:         {}", stats.decision_count);
    println!(
        "  Proposals:         {} ({} active)",
        stats.proposal_count, stats.active_proposal_count
    );
    println!("  Speakers tracked:  {}", stats.speaker_count);
    println!("  Peak usage:        {:.0}%", report.usage.peak_ratio() * 100.0);

    println!();
    println!("{}", style("Participation").bold().cyan());
    for (speaker, count) in &report.counts {
        println!("  {}: {}", speaker, count);
    }
    let verdict = if report.balanced {
        style("balanced").green()
    } else {
        style("unbalanced").red()
    };
    println!("  Balance: {}", verdict);
    if let Some(dominant) = &report.dominant {
        println!("  Dominant speaker: {}", style(dominant).yellow());
    }
    if report.looping {
        println!("  {}", style("Two speakers are going back and forth").yellow());
    }
}

fn print_message(message: &Message) {
    let speaker = match message.kind {
        MessageKind::System => style(message.speaker_id.clone()).dim(),
        MessageKind::Decision => style(message.speaker_id.clone()).green().bold(),
        MessageKind::Proposal => style(message.speaker_id.clone()).cyan().bold(),
        MessageKind::Rebuttal => style(message.speaker_id.clone()).red().bold(),
        _ => style(message.speaker_id.clone()).bold(),
    };
    println!(
        "{} {}: {}",
        style(message.timestamp.format("%H:%M:%S")).dim(),
        speaker,
        message.content
    );
}

fn new_session_id() -> String {
    format!("sim-{}", chrono::Utc::now().format("%Y%m%d%H%M%S%3f"))
}
