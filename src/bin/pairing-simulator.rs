//! Pairing Simulator CLI Tool
//!
//! Drives an in-process pairing pool with scripted participants, using short
//! filter-level thresholds so relaxation can be watched in seconds.
//!
//! Usage:
//!   cargo run --bin pairing-simulator -- --help
//!   cargo run --bin pairing-simulator scenario --name relaxation
//!   cargo run --bin pairing-simulator crowd --participants 40 --duration 15 --pool audio

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use rendezvous::filter_level::FilterLevelPolicy;
use rendezvous::pairing::{PairingManager, PairingManagerConfig};
use rendezvous::transport::{ChannelHandle, Notification, OutboundMessage};
use rendezvous::types::{PoolKind, ProfileRequest};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Parser)]
#[command(name = "pairing-simulator")]
#[command(about = "Drive a rendezvous pairing pool with scripted participants")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Cycle interval in milliseconds
    #[arg(long, default_value = "250")]
    cycle_interval_ms: u64,

    /// Print every notification, not just the important ones
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a named scenario
    Scenario {
        /// strict-pair, relaxation, disconnect or timeout
        #[arg(short, long)]
        name: String,
        #[arg(short, long, default_value = "text")]
        pool: String,
    },
    /// Join a crowd of generated participants and report the outcome
    Crowd {
        #[arg(short = 'n', long, default_value = "20")]
        participants: usize,
        /// Seconds to run the pool for
        #[arg(short, long, default_value = "12")]
        duration: u64,
        #[arg(short, long, default_value = "text")]
        pool: String,
    },
    /// List available scenarios
    List,
}

fn profile(gender: &str, affiliation: &str, wants: &str, wants_aff: &str) -> ProfileRequest {
    ProfileRequest {
        gender: Some(gender.to_string()),
        affiliation: Some(affiliation.to_string()),
        preferred_gender: Some(wants.to_string()),
        preferred_affiliation: Some(wants_aff.to_string()),
        verified: false,
    }
}

/// Generated profile for crowd member `i`
fn crowd_profile(i: usize) -> ProfileRequest {
    let genders = ["male", "female"];
    let affiliations = ["North", "South", "East"];
    let wanted_genders = ["female", "male", "any"];

    profile(
        genders[i % 2],
        affiliations[i % 3],
        wanted_genders[(i / 2) % 3],
        if i % 4 == 0 { affiliations[(i + 1) % 3] } else { "any" },
    )
}

struct Simulation {
    manager: PairingManager,
    sender: mpsc::UnboundedSender<OutboundMessage>,
    handles: HashMap<String, Arc<ChannelHandle>>,
    printer: JoinHandle<HashMap<&'static str, usize>>,
}

impl Simulation {
    fn new(pool: PoolKind, cycle_interval: Duration, verbose: bool) -> Self {
        let config = PairingManagerConfig {
            pool,
            policy: FilterLevelPolicy::accelerated(),
            cycle_interval,
            ..PairingManagerConfig::default()
        };
        let manager = PairingManager::new(config);
        let (sender, mut receiver) = mpsc::unbounded_channel::<OutboundMessage>();

        let printer = tokio::spawn(async move {
            let mut counts: HashMap<&'static str, usize> = HashMap::new();
            while let Some(message) = receiver.recv().await {
                let kind = message.notification.kind();
                *counts.entry(kind).or_insert(0) += 1;
                let important = !matches!(
                    message.notification,
                    Notification::QueueStatus { .. } | Notification::PairingAttempt { .. }
                );
                if verbose || important {
                    println!("  📨 {:<6} {:<20} {}", message.participant_id, kind, describe(&message.notification));
                }
            }
            counts
        });

        Self {
            manager,
            sender,
            handles: HashMap::new(),
            printer,
        }
    }

    async fn join(&mut self, id: &str, request: ProfileRequest) -> Result<()> {
        let handle = Arc::new(ChannelHandle::new(id, self.manager.pool(), self.sender.clone()));
        self.handles.insert(id.to_string(), handle.clone());
        let position = self.manager.join(id.to_string(), handle, request).await?;
        println!("➕ {} joined at position {}", id, position);
        Ok(())
    }

    async fn disconnect(&mut self, id: &str) -> Result<()> {
        self.manager.disconnect(id).await?;
        if let Some(handle) = self.handles.remove(id) {
            handle.close();
        }
        println!("➖ {} disconnected", id);
        Ok(())
    }

    async fn finish(self) -> Result<()> {
        self.manager.shutdown()?;
        let snapshot = self.manager.snapshot()?;

        drop(self.handles);
        drop(self.sender);
        drop(self.manager);
        // Pending retries may still hold a sender briefly
        let counts = match tokio::time::timeout(Duration::from_secs(2), self.printer).await {
            Ok(counts) => counts?,
            Err(_) => HashMap::new(),
        };

        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        println!("📊 {} pool summary", snapshot.pool);
        println!("   Sessions active:    {}", snapshot.active_sessions);
        println!("   Pairings:           {}", snapshot.stats.successful_pairings);
        println!("   By level:           {:?}", snapshot.stats.pairings_by_level);
        println!("   Attempts:           {}", snapshot.stats.total_attempts);
        println!("   Lost races:         {}", snapshot.stats.lost_races);
        println!("   Timeouts:           {}", snapshot.stats.timeouts);
        println!("   Cycles:             {}", snapshot.stats.cycles_completed);
        let mut kinds: Vec<_> = counts.into_iter().collect();
        kinds.sort();
        for (kind, count) in kinds {
            println!("   {:<20}{}", kind, count);
        }
        Ok(())
    }
}

fn describe(notification: &Notification) -> String {
    match notification {
        Notification::QueueJoined { position, queue_size } => {
            format!("position {}/{}", position, queue_size)
        }
        Notification::FilterLevelChanged {
            old_level,
            new_level,
            description,
        } => format!("{} -> {} ({})", old_level, new_level, description),
        Notification::PairingSuccess {
            counterpart,
            match_quality,
            wait_seconds,
            audio_token,
            ..
        } => format!(
            "with {} at level {} (score {}) after {}s{}",
            counterpart.participant_id,
            match_quality.filter_level,
            match_quality.score,
            wait_seconds,
            if audio_token.is_some() { ", audio token issued" } else { "" }
        ),
        Notification::QueueTimeout { wait_seconds, .. } => format!("after {}s", wait_seconds),
        Notification::PairDisconnected { reason } | Notification::RequestRejected { reason } => {
            reason.clone()
        }
        other => format!("{:?}", other),
    }
}

async fn run_scenario(sim: &mut Simulation, name: &str) -> Result<()> {
    match name {
        "strict-pair" => {
            sim.join("p1", profile("male", "X", "female", "X")).await?;
            sim.join("p2", profile("female", "X", "male", "X")).await?;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        "relaxation" => {
            sim.join("p1", profile("male", "X", "female", "X")).await?;
            tokio::time::sleep(Duration::from_secs(4)).await;
            sim.join("p3", profile("female", "Y", "any", "any")).await?;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        "disconnect" => {
            sim.join("p1", profile("male", "X", "any", "any")).await?;
            sim.join("p2", profile("female", "X", "any", "any")).await?;
            tokio::time::sleep(Duration::from_secs(1)).await;
            sim.disconnect("p1").await?;
            sim.manager
                .request_new_pairing("p2", ProfileRequest::default())
                .await?;
            println!("🔁 p2 requested a new pairing");
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        "timeout" => {
            sim.join("p1", profile("male", "X", "female", "X")).await?;
            sim.join("p2", profile("male", "Y", "male", "Y")).await?;
            sim.manager.leave_queue("p2").await?;
            println!("🚪 p2 left the queue");
            tokio::time::sleep(Duration::from_secs(61)).await;
        }
        other => return Err(anyhow!("Unknown scenario: {}", other)),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cycle_interval = Duration::from_millis(cli.cycle_interval_ms);

    match cli.command {
        Commands::List => {
            println!("Available scenarios:");
            println!("  strict-pair  two mutually compatible participants pair at level 1");
            println!("  relaxation   a second participant arrives after level 1 has expired");
            println!("  disconnect   a paired participant drops and the other re-queues");
            println!("  timeout      a lone participant waits out the maximum queue time");
        }
        Commands::Scenario { name, pool } => {
            let pool: PoolKind = pool.parse()?;
            println!("🎬 Running scenario '{}' in {} pool", name, pool);
            let mut sim = Simulation::new(pool, cycle_interval, cli.verbose);
            sim.manager.start()?;
            run_scenario(&mut sim, &name).await?;
            sim.finish().await?;
        }
        Commands::Crowd {
            participants,
            duration,
            pool,
        } => {
            let pool: PoolKind = pool.parse()?;
            println!(
                "👥 Crowd of {} participants in {} pool for {}s",
                participants, pool, duration
            );
            let mut sim = Simulation::new(pool, cycle_interval, cli.verbose);
            sim.manager.start()?;
            for i in 0..participants {
                sim.join(&format!("user-{:03}", i), crowd_profile(i)).await?;
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            tokio::time::sleep(Duration::from_secs(duration)).await;
            sim.finish().await?;
        }
    }

    Ok(())
}
