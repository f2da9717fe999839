//! Performance benchmarks for scoring and the matchmaking cycle

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rendezvous::filter_level::{FilterLevel, FilterLevelPolicy};
use rendezvous::pairing::{
    find_best_match, PairingManager, PairingManagerConfig, Participant, PreferenceScorer,
};
use rendezvous::transport::{ChannelHandle, OutboundMessage};
use rendezvous::types::{ParticipantState, PoolKind, Profile, ProfileRequest};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

fn bench_request(i: usize) -> ProfileRequest {
    let genders = ["male", "female"];
    let affiliations = ["North", "South", "East", "West"];
    ProfileRequest {
        gender: Some(genders[i % 2].to_string()),
        affiliation: Some(affiliations[i % 4].to_string()),
        preferred_gender: Some(genders[(i + 1) % 2].to_string()),
        preferred_affiliation: Some(affiliations[(i / 2) % 4].to_string()),
        verified: false,
    }
}

/// Participant plus the receiver that keeps its handle connected
fn bench_participant(i: usize) -> (Participant, UnboundedReceiver<OutboundMessage>) {
    let id = format!("bench-{}", i);
    let (handle, receiver) = ChannelHandle::pair(id.as_str(), PoolKind::Text);
    let profile = Profile::try_from(bench_request(i)).unwrap();
    let mut participant = Participant::new(id, PoolKind::Text, profile, Arc::new(handle));
    participant.state = ParticipantState::Waiting;
    (participant, receiver)
}

fn bench_find_best_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_best_match");
    let excluded = HashSet::new();

    for size in [10usize, 100, 1000] {
        let (candidates, _receivers): (Vec<_>, Vec<_>) = (0..size).map(bench_participant).unzip();
        let (seeker, _seeker_receiver) = bench_participant(size + 1);

        for level in [FilterLevel::Strict, FilterLevel::AnyCounterpart] {
            group.bench_with_input(
                BenchmarkId::new(format!("level_{}", level), size),
                &candidates,
                |b, candidates| {
                    b.iter(|| {
                        black_box(find_best_match(
                            &PreferenceScorer,
                            &seeker,
                            candidates.iter(),
                            level,
                            &excluded,
                        ))
                    })
                },
            );
        }
    }

    group.finish();
}

fn bench_process_cycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("process_cycle");

    for size in [50usize, 200] {
        group.bench_function(BenchmarkId::from_parameter(size), |b| {
            b.iter(|| {
                rt.block_on(async {
                    let manager = PairingManager::new(PairingManagerConfig {
                        pool: PoolKind::Text,
                        policy: FilterLevelPolicy::default(),
                        cycle_interval: Duration::from_secs(1),
                        notification_retry_delay: Duration::from_millis(100),
                    });

                    let mut receivers = Vec::with_capacity(size);
                    for i in 0..size {
                        let id = format!("bench-{}", i);
                        let (handle, receiver) = ChannelHandle::pair(id.as_str(), PoolKind::Text);
                        receivers.push(receiver);
                        let _ = manager.join(id, Arc::new(handle), bench_request(i)).await;
                    }

                    black_box(manager.process_cycle().await)
                })
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_find_best_match, bench_process_cycle);
criterion_main!(benches);
