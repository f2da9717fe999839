//! Integration tests for the rendezvous pairing service
//!
//! These tests drive a pool through its public API the way a transport
//! would:
//! - Strict and relaxed pairings
//! - Session teardown and re-pairing
//! - Timeouts and stale connections
//! - Concurrent joins and cycles

mod fixtures;

use futures::future::join_all;
use rendezvous::filter_level::FilterLevel;
use rendezvous::pairing::PairingManager;
use rendezvous::transport::{Notification, PoolCommand};
use rendezvous::types::{OnlineCounts, ParticipantState, PoolKind, ProfileRequest};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use fixtures::{
    create_test_manager, female_wants_male_x, join, male_wants_female_x, open_profile,
    ProfileBuilder, RecordingHandle,
};

fn match_of(handle: &RecordingHandle) -> (String, FilterLevel, u32, bool) {
    match handle.last("pairingSuccess") {
        Some(Notification::PairingSuccess {
            counterpart,
            match_quality,
            ..
        }) => (
            counterpart.participant_id,
            match_quality.filter_level,
            match_quality.score,
            match_quality.preferences_met,
        ),
        other => panic!("expected pairingSuccess, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_mutual_strict_pairing() {
    let manager = create_test_manager(PoolKind::Text);

    let p1 = join(&manager, "P1", male_wants_female_x()).await;
    let p2 = join(&manager, "P2", female_wants_male_x()).await;

    manager.process_cycle().await.unwrap();

    assert_eq!(
        match_of(&p1),
        ("P2".to_string(), FilterLevel::Strict, 100, true)
    );
    assert_eq!(
        match_of(&p2),
        ("P1".to_string(), FilterLevel::Strict, 100, true)
    );
    assert_eq!(p1.count("pairingSuccess"), 1);

    let counts = manager.online_counts().unwrap();
    assert_eq!(
        counts,
        OnlineCounts {
            total: 2,
            in_queue: 0,
            chatting: 2
        }
    );

    println!("✅ Mutual strict pairing test passed");
}

#[tokio::test(start_paused = true)]
async fn test_relaxation_to_gender_only() {
    let manager = create_test_manager(PoolKind::Text);
    let p1 = join(&manager, "P1", male_wants_female_x()).await;

    // Nobody compatible yet: P1 keeps waiting through several cycles
    for _ in 0..15 {
        manager.process_cycle().await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
    }
    assert_eq!(p1.count("pairingSuccess"), 0);

    tokio::time::advance(Duration::from_secs(1)).await;
    let p3 = join(
        &manager,
        "P3",
        ProfileBuilder::new()
            .gender("female")
            .affiliation("Y")
            .wants("any", "any")
            .build(),
    )
    .await;
    manager.process_cycle().await.unwrap();

    let (counterpart, level, score, preferences_met) = match_of(&p1);
    assert_eq!(counterpart, "P3");
    assert_eq!(level, FilterLevel::GenderOnly);
    assert_eq!(score, 100);
    assert!(!preferences_met);
    assert_eq!(match_of(&p3).0, "P1");
    assert_eq!(p1.count("filterLevelChanged"), 1);

    println!("✅ Relaxation to gender-only test passed");
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_paired() {
    let manager = create_test_manager(PoolKind::Video);
    let _p1 = join(&manager, "P1", male_wants_female_x()).await;
    let p2 = join(&manager, "P2", female_wants_male_x()).await;
    manager.process_cycle().await.unwrap();
    p2.take();

    manager
        .dispatch(PoolCommand::Disconnect {
            identity: "P1".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(
        p2.received(),
        vec![Notification::PairDisconnected {
            reason: "Counterpart disconnected".to_string()
        }]
    );
    let p2_record = manager.participant("P2").unwrap().unwrap();
    assert_eq!(p2_record.state, ParticipantState::Disconnected);
    assert_eq!(manager.waiting_count().unwrap(), 0);
    assert!(manager.participant("P1").unwrap().is_none());

    // Nothing happens until P2 asks again
    manager.process_cycle().await.unwrap();
    assert_eq!(manager.waiting_count().unwrap(), 0);

    manager
        .dispatch(PoolCommand::RequestNewPairing {
            identity: "P2".to_string(),
            profile: ProfileRequest::default(),
        })
        .await
        .unwrap();
    assert_eq!(
        manager.participant("P2").unwrap().unwrap().state,
        ParticipantState::Waiting
    );
    assert_eq!(manager.queue_position("P2").unwrap(), Some(1));

    println!("✅ Disconnect while paired test passed");
}

#[tokio::test(start_paused = true)]
async fn test_full_escalation_until_timeout() {
    let manager = create_test_manager(PoolKind::Text);
    let p1 = join(&manager, "P1", male_wants_female_x()).await;

    for seconds in [15, 30, 45] {
        tokio::time::advance(Duration::from_secs(15)).await;
        manager.process_cycle().await.unwrap();
        assert!(manager.participant("P1").unwrap().is_some(), "evicted at {}s", seconds);
    }
    assert_eq!(p1.count("filterLevelChanged"), 3);
    assert!(p1.count("noCounterpartAvailable") >= 1);

    tokio::time::advance(Duration::from_secs(15 * 60 - 45)).await;
    manager.process_cycle().await.unwrap();

    assert_eq!(p1.count("queueTimeout"), 1);
    assert!(manager.participant("P1").unwrap().is_none());
    assert_eq!(manager.stats().unwrap().timeouts, 1);

    println!("✅ Full escalation until timeout test passed");
}

#[tokio::test(start_paused = true)]
async fn test_stale_handle_never_paired() {
    let manager = create_test_manager(PoolKind::Audio);
    let p1 = join(&manager, "P1", open_profile("male")).await;
    let p2 = join(&manager, "P2", open_profile("female")).await;
    let p3 = join(&manager, "P3", open_profile("female")).await;

    p2.close();
    manager.process_cycle().await.unwrap();

    assert_eq!(match_of(&p1).0, "P3");
    assert_eq!(p2.count("pairingSuccess"), 0);
    assert!(manager.participant("P2").unwrap().is_none());
    assert_eq!(manager.stats().unwrap().stale_connections, 1);

    for handle in [&p1, &p3] {
        match handle.last("pairingSuccess") {
            Some(Notification::PairingSuccess {
                audio_token: Some(token),
                ..
            }) => assert_eq!(token.len(), 48),
            other => panic!("expected audio token, got {:?}", other),
        }
    }

    println!("✅ Stale handle test passed");
}

#[tokio::test(start_paused = true)]
async fn test_priority_favours_longest_wait() {
    let manager = create_test_manager(PoolKind::Text);
    let seeker = || {
        ProfileBuilder::new()
            .gender("male")
            .affiliation("X")
            .wants("female", "any")
            .build()
    };
    let early = join(&manager, "early", seeker()).await;
    tokio::time::advance(Duration::from_secs(2)).await;
    let late = join(&manager, "late", seeker()).await;
    tokio::time::advance(Duration::from_secs(2)).await;
    let _target = join(&manager, "target", open_profile("female")).await;

    assert_eq!(manager.queue_position("early").unwrap(), Some(1));
    assert_eq!(manager.queue_position("target").unwrap(), Some(3));

    manager.process_cycle().await.unwrap();

    assert_eq!(match_of(&early).0, "target");
    assert_eq!(late.count("pairingSuccess"), 0);
    assert_eq!(manager.queue_position("late").unwrap(), Some(1));

    println!("✅ Priority favours longest wait test passed");
}

#[tokio::test(start_paused = true)]
async fn test_update_preferences_through_dispatch() {
    let manager = create_test_manager(PoolKind::Text);
    let p1 = join(&manager, "P1", male_wants_female_x()).await;
    let p2 = join(
        &manager,
        "P2",
        ProfileBuilder::new()
            .gender("female")
            .affiliation("Y")
            .wants("male", "any")
            .build(),
    )
    .await;

    manager.process_cycle().await.unwrap();
    assert_eq!(p1.count("pairingSuccess"), 0);

    manager
        .dispatch(PoolCommand::UpdatePreferences {
            identity: "P1".to_string(),
            preferred_gender: Some("female".to_string()),
            preferred_affiliation: Some("any".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(p1.count("filtersUpdated"), 1);

    manager.process_cycle().await.unwrap();
    assert_eq!(match_of(&p1), ("P2".to_string(), FilterLevel::Strict, 100, true));
    assert_eq!(match_of(&p2).0, "P1");

    println!("✅ Update preferences test passed");
}

#[tokio::test(start_paused = true)]
async fn test_rejections_leave_state_untouched() {
    let manager = create_test_manager(PoolKind::Text);
    let p1 = join(&manager, "P1", open_profile("male")).await;

    let result = manager
        .dispatch(PoolCommand::UpdatePreferences {
            identity: "P1".to_string(),
            preferred_gender: Some("robot".to_string()),
            preferred_affiliation: None,
        })
        .await;
    assert!(result.is_err());
    assert_eq!(p1.count("requestRejected"), 1);

    let ghost = manager
        .dispatch(PoolCommand::LeaveQueue {
            identity: "ghost".to_string(),
        })
        .await;
    assert!(ghost.is_err());

    let record = manager.participant("P1").unwrap().unwrap();
    assert!(record.is_waiting());
    assert_eq!(manager.waiting_count().unwrap(), 1);

    println!("✅ Rejections leave state untouched test passed");
}

#[tokio::test]
async fn test_concurrent_joins_pair_everyone_once() {
    let manager = create_test_manager(PoolKind::Text);
    let participant_count = 40;

    let joins = (0..participant_count).map(|i| {
        let manager = manager.clone();
        async move {
            let gender = if i % 2 == 0 { "male" } else { "female" };
            let handle = RecordingHandle::new();
            manager
                .join(format!("user-{}", i), handle.clone(), open_profile(gender))
                .await
                .unwrap();
            handle
        }
    });
    let handles: Vec<Arc<RecordingHandle>> = join_all(joins).await;
    assert_eq!(manager.waiting_count().unwrap(), participant_count);

    // Several cycles racing each other; re-entrant calls are skipped
    let cycles = (0..4).map(|_| {
        let manager: PairingManager = manager.clone();
        tokio::spawn(async move { manager.process_cycle().await })
    });
    for result in join_all(cycles).await {
        result.unwrap().unwrap();
    }
    while manager.waiting_count().unwrap() > 0 {
        manager.process_cycle().await.unwrap();
    }

    let mut seen = HashSet::new();
    for (i, handle) in handles.iter().enumerate() {
        assert_eq!(handle.count("pairingSuccess"), 1, "user-{}", i);
        let (counterpart, ..) = match_of(handle);
        assert_ne!(counterpart, format!("user-{}", i));
        seen.insert(counterpart);
    }
    assert_eq!(seen.len(), participant_count);
    assert_eq!(manager.locked_count(), 0);
    assert_eq!(
        manager.stats().unwrap().successful_pairings,
        participant_count as u64 / 2
    );

    println!("✅ Concurrent joins test passed");
}

#[tokio::test(start_paused = true)]
async fn test_any_self_reported_gender_can_pair() {
    let manager = create_test_manager(PoolKind::Text);
    let nb = join(&manager, "NB", open_profile("nonbinary")).await;
    let picky = join(&manager, "picky", female_wants_male_x()).await;

    manager.process_cycle().await.unwrap();
    assert_eq!(nb.count("pairingSuccess"), 0);

    let open = join(&manager, "open", open_profile("female")).await;
    manager.process_cycle().await.unwrap();

    assert_eq!(match_of(&nb), ("open".to_string(), FilterLevel::Strict, 100, true));
    assert_eq!(match_of(&open).0, "NB");
    assert_eq!(picky.count("pairingSuccess"), 0);

    println!("✅ Any self-reported gender test passed");
}
