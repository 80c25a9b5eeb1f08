// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use harvestrs::config::settings::ChallengeSettings;
use harvestrs::domain::models::outcome::StopReason;
use harvestrs::engines::traits::{EngineError, PageSnapshot};
use harvestrs::utils::errors::CollectionError;
use tokio::time::Instant;

use super::helpers::{
    always_listing, harness, harness_with_factory, listing_page, names, test_settings,
    FakeFactory, FakeSite, ScriptedMonitor, CHALLENGE_PAGE,
};

#[tokio::test]
async fn test_two_sources_three_keywords_collects_six_records() {
    let settings = test_settings(&[("alpha", 0), ("beta", 0)], 3, 0);
    let site = FakeSite::new(always_listing(), Duration::ZERO);
    let h = harness(settings, site, ScriptedMonitor::within_limits());

    let summary = h
        .orchestrator
        .run_collection(
            &names(&["alpha", "beta"]),
            &names(&["mouse", "keyboard", "monitor"]),
            1,
            100,
        )
        .await
        .unwrap();

    assert_eq!(summary.total_records, 6);
    assert_eq!(summary.tasks_completed, 6);
    assert_eq!(summary.tasks_failed, 0);
    assert_eq!(summary.tasks_abandoned, 0);
    assert_eq!(summary.total_attempts, 6);
    assert_eq!(summary.batches_processed, 1);
    assert_eq!(summary.stop_reason, StopReason::BatchesExhausted);
    assert!(!summary.target_achieved);
    assert!((summary.success_rate - 1.0).abs() < f64::EPSILON);
    assert_eq!(h.repository.records().len(), 6);
}

#[tokio::test]
async fn test_failing_task_is_attempted_max_retries_plus_one_times() {
    let settings = test_settings(&[("alpha", 0)], 2, 3);
    let site = FakeSite::new(Arc::new(|_, _| Err(EngineError::Timeout)), Duration::ZERO);
    let h = harness(settings, site, ScriptedMonitor::within_limits());

    let summary = h
        .orchestrator
        .run_collection(&names(&["alpha"]), &names(&["mouse"]), 1, 10)
        .await
        .unwrap();

    assert_eq!(summary.total_attempts, 4);
    assert_eq!(summary.tasks_failed, 4);
    assert_eq!(summary.tasks_abandoned, 1);
    assert_eq!(summary.tasks_completed, 0);
    assert_eq!(
        summary.tasks_completed + summary.tasks_failed,
        summary.total_attempts
    );
    assert_eq!(h.site.fetches_of("q=mouse"), 4);
    assert_eq!(summary.total_records, 0);
}

#[tokio::test]
async fn test_not_found_is_never_retried() {
    let settings = test_settings(&[("alpha", 0)], 1, 3);
    let site = FakeSite::new(
        Arc::new(|url, _| {
            Ok(PageSnapshot::from_html(
                url,
                404,
                "<html><head><title>Not Found</title></head><body>Gone</body></html>",
            ))
        }),
        Duration::ZERO,
    );
    let h = harness(settings, site, ScriptedMonitor::within_limits());

    let summary = h
        .orchestrator
        .run_collection(&names(&["alpha"]), &names(&["mouse"]), 1, 10)
        .await
        .unwrap();

    assert_eq!(summary.total_attempts, 1);
    assert_eq!(summary.tasks_failed, 1);
    assert_eq!(summary.tasks_abandoned, 1);
}

#[tokio::test(start_paused = true)]
async fn test_requests_to_one_domain_are_spaced_by_min_delay() {
    let settings = test_settings(&[("alpha", 2000)], 3, 0);
    let site = FakeSite::new(always_listing(), Duration::from_millis(100));
    let h = harness(settings, site, ScriptedMonitor::within_limits());

    let summary = h
        .orchestrator
        .run_collection(
            &names(&["alpha"]),
            &names(&["k1", "k2", "k3", "k4", "k5"]),
            1,
            100,
        )
        .await
        .unwrap();
    assert_eq!(summary.tasks_completed, 5);

    let mut completions: Vec<_> = h
        .site
        .events()
        .into_iter()
        .filter(|e| e.domain == "alpha.test")
        .map(|e| e.completed_at)
        .collect();
    completions.sort();
    assert_eq!(completions.len(), 5);
    for pair in completions.windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        assert!(
            gap >= Duration::from_millis(1950),
            "requests completed {:?} apart",
            gap
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_each_worker_owns_one_resource() {
    let settings = test_settings(&[("alpha", 0), ("beta", 0)], 4, 0);
    let site = FakeSite::new(always_listing(), Duration::from_millis(50));
    let h = harness(settings, site, ScriptedMonitor::within_limits());

    let summary = h
        .orchestrator
        .run_collection(
            &names(&["alpha", "beta"]),
            &names(&["mouse", "keyboard", "monitor", "webcam"]),
            2,
            1000,
        )
        .await
        .unwrap();

    assert_eq!(summary.tasks_completed, 16);
    assert_eq!(summary.batches_processed, 2);

    let created = h.factory.created();
    assert_eq!(created.len(), 4);
    let distinct: HashSet<_> = created.iter().copied().collect();
    assert_eq!(distinct.len(), 4);
    assert_eq!(h.site.violations(), 0);
    assert!(h
        .site
        .events()
        .iter()
        .all(|e| distinct.contains(&e.resource_id)));
    assert_eq!(h.factory.closed(), 4);
}

#[tokio::test]
async fn test_failed_resource_creation_only_loses_that_worker() {
    let settings = test_settings(&[("alpha", 0), ("beta", 0)], 3, 0);
    let site = FakeSite::new(always_listing(), Duration::ZERO);
    let factory = FakeFactory::failing(site.clone(), &[1]);
    let h = harness_with_factory(settings, site, factory, ScriptedMonitor::within_limits());

    let summary = h
        .orchestrator
        .run_collection(
            &names(&["alpha", "beta"]),
            &names(&["mouse", "keyboard", "monitor"]),
            1,
            100,
        )
        .await
        .unwrap();

    assert_eq!(summary.tasks_completed, 6);
    assert_eq!(h.factory.created().len(), 2);
    assert_eq!(h.factory.closed(), 2);
}

#[tokio::test]
async fn test_no_workers_is_a_run_failure() {
    let settings = test_settings(&[("alpha", 0)], 2, 0);
    let site = FakeSite::new(always_listing(), Duration::ZERO);
    let factory = FakeFactory::failing(site.clone(), &[0, 1]);
    let h = harness_with_factory(settings, site, factory, ScriptedMonitor::within_limits());

    let result = h
        .orchestrator
        .run_collection(&names(&["alpha"]), &names(&["mouse"]), 1, 10)
        .await;
    assert!(matches!(result, Err(CollectionError::NoWorkers)));
}

#[tokio::test]
async fn test_unknown_sources_cannot_generate_tasks() {
    let settings = test_settings(&[("alpha", 0)], 1, 0);
    let site = FakeSite::new(always_listing(), Duration::ZERO);
    let h = harness(settings, site, ScriptedMonitor::within_limits());

    let result = h
        .orchestrator
        .run_collection(&names(&["nowhere"]), &names(&["mouse"]), 1, 10)
        .await;
    assert!(matches!(result, Err(CollectionError::NoTasks(_))));
    assert!(h.factory.created().is_empty());
}

#[tokio::test]
async fn test_reaching_target_stops_before_next_batch() {
    let mut settings = test_settings(&[("alpha", 0)], 2, 0);
    settings.collection.batch_size = 2;
    let site = FakeSite::new(always_listing(), Duration::ZERO);
    let h = harness(settings, site, ScriptedMonitor::within_limits());

    let summary = h
        .orchestrator
        .run_collection(
            &names(&["alpha"]),
            &names(&["k1", "k2", "k3", "k4", "k5", "k6"]),
            1,
            3,
        )
        .await
        .unwrap();

    assert_eq!(summary.stop_reason, StopReason::TargetReached);
    assert!(summary.target_achieved);
    assert_eq!(summary.batches_processed, 2);
    assert_eq!(summary.tasks_completed, 4);
    assert_eq!(summary.total_records, 4);
}

#[tokio::test(start_paused = true)]
async fn test_stop_handle_cancels_a_running_collection() {
    let settings = test_settings(&[("alpha", 0), ("beta", 0)], 2, 0);
    let site = FakeSite::new(always_listing(), Duration::from_secs(10));
    let h = harness(settings, site, ScriptedMonitor::within_limits());

    let stop = h.orchestrator.stop_handle();
    let orchestrator = h.orchestrator.clone();
    let run = tokio::spawn(async move {
        orchestrator
            .run_collection(
                &names(&["alpha", "beta"]),
                &names(&["mouse", "keyboard", "monitor"]),
                1,
                100,
            )
            .await
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    stop.stop();
    let summary = run.await.unwrap().unwrap();

    assert_eq!(summary.stop_reason, StopReason::Cancelled);
    assert!(summary.tasks_completed >= 1);
    assert!(summary.tasks_completed < 6);
    assert_eq!(
        summary.tasks_completed + summary.tasks_failed,
        summary.total_attempts
    );
    assert_eq!(h.factory.closed(), h.factory.created().len());
}

#[tokio::test]
async fn test_stopped_before_start_processes_nothing() {
    let settings = test_settings(&[("alpha", 0)], 2, 0);
    let site = FakeSite::new(always_listing(), Duration::ZERO);
    let h = harness(settings, site, ScriptedMonitor::within_limits());

    h.orchestrator.stop_handle().stop();
    let summary = h
        .orchestrator
        .run_collection(&names(&["alpha"]), &names(&["mouse"]), 1, 10)
        .await
        .unwrap();

    assert_eq!(summary.stop_reason, StopReason::Cancelled);
    assert_eq!(summary.batches_processed, 0);
    assert_eq!(summary.total_attempts, 0);
    assert_eq!(h.factory.closed(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_resource_pressure_delays_next_batch() {
    let settings = test_settings(&[("alpha", 0)], 2, 0);
    let site = FakeSite::new(always_listing(), Duration::ZERO);
    let h = harness(settings, site, ScriptedMonitor::over_limit_for(3));

    let summary = h
        .orchestrator
        .run_collection(&names(&["alpha"]), &names(&["mouse", "keyboard"]), 1, 100)
        .await
        .unwrap();

    assert_eq!(summary.tasks_completed, 2);
    assert_eq!(h.monitor.samples(), 4);
    assert!(summary.elapsed >= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_persistent_pressure_gives_up_waiting() {
    let settings = test_settings(&[("alpha", 0)], 2, 0);
    let site = FakeSite::new(always_listing(), Duration::ZERO);
    let h = harness(settings, site, ScriptedMonitor::always_over());

    let summary = h
        .orchestrator
        .run_collection(&names(&["alpha"]), &names(&["mouse"]), 1, 100)
        .await
        .unwrap();

    assert_eq!(summary.tasks_completed, 1);
    assert!(summary.elapsed >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_challenge_resolved_by_handler_yields_records() {
    let settings = test_settings(&[("alpha", 0)], 1, 0);
    let site = FakeSite::new(
        Arc::new(|url, reloads| {
            let html = if reloads == 0 {
                CHALLENGE_PAGE.to_string()
            } else {
                listing_page(2)
            };
            Ok(PageSnapshot::from_html(url, 200, html))
        }),
        Duration::ZERO,
    );
    let h = harness(settings, site, ScriptedMonitor::within_limits());

    let summary = h
        .orchestrator
        .run_collection(&names(&["alpha"]), &names(&["mouse"]), 1, 100)
        .await
        .unwrap();

    assert_eq!(summary.challenges_detected, 1);
    assert_eq!(summary.challenges_resolved, 1);
    assert_eq!(summary.tasks_completed, 1);
    assert_eq!(summary.total_records, 2);
}

#[tokio::test]
async fn test_persistent_challenge_is_retried_then_abandoned() {
    let settings = test_settings(&[("alpha", 0)], 1, 1);
    let site = FakeSite::new(
        Arc::new(|url, _| Ok(PageSnapshot::from_html(url, 200, CHALLENGE_PAGE))),
        Duration::ZERO,
    );
    let h = harness(settings, site, ScriptedMonitor::within_limits());

    let summary = h
        .orchestrator
        .run_collection(&names(&["alpha"]), &names(&["mouse"]), 1, 100)
        .await
        .unwrap();

    assert_eq!(summary.total_attempts, 2);
    assert_eq!(summary.challenges_detected, 2);
    assert_eq!(summary.challenges_resolved, 0);
    assert_eq!(summary.tasks_failed, 2);
    assert_eq!(summary.tasks_abandoned, 1);
    assert_eq!(summary.total_records, 0);
}

#[tokio::test(start_paused = true)]
async fn test_challenge_waits_end_before_task_timeout() {
    let mut settings = test_settings(&[("alpha", 0)], 1, 1);
    settings.collection.task_timeout_secs = 120;
    settings.challenge = ChallengeSettings::default();
    let site = FakeSite::new(
        Arc::new(|url, _| Ok(PageSnapshot::from_html(url, 200, CHALLENGE_PAGE))),
        Duration::ZERO,
    );
    let h = harness(settings, site, ScriptedMonitor::within_limits());

    let summary = h
        .orchestrator
        .run_collection(&names(&["alpha"]), &names(&["mouse"]), 1, 100)
        .await
        .unwrap();

    // every attempt reports its challenge instead of being cut off by the timeout
    assert_eq!(summary.total_attempts, 2);
    assert_eq!(summary.challenges_detected, 2);
    assert_eq!(summary.challenges_resolved, 0);
    assert_eq!(summary.tasks_failed, 2);
    assert_eq!(summary.tasks_abandoned, 1);
    assert!(summary.elapsed < Duration::from_secs(240));
}

#[tokio::test(start_paused = true)]
async fn test_challenge_reloads_are_spaced_with_fetches() {
    let settings = test_settings(&[("alpha", 2000)], 1, 0);
    let site = FakeSite::new(
        Arc::new(|url, reloads| {
            let html = if reloads == 0 {
                CHALLENGE_PAGE.to_string()
            } else {
                listing_page(1)
            };
            Ok(PageSnapshot::from_html(url, 200, html))
        }),
        Duration::from_millis(100),
    );
    let h = harness(settings, site, ScriptedMonitor::within_limits());

    let summary = h
        .orchestrator
        .run_collection(&names(&["alpha"]), &names(&["k1", "k2"]), 1, 100)
        .await
        .unwrap();
    assert_eq!(summary.tasks_completed, 2);
    assert_eq!(summary.challenges_resolved, 2);
    assert_eq!(h.site.reloads_of("alpha.test"), 2);

    let mut completions: Vec<_> = h
        .site
        .events()
        .into_iter()
        .filter(|e| e.domain == "alpha.test")
        .map(|e| e.completed_at)
        .collect();
    completions.sort();
    assert_eq!(completions.len(), 4);
    for pair in completions.windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        assert!(
            gap >= Duration::from_millis(1950),
            "requests completed {:?} apart",
            gap
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_stop_interrupts_challenge_handling() {
    let mut settings = test_settings(&[("alpha", 0)], 1, 0);
    settings.collection.task_timeout_secs = 120;
    settings.challenge = ChallengeSettings::default();
    let site = FakeSite::new(
        Arc::new(|url, _| Ok(PageSnapshot::from_html(url, 200, CHALLENGE_PAGE))),
        Duration::ZERO,
    );
    let h = harness(settings, site, ScriptedMonitor::within_limits());

    let stop = h.orchestrator.stop_handle();
    let orchestrator = h.orchestrator.clone();
    let run = tokio::spawn(async move {
        orchestrator
            .run_collection(&names(&["alpha"]), &names(&["mouse"]), 1, 100)
            .await
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    let stopped_at = Instant::now();
    stop.stop();
    let summary = run.await.unwrap().unwrap();

    assert!(stopped_at.elapsed() < Duration::from_secs(5));
    assert_eq!(summary.stop_reason, StopReason::Cancelled);
    assert_eq!(summary.tasks_completed, 0);
    assert_eq!(h.factory.closed(), h.factory.created().len());
}
