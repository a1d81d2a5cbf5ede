use broker_failover::health::HeartbeatRecord;
use broker_failover::registry::{MachineState, RegistryCall};

use crate::Cluster;

#[tokio::test]
async fn test_progressing_worker_is_never_failed_over() {
    let mut cluster = Cluster::new(3);
    cluster.coordination.register("w");
    cluster.tick().await;

    for _ in 0..100 {
        cluster.coordination.beat("w");
        let summary = cluster.tick().await;
        assert!(summary.failed_over.is_empty());
        assert_eq!(cluster.checker.tracker().suspicion("w"), Some(0));
    }
    assert_eq!(cluster.log.count(&RegistryCall::Migrate("w".into())), 0);
    assert_eq!(cluster.machines.state("w"), Some(MachineState::Enabled));
}

#[tokio::test]
async fn test_stale_then_progress_does_not_fail_over() {
    // W reports 5,5,5,6 with threshold 3
    let mut cluster = Cluster::new(3);
    let mut counts = Vec::new();
    for seq in [5, 5, 5, 6] {
        cluster.coordination.publish(HeartbeatRecord::alive("w", seq));
        let summary = cluster.tick().await;
        assert!(summary.failed_over.is_empty());
        counts.push(cluster.checker.tracker().suspicion("w").unwrap());
    }
    assert_eq!(counts, vec![1, 2, 3, 0]);
    assert!(cluster.log.mutations().iter().all(|c| !matches!(c, RegistryCall::MarkDead(_))));
}

#[tokio::test]
async fn test_stale_worker_fails_over_on_tick_after_threshold() {
    // X reports 7,7,7,7 with threshold 3
    let mut cluster = Cluster::new(3);
    cluster.coordination.publish(HeartbeatRecord::alive("x", 7));
    cluster.coordination.register("other");

    for tick in 1..=3 {
        cluster.coordination.beat("other");
        let summary = cluster.tick().await;
        assert!(summary.failed_over.is_empty(), "failed over early on tick {}", tick);
    }
    cluster.coordination.beat("other");
    let summary = cluster.tick().await;
    assert_eq!(summary.failed_over, vec!["x".to_string()]);

    let x_calls: Vec<RegistryCall> = cluster
        .log
        .mutations()
        .into_iter()
        .filter(|c| {
            matches!(
                c,
                RegistryCall::MarkDead(w) | RegistryCall::Migrate(w) | RegistryCall::RemoveQueue(w)
                    if w == "x"
            )
        })
        .collect();
    assert_eq!(
        x_calls,
        vec![
            RegistryCall::MarkDead("x".into()),
            RegistryCall::Migrate("x".into()),
            RegistryCall::RemoveQueue("x".into()),
        ]
    );
    assert!(!cluster.coordination.heartbeat("x").unwrap().alive);
    assert!(!cluster.checker.tracker().is_tracked("x"));
}

#[tokio::test]
async fn test_progress_gives_no_credit() {
    let mut cluster = Cluster::new(3);
    cluster.coordination.register("w");
    cluster.tick().await;
    cluster.tick().await;
    cluster.coordination.beat("w");
    cluster.tick().await;
    assert_eq!(cluster.checker.tracker().suspicion("w"), Some(0));

    for _ in 0..3 {
        assert!(cluster.tick().await.failed_over.is_empty());
    }
    assert_eq!(cluster.tick().await.failed_over, vec!["w".to_string()]);
}

#[tokio::test]
async fn test_stopped_worker_is_never_enabled() {
    let mut cluster = Cluster::new(3);
    cluster.coordination.register("w");
    cluster.coordination.stop("w");

    for _ in 0..10 {
        let summary = cluster.tick().await;
        assert_eq!(summary.tracked, 0);
    }
    assert!(cluster.log.mutations().is_empty());
}

#[tokio::test]
async fn test_failover_is_not_repeated_on_redelivery() {
    let mut cluster = Cluster::new(1);
    cluster.coordination.publish(HeartbeatRecord::alive("x", 7));
    cluster.tick().await;
    assert_eq!(cluster.tick().await.failed_over, vec!["x".to_string()]);

    // Same record delivered again on the next tick
    cluster.coordination.publish(HeartbeatRecord::alive("x", 7));
    let summary = cluster.tick().await;
    assert!(summary.failed_over.is_empty());

    assert_eq!(cluster.log.count(&RegistryCall::MarkDead("x".into())), 1);
    assert_eq!(cluster.log.count(&RegistryCall::Migrate("x".into())), 1);
    assert_eq!(cluster.log.count(&RegistryCall::RemoveQueue("x".into())), 1);
}

#[tokio::test]
async fn test_failed_worker_stays_retired_while_listed() {
    let threshold = 3;
    let mut cluster = Cluster::new(threshold);
    cluster.coordination.publish(HeartbeatRecord::alive("x", 7));

    let mut ticks = 0;
    while cluster.tick().await.failed_over.is_empty() {
        ticks += 1;
        assert!(ticks <= threshold, "never failed over");
    }
    let calls_at_failover = cluster.log.calls().len();

    // The dead record left behind stays listed and unchanged
    for _ in 0..2 * (threshold + 1) {
        let summary = cluster.tick().await;
        assert!(summary.failed_over.is_empty());
        assert_eq!(summary.tracked, 0);
    }

    assert_eq!(cluster.log.count(&RegistryCall::MarkDead("x".into())), 1);
    assert_eq!(cluster.log.count(&RegistryCall::Migrate("x".into())), 1);
    assert_eq!(cluster.log.count(&RegistryCall::RemoveQueue("x".into())), 1);
    let enables_after: usize = cluster.log.calls()[calls_at_failover..]
        .iter()
        .filter(|c| matches!(c, RegistryCall::EnableMachine(_)))
        .count();
    assert_eq!(enables_after, 0);
    assert_eq!(cluster.machines.state("x"), Some(MachineState::Disabled));
    assert!(cluster.checker.tracker().is_retired("x"));
}

#[tokio::test]
async fn test_retired_worker_returns_with_new_sequence() {
    let mut cluster = Cluster::new(1);
    cluster.coordination.register("w");
    cluster.tick().await;
    assert_eq!(cluster.tick().await.failed_over, vec!["w".to_string()]);
    cluster.tick().await;

    // The worker restarts and heartbeats again
    cluster.coordination.beat("w");
    let summary = cluster.tick().await;
    assert_eq!(summary.tracked, 1);
    assert_eq!(cluster.machines.state("w"), Some(MachineState::Enabled));
    assert!(!cluster.checker.tracker().is_retired("w"));
}

#[tokio::test]
async fn test_stalled_reachable_worker_is_disabled_after_failover() {
    let mut cluster = Cluster::new(1);
    cluster.coordination.register("x");
    cluster.tick().await;
    assert_eq!(cluster.machines.state("x"), Some(MachineState::Enabled));

    assert_eq!(cluster.tick().await.failed_over, vec!["x".to_string()]);
    assert_eq!(cluster.machines.state("x"), Some(MachineState::Disabled));

    cluster.coordination.deregister("x");
    cluster.tick().await;
    assert_eq!(cluster.machines.state("x"), Some(MachineState::Disabled));
    assert!(!cluster.checker.tracker().is_retired("x"));
}

#[tokio::test]
async fn test_disable_retried_after_machine_registry_error() {
    let mut cluster = Cluster::new(30);
    cluster.coordination.register("w");
    cluster.tick().await;

    cluster.coordination.set_alive("w", false);
    cluster.machines.set_failing(true);
    cluster.tick().await;
    cluster.machines.set_failing(false);

    for _ in 0..10 {
        cluster.tick().await;
    }
    assert_eq!(cluster.machines.state("w"), Some(MachineState::Disabled));
    assert_eq!(cluster.log.count(&RegistryCall::DisableMachine("w".into())), 2);
}

#[tokio::test]
async fn test_unreachable_then_gone_is_pruned() {
    // Y reports alive=false once, then disappears from the registry
    let mut cluster = Cluster::new(3);
    cluster.coordination.publish(HeartbeatRecord::dead("y", 4));
    cluster.tick().await;
    assert!(cluster.checker.tracker().is_tracked("y"));

    cluster.coordination.deregister("y");
    let summary = cluster.tick().await;

    assert_eq!(summary.pruned, vec!["y".to_string()]);
    assert!(summary.failed_over.is_empty());
    assert!(!cluster.checker.tracker().is_tracked("y"));
    assert_eq!(cluster.log.count(&RegistryCall::DisableMachine("y".into())), 1);
    assert_eq!(cluster.log.count(&RegistryCall::MarkDead("y".into())), 0);
    assert_eq!(cluster.log.count(&RegistryCall::Migrate("y".into())), 0);
}

#[tokio::test]
async fn test_session_loss_disables_once_then_fails_over() {
    let mut cluster = Cluster::new(3);
    cluster.coordination.register("w");
    cluster.tick().await;
    cluster.coordination.beat("w");
    cluster.tick().await;

    cluster.coordination.set_alive("w", false);
    for _ in 0..3 {
        assert!(cluster.tick().await.failed_over.is_empty());
    }
    assert_eq!(cluster.machines.state("w"), Some(MachineState::Disabled));
    assert_eq!(cluster.log.count(&RegistryCall::DisableMachine("w".into())), 1);
    assert_eq!(cluster.tick().await.failed_over, vec!["w".to_string()]);
    // Once on Lost, once more as part of the failover
    assert_eq!(cluster.log.count(&RegistryCall::DisableMachine("w".into())), 2);
    assert!(!cluster.coordination.has_queue("w"));
}

#[tokio::test]
async fn test_flapping_worker_is_reenabled() {
    let mut cluster = Cluster::new(5);
    cluster.coordination.register("w");
    cluster.tick().await;

    cluster.coordination.set_alive("w", false);
    cluster.tick().await;
    assert_eq!(cluster.machines.state("w"), Some(MachineState::Disabled));

    cluster.coordination.beat("w");
    cluster.tick().await;
    assert_eq!(cluster.machines.state("w"), Some(MachineState::Enabled));
    assert_eq!(cluster.checker.tracker().suspicion("w"), Some(0));
}

#[tokio::test]
async fn test_missing_record_is_ignored() {
    let mut cluster = Cluster::new(1);
    cluster.coordination.register("w");
    cluster.coordination.drop_record("w");

    for _ in 0..5 {
        let summary = cluster.tick().await;
        assert!(summary.failed_over.is_empty());
        assert_eq!(summary.tracked, 0);
    }
    assert!(cluster.log.mutations().is_empty());
}

#[tokio::test]
async fn test_migration_failure_still_retires_worker() {
    let mut cluster = Cluster::new(1);
    cluster.migrator.set_failing(true);
    cluster.coordination.register("w");
    cluster.tick().await;

    let summary = cluster.tick().await;
    assert_eq!(summary.failed_over, vec!["w".to_string()]);
    assert!(!cluster.coordination.has_queue("w"));
    assert_eq!(cluster.log.count(&RegistryCall::Migrate("w".into())), 1);
}

#[tokio::test]
async fn test_unreadable_worker_does_not_stop_others() {
    let mut cluster = Cluster::new(1);
    cluster.coordination.register("a");
    cluster.coordination.register("b");
    cluster.coordination.set_unreadable("a", true);

    cluster.tick().await;
    let summary = cluster.tick().await;

    assert_eq!(summary.skipped, vec!["a".to_string()]);
    assert_eq!(summary.failed_over, vec!["b".to_string()]);
    assert!(!cluster.checker.tracker().is_tracked("a"));
}
