
use std::sync::Arc;
use std::time::Duration;

use job_sentinel::daemon::{Daemon, DaemonHandle};
use job_sentinel::memory_killer::{GrowthTable, MemoryGrowth, MemoryKiller, Phase};
use job_sentinel::monitor::JobRegistry;
use job_sentinel::process::WorkerSignal;
use test_harness::{
    killer_config, killer_fixture, memory_monitor, wait_for, RecordingMetrics, RecordingProcess,
    ScriptedSampler, SignalEvent,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn empty_registry() -> Arc<JobRegistry> {
    Arc::new(JobRegistry::new())
}

const FULL_RESTART: [SignalEvent; 3] = [
    SignalEvent {
        signal: WorkerSignal::StopFetching,
        group: false,
    },
    SignalEvent {
        signal: WorkerSignal::Terminate,
        group: false,
    },
    SignalEvent {
        signal: WorkerSignal::Kill,
        group: true,
    },
];

#[tokio::test(start_paused = true)]
async fn test_rss_below_soft_limit_is_in_range() {
    let fx = killer_fixture(
        killer_config(),
        empty_registry(),
        ScriptedSampler::new(&[100, 100]),
        RecordingProcess::leader(),
    );
    let token = CancellationToken::new();

    assert!(fx.killer.rss_within_range(&token).await.unwrap());
    assert!(fx.killer.rss_within_range(&token).await.unwrap());

    // No grace polling: one sample per check
    assert_eq!(fx.sampler.calls(), 2);
    assert_eq!(fx.metrics.phases(), vec![Phase::Running]);
    assert!(fx.process.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rss_equal_to_soft_limit_is_in_range() {
    let fx = killer_fixture(
        killer_config(),
        empty_registry(),
        ScriptedSampler::new(&[200]),
        RecordingProcess::leader(),
    );
    assert!(fx
        .killer
        .rss_within_range(&CancellationToken::new())
        .await
        .unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_rss_above_hard_limit_fails_immediately() {
    let fx = killer_fixture(
        killer_config(),
        empty_registry(),
        ScriptedSampler::new(&[400]),
        RecordingProcess::leader(),
    );
    let start = Instant::now();

    assert!(!fx
        .killer
        .rss_within_range(&CancellationToken::new())
        .await
        .unwrap());

    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(fx.sampler.calls(), 1);

    let state = fx.killer.state();
    assert_eq!(state.phase, Phase::AboveSoftLimit);
    assert_eq!(
        state.out_of_range_reason(fx.killer.config().grace_balloon),
        "current_rss(400) > hard_limit_rss(300)"
    );
}

#[tokio::test(start_paused = true)]
async fn test_grace_period_then_hard_limit() {
    let fx = killer_fixture(
        killer_config(),
        empty_registry(),
        ScriptedSampler::new(&[250, 400]),
        RecordingProcess::leader(),
    );
    let start = Instant::now();

    assert!(!fx
        .killer
        .rss_within_range(&CancellationToken::new())
        .await
        .unwrap());

    // One check interval spent in the grace period
    assert_eq!(start.elapsed(), Duration::from_secs(3));
    assert_eq!(fx.sampler.calls(), 2);
    assert_eq!(fx.metrics.phases(), vec![Phase::Running, Phase::AboveSoftLimit]);

    let reason = fx
        .killer
        .state()
        .out_of_range_reason(fx.killer.config().grace_balloon);
    assert!(reason.contains("hard_limit_rss(300)"), "{}", reason);
}

#[tokio::test(start_paused = true)]
async fn test_sustained_soft_breach_fails_after_grace() {
    let fx = killer_fixture(
        killer_config(),
        empty_registry(),
        ScriptedSampler::new(&[250]),
        RecordingProcess::leader(),
    );
    let start = Instant::now();

    assert!(!fx
        .killer
        .rss_within_range(&CancellationToken::new())
        .await
        .unwrap());

    assert!(start.elapsed() > Duration::from_secs(10));
    assert!(start.elapsed() <= Duration::from_secs(13));

    let reason = fx
        .killer
        .state()
        .out_of_range_reason(fx.killer.config().grace_balloon);
    assert_eq!(
        reason,
        "current_rss(250) > soft_limit_rss(200) longer than GRACE_BALLOON_SECONDS(10)"
    );
}

#[tokio::test(start_paused = true)]
async fn test_soft_breach_recovering_within_grace_is_in_range() {
    let fx = killer_fixture(
        killer_config(),
        empty_registry(),
        ScriptedSampler::new(&[250, 250, 150]),
        RecordingProcess::leader(),
    );

    assert!(fx
        .killer
        .rss_within_range(&CancellationToken::new())
        .await
        .unwrap());
    assert_eq!(fx.sampler.calls(), 3);
    assert!(fx.process.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_restart_sends_stages_in_order() {
    let fx = killer_fixture(
        killer_config(),
        empty_registry(),
        ScriptedSampler::new(&[400]),
        RecordingProcess::leader(),
    );

    fx.killer.restart(&CancellationToken::new()).await.unwrap();

    assert_eq!(fx.process.events(), FULL_RESTART.to_vec());
    assert_eq!(
        fx.metrics.phases(),
        vec![
            Phase::StopFetchingNewJobs,
            Phase::ShuttingDown,
            Phase::KillingSidekiq
        ]
    );
    assert_eq!(fx.killer.phase(), Phase::KillingSidekiq);
}

#[tokio::test(start_paused = true)]
async fn test_kill_targets_only_this_process_when_not_group_leader() {
    let fx = killer_fixture(
        killer_config(),
        empty_registry(),
        ScriptedSampler::new(&[400]),
        RecordingProcess::follower(),
    );

    fx.killer.signal_pgroup(WorkerSignal::Kill, "die").unwrap();

    assert_eq!(
        fx.process.events(),
        vec![SignalEvent {
            signal: WorkerSignal::Kill,
            group: false
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_daemon_restarts_once_when_over_hard_limit() {
    let fx = killer_fixture(
        killer_config(),
        empty_registry(),
        ScriptedSampler::new(&[400]),
        RecordingProcess::leader(),
    );

    fx.killer.run(CancellationToken::new()).await.unwrap();

    assert_eq!(fx.process.events(), FULL_RESTART.to_vec());
    assert_eq!(
        fx.metrics.phases(),
        vec![
            Phase::Running,
            Phase::AboveSoftLimit,
            Phase::StopFetchingNewJobs,
            Phase::ShuttingDown,
            Phase::KillingSidekiq
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_daemon_keeps_checking_while_in_range() {
    let fx = killer_fixture(
        killer_config(),
        empty_registry(),
        ScriptedSampler::new(&[100, 100]),
        RecordingProcess::leader(),
    );
    let handle = DaemonHandle::start(fx.killer.clone(), &CancellationToken::new());

    tokio::time::sleep(Duration::from_secs(7)).await;
    assert!(handle.is_running());
    handle.shutdown().await.unwrap();

    assert!(fx.sampler.calls() >= 2);
    assert!(fx.process.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_sampling_errors_do_not_stop_the_daemon() {
    let fx = killer_fixture(
        killer_config(),
        empty_registry(),
        ScriptedSampler::failing_first(2, &[400]),
        RecordingProcess::leader(),
    );

    fx.killer.run(CancellationToken::new()).await.unwrap();

    assert_eq!(fx.process.events(), FULL_RESTART.to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_signal_failure_is_logged_and_checks_continue() {
    let fx = killer_fixture(
        killer_config(),
        empty_registry(),
        ScriptedSampler::new(&[400]),
        RecordingProcess::failing(),
    );
    let handle = DaemonHandle::start(fx.killer.clone(), &CancellationToken::new());

    // Each check interval retries the restart after the failed signal
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(handle.is_running());
    assert!(fx.sampler.calls() >= 4);
    assert!(fx.process.events().is_empty());

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_disabled_killer_does_nothing() {
    let config = killer_config().with_limits(0, 300);
    let fx = killer_fixture(
        config,
        empty_registry(),
        ScriptedSampler::new(&[400]),
        RecordingProcess::leader(),
    );

    assert!(!fx.killer.enabled());
    fx.killer.run(CancellationToken::new()).await.unwrap();
    assert_eq!(fx.sampler.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_restart_waits_for_running_jobs() {
    let (monitor, _state) = memory_monitor();
    let fx = killer_fixture(
        killer_config(),
        monitor.registry(),
        ScriptedSampler::new(&[400]),
        RecordingProcess::leader(),
    );

    let job_monitor = monitor.clone();
    let job = tokio::spawn(async move {
        job_monitor
            .within_job("StuckWorker", "jid-stuck", "default", |_token| {
                std::future::pending::<()>()
            })
            .await
    });
    assert!(wait_for(Duration::from_secs(1), || monitor.registry().contains("jid-stuck")).await);

    let start = Instant::now();
    fx.killer.restart(&CancellationToken::new()).await.unwrap();

    // 30s for stop_fetching_new_jobs, then 25s + 2s for shutting_down
    assert!(start.elapsed() >= Duration::from_secs(57));
    assert!(start.elapsed() < Duration::from_secs(63));
    assert_eq!(fx.process.events(), FULL_RESTART.to_vec());

    job.abort();
}

#[tokio::test(start_paused = true)]
async fn test_restart_moves_on_once_jobs_drain() {
    let (monitor, _state) = memory_monitor();
    let fx = killer_fixture(
        killer_config(),
        monitor.registry(),
        ScriptedSampler::new(&[400]),
        RecordingProcess::leader(),
    );

    let job_monitor = monitor.clone();
    let job = tokio::spawn(async move {
        job_monitor
            .within_job("ShortWorker", "jid-short", "default", |_token| {
                tokio::time::sleep(Duration::from_secs(5))
            })
            .await
    });
    assert!(wait_for(Duration::from_secs(1), || monitor.registry().contains("jid-short")).await);

    let start = Instant::now();
    fx.killer.restart(&CancellationToken::new()).await.unwrap();

    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(fx.process.events(), FULL_RESTART.to_vec());
    job.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stopping_during_restart_skips_later_stages() {
    let (monitor, _state) = memory_monitor();
    let fx = killer_fixture(
        killer_config(),
        monitor.registry(),
        ScriptedSampler::new(&[400]),
        RecordingProcess::leader(),
    );

    let job_monitor = monitor.clone();
    let job = tokio::spawn(async move {
        job_monitor
            .within_job("StuckWorker", "jid-stuck", "default", |_token| {
                std::future::pending::<()>()
            })
            .await
    });
    assert!(wait_for(Duration::from_secs(1), || monitor.registry().contains("jid-stuck")).await);

    let token = CancellationToken::new();
    let killer = fx.killer.clone();
    let restart_token = token.clone();
    let restart = tokio::spawn(async move { killer.restart(&restart_token).await });

    tokio::time::sleep(Duration::from_secs(5)).await;
    token.cancel();
    restart.await.unwrap().unwrap();

    assert_eq!(fx.process.signals(), vec![WorkerSignal::StopFetching]);
    job.abort();
}

#[tokio::test(start_paused = true)]
async fn test_expected_job_growth_raises_soft_limit() {
    let (monitor, _state) = memory_monitor();
    let growth = GrowthTable::new(300_000).with_entry(
        "ExportWorker",
        MemoryGrowth {
            growth_kb_per_sec: 10,
            max_growth_kb: Some(100),
        },
    );
    let sampler = ScriptedSampler::new(&[250]);
    let process = RecordingProcess::leader();
    let killer = MemoryKiller::new(killer_config(), monitor.registry(), sampler, process.clone())
        .with_growth_table(growth)
        .with_metrics(RecordingMetrics::new());

    let job_monitor = monitor.clone();
    let job = tokio::spawn(async move {
        job_monitor
            .within_job("ExportWorker", "jid-export", "exports", |_token| {
                std::future::pending::<()>()
            })
            .await
    });
    assert!(wait_for(Duration::from_secs(1), || monitor.registry().contains("jid-export")).await);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(killer.rss_increase_by_jobs(), 100);
    assert!(killer
        .rss_within_range(&CancellationToken::new())
        .await
        .unwrap());
    assert_eq!(killer.state().soft_limit_kb, 300);

    job.abort();
}

#[tokio::test(start_paused = true)]
async fn test_out_of_range_counts_running_jobs() {
    let (monitor, _state) = memory_monitor();
    let fx = killer_fixture(
        killer_config(),
        monitor.registry(),
        ScriptedSampler::new(&[400]),
        RecordingProcess::leader(),
    );

    let job_monitor = monitor.clone();
    let job = tokio::spawn(async move {
        job_monitor
            .within_job("ImportWorker", "jid-import", "imports", |_token| {
                std::future::pending::<()>()
            })
            .await
    });
    assert!(wait_for(Duration::from_secs(1), || monitor.registry().contains("jid-import")).await);

    assert!(!fx
        .killer
        .rss_within_range(&CancellationToken::new())
        .await
        .unwrap());
    assert_eq!(fx.metrics.running_jobs(), vec!["ImportWorker".to_string()]);

    job.abort();
}
