use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use taskmill::{
    ConfiguredLocalScheduler, ExitKind, FileConfig, JobSpec, JobStatus, LocalScheduler, Scheduler,
    SchedulerError, SchedulerJobId,
};

const TEST_INTERVAL: Duration = Duration::from_millis(25);
const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

fn shell_job(script: &str) -> JobSpec {
    JobSpec::new(vec![
        "sh".to_string(),
        "-c".to_string(),
        script.to_string(),
    ])
}

fn temp_path(suffix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("taskmill-test-{}-{suffix}", uuid::Uuid::new_v4()))
}

async fn wait_for_status(
    scheduler: &dyn Scheduler,
    id: &SchedulerJobId,
    expected: JobStatus,
) {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    loop {
        let status = scheduler.status(id).await.expect("job should be tracked");
        if status == expected {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for status {expected}, last saw {status}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn current_status(scheduler: &dyn Scheduler, id: &SchedulerJobId) -> JobStatus {
    scheduler.status(id).await.expect("job should be tracked")
}

// ---------- Completion and exit info ----------

#[tokio::test]
async fn test_normal_completion_reports_exit_code() {
    let scheduler = LocalScheduler::new(2, TEST_INTERVAL);

    let id = scheduler.submit(shell_job("exit 7")).await.unwrap();
    wait_for_status(&scheduler, &id, JobStatus::Done).await;

    let info = scheduler.exit_info(&id).await.unwrap();
    assert_eq!(info.kind, ExitKind::FinishedRegularly);
    assert_eq!(info.exit_code, Some(7));
    assert!(info.term_signal.is_none());

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_exit_info_is_a_consuming_read() {
    let scheduler = LocalScheduler::new(1, TEST_INTERVAL);

    let id = scheduler.submit(shell_job("exit 0")).await.unwrap();
    wait_for_status(&scheduler, &id, JobStatus::Done).await;

    scheduler.exit_info(&id).await.unwrap();
    let second = scheduler.exit_info(&id).await;
    assert!(matches!(second, Err(SchedulerError::UnknownJob(_))));

    // Status is still answerable after the record is consumed.
    assert_eq!(current_status(&scheduler, &id).await, JobStatus::Done);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_exit_info_before_completion_is_unknown() {
    let scheduler = LocalScheduler::new(1, TEST_INTERVAL);

    let id = scheduler.submit(shell_job("sleep 30")).await.unwrap();
    let result = scheduler.exit_info(&id).await;
    assert!(matches!(result, Err(SchedulerError::UnknownJob(_))));

    scheduler.kill(&id).await.unwrap();
    scheduler.shutdown().await;
}

// ---------- Concurrency cap ----------

#[tokio::test]
async fn test_running_jobs_never_exceed_proc_nb() {
    let scheduler = LocalScheduler::new(2, TEST_INTERVAL);

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(scheduler.submit(shell_job("sleep 30")).await.unwrap());
    }

    let running = |statuses: &[JobStatus]| {
        statuses
            .iter()
            .filter(|s| **s == JobStatus::Running)
            .count()
    };

    // Give the loop time to dispatch, checking the cap on every observation.
    let deadline = Instant::now() + WAIT_TIMEOUT;
    loop {
        let mut statuses = Vec::new();
        for id in &ids {
            statuses.push(current_status(&scheduler, id).await);
        }
        assert!(running(&statuses) <= 2, "cap exceeded: {statuses:?}");
        if running(&statuses) == 2 {
            break;
        }
        assert!(Instant::now() < deadline, "never reached the cap");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    for id in &ids {
        scheduler.kill(id).await.unwrap();
    }
    scheduler.shutdown().await;
}

// ---------- Priority and FIFO ordering ----------

#[tokio::test]
async fn test_higher_priority_dispatches_first() {
    let scheduler = LocalScheduler::new(1, TEST_INTERVAL);

    let blocker = scheduler.submit(shell_job("sleep 30")).await.unwrap();
    wait_for_status(&scheduler, &blocker, JobStatus::Running).await;

    let low = scheduler
        .submit(shell_job("sleep 30").with_priority(1))
        .await
        .unwrap();
    let high = scheduler
        .submit(shell_job("sleep 30").with_priority(5))
        .await
        .unwrap();

    scheduler.kill(&blocker).await.unwrap();
    wait_for_status(&scheduler, &high, JobStatus::Running).await;
    assert_eq!(
        current_status(&scheduler, &low).await,
        JobStatus::QueuedActive
    );

    scheduler.kill(&high).await.unwrap();
    scheduler.kill(&low).await.unwrap();
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_equal_priority_dispatches_in_submission_order() {
    let scheduler = LocalScheduler::new(1, TEST_INTERVAL);

    let blocker = scheduler.submit(shell_job("sleep 30")).await.unwrap();
    wait_for_status(&scheduler, &blocker, JobStatus::Running).await;

    let first = scheduler
        .submit(shell_job("sleep 30").with_priority(3))
        .await
        .unwrap();
    let second = scheduler
        .submit(shell_job("sleep 30").with_priority(3))
        .await
        .unwrap();

    scheduler.kill(&blocker).await.unwrap();
    wait_for_status(&scheduler, &first, JobStatus::Running).await;
    assert_eq!(
        current_status(&scheduler, &second).await,
        JobStatus::QueuedActive
    );

    scheduler.kill(&first).await.unwrap();
    scheduler.kill(&second).await.unwrap();
    scheduler.shutdown().await;
}

// ---------- Kill semantics ----------

#[tokio::test]
async fn test_kill_while_queued_aborts_without_running() {
    let scheduler = LocalScheduler::new(1, TEST_INTERVAL);

    let blocker = scheduler.submit(shell_job("sleep 30")).await.unwrap();
    wait_for_status(&scheduler, &blocker, JobStatus::Running).await;

    let queued = scheduler.submit(shell_job("exit 0")).await.unwrap();
    assert_eq!(
        current_status(&scheduler, &queued).await,
        JobStatus::QueuedActive
    );

    scheduler.kill(&queued).await.unwrap();
    assert_eq!(current_status(&scheduler, &queued).await, JobStatus::Failed);
    let info = scheduler.exit_info(&queued).await.unwrap();
    assert_eq!(info.kind, ExitKind::ExitAborted);
    assert!(info.exit_code.is_none());

    scheduler.kill(&blocker).await.unwrap();
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_kill_while_running_terminates_the_process() {
    let scheduler = LocalScheduler::new(1, TEST_INTERVAL);

    // The marker file only appears if the process survives its sleep.
    let marker = temp_path("marker");
    let id = scheduler
        .submit(shell_job(&format!(
            "sleep 1 && touch {}",
            marker.display()
        )))
        .await
        .unwrap();
    wait_for_status(&scheduler, &id, JobStatus::Running).await;

    scheduler.kill(&id).await.unwrap();
    assert_eq!(current_status(&scheduler, &id).await, JobStatus::Failed);
    let info = scheduler.exit_info(&id).await.unwrap();
    assert_eq!(info.kind, ExitKind::UserKilled);
    assert!(info.exit_code.is_none());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!marker.exists(), "killed job still ran to completion");

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_operations_on_unknown_ids_fail() {
    let scheduler = LocalScheduler::new(1, TEST_INTERVAL);

    let never_submitted = SchedulerJobId::from(uuid::Uuid::new_v4());
    assert!(matches!(
        scheduler.status(&never_submitted).await,
        Err(SchedulerError::UnknownJob(_))
    ));
    assert!(matches!(
        scheduler.kill(&never_submitted).await,
        Err(SchedulerError::UnknownJob(_))
    ));
    assert!(matches!(
        scheduler.exit_info(&never_submitted).await,
        Err(SchedulerError::UnknownJob(_))
    ));

    // Ids from another backend are just as unknown here.
    let foreign = SchedulerJobId::from("pbs-job-4711");
    assert!(matches!(
        scheduler.status(&foreign).await,
        Err(SchedulerError::UnknownJob(_))
    ));

    scheduler.shutdown().await;
}

// ---------- Spawn failure containment ----------

#[tokio::test]
async fn test_unspawnable_job_fails_without_stopping_the_scheduler() {
    let scheduler = LocalScheduler::new(1, TEST_INTERVAL);

    let bad = scheduler
        .submit(JobSpec::new(vec![
            "/no/such/binary/anywhere".to_string(),
        ]))
        .await
        .unwrap();
    wait_for_status(&scheduler, &bad, JobStatus::Failed).await;
    let info = scheduler.exit_info(&bad).await.unwrap();
    assert_eq!(info.kind, ExitKind::ExitAborted);
    assert!(info.exit_code.is_none());

    // The loop keeps dispatching other jobs afterwards.
    let good = scheduler.submit(shell_job("exit 0")).await.unwrap();
    wait_for_status(&scheduler, &good, JobStatus::Done).await;

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_spawn_failure_is_reported_in_the_jobs_output_file() {
    let scheduler = LocalScheduler::new(1, TEST_INTERVAL);

    let stdout_path = temp_path("out");
    let bad = scheduler
        .submit(
            JobSpec::new(vec!["/no/such/binary/anywhere".to_string()])
                .with_stdout_path(&stdout_path),
        )
        .await
        .unwrap();
    wait_for_status(&scheduler, &bad, JobStatus::Failed).await;

    let output = std::fs::read_to_string(&stdout_path).unwrap();
    assert!(
        output.contains("could not start job"),
        "unexpected failure report: {output}"
    );

    std::fs::remove_file(&stdout_path).ok();
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_unopenable_stdout_directory_aborts_the_job() {
    let scheduler = LocalScheduler::new(1, TEST_INTERVAL);

    let id = scheduler
        .submit(shell_job("exit 0").with_stdout_path("/no/such/dir/out.log"))
        .await
        .unwrap();
    wait_for_status(&scheduler, &id, JobStatus::Failed).await;
    let info = scheduler.exit_info(&id).await.unwrap();
    assert_eq!(info.kind, ExitKind::ExitAborted);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_empty_command_is_rejected_at_submit() {
    let scheduler = LocalScheduler::new(1, TEST_INTERVAL);
    let result = scheduler.submit(JobSpec::new(Vec::new())).await;
    assert!(matches!(result, Err(SchedulerError::Submission(_))));
    scheduler.shutdown().await;
}

// ---------- Stdio redirection ----------

#[tokio::test]
async fn test_stdout_redirection_and_join_stderrout() {
    let scheduler = LocalScheduler::new(1, TEST_INTERVAL);

    let joined = temp_path("joined");
    let id = scheduler
        .submit(
            shell_job("echo to-stdout; echo to-stderr >&2")
                .with_stdout_path(&joined)
                .with_join_stderrout(true),
        )
        .await
        .unwrap();
    wait_for_status(&scheduler, &id, JobStatus::Done).await;

    let output = std::fs::read_to_string(&joined).unwrap();
    assert!(output.contains("to-stdout"));
    assert!(output.contains("to-stderr"));

    std::fs::remove_file(&joined).ok();
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_stdin_redirection_and_working_directory() {
    let scheduler = LocalScheduler::new(1, TEST_INTERVAL);

    let stdin_path = temp_path("in");
    std::fs::write(&stdin_path, "hello from stdin\n").unwrap();
    let stdout_path = temp_path("out");

    let id = scheduler
        .submit(
            shell_job("pwd; cat")
                .with_stdin_path(&stdin_path)
                .with_stdout_path(&stdout_path)
                .with_working_directory(std::env::temp_dir()),
        )
        .await
        .unwrap();
    wait_for_status(&scheduler, &id, JobStatus::Done).await;

    let output = std::fs::read_to_string(&stdout_path).unwrap();
    assert!(output.contains("hello from stdin"));

    std::fs::remove_file(&stdin_path).ok();
    std::fs::remove_file(&stdout_path).ok();
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_explicit_environment_replaces_inherited_one() {
    let scheduler = LocalScheduler::new(1, TEST_INTERVAL);

    let stdout_path = temp_path("env");
    // Absolute shell path: with a replaced environment there is no PATH to
    // resolve a bare program name against.
    let id = scheduler
        .submit(
            JobSpec::new(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                "echo \"marker=$TASKMILL_MARKER home=[$HOME]\"".to_string(),
            ])
            .with_env(vec![(
                "TASKMILL_MARKER".to_string(),
                "present".to_string(),
            )])
            .with_stdout_path(&stdout_path),
        )
        .await
        .unwrap();
    wait_for_status(&scheduler, &id, JobStatus::Done).await;

    let output = std::fs::read_to_string(&stdout_path).unwrap();
    assert!(output.contains("marker=present"));
    assert!(output.contains("home=[]"), "environment was inherited: {output}");

    std::fs::remove_file(&stdout_path).ok();
    scheduler.shutdown().await;
}

// ---------- Idle behavior and lifecycle ----------

#[tokio::test]
async fn test_idle_scheduler_stays_quiet_and_usable() {
    let scheduler = LocalScheduler::new(1, Duration::from_millis(10));

    // Many idle ticks pass without any observable effect.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let id = scheduler.submit(shell_job("exit 0")).await.unwrap();
    wait_for_status(&scheduler, &id, JobStatus::Done).await;

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_sleep_and_wake_are_noops() {
    let scheduler = LocalScheduler::new(1, TEST_INTERVAL);
    scheduler.sleep().await.unwrap();
    scheduler.wake().await.unwrap();

    let id = scheduler.submit(shell_job("exit 0")).await.unwrap();
    wait_for_status(&scheduler, &id, JobStatus::Done).await;
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let scheduler = LocalScheduler::new(1, TEST_INTERVAL);
    scheduler.shutdown().await;
    scheduler.shutdown().await;
}

// ---------- End-to-end scenario ----------

#[tokio::test]
async fn test_sequential_scenario_respects_priorities() {
    let scheduler = LocalScheduler::new(1, TEST_INTERVAL);

    let job1 = scheduler
        .submit(shell_job("sleep 0.4; exit 0"))
        .await
        .unwrap();
    let job2 = scheduler
        .submit(shell_job("exit 3").with_priority(10))
        .await
        .unwrap();
    let job3 = scheduler
        .submit(shell_job("exit 0").with_priority(1))
        .await
        .unwrap();

    // Record the order in which jobs leave the queue.
    let mut dispatch_order = Vec::new();
    let deadline = Instant::now() + WAIT_TIMEOUT;
    loop {
        for (name, id) in [("job1", &job1), ("job2", &job2), ("job3", &job3)] {
            let status = scheduler.status(id).await.unwrap();
            if status != JobStatus::QueuedActive && !dispatch_order.contains(&name) {
                dispatch_order.push(name);
            }
        }
        if dispatch_order.len() == 3
            && scheduler.status(&job3).await.unwrap() == JobStatus::Done
        {
            break;
        }
        assert!(Instant::now() < deadline, "scenario timed out");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(dispatch_order, vec!["job1", "job2", "job3"]);

    assert_eq!(
        scheduler.exit_info(&job1).await.unwrap().exit_code,
        Some(0)
    );
    assert_eq!(
        scheduler.exit_info(&job2).await.unwrap().exit_code,
        Some(3)
    );
    assert_eq!(
        scheduler.exit_info(&job3).await.unwrap().exit_code,
        Some(0)
    );

    scheduler.shutdown().await;
}

// ---------- Live configuration ----------

#[tokio::test]
async fn test_configured_scheduler_follows_proc_nb_changes() {
    let config_path = temp_path("config.toml");
    let config = Arc::new(
        FileConfig::new(1, TEST_INTERVAL).with_path(&config_path),
    );
    let scheduler = ConfiguredLocalScheduler::new(config.clone());

    let first = scheduler.submit(shell_job("sleep 30")).await.unwrap();
    let second = scheduler.submit(shell_job("sleep 30")).await.unwrap();
    wait_for_status(&scheduler, &first, JobStatus::Running).await;
    assert_eq!(
        current_status(&scheduler, &second).await,
        JobStatus::QueuedActive
    );

    // Raising the cap lets the queued job through on a later tick.
    config.set_proc_nb(2);
    wait_for_status(&scheduler, &second, JobStatus::Running).await;

    // The change was persisted by the observer.
    let saved = std::fs::read_to_string(&config_path).unwrap();
    assert!(saved.contains("proc_nb = 2"), "saved config: {saved}");

    scheduler.kill(&first).await.unwrap();
    scheduler.kill(&second).await.unwrap();
    scheduler.shutdown().await;
    std::fs::remove_file(&config_path).ok();
}

#[tokio::test]
async fn test_configured_scheduler_follows_interval_changes() {
    let config = Arc::new(FileConfig::new(1, Duration::from_secs(60)));
    let scheduler = ConfiguredLocalScheduler::new(config.clone());

    // With a one-minute interval nothing would dispatch inside the test
    // timeout; shrinking it through the configuration must take effect.
    config.set_interval(Duration::from_millis(20));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let id = scheduler.submit(shell_job("exit 0")).await.unwrap();
    wait_for_status(&scheduler, &id, JobStatus::Done).await;

    scheduler.shutdown().await;
}
