use super::*;

fn idle_task() -> tokio::task::JoinHandle<()> {
    tokio::spawn(std::future::pending::<()>())
}

#[tokio::test]
async fn test_cooperative_stop_then_unregister() {
    let tasks = TaskManager::new();
    let handle = idle_task();

    tasks.register("t1", handle.abort_handle());
    assert!(!tasks.is_stopped("t1"));

    assert!(tasks.request_stop("t1"));
    assert!(tasks.is_stopped("t1"));

    assert!(tasks.unregister("t1"));
    assert!(!tasks.is_stopped("t1"));
    assert!(!tasks.request_stop("t1"));
    assert!(!tasks.cancel("t1"));
    assert!(!tasks.unregister("t1"));

    handle.abort();
}

#[tokio::test]
async fn test_unknown_thread() {
    let tasks = TaskManager::new();
    assert!(!tasks.is_stopped("nope"));
    assert!(!tasks.request_stop("nope"));
    assert!(!tasks.cancel("nope"));
    assert!(matches!(tasks.stop_token("nope"), Err(Error::NotFound(_))));
    assert_eq!(tasks.stop("nope", Duration::ZERO).await, StopOutcome::NotRunning);
}

#[tokio::test]
async fn test_cancel_aborts_task() {
    let tasks = TaskManager::new();
    let handle = idle_task();
    tasks.register("t1", handle.abort_handle());

    assert!(tasks.cancel("t1"));
    let err = handle.await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(tasks.is_stopped("t1"));
}

#[tokio::test]
async fn test_register_replaces_and_kills_previous() {
    let tasks = TaskManager::new();
    let first = idle_task();
    let second = idle_task();

    let a = tasks.register("t1", first.abort_handle());
    assert!(!a.replaced);
    let b = tasks.register("t1", second.abort_handle());
    assert!(b.replaced);
    assert_ne!(a.id, b.id);

    assert!(a.token.is_cancelled());
    assert!(first.await.unwrap_err().is_cancelled());
    assert!(!b.token.is_cancelled());
    assert_eq!(tasks.active_count(), 1);

    // The displaced registration cannot remove its successor
    assert!(!tasks.unregister_registration("t1", a.id));
    assert!(tasks.contains("t1"));
    assert!(tasks.unregister_registration("t1", b.id));

    second.abort();
}

#[tokio::test]
async fn test_register_exclusive_rejects_duplicate() {
    let tasks = TaskManager::new();
    let first = idle_task();
    let second = idle_task();

    tasks.register_exclusive("t1", first.abort_handle()).unwrap();
    let err = tasks.register_exclusive("t1", second.abort_handle()).unwrap_err();
    assert!(matches!(err, Error::AlreadyRegistered(ref id) if id == "t1"));
    assert!(!first.is_finished());

    first.abort();
    second.abort();
}

#[tokio::test]
async fn test_task_guard_unregisters_own_entry() {
    let tasks = TaskManager::new();
    let handle = idle_task();

    {
        let registration = tasks.register("t1", handle.abort_handle());
        let guard = TaskGuard::new(Arc::clone(&tasks), "t1", &registration);
        assert_eq!(guard.thread_id(), "t1");
        assert!(tasks.contains("t1"));
    }
    assert!(!tasks.contains("t1"));
    assert!(!handle.is_finished());

    handle.abort();
}

#[tokio::test]
async fn test_run_generation_completed() {
    let tasks = TaskManager::new();
    let outcome = tasks.run_generation("t1", |_stop| async { 42 }).await;
    assert_eq!(outcome, GenerationOutcome::Completed(42));
    assert_eq!(tasks.active_count(), 0);
}

#[tokio::test]
async fn test_run_generation_registered_before_start() {
    let tasks = TaskManager::new();
    let inner = Arc::clone(&tasks);

    let outcome = tasks
        .run_generation("t1", move |_stop| async move { inner.contains("t1") })
        .await;
    assert_eq!(outcome, GenerationOutcome::Completed(true));
}

#[tokio::test]
async fn test_run_generation_cooperative_stop_keeps_partial_result() {
    let tasks = TaskManager::new();
    let (started_tx, started_rx) = oneshot::channel();

    let runner = {
        let tasks = Arc::clone(&tasks);
        tokio::spawn(async move {
            tasks
                .run_generation("t1", move |stop| async move {
                    let _ = started_tx.send(());
                    let mut chunks = Vec::new();
                    for i in 0..1000 {
                        if stop.is_cancelled() {
                            break;
                        }
                        chunks.push(i);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                    chunks
                })
                .await
        })
    };

    started_rx.await.unwrap();
    assert_eq!(
        tasks.stop("t1", Duration::from_secs(5)).await,
        StopOutcome::Stopped
    );

    match runner.await.unwrap() {
        GenerationOutcome::Stopped(chunks) => assert!(chunks.len() < 1000),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(!tasks.contains("t1"));
}

#[tokio::test]
async fn test_run_generation_hard_cancel() {
    let tasks = TaskManager::new();
    let (started_tx, started_rx) = oneshot::channel();

    let runner = {
        let tasks = Arc::clone(&tasks);
        tokio::spawn(async move {
            tasks
                .run_generation("t1", move |_stop| async move {
                    let _ = started_tx.send(());
                    // Never polls the stop flag
                    std::future::pending::<()>().await
                })
                .await
        })
    };

    started_rx.await.unwrap();
    assert_eq!(
        tasks.stop("t1", Duration::from_millis(100)).await,
        StopOutcome::Cancelled
    );
    assert_eq!(runner.await.unwrap(), GenerationOutcome::Cancelled);
    assert_eq!(tasks.active_count(), 0);
}

#[tokio::test]
async fn test_run_generation_panic_is_failure() {
    let tasks = TaskManager::new();
    let outcome: GenerationOutcome<()> = tasks
        .run_generation("t1", |_stop| async { panic!("model exploded"); })
        .await;
    assert!(matches!(outcome, GenerationOutcome::Failed(_)));
    assert!(!tasks.contains("t1"));
}

#[tokio::test]
async fn test_dropping_run_generation_aborts_and_unregisters() {
    let tasks = TaskManager::new();
    let (started_tx, started_rx) = oneshot::channel();

    let runner = {
        let tasks = Arc::clone(&tasks);
        tokio::spawn(async move {
            tasks
                .run_generation("t1", move |_stop| async move {
                    let _ = started_tx.send(());
                    std::future::pending::<()>().await
                })
                .await
        })
    };

    started_rx.await.unwrap();
    assert!(tasks.contains("t1"));

    runner.abort();
    let _ = runner.await;
    assert!(!tasks.contains("t1"));
}

#[tokio::test]
async fn test_concurrent_registrations_leave_one_entry() {
    let tasks = TaskManager::new();
    let mut handles = Vec::new();

    for _ in 0..32 {
        let tasks = Arc::clone(&tasks);
        handles.push(tokio::spawn(async move {
            let task = idle_task();
            tasks.register("shared", task.abort_handle());
            task
        }));
    }

    let mut spawned = Vec::new();
    for handle in handles {
        spawned.push(handle.await.unwrap());
    }
    assert_eq!(tasks.active_count(), 1);

    for task in spawned {
        task.abort();
    }
}

#[test]
fn test_stop_outcome_serialization() {
    let json = serde_json::to_string(&StopOutcome::NotRunning).unwrap();
    assert_eq!(json, "\"not_running\"");
}

// ============================================================================
// Grace period timing (paused clock)
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stop_returns_once_runner_finishes_within_grace() {
    let tasks = TaskManager::new();
    let (started_tx, started_rx) = oneshot::channel();
    let begin = tokio::time::Instant::now();

    // Ignores the stop flag but finishes on its own after one second
    let runner = tasks.run_generation("t1", move |_stop| async move {
        let _ = started_tx.send(());
        tokio::time::sleep(Duration::from_secs(1)).await;
        "done"
    });
    let stopper = async {
        started_rx.await.unwrap();
        tasks.stop("t1", Duration::from_secs(30)).await
    };

    let (outcome, stopped) = tokio::join!(runner, stopper);
    assert_eq!(stopped, StopOutcome::Stopped);
    assert_eq!(outcome, GenerationOutcome::Stopped("done"));
    assert!(begin.elapsed() < Duration::from_secs(2));
    assert_eq!(tasks.active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_waits_full_grace_before_hard_cancel() {
    let tasks = TaskManager::new();
    let (started_tx, started_rx) = oneshot::channel();

    let runner = {
        let tasks = Arc::clone(&tasks);
        tokio::spawn(async move {
            tasks
                .run_generation("t1", move |_stop| async move {
                    let _ = started_tx.send(());
                    std::future::pending::<()>().await
                })
                .await
        })
    };

    started_rx.await.unwrap();
    let begin = tokio::time::Instant::now();
    assert_eq!(
        tasks.stop("t1", Duration::from_secs(30)).await,
        StopOutcome::Cancelled
    );
    assert!(begin.elapsed() >= Duration::from_secs(30));
    assert_eq!(runner.await.unwrap(), GenerationOutcome::Cancelled);
    assert_eq!(tasks.active_count(), 0);
}
