// tests/background_mode.rs
#![cfg(unix)]

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use procstream::{
    Background, LaunchConfig, ProcstreamError, ReadOnlyProcess, create_background, line_callback,
};
use procstream_test_utils::{
    BrokenOutputLauncher, LineRecorder, StallingLauncher, init_tracing, shell, with_timeout,
};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn delivers_lines_in_order() -> TestResult {
    init_tracing();
    let recorder = LineRecorder::new();
    let sh = create_background(shell(), Some(recorder.callback()));

    let returned = sh.execute("-c 'for i in 1 2 3 4 5; do echo line$i; done'").await?;
    assert_eq!(returned, None);

    assert_eq!(with_timeout(sh.wait_for()).await?, Some(0));
    assert_eq!(
        recorder.lines(),
        vec!["line1", "line2", "line3", "line4", "line5"]
    );

    Ok(())
}

#[tokio::test]
async fn execute_returns_while_process_runs() -> TestResult {
    init_tracing();
    let sh = create_background(shell(), None);

    let started = Instant::now();
    assert_eq!(sh.execute("-c 'exec sleep 30'").await?, None);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(sh.is_running());
    assert!(sh.process().is_some_and(|p| p.is_alive()));

    with_timeout(sh.close()).await?;
    assert!(!sh.is_running());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_mid_read_is_bounded_and_kills() -> TestResult {
    init_tracing();
    let recorder = LineRecorder::new();
    let sh = create_background(shell(), Some(recorder.callback()));

    sh.execute("-c 'echo ready; exec sleep 30'").await?;
    assert!(recorder.wait_for_lines(1, Duration::from_secs(5)).await);

    let started = Instant::now();
    with_timeout(sh.close()).await?;
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(with_timeout(sh.wait_for()).await?, Some(137));
    assert_eq!(recorder.lines(), vec!["ready"]);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn no_callbacks_after_close_returns() -> TestResult {
    init_tracing();
    let recorder = LineRecorder::new();
    let sh = create_background(shell(), Some(recorder.callback()));

    sh.execute("-c 'while :; do echo tick; sleep 0.01; done'").await?;
    assert!(recorder.wait_for_lines(3, Duration::from_secs(5)).await);

    with_timeout(sh.close()).await?;
    let seen = recorder.len();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(recorder.len(), seen);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_execute_is_rejected_while_running() -> TestResult {
    init_tracing();
    let recorder = LineRecorder::new();
    let sh = create_background(shell(), Some(recorder.callback()));

    sh.execute("-c 'echo first; exec sleep 30'").await?;
    let first_run = sh.process().map(|p| p.run());

    assert_eq!(sh.execute("-c 'echo second'").await?, None);
    assert_eq!(sh.process().map(|p| p.run()), first_run);

    with_timeout(sh.close()).await?;

    sh.execute("-c 'echo again'").await?;
    assert_eq!(with_timeout(sh.wait_for()).await?, Some(0));
    assert_eq!(recorder.lines().last().map(String::as_str), Some("again"));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_close_is_safe() -> TestResult {
    init_tracing();
    let sh = create_background(shell(), None);
    sh.execute("-c 'exec sleep 30'").await?;

    let other = sh.clone();
    let (a, b) = tokio::join!(sh.close(), other.close());
    a?;
    b?;
    sh.close().await?;

    assert!(!sh.is_running());
    assert!(sh.process().is_none());

    Ok(())
}

#[tokio::test]
async fn missing_executable_fails_to_start() -> TestResult {
    init_tracing();
    let missing = create_background("/nonexistent/procstream-missing-binary", None);

    let err = missing.execute("").await.unwrap_err();
    assert!(matches!(err, ProcstreamError::Start { .. }), "got {err:?}");
    assert!(!missing.is_running());
    assert_eq!(missing.wait_for().await?, None);

    Ok(())
}

#[tokio::test]
async fn output_without_callback_is_discarded() -> TestResult {
    init_tracing();
    let sh = create_background(shell(), None);

    sh.execute("-c 'echo ignored; exit 2'").await?;
    assert_eq!(with_timeout(sh.wait_for()).await?, Some(2));
    assert!(sh.is_done());

    Ok(())
}

#[tokio::test]
async fn panicking_callback_surfaces_on_wait() -> TestResult {
    init_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let sh = create_background(
        shell(),
        Some(line_callback(move |line| {
            counter.fetch_add(1, Ordering::SeqCst);
            panic!("callback rejected {line}");
        })),
    );

    sh.execute("-c 'echo boom; echo never'").await?;

    let err = with_timeout(sh.wait_for()).await.unwrap_err();
    assert!(matches!(err, ProcstreamError::Worker(_)), "got {err:?}");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The failure is handed out once.
    assert_eq!(with_timeout(sh.wait_for()).await?, Some(0));
    with_timeout(sh.close()).await?;

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_concurrent_close_waits_for_the_callback() -> TestResult {
    init_tracing();
    let started = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));
    let (s, c) = (Arc::clone(&started), Arc::clone(&completed));
    let sh = create_background(
        shell(),
        Some(line_callback(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(400));
            c.fetch_add(1, Ordering::SeqCst);
        })),
    );

    sh.execute("-c 'echo slow; exec sleep 30'").await?;
    with_timeout(async {
        while started.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    // The first closer claims the worker; the second must still wait for it.
    let first = sh.clone();
    let first = tokio::spawn(async move { first.close().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    with_timeout(sh.close()).await?;
    assert_eq!(
        completed.load(Ordering::SeqCst),
        started.load(Ordering::SeqCst)
    );

    with_timeout(first).await??;
    assert_eq!(with_timeout(sh.wait_for()).await?, Some(137));
    assert!(sh.process().is_none());
    assert_eq!(started.load(Ordering::SeqCst), 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wait_for_during_close_reports_the_kill() -> TestResult {
    init_tracing();
    let sh = create_background(shell(), None);

    for _ in 0..20 {
        sh.execute("-c 'exec sleep 30'").await?;

        let closer = sh.clone();
        let close = tokio::spawn(async move { closer.close().await });
        with_timeout(async {
            while sh.process().is_some() {
                tokio::task::yield_now().await;
            }
        })
        .await;

        assert_eq!(with_timeout(sh.wait_for()).await?, Some(137));
        with_timeout(close).await??;
    }

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn read_failure_is_raised_once_by_wait_for() -> TestResult {
    init_tracing();
    let recorder = LineRecorder::new();
    let sh = ReadOnlyProcess::with_launcher(
        shell(),
        LaunchConfig::default(),
        Background::new(Some(recorder.callback())),
        BrokenOutputLauncher::new(&["first"]),
    );

    sh.execute("-c 'exec sleep 30'").await?;

    let err = with_timeout(sh.wait_for()).await.unwrap_err();
    assert!(matches!(err, ProcstreamError::Read(_)), "got {err:?}");
    assert_eq!(recorder.lines(), vec!["first"]);

    // The worker released the run after the failure.
    assert_eq!(with_timeout(sh.wait_for()).await?, Some(137));
    assert!(sh.process().is_none());
    assert!(!sh.is_running());

    Ok(())
}

#[tokio::test]
async fn failure_of_a_closed_run_does_not_leak_into_the_next() -> TestResult {
    init_tracing();
    let sh = create_background(
        shell(),
        Some(line_callback(|line| {
            if line == "boom" {
                panic!("callback rejected {line}");
            }
        })),
    );

    sh.execute("-c 'echo boom'").await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    with_timeout(sh.close()).await?;

    sh.execute("-c 'echo fine'").await?;
    assert_eq!(with_timeout(sh.wait_for()).await?, Some(0));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_while_starting_is_not_lost() -> TestResult {
    init_tracing();
    let (launcher, launching) = StallingLauncher::new(Duration::from_millis(150));
    let sh = ReadOnlyProcess::with_launcher(
        shell(),
        LaunchConfig::default(),
        Background::new(None),
        launcher,
    );

    let closer = sh.clone();
    let close = tokio::spawn(async move {
        let _ = launching.await;
        closer.close().await
    });

    sh.execute("-c 'exec sleep 30'").await?;
    with_timeout(close).await??;

    assert!(!sh.is_running());
    assert!(sh.process().is_none());
    assert_eq!(with_timeout(sh.wait_for()).await?, Some(137));

    Ok(())
}
