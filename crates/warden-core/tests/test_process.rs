use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use warden_core::{
    new_process, CancellationToken, CreateOptions, InMemorySink, Process, ProcessImplementation,
    ProcessInfo, Signal, CLEAN_TERMINATION,
};

const IMPLEMENTATIONS: [ProcessImplementation; 2] =
    [ProcessImplementation::Basic, ProcessImplementation::Blocking];

fn options(implementation: ProcessImplementation, args: &[&str]) -> CreateOptions {
    CreateOptions {
        implementation,
        ..CreateOptions::new(args.iter().copied())
    }
}

#[tokio::test]
#[cfg(unix)]
async fn test_successful_process() {
    for implementation in IMPLEMENTATIONS {
        let process = new_process(options(implementation, &["true"])).await.unwrap();
        let cancel = CancellationToken::new();

        assert_eq!(process.wait(&cancel).await.unwrap(), 0);
        // A second wait returns the same answer without blocking.
        assert_eq!(process.wait(&cancel).await.unwrap(), 0);

        let info = process.info().await;
        assert!(info.complete);
        assert!(!info.is_running);
        assert!(info.successful);
        assert_eq!(info.exit_code, 0);
        assert!(info.pid > 0);
        assert_eq!(info.host, "localhost");
        assert!(info.end_at >= info.start_at);
    }
}

#[tokio::test]
#[cfg(unix)]
async fn test_failed_process_reports_exit_code() {
    for implementation in IMPLEMENTATIONS {
        let process = new_process(options(implementation, &["sh", "-c", "exit 7"]))
            .await
            .unwrap();

        let err = process.wait(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.exit_code(), 7);

        let info = process.info().await;
        assert!(info.complete);
        assert!(!info.successful);
        assert_eq!(info.exit_code, 7);
    }
}

#[tokio::test]
#[cfg(unix)]
async fn test_spawn_failure_is_returned() {
    for implementation in IMPLEMENTATIONS {
        let err = new_process(options(implementation, &["/definitely/not/a/binary"]))
            .await
            .unwrap_err();
        assert!(matches!(err, warden_core::Error::Io(_)));

        let err = new_process(options(implementation, &[])).await.unwrap_err();
        assert!(err.is_validation());
    }
}

#[tokio::test]
#[cfg(unix)]
async fn test_complete_is_monotonic() {
    for implementation in IMPLEMENTATIONS {
        let process = new_process(options(implementation, &["sleep", "0.2"]))
            .await
            .unwrap();
        assert!(process.running().await);
        assert!(!process.complete().await);

        process.wait(&CancellationToken::new()).await.unwrap();
        for _ in 0..5 {
            assert!(process.complete().await);
            assert!(!process.running().await);
        }
    }
}

#[tokio::test]
#[cfg(unix)]
async fn test_wait_cancellation_does_not_stop_process() {
    for implementation in IMPLEMENTATIONS {
        let process = new_process(options(implementation, &["sleep", "10"]))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(process.wait(&cancel).await.unwrap_err().is_canceled());
        assert!(process.running().await);

        process.signal(Signal::Kill).await.unwrap();
        let err = process.wait(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.exit_code(), libc::SIGKILL);
    }
}

#[tokio::test]
#[cfg(unix)]
async fn test_timeout_kills_process() {
    for implementation in IMPLEMENTATIONS {
        let opts = CreateOptions {
            timeout: Some(Duration::from_millis(200)),
            ..options(implementation, &["sleep", "10"])
        };
        let process = new_process(opts).await.unwrap();

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            process.wait(&CancellationToken::new()),
        )
        .await
        .unwrap()
        .unwrap_err();
        assert!(matches!(err, warden_core::Error::Timeout { .. }));

        let info = process.info().await;
        assert!(info.timeout);
        assert!(!info.successful);
    }
}

#[tokio::test]
#[cfg(unix)]
async fn test_triggers_fire_once_in_order() {
    for implementation in IMPLEMENTATIONS {
        let process = new_process(options(implementation, &["sleep", "0.2"]))
            .await
            .unwrap();

        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            process
                .register_trigger(Box::new(move |info: &ProcessInfo| {
                    assert!(info.complete);
                    order.lock().push(n);
                }))
                .await
                .unwrap();
        }

        process.wait(&CancellationToken::new()).await.unwrap();
        assert_eq!(*order.lock(), vec![0, 1, 2]);

        let err = process
            .register_trigger(Box::new(|_: &ProcessInfo| {}))
            .await
            .unwrap_err();
        assert!(err.is_state());
        assert_eq!(order.lock().len(), 3);
    }
}

#[tokio::test]
#[cfg(unix)]
async fn test_signal_after_completion_fails() {
    for implementation in IMPLEMENTATIONS {
        let process = new_process(options(implementation, &["true"])).await.unwrap();
        process.wait(&CancellationToken::new()).await.unwrap();

        let err = process.signal(Signal::Terminate).await.unwrap_err();
        assert!(err.is_state());
        assert!(process
            .register_signal_trigger_id(CLEAN_TERMINATION)
            .await
            .unwrap_err()
            .is_state());
    }
}

#[tokio::test]
#[cfg(unix)]
async fn test_exit_is_recorded_while_output_drains() {
    for implementation in IMPLEMENTATIONS {
        let sink = Arc::new(InMemorySink::default());
        let mut opts = options(implementation, &["sh", "-c", "echo started; sleep 2 & exit 0"]);
        opts.output.output = Some(sink.clone());
        let process = new_process(opts).await.unwrap();

        // The shell is gone but the backgrounded sleep still holds stdout.
        tokio::time::sleep(Duration::from_millis(500)).await;
        let info = process.info().await;
        assert!(info.complete);
        assert!(!info.is_running);
        assert_eq!(info.exit_code, 0);
        assert!(process.signal(Signal::Terminate).await.unwrap_err().is_state());

        let code = tokio::time::timeout(
            Duration::from_secs(5),
            process.wait(&CancellationToken::new()),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(code, 0);
        assert_eq!(sink.lines(), vec!["started"]);
    }
}

#[tokio::test]
#[cfg(unix)]
async fn test_signal_trigger_can_swallow_signal() {
    for implementation in IMPLEMENTATIONS {
        let process = new_process(options(implementation, &["sleep", "10"]))
            .await
            .unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        process
            .register_signal_trigger(Arc::new(move |_: &ProcessInfo, sig: Signal| {
                counter.fetch_add(1, Ordering::SeqCst);
                sig == Signal::Hangup
            }))
            .await
            .unwrap();

        process.signal(Signal::Hangup).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(process.running().await);

        process.signal(Signal::Kill).await.unwrap();
        assert!(process.wait(&CancellationToken::new()).await.is_err());
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}

#[tokio::test]
#[cfg(unix)]
async fn test_clean_termination_interrupts_first() {
    let sink = Arc::new(InMemorySink::default());
    let mut output = warden_core::OutputOptions::default();
    output.output = Some(sink.clone());
    let opts = CreateOptions {
        output,
        ..CreateOptions::new(["sh", "./tests/fixtures/graceful.sh"])
    };
    let process = new_process(opts).await.unwrap();
    process
        .register_signal_trigger_id(CLEAN_TERMINATION)
        .await
        .unwrap();
    assert!(process
        .register_signal_trigger_id("no-such-trigger")
        .await
        .unwrap_err()
        .is_validation());

    tokio::time::sleep(Duration::from_millis(200)).await;
    process.signal(Signal::Terminate).await.unwrap();

    let code = tokio::time::timeout(
        Duration::from_secs(5),
        process.wait(&CancellationToken::new()),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(code, 0);
    assert_eq!(sink.lines(), vec!["ready", "interrupted"]);
}

#[tokio::test]
#[cfg(unix)]
async fn test_output_and_input() {
    for implementation in IMPLEMENTATIONS {
        let sink = Arc::new(InMemorySink::default());
        let mut opts = options(implementation, &["sh", "-c", "cat; echo done >&2"]);
        opts.standard_input = Some(b"from stdin\n".to_vec());
        opts.output.output = Some(sink.clone());
        opts.output.send_error_to_output = true;

        let process = new_process(opts).await.unwrap();
        process.wait(&CancellationToken::new()).await.unwrap();

        assert_eq!(sink.lines(), vec!["from stdin", "done"]);
    }
}

#[tokio::test]
#[cfg(unix)]
async fn test_environment_and_directory() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(InMemorySink::default());

    let mut opts = CreateOptions::new(["sh", "-c", "echo $GREETING; pwd"]);
    opts.environment.insert("GREETING".to_owned(), "hi".to_owned());
    opts.working_directory = Some(dir.path().to_path_buf());
    opts.output.output = Some(sink.clone());

    let process = new_process(opts).await.unwrap();
    process.wait(&CancellationToken::new()).await.unwrap();

    let lines = sink.lines();
    assert_eq!(lines[0], "hi");
    assert_eq!(
        std::fs::canonicalize(&lines[1]).unwrap(),
        std::fs::canonicalize(dir.path()).unwrap()
    );
}

#[tokio::test]
#[cfg(unix)]
async fn test_respawn_is_independent() {
    for implementation in IMPLEMENTATIONS {
        let process = new_process(options(implementation, &["true"])).await.unwrap();
        process.tag("first").await;
        process.wait(&CancellationToken::new()).await.unwrap();

        let again = process.respawn().await.unwrap();
        assert_ne!(again.id(), process.id());
        assert_eq!(again.get_tags().await, vec!["first"]);
        again.wait(&CancellationToken::new()).await.unwrap();

        again.reset_tags().await;
        assert!(again.get_tags().await.is_empty());
        assert_eq!(process.get_tags().await, vec!["first"]);
    }
}

#[tokio::test]
#[cfg(unix)]
async fn test_tags_are_a_set() {
    for implementation in IMPLEMENTATIONS {
        let process = new_process(options(implementation, &["true"])).await.unwrap();
        process.tag("a").await;
        process.tag("b").await;
        process.tag("a").await;
        assert_eq!(process.get_tags().await, vec!["a", "b"]);
        assert_eq!(process.info().await.options.tags, vec!["a", "b"]);
    }
}
