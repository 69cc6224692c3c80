use std::{num::NonZeroUsize, path::Path, sync::Arc, time::Duration};

use comms::specs::{
    BlockSpec, CheckpointSpec, ComputeSpec, InitSpec, RetrySpec, ServerSpec, WorkerSpec,
};
use futures::future;
use parameter_server::{CheckpointManager, FsPersistence, ShutdownReport};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

fn server_spec(dir: &Path, target_step: u64) -> ServerSpec {
    ServerSpec {
        blocks: vec![
            BlockSpec {
                id: "w".into(),
                len: NonZeroUsize::new(8).unwrap(),
                init: InitSpec::Uniform { low: -1.0, high: 1.0 },
            },
            BlockSpec {
                id: "b".into(),
                len: NonZeroUsize::new(1).unwrap(),
                init: InitSpec::Const { value: 0.0 },
            },
        ],
        target_step,
        checkpoint: Some(CheckpointSpec {
            dir: dir.to_path_buf(),
            every_secs: None,
            every_steps: Some(10),
            keep_last: NonZeroUsize::new(2),
        }),
        grace_period_ms: 5_000,
        seed: Some(7),
    }
}

fn worker_spec() -> WorkerSpec {
    WorkerSpec {
        blocks: vec!["w".into(), "b".into()],
        retry: RetrySpec {
            max_attempts: 20,
            initial_backoff_ms: 5,
            max_backoff_ms: 50,
            multiplier: 2.0,
        },
        compute: ComputeSpec {
            target: 0.0,
            rate: 0.1,
            delay_ms: 1,
        },
        max_steps: None,
    }
}

async fn train(spec: ServerSpec, workers: usize) -> ShutdownReport {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let ps = tokio::spawn(node::serve_ps(listener, spec, CancellationToken::new()));

    let agents = (0..workers)
        .map(|index| node::run_worker(addr, index, worker_spec(), CancellationToken::new()));
    for session in future::join_all(agents).await {
        session.unwrap();
    }

    ps.await.unwrap().unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_train_then_resume_from_checkpoint() {
    let dir = tempfile::tempdir().unwrap();

    let report = train(server_spec(dir.path(), 40), 2).await;
    assert_eq!(report.global_step, 40);
    assert_eq!(report.stopped, [0, 1]);

    let persistence = Arc::new(FsPersistence::new(dir.path()));
    let checkpoint = CheckpointManager::recover(persistence).await.unwrap().unwrap();
    assert_eq!(checkpoint.global_step, 40);

    let report = train(server_spec(dir.path(), 60), 2).await;
    assert_eq!(report.global_step, 60);
    assert_eq!(report.checkpoint, Some(60));

    let persistence = Arc::new(FsPersistence::new(dir.path()));
    let checkpoint = CheckpointManager::recover(persistence).await.unwrap().unwrap();
    assert_eq!(checkpoint.global_step, 60);
    let versions: u64 = checkpoint.blocks.values().map(|b| b.version()).sum();
    assert_eq!(versions, 60);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_interrupted_ps_stops_early() {
    let dir = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let shutdown = CancellationToken::new();

    let ps = tokio::spawn(node::serve_ps(
        listener,
        server_spec(dir.path(), 1_000_000),
        shutdown.clone(),
    ));

    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.cancel();

    let report = ps.await.unwrap().unwrap();
    assert_eq!(report.global_step, 0);
    assert!(report.stopped.is_empty());
}

#[tokio::test]
async fn test_recovered_blocks_must_match_the_configuration() {
    let dir = tempfile::tempdir().unwrap();
    train(server_spec(dir.path(), 10), 1).await;

    let mut spec = server_spec(dir.path(), 20);
    spec.blocks.pop();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let err = node::serve_ps(listener, spec, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, node::NodeErr::Invalid(_)));
}
