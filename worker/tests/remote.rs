use std::{sync::Arc, time::Duration};

use comms::specs::RetrySpec;
use futures::future;
use parameter_server::{
    BlockValue, LifecycleConfig, LifecycleCoordinator, ParameterServer, ParameterStore,
};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
};
use tokio_util::sync::CancellationToken;
use worker::{AgentConfig, ClientErr, ParameterClient, Quadratic, RemoteClient, WorkerAgent};

fn retry() -> RetrySpec {
    RetrySpec {
        max_attempts: 3,
        initial_backoff_ms: 5,
        max_backoff_ms: 20,
        multiplier: 2.0,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_workers_train_over_tcp_until_target() {
    const TARGET: u64 = 60;
    const WORKERS: usize = 3;

    let blocks = [("w".to_string(), BlockValue::new(vec![0.0; 16], 0))];
    let store = ParameterStore::new(blocks, 0).unwrap();

    let lifecycle = LifecycleConfig {
        target_step: TARGET,
        grace_period: Duration::from_secs(5),
    };
    let coordinator = Arc::new(LifecycleCoordinator::new(store.clone(), None, lifecycle));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = ParameterServer::new(store.clone(), Arc::clone(&coordinator));
    let serving = tokio::spawn(server.serve(listener));

    let mut agents = Vec::new();
    for task_index in 0..WORKERS {
        let mut client = RemoteClient::new(addr, task_index);
        client.connect().await.unwrap();

        let config = AgentConfig {
            task_index,
            blocks: vec!["w".into()],
            retry: retry(),
            max_steps: None,
        };
        let compute = Quadratic::new(1.0, 0.01, Duration::from_millis(1));
        let agent = WorkerAgent::new(config, client, compute, CancellationToken::new());
        agents.push(tokio::spawn(agent.run()));
    }

    let report = coordinator.run().await.unwrap();
    assert_eq!(report.global_step, TARGET);
    assert!(report.abandoned.is_empty());

    for session in future::join_all(agents).await {
        session.unwrap().unwrap();
    }

    serving.await.unwrap().unwrap();
    assert_eq!(store.global_step(), TARGET);
    assert_eq!(store.pull(&["w"]).unwrap()["w"].version(), TARGET);
}

#[tokio::test]
async fn test_unreachable_server_is_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut client = RemoteClient::new(addr, 0);
    let err = client.pull(&["w".to_string()]).await.unwrap_err();

    assert!(err.is_transient());
    assert!(matches!(err, ClientErr::Io(_)));
    assert!(!client.is_connected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_connection_does_not_stop_the_server() {
    const TARGET: u64 = 5;

    let blocks = [("w".to_string(), BlockValue::new(vec![0.0; 4], 0))];
    let store = ParameterStore::new(blocks, 0).unwrap();

    let lifecycle = LifecycleConfig {
        target_step: TARGET,
        grace_period: Duration::from_secs(5),
    };
    let coordinator = Arc::new(LifecycleCoordinator::new(store.clone(), None, lifecycle));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = ParameterServer::new(store.clone(), Arc::clone(&coordinator));
    let serving = tokio::spawn(server.serve(listener));

    // A frame of an unknown kind, then hang up.
    let mut garbage = TcpStream::connect(addr).await.unwrap();
    let mut frame = 4u64.to_be_bytes().to_vec();
    frame.extend_from_slice(&42u32.to_be_bytes());
    garbage.write_all(&frame).await.unwrap();
    drop(garbage);

    let config = AgentConfig {
        task_index: 0,
        blocks: vec!["w".into()],
        retry: retry(),
        max_steps: None,
    };
    let client = RemoteClient::new(addr, 0);
    let compute = Quadratic::new(1.0, 0.1, Duration::ZERO);
    let agent = WorkerAgent::new(config, client, compute, CancellationToken::new());
    let agent = tokio::spawn(agent.run());

    let report = coordinator.run().await.unwrap();
    assert_eq!(report.global_step, TARGET);

    agent.await.unwrap().unwrap();
    serving.await.unwrap().unwrap();
}
