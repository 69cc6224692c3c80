#![cfg(test)]

use std::{sync::Arc, time::Duration};

use comms::{
    AgentState, OnoReceiver, OnoSender,
    msg::{Command, DeltaMeta, Msg, Payload, RemoteErr},
};
use tokio::io::{self, DuplexStream, ReadHalf, WriteHalf};

use crate::{
    lifecycle::{LifecycleConfig, LifecycleCoordinator, LifecycleState},
    service::ParameterServer,
    storage::{BlockValue, ParameterStore},
};

type Rx = OnoReceiver<ReadHalf<DuplexStream>>;
type Tx = OnoSender<WriteHalf<DuplexStream>>;

fn channel_pair() -> ((Rx, Tx), (Rx, Tx)) {
    let (stream1, stream2) = io::duplex(4096);
    let (rx1, tx1) = io::split(stream1);
    let (rx2, tx2) = io::split(stream2);
    let chan1 = comms::channel(rx1, tx1);
    let chan2 = comms::channel(rx2, tx2);
    (chan1, chan2)
}

fn setup(target_step: u64) -> (ParameterStore, Arc<LifecycleCoordinator>, ParameterServer) {
    let blocks = [("w1".to_string(), BlockValue::new(vec![10.0, 0.0], 3))];
    let store = ParameterStore::new(blocks, 0).unwrap();

    let config = LifecycleConfig {
        target_step,
        grace_period: Duration::from_secs(2),
    };
    let coordinator = Arc::new(LifecycleCoordinator::new(store.clone(), None, config));
    let server = ParameterServer::new(store.clone(), Arc::clone(&coordinator));
    (store, coordinator, server)
}

async fn push(rx: &mut Rx, tx: &mut Tx, seq: u64, delta: &[f32]) -> Command {
    let meta = DeltaMeta {
        id: "w1".into(),
        base_version: 3,
        seq,
    };
    tx.send(&Msg::Data(Payload::Delta { meta, delta })).await.unwrap();

    let mut buf = Vec::new();
    match rx.recv_into(&mut buf).await.unwrap() {
        Msg::Control(cmd) => cmd,
        other => panic!("unexpected reply {other:?}"),
    }
}

#[tokio::test]
async fn test_pull_push_and_replayed_retry() {
    let ((mut rx, mut tx), (sv_rx, sv_tx)) = channel_pair();
    let (store, _coordinator, mut server) = setup(100);
    server.spawn(sv_rx, sv_tx);

    let connect = Command::Connect {
        task_index: 0,
        incarnation: 7,
    };
    tx.send(&Msg::Control(connect)).await.unwrap();

    let pull = Command::Pull {
        ids: vec!["w1".into()],
    };
    tx.send(&Msg::Control(pull)).await.unwrap();

    let mut buf = Vec::new();
    match rx.recv_into(&mut buf).await.unwrap() {
        Msg::Data(Payload::Blocks { meta, values }) => {
            assert_eq!(meta[0].version, 3);
            assert_eq!(values, [10.0, 0.0]);
        }
        other => panic!("unexpected reply {other:?}"),
    }

    let reply = push(&mut rx, &mut tx, 1, &[1.0, 1.0]).await;
    assert_eq!(reply, Command::Pushed { version: 4, stop: false });

    // The same sequence number again is answered without applying it.
    let reply = push(&mut rx, &mut tx, 1, &[1.0, 1.0]).await;
    assert_eq!(reply, Command::Pushed { version: 4, stop: false });

    let reply = push(&mut rx, &mut tx, 2, &[2.0, 2.0]).await;
    assert_eq!(reply, Command::Pushed { version: 5, stop: false });

    assert_eq!(store.pull(&["w1"]).unwrap()["w1"].values(), [13.0, 3.0]);
    assert_eq!(store.global_step(), 2);

    tx.send(&Msg::Control(Command::Disconnect)).await.unwrap();
    assert!(matches!(
        rx.recv_into(&mut buf).await.unwrap(),
        Msg::Control(Command::Disconnect)
    ));

    server.run().await.unwrap();
}

#[tokio::test]
async fn test_errors_are_reported() {
    let ((mut rx, mut tx), (sv_rx, sv_tx)) = channel_pair();
    let (store, _coordinator, mut server) = setup(100);
    server.spawn(sv_rx, sv_tx);

    let mut buf = Vec::new();

    tx.send(&Msg::Control(Command::Pull { ids: vec![] })).await.unwrap();
    assert!(matches!(
        rx.recv_into(&mut buf).await.unwrap(),
        Msg::Err(RemoteErr::Protocol { .. })
    ));

    let connect = Command::Connect {
        task_index: 1,
        incarnation: 1,
    };
    tx.send(&Msg::Control(connect)).await.unwrap();

    let meta = DeltaMeta {
        id: "w1".into(),
        base_version: 0,
        seq: 1,
    };
    let delta = [1.0; 3];
    tx.send(&Msg::Data(Payload::Delta { meta, delta: &delta })).await.unwrap();
    assert!(matches!(
        rx.recv_into(&mut buf).await.unwrap(),
        Msg::Err(RemoteErr::SizeMismatch {
            expected: 2,
            got: 3,
            ..
        })
    ));

    let pull = Command::Pull {
        ids: vec!["missing".into()],
    };
    tx.send(&Msg::Control(pull)).await.unwrap();
    assert!(matches!(
        rx.recv_into(&mut buf).await.unwrap(),
        Msg::Err(RemoteErr::UnknownParameter { id }) if id == "missing"
    ));

    assert_eq!(store.global_step(), 0);

    drop(tx);
    drop(rx);
    server.run().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_target_step_stops_connected_worker() {
    let ((mut rx, mut tx), (sv_rx, sv_tx)) = channel_pair();
    let (store, coordinator, mut server) = setup(2);
    server.spawn(sv_rx, sv_tx);

    let connect = Command::Connect {
        task_index: 0,
        incarnation: 1,
    };
    tx.send(&Msg::Control(connect)).await.unwrap();

    let lifecycle = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.run().await })
    };

    let reply = push(&mut rx, &mut tx, 1, &[1.0, 0.0]).await;
    assert!(matches!(reply, Command::Pushed { version: 4, .. }));
    let reply = push(&mut rx, &mut tx, 2, &[1.0, 0.0]).await;
    assert!(matches!(reply, Command::Pushed { version: 5, .. }));

    let mut state = coordinator.subscribe();
    state
        .wait_for(|s| *s != LifecycleState::Running)
        .await
        .unwrap();

    // Past the target nothing is applied anymore.
    let meta = DeltaMeta {
        id: "w1".into(),
        base_version: 5,
        seq: 3,
    };
    let delta = [1.0, 0.0];
    tx.send(&Msg::Data(Payload::Delta { meta, delta: &delta })).await.unwrap();

    let mut buf = Vec::new();
    assert!(matches!(
        rx.recv_into(&mut buf).await.unwrap(),
        Msg::Err(RemoteErr::StepLimitReached { limit: 2 })
    ));

    let pull = Command::Pull {
        ids: vec!["w1".into()],
    };
    tx.send(&Msg::Control(pull)).await.unwrap();
    assert!(matches!(
        rx.recv_into(&mut buf).await.unwrap(),
        Msg::Control(Command::Stop)
    ));

    tx.send(&Msg::Control(Command::Disconnect)).await.unwrap();

    let report = lifecycle.await.unwrap().unwrap();
    assert_eq!(report.global_step, 2);
    assert_eq!(report.stopped, [0]);
    assert!(report.abandoned.is_empty());
    assert_eq!(store.global_step(), 2);
    assert_eq!(coordinator.state(), LifecycleState::Stopped);

    server.run().await.unwrap();
}

#[tokio::test]
async fn test_late_agent_is_abandoned() {
    let blocks = [("b".to_string(), BlockValue::new(vec![0.0], 0))];
    let store = ParameterStore::new(blocks, 0).unwrap();

    let config = LifecycleConfig {
        target_step: 1,
        grace_period: Duration::from_millis(50),
    };
    let coordinator = LifecycleCoordinator::new(store.clone(), None, config);

    let (stopped_tx, stopped_rx) = tokio::sync::watch::channel(AgentState::Pushing);
    let (_stuck_tx, stuck_rx) = tokio::sync::watch::channel(AgentState::Computing);
    coordinator.register_agent(0, stopped_rx);
    coordinator.register_agent(1, stuck_rx);

    store.push("b", &[1.0], 0).unwrap();

    let token = coordinator.stop_token();
    tokio::spawn(async move {
        token.cancelled().await;
        stopped_tx.send_replace(AgentState::Stopped);
    });

    let report = coordinator.run().await.unwrap();
    assert_eq!(report.stopped, [0]);
    assert_eq!(report.abandoned, [1]);
    assert_eq!(report.checkpoint, None);
}

#[tokio::test]
async fn test_shutdown_request_stops_early() {
    let (store, coordinator, _server) = setup(1_000);
    store.push("w1", &[1.0, 1.0], 3).unwrap();

    coordinator.shutdown();
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.global_step, 1);
    assert!(coordinator.stop_token().is_cancelled());
}
