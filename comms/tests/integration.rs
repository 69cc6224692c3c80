use comms::msg::{BlockMeta, Command, DeltaMeta, Msg, Payload, RemoteErr};
use tokio::io;

const SIZE: usize = 4096;

#[tokio::test]
async fn send_recv_control() {
    let (one, two) = io::duplex(SIZE);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);

    let msg = Msg::Control(Command::Pull {
        ids: vec!["w1".into(), "b1".into()],
    });
    tx.send(&msg).await.unwrap();

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);

    let mut buf = Vec::new();
    let got: Msg = rx.recv_into(&mut buf).await.unwrap();

    let Msg::Control(Command::Pull { ids }) = got else {
        panic!("unexpected msg: {got:?}");
    };
    assert_eq!(ids, ["w1", "b1"]);
}

#[tokio::test]
async fn send_recv_data_in_sequence() {
    let (one, two) = io::duplex(SIZE);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);

    let delta = [0.5, 0.25];
    let meta = DeltaMeta {
        id: "layer.odd_name".into(),
        base_version: 3,
        seq: 9,
    };
    tx.send(&Msg::Data(Payload::Delta { meta, delta: &delta }))
        .await
        .unwrap();

    let values = [1.0, 2.0, 3.0];
    let meta = vec![
        BlockMeta {
            id: "a".into(),
            version: 1,
            len: 1,
        },
        BlockMeta {
            id: "b".into(),
            version: 4,
            len: 2,
        },
    ];
    tx.send(&Msg::Data(Payload::Blocks { meta, values: &values }))
        .await
        .unwrap();

    tx.send(&Msg::Err(RemoteErr::StepLimitReached { limit: 100 }))
        .await
        .unwrap();

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);
    let mut buf = Vec::new();

    match rx.recv_into(&mut buf).await.unwrap() {
        Msg::Data(Payload::Delta { meta, delta: got }) => {
            assert_eq!(meta.id, "layer.odd_name");
            assert_eq!(meta.seq, 9);
            assert_eq!(got, &delta);
        }
        other => panic!("unexpected msg: {other:?}"),
    }

    match rx.recv_into(&mut buf).await.unwrap() {
        Msg::Data(Payload::Blocks { meta, values: got }) => {
            assert_eq!(meta.len(), 2);
            assert_eq!(meta[1].version, 4);
            assert_eq!(got, &values);
        }
        other => panic!("unexpected msg: {other:?}"),
    }

    match rx.recv_into(&mut buf).await.unwrap() {
        Msg::Err(RemoteErr::StepLimitReached { limit }) => assert_eq!(limit, 100),
        other => panic!("unexpected msg: {other:?}"),
    }
}

#[tokio::test]
async fn closed_stream_is_an_error() {
    let (one, two) = io::duplex(SIZE);
    drop(one);

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);
    let mut buf = Vec::new();

    let err = rx.recv_into::<Msg>(&mut buf).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
}
