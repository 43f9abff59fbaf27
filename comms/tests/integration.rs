use comms::msg::{Command, Msg, Payload};
use tokio::io;

#[tokio::test]
async fn send_recv_control() {
    const SIZE: usize = 128;

    let (one, two) = io::duplex(SIZE);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);

    let msg = Msg::Control(Command::Barrier { seq: 7 });
    tx.send(&msg).await.unwrap();

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);

    let mut buf: Vec<u32> = Vec::new();
    match rx.recv_into(&mut buf).await.unwrap() {
        Msg::Control(Command::Barrier { seq }) => assert_eq!(seq, 7),
        other => panic!("unexpected msg: {other:?}"),
    }
}

#[tokio::test]
async fn send_recv_payloads_in_order() {
    const SIZE: usize = 4096;

    let (one, two) = io::duplex(SIZE);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);

    let (rx, tx2) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx2);

    let latents: Vec<f32> = (0..64).map(|i| i as f32 * 0.5).collect();
    tx.send(&Msg::Data(Payload::Latents(&latents))).await.unwrap();
    tx.send(&Msg::Err("boom".into())).await.unwrap();

    let mut buf: Vec<f32> = Vec::new();
    match rx.recv_into(&mut buf).await.unwrap() {
        Msg::Data(Payload::Latents(got)) => assert_eq!(got, latents.as_slice()),
        other => panic!("unexpected msg: {other:?}"),
    }

    match rx.recv_into(&mut buf).await.unwrap() {
        Msg::Err(detail) => assert_eq!(detail, "boom"),
        other => panic!("unexpected msg: {other:?}"),
    }
}

#[tokio::test]
async fn closed_link_is_an_error() {
    let (one, two) = io::duplex(64);
    drop(one);

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);

    let mut buf: Vec<u32> = Vec::new();
    assert!(rx.recv_into::<Msg, _>(&mut buf).await.is_err());
}

#[tokio::test]
async fn oversized_frame_header_is_rejected() {
    use tokio::io::AsyncWriteExt;

    let (mut raw, two) = io::duplex(64);
    let bogus = (comms::MAX_FRAME_LEN as u64 + 1).to_be_bytes();
    raw.write_all(&bogus).await.unwrap();

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);

    let mut buf: Vec<u32> = Vec::new();
    let err = rx.recv_into::<Msg, _>(&mut buf).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    assert!(buf.is_empty());
}
