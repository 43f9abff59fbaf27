use std::io;

use comms::{
    msg::{Command, Msg, Payload},
    specs::runtime::{AutoencoderSource, AutoencoderSpec, ModelSpec, RuntimeSpec},
};
use ndarray::Array4;
use sampler::{
    RemoteRuntime, SamplerErr,
    model::{Decoder, Runtime, VelocityModel},
};
use tokio::io as tokio_io;

fn spec() -> RuntimeSpec {
    RuntimeSpec {
        device: 1,
        allow_tf32: true,
        model: ModelSpec {
            variant: "SiT-S/2".to_string(),
            depth: 12,
            hidden_size: 384,
            num_heads: 6,
            patch_size: 2,
            input_size: 2,
            in_channels: 4,
            num_classes: 10,
            class_dropout_prob: 0.1,
            z_dims: vec![768],
            encoder_depth: 8,
            bn_momentum: 0.1,
            fused_attn: true,
            qk_norm: false,
            checkpoint: "exp/checkpoints/0000100.safetensors".into(),
            prefix: "ema.".to_string(),
        },
        autoencoder: AutoencoderSpec {
            variant: "f8d4".to_string(),
            downsample: 8,
            latent_channels: 4,
            source: AutoencoderSource::Standalone {
                checkpoint: "vae/sdvae.safetensors".into(),
            },
        },
    }
}

/// Serves one load, then answers forward passes with the negated latents and
/// decodes with images of ones, until the node hangs up.
async fn serve<R, W>(rx: R, tx: W, expected: RuntimeSpec) -> io::Result<usize>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let (mut rx, mut tx) = comms::channel(rx, tx);
    let mut buf: Vec<u32> = Vec::new();

    match rx.recv_into(&mut buf).await? {
        Msg::Control(Command::LoadModel(spec)) => assert_eq!(spec, expected),
        other => panic!("expected LoadModel, got {other:?}"),
    }

    let loaded = Command::Loaded {
        model_params: 33_000_000,
        projector_params: 2_000_000,
    };
    tx.send(&Msg::Control(loaded)).await?;

    let mut requests = 0;
    loop {
        let command = match rx.recv_into(&mut buf).await {
            Ok(Msg::Control(command)) => command,
            Ok(other) => panic!("expected a command, got {other:?}"),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(requests),
            Err(e) => return Err(e),
        };

        let latents = match rx.recv_into(&mut buf).await? {
            Msg::Data(Payload::Latents(values)) => values.to_vec(),
            other => panic!("expected latents, got {other:?}"),
        };

        requests += 1;
        match command {
            Command::Forward { shape, labels, .. } => {
                assert_eq!(labels.len(), shape[0]);
                let velocity: Vec<f32> = latents.iter().map(|v| -v).collect();
                tx.send(&Msg::Data(Payload::Velocity(&velocity))).await?;
            }
            Command::Decode { shape: [n, _, h, w] } => {
                let pixels = vec![1.0; n * 3 * h * 8 * w * 8];
                tx.send(&Msg::Data(Payload::Pixels(&pixels))).await?;
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}

#[tokio::test]
async fn remote_runtime_serves_forward_and_decode() {
    let (node, server) = tokio_io::duplex(1 << 16);
    let (srv_rx, srv_tx) = tokio_io::split(server);
    let server = tokio::spawn(serve(srv_rx, srv_tx, spec()));

    let (rx, tx) = tokio_io::split(node);
    let loaded = RemoteRuntime::new(rx, tx).load(spec()).await.unwrap();
    assert_eq!(loaded.model_params, 33_000_000);
    assert_eq!(loaded.projector_params, 2_000_000);

    let (mut model, mut decoder) = (loaded.model, loaded.decoder);

    let x = Array4::from_shape_fn((2, 4, 2, 2), |(i, c, h, w)| (i + c + h + w) as f32);
    let v = model.forward(&x, 0.5, &[3, 10]).await.unwrap();
    assert_eq!(v, x.mapv(|e| -e));

    let pixels = decoder.decode(&x).await.unwrap();
    assert_eq!(pixels.dim(), (2, 3, 16, 16));
    assert!(pixels.iter().all(|&p| p == 1.0));

    drop((model, decoder));
    assert_eq!(server.await.unwrap().unwrap(), 2);
}

#[tokio::test]
async fn runtime_errors_are_fatal() {
    let (node, server) = tokio_io::duplex(1 << 16);
    let (srv_rx, srv_tx) = tokio_io::split(server);

    let server = tokio::spawn(async move {
        let (mut rx, mut tx) = comms::channel(srv_rx, srv_tx);
        let mut buf: Vec<u32> = Vec::new();
        let _: Msg = rx.recv_into(&mut buf).await?;
        tx.send(&Msg::Err("checkpoint not found".into())).await
    });

    let (rx, tx) = tokio_io::split(node);
    let err = RemoteRuntime::new(rx, tx).load(spec()).await.err().unwrap();
    assert!(matches!(err, SamplerErr::Runtime(ref detail) if detail == "checkpoint not found"));

    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn short_answers_are_rejected() {
    let (node, server) = tokio_io::duplex(1 << 16);
    let (srv_rx, srv_tx) = tokio_io::split(server);

    let server = tokio::spawn(async move {
        let (mut rx, mut tx) = comms::channel(srv_rx, srv_tx);
        let mut buf: Vec<u32> = Vec::new();

        let _: Msg = rx.recv_into(&mut buf).await?;
        let loaded = Command::Loaded {
            model_params: 1,
            projector_params: 0,
        };
        tx.send(&Msg::Control(loaded)).await?;

        let _: Msg = rx.recv_into(&mut buf).await?;
        let _: Msg = rx.recv_into(&mut buf).await?;
        tx.send(&Msg::Data(Payload::Velocity(&[0.0; 3]))).await
    });

    let (rx, tx) = tokio_io::split(node);
    let mut loaded = RemoteRuntime::new(rx, tx).load(spec()).await.unwrap();

    let x = Array4::zeros((1, 4, 2, 2));
    let err = loaded.model.forward(&x, 1.0, &[0]).await.unwrap_err();
    assert!(matches!(err, SamplerErr::ShapeMismatch { what: "data/velocity", .. }));

    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn wrong_payload_kind_is_rejected() {
    let (node, server) = tokio_io::duplex(1 << 16);
    let (srv_rx, srv_tx) = tokio_io::split(server);

    let server = tokio::spawn(async move {
        let (mut rx, mut tx) = comms::channel(srv_rx, srv_tx);
        let mut buf: Vec<u32> = Vec::new();

        let _: Msg = rx.recv_into(&mut buf).await?;
        let loaded = Command::Loaded {
            model_params: 1,
            projector_params: 0,
        };
        tx.send(&Msg::Control(loaded)).await?;

        let _: Msg = rx.recv_into(&mut buf).await?;
        let _: Msg = rx.recv_into(&mut buf).await?;
        tx.send(&Msg::Data(Payload::Velocity(&[0.0; 16]))).await
    });

    let (rx, tx) = tokio_io::split(node);
    let mut loaded = RemoteRuntime::new(rx, tx).load(spec()).await.unwrap();

    let z = Array4::zeros((1, 4, 2, 2));
    let err = loaded.decoder.decode(&z).await.unwrap_err();
    assert!(matches!(
        err,
        SamplerErr::UnexpectedMessage {
            expected: "data/pixels",
            got: "data/velocity"
        }
    ));

    server.await.unwrap().unwrap();
}
