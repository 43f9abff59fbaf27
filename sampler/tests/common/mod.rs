#![allow(dead_code)]

use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use comms::specs::runtime::RuntimeSpec;
use ndarray::Array4;
use safetensors::{Dtype, tensor::TensorView};
use sampler::{
    Result, SampleOptions, SamplerErr,
    model::{Decoder, Loaded, Runtime, VelocityModel},
};

pub const TRAIN_STEPS: &str = "100";
pub const RESOLUTION: usize = 16;
pub const NUM_CLASSES: usize = 10;

/// Writes a safetensors file holding `tensors`, given as f32 values.
pub fn write_tensors(path: &Path, tensors: &[(&str, Vec<usize>, Vec<f32>)]) {
    let bytes: Vec<Vec<u8>> = tensors
        .iter()
        .map(|(_, _, values)| values.iter().flat_map(|v| v.to_le_bytes()).collect())
        .collect();

    let views: Vec<(String, TensorView)> = tensors
        .iter()
        .zip(&bytes)
        .map(|((name, shape, _), data)| {
            let view = TensorView::new(Dtype::F32, shape.clone(), data).unwrap();
            (name.to_string(), view)
        })
        .collect();

    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, safetensors::serialize(views, &None).unwrap()).unwrap();
}

/// Creates an experiment with a bundled autoencoder under `root`.
///
/// # Returns
/// The experiment's directory.
pub fn bundled_experiment(root: &Path) -> PathBuf {
    let exp = root.join("sit-s-test");
    fs::create_dir_all(&exp).unwrap();

    let args = format!(
        r#"{{"resolution": {RESOLUTION}, "vae": "f8d4", "model": "SiT-S/2", "num_classes": {NUM_CLASSES}, "enc_type": "dinov2-vit-b"}}"#
    );
    fs::write(exp.join("args.json"), args).unwrap();

    write_tensors(
        &exp.join("checkpoints/0000100.safetensors"),
        &[
            ("ema.x_embedder.proj.weight", vec![2, 2], vec![0.1, 0.2, 0.3, 0.4]),
            ("ema.bn.running_var", vec![4], vec![4.0, 4.0, 1.0, 1.0]),
            ("ema.bn.running_mean", vec![4], vec![0.0, 0.5, 0.0, -0.5]),
            ("vae.decoder.conv_out.weight", vec![3], vec![1.0, 1.0, 1.0]),
        ],
    );

    exp
}

pub fn options(exp: &Path, sample_dir: &Path, requested: usize, batch_size: usize) -> SampleOptions {
    SampleOptions {
        sample_dir: sample_dir.to_path_buf(),
        exp_path: Some(exp.to_path_buf()),
        train_steps: Some(TRAIN_STEPS.to_string()),
        batch_size: NonZeroUsize::new(batch_size).unwrap(),
        num_fid_samples: requested,
        num_steps: 2,
        ..SampleOptions::default()
    }
}

/// A runtime whose model predicts zero velocity and whose decoder paints each
/// image with the first element of its latent.
#[derive(Clone, Default)]
pub struct FakeRuntime {
    pub loads: Arc<AtomicUsize>,
    pub forwards: Arc<AtomicUsize>,
    pub fail_load: bool,
}

pub struct FakeModel {
    forwards: Arc<AtomicUsize>,
}

pub struct FakeDecoder {
    downsample: usize,
}

impl Runtime for FakeRuntime {
    type Model = FakeModel;
    type Decoder = FakeDecoder;

    async fn load(self, spec: RuntimeSpec) -> Result<Loaded<FakeModel, FakeDecoder>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_load {
            return Err(SamplerErr::Runtime("out of device memory".to_string()));
        }

        Ok(Loaded {
            model: FakeModel {
                forwards: self.forwards,
            },
            decoder: FakeDecoder {
                downsample: spec.autoencoder.downsample,
            },
            model_params: 1234,
            projector_params: 56,
        })
    }
}

impl VelocityModel for FakeModel {
    async fn forward(&mut self, x: &Array4<f32>, _t: f32, _labels: &[u32]) -> Result<Array4<f32>> {
        self.forwards.fetch_add(1, Ordering::SeqCst);
        Ok(Array4::zeros(x.raw_dim()))
    }
}

impl Decoder for FakeDecoder {
    async fn decode(&mut self, latents: &Array4<f32>) -> Result<Array4<f32>> {
        let (n, _, h, w) = latents.dim();
        let mut pixels = Array4::zeros((n, 3, h * self.downsample, w * self.downsample));
        for (i, mut image) in pixels.outer_iter_mut().enumerate() {
            image.fill(latents[[i, 0, 0, 0]].clamp(-1.0, 1.0));
        }
        Ok(pixels)
    }
}
