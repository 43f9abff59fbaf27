use std::{io, path::PathBuf, time::Instant};

use image::RgbImage;
use log::{debug, info};
use ndarray::Array4;
use process_group::WorkerContext;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::StandardNormal;
use tokio::task;

use crate::{
    Result, SamplerErr,
    assembler::Assembly,
    layout::SampleLayout,
    metrics::LoopMetrics,
    model::{Decoder, VelocityModel},
    plan::SamplePlan,
    postprocess,
    solver::{self, SolverConfig},
};

/// Produces one rank's share of the samples.
///
/// Every iteration draws noise and labels from the rank's generator, solves,
/// decodes and writes the images straight to disk. Nothing is kept in memory
/// across iterations.
pub struct SamplingLoop<'a, M, D> {
    model: M,
    decoder: D,
    solver: SolverConfig,
    assembly: &'a Assembly,
    layout: &'a SampleLayout,
    plan: SamplePlan,
    ctx: &'a WorkerContext,
    rng: StdRng,
    metrics: LoopMetrics,
}

impl<'a, M, D> SamplingLoop<'a, M, D> {
    pub fn new(
        model: M,
        decoder: D,
        solver: SolverConfig,
        assembly: &'a Assembly,
        layout: &'a SampleLayout,
        plan: SamplePlan,
        ctx: &'a WorkerContext,
    ) -> Self {
        Self {
            model,
            decoder,
            solver,
            assembly,
            layout,
            plan,
            ctx,
            rng: StdRng::seed_from_u64(ctx.seed as u64),
            metrics: LoopMetrics::default(),
        }
    }
}

impl<M, D> SamplingLoop<'_, M, D>
where
    M: VelocityModel,
    D: Decoder,
{
    /// Runs every planned iteration.
    ///
    /// # Returns
    /// The loop's metrics, or the first error, which aborts the run.
    pub async fn run(mut self) -> Result<LoopMetrics> {
        let n = self.plan.batch_size;
        let (c, l) = (self.assembly.in_channels, self.assembly.latent_size);
        let mut total = 0;

        for iteration in 0..self.plan.iterations {
            let start = Instant::now();

            let rng = &mut self.rng;
            let z: Array4<f32> =
                Array4::from_shape_simple_fn((n, c, l, l), || rng.sample(StandardNormal));
            let labels: Vec<u32> = (0..n)
                .map(|_| self.rng.random_range(0..self.assembly.num_classes as u32))
                .collect();

            let latents =
                solver::sample(&mut self.model, z, &labels, &self.solver, &mut self.rng).await?;
            let latents = self.assembly.stats.denormalize(&latents)?;
            let solved = Instant::now();

            let pixels = self.decoder.decode(&latents).await?;
            let images = postprocess::to_images(&pixels)?;
            if images.len() != n {
                return Err(SamplerErr::ShapeMismatch {
                    what: "decoded batch",
                    got: vec![images.len()],
                    expected: vec![n],
                });
            }
            let decoded = Instant::now();

            let files: Vec<(PathBuf, RgbImage)> = images
                .into_iter()
                .enumerate()
                .map(|(position, image)| {
                    let index = self.plan.sample_index(self.ctx.rank, iteration, position);
                    (self.layout.sample_path(index), image)
                })
                .collect();

            save_all(files).await?;

            self.metrics.solve_time += solved - start;
            self.metrics.decode_time += decoded - solved;
            self.metrics.save_time += decoded.elapsed();
            self.metrics.bump_iteration();
            self.metrics.add_samples(n);

            total += self.plan.global_batch_size();
            if self.ctx.is_root() {
                info!(
                    iteration = iteration + 1,
                    iterations = self.plan.iterations,
                    total = total;
                    "sampled batch"
                );
            } else {
                debug!(rank = self.ctx.rank, iteration = iteration + 1; "sampled batch");
            }
        }

        Ok(self.metrics)
    }
}

/// Encodes and writes the images on the blocking pool.
async fn save_all(files: Vec<(PathBuf, RgbImage)>) -> Result<()> {
    task::spawn_blocking(move || {
        files
            .iter()
            .try_for_each(|(path, image)| image.save(path))
    })
    .await
    .map_err(|e| SamplerErr::Io(io::Error::other(format!("save task failed: {e}"))))??;

    Ok(())
}
