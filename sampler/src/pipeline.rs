use std::{fs, io, path::PathBuf};

use log::info;
use process_group::{ProcessGroup, ROOT, WorkerContext};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    task,
};

use crate::{
    Result, SamplerErr,
    archive::{self, Archive},
    assembler,
    config::RunConfig,
    layout::SampleLayout,
    loop_::SamplingLoop,
    metrics::LoopMetrics,
    model::Runtime,
    options::SampleOptions,
    plan::SamplePlan,
    solver::SolverConfig,
};

/// How a run ended.
#[derive(Debug)]
pub enum Outcome {
    /// The archive was already there, nothing was sampled.
    Skipped { archive: PathBuf },
    Completed {
        plan: SamplePlan,
        metrics: LoopMetrics,
        /// The archive, built by the root only.
        archive: Option<Archive>,
    },
}

/// Runs one rank of a sampling job.
///
/// Every rank of `group` must call this with the same options. The group is
/// left on success and dropped on failure, which unblocks the other ranks.
///
/// # Arguments
/// * `opts` - The run's options.
/// * `group` - This rank's handle on the process group.
/// * `ctx` - This rank's context.
/// * `runtime` - Where the model and autoencoder run for this rank.
pub async fn run<R, W, T>(
    opts: &SampleOptions,
    mut group: ProcessGroup<R, W>,
    ctx: &WorkerContext,
    runtime: T,
) -> Result<Outcome>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
    T: Runtime,
{
    opts.validate()?;

    let experiment = opts.experiment();
    if experiment.defaulted && ctx.is_root() {
        info!(
            exp_path:% = experiment.path.display(),
            train_steps = experiment.step.as_str();
            "exp_path or train_steps not provided, using the default experiment"
        );
    }

    let config = RunConfig::load(&experiment.path)?;
    let layout = SampleLayout::new(opts, &experiment);

    let skip = group
        .decide_once(ROOT, || -> Result<bool> {
            if layout.archive_path().exists() {
                return Ok(true);
            }

            fs::create_dir_all(layout.dir())?;
            info!(dir:% = layout.dir().display(); "saving png samples");
            Ok(false)
        })
        .await?;

    if skip {
        let archive = layout.archive_path();
        if ctx.is_root() {
            info!(archive:% = archive.display(); "archive already exists, skipping sampling");
        }

        group.leave().await?;
        return Ok(Outcome::Skipped { archive });
    }

    group.barrier().await?;

    let assembly = assembler::assemble(&config, &experiment)?;
    let loaded = runtime
        .load(assembly.runtime_spec(ctx.device.ordinal, opts.allow_tf32))
        .await?;

    let plan = SamplePlan::new(opts.num_fid_samples, opts.batch_size, ctx.world_size)?;
    if ctx.is_root() {
        info!(
            total = plan.total,
            iterations = plan.iterations,
            model_params = loaded.model_params,
            projector_params = loaded.projector_params;
            "starting sampling"
        );
    }

    let solver = SolverConfig::new(opts, assembly.num_classes);
    let metrics = SamplingLoop::new(
        loaded.model,
        loaded.decoder,
        solver,
        &assembly,
        &layout,
        plan,
        ctx,
    )
    .run()
    .await?;

    group.barrier().await?;

    let archive = if ctx.is_root() {
        let layout = layout.clone();
        let requested = opts.num_fid_samples;
        let archive = task::spawn_blocking(move || archive::build_npz(&layout, requested))
            .await
            .map_err(|e| SamplerErr::Io(io::Error::other(format!("archive task failed: {e}"))))??;

        Some(archive)
    } else {
        None
    };

    group.barrier().await?;
    group.leave().await?;

    Ok(Outcome::Completed {
        plan,
        metrics,
        archive,
    })
}
