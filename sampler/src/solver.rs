//! Euler and Euler-Maruyama integration of the learned flow, from noise at
//! `t = 1` to data at `t = 0`.

use std::f64::consts::FRAC_PI_2;

use ndarray::{Array4, Axis, Zip, s};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::{
    Result, SamplerErr,
    model::VelocityModel,
    options::{Mode, PathType, SampleOptions},
};

/// Where the stochastic sampler stops integrating before the final mean step.
const SDE_LAST_T: f64 = 0.04;

/// The solver parameters of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
    pub mode: Mode,
    pub path_type: PathType,
    pub num_steps: usize,
    pub heun: bool,
    pub cfg_scale: f32,
    pub guidance_low: f64,
    pub guidance_high: f64,
    /// The label of the unconditional branch.
    pub null_class: u32,
}

impl SolverConfig {
    pub fn new(opts: &SampleOptions, num_classes: usize) -> Self {
        Self {
            mode: opts.mode,
            path_type: opts.path_type,
            num_steps: opts.num_steps,
            heun: opts.heun,
            cfg_scale: opts.cfg_scale as f32,
            guidance_low: opts.guidance_low,
            guidance_high: opts.guidance_high,
            null_class: num_classes as u32,
        }
    }

    /// Whether classifier-free guidance applies at time `t`.
    fn guides(&self, t: f64) -> bool {
        self.cfg_scale > 1.0 && self.guidance_low <= t && t <= self.guidance_high
    }
}

/// Integrates `latents` from noise to data.
///
/// # Arguments
/// * `model` - The velocity predictor.
/// * `latents` - The initial noise shaped `(N, C, H, W)`.
/// * `labels` - One class label per latent.
/// * `cfg` - The solver parameters.
/// * `rng` - Source of the stochastic sampler's noise, untouched by the ODE.
///
/// # Returns
/// The sampled latents, shaped like `latents`.
pub async fn sample<M, G>(
    model: &mut M,
    latents: Array4<f32>,
    labels: &[u32],
    cfg: &SolverConfig,
    rng: &mut G,
) -> Result<Array4<f32>>
where
    M: VelocityModel,
    G: Rng + Send,
{
    if labels.len() != latents.len_of(Axis(0)) {
        return Err(SamplerErr::ShapeMismatch {
            what: "labels",
            got: vec![labels.len()],
            expected: vec![latents.len_of(Axis(0))],
        });
    }

    match cfg.mode {
        Mode::Ode => euler(model, latents, labels, cfg).await,
        Mode::Sde => euler_maruyama(model, latents, labels, cfg, rng).await,
    }
}

async fn euler<M: VelocityModel>(
    model: &mut M,
    mut x: Array4<f32>,
    labels: &[u32],
    cfg: &SolverConfig,
) -> Result<Array4<f32>> {
    let t_steps = linspace(1.0, 0.0, cfg.num_steps + 1);

    for (i, w) in t_steps.windows(2).enumerate() {
        let (t_cur, t_next) = (w[0], w[1]);
        let dt = (t_next - t_cur) as f32;

        let guided = cfg.guides(t_cur);
        let d_cur = drift(model, &x, t_cur, guided, labels, cfg, None).await?;
        let mut x_next = &x + &(&d_cur * dt);

        // Heun's correction is skipped on the last step and guided like the
        // step it corrects
        if cfg.heun && i + 1 < cfg.num_steps {
            let d_next = drift(model, &x_next, t_next, guided, labels, cfg, None).await?;
            x_next = &x + &((&d_cur * 0.5 + &d_next * 0.5) * dt);
        }

        x = x_next;
    }

    Ok(x)
}

async fn euler_maruyama<M, G>(
    model: &mut M,
    mut x: Array4<f32>,
    labels: &[u32],
    cfg: &SolverConfig,
    rng: &mut G,
) -> Result<Array4<f32>>
where
    M: VelocityModel,
    G: Rng + Send,
{
    let mut t_steps = linspace(1.0, SDE_LAST_T, cfg.num_steps);
    t_steps.push(0.0);

    for w in t_steps[..cfg.num_steps].windows(2) {
        let (t_cur, t_next) = (w[0], w[1]);
        let dt = t_next - t_cur;
        let diffusion = diffusion(t_cur);

        let eps: Array4<f32> =
            Array4::from_shape_simple_fn(x.raw_dim(), || rng.sample(StandardNormal));
        let noise_scale = (diffusion.sqrt() * dt.abs().sqrt()) as f32;

        let d_cur = drift(model, &x, t_cur, cfg.guides(t_cur), labels, cfg, Some(diffusion)).await?;
        x = &x + &(&d_cur * dt as f32) + &(&eps * noise_scale);
    }

    // The last step goes to the mean, no noise is added
    let (t_cur, t_next) = (t_steps[cfg.num_steps - 1], t_steps[cfg.num_steps]);
    let guided = cfg.guides(t_cur);
    let d_cur = drift(model, &x, t_cur, guided, labels, cfg, Some(diffusion(t_cur))).await?;

    Ok(&x + &(&d_cur * (t_next - t_cur) as f32))
}

/// Queries the model at `t` and applies guidance when `guided` is set.
///
/// With `diffusion` set, the velocity is turned into the reverse SDE drift
/// `v - diffusion * score / 2` before the branches are combined.
async fn drift<M: VelocityModel>(
    model: &mut M,
    x: &Array4<f32>,
    t: f64,
    guided: bool,
    labels: &[u32],
    cfg: &SolverConfig,
    diffusion: Option<f64>,
) -> Result<Array4<f32>> {
    let n = x.len_of(Axis(0));

    let (input, y) = if guided {
        let (_, c, h, w) = x.dim();
        let mut input = Array4::zeros((2 * n, c, h, w));
        input.slice_mut(s![..n, .., .., ..]).assign(x);
        input.slice_mut(s![n.., .., .., ..]).assign(x);

        let mut y = labels.to_vec();
        y.resize(2 * n, cfg.null_class);
        (input, y)
    } else {
        (x.clone(), labels.to_vec())
    };

    let mut d = model.forward(&input, t as f32, &y).await?;
    if d.dim() != input.dim() {
        let (n, c, h, w) = d.dim();
        let (en, ec, eh, ew) = input.dim();
        return Err(SamplerErr::ShapeMismatch {
            what: "velocity",
            got: vec![n, c, h, w],
            expected: vec![en, ec, eh, ew],
        });
    }

    if let Some(diffusion) = diffusion {
        let (ratio, var) = score_coefficients(cfg.path_type, t);
        let half_diffusion = (0.5 * diffusion) as f32;
        let (ratio, var) = (ratio as f32, var as f32);

        Zip::from(&mut d).and(&input).for_each(|v, &x| {
            let score = (ratio * *v - x) / var;
            *v -= half_diffusion * score;
        });
    }

    if !guided {
        return Ok(d);
    }

    let cond = d.slice(s![..n, .., .., ..]);
    let uncond = d.slice(s![n.., .., .., ..]);
    Ok(&uncond + &((&cond - &uncond) * cfg.cfg_scale))
}

fn diffusion(t: f64) -> f64 {
    2.0 * t
}

/// The coefficients turning a velocity into a score at time `t`.
///
/// # Returns
/// `alpha / d_alpha` and the variance term, so that
/// `score = (ratio * v - x) / var`.
fn score_coefficients(path_type: PathType, t: f64) -> (f64, f64) {
    let (alpha, d_alpha, sigma, d_sigma) = match path_type {
        PathType::Linear => (1.0 - t, -1.0, t, 1.0),
        PathType::Cosine => {
            let (sin, cos) = (t * FRAC_PI_2).sin_cos();
            (cos, -FRAC_PI_2 * sin, sin, FRAC_PI_2 * cos)
        }
    };

    let ratio = alpha / d_alpha;
    let var = sigma * sigma - ratio * d_sigma * sigma;
    (ratio, var)
}

/// `n` evenly spaced points from `start` to `end`, both included.
fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { end } else { start + step * i as f64 })
                .collect()
        }
    }
}
