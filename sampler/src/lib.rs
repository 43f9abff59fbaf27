//! Distributed class conditional sampling of a trained SiT experiment.
//!
//! Every rank draws its share of noise and labels, integrates the flow, decodes
//! the latents and writes one PNG per sample. Once all ranks are done, the root
//! packs the first `num_fid_samples` images into an `.npz` archive for FID
//! evaluation.

pub mod archive;
pub mod assembler;
pub mod checkpoint;
pub mod config;
mod error;
pub mod layout;
mod loop_;
mod metrics;
pub mod model;
pub mod options;
mod pipeline;
pub mod plan;
mod postprocess;
pub mod remote;
pub mod solver;

pub use error::{Result, SamplerErr};
pub use loop_::SamplingLoop;
pub use metrics::LoopMetrics;
pub use options::{Mode, PathType, SampleOptions};
pub use pipeline::{Outcome, run};
pub use remote::{RemoteRuntime, TcpRuntime};
