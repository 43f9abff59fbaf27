mod cli;

use std::io;

use clap::Parser;
use log::{debug, info, warn};
use process_group::{LaunchEnv, device};
use sampler::{Outcome, TcpRuntime};
use tokio::signal;

use crate::cli::Args;

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let args = Args::parse();
    let opts = args.options();
    opts.validate()?;

    let env = LaunchEnv::from_env()?;
    let visible = device::visible_devices()?;
    let (group, ctx) = process_group::connect(&env, visible, opts.global_seed).await?;

    let runtime = TcpRuntime::new(args.inference_addr(ctx.device.ordinal));

    tokio::select! {
        ret = sampler::run(&opts, group, &ctx, runtime) => {
            match ret? {
                Outcome::Skipped { archive } => {
                    info!(archive:% = archive.display(); "nothing to do");
                }
                Outcome::Completed { metrics, archive, .. } => {
                    debug!(
                        rank = ctx.rank,
                        samples = metrics.samples,
                        solve_ms = metrics.solve_time.as_millis() as u64,
                        decode_ms = metrics.decode_time.as_millis() as u64,
                        save_ms = metrics.save_time.as_millis() as u64;
                        "sampling finished"
                    );

                    if archive.is_some() {
                        info!("done");
                    }
                }
            }
        }
        _ = signal::ctrl_c() => {
            warn!(rank = ctx.rank; "received SIGINT, aborting");
            return Err(io::Error::new(io::ErrorKind::Interrupted, "interrupted"));
        }
    }

    Ok(())
}
