use std::{env, path::Path, process::ExitStatus};

use log::{error, info};
use tokio::{process::Command, task::JoinSet};

use crate::{Result, TrainErr, config::TrainConfig};

/// Spawns one worker process per rank and waits for all of them.
///
/// Workers are this same executable started as `worker <config> <rank>`. As
/// soon as one fails the remaining ones are killed.
///
/// # Errors
/// `WorkerFailed` with the first rank that exited unsuccessfully.
pub async fn launch(config_path: &Path, cfg: &TrainConfig) -> Result<()> {
    let exe = env::current_exe()?;
    let world_size = cfg.world_size.get();

    let mut workers: JoinSet<(usize, std::io::Result<ExitStatus>)> = JoinSet::new();
    for rank in 0..world_size {
        let mut child = Command::new(&exe)
            .arg("worker")
            .arg(config_path)
            .arg(rank.to_string())
            .kill_on_drop(true)
            .spawn()?;

        info!(rank = rank; "spawned worker process {:?}", child.id());
        workers.spawn(async move { (rank, child.wait().await) });
    }

    while let Some(joined) = workers.join_next().await {
        let (rank, status) = joined.map_err(std::io::Error::other)?;
        let status = status?;

        if !status.success() {
            error!(rank = rank; "worker exited with {status}, stopping the rest");
            workers.shutdown().await;
            return Err(TrainErr::WorkerFailed { rank, status });
        }

        info!(rank = rank; "worker finished");
    }

    Ok(())
}
