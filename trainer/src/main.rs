use std::{env, io, path::Path, process};

use log::{error, info};
use tokio::signal;

use trainer::{TrainConfig, checkpoint, launch, worker};

const USAGE: &str = "usage:
    trainer launch <config.json>
    trainer worker <config.json> <rank>
    trainer inspect <checkpoint>";

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    match args.as_slice() {
        ["launch", config_path] => {
            let cfg = TrainConfig::from_path(config_path)?;
            launch::launch(Path::new(config_path), &cfg).await?;
            info!("every worker finished");
        }
        ["worker", config_path, rank] => {
            let rank = rank
                .parse()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("bad rank: {e}")))?;
            run_worker(config_path, rank).await?;
        }
        ["inspect", path] => inspect(path)?,
        _ => {
            eprintln!("{USAGE}");
            process::exit(2);
        }
    }

    Ok(())
}

async fn run_worker(config_path: &str, rank: usize) -> io::Result<()> {
    let cfg = TrainConfig::from_path(config_path)?;

    tokio::select! {
        ret = worker::run(cfg, rank) => {
            let outcome = ret.inspect_err(|e| error!(rank = rank; "{e}"))?;
            info!(
                rank = rank;
                "ran {} epochs, stopped by {:?}",
                outcome.epochs_run(),
                outcome.reason
            );
        }
        _ = signal::ctrl_c() => {
            info!(rank = rank; "received SIGINT");
            process::exit(130);
        }
    }

    // The group is gone by now, nothing is left pending.
    eprintln!("rank {rank}: training is done, exiting");
    process::exit(0);
}

fn inspect(path: &str) -> io::Result<()> {
    let ckpt = checkpoint::load(path)?;

    println!("experiment: {}", ckpt.config.experiment_name);
    println!("epoch:      {}", ckpt.epoch);
    println!("best score: {}", ckpt.best_score);

    let tensors = ckpt
        .model
        .iter()
        .map(|(name, t)| (format!("model.{name}"), t))
        .chain(ckpt.optimizer.iter().map(|(name, t)| (format!("optimizer.{name}"), t)));
    for (name, tensor) in tensors {
        println!("  {name} {:?}", tensor.shape);
    }

    Ok(())
}
