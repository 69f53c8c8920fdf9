use std::{
    collections::HashMap,
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use log::{info, warn};
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::{
    Result, TrainErr,
    arch::{StateDict, Tensor},
    config::TrainConfig,
};

const MODEL_PREFIX: &str = "model.";
const OPTIMIZER_PREFIX: &str = "optimizer.";

/// Everything persisted about the best epoch of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub epoch: usize,
    pub best_score: f64,
    pub config: TrainConfig,
    pub model: StateDict,
    pub optimizer: StateDict,
}

/// The single "best" checkpoint file of a run.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(save_dir: impl AsRef<Path>, experiment_name: &str, save_prefix: &str) -> Self {
        let file = format!("{experiment_name}_{save_prefix}_best.safetensors");
        Self {
            path: save_dir.as_ref().join(file),
        }
    }

    pub fn for_config(cfg: &TrainConfig) -> Self {
        Self::new(&cfg.save_dir, &cfg.experiment_name, &cfg.save_prefix)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the checkpoint with `checkpoint`.
    ///
    /// The file is written next to its destination and renamed over it, so
    /// readers never see a partially written checkpoint.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        info!("saving checkpoint to {}", self.path.display());

        let bytes = encode(checkpoint)?;

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let tmp = self.path.with_extension("safetensors.tmp");
        if let Err(e) = replace(&tmp, &self.path, &bytes) {
            // Only the best file may be left behind.
            if let Err(rm) = fs::remove_file(&tmp) {
                warn!("failed to remove {}: {rm}", tmp.display());
            }
            return Err(e.into());
        }

        info!("finished saving checkpoint to {}", self.path.display());
        Ok(())
    }

    pub fn load(&self) -> Result<Checkpoint> {
        load(&self.path)
    }
}

/// Reads the checkpoint at `path`.
pub fn load(path: impl AsRef<Path>) -> Result<Checkpoint> {
    let bytes = fs::read(path)?;
    decode(&bytes)
}

fn encode(checkpoint: &Checkpoint) -> Result<Vec<u8>> {
    let tensors = prefixed(MODEL_PREFIX, &checkpoint.model)
        .chain(prefixed(OPTIMIZER_PREFIX, &checkpoint.optimizer));

    let mut views = Vec::new();
    for (name, tensor) in tensors {
        if tensor.numel() != tensor.data.len() {
            return Err(TrainErr::ShapeMismatch {
                what: "checkpoint tensor",
                got: tensor.data.len(),
                expected: tensor.numel(),
            });
        }

        let data: &[u8] = bytemuck::cast_slice(&tensor.data);
        views.push((name, TensorView::new(Dtype::F32, tensor.shape.clone(), data)?));
    }

    let metadata = HashMap::from([
        ("epoch".to_string(), checkpoint.epoch.to_string()),
        ("best_score".to_string(), checkpoint.best_score.to_string()),
        ("config".to_string(), serde_json::to_string(&checkpoint.config)?),
    ]);

    Ok(safetensors::serialize(views, &Some(metadata))?)
}

fn replace(tmp: &Path, dest: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(tmp, dest)
}

fn prefixed<'a>(
    prefix: &'a str,
    state: &'a StateDict,
) -> impl Iterator<Item = (String, &'a Tensor)> + 'a {
    state.iter().map(move |(name, tensor)| (format!("{prefix}{name}"), tensor))
}

fn decode(bytes: &[u8]) -> Result<Checkpoint> {
    let (_, header) = SafeTensors::read_metadata(bytes)?;
    let metadata = header.metadata().clone().unwrap_or_default();

    let field = |key: &str| {
        metadata
            .get(key)
            .ok_or_else(|| TrainErr::Checkpoint(format!("missing metadata field {key}")))
    };

    let epoch = field("epoch")?
        .parse()
        .map_err(|e| TrainErr::Checkpoint(format!("bad epoch: {e}")))?;
    let best_score = field("best_score")?
        .parse()
        .map_err(|e| TrainErr::Checkpoint(format!("bad best_score: {e}")))?;
    let config = serde_json::from_str(field("config")?)?;

    let mut model = StateDict::new();
    let mut optimizer = StateDict::new();

    for (name, view) in SafeTensors::deserialize(bytes)?.tensors() {
        if view.dtype() != Dtype::F32 {
            return Err(TrainErr::Checkpoint(format!(
                "tensor {name} has dtype {:?}, expected F32",
                view.dtype()
            )));
        }

        let tensor = Tensor::new(view.shape().to_vec(), bytemuck::pod_collect_to_vec(view.data()));

        if let Some(key) = name.strip_prefix(MODEL_PREFIX) {
            model.insert(key.to_string(), tensor);
        } else if let Some(key) = name.strip_prefix(OPTIMIZER_PREFIX) {
            optimizer.insert(key.to_string(), tensor);
        } else {
            return Err(TrainErr::Checkpoint(format!("unexpected tensor {name}")));
        }
    }

    Ok(Checkpoint {
        epoch,
        best_score,
        config,
        model,
        optimizer,
    })
}
