use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use serde_json::{Map, Value};

use crate::{Result, config::TrainConfig, metrics::Summary};

/// Receives the metrics of a run as it progresses.
pub trait Tracker: Send {
    fn log(&mut self, step: usize, record: &Summary) -> Result<()>;
}

/// Drops every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracker;

impl Tracker for NoopTracker {
    fn log(&mut self, _step: usize, _record: &Summary) -> Result<()> {
        Ok(())
    }
}

/// Appends one json object per record to a file.
#[derive(Debug)]
pub struct JsonlTracker {
    path: PathBuf,
    out: BufWriter<File>,
}

impl JsonlTracker {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Tracker for JsonlTracker {
    fn log(&mut self, step: usize, record: &Summary) -> Result<()> {
        let mut line = Map::new();
        line.insert("step".to_string(), Value::from(step));
        for (name, value) in record {
            // Non finite values have no json representation and become null.
            line.insert(name.clone(), Value::from(*value));
        }

        serde_json::to_writer(&mut self.out, &line)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

/// The tracker a rank reports to, only the coordinator tracks and only when
/// tracking is enabled.
pub fn for_rank(cfg: &TrainConfig, is_coordinator: bool) -> Result<Box<dyn Tracker>> {
    if !(cfg.tracking && is_coordinator) {
        return Ok(Box::new(NoopTracker));
    }

    let path = cfg.save_dir.join(format!("{}_metrics.jsonl", cfg.experiment_name));
    Ok(Box::new(JsonlTracker::create(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_appended_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = JsonlTracker::create(dir.path().join("run_metrics.jsonl")).unwrap();

        tracker
            .log(0, &Summary::from([("train/loss".to_string(), 0.5)]))
            .unwrap();
        tracker
            .log(1, &Summary::from([("valid/avg_loss".to_string(), f64::NAN)]))
            .unwrap();

        let written = fs::read_to_string(tracker.path()).unwrap();
        let lines: Vec<Value> = written
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["step"], 0);
        assert_eq!(lines[0]["train/loss"], 0.5);
        assert!(lines[1]["valid/avg_loss"].is_null());
    }
}
