use std::{fs, path::Path};

use serde::Deserialize;

use super::Subset;
use crate::{Result, TrainErr};

/// A single supervised sample, borrowed from its dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample<'a> {
    pub x: &'a [f32],
    pub y: &'a [f32],
}

/// An owned batch of rows, features and targets stored row major.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub xs: Vec<f32>,
    pub ys: Vec<f32>,
    pub x_size: usize,
    pub y_size: usize,
}

impl Batch {
    /// The amount of rows in the batch.
    #[inline]
    pub fn len(&self) -> usize {
        self.xs.len() / self.x_size.max(1)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }
}

/// Indexed access to samples plus the way to stack them into a batch.
pub trait Dataset {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the sample at `idx`.
    ///
    /// # Panics
    /// If `idx` is out of bounds.
    fn get(&self, idx: usize) -> Sample<'_>;

    fn collate(&self, samples: &[Sample<'_>]) -> Batch;
}

/// A dataset held in memory as flattened rows of `x_size + y_size` values.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    data: Vec<f32>,
    x_size: usize,
    y_size: usize,
}

/// The on disk layout of a dataset file, both splits share the row layout.
#[derive(Debug, Deserialize)]
struct DatasetFile {
    x_size: usize,
    y_size: usize,
    train: Vec<f32>,
    valid: Vec<f32>,
}

impl InMemoryDataset {
    /// Creates a new dataset from flattened rows.
    ///
    /// # Errors
    /// `InvalidDataset` if a size is zero or `data` isn't made of whole rows.
    pub fn new(data: Vec<f32>, x_size: usize, y_size: usize) -> Result<Self> {
        if x_size == 0 || y_size == 0 {
            return Err(TrainErr::InvalidDataset(format!(
                "row sizes must be positive, got x_size {x_size} and y_size {y_size}"
            )));
        }

        let row = x_size + y_size;
        if data.len() % row != 0 {
            return Err(TrainErr::InvalidDataset(format!(
                "{} values can't be split into rows of {row}",
                data.len()
            )));
        }

        Ok(Self {
            data,
            x_size,
            y_size,
        })
    }

    /// Loads one split of the json dataset file at `path`.
    pub fn load(path: impl AsRef<Path>, subset: Subset) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let file: DatasetFile = serde_json::from_str(&raw)?;

        let data = match subset {
            Subset::Train => file.train,
            Subset::Valid => file.valid,
        };

        let dataset = Self::new(data, file.x_size, file.y_size)?;
        if dataset.is_empty() {
            return Err(TrainErr::InvalidDataset(format!("the {subset} split is empty")));
        }

        Ok(dataset)
    }

    #[inline]
    pub fn x_size(&self) -> usize {
        self.x_size
    }

    #[inline]
    pub fn y_size(&self) -> usize {
        self.y_size
    }

    #[inline]
    fn row_size(&self) -> usize {
        self.x_size + self.y_size
    }
}

impl Dataset for InMemoryDataset {
    #[inline]
    fn len(&self) -> usize {
        self.data.len() / self.row_size()
    }

    fn get(&self, idx: usize) -> Sample<'_> {
        let start = idx * self.row_size();
        let (x, y) = self.data[start..start + self.row_size()].split_at(self.x_size);
        Sample { x, y }
    }

    fn collate(&self, samples: &[Sample<'_>]) -> Batch {
        let mut xs = Vec::with_capacity(samples.len() * self.x_size);
        let mut ys = Vec::with_capacity(samples.len() * self.y_size);

        for sample in samples {
            xs.extend_from_slice(sample.x);
            ys.extend_from_slice(sample.y);
        }

        Batch {
            xs,
            ys,
            x_size: self.x_size,
            y_size: self.y_size,
        }
    }
}
