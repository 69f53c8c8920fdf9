use std::num::NonZeroUsize;

use log::info;
use serde::{Deserialize, Serialize};

use crate::{Result, TrainErr};

/// Which way a validation score improves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Lower,
    Higher,
}

impl Direction {
    /// Whether `candidate` is strictly better than `best`. NaN never is.
    pub fn is_better(self, candidate: f64, best: f64) -> bool {
        match self {
            Direction::Lower => candidate < best,
            Direction::Higher => candidate > best,
        }
    }
}

/// Where the coordinator stands after its last observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Running,
    Improved,
    Stalled,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Patience,
    MaxEpochs,
}

/// The part of a decision every rank acts upon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub save: bool,
    pub stop: Option<StopReason>,
}

impl Verdict {
    const CONTINUE: f32 = 0.0;
    const PATIENCE: f32 = 1.0;
    const MAX_EPOCHS: f32 = 2.0;

    /// Encodes the verdict to be broadcast over the group.
    pub fn to_wire(self) -> [f32; 2] {
        let stop = match self.stop {
            None => Self::CONTINUE,
            Some(StopReason::Patience) => Self::PATIENCE,
            Some(StopReason::MaxEpochs) => Self::MAX_EPOCHS,
        };

        [if self.save { 1.0 } else { 0.0 }, stop]
    }

    /// Decodes a verdict received from the coordinator.
    pub fn from_wire(values: &[f32]) -> Result<Self> {
        let &[save, stop] = values else {
            return Err(TrainErr::MalformedVerdict { got: values.len() });
        };

        let stop = if stop == Self::CONTINUE {
            None
        } else if stop == Self::PATIENCE {
            Some(StopReason::Patience)
        } else if stop == Self::MAX_EPOCHS {
            Some(StopReason::MaxEpochs)
        } else {
            return Err(TrainErr::MalformedVerdict { got: values.len() });
        };

        Ok(Self {
            save: save != 0.0,
            stop,
        })
    }
}

/// The outcome of observing one epoch's validation score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub state: State,
    pub verdict: Verdict,
    /// Best score seen so far, this epoch's included.
    pub best: f64,
    /// Consecutive non improving epochs.
    pub stalled: usize,
}

/// Tracks the best validation score and decides on checkpoints and stopping.
///
/// Only the coordinator owns one of these, the rest of the ranks learn about
/// its decisions through a broadcast.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    direction: Direction,
    patience: usize,
    max_epochs: usize,
    best: Option<f64>,
    stalled: usize,
    state: State,
}

impl EarlyStopping {
    /// Creates a new `EarlyStopping`.
    ///
    /// # Arguments
    /// * `direction` - Whether lower or higher scores are better.
    /// * `patience` - Non improving epochs tolerated, 0 never stops early.
    /// * `max_epochs` - The epoch after which training stops regardless.
    pub fn new(direction: Direction, patience: usize, max_epochs: NonZeroUsize) -> Self {
        Self {
            direction,
            patience,
            max_epochs: max_epochs.get(),
            best: None,
            stalled: 0,
            state: State::Running,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    pub fn stalled(&self) -> usize {
        self.stalled
    }

    /// Observes the globally reduced validation `score` of `epoch` (1 based).
    ///
    /// Once stopped, the coordinator stays stopped and never asks for a save.
    pub fn observe(&mut self, epoch: usize, score: f64) -> Decision {
        if self.state == State::Stopped {
            return Decision {
                state: State::Stopped,
                verdict: Verdict {
                    save: false,
                    stop: Some(self.stop_reason()),
                },
                best: self.best.unwrap_or(f64::NAN),
                stalled: self.stalled,
            };
        }

        let improved = !score.is_nan()
            && match self.best {
                None => true,
                Some(best) => self.direction.is_better(score, best),
            };

        if improved {
            self.best = Some(score);
            self.stalled = 0;
            self.state = State::Improved;
        } else {
            info!(
                "score did not improve at epoch {epoch}, best: {:?}, current: {score}",
                self.best
            );
            self.stalled += 1;
            self.state = State::Stalled;
        }

        let stop = if self.patience_exceeded() {
            Some(StopReason::Patience)
        } else if epoch >= self.max_epochs {
            Some(StopReason::MaxEpochs)
        } else {
            None
        };

        if stop.is_some() {
            self.state = State::Stopped;
        }

        Decision {
            state: self.state,
            verdict: Verdict {
                save: improved,
                stop,
            },
            best: self.best.unwrap_or(f64::NAN),
            stalled: self.stalled,
        }
    }

    fn patience_exceeded(&self) -> bool {
        self.patience != 0 && self.stalled > self.patience
    }

    fn stop_reason(&self) -> StopReason {
        if self.patience_exceeded() {
            StopReason::Patience
        } else {
            StopReason::MaxEpochs
        }
    }
}
