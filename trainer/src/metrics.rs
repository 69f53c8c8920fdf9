use std::collections::BTreeMap;

use crate::data::Subset;

/// Metric name to globally reduced value.
pub type Summary = BTreeMap<String, f64>;

pub fn avg_loss_key(subset: Subset) -> String {
    format!("{subset}/avg_loss")
}

pub fn steps_key(subset: Subset) -> String {
    format!("{subset}/steps")
}

/// The per step losses of one rank during one pass over its shard.
#[derive(Debug, Clone)]
pub struct EpochMetrics {
    subset: Subset,
    losses: Vec<f32>,
}

impl EpochMetrics {
    pub fn new(subset: Subset) -> Self {
        Self {
            subset,
            losses: Vec::new(),
        }
    }

    pub fn subset(&self) -> Subset {
        self.subset
    }

    /// Records the loss of one local step.
    #[inline]
    pub fn update(&mut self, loss: f32) {
        self.losses.push(loss);
    }

    /// The local losses, in step order.
    pub fn total_local(&self) -> &[f32] {
        &self.losses
    }

    /// The last recorded loss, keyed for per step tracking.
    pub fn last(&self) -> Summary {
        self.losses
            .last()
            .map(|&loss| Summary::from([(format!("{}/loss", self.subset), f64::from(loss))]))
            .unwrap_or_default()
    }

    /// Merges every rank's local losses into the global statistics.
    ///
    /// The mean runs over every step of every rank, so ranks with longer shards
    /// weigh more. The values are sorted before summing, which makes the result
    /// independent of the order the ranks are given in.
    pub fn reduce_global(&self, gathered: &[Vec<f32>]) -> Summary {
        let mut values: Vec<f64> = gathered.iter().flatten().map(|&v| f64::from(v)).collect();
        values.sort_unstable_by(f64::total_cmp);

        let steps = values.len();
        let avg_loss = if steps == 0 {
            f64::NAN
        } else {
            values.iter().sum::<f64>() / steps as f64
        };

        Summary::from([
            (avg_loss_key(self.subset), avg_loss),
            (steps_key(self.subset), steps as f64),
        ])
    }
}

/// Renders the log line of an epoch's summary.
pub fn format_record(epoch: usize, subset: Subset, summary: &Summary) -> String {
    let avg_loss = summary.get(&avg_loss_key(subset)).copied().unwrap_or(f64::NAN);
    let steps = summary.get(&steps_key(subset)).copied().unwrap_or_default();

    format!("epoch {epoch} | {subset} | avg loss {avg_loss:.6} | steps {steps}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduction_is_the_mean_over_every_step() {
        let metrics = EpochMetrics::new(Subset::Train);
        let summary = metrics.reduce_global(&[vec![1.0, 2.0], vec![3.0, 6.0]]);

        assert_eq!(summary["train/avg_loss"], 3.0);
        assert_eq!(summary["train/steps"], 4.0);
    }

    #[test]
    fn reduction_ignores_rank_order() {
        let metrics = EpochMetrics::new(Subset::Valid);
        let shards = vec![
            vec![0.1, 1e-8, 3.7],
            vec![1e7, 0.3],
            vec![2.5, 1e-3, 0.7, 9.9],
        ];

        let expected = metrics.reduce_global(&shards);
        for perm in [[0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]] {
            let permuted: Vec<_> = perm.iter().map(|&i| shards[i].clone()).collect();
            assert_eq!(metrics.reduce_global(&permuted), expected);
        }
    }

    #[test]
    fn local_losses_keep_step_order() {
        let mut metrics = EpochMetrics::new(Subset::Train);
        assert!(metrics.last().is_empty());

        metrics.update(0.5);
        metrics.update(0.25);
        assert_eq!(metrics.total_local(), [0.5, 0.25]);
        assert_eq!(metrics.last()["train/loss"], 0.25);
    }

    #[test]
    fn empty_ranks_still_reduce() {
        let metrics = EpochMetrics::new(Subset::Valid);
        let summary = metrics.reduce_global(&[vec![2.0], vec![]]);
        assert_eq!(summary["valid/avg_loss"], 2.0);
    }

    #[test]
    fn records_are_human_readable() {
        let summary = Summary::from([
            ("valid/avg_loss".to_string(), 0.125),
            ("valid/steps".to_string(), 3.0),
        ]);

        assert_eq!(
            format_record(4, Subset::Valid, &summary),
            "epoch 4 | valid | avg loss 0.125000 | steps 3"
        );
    }
}
