use crate::{Collective, CollectiveErr, Result};

/// Shares `root`'s values with every member of the group.
///
/// # Arguments
/// * `group` - The process group.
/// * `values` - The values to share, ignored on every member but `root`.
/// * `root` - The rank whose values are shared.
///
/// # Returns
/// `root`'s values.
pub async fn broadcast<C: Collective>(group: &mut C, values: &[f32], root: usize) -> Result<Vec<f32>> {
    let world_size = group.world_size();
    if root >= world_size {
        return Err(CollectiveErr::InvalidRank {
            rank: root,
            world_size,
        });
    }

    let own: &[f32] = if group.rank() == root { values } else { &[] };
    let mut gathered = group.all_gather(own).await?;
    Ok(gathered.swap_remove(root))
}

/// Replaces `buf` with the element-wise mean of every member's `buf`.
///
/// The reduction runs over the gathered values in rank order, so every member
/// ends up with the exact same numbers.
///
/// # Returns
/// An error if any member's buffer differs in length.
pub async fn all_reduce_mean<C: Collective>(group: &mut C, buf: &mut [f32]) -> Result<()> {
    if group.world_size() == 1 {
        return Ok(());
    }

    let gathered = group.all_gather(buf).await?;
    let mut sums = vec![0f64; buf.len()];

    for (peer, contribution) in gathered.iter().enumerate() {
        if contribution.len() != buf.len() {
            return Err(CollectiveErr::LengthMismatch {
                peer,
                got: contribution.len(),
                expected: buf.len(),
            });
        }

        for (sum, value) in sums.iter_mut().zip(contribution) {
            *sum += f64::from(*value);
        }
    }

    let n = gathered.len() as f64;
    for (value, sum) in buf.iter_mut().zip(sums) {
        *value = (sum / n) as f32;
    }

    Ok(())
}
