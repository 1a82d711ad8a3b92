//! Count-conserving rebinning between channel grids.

use crate::{Error, Result};

/// Rebins `counts`, defined on `orig_edges`, onto `new_edges`.
///
/// Both edge arrays hold the lower energy of every channel plus the upper
/// edge of the last channel. Each original channel's counts are split among
/// the new channels in proportion to the energy overlap. Counts outside the
/// new grid are dropped.
///
/// # Errors
/// Returns [`Error::ChannelMismatch`] if `orig_edges` does not have one more
/// entry than `counts`, and [`Error::InvalidInput`] if `new_edges` describes
/// no channels.
pub fn rebin_by_lower_edge(
    orig_edges: &[f64],
    counts: &[f32],
    new_edges: &[f64],
) -> Result<Vec<f32>> {
    if orig_edges.len() != counts.len() + 1 {
        return Err(Error::ChannelMismatch {
            expected: counts.len() + 1,
            actual: orig_edges.len(),
        });
    }
    if new_edges.len() < 2 {
        return Err(Error::InvalidInput(
            "target binning must have at least one channel".to_string(),
        ));
    }

    let norig = counts.len();
    let nnew = new_edges.len() - 1;
    let mut output = vec![0.0_f32; nnew];

    let mut start = 0;
    for (j, out) in output.iter_mut().enumerate() {
        let (lo, hi) = (new_edges[j], new_edges[j + 1]);

        while start < norig && orig_edges[start + 1] <= lo {
            start += 1;
        }

        let mut sum = 0.0_f64;
        let mut k = start;
        while k < norig && orig_edges[k] < hi {
            let (o_lo, o_hi) = (orig_edges[k], orig_edges[k + 1]);
            let width = o_hi - o_lo;
            let overlap = hi.min(o_hi) - lo.max(o_lo);
            if width > 0.0 && overlap > 0.0 {
                sum += f64::from(counts[k]) * overlap / width;
            }
            k += 1;
        }

        #[allow(clippy::cast_possible_truncation)]
        {
            *out = sum as f32;
        }
    }

    Ok(output)
}
