//! k-means++ seeding followed by Lloyd iterations.
//!
//! Only used to produce the initial hard assignment for mixture EM.

use nalgebra::{DMatrix, RowDVector};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// Cluster the rows of `data` into `k` groups; returns one label per row.
///
/// Requires `1 <= k <= data.nrows()`.
pub(crate) fn kmeans(data: &DMatrix<f64>, k: usize, max_iter: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
    let n = data.nrows();
    let mut centers = kmeans_pp_init(data, k, rng);
    let mut labels = vec![usize::MAX; n];

    for _ in 0..max_iter {
        let mut changed = false;
        for (i, label) in labels.iter_mut().enumerate() {
            let (best, _) = nearest(&data.row(i).into_owned(), &centers);
            if *label != best {
                *label = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![RowDVector::zeros(data.ncols()); k];
        let mut counts = vec![0usize; k];
        for (i, &c) in labels.iter().enumerate() {
            sums[c] += data.row(i);
            counts[c] += 1;
        }
        // Empty clusters keep their previous center.
        for (c, (sum, count)) in sums.into_iter().zip(counts).enumerate() {
            if count > 0 {
                centers[c] = sum / count as f64;
            }
        }
    }
    labels
}

/// First center uniform, each next one drawn with probability
/// proportional to its squared distance from the nearest chosen center.
fn kmeans_pp_init(data: &DMatrix<f64>, k: usize, rng: &mut ChaCha8Rng) -> Vec<RowDVector<f64>> {
    let n = data.nrows();
    let mut centers = Vec::with_capacity(k);
    centers.push(data.row(rng.random_range(0..n)).into_owned());

    let mut min_dist: Vec<f64> = (0..n)
        .map(|i| (data.row(i) - &centers[0]).norm_squared())
        .collect();

    while centers.len() < k {
        let total: f64 = min_dist.iter().sum();
        let pick = if total > 0.0 {
            let target = rng.random::<f64>() * total;
            let mut acc = 0.0;
            min_dist
                .iter()
                .position(|&d| {
                    acc += d;
                    acc > target
                })
                .unwrap_or(n - 1)
        } else {
            // All remaining points coincide with a center.
            rng.random_range(0..n)
        };

        let center = data.row(pick).into_owned();
        for (i, d) in min_dist.iter_mut().enumerate() {
            *d = d.min((data.row(i) - &center).norm_squared());
        }
        centers.push(center);
    }
    centers
}

fn nearest(point: &RowDVector<f64>, centers: &[RowDVector<f64>]) -> (usize, f64) {
    centers
        .iter()
        .map(|c| (point - c).norm_squared())
        .enumerate()
        .fold((0, f64::INFINITY), |best, (i, d)| if d < best.1 { (i, d) } else { best })
}
