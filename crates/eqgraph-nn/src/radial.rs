//! Per-edge geometry: an invariant scalar and an equivariant direction.
//!
//! For edge `(r, c)` with `d = x[r] - x[c]`:
//!
//! ```text
//! radial    = ||d||²                        (E, 1)  invariant
//! direction = d / (sqrt(radial) + eps)      (E, 3)  equivariant, if normalized
//! ```
//!
//! `radial` stays squared. The divisor used for normalization is computed from
//! a detached copy of `radial`, so it contributes a value but no gradient.

use candle_core::Tensor;

use crate::error::{Error, Result};
use crate::graph::EdgeIndex;

/// Stabilizer added to the edge length before dividing.
pub const NORM_EPSILON: f64 = 1e-8;

/// Compute `(radial, direction)` for every edge of `edges`.
pub fn coord_to_radial(coords: &Tensor, edges: &EdgeIndex, normalize: bool) -> Result<(Tensor, Tensor)> {
    let (n, d) = coords.dims2().map_err(|_| Error::ShapeMismatch {
        what: "coordinates",
        detail: format!("expected (N, 3), got {:?}", coords.dims()),
    })?;
    if d != 3 {
        return Err(Error::DimensionMismatch {
            what: "coordinates",
            expected: 3,
            got: d,
        });
    }
    edges.check_nodes(n)?;

    let diff = (coords.index_select(edges.row(), 0)? - coords.index_select(edges.col(), 0)?)?;
    let radial = diff.sqr()?.sum_keepdim(1)?;

    if !normalize {
        return Ok((radial, diff));
    }
    let norm = radial.detach().sqrt()?.affine(1.0, NORM_EPSILON)?;
    let direction = diff.broadcast_div(&norm)?;
    Ok((radial, direction))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Var};

    #[test]
    fn test_radial_is_squared_distance() {
        let device = Device::Cpu;
        let coords = Tensor::from_vec(vec![0.0f32, 0.0, 0.0, 3.0, 4.0, 0.0], (2, 3), &device).unwrap();
        let edges = EdgeIndex::from_pairs(&[(1, 0)], &device).unwrap();

        let (radial, diff) = coord_to_radial(&coords, &edges, false).unwrap();
        assert_eq!(radial.to_vec2::<f32>().unwrap(), vec![vec![25.0]]);
        assert_eq!(diff.to_vec2::<f32>().unwrap(), vec![vec![3.0, 4.0, 0.0]]);

        let (_, dir) = coord_to_radial(&coords, &edges, true).unwrap();
        let dir = dir.to_vec2::<f32>().unwrap();
        assert!((dir[0][0] - 0.6).abs() < 1e-6);
        assert!((dir[0][1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_coincident_points_stay_finite() {
        let device = Device::Cpu;
        let coords = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 1.0, 2.0, 3.0], (2, 3), &device).unwrap();
        let edges = EdgeIndex::from_pairs(&[(0, 1), (1, 1)], &device).unwrap();

        let (radial, dir) = coord_to_radial(&coords, &edges, true).unwrap();
        assert_eq!(radial.to_vec2::<f32>().unwrap(), vec![vec![0.0], vec![0.0]]);
        for row in dir.to_vec2::<f32>().unwrap() {
            for v in row {
                assert!(v.is_finite());
                assert_eq!(v, 0.0);
            }
        }
    }

    #[test]
    fn test_normalizer_carries_no_gradient() {
        let device = Device::Cpu;
        let coords = Var::from_tensor(
            &Tensor::from_vec(vec![0.0f64, 0.0, 0.0, 2.0, 0.0, 0.0], (2, 3), &device).unwrap(),
        )
        .unwrap();
        let edges = EdgeIndex::from_pairs(&[(1, 0)], &device).unwrap();

        let (_, dir) = coord_to_radial(coords.as_tensor(), &edges, true).unwrap();
        // dir_x = dx / (|dx| + eps); with the divisor detached, d(dir_x)/d(x1) = 1 / (|dx| + eps).
        let grads = dir.narrow(1, 0, 1).unwrap().sum_all().unwrap().backward().unwrap();
        let g = grads.get(coords.as_tensor()).unwrap().to_vec2::<f64>().unwrap();
        assert!((g[1][0] - 1.0 / (2.0 + NORM_EPSILON)).abs() < 1e-12);
        assert!((g[0][0] + 1.0 / (2.0 + NORM_EPSILON)).abs() < 1e-12);
    }

    #[test]
    fn test_wrong_coordinate_width() {
        let coords = Tensor::zeros((2, 2), DType::F32, &Device::Cpu).unwrap();
        let edges = EdgeIndex::from_pairs(&[(0, 1)], &Device::Cpu).unwrap();
        assert!(matches!(
            coord_to_radial(&coords, &edges, true),
            Err(Error::DimensionMismatch { expected: 3, got: 2, .. })
        ));
    }
}
