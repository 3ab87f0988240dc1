//! Edge lists and neighbor-graph construction.
//!
//! An [`EdgeIndex`] is a list of `(row, col)` node pairs. Messages computed on
//! edge `(row, col)` are aggregated onto `row`, and the geometric difference
//! vector is `coord[row] - coord[col]`. Self-loops and duplicate pairs are
//! allowed; each contributes independently.

use candle_core::{DType, Device, Tensor};

use crate::error::{Error, Result};

/// Edge list stored as two rank-1 `u32` index tensors.
#[derive(Debug, Clone)]
pub struct EdgeIndex {
    row: Tensor,
    col: Tensor,
    num_edges: usize,
    /// Largest node index referenced, `None` for an empty edge list.
    max_node: Option<usize>,
}

impl EdgeIndex {
    /// Build from host `(row, col)` pairs.
    pub fn from_pairs(pairs: &[(usize, usize)], device: &Device) -> Result<Self> {
        let mut row = Vec::with_capacity(pairs.len());
        let mut col = Vec::with_capacity(pairs.len());
        for &(r, c) in pairs {
            row.push(to_u32(r)?);
            col.push(to_u32(c)?);
        }
        let max_node = pairs.iter().map(|&(r, c)| r.max(c)).max();
        Ok(Self {
            row: Tensor::from_vec(row, pairs.len(), device)?,
            col: Tensor::from_vec(col, pairs.len(), device)?,
            num_edges: pairs.len(),
            max_node,
        })
    }

    /// Build from a `(2, E)` index tensor (`u32` or `i64`), row 0 holding `row` indices.
    pub fn from_coo(edge_index: &Tensor) -> Result<Self> {
        let (two, _) = edge_index.dims2().map_err(|_| coo_shape_error(edge_index))?;
        if two != 2 {
            return Err(coo_shape_error(edge_index));
        }
        let flat = index_values(edge_index)?;
        let half = flat.len() / 2;
        let pairs: Vec<(usize, usize)> = (0..half).map(|e| (flat[e], flat[half + e])).collect();
        Self::from_pairs(&pairs, edge_index.device())
    }

    /// Build from an `(E, 2)` tensor of `[row, col]` pairs.
    pub fn from_pair_rows(pairs: &Tensor) -> Result<Self> {
        let (_, two) = pairs.dims2().map_err(|_| pair_rows_shape_error(pairs))?;
        if two != 2 {
            return Err(pair_rows_shape_error(pairs));
        }
        let flat = index_values(pairs)?;
        let pairs_host: Vec<(usize, usize)> = flat.chunks_exact(2).map(|p| (p[0], p[1])).collect();
        Self::from_pairs(&pairs_host, pairs.device())
    }

    /// Receiving node of each edge (aggregation target).
    pub fn row(&self) -> &Tensor {
        &self.row
    }

    /// Sending node of each edge.
    pub fn col(&self) -> &Tensor {
        &self.col
    }

    pub fn len(&self) -> usize {
        self.num_edges
    }

    pub fn is_empty(&self) -> bool {
        self.num_edges == 0
    }

    pub fn device(&self) -> &Device {
        self.row.device()
    }

    /// Fail fast unless every referenced node is in `[0, num_nodes)`.
    pub fn check_nodes(&self, num_nodes: usize) -> Result<()> {
        match self.max_node {
            Some(max) if max >= num_nodes => Err(Error::IndexOutOfRange {
                index: max as i64,
                bound: num_nodes,
            }),
            _ => Ok(()),
        }
    }

    /// Copy the edge list back to host pairs.
    pub fn pairs(&self) -> Result<Vec<(usize, usize)>> {
        let row = self.row.to_vec1::<u32>()?;
        let col = self.col.to_vec1::<u32>()?;
        Ok(row
            .into_iter()
            .zip(col)
            .map(|(r, c)| (r as usize, c as usize))
            .collect())
    }

    /// Move the index tensors to `device`.
    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            row: self.row.to_device(device)?,
            col: self.col.to_device(device)?,
            num_edges: self.num_edges,
            max_node: self.max_node,
        })
    }
}

/// Build the cutoff neighbor graph of a point set.
///
/// Computes the full pairwise Euclidean distance matrix of `coords` (N x D)
/// in the dtype of `coords`, zeroes every entry greater than `cutoff`, then
/// keeps every nonzero entry as an edge in row-major order. The returned
/// attributes are the distances, shaped (E, 1) with the dtype of `coords`.
///
/// There is no explicit self-loop check: self pairs, and pairs of coincident
/// points, have distance exactly zero and drop out with the masked entries.
pub fn radius_graph(coords: &Tensor, cutoff: f64) -> Result<(EdgeIndex, Tensor)> {
    if cutoff.is_nan() {
        return Err(Error::InvalidConfig("cutoff must not be NaN".to_string()));
    }
    let (n, _) = coords.dims2().map_err(|_| Error::ShapeMismatch {
        what: "coordinates",
        detail: format!("expected (N, D), got {:?}", coords.dims()),
    })?;
    let diff = coords.unsqueeze(1)?.broadcast_sub(&coords.unsqueeze(0)?)?;
    let dist = diff.sqr()?.sum_keepdim(2)?.sqrt()?.squeeze(2)?;
    let within = dist.le(cutoff)?;
    let masked = within.where_cond(&dist, &dist.zeros_like()?)?;

    // Nonzero entries in row-major order.
    let host = masked.to_dtype(DType::F64)?.to_vec2::<f64>()?;
    let mut pairs = Vec::new();
    let mut flat = Vec::new();
    for (i, row) in host.iter().enumerate() {
        for (j, &d) in row.iter().enumerate() {
            if d != 0.0 {
                pairs.push((i, j));
                flat.push(to_u32(i * n + j)?);
            }
        }
    }

    let edge_attr = if pairs.is_empty() {
        Tensor::zeros((0, 1), coords.dtype(), coords.device())?
    } else {
        let flat = Tensor::from_vec(flat, pairs.len(), coords.device())?;
        masked.flatten_all()?.index_select(&flat, 0)?.unsqueeze(1)?
    };
    let edges = EdgeIndex::from_pairs(&pairs, coords.device())?;
    log::debug!("radius_graph: {} nodes, {} edges within {}", n, edges.len(), cutoff);
    Ok((edges, edge_attr))
}

fn to_u32(index: usize) -> Result<u32> {
    u32::try_from(index).map_err(|_| Error::IndexOutOfRange {
        index: index as i64,
        bound: u32::MAX as usize,
    })
}

fn index_values(t: &Tensor) -> Result<Vec<usize>> {
    match t.dtype() {
        DType::U32 | DType::I64 => {}
        other => {
            return Err(Error::ShapeMismatch {
                what: "edge index",
                detail: format!("expected u32 or i64 indices, got {other:?}"),
            })
        }
    }
    let values = t.to_dtype(DType::I64)?.flatten_all()?.to_vec1::<i64>()?;
    values
        .into_iter()
        .map(|v| {
            usize::try_from(v).map_err(|_| Error::IndexOutOfRange {
                index: v,
                bound: 0,
            })
        })
        .collect()
}

fn coo_shape_error(t: &Tensor) -> Error {
    Error::ShapeMismatch {
        what: "edge index",
        detail: format!("expected (2, E), got {:?}", t.dims()),
    }
}

fn pair_rows_shape_error(t: &Tensor) -> Error {
    Error::ShapeMismatch {
        what: "edge index",
        detail: format!("expected (E, 2), got {:?}", t.dims()),
    }
}
