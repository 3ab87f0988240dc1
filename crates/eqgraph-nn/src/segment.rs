//! Segment reductions: per-edge rows summarised per destination node.
//!
//! Both reductions allocate a zero accumulator of shape `(num_segments, W)`
//! and fill it with `index_add`, so the result is differentiable with respect
//! to `data` and never aliases it.
//!
//! ```text
//! sum[i]  = Σ_{e : ids[e] = i} data[e]
//! mean[i] = sum[i] / max(1, |{e : ids[e] = i}|)
//! ```

use std::fmt;
use std::str::FromStr;

use candle_core::{DType, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How per-edge values are combined at their destination node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Aggregation {
    /// Plain sum of incoming rows.
    Sum,
    /// Sum divided by the number of incoming rows (floored at 1).
    #[default]
    Mean,
}

impl Aggregation {
    /// Reduce `data` (E x W) onto `num_segments` rows using this mode.
    pub fn aggregate(self, data: &Tensor, segment_ids: &Tensor, num_segments: usize) -> Result<Tensor> {
        match self {
            Aggregation::Sum => segment_sum(data, segment_ids, num_segments),
            Aggregation::Mean => segment_mean(data, segment_ids, num_segments),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Mean => "mean",
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sum" => Ok(Aggregation::Sum),
            "mean" => Ok(Aggregation::Mean),
            other => Err(Error::UnknownAggregation(other.to_string())),
        }
    }
}

impl TryFrom<String> for Aggregation {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Aggregation> for String {
    fn from(value: Aggregation) -> Self {
        value.as_str().to_string()
    }
}

/// Sum rows of `data` (E x W) into `num_segments` rows keyed by `segment_ids` (E,).
///
/// Rows with no contributing edge are all-zero.
pub fn segment_sum(data: &Tensor, segment_ids: &Tensor, num_segments: usize) -> Result<Tensor> {
    let width = check_segments(data, segment_ids, num_segments)?;
    let ids = segment_ids.to_dtype(DType::U32)?;
    let acc = Tensor::zeros((num_segments, width), data.dtype(), data.device())?;
    Ok(acc.index_add(&ids, data, 0)?)
}

/// Mean of the rows of `data` per segment; isolated segments stay zero.
pub fn segment_mean(data: &Tensor, segment_ids: &Tensor, num_segments: usize) -> Result<Tensor> {
    let sum = segment_sum(data, segment_ids, num_segments)?;
    let edges = data.dim(0)?;
    let ids = segment_ids.to_dtype(DType::U32)?;
    let ones = Tensor::ones((edges, 1), data.dtype(), data.device())?;
    let counts = Tensor::zeros((num_segments, 1), data.dtype(), data.device())?.index_add(&ids, &ones, 0)?;
    let counts = counts.maximum(&counts.ones_like()?)?;
    Ok(sum.broadcast_div(&counts)?)
}

/// Validate shapes and the id range; returns the row width of `data`.
fn check_segments(data: &Tensor, segment_ids: &Tensor, num_segments: usize) -> Result<usize> {
    let (edges, width) = data.dims2().map_err(|_| Error::ShapeMismatch {
        what: "segment data",
        detail: format!("expected a rank-2 tensor, got {:?}", data.dims()),
    })?;
    let ids_len = segment_ids.dims1().map_err(|_| Error::ShapeMismatch {
        what: "segment ids",
        detail: format!("expected a rank-1 tensor, got {:?}", segment_ids.dims()),
    })?;
    if ids_len != edges {
        return Err(Error::DimensionMismatch {
            what: "segment ids",
            expected: edges,
            got: ids_len,
        });
    }
    match segment_ids.dtype() {
        DType::U32 | DType::I64 => {}
        other => {
            return Err(Error::ShapeMismatch {
                what: "segment ids",
                detail: format!("expected u32 or i64 ids, got {other:?}"),
            })
        }
    }
    let ids = segment_ids.to_dtype(DType::I64)?.to_vec1::<i64>()?;
    if let Some(&bad) = ids.iter().find(|&&id| id < 0 || id as usize >= num_segments) {
        return Err(Error::IndexOutOfRange {
            index: bad,
            bound: num_segments,
        });
    }
    Ok(width)
}
