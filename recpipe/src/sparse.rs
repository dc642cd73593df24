use rten_tensor::prelude::*;
use rten_tensor::{NdTensor, NdTensorView};

/// Sparse encoding of a dense padded label batch.
///
/// Stores the (row, column) index and value of every non-sentinel entry, in
/// row-major, left-to-right order, together with the dense shape. This is
/// the form variable-length sequence losses consume: padding positions carry
/// no entries, so each row's stored values are exactly that example's label
/// sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct SparseLabels {
    indices: Vec<[usize; 2]>,
    values: Vec<i32>,
    dense_shape: [usize; 2],
}

impl SparseLabels {
    /// Build the sparse form of `dense`, omitting entries equal to
    /// `sentinel`.
    pub fn from_dense(dense: NdTensorView<i32, 2>, sentinel: i32) -> SparseLabels {
        let [rows, cols] = dense.shape();
        let mut indices = Vec::new();
        let mut values = Vec::new();
        for row in 0..rows {
            for col in 0..cols {
                let value = dense[[row, col]];
                if value != sentinel {
                    indices.push([row, col]);
                    values.push(value);
                }
            }
        }
        SparseLabels {
            indices,
            values,
            dense_shape: [rows, cols],
        }
    }

    /// (row, column) position of each stored entry.
    pub fn indices(&self) -> &[[usize; 2]] {
        &self.indices
    }

    /// Stored entries, aligned with [indices](SparseLabels::indices).
    pub fn values(&self) -> &[i32] {
        &self.values
    }

    /// Shape of the dense batch this was built from.
    pub fn dense_shape(&self) -> [usize; 2] {
        self.dense_shape
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Reconstruct the dense batch, filling unspecified positions with
    /// `fill`.
    ///
    /// Densifying with the sentinel passed to
    /// [from_dense](SparseLabels::from_dense) reproduces the original batch
    /// exactly.
    pub fn to_dense(&self, fill: i32) -> NdTensor<i32, 2> {
        let mut dense = NdTensor::full(self.dense_shape, fill);
        for (&[row, col], &value) in self.indices.iter().zip(&self.values) {
            dense[[row, col]] = value;
        }
        dense
    }
}

#[cfg(test)]
mod tests {
    use rten_tensor::prelude::*;
    use rten_tensor::NdTensor;

    use super::SparseLabels;
    use crate::charset::EOS_LABEL;

    #[test]
    fn test_from_dense_row_major_order() {
        let dense = NdTensor::from_data(
            [2, 4],
            vec![3, 5, 7, EOS_LABEL, 2, EOS_LABEL, EOS_LABEL, EOS_LABEL],
        );

        let sparse = SparseLabels::from_dense(dense.view(), EOS_LABEL);

        assert_eq!(sparse.indices(), [[0, 0], [0, 1], [0, 2], [1, 0]]);
        assert_eq!(sparse.values(), [3, 5, 7, 2]);
        assert_eq!(sparse.dense_shape(), [2, 4]);
        assert_eq!(sparse.len(), 4);
    }

    #[test]
    fn test_round_trip() {
        let dense = NdTensor::from_data(
            [3, 3],
            vec![
                0, 1, EOS_LABEL,
                4, EOS_LABEL, EOS_LABEL,
                5, 6, 7,
            ],
        );

        let sparse = SparseLabels::from_dense(dense.view(), EOS_LABEL);
        let rebuilt = sparse.to_dense(EOS_LABEL);

        assert_eq!(rebuilt, dense);
    }

    #[test]
    fn test_label_zero_is_preserved() {
        // Label 0 is a real charset index, not padding; only the sentinel
        // may be dropped.
        let dense = NdTensor::from_data([1, 3], vec![0, 0, EOS_LABEL]);

        let sparse = SparseLabels::from_dense(dense.view(), EOS_LABEL);

        assert_eq!(sparse.values(), [0, 0]);
    }
}
