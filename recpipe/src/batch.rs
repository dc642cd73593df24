use rten_tensor::prelude::*;
use rten_tensor::{NdTensor, NdTensorView};

use crate::charset::EOS_LABEL;
use crate::preprocess::PreprocessedExample;
use crate::sparse::SparseLabels;

/// The value used for image pixels to the right of an example's true width:
/// mid-range grey in the normalized pixel space.
pub const PAD_VALUE: f32 = 0.;

/// A collated batch of examples, batch dimension first.
///
/// Batches are transient: one is assembled per consumption cycle of the
/// training loop and nothing in the pipeline retains it afterwards.
pub struct Batch {
    /// NCHW image tensor, padded on the right to the widest example in the
    /// batch.
    pub images: NdTensor<f32, 4>,

    /// True (unpadded) width of each example.
    pub widths: Vec<i32>,

    /// Per-example label sequences in sparse form.
    pub labels: SparseLabels,

    /// Label count of each example, excluding the end-of-sequence sentinel.
    pub lengths: Vec<i32>,

    /// Human-readable caption of each example.
    pub texts: Vec<String>,
}

impl Batch {
    /// Number of examples in the batch.
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

/// Collate preprocessed examples into a [Batch].
///
/// Images are copied into an `[N, 1, height, max_width]` tensor padded with
/// [PAD_VALUE]. Label sequences are padded with [EOS_LABEL] to the longest
/// sequence in the batch and converted to sparse form, which drops the
/// padding positions again.
pub fn collate(examples: Vec<PreprocessedExample>) -> Batch {
    assert!(!examples.is_empty(), "cannot collate an empty batch");

    let height = examples[0].image.size(1);
    let max_width = examples
        .iter()
        .map(|example| example.image.size(2))
        .max()
        .unwrap();
    let max_labels = examples
        .iter()
        .map(|example| example.labels.len())
        .max()
        .unwrap();

    let mut images = NdTensor::full([examples.len(), 1, height, max_width], PAD_VALUE);
    let mut dense_labels = NdTensor::full([examples.len(), max_labels], EOS_LABEL);
    let mut widths = Vec::with_capacity(examples.len());
    let mut lengths = Vec::with_capacity(examples.len());
    let mut texts = Vec::with_capacity(examples.len());

    for (index, example) in examples.into_iter().enumerate() {
        let width = example.image.size(2);
        images
            .slice_mut((index, 0, .., ..width))
            .copy_from(&example.image.slice([0]));
        dense_labels
            .slice_mut((index, ..example.labels.len()))
            .copy_from(&NdTensorView::from_data(
                [example.labels.len()],
                &example.labels[..],
            ));
        widths.push(example.width);
        lengths.push(example.length);
        texts.push(example.text);
    }

    let labels = SparseLabels::from_dense(dense_labels.view(), EOS_LABEL);

    Batch {
        images,
        widths,
        labels,
        lengths,
        texts,
    }
}
