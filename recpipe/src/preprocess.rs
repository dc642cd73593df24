use rten_tensor::prelude::*;
use rten_tensor::NdTensor;

use crate::source::Example;

/// The value a fully black input pixel maps to in preprocessed images.
pub const BLACK_VALUE: f32 = -0.5;

/// A preprocessed example, ready for bucketing and batching.
pub struct PreprocessedExample {
    /// CHW greyscale image with values in [BLACK_VALUE, BLACK_VALUE + 1].
    pub image: NdTensor<f32, 3>,

    /// Horizontal extent of the image in pixels, used downstream to compute
    /// valid post-CNN sequence lengths.
    pub width: i32,

    /// Label sequence, including the end-of-sequence sentinel.
    pub labels: Vec<i32>,

    /// Number of labels excluding the sentinel.
    pub length: i32,

    /// Human-readable caption for the image.
    pub text: String,
}

/// Convert a raw example into its trainable form.
///
/// The image is reduced to a single grey channel and rescaled from `[0, 255]`
/// to `[BLACK_VALUE, BLACK_VALUE + 1]`. The greyscale conversion uses ITU
/// BT.601 weights, matching the conversion the recognition side of the system
/// applies to its inputs; generators are expected to pre-gray their output,
/// so all three channels normally agree and the weighting is an identity.
///
/// This function is pure. Examples can be preprocessed on any number of
/// threads.
pub fn preprocess(example: Example) -> PreprocessedExample {
    let Example {
        text,
        image,
        labels,
    } = example;
    let [height, width, channels] = image.shape();

    // ITU BT.601 weights for RGB => luminance conversion.
    let chan_weights = [0.299, 0.587, 0.114];

    let mut grey_img = NdTensor::uninit([height, width]);
    for y in 0..height {
        for x in 0..width {
            let mut pixel = BLACK_VALUE;
            for (chan, weight) in (0..channels).zip(chan_weights) {
                pixel += image[[y, x, chan]] as f32 / 255. * weight;
            }
            grey_img[[y, x]].write(pixel);
        }
    }
    // Safety: We initialized all the pixels.
    let grey_img = unsafe { grey_img.assume_init() }.into_shape([1, height, width]);

    let length = labels.len() as i32 - 1;

    PreprocessedExample {
        image: grey_img,
        width: width as i32,
        labels,
        length,
        text,
    }
}
