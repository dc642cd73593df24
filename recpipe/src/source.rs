use std::sync::Arc;

use anyhow::Context;
use rten_tensor::prelude::*;
use rten_tensor::NdTensor;
use thiserror::Error;

use crate::charset::Charset;

/// Height of every generated line image, in pixels.
pub const LINE_HEIGHT: usize = 32;

/// Channel count of generated line images. Generators are expected to
/// pre-gray their output, so all three channels normally carry the same
/// value.
pub const LINE_CHANNELS: usize = 3;

/// Errors produced when adapting generator output into examples.
#[derive(Error, Clone, Debug, PartialEq)]
pub enum SourceError {
    /// The generator produced an image that violates the fixed
    /// height/channel contract.
    #[error("generator produced an image with shape {0:?}, expected [32, _, 3]")]
    BadImageShape([usize; 3]),
}

/// An external generator of synthetic text line images.
///
/// Implementations own whatever iteration state they need. The pipeline
/// drives a source from a single thread and never rewinds it; concurrent
/// callers need external synchronization.
pub trait LineSource {
    /// Produce the next (caption, image) pair. The image is in HWC order
    /// with height [LINE_HEIGHT] and [LINE_CHANNELS] channels.
    fn next_line(&mut self) -> anyhow::Result<(String, NdTensor<u8, 3>)>;
}

/// A single generated example: the caption, its rendered image and the
/// caption encoded as a label sequence ending in
/// [EOS_LABEL](crate::charset::EOS_LABEL).
pub struct Example {
    pub text: String,
    pub image: NdTensor<u8, 3>,
    pub labels: Vec<i32>,
}

/// Adapts a [LineSource] into an unbounded stream of [Example]s.
///
/// The stream never ends on its own; it stops only after yielding an error,
/// which callers should treat as fatal.
pub struct ExampleStream<S: LineSource> {
    source: S,
    charset: Arc<Charset>,
}

impl<S: LineSource> ExampleStream<S> {
    pub fn new(source: S, charset: Arc<Charset>) -> ExampleStream<S> {
        ExampleStream { source, charset }
    }

    /// Advance the generator one step, check the image contract and encode
    /// the caption.
    pub fn next_example(&mut self) -> anyhow::Result<Example> {
        let (text, image) = self.source.next_line()?;

        let [height, _width, channels] = image.shape();
        if height != LINE_HEIGHT || channels != LINE_CHANNELS {
            return Err(SourceError::BadImageShape(image.shape()).into());
        }

        let labels = self
            .charset
            .encode(&text)
            .with_context(|| format!("failed to encode caption {:?}", text))?;

        Ok(Example {
            text,
            image,
            labels,
        })
    }
}

impl<S: LineSource> Iterator for ExampleStream<S> {
    type Item = anyhow::Result<Example>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_example())
    }
}
