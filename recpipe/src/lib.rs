mod batch;
mod bucket;
mod charset;
mod pipeline;
mod preprocess;
mod source;
mod sparse;

pub use batch::{collate, Batch, PAD_VALUE};
pub use bucket::BucketQueues;
pub use charset::{Charset, CharsetError, EOS_LABEL};
pub use pipeline::{FilterFn, InputPipeline, PipelineParams};
pub use preprocess::{preprocess, PreprocessedExample, BLACK_VALUE};
pub use source::{Example, ExampleStream, LineSource, SourceError, LINE_CHANNELS, LINE_HEIGHT};
pub use sparse::SparseLabels;
