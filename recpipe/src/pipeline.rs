use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{anyhow, Context};
use crossbeam_channel::{bounded, Receiver};
use rten_tensor::prelude::*;

use crate::batch::{collate, Batch};
use crate::bucket::BucketQueues;
use crate::charset::Charset;
use crate::preprocess::{preprocess, PreprocessedExample};
use crate::source::{Example, ExampleStream, LineSource};

/// Number of assembled batches buffered ahead of the consumer.
const BATCH_BUFFER: usize = 8;

/// Predicate deciding whether a preprocessed example may enter a bucket.
pub type FilterFn = Arc<dyn Fn(&PreprocessedExample) -> bool + Send + Sync>;

/// Configuration for an [InputPipeline].
#[derive(Clone)]
pub struct PipelineParams {
    /// Number of preprocessing worker threads. Also scales the element
    /// buffers between stages.
    pub num_threads: usize,

    /// Examples per emitted batch, shared by every bucket.
    pub batch_size: usize,

    /// Width thresholds separating buckets, in increasing order. Empty
    /// disables bucketing; batches are then assembled in arrival order and
    /// padded to their own maximum width.
    pub boundaries: Vec<i32>,

    /// Examples this predicate rejects are dropped before bucketing. Buckets
    /// still fill to `batch_size` from the examples that remain.
    pub filter: Option<FilterFn>,

    /// Enable per-stage logging.
    pub debug: bool,
}

impl Default for PipelineParams {
    fn default() -> PipelineParams {
        PipelineParams {
            num_threads: 4,
            batch_size: 32,
            boundaries: (32..=256).step_by(32).collect(),
            filter: None,
            debug: false,
        }
    }
}

/// Streams batches assembled from an unbounded example generator.
///
/// The pipeline runs three kinds of stage threads connected by bounded
/// channels: a generator stage that advances the [LineSource] and encodes
/// captions, `num_threads` preprocessing workers, and a batcher stage that
/// owns the bucket queues and pads completed buckets. The bounded channels
/// double as prefetch buffers: each stage runs ahead of the consumer until
/// its output buffer fills.
///
/// The generator stage is the pipeline's single serialization point; the
/// source is moved onto that thread and nothing else touches its cursor.
/// Examples are dealt to the workers in round-robin rotation and collected
/// in the same rotation, so they reach the bucket queues in generator order
/// and the emitted batch sequence is fully determined by the source and
/// filter, whatever the thread count.
///
/// The first error from any stage flows through the channels, is yielded
/// once by the iterator, and shuts the pipeline down. Dropping the pipeline
/// disconnects the stages and joins every thread.
pub struct InputPipeline {
    batches: Option<Receiver<anyhow::Result<Batch>>>,
    shutdown: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl InputPipeline {
    /// Validate `params` and spawn the stage threads.
    pub fn spawn<S>(
        source: S,
        charset: Arc<Charset>,
        params: PipelineParams,
    ) -> anyhow::Result<InputPipeline>
    where
        S: LineSource + Send + 'static,
    {
        let PipelineParams {
            num_threads,
            batch_size,
            boundaries,
            filter,
            debug,
        } = params;

        if batch_size == 0 {
            return Err(anyhow!("batch size must be greater than 0"));
        }
        if num_threads == 0 {
            return Err(anyhow!("at least one preprocessing thread is required"));
        }
        if !boundaries.windows(2).all(|pair| pair[0] < pair[1]) {
            return Err(anyhow!("bucket boundaries must be strictly increasing"));
        }

        // Per-worker buffer depth. Summed over the input and output sides of
        // all workers this keeps `num_threads * batch_size * 2` examples in
        // flight ahead of batch assembly.
        let per_worker_buffer = batch_size * 2;

        // One channel pair per worker. Dealing and collecting in the same
        // rotation preserves generator order through the parallel stage;
        // filtered examples stay in the rotation as `None` placeholders.
        let mut raw_txs = Vec::with_capacity(num_threads);
        let mut raw_rxs = Vec::with_capacity(num_threads);
        let mut pre_txs = Vec::with_capacity(num_threads);
        let mut pre_rxs = Vec::with_capacity(num_threads);
        for _ in 0..num_threads {
            let (raw_tx, raw_rx) = bounded::<anyhow::Result<Example>>(per_worker_buffer);
            raw_txs.push(raw_tx);
            raw_rxs.push(raw_rx);
            let (pre_tx, pre_rx) =
                bounded::<anyhow::Result<Option<PreprocessedExample>>>(per_worker_buffer);
            pre_txs.push(pre_tx);
            pre_rxs.push(pre_rx);
        }
        let (batch_tx, batch_rx) = bounded::<anyhow::Result<Batch>>(BATCH_BUFFER);

        let shutdown = Arc::new(AtomicBool::new(false));
        let mut threads = Vec::with_capacity(num_threads + 2);

        // Generator stage. Owns the source; forwards the first error and
        // stops, since the stream is not restartable.
        let generator_shutdown = shutdown.clone();
        let mut stream = ExampleStream::new(source, charset);
        threads.push(
            std::thread::Builder::new()
                .name("recpipe-generator".to_string())
                .spawn(move || {
                    let mut turn = 0;
                    while !generator_shutdown.load(Ordering::Relaxed) {
                        let example = stream.next_example();
                        let failed = example.is_err();
                        if raw_txs[turn].send(example).is_err() || failed {
                            break;
                        }
                        turn = (turn + 1) % raw_txs.len();
                    }
                })
                .context("failed to spawn generator thread")?,
        );

        // Preprocessing workers. Examples are pure and independent, so any
        // number of workers may map over them.
        for (worker_id, (raw_rx, pre_tx)) in raw_rxs.into_iter().zip(pre_txs).enumerate() {
            let filter = filter.clone();
            let worker_shutdown = shutdown.clone();
            threads.push(
                std::thread::Builder::new()
                    .name(format!("recpipe-worker-{}", worker_id))
                    .spawn(move || {
                        while !worker_shutdown.load(Ordering::Relaxed) {
                            let example = match raw_rx.recv() {
                                Ok(example) => example,
                                // Generator exited; drain is complete.
                                Err(_) => break,
                            };
                            let result = match example {
                                Ok(example) => {
                                    let pre = preprocess(example);
                                    if filter.as_ref().is_some_and(|keep| !keep(&pre)) {
                                        Ok(None)
                                    } else {
                                        Ok(Some(pre))
                                    }
                                }
                                Err(err) => Err(err),
                            };
                            let failed = result.is_err();
                            if pre_tx.send(result).is_err() || failed {
                                break;
                            }
                        }
                    })
                    .with_context(|| format!("failed to spawn worker thread {}", worker_id))?,
            );
        }

        // Batcher stage. Sole owner of the bucket queues; collects worker
        // output in deal order.
        let batcher_shutdown = shutdown.clone();
        let mut buckets = BucketQueues::new(boundaries, batch_size);
        threads.push(
            std::thread::Builder::new()
                .name("recpipe-batcher".to_string())
                .spawn(move || {
                    let mut turn = 0;
                    while !batcher_shutdown.load(Ordering::Relaxed) {
                        let received = match pre_rxs[turn].recv() {
                            Ok(received) => received,
                            Err(_) => break,
                        };
                        turn = (turn + 1) % pre_rxs.len();
                        match received {
                            Ok(Some(example)) => {
                                let Some(full) = buckets.push(example) else {
                                    continue;
                                };
                                let batch = collate(full);
                                if debug {
                                    println!(
                                        "Assembled batch of {} images padded to width {}",
                                        batch.len(),
                                        batch.images.size(3),
                                    );
                                }
                                if batch_tx.send(Ok(batch)).is_err() {
                                    break;
                                }
                            }
                            // A filtered-out example; the rotation advances.
                            Ok(None) => {}
                            Err(err) => {
                                let _ = batch_tx.send(Err(err));
                                break;
                            }
                        }
                    }
                })
                .context("failed to spawn batcher thread")?,
        );

        Ok(InputPipeline {
            batches: Some(batch_rx),
            shutdown,
            threads,
        })
    }
}

impl Iterator for InputPipeline {
    type Item = anyhow::Result<Batch>;

    /// Block until the next batch is assembled. Yields `None` only after an
    /// error has shut the stages down.
    fn next(&mut self) -> Option<Self::Item> {
        self.batches.as_ref()?.recv().ok()
    }
}

impl Drop for InputPipeline {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // Disconnect the consumer side first so stages blocked on a full
        // buffer observe the hang-up and unwind.
        self.batches = None;
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rten_tensor::prelude::*;
    use rten_tensor::NdTensor;

    use super::{InputPipeline, PipelineParams};
    use crate::bucket::BucketQueues;
    use crate::charset::Charset;
    use crate::preprocess::preprocess;
    use crate::source::{Example, LineSource, LINE_HEIGHT};

    const TEST_SYMBOLS: &str = "abcdefghijklmnopqrstuvwxyz ";

    /// Deterministic stand-in for the external image generator: captions
    /// cycle through a fixed word list and the rendered "image" is a flat
    /// grey line sized to the caption.
    struct CyclingSource {
        captions: Vec<String>,
        step: usize,
    }

    impl CyclingSource {
        fn new(captions: &[&str]) -> CyclingSource {
            CyclingSource {
                captions: captions.iter().map(|text| text.to_string()).collect(),
                step: 0,
            }
        }

        fn render(text: &str) -> NdTensor<u8, 3> {
            NdTensor::full([LINE_HEIGHT, 8 * text.len(), 3], 200u8)
        }
    }

    impl LineSource for CyclingSource {
        fn next_line(&mut self) -> anyhow::Result<(String, NdTensor<u8, 3>)> {
            let text = self.captions[self.step % self.captions.len()].clone();
            self.step += 1;
            let image = Self::render(&text);
            Ok((text, image))
        }
    }

    fn test_charset() -> Arc<Charset> {
        Arc::new(Charset::new(TEST_SYMBOLS).unwrap())
    }

    #[test]
    fn test_invalid_params_rejected() {
        let cases = [
            PipelineParams {
                batch_size: 0,
                ..Default::default()
            },
            PipelineParams {
                num_threads: 0,
                ..Default::default()
            },
            PipelineParams {
                boundaries: vec![32, 32, 64],
                ..Default::default()
            },
            PipelineParams {
                boundaries: vec![64, 32],
                ..Default::default()
            },
        ];

        for params in cases {
            let source = CyclingSource::new(&["word"]);
            assert!(InputPipeline::spawn(source, test_charset(), params).is_err());
        }
    }

    #[test]
    fn test_pipeline_matches_pure_stages() {
        let captions = ["at", "horse", "milestone", "ox", "lantern", "mi"];
        let boundaries = vec![40, 80];
        let batch_size = 3;
        let n_batches = 6;

        // Reference: the pure components applied sequentially.
        let charset = test_charset();
        let mut reference_source = CyclingSource::new(&captions);
        let mut queues = BucketQueues::new(boundaries.clone(), batch_size);
        let mut expected: Vec<Vec<String>> = Vec::new();
        while expected.len() < n_batches {
            let (text, image) = reference_source.next_line().unwrap();
            let labels = charset.encode(&text).unwrap();
            let pre = preprocess(Example {
                text,
                image,
                labels,
            });
            if let Some(full) = queues.push(pre) {
                expected.push(full.iter().map(|ex| ex.text.clone()).collect());
            }
        }

        // Round-robin dealing keeps the emitted sequence identical for any
        // worker count.
        for num_threads in [1, 3] {
            let pipeline = InputPipeline::spawn(
                CyclingSource::new(&captions),
                charset.clone(),
                PipelineParams {
                    num_threads,
                    batch_size,
                    boundaries: boundaries.clone(),
                    ..Default::default()
                },
            )
            .unwrap();

            let emitted: Vec<Vec<String>> = pipeline
                .take(n_batches)
                .map(|batch| batch.unwrap().texts)
                .collect();

            assert_eq!(emitted, expected, "{} threads", num_threads);
        }
    }

    #[test]
    fn test_batches_are_bucketed_and_padded() {
        let pipeline = InputPipeline::spawn(
            CyclingSource::new(&["ab", "abcdef", "abcdefghij", "xyz"]),
            test_charset(),
            PipelineParams {
                num_threads: 2,
                batch_size: 4,
                boundaries: vec![30, 60],
                ..Default::default()
            },
        )
        .unwrap();

        let reference = BucketQueues::new(vec![30, 60], 4);
        for batch in pipeline.take(6) {
            let batch = batch.unwrap();
            assert_eq!(batch.len(), 4);

            // All examples in a batch come from one bucket, and images are
            // padded to the widest member.
            let buckets: Vec<usize> = batch
                .widths
                .iter()
                .map(|&width| reference.bucket_index(width))
                .collect();
            assert!(buckets.iter().all(|&bucket| bucket == buckets[0]));

            let max_width = *batch.widths.iter().max().unwrap();
            assert_eq!(batch.images.shape()[3], max_width as usize);
            assert_eq!(batch.images.shape()[0], 4);

            // Lengths track caption sizes.
            for (text, &length) in batch.texts.iter().zip(&batch.lengths) {
                assert_eq!(length as usize, text.len());
            }
        }
    }

    #[test]
    fn test_filter_excludes_examples() {
        let pipeline = InputPipeline::spawn(
            CyclingSource::new(&["short", "a much longer caption", "tiny"]),
            test_charset(),
            PipelineParams {
                num_threads: 2,
                batch_size: 4,
                boundaries: Vec::new(),
                filter: Some(Arc::new(|pre| pre.text.len() <= 10)),
                ..Default::default()
            },
        )
        .unwrap();

        for batch in pipeline.take(4) {
            let batch = batch.unwrap();
            assert_eq!(batch.len(), 4);
            for text in &batch.texts {
                assert!(text.len() <= 10, "filtered caption {:?} leaked", text);
            }
        }
    }

    #[test]
    fn test_charset_mismatch_surfaces_as_error() {
        // '!' is not in the charset, so the very first example fails and the
        // pipeline reports the error instead of a batch.
        let mut pipeline = InputPipeline::spawn(
            CyclingSource::new(&["bad caption!"]),
            test_charset(),
            PipelineParams {
                num_threads: 1,
                batch_size: 2,
                ..Default::default()
            },
        )
        .unwrap();

        assert!(pipeline.next().unwrap().is_err());
        assert!(pipeline.next().is_none());
    }
}
