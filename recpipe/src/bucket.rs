use crate::preprocess::PreprocessedExample;

/// Accumulates preprocessed examples into per-width-range FIFO queues.
///
/// An example of width `w` belongs to bucket `i` where
/// `boundaries[i - 1] <= w < boundaries[i]`, with implicit infinite bounds at
/// both ends. All buckets fill to the same batch size, and buckets are never
/// merged. With no boundaries every example lands in a single bucket, so each
/// batch is simply padded to its own maximum width.
///
/// Grouping similarly-sized examples keeps the padding waste per batch small:
/// all images in a batch are padded to the batch maximum, so mixing a
/// 40-pixel line into a batch of 250-pixel lines would spend most of the
/// batch tensor on padding.
pub struct BucketQueues {
    boundaries: Vec<i32>,
    batch_size: usize,
    queues: Vec<Vec<PreprocessedExample>>,
}

impl BucketQueues {
    /// Create queues for `boundaries.len() + 1` buckets, each emitting
    /// batches of `batch_size` examples. `boundaries` must be strictly
    /// increasing.
    pub fn new(boundaries: Vec<i32>, batch_size: usize) -> BucketQueues {
        let queues = (0..boundaries.len() + 1)
            .map(|_| Vec::with_capacity(batch_size))
            .collect();
        BucketQueues {
            boundaries,
            batch_size,
            queues,
        }
    }

    /// Bucket index for an image of the given width.
    pub fn bucket_index(&self, width: i32) -> usize {
        self.boundaries.partition_point(|&bound| bound <= width)
    }

    /// Queue an example. Once the example's bucket reaches the batch size,
    /// its contents are returned in arrival order and the bucket restarts
    /// empty.
    pub fn push(&mut self, example: PreprocessedExample) -> Option<Vec<PreprocessedExample>> {
        let bucket = self.bucket_index(example.width);
        let queue = &mut self.queues[bucket];
        queue.push(example);
        if queue.len() == self.batch_size {
            Some(std::mem::replace(
                queue,
                Vec::with_capacity(self.batch_size),
            ))
        } else {
            None
        }
    }

    /// Number of queued examples not yet emitted in any batch.
    pub fn pending(&self) -> usize {
        self.queues.iter().map(|queue| queue.len()).sum()
    }
}
