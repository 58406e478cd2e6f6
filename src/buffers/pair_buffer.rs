//! Per-environment sliding window of feature embeddings.
//!
//! Each parallel environment owns one [`StatePairBuffer`] for the whole run.
//! The window is never reset at iteration or episode boundaries: temporal
//! distances are measured in raw environment steps, including across resets.
//! That is the intended semantics of the uncertainty signal, not an accident.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// One buffered embedding with its logical timestamp.
#[derive(Debug, Clone)]
struct Entry {
    embedding: Vec<f32>,
    timestamp: u64,
}

/// Fixed-capacity FIFO window of `(embedding, timestamp)` entries.
///
/// Implemented as a ring buffer indexed by modulo arithmetic, so eviction of
/// the oldest entry is O(1). Timestamps come from an internal monotonic
/// counter and are strictly increasing; the stored window is always a
/// contiguous suffix of that counter.
#[derive(Debug)]
pub struct StatePairBuffer {
    slots: Vec<Entry>,
    capacity: usize,
    feature_dim: usize,
    /// Index of the oldest entry once the ring has wrapped.
    head: usize,
    len: usize,
    next_timestamp: u64,
}

impl StatePairBuffer {
    /// Create an empty buffer holding at most `capacity` embeddings of
    /// `feature_dim` floats.
    pub fn new(capacity: usize, feature_dim: usize) -> Self {
        assert!(capacity > 0, "pair buffer capacity must be positive");
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            feature_dim,
            head: 0,
            len: 0,
            next_timestamp: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append an embedding, stamping it with the next timestamp and evicting
    /// the oldest entry when the window is full.
    pub fn add(&mut self, embedding: Vec<f32>) {
        debug_assert_eq!(embedding.len(), self.feature_dim);

        let entry = Entry {
            embedding,
            timestamp: self.next_timestamp,
        };
        self.next_timestamp += 1;

        if self.len < self.capacity {
            self.slots.push(entry);
            self.len += 1;
        } else {
            // Overwrite the oldest slot and advance the ring head.
            self.slots[self.head] = entry;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    fn entry(&self, chronological: usize) -> &Entry {
        debug_assert!(chronological < self.len);
        &self.slots[(self.head + chronological) % self.capacity]
    }

    /// Timestamp of the oldest retained entry.
    pub fn oldest_timestamp(&self) -> Option<u64> {
        if self.is_empty() {
            None
        } else {
            Some(self.entry(0).timestamp)
        }
    }

    /// Every ordered pair `(e_i, e_j)` with `i <= j`, including the zero-gap
    /// diagonal, regenerated from scratch on each call.
    ///
    /// Returns `None` while fewer than two entries are buffered; callers skip
    /// this environment's auxiliary loss for that update.
    pub fn all_pairs(&self) -> Option<PairSet> {
        if self.len < 2 {
            return None;
        }

        let n = self.len;
        let n_pairs = n * (n + 1) / 2;
        let dim = self.feature_dim;

        let mut earlier = Vec::with_capacity(n_pairs * dim);
        let mut later = Vec::with_capacity(n_pairs * dim);
        let mut gaps = Vec::with_capacity(n_pairs);

        for i in 0..n {
            let first = self.entry(i);
            for j in i..n {
                let second = self.entry(j);
                earlier.extend_from_slice(&first.embedding);
                later.extend_from_slice(&second.embedding);
                gaps.push((second.timestamp - first.timestamp) as f32);
            }
        }

        Some(PairSet {
            earlier,
            later,
            gaps,
            n_pairs,
            feature_dim: dim,
        })
    }
}

/// Flattened pair batch for one auxiliary regression pass.
#[derive(Debug)]
pub struct PairSet {
    /// Earlier embeddings [n_pairs * feature_dim].
    pub earlier: Vec<f32>,
    /// Later embeddings [n_pairs * feature_dim].
    pub later: Vec<f32>,
    /// Step gaps [n_pairs].
    pub gaps: Vec<f32>,
    pub n_pairs: usize,
    pub feature_dim: usize,
}

impl PairSet {
    /// Earlier embeddings as `[n_pairs, feature_dim]`.
    pub fn earlier_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        Tensor::<B, 1>::from_floats(self.earlier.as_slice(), device)
            .reshape([self.n_pairs, self.feature_dim])
    }

    /// Later embeddings as `[n_pairs, feature_dim]`.
    pub fn later_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        Tensor::<B, 1>::from_floats(self.later.as_slice(), device)
            .reshape([self.n_pairs, self.feature_dim])
    }

    /// Step gaps as `[n_pairs, 1]`, matching the uncertainty head output.
    pub fn gaps_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        Tensor::<B, 1>::from_floats(self.gaps.as_slice(), device).reshape([self.n_pairs, 1])
    }
}
