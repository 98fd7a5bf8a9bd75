//! Per-class feature caches
//!
//! A [`CacheStore`] maps a class label to a [`ClassBucket`]: a small array of
//! [`CacheEntry`] values kept sorted ascending by loss and bounded by the
//! store's shot capacity. Inserting into a full bucket evicts the highest-loss
//! entry only when the candidate has strictly lower loss, so every bucket holds
//! the lowest-loss observations seen for its class.
//!
//! Two stores exist per dataset pass:
//! - **Positive**: confident predictions, pulling similar queries toward the class
//! - **Negative**: ambiguous predictions carrying their probability map, used to
//!   suppress classes for similar queries
//!
//! Labels are kept in a `BTreeMap` so iteration is always ascending by label.

pub mod mask;
pub mod scorer;

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;

use ordered_float::OrderedFloat;

use crate::errors::{AdaptError, Result};
use crate::similarity::normalize_inplace;

/// Bytes per stored scalar (f32)
const SCALAR_BYTES: usize = std::mem::size_of::<f32>();

/// Which of the two caches a store backs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Positive,
    Negative,
}

impl CacheKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Positive => "positive",
            CacheKind::Negative => "negative",
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// L2-normalized feature vector.
///
/// Construction always normalizes, so dot products between embeddings are
/// cosine similarities.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// Normalize `values` and wrap them. A zero vector stays zero.
    pub fn new(mut values: Vec<f32>) -> Self {
        normalize_inplace(&mut values);
        Self(values)
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }
}

impl Deref for Embedding {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.0
    }
}

/// One cached observation
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub embedding: Embedding,
    /// Prediction entropy of the sample; lower is more confident
    pub loss: f32,
    /// Softmax output of the sample, present only in negative-cache entries
    pub probability_map: Option<Vec<f32>>,
}

impl CacheEntry {
    /// Entry for the positive cache
    pub fn positive(embedding: Embedding, loss: f32) -> Self {
        Self {
            embedding,
            loss,
            probability_map: None,
        }
    }

    /// Entry for the negative cache
    pub fn negative(embedding: Embedding, loss: f32, probability_map: Vec<f32>) -> Self {
        Self {
            embedding,
            loss,
            probability_map: Some(probability_map),
        }
    }

    /// Bytes held by this entry's numeric payload.
    ///
    /// Fails with [`AdaptError::TypeMismatch`] if any stored component is not a
    /// finite number.
    pub fn byte_size(&self) -> Result<usize> {
        if !self.loss.is_finite() {
            return Err(AdaptError::TypeMismatch(format!(
                "cache entry loss is not a finite number ({})",
                self.loss
            )));
        }
        if let Some(bad) = self.embedding.iter().find(|v| !v.is_finite()) {
            return Err(AdaptError::TypeMismatch(format!(
                "cache entry embedding holds a non-numeric value ({bad})"
            )));
        }
        let map_len = match &self.probability_map {
            Some(map) => {
                if let Some(bad) = map.iter().find(|v| !v.is_finite()) {
                    return Err(AdaptError::TypeMismatch(format!(
                        "cache entry probability map holds a non-numeric value ({bad})"
                    )));
                }
                map.len()
            }
            None => 0,
        };

        Ok((self.embedding.dim() + 1 + map_len) * SCALAR_BYTES)
    }
}

/// Result of offering an entry to a bucket
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InsertOutcome {
    /// Bucket had room; entry added
    Inserted,
    /// Bucket was full; the highest-loss entry was evicted
    Replaced { evicted_loss: f32 },
    /// Bucket was full and the candidate was not better than its worst entry
    Rejected,
}

impl InsertOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsertOutcome::Inserted => "inserted",
            InsertOutcome::Replaced { .. } => "replaced",
            InsertOutcome::Rejected => "rejected",
        }
    }

    /// Whether the bucket changed
    pub fn is_stored(&self) -> bool {
        !matches!(self, InsertOutcome::Rejected)
    }
}

/// Loss-ordered, capacity-bounded entries for one class label
#[derive(Debug, Clone, Default)]
pub struct ClassBucket {
    entries: Vec<CacheEntry>,
}

impl ClassBucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer `entry` to the bucket, keeping at most `capacity` lowest-loss entries.
    ///
    /// An entry whose loss ties an existing one is placed after it; a full
    /// bucket rejects a candidate whose loss equals its current maximum.
    pub fn insert(&mut self, entry: CacheEntry, capacity: usize) -> InsertOutcome {
        if self.entries.len() < capacity {
            self.insert_sorted(entry);
            return InsertOutcome::Inserted;
        }

        let worst = match self.max_loss() {
            Some(loss) => OrderedFloat(loss),
            None => return InsertOutcome::Rejected,
        };

        if OrderedFloat(entry.loss) < worst {
            self.entries.pop();
            self.insert_sorted(entry);
            InsertOutcome::Replaced {
                evicted_loss: worst.0,
            }
        } else {
            InsertOutcome::Rejected
        }
    }

    fn insert_sorted(&mut self, entry: CacheEntry) {
        let key = OrderedFloat(entry.loss);
        let idx = self
            .entries
            .partition_point(|existing| OrderedFloat(existing.loss) <= key);
        self.entries.insert(idx, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.iter()
    }

    /// Losses in stored (ascending) order
    pub fn losses(&self) -> Vec<f32> {
        self.entries.iter().map(|e| e.loss).collect()
    }

    /// Highest loss currently held, i.e. the next eviction candidate
    pub fn max_loss(&self) -> Option<f32> {
        self.entries.last().map(|e| e.loss)
    }
}

/// Label-indexed collection of class buckets sharing one shot capacity
#[derive(Debug, Clone)]
pub struct CacheStore {
    kind: CacheKind,
    capacity: usize,
    buckets: BTreeMap<usize, ClassBucket>,
    /// Embedding dimension fixed by the first insertion
    dim: Option<usize>,
}

impl CacheStore {
    /// Create an empty store. A capacity of zero is a configuration error.
    pub fn new(kind: CacheKind, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(AdaptError::invalid_config(
                format!("{kind}.shot_capacity"),
                "must be at least 1",
            ));
        }
        Ok(Self {
            kind,
            capacity,
            buckets: BTreeMap::new(),
            dim: None,
        })
    }

    /// Offer `entry` to the bucket for `label`, creating the bucket on first use.
    ///
    /// Only the target bucket is touched. Fails if the entry's embedding
    /// dimension differs from the entries already stored.
    pub fn update(&mut self, label: usize, entry: CacheEntry) -> Result<InsertOutcome> {
        let dim = entry.embedding.dim();
        match self.dim {
            Some(expected) if expected != dim => {
                return Err(AdaptError::DimensionMismatch {
                    context: "cache insertion",
                    expected,
                    actual: dim,
                });
            }
            Some(_) => {}
            None => self.dim = Some(dim),
        }

        let capacity = self.capacity;
        Ok(self.buckets.entry(label).or_default().insert(entry, capacity))
    }

    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Embedding dimension of stored keys, once anything has been stored
    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    pub fn bucket(&self, label: usize) -> Option<&ClassBucket> {
        self.buckets.get(&label)
    }

    /// Populated labels in ascending order
    pub fn labels(&self) -> impl Iterator<Item = usize> + '_ {
        self.buckets.keys().copied()
    }

    pub fn num_classes(&self) -> usize {
        self.buckets.len()
    }

    /// Total entries across all buckets
    pub fn len(&self) -> usize {
        self.buckets.values().map(ClassBucket::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(ClassBucket::is_empty)
    }

    /// All entries with their owning label, ascending by label then by loss
    pub fn iter(&self) -> impl Iterator<Item = (usize, &CacheEntry)> {
        self.buckets
            .iter()
            .flat_map(|(&label, bucket)| bucket.iter().map(move |entry| (label, entry)))
    }

    /// Bytes held by all stored entries
    pub fn byte_size(&self) -> Result<usize> {
        self.iter().map(|(_, entry)| entry.byte_size()).sum()
    }
}
