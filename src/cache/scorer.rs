//! Affinity-weighted cache logits
//!
//! For a query embedding `q` and stored keys `k_i` with value rows `v_i`:
//!
//! ```text
//! affinity_i = q · k_i                       (cosine, keys are normalized)
//! w_i        = exp(-beta * (1 - affinity_i))
//! logits     = alpha * Σ_i w_i * v_i
//! ```
//!
//! Value rows are one-hot label vectors for the positive cache and
//! [`negative_mask`] suppression vectors for the negative cache. An identical
//! key yields the maximal weight `exp(0) = 1`; dissimilar keys decay
//! exponentially at a rate set by `beta`.

use crate::cache::mask::negative_mask;
use crate::cache::{CacheEntry, CacheStore};
use crate::config::ThresholdWindow;
use crate::errors::{AdaptError, Result};
use crate::similarity::dot_product;

/// Kernel weight for one stored key
#[inline]
pub fn affinity_weight(affinity: f32, beta: f32) -> f32 {
    (-(beta - beta * affinity)).exp()
}

fn check_store(query: &[f32], store: &CacheStore) -> Result<()> {
    if store.is_empty() {
        return Err(AdaptError::EmptyCache(store.kind()));
    }
    if let Some(expected) = store.dim() {
        if query.len() != expected {
            return Err(AdaptError::DimensionMismatch {
                context: "affinity query",
                expected,
                actual: query.len(),
            });
        }
    }
    Ok(())
}

/// Value row for one entry, accumulated into `out` scaled by `weight`
fn accumulate_value_row(
    out: &mut [f32],
    label: usize,
    entry: &CacheEntry,
    weight: f32,
    mask: Option<ThresholdWindow>,
) -> Result<()> {
    let num_classes = out.len();
    match mask {
        None => {
            let slot = out.get_mut(label).ok_or(AdaptError::DimensionMismatch {
                context: "one-hot cache value",
                expected: num_classes,
                actual: label + 1,
            })?;
            *slot += weight;
        }
        Some(window) => {
            let map = probability_map_of(entry, num_classes)?;
            for (slot, m) in out.iter_mut().zip(negative_mask(map, window)) {
                *slot += weight * m;
            }
        }
    }
    Ok(())
}

fn probability_map_of(entry: &CacheEntry, num_classes: usize) -> Result<&[f32]> {
    let map = entry.probability_map.as_deref().unwrap_or(&[]);
    if map.len() != num_classes {
        return Err(AdaptError::DimensionMismatch {
            context: "negative cache probability map",
            expected: num_classes,
            actual: map.len(),
        });
    }
    Ok(map)
}

/// Logit adjustment contributed by every entry in `store`.
///
/// Positive mode when `mask` is `None`, negative mode otherwise. Callers must
/// skip empty stores; an empty store yields [`AdaptError::EmptyCache`].
pub fn affinity_logits(
    query: &[f32],
    store: &CacheStore,
    alpha: f32,
    beta: f32,
    num_classes: usize,
    mask: Option<ThresholdWindow>,
) -> Result<Vec<f32>> {
    check_store(query, store)?;

    let mut logits = vec![0.0f32; num_classes];
    for (label, entry) in store.iter() {
        let weight = affinity_weight(dot_product(query, &entry.embedding), beta);
        accumulate_value_row(&mut logits, label, entry, weight, mask)?;
    }

    for l in logits.iter_mut() {
        *l *= alpha;
    }
    Ok(logits)
}

/// Stacked key/value matrices of a store, row-aligned.
///
/// Rows follow ascending label order, and within a label ascending loss. This
/// is the explicit matrix form of [`affinity_logits`], useful for inspecting
/// which row belongs to which class.
#[derive(Debug, Clone)]
pub struct CacheMatrices {
    /// Owning label of each row
    pub labels: Vec<usize>,
    /// Row-major `rows x dim`
    pub keys: Vec<f32>,
    /// Row-major `rows x num_classes`
    pub values: Vec<f32>,
    pub dim: usize,
    pub num_classes: usize,
}

impl CacheMatrices {
    pub fn build(
        store: &CacheStore,
        num_classes: usize,
        mask: Option<ThresholdWindow>,
    ) -> Result<Self> {
        if store.is_empty() {
            return Err(AdaptError::EmptyCache(store.kind()));
        }
        let dim = store.dim().unwrap_or(0);
        let rows = store.len();

        let mut labels = Vec::with_capacity(rows);
        let mut keys = Vec::with_capacity(rows * dim);
        let mut values = Vec::with_capacity(rows * num_classes);

        for (label, entry) in store.iter() {
            labels.push(label);
            keys.extend_from_slice(&entry.embedding);

            let mut row = vec![0.0f32; num_classes];
            accumulate_value_row(&mut row, label, entry, 1.0, mask)?;
            values.extend_from_slice(&row);
        }

        Ok(Self {
            labels,
            keys,
            values,
            dim,
            num_classes,
        })
    }

    pub fn rows(&self) -> usize {
        self.labels.len()
    }

    pub fn key(&self, row: usize) -> &[f32] {
        &self.keys[row * self.dim..(row + 1) * self.dim]
    }

    pub fn value(&self, row: usize) -> &[f32] {
        &self.values[row * self.num_classes..(row + 1) * self.num_classes]
    }

    /// Per-row affinities `q · k_i`
    pub fn affinities(&self, query: &[f32]) -> Result<Vec<f32>> {
        if query.len() != self.dim {
            return Err(AdaptError::DimensionMismatch {
                context: "affinity query",
                expected: self.dim,
                actual: query.len(),
            });
        }
        Ok((0..self.rows())
            .map(|row| dot_product(query, self.key(row)))
            .collect())
    }

    /// `alpha * wᵀ · values`
    pub fn score(&self, query: &[f32], alpha: f32, beta: f32) -> Result<Vec<f32>> {
        let affinities = self.affinities(query)?;
        let mut logits = vec![0.0f32; self.num_classes];
        for (row, affinity) in affinities.into_iter().enumerate() {
            let weight = affinity_weight(affinity, beta);
            for (l, v) in logits.iter_mut().zip(self.value(row)) {
                *l += weight * v;
            }
        }
        for l in logits.iter_mut() {
            *l *= alpha;
        }
        Ok(logits)
    }
}
