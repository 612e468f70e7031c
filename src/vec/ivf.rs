//! Inverted-file index with a k-means coarse quantizer.

use serde::{Deserialize, Serialize};

use super::{Neighbor, top_k};
use crate::constants::IVF_TRAIN_ITERATIONS;
use crate::embed::l2_squared;
use crate::error::{MemvidError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvfIndex {
    dimension: usize,
    nlist: usize,
    nprobe: usize,
    centroids: Vec<Vec<f32>>,
    /// Vector ids per cluster.
    lists: Vec<Vec<u64>>,
    vectors: Vec<Vec<f32>>,
}

impl IvfIndex {
    pub fn new(dimension: usize, nlist: usize, nprobe: usize) -> Self {
        Self {
            dimension,
            nlist: nlist.max(1),
            nprobe: nprobe.max(1),
            centroids: Vec::new(),
            lists: Vec::new(),
            vectors: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    /// Number of clusters actually trained; at most `nlist`, bounded by the training set.
    pub fn cluster_count(&self) -> usize {
        self.centroids.len()
    }

    pub fn vector(&self, id: usize) -> Option<&[f32]> {
        self.vectors.get(id).map(Vec::as_slice)
    }

    /// Fit the coarse quantizer. A trained index ignores further training calls.
    pub(super) fn train(&mut self, samples: &[Vec<f32>]) -> Result<()> {
        if self.is_trained() {
            return Ok(());
        }
        if samples.is_empty() {
            return Err(MemvidError::config("cannot train an IVF index on an empty batch"));
        }
        let k = self.nlist.min(samples.len());
        let mut centroids = farthest_point_init(samples, k);
        let mut assignments = vec![usize::MAX; samples.len()];

        for iteration in 0..IVF_TRAIN_ITERATIONS {
            let mut changed = false;
            for (slot, sample) in assignments.iter_mut().zip(samples) {
                let nearest = nearest_centroid(&centroids, sample);
                if *slot != nearest {
                    *slot = nearest;
                    changed = true;
                }
            }
            if !changed {
                tracing::debug!(
                    target = "memvid::vec",
                    iteration,
                    clusters = k,
                    "k-means converged"
                );
                break;
            }
            update_centroids(&mut centroids, samples, &assignments);
        }

        self.lists = vec![Vec::new(); centroids.len()];
        self.centroids = centroids;
        Ok(())
    }

    pub(super) fn add(&mut self, vectors: Vec<Vec<f32>>) -> Result<()> {
        if !self.is_trained() {
            return Err(MemvidError::IndexNotTrained);
        }
        for vector in vectors {
            let id = self.vectors.len() as u64;
            let cluster = nearest_centroid(&self.centroids, &vector);
            self.lists[cluster].push(id);
            self.vectors.push(vector);
        }
        Ok(())
    }

    pub(super) fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        let mut order: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(idx, centroid)| (idx, l2_squared(query, centroid)))
            .collect();
        order.sort_by(|a, b| a.1.total_cmp(&b.1));

        let candidates = order
            .into_iter()
            .take(self.nprobe)
            .flat_map(|(cluster, _)| self.lists[cluster].iter())
            .map(|&id| Neighbor {
                id: id as i64,
                distance: l2_squared(query, &self.vectors[id as usize]),
            });
        top_k(candidates, k)
    }
}

/// Deterministic k-means++ variant: start from the first sample and repeatedly pick the
/// sample farthest from every chosen centroid.
fn farthest_point_init(samples: &[Vec<f32>], k: usize) -> Vec<Vec<f32>> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(samples[0].clone());
    let mut min_distances = vec![f32::MAX; samples.len()];

    while centroids.len() < k {
        let Some(last) = centroids.last() else { break };
        for (slot, sample) in min_distances.iter_mut().zip(samples) {
            *slot = slot.min(l2_squared(sample, last));
        }
        let Some((idx, distance)) = min_distances
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
        else {
            break;
        };
        if distance <= 0.0 {
            // Remaining samples duplicate existing centroids.
            break;
        }
        centroids.push(samples[idx].clone());
    }
    centroids
}

fn nearest_centroid(centroids: &[Vec<f32>], vector: &[f32]) -> usize {
    centroids
        .iter()
        .enumerate()
        .map(|(idx, centroid)| (idx, l2_squared(vector, centroid)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map_or(0, |(idx, _)| idx)
}

fn update_centroids(centroids: &mut [Vec<f32>], samples: &[Vec<f32>], assignments: &[usize]) {
    let dimension = samples[0].len();
    let mut sums = vec![vec![0.0f32; dimension]; centroids.len()];
    let mut counts = vec![0usize; centroids.len()];
    for (sample, &cluster) in samples.iter().zip(assignments) {
        counts[cluster] += 1;
        for (acc, value) in sums[cluster].iter_mut().zip(sample) {
            *acc += value;
        }
    }
    // Empty clusters keep their previous centroid.
    for ((centroid, sum), count) in centroids.iter_mut().zip(sums).zip(counts) {
        if count > 0 {
            *centroid = sum.into_iter().map(|v| v / count as f32).collect();
        }
    }
}
