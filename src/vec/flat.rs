use serde::{Deserialize, Serialize};

use super::{Neighbor, top_k};
use crate::embed::l2_squared;

/// Exact index: every query scans every stored vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatIndex {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn vector(&self, id: usize) -> Option<&[f32]> {
        self.vectors.get(id).map(Vec::as_slice)
    }

    pub(super) fn add(&mut self, vectors: Vec<Vec<f32>>) {
        self.vectors.extend(vectors);
    }

    pub(super) fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        let candidates = self
            .vectors
            .iter()
            .enumerate()
            .map(|(id, vector)| Neighbor {
                id: id as i64,
                distance: l2_squared(query, vector),
            });
        top_k(candidates, k)
    }
}
