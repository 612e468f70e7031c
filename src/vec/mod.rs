//! Vector indexes keyed by dense insertion ids.
//!
//! Searches always return exactly `k` neighbors; slots without a real vector carry
//! [`SENTINEL_ID`] and an infinite-like distance so callers can filter them uniformly.

mod flat;
mod ivf;

pub use flat::FlatIndex;
pub use ivf::IvfIndex;

use serde::{Deserialize, Serialize};

use crate::constants::INDEX_COMPRESSION_LEVEL;
use crate::error::{MemvidError, Result};
use crate::types::{IndexKind, IndexSettings};

/// Id of padding entries in search results.
pub const SENTINEL_ID: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: i64,
    /// Squared L2 distance.
    pub distance: f32,
}

impl Neighbor {
    const PADDING: Self = Self {
        id: SENTINEL_ID,
        distance: f32::MAX,
    };

    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.id < 0
    }
}

fn top_k(candidates: impl Iterator<Item = Neighbor>, k: usize) -> Vec<Neighbor> {
    let mut all: Vec<Neighbor> = candidates.collect();
    all.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
    all.truncate(k);
    all.resize(k, Neighbor::PADDING);
    all
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VectorIndex {
    Flat(FlatIndex),
    Ivf(IvfIndex),
}

impl VectorIndex {
    #[must_use]
    pub fn new(settings: &IndexSettings, dimension: usize) -> Self {
        match settings.kind {
            IndexKind::Flat => Self::Flat(FlatIndex::new(dimension)),
            IndexKind::Ivf => Self::Ivf(IvfIndex::new(dimension, settings.nlist, settings.nprobe)),
        }
    }

    #[must_use]
    pub fn kind(&self) -> IndexKind {
        match self {
            Self::Flat(_) => IndexKind::Flat,
            Self::Ivf(_) => IndexKind::Ivf,
        }
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        match self {
            Self::Flat(index) => index.dimension(),
            Self::Ivf(index) => index.dimension(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Flat(index) => index.len(),
            Self::Ivf(index) => index.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn requires_training(&self) -> bool {
        matches!(self, Self::Ivf(_))
    }

    #[must_use]
    pub fn is_trained(&self) -> bool {
        match self {
            Self::Flat(_) => true,
            Self::Ivf(index) => index.is_trained(),
        }
    }

    pub fn train(&mut self, samples: &[Vec<f32>]) -> Result<()> {
        self.check_dimensions(samples)?;
        match self {
            Self::Flat(_) => Ok(()),
            Self::Ivf(index) => index.train(samples),
        }
    }

    /// Append vectors; they receive ids `len()..len() + vectors.len()`.
    pub fn add(&mut self, vectors: Vec<Vec<f32>>) -> Result<()> {
        self.check_dimensions(&vectors)?;
        match self {
            Self::Flat(index) => {
                index.add(vectors);
                Ok(())
            }
            Self::Ivf(index) => index.add(vectors),
        }
    }

    /// `k` nearest neighbors by squared L2, ascending, padded with sentinels.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension() {
            return Err(MemvidError::VecDimensionMismatch {
                expected: self.dimension(),
                actual: query.len(),
            });
        }
        Ok(match self {
            Self::Flat(index) => index.search(query, k),
            Self::Ivf(index) => index.search(query, k),
        })
    }

    #[must_use]
    pub fn vector(&self, id: usize) -> Option<&[f32]> {
        match self {
            Self::Flat(index) => index.vector(id),
            Self::Ivf(index) => index.vector(id),
        }
    }

    fn check_dimensions(&self, vectors: &[Vec<f32>]) -> Result<()> {
        let expected = self.dimension();
        match vectors.iter().find(|v| v.len() != expected) {
            Some(bad) => Err(MemvidError::VecDimensionMismatch {
                expected,
                actual: bad.len(),
            }),
            None => Ok(()),
        }
    }

    /// zstd-compressed bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let raw = bincode::serde::encode_to_vec(self, bincode::config::standard())?;
        Ok(zstd::encode_all(raw.as_slice(), INDEX_COMPRESSION_LEVEL)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw = zstd::decode_all(bytes).map_err(|err| MemvidError::IndexCorrupted {
            reason: format!("vector index decompression failed: {err}"),
        })?;
        let (index, _) = bincode::serde::decode_from_slice(&raw, bincode::config::standard())?;
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat() -> VectorIndex {
        VectorIndex::new(&IndexSettings::default(), 2)
    }

    #[test]
    fn results_are_padded_with_sentinels() {
        let mut index = flat();
        index.add(vec![vec![0.0, 0.0], vec![1.0, 0.0]]).unwrap();
        let hits = index.search(&[0.9, 0.0], 4).unwrap();
        assert_eq!(hits.len(), 4);
        assert_eq!(hits[0].id, 1);
        assert_eq!(hits[1].id, 0);
        assert!(hits[2].is_sentinel() && hits[3].is_sentinel());
    }

    #[test]
    fn distances_are_ascending() {
        let mut index = flat();
        index
            .add((0..20).map(|i| vec![i as f32, (i * 7 % 5) as f32]).collect())
            .unwrap();
        let hits = index.search(&[3.3, 1.0], 10).unwrap();
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn rejects_wrong_dimension() {
        let mut index = flat();
        assert!(matches!(
            index.add(vec![vec![1.0, 2.0, 3.0]]),
            Err(MemvidError::VecDimensionMismatch { expected: 2, actual: 3 })
        ));
        assert!(index.search(&[1.0], 1).is_err());
    }

    #[test]
    fn bytes_roundtrip() {
        let settings = IndexSettings {
            kind: IndexKind::Ivf,
            nlist: 2,
            nprobe: 2,
        };
        let mut index = VectorIndex::new(&settings, 2);
        let samples = vec![vec![0.0, 0.0], vec![5.0, 5.0], vec![0.1, 0.0]];
        index.train(&samples).unwrap();
        index.add(samples).unwrap();
        let restored = VectorIndex::from_bytes(&index.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, index);
        assert!(VectorIndex::from_bytes(b"garbage").is_err());
    }
}
