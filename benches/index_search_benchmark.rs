//! Embedding index benchmarks.
//!
//! # Benchmarks
//!
//! - `flat_search`: exact search latency over a few thousand chunks
//! - `ivf_search`: approximate search latency with the same corpus
//! - `frame_round_trip`: QR encode + decode of one chunk
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench index_search_benchmark
//! ```

use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use memvid_video::{
    Chunk, EmbeddingIndex, FrameCodec, HashingEmbedder, IndexKind, MemvidConfig, VideoCodec,
};

fn corpus(size: usize) -> Vec<String> {
    let topics = [
        "machine learning neural networks",
        "rust systems programming",
        "ocean currents and tides",
        "medieval castle architecture",
        "sourdough bread fermentation",
    ];
    (0..size)
        .map(|i| {
            format!(
                "Chunk {i} about {} with detail {}",
                topics[i % topics.len()],
                fastrand::u32(..)
            )
        })
        .collect()
}

fn build_index(kind: IndexKind, texts: &[String]) -> EmbeddingIndex {
    let mut config = MemvidConfig::default();
    config.index.kind = kind;
    config.index.nlist = 32;
    let mut index = EmbeddingIndex::new(&config, Arc::new(HashingEmbedder::default()));
    let frames: Vec<u64> = (0..texts.len() as u64).collect();
    index.add_chunks(texts, &frames).unwrap();
    index
}

fn bench_search(c: &mut Criterion) {
    fastrand::seed(7);
    let texts = corpus(4000);
    let flat = build_index(IndexKind::Flat, &texts);
    let ivf = build_index(IndexKind::Ivf, &texts);

    c.bench_function("flat_search", |b| {
        b.iter(|| flat.search("rust programming", 10).unwrap());
    });
    c.bench_function("ivf_search", |b| {
        b.iter(|| ivf.search("rust programming", 10).unwrap());
    });
}

fn bench_frame_round_trip(c: &mut Criterion) {
    let config = MemvidConfig::default();
    let codec = FrameCodec::new(&config.qr, &config.profile(VideoCodec::Png)).unwrap();
    let chunk = Chunk::new(0, "x".repeat(400));

    c.bench_function("frame_round_trip", |b| {
        b.iter(|| {
            let raster = codec.encode(&chunk).unwrap();
            codec.decode(&raster, 0).unwrap()
        });
    });
}

criterion_group!(benches, bench_search, bench_frame_round_trip);
criterion_main!(benches);
