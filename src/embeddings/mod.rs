// embeddings/ — Local sentence embedding models using candle (pure Rust).
//
// Provides:
// - Cache directory + model download with integrity checks
// - BERT inference with mean or CLS pooling
// - Text cleaning and batching
// - The contextual and sentence-encoder model variants

pub mod cache;
pub mod engine;
pub mod models;
pub mod text_prep;
