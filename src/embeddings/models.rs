// models.rs — The two sentence-embedding model variants behind one trait.
//
// ContextualModel: cleans, caps each text at MAX_SEQUENCE_WORDS words, and runs
// fixed-size batches through a mean-pooled token model.
// SentenceEncoderModel: cleans and encodes the whole list with CLS pooling.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::bail;

use crate::config;
use crate::config::embedding::ModelSpec;
use crate::embeddings::cache;
use crate::embeddings::engine::{EmbeddingEngine, EngineOptions};
use crate::embeddings::text_prep::{clean_text, make_text_batches, truncate_words};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Contextual,
    SentenceEncoder,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Contextual => "contextual",
            ModelKind::SentenceEncoder => "sentence-encoder",
        }
    }

    pub fn spec(&self) -> &'static ModelSpec {
        config::embedding::spec_for(*self)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "contextual" => Ok(ModelKind::Contextual),
            "sentence-encoder" => Ok(ModelKind::SentenceEncoder),
            other => bail!("unknown model '{other}' (expected 'contextual' or 'sentence-encoder')"),
        }
    }
}

/// A loaded sentence-embedding model.
pub trait LanguageModel: Send {
    fn kind(&self) -> ModelKind;

    fn model_name(&self) -> &'static str;

    /// Cache directory the model was configured with.
    fn model_path(&self) -> &Path;

    fn dims(&self) -> usize;

    /// One vector per input text, in input order.
    fn sentence_embedding(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;

    /// SIF-style weighted embedding. Contextual models already weight tokens
    /// internally, so both knobs are ignored.
    fn weighted_sentence_embedding(
        &self,
        texts: &[String],
        smoothing_parameter: f32,
        npc: usize,
    ) -> anyhow::Result<Vec<Vec<f32>>> {
        log::debug!(
            "{}: ignoring smoothing_parameter={} npc={} (weights are part of the model)",
            self.model_name(),
            smoothing_parameter,
            npc
        );
        self.sentence_embedding(texts)
    }
}

/// Set up the cache dir, fetch the model files if needed, and instantiate the variant.
pub fn load_model(kind: ModelKind, cache_dir: &Path) -> anyhow::Result<Box<dyn LanguageModel>> {
    let spec = kind.spec();
    log::info!("Initializing {}...", spec.display_name);

    let dir = cache::ensure_model_files(cache_dir, spec)?;
    let engine = EmbeddingEngine::load(
        &dir,
        EngineOptions {
            pooling: spec.pooling,
            max_tokens: spec.max_tokens,
            expected_dims: spec.dims,
        },
    )?;

    let model: Box<dyn LanguageModel> = match kind {
        ModelKind::Contextual => Box::new(ContextualModel::new(engine, cache_dir.to_path_buf())),
        ModelKind::SentenceEncoder => Box::new(SentenceEncoderModel::new(engine, cache_dir.to_path_buf())),
    };
    Ok(model)
}

/// Runs texts through an encoder one batch at a time.
pub trait BatchEncoder {
    fn encode(&self, batch: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

impl BatchEncoder for EmbeddingEngine {
    fn encode(&self, batch: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.embed_batch(batch)
    }
}

/// Batched, mean-pooled contextual token model.
pub struct ContextualModel<E = EmbeddingEngine> {
    encoder: E,
    model_path: PathBuf,
}

impl<E: BatchEncoder> ContextualModel<E> {
    pub fn new(encoder: E, model_path: PathBuf) -> Self {
        Self { encoder, model_path }
    }

    /// Clean, cap at MAX_SEQUENCE_WORDS words, and split into fixed-size batches.
    pub fn text_batches(texts: &[String]) -> Vec<Vec<String>> {
        log::info!("Creating text batches for {} texts", texts.len());
        let prepared: Vec<String> = texts
            .iter()
            .map(|t| truncate_words(&clean_text(t), config::embedding::MAX_SEQUENCE_WORDS))
            .collect();
        make_text_batches(&prepared, config::embedding::CONTEXTUAL_BATCH_SIZE)
    }

    fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let mut embedded = Vec::with_capacity(texts.len());
        for batch in Self::text_batches(texts) {
            let vectors = self.encoder.encode(&batch)?;
            if vectors.len() != batch.len() {
                bail!("encoder returned {} vectors for a batch of {}", vectors.len(), batch.len());
            }
            embedded.extend(vectors);
        }
        Ok(embedded)
    }
}

impl<E: BatchEncoder + Send> LanguageModel for ContextualModel<E> {
    fn kind(&self) -> ModelKind {
        ModelKind::Contextual
    }

    fn model_name(&self) -> &'static str {
        config::embedding::CONTEXTUAL.display_name
    }

    fn model_path(&self) -> &Path {
        &self.model_path
    }

    fn dims(&self) -> usize {
        config::embedding::CONTEXTUAL.dims
    }

    fn sentence_embedding(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.embed(texts)
    }
}

/// Single-pass CLS-pooled sentence encoder.
pub struct SentenceEncoderModel<E = EmbeddingEngine> {
    encoder: E,
    model_path: PathBuf,
}

impl<E: BatchEncoder> SentenceEncoderModel<E> {
    pub fn new(encoder: E, model_path: PathBuf) -> Self {
        Self { encoder, model_path }
    }

    fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let cleaned: Vec<String> = texts.iter().map(|t| clean_text(t)).collect();

        let mut embedded = Vec::with_capacity(cleaned.len());
        for batch in cleaned.chunks(config::embedding::SENTENCE_ENCODER_MAX_BATCH) {
            let vectors = self.encoder.encode(batch)?;
            if vectors.len() != batch.len() {
                bail!("encoder returned {} vectors for {} texts", vectors.len(), batch.len());
            }
            embedded.extend(vectors);
        }
        Ok(embedded)
    }
}

impl<E: BatchEncoder + Send> LanguageModel for SentenceEncoderModel<E> {
    fn kind(&self) -> ModelKind {
        ModelKind::SentenceEncoder
    }

    fn model_name(&self) -> &'static str {
        config::embedding::SENTENCE_ENCODER.display_name
    }

    fn model_path(&self) -> &Path {
        &self.model_path
    }

    fn dims(&self) -> usize {
        config::embedding::SENTENCE_ENCODER.dims
    }

    fn sentence_embedding(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.embed(texts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every batch it sees and returns [word_count, batch_index] per text.
    #[derive(Default)]
    struct RecordingEncoder {
        batches: Mutex<Vec<Vec<String>>>,
    }

    impl BatchEncoder for RecordingEncoder {
        fn encode(&self, batch: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            let mut seen = self.batches.lock().unwrap();
            let batch_index = seen.len() as f32;
            seen.push(batch.to_vec());
            Ok(batch
                .iter()
                .map(|t| vec![t.split_whitespace().count() as f32, batch_index])
                .collect())
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("text number {i}")).collect()
    }

    #[test]
    fn test_model_kind_parse() {
        assert_eq!("contextual".parse::<ModelKind>().unwrap(), ModelKind::Contextual);
        assert_eq!(" Sentence_Encoder ".parse::<ModelKind>().unwrap(), ModelKind::SentenceEncoder);
        assert!("word2vec".parse::<ModelKind>().is_err());
        assert_eq!(ModelKind::SentenceEncoder.to_string(), "sentence-encoder");
    }

    #[test]
    fn test_kind_spec_matches() {
        for kind in [ModelKind::Contextual, ModelKind::SentenceEncoder] {
            assert_eq!(kind.spec().kind, kind);
        }
    }

    #[test]
    fn test_contextual_batches_of_32_in_order() {
        let model = ContextualModel::new(RecordingEncoder::default(), PathBuf::from("/cache"));
        let out = model.sentence_embedding(&texts(70)).unwrap();

        assert_eq!(out.len(), 70);
        let sizes: Vec<usize> = model.encoder.batches.lock().unwrap().iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![32, 32, 6]);

        // Batch index per output follows input order.
        assert_eq!(out[0][1], 0.0);
        assert_eq!(out[31][1], 0.0);
        assert_eq!(out[32][1], 1.0);
        assert_eq!(out[69][1], 2.0);
    }

    #[test]
    fn test_contextual_caps_words_and_cleans() {
        let long = (0..250).map(|i| format!("w{i}")).collect::<Vec<_>>().join("  \n ");
        let model = ContextualModel::new(RecordingEncoder::default(), PathBuf::from("/cache"));
        let out = model.sentence_embedding(&[long]).unwrap();

        assert_eq!(out[0][0], config::embedding::MAX_SEQUENCE_WORDS as f32);
        let seen = model.encoder.batches.lock().unwrap();
        assert!(!seen[0][0].contains('\n'));
        assert!(seen[0][0].starts_with("w0 w1 w2"));
    }

    #[test]
    fn test_empty_input_gives_empty_output() {
        let model = ContextualModel::new(RecordingEncoder::default(), PathBuf::from("/cache"));
        assert!(model.sentence_embedding(&[]).unwrap().is_empty());
        assert!(model.encoder.batches.lock().unwrap().is_empty());

        let model = SentenceEncoderModel::new(RecordingEncoder::default(), PathBuf::from("/cache"));
        assert!(model.sentence_embedding(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_sentence_encoder_single_pass_no_word_cap() {
        let long = (0..250).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let mut input = texts(40);
        input.push(long);

        let model = SentenceEncoderModel::new(RecordingEncoder::default(), PathBuf::from("/cache"));
        let out = model.sentence_embedding(&input).unwrap();

        assert_eq!(out.len(), 41);
        assert_eq!(model.encoder.batches.lock().unwrap().len(), 1);
        assert_eq!(out[40][0], 250.0);
    }

    #[test]
    fn test_weighted_embedding_delegates() {
        let model = ContextualModel::new(RecordingEncoder::default(), PathBuf::from("/cache"));
        let input = texts(3);
        let plain = model.sentence_embedding(&input).unwrap();
        let weighted = model.weighted_sentence_embedding(&input, 0.001, 1).unwrap();
        assert_eq!(plain.len(), weighted.len());
        for (a, b) in plain.iter().zip(&weighted) {
            assert_eq!(a[0], b[0]);
        }
    }

    #[test]
    fn test_model_metadata() {
        let model: Box<dyn LanguageModel> =
            Box::new(SentenceEncoderModel::new(RecordingEncoder::default(), PathBuf::from("/cache")));
        assert_eq!(model.kind(), ModelKind::SentenceEncoder);
        assert_eq!(model.dims(), 384);
        assert_eq!(model.model_path(), Path::new("/cache"));
        assert!(model.model_name().contains("Sentence encoder"));
    }
}
