// IMPORTANT:
// Keep ALL numeric values centralized here (repo rule: no hardcoded numeric values scattered around).

// NOTE: HOST_VERSION must stay in sync with the `version` field in Cargo.toml.
pub const HOST_VERSION: &str = "0.3.0";

pub const APP_DIR_REL: &str = ".contextual-embeddings";

pub mod env {
    pub const CACHE_DIR: &str = "CTX_EMBED_CACHE_DIR";
    pub const LOG_DIR: &str = "CTX_EMBED_LOG_DIR";
    // Any non-empty value other than "0"/"false" disables downloads.
    pub const OFFLINE: &str = "CTX_EMBED_OFFLINE";
}

pub mod logging {
    pub const LOG_DIR_REL: &str = ".contextual-embeddings/logs";
    pub const LOG_FILE_NAME: &str = "embed_helper";

    pub const LOG_ROTATE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
    pub const LOG_ROTATE_KEEP_FILES: usize = 5;
}

pub mod native_messaging {
    pub const MAX_MESSAGE_SIZE_BYTES: u32 = 64 * 1024 * 1024;
}

pub mod download {
    pub const HUB_BASE_URL: &str = "https://huggingface.co";

    // Weights are ~90-130 MB, so allow well beyond a normal request timeout.
    pub const DOWNLOAD_TIMEOUT_SECS: u64 = 300;
}

pub mod embedding {
    use crate::embeddings::engine::Pooling;
    use crate::embeddings::models::ModelKind;

    pub const MODEL_DIR_REL: &str = "models";

    pub const WEIGHTS_FILE: &str = "model.safetensors";
    pub const TOKENIZER_FILE: &str = "tokenizer.json";
    pub const CONFIG_FILE: &str = "config.json";

    // Contextual model: texts are cut to this many words before batching.
    pub const MAX_SEQUENCE_WORDS: usize = 100;
    pub const CONTEXTUAL_BATCH_SIZE: usize = 32;

    // Sentence encoder consumes the whole list, but never more than this per forward pass.
    pub const SENTENCE_ENCODER_MAX_BATCH: usize = 256;

    /// Static description of a downloadable model.
    #[derive(Debug, Clone, Copy)]
    pub struct ModelSpec {
        pub kind: ModelKind,
        pub display_name: &'static str,
        pub repo_id: &'static str,
        pub revision: &'static str,
        pub dir_name: &'static str,
        pub dims: usize,
        pub max_tokens: usize,
        pub pooling: Pooling,
        pub weights_sha256: Option<&'static str>,
        pub tokenizer_sha256: Option<&'static str>,
        pub config_sha256: Option<&'static str>,
    }

    impl ModelSpec {
        /// Pinned hashes are only binding when `revision` is a full commit id;
        /// a branch like "main" can move under them.
        pub fn pins_enforced(&self) -> bool {
            self.revision.len() == 40 && self.revision.bytes().all(|b| b.is_ascii_hexdigit())
        }
    }

    pub const CONTEXTUAL: ModelSpec = ModelSpec {
        kind: ModelKind::Contextual,
        display_name: "Contextual token model (all-MiniLM-L6-v2)",
        repo_id: "sentence-transformers/all-MiniLM-L6-v2",
        // TODO: pin the hub commit that serves these hashed files, so mismatches become hard errors.
        revision: "main",
        dir_name: "all-MiniLM-L6-v2",
        dims: 384,
        max_tokens: 256,
        pooling: Pooling::Mean,
        weights_sha256: Some("53aa51172d142c89d9012cce15ae4d6cc0ca6895895114379cacb4fab128d9db"),
        tokenizer_sha256: Some("be50c3628f2bf5bb5e3a7f17b1f74611b2561a3a27eeab05e5aa30f411572037"),
        config_sha256: Some("953f9c0d463486b10a6871cc2fd59f223b2c70184f49815e7efbcab5d8908b41"),
    };

    pub const SENTENCE_ENCODER: ModelSpec = ModelSpec {
        kind: ModelKind::SentenceEncoder,
        display_name: "Sentence encoder (bge-small-en-v1.5)",
        repo_id: "BAAI/bge-small-en-v1.5",
        revision: "main",
        dir_name: "bge-small-en-v1.5",
        dims: 384,
        max_tokens: 512,
        pooling: Pooling::Cls,
        // Not pinned yet; the computed hash is logged on download.
        weights_sha256: None,
        tokenizer_sha256: None,
        config_sha256: None,
    };

    pub const REGISTRY: &[ModelSpec] = &[CONTEXTUAL, SENTENCE_ENCODER];

    pub fn spec_for(kind: ModelKind) -> &'static ModelSpec {
        match kind {
            ModelKind::Contextual => &CONTEXTUAL,
            ModelKind::SentenceEncoder => &SENTENCE_ENCODER,
        }
    }
}
