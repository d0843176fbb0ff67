mod config;
mod embeddings;
mod logging;
mod native_messaging;
mod protocol;

use std::io::{stdin, stdout};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde_json::Value;

use crate::embeddings::cache;
use crate::embeddings::models::{self, LanguageModel, ModelKind};

fn main() {
    if let Err(e) = real_main() {
        // Keep stderr noisy for user bug reports; logs also go to file.
        eprintln!("[embed_helper] fatal error: {e:?}");
        log::error!("Fatal error: {:?}", e);
        std::process::exit(1);
    }
}

fn real_main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--version") {
        println!("{}", config::HOST_VERSION);
        return Ok(());
    }

    logging::init_logging()?;

    let cache_override = read_arg_value(&args, "--cache-dir").map(PathBuf::from);

    // One-shot mode: download model files into the cache and exit.
    if args.iter().any(|a| a == "--prefetch") {
        let name = read_arg_value(&args, "--prefetch").context("missing model name after --prefetch")?;
        let kind: ModelKind = name.parse()?;
        let cache_dir = cache::resolve_cache_dir(cache_override.as_deref())?;
        let dir = cache::ensure_model_files(&cache_dir, kind.spec())?;
        println!("{}", dir.display());
        return Ok(());
    }

    let cache_dir = cache::resolve_cache_dir(cache_override.as_deref())?;
    log::info!("=== Embedding Helper Started ===");
    log::info!("Cache dir: {}", cache_dir.display());

    let mut state = HostState::new(cache_dir);
    let mut in_stream = stdin();
    let mut out_stream = stdout();

    let mut message_count: u64 = 0;
    loop {
        let req = match native_messaging::read_message(&mut in_stream) {
            Ok(Some(r)) => r,
            Ok(None) => {
                log::info!("No more messages after {} messages, exiting", message_count);
                break;
            }
            Err(e) => {
                log::error!("Error reading message: {:?}", e);
                break;
            }
        };

        message_count += 1;
        log::info!(
            "Processing message #{}: {} (id: {})",
            message_count,
            req.method,
            req.id
        );

        let resp = match handle_request(&mut state, &req.method, &req.id, &req.params) {
            Ok(v) => v,
            Err(e) => {
                log::error!("Handler error: {:?}", e);
                protocol::err(&req.id, format!("{e}"))
            }
        };

        if let Err(e) = native_messaging::write_json(&mut out_stream, &resp) {
            log::error!("Error sending response: {:?}", e);
            break;
        }
        if state.should_exit {
            log::info!("Exiting process as requested by client");
            break;
        }
    }

    log::info!("=== Embedding Helper Stopped ===");
    Ok(())
}

pub struct HostState {
    pub cache_dir: PathBuf,
    pub model: Option<Box<dyn LanguageModel>>,
    pub should_exit: bool,
}

impl HostState {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            model: None,
            should_exit: false,
        }
    }
}

fn handle_request(state: &mut HostState, method: &str, msg_id: &str, params: &Value) -> anyhow::Result<Value> {
    match method {
        "hello" => handle_hello(state, msg_id, params),
        "load" => handle_load(state, msg_id, params),
        "prefetch" => handle_prefetch(state, msg_id, params),
        "embed" => handle_embed(state, msg_id, params),
        "embedWeighted" => handle_embed_weighted(state, msg_id, params),
        "modelInfo" => handle_model_info(state, msg_id),
        "unload" => handle_unload(state, msg_id),
        "shutdown" => {
            state.should_exit = true;
            protocol::ok(msg_id, serde_json::json!({ "ok": true }))
        }
        _ => Ok(protocol::err(msg_id, format!("Unknown method: {method}"))),
    }
}

fn handle_hello(state: &HostState, msg_id: &str, params: &Value) -> anyhow::Result<Value> {
    let client_version = params.get("clientVersion").and_then(|v| v.as_str()).unwrap_or("unknown");
    log::info!(
        "Hello from client version {}, responding with host version {}",
        client_version,
        config::HOST_VERSION
    );

    let models: Vec<Value> = config::embedding::REGISTRY
        .iter()
        .map(|spec| {
            serde_json::json!({
                "model": spec.kind.as_str(),
                "modelName": spec.display_name,
                "repoId": spec.repo_id,
                "dims": spec.dims,
                "pooling": format!("{:?}", spec.pooling).to_lowercase(),
                "cached": cache::model_files_exist(&cache::model_dir(&state.cache_dir, spec)),
            })
        })
        .collect();

    protocol::ok(
        msg_id,
        serde_json::json!({
            "type": "hello-response",
            "hostImpl": "rust",
            "hostVersion": config::HOST_VERSION,
            "clientVersion": client_version,
            "cacheDir": state.cache_dir.to_string_lossy(),
            "models": models,
        }),
    )
}

/// Parse `params.model` and the optional `params.cachePath` override.
fn model_params(state: &HostState, params: &Value) -> anyhow::Result<(ModelKind, PathBuf)> {
    let name = params
        .get("model")
        .and_then(|v| v.as_str())
        .context("Missing required parameter: model")?;
    let kind: ModelKind = name.parse()?;

    let cache_dir = match params.get("cachePath").and_then(|v| v.as_str()) {
        Some(p) => cache::resolve_cache_dir(Some(Path::new(p)))?,
        None => state.cache_dir.clone(),
    };
    Ok((kind, cache_dir))
}

fn handle_load(state: &mut HostState, msg_id: &str, params: &Value) -> anyhow::Result<Value> {
    let (kind, cache_dir) = model_params(state, params)?;

    if let Some(current) = &state.model {
        if current.kind() == kind && current.model_path() == cache_dir.as_path() {
            log::info!("{} already loaded, reusing", current.model_name());
            return protocol::ok(msg_id, model_summary(current.as_ref()));
        }
    }

    // Release the old model before the new weights are mapped.
    state.model = None;
    let model = models::load_model(kind, &cache_dir)?;
    let summary = model_summary(model.as_ref());
    state.model = Some(model);

    protocol::ok(msg_id, summary)
}

fn handle_prefetch(state: &HostState, msg_id: &str, params: &Value) -> anyhow::Result<Value> {
    let (kind, cache_dir) = model_params(state, params)?;
    let dir = cache::ensure_model_files(&cache_dir, kind.spec())?;
    protocol::ok(
        msg_id,
        serde_json::json!({ "ok": true, "model": kind.as_str(), "modelDir": dir.to_string_lossy() }),
    )
}

fn handle_embed(state: &HostState, msg_id: &str, params: &Value) -> anyhow::Result<Value> {
    let model = require_model(state)?;
    let texts = parse_texts(params)?;
    let embeddings = model.sentence_embedding(&texts)?;
    embed_response(msg_id, model, embeddings)
}

fn handle_embed_weighted(state: &HostState, msg_id: &str, params: &Value) -> anyhow::Result<Value> {
    let model = require_model(state)?;
    let texts = parse_texts(params)?;
    let smoothing = params
        .get("smoothingParameter")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0) as f32;
    let npc = params.get("npc").and_then(|v| v.as_u64()).unwrap_or(0) as usize;

    let embeddings = model.weighted_sentence_embedding(&texts, smoothing, npc)?;
    embed_response(msg_id, model, embeddings)
}

fn handle_model_info(state: &HostState, msg_id: &str) -> anyhow::Result<Value> {
    let result = match &state.model {
        Some(model) => {
            let mut v = model_summary(model.as_ref());
            v["loaded"] = Value::Bool(true);
            v
        }
        None => serde_json::json!({ "loaded": false, "cacheDir": state.cache_dir.to_string_lossy() }),
    };
    protocol::ok(msg_id, result)
}

fn handle_unload(state: &mut HostState, msg_id: &str) -> anyhow::Result<Value> {
    let was_loaded = state.model.take().is_some();
    if was_loaded {
        log::info!("Model unloaded");
    }
    protocol::ok(msg_id, serde_json::json!({ "ok": true, "wasLoaded": was_loaded }))
}

fn require_model(state: &HostState) -> anyhow::Result<&dyn LanguageModel> {
    state
        .model
        .as_deref()
        .context("No model loaded. Call 'load' first.")
}

fn parse_texts(params: &Value) -> anyhow::Result<Vec<String>> {
    let items = params
        .get("texts")
        .and_then(|v| v.as_array())
        .context("Missing required parameter: texts (array of strings)")?;

    items
        .iter()
        .enumerate()
        .map(|(i, v)| match v.as_str() {
            Some(s) => Ok(s.to_string()),
            None => bail!("texts[{i}] is not a string"),
        })
        .collect()
}

fn model_summary(model: &dyn LanguageModel) -> Value {
    serde_json::json!({
        "ok": true,
        "model": model.kind().as_str(),
        "modelName": model.model_name(),
        "dims": model.dims(),
        "modelPath": model.model_path().to_string_lossy(),
    })
}

fn embed_response(msg_id: &str, model: &dyn LanguageModel, embeddings: Vec<Vec<f32>>) -> anyhow::Result<Value> {
    log::info!("Embedded {} texts with {}", embeddings.len(), model.model_name());
    protocol::ok(
        msg_id,
        serde_json::json!({
            "count": embeddings.len(),
            "dims": model.dims(),
            "embeddings": embeddings,
        }),
    )
}

fn read_arg_value(args: &[String], key: &str) -> Option<String> {
    args.iter()
        .position(|a| a == key)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
