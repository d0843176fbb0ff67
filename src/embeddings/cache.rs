// cache.rs — Model cache directory and file download with integrity checks.
//
// Each model lives in its own sub-directory of the cache dir. Missing files are
// fetched from the Hugging Face Hub on first use, checked (SHA256 when pinned,
// safetensors header for weights), and written atomically.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use sha2::{Digest, Sha256};

use crate::config;
use crate::config::embedding::ModelSpec;

/// Resolve the cache directory and make sure it exists.
///
/// Precedence: explicit override, then `CTX_EMBED_CACHE_DIR`, then
/// `~/.contextual-embeddings/models`.
pub fn resolve_cache_dir(override_dir: Option<&Path>) -> anyhow::Result<PathBuf> {
    let env_dir = std::env::var(config::env::CACHE_DIR).ok();
    let dir = match pick_cache_dir(override_dir, env_dir.as_deref()) {
        Some(dir) => dir,
        None => dirs_home()?
            .join(config::APP_DIR_REL)
            .join(config::embedding::MODEL_DIR_REL),
    };

    fs::create_dir_all(&dir).with_context(|| format!("failed to create cache dir {}", dir.display()))?;
    Ok(dir)
}

fn pick_cache_dir(override_dir: Option<&Path>, env_dir: Option<&str>) -> Option<PathBuf> {
    if let Some(dir) = override_dir {
        return Some(dir.to_path_buf());
    }
    env_dir.filter(|v| !v.trim().is_empty()).map(PathBuf::from)
}

/// True when downloads are disabled through `CTX_EMBED_OFFLINE`.
pub fn offline_mode() -> bool {
    std::env::var(config::env::OFFLINE)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_truthy(v: &str) -> bool {
    let v = v.trim();
    !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false")
}

/// Directory holding one model's files inside the cache dir.
pub fn model_dir(cache_dir: &Path, spec: &ModelSpec) -> PathBuf {
    cache_dir.join(spec.dir_name)
}

/// Check if all required model files exist in `dir`.
pub fn model_files_exist(dir: &Path) -> bool {
    required_files().iter().all(|name| dir.join(name).exists())
}

fn required_files() -> [&'static str; 3] {
    [
        config::embedding::WEIGHTS_FILE,
        config::embedding::TOKENIZER_FILE,
        config::embedding::CONFIG_FILE,
    ]
}

/// Download all model files if not already cached. Returns the model directory path.
pub fn ensure_model_files(cache_dir: &Path, spec: &ModelSpec) -> anyhow::Result<PathBuf> {
    ensure_model_files_with(cache_dir, spec, offline_mode())
}

fn ensure_model_files_with(cache_dir: &Path, spec: &ModelSpec, offline: bool) -> anyhow::Result<PathBuf> {
    let dir = model_dir(cache_dir, spec);

    if model_files_exist(&dir) {
        log::info!("Model files already cached at {}", dir.display());
        return Ok(dir);
    }

    if offline {
        bail!(
            "model files for {} missing in {} and downloads are disabled ({}=1)",
            spec.repo_id,
            dir.display(),
            config::env::OFFLINE
        );
    }

    log::info!("Downloading {} to {}", spec.repo_id, dir.display());
    fs::create_dir_all(&dir).with_context(|| format!("failed to create model dir {}", dir.display()))?;

    let files = [
        (config::embedding::WEIGHTS_FILE, spec.weights_sha256),
        (config::embedding::TOKENIZER_FILE, spec.tokenizer_sha256),
        (config::embedding::CONFIG_FILE, spec.config_sha256),
    ];

    for (name, sha) in files {
        let dest = dir.join(name);
        if dest.exists() {
            log::debug!("{} already present, skipping", name);
            continue;
        }
        download_and_verify(&file_url(spec, name), &dest, sha, spec.pins_enforced())?;
    }

    log::info!("Model download complete");
    Ok(dir)
}

/// Hub URL for a file of a model at its pinned revision.
pub fn file_url(spec: &ModelSpec, file_name: &str) -> String {
    format!(
        "{}/{}/resolve/{}/{}",
        config::download::HUB_BASE_URL,
        spec.repo_id,
        spec.revision,
        file_name
    )
}

/// Download a file from URL, verify it, and write it to `dest`.
fn download_and_verify(
    url: &str,
    dest: &Path,
    expected_sha256: Option<&str>,
    strict: bool,
) -> anyhow::Result<()> {
    let filename = dest.file_name().unwrap_or_default().to_string_lossy().to_string();
    log::info!("Downloading {} from {}", filename, url);

    let resp = ureq::get(url)
        .timeout(std::time::Duration::from_secs(config::download::DOWNLOAD_TIMEOUT_SECS))
        .call()
        .with_context(|| format!("failed to download {url}"))?;

    let status = resp.status();
    if status != 200 {
        bail!("HTTP {status} downloading {url}");
    }

    // Whole body in memory; the largest file is the weights (~130 MB).
    let mut body = Vec::new();
    resp.into_reader()
        .read_to_end(&mut body)
        .with_context(|| format!("failed to read response body for {url}"))?;

    let actual_hash = verify_sha256(&body, expected_sha256, &filename, strict)?;
    log::info!("SHA256 for {}: {}", filename, actual_hash);

    if filename == config::embedding::WEIGHTS_FILE {
        let tensors = check_safetensors(&body)?;
        log::info!("{} holds {} tensors", filename, tensors);
    }

    write_atomic(dest, &body)
}

/// Compute the SHA256 of `body` and compare it to `expected` when one is pinned.
/// A mismatch is an error when `strict`, otherwise a warning. Returns the hex digest.
pub fn verify_sha256(
    body: &[u8],
    expected: Option<&str>,
    filename: &str,
    strict: bool,
) -> anyhow::Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(body);
    let actual_hash = hex::encode(hasher.finalize());

    match expected {
        Some(expected) if !expected.eq_ignore_ascii_case(&actual_hash) => {
            if strict {
                bail!("SHA256 mismatch for {}: expected {}, got {}", filename, expected, actual_hash);
            }
            log::warn!(
                "SHA256 for {} changed upstream: pinned {}, got {} (revision is not a commit, accepting)",
                filename,
                expected,
                actual_hash
            );
        }
        Some(_) => log::debug!("SHA256 verified for {}", filename),
        None => log::warn!("No pinned SHA256 for {}, accepting download unverified", filename),
    }

    Ok(actual_hash)
}

/// Parse the safetensors header. Returns the number of tensors.
fn check_safetensors(body: &[u8]) -> anyhow::Result<usize> {
    let tensors = safetensors::SafeTensors::deserialize(body)
        .map_err(|e| anyhow::anyhow!("downloaded weights are not valid safetensors: {e:?}"))?;
    let count = tensors.names().len();
    if count == 0 {
        bail!("downloaded weights contain no tensors");
    }
    Ok(count)
}

/// Write to `<dest>.tmp`, then rename over `dest`.
fn write_atomic(dest: &Path, body: &[u8]) -> anyhow::Result<()> {
    let tmp_path = dest.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;
    file.write_all(body)?;
    file.flush()?;
    drop(file);

    fs::rename(&tmp_path, dest)
        .with_context(|| format!("failed to rename {} -> {}", tmp_path.display(), dest.display()))?;

    Ok(())
}

/// Get the user's home directory.
pub fn dirs_home() -> anyhow::Result<PathBuf> {
    std::env::var("HOME")
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| std::env::var("USERPROFILE").ok().filter(|v| !v.is_empty()))
        .map(PathBuf::from)
        .context("cannot determine home directory (neither HOME nor USERPROFILE is set)")
}
