use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hf_hub::api::sync::{Api, ApiRepo};
use hf_hub::{Repo, RepoType};

/// Where checkpoint or tokenizer files come from: a local directory or a Hub
/// repository pinned to a revision.
pub(super) enum FileSource {
    Local(PathBuf),
    Hub { id: String, repo: ApiRepo },
}

impl FileSource {
    pub(super) fn resolve(id: &str, revision: Option<&str>) -> Result<Self> {
        let local = Path::new(id);
        if local.is_dir() {
            if revision.is_some() {
                tracing::warn!(path = %local.display(), "revision pin ignored for local directory");
            }
            return Ok(Self::Local(local.to_path_buf()));
        }

        let api = Api::new().context("failed to initialise Hugging Face Hub client")?;
        let revision = revision.unwrap_or("main").to_string();
        tracing::debug!(repo = id, %revision, "resolving hub repository");
        let repo = api.repo(Repo::with_revision(id.to_string(), RepoType::Model, revision));
        Ok(Self::Hub {
            id: id.to_string(),
            repo,
        })
    }

    pub(super) fn get(&self, filename: &str) -> Result<PathBuf> {
        match self {
            Self::Local(dir) => {
                let path = dir.join(filename);
                if path.exists() {
                    Ok(path)
                } else {
                    anyhow::bail!("{} not found in {}", filename, dir.display())
                }
            }
            Self::Hub { id, repo } => repo
                .get(filename)
                .with_context(|| format!("failed to fetch {} from {}", filename, id)),
        }
    }

    /// Like `get`, for files a checkpoint may legitimately lack.
    pub(super) fn get_optional(&self, filename: &str) -> Option<PathBuf> {
        match self.get(filename) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::debug!(file = filename, error = %e, "optional file unavailable");
                None
            }
        }
    }

    /// Weight files: a single `model.safetensors`, or every shard listed in
    /// `model.safetensors.index.json`.
    pub(super) fn safetensors(&self) -> Result<Vec<PathBuf>> {
        if let Some(index_path) = self.get_optional("model.safetensors.index.json") {
            let shards = shard_names(&index_path)?;
            return shards.iter().map(|name| self.get(name)).collect();
        }
        Ok(vec![self.get("model.safetensors")?])
    }
}

fn shard_names(index_path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(index_path)
        .with_context(|| format!("failed to read {}", index_path.display()))?;
    let index: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("invalid safetensors index {}", index_path.display()))?;

    let weight_map = index
        .get("weight_map")
        .and_then(|v| v.as_object())
        .with_context(|| format!("{} has no weight_map", index_path.display()))?;

    let mut files: Vec<String> = Vec::new();
    for filename in weight_map.values().filter_map(|v| v.as_str()) {
        if !files.iter().any(|f| f == filename) {
            files.push(filename.to_string());
        }
    }
    files.sort();
    Ok(files)
}
