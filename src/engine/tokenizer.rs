use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Error as E, Result};
use serde_json::Value;
use tokenizers::Tokenizer;

use super::chat_template::ChatTemplate;
use super::files::FileSource;

/// Everything loaded from the tokenizer repository.
pub(super) struct TokenizerBundle {
    pub tokenizer: Tokenizer,
    pub chat_template: Option<ChatTemplate>,
    pub eos_token: Option<String>,
}

pub(super) fn load_tokenizer(source: &FileSource) -> Result<TokenizerBundle> {
    let tokenizer_path = source.get("tokenizer.json")?;
    tracing::info!(path = %tokenizer_path.display(), "loading tokenizer");
    let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(E::msg)?;

    let config = match source.get_optional("tokenizer_config.json") {
        Some(path) => read_json(&path)?,
        None => Value::Null,
    };

    let bos_token = special_token(&config, "bos_token");
    let eos_token = special_token(&config, "eos_token");
    let chat_template = match template_source(&config) {
        Some(source) => Some(ChatTemplate::new(source, bos_token, eos_token.clone())?),
        None => None,
    };

    Ok(TokenizerBundle {
        tokenizer,
        chat_template,
        eos_token,
    })
}

pub(super) fn read_json(path: &Path) -> Result<Value> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("invalid JSON in {}", path.display()))
}

/// Special tokens appear either as plain strings or as `{"content": ...}` objects.
fn special_token(config: &Value, key: &str) -> Option<String> {
    match config.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj.get("content").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// `chat_template` is either a single template or a list of named ones.
fn template_source(config: &Value) -> Option<String> {
    match config.get("chat_template")? {
        Value::String(s) => Some(s.clone()),
        Value::Array(entries) => {
            let named = |wanted: &str| {
                entries.iter().find_map(|entry| {
                    (entry.get("name").and_then(Value::as_str) == Some(wanted))
                        .then(|| entry.get("template").and_then(Value::as_str))
                        .flatten()
                })
            };
            named("default")
                .or_else(|| entries.first().and_then(|e| e.get("template")).and_then(Value::as_str))
                .map(str::to_string)
        }
        _ => None,
    }
}

/// `eos_token_id` in model configs is a single id or a list of ids.
pub(super) fn eos_ids_from_config(config: &Value) -> Vec<u32> {
    match config.get("eos_token_id") {
        Some(Value::Number(n)) => n.as_u64().map(|id| vec![id as u32]).unwrap_or_default(),
        Some(Value::Array(ids)) => ids.iter().filter_map(Value::as_u64).map(|id| id as u32).collect(),
        _ => Vec::new(),
    }
}

/// Union of every end-of-sequence id the checkpoint declares.
pub(super) fn resolve_eos_ids(
    tokenizer: &Tokenizer,
    eos_token: Option<&str>,
    configs: &[&Value],
) -> HashSet<u32> {
    let mut ids: HashSet<u32> = configs.iter().flat_map(|c| eos_ids_from_config(c)).collect();

    if let Some(id) = eos_token.and_then(|t| tokenizer.token_to_id(t)) {
        ids.insert(id);
    }

    if ids.is_empty() {
        for marker in ["<|endoftext|>", "<|end_of_text|>", "</s>"] {
            if let Some(id) = tokenizer.token_to_id(marker) {
                ids.insert(id);
                break;
            }
        }
    }

    ids
}
