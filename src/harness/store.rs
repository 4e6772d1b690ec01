use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use super::dataset::Problem;

/// Everything generated so far for one problem, persisted as `<name>.json.gz`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionsFile {
    pub name: String,
    pub language: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: usize,
    pub prompt: String,
    pub tests: String,
    pub completions: Vec<String>,
    pub stop_tokens: Vec<String>,
    #[serde(default)]
    pub tokens: Vec<Vec<u32>>,
    #[serde(default)]
    pub cumlogprobs: Vec<f64>,
}

impl CompletionsFile {
    pub fn fresh(problem: &Problem, temperature: f64, top_p: f64, max_tokens: usize) -> Self {
        Self {
            name: problem.name.clone(),
            language: problem.language.clone(),
            temperature,
            top_p,
            max_tokens,
            prompt: problem.prompt.clone(),
            tests: problem.tests.clone(),
            completions: Vec::new(),
            stop_tokens: problem.stop_tokens.clone(),
            tokens: Vec::new(),
            cumlogprobs: Vec::new(),
        }
    }
}

pub fn completions_path(dir: &Path, problem_name: &str) -> PathBuf {
    dir.join(format!("{}.json.gz", problem_name))
}

/// Loads the saved record for `problem`, or starts an empty one.
pub fn read_or_create(
    dir: &Path,
    problem: &Problem,
    temperature: f64,
    top_p: f64,
    max_tokens: usize,
) -> Result<CompletionsFile> {
    let path = completions_path(dir, &problem.name);
    if !path.exists() {
        return Ok(CompletionsFile::fresh(problem, temperature, top_p, max_tokens));
    }

    let file = File::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
    let existing: CompletionsFile = serde_json::from_reader(BufReader::new(GzDecoder::new(file)))
        .with_context(|| format!("failed to decode {}", path.display()))?;
    tracing::debug!(problem = %existing.name, done = existing.completions.len(), "resuming");
    Ok(existing)
}

pub fn write(dir: &Path, record: &CompletionsFile) -> Result<()> {
    let path = completions_path(dir, &record.name);
    let file = File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    serde_json::to_writer(&mut encoder, record)?;
    encoder
        .finish()
        .and_then(|mut w| w.flush())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{completions_path, read_or_create, write};
    use crate::harness::dataset::Problem;

    fn problem() -> Problem {
        Problem {
            name: "HumanEval_2_truncate_number".to_string(),
            language: "rs".to_string(),
            prompt: "fn truncate_number(number: f64) -> f64 {\n".to_string(),
            tests: "}\n\nfn main() {}\n".to_string(),
            stop_tokens: vec!["\n}".to_string()],
        }
    }

    #[test]
    fn missing_file_starts_empty_record() {
        let dir = tempfile::tempdir().unwrap();
        let record = read_or_create(dir.path(), &problem(), 0.2, 0.95, 512).unwrap();
        assert!(record.completions.is_empty());
        assert_eq!(record.stop_tokens, vec!["\n}".to_string()]);
        assert_eq!(record.max_tokens, 512);
    }

    #[test]
    fn saved_record_is_resumed() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = read_or_create(dir.path(), &problem(), 0.2, 0.95, 512).unwrap();
        record.completions.push("    number.fract()".to_string());
        record.tokens.push(vec![1, 2, 3]);
        record.cumlogprobs.push(-1.25);
        write(dir.path(), &record).unwrap();

        assert!(completions_path(dir.path(), "HumanEval_2_truncate_number").exists());
        let resumed = read_or_create(dir.path(), &problem(), 0.8, 1.0, 64).unwrap();
        assert_eq!(resumed, record);
    }

    #[test]
    fn files_without_token_columns_still_load() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = completions_path(dir.path(), "HumanEval_2_truncate_number");
        let legacy = r#"{"name":"HumanEval_2_truncate_number","language":"rs","temperature":0.2,"top_p":0.95,"max_tokens":512,"prompt":"p","tests":"t","completions":["a"],"stop_tokens":[]}"#;
        let mut encoder = flate2::write::GzEncoder::new(std::fs::File::create(&path).unwrap(), flate2::Compression::default());
        encoder.write_all(legacy.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let record = read_or_create(dir.path(), &problem(), 0.2, 0.95, 512).unwrap();
        assert_eq!(record.completions, vec!["a".to_string()]);
        assert!(record.tokens.is_empty());
    }
}
