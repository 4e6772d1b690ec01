use std::path::Path;

use anyhow::{Context, Error as E, Result};
use serde::Deserialize;

use super::HarnessError;

/// One benchmark problem. Columns the harness does not use are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Problem {
    pub name: String,
    pub language: String,
    pub prompt: String,
    pub tests: String,
    pub stop_tokens: Vec<String>,
}

/// Reads a dataset stored either as one JSON array or as JSON Lines.
pub fn load_problems(path: &Path) -> Result<Vec<Problem>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read dataset {}", path.display()))?;
    parse_problems(&content).with_context(|| format!("failed to parse dataset {}", path.display()))
}

fn parse_problems(content: &str) -> Result<Vec<Problem>> {
    if content.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(content)?);
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str::<Problem>(line).map_err(|e| {
                E::from(HarnessError::MalformedDataset {
                    line: idx + 1,
                    detail: e.to_string(),
                })
            })
        })
        .collect()
}

/// Applies `--input-start-index` / `--input-limit`.
pub fn select_range(problems: Vec<Problem>, start: Option<usize>, limit: Option<usize>) -> Vec<Problem> {
    let start = start.unwrap_or(0).min(problems.len());
    let stop = match limit {
        Some(limit) => problems.len().min(start.saturating_add(limit)),
        None => problems.len(),
    };
    problems.into_iter().skip(start).take(stop - start).collect()
}

#[cfg(test)]
mod tests {
    use super::{parse_problems, select_range, Problem};

    const ROW_A: &str = r#"{"name":"HumanEval_0_has_close_elements","language":"lua","prompt":"local function f()\n","tests":"lu = require('luaunit')","stop_tokens":["\nlocal","\nfunction"],"doctests":"keep"}"#;
    const ROW_B: &str = r#"{"name":"HumanEval_1_separate_paren_groups","language":"lua","prompt":"local function g()\n","tests":"","stop_tokens":["\nlocal"]}"#;

    fn names(problems: &[Problem]) -> Vec<&str> {
        problems.iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn json_lines_are_parsed_and_extra_columns_ignored() {
        let content = format!("{}\n\n{}\n", ROW_A, ROW_B);
        let problems = parse_problems(&content).unwrap();
        assert_eq!(
            names(&problems),
            vec!["HumanEval_0_has_close_elements", "HumanEval_1_separate_paren_groups"]
        );
        assert_eq!(problems[0].stop_tokens, vec!["\nlocal".to_string(), "\nfunction".to_string()]);
    }

    #[test]
    fn json_array_is_parsed() {
        let content = format!("  [{}, {}]", ROW_A, ROW_B);
        assert_eq!(parse_problems(&content).unwrap().len(), 2);
    }

    #[test]
    fn bad_line_reports_its_number() {
        let content = format!("{}\n{{\"name\": 1}}\n", ROW_A);
        let err = parse_problems(&content).unwrap_err();
        assert!(err.to_string().contains("line 2"), "{}", err);
    }

    #[test]
    fn range_selection_clamps() {
        let problems = parse_problems(&format!("{}\n{}\n", ROW_A, ROW_B)).unwrap();
        assert_eq!(names(&select_range(problems.clone(), Some(1), None)), vec!["HumanEval_1_separate_paren_groups"]);
        assert_eq!(select_range(problems.clone(), None, Some(1)).len(), 1);
        assert_eq!(select_range(problems.clone(), Some(1), Some(10)).len(), 1);
        assert!(select_range(problems.clone(), Some(5), None).is_empty());
        assert_eq!(select_range(problems, Some(1), Some(usize::MAX)).len(), 1);
    }
}
