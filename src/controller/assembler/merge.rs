//! # Variable Merge
//!
//! Deduplicates concatenated `.tfvars` content with a line-oriented
//! bracket-depth scan. A key's value is the whole assignment line, or for
//! values ending in `{`/`[` every line up to the matching close. Later
//! assignments replace earlier ones and output keys are sorted.
//!
//! Brackets are counted, not paired: `[` closed by `}` is accepted.

use crate::constants::TF_VAR_PREFIX;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed variable line {line_number}: '{line}' (expected key = value)")]
pub struct ConfigMergeError {
    /// 1-based position in the combined input
    pub line_number: usize,
    pub line: String,
}

/// Merge variable definitions; last write wins, keys emitted lexicographically
pub fn merge_tfvars(content: &str) -> Result<String, ConfigMergeError> {
    let mut values: BTreeMap<String, String> = BTreeMap::new();
    let mut current_key = String::new();
    let mut current_value = String::new();
    let mut depth: usize = 0;

    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if depth > 0 {
            current_value.push('\n');
            current_value.push_str(&line.replace('\t', "  "));
            if opens_block(trimmed) {
                depth += 1;
            } else if closes_block(trimmed) {
                depth -= 1;
            }
            if depth == 0 {
                values.insert(current_key.clone(), std::mem::take(&mut current_value));
            }
            continue;
        }

        let Some((lhs, rhs)) = line.split_once('=') else {
            return Err(ConfigMergeError {
                line_number: idx + 1,
                line: line.to_string(),
            });
        };
        let key = lhs.trim();
        if key.is_empty() {
            return Err(ConfigMergeError {
                line_number: idx + 1,
                line: line.to_string(),
            });
        }

        current_key = key.to_string();
        current_value = line.to_string();
        if opens_block(rhs.trim_end()) {
            depth = 1;
            continue;
        }
        values.insert(current_key.clone(), std::mem::take(&mut current_value));
    }

    // An unterminated block still counts as the key's value
    if depth > 0 {
        values.insert(current_key, current_value);
    }

    let mut out = String::new();
    for value in values.values() {
        out.push_str(value);
        out.push_str("\n\n");
    }
    Ok(out)
}

fn opens_block(trimmed: &str) -> bool {
    trimmed.ends_with('{') || trimmed.ends_with('[')
}

fn closes_block(trimmed: &str) -> bool {
    trimmed.ends_with('}') || trimmed.ends_with(']') || trimmed.ends_with("},") || trimmed.ends_with("],")
}

/// Render `TF_VAR_*` environment overrides as variable lines
///
/// Values that are not already a list or map literal are quoted.
pub fn env_override_lines<'a, I>(env: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = String::new();
    for (name, value) in env {
        let Some(key) = name.strip_prefix(TF_VAR_PREFIX) else {
            continue;
        };
        if key.is_empty() {
            continue;
        }
        let value = if value.starts_with('{') || value.starts_with('[') {
            value.to_string()
        } else {
            format!("\"{value}\"")
        };
        out.push('\n');
        out.push_str(key);
        out.push_str(" = ");
        out.push_str(&value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins_and_sorted() {
        let merged = merge_tfvars("region = \"us-east-1\"\nname = \"a\"\nregion = \"eu-west-1\"\n").unwrap();
        assert_eq!(merged, "name = \"a\"\n\nregion = \"eu-west-1\"\n\n");
    }

    #[test]
    fn test_multiline_block_is_atomic() {
        let input = "subnets = [\n\t\"a\",\n\t\"b\",\n]\nzone = \"z\"\n";
        let merged = merge_tfvars(input).unwrap();
        assert_eq!(
            merged,
            "subnets = [\n  \"a\",\n  \"b\",\n]\n\nzone = \"z\"\n\n"
        );
    }

    #[test]
    fn test_nested_blocks_track_depth() {
        let input = "tags = {\n  inner = {\n    a = 1\n  },\n  b = 2\n}\nx = 1\n";
        let merged = merge_tfvars(input).unwrap();
        assert!(merged.starts_with("tags = {\n  inner = {\n    a = 1\n  },\n  b = 2\n}\n\n"));
        assert!(merged.ends_with("x = 1\n\n"));
    }

    #[test]
    fn test_line_without_assignment_is_rejected() {
        let err = merge_tfvars("a = 1\nnonsense\n").unwrap_err();
        assert_eq!(err.line_number, 2);
        assert_eq!(err.line, "nonsense");
    }

    #[test]
    fn test_value_containing_equals_splits_on_first() {
        let merged = merge_tfvars("url = \"a=b\"\n").unwrap();
        assert_eq!(merged, "url = \"a=b\"\n\n");
    }

    #[test]
    fn test_env_overrides_quote_scalars() {
        let lines = env_override_lines([
            ("TF_VAR_region", "us-west-2"),
            ("TF_VAR_zones", "[\"a\"]"),
            ("TF_VAR_empty", ""),
            ("DEPLOYMENT", "demo"),
        ]);
        assert_eq!(
            lines,
            "\nregion = \"us-west-2\"\nzones = [\"a\"]\nempty = \"\""
        );
    }
}
