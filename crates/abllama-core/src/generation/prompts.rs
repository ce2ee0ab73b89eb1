//! Batch prompt file parsing.

use crate::error::{GenerationError, GenerationResult};
use abllama_abstraction::ConfigError;
use std::path::Path;

/// Reads one prompt per line.
///
/// A blank line is never a valid generation request, so it is rejected with
/// its 1-based line number rather than skipped.
pub fn read_prompts(path: &Path) -> GenerationResult<Vec<String>> {
    if !path.is_file() {
        return Err(ConfigError::MissingPath(format!("input file not found: {}", path.display())).into());
    }

    let content = std::fs::read_to_string(path)?;
    parse_prompts(&content)
}

pub fn parse_prompts(content: &str) -> GenerationResult<Vec<String>> {
    let mut prompts = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            return Err(GenerationError::Data(format!("line {} is blank", index + 1)));
        }
        prompts.push(line.to_string());
    }

    if prompts.is_empty() {
        return Err(GenerationError::Data("input file contains no prompts".to_string()));
    }
    Ok(prompts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prompts_keeps_order() {
        let prompts = parse_prompts("first\nsecond\r\nthird\n").unwrap();
        assert_eq!(prompts, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_blank_line_is_data_error() {
        let err = parse_prompts("first\n   \nthird").unwrap_err();
        assert!(matches!(err, GenerationError::Data(ref m) if m.contains("line 2")));
    }

    #[test]
    fn test_empty_file_rejected() {
        assert!(matches!(parse_prompts(""), Err(GenerationError::Data(_))));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = read_prompts(Path::new("/nonexistent/prompts.txt")).unwrap_err();
        assert!(matches!(err, GenerationError::Config(ConfigError::MissingPath(_))));
    }
}
