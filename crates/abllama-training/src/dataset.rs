use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Stable identifier for a dataset (content hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId(pub String);

/// A single causal-LM training example.
///
/// The text is both the input and the supervision target: the model learns to
/// predict its own continuation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrainingExample {
    pub text: String,
}

impl TrainingExample {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

pub type Dataset = Vec<TrainingExample>;

/// On-disk dataset encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    /// Comma separated values with a header row.
    Csv,
    /// One JSON object per line.
    Jsonl,
}

impl DatasetFormat {
    /// Picks the format from the file extension.
    pub fn from_path(path: &Path) -> TrainingResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "csv" => Ok(Self::Csv),
            "jsonl" | "ndjson" => Ok(Self::Jsonl),
            _ => Err(TrainingError::Data(format!(
                "unsupported dataset format for {} (expected .csv or .jsonl)",
                path.display()
            ))),
        }
    }
}

/// Loads the records of `text_field` from a CSV or JSONL file, preserving file order.
pub fn load_text_dataset(path: &Path, text_field: &str) -> TrainingResult<Dataset> {
    if !path.exists() {
        return Err(TrainingError::Data(format!("dataset not found: {}", path.display())));
    }

    let examples = match DatasetFormat::from_path(path)? {
        DatasetFormat::Csv => read_csv_dataset(path, text_field)?,
        DatasetFormat::Jsonl => read_jsonl_dataset(path, text_field)?,
    };

    validate_examples(&examples)?;
    Ok(examples)
}

fn read_csv_dataset(path: &Path, text_field: &str) -> TrainingResult<Dataset> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let column = headers.iter().position(|h| h.trim() == text_field).ok_or_else(|| {
        TrainingError::Data(format!(
            "column '{}' not found in {} (columns: {})",
            text_field,
            path.display(),
            headers.iter().collect::<Vec<_>>().join(", ")
        ))
    })?;

    let mut dataset = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        // Header is line 1.
        let line = idx + 2;
        let record = record.map_err(|e| TrainingError::Data(format!("malformed csv record at line {line}: {e}")))?;
        let text = record
            .get(column)
            .ok_or_else(|| TrainingError::Data(format!("record at line {line} has no '{text_field}' field")))?;
        dataset.push(TrainingExample::new(text));
    }

    Ok(dataset)
}

fn read_jsonl_dataset(path: &Path, text_field: &str) -> TrainingResult<Dataset> {
    let contents = std::fs::read_to_string(path)?;
    let mut dataset = Vec::new();

    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(line).map_err(|e| {
            TrainingError::Data(format!("failed to parse jsonl line {}: {}", idx + 1, e))
        })?;
        let text = value.get(text_field).and_then(serde_json::Value::as_str).ok_or_else(|| {
            TrainingError::Data(format!("jsonl line {} has no string field '{}'", idx + 1, text_field))
        })?;
        dataset.push(TrainingExample::new(text));
    }

    Ok(dataset)
}

pub fn compute_dataset_id(examples: &[TrainingExample]) -> TrainingResult<DatasetId> {
    let mut hasher = Sha256::new();

    for ex in examples {
        let bytes = serde_json::to_vec(ex)?;
        hasher.update(bytes);
        hasher.update(b"\n");
    }

    Ok(DatasetId(hex::encode(hasher.finalize())))
}

pub fn validate_examples(examples: &[TrainingExample]) -> TrainingResult<()> {
    if examples.is_empty() {
        return Err(TrainingError::Data("dataset must not be empty".to_string()));
    }
    for (idx, ex) in examples.iter().enumerate() {
        if ex.text.trim().is_empty() {
            return Err(TrainingError::Data(format!("example[{idx}] text is empty")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_examples_rejects_empty() {
        let examples: Vec<TrainingExample> = vec![];
        assert!(validate_examples(&examples).is_err());
        assert!(validate_examples(&[TrainingExample::new("  ")]).is_err());
    }

    #[test]
    fn test_compute_dataset_id_stable_for_same_content() {
        let examples = vec![TrainingExample::new("EVQLVESGGGLVQ"), TrainingExample::new("QVQLQESGPGLVK")];

        let id1 = compute_dataset_id(&examples).unwrap();
        let id2 = compute_dataset_id(&examples).unwrap();
        assert_eq!(id1, id2);

        let reordered = vec![examples[1].clone(), examples[0].clone()];
        assert_ne!(id1, compute_dataset_id(&reordered).unwrap());
    }

    #[test]
    fn test_load_csv_text_column() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.csv");
        std::fs::write(&path, "id,text\n1,first sequence\n2,\"second, quoted\"\n").unwrap();

        let ds = load_text_dataset(&path, "text").unwrap();
        assert_eq!(ds, vec![TrainingExample::new("first sequence"), TrainingExample::new("second, quoted")]);
    }

    #[test]
    fn test_load_csv_missing_column_is_data_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.csv");
        std::fs::write(&path, "data\nabc\n").unwrap();

        let err = load_text_dataset(&path, "text").unwrap_err();
        assert!(matches!(err, TrainingError::Data(msg) if msg.contains("column 'text'")));
    }

    #[test]
    fn test_load_csv_ragged_record_is_data_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.csv");
        std::fs::write(&path, "id,text\n1,ok\n2\n").unwrap();

        let err = load_text_dataset(&path, "text").unwrap_err();
        assert!(matches!(err, TrainingError::Data(msg) if msg.contains("line 3")));
    }

    #[test]
    fn test_load_jsonl() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.jsonl");
        std::fs::write(&path, "{\"text\": \"a\"}\n\n{\"text\": \"b\", \"extra\": 1}\n").unwrap();

        let ds = load_text_dataset(&path, "text").unwrap();
        assert_eq!(ds.len(), 2);

        std::fs::write(&path, "{\"text\": 3}\n").unwrap();
        assert!(matches!(load_text_dataset(&path, "text"), Err(TrainingError::Data(_))));
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.parquet");
        std::fs::write(&path, "x").unwrap();
        assert!(matches!(load_text_dataset(&path, "text"), Err(TrainingError::Data(_))));
    }
}
