//! Seeded train/eval partitioning.

use crate::dataset::{load_text_dataset, Dataset, TrainingExample};
use crate::error::{TrainingError, TrainingResult};
use abllama_abstraction::ConfigError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::Path;

/// Default share of examples held out for evaluation.
pub const DEFAULT_TEST_FRACTION: f64 = 0.2;

/// Disjoint train and eval subsets of one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSplit {
    pub train: Dataset,
    pub eval: Dataset,
}

impl DatasetSplit {
    pub fn len(&self) -> usize {
        self.train.len() + self.eval.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Number of eval examples for `len` records: `ceil(len * test_fraction)`,
/// kept within `[1, len - 1]` so neither side is empty.
fn eval_count(len: usize, test_fraction: f64) -> usize {
    let n = (len as f64 * test_fraction).ceil() as usize;
    n.clamp(1, len - 1)
}

/// Shuffles record indices under `seed` and partitions them.
///
/// The first `ceil(len * test_fraction)` indices of the permutation form the
/// eval set, the rest the train set. Identical `(dataset, test_fraction, seed)`
/// always yield identical partitions.
pub fn split_dataset(dataset: &[TrainingExample], test_fraction: f64, seed: u64) -> TrainingResult<DatasetSplit> {
    if !test_fraction.is_finite() || test_fraction <= 0.0 || test_fraction >= 1.0 {
        return Err(ConfigError::invalid("test_fraction", "must be in (0, 1)").into());
    }
    if dataset.len() < 2 {
        return Err(TrainingError::Data(format!(
            "need at least 2 examples to split, got {}",
            dataset.len()
        )));
    }

    let mut order: Vec<usize> = (0..dataset.len()).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let n_eval = eval_count(dataset.len(), test_fraction);
    let (eval_idx, train_idx) = order.split_at(n_eval);

    Ok(DatasetSplit {
        train: train_idx.iter().map(|&i| dataset[i].clone()).collect(),
        eval: eval_idx.iter().map(|&i| dataset[i].clone()).collect(),
    })
}

/// Loads `path` and splits it.
pub fn split_file(path: &Path, text_field: &str, test_fraction: f64, seed: u64) -> TrainingResult<DatasetSplit> {
    let dataset = load_text_dataset(path, text_field)?;
    let split = split_dataset(&dataset, test_fraction, seed)?;
    tracing::info!(
        path = %path.display(),
        train = split.train.len(),
        eval = split.eval.len(),
        seed,
        "dataset split"
    );
    Ok(split)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn dataset(n: usize) -> Dataset {
        (0..n).map(|i| TrainingExample::new(format!("sequence-{i}"))).collect()
    }

    #[test]
    fn test_split_is_deterministic_for_seed() {
        let data = dataset(50);
        let a = split_dataset(&data, 0.2, 42).unwrap();
        let b = split_dataset(&data, 0.2, 42).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_split_differs_across_seeds() {
        let data = dataset(100);
        let a = split_dataset(&data, 0.2, 1).unwrap();
        let b = split_dataset(&data, 0.2, 2).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_split_covers_dataset_disjointly() {
        for n in [2, 3, 5, 10, 37, 101] {
            let data = dataset(n);
            let split = split_dataset(&data, 0.2, 7).unwrap();
            assert_eq!(split.train.len() + split.eval.len(), n);
            assert!(!split.train.is_empty());
            assert!(!split.eval.is_empty());

            let train: HashSet<_> = split.train.iter().collect();
            let eval: HashSet<_> = split.eval.iter().collect();
            assert!(train.is_disjoint(&eval));
            assert_eq!(train.len() + eval.len(), n);
        }
    }

    #[test]
    fn test_eval_count_uses_ceiling() {
        assert_eq!(split_dataset(&dataset(10), 0.2, 0).unwrap().eval.len(), 2);
        assert_eq!(split_dataset(&dataset(11), 0.2, 0).unwrap().eval.len(), 3);
        assert_eq!(split_dataset(&dataset(2), 0.2, 0).unwrap().eval.len(), 1);
    }

    #[test]
    fn test_split_rejects_bad_inputs() {
        assert!(matches!(split_dataset(&dataset(1), 0.2, 0), Err(TrainingError::Data(_))));
        assert!(matches!(split_dataset(&dataset(10), 0.0, 0), Err(TrainingError::Config(_))));
        assert!(matches!(split_dataset(&dataset(10), 1.0, 0), Err(TrainingError::Config(_))));
    }

    #[test]
    fn test_split_file_matches_in_memory_split() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("train.csv");
        let mut csv = String::from("text\n");
        for i in 0..20 {
            csv.push_str(&format!("sequence-{i}\n"));
        }
        std::fs::write(&path, csv).unwrap();

        let from_file = split_file(&path, "text", 0.2, 42).unwrap();
        let in_memory = split_dataset(&dataset(20), 0.2, 42).unwrap();
        assert_eq!(from_file, in_memory);
    }
}
