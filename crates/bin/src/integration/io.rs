//! File loading and saving for the CLI.
//!
//! Calibration and request files are JSON. A file may hold a single record
//! or an array of records.

use debias::DebiasRequest;
use debias::model::{BiasModel, CalibrationItem, CalibrationSet};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::error::Error;
use std::fs;
use std::path::Path;

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> From<OneOrMany<T>> for Vec<T> {
    fn from(value: OneOrMany<T>) -> Self {
        match value {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, Box<dyn Error>> {
    let content =
        fs::read_to_string(path).map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    parse_records(&content).map_err(|e| format!("invalid JSON in {}: {e}", path.display()).into())
}

pub(crate) fn parse_records<T: DeserializeOwned>(content: &str) -> serde_json::Result<Vec<T>> {
    serde_json::from_str::<OneOrMany<T>>(content).map(Vec::from)
}

/// Load a calibration set.
pub(crate) fn load_calibration(path: &Path) -> Result<CalibrationSet, Box<dyn Error>> {
    let items: Vec<CalibrationItem> = read_records(path)?;
    Ok(CalibrationSet::new(items)?)
}

/// Load debias requests.
pub(crate) fn load_requests(path: &Path) -> Result<Vec<DebiasRequest>, Box<dyn Error>> {
    read_records(path)
}

/// Load and validate a fitted model.
pub(crate) fn load_model(path: &Path) -> Result<BiasModel, Box<dyn Error>> {
    let content =
        fs::read_to_string(path).map_err(|e| format!("cannot read model {}: {e}", path.display()))?;
    let model: BiasModel = serde_json::from_str(&content)?;
    model.validate()?;
    Ok(model)
}

/// Write a fitted model as pretty JSON.
pub(crate) fn save_model(model: &BiasModel, path: &Path) -> Result<(), Box<dyn Error>> {
    fs::write(path, serde_json::to_string_pretty(model)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_single_object_is_one_record() {
        let records: Vec<DebiasRequest> =
            parse_records(r#"{"Question": "q", "llm_resp": [1.0, 2.0]}"#).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].raw_llm_responses, vec![1.0, 2.0]);
    }

    #[test]
    fn test_array_of_calibration_items() {
        let records: Vec<CalibrationItem> = parse_records(
            r#"[
                {"Question": "a", "Embedding": [0.1, 0.2], "Average_Human_Response": 3.0, "Average_LLM_Response": 3.5},
                {"Question": "b", "Embedding": [0.3, 0.4], "Average_Human_Response": 2.0, "Average_LLM_Response": 1.5}
            ]"#,
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].delta(), -0.5);
    }

    #[test]
    fn test_model_file_round_trip() {
        let model = BiasModel::transfer(array![0.5, -0.25, 0.125]).unwrap();
        let path = std::env::temp_dir().join(format!("debias-cli-model-{}.json", std::process::id()));
        save_model(&model, &path).unwrap();
        let loaded = load_model(&path).unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(loaded, model);
    }
}
