//! Export of debiased responses and evaluation results.
//!
//! JSON output uses the survey response field names (`Question`, `llm_resp`,
//! `num_llms`, `debiased_llm_resp`); CSV output is flattened to one row per
//! simulated response.

use debias_model::{DebiasedResult, EvaluationReport};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during export operations.
#[derive(Debug, Error)]
pub enum ExportError {
    /// CSV serialization error.
    #[error("CSV serialization error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization error.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid format error.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Export format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    /// Comma-separated values format.
    Csv,

    /// Compact JSON format.
    Json,

    /// Pretty-printed JSON format.
    #[default]
    PrettyJson,
}

impl ExportFormat {
    /// Get the file extension for this format.
    pub const fn extension(&self) -> &str {
        match self {
            Self::Csv => "csv",
            Self::Json | Self::PrettyJson => "json",
        }
    }

    /// Guess the format from a file extension, preferring pretty JSON for `.json`.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "json" => Some(Self::PrettyJson),
            _ => None,
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "pretty-json" | "pretty_json" | "pretty" => Ok(Self::PrettyJson),
            other => Err(ExportError::InvalidFormat(other.to_string())),
        }
    }
}

/// One debiased question in the survey response layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DebiasedRecord {
    /// Question text
    #[serde(rename = "Question")]
    pub question: String,

    /// Raw simulated responses
    #[serde(rename = "llm_resp")]
    pub llm_responses: Vec<f64>,

    /// Number of simulated respondents
    pub num_llms: usize,

    /// Scalar bias subtracted from each response
    pub bias: f64,

    /// Debiased responses, same order as `llm_resp`
    #[serde(rename = "debiased_llm_resp")]
    pub debiased_responses: Vec<f64>,
}

impl From<&DebiasedResult> for DebiasedRecord {
    fn from(result: &DebiasedResult) -> Self {
        Self {
            question: result.question_text.clone(),
            llm_responses: result.raw_llm_responses.clone(),
            num_llms: result.raw_llm_responses.len(),
            bias: result.bias,
            debiased_responses: result.debiased_responses.clone(),
        }
    }
}

/// Flattened response row for CSV export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseRow {
    /// Question text
    pub question: String,
    /// Position of the response within its question
    pub index: usize,
    /// Raw simulated response
    pub raw: f64,
    /// Bias applied to the question
    pub bias: f64,
    /// raw − bias
    pub debiased: f64,
}

/// Flatten results to one row per response.
pub fn response_rows(results: &[DebiasedResult]) -> Vec<ResponseRow> {
    results
        .iter()
        .flat_map(|result| {
            result
                .raw_llm_responses
                .iter()
                .zip(&result.debiased_responses)
                .enumerate()
                .map(move |(index, (&raw, &debiased))| ResponseRow {
                    question: result.question_text.clone(),
                    index,
                    raw,
                    bias: result.bias,
                    debiased,
                })
        })
        .collect()
}

/// Trait for exporting data in various formats.
pub trait Exporter {
    /// Export data to a string in the specified format.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    fn export_to_string(&self, format: ExportFormat) -> Result<String, ExportError>;

    /// Export data to a file in the specified format.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or file writing fails.
    fn export_to_file(&self, path: &Path, format: ExportFormat) -> Result<(), ExportError> {
        let content = self.export_to_string(format)?;
        let mut file = File::create(path)?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }
}

fn write_csv<T: Serialize>(records: impl IntoIterator<Item = T>) -> Result<String, ExportError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    for record in records {
        wtr.serialize(record)?;
    }
    let bytes = wtr.into_inner().map_err(|e| e.into_error())?;
    String::from_utf8(bytes).map_err(|e| ExportError::InvalidFormat(e.to_string()))
}

fn write_json<T: Serialize + ?Sized>(value: &T, pretty: bool) -> Result<String, ExportError> {
    if pretty {
        Ok(serde_json::to_string_pretty(value)?)
    } else {
        Ok(serde_json::to_string(value)?)
    }
}

impl Exporter for [DebiasedResult] {
    fn export_to_string(&self, format: ExportFormat) -> Result<String, ExportError> {
        match format {
            ExportFormat::Csv => write_csv(response_rows(self)),
            ExportFormat::Json | ExportFormat::PrettyJson => {
                let records: Vec<DebiasedRecord> = self.iter().map(DebiasedRecord::from).collect();
                write_json(&records, format == ExportFormat::PrettyJson)
            }
        }
    }
}

impl Exporter for Vec<DebiasedResult> {
    fn export_to_string(&self, format: ExportFormat) -> Result<String, ExportError> {
        self.as_slice().export_to_string(format)
    }
}

impl Exporter for EvaluationReport {
    fn export_to_string(&self, format: ExportFormat) -> Result<String, ExportError> {
        match format {
            ExportFormat::Csv => write_csv(&self.items),
            ExportFormat::Json => write_json(self, false),
            ExportFormat::PrettyJson => write_json(self, true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn result(question: &str, raw: Vec<f64>, bias: f64) -> DebiasedResult {
        let debiased_responses = raw.iter().map(|r| r - bias).collect();
        DebiasedResult {
            question_text: question.to_string(),
            raw_llm_responses: raw,
            bias,
            debiased_responses,
        }
    }

    #[test]
    fn test_csv_has_one_row_per_response() {
        let results = vec![
            result("Q1", vec![5.0, 6.0, 4.5], 0.5),
            result("Q2", vec![2.0], -1.0),
        ];
        let csv = results.export_to_string(ExportFormat::Csv).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], "question,index,raw,bias,debiased");
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[1], "Q1,0,5.0,0.5,4.5");
        assert_eq!(lines[3], "Q1,2,4.5,0.5,4.0");
        assert_eq!(lines[4], "Q2,0,2.0,-1.0,3.0");
    }

    #[test]
    fn test_json_uses_survey_field_names() {
        let results = vec![result("Q1", vec![5.0, 6.0], 0.5)];
        let json = results.export_to_string(ExportFormat::Json).unwrap();

        assert!(json.contains("\"Question\":\"Q1\""));
        assert!(json.contains("\"llm_resp\":[5.0,6.0]"));
        assert!(json.contains("\"num_llms\":2"));
        assert!(json.contains("\"debiased_llm_resp\":[4.5,5.5]"));

        let records: Vec<DebiasedRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(records[0].num_llms, 2);
    }

    #[test]
    fn test_pretty_json_is_indented() {
        let results = vec![result("Q1", vec![1.0], 0.0)];
        let json = results.export_to_string(ExportFormat::PrettyJson).unwrap();
        assert!(json.contains("\n  "));
    }

    #[rstest]
    #[case("csv", ExportFormat::Csv)]
    #[case("JSON", ExportFormat::Json)]
    #[case("pretty-json", ExportFormat::PrettyJson)]
    fn test_format_from_str(#[case] input: &str, #[case] expected: ExportFormat) {
        assert_eq!(input.parse::<ExportFormat>().unwrap(), expected);
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ExportFormat::from_path(Path::new("out.csv")), Some(ExportFormat::Csv));
        assert_eq!(ExportFormat::from_path(Path::new("out.json")), Some(ExportFormat::PrettyJson));
        assert_eq!(ExportFormat::from_path(Path::new("out.txt")), None);
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
