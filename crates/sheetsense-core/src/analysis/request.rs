//! Request/response wire types.
//!
//! Field names follow the JSON contract exposed to the (external) HTTP
//! layer: `column_names`, `sheet_data`, and every response field is always
//! present, defaulted when nothing better is known.

use serde::{Deserialize, Serialize};
use sheetsense_engine::sandbox::CellValue;

use crate::error::AnalysisError;

/// One prior conversation turn.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub query: String,
    #[serde(default)]
    pub answer: String,
}

/// An incoming analysis call. Immutable once constructed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub query: String,
    #[serde(rename = "column_names")]
    pub columns: Vec<String>,
    #[serde(rename = "sheet_data")]
    pub rows: Vec<Vec<CellValue>>,
    #[serde(default)]
    pub history: Vec<HistoryTurn>,
    #[serde(default)]
    pub custom_context: Option<String>,
}

impl AnalysisRequest {
    /// Shape invariant: every row has exactly `columns.len()` cells.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.query.trim().is_empty() {
            return Err(AnalysisError::EmptyQuery);
        }
        let expected = self.columns.len();
        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != expected {
                return Err(AnalysisError::ShapeMismatch {
                    row: i,
                    got: row.len(),
                    expected,
                });
            }
        }
        Ok(())
    }
}

/// Optional table payload in a response.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StructuredData {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    pub chart_recommended: bool,
    pub table_title: String,
}

/// The response contract. Every field is always present; defaults are
/// substituted for anything the pipeline could not produce.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub response_type: String,
    pub summary: String,
    pub methodology: String,
    pub key_findings: Vec<String>,
    pub confidence: f64,
    pub structured_data: Option<StructuredData>,
    pub highlight_rows: Vec<usize>,
    pub highlight_color: Option<String>,
    pub highlight_message: String,
    pub action_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_shape() {
        let req = AnalysisRequest {
            query: "сколько всего?".into(),
            columns: vec!["a".into(), "b".into()],
            rows: vec![
                vec![CellValue::Text("x".into()), CellValue::Number(1.0)],
                vec![CellValue::Text("y".into())],
            ],
            history: Vec::new(),
            custom_context: None,
        };
        let err = req.validate().unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::ShapeMismatch {
                row: 1,
                got: 1,
                expected: 2
            }
        ));
    }

    #[test]
    fn test_request_json_round_trip() {
        let json = r#"{
            "query": "top 3",
            "column_names": ["Товар", "Цена"],
            "sheet_data": [["Чайник", 100], ["Утюг", "200"], ["Лампа", null]],
            "history": [{"query": "прошлый вопрос", "answer": "ответ"}]
        }"#;
        let req: AnalysisRequest = serde_json::from_str(json).unwrap();
        assert!(req.validate().is_ok());
        assert_eq!(req.rows[0][1], CellValue::Number(100.0));
        assert_eq!(req.rows[1][1], CellValue::Text("200".into()));
        assert_eq!(req.rows[2][1], CellValue::Empty);
        assert!(req.custom_context.is_none());
    }
}
