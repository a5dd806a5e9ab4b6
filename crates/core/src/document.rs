//! Ingested document types — the boundary with external extraction.
//!
//! docpilot never parses raw files. The ingestion collaborator hands over
//! already-extracted text chunks (for passage search) and column-typed
//! tables (for tabular queries); these types are what crosses that boundary.

use serde::{Deserialize, Serialize};

/// A fragment of source text annotated with its originating document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// The chunk text
    pub content: String,

    /// Identifier of the file this chunk came from
    pub source: String,
}

impl DocumentChunk {
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
        }
    }
}

/// The type of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    Float,
    Text,
    Bool,
}

/// A named, typed table column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub dtype: ColumnType,
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    /// Numeric view of the cell, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(i) => Some(*i as f64),
            CellValue::Float(f) => Some(*f),
            CellValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Textual view of the cell for display and grouping keys.
    pub fn render(&self) -> String {
        match self {
            CellValue::Null => "null".into(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Int(i) => i.to_string(),
            CellValue::Float(f) => f.to_string(),
            CellValue::Text(s) => s.clone(),
        }
    }
}

/// A column-typed table bound for analytical queries.
///
/// Produced by the external ingestion boundary; rows are positionally
/// aligned with `columns`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabularDataset {
    /// Name of the originating file (used in citations and explanations)
    pub name: String,

    /// Ordered column schema
    pub columns: Vec<Column>,

    /// Row-major data
    pub rows: Vec<Vec<CellValue>>,
}

impl TabularDataset {
    /// Index of a column by name, if present.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Human-readable schema line, e.g. `price (float), city (text)`.
    pub fn schema_summary(&self) -> String {
        self.columns
            .iter()
            .map(|c| format!("{} ({:?})", c.name, c.dtype).to_lowercase())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// True when every row matches the column count.
    pub fn is_rectangular(&self) -> bool {
        self.rows.iter().all(|r| r.len() == self.columns.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TabularDataset {
        TabularDataset {
            name: "sales.csv".into(),
            columns: vec![
                Column { name: "city".into(), dtype: ColumnType::Text },
                Column { name: "revenue".into(), dtype: ColumnType::Float },
            ],
            rows: vec![
                vec![CellValue::Text("Oslo".into()), CellValue::Float(10.0)],
                vec![CellValue::Text("Bergen".into()), CellValue::Float(20.0)],
            ],
        }
    }

    #[test]
    fn column_lookup() {
        let t = sample();
        assert_eq!(t.column_index("revenue"), Some(1));
        assert_eq!(t.column_index("missing"), None);
    }

    #[test]
    fn cell_numeric_views() {
        assert_eq!(CellValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(CellValue::Bool(true).as_f64(), Some(1.0));
        assert_eq!(CellValue::Text("x".into()).as_f64(), None);
        assert_eq!(CellValue::Null.as_f64(), None);
    }

    #[test]
    fn schema_summary_lists_columns() {
        let t = sample();
        let summary = t.schema_summary();
        assert!(summary.contains("city (text)"));
        assert!(summary.contains("revenue (float)"));
    }

    #[test]
    fn rectangular_check() {
        let mut t = sample();
        assert!(t.is_rectangular());
        t.rows.push(vec![CellValue::Null]);
        assert!(!t.is_rectangular());
    }

    #[test]
    fn chunk_deserializes_from_ingestion_record() {
        let json = r#"{"content": "Sensor xyz was built in 2002.", "source": "doc1"}"#;
        let chunk: DocumentChunk = serde_json::from_str(json).unwrap();
        assert_eq!(chunk.source, "doc1");
    }
}
