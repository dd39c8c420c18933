use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde_json::{Map, Number, Value};

/// Sentinel the document store uses for a missing value.
pub const MISSING_SENTINEL: &str = "na";

/// A numeric table: named columns over a row-major matrix, NaN marking a missing cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    values: Array2<f64>,
}

impl Table {
    pub fn new(columns: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if columns.len() != values.ncols() {
            bail!(
                "Table has {} column name(s) but {} value column(s)",
                columns.len(),
                values.ncols()
            );
        }
        let mut seen = HashSet::new();
        for name in &columns {
            if !seen.insert(name.as_str()) {
                bail!("Duplicate column name '{name}'");
            }
        }
        Ok(Self { columns, values })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows() == 0
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.column_index(name)
            .map(|idx| self.values.column(idx))
    }

    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_nan()).count()
    }

    pub fn select_rows(&self, indices: &[usize]) -> Table {
        Table {
            columns: self.columns.clone(),
            values: self.values.select(Axis(0), indices),
        }
    }

    pub fn drop_column(&self, name: &str) -> Result<Table> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| anyhow!("Column '{name}' not found"))?;
        let keep: Vec<usize> = (0..self.n_columns()).filter(|&i| i != idx).collect();
        let columns = keep.iter().map(|&i| self.columns[i].clone()).collect();
        Ok(Table {
            columns,
            values: self.values.select(Axis(1), &keep),
        })
    }

    /// Split into the feature matrix and the named target column.
    pub fn split_target(&self, target: &str) -> Result<(Table, Array1<f64>)> {
        let y = self
            .column(target)
            .ok_or_else(|| anyhow!("Target column '{target}' not found"))?
            .to_owned();
        Ok((self.drop_column(target)?, y))
    }

    /// Replace `name` if present, otherwise append it as the last column.
    pub fn with_column(&self, name: &str, values: ArrayView1<'_, f64>) -> Result<Table> {
        if values.len() != self.n_rows() {
            bail!(
                "Column '{name}' has {} value(s) but table has {} row(s)",
                values.len(),
                self.n_rows()
            );
        }
        let mut table = self.clone();
        match self.column_index(name) {
            Some(idx) => table.values.column_mut(idx).assign(&values),
            None => {
                table
                    .values
                    .push_column(values)
                    .context("Failed to append column")?;
                table.columns.push(name.to_string());
            }
        }
        Ok(table)
    }

    /// Build a table from store documents, skipping `exclude`d keys.
    ///
    /// Columns appear in first-seen order; a key absent from a record is a missing cell.
    pub fn from_records(records: &[Map<String, Value>], exclude: &[&str]) -> Result<Table> {
        let mut columns: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for record in records {
            for key in record.keys() {
                if exclude.contains(&key.as_str()) {
                    continue;
                }
                if seen.insert(key.clone()) {
                    columns.push(key.clone());
                }
            }
        }

        let mut values = Array2::from_elem((records.len(), columns.len()), f64::NAN);
        for (row, record) in records.iter().enumerate() {
            for (col, name) in columns.iter().enumerate() {
                if let Some(value) = record.get(name) {
                    values[[row, col]] = value_to_cell(value)
                        .with_context(|| format!("Record {row}, column '{name}'"))?;
                }
            }
        }

        Table::new(columns, values)
    }

    pub fn to_records(&self) -> Vec<Map<String, Value>> {
        self.values
            .rows()
            .into_iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row.iter())
                    .map(|(name, value)| {
                        let json = Number::from_f64(*value)
                            .map(Value::Number)
                            .unwrap_or(Value::Null);
                        (name.clone(), json)
                    })
                    .collect()
            })
            .collect()
    }

    pub fn read_csv(path: &Path) -> Result<Table> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;
        let columns: Vec<String> = reader
            .headers()
            .with_context(|| format!("Failed to read CSV header: {}", path.display()))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if columns.is_empty() || columns.iter().all(String::is_empty) {
            bail!("CSV file has no header: {}", path.display());
        }

        let mut cells = Vec::new();
        let mut rows = 0usize;
        for (line, record) in reader.records().enumerate() {
            let record = record
                .with_context(|| format!("Malformed CSV row {} in {}", line + 2, path.display()))?;
            if record.len() != columns.len() {
                bail!(
                    "CSV row {} in {} has {} field(s), expected {}",
                    line + 2,
                    path.display(),
                    record.len(),
                    columns.len()
                );
            }
            for (field, name) in record.iter().zip(&columns) {
                cells.push(parse_cell(field).with_context(|| {
                    format!("CSV row {}, column '{name}' in {}", line + 2, path.display())
                })?);
            }
            rows += 1;
        }

        let values = Array2::from_shape_vec((rows, columns.len()), cells)
            .context("CSV cell count does not match table shape")?;
        Table::new(columns, values)
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;
        writer
            .write_record(&self.columns)
            .with_context(|| format!("Failed to write CSV header: {}", path.display()))?;
        for row in self.values.rows() {
            writer
                .write_record(row.iter().map(|v| format_cell(*v)))
                .with_context(|| format!("Failed to write CSV row: {}", path.display()))?;
        }
        writer
            .flush()
            .with_context(|| format!("Failed to flush CSV file: {}", path.display()))?;
        Ok(())
    }
}

fn parse_cell(raw: &str) -> Result<f64> {
    let trimmed = raw.trim();
    if is_missing(trimmed) {
        return Ok(f64::NAN);
    }
    trimmed
        .parse::<f64>()
        .map_err(|_| anyhow!("Non-numeric value '{trimmed}'"))
}

fn is_missing(raw: &str) -> bool {
    raw.is_empty() || raw == MISSING_SENTINEL || raw.eq_ignore_ascii_case("nan")
}

fn format_cell(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}

fn value_to_cell(value: &Value) -> Result<f64> {
    match value {
        Value::Null => Ok(f64::NAN),
        Value::Number(num) => num
            .as_f64()
            .ok_or_else(|| anyhow!("Number {num} is not representable as f64")),
        Value::String(s) => parse_cell(s),
        Value::Bool(true) => Ok(1.0),
        Value::Bool(false) => Ok(0.0),
        other => Err(anyhow!("Unsupported value {other}")),
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    fn record(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn records_drop_identity_and_normalize_sentinel() {
        let records = vec![
            record(json!({"_id": "abc", "a": 1, "b": "na"})),
            record(json!({"_id": "def", "a": "-1", "b": 0.5})),
        ];
        let table = Table::from_records(&records, &["_id"]).unwrap();
        assert_eq!(table.columns(), &["a".to_string(), "b".to_string()]);
        assert_eq!(table.values()[[1, 0]], -1.0);
        assert!(table.values()[[0, 1]].is_nan());
        assert_eq!(table.missing_count(), 1);
    }

    #[test]
    fn records_reject_text_cells() {
        let records = vec![record(json!({"a": "phishing"}))];
        let err = Table::from_records(&records, &[]).unwrap_err();
        assert!(format!("{err:#}").contains("Non-numeric"));
    }

    #[test]
    fn csv_preserves_missing_cells() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested/data.csv");
        let table = Table::new(
            vec!["x".into(), "Result".into()],
            array![[1.0, -1.0], [f64::NAN, 1.0], [0.25, 1.0]],
        )
        .unwrap();
        table.write_csv(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("x,Result\n1,-1\n,1\n"));

        let loaded = Table::read_csv(&path).unwrap();
        assert_eq!(loaded.columns(), table.columns());
        assert!(loaded.values()[[1, 0]].is_nan());
        assert_eq!(loaded.values()[[2, 0]], 0.25);
    }

    #[test]
    fn split_target_removes_column() {
        let table = Table::new(
            vec!["a".into(), "Result".into(), "b".into()],
            array![[1.0, -1.0, 2.0], [3.0, 1.0, 4.0]],
        )
        .unwrap();
        let (features, y) = table.split_target("Result").unwrap();
        assert_eq!(features.columns(), &["a".to_string(), "b".to_string()]);
        assert_eq!(features.values(), &array![[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(y, array![-1.0, 1.0]);
        assert!(table.split_target("missing").is_err());
    }

    #[test]
    fn with_column_appends_or_replaces() {
        let table = Table::new(vec!["a".into()], array![[1.0], [2.0]]).unwrap();
        let appended = table.with_column("Result", array![0.0, 1.0].view()).unwrap();
        assert_eq!(appended.n_columns(), 2);
        let replaced = appended
            .with_column("Result", array![1.0, 1.0].view())
            .unwrap();
        assert_eq!(replaced.n_columns(), 2);
        assert_eq!(replaced.column("Result").unwrap().to_vec(), vec![1.0, 1.0]);
    }

    #[test]
    fn duplicate_columns_are_rejected() {
        let err = Table::new(vec!["a".into(), "a".into()], Array2::zeros((1, 2))).unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }
}
