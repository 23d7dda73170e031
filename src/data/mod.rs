//! Training and test data (Arrow/Parquet)
//!
//! A [`Dataset`] is a single Arrow `RecordBatch` of nullable `Float64`
//! feature columns plus one binary label column. Nulls mark missing values;
//! the completeness queries below are what the subset constructor uses to
//! decide whether a feature subset is trainable.
//!
//! Matrices handed to the model primitive are always complete-case: only rows
//! with a value in every requested column are extracted.

mod smote;

pub use smote::Smote;

use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default name of the label column for datasets built in memory.
pub const DEFAULT_LABEL_COLUMN: &str = "label";

/// Dense complete-case slice: feature matrix plus 0/1 labels.
///
/// This is what crosses the worker boundary; it is plain data and serializes
/// with serde.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledData {
    x: Array2<f64>,
    y: Array1<f64>,
}

impl LabeledData {
    /// Pair a matrix with its labels.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the row counts differ.
    pub fn new(x: Array2<f64>, y: Array1<f64>) -> Result<Self> {
        if x.nrows() != y.len() {
            return Err(Error::InvalidInput(format!(
                "{} rows but {} labels",
                x.nrows(),
                y.len()
            )));
        }
        Ok(Self { x, y })
    }

    /// Feature matrix (rows × features).
    #[must_use]
    pub const fn x(&self) -> &Array2<f64> {
        &self.x
    }

    /// Labels.
    #[must_use]
    pub const fn y(&self) -> &Array1<f64> {
        &self.y
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.y.len()
    }

    /// Whether there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// Number of feature columns.
    #[must_use]
    pub fn num_features(&self) -> usize {
        self.x.ncols()
    }

    /// Oversample the minority class.
    #[must_use]
    pub fn balanced(&self, smote: &Smote) -> Self {
        let (x, y) = smote.fit_resample(&self.x, &self.y);
        Self { x, y }
    }
}

/// Tabular feature matrix with a binary label column.
#[derive(Debug, Clone)]
pub struct Dataset {
    batch: RecordBatch,
    label_column: String,
    feature_names: Vec<String>,
}

impl Dataset {
    /// Wrap a record batch, casting every column to `Float64`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Data`] if the label column is missing, contains nulls
    /// or values other than 0 and 1, or a feature column cannot be cast to
    /// `Float64`.
    pub fn new(batch: RecordBatch, label_column: impl Into<String>) -> Result<Self> {
        let label_column = label_column.into();
        let schema = batch.schema();
        schema.index_of(&label_column).map_err(|_| {
            Error::Data(format!("label column `{label_column}` not found"))
        })?;

        let mut fields = Vec::with_capacity(schema.fields().len());
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
        for (field, column) in schema.fields().iter().zip(batch.columns()) {
            let column = if column.data_type() == &DataType::Float64 {
                Arc::clone(column)
            } else {
                arrow::compute::cast(column, &DataType::Float64).map_err(|e| {
                    Error::Data(format!("column `{}` is not numeric: {e}", field.name()))
                })?
            };
            fields.push(Field::new(field.name(), DataType::Float64, true));
            columns.push(column);
        }
        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;

        let feature_names = batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .filter(|name| name != &label_column)
            .collect();

        let dataset = Self {
            batch,
            label_column,
            feature_names,
        };
        dataset.validate_labels()?;
        Ok(dataset)
    }

    /// Build a dataset from in-memory columns (`None` = missing value).
    ///
    /// The label column is named [`DEFAULT_LABEL_COLUMN`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Data`] if column lengths disagree, a feature is named
    /// like the label column, or labels are not binary.
    pub fn from_columns<S: Into<String>>(
        features: Vec<(S, Vec<Option<f64>>)>,
        labels: Vec<f64>,
    ) -> Result<Self> {
        let mut fields = Vec::with_capacity(features.len() + 1);
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(features.len() + 1);
        for (name, values) in features {
            let name = name.into();
            if name == DEFAULT_LABEL_COLUMN {
                return Err(Error::Data(format!(
                    "feature name `{name}` collides with the label column"
                )));
            }
            if values.len() != labels.len() {
                return Err(Error::Data(format!(
                    "feature `{name}` has {} rows, labels have {}",
                    values.len(),
                    labels.len()
                )));
            }
            fields.push(Field::new(name, DataType::Float64, true));
            columns.push(Arc::new(Float64Array::from(values)));
        }
        fields.push(Field::new(DEFAULT_LABEL_COLUMN, DataType::Float64, false));
        columns.push(Arc::new(Float64Array::from(labels)));

        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
        Self::new(batch, DEFAULT_LABEL_COLUMN)
    }

    /// Load a dataset from a Parquet file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or the contents
    /// fail [`Dataset::new`] validation.
    pub fn load_parquet<P: AsRef<Path>>(path: P, label_column: &str) -> Result<Self> {
        use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
        use std::fs::File;

        let file = File::open(path.as_ref())
            .map_err(|e| Error::Data(format!("Failed to open Parquet file: {e}")))?;

        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| Error::Data(format!("Failed to parse Parquet file: {e}")))?;
        let schema = Arc::clone(builder.schema());

        let reader = builder
            .build()
            .map_err(|e| Error::Data(format!("Failed to create Parquet reader: {e}")))?;

        let mut batches = Vec::new();
        for batch in reader {
            batches.push(batch?);
        }

        let batch = arrow::compute::concat_batches(&schema, &batches)?;
        Self::new(batch, label_column)
    }

    fn validate_labels(&self) -> Result<()> {
        let labels = self.column(&self.label_column)?;
        if labels.null_count() > 0 {
            return Err(Error::Data(format!(
                "label column `{}` contains {} missing values",
                self.label_column,
                labels.null_count()
            )));
        }
        if let Some(bad) = labels.values().iter().find(|&&y| y != 0.0 && y != 1.0) {
            return Err(Error::Data(format!(
                "label column `{}` must be binary, found {bad}",
                self.label_column
            )));
        }
        Ok(())
    }

    /// Number of rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Feature column names in schema order (label excluded).
    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Name of the label column.
    #[must_use]
    pub fn label_column(&self) -> &str {
        &self.label_column
    }

    /// Whether `name` is a feature column of this dataset.
    #[must_use]
    pub fn has_feature(&self, name: &str) -> bool {
        self.feature_names.iter().any(|f| f == name)
    }

    /// Underlying record batch.
    #[must_use]
    pub const fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    fn column(&self, name: &str) -> Result<&Float64Array> {
        let idx = self
            .batch
            .schema()
            .index_of(name)
            .map_err(|_| Error::Data(format!("column `{name}` not found")))?;
        self.batch
            .column(idx)
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| Error::Data(format!("column `{name}` is not Float64")))
    }

    fn feature_columns<S: AsRef<str>>(&self, features: &[S]) -> Result<Vec<&Float64Array>> {
        features
            .iter()
            .map(|name| {
                let name = name.as_ref();
                if name == self.label_column {
                    return Err(Error::Data(format!(
                        "`{name}` is the label column, not a feature"
                    )));
                }
                self.column(name)
            })
            .collect()
    }

    /// Indices of rows with a value in every one of `features`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Data`] if a feature column does not exist.
    pub fn complete_rows<S: AsRef<str>>(&self, features: &[S]) -> Result<Vec<usize>> {
        let columns = self.feature_columns(features)?;
        Ok((0..self.num_rows())
            .into_par_iter()
            .filter(|&row| columns.iter().all(|c| c.is_valid(row)))
            .collect())
    }

    /// Fraction of rows with no missing value across `features`.
    ///
    /// An empty dataset has completeness 0.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Data`] if a feature column does not exist.
    #[allow(clippy::cast_precision_loss)]
    pub fn complete_fraction<S: AsRef<str>>(&self, features: &[S]) -> Result<f64> {
        if self.num_rows() == 0 {
            return Ok(0.0);
        }
        let columns = self.feature_columns(features)?;
        let complete = (0..self.num_rows())
            .into_par_iter()
            .filter(|&row| columns.iter().all(|c| c.is_valid(row)))
            .count();
        Ok(complete as f64 / self.num_rows() as f64)
    }

    /// Extract the given rows as a dense matrix (columns in `features` order)
    /// plus their labels.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Data`] if a column is missing, a row index is out of
    /// range, or a selected cell is null.
    pub fn matrix<S: AsRef<str>>(
        &self,
        features: &[S],
        rows: &[usize],
    ) -> Result<(Array2<f64>, Array1<f64>)> {
        let columns = self.feature_columns(features)?;
        let labels = self.column(&self.label_column)?;

        let mut x = Array2::zeros((rows.len(), columns.len()));
        let mut y = Array1::zeros(rows.len());
        for (out_row, &row) in rows.iter().enumerate() {
            if row >= self.num_rows() {
                return Err(Error::Data(format!(
                    "row {row} out of range ({} rows)",
                    self.num_rows()
                )));
            }
            for (col_idx, column) in columns.iter().enumerate() {
                if column.is_null(row) {
                    return Err(Error::Data(format!(
                        "missing value in `{}` at row {row}",
                        features[col_idx].as_ref()
                    )));
                }
                x[[out_row, col_idx]] = column.value(row);
            }
            y[out_row] = labels.value(row);
        }
        Ok((x, y))
    }

    /// Complete-case matrix over `features`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Data`] if a column is missing or no row is complete.
    pub fn complete_case<S: AsRef<str>>(
        &self,
        features: &[S],
    ) -> Result<(Array2<f64>, Array1<f64>)> {
        let rows = self.complete_rows(features)?;
        if rows.is_empty() {
            return Err(Error::Data(format!(
                "no complete rows across {} features",
                features.len()
            )));
        }
        self.matrix(features, &rows)
    }

    /// [`complete_case`](Self::complete_case) as a [`LabeledData`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Data`] if a column is missing or no row is complete.
    pub fn labeled<S: AsRef<str>>(&self, features: &[S]) -> Result<LabeledData> {
        let (x, y) = self.complete_case(features)?;
        Ok(LabeledData { x, y })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int32Array;

    fn sparse_dataset() -> Dataset {
        Dataset::from_columns(
            vec![
                ("a", vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]),
                ("b", vec![Some(1.0), None, Some(3.0), Some(4.0)]),
                ("c", vec![None, None, Some(3.0), Some(4.0)]),
            ],
            vec![0.0, 1.0, 0.0, 1.0],
        )
        .unwrap()
    }

    #[test]
    fn test_feature_names_exclude_label() {
        let ds = sparse_dataset();
        assert_eq!(ds.feature_names(), &["a", "b", "c"]);
        assert_eq!(ds.num_rows(), 4);
        assert!(ds.has_feature("b"));
        assert!(!ds.has_feature("label"));
    }

    #[test]
    fn test_complete_fraction() {
        let ds = sparse_dataset();
        assert!((ds.complete_fraction(&["a"]).unwrap() - 1.0).abs() < 1e-12);
        assert!((ds.complete_fraction(&["a", "b"]).unwrap() - 0.75).abs() < 1e-12);
        assert!((ds.complete_fraction(&["b", "c"]).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_complete_case_column_order() {
        let ds = sparse_dataset();
        let (x, y) = ds.complete_case(&["c", "a"]).unwrap();
        assert_eq!(x.shape(), &[2, 2]);
        assert!((x[[0, 0]] - 3.0).abs() < f64::EPSILON);
        assert!((x[[0, 1]] - 3.0).abs() < f64::EPSILON);
        assert_eq!(y.to_vec(), vec![0.0, 1.0]);
    }

    #[test]
    fn test_unknown_column_is_data_error() {
        let ds = sparse_dataset();
        assert!(matches!(ds.complete_fraction(&["zzz"]), Err(Error::Data(_))));
        assert!(matches!(ds.complete_rows(&["label"]), Err(Error::Data(_))));
    }

    #[test]
    fn test_labeled_balances_with_smote() {
        let ds = Dataset::from_columns(
            vec![("a", vec![Some(0.0), Some(1.0), Some(2.0), Some(3.0), Some(4.0)])],
            vec![0.0, 0.0, 0.0, 0.0, 1.0],
        )
        .unwrap();
        let data = ds.labeled(&["a"]).unwrap();
        assert_eq!(data.len(), 5);
        assert_eq!(data.num_features(), 1);

        let balanced = data.balanced(&Smote::new(0));
        let positives = balanced.y().iter().filter(|&&v| v > 0.5).count();
        assert_eq!(balanced.len(), 8);
        assert_eq!(positives, 4);
    }

    #[test]
    fn test_labeled_data_rejects_mismatch() {
        assert!(LabeledData::new(Array2::zeros((2, 1)), Array1::zeros(3)).is_err());
    }

    #[test]
    fn test_matrix_rejects_null_cell() {
        let ds = sparse_dataset();
        assert!(ds.matrix(&["c"], &[0]).is_err());
    }

    #[test]
    fn test_non_binary_labels_rejected() {
        let result = Dataset::from_columns(vec![("a", vec![Some(1.0)])], vec![2.0]);
        assert!(matches!(result, Err(Error::Data(_))));
    }

    #[test]
    fn test_label_name_collision_rejected() {
        let result = Dataset::from_columns(vec![("label", vec![Some(1.0)])], vec![1.0]);
        assert!(result.is_err());
    }

    #[test]
    fn test_integer_columns_are_cast() {
        let schema = Schema::new(vec![
            Field::new("x", DataType::Int32, true),
            Field::new("y", DataType::Int32, false),
        ]);
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(Int32Array::from(vec![Some(1), None, Some(3)])),
                Arc::new(Int32Array::from(vec![0, 1, 1])),
            ],
        )
        .unwrap();
        let ds = Dataset::new(batch, "y").unwrap();
        assert_eq!(ds.feature_names(), &["x"]);
        assert_eq!(ds.complete_rows(&["x"]).unwrap(), vec![0, 2]);
    }

    #[test]
    fn test_missing_label_column() {
        let schema = Schema::new(vec![Field::new("x", DataType::Float64, true)]);
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![Arc::new(Float64Array::from(vec![1.0]))],
        )
        .unwrap();
        assert!(Dataset::new(batch, "label").is_err());
    }
}
