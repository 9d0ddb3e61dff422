use anyhow::{Context, Result};
use ndarray::{Array1, Array2};
use polars::prelude::*;
use std::collections::BTreeSet;
use std::fs::File;
use std::path::Path;

use super::extract::{RepoFeatures, LOG_COLUMNS, NUMERIC_COLUMNS};

/// Identifier column; every other column holds f64 features.
pub const NAME_COLUMN: &str = "full_name";

/// Feature table: one row per repository, stored as a polars `DataFrame`
/// and persisted as Parquet.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    frame: DataFrame,
}

impl FeatureTable {
    /// Lay out extracted rows as columns: numeric columns, their `log1p_`
    /// companions, then one-hot `lang_<Language>` columns in name order.
    pub fn from_rows(rows: &[RepoFeatures]) -> Result<Self> {
        let mut columns = Vec::new();

        for name in NUMERIC_COLUMNS {
            let values = rows.iter().map(|r| r.column(name).unwrap_or(0.0)).collect();
            columns.push((name.to_string(), values));
        }

        for base in LOG_COLUMNS {
            let name = format!("log1p_{base}");
            let values = rows.iter().map(|r| r.column(&name).unwrap_or(0.0)).collect();
            columns.push((name, values));
        }

        let languages: BTreeSet<&str> = rows.iter().map(|r| r.language.as_str()).collect();
        for lang in languages {
            let values = rows
                .iter()
                .map(|r| if r.language == lang { 1.0 } else { 0.0 })
                .collect();
            columns.push((format!("lang_{lang}"), values));
        }

        let full_names: Vec<String> = rows.iter().map(|r| r.full_name.clone()).collect();
        Self::from_columns(&full_names, columns)
    }

    /// Assemble a table from repository names and named feature columns.
    pub fn from_columns(full_names: &[String], columns: Vec<(String, Vec<f64>)>) -> Result<Self> {
        let mut series = vec![Series::new(NAME_COLUMN, full_names)];
        series.extend(
            columns
                .into_iter()
                .map(|(name, values)| Series::new(&name, values)),
        );
        let frame = DataFrame::new(series)
            .context("Every feature column needs exactly one value per repository")?;
        Ok(Self { frame })
    }

    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    pub fn full_names(&self) -> Vec<String> {
        self.frame
            .column(NAME_COLUMN)
            .and_then(|s| s.str())
            .map(|names| {
                names
                    .into_iter()
                    .map(|n| n.unwrap_or_default().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Values of a feature column. Nulls read back as NaN.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let values = self.frame.column(name).ok()?.f64().ok()?;
        Some(values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }

    /// Feature column names, in table order.
    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .into_iter()
            .filter(|name| *name != NAME_COLUMN)
            .map(|name| name.to_string())
            .collect()
    }

    /// Row-major matrix of the requested columns, in the requested order.
    pub fn select(&self, names: &[&str]) -> Result<Array2<f64>> {
        let mut matrix = Array2::zeros((self.len(), names.len()));
        for (j, name) in names.iter().enumerate() {
            let values = self
                .column(name)
                .with_context(|| format!("Feature table has no column {name:?}"))?;
            matrix.column_mut(j).assign(&Array1::from(values));
        }
        Ok(matrix)
    }

    /// Write the whole table, replacing any previous file (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let tmp_path = path.with_extension("parquet.tmp");
        let mut file = File::create(&tmp_path)
            .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
        ParquetWriter::new(&mut file)
            .finish(&mut self.frame.clone())
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to read feature table {}", path.display()))?;
        let frame = ParquetReader::new(file)
            .finish()
            .with_context(|| format!("Failed to parse feature table {}", path.display()))?;

        frame
            .column(NAME_COLUMN)
            .and_then(|s| s.str())
            .with_context(|| format!("Feature table {} has no {NAME_COLUMN:?} column", path.display()))?;
        if let Some(bad) = frame
            .get_columns()
            .iter()
            .find(|s| s.name() != NAME_COLUMN && s.dtype() != &DataType::Float64)
        {
            anyhow::bail!("Column {} is {}, expected f64", bad.name(), bad.dtype());
        }
        Ok(Self { frame })
    }
}
