//! # Survey Data Loading and Subsetting
//!
//! This module is the only entry point for user-provided survey tables. It reads a
//! delimited file with `polars`, keeps only the columns the configuration names, drops
//! every row with a missing or non-finite value in any of those columns, applies the
//! declared column transforms, and hands the rest of the crate plain `ndarray` columns.
//!
//! - Complete Cases: Rows are excluded before modeling, never imputed. The number of
//!   excluded rows is logged so the user can see how much data a predictor costs.
//! - Per-Taxon Views: `SurveyData::subset_for_taxon` materializes one taxon's rows and
//!   recomputes factor levels on that subset, so a level that never occurs for a taxon
//!   does not produce an empty dummy column.

use crate::config::{SelectionConfig, Transform};
use ndarray::{Array1, ArrayView1};
use polars::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// A comprehensive error type for all data loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),

    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },

    #[error("Column '{column}' has {found} values, but the table has {expected} rows.")]
    LengthMismatch {
        column: String,
        found: usize,
        expected: usize,
    },

    #[error("The response column '{column}' contains a negative value ({value}) at row {row}.")]
    NegativeResponse {
        column: String,
        value: f64,
        row: usize,
    },

    #[error("Cannot apply the {transform} transform to column '{column}': value {value} is out of domain.")]
    TransformDomain {
        column: String,
        transform: &'static str,
        value: f64,
    },

    #[error("No complete rows remain after excluding rows with missing values.")]
    EmptyAfterFiltering,

    #[error("Taxon '{0}' does not occur in the data.")]
    UnknownTaxon(String),

    #[error("Taxon '{taxon}' has only {found} complete rows, but at least {required} are required.")]
    InsufficientRows {
        taxon: String,
        found: usize,
        required: usize,
    },
}

/// A categorical column encoded as level indices.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorColumn {
    /// Distinct levels in natural sort order. The first level is the reference level.
    pub levels: Vec<String>,
    /// Level index of every row.
    pub codes: Vec<usize>,
}

impl FactorColumn {
    pub fn from_values<S: AsRef<str>>(values: &[S]) -> Self {
        let mut levels: Vec<String> = values
            .iter()
            .map(|v| v.as_ref().to_string())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        levels.sort_by(|a, b| natord::compare(a, b).then_with(|| a.cmp(b)));
        let index: HashMap<&str, usize> = levels
            .iter()
            .enumerate()
            .map(|(i, l)| (l.as_str(), i))
            .collect();
        let codes = values.iter().map(|v| index[v.as_ref()]).collect();
        Self { levels, codes }
    }

    /// The most frequent level; ties go to the earlier level.
    pub fn most_frequent_level(&self) -> Option<&str> {
        let mut counts = vec![0usize; self.levels.len()];
        for &c in &self.codes {
            counts[c] += 1;
        }
        let mut best: Option<(usize, usize)> = None;
        for (idx, &count) in counts.iter().enumerate() {
            if best.is_none_or(|(_, c)| count > c) {
                best = Some((idx, count));
            }
        }
        best.map(|(idx, _)| self.levels[idx].as_str())
    }
}

/// The complete-case survey table for all taxa.
#[derive(Debug, Clone)]
pub struct SurveyData {
    response: Array1<f64>,
    taxa: Vec<String>,
    numeric: BTreeMap<String, Array1<f64>>,
    categorical: BTreeMap<String, Vec<String>>,
}

impl SurveyData {
    /// Starts an in-memory table from a response vector and the taxon of every row.
    pub fn new(response: Vec<f64>, taxa: Vec<String>) -> Result<Self, DataError> {
        if taxa.len() != response.len() {
            return Err(DataError::LengthMismatch {
                column: "taxon".to_string(),
                found: taxa.len(),
                expected: response.len(),
            });
        }
        Ok(Self {
            response: Array1::from_vec(response),
            taxa,
            numeric: BTreeMap::new(),
            categorical: BTreeMap::new(),
        })
    }

    pub fn with_numeric(mut self, name: &str, values: Vec<f64>) -> Result<Self, DataError> {
        self.check_len(name, values.len())?;
        self.numeric.insert(name.to_string(), Array1::from_vec(values));
        Ok(self)
    }

    pub fn with_categorical<S: Into<String>>(
        mut self,
        name: &str,
        values: Vec<S>,
    ) -> Result<Self, DataError> {
        self.check_len(name, values.len())?;
        self.categorical
            .insert(name.to_string(), values.into_iter().map(Into::into).collect());
        Ok(self)
    }

    fn check_len(&self, name: &str, found: usize) -> Result<(), DataError> {
        if found != self.response.len() {
            return Err(DataError::LengthMismatch {
                column: name.to_string(),
                found,
                expected: self.response.len(),
            });
        }
        Ok(())
    }

    pub fn num_rows(&self) -> usize {
        self.response.len()
    }

    /// Distinct taxa in natural sort order.
    pub fn taxa(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .taxa
            .iter()
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        out.sort_by(|a, b| natord::compare(a, b));
        out
    }

    /// Adds the derived columns declared in the configuration.
    pub fn apply_transforms(&mut self, config: &SelectionConfig) -> Result<(), DataError> {
        for derived in config.derived_columns() {
            let source = self
                .numeric
                .get(&derived.source)
                .ok_or_else(|| DataError::ColumnNotFound(derived.source.clone()))?;
            let label = match derived.transform {
                Transform::Sqrt => "sqrt",
                Transform::Log1p => "log1p",
            };
            let valid = |v: f64| match derived.transform {
                Transform::Sqrt => v >= 0.0,
                Transform::Log1p => v > -1.0,
            };
            if let Some(&bad) = source.iter().find(|&&v| !valid(v)) {
                return Err(DataError::TransformDomain {
                    column: derived.source.clone(),
                    transform: label,
                    value: bad,
                });
            }
            let values = match derived.transform {
                Transform::Sqrt => source.mapv(f64::sqrt),
                Transform::Log1p => source.mapv(f64::ln_1p),
            };
            self.numeric.insert(derived.name.clone(), values);
        }
        Ok(())
    }

    /// Materializes the rows of one taxon with the columns the configuration uses.
    pub fn subset_for_taxon(
        &self,
        taxon: &str,
        config: &SelectionConfig,
    ) -> Result<TaxonData, DataError> {
        let rows: Vec<usize> = self
            .taxa
            .iter()
            .enumerate()
            .filter(|(_, t)| t.as_str() == taxon)
            .map(|(i, _)| i)
            .collect();
        if rows.is_empty() {
            return Err(DataError::UnknownTaxon(taxon.to_string()));
        }
        if rows.len() < config.min_observations {
            return Err(DataError::InsufficientRows {
                taxon: taxon.to_string(),
                found: rows.len(),
                required: config.min_observations,
            });
        }

        let response = Array1::from_iter(rows.iter().map(|&i| self.response[i]));

        let mut numeric = BTreeMap::new();
        for name in config.numeric_predictors() {
            let column = self
                .numeric
                .get(&name)
                .ok_or_else(|| DataError::ColumnNotFound(name.clone()))?;
            numeric.insert(name, Array1::from_iter(rows.iter().map(|&i| column[i])));
        }

        let mut factors = BTreeMap::new();
        for name in &config.factors {
            factors.insert(name.clone(), self.factor_for_rows(&[name.clone()], &rows)?);
        }

        let mut groupings = BTreeMap::new();
        for keys in &config.random_effects {
            groupings.insert(grouping_label(keys), self.factor_for_rows(keys, &rows)?);
        }

        Ok(TaxonData {
            taxon: taxon.to_string(),
            response,
            numeric,
            factors,
            groupings,
        })
    }

    /// Builds a factor for the given rows. Several keys produce a nested factor whose
    /// levels are the observed combinations, joined with ':'.
    fn factor_for_rows(&self, keys: &[String], rows: &[usize]) -> Result<FactorColumn, DataError> {
        let columns: Vec<&Vec<String>> = keys
            .iter()
            .map(|k| {
                self.categorical
                    .get(k)
                    .ok_or_else(|| DataError::ColumnNotFound(k.clone()))
            })
            .collect::<Result<_, _>>()?;
        let values: Vec<String> = rows
            .iter()
            .map(|&i| {
                columns
                    .iter()
                    .map(|c| c[i].as_str())
                    .collect::<Vec<_>>()
                    .join(":")
            })
            .collect();
        Ok(FactorColumn::from_values(&values))
    }
}

/// The label of a random-effect term over the given nesting keys.
pub fn grouping_label(keys: &[String]) -> String {
    keys.join(":")
}

/// One taxon's complete-case rows, ready for design-matrix construction.
#[derive(Debug, Clone)]
pub struct TaxonData {
    pub taxon: String,
    response: Array1<f64>,
    numeric: BTreeMap<String, Array1<f64>>,
    factors: BTreeMap<String, FactorColumn>,
    groupings: BTreeMap<String, FactorColumn>,
}

impl TaxonData {
    pub fn num_rows(&self) -> usize {
        self.response.len()
    }

    pub fn response(&self) -> ArrayView1<'_, f64> {
        self.response.view()
    }

    pub fn numeric(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.numeric.get(name).map(|c| c.view())
    }

    pub fn factor(&self, name: &str) -> Option<&FactorColumn> {
        self.factors.get(name)
    }

    pub fn grouping(&self, keys: &[String]) -> Option<&FactorColumn> {
        self.groupings.get(&grouping_label(keys))
    }
}

/// Loads the survey table, keeping only configured columns and complete rows.
pub fn load_survey_data(path: &Path, config: &SelectionConfig) -> Result<SurveyData, DataError> {
    let numeric_cols = config.numeric_source_columns();
    let categorical_cols = config.categorical_columns();

    let mut required: Vec<String> = vec![config.response.clone(), config.taxon_column.clone()];
    for name in numeric_cols.iter().chain(categorical_cols.iter()) {
        if !required.contains(name) {
            required.push(name.clone());
        }
    }

    log::info!("Loading survey data from '{}'", path.display());

    // Types are inferred by polars; each used column is cast individually below so a
    // bad cell is reported against its column name.
    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(Some(10_000))
                .with_parse_options(
                    CsvParseOptions::default().with_separator(config.separator as u8),
                ),
        )
        .finish()?;

    let present: HashSet<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();
    for name in &required {
        if !present.contains(name) {
            return Err(DataError::ColumnNotFound(name.clone()));
        }
    }

    let height = df.height();
    let mut keep = vec![true; height];

    let response = internal::numeric_column(&df, &config.response)?;
    internal::mark_missing(&response, &mut keep);
    let taxa = internal::text_column(&df, &config.taxon_column)?;
    internal::mark_missing(&taxa, &mut keep);

    let mut numeric = Vec::with_capacity(numeric_cols.len());
    for name in &numeric_cols {
        let values = internal::numeric_column(&df, name)?;
        internal::mark_missing(&values, &mut keep);
        numeric.push((name.clone(), values));
    }
    let mut categorical = Vec::with_capacity(categorical_cols.len());
    for name in &categorical_cols {
        let values = internal::text_column(&df, name)?;
        internal::mark_missing(&values, &mut keep);
        categorical.push((name.clone(), values));
    }

    let kept = keep.iter().filter(|&&k| k).count();
    if kept < height {
        log::info!(
            "Excluded {} of {} rows with missing or non-finite values in used columns.",
            height - kept,
            height
        );
    }
    if kept == 0 {
        return Err(DataError::EmptyAfterFiltering);
    }

    let response: Vec<f64> = internal::keep_rows(response, &keep);
    if let Some((row, &value)) = response.iter().enumerate().find(|(_, v)| **v < 0.0) {
        return Err(DataError::NegativeResponse {
            column: config.response.clone(),
            value,
            row,
        });
    }

    let mut data = SurveyData::new(response, internal::keep_rows(taxa, &keep))?;
    for (name, values) in numeric {
        data = data.with_numeric(&name, internal::keep_rows(values, &keep))?;
    }
    for (name, values) in categorical {
        data = data.with_categorical(&name, internal::keep_rows(values, &keep))?;
    }
    data.apply_transforms(config)?;

    log::info!(
        "Loaded {} complete rows across {} taxa.",
        data.num_rows(),
        data.taxa().len()
    );
    Ok(data)
}

mod internal {
    use super::*;

    pub(super) fn numeric_column(
        df: &DataFrame,
        name: &str,
    ) -> Result<Vec<Option<f64>>, DataError> {
        let column = df.column(name)?;
        let casted = column
            .cast(&DataType::Float64)
            .map_err(|_| DataError::ColumnWrongType {
                column_name: name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: format!("{:?}", column.dtype()),
            })?;
        // A strict cast turns unparseable cells into nulls; more nulls than the source
        // column had means non-numeric content.
        if casted.null_count() > column.null_count() {
            return Err(DataError::ColumnWrongType {
                column_name: name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: format!("{:?}", column.dtype()),
            });
        }
        let values = casted
            .as_materialized_series()
            .f64()?
            .into_iter()
            .map(|v| v.filter(|x| x.is_finite()))
            .collect();
        Ok(values)
    }

    pub(super) fn text_column(
        df: &DataFrame,
        name: &str,
    ) -> Result<Vec<Option<String>>, DataError> {
        let column = df.column(name)?;
        let casted = column.cast(&DataType::String)?;
        let values = casted
            .as_materialized_series()
            .str()?
            .into_iter()
            .map(|v| v.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string))
            .collect();
        Ok(values)
    }

    pub(super) fn mark_missing<T>(values: &[Option<T>], keep: &mut [bool]) {
        for (k, v) in keep.iter_mut().zip(values) {
            if v.is_none() {
                *k = false;
            }
        }
    }

    pub(super) fn keep_rows<T>(values: Vec<Option<T>>, keep: &[bool]) -> Vec<T> {
        values
            .into_iter()
            .zip(keep)
            .filter_map(|(v, &k)| if k { v } else { None })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config() -> SelectionConfig {
        SelectionConfig::from_toml_str(
            r#"
response = "Abundance"
taxon_column = "Taxa"
continuous = ["Depth", "sqrt.Relief"]
factors = ["Status"]
random_effects = [["Location", "Site"]]
min_observations = 2
[transforms]
sqrt = ["Relief"]
"#,
        )
        .unwrap()
    }

    #[test]
    fn factor_levels_follow_natural_order() {
        let factor = FactorColumn::from_values(&["S10", "S2", "S1", "S2"]);
        assert_eq!(factor.levels, vec!["S1", "S2", "S10"]);
        assert_eq!(factor.codes, vec![2, 1, 0, 1]);
        assert_eq!(factor.most_frequent_level(), Some("S2"));
    }

    #[test]
    fn loader_drops_incomplete_rows_and_applies_transforms() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Taxa,Abundance,Depth,Relief,Status,Location,Site,Unused").unwrap();
        writeln!(file, "fish,0,10.0,4.0,Fished,A,1,x").unwrap();
        writeln!(file, "fish,3,12.0,,Fished,A,2,x").unwrap();
        writeln!(file, "fish,1,14.0,9.0,No-take,B,1,").unwrap();
        writeln!(file, "crab,2,16.0,1.0,No-take,B,2,x").unwrap();
        writeln!(file, "crab,5,18.0,0.0,Fished,A,1,x").unwrap();
        file.flush().unwrap();

        let cfg = config();
        let data = load_survey_data(file.path(), &cfg).unwrap();
        // The row with a missing Relief is excluded; the missing Unused cell is not.
        assert_eq!(data.num_rows(), 4);
        assert_eq!(data.taxa(), vec!["crab".to_string(), "fish".to_string()]);

        let fish = data.subset_for_taxon("fish", &cfg).unwrap();
        assert_eq!(fish.num_rows(), 2);
        let relief = fish.numeric("sqrt.Relief").unwrap();
        assert!((relief[0] - 2.0).abs() < 1e-12);
        assert!((relief[1] - 3.0).abs() < 1e-12);

        let nested = fish
            .grouping(&["Location".to_string(), "Site".to_string()])
            .unwrap();
        assert_eq!(nested.levels, vec!["A:1", "B:1"]);
    }

    #[test]
    fn table_without_complete_rows_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Taxa,Abundance,Depth,Relief,Status,Location,Site").unwrap();
        writeln!(file, "fish,0,10.0,,Fished,A,1").unwrap();
        writeln!(file, "fish,3,,4.0,Fished,A,2").unwrap();
        writeln!(file, "crab,2,16.0,1.0,,B,2").unwrap();
        file.flush().unwrap();

        assert!(matches!(
            load_survey_data(file.path(), &config()).unwrap_err(),
            DataError::EmptyAfterFiltering
        ));
    }

    #[test]
    fn negative_response_is_reported_with_its_row() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Taxa,Abundance,Depth,Relief,Status,Location,Site").unwrap();
        writeln!(file, "fish,0,10.0,4.0,Fished,A,1").unwrap();
        writeln!(file, "fish,-2.5,12.0,1.0,Fished,A,2").unwrap();
        file.flush().unwrap();

        match load_survey_data(file.path(), &config()).unwrap_err() {
            DataError::NegativeResponse { column, value, row } => {
                assert_eq!(column, "Abundance");
                assert_eq!(value, -2.5);
                assert_eq!(row, 1);
            }
            other => panic!("Expected NegativeResponse, got {other:?}"),
        }
    }

    #[test]
    fn missing_column_is_reported_by_name() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Taxa,Abundance,Depth,Relief,Location,Site").unwrap();
        writeln!(file, "fish,0,10.0,4.0,A,1").unwrap();
        file.flush().unwrap();

        match load_survey_data(file.path(), &config()).unwrap_err() {
            DataError::ColumnNotFound(name) => assert_eq!(name, "Status"),
            other => panic!("Expected ColumnNotFound, got {other:?}"),
        }
    }

    #[test]
    fn small_taxon_is_rejected() {
        let mut cfg = config();
        cfg.min_observations = 3;
        let data = SurveyData::new(vec![1.0, 2.0], vec!["fish".into(), "fish".into()])
            .unwrap()
            .with_numeric("Depth", vec![1.0, 2.0])
            .unwrap();
        assert!(matches!(
            data.subset_for_taxon("fish", &cfg).unwrap_err(),
            DataError::InsufficientRows { found: 2, required: 3, .. }
        ));
    }
}
