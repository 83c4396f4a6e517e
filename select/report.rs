//! Delimited-text outputs of a selection run.

use crate::correlation::CorrelationMatrix;
use crate::estimate::FailedModel;
use crate::predict::PartialEffectRow;
use crate::rank::{RankingRow, RankingTable};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("I/O error writing '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error writing '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// File-name-safe form of a taxon name.
pub fn sanitize_taxon(taxon: &str) -> String {
    taxon
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Assigns each taxon a distinct file stem. Taxa whose sanitized names coincide get
/// an underscore plus a counter (2, 3, ...) appended, in iteration order.
pub fn file_stems<'a>(taxa: impl IntoIterator<Item = &'a str>) -> BTreeMap<String, String> {
    let mut used: HashSet<String> = HashSet::new();
    let mut stems = BTreeMap::new();
    for taxon in taxa {
        let base = sanitize_taxon(taxon);
        let mut stem = base.clone();
        let mut n = 1;
        while used.contains(&stem) {
            n += 1;
            stem = format!("{base}_{n}");
        }
        if n > 1 {
            log::warn!(
                "Taxon '{taxon}' shares its file name with another taxon; writing it as '{stem}'."
            );
        }
        used.insert(stem.clone());
        stems.insert(taxon.to_string(), stem);
    }
    stems
}

pub fn taxon_file(out_dir: &Path, stem: &str, suffix: &str) -> PathBuf {
    out_dir.join(format!("{stem}_{suffix}.csv"))
}

pub fn ensure_dir(out_dir: &Path) -> Result<(), ReportError> {
    fs::create_dir_all(out_dir).map_err(|source| ReportError::Io {
        path: out_dir.to_path_buf(),
        source,
    })
}

fn writer(path: &Path) -> Result<csv::Writer<fs::File>, ReportError> {
    csv::Writer::from_path(path).map_err(|source| ReportError::Csv {
        path: path.to_path_buf(),
        source,
    })
}

fn write_rows<T: Serialize>(path: &Path, rows: &[T], header: &[&str]) -> Result<(), ReportError> {
    let csv_err = |source| ReportError::Csv {
        path: path.to_path_buf(),
        source,
    };
    // serde only emits a header with the first record.
    let mut w = if rows.is_empty() {
        let mut w = writer(path)?;
        w.write_record(header).map_err(csv_err)?;
        w
    } else {
        writer(path)?
    };
    for row in rows {
        w.serialize(row).map_err(csv_err)?;
    }
    w.flush().map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })
}

const RANKING_HEADER: &[&str] = &[
    "modname",
    "predictors",
    "AICc",
    "delta.AICc",
    "wi.AICc",
    "cumulative.wi.AICc",
    "BIC",
    "delta.BIC",
    "wi.BIC",
    "r2",
    "edf",
    "log_lik",
    "tweedie_power",
];

pub fn write_ranking(path: &Path, table: &RankingTable) -> Result<(), ReportError> {
    write_rows(path, table.rows(), RANKING_HEADER)
}

#[derive(Serialize)]
struct FailedRecord<'a> {
    modname: &'a str,
    predictors: String,
    reason: &'a str,
}

pub fn write_failures(path: &Path, failures: &[FailedModel]) -> Result<(), ReportError> {
    let records: Vec<FailedRecord> = failures
        .iter()
        .map(|f| FailedRecord {
            modname: &f.name,
            predictors: f.predictors.join(" "),
            reason: &f.reason,
        })
        .collect();
    write_rows(path, &records, &["modname", "predictors", "reason"])
}

pub fn write_correlations(path: &Path, matrix: &CorrelationMatrix) -> Result<(), ReportError> {
    let csv_err = |source| ReportError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut w = writer(path)?;
    let mut header = vec![String::new()];
    header.extend(matrix.names().iter().cloned());
    w.write_record(&header).map_err(csv_err)?;
    for (i, name) in matrix.names().iter().enumerate() {
        let mut record = vec![name.clone()];
        record.extend(matrix.values().row(i).iter().map(|v| v.to_string()));
        w.write_record(&record).map_err(csv_err)?;
    }
    w.flush().map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn write_partial_effects(path: &Path, rows: &[PartialEffectRow]) -> Result<(), ReportError> {
    write_rows(path, rows, &["predictor", "value", "fit", "se", "models"])
}

/// Taxa as rows, predictors as columns.
pub fn write_importance(
    path: &Path,
    predictors: &[String],
    rows: &BTreeMap<String, BTreeMap<String, f64>>,
) -> Result<(), ReportError> {
    let csv_err = |source| ReportError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut w = writer(path)?;
    let mut header = vec!["taxon".to_string()];
    header.extend(predictors.iter().cloned());
    w.write_record(&header).map_err(csv_err)?;
    for (taxon, values) in rows {
        let mut record = vec![taxon.clone()];
        record.extend(
            predictors
                .iter()
                .map(|p| values.get(p).copied().unwrap_or(0.0).to_string()),
        );
        w.write_record(&record).map_err(csv_err)?;
    }
    w.flush().map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// The parsimonious set of every taxon in one table.
pub fn write_best_models(
    path: &Path,
    best: &BTreeMap<String, Vec<RankingRow>>,
) -> Result<(), ReportError> {
    let csv_err = |source| ReportError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut w = writer(path)?;
    let mut header = vec!["taxon"];
    header.extend_from_slice(RANKING_HEADER);
    w.write_record(&header).map_err(csv_err)?;
    for (taxon, rows) in best {
        for row in rows {
            let mut record = vec![taxon.clone(), row.modname.clone(), row.predictors.clone()];
            record.extend(
                [
                    row.aicc,
                    row.delta_aicc,
                    row.wi_aicc,
                    row.cumulative_wi_aicc,
                    row.bic,
                    row.delta_bic,
                    row.wi_bic,
                    row.r2,
                    row.edf,
                    row.log_lik,
                    row.tweedie_power,
                ]
                .iter()
                .map(|v| v.to_string()),
            );
            w.write_record(&record).map_err(csv_err)?;
        }
    }
    w.flush().map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rank::ModelScore;
    use tempfile::tempdir;

    #[test]
    fn taxon_names_are_file_safe() {
        assert_eq!(sanitize_taxon("Pagrus auratus"), "Pagrus_auratus");
        assert_eq!(sanitize_taxon("sp./1"), "sp__1");
        assert_eq!(
            taxon_file(Path::new("out"), &sanitize_taxon("a b"), "all_mod_fits"),
            Path::new("out").join("a_b_all_mod_fits.csv")
        );
    }

    #[test]
    fn taxa_with_the_same_sanitized_name_get_distinct_stems() {
        let stems = file_stems(["Pagrus auratus", "Pagrus_auratus", "Pagrus_auratus_2", "crab"]);
        assert_eq!(stems["Pagrus auratus"], "Pagrus_auratus");
        assert_eq!(stems["Pagrus_auratus"], "Pagrus_auratus_2");
        assert_eq!(stems["Pagrus_auratus_2"], "Pagrus_auratus_2_2");
        assert_eq!(stems["crab"], "crab");
        let distinct: HashSet<&String> = stems.values().collect();
        assert_eq!(distinct.len(), stems.len());
    }

    #[test]
    fn ranking_table_round_trips_through_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fits.csv");
        let table = RankingTable::from_scores(vec![ModelScore {
            name: "depth".into(),
            index: 1,
            predictors: vec!["depth".into()],
            aicc: 10.0,
            bic: 11.0,
            log_likelihood: -3.0,
            r_squared: 0.4,
            edf: 2.5,
            tweedie_power: 1.5,
        }]);
        write_ranking(&path, &table).unwrap();
        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, RANKING_HEADER);
        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(&records[0][0], "depth");
        let weight: f64 = records[0][4].parse().unwrap();
        assert_eq!(weight, 1.0);
    }

    #[test]
    fn empty_tables_still_have_headers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("failed.csv");
        write_failures(&path, &[]).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim(), "modname,predictors,reason");
    }

    #[test]
    fn importance_matrix_fills_missing_with_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("imp.csv");
        let mut rows = BTreeMap::new();
        rows.insert(
            "snapper".to_string(),
            BTreeMap::from([("depth".to_string(), 0.75)]),
        );
        write_importance(&path, &["depth".into(), "slope".into()], &rows).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["taxon,depth,slope", "snapper,0.75,0"]);
    }
}
