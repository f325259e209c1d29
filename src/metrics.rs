//! Cross-iteration accuracy ledger.
//!
//! Validation runs are scored by an external tool that emits a single-row
//! metrics CSV; each ingestion appends one normalized record to an
//! append-only history used to judge whether the forecast is improving
//! between iterations. Unlike reconciliation, ingestion is strict: a
//! malformed file is a hard error, because a silently corrupted ledger
//! would mislead the humans reading it.

use std::fs;
use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::Utc;
use polars::prelude::*;
use tracing::info;

use crate::error::{ForecastError, Result};
use crate::frame::{f64_column, opt_f64_column, require_columns, str_column};
use crate::schema::{metrics, per_site, validation};

const HISTORY_FILE: &str = "metrics_history.parquet";
const PER_SITE_FILE: &str = "per_site_metrics.parquet";

/// First-to-last improvement across the ingested history.
#[derive(Debug, Clone, PartialEq)]
pub struct Improvement {
    pub first_wape: f64,
    pub latest_wape: f64,
    /// Relative WAPE improvement, in percent of the first value.
    pub wape_improvement_pct: f64,
    /// Absolute change of the within-20% share, in percentage points.
    pub within_20_delta: f64,
    pub latest_records_evaluated: i64,
    pub iterations: usize,
}

/// Append-only metrics history plus the latest per-site snapshot, persisted
/// as two parquet files that are loaded eagerly and rewritten wholesale on
/// every mutation.
pub struct MetricsTracker {
    history_path: PathBuf,
    per_site_path: PathBuf,
    history: DataFrame,
    per_site: DataFrame,
}

impl MetricsTracker {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let history_path = dir.join(HISTORY_FILE);
        let per_site_path = dir.join(PER_SITE_FILE);

        let history = if history_path.exists() {
            ParquetReader::new(File::open(&history_path)?).finish()?
        } else {
            empty_history_frame()?
        };
        let per_site = if per_site_path.exists() {
            ParquetReader::new(File::open(&per_site_path)?).finish()?
        } else {
            empty_per_site_frame()?
        };

        Ok(Self {
            history_path,
            per_site_path,
            history,
            per_site,
        })
    }

    /// Append one externally-scored validation run to the history.
    ///
    /// The source CSV must contain exactly one data row; anything else is a
    /// hard error and nothing is appended. Missing numeric columns default
    /// to 0.
    pub fn ingest_validation_csv(
        &mut self,
        metrics_csv: &Path,
        iteration: i64,
        algorithm_params: Option<&str>,
        notes: &str,
    ) -> Result<()> {
        let df = read_csv(metrics_csv)?;
        if df.height() != 1 {
            return Err(ForecastError::Validation(format!(
                "metrics CSV must contain exactly one row, got {}",
                df.height()
            )));
        }

        let num = |name: &str| f64_cell(&df, name).unwrap_or(0.0);
        let text = |name: &str| str_cell(&df, name).unwrap_or_default();

        let record = DataFrame::new(vec![
            Column::new(metrics::TIMESTAMP.into(), &[Utc::now().to_rfc3339()]),
            Column::new(
                metrics::GENERATED_AT.into(),
                &[text(validation::DATE_GENERATED)],
            ),
            Column::new(metrics::ITERATION.into(), &[iteration]),
            Column::new(
                metrics::ALGORITHM_PARAMS.into(),
                &[algorithm_params.unwrap_or("").to_string()],
            ),
            Column::new(metrics::OVERALL_WAPE.into(), &[num(metrics::OVERALL_WAPE)]),
            Column::new(
                metrics::TOTAL_FORECAST_M3.into(),
                &[num(metrics::TOTAL_FORECAST_M3)],
            ),
            Column::new(
                metrics::TOTAL_ACTUAL_M3.into(),
                &[num(metrics::TOTAL_ACTUAL_M3)],
            ),
            Column::new(
                metrics::RECORDS_EVALUATED.into(),
                &[num(metrics::RECORDS_EVALUATED) as i64],
            ),
            Column::new(
                metrics::SITES_EVALUATED.into(),
                &[num(metrics::SITES_EVALUATED) as i64],
            ),
            Column::new(
                metrics::WITHIN_10_PCT.into(),
                &[num(metrics::WITHIN_10_PCT)],
            ),
            Column::new(
                metrics::WITHIN_20_PCT.into(),
                &[num(metrics::WITHIN_20_PCT)],
            ),
            Column::new(
                metrics::WITHIN_50_PCT.into(),
                &[num(metrics::WITHIN_50_PCT)],
            ),
            Column::new(metrics::WORST_SITES.into(), &[text(metrics::WORST_SITES)]),
            Column::new(metrics::BEST_SITES.into(), &[text(metrics::BEST_SITES)]),
            Column::new(metrics::NOTES.into(), &[notes.to_string()]),
        ])?;

        self.history = self.history.vstack(&record)?;
        self.persist(&self.history_path, &self.history)?;
        info!(iteration, rows = self.history.height(), "ingested validation metrics");
        Ok(())
    }

    /// Replace the per-site snapshot with the given CSV. Only the latest
    /// snapshot is kept; trend analysis uses the summary history.
    pub fn ingest_per_site_csv(
        &mut self,
        per_site_csv: &Path,
        iteration: Option<i64>,
    ) -> Result<()> {
        let df = read_csv(per_site_csv)?;
        require_columns(&df, &[per_site::SITE_ID, per_site::SITE_WAPE])?;

        let n = df.height();
        let site_ids = str_column(&df, per_site::SITE_ID)?;
        let wapes = f64_column(&df, per_site::SITE_WAPE)?;
        let completeness = opt_f64_column(&df, per_site::COMPLETENESS)?;

        let ids: Vec<String> = (0..n)
            .map(|i| site_ids.get(i).unwrap_or("").to_string())
            .collect();
        let wape_values: Vec<f64> = (0..n).map(|i| wapes.get(i).unwrap_or(0.0)).collect();
        let completeness_values: Vec<f64> = (0..n)
            .map(|i| {
                completeness
                    .as_ref()
                    .and_then(|c| c.get(i))
                    .unwrap_or(0.0)
            })
            .collect();
        let iterations: Vec<i64> = vec![iteration.unwrap_or(0); n];

        self.per_site = DataFrame::new(vec![
            Column::new(per_site::SITE_ID.into(), &ids),
            Column::new(per_site::SITE_WAPE.into(), &wape_values),
            Column::new(per_site::COMPLETENESS.into(), &completeness_values),
            Column::new(per_site::ITERATION.into(), &iterations),
        ])?;
        self.persist(&self.per_site_path, &self.per_site)?;
        info!(sites = n, "replaced per-site metrics snapshot");
        Ok(())
    }

    /// Full chronological history, in append order.
    pub fn get_history(&self) -> &DataFrame {
        &self.history
    }

    /// First-vs-last improvement, or None below two ingested iterations.
    pub fn get_improvement(&self) -> Option<Improvement> {
        let n = self.history.height();
        if n < 2 {
            return None;
        }
        let wape = self.history.column(metrics::OVERALL_WAPE).ok()?.f64().ok()?.clone();
        let within_20 = self
            .history
            .column(metrics::WITHIN_20_PCT)
            .ok()?
            .f64()
            .ok()?
            .clone();
        let records = self
            .history
            .column(metrics::RECORDS_EVALUATED)
            .ok()?
            .i64()
            .ok()?
            .clone();

        let first_wape = wape.get(0).unwrap_or(0.0);
        let latest_wape = wape.get(n - 1).unwrap_or(0.0);
        let wape_improvement_pct = if first_wape > 0.0 {
            (first_wape - latest_wape) / first_wape * 100.0
        } else {
            0.0
        };

        Some(Improvement {
            first_wape,
            latest_wape,
            wape_improvement_pct,
            within_20_delta: within_20.get(n - 1).unwrap_or(0.0)
                - within_20.get(0).unwrap_or(0.0),
            latest_records_evaluated: records.get(n - 1).unwrap_or(0),
            iterations: n,
        })
    }

    /// Human-readable rendering of [`get_improvement`].
    pub fn get_summary(&self) -> String {
        match self.get_improvement() {
            None => "Need at least 2 ingested iterations to measure improvement.".to_string(),
            Some(imp) => format!(
                "WAPE {:.4} -> {:.4} over {} iterations ({:+.1}% improvement); \
                 within-20% share {:+.1} pp; latest run evaluated {} records.",
                imp.first_wape,
                imp.latest_wape,
                imp.iterations,
                imp.wape_improvement_pct,
                imp.within_20_delta,
                imp.latest_records_evaluated,
            ),
        }
    }

    /// Latest per-site metrics: an explicit CSV path wins, then the
    /// persisted snapshot, then an empty typed frame.
    pub fn get_latest_site_metrics(&self, path: Option<&Path>) -> Result<DataFrame> {
        if let Some(path) = path {
            return read_csv(path);
        }
        if self.per_site.height() > 0 {
            return Ok(self.per_site.clone());
        }
        empty_per_site_frame()
    }

    fn persist(&self, path: &Path, df: &DataFrame) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut df = df.clone();
        ParquetWriter::new(File::create(path)?).finish(&mut df)?;
        Ok(())
    }
}

fn read_csv(path: &Path) -> Result<DataFrame> {
    Ok(CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?)
}

fn f64_cell(df: &DataFrame, name: &str) -> Option<f64> {
    df.column(name)
        .ok()?
        .cast(&DataType::Float64)
        .ok()?
        .f64()
        .ok()?
        .get(0)
}

fn str_cell(df: &DataFrame, name: &str) -> Option<String> {
    df.column(name)
        .ok()?
        .cast(&DataType::String)
        .ok()?
        .str()
        .ok()?
        .get(0)
        .map(|s| s.to_string())
}

fn empty_history_frame() -> Result<DataFrame> {
    Ok(DataFrame::new(vec![
        Series::new_empty(metrics::TIMESTAMP.into(), &DataType::String).into(),
        Series::new_empty(metrics::GENERATED_AT.into(), &DataType::String).into(),
        Series::new_empty(metrics::ITERATION.into(), &DataType::Int64).into(),
        Series::new_empty(metrics::ALGORITHM_PARAMS.into(), &DataType::String).into(),
        Series::new_empty(metrics::OVERALL_WAPE.into(), &DataType::Float64).into(),
        Series::new_empty(metrics::TOTAL_FORECAST_M3.into(), &DataType::Float64).into(),
        Series::new_empty(metrics::TOTAL_ACTUAL_M3.into(), &DataType::Float64).into(),
        Series::new_empty(metrics::RECORDS_EVALUATED.into(), &DataType::Int64).into(),
        Series::new_empty(metrics::SITES_EVALUATED.into(), &DataType::Int64).into(),
        Series::new_empty(metrics::WITHIN_10_PCT.into(), &DataType::Float64).into(),
        Series::new_empty(metrics::WITHIN_20_PCT.into(), &DataType::Float64).into(),
        Series::new_empty(metrics::WITHIN_50_PCT.into(), &DataType::Float64).into(),
        Series::new_empty(metrics::WORST_SITES.into(), &DataType::String).into(),
        Series::new_empty(metrics::BEST_SITES.into(), &DataType::String).into(),
        Series::new_empty(metrics::NOTES.into(), &DataType::String).into(),
    ])?)
}

fn empty_per_site_frame() -> Result<DataFrame> {
    Ok(DataFrame::new(vec![
        Series::new_empty(per_site::SITE_ID.into(), &DataType::String).into(),
        Series::new_empty(per_site::SITE_WAPE.into(), &DataType::Float64).into(),
        Series::new_empty(per_site::COMPLETENESS.into(), &DataType::Float64).into(),
        Series::new_empty(per_site::ITERATION.into(), &DataType::Int64).into(),
    ])?)
}
