//! Hierarchical reconciliation of site forecasts against district totals.
//!
//! Site-level forecasts are produced independently and rarely sum to the
//! trusted district forecast. `reconcile` scales every site row so that its
//! (date, district) cell matches the district total, within clip bounds, and
//! reports what it did as a diagnostics table plus typed warnings. Data
//! anomalies never abort the run; errors are reserved for broken input
//! contracts (missing columns, non-castable dtypes).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use polars::prelude::*;
use tracing::{debug, warn};

use crate::error::Result;
use crate::frame::{f64_column, opt_f64_column, require_columns, str_column};
use crate::schema::{diagnostics, district, registry, site};

/// Zero threshold for volume sums.
pub(crate) const EPS: f64 = 1e-9;

/// Synthetic district for sites absent from the registry.
pub const UNMAPPED_DISTRICT: &str = "__unmapped__";

const DEFAULT_BIN_COUNT: f64 = 1.0;
const DEFAULT_BIN_SIZE_LITERS: f64 = 1100.0;
const MAX_WARNING_EXAMPLES: usize = 10;

/// How a (date, district) mismatch is turned into a per-site scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScaleMethod {
    /// Scale every site row by clip(trusted / before, clip_min, clip_max).
    #[default]
    Proportional,
    /// Leave volumes untouched; diagnostics and warnings are still produced.
    Passthrough,
}

#[derive(Debug, Clone)]
pub struct ReconcileParams {
    /// Tolerated |after − trusted| share before a warning, in percent.
    pub tolerance_pct: f64,
    pub method: ScaleMethod,
    pub clip_min: f64,
    pub clip_max: f64,
    /// Capacity assumed for sites without a registry entry, in liters.
    pub default_capacity_liters: f64,
}

impl Default for ReconcileParams {
    fn default() -> Self {
        Self {
            tolerance_pct: 0.5,
            method: ScaleMethod::Proportional,
            clip_min: 0.9,
            clip_max: 1.1,
            default_capacity_liters: 1100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningReason {
    /// Sites missing from the registry; one aggregated warning per run.
    SiteMissingDistrict,
    /// Site volumes sum to zero while the district forecast is positive:
    /// a structural data gap scaling cannot close.
    SiteSumZeroDistrictPositive,
    /// Reconciled cell still deviates from the trusted total beyond
    /// tolerance.
    DeltaAboveTolerance,
}

/// Diagnostic record accumulated during a run, never thrown.
#[derive(Debug, Clone)]
pub struct ReconcileWarning {
    pub reason: WarningReason,
    pub date: Option<String>,
    pub district: Option<String>,
    pub count: Option<usize>,
    pub examples: Vec<String>,
}

impl ReconcileWarning {
    fn for_cell(reason: WarningReason, date: &str, district: &str) -> Self {
        Self {
            reason,
            date: Some(date.to_string()),
            district: Some(district.to_string()),
            count: None,
            examples: Vec::new(),
        }
    }

    fn missing_district(count: usize, examples: Vec<String>) -> Self {
        Self {
            reason: WarningReason::SiteMissingDistrict,
            date: None,
            district: Some(UNMAPPED_DISTRICT.to_string()),
            count: Some(count),
            examples,
        }
    }
}

/// Result of one reconciliation run.
#[derive(Debug)]
pub struct Reconciliation {
    /// Scaled site forecast, same rows as the input.
    pub adjusted: DataFrame,
    /// One row per (date, district) cell, sorted.
    pub diagnostics: DataFrame,
    pub warnings: Vec<ReconcileWarning>,
}

#[derive(Debug, Clone, Copy)]
struct CellScale {
    /// None when the scale could not be computed (zero site sum against a
    /// positive district total); recorded as NaN in diagnostics, applied
    /// as 1.0.
    raw: Option<f64>,
    applied: f64,
    before: f64,
    trusted: f64,
    after: f64,
    delta_pct: f64,
}

/// Scale a site-level forecast to match trusted district totals.
///
/// Rows are grouped by (date, district); each cell's site-volume sum is
/// compared against the district forecast (missing match → 0) and the
/// resulting scale is applied to every site row in the cell. `fill_pct` is
/// recomputed from the scaled volume and the site's registry capacity,
/// never scaled independently. The district forecast itself is read-only.
pub fn reconcile(
    site_df: &DataFrame,
    registry_df: &DataFrame,
    district_df: &DataFrame,
    params: &ReconcileParams,
) -> Result<Reconciliation> {
    require_columns(
        site_df,
        &[site::SITE_ID, site::DATE, site::PRED_VOLUME_M3, site::OVERFLOW_PROB],
    )?;
    require_columns(registry_df, &[registry::SITE_ID, registry::DISTRICT])?;
    require_columns(
        district_df,
        &[district::DATE, district::DISTRICT, district::FORECAST_M3],
    )?;

    let mut warnings: Vec<ReconcileWarning> = Vec::new();

    // Registry: site → (district, capacity in liters).
    let reg_sites = str_column(registry_df, registry::SITE_ID)?;
    let reg_districts = str_column(registry_df, registry::DISTRICT)?;
    let reg_bin_count = opt_f64_column(registry_df, registry::BIN_COUNT)?;
    let reg_bin_size = opt_f64_column(registry_df, registry::BIN_SIZE_LITERS)?;

    let mut site_info: HashMap<String, (String, f64)> = HashMap::new();
    for i in 0..registry_df.height() {
        let Some(site_id) = reg_sites.get(i) else {
            continue;
        };
        let district = reg_districts.get(i).unwrap_or("").to_string();
        let bin_count = reg_bin_count
            .as_ref()
            .and_then(|c| c.get(i))
            .unwrap_or(DEFAULT_BIN_COUNT)
            .max(1.0);
        let bin_size = reg_bin_size
            .as_ref()
            .and_then(|c| c.get(i))
            .filter(|v| *v > 0.0)
            .unwrap_or(DEFAULT_BIN_SIZE_LITERS);
        site_info.insert(site_id.to_string(), (district, bin_count * bin_size));
    }

    // Site rows.
    let site_ids = str_column(site_df, site::SITE_ID)?;
    let dates = str_column(site_df, site::DATE)?;
    let volumes = f64_column(site_df, site::PRED_VOLUME_M3)?;
    let overflow = f64_column(site_df, site::OVERFLOW_PROB)?;
    let n_rows = site_df.height();

    let mut row_districts: Vec<String> = Vec::with_capacity(n_rows);
    let mut unmapped: BTreeSet<String> = BTreeSet::new();
    for i in 0..n_rows {
        let site_id = site_ids.get(i).unwrap_or("");
        match site_info.get(site_id) {
            Some((district, _)) => row_districts.push(district.clone()),
            None => {
                unmapped.insert(site_id.to_string());
                row_districts.push(UNMAPPED_DISTRICT.to_string());
            }
        }
    }
    if !unmapped.is_empty() {
        let examples: Vec<String> = unmapped
            .iter()
            .take(MAX_WARNING_EXAMPLES)
            .cloned()
            .collect();
        warnings.push(ReconcileWarning::missing_district(unmapped.len(), examples));
    }

    // One-pass aggregate: (date, district) → site volume sum.
    let mut cell_sums: BTreeMap<(String, String), f64> = BTreeMap::new();
    for i in 0..n_rows {
        let key = (
            dates.get(i).unwrap_or("").to_string(),
            row_districts[i].clone(),
        );
        *cell_sums.entry(key).or_insert(0.0) += volumes.get(i).unwrap_or(0.0);
    }

    // Trusted district totals.
    let fc_dates = str_column(district_df, district::DATE)?;
    let fc_districts = str_column(district_df, district::DISTRICT)?;
    let fc_values = f64_column(district_df, district::FORECAST_M3)?;
    let mut trusted_map: HashMap<(String, String), f64> = HashMap::new();
    for i in 0..district_df.height() {
        let key = (
            fc_dates.get(i).unwrap_or("").to_string(),
            fc_districts.get(i).unwrap_or("").to_string(),
        );
        trusted_map.insert(key, fc_values.get(i).unwrap_or(0.0));
    }

    // Per-cell scales, in sorted cell order for deterministic output.
    let tolerance = params.tolerance_pct / 100.0;
    let mut cells: BTreeMap<(String, String), CellScale> = BTreeMap::new();
    for (key, &before) in &cell_sums {
        let trusted = trusted_map.get(key).copied().unwrap_or(0.0);

        let (raw, applied) = if before.abs() <= EPS && trusted.abs() <= EPS {
            (Some(1.0), 1.0)
        } else if before.abs() <= EPS {
            warnings.push(ReconcileWarning::for_cell(
                WarningReason::SiteSumZeroDistrictPositive,
                &key.0,
                &key.1,
            ));
            (None, 1.0)
        } else {
            let raw = trusted / before;
            let applied = match params.method {
                ScaleMethod::Proportional => raw.clamp(params.clip_min, params.clip_max),
                ScaleMethod::Passthrough => 1.0,
            };
            (Some(raw), applied)
        };

        let after = before * applied;
        let delta_pct = (after - trusted).abs() / trusted.max(after).max(1.0);
        if delta_pct > tolerance {
            warnings.push(ReconcileWarning::for_cell(
                WarningReason::DeltaAboveTolerance,
                &key.0,
                &key.1,
            ));
        }

        cells.insert(
            key.clone(),
            CellScale {
                raw,
                applied,
                before,
                trusted,
                after,
                delta_pct,
            },
        );
    }

    // Apply scales to site rows and recompute fill_pct from capacity.
    let mut out_volumes: Vec<f64> = Vec::with_capacity(n_rows);
    let mut out_fill: Vec<f64> = Vec::with_capacity(n_rows);
    let mut out_sites: Vec<String> = Vec::with_capacity(n_rows);
    let mut out_dates: Vec<String> = Vec::with_capacity(n_rows);
    let mut out_overflow: Vec<f64> = Vec::with_capacity(n_rows);
    for i in 0..n_rows {
        let site_id = site_ids.get(i).unwrap_or("");
        let date = dates.get(i).unwrap_or("");
        let key = (date.to_string(), row_districts[i].clone());
        // Cells absent from the aggregate pass keep their volume unchanged.
        let scale = cells.get(&key).map(|c| c.applied).unwrap_or(1.0);

        let volume = volumes.get(i).unwrap_or(0.0) * scale;
        let capacity = site_info
            .get(site_id)
            .map(|(_, cap)| *cap)
            .unwrap_or(params.default_capacity_liters);
        let fill = (volume / (capacity / 1000.0)).clamp(0.0, 1.0);

        out_sites.push(site_id.to_string());
        out_dates.push(date.to_string());
        out_volumes.push(volume);
        out_fill.push(fill);
        out_overflow.push(overflow.get(i).unwrap_or(0.0));
    }

    let adjusted = DataFrame::new(vec![
        Column::new(site::SITE_ID.into(), &out_sites),
        Column::new(site::DATE.into(), &out_dates),
        Column::new(site::FILL_PCT.into(), &out_fill),
        Column::new(site::PRED_VOLUME_M3.into(), &out_volumes),
        Column::new(site::OVERFLOW_PROB.into(), &out_overflow),
    ])?;

    let mut diag_dates: Vec<String> = Vec::with_capacity(cells.len());
    let mut diag_districts: Vec<String> = Vec::with_capacity(cells.len());
    let mut diag_before: Vec<f64> = Vec::with_capacity(cells.len());
    let mut diag_trusted: Vec<f64> = Vec::with_capacity(cells.len());
    let mut diag_scale: Vec<f64> = Vec::with_capacity(cells.len());
    let mut diag_after: Vec<f64> = Vec::with_capacity(cells.len());
    let mut diag_delta: Vec<f64> = Vec::with_capacity(cells.len());
    for ((date, district), cell) in &cells {
        diag_dates.push(date.clone());
        diag_districts.push(district.clone());
        diag_before.push(cell.before);
        diag_trusted.push(cell.trusted);
        diag_scale.push(match cell.raw {
            Some(_) => cell.applied,
            None => f64::NAN,
        });
        diag_after.push(cell.after);
        diag_delta.push(cell.delta_pct);
    }
    let diagnostics_df = DataFrame::new(vec![
        Column::new(diagnostics::DATE.into(), &diag_dates),
        Column::new(diagnostics::DISTRICT.into(), &diag_districts),
        Column::new(diagnostics::SITES_SUM_BEFORE_M3.into(), &diag_before),
        Column::new(diagnostics::DISTRICT_FC_M3.into(), &diag_trusted),
        Column::new(diagnostics::SCALE_APPLIED.into(), &diag_scale),
        Column::new(diagnostics::SITES_SUM_AFTER_M3.into(), &diag_after),
        Column::new(diagnostics::DELTA_PCT.into(), &diag_delta),
    ])?;

    debug!(
        cells = cells.len(),
        rows = n_rows,
        "reconciled site forecast against district totals"
    );
    if !warnings.is_empty() {
        warn!(count = warnings.len(), "reconciliation produced warnings");
    }

    Ok(Reconciliation {
        adjusted,
        diagnostics: diagnostics_df,
        warnings,
    })
}
