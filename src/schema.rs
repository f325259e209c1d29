/// Column-name constants for forecastkit tables.
/// Single source of truth for every DataFrame exchanged with callers.

// ── Site forecast columns ───────────────────────────────────────────────────
pub mod site {
    pub const SITE_ID: &str = "site_id";
    pub const DATE: &str = "date";
    pub const PRED_VOLUME_M3: &str = "pred_volume_m3";
    pub const FILL_PCT: &str = "fill_pct";
    pub const OVERFLOW_PROB: &str = "overflow_prob";
}

// ── Site registry columns ───────────────────────────────────────────────────
pub mod registry {
    pub const SITE_ID: &str = "site_id";
    pub const DISTRICT: &str = "district";
    pub const BIN_COUNT: &str = "bin_count";
    pub const BIN_SIZE_LITERS: &str = "bin_size_liters";
}

// ── Trusted district forecast columns ───────────────────────────────────────
pub mod district {
    pub const DATE: &str = "date";
    pub const DISTRICT: &str = "district";
    pub const FORECAST_M3: &str = "forecast_m3";
}

// ── Reconciliation diagnostics columns ──────────────────────────────────────
pub mod diagnostics {
    pub const DATE: &str = "date";
    pub const DISTRICT: &str = "district";
    pub const SITES_SUM_BEFORE_M3: &str = "sites_sum_before_m3";
    pub const DISTRICT_FC_M3: &str = "district_fc_m3";
    pub const SCALE_APPLIED: &str = "scale_applied";
    pub const SITES_SUM_AFTER_M3: &str = "sites_sum_after_m3";
    pub const DELTA_PCT: &str = "delta_pct";
}

// ── Metrics history columns ─────────────────────────────────────────────────
pub mod metrics {
    pub const TIMESTAMP: &str = "timestamp";
    pub const GENERATED_AT: &str = "generated_at";
    pub const ITERATION: &str = "iteration";
    pub const ALGORITHM_PARAMS: &str = "algorithm_params";
    pub const OVERALL_WAPE: &str = "overall_wape";
    pub const TOTAL_FORECAST_M3: &str = "total_forecast_m3";
    pub const TOTAL_ACTUAL_M3: &str = "total_actual_m3";
    pub const RECORDS_EVALUATED: &str = "records_evaluated";
    pub const SITES_EVALUATED: &str = "sites_evaluated";
    pub const WITHIN_10_PCT: &str = "within_10_pct";
    pub const WITHIN_20_PCT: &str = "within_20_pct";
    pub const WITHIN_50_PCT: &str = "within_50_pct";
    pub const WORST_SITES: &str = "worst_sites";
    pub const BEST_SITES: &str = "best_sites";
    pub const NOTES: &str = "notes";
}

// ── Validation-source columns (external scoring tool contract) ──────────────
pub mod validation {
    pub const DATE_GENERATED: &str = "date_generated";
}

// ── Per-site metrics columns ────────────────────────────────────────────────
pub mod per_site {
    pub const SITE_ID: &str = "site_id";
    pub const SITE_WAPE: &str = "site_wape";
    pub const COMPLETENESS: &str = "completeness";
    pub const ITERATION: &str = "iteration";
}
