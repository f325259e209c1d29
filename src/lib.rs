//! Forecast-consistency and caching core for waste-collection volume
//! forecasting.
//!
//! Per-site daily forecasts come from an external statistical generator;
//! this crate makes them usable: [`reconcile`] forces them to sum to the
//! trusted district totals, [`spikeify_weekly_values`] reshapes smooth
//! curves onto real service days without changing weekly totals,
//! [`ForecastCache`] memoizes finished forecasts on disk, and
//! [`MetricsTracker`] keeps the cross-iteration accuracy ledger.

mod error;
mod frame;

pub mod forecast_cache;
pub mod metrics;
pub mod reconcile;
pub mod rolling;
pub mod schema;
pub mod service_day;

pub use error::{ForecastError, Result};
pub use forecast_cache::{cache_key, CacheKeyParams, CacheMetadata, ForecastCache};
pub use metrics::{Improvement, MetricsTracker};
pub use reconcile::{
    reconcile, Reconciliation, ReconcileParams, ReconcileWarning, ScaleMethod, WarningReason,
    UNMAPPED_DISTRICT,
};
pub use rolling::{
    build_cache_suffix, generate_with_cache, validate_request, ForecastRequest, ForecastResult,
};
pub use service_day::{
    iter_dates, mean_weights_from_sums_and_counts, parse_grafik_weekdays, pick_top_k_weekdays,
    spikeify_weekly_values, week_groups, week_groups_split_by_month, ServiceDayPattern,
};
