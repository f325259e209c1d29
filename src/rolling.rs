//! Rolling-cutoff forecast request/result types and the cache front.
//!
//! The statistical forecaster itself lives outside this crate; what lives
//! here is the call shape the cache fronts: a (cutoff, horizon) request, a
//! result carrying the forecast table, and the tuning-derived cache suffix
//! that keeps differently-filtered requests from colliding.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, NaiveDate, Utc};
use polars::prelude::*;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{ForecastError, Result};
use crate::forecast_cache::{CacheKeyParams, ForecastCache};
use crate::schema::site;

/// Forecast request: the window is `[cutoff + 1, cutoff + horizon]`.
#[derive(Debug, Clone)]
pub struct ForecastRequest {
    pub cutoff_date: NaiveDate,
    pub horizon_days: u32,
    pub site_ids: Option<Vec<String>>,
}

impl ForecastRequest {
    pub fn start_date(&self) -> NaiveDate {
        self.cutoff_date + Duration::days(1)
    }

    pub fn end_date(&self) -> NaiveDate {
        self.cutoff_date + Duration::days(self.horizon_days as i64)
    }
}

/// Forecast output as produced by the external generator or the cache.
#[derive(Debug)]
pub struct ForecastResult {
    pub cutoff_date: NaiveDate,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub site_count: usize,
    pub forecast_df: DataFrame,
    pub generated_at: String,
    pub cached: bool,
}

pub fn validate_request(request: &ForecastRequest) -> Result<()> {
    if !(1..=365).contains(&request.horizon_days) {
        return Err(ForecastError::Validation(
            "horizon_days must be 1-365".to_string(),
        ));
    }
    Ok(())
}

/// Digest of the result-affecting request filters, for the cache key.
///
/// Filters are normalized (sites deduplicated and sorted, text trimmed and
/// lowercased) and serialized as canonical JSON before hashing, so equal
/// filter sets always map to the same suffix. Returns None when no filter
/// is active.
pub fn build_cache_suffix(
    site_ids: Option<&[String]>,
    district_filter: Option<&str>,
    search_term: Option<&str>,
) -> Option<String> {
    let mut filters: BTreeMap<&str, serde_json::Value> = BTreeMap::new();

    if let Some(ids) = site_ids {
        if !ids.is_empty() {
            let sorted: Vec<String> = ids
                .iter()
                .map(|s| s.to_string())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            filters.insert("site_ids", serde_json::json!(sorted));
        }
    }
    if let Some(district) = district_filter {
        let value = district.trim().to_lowercase();
        if !value.is_empty() {
            filters.insert("district", serde_json::json!(value));
        }
    }
    if let Some(search) = search_term {
        let value = search.trim().to_lowercase();
        if !value.is_empty() {
            filters.insert("search", serde_json::json!(value));
        }
    }

    if filters.is_empty() {
        return None;
    }

    let payload = serde_json::to_string(&filters).expect("filter map serializes");
    let digest = Sha256::digest(payload.as_bytes());
    let hex: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();
    Some(format!("f{hex}"))
}

/// Serve a forecast from the cache, or compute and cache it.
///
/// `compute` runs the external forecaster pipeline on a miss; its non-empty
/// result is saved before returning. A hit is returned as-is with
/// `cached: true`.
pub fn generate_with_cache<F>(
    cache: &ForecastCache,
    request: &ForecastRequest,
    params: &CacheKeyParams,
    compute: F,
) -> Result<ForecastResult>
where
    F: FnOnce() -> Result<ForecastResult>,
{
    validate_request(request)?;
    let start = request.start_date();
    let end = request.end_date();

    if let Some(df) = cache.load_from_cache(request.cutoff_date, start, end, params)? {
        let site_count = distinct_site_count(&df)?;
        debug!(site_count, "serving forecast from cache");
        return Ok(ForecastResult {
            cutoff_date: request.cutoff_date,
            start_date: start,
            end_date: end,
            site_count,
            forecast_df: df,
            generated_at: Utc::now().to_rfc3339(),
            cached: true,
        });
    }

    let result = compute()?;
    if result.forecast_df.height() > 0 {
        cache.save_to_cache(
            &result.forecast_df,
            request.cutoff_date,
            start,
            end,
            result.site_count,
            params,
        )?;
    }
    Ok(result)
}

fn distinct_site_count(df: &DataFrame) -> Result<usize> {
    if df.height() == 0 {
        return Ok(0);
    }
    Ok(df
        .column(site::SITE_ID)?
        .as_materialized_series()
        .n_unique()?)
}
