//! On-disk forecast cache: parquet payload plus a JSON metadata side-car.
//!
//! Keys are deterministic functions of the forecast window and any tuning
//! parameter that changes the result, so differently-tuned requests for the
//! same dates never collide. The payload is written before the side-car;
//! a reader that sees metadata can rely on the payload being present, and
//! anything less than both files is an ordinary miss.

use std::fs;
use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;

/// Tuning parameters folded into the cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyParams {
    /// Training window of the rate estimator, in days.
    pub window_days: u32,
    /// Minimum observations per site required by the estimator.
    pub min_obs: u32,
    /// Optional filter digest (see `rolling::build_cache_suffix`).
    pub suffix: Option<String>,
}

impl Default for CacheKeyParams {
    fn default() -> Self {
        Self {
            window_days: 56,
            min_obs: 4,
            suffix: None,
        }
    }
}

/// Side-car metadata written next to every cached payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub cache_key: String,
    pub cutoff: String,
    pub start: String,
    pub end: String,
    pub site_count: usize,
    pub generated_at: String,
    pub file_size_bytes: u64,
}

/// Deterministic cache key:
/// `forecast_{cutoff}_{start}_{end}_w{window_days}_m{min_obs}[_{suffix}]`.
pub fn cache_key(
    cutoff: NaiveDate,
    start: NaiveDate,
    end: NaiveDate,
    params: &CacheKeyParams,
) -> String {
    let mut key = format!(
        "forecast_{}_{}_{}_w{}_m{}",
        cutoff, start, end, params.window_days, params.min_obs
    );
    if let Some(suffix) = &params.suffix {
        key.push('_');
        key.push_str(suffix);
    }
    key
}

/// Forecast cache rooted at one directory.
pub struct ForecastCache {
    root: PathBuf,
}

impl ForecastCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn payload_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.parquet"))
    }

    pub fn metadata_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.meta.json"))
    }

    /// Write the payload, then the metadata side-car. No rollback: a crash
    /// between the two writes leaves a payload without metadata, which
    /// readers treat as a miss.
    pub fn save_to_cache(
        &self,
        df: &DataFrame,
        cutoff: NaiveDate,
        start: NaiveDate,
        end: NaiveDate,
        site_count: usize,
        params: &CacheKeyParams,
    ) -> Result<CacheMetadata> {
        let key = cache_key(cutoff, start, end, params);
        fs::create_dir_all(&self.root)?;

        let payload = self.payload_path(&key);
        let mut df = df.clone();
        ParquetWriter::new(File::create(&payload)?).finish(&mut df)?;

        let metadata = CacheMetadata {
            cache_key: key.clone(),
            cutoff: cutoff.to_string(),
            start: start.to_string(),
            end: end.to_string(),
            site_count,
            generated_at: Utc::now().to_rfc3339(),
            file_size_bytes: fs::metadata(&payload)?.len(),
        };
        fs::write(
            self.metadata_path(&key),
            serde_json::to_string_pretty(&metadata)?,
        )?;

        info!(key = %key, rows = df.height(), "saved forecast to cache");
        Ok(metadata)
    }

    /// Load a cached forecast, or None on any miss. I/O failures on files
    /// that do exist propagate; a miss is normal flow.
    pub fn load_from_cache(
        &self,
        cutoff: NaiveDate,
        start: NaiveDate,
        end: NaiveDate,
        params: &CacheKeyParams,
    ) -> Result<Option<DataFrame>> {
        let key = cache_key(cutoff, start, end, params);
        if !self.exists_key(&key) {
            debug!(key = %key, "cache miss");
            return Ok(None);
        }
        let df = ParquetReader::new(File::open(self.payload_path(&key))?).finish()?;
        debug!(key = %key, rows = df.height(), "cache hit");
        Ok(Some(df))
    }

    /// True only when both the payload and its metadata exist.
    pub fn cache_exists(
        &self,
        cutoff: NaiveDate,
        start: NaiveDate,
        end: NaiveDate,
        params: &CacheKeyParams,
    ) -> bool {
        self.exists_key(&cache_key(cutoff, start, end, params))
    }

    /// Metadata for a cached entry, or None when the entry is incomplete.
    pub fn get_cache_metadata(
        &self,
        cutoff: NaiveDate,
        start: NaiveDate,
        end: NaiveDate,
        params: &CacheKeyParams,
    ) -> Result<Option<CacheMetadata>> {
        let key = cache_key(cutoff, start, end, params);
        if !self.exists_key(&key) {
            return Ok(None);
        }
        let raw = fs::read_to_string(self.metadata_path(&key))?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Delete every cached payload and side-car. Full flush only; returns
    /// the number of files removed.
    pub fn clear_cache(&self) -> Result<usize> {
        if !self.root.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with("forecast_")
                && (name.ends_with(".parquet") || name.ends_with(".meta.json"))
            {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        info!(removed, "cleared forecast cache");
        Ok(removed)
    }

    fn exists_key(&self, key: &str) -> bool {
        self.payload_path(key).exists() && self.metadata_path(key).exists()
    }
}
