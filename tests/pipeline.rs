//! End-to-end flow: cache miss triggers the forecast pipeline
//! (reconcile, then service-day spikeify), the result lands in the cache,
//! and a later validation run feeds the metrics ledger.

use chrono::NaiveDate;
use polars::prelude::*;
use tempfile::TempDir;

use forecastkit::schema::site;
use forecastkit::{
    generate_with_cache, iter_dates, parse_grafik_weekdays, reconcile, spikeify_weekly_values,
    CacheKeyParams, ForecastCache, ForecastRequest, ForecastResult, MetricsTracker,
    ReconcileParams, ServiceDayPattern,
};

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn smooth_site_forecast(site_id: &str, start: NaiveDate, days: usize, daily_m3: f64) -> DataFrame {
    let dates: Vec<String> = iter_dates(start, days)
        .iter()
        .map(|d| d.to_string())
        .collect();
    let ids: Vec<String> = vec![site_id.to_string(); days];
    let volumes: Vec<f64> = vec![daily_m3; days];
    let fill: Vec<f64> = vec![0.0; days];
    let overflow: Vec<f64> = vec![0.05; days];
    DataFrame::new(vec![
        Column::new(site::SITE_ID.into(), &ids),
        Column::new(site::DATE.into(), &dates),
        Column::new(site::FILL_PCT.into(), &fill),
        Column::new(site::PRED_VOLUME_M3.into(), &volumes),
        Column::new(site::OVERFLOW_PROB.into(), &overflow),
    ])
    .unwrap()
}

#[test]
fn forecast_request_flows_through_reconcile_spikeify_cache_and_metrics() {
    let dir = TempDir::new().unwrap();
    let cache = ForecastCache::new(dir.path().join("cache"));
    let params = CacheKeyParams::default();

    let cutoff = date("2024-09-08");
    let request = ForecastRequest {
        cutoff_date: cutoff,
        horizon_days: 7,
        site_ids: None,
    };
    let start = request.start_date();

    let registry = DataFrame::new(vec![
        Column::new("site_id".into(), &["S1".to_string()]),
        Column::new("district".into(), &["D1".to_string()]),
        Column::new("bin_count".into(), &[2.0]),
        Column::new("bin_size_liters".into(), &[1100.0]),
    ])
    .unwrap();

    // Trusted district totals ask for 10% more than the site curve sums to.
    let forecast_dates: Vec<String> = iter_dates(start, 7).iter().map(|d| d.to_string()).collect();
    let district_fc = DataFrame::new(vec![
        Column::new("date".into(), &forecast_dates),
        Column::new("district".into(), &vec!["D1".to_string(); 7]),
        Column::new("forecast_m3".into(), &vec![1.1; 7]),
    ])
    .unwrap();

    let result = generate_with_cache(&cache, &request, &params, || {
        let smooth = smooth_site_forecast("S1", start, 7, 1.0);
        let reconciled = reconcile(&smooth, &registry, &district_fc, &ReconcileParams::default())?;
        assert!(reconciled.warnings.is_empty());

        // Spike the reconciled curve onto the site's pickup days.
        let weekdays = parse_grafik_weekdays("пн, чт");
        let pattern = ServiceDayPattern::new(weekdays, [1.0; 7]);
        let dates = iter_dates(start, 7);
        let volumes: Vec<f64> = reconciled
            .adjusted
            .column(site::PRED_VOLUME_M3)?
            .f64()?
            .into_iter()
            .map(|v| v.unwrap_or(0.0))
            .collect();
        let spiked = spikeify_weekly_values(&dates, &volumes, &pattern, None, 6);

        let mut df = reconciled.adjusted;
        df.replace(
            site::PRED_VOLUME_M3,
            Series::new(site::PRED_VOLUME_M3.into(), &spiked),
        )?;
        Ok(ForecastResult {
            cutoff_date: cutoff,
            start_date: start,
            end_date: request.end_date(),
            site_count: 1,
            forecast_df: df,
            generated_at: "2024-09-08T12:00:00Z".to_string(),
            cached: false,
        })
    })
    .unwrap();

    assert!(!result.cached);
    let total: f64 = result
        .forecast_df
        .column(site::PRED_VOLUME_M3)
        .unwrap()
        .f64()
        .unwrap()
        .into_iter()
        .map(|v| v.unwrap_or(0.0))
        .sum();
    // Weekly total survives both reconciliation (x1.1) and spikeification.
    assert!((total - 7.7).abs() < 1e-6);

    // Second request is served from the cache without recomputation.
    let cached = generate_with_cache(&cache, &request, &params, || {
        panic!("must not recompute on a warm cache")
    })
    .unwrap();
    assert!(cached.cached);
    assert_eq!(cached.site_count, 1);

    // Only the two service days carry volume.
    let spiked: Vec<f64> = cached
        .forecast_df
        .column(site::PRED_VOLUME_M3)
        .unwrap()
        .f64()
        .unwrap()
        .into_iter()
        .map(|v| v.unwrap_or(0.0))
        .collect();
    let positive_days = spiked.iter().filter(|v| **v > 0.0).count();
    assert_eq!(positive_days, 2);

    // An externally-scored validation run lands in the ledger.
    let metrics_csv = dir.path().join("validation.csv");
    std::fs::write(
        &metrics_csv,
        "date_generated,overall_wape,total_forecast_m3,total_actual_m3,\
records_evaluated,sites_evaluated,within_10_pct,within_20_pct,within_50_pct,\
worst_sites,best_sites\n2024-09-20T09:00:00,0.18,7.7,7.4,7,1,42.9,57.1,100.0,S1,S1\n",
    )
    .unwrap();
    let mut tracker = MetricsTracker::new(dir.path().join("metrics")).unwrap();
    tracker
        .ingest_validation_csv(&metrics_csv, 1, None, "first full pipeline run")
        .unwrap();
    assert_eq!(tracker.get_history().height(), 1);
    assert!(tracker.get_improvement().is_none());
}
