//! Service-day spike allocation.
//!
//! Waste pickups happen on a few fixed weekdays per site, so a smooth daily
//! forecast scores badly against sparse actuals even when totals are close.
//! The functions here reshape a daily curve onto the site's service days,
//! preserving each week's total, and parse the free-text pickup schedules
//! ("График вывоза") those service days come from.

use std::collections::BTreeSet;

use chrono::{Datelike, Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

/// Weekly service pattern for one site: which weekdays a truck visits
/// (0 = Monday .. 6 = Sunday) and the typical volume weight per weekday.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDayPattern {
    pub weekdays: Vec<u32>,
    pub weekday_weights: [f64; 7],
}

impl ServiceDayPattern {
    pub fn new(weekdays: Vec<u32>, weekday_weights: [f64; 7]) -> Self {
        Self {
            weekdays,
            weekday_weights,
        }
    }
}

/// Consecutive dates starting at `start`, `n_days` long.
pub fn iter_dates(start: NaiveDate, n_days: usize) -> Vec<NaiveDate> {
    (0..n_days)
        .map(|i| start + Duration::days(i as i64))
        .collect()
}

/// Group date indices into runs sharing one ISO calendar week.
pub fn week_groups(dates: &[NaiveDate]) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut last_key: Option<(i32, u32)> = None;
    for (i, dt) in dates.iter().enumerate() {
        let iso = dt.iso_week();
        let key = (iso.year(), iso.week());
        if last_key != Some(key) {
            groups.push(Vec::new());
            last_key = Some(key);
        }
        groups
            .last_mut()
            .expect("group pushed for new week key")
            .push(i);
    }
    groups
}

/// Like [`week_groups`] but additionally split at month boundaries, so a
/// week straddling two months never redistributes volume across them.
pub fn week_groups_split_by_month(dates: &[NaiveDate]) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut last_key: Option<(i32, u32, i32, u32)> = None;
    for (i, dt) in dates.iter().enumerate() {
        let iso = dt.iso_week();
        let key = (iso.year(), iso.week(), dt.year(), dt.month());
        if last_key != Some(key) {
            groups.push(Vec::new());
            last_key = Some(key);
        }
        groups
            .last_mut()
            .expect("group pushed for new week key")
            .push(i);
    }
    groups
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Redistribute each week's total onto the pattern's service weekdays.
///
/// Per group: days outside `pattern.weekdays` become exactly 0 and the week
/// total is split across eligible days proportional to the weekday weights
/// (equal split when all eligible weights are nonpositive). Each allocation
/// is rounded to `decimals` and the largest one absorbs the rounding
/// residual, so the week sum matches the original to rounding precision.
///
/// A group with no eligible day is returned unchanged: spiking it would
/// invent a visit that never happens.
pub fn spikeify_weekly_values(
    dates: &[NaiveDate],
    values: &[f64],
    pattern: &ServiceDayPattern,
    groups: Option<&[Vec<usize>]>,
    decimals: u32,
) -> Vec<f64> {
    assert_eq!(
        dates.len(),
        values.len(),
        "dates and values must have equal length"
    );

    let default_groups;
    let groups = match groups {
        Some(g) => g,
        None => {
            default_groups = week_groups(dates);
            &default_groups
        }
    };

    let mut out = values.to_vec();

    for group in groups {
        let total: f64 = group.iter().map(|&i| values[i]).sum();

        let eligible: Vec<usize> = group
            .iter()
            .copied()
            .filter(|&i| {
                let wd = dates[i].weekday().num_days_from_monday();
                pattern.weekdays.contains(&wd)
            })
            .collect();

        if eligible.is_empty() {
            continue;
        }

        let mut weights: Vec<f64> = eligible
            .iter()
            .map(|&i| {
                let wd = dates[i].weekday().num_days_from_monday() as usize;
                pattern.weekday_weights[wd].max(0.0)
            })
            .collect();
        let mut weight_sum: f64 = weights.iter().sum();
        if weight_sum <= 0.0 {
            weights = vec![1.0; eligible.len()];
            weight_sum = eligible.len() as f64;
        }

        for &i in group {
            out[i] = 0.0;
        }

        let mut allocated = 0.0;
        for (&i, w) in eligible.iter().zip(&weights) {
            let alloc = round_to(total * w / weight_sum, decimals);
            out[i] = alloc;
            allocated += alloc;
        }

        // Largest allocation absorbs the rounding residual (ties: earliest day).
        let residual = total - allocated;
        let largest = eligible
            .iter()
            .copied()
            .max_by(|&a, &b| {
                out[a]
                    .partial_cmp(&out[b])
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(b.cmp(&a))
            })
            .expect("eligible is non-empty");
        out[largest] = round_to(out[largest] + residual, decimals);
    }

    out
}

const DAY_TOKEN: &str = "пн|вт|ср|чт|пт|сб|вс";

static DAILY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)ежедневно").expect("static regex compiles"));
static RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)({DAY_TOKEN})\s*[-–—]\s*({DAY_TOKEN})"))
        .expect("static regex compiles")
});
static DAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?i)({DAY_TOKEN})")).expect("static regex compiles"));

fn weekday_index(abbrev: &str) -> Option<u32> {
    match abbrev.to_lowercase().as_str() {
        "пн" => Some(0),
        "вт" => Some(1),
        "ср" => Some(2),
        "чт" => Some(3),
        "пт" => Some(4),
        "сб" => Some(5),
        "вс" => Some(6),
        _ => None,
    }
}

/// Parse a free-text "График вывоза" schedule into weekdays (0 = Monday).
///
/// Grammar: "Ежедневно" → all seven days; comma-separated day abbreviations
/// ("пн, ср, пт"); hyphen/dash ranges including wraparound ("сб-пн" →
/// Sat, Sun, Mon); alternating-week schedules joined with "/" use only the
/// first half. Placeholder text ("", "-", "—") and unparseable tokens mean
/// "no known schedule" and yield an empty vec, never an error.
pub fn parse_grafik_weekdays(text: &str) -> Vec<u32> {
    let t = text.trim();
    if t.is_empty() || matches!(t, "-" | "–" | "—") {
        return Vec::new();
    }
    if DAILY_RE.is_match(t) {
        return (0..7).collect();
    }

    let first_half = t.split('/').next().unwrap_or("");
    let mut days: BTreeSet<u32> = BTreeSet::new();

    for segment in first_half.split(',') {
        let seg = segment.trim();
        if seg.is_empty() {
            continue;
        }
        if let Some(caps) = RANGE_RE.captures(seg) {
            let from = weekday_index(&caps[1]);
            let to = weekday_index(&caps[2]);
            if let (Some(from), Some(to)) = (from, to) {
                let mut d = from;
                loop {
                    days.insert(d);
                    if d == to {
                        break;
                    }
                    d = (d + 1) % 7;
                }
            }
        } else if let Some(caps) = DAY_RE.captures(seg) {
            if let Some(d) = weekday_index(&caps[1]) {
                days.insert(d);
            }
        }
    }

    days.into_iter().collect()
}

/// Pick up to `k` weekdays with the highest event counts (ties favor the
/// earlier weekday index). Weekdays with zero events are never picked.
pub fn pick_top_k_weekdays(counts: &[u32; 7], k: usize) -> Vec<u32> {
    let mut order: Vec<usize> = (0..7).filter(|&i| counts[i] > 0).collect();
    order.sort_by_key(|&i| (std::cmp::Reverse(counts[i]), i));
    let mut top: Vec<u32> = order.into_iter().take(k).map(|i| i as u32).collect();
    top.sort_unstable();
    top
}

/// Per-weekday mean volume per visit from historical (sum, count) pairs.
/// Weekdays with no visits get weight 0.
pub fn mean_weights_from_sums_and_counts(sums: &[f64; 7], counts: &[u32; 7]) -> [f64; 7] {
    let mut weights = [0.0f64; 7];
    for i in 0..7 {
        if counts[i] > 0 {
            weights[i] = sums[i] / counts[i] as f64;
        }
    }
    weights
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn parse_daily_keyword() {
        assert_eq!(parse_grafik_weekdays("Ежедневно"), vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(parse_grafik_weekdays("ежедневно"), vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn parse_day_list() {
        assert_eq!(parse_grafik_weekdays("пн, ср, пт"), vec![0, 2, 4]);
        assert_eq!(parse_grafik_weekdays("ВТ,СБ"), vec![1, 5]);
    }

    #[test]
    fn parse_placeholder_is_empty() {
        assert_eq!(parse_grafik_weekdays("-"), Vec::<u32>::new());
        assert_eq!(parse_grafik_weekdays("—"), Vec::<u32>::new());
        assert_eq!(parse_grafik_weekdays(""), Vec::<u32>::new());
        assert_eq!(parse_grafik_weekdays("  "), Vec::<u32>::new());
    }

    #[test]
    fn parse_wraparound_range() {
        assert_eq!(parse_grafik_weekdays("сб-пн"), vec![0, 5, 6]);
        assert_eq!(parse_grafik_weekdays("вт–чт"), vec![1, 2, 3]);
    }

    #[test]
    fn parse_slash_uses_first_half() {
        assert_eq!(parse_grafik_weekdays("пн, чт/вт, пт"), vec![0, 3]);
    }

    #[test]
    fn parse_unknown_tokens_skipped() {
        assert_eq!(parse_grafik_weekdays("по заявке"), Vec::<u32>::new());
        assert_eq!(parse_grafik_weekdays("пн, по заявке"), vec![0]);
    }

    #[test]
    fn week_groups_follow_iso_weeks() {
        // 2024-09-09 is a Monday.
        let dates = iter_dates(d(2024, 9, 4), 10);
        let groups = week_groups(&dates);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], vec![0, 1, 2, 3, 4]); // Wed..Sun
        assert_eq!(groups[1], vec![5, 6, 7, 8, 9]); // Mon..Fri
    }

    #[test]
    fn month_split_keeps_volume_inside_months() {
        // Week of Mon 2024-08-26 .. Sun 2024-09-01 straddles a month edge.
        let dates = iter_dates(d(2024, 8, 26), 7);
        let groups = week_groups_split_by_month(&dates);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(groups[1], vec![6]);

        // Sunday-only pattern: August part has no Sunday and stays as-is.
        let pattern = ServiceDayPattern::new(vec![6], [0.0; 7]);
        let values = vec![1.0; 7];
        let out = spikeify_weekly_values(&dates, &values, &pattern, Some(&groups), 6);
        assert_eq!(&out[..6], &values[..6]);
        assert!((out[6] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn week_totals_preserved() {
        let dates = iter_dates(d(2024, 9, 9), 14); // two full ISO weeks
        let values: Vec<f64> = (0..14).map(|i| 0.7 + 0.13 * i as f64).collect();
        let mut weights = [0.0; 7];
        weights[1] = 2.0;
        weights[4] = 1.0;
        let pattern = ServiceDayPattern::new(vec![1, 4], weights);

        let out = spikeify_weekly_values(&dates, &values, &pattern, None, 6);

        for group in week_groups(&dates) {
            let before: f64 = group.iter().map(|&i| values[i]).sum();
            let after: f64 = group.iter().map(|&i| out[i]).sum();
            assert!((before - after).abs() < 1e-6, "week total drifted");
            for &i in &group {
                let wd = dates[i].weekday().num_days_from_monday();
                if wd != 1 && wd != 4 {
                    assert_eq!(out[i], 0.0);
                }
            }
        }
        // Tuesday carries twice Friday's share.
        assert!((out[1] / out[4] - 2.0).abs() < 1e-3);
    }

    #[test]
    fn zero_eligible_week_unchanged() {
        let dates = iter_dates(d(2024, 9, 9), 5); // Mon..Fri
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let pattern = ServiceDayPattern::new(vec![6], [0.0; 7]); // Sundays only
        let out = spikeify_weekly_values(&dates, &values, &pattern, None, 6);
        assert_eq!(out, values);
    }

    #[test]
    fn equal_weight_fallback_when_weights_nonpositive() {
        let dates = iter_dates(d(2024, 9, 9), 7);
        let values = vec![1.0; 7];
        let pattern = ServiceDayPattern::new(vec![0, 3], [0.0; 7]);
        let out = spikeify_weekly_values(&dates, &values, &pattern, None, 6);
        assert!((out[0] - 3.5).abs() < 1e-6);
        assert!((out[3] - 3.5).abs() < 1e-6);
        assert_eq!(out[1], 0.0);
    }

    #[test]
    fn residual_absorbed_by_largest_allocation() {
        let dates = iter_dates(d(2024, 9, 9), 7);
        let mut values = vec![0.0; 7];
        values[0] = 1.0;
        let pattern = ServiceDayPattern::new(vec![0, 2, 4], [1.0; 7]);
        let out = spikeify_weekly_values(&dates, &values, &pattern, None, 6);
        let total: f64 = out.iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
        // 1/3 rounds to 0.333333; the first (largest-tie) day absorbs the residual.
        assert!((out[0] - 0.333334).abs() < 1e-9);
        assert!((out[2] - 0.333333).abs() < 1e-9);
        assert!((out[4] - 0.333333).abs() < 1e-9);
    }

    #[test]
    fn top_k_prefers_higher_counts_then_earlier_days() {
        let counts = [3, 3, 0, 2, 0, 5, 0];
        assert_eq!(pick_top_k_weekdays(&counts, 2), vec![0, 5]);
        assert_eq!(pick_top_k_weekdays(&counts, 3), vec![0, 1, 5]);
        // Never picks zero-count weekdays even when k allows more.
        assert_eq!(pick_top_k_weekdays(&counts, 7), vec![0, 1, 3, 5]);
    }

    #[test]
    fn mean_weights_zero_without_visits() {
        let sums = [10.0, 0.0, 6.0, 0.0, 0.0, 0.0, 0.0];
        let counts = [4, 0, 2, 0, 0, 0, 0];
        let w = mean_weights_from_sums_and_counts(&sums, &counts);
        assert_eq!(w[0], 2.5);
        assert_eq!(w[1], 0.0);
        assert_eq!(w[2], 3.0);
    }
}
