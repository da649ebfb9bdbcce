use crate::models::scan_record::{ScanRecord, TrendDirection};
use crate::models::trend::{TrendGranularity, TrendPoint, TrendSeries};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

const SECONDS_PER_DAY: i64 = 86_400;

/// Delta against the immediately preceding record only.
pub fn compute_improvement(new_score: u8, previous: Option<&ScanRecord>) -> Option<i32> {
    previous.map(|prev| i32::from(new_score) - i32::from(prev.health_score))
}

impl TrendDirection {
    pub fn from_improvement(improvement: Option<i32>) -> Option<TrendDirection> {
        improvement.map(|delta| {
            if delta >= 0 {
                TrendDirection::Improving
            } else {
                TrendDirection::Worsening
            }
        })
    }
}

/// Keep records no older than `range_days` before `now`.
pub fn records_within(records: &[ScanRecord], now: i64, range_days: u32) -> Vec<ScanRecord> {
    let cutoff = now - i64::from(range_days) * SECONDS_PER_DAY;
    records
        .iter()
        .filter(|r| r.timestamp >= cutoff)
        .cloned()
        .collect()
}

/// Project records onto a time axis for charting.
///
/// `records` must be in append order, oldest first. Records sharing a
/// timestamp keep that order; a clock step backwards is repaired by a stable
/// sort. Fewer than two resulting points yields an empty series, which callers
/// render as "not enough data".
pub fn build_trend_series(records: &[ScanRecord], granularity: TrendGranularity) -> TrendSeries {
    if records.len() < 2 {
        return TrendSeries::default();
    }

    let mut chronological: Vec<&ScanRecord> = records.iter().collect();
    chronological.sort_by_key(|r| r.timestamp);

    let points = match granularity {
        TrendGranularity::Scan => chronological
            .iter()
            .map(|r| TrendPoint {
                label: format_label(r.timestamp, "%b %d %H:%M"),
                value: r.health_score,
                timestamp: r.timestamp,
            })
            .collect(),
        TrendGranularity::Day => bucketize(&chronological, day_start, "%b %d"),
        TrendGranularity::Week => bucketize(&chronological, week_start, "Wk of %b %d"),
    };

    if points.len() < 2 {
        return TrendSeries::default();
    }

    TrendSeries { points }
}

fn bucketize(
    chronological: &[&ScanRecord],
    bucket_of: fn(i64) -> NaiveDate,
    label_format: &str,
) -> Vec<TrendPoint> {
    let mut points = Vec::new();
    let mut current: Option<(NaiveDate, Vec<u8>)> = None;

    for record in chronological {
        let bucket = bucket_of(record.timestamp);
        if let Some((date, scores)) = current.as_mut() {
            if *date == bucket {
                scores.push(record.health_score);
                continue;
            }
        }

        if let Some((date, scores)) = current.take() {
            points.push(bucket_point(date, &scores, label_format));
        }
        current = Some((bucket, vec![record.health_score]));
    }

    if let Some((date, scores)) = current {
        points.push(bucket_point(date, &scores, label_format));
    }

    points
}

fn bucket_point(date: NaiveDate, scores: &[u8], label_format: &str) -> TrendPoint {
    let sum: u32 = scores.iter().map(|s| u32::from(*s)).sum();
    let mean = (f64::from(sum) / scores.len().max(1) as f64).round();
    let timestamp = date
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default();

    TrendPoint {
        label: date.format(label_format).to_string(),
        value: mean.clamp(0.0, 100.0) as u8,
        timestamp,
    }
}

fn to_utc(timestamp: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp, 0).unwrap_or_default()
}

fn day_start(timestamp: i64) -> NaiveDate {
    to_utc(timestamp).date_naive()
}

fn week_start(timestamp: i64) -> NaiveDate {
    let date = day_start(timestamp);
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

fn format_label(timestamp: i64, format: &str) -> String {
    to_utc(timestamp).format(format).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-03-04 09:30:00 UTC, a Monday
    const MONDAY: i64 = 1_709_544_600;

    fn record(id: &str, timestamp: i64, score: u8) -> ScanRecord {
        ScanRecord {
            id: id.to_string(),
            timestamp,
            image_reference: format!("file:///scans/{id}.jpg"),
            detections: Vec::new(),
            health_score: score,
            improvement: None,
        }
    }

    #[test]
    fn improvement_is_delta_to_previous_record() {
        assert_eq!(compute_improvement(80, None), None);
        assert_eq!(compute_improvement(80, Some(&record("a", MONDAY, 70))), Some(10));
        assert_eq!(compute_improvement(60, Some(&record("a", MONDAY, 70))), Some(-10));
    }

    #[test]
    fn direction_follows_sign_of_improvement() {
        assert_eq!(TrendDirection::from_improvement(None), None);
        assert_eq!(
            TrendDirection::from_improvement(Some(0)),
            Some(TrendDirection::Improving)
        );
        assert_eq!(
            TrendDirection::from_improvement(Some(-3)),
            Some(TrendDirection::Worsening)
        );
    }

    #[test]
    fn insufficient_history_yields_empty_series() {
        assert!(build_trend_series(&[], TrendGranularity::Scan).is_empty());
        assert!(build_trend_series(&[record("a", MONDAY, 70)], TrendGranularity::Scan).is_empty());
    }

    #[test]
    fn per_scan_series_is_chronological() {
        let records = vec![
            record("a", MONDAY, 70),
            record("b", MONDAY + 3_600, 80),
            record("c", MONDAY + 7_200, 90),
        ];
        let series = build_trend_series(&records, TrendGranularity::Scan);

        assert_eq!(series.values(), vec![70, 80, 90]);
        assert_eq!(series.labels()[0], "Mar 04 09:30");
        assert_eq!(series.points[2].timestamp, MONDAY + 7_200);
    }

    #[test]
    fn equal_timestamps_keep_append_order() {
        let records = vec![record("a", MONDAY, 60), record("b", MONDAY, 85)];
        let series = build_trend_series(&records, TrendGranularity::Scan);
        assert_eq!(series.values(), vec![60, 85]);

        let records = vec![
            record("a", MONDAY, 60),
            record("b", MONDAY + 60, 70),
            record("c", MONDAY + 60, 95),
            record("d", MONDAY + 60, 40),
        ];
        let series = build_trend_series(&records, TrendGranularity::Scan);
        assert_eq!(series.values(), vec![60, 70, 95, 40]);
    }

    #[test]
    fn backwards_clock_step_is_reordered() {
        let records = vec![
            record("a", MONDAY + 600, 80),
            record("b", MONDAY, 65),
            record("c", MONDAY + 1_200, 90),
        ];
        let series = build_trend_series(&records, TrendGranularity::Scan);
        assert_eq!(series.values(), vec![65, 80, 90]);
    }

    #[test]
    fn day_buckets_average_same_day_scans() {
        let records = vec![
            record("a", MONDAY, 70),
            record("b", MONDAY + 3_600, 75),
            record("c", MONDAY + SECONDS_PER_DAY, 90),
        ];
        let series = build_trend_series(&records, TrendGranularity::Day);

        assert_eq!(series.labels(), vec!["Mar 04".to_string(), "Mar 05".to_string()]);
        // (70 + 75) / 2 = 72.5 rounds up
        assert_eq!(series.values(), vec![73, 90]);
    }

    #[test]
    fn single_bucket_is_not_enough_to_chart() {
        let records = vec![record("a", MONDAY, 70), record("b", MONDAY + 60, 75)];
        assert!(build_trend_series(&records, TrendGranularity::Day).is_empty());
    }

    #[test]
    fn week_buckets_start_on_monday() {
        let records = vec![
            record("a", MONDAY, 60),
            record("b", MONDAY + 3 * SECONDS_PER_DAY, 64),
            record("c", MONDAY + 9 * SECONDS_PER_DAY, 88),
        ];
        let series = build_trend_series(&records, TrendGranularity::Week);

        assert_eq!(
            series.labels(),
            vec!["Wk of Mar 04".to_string(), "Wk of Mar 11".to_string()]
        );
        assert_eq!(series.values(), vec![62, 88]);
    }

    #[test]
    fn range_filter_drops_old_records() {
        let now = MONDAY + 100 * SECONDS_PER_DAY;
        let records = vec![
            record("b", now - 10 * SECONDS_PER_DAY, 80),
            record("a", now - 95 * SECONDS_PER_DAY, 50),
        ];
        let recent = records_within(&records, now, 90);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, "b");
    }
}
