//! Status - owner / agent 単位の集計ビュー

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::ports::StatusCounts;

/// 集計期間（`?range=`）。created_at がこの起点以降の record だけを数える
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsRange {
    #[default]
    All,
    /// UTC の今日 0 時から
    Today,
    Week,
    Month,
    Year,
}

impl StatsRange {
    pub fn since(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            StatsRange::All => None,
            StatsRange::Today => now
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|midnight| midnight.and_utc()),
            StatsRange::Week => Some(now - chrono::Duration::days(7)),
            StatsRange::Month => now.checked_sub_months(Months::new(1)),
            StatsRange::Year => now.checked_sub_months(Months::new(12)),
        }
    }
}

/// RecordStats は `GET /records/stats` / `GET /agents/{id}/stats` の中身
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordStats {
    pub total: u64,
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,

    /// completed / total * 100（total が 0 なら 0）
    pub success_rate: f64,

    /// completed の平均処理時間
    pub avg_duration_ms: f64,
}

impl From<StatusCounts> for RecordStats {
    fn from(counts: StatusCounts) -> Self {
        let total = counts.total();
        let success_rate = if total == 0 {
            0.0
        } else {
            counts.completed as f64 / total as f64 * 100.0
        };
        Self {
            total,
            pending: counts.pending,
            running: counts.running,
            completed: counts.completed,
            failed: counts.failed,
            cancelled: counts.cancelled,
            success_rate,
            avg_duration_ms: counts.avg_duration_ms.unwrap_or(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RecordStatus;
    use chrono::TimeZone;
    use rstest::rstest;

    #[rstest]
    #[case(StatsRange::All, None)]
    #[case(StatsRange::Today, Some(Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap()))]
    #[case(StatsRange::Week, Some(Utc.with_ymd_and_hms(2024, 3, 24, 15, 30, 0).unwrap()))]
    #[case(StatsRange::Month, Some(Utc.with_ymd_and_hms(2024, 2, 29, 15, 30, 0).unwrap()))]
    #[case(StatsRange::Year, Some(Utc.with_ymd_and_hms(2023, 3, 31, 15, 30, 0).unwrap()))]
    fn range_start(#[case] range: StatsRange, #[case] want: Option<DateTime<Utc>>) {
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 15, 30, 0).unwrap();
        assert_eq!(range.since(now), want);
    }

    #[test]
    fn range_names_are_snake_case() {
        let range: StatsRange = serde_json::from_str("\"week\"").unwrap();
        assert_eq!(range, StatsRange::Week);
    }

    #[test]
    fn empty_owner_has_zero_rate() {
        let stats = RecordStats::from(StatusCounts::default());
        assert_eq!(stats.total, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.avg_duration_ms, 0.0);
    }

    #[test]
    fn success_rate_is_a_percentage() {
        let mut counts = StatusCounts::default();
        counts.add(RecordStatus::Completed, 3);
        counts.add(RecordStatus::Failed, 1);
        counts.avg_duration_ms = Some(120.0);

        let stats = RecordStats::from(counts);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.success_rate, 75.0);
        assert_eq!(stats.avg_duration_ms, 120.0);
    }
}
