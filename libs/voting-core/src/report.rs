//! Read-only reports over the tally and the token store.

use std::fmt::Write;

use serde::Serialize;
use time::{format_description::well_known::Rfc3339, Duration, OffsetDateTime, Time, UtcOffset};
use types_rs::{CandidateId, Totals, VoteRecord};

use crate::token_store::ExportRow;

/// Cumulative vote counts at the end of one hour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrendPoint {
    /// Start of the hour, in UTC.
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
    pub totals: Totals,
}

fn hour_of(at: OffsetDateTime) -> OffsetDateTime {
    let utc = at.to_offset(UtcOffset::UTC);
    utc.replace_time(Time::MIDNIGHT) + Duration::hours(utc.hour().into())
}

/// Buckets `history` by hour and returns running totals per candidate, one
/// point per hour from the hour of the first vote through the hour of
/// `until`, or of the last vote if that is later. Every candidate in
/// `candidates` appears in every point.
///
/// `history` must be sorted by timestamp, as [`crate::BallotTally::history`]
/// returns it. Returns nothing for an empty history.
pub fn hourly_trend(
    history: &[VoteRecord],
    candidates: impl IntoIterator<Item = CandidateId>,
    until: OffsetDateTime,
) -> Vec<TrendPoint> {
    let Some(first) = history.first() else {
        return Vec::new();
    };

    let mut running: Totals = candidates.into_iter().map(|id| (id, 0)).collect();
    let last = history
        .last()
        .map_or(first.timestamp, |record| record.timestamp)
        .max(until);
    let end = hour_of(last);

    let mut points = Vec::new();
    let mut records = history.iter().peekable();
    let mut hour = hour_of(first.timestamp);
    while hour <= end {
        let next = hour + Duration::HOUR;
        while let Some(record) = records.next_if(|record| record.timestamp < next) {
            *running.entry(record.candidate_id).or_default() += 1;
        }
        points.push(TrendPoint {
            time: hour,
            totals: running.clone(),
        });
        hour = next;
    }
    points
}

/// Renders exported tokens as CSV with a `Token,Status,UsedAt` header.
///
/// # Errors
///
/// Fails only if a timestamp cannot be formatted as RFC 3339.
pub fn tokens_csv(
    rows: impl IntoIterator<Item = ExportRow>,
) -> Result<String, time::error::Format> {
    let mut csv = String::from("Token,Status,UsedAt\n");
    for row in rows {
        let used_at = row.used_at.map(|at| at.format(&Rfc3339)).transpose()?;
        // ids, statuses and timestamps never contain commas or quotes
        let _ = writeln!(
            csv,
            "{},{},{}",
            row.id,
            row.status,
            used_at.unwrap_or_default()
        );
    }
    Ok(csv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use time::macros::datetime;
    use types_rs::{TokenId, TokenStatus};

    fn vote(id: &str, candidate: u32, timestamp: OffsetDateTime) -> VoteRecord {
        VoteRecord {
            id: TokenId::new(id),
            candidate_id: CandidateId::new(candidate),
            timestamp,
        }
    }

    fn candidates() -> [CandidateId; 2] {
        [CandidateId::new(1), CandidateId::new(2)]
    }

    #[test]
    fn test_trend_empty_history() {
        assert_eq!(
            hourly_trend(&[], candidates(), datetime!(2024-07-21 12:00 UTC)),
            vec![]
        );
    }

    #[test]
    fn test_trend_is_cumulative_and_fills_gaps() {
        let history = [
            vote("AAAAAA", 1, datetime!(2024-07-21 09:05 UTC)),
            vote("BBBBBB", 2, datetime!(2024-07-21 09:59:59 UTC)),
            vote("CCCCCC", 1, datetime!(2024-07-21 11:00 UTC)),
        ];

        let trend = hourly_trend(&history, candidates(), datetime!(2024-07-21 12:30 UTC));

        let totals = |a, b| Totals::from([(CandidateId::new(1), a), (CandidateId::new(2), b)]);
        assert_eq!(
            trend,
            vec![
                TrendPoint {
                    time: datetime!(2024-07-21 09:00 UTC),
                    totals: totals(1, 1),
                },
                TrendPoint {
                    time: datetime!(2024-07-21 10:00 UTC),
                    totals: totals(1, 1),
                },
                TrendPoint {
                    time: datetime!(2024-07-21 11:00 UTC),
                    totals: totals(2, 1),
                },
                TrendPoint {
                    time: datetime!(2024-07-21 12:00 UTC),
                    totals: totals(2, 1),
                },
            ]
        );
    }

    #[test]
    fn test_trend_buckets_in_utc() {
        let history = [vote("AAAAAA", 2, datetime!(2024-07-21 08:30 +07:00))];
        let trend = hourly_trend(&history, candidates(), datetime!(2024-07-21 09:10 +07:00));

        assert_eq!(trend.len(), 2);
        assert_eq!(trend[0].time, datetime!(2024-07-21 01:00 UTC));
        assert_eq!(trend[1].time, datetime!(2024-07-21 02:00 UTC));
        assert_eq!(trend[1].totals[&CandidateId::new(2)], 1);
    }

    #[test]
    fn test_trend_until_before_first_vote() {
        let history = [
            vote("AAAAAA", 1, datetime!(2024-07-21 09:05 UTC)),
            vote("BBBBBB", 2, datetime!(2024-07-21 10:20 UTC)),
        ];
        let trend = hourly_trend(&history, candidates(), datetime!(2024-07-21 06:00 UTC));

        assert_eq!(
            trend.iter().map(|point| point.time).collect::<Vec<_>>(),
            vec![
                datetime!(2024-07-21 09:00 UTC),
                datetime!(2024-07-21 10:00 UTC),
            ]
        );
        assert_eq!(trend[1].totals[&CandidateId::new(2)], 1);
    }

    #[test]
    fn test_trend_counts_unlisted_candidates() {
        let history = [vote("AAAAAA", 9, datetime!(2024-07-21 09:00 UTC))];
        let trend = hourly_trend(&history, candidates(), datetime!(2024-07-21 09:00 UTC));
        assert_eq!(trend.len(), 1);
        assert_eq!(trend[0].totals[&CandidateId::new(9)], 1);
        assert_eq!(trend[0].totals[&CandidateId::new(1)], 0);
    }

    #[test]
    fn test_tokens_csv() {
        let rows = [
            ExportRow {
                id: TokenId::new("x7f3q1"),
                status: TokenStatus::Used,
                used_at: Some(datetime!(2024-07-21 10:15 UTC)),
            },
            ExportRow {
                id: TokenId::new("AB12CD"),
                status: TokenStatus::Active,
                used_at: None,
            },
        ];

        assert_eq!(
            tokens_csv(rows).unwrap(),
            "Token,Status,UsedAt\nX7F3Q1,used,2024-07-21T10:15:00Z\nAB12CD,active,\n"
        );
    }

    #[test]
    fn test_tokens_csv_empty() {
        assert_eq!(tokens_csv(Vec::<ExportRow>::new()).unwrap(), "Token,Status,UsedAt\n");
    }
}
