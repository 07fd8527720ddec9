use crate::error::{Result, TunerError};
use crate::models::{Investment, PortfolioSnapshot};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Order of events sharing a date: positions held when the series starts are
/// opened first, then closes are matched, then opens seen at that boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EventKind {
    Seed,
    Close,
    Open,
}

#[derive(Debug, Clone)]
struct PositionEvent<'a> {
    kind: EventKind,
    symbol: &'a str,
    date: DateTime<Utc>,
    /// Snapshot holding the position for close events.
    snapshot_index: usize,
}

#[derive(Debug, Clone, PartialEq)]
struct MatchedPair<'a> {
    symbol: &'a str,
    open_date: DateTime<Utc>,
    close_date: DateTime<Utc>,
    snapshot_index: usize,
}

pub struct InvestmentReconstructor;

impl InvestmentReconstructor {
    /// Turns a chronological snapshot series into investments ordered by
    /// descending profit ratio. Equal ratios keep close-event order.
    pub fn reconstruct(snapshots: &[PortfolioSnapshot]) -> Result<Vec<Investment>> {
        if snapshots.is_empty() {
            return Ok(Vec::new());
        }
        Self::validate_series(snapshots)?;

        let events = Self::collect_events(snapshots);
        let pairs = Self::pair_events(events)?;

        let mut investments = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let position = snapshots[pair.snapshot_index]
                .position(pair.symbol)
                .ok_or_else(|| TunerError::UnmatchedClose {
                    symbol: pair.symbol.to_string(),
                    close_date: pair.close_date,
                })?;
            let entry_value = position.entry_value().ok_or_else(|| {
                TunerError::validation(
                    format!("entry value of {} overflows", pair.symbol),
                    &format!(
                        "quantity {} at average entry price {}",
                        position.quantity, position.average_entry_price
                    ),
                )
            })?;
            investments.push(Investment {
                symbol: pair.symbol.to_string(),
                open_date: pair.open_date,
                close_date: pair.close_date,
                entry_value,
                exit_value: position.market_value,
            });
        }

        sort_by_profit_ratio(&mut investments);
        Ok(investments)
    }

    /// Timestamps must strictly increase and symbols must be unique per snapshot.
    pub fn validate_series(snapshots: &[PortfolioSnapshot]) -> Result<()> {
        for window in snapshots.windows(2) {
            if window[1].timestamp <= window[0].timestamp {
                return Err(TunerError::validation(
                    "snapshot timestamps must be strictly increasing",
                    &format!("{} followed by {}", window[0].timestamp, window[1].timestamp),
                ));
            }
        }
        for snapshot in snapshots {
            let mut seen = HashSet::with_capacity(snapshot.positions.len());
            for position in &snapshot.positions {
                if !seen.insert(position.symbol.as_str()) {
                    return Err(TunerError::validation(
                        format!("duplicate position in snapshot {}", snapshot.timestamp),
                        &position.symbol,
                    ));
                }
            }
        }
        Ok(())
    }

    fn collect_events(snapshots: &[PortfolioSnapshot]) -> Vec<PositionEvent<'_>> {
        let mut events = Vec::new();
        let held: Vec<HashSet<&str>> = snapshots
            .iter()
            .map(|s| s.positions.iter().map(|p| p.symbol.as_str()).collect())
            .collect();

        let first = &snapshots[0];
        for position in &first.positions {
            events.push(PositionEvent {
                kind: EventKind::Seed,
                symbol: &position.symbol,
                date: first.timestamp,
                snapshot_index: 0,
            });
        }

        for (index, window) in snapshots.windows(2).enumerate() {
            let (before, after) = (&window[0], &window[1]);
            for position in &before.positions {
                if !held[index + 1].contains(position.symbol.as_str()) {
                    events.push(PositionEvent {
                        kind: EventKind::Close,
                        symbol: &position.symbol,
                        date: before.timestamp,
                        snapshot_index: index,
                    });
                }
            }
            for position in &after.positions {
                if !held[index].contains(position.symbol.as_str()) {
                    events.push(PositionEvent {
                        kind: EventKind::Open,
                        symbol: &position.symbol,
                        date: before.timestamp,
                        snapshot_index: index + 1,
                    });
                }
            }
        }

        let last_index = snapshots.len() - 1;
        let last = &snapshots[last_index];
        for position in &last.positions {
            events.push(PositionEvent {
                kind: EventKind::Close,
                symbol: &position.symbol,
                date: last.timestamp,
                snapshot_index: last_index,
            });
        }

        events
    }

    /// Pairs every close with the most recent unconsumed open of its symbol.
    fn pair_events(mut events: Vec<PositionEvent<'_>>) -> Result<Vec<MatchedPair<'_>>> {
        events.sort_by_key(|event| (event.date, event.kind));

        let mut open_stacks: HashMap<&str, Vec<DateTime<Utc>>> = HashMap::new();
        let mut pairs = Vec::new();

        for event in events {
            match event.kind {
                EventKind::Seed | EventKind::Open => {
                    open_stacks.entry(event.symbol).or_default().push(event.date);
                }
                EventKind::Close => {
                    let open_date = open_stacks
                        .get_mut(event.symbol)
                        .and_then(|stack| stack.pop())
                        .ok_or_else(|| TunerError::UnmatchedClose {
                            symbol: event.symbol.to_string(),
                            close_date: event.date,
                        })?;
                    pairs.push(MatchedPair {
                        symbol: event.symbol,
                        open_date,
                        close_date: event.date,
                        snapshot_index: event.snapshot_index,
                    });
                }
            }
        }

        Ok(pairs)
    }
}

/// Stable sort, descending ratio; undefined ratios go last.
fn sort_by_profit_ratio(investments: &mut [Investment]) {
    investments.sort_by(|a, b| match (a.profit_ratio(), b.profit_ratio()) {
        (Some(left), Some(right)) => right.cmp(&left),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Cash, Position};
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn day(offset: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::days(offset)
    }

    fn position(symbol: &str, quantity: Decimal, entry: Decimal, value: Decimal) -> Position {
        Position {
            symbol: symbol.to_string(),
            quantity,
            available_quantity: quantity,
            market_value: value,
            average_entry_price: entry,
        }
    }

    fn snapshot(offset: i64, positions: Vec<Position>) -> PortfolioSnapshot {
        PortfolioSnapshot {
            timestamp: day(offset),
            equity_value: dec!(10000),
            cash: Cash {
                currency: "USD".to_string(),
                available: dec!(5000),
                buying_power: dec!(5000),
            },
            positions,
        }
    }

    #[test]
    fn empty_series_has_no_investments() {
        assert!(InvestmentReconstructor::reconstruct(&[]).unwrap().is_empty());
    }

    #[test]
    fn close_is_attributed_to_snapshot_before_disappearance() {
        let snapshots = vec![
            snapshot(0, vec![position("AAA", dec!(10), dec!(100), dec!(1000))]),
            snapshot(1, vec![position("AAA", dec!(10), dec!(100), dec!(1500))]),
            snapshot(2, vec![]),
        ];

        let investments = InvestmentReconstructor::reconstruct(&snapshots).unwrap();

        assert_eq!(
            investments,
            vec![Investment {
                symbol: "AAA".to_string(),
                open_date: day(0),
                close_date: day(1),
                entry_value: dec!(1000),
                exit_value: dec!(1500),
            }]
        );
        assert_eq!(investments[0].profit_ratio(), Some(dec!(1.5)));
    }

    #[test]
    fn open_is_attributed_to_boundary_before_first_sighting() {
        let snapshots = vec![
            snapshot(0, vec![]),
            snapshot(1, vec![position("BBB", dec!(2), dec!(50), dec!(120))]),
            snapshot(2, vec![position("BBB", dec!(2), dec!(50), dec!(130))]),
        ];

        let investments = InvestmentReconstructor::reconstruct(&snapshots).unwrap();

        assert_eq!(investments.len(), 1);
        assert_eq!(investments[0].open_date, day(0));
        assert_eq!(investments[0].close_date, day(2));
        assert_eq!(investments[0].entry_value, dec!(100));
        assert_eq!(investments[0].exit_value, dec!(130));
    }

    #[test]
    fn series_without_positions_has_no_investments() {
        let snapshots = vec![
            snapshot(0, vec![]),
            snapshot(1, vec![]),
            snapshot(2, vec![]),
        ];
        assert!(InvestmentReconstructor::reconstruct(&snapshots)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn constant_holding_closes_at_final_snapshot() {
        let snapshots = vec![
            snapshot(0, vec![position("AAA", dec!(1), dec!(1), dec!(1))]),
            snapshot(1, vec![position("AAA", dec!(1), dec!(1), dec!(1))]),
            snapshot(2, vec![position("AAA", dec!(1), dec!(1), dec!(1))]),
        ];

        let investments = InvestmentReconstructor::reconstruct(&snapshots).unwrap();

        assert_eq!(investments.len(), 1);
        assert_eq!(investments[0].symbol, "AAA");
        assert_eq!(investments[0].open_date, day(0));
        assert_eq!(investments[0].close_date, day(2));
        assert_eq!(investments[0].entry_value, dec!(1));
        assert_eq!(investments[0].exit_value, dec!(1));
    }

    #[test]
    fn overflowing_entry_value_is_a_validation_error() {
        let huge = Decimal::from(1_000_000_000_000_000u64);
        let snapshots = vec![snapshot(0, vec![position("AAA", huge, huge, dec!(1))])];

        let err = InvestmentReconstructor::reconstruct(&snapshots).unwrap_err();

        match err {
            TunerError::Validation { context, .. } => assert!(context.contains("AAA")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn single_snapshot_yields_zero_length_investments() {
        let snapshots = vec![snapshot(
            0,
            vec![
                position("AAA", dec!(1), dec!(10), dec!(12)),
                position("BBB", dec!(1), dec!(10), dec!(8)),
            ],
        )];

        let investments = InvestmentReconstructor::reconstruct(&snapshots).unwrap();

        assert_eq!(investments.len(), 2);
        for investment in &investments {
            assert_eq!(investment.open_date, investment.close_date);
            assert_eq!(investment.length_days(), Decimal::ZERO);
        }
    }

    #[test]
    fn repeated_cycles_pair_with_nearest_preceding_open() {
        let snapshots = vec![
            snapshot(0, vec![position("AAA", dec!(1), dec!(10), dec!(11))]),
            snapshot(1, vec![]),
            snapshot(2, vec![position("AAA", dec!(1), dec!(20), dec!(30))]),
            snapshot(3, vec![]),
        ];

        let mut investments = InvestmentReconstructor::reconstruct(&snapshots).unwrap();
        investments.sort_by_key(|i| i.close_date);

        assert_eq!(investments.len(), 2);
        assert_eq!(
            (investments[0].open_date, investments[0].close_date),
            (day(0), day(0))
        );
        assert_eq!(
            (investments[1].open_date, investments[1].close_date),
            (day(1), day(2))
        );
        assert!(investments.iter().all(|i| i.open_date <= i.close_date));
    }

    #[test]
    fn orders_by_profit_ratio_and_keeps_close_order_for_ties() {
        let snapshots = vec![
            snapshot(
                0,
                vec![
                    position("AAA", dec!(1), dec!(10), dec!(10)),
                    position("BBB", dec!(1), dec!(10), dec!(10)),
                    position("CCC", dec!(1), dec!(10), dec!(10)),
                ],
            ),
            snapshot(
                1,
                vec![
                    position("BBB", dec!(1), dec!(10), dec!(20)),
                    position("CCC", dec!(1), dec!(10), dec!(30)),
                ],
            ),
            snapshot(2, vec![position("CCC", dec!(2), dec!(10), dec!(40))]),
        ];

        let investments = InvestmentReconstructor::reconstruct(&snapshots).unwrap();
        let symbols: Vec<&str> = investments.iter().map(|i| i.symbol.as_str()).collect();

        // BBB (2.0) and CCC (40 / 20 = 2.0) tie; BBB closed first.
        assert_eq!(symbols, vec!["BBB", "CCC", "AAA"]);
    }

    #[test]
    fn zero_entry_value_sorts_last() {
        let snapshots = vec![snapshot(
            0,
            vec![
                position("FREE", dec!(0), dec!(10), dec!(5)),
                position("LOSS", dec!(1), dec!(10), dec!(5)),
            ],
        )];

        let investments = InvestmentReconstructor::reconstruct(&snapshots).unwrap();
        assert_eq!(investments[0].symbol, "LOSS");
        assert_eq!(investments[1].symbol, "FREE");
    }

    #[test]
    fn close_without_open_is_an_error() {
        let events = vec![PositionEvent {
            kind: EventKind::Close,
            symbol: "AAA",
            date: day(3),
            snapshot_index: 0,
        }];

        let err = InvestmentReconstructor::pair_events(events).unwrap_err();
        assert!(matches!(err, TunerError::UnmatchedClose { ref symbol, .. } if symbol == "AAA"));
    }

    #[test]
    fn rejects_non_increasing_timestamps() {
        let snapshots = vec![snapshot(1, vec![]), snapshot(1, vec![])];
        let err = InvestmentReconstructor::reconstruct(&snapshots).unwrap_err();
        assert!(matches!(err, TunerError::Validation { .. }));
    }

    #[test]
    fn rejects_duplicate_symbols() {
        let snapshots = vec![snapshot(
            0,
            vec![
                position("AAA", dec!(1), dec!(1), dec!(1)),
                position("AAA", dec!(1), dec!(1), dec!(1)),
            ],
        )];
        let err = InvestmentReconstructor::reconstruct(&snapshots).unwrap_err();
        assert!(matches!(err, TunerError::Validation { .. }));
    }
}
