use crate::error::Result;
use crate::investments::InvestmentReconstructor;
use crate::models::*;
use rust_decimal::Decimal;

pub struct BacktestAnalyzer;

impl BacktestAnalyzer {
    pub fn analyze(snapshots: Vec<PortfolioSnapshot>) -> Result<BacktestAnalysis> {
        let investments = InvestmentReconstructor::reconstruct(&snapshots)?;
        let investment_count = investments.len();

        let lengths: Vec<Decimal> = investments.iter().map(Investment::length_days).collect();
        let avg_investment_length_days = Self::average(&lengths);

        let positive = investments.iter().filter(|i| i.is_profitable()).count();
        let positive_investment_ratio = if investment_count > 0 {
            Decimal::from(positive as u64) / Decimal::from(investment_count as u64)
        } else {
            Decimal::ZERO
        };

        Ok(BacktestAnalysis {
            total_return: Self::calculate_total_return(&snapshots),
            investment_count,
            avg_investment_length_days,
            positive_investment_ratio,
            investments,
            snapshots,
        })
    }

    /// Relative equity change between the first and last snapshot.
    pub fn calculate_total_return(snapshots: &[PortfolioSnapshot]) -> Option<Decimal> {
        let first = snapshots.first()?;
        let last = snapshots.last()?;
        let ratio = last.equity_value.checked_div(first.equity_value)?;
        Some(ratio - Decimal::ONE)
    }

    fn average(values: &[Decimal]) -> Decimal {
        if values.is_empty() {
            return Decimal::ZERO;
        }
        let sum: Decimal = values.iter().copied().sum();
        sum / Decimal::from(values.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn day(offset: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap() + Duration::days(offset)
    }

    fn position(symbol: &str, entry: Decimal, value: Decimal) -> Position {
        Position {
            symbol: symbol.to_string(),
            quantity: dec!(1),
            available_quantity: dec!(1),
            market_value: value,
            average_entry_price: entry,
        }
    }

    fn snapshot(offset: i64, equity: Decimal, positions: Vec<Position>) -> PortfolioSnapshot {
        PortfolioSnapshot {
            timestamp: day(offset),
            equity_value: equity,
            cash: Cash {
                currency: "USD".to_string(),
                available: equity,
                buying_power: equity,
            },
            positions,
        }
    }

    #[test]
    fn empty_series_reports_no_return() {
        let analysis = BacktestAnalyzer::analyze(Vec::new()).unwrap();

        assert_eq!(analysis.total_return, None);
        assert_eq!(analysis.investment_count, 0);
        assert_eq!(analysis.avg_investment_length_days, Decimal::ZERO);
        assert_eq!(analysis.positive_investment_ratio, Decimal::ZERO);
    }

    #[test]
    fn single_snapshot_has_zero_return_and_zero_length_investments() {
        let analysis = BacktestAnalyzer::analyze(vec![snapshot(
            0,
            dec!(1000),
            vec![
                position("AAA", dec!(10), dec!(11)),
                position("BBB", dec!(10), dec!(9)),
                position("CCC", dec!(10), dec!(10)),
            ],
        )])
        .unwrap();

        assert_eq!(analysis.total_return, Some(Decimal::ZERO));
        assert_eq!(analysis.investment_count, 3);
        assert_eq!(analysis.avg_investment_length_days, Decimal::ZERO);
        // Only AAA is strictly above break-even.
        assert_eq!(analysis.positive_investment_ratio, dec!(1) / dec!(3));
    }

    #[test]
    fn aggregates_lengths_and_ratios() {
        let snapshots = vec![
            snapshot(0, dec!(1000), vec![position("AAA", dec!(10), dec!(10))]),
            snapshot(
                1,
                dec!(1050),
                vec![
                    position("AAA", dec!(10), dec!(15)),
                    position("BBB", dec!(20), dec!(20)),
                ],
            ),
            snapshot(2, dec!(1100), vec![position("BBB", dec!(20), dec!(18))]),
            snapshot(5, dec!(1200), vec![]),
        ];

        let analysis = BacktestAnalyzer::analyze(snapshots).unwrap();

        assert_eq!(analysis.total_return, Some(dec!(0.2)));
        assert_eq!(analysis.investment_count, 2);
        // AAA: day 0 -> day 1, BBB: day 0 -> day 2.
        assert_eq!(analysis.avg_investment_length_days, dec!(1.5));
        assert_eq!(analysis.positive_investment_ratio, dec!(0.5));
        assert_eq!(analysis.investments[0].symbol, "AAA");
        assert_eq!(analysis.snapshots.len(), 4);
    }

    #[test]
    fn zero_starting_equity_has_no_return() {
        let snapshots = vec![
            snapshot(0, dec!(0), vec![]),
            snapshot(1, dec!(100), vec![]),
        ];
        assert_eq!(BacktestAnalyzer::calculate_total_return(&snapshots), None);
    }
}
