//! Ladder construction: book cleaning, spread crossing, and the
//! depth-weighted order generator. Everything here is pure — the Maker
//! owns the I/O.

use std::cmp::Ordering;
use std::collections::VecDeque;

use crate::core::{BookLevel, DesiredOrder, LiveOrder, PriceTick};

/// Residual volume below this is treated as dust and dropped.
pub const DUST_EPSILON: f64 = 1e-3;

/// Weight bias applied to each level's cumulative depth.
const SHARE_BIAS: f64 = 11.0 / 6.0;

/// Subtract the agent's own resting volume from the public book.
/// A level whose residual falls under the dust threshold disappears.
pub fn ignore_mine(book: &[BookLevel], mine: &[LiveOrder]) -> Vec<BookLevel> {
    book.iter()
        .filter_map(|level| {
            let own: f64 = mine
                .iter()
                .filter(|o| o.price == level.price)
                .map(|o| o.volume)
                .sum();
            let residual = level.volume - own;
            (residual >= DUST_EPSILON).then_some(BookLevel { price: level.price, volume: residual })
        })
        .collect()
}

/// Gross margin of buying at `bid` and selling at `ask`, net of the fee
/// (in percent). > 1 means the pair of quotes is profitable.
pub fn profit_margin(bid: PriceTick, ask: PriceTick, fee_pct: f64) -> f64 {
    (ask.0 as f64 / bid.0 as f64) * (1.0 - fee_pct / 100.0)
}

/// Eat the tops of the cleaned sides until quoting one tick inside the
/// remaining spread clears the fee. The side with the smaller top volume
/// is consumed first; an exact tie drops both tops.
pub fn cross_spread(
    bids: Vec<BookLevel>,
    asks: Vec<BookLevel>,
    fee_pct: f64,
) -> (Vec<BookLevel>, Vec<BookLevel>) {
    let mut bids: VecDeque<BookLevel> = bids.into();
    let mut asks: VecDeque<BookLevel> = asks.into();

    while let (Some(bid), Some(ask)) = (bids.front(), asks.front()) {
        if profit_margin(bid.price.offset(1), ask.price.offset(-1), fee_pct) > 1.0 {
            break;
        }
        match bid.volume.partial_cmp(&ask.volume) {
            Some(Ordering::Less) => {
                bids.pop_front();
            }
            Some(Ordering::Greater) => {
                asks.pop_front();
            }
            _ => {
                bids.pop_front();
                asks.pop_front();
            }
        }
    }
    (bids.into(), asks.into())
}

/// Generate one side's ladder from the cleaned book.
///
/// Walks the side until the cumulative volume covers `resilience` (or the
/// side runs out), weights each level by its biased cumulative depth,
/// keeps the inside level plus the heaviest of the rest up to
/// `max_orders`, and splits `funds` proportionally. Each order lands one
/// tick inside its level (`delta` = +1 for bids, -1 for asks). The result
/// comes back sorted inward-out: descending for bids, ascending for asks.
pub fn dumbot_oneside(
    levels: &[BookLevel],
    resilience: f64,
    funds: f64,
    delta: i64,
    max_orders: usize,
) -> Vec<DesiredOrder> {
    if levels.is_empty() || funds <= 0.0 || max_orders == 0 {
        return vec![];
    }

    let mut cumulative = 0.0;
    let mut weighted: Vec<(PriceTick, f64)> = Vec::new();
    for level in levels {
        cumulative += level.volume;
        weighted.push((level.price, SHARE_BIAS * cumulative));
        if cumulative >= resilience {
            break;
        }
    }

    // The inside level always quotes; the tail competes on share.
    let head = weighted[0];
    let mut tail: Vec<(PriceTick, f64)> = weighted[1..].to_vec();
    tail.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    tail.truncate(max_orders.min(weighted.len()).saturating_sub(1));

    let mut relevant = vec![head];
    relevant.extend(tail);
    let total_share: f64 = relevant.iter().map(|(_, share)| share).sum();

    let mut orders: Vec<DesiredOrder> = relevant
        .into_iter()
        .map(|(price, share)| DesiredOrder {
            amount: funds * share / total_share,
            price: price.offset(delta),
        })
        .collect();

    if delta > 0 {
        orders.sort_by(|a, b| b.price.cmp(&a.price));
    } else {
        orders.sort_by(|a, b| a.price.cmp(&b.price));
    }
    orders
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(price: i64, volume: f64) -> BookLevel {
        BookLevel { price: PriceTick(price), volume }
    }

    fn live(price: i64, volume: f64) -> LiveOrder {
        LiveOrder { oid: format!("O-{}", price), price: PriceTick(price), volume }
    }

    #[test]
    fn test_ignore_mine_empty_book() {
        assert_eq!(ignore_mine(&[], &[live(100, 1.0)]), vec![]);
    }

    #[test]
    fn test_ignore_mine_exact_match_is_dust() {
        // Residual 0.0005 < epsilon: the level disappears.
        assert_eq!(ignore_mine(&[level(100, 2.0)], &[live(100, 1.9995)]), vec![]);
    }

    #[test]
    fn test_ignore_mine_partial_match() {
        let cleaned = ignore_mine(&[level(100, 2.0), level(99, 1.0)], &[live(100, 0.5)]);
        assert_eq!(cleaned, vec![level(100, 1.5), level(99, 1.0)]);
    }

    #[test]
    fn test_ignore_mine_residual_never_negative() {
        // Own volume exceeding the public level drops it outright.
        assert_eq!(ignore_mine(&[level(100, 1.0)], &[live(100, 3.0)]), vec![]);
    }

    #[test]
    fn test_profit_margin() {
        // 102/100 gross, 0.2% fee: 1.02 * 0.998 > 1.
        assert!(profit_margin(PriceTick(100), PriceTick(102), 0.2) > 1.0);
        assert!(profit_margin(PriceTick(100), PriceTick(100), 0.2) < 1.0);
    }

    #[test]
    fn test_cross_spread_leaves_profitable_book_alone() {
        let bids = vec![level(10000, 1.0), level(9990, 2.0)];
        let asks = vec![level(10100, 1.0), level(10110, 2.0)];
        let (b, a) = cross_spread(bids.clone(), asks.clone(), 0.2);
        assert_eq!(b, bids);
        assert_eq!(a, asks);
    }

    #[test]
    fn test_cross_spread_eats_smaller_top() {
        // Tight spread: margin(10001, 10001, fee) <= 1, bid top is smaller.
        let bids = vec![level(10000, 0.5), level(9000, 5.0)];
        let asks = vec![level(10002, 2.0), level(11000, 5.0)];
        let (b, a) = cross_spread(bids, asks, 0.2);
        assert_eq!(b[0], level(9000, 5.0));
        // After the bid top is gone the spread is wide enough.
        assert_eq!(a[0], level(10002, 2.0));
    }

    #[test]
    fn test_cross_spread_tie_drops_both() {
        let bids = vec![level(10000, 1.0), level(9000, 5.0)];
        let asks = vec![level(10002, 1.0), level(11000, 5.0)];
        let (b, a) = cross_spread(bids, asks, 0.2);
        assert_eq!(b[0], level(9000, 5.0));
        assert_eq!(a[0], level(11000, 5.0));
    }

    #[test]
    fn test_dumbot_respects_max_orders() {
        let side: Vec<BookLevel> = (0..10).map(|i| level(10000 - i, 1.0)).collect();
        let orders = dumbot_oneside(&side, 100.0, 50.0, 1, 4);
        assert_eq!(orders.len(), 4);
    }

    #[test]
    fn test_dumbot_allocates_all_funds() {
        let side: Vec<BookLevel> = (0..6).map(|i| level(10000 - i, 0.5 + i as f64)).collect();
        let orders = dumbot_oneside(&side, 100.0, 75.0, 1, 5);
        let allocated: f64 = orders.iter().map(|o| o.amount).sum();
        assert!((allocated - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_dumbot_prices_are_one_tick_inside() {
        let side = vec![level(10000, 1.0), level(9999, 1.0), level(9998, 5.0)];
        let orders = dumbot_oneside(&side, 100.0, 30.0, 1, 3);
        let inputs: Vec<i64> = side.iter().map(|l| l.price.0).collect();
        for o in &orders {
            assert!(inputs.contains(&(o.price.0 - 1)));
        }
        // Bids come back descending.
        assert!(orders.windows(2).all(|w| w[0].price > w[1].price));
    }

    #[test]
    fn test_dumbot_keeps_inside_level() {
        // Tiny head volume: its share is the smallest, yet it must quote.
        let side = vec![level(10000, 0.01), level(9999, 10.0), level(9998, 20.0)];
        let orders = dumbot_oneside(&side, 100.0, 30.0, 1, 2);
        assert_eq!(orders.len(), 2);
        assert!(orders.iter().any(|o| o.price == PriceTick(10001)));
    }

    #[test]
    fn test_dumbot_stops_at_resilience() {
        // Cumulative reaches 3.0 at the second level; deeper ones ignored.
        let side = vec![level(10000, 1.0), level(9999, 2.0), level(9998, 50.0)];
        let orders = dumbot_oneside(&side, 3.0, 30.0, 1, 5);
        assert_eq!(orders.len(), 2);
        assert!(orders.iter().all(|o| o.price != PriceTick(9999)));
    }

    #[test]
    fn test_dumbot_ask_side_sorts_ascending() {
        let side = vec![level(10100, 1.0), level(10101, 2.0), level(10102, 3.0)];
        let orders = dumbot_oneside(&side, 100.0, 10.0, -1, 3);
        assert!(orders.windows(2).all(|w| w[0].price < w[1].price));
        assert!(orders.iter().any(|o| o.price == PriceTick(10099)));
    }

    #[test]
    fn test_dumbot_empty_inputs() {
        assert!(dumbot_oneside(&[], 10.0, 10.0, 1, 5).is_empty());
        assert!(dumbot_oneside(&[level(1, 1.0)], 10.0, 0.0, 1, 5).is_empty());
        assert!(dumbot_oneside(&[level(1, 1.0)], 10.0, 10.0, 1, 0).is_empty());
    }
}
