//! Picks one trustworthy price out of the quotes the feeds returned.
//!
//! Everything here is a pure function of the quote list; feed order matters,
//! index 0 is the main feed and the rest are backups in configured order.

use serde::Serialize;

use crate::{errors::Rejection, peg::pricing::percentage_distance, types::PriceQuote};

/// Accepted quote plus every quote it was chosen from.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Consensus {
    pub accepted: PriceQuote,
    pub quotes: Vec<PriceQuote>,
}

impl Consensus {
    pub fn price(&self) -> f64 {
        self.accepted.price
    }
}

/// `round(|a-b| * 100 / a, 4) <= threshold`. Not symmetric: `a` is the base.
pub fn close_enough(a: f64, b: f64, threshold: f64) -> bool {
    percentage_distance(a, b) <= threshold
}

/// Does `quotes[idx]` agree with enough of the other quotes?
///
/// With `k` others it needs more than `k/2` agreements when `k` is odd and at
/// least `k/2` when `k` is even.
pub fn majority_agrees(quotes: &[PriceQuote], idx: usize, threshold: f64) -> bool {
    let Some(candidate) = quotes.get(idx) else {
        return false;
    };
    let others = quotes.len() - 1;
    if others == 0 {
        return false;
    }
    let agreements = quotes
        .iter()
        .enumerate()
        .filter(|(i, quote)| *i != idx && close_enough(candidate.price, quote.price, threshold))
        .count();
    if others % 2 == 0 {
        agreements >= others / 2
    } else {
        agreements > others / 2
    }
}

fn first_agreeing_backup(quotes: &[PriceQuote], threshold: f64) -> Option<usize> {
    (1..quotes.len()).find(|&idx| majority_agrees(quotes, idx, threshold))
}

/// Runs one round of the consensus rules over `quotes`.
///
/// `configured_feeds` is the number of feeds polled; fewer quotes means some
/// feeds failed this cycle, in which case the main is not tested on its own.
pub fn select(
    quotes: Vec<PriceQuote>,
    configured_feeds: usize,
    threshold: f64,
) -> Result<Consensus, Rejection> {
    let received = quotes.len();
    if received < 2 {
        return Err(Rejection::TooFewQuotes { received });
    }

    let picked = if received == configured_feeds {
        if majority_agrees(&quotes, 0, threshold) {
            Some(0)
        } else {
            first_agreeing_backup(&quotes, threshold)
        }
    } else if received > 2 {
        first_agreeing_backup(&quotes, threshold)
    } else {
        None
    };

    let idx = match picked {
        Some(idx) => idx,
        None if close_enough(quotes[0].price, quotes[1].price, threshold) => 0,
        None if received == 2 => return Err(Rejection::PairDisagrees),
        None => return Err(Rejection::NoMajority { received }),
    };

    Ok(Consensus {
        accepted: quotes[idx].clone(),
        quotes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Currency, CurrencyPair};

    fn quotes(prices: &[f64]) -> Vec<PriceQuote> {
        let pair = CurrencyPair::new(Currency::crypto("btc"), Currency::fiat("usd"));
        prices
            .iter()
            .enumerate()
            .map(|(i, p)| PriceQuote::new(format!("feed{}", i), pair.clone(), *p))
            .collect()
    }

    #[test]
    fn close_enough_uses_four_decimal_percentage() {
        assert!(close_enough(100.0, 100.5, 1.0));
        assert!(close_enough(100.0, 101.0, 1.0));
        assert!(!close_enough(100.0, 102.0, 1.0));
        assert!(close_enough(100.0, 100.00004, 0.0));
    }

    #[test]
    fn main_wins_when_backed_by_majority() {
        let c = select(quotes(&[1.0, 1.001, 1.002]), 3, 1.0).unwrap();
        assert_eq!(c.accepted.source, "feed0");
        assert_eq!(c.quotes.len(), 3);
    }

    #[test]
    fn outlier_main_falls_back_to_first_agreeing_backup() {
        let c = select(quotes(&[1.10, 1.01, 1.0105, 1.009]), 4, 1.0).unwrap();
        assert_eq!(c.accepted.source, "feed1");
        assert_eq!(c.price(), 1.01);
    }

    #[test]
    fn reference_rounds() {
        // (quotes, threshold, accepted source, accepted price)
        let cases: [(&[f64], f64, &str, f64); 2] = [
            (&[1.00, 1.00, 1.01, 0.50], 2.0, "feed0", 1.00),
            (&[1.00, 1.01, 1.011, 1.009], 0.5, "feed1", 1.01),
        ];
        for (prices, threshold, source, price) in cases {
            let c = select(quotes(prices), prices.len(), threshold).unwrap();
            assert_eq!(c.accepted.source, source, "quotes {:?}", prices);
            assert_eq!(c.price(), price);
        }
    }

    #[test]
    fn backup_tie_break_is_list_order_not_best() {
        // feed1 and feed2 both pass; feed2 is closer to the median but feed1 comes first.
        let c = select(quotes(&[2.0, 1.0, 1.005, 1.006]), 4, 1.0).unwrap();
        assert_eq!(c.accepted.source, "feed1");
    }

    #[test]
    fn two_quotes_within_threshold_accept_main() {
        let c = select(quotes(&[1.0, 1.005]), 3, 1.0).unwrap();
        assert_eq!(c.accepted.source, "feed0");
    }

    #[test]
    fn two_quotes_outside_threshold_reject() {
        assert_eq!(
            select(quotes(&[1.0, 1.05]), 3, 1.0),
            Err(Rejection::PairDisagrees)
        );
        assert_eq!(
            select(quotes(&[1.0, 1.05]), 2, 1.0),
            Err(Rejection::PairDisagrees)
        );
    }

    #[test]
    fn fewer_than_two_quotes_reject() {
        assert_eq!(
            select(quotes(&[1.0]), 3, 1.0),
            Err(Rejection::TooFewQuotes { received: 1 })
        );
        assert_eq!(
            select(Vec::new(), 3, 1.0),
            Err(Rejection::TooFewQuotes { received: 0 })
        );
    }

    #[test]
    fn partial_response_skips_main_test() {
        // with every feed answering the main would pass against half of the others
        let full = select(quotes(&[1.0, 1.005, 1.5]), 3, 1.0).unwrap();
        assert_eq!(full.accepted.source, "feed0");
        let partial = select(quotes(&[1.0, 1.005, 1.5]), 4, 1.0).unwrap();
        assert_eq!(partial.accepted.source, "feed1");
    }

    #[test]
    fn total_disagreement_falls_back_to_first_pair() {
        let c = select(quotes(&[1.0, 1.005, 1.5, 2.0, 3.0]), 5, 1.0).unwrap();
        assert_eq!(c.accepted.source, "feed0");

        assert_eq!(
            select(quotes(&[1.0, 1.5, 2.0]), 3, 1.0),
            Err(Rejection::NoMajority { received: 3 })
        );
    }

    #[test]
    fn majority_test_parity() {
        // one other: must agree with it
        assert!(majority_agrees(&quotes(&[1.0, 1.001]), 0, 1.0));
        assert!(!majority_agrees(&quotes(&[1.0, 1.5]), 0, 1.0));
        // two others: half is enough
        assert!(majority_agrees(&quotes(&[1.0, 1.001, 1.5]), 0, 1.0));
        // three others: needs two
        assert!(!majority_agrees(&quotes(&[1.0, 1.001, 1.5, 1.6]), 0, 1.0));
        assert!(majority_agrees(&quotes(&[1.0, 1.001, 1.002, 1.6]), 0, 1.0));
    }
}
