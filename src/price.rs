use crate::config::{PriceConfig, PricingPolicy};
use derive_more::Display;
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::Serialize;

const MIN_SAMPLE: Decimal = Decimal::ONE;
const MAX_SAMPLE: Decimal = dec!(1000000);
const ROBUST_MIN_SAMPLES: usize = 4;

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    #[display("markup")]
    Markup,
    #[display("market")]
    Market,
    #[display("reference")]
    Reference,
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetailPrice {
    pub amount: Decimal,
    pub source: PriceSource,
}

/// Nearest whole value ending with `ending` (`4900 -> 4899`, `7351 -> 7399`).
/// Ties round up.
pub fn round_to_ending(value: Decimal, ending: u32) -> Decimal {
    let value = value.round();
    if value <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let modulus = Decimal::from(10u64.pow(ending.max(1).ilog10() + 1));
    let ending = Decimal::from(ending);
    let upper = (value / modulus).floor() * modulus + ending;
    let lower = upper - modulus;
    if lower > Decimal::ZERO && value - lower < upper - value {
        lower
    } else {
        upper
    }
}

pub fn markup_price(wholesale: Decimal, config: &PriceConfig) -> Decimal {
    round_to_ending(wholesale * config.markup, config.ending)
}

fn median(sorted: &[Decimal]) -> Option<Decimal> {
    let n = sorted.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(sorted[n / 2]),
        _ => Some((sorted[n / 2 - 1] + sorted[n / 2]) / dec!(2)),
    }
}

/// Linear interpolation between closest ranks over `[min, max]`.
fn inclusive_quantile(sorted: &[Decimal], q: Decimal) -> Decimal {
    let pos = q * Decimal::from(sorted.len() - 1);
    let lo = pos.floor();
    let frac = pos - lo;
    let i = lo.to_usize().unwrap_or(0).min(sorted.len() - 1);
    let j = (i + 1).min(sorted.len() - 1);
    sorted[i] + (sorted[j] - sorted[i]) * frac
}

/// Median of the samples left after trimming values outside the
/// `1.5 * IQR` fence; plain median below four samples.
pub fn robust_estimate(samples: &[Decimal]) -> Option<Decimal> {
    let mut sorted = samples
        .iter()
        .copied()
        .filter(|p| *p > MIN_SAMPLE && *p < MAX_SAMPLE)
        .collect::<Vec<_>>();
    sorted.sort();
    if sorted.len() < ROBUST_MIN_SAMPLES {
        return median(&sorted);
    }
    let q1 = inclusive_quantile(&sorted, dec!(0.25));
    let q3 = inclusive_quantile(&sorted, dec!(0.75));
    let fence = (q3 - q1) * dec!(1.5);
    let (low, high) = (q1 - fence, q3 + fence);
    let trimmed = sorted
        .into_iter()
        .filter(|p| *p >= low && *p <= high)
        .collect::<Vec<_>>();
    median(&trimmed)
}

/// Market estimate, never below `wholesale * min_markup`.
pub fn market_price(wholesale: Decimal, samples: &[Decimal], config: &PriceConfig) -> RetailPrice {
    let fallback = RetailPrice {
        amount: markup_price(wholesale, config),
        source: PriceSource::Markup,
    };
    match robust_estimate(samples) {
        Some(estimate) if estimate >= wholesale * config.min_markup => RetailPrice {
            amount: round_to_ending(estimate, config.ending),
            source: PriceSource::Market,
        },
        Some(estimate) => {
            log::debug!("Market estimate {estimate} undercuts wholesale {wholesale}");
            fallback
        }
        None => fallback,
    }
}

/// Retail price for a row. A live wholesale quote always wins over the
/// supplier's reference price; the reference price only anchors rows that
/// carry no wholesale price at all.
pub fn retail_price(
    wholesale: Option<Decimal>,
    reference: Option<Decimal>,
    market_samples: Option<&[Decimal]>,
    config: &PriceConfig,
) -> Option<RetailPrice> {
    let wholesale = wholesale.filter(|p| *p > Decimal::ONE);
    match (wholesale, config.policy, market_samples) {
        (Some(w), PricingPolicy::Market, Some(samples)) => Some(market_price(w, samples, config)),
        (Some(w), _, _) => Some(RetailPrice {
            amount: markup_price(w, config),
            source: PriceSource::Markup,
        }),
        (None, _, samples) => reference
            .map(|r| r - config.reference_discount)
            .filter(|p| *p > Decimal::ZERO)
            .map(|amount| RetailPrice {
                amount,
                source: PriceSource::Reference,
            })
            .or_else(|| {
                let estimate = robust_estimate(samples?)?;
                Some(RetailPrice {
                    amount: round_to_ending(estimate, config.ending),
                    source: PriceSource::Market,
                })
            }),
    }
}

/// Base price to store after seeing `incoming`. Lower offers always win,
/// except that known-brand footwear is never lowered below the plausible
/// floor. A stored price is raised only when it is missing or implausible.
pub fn justified_base_price(
    stored: Decimal,
    incoming: Decimal,
    footwear_guard: bool,
    config: &PriceConfig,
) -> Decimal {
    if incoming <= Decimal::ZERO {
        return stored;
    }
    if stored <= Decimal::ZERO {
        return incoming;
    }
    let floor = if footwear_guard {
        config.footwear_min_price
    } else {
        config.min_plausible_price
    };
    if incoming < stored {
        if footwear_guard && incoming < floor && stored >= floor {
            log::warn!("Ignoring implausible price {incoming} (stored {stored})");
            return stored;
        }
        return incoming;
    }
    if stored < floor {
        return incoming;
    }
    stored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PriceConfig {
        PriceConfig::default()
    }

    #[test]
    fn rounds_to_nearest_ending() {
        assert_eq!(dec!(4899), round_to_ending(dec!(4900), 99));
        assert_eq!(dec!(7399), round_to_ending(dec!(7351), 99));
        assert_eq!(dec!(7299), round_to_ending(dec!(7340.4), 99));
        assert_eq!(dec!(99), round_to_ending(dec!(12), 99));
        assert_eq!(dec!(1249), round_to_ending(dec!(1251), 9));
        assert_eq!(Decimal::ZERO, round_to_ending(Decimal::ZERO, 99));
    }

    #[test]
    fn applies_markup() {
        assert_eq!(dec!(7399), markup_price(dec!(4900), &config()));
    }

    #[test]
    fn robust_estimate_ignores_outliers() {
        let cluster = [dec!(5200), dec!(5400), dec!(5000), dec!(5600), dec!(5300), dec!(5500)];
        let mut samples = cluster.to_vec();
        samples.extend([dec!(54000), dec!(99000), dec!(1), dec!(2000000)]);
        let estimate = robust_estimate(&samples).unwrap();
        let mut sorted = cluster.to_vec();
        sorted.sort();
        let q1 = inclusive_quantile(&sorted, dec!(0.25));
        let q3 = inclusive_quantile(&sorted, dec!(0.75));
        let fence = (q3 - q1) * dec!(1.5);
        assert!(estimate >= q1 - fence && estimate <= q3 + fence, "{estimate}");
    }

    #[test]
    fn small_samples_use_median() {
        assert_eq!(Some(dec!(200)), robust_estimate(&[dec!(100), dec!(200), dec!(9000)]));
        assert_eq!(Some(dec!(150)), robust_estimate(&[dec!(100), dec!(200)]));
        assert_eq!(None, robust_estimate(&[dec!(0.5), dec!(1)]));
    }

    #[test]
    fn computes_inclusive_quartiles() {
        let sorted = [dec!(1), dec!(2), dec!(3), dec!(4), dec!(5)];
        assert_eq!(dec!(2), inclusive_quantile(&sorted, dec!(0.25)));
        assert_eq!(dec!(4), inclusive_quantile(&sorted, dec!(0.75)));
        let sorted = [dec!(10), dec!(20), dec!(30), dec!(40)];
        assert_eq!(dec!(17.5), inclusive_quantile(&sorted, dec!(0.25)));
    }

    #[test]
    fn market_price_respects_markup_floor() {
        let cfg = config();
        let low = market_price(dec!(4900), &[dec!(5000), dec!(5100), dec!(4950), dec!(5050)], &cfg);
        assert_eq!(PriceSource::Markup, low.source);
        assert_eq!(dec!(7399), low.amount);
        let ok = market_price(dec!(4000), &[dec!(6000), dec!(6100), dec!(5950), dec!(6050)], &cfg);
        assert_eq!(PriceSource::Market, ok.source);
        assert_eq!(dec!(5999), ok.amount);
    }

    #[test]
    fn wholesale_wins_over_reference() {
        let cfg = config();
        let price = retail_price(Some(dec!(4900)), Some(dec!(9000)), None, &cfg).unwrap();
        assert_eq!(PriceSource::Markup, price.source);
        assert_eq!(dec!(7399), price.amount);

        let price = retail_price(None, Some(dec!(9000)), None, &cfg).unwrap();
        assert_eq!(PriceSource::Reference, price.source);
        assert_eq!(dec!(8900), price.amount);

        let price = retail_price(None, None, Some(&[dec!(3000), dec!(3100)]), &cfg).unwrap();
        assert_eq!(PriceSource::Market, price.source);
        assert_eq!(None, retail_price(None, None, None, &cfg));
    }

    #[test]
    fn market_policy_uses_samples() {
        let cfg = PriceConfig {
            policy: PricingPolicy::Market,
            ..config()
        };
        let samples = [dec!(6000), dec!(6100), dec!(5950), dec!(6050)];
        let price = retail_price(Some(dec!(4000)), Some(dec!(9000)), Some(&samples), &cfg).unwrap();
        assert_eq!(PriceSource::Market, price.source);
        let price = retail_price(Some(dec!(4000)), None, None, &cfg).unwrap();
        assert_eq!(PriceSource::Markup, price.source);
    }

    #[test]
    fn base_price_prefers_lower_offers() {
        let cfg = config();
        assert_eq!(dec!(6999), justified_base_price(dec!(7399), dec!(6999), false, &cfg));
        assert_eq!(dec!(7399), justified_base_price(dec!(7399), dec!(7999), false, &cfg));
        assert_eq!(dec!(7399), justified_base_price(Decimal::ZERO, dec!(7399), false, &cfg));
        assert_eq!(dec!(7399), justified_base_price(dec!(7399), Decimal::ZERO, false, &cfg));
    }

    #[test]
    fn footwear_guard_blocks_implausible_prices() {
        let cfg = config();
        assert_eq!(dec!(5999), justified_base_price(dec!(5999), dec!(299), true, &cfg));
        assert_eq!(dec!(299), justified_base_price(dec!(5999), dec!(299), false, &cfg));
        assert_eq!(dec!(5999), justified_base_price(dec!(299), dec!(5999), true, &cfg));
    }

    #[test]
    fn cheap_offers_lower_non_footwear() {
        let cfg = config();
        assert_eq!(dec!(5), justified_base_price(dec!(300), dec!(5), false, &cfg));
        assert_eq!(dec!(300), justified_base_price(dec!(5), dec!(300), false, &cfg));
    }
}
