//! Synthetic Quote Generator
//!
//! Produces a structurally valid quote when no real source can serve a key,
//! so the dashboard never renders a blank row.
//!
//! Output is a pure function of `(seed, key, base price, whole second of
//! the timestamp)`. Two calls with the same inputs return the same quote.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

use crate::domain::instrument::InstrumentKey;
use crate::domain::quote::{Quote, QuoteSource};

/// Half-spread applied around the synthetic price, in basis points.
const HALF_SPREAD_BPS: i64 = 5;

/// Basis points per unit.
const BPS: i64 = 10_000;

/// Largest perturbation the generator will apply, in basis points.
pub const MAX_PERTURBATION_BPS: u32 = 5_000;

/// Smallest price the generator emits.
const MIN_PRICE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Synthetic generation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyntheticError {
    /// The base price is zero or negative.
    #[error("invalid base price {price} for {key}")]
    InvalidBasePrice {
        /// Instrument.
        key: InstrumentKey,
        /// Offending price.
        price: Decimal,
    },
    /// Neither a previous price nor a default is available.
    #[error("no reference price for {0}")]
    NoReferencePrice(InstrumentKey),
    /// The perturbed price does not fit in a decimal.
    #[error("synthetic price for {key} overflows from base {price}")]
    Overflow {
        /// Instrument.
        key: InstrumentKey,
        /// Base price.
        price: Decimal,
    },
}

/// Configuration for the synthetic generator.
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Generator seed.
    pub seed: u64,
    /// Maximum absolute perturbation from the base price, in basis points.
    /// Capped at [`MAX_PERTURBATION_BPS`].
    pub max_perturbation_bps: u32,
    /// Base used when the caller has no price for the key. `None` disables it.
    pub default_price: Option<Decimal>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            max_perturbation_bps: 50,
            default_price: Some(Decimal::from(100)),
        }
    }
}

/// Deterministic quote generator.
#[derive(Debug, Clone)]
pub struct SyntheticGenerator {
    config: SyntheticConfig,
}

impl SyntheticGenerator {
    /// Create a generator.
    #[must_use]
    pub const fn new(config: SyntheticConfig) -> Self {
        Self { config }
    }

    /// Generate a quote for `key` near `base` (or the configured default).
    ///
    /// # Errors
    ///
    /// Returns [`SyntheticError::NoReferencePrice`] if neither `base` nor a
    /// default price is available, [`SyntheticError::InvalidBasePrice`] if
    /// the chosen base is not positive, and [`SyntheticError::Overflow`] if
    /// the base is too large to perturb.
    pub fn generate(
        &self,
        key: &InstrumentKey,
        base: Option<Decimal>,
        at: DateTime<Utc>,
    ) -> Result<Quote, SyntheticError> {
        let base = base
            .or(self.config.default_price)
            .ok_or_else(|| SyntheticError::NoReferencePrice(key.clone()))?;
        if base <= Decimal::ZERO {
            return Err(SyntheticError::InvalidBasePrice {
                key: key.clone(),
                price: base,
            });
        }

        let mut rng = StdRng::seed_from_u64(self.seed_for(key, at));
        let max = i64::from(self.config.max_perturbation_bps.min(MAX_PERTURBATION_BPS));
        let bps = if max == 0 { 0 } else { rng.random_range(-max..=max) };

        let overflow = || SyntheticError::Overflow {
            key: key.clone(),
            price: base,
        };
        let factor = Decimal::new(BPS + bps, 4);
        let last_price = base
            .checked_mul(factor)
            .ok_or_else(overflow)?
            .round_dp(2)
            .max(MIN_PRICE);
        let half_spread = last_price
            .checked_mul(Decimal::new(HALF_SPREAD_BPS, 4))
            .ok_or_else(overflow)?
            .round_dp(2);

        Ok(Quote {
            key: key.clone(),
            last_price,
            bid: Some(last_price - half_spread),
            ask: Some(last_price + half_spread),
            volume: None,
            open_interest: None,
            observed_at: at,
            exchange_time: None,
            source: QuoteSource::Synthetic,
        })
    }

    /// Mix seed, key and second-resolution time into one RNG seed (FNV-1a).
    fn seed_for(&self, key: &InstrumentKey, at: DateTime<Utc>) -> u64 {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0100_0000_01b3;

        let second = at.timestamp();
        let mut hash = OFFSET;
        let bytes = self
            .config
            .seed
            .to_le_bytes()
            .into_iter()
            .chain(key.to_string().into_bytes())
            .chain(second.to_le_bytes());
        for byte in bytes {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(PRIME);
        }
        hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn same_inputs_same_quote() {
        let generator = SyntheticGenerator::new(SyntheticConfig::default());
        let key = InstrumentKey::nse("SBIN");
        let a = generator.generate(&key, Some(Decimal::from(600)), at(0)).unwrap();
        let b = generator.generate(&key, Some(Decimal::from(600)), at(0)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.source, QuoteSource::Synthetic);
    }

    #[test]
    fn sub_second_offsets_do_not_change_output() {
        let generator = SyntheticGenerator::new(SyntheticConfig::default());
        let key = InstrumentKey::nse("SBIN");
        let t = at(5);
        let a = generator.generate(&key, Some(Decimal::from(600)), t).unwrap();
        let b = generator
            .generate(&key, Some(Decimal::from(600)), t + chrono::Duration::milliseconds(400))
            .unwrap();
        assert_eq!(a.last_price, b.last_price);
    }

    #[test]
    fn different_seed_changes_sequence() {
        let key = InstrumentKey::nse("SBIN");
        let prices: Vec<Decimal> = (0..20)
            .map(|s| {
                SyntheticGenerator::new(SyntheticConfig {
                    seed: s,
                    ..SyntheticConfig::default()
                })
                .generate(&key, Some(Decimal::from(600)), at(0))
                .unwrap()
                .last_price
            })
            .collect();
        assert!(prices.iter().any(|p| *p != prices[0]));
    }

    #[test]
    fn falls_back_to_default_price() {
        let generator = SyntheticGenerator::new(SyntheticConfig {
            max_perturbation_bps: 0,
            ..SyntheticConfig::default()
        });
        let quote = generator.generate(&InstrumentKey::nse("NEW"), None, at(0)).unwrap();
        assert_eq!(quote.last_price, Decimal::from(100));
        assert_eq!(quote.bid, Some(Decimal::new(9995, 2)));
        assert_eq!(quote.ask, Some(Decimal::new(10005, 2)));
    }

    #[test]
    fn no_reference_price_is_an_error() {
        let generator = SyntheticGenerator::new(SyntheticConfig {
            default_price: None,
            ..SyntheticConfig::default()
        });
        let key = InstrumentKey::nse("NEW");
        assert_eq!(
            generator.generate(&key, None, at(0)),
            Err(SyntheticError::NoReferencePrice(key))
        );
    }

    #[test]
    fn non_positive_base_is_an_error() {
        let generator = SyntheticGenerator::new(SyntheticConfig::default());
        let result = generator.generate(&InstrumentKey::nse("SBIN"), Some(Decimal::ZERO), at(0));
        assert!(matches!(result, Err(SyntheticError::InvalidBasePrice { .. })));
    }

    #[test]
    fn oversized_perturbation_is_capped() {
        let generator = SyntheticGenerator::new(SyntheticConfig {
            max_perturbation_bps: 30_000,
            ..SyntheticConfig::default()
        });
        let key = InstrumentKey::nse("SBIN");
        let base = Decimal::from(750);
        let floor = base / Decimal::TWO;
        for secs in 0..200 {
            let quote = generator.generate(&key, Some(base), at(secs)).unwrap();
            assert!(quote.last_price >= floor, "{} at {secs}s", quote.last_price);
            assert!(quote.last_price <= base + floor);
            assert!(quote.bid.unwrap() <= quote.ask.unwrap());
            assert!(quote.bid.unwrap() >= Decimal::ZERO);
        }
    }

    #[test]
    fn huge_base_overflows_without_panicking() {
        let generator = SyntheticGenerator::new(SyntheticConfig {
            max_perturbation_bps: MAX_PERTURBATION_BPS,
            ..SyntheticConfig::default()
        });
        let key = InstrumentKey::nse("SBIN");
        let results: Vec<_> = (0..50)
            .map(|secs| generator.generate(&key, Some(Decimal::MAX), at(secs)))
            .collect();
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(SyntheticError::Overflow { .. })))
        );
        for quote in results.into_iter().flatten() {
            assert!(quote.last_price > Decimal::ZERO);
        }
    }

    #[test]
    fn tiny_base_keeps_a_positive_price() {
        let generator = SyntheticGenerator::new(SyntheticConfig {
            max_perturbation_bps: MAX_PERTURBATION_BPS,
            ..SyntheticConfig::default()
        });
        let quote = generator
            .generate(&InstrumentKey::nse("PENNY"), Some(Decimal::new(1, 3)), at(0))
            .unwrap();
        assert_eq!(quote.last_price, Decimal::new(1, 2));
        assert!(quote.bid.unwrap() >= Decimal::ZERO);
    }

    proptest! {
        #[test]
        fn perturbation_is_bounded(
            seed in any::<u64>(),
            base in 1i64..100_000,
            secs in 0i64..86_400,
            max_bps in 0u32..500,
        ) {
            let generator = SyntheticGenerator::new(SyntheticConfig {
                seed,
                max_perturbation_bps: max_bps,
                default_price: None,
            });
            let base = Decimal::from(base);
            let quote = generator
                .generate(&InstrumentKey::nse("SBIN"), Some(base), at(secs))
                .unwrap();

            let bound = base * Decimal::from(max_bps) / Decimal::from(BPS) + Decimal::new(1, 2);
            prop_assert!((quote.last_price - base).abs() <= bound);
            prop_assert!(quote.bid.unwrap() <= quote.last_price);
            prop_assert!(quote.ask.unwrap() >= quote.last_price);
        }
    }
}
