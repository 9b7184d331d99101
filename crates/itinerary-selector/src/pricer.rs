//! Pricing seam
//!
//! The selector never computes fares. A [`Pricer`] turns a combination into a
//! price and a duration, or reports why it cannot.

use crate::{Combination, Itinerary, PricedResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PricingFailure {
    /// This combination has no fare; nothing else is affected
    #[error("No fare for combination: {0}")]
    Rejected(String),
    /// The option can never be priced; every combination using it is dead
    #[error("Option {option} of leg {leg} cannot be priced")]
    InvalidOption { leg: usize, option: usize },
}

pub trait Pricer {
    fn price(
        &mut self,
        itinerary: &Itinerary,
        combination: &Combination,
    ) -> std::result::Result<PricedResult, PricingFailure>;

    /// Run the checks deferred on the legs flagged in `combination.status`.
    /// Called before pricing, only for combinations that have such legs.
    fn validate(
        &mut self,
        _itinerary: &Itinerary,
        _combination: &Combination,
    ) -> std::result::Result<(), PricingFailure> {
        Ok(())
    }
}

impl<F> Pricer for F
where
    F: FnMut(&Itinerary, &Combination) -> std::result::Result<PricedResult, PricingFailure>,
{
    fn price(
        &mut self,
        itinerary: &Itinerary,
        combination: &Combination,
    ) -> std::result::Result<PricedResult, PricingFailure> {
        self(itinerary, combination)
    }
}

/// One explicit fare in a price table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareEntry {
    pub sops: Vec<usize>,
    pub price: f64,
}

/// Prices from a fixed table.
///
/// Explicit fares win and price as a through fare; otherwise the per-option
/// fares of every leg are summed into a local solution. Duration is the
/// scheduled duration of the combination.
#[derive(Debug, Clone, Default)]
pub struct TablePricer {
    fares: HashMap<Vec<usize>, f64>,
    option_fares: Vec<Vec<f64>>,
    invalid: HashSet<(usize, usize)>,
    calls: usize,
}

impl TablePricer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fares(mut self, fares: impl IntoIterator<Item = FareEntry>) -> Self {
        self.fares
            .extend(fares.into_iter().map(|f| (f.sops, f.price)));
        self
    }

    /// Per-leg, per-option fares summed for combinations without an explicit fare
    pub fn with_option_fares(mut self, option_fares: Vec<Vec<f64>>) -> Self {
        self.option_fares = option_fares;
        self
    }

    /// Options the pricer will report as invalid
    pub fn with_invalid_options(mut self, invalid: impl IntoIterator<Item = (usize, usize)>) -> Self {
        self.invalid.extend(invalid);
        self
    }

    /// Number of pricing calls served
    pub fn calls(&self) -> usize {
        self.calls
    }

    fn summed(&self, sops: &[usize]) -> Option<f64> {
        sops.iter()
            .enumerate()
            .map(|(leg, &option)| self.option_fares.get(leg).and_then(|l| l.get(option)).copied())
            .sum()
    }
}

impl Pricer for TablePricer {
    fn price(
        &mut self,
        itinerary: &Itinerary,
        combination: &Combination,
    ) -> std::result::Result<PricedResult, PricingFailure> {
        self.calls += 1;
        let sops = &combination.sops;

        if let Some((leg, &option)) = sops
            .iter()
            .enumerate()
            .find(|(leg, option)| self.invalid.contains(&(*leg, **option)))
        {
            return Err(PricingFailure::InvalidOption { leg, option });
        }

        let (price, local) = match self.fares.get(sops) {
            Some(&price) => (price, false),
            None => self
                .summed(sops)
                .map(|price| (price, true))
                .ok_or_else(|| PricingFailure::Rejected(format!("{:?}", sops)))?,
        };

        let duration = match combination.duration {
            0 => itinerary
                .build_combination(sops)
                .map(|c| c.duration)
                .ok_or_else(|| PricingFailure::Rejected(format!("{:?} does not fit itinerary", sops)))?,
            scheduled => scheduled,
        };
        let priced = PricedResult::new(price, duration);
        Ok(if local { priced.local() } else { priced })
    }

    fn validate(
        &mut self,
        itinerary: &Itinerary,
        combination: &Combination,
    ) -> std::result::Result<(), PricingFailure> {
        let sops = &combination.sops;
        match itinerary
            .pending_legs(sops)
            .into_iter()
            .find(|&leg| self.invalid.contains(&(leg, sops[leg])))
        {
            Some(leg) => Err(PricingFailure::InvalidOption {
                leg,
                option: sops[leg],
            }),
            None => Ok(()),
        }
    }
}
