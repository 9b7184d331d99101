//! Host driver: one search request end to end
//!
//! Pulls tuples from the enumerator through the candidate pool, prices them,
//! and serializes every decision through a single engine. Candidates rejected
//! only because the quotas were full are parked in the pool and re-offered in
//! a reconciliation pass once the enumerator runs dry.

use crate::accepted::AcceptedEntry;
use crate::classify::{BucketClassifier, SeparatorClassifier};
use crate::config::QuotaConfig;
use crate::engine::{DecisionEngine, DecisionRecord, EngineState, Offer, RejectReason};
use crate::enumerator::DiamondEnumerator;
use crate::pool::CandidatePool;
use crate::pricer::{Pricer, PricingFailure};
use crate::stats::StatsSnapshot;
use crate::{Combination, Itinerary, PricedResult, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tuples pulled from the enumerator per pool refill
pub const REFILL_BATCH: usize = 64;

type Rating = Box<dyn Fn(&[usize]) -> i64 + Send>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SearchCounters {
    pub enumerated: usize,
    /// Candidates whose delayed legs passed validation
    pub validated: usize,
    pub priced: usize,
    pub pricing_failures: usize,
    pub invalidated_options: usize,
    pub pool_invalidated: usize,
    pub deferred: usize,
    pub reconciled: usize,
}

/// Everything a finished search hands back
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub state: EngineState,
    pub accepted: Vec<AcceptedEntry>,
    pub decisions: Vec<DecisionRecord>,
    pub stats: StatsSnapshot,
    pub fare_cutoff: Option<f64>,
    pub separators: Option<SeparatorClassifier>,
    pub counters: SearchCounters,
}

pub struct SearchDriver<P: Pricer> {
    itinerary: Arc<Itinerary>,
    enumerator: DiamondEnumerator<Rating, i64>,
    pool: CandidatePool,
    engine: DecisionEngine,
    pricer: P,
    /// Prices of parked candidates, reused by the reconciliation pass
    parked_prices: HashMap<Vec<usize>, PricedResult>,
    counters: SearchCounters,
}

impl<P: Pricer> SearchDriver<P> {
    pub fn new(itinerary: Itinerary, config: QuotaConfig, pricer: P) -> Result<Self> {
        let itinerary = Arc::new(itinerary);
        let engine = DecisionEngine::new(Arc::clone(&itinerary), config)?;
        let sizes = itinerary.leg_sizes();

        let rated = Arc::clone(&itinerary);
        let rating: Rating = Box::new(move |sops| rated.non_stop_legs(sops));

        Ok(Self {
            enumerator: DiamondEnumerator::new(sizes.clone(), rating),
            pool: CandidatePool::new(&sizes),
            itinerary,
            engine,
            pricer,
            parked_prices: HashMap::new(),
            counters: SearchCounters::default(),
        })
    }

    pub fn with_classifier<C>(mut self, classifier: C) -> Result<Self>
    where
        C: BucketClassifier + 'static,
    {
        self.engine = self.engine.with_classifier(classifier)?;
        Ok(self)
    }

    /// Replace the enumeration rating; the diagonal runs while it matches the origin's
    pub fn with_rating<F>(mut self, rating: F) -> Self
    where
        F: Fn(&[usize]) -> i64 + Send + 'static,
    {
        let boxed: Rating = Box::new(rating);
        self.enumerator = DiamondEnumerator::new(self.itinerary.leg_sizes(), boxed);
        self
    }

    pub fn itinerary(&self) -> &Itinerary {
        &self.itinerary
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    pub fn pool(&self) -> &CandidatePool {
        &self.pool
    }

    pub fn counters(&self) -> SearchCounters {
        self.counters
    }

    pub fn pricer(&self) -> &P {
        &self.pricer
    }

    /// Next combination to price, or `None` once the enumerator and the pool
    /// are both exhausted
    pub fn next_candidate(&mut self) -> Option<Combination> {
        loop {
            if let Some(combination) = self.pool.pop_front() {
                return Some(combination);
            }
            if !self.refill() {
                return None;
            }
        }
    }

    /// Move up to [`REFILL_BATCH`] fresh tuples into the pool
    fn refill(&mut self) -> bool {
        let mut pulled = false;
        let mut inserted = 0;
        for sops in self.enumerator.by_ref().take(REFILL_BATCH) {
            pulled = true;
            self.counters.enumerated += 1;
            if self.pool.touches_invalid(&sops) || self.engine.accepted().contains(&sops) {
                continue;
            }
            if let Some(combination) = self.itinerary.build_combination(&sops) {
                if self.pool.insert(combination).is_some() {
                    inserted += 1;
                }
            }
        }
        if pulled {
            debug!("Pool refilled with {} candidates", inserted);
        }
        pulled
    }

    /// Validate delayed legs, price the candidate and hand it to the engine
    pub fn evaluate(&mut self, mut combination: Combination) -> Result<Offer> {
        if !combination.is_validated() {
            if let Err(failure) = self.pricer.validate(&self.itinerary, &combination) {
                return self.pricing_failed(combination, failure);
            }
            combination.status = 0;
            self.counters.validated += 1;
        }
        let priced = match self.pricer.price(&self.itinerary, &combination) {
            Ok(priced) => priced,
            Err(failure) => return self.pricing_failed(combination, failure),
        };
        self.counters.priced += 1;
        combination.pattern = priced.pattern;

        if !self.engine.continue_processing(priced.price) {
            return Ok(self
                .engine
                .reject(&combination.sops, Some(priced.price), RejectReason::Done));
        }

        let offer = self.engine.offer(combination.clone(), priced)?;
        if offer == Offer::Rejected(RejectReason::QuotaFull) {
            self.park(combination, priced);
        }
        Ok(offer)
    }

    fn pricing_failed(&mut self, combination: Combination, failure: PricingFailure) -> Result<Offer> {
        self.counters.pricing_failures += 1;
        match failure {
            PricingFailure::Rejected(reason) => {
                debug!("Pricer rejected {:?}: {}", combination.sops, reason);
                Ok(self
                    .engine
                    .reject(&combination.sops, None, RejectReason::PricingFailed))
            }
            PricingFailure::InvalidOption { leg, option } => {
                warn!("Option {} of leg {} reported invalid by pricer", option, leg);
                self.counters.invalidated_options += 1;
                self.counters.pool_invalidated += self.pool.invalidate(leg, option);
                self.parked_prices
                    .retain(|sops, _| sops.get(leg) != Some(&option));
                self.engine.purge_option(leg, option)?;
                Ok(self
                    .engine
                    .reject(&combination.sops, None, RejectReason::InvalidOption))
            }
        }
    }

    fn park(&mut self, combination: Combination, priced: PricedResult) {
        let sops = combination.sops.clone();
        if let Some(handle) = self.pool.insert(combination) {
            if self.pool.defer(handle) {
                self.parked_prices.insert(sops, priced);
                self.counters.deferred += 1;
            }
        }
    }

    /// Re-offer parked candidates, temporarily allowing the cap to be exceeded
    /// for those that serve an unmet requirement
    pub fn reconcile(&mut self) -> Result<()> {
        let parked = self.pool.drain_deferred();
        if parked.is_empty() {
            return Ok(());
        }
        if self.engine.state() == EngineState::Done || self.engine.requirements().is_empty() {
            debug!("Skipping reconciliation of {} parked candidates", parked.len());
            self.parked_prices.clear();
            return Ok(());
        }

        info!(
            "Reconciling {} parked candidates, unmet: {:?}",
            parked.len(),
            self.engine.requirements().names()
        );
        self.engine.begin_reconciliation();
        for combination in parked {
            let Some(priced) = self.parked_prices.remove(&combination.sops) else {
                continue;
            };
            if self.engine.accepted().contains(&combination.sops) {
                continue;
            }
            if let Offer::Accepted | Offer::Swapped { .. } = self.engine.offer(combination, priced)? {
                self.counters.reconciled += 1;
            }
        }
        self.parked_prices.clear();
        let trimmed = self.engine.finish_reconciliation()?;
        if !trimmed.is_empty() {
            debug!("Reconciliation trimmed {} combinations", trimmed.len());
        }
        Ok(())
    }

    /// Run the search to completion
    pub fn run(&mut self) -> Result<SearchOutcome> {
        info!(
            "Searching {} legs {:?}, {} combinations, {} requested",
            self.itinerary.leg_count(),
            self.itinerary.leg_sizes(),
            self.enumerator.total(),
            self.engine.config().requested_solutions
        );

        while let Some(combination) = self.next_candidate() {
            self.evaluate(combination)?;
            if self.engine.state() == EngineState::Done {
                break;
            }
        }
        self.reconcile()?;
        self.engine.end_of_candidates();

        info!(
            "Search finished: {} accepted, {} priced, {} pricing failures",
            self.engine.accepted().len(),
            self.counters.priced,
            self.counters.pricing_failures
        );
        Ok(self.outcome())
    }

    pub fn outcome(&self) -> SearchOutcome {
        SearchOutcome {
            state: self.engine.state(),
            accepted: self
                .engine
                .accepted()
                .by_price()
                .into_iter()
                .cloned()
                .collect(),
            decisions: self.engine.decisions().to_vec(),
            stats: self.engine.stats().snapshot(),
            fare_cutoff: self.engine.fare_cutoff(),
            separators: self.engine.separators(),
            counters: self.counters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BucketDistribution;
    use crate::pricer::TablePricer;
    use crate::{Bucket, CombinationInfo, Leg, LegOption, SolutionPattern};

    fn itinerary(sizes: &[usize]) -> Itinerary {
        let legs = sizes
            .iter()
            .map(|&n| {
                Leg::new(
                    (0..n)
                        .map(|i| {
                            let option = LegOption::new("AA", (300 + 120 * i) as u16, 240 + 30 * i as u32);
                            if i == 0 {
                                option.non_stop()
                            } else {
                                option
                            }
                        })
                        .collect(),
                )
            })
            .collect();
        Itinerary::new(legs).unwrap()
    }

    fn additive(sizes: &[usize]) -> TablePricer {
        TablePricer::new().with_option_fares(
            sizes
                .iter()
                .map(|&n| (0..n).map(|i| 100.0 + 25.0 * i as f64).collect())
                .collect(),
        )
    }

    #[test]
    fn test_next_candidate_covers_everything() {
        let mut driver = SearchDriver::new(itinerary(&[3, 2]), QuotaConfig::default(), additive(&[3, 2])).unwrap();
        let mut seen = Vec::new();
        while let Some(c) = driver.next_candidate() {
            seen.push(c.sops);
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(seen[0], vec![0, 0]);
        assert!(seen.iter().all(|s| s.len() == 2));
    }

    #[test]
    fn test_run_respects_cap() {
        let sizes = [4, 4];
        let config = QuotaConfig::default().with_requested(5);
        let mut driver = SearchDriver::new(itinerary(&sizes), config, additive(&sizes)).unwrap();
        let outcome = driver.run().unwrap();
        assert_eq!(outcome.state, EngineState::Done);
        assert!(outcome.accepted.len() <= 5);
        assert_eq!(outcome.accepted.len(), 5);
        assert_eq!(outcome.stats.accepted, 5);
        assert!(outcome.fare_cutoff.is_some());
        assert!(outcome.separators.is_some());
        assert!(!outcome.decisions.is_empty());
    }

    #[test]
    fn test_invalid_option_propagates() {
        let sizes = [3, 3];
        let pricer = additive(&sizes).with_invalid_options([(0, 1)]);
        let config = QuotaConfig::default().with_requested(4);
        let mut driver = SearchDriver::new(itinerary(&sizes), config, pricer).unwrap();
        let outcome = driver.run().unwrap();

        assert!(driver.pool().is_invalid(0, 1));
        assert!(outcome.accepted.iter().all(|e| e.combination.sops[0] != 1));
        assert_eq!(outcome.counters.invalidated_options, 1);
        // only the first tuple touching the option reaches the pricer
        assert_eq!(outcome.counters.pricing_failures, 1);
    }

    #[test]
    fn test_delayed_legs_validated_before_pricing() {
        let itin = Itinerary::new(vec![
            Leg::new(vec![
                LegOption::new("AA", 300, 240),
                LegOption::new("AA", 420, 240).delayed(),
                LegOption::new("AA", 540, 240).delayed(),
            ]),
            Leg::new(vec![LegOption::new("AA", 900, 240), LegOption::new("AA", 1000, 240)]),
        ])
        .unwrap();
        let pricer = additive(&[3, 2]).with_invalid_options([(0, 1)]);
        let mut driver = SearchDriver::new(itin, QuotaConfig::default().with_requested(4), pricer).unwrap();

        let valid = driver.itinerary().build_combination(&[2, 0]).unwrap();
        assert!(!valid.is_validated());
        assert_eq!(driver.evaluate(valid).unwrap(), Offer::Accepted);
        let entry = driver.engine().accepted().get(&[2, 0]).unwrap();
        assert!(entry.combination.is_validated());
        assert_eq!(entry.combination.pattern, SolutionPattern::Local);

        let invalid = driver.itinerary().build_combination(&[1, 0]).unwrap();
        assert_eq!(driver.evaluate(invalid).unwrap(), Offer::Rejected(RejectReason::InvalidOption));
        assert!(driver.pool().is_invalid(0, 1));

        let counters = driver.counters();
        assert_eq!(counters.validated, 1);
        assert_eq!(counters.priced, 1);
        assert_eq!(counters.invalidated_options, 1);
        assert_eq!(driver.pricer().calls(), 1);
    }

    #[test]
    fn test_pricer_rejection_is_local() {
        let sizes = [2, 2];
        let failing = |itin: &Itinerary, c: &Combination| {
            if c.sops == vec![1, 1] {
                Err(PricingFailure::Rejected("no fare".into()))
            } else {
                let duration = itin.build_combination(&c.sops).map(|c| c.duration).unwrap_or(0);
                Ok(PricedResult::new(100.0 + c.sops.iter().sum::<usize>() as f64, duration))
            }
        };
        let mut driver = SearchDriver::new(itinerary(&sizes), QuotaConfig::default().with_requested(4), failing).unwrap();
        let outcome = driver.run().unwrap();
        assert_eq!(outcome.accepted.len(), 3);
        assert_eq!(outcome.counters.pricing_failures, 1);
    }

    #[test]
    fn test_parked_candidates_reconciled() {
        // Inbound option 0 is Gold, 1 is Ugly; Gold candidates all come first
        // and are cheaper, so the Ugly one initially loses on price.
        let itin = Itinerary::new(vec![
            Leg::new((0..4).map(|i| LegOption::new("AA", 300 + 60 * i, 300)).collect()),
            Leg::new(vec![LegOption::new("AA", 900, 300), LegOption::new("AA", 1000, 300)]),
        ])
        .unwrap();
        let pricer = TablePricer::new().with_option_fares(vec![vec![10.0, 11.0, 12.0, 13.0], vec![0.0, 500.0]]);
        let mut config = QuotaConfig::default().with_requested(2);
        config.bucket_distribution = BucketDistribution {
            gold: 0.5,
            ugly: 0.5,
            luxury: 0.0,
            junk: 0.0,
        };
        let classify = |c: &Combination, _: &CombinationInfo, _: &PricedResult| {
            Some(if c.sops[1] == 0 { Bucket::Gold } else { Bucket::Ugly })
        };
        let mut driver = SearchDriver::new(itin, config, pricer)
            .unwrap()
            .with_classifier(classify)
            .unwrap()
            .with_rating(|sops| sops.iter().sum::<usize>() as i64);

        let outcome = driver.run().unwrap();
        let buckets: Vec<_> = outcome.accepted.iter().filter_map(|e| e.bucket).collect();
        assert_eq!(outcome.accepted.len(), 2);
        assert!(buckets.contains(&Bucket::Gold));
        assert!(buckets.contains(&Bucket::Ugly));
    }
}
