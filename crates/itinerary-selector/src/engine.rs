//! Decision engine: accept, reject or swap priced candidates
//!
//! ```text
//! ACCUMULATING ──price above fare cutoff, cap reached──▶ FARE_CUTOFF_REACHED
//!      │                                                        │
//!      └──────────── valve / end of candidates ───────▶ DONE ◀──┘ cap reached,
//!                                                                 nothing unmet
//! ```
//!
//! Until the requested count is first reached, and unless the configuration
//! fixes both separators or a classifier is installed, every well-formed
//! candidate is accepted. At that point the diversity parameters are
//! calibrated from the accepted prices and durations.

use crate::accepted::{AcceptedEntry, AcceptedSet};
use crate::classify::{BucketClassifier, SeparatorClassifier};
use crate::config::QuotaConfig;
use crate::requirements::{non_stop_shortfall, Contribution, Requirements};
use crate::stats::{StatFlags, StatsAggregator, SubscriberId};
use crate::swapper;
use crate::{
    Bucket, Combination, CombinationInfo, Itinerary, PricedResult, Result, SelectorError,
    PRICE_COMP_DELTA,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Accumulating,
    FareCutoffReached,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Tuple does not fit the itinerary
    Malformed,
    /// Delayed validation has not been run on some leg
    PendingValidation,
    /// Invalid price or refused by the classifier
    Unclassifiable,
    Duplicate,
    PricingFailed,
    InvalidOption,
    /// Past the fare cutoff and no unmet requirement would be served
    NoUnmetRequirement,
    LongConnectionLimit,
    ScheduleRepeatLimit,
    /// Cap reached and no occupant could be displaced
    QuotaFull,
    Done,
}

/// Outcome of [`DecisionEngine::offer`]
#[derive(Debug, Clone, PartialEq)]
pub enum Offer {
    Accepted,
    Rejected(RejectReason),
    Swapped { evicted: Combination },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionKind {
    Accepted,
    Rejected { reason: RejectReason },
    Swapped { evicted: Vec<usize> },
    /// Evicted because one of its options became invalid
    Purged,
    /// Evicted when a reconciliation pass was trimmed back to the cap
    Trimmed,
}

/// One entry of the decision log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionRecord {
    pub seq: u64,
    pub sops: Vec<usize>,
    pub price: Option<f64>,
    pub bucket: Option<Bucket>,
    pub state: EngineState,
    #[serde(flatten)]
    pub kind: DecisionKind,
}

enum Action {
    Accept,
    Swap(Vec<usize>),
}

impl Action {
    fn victim(&self) -> Option<&[usize]> {
        match self {
            Action::Accept => None,
            Action::Swap(sops) => Some(sops),
        }
    }
}

type BucketStatus = ([usize; Bucket::COUNT], usize, usize);

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Price splitting cheap from expensive
pub fn fare_separator(min: f64, avg: f64, max: f64) -> f64 {
    if max <= 0.0 {
        return min;
    }
    round2(min + (avg - min) * (avg / max))
}

/// Duration in minutes splitting fast from slow
pub fn travel_time_separator(min: u32, avg: f64, coef: f64) -> u32 {
    if min <= 1 || avg <= 0.0 {
        return avg.round() as u32;
    }
    let min = min as f64;
    let separator = min + (avg - min) * (min / avg).cos() * coef / min.log10();
    separator.max(0.0).round() as u32
}

/// Fare cutoff from accepted prices: the larger of the calculated value and
/// the multiplier-based value when a multiplier is configured
pub fn fare_cutoff(min: f64, avg: f64, max: f64, calc_coef: f64, multiplier: Option<f64>) -> f64 {
    let by_calculation = if max > 1.0 {
        round2(max * (1.0 + (avg + 1.0 - min) / (max + 1.0 - min) * calc_coef / max.log10()))
    } else {
        max
    };
    match multiplier {
        Some(coef) => by_calculation.max((min * coef).round()),
        None => by_calculation,
    }
}

/// Per-request decision state
pub struct DecisionEngine {
    config: QuotaConfig,
    itinerary: Arc<Itinerary>,
    classifier: Option<Box<dyn BucketClassifier>>,
    separators: Option<SeparatorClassifier>,
    stats: StatsAggregator,
    subscriber: SubscriberId,
    accepted: AcceptedSet,
    state: EngineState,
    fare_cutoff: Option<f64>,
    calibrated: bool,
    requirements: Requirements,
    last_status: BucketStatus,
    unchanged: usize,
    reconciling: bool,
    log: Vec<DecisionRecord>,
    seq: u64,
}

impl DecisionEngine {
    pub fn new(itinerary: Arc<Itinerary>, config: QuotaConfig) -> Result<Self> {
        config.validate()?;

        let separators = config
            .fixed_separators()
            .map(|(fare, time)| SeparatorClassifier::new(fare, time));
        let flags = if separators.is_some() {
            StatFlags::ALL
        } else {
            StatFlags::ALL.difference(StatFlags::BUCKETS | StatFlags::BUCKET_PRICES)
        };

        let accepted = AcceptedSet::new();
        let mut stats = StatsAggregator::new(&itinerary.leg_sizes());
        let subscriber = stats.subscribe(flags, &accepted);

        let mut engine = Self {
            fare_cutoff: config.fare_cutoff_amount,
            config,
            itinerary,
            classifier: separators.map(|s| Box::new(s) as Box<dyn BucketClassifier>),
            separators,
            stats,
            subscriber,
            accepted,
            state: EngineState::Accumulating,
            calibrated: false,
            requirements: Requirements::NONE,
            last_status: ([0; Bucket::COUNT], 0, 0),
            unchanged: 0,
            reconciling: false,
            log: Vec::new(),
            seq: 0,
        };
        engine.refresh_requirements();
        engine.last_status = engine.bucket_status();
        Ok(engine)
    }

    /// Classify with a caller-supplied function instead of calibrated separators
    pub fn with_classifier<C>(mut self, classifier: C) -> Result<Self>
    where
        C: BucketClassifier + 'static,
    {
        self.separators = None;
        self.install_classifier(Box::new(classifier))?;
        Ok(self)
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    pub fn accepted(&self) -> &AcceptedSet {
        &self.accepted
    }

    pub fn into_accepted(self) -> AcceptedSet {
        self.accepted
    }

    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    pub fn fare_cutoff(&self) -> Option<f64> {
        self.fare_cutoff
    }

    /// Separators in use, if classification is separator based
    pub fn separators(&self) -> Option<SeparatorClassifier> {
        self.separators
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    pub fn requirements(&self) -> Requirements {
        self.requirements
    }

    pub fn decisions(&self) -> &[DecisionRecord] {
        &self.log
    }

    pub fn is_reconciling(&self) -> bool {
        self.reconciling
    }

    /// Raise the fare cutoff; lower values are ignored
    pub fn raise_fare_cutoff(&mut self, amount: f64) {
        let raised = match self.fare_cutoff {
            Some(current) => current.max(amount),
            None => amount,
        };
        if self.fare_cutoff != Some(raised) {
            debug!("Fare cutoff raised to {:.2}", raised);
            self.fare_cutoff = Some(raised);
        }
    }

    /// Whether the search should keep feeding candidates, given the price of
    /// the next one
    pub fn continue_processing(&mut self, price: f64) -> bool {
        if self.state == EngineState::Done {
            return false;
        }

        let status = self.bucket_status();
        if status == self.last_status {
            self.unchanged += 1;
        } else {
            self.unchanged = 0;
            self.last_status = status;
        }
        if self.unchanged > self.config.max_discontinue_processing {
            info!("No bucket progress for {} calls, discontinuing", self.unchanged);
            self.transition(EngineState::Done);
            return false;
        }

        let full = self.accepted.len() >= self.config.requested_solutions;
        if self.state == EngineState::Accumulating && full {
            if let Some(cutoff) = self.fare_cutoff {
                if price - cutoff > PRICE_COMP_DELTA {
                    self.transition(EngineState::FareCutoffReached);
                }
            }
        }
        if self.state == EngineState::FareCutoffReached && full && self.requirements.is_empty() {
            self.transition(EngineState::Done);
            return false;
        }
        true
    }

    /// No more candidates will arrive
    pub fn end_of_candidates(&mut self) {
        self.transition(EngineState::Done);
    }

    /// Decide on a priced candidate.
    ///
    /// Malformed and unclassifiable candidates come back as rejections with no
    /// side effects. `Err` means the engine's own bookkeeping is broken.
    pub fn offer(&mut self, combination: Combination, priced: PricedResult) -> Result<Offer> {
        if self.state == EngineState::Done {
            return Ok(self.reject(&combination.sops, Some(priced.price), RejectReason::Done));
        }
        let Some(info) = self.itinerary.describe(&combination.sops, &self.config.tod_ranges) else {
            warn!("Malformed candidate {:?}", combination.sops);
            return Ok(self.reject(&combination.sops, Some(priced.price), RejectReason::Malformed));
        };
        if !combination.is_validated() {
            return Ok(self.reject(&combination.sops, Some(priced.price), RejectReason::PendingValidation));
        }
        if self.accepted.contains(&combination.sops) {
            return Ok(self.reject(&combination.sops, Some(priced.price), RejectReason::Duplicate));
        }
        if !priced.is_valid() {
            warn!("Candidate {:?} has unusable price {}", combination.sops, priced.price);
            return Ok(self.reject(&combination.sops, None, RejectReason::Unclassifiable));
        }
        let classified = self
            .classifier
            .as_ref()
            .map(|c| c.classify(&combination, &info, &priced));
        let bucket = match classified {
            Some(None) => {
                return Ok(self.reject(&combination.sops, Some(priced.price), RejectReason::Unclassifiable))
            }
            Some(bucket) => bucket,
            None => None,
        };

        let candidate = Contribution {
            sops: &combination.sops,
            info: &info,
            bucket,
        };
        if self.state == EngineState::FareCutoffReached
            && Requirements::offered_by(&self.config, &self.stats, candidate).is_empty()
        {
            return Ok(self.reject(&combination.sops, Some(priced.price), RejectReason::NoUnmetRequirement));
        }

        let action = match self.decide(&combination.sops, priced.price, &info, bucket) {
            Ok(action) => action,
            Err(reason) => return Ok(self.reject(&combination.sops, Some(priced.price), reason)),
        };
        if let Some(reason) = self.limit_violation(&combination.sops, &info, action.victim()) {
            return Ok(self.reject(&combination.sops, Some(priced.price), reason));
        }

        let sops = combination.sops.clone();
        let entry = AcceptedEntry::new(combination, priced, info, bucket);
        let (outcome, kind) = match action {
            Action::Accept => {
                self.admit(entry);
                (Offer::Accepted, DecisionKind::Accepted)
            }
            Action::Swap(victim) => {
                let evicted = self.evict(&victim)?;
                self.admit(entry);
                debug!("{:?} swapped out {:?}", sops, victim);
                (
                    Offer::Swapped {
                        evicted: evicted.combination,
                    },
                    DecisionKind::Swapped { evicted: victim },
                )
            }
        };
        self.record(sops, Some(priced.price), bucket, kind);

        if !self.calibrated && self.accepted.len() >= self.config.requested_solutions {
            self.calibrate()?;
        }
        self.refresh_requirements();
        self.verify()?;
        Ok(outcome)
    }

    /// Log a rejection decided outside the engine, e.g. a pricer failure
    pub fn reject(&mut self, sops: &[usize], price: Option<f64>, reason: RejectReason) -> Offer {
        debug!("Rejected {:?}: {:?}", sops, reason);
        self.record(sops.to_vec(), price, None, DecisionKind::Rejected { reason });
        Offer::Rejected(reason)
    }

    /// Evict every accepted combination that uses (leg, option) and stop
    /// counting the option as one still to be represented
    pub fn purge_option(&mut self, leg: usize, option: usize) -> Result<Vec<Combination>> {
        let mut purged = Vec::new();
        for sops in self.accepted.referencing(leg, option) {
            let entry = self.evict(&sops)?;
            self.record(sops, Some(entry.price()), entry.bucket, DecisionKind::Purged);
            purged.push(entry.combination);
        }
        self.stats.retire_option(leg, option);
        if !purged.is_empty() {
            info!("Option {} of leg {} invalid: {} accepted evicted", option, leg, purged.len());
        }
        self.refresh_requirements();
        self.verify()?;
        Ok(purged)
    }

    /// Allow candidates serving an unmet requirement past the cap until
    /// [`DecisionEngine::finish_reconciliation`]
    pub fn begin_reconciliation(&mut self) {
        debug!("Reconciliation pass started with {} accepted", self.accepted.len());
        self.reconciling = true;
    }

    /// Trim back to the cap. Occupants whose removal leaves no requirement
    /// short go first, most expensive first.
    pub fn finish_reconciliation(&mut self) -> Result<Vec<Combination>> {
        let mut trimmed = Vec::new();
        while self.accepted.len() > self.config.requested_solutions {
            let victim = swapper::trim_victim(&self.config, &self.stats, &self.accepted).map(|e| e.sops().to_vec());
            let Some(sops) = victim else {
                break;
            };
            let entry = self.evict(&sops)?;
            self.record(sops, Some(entry.price()), entry.bucket, DecisionKind::Trimmed);
            trimmed.push(entry.combination);
        }
        self.reconciling = false;
        debug!("Reconciliation pass finished, {} trimmed", trimmed.len());
        self.refresh_requirements();
        self.verify()?;
        Ok(trimmed)
    }

    fn decide(
        &self,
        sops: &[usize],
        price: f64,
        info: &CombinationInfo,
        bucket: Option<Bucket>,
    ) -> std::result::Result<Action, RejectReason> {
        let cap = self.config.requested_solutions;
        let total = self.accepted.len();

        match bucket {
            None => {
                if total < cap {
                    return Ok(Action::Accept);
                }
            }
            Some(bucket) if self.stats.bucket_count(bucket) < self.config.bucket_quota(bucket) => {
                if total < cap {
                    return Ok(Action::Accept);
                }
                let victim = swapper::over_represented_victim(&self.config, &self.stats, &self.accepted, Some(bucket));
                if let Some(victim) = victim {
                    if swapper::candidate_wins(sops, price, info, victim, &self.accepted) {
                        return Ok(Action::Swap(victim.sops().to_vec()));
                    }
                }
            }
            Some(bucket) => {
                if let Some(victim) = swapper::worst_in_bucket(&self.accepted, bucket) {
                    if swapper::candidate_wins(sops, price, info, victim, &self.accepted) {
                        return Ok(Action::Swap(victim.sops().to_vec()));
                    }
                }
                if total < cap {
                    return Ok(Action::Accept);
                }
            }
        }

        if non_stop_shortfall(&self.config, &self.stats, info) {
            if let Some(victim) = swapper::surplus_non_stop(&self.config, &self.stats, &self.accepted) {
                return Ok(Action::Swap(victim.sops().to_vec()));
            }
        }

        let candidate = Contribution { sops, info, bucket };
        let offered = Requirements::offered_by(&self.config, &self.stats, candidate);
        if offered.is_empty() {
            return Err(RejectReason::QuotaFull);
        }
        if self.reconciling {
            return Ok(Action::Accept);
        }
        // bucket quotas are settled on price above
        if !offered.without(Requirements::BUCKETS).is_empty() {
            if let Some(victim) = swapper::requirement_victim(&self.config, &self.stats, &self.accepted, candidate) {
                return Ok(Action::Swap(victim.sops().to_vec()));
            }
        }
        Err(RejectReason::QuotaFull)
    }

    /// Limits are checked as if `victim` were already gone
    fn limit_violation(
        &self,
        sops: &[usize],
        info: &CombinationInfo,
        victim: Option<&[usize]>,
    ) -> Option<RejectReason> {
        let victim = victim.and_then(|v| self.accepted.get(v));

        if info.long_connection {
            if let Some(max) = self.config.max_long_connection {
                let freed = victim.map_or(0, |v| usize::from(v.info.long_connection));
                if self.stats.long_connection_count().saturating_sub(freed) >= max {
                    return Some(RejectReason::LongConnectionLimit);
                }
            }
        }
        if let Some(limit) = self.config.schedule_repeat_limit {
            for (leg, &option) in sops.iter().enumerate() {
                let freed = victim.map_or(0, |v| usize::from(v.combination.references(leg, option)));
                if self.stats.sop_count(leg, option).saturating_sub(freed) >= limit {
                    return Some(RejectReason::ScheduleRepeatLimit);
                }
            }
        }
        None
    }

    fn admit(&mut self, entry: AcceptedEntry) {
        self.stats.add_solution(&entry);
        self.accepted.insert(entry);
    }

    fn evict(&mut self, sops: &[usize]) -> Result<AcceptedEntry> {
        let entry = self
            .accepted
            .remove(sops)
            .ok_or_else(|| SelectorError::Inconsistent(format!("evicting {:?} which is not accepted", sops)))?;
        self.stats.remove_solution(&entry);
        Ok(entry)
    }

    /// Derive separators and the fare cutoff from what has been accepted so far
    fn calibrate(&mut self) -> Result<()> {
        self.calibrated = true;
        let (Some(min), Some(max)) = (self.stats.min_price(), self.stats.max_price()) else {
            return Ok(());
        };
        let avg = self.stats.avg_price();

        if self.classifier.is_none() {
            let fare = self
                .config
                .fare_amount_separator
                .unwrap_or_else(|| fare_separator(min, avg, max));
            let time = self.config.travel_time_separator.unwrap_or_else(|| {
                travel_time_separator(
                    self.stats.min_duration().unwrap_or(0),
                    self.stats.avg_duration(),
                    self.config.travel_time_separator_coef,
                )
            });
            info!("Calibrated separators: fare {:.2}, travel time {} min", fare, time);
            let separators = SeparatorClassifier::new(fare, time);
            self.separators = Some(separators);
            self.install_classifier(Box::new(separators))?;
        }

        let cutoff = fare_cutoff(
            min,
            avg,
            max,
            self.config.fare_cutoff_calc_coef,
            self.config.fare_cutoff_coef,
        );
        self.raise_fare_cutoff(cutoff);
        info!(
            "Fare cutoff {:.2} after {} accepted (min {:.2}, avg {:.2}, max {:.2})",
            self.fare_cutoff.unwrap_or(cutoff),
            self.accepted.len(),
            min,
            avg,
            max
        );
        Ok(())
    }

    /// Assign buckets to the accepted set and start counting them
    fn install_classifier(&mut self, classifier: Box<dyn BucketClassifier>) -> Result<()> {
        for entry in self.accepted.iter_mut() {
            let bucket = classifier
                .classify(&entry.combination, &entry.info, &entry.priced)
                .ok_or_else(|| {
                    SelectorError::Inconsistent(format!(
                        "accepted {:?} cannot be classified",
                        entry.combination.sops
                    ))
                })?;
            entry.bucket = Some(bucket);
        }
        self.classifier = Some(classifier);
        self.stats.resubscribe(self.subscriber, StatFlags::ALL, &self.accepted)?;
        self.stats
            .replay(StatFlags::BUCKETS | StatFlags::BUCKET_PRICES, &self.accepted);
        self.refresh_requirements();
        Ok(())
    }

    fn refresh_requirements(&mut self) {
        self.requirements = Requirements::unmet(&self.config, &self.stats, self.classifier.is_some());
    }

    fn bucket_status(&self) -> BucketStatus {
        (
            self.stats.bucket_counts(),
            self.stats.non_stop_count(),
            self.accepted.len(),
        )
    }

    fn transition(&mut self, next: EngineState) {
        if self.state != next {
            info!("Engine state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn record(&mut self, sops: Vec<usize>, price: Option<f64>, bucket: Option<Bucket>, kind: DecisionKind) {
        self.seq += 1;
        self.log.push(DecisionRecord {
            seq: self.seq,
            sops,
            price,
            bucket,
            state: self.state,
            kind,
        });
    }

    /// Counters must agree with the accepted collection
    fn verify(&self) -> Result<()> {
        let held = self.accepted.len();
        if self.stats.accepted_count() != held {
            return Err(SelectorError::Inconsistent(format!(
                "aggregator counts {} accepted, collection holds {}",
                self.stats.accepted_count(),
                held
            )));
        }
        if self.classifier.is_some() {
            let counted: usize = self.stats.bucket_counts().iter().sum();
            if counted != held {
                return Err(SelectorError::Inconsistent(format!(
                    "bucket counts sum to {}, collection holds {}",
                    counted, held
                )));
            }
        }
        if !self.reconciling && held > self.config.requested_solutions {
            return Err(SelectorError::Inconsistent(format!(
                "{} accepted exceeds cap {}",
                held, self.config.requested_solutions
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BucketDistribution;
    use crate::{Leg, LegOption, TodRange};
    use proptest::prelude::*;

    fn grid(sizes: &[usize]) -> Arc<Itinerary> {
        let legs = sizes
            .iter()
            .map(|&n| {
                Leg::new(
                    (0..n)
                        .map(|i| LegOption::new("AA", (360 + 97 * i) as u16, 300 + 15 * i as u32))
                        .collect(),
                )
            })
            .collect();
        Arc::new(Itinerary::new(legs).unwrap())
    }

    fn split(requested: usize, gold: f64, ugly: f64) -> QuotaConfig {
        let mut config = QuotaConfig::default().with_requested(requested);
        config.bucket_distribution = BucketDistribution {
            gold,
            ugly,
            luxury: 0.0,
            junk: 0.0,
        };
        config
    }

    /// Inbound option 0 is Gold, anything else Ugly
    fn by_inbound(c: &Combination, _: &CombinationInfo, _: &PricedResult) -> Option<Bucket> {
        Some(if c.sops[1] == 0 { Bucket::Gold } else { Bucket::Ugly })
    }

    fn offer(engine: &mut DecisionEngine, sops: &[usize], price: f64) -> Offer {
        engine
            .offer(Combination::new(sops.to_vec()), PricedResult::new(price, 600))
            .unwrap()
    }

    fn accepted_tuples(engine: &DecisionEngine) -> Vec<Vec<usize>> {
        engine.accepted().iter().map(|e| e.sops().to_vec()).collect()
    }

    #[test]
    fn test_two_bucket_scenario() {
        let mut engine = DecisionEngine::new(grid(&[3, 2]), split(2, 0.5, 0.5))
            .unwrap()
            .with_classifier(by_inbound)
            .unwrap();

        assert_eq!(offer(&mut engine, &[0, 0], 100.0), Offer::Accepted);
        assert_eq!(
            offer(&mut engine, &[1, 0], 90.0),
            Offer::Swapped {
                evicted: Combination::new(vec![0, 0])
            }
        );
        assert_eq!(offer(&mut engine, &[0, 1], 95.0), Offer::Accepted);
        assert_eq!(accepted_tuples(&engine), vec![vec![0, 1], vec![1, 0]]);
        assert_eq!(engine.stats().bucket_count(Bucket::Gold), 1);
        assert_eq!(engine.stats().bucket_count(Bucket::Ugly), 1);
    }

    #[test]
    fn test_swap_from_over_represented_bucket() {
        let mut engine = DecisionEngine::new(grid(&[5, 2]), split(4, 0.5, 0.5))
            .unwrap()
            .with_classifier(by_inbound)
            .unwrap();

        assert_eq!(offer(&mut engine, &[0, 0], 100.0), Offer::Accepted);
        assert_eq!(offer(&mut engine, &[1, 0], 110.0), Offer::Accepted);
        // Gold is full but the cap is not: kept without displacing anything
        assert_eq!(offer(&mut engine, &[2, 0], 120.0), Offer::Accepted);
        assert_eq!(offer(&mut engine, &[0, 1], 200.0), Offer::Accepted);
        assert_eq!(engine.stats().bucket_count(Bucket::Gold), 3);

        let result = offer(&mut engine, &[1, 1], 115.0);
        assert_eq!(
            result,
            Offer::Swapped {
                evicted: Combination::new(vec![2, 0])
            }
        );
        assert_eq!(engine.stats().bucket_count(Bucket::Gold), 2);
        assert_eq!(engine.stats().bucket_count(Bucket::Ugly), 2);
        assert_eq!(engine.accepted().len(), 4);
    }

    #[test]
    fn test_losing_candidate_rejected_when_full() {
        let mut engine = DecisionEngine::new(grid(&[3, 2]), split(2, 0.5, 0.5))
            .unwrap()
            .with_classifier(by_inbound)
            .unwrap();
        offer(&mut engine, &[0, 0], 100.0);
        offer(&mut engine, &[0, 1], 100.0);
        assert_eq!(offer(&mut engine, &[1, 0], 300.0), Offer::Rejected(RejectReason::QuotaFull));
        assert_eq!(offer(&mut engine, &[0, 0], 50.0), Offer::Rejected(RejectReason::Duplicate));
    }

    #[test]
    fn test_malformed_candidate_has_no_side_effects() {
        let mut engine = DecisionEngine::new(grid(&[3, 2]), split(2, 0.5, 0.5)).unwrap();
        let before = engine.stats().snapshot();
        assert_eq!(offer(&mut engine, &[3, 0], 10.0), Offer::Rejected(RejectReason::Malformed));
        assert_eq!(offer(&mut engine, &[0], 10.0), Offer::Rejected(RejectReason::Malformed));
        assert_eq!(
            engine
                .offer(Combination::new(vec![0, 0]), PricedResult::new(f64::NAN, 10))
                .unwrap(),
            Offer::Rejected(RejectReason::Unclassifiable)
        );
        assert!(engine.accepted().is_empty());
        assert_eq!(engine.stats().snapshot(), before);
        assert_eq!(engine.decisions().len(), 3);
    }

    #[test]
    fn test_calibration_assigns_buckets() {
        let mut engine = DecisionEngine::new(grid(&[3, 3]), QuotaConfig::default().with_requested(3)).unwrap();
        assert!(!engine.is_calibrated());
        offer(&mut engine, &[0, 0], 100.0);
        offer(&mut engine, &[1, 1], 200.0);
        assert!(engine.separators().is_none());
        offer(&mut engine, &[2, 2], 300.0);

        assert!(engine.is_calibrated());
        let separators = engine.separators().unwrap();
        // min 100, avg 200, max 300: 100 + 100 * (200 / 300)
        assert!((separators.fare_amount_separator - 166.67).abs() < 1e-9);
        assert!(engine.accepted().iter().all(|e| e.bucket.is_some()));
        let counted: usize = engine.stats().bucket_counts().iter().sum();
        assert_eq!(counted, 3);
        assert!(engine.fare_cutoff().unwrap() > 300.0);
    }

    #[test]
    fn test_calibration_formulas() {
        assert_eq!(fare_separator(100.0, 100.0, 100.0), 100.0);
        assert_eq!(fare_cutoff(100.0, 100.0, 100.0, 1.0, None), 150.0);
        assert_eq!(fare_cutoff(100.0, 100.0, 100.0, 1.0, Some(2.0)), 200.0);
        assert_eq!(travel_time_separator(1, 480.4, 1.0), 480);
        assert_eq!(travel_time_separator(100, 100.0, 1.0), 100);
        assert!(travel_time_separator(300, 400.0, 1.0) > 300);
    }

    #[test]
    fn test_fare_cutoff_only_raised() {
        let mut engine = DecisionEngine::new(grid(&[2, 2]), QuotaConfig::default()).unwrap();
        engine.raise_fare_cutoff(200.0);
        engine.raise_fare_cutoff(150.0);
        assert_eq!(engine.fare_cutoff(), Some(200.0));
    }

    fn one_leg(options: Vec<LegOption>) -> Arc<Itinerary> {
        Arc::new(Itinerary::new(vec![Leg::new(options)]).unwrap())
    }

    fn all_gold(requested: usize) -> QuotaConfig {
        let mut config = split(requested, 1.0, 0.0);
        config.fare_amount_separator = Some(10_000.0);
        config.travel_time_separator = Some(10_000);
        config
    }

    #[test]
    fn test_additional_non_stop_swap() {
        let itinerary = one_leg(vec![
            LegOption::new("UA", 480, 300).non_stop(),
            LegOption::new("UA", 600, 300).non_stop(),
            LegOption::new("AA", 700, 300).non_stop(),
        ]);
        let mut config = all_gold(2);
        config.non_stop_per_carrier.insert("AA".into(), 1);
        let mut engine = DecisionEngine::new(itinerary, config).unwrap();

        offer(&mut engine, &[0], 100.0);
        offer(&mut engine, &[1], 110.0);
        assert!(engine.requirements().contains(Requirements::NEED_NONSTOPS));

        let result = offer(&mut engine, &[2], 500.0);
        assert_eq!(
            result,
            Offer::Swapped {
                evicted: Combination::new(vec![1])
            }
        );
        assert_eq!(engine.stats().non_stop_carrier_count("AA"), 1);
        assert!(engine.requirements().is_empty());
    }

    #[test]
    fn test_fare_cutoff_state_machine() {
        let itinerary = one_leg(vec![
            LegOption::new("UA", 480, 300),
            LegOption::new("UA", 600, 300),
            LegOption::new("AA", 700, 300).non_stop(),
        ]);
        let mut config = all_gold(1);
        config.non_stop_per_carrier.insert("AA".into(), 1);
        let mut engine = DecisionEngine::new(itinerary, config).unwrap();

        assert!(engine.continue_processing(100.0));
        assert_eq!(offer(&mut engine, &[0], 100.0), Offer::Accepted);
        assert_eq!(engine.fare_cutoff(), Some(150.0));

        assert!(engine.continue_processing(200.0));
        assert_eq!(engine.state(), EngineState::FareCutoffReached);

        // cheaper, but serves nothing that is still missing
        assert_eq!(
            offer(&mut engine, &[1], 90.0),
            Offer::Rejected(RejectReason::NoUnmetRequirement)
        );
        assert!(matches!(offer(&mut engine, &[2], 95.0), Offer::Swapped { .. }));

        assert!(!engine.continue_processing(300.0));
        assert_eq!(engine.state(), EngineState::Done);
        assert_eq!(offer(&mut engine, &[0], 1.0), Offer::Rejected(RejectReason::Done));
    }

    #[test]
    fn test_discontinue_valve() {
        let mut config = QuotaConfig::default();
        config.max_discontinue_processing = 2;
        let mut engine = DecisionEngine::new(grid(&[2, 2]), config).unwrap();
        assert!(engine.continue_processing(1.0));
        assert!(engine.continue_processing(1.0));
        assert!(!engine.continue_processing(1.0));
        assert_eq!(engine.state(), EngineState::Done);
    }

    #[test]
    fn test_long_connection_limit() {
        let itinerary = one_leg(vec![
            LegOption::new("AA", 480, 300).long_connection(),
            LegOption::new("AA", 600, 300).long_connection(),
            LegOption::new("AA", 700, 300).long_connection(),
        ]);
        let mut config = all_gold(2);
        config.max_long_connection = Some(1);
        let mut engine = DecisionEngine::new(itinerary, config).unwrap();

        assert_eq!(offer(&mut engine, &[0], 100.0), Offer::Accepted);
        assert_eq!(
            offer(&mut engine, &[1], 200.0),
            Offer::Rejected(RejectReason::LongConnectionLimit)
        );
    }

    #[test]
    fn test_schedule_repeat_limit() {
        let mut config = split(2, 0.5, 0.5);
        config.schedule_repeat_limit = Some(1);
        let mut engine = DecisionEngine::new(grid(&[3, 3]), config)
            .unwrap()
            .with_classifier(by_inbound)
            .unwrap();
        assert_eq!(offer(&mut engine, &[0, 0], 100.0), Offer::Accepted);
        assert_eq!(
            offer(&mut engine, &[0, 1], 100.0),
            Offer::Rejected(RejectReason::ScheduleRepeatLimit)
        );
        // replacing the only user of (0, 0) frees the slot
        assert!(matches!(offer(&mut engine, &[1, 0], 90.0), Offer::Swapped { .. }));
    }

    #[test]
    fn test_purge_option() {
        let mut engine = DecisionEngine::new(grid(&[3, 2]), split(4, 0.5, 0.5))
            .unwrap()
            .with_classifier(by_inbound)
            .unwrap();
        offer(&mut engine, &[0, 0], 100.0);
        offer(&mut engine, &[0, 1], 100.0);
        offer(&mut engine, &[1, 1], 100.0);
        let purged = engine.purge_option(0, 0).unwrap();
        assert_eq!(purged.len(), 2);
        assert_eq!(accepted_tuples(&engine), vec![vec![1, 1]]);
        assert_eq!(engine.stats().sop_count(0, 0), 0);
        assert_eq!(engine.stats().accepted_count(), 1);
    }

    #[test]
    fn test_reconciliation_exceeds_then_trims() {
        let mut engine = DecisionEngine::new(grid(&[3, 2]), split(2, 0.5, 0.5))
            .unwrap()
            .with_classifier(by_inbound)
            .unwrap();
        offer(&mut engine, &[0, 0], 100.0);
        offer(&mut engine, &[1, 0], 110.0);
        assert_eq!(offer(&mut engine, &[0, 1], 500.0), Offer::Rejected(RejectReason::QuotaFull));

        engine.begin_reconciliation();
        assert_eq!(offer(&mut engine, &[0, 1], 500.0), Offer::Accepted);
        assert_eq!(engine.accepted().len(), 3);

        let trimmed = engine.finish_reconciliation().unwrap();
        assert_eq!(trimmed, vec![Combination::new(vec![1, 0])]);
        assert_eq!(accepted_tuples(&engine), vec![vec![0, 0], vec![0, 1]]);
        assert!(!engine.is_reconciling());
    }

    /// Odd options are Ugly, even ones Gold
    fn by_parity(c: &Combination, _: &CombinationInfo, _: &PricedResult) -> Option<Bucket> {
        Some(if c.sops[0] % 2 == 1 { Bucket::Ugly } else { Bucket::Gold })
    }

    fn custom_engine() -> DecisionEngine {
        let itinerary = one_leg(vec![
            LegOption::new("AA", 480, 300),
            LegOption::new("AA", 600, 300),
            LegOption::new("AA", 700, 600).custom(),
        ]);
        let mut config = split(2, 0.5, 0.5);
        config.num_custom_solutions = 1;
        DecisionEngine::new(itinerary, config)
            .unwrap()
            .with_classifier(by_parity)
            .unwrap()
    }

    #[test]
    fn test_custom_candidate_swaps_in_when_full() {
        let mut engine = custom_engine();
        assert_eq!(offer(&mut engine, &[0], 100.0), Offer::Accepted);
        assert_eq!(offer(&mut engine, &[1], 100.0), Offer::Accepted);
        assert!(engine.requirements().contains(Requirements::NEED_CUSTOM));

        assert_eq!(
            offer(&mut engine, &[2], 200.0),
            Offer::Swapped {
                evicted: Combination::new(vec![0])
            }
        );
        assert_eq!(engine.stats().custom_count(), 1);
        assert!(engine.requirements().is_empty());
    }

    #[test]
    fn test_reconciliation_keeps_admitted_custom() {
        let mut engine = custom_engine();
        offer(&mut engine, &[0], 100.0);
        offer(&mut engine, &[1], 100.0);

        engine.begin_reconciliation();
        assert_eq!(offer(&mut engine, &[2], 200.0), Offer::Accepted);
        let trimmed = engine.finish_reconciliation().unwrap();

        assert_eq!(trimmed, vec![Combination::new(vec![0])]);
        assert_eq!(accepted_tuples(&engine), vec![vec![1], vec![2]]);
        assert_eq!(engine.stats().custom_count(), 1);
        assert!(engine.requirements().is_empty());
    }

    #[test]
    fn test_tod_share_drives_swap() {
        let itinerary = one_leg(vec![
            LegOption::new("AA", 480, 300),
            LegOption::new("AA", 600, 300),
            LegOption::new("AA", 900, 300),
        ]);
        let mut config = all_gold(2);
        config.tod_ranges = vec![TodRange::new(0, 719), TodRange::new(720, 1439)];
        config.tod_distribution = vec![0.5, 0.5];
        let mut engine = DecisionEngine::new(itinerary, config).unwrap();

        offer(&mut engine, &[0], 100.0);
        offer(&mut engine, &[1], 110.0);
        assert!(engine.requirements().contains(Requirements::NEED_TOD));

        // dearer than both, but the only afternoon departure
        assert_eq!(
            offer(&mut engine, &[2], 500.0),
            Offer::Swapped {
                evicted: Combination::new(vec![1])
            }
        );
        assert_eq!(engine.stats().tod_count(0), 1);
        assert_eq!(engine.stats().tod_count(1), 1);
        assert!(engine.requirements().is_empty());
    }

    #[test]
    fn test_pending_validation_rejected() {
        let mut engine = DecisionEngine::new(grid(&[2, 2]), QuotaConfig::default()).unwrap();
        let before = engine.stats().snapshot();
        let mut combination = Combination::new(vec![0, 1]);
        combination.status = Combination::pending_bit(1);

        let result = engine.offer(combination, PricedResult::new(100.0, 600)).unwrap();
        assert_eq!(result, Offer::Rejected(RejectReason::PendingValidation));
        assert!(engine.accepted().is_empty());
        assert_eq!(engine.stats().snapshot(), before);
    }

    #[test]
    fn test_purge_retires_option() {
        let mut config = split(4, 0.5, 0.5);
        config.represent_all_options = true;
        let mut engine = DecisionEngine::new(grid(&[3, 2]), config)
            .unwrap()
            .with_classifier(by_inbound)
            .unwrap();
        offer(&mut engine, &[0, 0], 100.0);
        offer(&mut engine, &[1, 1], 100.0);
        assert_eq!(engine.stats().unused_options(0), 1);
        assert!(engine.requirements().contains(Requirements::NEED_OUTBOUNDS));

        engine.purge_option(0, 2).unwrap();
        assert_eq!(engine.stats().unused_options(0), 0);
        assert_eq!(engine.stats().retired_options(), vec![(0, 2)]);
        assert!(!engine.requirements().contains(Requirements::NEED_OUTBOUNDS));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = DecisionEngine::new(grid(&[2]), QuotaConfig::default().with_requested(0));
        assert!(matches!(result, Err(SelectorError::InvalidConfig(_))));
    }

    proptest! {
        #[test]
        fn prop_cap_holds_after_every_offer(
            requested in 1usize..6,
            offers in prop::collection::vec((0usize..4, 0usize..3, 1u32..100_000), 1..40),
        ) {
            let mut engine = DecisionEngine::new(grid(&[4, 3]), QuotaConfig::default().with_requested(requested)).unwrap();
            for (a, b, cents) in offers {
                let result = engine.offer(Combination::new(vec![a, b]), PricedResult::new(cents as f64 / 100.0, 300 + 20 * a as u32));
                prop_assert!(result.is_ok());
                prop_assert!(engine.accepted().len() <= requested);
                prop_assert_eq!(engine.stats().accepted_count(), engine.accepted().len());
            }
        }
    }
}
