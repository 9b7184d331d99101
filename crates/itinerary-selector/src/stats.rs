//! Incremental statistics over the accepted set
//!
//! Every counter is updated on accept and on evict, never recomputed in the
//! steady state. Removal is the exact inverse of addition: the entry handed to
//! [`StatsAggregator::remove_solution`] carries the bucket it was counted under.
//!
//! Which statistics are maintained is the OR of what the current subscribers
//! asked for. Enabling a statistic resets it and replays the accepted set;
//! disabled statistics are cleared and then left alone.

use crate::accepted::{AcceptedEntry, AcceptedSet};
use crate::{price_key, Bucket, NsBucket, Result, SelectorError, SolutionPattern};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::ops::{BitOr, BitOrAssign};
use tracing::debug;

/// Set of statistics to maintain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct StatFlags(u32);

impl StatFlags {
    pub const NONE: StatFlags = StatFlags(0);
    pub const MIN_PRICE: StatFlags = StatFlags(1 << 0);
    pub const AVG_PRICE: StatFlags = StatFlags(1 << 1);
    pub const MAX_PRICE: StatFlags = StatFlags(1 << 2);
    pub const MIN_DURATION: StatFlags = StatFlags(1 << 3);
    pub const AVG_DURATION: StatFlags = StatFlags(1 << 4);
    pub const NON_STOP_COUNT: StatFlags = StatFlags(1 << 5);
    pub const NON_STOP_CARRIERS: StatFlags = StatFlags(1 << 6);
    pub const CARRIERS: StatFlags = StatFlags(1 << 7);
    pub const TOD: StatFlags = StatFlags(1 << 8);
    pub const SOP_PAIRING: StatFlags = StatFlags(1 << 9);
    pub const BUCKETS: StatFlags = StatFlags(1 << 10);
    pub const BUCKET_PRICES: StatFlags = StatFlags(1 << 11);
    pub const CUSTOM_SOLUTION: StatFlags = StatFlags(1 << 12);
    pub const LONG_CONNECTION: StatFlags = StatFlags(1 << 13);
    /// Implies [`StatFlags::SOP_PAIRING`]
    pub const UNUSED_SOPS: StatFlags = StatFlags(1 << 14);
    pub const THRU_PATTERN: StatFlags = StatFlags(1 << 15);
    pub const ALL: StatFlags = StatFlags((1 << 16) - 1);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits_truncate(bits: u32) -> Self {
        StatFlags(bits & Self::ALL.0)
    }

    pub fn contains(self, other: StatFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: StatFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn difference(self, other: StatFlags) -> StatFlags {
        StatFlags(self.0 & !other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    fn normalized(self) -> StatFlags {
        if self.contains(Self::UNUSED_SOPS) {
            self | Self::SOP_PAIRING
        } else {
            self
        }
    }
}

impl BitOr for StatFlags {
    type Output = StatFlags;

    fn bitor(self, rhs: StatFlags) -> StatFlags {
        StatFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for StatFlags {
    fn bitor_assign(&mut self, rhs: StatFlags) {
        self.0 |= rhs.0;
    }
}

/// Identity of one statistics consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriberId(u32);

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct RunningMean {
    count: usize,
    mean: f64,
}

impl RunningMean {
    fn add(&mut self, x: f64) {
        self.count += 1;
        self.mean += (x - self.mean) / self.count as f64;
    }

    fn remove(&mut self, x: f64) {
        match self.count {
            0 => {}
            1 => *self = RunningMean::default(),
            n => {
                self.mean = (self.mean * n as f64 - x) / (n - 1) as f64;
                self.count = n - 1;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delta {
    Add,
    Remove,
}

fn bump<K: Ord>(map: &mut BTreeMap<K, usize>, key: K, delta: Delta) {
    match delta {
        Delta::Add => *map.entry(key).or_insert(0) += 1,
        Delta::Remove => {
            if let Some(count) = map.get_mut(&key) {
                *count -= 1;
                if *count == 0 {
                    map.remove(&key);
                }
            }
        }
    }
}

fn step(counter: &mut usize, delta: Delta) {
    match delta {
        Delta::Add => *counter += 1,
        Delta::Remove => *counter = counter.saturating_sub(1),
    }
}

fn cents(key: i64) -> f64 {
    key as f64 / 100.0
}

/// Read-only copy of every counter, for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub enabled: u32,
    pub accepted: usize,
    pub min_price: Option<f64>,
    pub avg_price: f64,
    pub max_price: Option<f64>,
    pub min_duration: Option<u32>,
    pub avg_duration: f64,
    pub non_stop: usize,
    pub ns_buckets: [usize; NsBucket::COUNT],
    pub non_stop_carriers: BTreeMap<String, usize>,
    pub carriers: BTreeMap<String, usize>,
    pub interline: usize,
    pub tod: Vec<usize>,
    pub buckets: [usize; Bucket::COUNT],
    pub bucket_min_price: [Option<f64>; Bucket::COUNT],
    pub bucket_avg_price: [f64; Bucket::COUNT],
    pub bucket_max_price: [Option<f64>; Bucket::COUNT],
    pub custom: usize,
    pub long_connection: usize,
    pub thru: usize,
    pub unused_per_leg: Vec<usize>,
}

/// Running counters over the accepted set
#[derive(Debug)]
pub struct StatsAggregator {
    subscribers: HashMap<SubscriberId, StatFlags>,
    next_id: u32,
    enabled: StatFlags,
    leg_sizes: Vec<usize>,

    accepted: usize,
    prices: BTreeMap<i64, usize>,
    avg_price: RunningMean,
    durations: BTreeMap<u32, usize>,
    avg_duration: RunningMean,
    non_stop: usize,
    ns_buckets: [usize; NsBucket::COUNT],
    non_stop_carriers: BTreeMap<String, usize>,
    carriers: BTreeMap<String, usize>,
    interline: usize,
    tod: Vec<usize>,
    sops: Vec<Vec<usize>>,
    unused: Vec<usize>,
    /// Options that can no longer appear in any accepted combination
    retired: Vec<Vec<bool>>,
    buckets: [usize; Bucket::COUNT],
    bucket_prices: [BTreeMap<i64, usize>; Bucket::COUNT],
    bucket_avg: [RunningMean; Bucket::COUNT],
    custom: usize,
    long_connection: usize,
    thru: usize,
}

impl StatsAggregator {
    pub fn new(leg_sizes: &[usize]) -> Self {
        Self {
            subscribers: HashMap::new(),
            next_id: 0,
            enabled: StatFlags::NONE,
            leg_sizes: leg_sizes.to_vec(),
            accepted: 0,
            prices: BTreeMap::new(),
            avg_price: RunningMean::default(),
            durations: BTreeMap::new(),
            avg_duration: RunningMean::default(),
            non_stop: 0,
            ns_buckets: [0; NsBucket::COUNT],
            non_stop_carriers: BTreeMap::new(),
            carriers: BTreeMap::new(),
            interline: 0,
            tod: Vec::new(),
            sops: leg_sizes.iter().map(|&n| vec![0; n]).collect(),
            unused: leg_sizes.to_vec(),
            retired: leg_sizes.iter().map(|&n| vec![false; n]).collect(),
            buckets: [0; Bucket::COUNT],
            bucket_prices: Default::default(),
            bucket_avg: [RunningMean::default(); Bucket::COUNT],
            custom: 0,
            long_connection: 0,
            thru: 0,
        }
    }

    pub fn enabled(&self) -> StatFlags {
        self.enabled
    }

    /// Register a consumer and enable what it asks for
    pub fn subscribe(&mut self, flags: StatFlags, accepted: &AcceptedSet) -> SubscriberId {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;
        self.subscribers.insert(id, flags);
        self.recompute(accepted);
        id
    }

    /// Replace the statistics a consumer asks for
    pub fn resubscribe(
        &mut self,
        id: SubscriberId,
        flags: StatFlags,
        accepted: &AcceptedSet,
    ) -> Result<()> {
        let slot = self
            .subscribers
            .get_mut(&id)
            .ok_or(SelectorError::UnknownSubscriber)?;
        *slot = flags;
        self.recompute(accepted);
        Ok(())
    }

    pub fn unsubscribe(&mut self, id: SubscriberId, accepted: &AcceptedSet) -> Result<()> {
        self.subscribers
            .remove(&id)
            .ok_or(SelectorError::UnknownSubscriber)?;
        self.recompute(accepted);
        Ok(())
    }

    fn recompute(&mut self, accepted: &AcceptedSet) {
        let wanted = self
            .subscribers
            .values()
            .fold(StatFlags::NONE, |acc, &f| acc | f)
            .normalized();
        let newly = wanted.difference(self.enabled);
        let dropped = self.enabled.difference(wanted);
        self.enabled = wanted;
        if !dropped.is_empty() {
            self.reset(dropped);
        }
        if !newly.is_empty() {
            debug!("Enabling statistics {:#06x}, replaying {} accepted", newly.bits(), accepted.len());
            self.replay(newly, accepted);
        }
    }

    /// Reset the given statistics and rebuild them from the accepted set.
    /// Only statistics that are currently enabled are rebuilt.
    pub fn replay(&mut self, flags: StatFlags, accepted: &AcceptedSet) {
        let flags = StatFlags(flags.normalized().0 & self.enabled.0);
        self.reset(flags);
        for entry in accepted.iter() {
            self.apply(flags, entry, Delta::Add);
        }
    }

    pub fn add_solution(&mut self, entry: &AcceptedEntry) {
        self.accepted += 1;
        self.apply(self.enabled, entry, Delta::Add);
    }

    pub fn remove_solution(&mut self, entry: &AcceptedEntry) {
        self.accepted = self.accepted.saturating_sub(1);
        self.apply(self.enabled, entry, Delta::Remove);
    }

    fn apply(&mut self, flags: StatFlags, entry: &AcceptedEntry, delta: Delta) {
        let price = entry.priced.price;
        let key = price_key(price);
        let info = &entry.info;

        if flags.intersects(StatFlags::MIN_PRICE | StatFlags::MAX_PRICE) {
            bump(&mut self.prices, key, delta);
        }
        if flags.contains(StatFlags::AVG_PRICE) {
            match delta {
                Delta::Add => self.avg_price.add(price),
                Delta::Remove => self.avg_price.remove(price),
            }
        }
        if flags.contains(StatFlags::MIN_DURATION) {
            bump(&mut self.durations, entry.priced.duration, delta);
        }
        if flags.contains(StatFlags::AVG_DURATION) {
            let minutes = entry.priced.duration as f64;
            match delta {
                Delta::Add => self.avg_duration.add(minutes),
                Delta::Remove => self.avg_duration.remove(minutes),
            }
        }
        if flags.contains(StatFlags::NON_STOP_COUNT) {
            if let Some(ns) = info.ns_bucket() {
                step(&mut self.non_stop, delta);
                step(&mut self.ns_buckets[ns.index()], delta);
            }
        }
        if flags.contains(StatFlags::NON_STOP_CARRIERS) {
            if let Some(carrier) = info.online_non_stop_carrier() {
                bump(&mut self.non_stop_carriers, carrier.to_string(), delta);
            }
        }
        if flags.contains(StatFlags::CARRIERS) {
            match &info.carrier {
                Some(carrier) => bump(&mut self.carriers, carrier.clone(), delta),
                None => step(&mut self.interline, delta),
            }
        }
        if flags.contains(StatFlags::TOD) {
            if let Some(tod) = info.tod_bucket {
                if tod >= self.tod.len() {
                    self.tod.resize(tod + 1, 0);
                }
                step(&mut self.tod[tod], delta);
            }
        }
        if flags.contains(StatFlags::SOP_PAIRING) {
            self.apply_sops(&entry.combination.sops, delta);
        }
        if let Some(bucket) = entry.bucket {
            if flags.contains(StatFlags::BUCKETS) {
                step(&mut self.buckets[bucket.index()], delta);
            }
            if flags.contains(StatFlags::BUCKET_PRICES) {
                bump(&mut self.bucket_prices[bucket.index()], key, delta);
                match delta {
                    Delta::Add => self.bucket_avg[bucket.index()].add(price),
                    Delta::Remove => self.bucket_avg[bucket.index()].remove(price),
                }
            }
        }
        if flags.contains(StatFlags::CUSTOM_SOLUTION) && info.custom {
            step(&mut self.custom, delta);
        }
        if flags.contains(StatFlags::LONG_CONNECTION) && info.long_connection {
            step(&mut self.long_connection, delta);
        }
        if flags.contains(StatFlags::THRU_PATTERN) && entry.combination.pattern == SolutionPattern::Thru {
            step(&mut self.thru, delta);
        }
    }

    fn apply_sops(&mut self, sops: &[usize], delta: Delta) {
        for (leg, &option) in sops.iter().enumerate() {
            let Some(count) = self.sops.get_mut(leg).and_then(|l| l.get_mut(option)) else {
                continue;
            };
            let retired = self.retired[leg][option];
            match delta {
                Delta::Add => {
                    if *count == 0 && !retired {
                        self.unused[leg] -= 1;
                    }
                    *count += 1;
                }
                Delta::Remove => {
                    if *count == 1 && !retired {
                        self.unused[leg] += 1;
                    }
                    *count = count.saturating_sub(1);
                }
            }
        }
    }

    fn reset(&mut self, flags: StatFlags) {
        if flags.intersects(StatFlags::MIN_PRICE | StatFlags::MAX_PRICE) {
            self.prices.clear();
        }
        if flags.contains(StatFlags::AVG_PRICE) {
            self.avg_price = RunningMean::default();
        }
        if flags.contains(StatFlags::MIN_DURATION) {
            self.durations.clear();
        }
        if flags.contains(StatFlags::AVG_DURATION) {
            self.avg_duration = RunningMean::default();
        }
        if flags.contains(StatFlags::NON_STOP_COUNT) {
            self.non_stop = 0;
            self.ns_buckets = [0; NsBucket::COUNT];
        }
        if flags.contains(StatFlags::NON_STOP_CARRIERS) {
            self.non_stop_carriers.clear();
        }
        if flags.contains(StatFlags::CARRIERS) {
            self.carriers.clear();
            self.interline = 0;
        }
        if flags.contains(StatFlags::TOD) {
            self.tod.clear();
        }
        if flags.contains(StatFlags::SOP_PAIRING) {
            self.sops = self.leg_sizes.iter().map(|&n| vec![0; n]).collect();
            self.unused = self
                .retired
                .iter()
                .map(|leg| leg.iter().filter(|&&r| !r).count())
                .collect();
        }
        if flags.contains(StatFlags::BUCKETS) {
            self.buckets = [0; Bucket::COUNT];
        }
        if flags.contains(StatFlags::BUCKET_PRICES) {
            self.bucket_prices = Default::default();
            self.bucket_avg = [RunningMean::default(); Bucket::COUNT];
        }
        if flags.contains(StatFlags::CUSTOM_SOLUTION) {
            self.custom = 0;
        }
        if flags.contains(StatFlags::LONG_CONNECTION) {
            self.long_connection = 0;
        }
        if flags.contains(StatFlags::THRU_PATTERN) {
            self.thru = 0;
        }
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted
    }

    pub fn bucket_count(&self, bucket: Bucket) -> usize {
        self.buckets[bucket.index()]
    }

    pub fn bucket_counts(&self) -> [usize; Bucket::COUNT] {
        self.buckets
    }

    pub fn carrier_count(&self, carrier: &str) -> usize {
        self.carriers.get(carrier).copied().unwrap_or(0)
    }

    pub fn interline_count(&self) -> usize {
        self.interline
    }

    pub fn non_stop_count(&self) -> usize {
        self.non_stop
    }

    pub fn ns_bucket_count(&self, bucket: NsBucket) -> usize {
        self.ns_buckets[bucket.index()]
    }

    pub fn non_stop_carrier_count(&self, carrier: &str) -> usize {
        self.non_stop_carriers.get(carrier).copied().unwrap_or(0)
    }

    pub fn non_stop_carriers(&self) -> &BTreeMap<String, usize> {
        &self.non_stop_carriers
    }

    /// Accepted combinations using (leg, option)
    pub fn sop_count(&self, leg: usize, option: usize) -> usize {
        self.sops
            .get(leg)
            .and_then(|l| l.get(option))
            .copied()
            .unwrap_or(0)
    }

    /// Options of `leg` that appear in no accepted combination and have not
    /// been retired
    pub fn unused_options(&self, leg: usize) -> usize {
        self.unused.get(leg).copied().unwrap_or(0)
    }

    /// Take an option out of the unused count for good. Accepted
    /// combinations using it must already have been removed.
    pub fn retire_option(&mut self, leg: usize, option: usize) {
        let Some(flag) = self.retired.get_mut(leg).and_then(|l| l.get_mut(option)) else {
            return;
        };
        if *flag {
            return;
        }
        *flag = true;
        if self.enabled.contains(StatFlags::SOP_PAIRING) && self.sop_count(leg, option) == 0 {
            self.unused[leg] = self.unused[leg].saturating_sub(1);
        }
    }

    pub fn retired_options(&self) -> Vec<(usize, usize)> {
        self.retired
            .iter()
            .enumerate()
            .flat_map(|(leg, options)| {
                options
                    .iter()
                    .enumerate()
                    .filter(|(_, &r)| r)
                    .map(move |(option, _)| (leg, option))
            })
            .collect()
    }

    pub fn tod_count(&self, tod: usize) -> usize {
        self.tod.get(tod).copied().unwrap_or(0)
    }

    /// Remaining options needed per TOD range given per-range targets
    pub fn tod_needed(&self, targets: &[usize]) -> Vec<usize> {
        targets
            .iter()
            .enumerate()
            .map(|(tod, &target)| target.saturating_sub(self.tod_count(tod)))
            .collect()
    }

    pub fn min_price(&self) -> Option<f64> {
        self.prices.keys().next().copied().map(cents)
    }

    pub fn max_price(&self) -> Option<f64> {
        self.prices.keys().next_back().copied().map(cents)
    }

    pub fn avg_price(&self) -> f64 {
        self.avg_price.mean
    }

    pub fn min_duration(&self) -> Option<u32> {
        self.durations.keys().next().copied()
    }

    pub fn avg_duration(&self) -> f64 {
        self.avg_duration.mean
    }

    pub fn bucket_min_price(&self, bucket: Bucket) -> Option<f64> {
        self.bucket_prices[bucket.index()].keys().next().copied().map(cents)
    }

    pub fn bucket_max_price(&self, bucket: Bucket) -> Option<f64> {
        self.bucket_prices[bucket.index()]
            .keys()
            .next_back()
            .copied()
            .map(cents)
    }

    pub fn bucket_avg_price(&self, bucket: Bucket) -> f64 {
        self.bucket_avg[bucket.index()].mean
    }

    pub fn custom_count(&self) -> usize {
        self.custom
    }

    pub fn long_connection_count(&self) -> usize {
        self.long_connection
    }

    pub fn thru_count(&self) -> usize {
        self.thru
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enabled: self.enabled.bits(),
            accepted: self.accepted,
            min_price: self.min_price(),
            avg_price: self.avg_price(),
            max_price: self.max_price(),
            min_duration: self.min_duration(),
            avg_duration: self.avg_duration(),
            non_stop: self.non_stop,
            ns_buckets: self.ns_buckets,
            non_stop_carriers: self.non_stop_carriers.clone(),
            carriers: self.carriers.clone(),
            interline: self.interline,
            tod: self.tod.clone(),
            buckets: self.buckets,
            bucket_min_price: Bucket::ALL.map(|b| self.bucket_min_price(b)),
            bucket_avg_price: Bucket::ALL.map(|b| self.bucket_avg_price(b)),
            bucket_max_price: Bucket::ALL.map(|b| self.bucket_max_price(b)),
            custom: self.custom,
            long_connection: self.long_connection,
            thru: self.thru,
            unused_per_leg: self.unused.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Combination, CombinationInfo, PricedResult};
    use proptest::prelude::*;

    fn entry(sops: &[usize], price: f64, bucket: Bucket, carrier: Option<&str>, non_stop: bool) -> AcceptedEntry {
        AcceptedEntry::new(
            Combination::new(sops.to_vec()),
            PricedResult::new(price, 300 + 10 * sops[0] as u32),
            CombinationInfo {
                carrier: carrier.map(str::to_string),
                non_stop,
                long_connection: sops[0] == 2,
                custom: sops[1] == 0,
                tod_bucket: Some(sops[0] % 2),
                departures: vec![480, 1020],
            },
            Some(bucket),
        )
    }

    fn close(a: &StatsSnapshot, b: &StatsSnapshot) -> bool {
        let mut a = a.clone();
        let mut b = b.clone();
        let avg_ok = (a.avg_price - b.avg_price).abs() < 1e-6
            && (a.avg_duration - b.avg_duration).abs() < 1e-6
            && a.bucket_avg_price
                .iter()
                .zip(&b.bucket_avg_price)
                .all(|(x, y)| (x - y).abs() < 1e-6);
        a.avg_price = 0.0;
        b.avg_price = 0.0;
        a.avg_duration = 0.0;
        b.avg_duration = 0.0;
        a.bucket_avg_price = [0.0; Bucket::COUNT];
        b.bucket_avg_price = [0.0; Bucket::COUNT];
        // tod grows lazily; trailing zeros carry no information
        while a.tod.last() == Some(&0) {
            a.tod.pop();
        }
        while b.tod.last() == Some(&0) {
            b.tod.pop();
        }
        avg_ok && a == b
    }

    fn all_stats(legs: &[usize]) -> (StatsAggregator, AcceptedSet) {
        let set = AcceptedSet::new();
        let mut stats = StatsAggregator::new(legs);
        stats.subscribe(StatFlags::ALL, &set);
        (stats, set)
    }

    #[test]
    fn test_flags_algebra() {
        let f = StatFlags::MIN_PRICE | StatFlags::BUCKETS;
        assert!(f.contains(StatFlags::BUCKETS));
        assert!(!f.contains(StatFlags::MIN_PRICE | StatFlags::TOD));
        assert!(f.intersects(StatFlags::MIN_PRICE | StatFlags::TOD));
        assert_eq!(f.difference(StatFlags::BUCKETS), StatFlags::MIN_PRICE);
        assert_eq!(StatFlags::from_bits_truncate(u32::MAX), StatFlags::ALL);
    }

    #[test]
    fn test_add_updates_counters() {
        let (mut stats, _) = all_stats(&[3, 2]);
        stats.add_solution(&entry(&[0, 0], 100.0, Bucket::Gold, Some("AA"), true));
        stats.add_solution(&entry(&[1, 1], 150.0, Bucket::Junk, None, true));
        stats.add_solution(&entry(&[2, 1], 50.0, Bucket::Gold, Some("UA"), false));

        assert_eq!(stats.accepted_count(), 3);
        assert_eq!(stats.bucket_count(Bucket::Gold), 2);
        assert_eq!(stats.min_price(), Some(50.0));
        assert_eq!(stats.max_price(), Some(150.0));
        assert!((stats.avg_price() - 100.0).abs() < 1e-9);
        assert_eq!(stats.bucket_min_price(Bucket::Gold), Some(50.0));
        assert_eq!(stats.non_stop_count(), 2);
        assert_eq!(stats.ns_bucket_count(NsBucket::Online), 1);
        assert_eq!(stats.ns_bucket_count(NsBucket::Interline), 1);
        assert_eq!(stats.non_stop_carrier_count("AA"), 1);
        assert_eq!(stats.non_stop_carrier_count("UA"), 0);
        assert_eq!(stats.carrier_count("UA"), 1);
        assert_eq!(stats.interline_count(), 1);
        assert_eq!(stats.sop_count(1, 1), 2);
        assert_eq!(stats.unused_options(0), 0);
        assert_eq!(stats.unused_options(1), 0);
        assert_eq!(stats.tod_needed(&[2, 2]), vec![0, 1]);
        assert_eq!(stats.custom_count(), 1);
        assert_eq!(stats.long_connection_count(), 1);
        assert_eq!(stats.thru_count(), 3);
        assert_eq!(stats.min_duration(), Some(300));
    }

    #[test]
    fn test_remove_is_exact_inverse_for_extrema() {
        let (mut stats, _) = all_stats(&[3, 2]);
        let cheap = entry(&[0, 0], 80.0, Bucket::Gold, Some("AA"), false);
        let dear = entry(&[1, 0], 120.0, Bucket::Gold, Some("AA"), false);
        stats.add_solution(&cheap);
        stats.add_solution(&dear);
        stats.remove_solution(&cheap);
        assert_eq!(stats.min_price(), Some(120.0));
        assert!((stats.avg_price() - 120.0).abs() < 1e-9);
        assert_eq!(stats.unused_options(0), 2);
        stats.remove_solution(&dear);
        assert_eq!(stats.min_price(), None);
        assert_eq!(stats.avg_price(), 0.0);
        assert_eq!(stats.unused_options(0), 3);
    }

    #[test]
    fn test_retired_option_leaves_unused_count() {
        let (mut stats, _) = all_stats(&[3, 2]);
        let e = entry(&[0, 0], 80.0, Bucket::Gold, Some("AA"), false);
        stats.add_solution(&e);
        assert_eq!(stats.unused_options(0), 2);

        stats.retire_option(0, 2);
        stats.retire_option(0, 2);
        assert_eq!(stats.unused_options(0), 1);
        assert_eq!(stats.retired_options(), vec![(0, 2)]);

        stats.remove_solution(&e);
        assert_eq!(stats.unused_options(0), 2);

        // a fresh pairing count keeps the retirement
        stats.replay(StatFlags::SOP_PAIRING, &AcceptedSet::new());
        assert_eq!(stats.unused_options(0), 2);
        assert_eq!(stats.unused_options(1), 2);
    }

    #[test]
    fn test_disabled_stats_not_updated() {
        let set = AcceptedSet::new();
        let mut stats = StatsAggregator::new(&[2, 2]);
        stats.subscribe(StatFlags::BUCKETS, &set);
        stats.add_solution(&entry(&[0, 0], 80.0, Bucket::Gold, Some("AA"), true));
        assert_eq!(stats.bucket_count(Bucket::Gold), 1);
        assert_eq!(stats.min_price(), None);
        assert_eq!(stats.non_stop_count(), 0);
        assert_eq!(stats.accepted_count(), 1);
    }

    #[test]
    fn test_subscription_is_or_of_subscribers() {
        let mut set = AcceptedSet::new();
        let e = entry(&[0, 0], 80.0, Bucket::Gold, Some("AA"), true);
        set.insert(e.clone());

        let mut stats = StatsAggregator::new(&[2, 2]);
        let a = stats.subscribe(StatFlags::BUCKETS, &set);
        let b = stats.subscribe(StatFlags::MIN_PRICE, &set);
        assert_eq!(stats.enabled(), StatFlags::BUCKETS | StatFlags::MIN_PRICE);
        // newly enabled stats replay the accepted set
        assert_eq!(stats.min_price(), Some(80.0));
        assert_eq!(stats.bucket_count(Bucket::Gold), 1);

        stats.unsubscribe(b, &set).unwrap();
        assert_eq!(stats.enabled(), StatFlags::BUCKETS);
        assert_eq!(stats.min_price(), None);

        stats.resubscribe(a, StatFlags::UNUSED_SOPS, &set).unwrap();
        assert!(stats.enabled().contains(StatFlags::SOP_PAIRING));
        assert_eq!(stats.unused_options(0), 1);
        assert_eq!(stats.bucket_count(Bucket::Gold), 0);

        assert!(matches!(stats.unsubscribe(b, &set), Err(SelectorError::UnknownSubscriber)));
    }

    #[test]
    fn test_replay_rebuilds_buckets() {
        let mut set = AcceptedSet::new();
        let mut stats = StatsAggregator::new(&[2, 2]);
        stats.subscribe(StatFlags::ALL, &set);
        let mut unclassified = entry(&[0, 1], 70.0, Bucket::Gold, Some("AA"), false);
        unclassified.bucket = None;
        stats.add_solution(&unclassified);
        set.insert(unclassified);
        assert_eq!(stats.bucket_count(Bucket::Gold), 0);

        for e in set.iter_mut() {
            e.bucket = Some(Bucket::Luxury);
        }
        stats.replay(StatFlags::BUCKETS | StatFlags::BUCKET_PRICES, &set);
        assert_eq!(stats.bucket_count(Bucket::Luxury), 1);
        assert_eq!(stats.bucket_max_price(Bucket::Luxury), Some(70.0));
        assert_eq!(stats.accepted_count(), 1);
    }

    proptest! {
        #[test]
        fn prop_add_then_remove_in_reverse_restores_counters(
            base in prop::collection::vec((0usize..3, 0usize..3, 1u32..50_000, 0usize..4, any::<bool>()), 0..5),
            seq in prop::collection::vec((0usize..3, 0usize..3, 1u32..50_000, 0usize..4, any::<bool>()), 1..12),
        ) {
            let make = |(a, b, cents, bucket, ns): (usize, usize, u32, usize, bool)| {
                let carrier = if a == 1 { None } else { Some("AA") };
                entry(&[a, b], cents as f64 / 100.0, Bucket::ALL[bucket], carrier, ns)
            };
            let (mut stats, _) = all_stats(&[3, 3]);
            for &t in &base {
                stats.add_solution(&make(t));
            }
            let before = stats.snapshot();
            let added: Vec<_> = seq.iter().map(|&t| make(t)).collect();
            for e in &added {
                stats.add_solution(e);
            }
            for e in added.iter().rev() {
                stats.remove_solution(e);
            }
            prop_assert!(close(&before, &stats.snapshot()));
        }
    }
}
