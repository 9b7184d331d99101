//! Accepted-result collection
//!
//! Owns promoted combinations together with the classification they were
//! counted under. Removal hands the entry back so statistics can be
//! decremented with exactly the bucket used when it was added.

use crate::{Bucket, Combination, CombinationInfo, NsBucket, PricedResult};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceptedEntry {
    pub combination: Combination,
    pub priced: PricedResult,
    pub info: CombinationInfo,
    /// Category bucket at accept time; `None` until calibration installs a classifier
    pub bucket: Option<Bucket>,
}

impl AcceptedEntry {
    pub fn new(
        combination: Combination,
        priced: PricedResult,
        info: CombinationInfo,
        bucket: Option<Bucket>,
    ) -> Self {
        Self {
            combination,
            priced,
            info,
            bucket,
        }
    }

    pub fn sops(&self) -> &[usize] {
        &self.combination.sops
    }

    pub fn price(&self) -> f64 {
        self.priced.price
    }

    pub fn ns_bucket(&self) -> Option<NsBucket> {
        self.info.ns_bucket()
    }
}

/// Accepted combinations keyed by index tuple
#[derive(Debug, Clone, Default, Serialize)]
pub struct AcceptedSet {
    entries: BTreeMap<Vec<usize>, AcceptedEntry>,
}

impl AcceptedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, sops: &[usize]) -> bool {
        self.entries.contains_key(sops)
    }

    pub fn get(&self, sops: &[usize]) -> Option<&AcceptedEntry> {
        self.entries.get(sops)
    }

    /// Insert an entry; returns the previous entry for the same tuple, if any
    pub fn insert(&mut self, entry: AcceptedEntry) -> Option<AcceptedEntry> {
        self.entries.insert(entry.combination.sops.clone(), entry)
    }

    pub fn remove(&mut self, sops: &[usize]) -> Option<AcceptedEntry> {
        self.entries.remove(sops)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AcceptedEntry> {
        self.entries.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut AcceptedEntry> {
        self.entries.values_mut()
    }

    pub fn in_bucket(&self, bucket: Bucket) -> impl Iterator<Item = &AcceptedEntry> {
        self.iter().filter(move |e| e.bucket == Some(bucket))
    }

    /// Tuples of accepted combinations that use (leg, option)
    pub fn referencing(&self, leg: usize, option: usize) -> Vec<Vec<usize>> {
        self.iter()
            .filter(|e| e.combination.references(leg, option))
            .map(|e| e.combination.sops.clone())
            .collect()
    }

    /// Accepted combinations sorted by price, cheapest first
    pub fn by_price(&self) -> Vec<&AcceptedEntry> {
        let mut entries: Vec<_> = self.iter().collect();
        entries.sort_by(|a, b| a.price().total_cmp(&b.price()).then_with(|| a.sops().cmp(b.sops())));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(sops: &[usize], price: f64, bucket: Option<Bucket>) -> AcceptedEntry {
        AcceptedEntry::new(
            Combination::new(sops.to_vec()),
            PricedResult::new(price, 600),
            CombinationInfo {
                carrier: Some("AA".into()),
                non_stop: false,
                long_connection: false,
                custom: false,
                tod_bucket: None,
                departures: vec![0; sops.len()],
            },
            bucket,
        )
    }

    #[test]
    fn test_insert_remove() {
        let mut set = AcceptedSet::new();
        assert!(set.insert(entry(&[0, 0], 100.0, Some(Bucket::Gold))).is_none());
        assert!(set.insert(entry(&[1, 0], 90.0, Some(Bucket::Junk))).is_none());
        assert_eq!(set.len(), 2);
        assert!(set.contains(&[1, 0]));
        let removed = set.remove(&[0, 0]).unwrap();
        assert_eq!(removed.bucket, Some(Bucket::Gold));
        assert!(set.remove(&[0, 0]).is_none());
    }

    #[test]
    fn test_bucket_and_reference_queries() {
        let mut set = AcceptedSet::new();
        set.insert(entry(&[0, 0], 100.0, Some(Bucket::Gold)));
        set.insert(entry(&[0, 1], 80.0, Some(Bucket::Gold)));
        set.insert(entry(&[2, 1], 120.0, None));
        assert_eq!(set.in_bucket(Bucket::Gold).count(), 2);
        assert_eq!(set.referencing(1, 1), vec![vec![0, 1], vec![2, 1]]);
        let prices: Vec<_> = set.by_price().iter().map(|e| e.price()).collect();
        assert_eq!(prices, vec![80.0, 100.0, 120.0]);
    }
}
