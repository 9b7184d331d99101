//! Swap victim selection and the tie-break between two results
//!
//! Ranking is lexicographic:
//!
//! 1. lower price, when the prices differ by more than [`PRICE_COMP_DELTA`]
//! 2. larger spread: summed circular departure distance to the other members
//!    of the bucket
//! 3. lower index tuple
//!
//! The worst occupant of a bucket is the one every other member outranks.
//!
//! Candidates that serve a requirement other than a bucket quota do not
//! compete on price: they replace the most expensive occupant whose removal
//! leaves no requirement short.

use crate::accepted::{AcceptedEntry, AcceptedSet};
use crate::config::QuotaConfig;
use crate::requirements::{Contribution, Requirements};
use crate::stats::StatsAggregator;
use crate::{Bucket, CombinationInfo, PRICE_COMP_DELTA};
use std::cmp::Ordering;

/// What the tie-break looks at
#[derive(Debug, Clone, Copy)]
pub struct Contender<'a> {
    pub sops: &'a [usize],
    pub price: f64,
    pub spread: u32,
}

/// `Less` when `a` ranks better than `b`
pub fn rank(a: &Contender<'_>, b: &Contender<'_>) -> Ordering {
    if (a.price - b.price).abs() > PRICE_COMP_DELTA {
        return a.price.total_cmp(&b.price);
    }
    b.spread
        .cmp(&a.spread)
        .then_with(|| a.sops.cmp(b.sops))
}

/// Departure distance from `info` to every member of `bucket` except the
/// tuples in `exclude`
pub fn spread(info: &CombinationInfo, accepted: &AcceptedSet, bucket: Bucket, exclude: &[&[usize]]) -> u32 {
    accepted
        .in_bucket(bucket)
        .filter(|e| !exclude.contains(&e.sops()))
        .map(|e| info.tod_distance(&e.info))
        .sum()
}

fn contender<'a>(entry: &'a AcceptedEntry, accepted: &AcceptedSet, bucket: Bucket) -> Contender<'a> {
    Contender {
        sops: entry.sops(),
        price: entry.price(),
        spread: spread(&entry.info, accepted, bucket, &[entry.sops()]),
    }
}

/// The occupant of `bucket` ranked last
pub fn worst_in_bucket(accepted: &AcceptedSet, bucket: Bucket) -> Option<&AcceptedEntry> {
    accepted
        .in_bucket(bucket)
        .map(|e| (e, contender(e, accepted, bucket)))
        .max_by(|(_, a), (_, b)| rank(a, b))
        .map(|(e, _)| e)
}

/// Whether a candidate outranks `victim`; both are measured against the
/// victim's bucket with the victim itself left out
pub fn candidate_wins(
    sops: &[usize],
    price: f64,
    info: &CombinationInfo,
    victim: &AcceptedEntry,
    accepted: &AcceptedSet,
) -> bool {
    let Some(bucket) = victim.bucket else {
        return false;
    };
    let candidate = Contender {
        sops,
        price,
        spread: spread(info, accepted, bucket, &[victim.sops()]),
    };
    rank(&candidate, &contender(victim, accepted, bucket)) == Ordering::Less
}

/// Buckets holding more than their quota share
pub fn over_represented(config: &QuotaConfig, stats: &StatsAggregator) -> Vec<Bucket> {
    Bucket::ALL
        .into_iter()
        .filter(|&b| stats.bucket_count(b) > config.bucket_quota(b))
        .collect()
}

/// Worst occupant across the over-represented buckets, skipping `keep`.
///
/// Bucket worsts are compared by price first and then by tuple; spreads
/// from different buckets are not comparable.
pub fn over_represented_victim<'a>(
    config: &QuotaConfig,
    stats: &StatsAggregator,
    accepted: &'a AcceptedSet,
    keep: Option<Bucket>,
) -> Option<&'a AcceptedEntry> {
    over_represented(config, stats)
        .into_iter()
        .filter(|&b| Some(b) != keep)
        .filter_map(|b| worst_in_bucket(accepted, b))
        .max_by(most_expensive)
}

/// Highest-priced non-stop whose carrier has no quota or holds more than it.
/// Interline non-stops count as having no quota.
pub fn surplus_non_stop<'a>(
    config: &QuotaConfig,
    stats: &StatsAggregator,
    accepted: &'a AcceptedSet,
) -> Option<&'a AcceptedEntry> {
    accepted
        .iter()
        .filter(|e| e.info.non_stop)
        .filter(|e| match e.info.online_non_stop_carrier() {
            Some(carrier) => match config.non_stop_per_carrier.get(carrier) {
                Some(&quota) => stats.non_stop_carrier_count(carrier) > quota,
                None => true,
            },
            None => true,
        })
        .max_by(most_expensive)
}

fn most_expensive(a: &&AcceptedEntry, b: &&AcceptedEntry) -> Ordering {
    a.price()
        .total_cmp(&b.price())
        .then_with(|| a.sops().cmp(b.sops()))
}

/// Most expensive occupant `candidate` can replace without any requirement
/// falling short
pub fn requirement_victim<'a>(
    config: &QuotaConfig,
    stats: &StatsAggregator,
    accepted: &'a AcceptedSet,
    candidate: Contribution<'_>,
) -> Option<&'a AcceptedEntry> {
    accepted
        .iter()
        .filter(|e| Requirements::lost_by_swap(config, stats, Contribution::of(e), candidate).is_empty())
        .max_by(most_expensive)
}

/// Occupant to drop when trimming back to the cap: the one serving the
/// fewest requirements, the most expensive among equals
pub fn trim_victim<'a>(
    config: &QuotaConfig,
    stats: &StatsAggregator,
    accepted: &'a AcceptedSet,
) -> Option<&'a AcceptedEntry> {
    accepted
        .iter()
        .map(|e| (e, Requirements::served_by(config, stats, Contribution::of(e)).count()))
        .min_by(|(a, served_a), (b, served_b)| served_a.cmp(served_b).then_with(|| most_expensive(b, a)))
        .map(|(e, _)| e)
}
