//! Unmet-requirement tracking
//!
//! A requirement is a counter over the accepted set held against a target:
//! bucket quotas, per-carrier non-stops, total non-stops, custom solutions,
//! time-of-day shares, per-carrier options and, when asked for, one accepted
//! combination per outbound and inbound option. It is unmet while the counter
//! is below its target.
//!
//! Limits (long connections, schedule repeats) are checked by the engine
//! directly and never show up here.

use crate::accepted::AcceptedEntry;
use crate::config::QuotaConfig;
use crate::stats::StatsAggregator;
use crate::{Bucket, CombinationInfo};
use serde::Serialize;
use std::ops::BitOr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Requirements(u16);

impl Requirements {
    pub const NONE: Requirements = Requirements(0);
    pub const NEED_GOLD: Requirements = Requirements(1 << 0);
    pub const NEED_UGLY: Requirements = Requirements(1 << 1);
    pub const NEED_LUXURY: Requirements = Requirements(1 << 2);
    pub const NEED_JUNK: Requirements = Requirements(1 << 3);
    /// Some carrier is below its online non-stop quota
    pub const NEED_NONSTOPS: Requirements = Requirements(1 << 4);
    pub const NEED_CUSTOM: Requirements = Requirements(1 << 5);
    /// Some time-of-day range is below its share
    pub const NEED_TOD: Requirements = Requirements(1 << 6);
    /// Some outbound option appears in no accepted combination
    pub const NEED_OUTBOUNDS: Requirements = Requirements(1 << 7);
    /// Some inbound option appears in no accepted combination
    pub const NEED_INBOUNDS: Requirements = Requirements(1 << 8);
    /// Some carrier is below its option quota
    pub const NEED_CARRIERS: Requirements = Requirements(1 << 9);
    /// Fewer non-stops than wanted in total
    pub const NEED_ADDITIONAL_NONSTOPS: Requirements = Requirements(1 << 10);

    pub const BUCKETS: Requirements = Requirements(0b1111);

    pub fn for_bucket(bucket: Bucket) -> Requirements {
        match bucket {
            Bucket::Gold => Self::NEED_GOLD,
            Bucket::Ugly => Self::NEED_UGLY,
            Bucket::Luxury => Self::NEED_LUXURY,
            Bucket::Junk => Self::NEED_JUNK,
        }
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn contains(self, other: Requirements) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn without(self, other: Requirements) -> Requirements {
        Requirements(self.0 & !other.0)
    }

    /// Everything the accepted set still lacks.
    /// Bucket needs are only known once buckets are assigned.
    pub fn unmet(config: &QuotaConfig, stats: &StatsAggregator, buckets_known: bool) -> Requirements {
        let mut needs = Self::NONE;
        if buckets_known {
            for bucket in Bucket::ALL {
                if stats.bucket_count(bucket) < config.bucket_quota(bucket) {
                    needs = needs | Self::for_bucket(bucket);
                }
            }
        }
        let nonstops_short = config
            .non_stop_per_carrier
            .iter()
            .any(|(carrier, &quota)| stats.non_stop_carrier_count(carrier) < quota);
        if nonstops_short {
            needs = needs | Self::NEED_NONSTOPS;
        }
        if stats.non_stop_count() < config.min_non_stops {
            needs = needs | Self::NEED_ADDITIONAL_NONSTOPS;
        }
        if stats.custom_count() < config.num_custom_solutions {
            needs = needs | Self::NEED_CUSTOM;
        }
        if stats.tod_needed(&config.tod_targets()).iter().any(|&n| n > 0) {
            needs = needs | Self::NEED_TOD;
        }
        let carriers_short = config
            .options_per_carrier
            .iter()
            .any(|(carrier, &quota)| stats.carrier_count(carrier) < quota);
        if carriers_short {
            needs = needs | Self::NEED_CARRIERS;
        }
        if config.represent_all_options {
            if stats.unused_options(0) > 0 {
                needs = needs | Self::NEED_OUTBOUNDS;
            }
            if stats.unused_options(1) > 0 {
                needs = needs | Self::NEED_INBOUNDS;
            }
        }
        needs
    }

    /// The unmet requirements a candidate would help satisfy
    pub fn offered_by(config: &QuotaConfig, stats: &StatsAggregator, candidate: Contribution<'_>) -> Requirements {
        tallies(config, candidate)
            .into_iter()
            .filter(|t| {
                let (held, target) = t.level(config, stats);
                held < target
            })
            .fold(Self::NONE, |acc, t| acc | t.need())
    }

    /// Requirements that would fall short if `entry` left the accepted set
    pub fn served_by(config: &QuotaConfig, stats: &StatsAggregator, entry: Contribution<'_>) -> Requirements {
        held_tallies(config, stats, entry)
            .into_iter()
            .fold(Self::NONE, |acc, t| acc | t.need())
    }

    /// Requirements that would fall short if `incoming` replaced `outgoing`
    pub fn lost_by_swap(
        config: &QuotaConfig,
        stats: &StatsAggregator,
        outgoing: Contribution<'_>,
        incoming: Contribution<'_>,
    ) -> Requirements {
        let replaced = tallies(config, incoming);
        held_tallies(config, stats, outgoing)
            .into_iter()
            .filter(|t| !replaced.contains(t))
            .fold(Self::NONE, |acc, t| acc | t.need())
    }

    /// Short names of the set bits, for summaries
    pub fn names(self) -> Vec<&'static str> {
        [
            (Self::NEED_GOLD, "gold"),
            (Self::NEED_UGLY, "ugly"),
            (Self::NEED_LUXURY, "luxury"),
            (Self::NEED_JUNK, "junk"),
            (Self::NEED_NONSTOPS, "nonstops"),
            (Self::NEED_CUSTOM, "custom"),
            (Self::NEED_TOD, "tod"),
            (Self::NEED_OUTBOUNDS, "outbounds"),
            (Self::NEED_INBOUNDS, "inbounds"),
            (Self::NEED_CARRIERS, "carriers"),
            (Self::NEED_ADDITIONAL_NONSTOPS, "additional_nonstops"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect()
    }
}

impl BitOr for Requirements {
    type Output = Requirements;

    fn bitor(self, rhs: Requirements) -> Requirements {
        Requirements(self.0 | rhs.0)
    }
}

/// The parts of a combination the requirement counters look at
#[derive(Debug, Clone, Copy)]
pub struct Contribution<'a> {
    pub sops: &'a [usize],
    pub info: &'a CombinationInfo,
    pub bucket: Option<Bucket>,
}

impl<'a> Contribution<'a> {
    pub fn of(entry: &'a AcceptedEntry) -> Self {
        Self {
            sops: entry.sops(),
            info: &entry.info,
            bucket: entry.bucket,
        }
    }
}

/// One counter a combination adds to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tally<'a> {
    Bucket(Bucket),
    NonStopCarrier(&'a str),
    NonStops,
    Custom,
    Tod(usize),
    Carrier(&'a str),
    Option { leg: usize, option: usize },
}

impl Tally<'_> {
    fn need(&self) -> Requirements {
        match self {
            Tally::Bucket(bucket) => Requirements::for_bucket(*bucket),
            Tally::NonStopCarrier(_) => Requirements::NEED_NONSTOPS,
            Tally::NonStops => Requirements::NEED_ADDITIONAL_NONSTOPS,
            Tally::Custom => Requirements::NEED_CUSTOM,
            Tally::Tod(_) => Requirements::NEED_TOD,
            Tally::Carrier(_) => Requirements::NEED_CARRIERS,
            Tally::Option { leg: 0, .. } => Requirements::NEED_OUTBOUNDS,
            Tally::Option { .. } => Requirements::NEED_INBOUNDS,
        }
    }

    /// Current count and target
    fn level(&self, config: &QuotaConfig, stats: &StatsAggregator) -> (usize, usize) {
        match *self {
            Tally::Bucket(bucket) => (stats.bucket_count(bucket), config.bucket_quota(bucket)),
            Tally::NonStopCarrier(carrier) => (
                stats.non_stop_carrier_count(carrier),
                config.non_stop_per_carrier.get(carrier).copied().unwrap_or(0),
            ),
            Tally::NonStops => (stats.non_stop_count(), config.min_non_stops),
            Tally::Custom => (stats.custom_count(), config.num_custom_solutions),
            Tally::Tod(tod) => (stats.tod_count(tod), config.tod_target(tod)),
            Tally::Carrier(carrier) => (
                stats.carrier_count(carrier),
                config.options_per_carrier.get(carrier).copied().unwrap_or(0),
            ),
            Tally::Option { leg, option } => (stats.sop_count(leg, option), 1),
        }
    }
}

/// Every counter with a target that the combination adds to
fn tallies<'a>(config: &QuotaConfig, c: Contribution<'a>) -> Vec<Tally<'a>> {
    let mut out = Vec::new();
    if let Some(bucket) = c.bucket {
        out.push(Tally::Bucket(bucket));
    }
    if let Some(carrier) = c.info.online_non_stop_carrier() {
        if config.non_stop_per_carrier.contains_key(carrier) {
            out.push(Tally::NonStopCarrier(carrier));
        }
    }
    if c.info.non_stop && config.min_non_stops > 0 {
        out.push(Tally::NonStops);
    }
    if c.info.custom && config.num_custom_solutions > 0 {
        out.push(Tally::Custom);
    }
    if let Some(tod) = c.info.tod_bucket {
        if config.tod_target(tod) > 0 {
            out.push(Tally::Tod(tod));
        }
    }
    if let Some(carrier) = c.info.carrier.as_deref() {
        if config.options_per_carrier.contains_key(carrier) {
            out.push(Tally::Carrier(carrier));
        }
    }
    if config.represent_all_options {
        out.extend(
            c.sops
                .iter()
                .take(2)
                .enumerate()
                .map(|(leg, &option)| Tally::Option { leg, option }),
        );
    }
    out
}

/// Counters of an accepted combination that sit at or below target, so that
/// removing it leaves them short
fn held_tallies<'a>(config: &QuotaConfig, stats: &StatsAggregator, c: Contribution<'a>) -> Vec<Tally<'a>> {
    tallies(config, c)
        .into_iter()
        .filter(|t| {
            let (held, target) = t.level(config, stats);
            held <= target
        })
        .collect()
}

/// Whether the candidate is an online non-stop of a carrier below its quota
pub fn non_stop_shortfall(config: &QuotaConfig, stats: &StatsAggregator, info: &CombinationInfo) -> bool {
    info.online_non_stop_carrier()
        .and_then(|carrier| {
            config
                .non_stop_per_carrier
                .get(carrier)
                .map(|&quota| stats.non_stop_carrier_count(carrier) < quota)
        })
        .unwrap_or(false)
}
