//! Itinerary Combination Selector
//!
//! Picks a small, diverse, quota-satisfying subset out of the combinatorial
//! space of multi-leg flight itineraries.
//!
//! # Components
//!
//! | Component       | Module          | Role |
//! |-----------------|-----------------|------|
//! | Enumerator      | [`enumerator`]  | Diagonal-then-shell walk over per-leg option indices |
//! | Candidate pool  | [`pool`]        | Pending combinations, bulk invalidation per (leg, option) |
//! | Statistics      | [`stats`]       | Incremental counters over the accepted set |
//! | Decision engine | [`engine`]      | Accept / reject / swap against quotas and a hard cap |
//!
//! The [`driver`] wires them together around an external [`pricer::Pricer`].
//!
//! # Category Buckets
//!
//! ```text
//!                 duration <= T      duration > T
//! price <= P      Gold               Ugly
//! price >  P      Luxury             Junk
//! ```
//!
//! `P` (fare-amount separator) and `T` (travel-time separator) are either
//! configured up front or calibrated once the requested count is first reached.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod accepted;
pub mod classify;
pub mod config;
pub mod driver;
pub mod engine;
pub mod enumerator;
pub mod loader;
pub mod pool;
pub mod pricer;
pub mod requirements;
pub mod stats;
pub mod swapper;

pub use accepted::{AcceptedEntry, AcceptedSet};
pub use classify::{BucketClassifier, SeparatorClassifier};
pub use config::{BucketDistribution, QuotaConfig};
pub use driver::{SearchDriver, SearchOutcome};
pub use engine::{DecisionEngine, DecisionKind, DecisionRecord, EngineState, Offer, RejectReason};
pub use enumerator::DiamondEnumerator;
pub use loader::Scenario;
pub use pool::{CandidatePool, Handle};
pub use pricer::{Pricer, PricingFailure, TablePricer};
pub use requirements::Requirements;
pub use stats::{StatFlags, StatsAggregator, SubscriberId};

/// Two prices closer than this are considered equal.
pub const PRICE_COMP_DELTA: f64 = 0.01;

/// Minutes in a day, the modulus for time-of-day arithmetic.
pub const MINUTES_PER_DAY: u16 = 1440;

#[derive(Error, Debug)]
pub enum SelectorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Itinerary has no legs")]
    EmptyItinerary,
    #[error("Leg {0} has no options")]
    ZeroSizeLeg(usize),
    #[error("Unknown statistics subscriber")]
    UnknownSubscriber,
    #[error("Internal consistency violation: {0}")]
    Inconsistent(String),
}

pub type Result<T> = std::result::Result<T, SelectorError>;

/// Quality tier of an accepted combination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Bucket {
    /// Cheap and fast
    Gold,
    /// Cheap but slow
    Ugly,
    /// Fast but expensive
    Luxury,
    /// Slow and expensive
    Junk,
}

impl Bucket {
    pub const COUNT: usize = 4;
    pub const ALL: [Bucket; Bucket::COUNT] = [Bucket::Gold, Bucket::Ugly, Bucket::Luxury, Bucket::Junk];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Single-letter tag used in decision logs
    pub fn letter(self) -> char {
        match self {
            Bucket::Gold => 'G',
            Bucket::Ugly => 'U',
            Bucket::Luxury => 'L',
            Bucket::Junk => 'J',
        }
    }
}

/// Non-stop category, parallel to [`Bucket`] for non-stop results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NsBucket {
    Online,
    Interline,
}

impl NsBucket {
    pub const COUNT: usize = 2;

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Inclusive departure-minute window defining one time-of-day bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodRange {
    pub start: u16,
    pub end: u16,
}

impl TodRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, minute: u16) -> bool {
        (self.start..=self.end).contains(&minute)
    }
}

/// One flight choice for a leg
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegOption {
    /// Marketing carrier
    pub carrier: String,
    /// Carrier whose fares govern this option; drives online/interline detection
    pub governing_carrier: String,
    #[serde(default)]
    pub non_stop: bool,
    #[serde(default)]
    pub long_connection: bool,
    /// Flagged by the caller as a custom solution
    #[serde(default)]
    pub custom: bool,
    /// Departure time as minute of day (0..1440)
    pub departure_minute: u16,
    pub duration_minutes: u32,
    /// Opaque schedule back-reference, only meaningful to the pricer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_ref: Option<String>,
    /// Flight checks postponed until a combination using it is about to be priced
    #[serde(default)]
    pub delayed_validation: bool,
}

impl LegOption {
    pub fn new(carrier: &str, departure_minute: u16, duration_minutes: u32) -> Self {
        Self {
            carrier: carrier.to_string(),
            governing_carrier: carrier.to_string(),
            non_stop: false,
            long_connection: false,
            custom: false,
            departure_minute: departure_minute % MINUTES_PER_DAY,
            duration_minutes,
            schedule_ref: None,
            delayed_validation: false,
        }
    }

    pub fn non_stop(mut self) -> Self {
        self.non_stop = true;
        self
    }

    pub fn long_connection(mut self) -> Self {
        self.long_connection = true;
        self
    }

    pub fn custom(mut self) -> Self {
        self.custom = true;
        self
    }

    pub fn delayed(mut self) -> Self {
        self.delayed_validation = true;
        self
    }

    pub fn governed_by(mut self, carrier: &str) -> Self {
        self.governing_carrier = carrier.to_string();
        self
    }

    /// Index of the first time-of-day range containing the departure
    pub fn tod_bucket(&self, ranges: &[TodRange]) -> Option<usize> {
        ranges.iter().position(|r| r.contains(self.departure_minute))
    }
}

/// One directional segment of the itinerary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub options: Vec<LegOption>,
}

impl Leg {
    pub fn new(options: Vec<LegOption>) -> Self {
        Self { options }
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

/// The fixed shape of one search request: legs and their options
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Itinerary {
    legs: Vec<Leg>,
    /// Outbound and inbound travel dates stamped on every combination
    #[serde(skip_serializing_if = "Option::is_none")]
    dates: Option<(NaiveDate, NaiveDate)>,
}

impl Itinerary {
    /// Build an itinerary, rejecting empty shapes up front
    pub fn new(legs: Vec<Leg>) -> Result<Self> {
        if legs.is_empty() {
            return Err(SelectorError::EmptyItinerary);
        }
        if let Some(idx) = legs.iter().position(Leg::is_empty) {
            return Err(SelectorError::ZeroSizeLeg(idx));
        }
        Ok(Self { legs, dates: None })
    }

    pub fn with_dates(mut self, outbound: NaiveDate, inbound: NaiveDate) -> Self {
        self.dates = Some((outbound, inbound));
        self
    }

    pub fn dates(&self) -> Option<(NaiveDate, NaiveDate)> {
        self.dates
    }

    pub fn legs(&self) -> &[Leg] {
        &self.legs
    }

    pub fn leg_count(&self) -> usize {
        self.legs.len()
    }

    pub fn leg_sizes(&self) -> Vec<usize> {
        self.legs.iter().map(Leg::len).collect()
    }

    pub fn option(&self, leg: usize, option: usize) -> Option<&LegOption> {
        self.legs.get(leg).and_then(|l| l.options.get(option))
    }

    /// One index per leg, each in range
    pub fn is_well_formed(&self, sops: &[usize]) -> bool {
        sops.len() == self.legs.len()
            && sops.iter().zip(&self.legs).all(|(&idx, leg)| idx < leg.len())
    }

    /// Build a fresh combination with the scheduled duration, the travel
    /// dates and the pending-validation bits filled in
    pub fn build_combination(&self, sops: &[usize]) -> Option<Combination> {
        let options = self.options_of(sops)?;
        let mut combination = Combination::new(sops.to_vec());
        combination.duration = options.iter().map(|o| o.duration_minutes).sum();
        combination.status = options
            .iter()
            .enumerate()
            .filter(|(_, o)| o.delayed_validation)
            .fold(0, |bits, (leg, _)| bits | Combination::pending_bit(leg));
        if let Some((outbound, inbound)) = self.dates {
            combination = combination.with_date_pair(outbound, inbound);
        }
        Some(combination)
    }

    /// Legs of the tuple whose option still needs delayed validation
    pub fn pending_legs(&self, sops: &[usize]) -> Vec<usize> {
        sops.iter()
            .enumerate()
            .filter(|(leg, &idx)| self.option(*leg, idx).is_some_and(|o| o.delayed_validation))
            .map(|(leg, _)| leg)
            .collect()
    }

    /// Number of non-stop legs in the tuple; the default enumeration rating
    pub fn non_stop_legs(&self, sops: &[usize]) -> i64 {
        sops.iter()
            .enumerate()
            .filter(|(leg, &idx)| self.option(*leg, idx).is_some_and(|o| o.non_stop))
            .count() as i64
    }

    /// Derive the classification-relevant attributes of a tuple.
    /// Returns `None` for malformed tuples.
    pub fn describe(&self, sops: &[usize], tod_ranges: &[TodRange]) -> Option<CombinationInfo> {
        let options = self.options_of(sops)?;
        let first = options.first()?;

        let online = options
            .iter()
            .all(|o| o.governing_carrier == first.governing_carrier);

        Some(CombinationInfo {
            carrier: online.then(|| first.governing_carrier.clone()),
            non_stop: options.iter().all(|o| o.non_stop),
            long_connection: options.iter().any(|o| o.long_connection),
            custom: options.iter().any(|o| o.custom),
            tod_bucket: first.tod_bucket(tod_ranges),
            departures: options.iter().map(|o| o.departure_minute).collect(),
        })
    }

    fn options_of(&self, sops: &[usize]) -> Option<Vec<&LegOption>> {
        if !self.is_well_formed(sops) {
            return None;
        }
        sops.iter()
            .enumerate()
            .map(|(leg, &idx)| self.option(leg, idx))
            .collect()
    }
}

/// How the fare path of a priced combination was built
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolutionPattern {
    /// One through fare across all legs
    #[default]
    Thru,
    /// Separate fares per leg
    Local,
}

/// One full itinerary: an option index per leg
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Combination {
    pub sops: Vec<usize>,
    /// One bit per leg still awaiting delayed validation (legs past the
    /// seventh share the top bit); 0 means everything passed
    #[serde(default)]
    pub status: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_pair: Option<(NaiveDate, NaiveDate)>,
    /// Total duration in minutes
    #[serde(default)]
    pub duration: u32,
    #[serde(default)]
    pub pattern: SolutionPattern,
}

impl Combination {
    pub fn new(sops: Vec<usize>) -> Self {
        Self {
            sops,
            status: 0,
            date_pair: None,
            duration: 0,
            pattern: SolutionPattern::Thru,
        }
    }

    pub fn with_date_pair(mut self, outbound: NaiveDate, inbound: NaiveDate) -> Self {
        self.date_pair = Some((outbound, inbound));
        self
    }

    pub fn pending_bit(leg: usize) -> u8 {
        1 << leg.min(7)
    }

    pub fn is_validated(&self) -> bool {
        self.status == 0
    }

    pub fn references(&self, leg: usize, option: usize) -> bool {
        self.sops.get(leg) == Some(&option)
    }
}

/// Output of the external pricer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricedResult {
    pub price: f64,
    /// Total travel time in minutes
    pub duration: u32,
    #[serde(default)]
    pub pattern: SolutionPattern,
}

impl PricedResult {
    pub fn new(price: f64, duration: u32) -> Self {
        Self {
            price,
            duration,
            pattern: SolutionPattern::Thru,
        }
    }

    /// Priced from separate per-leg fares
    pub fn local(mut self) -> Self {
        self.pattern = SolutionPattern::Local;
        self
    }

    pub fn is_valid(&self) -> bool {
        self.price.is_finite() && self.price >= 0.0
    }
}

/// Attributes of a combination derived from its leg options
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombinationInfo {
    /// Governing carrier shared by every leg, `None` for interline
    pub carrier: Option<String>,
    pub non_stop: bool,
    pub long_connection: bool,
    pub custom: bool,
    /// Time-of-day bucket of the first leg's departure
    pub tod_bucket: Option<usize>,
    pub departures: Vec<u16>,
}

impl CombinationInfo {
    pub fn ns_bucket(&self) -> Option<NsBucket> {
        if !self.non_stop {
            return None;
        }
        Some(if self.carrier.is_some() {
            NsBucket::Online
        } else {
            NsBucket::Interline
        })
    }

    /// Carrier of an online non-stop
    pub fn online_non_stop_carrier(&self) -> Option<&str> {
        if self.non_stop {
            self.carrier.as_deref()
        } else {
            None
        }
    }

    /// Sum over legs of the circular distance between departures
    pub fn tod_distance(&self, other: &CombinationInfo) -> u32 {
        self.departures
            .iter()
            .zip(&other.departures)
            .map(|(&a, &b)| circular_minutes(a, b))
            .sum()
    }
}

/// Distance between two minutes of day, wrapping at midnight
pub fn circular_minutes(a: u16, b: u16) -> u32 {
    let day = MINUTES_PER_DAY as u32;
    let diff = (a as u32 % day).abs_diff(b as u32 % day);
    diff.min(day - diff)
}

/// Price in whole cents, used as an exact ordering key
pub fn price_key(price: f64) -> i64 {
    (price * 100.0).round() as i64
}
