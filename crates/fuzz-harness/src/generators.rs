//! Proptest strategies for itinerary shapes, quota configurations and
//! offer streams
//!
//! Prices are generated in whole cents so that price comparisons in the
//! selector are never decided by float noise.

use itinerary_selector::{BucketDistribution, Itinerary, Leg, LegOption, QuotaConfig, TodRange};
use proptest::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;

/// Carriers the generators draw from
pub const CARRIERS: [&str; 4] = ["AA", "UA", "DL", "B6"];

// ============================================================================
// Scalar Generators
// ============================================================================

pub fn carrier() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just(CARRIERS[0]), Just(CARRIERS[1]), Just(CARRIERS[2]), Just(CARRIERS[3])]
}

/// Minute of day (0..1440)
pub fn departure_minute() -> impl Strategy<Value = u16> {
    0u16..1440
}

/// Leg duration in minutes (1h to 15h)
pub fn duration_minutes() -> impl Strategy<Value = u32> {
    60u32..=900
}

/// Price in whole cents between 50.00 and 2000.00
pub fn price() -> impl Strategy<Value = f64> {
    (5_000u32..=200_000).prop_map(|cents| cents as f64 / 100.0)
}

// ============================================================================
// Itinerary Generators
// ============================================================================

pub fn leg_option() -> impl Strategy<Value = LegOption> {
    (
        carrier(),
        prop::option::weighted(0.2, carrier()),
        departure_minute(),
        duration_minutes(),
        prop::bool::weighted(0.3),
        prop::bool::weighted(0.1),
        prop::bool::weighted(0.1),
        prop::bool::weighted(0.15),
    )
        .prop_map(|(carrier, governing, departure, duration, non_stop, long, custom, delayed)| {
            let mut option = LegOption::new(carrier, departure, duration);
            if let Some(governing) = governing {
                option = option.governed_by(governing);
            }
            option.non_stop = non_stop;
            option.long_connection = long;
            option.custom = custom;
            option.delayed_validation = delayed;
            option
        })
}

/// Per-leg option counts: 1 to `max_legs` legs of 1 to `max_options` options
pub fn leg_sizes(max_legs: usize, max_options: usize) -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1..=max_options.max(1), 1..=max_legs.max(1))
}

pub fn itinerary(max_legs: usize, max_options: usize) -> impl Strategy<Value = Itinerary> {
    prop::collection::vec(
        prop::collection::vec(leg_option(), 1..=max_options.max(1)).prop_map(Leg::new),
        1..=max_legs.max(1),
    )
    .prop_filter_map("itinerary must have options on every leg", |legs| Itinerary::new(legs).ok())
}

// ============================================================================
// Configuration Generators
// ============================================================================

/// Bucket shares from small integer weights, normalized to sum to one
pub fn bucket_distribution() -> impl Strategy<Value = BucketDistribution> {
    (0u32..=4, 0u32..=4, 0u32..=4, 0u32..=4).prop_map(|(g, u, l, j)| {
        let total = (g + u + l + j).max(1) as f64;
        let gold = if g + u + l + j == 0 { 1.0 } else { g as f64 / total };
        BucketDistribution {
            gold,
            ugly: u as f64 / total,
            luxury: l as f64 / total,
            junk: j as f64 / total,
        }
    })
}

/// Morning / afternoon / evening windows with random shares
pub fn tod_split() -> impl Strategy<Value = (Vec<TodRange>, Vec<f64>)> {
    prop::option::of((0u32..=4, 0u32..=4, 0u32..=4)).prop_map(|split| match split {
        None => (Vec::new(), Vec::new()),
        Some((m, a, e)) => {
            let total = (m + a + e).max(1) as f64;
            (
                vec![TodRange::new(0, 719), TodRange::new(720, 1079), TodRange::new(1080, 1439)],
                vec![m as f64 / total, a as f64 / total, e as f64 / total],
            )
        }
    })
}

pub fn quota_config(max_requested: usize) -> impl Strategy<Value = QuotaConfig> {
    (
        1..=max_requested.max(1),
        bucket_distribution(),
        tod_split(),
        prop::collection::btree_map(carrier().prop_map(String::from), 0usize..=3, 0..=2),
        prop::option::of(0usize..=3),
        prop::option::of(1usize..=4),
        0usize..=2,
        prop::option::of((price(), 120u32..=1800)),
        prop::option::of(1.0f64..=3.0),
        0usize..=2,
        prop::collection::btree_map(carrier().prop_map(String::from), 0usize..=2, 0..=2),
        prop::bool::weighted(0.3),
    )
        .prop_map(
            |(
                requested,
                distribution,
                (tod_ranges, tod_distribution),
                non_stops,
                long,
                repeat,
                custom,
                separators,
                coef,
                min_non_stops,
                per_carrier,
                represent_all,
            )| {
                let mut config = QuotaConfig::default().with_requested(requested);
                config.bucket_distribution = distribution;
                config.tod_ranges = tod_ranges;
                config.tod_distribution = tod_distribution;
                config.non_stop_per_carrier = non_stops;
                config.max_long_connection = long;
                config.schedule_repeat_limit = repeat;
                config.num_custom_solutions = custom;
                if let Some((fare, minutes)) = separators {
                    config.fare_amount_separator = Some(fare);
                    config.travel_time_separator = Some(minutes);
                }
                config.fare_cutoff_coef = coef;
                config.min_non_stops = min_non_stops;
                config.options_per_carrier = per_carrier;
                config.represent_all_options = represent_all;
                config
            },
        )
}

// ============================================================================
// Composite Generators
// ============================================================================

/// A full search request with a per-option price table
#[derive(Debug, Clone, Serialize)]
pub struct FuzzScenario {
    pub itinerary: Itinerary,
    pub config: QuotaConfig,
    /// Per leg, per option fare; a combination costs the sum over its legs
    pub option_fares: Vec<Vec<f64>>,
    /// Options the pricer reports invalid
    pub invalid_options: Vec<(usize, usize)>,
    /// Combinations the pricer refuses outright
    pub rejected: Vec<Vec<usize>>,
}

impl FuzzScenario {
    pub fn leg_sizes(&self) -> Vec<usize> {
        self.itinerary.leg_sizes()
    }
}

/// Price table parallel to an itinerary's options
fn option_fares(itinerary: &Itinerary) -> impl Strategy<Value = Vec<Vec<f64>>> {
    itinerary
        .leg_sizes()
        .into_iter()
        .map(|n| prop::collection::vec(price(), n))
        .collect::<Vec<_>>()
}

/// Random tuples of the right shape; out-of-range picks are dropped
fn tuples(sizes: Vec<usize>, max: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    let per_leg: Vec<_> = sizes.iter().map(|&n| 0..n).collect();
    prop::collection::vec(per_leg, 0..=max)
}

pub fn scenario(max_legs: usize, max_options: usize, max_requested: usize) -> impl Strategy<Value = FuzzScenario> {
    (itinerary(max_legs, max_options), quota_config(max_requested)).prop_flat_map(|(itinerary, config)| {
        let sizes = itinerary.leg_sizes();
        let invalid = prop::collection::vec(
            (0..sizes.len()).prop_flat_map({
                let sizes = sizes.clone();
                move |leg| (Just(leg), 0..sizes[leg])
            }),
            0..=2,
        );
        (
            Just(itinerary.clone()),
            Just(config),
            option_fares(&itinerary),
            invalid,
            tuples(sizes, 3),
        )
            .prop_map(|(itinerary, config, option_fares, invalid_options, rejected)| FuzzScenario {
                itinerary,
                config,
                option_fares,
                invalid_options,
                rejected,
            })
    })
}

/// One priced offer fed straight to the engine
#[derive(Debug, Clone, Serialize)]
pub struct PricedOffer {
    pub sops: Vec<usize>,
    pub price: f64,
    pub duration: u32,
}

/// Offers over `sizes`, duplicates and repeats included
pub fn offer_stream(sizes: Vec<usize>, max_len: usize) -> impl Strategy<Value = Vec<PricedOffer>> {
    let per_leg: Vec<_> = sizes.iter().map(|&n| 0..n).collect();
    prop::collection::vec((per_leg, price(), 60u32..=2400), 0..=max_len).prop_map(|offers| {
        offers
            .into_iter()
            .map(|(sops, price, duration)| PricedOffer { sops, price, duration })
            .collect()
    })
}
