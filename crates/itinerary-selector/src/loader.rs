//! Scenario loading from JSON files
//!
//! A scenario bundles the itinerary shape, the quota configuration and a
//! price table for [`TablePricer`]. Malformed options are skipped and counted;
//! fares are re-indexed onto the options that survive.

use crate::config::QuotaConfig;
use crate::pricer::{FareEntry, TablePricer};
use crate::{Itinerary, Leg, LegOption, Result, MINUTES_PER_DAY};
use chrono::NaiveDate;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{info, warn};

/// Carrier codes are short alphanumerics, upper-cased
fn sanitize_carrier(code: String) -> Option<String> {
    let code: String = code
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(3)
        .collect::<String>()
        .to_ascii_uppercase();
    (code.len() >= 2).then_some(code)
}

/// Schedule references are opaque but bounded
fn sanitize_ref(reference: String) -> String {
    reference
        .chars()
        .filter(|c| c.is_alphanumeric() || "-_:/.".contains(*c))
        .take(128)
        .collect()
}

#[derive(Debug, Deserialize)]
struct RawOption {
    carrier: Option<String>,
    governing_carrier: Option<String>,
    non_stop: Option<bool>,
    long_connection: Option<bool>,
    custom: Option<bool>,
    delayed_validation: Option<bool>,
    departure_minute: Option<u32>,
    duration_minutes: Option<u32>,
    schedule_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLeg {
    options: Option<Vec<RawOption>>,
}

#[derive(Debug, Deserialize)]
struct RawFare {
    sops: Option<Vec<usize>>,
    price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawDates {
    outbound: Option<String>,
    inbound: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawScenario {
    legs: Option<Vec<RawLeg>>,
    travel_dates: Option<RawDates>,
    config: Option<QuotaConfig>,
    fares: Option<Vec<RawFare>>,
    option_fares: Option<Vec<Vec<f64>>>,
    invalid_options: Option<Vec<(usize, usize)>>,
}

/// A loaded, validated search request
#[derive(Debug)]
pub struct Scenario {
    pub itinerary: Itinerary,
    pub config: QuotaConfig,
    pub pricer: TablePricer,
    pub skipped_options: usize,
    pub skipped_fares: usize,
}

fn convert_option(raw: RawOption) -> Option<LegOption> {
    let carrier = sanitize_carrier(raw.carrier?)?;
    let departure = raw.departure_minute.filter(|&m| m < MINUTES_PER_DAY as u32)?;
    let duration = raw.duration_minutes.filter(|&d| d > 0)?;

    let mut option = LegOption::new(&carrier, departure as u16, duration);
    if let Some(governing) = raw.governing_carrier.and_then(sanitize_carrier) {
        option = option.governed_by(&governing);
    }
    option.non_stop = raw.non_stop.unwrap_or(false);
    option.long_connection = raw.long_connection.unwrap_or(false);
    option.custom = raw.custom.unwrap_or(false);
    option.delayed_validation = raw.delayed_validation.unwrap_or(false);
    option.schedule_ref = raw.schedule_ref.map(sanitize_ref);
    Some(option)
}

/// Both dates must parse and the inbound may not precede the outbound
fn convert_dates(raw: RawDates) -> Option<(NaiveDate, NaiveDate)> {
    let outbound = raw.outbound?.parse::<NaiveDate>().ok()?;
    let inbound = raw.inbound?.parse::<NaiveDate>().ok()?;
    (inbound >= outbound).then_some((outbound, inbound))
}

/// Map original option indices to surviving ones
fn remap(sops: &[usize], index_map: &[Vec<Option<usize>>]) -> Option<Vec<usize>> {
    if sops.len() != index_map.len() {
        return None;
    }
    sops.iter()
        .zip(index_map)
        .map(|(&original, leg)| leg.get(original).copied().flatten())
        .collect()
}

/// Load a scenario from a JSON file
pub fn load_scenario(path: impl AsRef<Path>) -> Result<Scenario> {
    let path = path.as_ref();
    info!("Loading scenario from {:?}", path);

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let raw: RawScenario = serde_json::from_reader(reader)?;

    let mut skipped_options = 0;
    let mut legs = Vec::new();
    let mut index_map = Vec::new();

    for raw_leg in raw.legs.unwrap_or_default() {
        let mut options = Vec::new();
        let mut map = Vec::new();
        for raw_option in raw_leg.options.unwrap_or_default() {
            match convert_option(raw_option) {
                Some(option) => {
                    map.push(Some(options.len()));
                    options.push(option);
                }
                None => {
                    map.push(None);
                    skipped_options += 1;
                }
            }
        }
        legs.push(Leg::new(options));
        index_map.push(map);
    }
    let mut itinerary = Itinerary::new(legs)?;
    if let Some(raw_dates) = raw.travel_dates {
        match convert_dates(raw_dates) {
            Some((outbound, inbound)) => itinerary = itinerary.with_dates(outbound, inbound),
            None => warn!("Ignoring malformed travel dates"),
        }
    }

    let config = raw.config.unwrap_or_default();
    config.validate()?;

    let mut skipped_fares = 0;
    let mut fares = Vec::new();
    for fare in raw.fares.unwrap_or_default() {
        let entry = match (fare.sops, fare.price) {
            (Some(sops), Some(price)) if price.is_finite() && price >= 0.0 => {
                remap(&sops, &index_map).map(|sops| FareEntry { sops, price })
            }
            _ => None,
        };
        match entry {
            Some(entry) => fares.push(entry),
            None => skipped_fares += 1,
        }
    }

    let option_fares: Vec<Vec<f64>> = raw
        .option_fares
        .unwrap_or_default()
        .into_iter()
        .zip(&index_map)
        .map(|(prices, map)| {
            prices
                .into_iter()
                .zip(map)
                .filter(|(_, kept)| kept.is_some())
                .map(|(price, _)| price)
                .collect()
        })
        .collect();

    let invalid: Vec<(usize, usize)> = raw
        .invalid_options
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(leg, option)| {
            index_map
                .get(leg)
                .and_then(|map| map.get(option).copied().flatten())
                .map(|kept| (leg, kept))
        })
        .collect();

    info!(
        "Loaded {} legs {:?} ({} options skipped), {} fares ({} skipped)",
        itinerary.leg_count(),
        itinerary.leg_sizes(),
        skipped_options,
        fares.len(),
        skipped_fares
    );

    let pricer = TablePricer::new()
        .with_fares(fares)
        .with_option_fares(option_fares)
        .with_invalid_options(invalid);

    Ok(Scenario {
        itinerary,
        config,
        pricer,
        skipped_options,
        skipped_fares,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricer::Pricer;
    use crate::{Combination, SelectorError};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_scenario() {
        let json = r#"{
            "legs": [
                {"options": [
                    {"carrier": "aa", "departure_minute": 480, "duration_minutes": 300, "non_stop": true},
                    {"carrier": "UA", "departure_minute": 2000, "duration_minutes": 300},
                    {"carrier": "DL", "governing_carrier": "KL", "departure_minute": 600, "duration_minutes": 420}
                ]},
                {"options": [
                    {"carrier": "AA", "departure_minute": 1020, "duration_minutes": 310, "schedule_ref": "AA100/JFK-LAX", "delayed_validation": true}
                ]}
            ],
            "travel_dates": {"outbound": "2026-03-14", "inbound": "2026-03-21"},
            "config": {"requested_solutions": 3},
            "fares": [
                {"sops": [0, 0], "price": 199.5},
                {"sops": [1, 0], "price": 150.0},
                {"sops": [2, 0], "price": 120.0},
                {"sops": [2, 0]}
            ],
            "invalid_options": [[0, 2], [0, 1]]
        }"#;
        let file = write(json);
        let scenario = load_scenario(file.path()).unwrap();

        assert_eq!(scenario.itinerary.leg_sizes(), vec![2, 1]);
        assert_eq!(scenario.skipped_options, 1);
        assert_eq!(scenario.skipped_fares, 2);
        assert_eq!(scenario.config.requested_solutions, 3);

        let first = scenario.itinerary.option(0, 0).unwrap();
        assert_eq!(first.carrier, "AA");
        assert!(first.non_stop);
        let governed = scenario.itinerary.option(0, 1).unwrap();
        assert_eq!(governed.governing_carrier, "KL");
        assert_eq!(
            scenario.itinerary.option(1, 0).unwrap().schedule_ref.as_deref(),
            Some("AA100/JFK-LAX")
        );
        assert!(scenario.itinerary.option(1, 0).unwrap().delayed_validation);
        assert!(!first.delayed_validation);

        let dates = scenario.itinerary.dates().unwrap();
        assert_eq!(dates.0, NaiveDate::from_ymd_opt(2026, 3, 14).unwrap());
        let built = scenario.itinerary.build_combination(&[0, 0]).unwrap();
        assert_eq!(built.date_pair, Some(dates));
        assert!(!built.is_validated());

        let mut pricer = scenario.pricer;
        let priced = pricer
            .price(&scenario.itinerary, &Combination::new(vec![0, 0]))
            .unwrap();
        assert_eq!(priced.price, 199.5);
        assert_eq!(priced.duration, 610);
        // original option 2 is now option 1, and it is flagged invalid
        assert!(pricer
            .price(&scenario.itinerary, &Combination::new(vec![1, 0]))
            .is_err());
    }

    #[test]
    fn test_leg_without_valid_options() {
        let json = r#"{
            "legs": [
                {"options": [{"carrier": "AA", "departure_minute": 480, "duration_minutes": 300}]},
                {"options": [{"carrier": "AA"}]}
            ]
        }"#;
        let file = write(json);
        assert!(matches!(load_scenario(file.path()), Err(SelectorError::ZeroSizeLeg(1))));
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let json = r#"{
            "legs": [{"options": [{"carrier": "AA", "departure_minute": 480, "duration_minutes": 300}]}],
            "config": {"requested_solutions": 0}
        }"#;
        let file = write(json);
        assert!(matches!(load_scenario(file.path()), Err(SelectorError::InvalidConfig(_))));
    }

    #[test]
    fn test_quota_extensions_and_bad_dates() {
        let json = r#"{
            "legs": [{"options": [{"carrier": "AA", "departure_minute": 480, "duration_minutes": 300}]}],
            "travel_dates": {"outbound": "2026-03-21", "inbound": "2026-03-14"},
            "config": {
                "requested_solutions": 2,
                "min_non_stops": 1,
                "options_per_carrier": {"AA": 1},
                "represent_all_options": true
            }
        }"#;
        let file = write(json);
        let scenario = load_scenario(file.path()).unwrap();
        assert!(scenario.itinerary.dates().is_none());
        assert_eq!(scenario.config.min_non_stops, 1);
        assert_eq!(scenario.config.options_per_carrier.get("AA"), Some(&1));
        assert!(scenario.config.represent_all_options);
    }

    #[test]
    fn test_sanitize_carrier() {
        assert_eq!(sanitize_carrier("b6".into()), Some("B6".into()));
        assert_eq!(sanitize_carrier("A".into()), None);
        assert_eq!(sanitize_carrier("ua-1234".into()), Some("UA1".into()));
    }
}
