//! Invariant checks over the selector
//!
//! Each check returns `Err(message)` on the first violation so it can be used
//! both inside `proptest!` bodies and by [`crate::runner::FuzzRunner`].

use crate::generators::{FuzzScenario, PricedOffer};
use itinerary_selector::stats::StatsSnapshot;
use itinerary_selector::{
    Combination, DecisionEngine, DiamondEnumerator, EngineState, Itinerary, PricedResult, Pricer,
    PricingFailure, QuotaConfig, SearchDriver, StatFlags, StatsAggregator, TablePricer,
};
use std::collections::HashSet;
use std::sync::Arc;

pub type CheckResult = Result<(), String>;

/// The enumerator yields every tuple of the grid exactly once
pub fn check_enumerator(sizes: &[usize]) -> CheckResult {
    let expected: usize = sizes.iter().product();
    let mut seen = HashSet::new();
    for sops in DiamondEnumerator::new(sizes.to_vec(), |s: &[usize]| s.iter().sum::<usize>() % 3) {
        if sops.len() != sizes.len() || sops.iter().zip(sizes).any(|(i, n)| i >= n) {
            return Err(format!("{:?} outside grid {:?}", sops, sizes));
        }
        if !seen.insert(sops.clone()) {
            return Err(format!("{:?} emitted twice for {:?}", sops, sizes));
        }
    }
    if seen.len() != expected {
        return Err(format!("{} of {} tuples emitted for {:?}", seen.len(), expected, sizes));
    }
    Ok(())
}

/// Snapshot with averages and trailing empty TOD slots dropped
fn exact_part(mut snapshot: StatsSnapshot) -> StatsSnapshot {
    snapshot.avg_price = 0.0;
    snapshot.avg_duration = 0.0;
    snapshot.bucket_avg_price = [0.0; 4];
    while snapshot.tod.last() == Some(&0) {
        snapshot.tod.pop();
    }
    snapshot
}

/// The engine's incrementally maintained statistics equal a fresh build over
/// its accepted set
fn check_engine_state(engine: &DecisionEngine, itinerary: &Itinerary) -> CheckResult {
    let accepted = engine.accepted();
    let cap = engine.config().requested_solutions;
    if !engine.is_reconciling() && accepted.len() > cap {
        return Err(format!("{} accepted exceeds cap {}", accepted.len(), cap));
    }
    if let Some(entry) = accepted.iter().find(|e| !itinerary.is_well_formed(e.sops())) {
        return Err(format!("accepted {:?} is malformed", entry.sops()));
    }

    let live = engine.stats().snapshot();
    let mut fresh = StatsAggregator::new(&itinerary.leg_sizes());
    fresh.subscribe(
        StatFlags::from_bits_truncate(live.enabled),
        &itinerary_selector::AcceptedSet::new(),
    );
    for (leg, option) in engine.stats().retired_options() {
        if !accepted.referencing(leg, option).is_empty() {
            return Err(format!("retired option {} of leg {} still accepted", option, leg));
        }
        fresh.retire_option(leg, option);
    }
    for entry in accepted.iter() {
        fresh.add_solution(entry);
    }
    let rebuilt = fresh.snapshot();

    let (live_avg, rebuilt_avg) = (live.avg_price, rebuilt.avg_price);
    if (live_avg - rebuilt_avg).abs() > 1e-6 * rebuilt_avg.abs().max(1.0) {
        return Err(format!("average price drifted: {} vs {}", live_avg, rebuilt_avg));
    }
    let (live, rebuilt) = (exact_part(live), exact_part(rebuilt));
    if live != rebuilt {
        return Err(format!("statistics diverged:\n  live    {:?}\n  rebuilt {:?}", live, rebuilt));
    }
    Ok(())
}

/// Feed priced offers straight to the engine and check after every step
pub fn check_offer_stream(itinerary: &Itinerary, config: &QuotaConfig, offers: &[PricedOffer]) -> CheckResult {
    let shared = Arc::new(itinerary.clone());
    let mut engine = DecisionEngine::new(shared, config.clone()).map_err(|e| e.to_string())?;
    let mut cutoff = engine.fare_cutoff();

    for offer in offers {
        let Some(combination) = itinerary.build_combination(&offer.sops) else {
            continue;
        };
        engine
            .offer(combination, PricedResult::new(offer.price, offer.duration))
            .map_err(|e| format!("offer {:?}: {}", offer.sops, e))?;
        check_engine_state(&engine, itinerary)?;

        let now = engine.fare_cutoff();
        if let (Some(before), Some(after)) = (cutoff, now) {
            if after + 1e-9 < before {
                return Err(format!("fare cutoff lowered from {} to {}", before, after));
            }
        }
        if cutoff.is_some() && now.is_none() {
            return Err("fare cutoff disappeared".into());
        }
        cutoff = now;
    }
    Ok(())
}

/// Table pricer that also refuses the scenario's rejected tuples
pub fn scenario_pricer(scenario: &FuzzScenario) -> impl Pricer {
    let rejected: HashSet<Vec<usize>> = scenario.rejected.iter().cloned().collect();
    let mut table = TablePricer::new()
        .with_option_fares(scenario.option_fares.clone())
        .with_invalid_options(scenario.invalid_options.iter().copied());
    move |itinerary: &Itinerary, combination: &Combination| {
        if rejected.contains(&combination.sops) {
            return Err(PricingFailure::Rejected(format!("{:?} refused", combination.sops)));
        }
        table.price(itinerary, combination)
    }
}

/// Drive a whole search, checking the engine after every evaluation
pub fn check_search(scenario: &FuzzScenario) -> CheckResult {
    let pricer = scenario_pricer(scenario);
    let mut driver = SearchDriver::new(scenario.itinerary.clone(), scenario.config.clone(), pricer)
        .map_err(|e| e.to_string())?;

    let mut steps = 0;
    while let Some(combination) = driver.next_candidate() {
        let sops = combination.sops.clone();
        driver
            .evaluate(combination)
            .map_err(|e| format!("evaluate {:?}: {}", sops, e))?;
        check_engine_state(driver.engine(), &scenario.itinerary)?;

        let pool = driver.pool();
        if let Some(entry) = driver.engine().accepted().iter().find(|e| pool.touches_invalid(e.sops())) {
            return Err(format!("accepted {:?} uses an invalidated option", entry.sops()));
        }
        steps += 1;
        if driver.engine().state() == EngineState::Done {
            break;
        }
    }

    driver.reconcile().map_err(|e| format!("reconcile: {}", e))?;
    check_engine_state(driver.engine(), &scenario.itinerary)?;

    let outcome = driver.run().map_err(|e| format!("run: {}", e))?;
    if outcome.state != EngineState::Done {
        return Err(format!("search ended in {:?} after {} steps", outcome.state, steps));
    }
    if outcome.accepted.len() > scenario.config.requested_solutions {
        return Err(format!(
            "{} accepted exceeds cap {}",
            outcome.accepted.len(),
            scenario.config.requested_solutions
        ));
    }
    let seqs: Vec<u64> = outcome.decisions.iter().map(|d| d.seq).collect();
    if seqs.windows(2).any(|w| w[0] >= w[1]) {
        return Err("decision log is not strictly ordered".into());
    }
    Ok(())
}
