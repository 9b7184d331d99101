//! Fuzz test runner
//!
//! Runs invariant checks either over a plain case counter or over values drawn
//! from a proptest [`Strategy`] with a reproducible seed.

use proptest::strategy::{Strategy, ValueTree};
use proptest::test_runner::{RngAlgorithm, TestRng, TestRunner};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

// ============================================================================
// Configuration
// ============================================================================

/// Fuzz test configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzConfig {
    /// Number of test cases to run
    pub cases: u64,
    /// Maximum shrink iterations on failure
    pub max_shrink_iters: u32,
    /// Random seed (0 = fixed default seed)
    pub seed: u64,
    /// Largest leg count generated
    pub max_legs: usize,
    /// Largest option count per leg
    pub max_options: usize,
    /// Largest requested solution count
    pub max_requested: usize,
    /// Failures kept per target
    pub max_failures: usize,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            cases: 1_000,
            max_shrink_iters: 1000,
            seed: 0,
            max_legs: 3,
            max_options: 6,
            max_requested: 10,
            max_failures: 20,
        }
    }
}

impl FuzzConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cases(mut self, n: u64) -> Self {
        self.cases = n;
        self
    }

    pub fn seed(mut self, s: u64) -> Self {
        self.seed = s;
        self
    }

    pub fn shape(mut self, max_legs: usize, max_options: usize) -> Self {
        self.max_legs = max_legs.max(1);
        self.max_options = max_options.max(1);
        self
    }

    pub fn max_requested(mut self, n: usize) -> Self {
        self.max_requested = n.max(1);
        self
    }

    /// Generate proptest config from this
    pub fn to_proptest_config(&self) -> proptest::test_runner::Config {
        let mut config = proptest::test_runner::Config::default();
        config.cases = self.cases.min(u32::MAX as u64) as u32;
        config.max_shrink_iters = self.max_shrink_iters;
        config.rng_algorithm = RngAlgorithm::ChaCha;
        config
    }

    /// Seeded test runner; the same seed draws the same cases
    pub fn test_runner(&self) -> TestRunner {
        let mut seed = [0u8; 32];
        let s = if self.seed == 0 { 0x5eed } else { self.seed };
        for chunk in seed.chunks_mut(8) {
            chunk.copy_from_slice(&s.to_le_bytes());
        }
        TestRunner::new_with_rng(
            self.to_proptest_config(),
            TestRng::from_seed(RngAlgorithm::ChaCha, &seed),
        )
    }
}

// ============================================================================
// Results
// ============================================================================

/// Result of a fuzz test run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzResult {
    /// Test name
    pub name: String,
    /// Total cases run
    pub cases_run: u64,
    /// Cases that passed
    pub cases_passed: u64,
    /// Cases that failed
    pub cases_failed: u64,
    /// Wall time in milliseconds
    pub duration_ms: u64,
    /// Cases per second
    pub throughput: f64,
    /// Failure details, capped at the configured count
    pub failures: Vec<FuzzFailure>,
    /// Whether test passed overall
    pub passed: bool,
}

impl FuzzResult {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            cases_run: 0,
            cases_passed: 0,
            cases_failed: 0,
            duration_ms: 0,
            throughput: 0.0,
            failures: Vec::new(),
            passed: true,
        }
    }

    pub fn record_pass(&mut self) {
        self.cases_run += 1;
        self.cases_passed += 1;
    }

    pub fn record_fail(&mut self, failure: FuzzFailure, keep: usize) {
        self.cases_run += 1;
        self.cases_failed += 1;
        self.passed = false;
        if self.failures.len() < keep {
            self.failures.push(failure);
        }
    }

    pub fn finalize(&mut self, duration: Duration) {
        self.duration_ms = duration.as_millis() as u64;
        let secs = duration.as_secs_f64();
        if secs > 0.0 {
            self.throughput = self.cases_run as f64 / secs;
        }
    }
}

/// Details of a test failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzFailure {
    pub message: String,
    /// Debug rendering or JSON of the failing input
    pub input: Option<String>,
    pub shrunk: bool,
}

// ============================================================================
// Runner
// ============================================================================

/// Main fuzz test runner
pub struct FuzzRunner {
    config: FuzzConfig,
    results: Vec<FuzzResult>,
}

impl FuzzRunner {
    pub fn new(config: FuzzConfig) -> Self {
        Self {
            config,
            results: Vec::new(),
        }
    }

    pub fn with_default_config() -> Self {
        Self::new(FuzzConfig::default())
    }

    pub fn config(&self) -> &FuzzConfig {
        &self.config
    }

    /// Run a fuzz test with the given closure over case indices
    pub fn run<F>(&mut self, name: &str, test_fn: F) -> &FuzzResult
    where
        F: Fn(u64) -> Result<(), String>,
    {
        let mut result = FuzzResult::new(name);
        let start = Instant::now();

        for i in 0..self.config.cases {
            match test_fn(i) {
                Ok(()) => result.record_pass(),
                Err(msg) => result.record_fail(
                    FuzzFailure {
                        message: msg,
                        input: Some(format!("case {}", i)),
                        shrunk: false,
                    },
                    self.config.max_failures,
                ),
            }
        }

        self.finish(result, start.elapsed())
    }

    /// Run a check over values drawn from `strategy`.
    ///
    /// A failing value is shrunk while the check keeps failing, up to the
    /// configured iteration count.
    pub fn run_strategy<S, F>(&mut self, name: &str, strategy: S, check: F) -> &FuzzResult
    where
        S: Strategy,
        S::Value: Debug,
        F: Fn(&S::Value) -> Result<(), String>,
    {
        let mut result = FuzzResult::new(name);
        let mut runner = self.config.test_runner();
        let start = Instant::now();

        for case in 0..self.config.cases {
            let mut tree = match strategy.new_tree(&mut runner) {
                Ok(tree) => tree,
                Err(reason) => {
                    warn!("{}: case {} could not be generated: {}", name, case, reason);
                    continue;
                }
            };
            let value = tree.current();
            let Err(message) = check(&value) else {
                result.record_pass();
                continue;
            };

            let (message, input, shrunk) = self.shrink(&mut tree, &check, message);
            debug!("{}: case {} failed: {}", name, case, message);
            result.record_fail(
                FuzzFailure {
                    message,
                    input: Some(input),
                    shrunk,
                },
                self.config.max_failures,
            );
        }

        self.finish(result, start.elapsed())
    }

    fn shrink<T, F>(&self, tree: &mut T, check: &F, mut message: String) -> (String, String, bool)
    where
        T: ValueTree,
        T::Value: Debug,
        F: Fn(&T::Value) -> Result<(), String>,
    {
        let mut failing = format!("{:?}", tree.current());
        let mut shrunk = false;
        let mut iters = 0;
        let mut stepped = tree.simplify();
        while stepped && iters < self.config.max_shrink_iters {
            iters += 1;
            match check(&tree.current()) {
                Err(m) => {
                    message = m;
                    failing = format!("{:?}", tree.current());
                    shrunk = true;
                    stepped = tree.simplify();
                }
                Ok(()) => stepped = tree.complicate(),
            }
        }
        (message, failing, shrunk)
    }

    fn finish(&mut self, mut result: FuzzResult, elapsed: Duration) -> &FuzzResult {
        result.finalize(elapsed);
        self.results.push(result);
        &self.results[self.results.len() - 1]
    }

    /// Get all results
    pub fn results(&self) -> &[FuzzResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<FuzzResult> {
        self.results
    }

    /// Export results to JSON
    pub fn export_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.results)
    }
}
