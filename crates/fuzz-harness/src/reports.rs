//! Fuzz run reports
//!
//! A report records how the cases were drawn (seed, case count, itinerary
//! shape) next to the per-target results, so a failing run can be replayed
//! with `selector-fuzz run --seed`.

use crate::runner::{FuzzConfig, FuzzResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bounds the generators were run with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunShape {
    pub max_legs: usize,
    pub max_options: usize,
    pub max_requested: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzReport {
    pub generated_at: DateTime<Utc>,
    pub seed: u64,
    pub cases_per_target: u64,
    pub shape: RunShape,
    pub total_duration_ms: u64,
    pub results: Vec<FuzzResult>,
    pub summary: ReportSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    pub targets: u32,
    pub targets_failed: u32,
    pub total_cases: u64,
    pub cases_failed: u64,
}

impl FuzzReport {
    pub fn new(results: Vec<FuzzResult>, config: &FuzzConfig) -> Self {
        let summary = ReportSummary {
            targets: results.len() as u32,
            targets_failed: results.iter().filter(|r| !r.passed).count() as u32,
            total_cases: results.iter().map(|r| r.cases_run).sum(),
            cases_failed: results.iter().map(|r| r.cases_failed).sum(),
        };

        Self {
            generated_at: Utc::now(),
            seed: config.seed,
            cases_per_target: config.cases,
            shape: RunShape {
                max_legs: config.max_legs,
                max_options: config.max_options,
                max_requested: config.max_requested,
            },
            total_duration_ms: results.iter().map(|r| r.duration_ms).sum(),
            results,
            summary,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.summary.targets_failed == 0
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str("# Selector Fuzz Report\n\n");
        md.push_str(&format!("**Date:** {}\n", self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")));
        md.push_str(&format!("**Seed:** {}\n", self.seed));
        md.push_str(&format!(
            "**Shape:** up to {} legs of {} options, {} requested, {} cases per target\n\n",
            self.shape.max_legs, self.shape.max_options, self.shape.max_requested, self.cases_per_target
        ));

        md.push_str("| Target | Cases | Failed | Duration | Status |\n");
        md.push_str("|--------|-------|--------|----------|--------|\n");
        for result in &self.results {
            let status = if result.passed { "✓" } else { "✗" };
            md.push_str(&format!(
                "| {} | {} | {} | {} ms | {} |\n",
                result.name, result.cases_run, result.cases_failed, result.duration_ms, status
            ));
        }

        let failed: Vec<_> = self.results.iter().filter(|r| !r.passed).collect();
        if !failed.is_empty() {
            md.push_str("\n## Failures\n\n");
            for result in failed {
                md.push_str(&format!("### {}\n\n", result.name));
                for (i, failure) in result.failures.iter().enumerate().take(3) {
                    md.push_str(&format!("{}. `{}`\n", i + 1, failure.message));
                    if let Some(ref input) = failure.input {
                        let tag = if failure.shrunk { "Shrunk input" } else { "Input" };
                        md.push_str(&format!("   - {}: `{}`\n", tag, input));
                    }
                }
                if result.cases_failed > 3 {
                    md.push_str(&format!("   - ... and {} more\n", result.cases_failed - 3));
                }
                md.push('\n');
            }
        }

        md
    }
}
