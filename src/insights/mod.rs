//! Insight synthesis
//!
//! Rule-based derivation of findings from collected data. Never delegated
//! to the LLM, so the same data always yields the same ranked list.

use crate::models::{CollectedData, Insight, RiskLevel, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, info};

pub mod rules;
pub use rules::{AlertEscalationRule, CostRule, CostTrendRule, IdleResourceRule};

/// Evidence samples attached to one insight are capped at this many records
pub const MAX_EVIDENCE: usize = 5;

/// Tunable boundaries shared by the built-in rules
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InsightThresholds {
    /// Total spend above this is critical
    pub cost_high: f64,
    /// Total spend above this is a warning
    pub cost_medium: f64,
    /// Monthly idle savings at or above this are critical
    pub idle_savings_high: f64,
    /// Monthly idle savings at or above this are a warning
    pub idle_savings_medium: f64,
    /// Idle this long (days) escalates severity and risk
    pub idle_age_days: i64,
    /// Half-over-half spend increase (percent) that warrants a warning
    pub trend_warning_pct: f64,
    pub trend_critical_pct: f64,
}

impl Default for InsightThresholds {
    fn default() -> Self {
        Self {
            cost_high: 10_000.0,
            cost_medium: 1_000.0,
            idle_savings_high: 1_000.0,
            idle_savings_medium: 100.0,
            idle_age_days: 90,
            trend_warning_pct: 20.0,
            trend_critical_pct: 50.0,
        }
    }
}

/// Trait for insight rules
pub trait InsightRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Zero or more findings; must not depend on anything but its inputs
    fn evaluate(&self, data: &CollectedData, now: DateTime<Utc>) -> Vec<Insight>;
}

/// Runs every rule and ranks the union of their findings
pub struct InsightEngine {
    rules: Vec<Box<dyn InsightRule>>,
}

impl InsightEngine {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn InsightRule>) {
        self.rules.push(rule);
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Synthesize ranked insights (SYNC, no I/O)
    pub fn synthesize(&self, data: &CollectedData, now: DateTime<Utc>) -> Vec<Insight> {
        let mut insights = Vec::new();

        for rule in &self.rules {
            let found = rule.evaluate(data, now);
            debug!(rule = rule.name(), count = found.len(), "Rule evaluated");
            insights.extend(found);
        }

        let ranked = rank_insights(insights);

        info!(
            rule_count = self.rules.len(),
            insight_count = ranked.len(),
            critical = ranked.iter().filter(|i| i.severity == Severity::Critical).count(),
            "Insight synthesis completed"
        );

        ranked
    }
}

impl Default for InsightEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Severity desc, impact amount desc, category name, finding text.
pub fn rank_insights(mut insights: Vec<Insight>) -> Vec<Insight> {
    insights.sort_by(compare_insights);
    insights
}

fn compare_insights(a: &Insight, b: &Insight) -> Ordering {
    b.severity
        .cmp(&a.severity)
        .then_with(|| {
            let impact_b = b.impact_amount.unwrap_or(0.0);
            impact_b.total_cmp(&a.impact_amount.unwrap_or(0.0))
        })
        .then_with(|| a.category.as_str().cmp(b.category.as_str()))
        .then_with(|| a.finding.cmp(&b.finding))
}

//
// ================= Severity Ordering =================
//

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl Severity {
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Info => 1,
            Severity::Warning => 2,
            Severity::Critical => 3,
        }
    }

    /// One level up; critical stays critical
    pub fn escalate(&self) -> Severity {
        match self {
            Severity::Info => Severity::Warning,
            Severity::Warning | Severity::Critical => Severity::Critical,
        }
    }

    /// Default risk attached to a finding of this severity
    pub fn risk(&self) -> RiskLevel {
        match self {
            Severity::Info => RiskLevel::Low,
            Severity::Warning => RiskLevel::Medium,
            Severity::Critical => RiskLevel::High,
        }
    }
}

//
// ================= RiskLevel Ordering =================
//

impl PartialOrd for RiskLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RiskLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl RiskLevel {
    fn rank(&self) -> u8 {
        match self {
            RiskLevel::Low => 0,
            RiskLevel::Medium => 1,
            RiskLevel::High => 2,
            RiskLevel::Critical => 3,
        }
    }
}

pub fn create_default_insight_engine(thresholds: InsightThresholds) -> InsightEngine {
    let mut engine = InsightEngine::new();
    engine.add_rule(Box::new(CostRule::new(thresholds)));
    engine.add_rule(Box::new(IdleResourceRule::new(thresholds)));
    engine.add_rule(Box::new(AlertEscalationRule));
    engine.add_rule(Box::new(CostTrendRule::new(thresholds)));
    engine
}

//
// ================= Tests =================
//
