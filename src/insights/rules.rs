//! Built-in insight rules

use super::{InsightRule, InsightThresholds, MAX_EVIDENCE};
use crate::models::{
    Alert, CollectedData, Insight, InsightCategory, Resource, RiskLevel, Severity,
};
use crate::tools::infra::{cost_by_service, daily_totals};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

fn money(amount: f64) -> String {
    format!("${:.2}", amount)
}

//
// ================= Cost =================
//

/// Total spend, its dominant service and the service breakdown
pub struct CostRule {
    thresholds: InsightThresholds,
}

impl CostRule {
    pub fn new(thresholds: InsightThresholds) -> Self {
        Self { thresholds }
    }
}

impl InsightRule for CostRule {
    fn name(&self) -> &'static str {
        "cost_summary"
    }

    fn evaluate(&self, data: &CollectedData, _now: DateTime<Utc>) -> Vec<Insight> {
        if data.costs.is_empty() {
            return Vec::new();
        }

        let total: f64 = data.costs.iter().map(|c| c.amount).sum();
        let by_service = cost_by_service(&data.costs);

        let severity = if total > self.thresholds.cost_high {
            Severity::Critical
        } else if total > self.thresholds.cost_medium {
            Severity::Warning
        } else {
            Severity::Info
        };

        let (top_service, top_amount) = match by_service.first() {
            Some((service, amount)) => (service.as_str(), *amount),
            None => return Vec::new(),
        };
        let share = if total > 0.0 {
            top_amount / total * 100.0
        } else {
            0.0
        };

        let finding = format!(
            "Total spend is {} across {} service(s); {} is the dominant cost driver at {} ({:.1}%)",
            money(total),
            by_service.len(),
            top_service,
            money(top_amount),
            share
        );

        let recommendation = match severity {
            Severity::Critical => format!(
                "Spend is above {}. Review {} sizing and commitments first, then set budget alerts",
                money(self.thresholds.cost_high),
                top_service
            ),
            Severity::Warning => format!(
                "Review {} usage for rightsizing and reserved-capacity opportunities",
                top_service
            ),
            Severity::Info => "Spend is within expected bounds; keep monitoring monthly".to_string(),
        };

        let evidence = by_service
            .iter()
            .take(MAX_EVIDENCE)
            .map(|(service, amount)| {
                let share_pct = if total > 0.0 {
                    (amount / total * 1000.0).round() / 10.0
                } else {
                    0.0
                };
                json!({
                    "service": service,
                    "amount": (amount * 100.0).round() / 100.0,
                    "share_pct": share_pct,
                })
            })
            .collect();

        vec![Insight {
            category: InsightCategory::CostOptimization,
            severity,
            risk: severity.risk(),
            finding,
            evidence,
            recommendation,
            impact: format!("{} of spend in the analysed window", money(total)),
            impact_amount: Some(total),
        }]
    }
}

//
// ================= Idle resources =================
//

/// Stopped or unattached resources that keep billing
pub struct IdleResourceRule {
    thresholds: InsightThresholds,
}

impl IdleResourceRule {
    pub fn new(thresholds: InsightThresholds) -> Self {
        Self { thresholds }
    }

    fn evidence(resource: &Resource, now: DateTime<Utc>) -> Value {
        json!({
            "id": resource.id,
            "account_id": resource.account_id,
            "resource_type": resource.resource_type,
            "status": resource.status,
            "monthly_cost": resource.monthly_cost_value(),
            "age_days": resource.age_days(now),
        })
    }
}

impl InsightRule for IdleResourceRule {
    fn name(&self) -> &'static str {
        "idle_resources"
    }

    fn evaluate(&self, data: &CollectedData, now: DateTime<Utc>) -> Vec<Insight> {
        let mut idle: Vec<&Resource> = data.resources.iter().filter(|r| r.is_idle()).collect();
        if idle.is_empty() {
            return Vec::new();
        }

        // most expensive first, so the evidence sample is the useful part
        idle.sort_by(|a, b| {
            b.monthly_cost_value()
                .total_cmp(&a.monthly_cost_value())
                .then_with(|| a.id.cmp(&b.id))
        });

        let savings: f64 = idle.iter().map(|r| r.monthly_cost_value()).sum();
        let aged = idle
            .iter()
            .filter(|r| r.age_days(now) >= self.thresholds.idle_age_days)
            .count();

        let base = if savings >= self.thresholds.idle_savings_high {
            Severity::Critical
        } else if savings >= self.thresholds.idle_savings_medium {
            Severity::Warning
        } else {
            Severity::Info
        };

        let (severity, risk) = if aged > 0 {
            let risk = if base == Severity::Critical {
                RiskLevel::Critical
            } else {
                RiskLevel::High
            };
            (base.escalate(), risk)
        } else {
            (base, base.risk())
        };

        let ids: Vec<&str> = idle.iter().take(MAX_EVIDENCE).map(|r| r.id.as_str()).collect();
        let more = idle.len().saturating_sub(ids.len());

        let mut finding = format!(
            "{} idle resource(s) ({}{}) could save {} per month",
            idle.len(),
            ids.join(", "),
            if more > 0 { format!(" and {} more", more) } else { String::new() },
            money(savings)
        );
        if aged > 0 {
            finding.push_str(&format!(
                "; {} idle for {}+ days",
                aged, self.thresholds.idle_age_days
            ));
        }

        let recommendation = if aged > 0 {
            "Terminate or snapshot-and-delete long-idle resources; confirm owners for the rest"
                .to_string()
        } else {
            "Confirm these resources are still needed; schedule or delete them if not".to_string()
        };

        vec![Insight {
            category: InsightCategory::CostOptimization,
            severity,
            risk,
            finding,
            evidence: idle
                .iter()
                .take(MAX_EVIDENCE)
                .map(|r| Self::evidence(r, now))
                .collect(),
            recommendation,
            impact: format!("{} potential monthly savings", money(savings)),
            impact_amount: Some(savings),
        }]
    }
}

//
// ================= Alert escalation =================
//

/// Every unread critical alert becomes its own critical finding
pub struct AlertEscalationRule;

impl AlertEscalationRule {
    fn category(alert: &Alert) -> InsightCategory {
        match alert.alert_type.to_lowercase().as_str() {
            "cost" | "billing" => InsightCategory::CostOptimization,
            "performance" => InsightCategory::Performance,
            "compliance" => InsightCategory::Compliance,
            _ => InsightCategory::Security,
        }
    }
}

impl InsightRule for AlertEscalationRule {
    fn name(&self) -> &'static str {
        "alert_escalation"
    }

    fn evaluate(&self, data: &CollectedData, _now: DateTime<Utc>) -> Vec<Insight> {
        data.alerts
            .iter()
            .filter(|a| !a.is_read && a.severity == Severity::Critical)
            .map(|alert| Insight {
                category: Self::category(alert),
                severity: Severity::Critical,
                risk: RiskLevel::Critical,
                finding: format!(
                    "Unread critical {} alert on {}: {}",
                    alert.alert_type, alert.account_id, alert.title
                ),
                evidence: vec![json!({
                    "id": alert.id,
                    "account_id": alert.account_id,
                    "alert_type": alert.alert_type,
                    "message": alert.message,
                    "created_at": alert.created_at,
                })],
                recommendation: format!("Act now: {}", alert.message),
                impact: "Open critical alert".to_string(),
                impact_amount: None,
            })
            .collect()
    }
}

//
// ================= Cost trend =================
//

/// Compares the average daily spend of the two halves of the series
pub struct CostTrendRule {
    thresholds: InsightThresholds,
}

impl CostTrendRule {
    pub fn new(thresholds: InsightThresholds) -> Self {
        Self { thresholds }
    }
}

impl InsightRule for CostTrendRule {
    fn name(&self) -> &'static str {
        "cost_trend"
    }

    fn evaluate(&self, data: &CollectedData, _now: DateTime<Utc>) -> Vec<Insight> {
        let daily = daily_totals(&data.costs);
        if daily.len() < 2 {
            return Vec::new();
        }

        let (first, second) = daily.split_at(daily.len() / 2);
        let average = |half: &[(chrono::NaiveDate, f64)]| {
            half.iter().map(|(_, total)| total).sum::<f64>() / half.len() as f64
        };
        let (before, after) = (average(first), average(second));
        if before <= 0.0 {
            return Vec::new();
        }

        let change_pct = (after - before) / before * 100.0;
        let severity = if change_pct >= self.thresholds.trend_critical_pct {
            Severity::Critical
        } else if change_pct >= self.thresholds.trend_warning_pct {
            Severity::Warning
        } else {
            return Vec::new();
        };

        let monthly_increase = (after - before) * 30.0;

        vec![Insight {
            category: InsightCategory::Trend,
            severity,
            risk: severity.risk(),
            finding: format!(
                "Daily spend rose {:.1}% ({} to {} per day) between {} and {}",
                change_pct,
                money(before),
                money(after),
                first[0].0,
                second[second.len() - 1].0
            ),
            evidence: vec![json!({
                "first_half_avg": (before * 100.0).round() / 100.0,
                "second_half_avg": (after * 100.0).round() / 100.0,
                "days": daily.len(),
            })],
            recommendation: "Identify the services driving the increase and check for new or \
                             unscaled workloads"
                .to_string(),
            impact: format!("~{} additional spend per month at this rate", money(monthly_increase)),
            impact_amount: Some(monthly_increase),
        }]
    }
}
