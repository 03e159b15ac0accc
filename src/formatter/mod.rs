//! Response formatting
//!
//! Turns ranked insights into the final answer. Works only from what the
//! turn already collected; nothing here touches the data store.

use crate::llm::{ChatMessage, LlmProvider};
use crate::models::{AccountScope, CollectedData, Insight, Severity};
use crate::tools::infra::cost_by_service;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn};

/// Bars shown in the cost chart
const MAX_CHART_BARS: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Visualization {
    /// Chart type, currently always "bar"
    pub kind: String,
    pub title: String,
    pub labels: Vec<String>,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormattedResponse {
    pub answer: String,
    pub visualization: Option<Visualization>,
}

pub struct FormatInput<'a> {
    pub query: &'a str,
    pub scope: &'a AccountScope,
    pub insights: &'a [Insight],
    pub collected: &'a CollectedData,
}

#[async_trait]
pub trait ResponseFormatter: Send + Sync {
    async fn format(&self, input: &FormatInput<'_>) -> Result<FormattedResponse>;
}

/// Bar chart of spend per service, largest first
pub fn cost_chart(collected: &CollectedData) -> Option<Visualization> {
    let by_service = cost_by_service(&collected.costs);
    if by_service.is_empty() {
        return None;
    }

    let (labels, values): (Vec<String>, Vec<f64>) = by_service
        .into_iter()
        .take(MAX_CHART_BARS)
        .map(|(service, amount)| (service, (amount * 100.0).round() / 100.0))
        .unzip();

    Some(Visualization {
        kind: "bar".to_string(),
        title: "Cost by service".to_string(),
        labels,
        values,
    })
}

//
// ================= Template =================
//

/// Deterministic text rendering; no LLM variance
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateFormatter;

impl TemplateFormatter {
    pub fn render(&self, input: &FormatInput<'_>) -> String {
        let mut out = String::new();
        let count = |severity: Severity| input.insights.iter().filter(|i| i.severity == severity).count();

        if input.insights.is_empty() {
            let _ = writeln!(
                out,
                "No notable findings for {}. Reviewed {} resource(s), {} cost record(s) and {} alert(s).",
                input.scope,
                input.collected.resources.len(),
                input.collected.costs.len(),
                input.collected.alerts.len()
            );
        } else {
            let _ = writeln!(
                out,
                "Analysis for {}: {} finding(s) ({} critical, {} warning, {} info).",
                input.scope,
                input.insights.len(),
                count(Severity::Critical),
                count(Severity::Warning),
                count(Severity::Info)
            );

            for (index, insight) in input.insights.iter().enumerate() {
                let _ = writeln!(out);
                let _ = writeln!(out, "{}. [{}] {}", index + 1, insight.severity, insight.finding);
                let _ = writeln!(out, "   Recommendation: {}", insight.recommendation);
                let _ = writeln!(out, "   Impact: {}", insight.impact);
            }
        }

        if !input.collected.gaps.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Some data could not be retrieved:");
            for gap in &input.collected.gaps {
                let _ = writeln!(out, "- {}: {}", gap.tool_name, gap.message);
            }
        }

        out.trim_end().to_string()
    }
}

#[async_trait]
impl ResponseFormatter for TemplateFormatter {
    async fn format(&self, input: &FormatInput<'_>) -> Result<FormattedResponse> {
        Ok(FormattedResponse {
            answer: self.render(input),
            visualization: cost_chart(input.collected),
        })
    }
}

//
// ================= LLM =================
//

/// Lets the provider write the prose, grounded on the ranked insights.
///
/// Any provider error or empty completion falls back to the template.
pub struct LlmFormatter {
    provider: Arc<dyn LlmProvider>,
    fallback: TemplateFormatter,
}

impl LlmFormatter {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            fallback: TemplateFormatter,
        }
    }

    fn build_messages(input: &FormatInput<'_>) -> Vec<ChatMessage> {
        let grounding = json!({
            "question": input.query,
            "scope": input.scope.to_string(),
            "findings": input.insights,
            "summary": {
                "resources": input.collected.resources.len(),
                "cost_records": input.collected.costs.len(),
                "alerts": input.collected.alerts.len(),
                "data_gaps": input.collected.gaps,
            },
        });

        vec![
            ChatMessage::system(
                "You write concise answers about cloud infrastructure. Use only the findings \
                 provided, keep their order, quote dollar figures exactly, and mention any data gaps.",
            ),
            ChatMessage::user(grounding.to_string()),
        ]
    }
}

#[async_trait]
impl ResponseFormatter for LlmFormatter {
    async fn format(&self, input: &FormatInput<'_>) -> Result<FormattedResponse> {
        let messages = Self::build_messages(input);

        let answer = match self.provider.complete(&messages, None).await {
            Ok(response) => match response.text_content() {
                Some(text) => {
                    info!(model = self.provider.model(), "Answer generated by LLM");
                    text.to_string()
                }
                None => {
                    warn!("LLM returned an empty answer, using template");
                    self.fallback.render(input)
                }
            },
            Err(e) => {
                warn!(error = %e, "LLM formatting failed, using template");
                self.fallback.render(input)
            }
        };

        Ok(FormattedResponse {
            answer,
            visualization: cost_chart(input.collected),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestrationError;
    use crate::llm::LlmResponse;
    use crate::models::{CostRecord, DataGap, InsightCategory, RiskLevel};
    use crate::test_support::{fixed_now, ScriptedProvider};

    fn insight(severity: Severity, finding: &str) -> Insight {
        Insight {
            category: InsightCategory::CostOptimization,
            severity,
            risk: RiskLevel::Low,
            finding: finding.to_string(),
            evidence: Vec::new(),
            recommendation: "Do the thing".to_string(),
            impact: "$10.00".to_string(),
            impact_amount: Some(10.0),
        }
    }

    fn collected() -> CollectedData {
        let cost = |service: &str, amount: f64| CostRecord {
            id: service.to_string(),
            account_id: "a".to_string(),
            service: service.to_string(),
            amount,
            date: fixed_now().date_naive(),
        };
        CollectedData {
            costs: vec![cost("S3", 30.0), cost("EC2", 120.0)],
            gaps: vec![DataGap {
                tool_name: "get_alerts".to_string(),
                message: "timed out".to_string(),
            }],
            ..CollectedData::default()
        }
    }

    #[test]
    fn test_template_lists_findings_and_gaps() {
        let insights = vec![insight(Severity::Critical, "first"), insight(Severity::Info, "second")];
        let data = collected();
        let scope = AccountScope::All;
        let text = TemplateFormatter.render(&FormatInput {
            query: "q",
            scope: &scope,
            insights: &insights,
            collected: &data,
        });

        assert!(text.starts_with("Analysis for all accounts: 2 finding(s) (1 critical, 0 warning, 1 info)."));
        assert!(text.contains("1. [CRITICAL] first"));
        assert!(text.contains("2. [INFO] second"));
        assert!(text.contains("- get_alerts: timed out"));
    }

    #[test]
    fn test_template_without_findings() {
        let data = CollectedData::default();
        let scope = AccountScope::Account("prod-001".into());
        let text = TemplateFormatter.render(&FormatInput {
            query: "q",
            scope: &scope,
            insights: &[],
            collected: &data,
        });
        assert!(text.starts_with("No notable findings for account prod-001."));
    }

    #[test]
    fn test_cost_chart() {
        let chart = cost_chart(&collected()).unwrap();
        assert_eq!(chart.labels, vec!["EC2", "S3"]);
        assert_eq!(chart.values, vec![120.0, 30.0]);
        assert!(cost_chart(&CollectedData::default()).is_none());
    }

    #[tokio::test]
    async fn test_llm_formatter_uses_provider_text() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(LlmResponse::text("EC2 dominates."))]));
        let data = collected();
        let scope = AccountScope::All;
        let response = LlmFormatter::new(provider)
            .format(&FormatInput {
                query: "q",
                scope: &scope,
                insights: &[],
                collected: &data,
            })
            .await
            .unwrap();

        assert_eq!(response.answer, "EC2 dominates.");
        assert!(response.visualization.is_some());
    }

    #[tokio::test]
    async fn test_llm_formatter_falls_back_on_error_or_empty() {
        let data = collected();
        let scope = AccountScope::All;
        let insights = vec![insight(Severity::Warning, "fallback finding")];
        let input = FormatInput {
            query: "q",
            scope: &scope,
            insights: &insights,
            collected: &data,
        };
        let expected = TemplateFormatter.render(&input);

        let failing = Arc::new(ScriptedProvider::new(vec![Err(
            OrchestrationError::ProviderUnavailable("down".into()),
        )]));
        let answer = LlmFormatter::new(failing).format(&input).await.unwrap().answer;
        assert_eq!(answer, expected);

        let empty = Arc::new(ScriptedProvider::new(vec![Ok(LlmResponse::text("   "))]));
        let answer = LlmFormatter::new(empty).format(&input).await.unwrap().answer;
        assert_eq!(answer, expected);
    }
}
