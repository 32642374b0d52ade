use super::types::{HealthLabel, TrendDirection};
use crate::assessment::{Sentiment, Tier};

const BASELINE: i32 = 50;
/// Center of the 1-10 satisfaction scale.
pub const SATISFACTION_MIDPOINT: i32 = 5;
const OPEN_ISSUE_PENALTY_CAP: i32 = 30;

const HEALTHY_THRESHOLD: u8 = 70;
const AT_RISK_THRESHOLD: u8 = 40;

#[derive(Debug, Clone, PartialEq)]
pub struct HealthInputs {
    pub sentiment: Option<Sentiment>,
    /// 0 means not reported and contributes nothing.
    pub satisfaction_score: i32,
    pub churn_risk: Option<Tier>,
    pub open_issues: usize,
    pub recurring_issues: usize,
    pub overall_trend: TrendDirection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthAssessment {
    pub score: u8,
    pub label: HealthLabel,
    /// Highest-priority reason the account needs attention, if any.
    pub attention: Option<String>,
}

impl HealthAssessment {
    pub fn needs_attention(&self) -> bool {
        self.attention.is_some()
    }
}

/// Composite 0-100 health score.
///
/// Satisfaction adds `(score - SATISFACTION_MIDPOINT) * 4` for any reported
/// score on the 1-10 scale. A score of 0 is what degraded and empty-transcript
/// assessments carry, so it is treated as unreported and adds nothing rather
/// than the -20 the formula would give.
pub fn score(inputs: &HealthInputs) -> HealthAssessment {
    let mut score = BASELINE;

    score += match inputs.sentiment {
        Some(Sentiment::Positive) => 20,
        Some(Sentiment::Negative) => -20,
        _ => 0,
    };

    if inputs.satisfaction_score > 0 {
        score += (inputs.satisfaction_score - SATISFACTION_MIDPOINT) * 4;
    }

    score += match inputs.churn_risk {
        Some(Tier::Low) => 15,
        Some(Tier::High) => -25,
        _ => 0,
    };

    let open = i32::try_from(inputs.open_issues).unwrap_or(i32::MAX);
    score -= open.saturating_mul(5).min(OPEN_ISSUE_PENALTY_CAP);

    let recurring = i32::try_from(inputs.recurring_issues).unwrap_or(i32::MAX);
    score = score.saturating_sub(recurring.saturating_mul(10));

    score += match inputs.overall_trend {
        TrendDirection::Improving => 10,
        TrendDirection::Stable => 0,
        TrendDirection::Declining => -10,
    };

    let score = score.clamp(0, 100) as u8;
    HealthAssessment {
        score,
        label: label_for(score),
        attention: attention_reason(score, inputs),
    }
}

pub fn label_for(score: u8) -> HealthLabel {
    if score >= HEALTHY_THRESHOLD {
        HealthLabel::Healthy
    } else if score >= AT_RISK_THRESHOLD {
        HealthLabel::AtRisk
    } else {
        HealthLabel::Critical
    }
}

// First matching rule wins.
fn attention_reason(score: u8, inputs: &HealthInputs) -> Option<String> {
    if score < AT_RISK_THRESHOLD {
        Some("critical health score".to_string())
    } else if inputs.churn_risk == Some(Tier::High) {
        Some("high churn risk".to_string())
    } else if inputs.recurring_issues > 0 {
        Some(format!("{} recurring unresolved issues", inputs.recurring_issues))
    } else if inputs.overall_trend == TrendDirection::Declining {
        Some("declining trend detected".to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neutral() -> HealthInputs {
        HealthInputs {
            sentiment: Some(Sentiment::Neutral),
            satisfaction_score: 5,
            churn_risk: Some(Tier::Medium),
            open_issues: 0,
            recurring_issues: 0,
            overall_trend: TrendDirection::Stable,
        }
    }

    #[test]
    fn test_neutral_baseline() {
        let h = score(&neutral());
        assert_eq!(h.score, 50);
        assert_eq!(h.label, HealthLabel::AtRisk);
        assert!(!h.needs_attention());
    }

    #[test]
    fn test_best_case_clamps_to_100() {
        let h = score(&HealthInputs {
            sentiment: Some(Sentiment::Positive),
            satisfaction_score: 10,
            churn_risk: Some(Tier::Low),
            open_issues: 0,
            recurring_issues: 0,
            overall_trend: TrendDirection::Improving,
        });
        assert_eq!(h.score, 100);
        assert_eq!(h.label, HealthLabel::Healthy);
        assert_eq!(h.attention, None);
    }

    #[test]
    fn test_open_issue_penalty_is_capped() {
        let mut inputs = neutral();
        inputs.open_issues = 20;
        assert_eq!(score(&inputs).score, 20);
        inputs.open_issues = 2;
        assert_eq!(score(&inputs).score, 40);
    }

    #[test]
    fn test_recurring_penalty_is_uncapped() {
        let mut inputs = neutral();
        inputs.sentiment = Some(Sentiment::Positive);
        inputs.churn_risk = Some(Tier::Low);
        inputs.recurring_issues = 8;
        // 50 + 20 + 15 - 80
        assert_eq!(score(&inputs).score, 5);
    }

    #[test]
    fn test_unreported_satisfaction_is_neutral() {
        let mut inputs = neutral();
        inputs.satisfaction_score = 0;
        assert_eq!(score(&inputs).score, 50);
        inputs.satisfaction_score = 1;
        assert_eq!(score(&inputs).score, 34);
    }

    #[test]
    fn test_label_thresholds() {
        assert_eq!(label_for(100), HealthLabel::Healthy);
        assert_eq!(label_for(70), HealthLabel::Healthy);
        assert_eq!(label_for(69), HealthLabel::AtRisk);
        assert_eq!(label_for(40), HealthLabel::AtRisk);
        assert_eq!(label_for(39), HealthLabel::Critical);
        assert_eq!(label_for(0), HealthLabel::Critical);
    }

    #[test]
    fn test_score_always_in_range() {
        let sentiments = [None, Some(Sentiment::Positive), Some(Sentiment::Negative)];
        let tiers = [None, Some(Tier::Low), Some(Tier::High)];
        let trends = [
            TrendDirection::Improving,
            TrendDirection::Stable,
            TrendDirection::Declining,
        ];
        for sentiment in sentiments {
            for churn_risk in tiers {
                for overall_trend in trends {
                    for satisfaction_score in [0, 1, 10] {
                        for open_issues in [0, 3, 50] {
                            let h = score(&HealthInputs {
                                sentiment,
                                satisfaction_score,
                                churn_risk,
                                open_issues,
                                recurring_issues: open_issues,
                                overall_trend,
                            });
                            assert!(h.score <= 100);
                            assert_eq!(h.label, label_for(h.score));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_attention_priority_critical_beats_churn() {
        let h = score(&HealthInputs {
            sentiment: Some(Sentiment::Negative),
            satisfaction_score: 2,
            churn_risk: Some(Tier::High),
            open_issues: 1,
            recurring_issues: 0,
            overall_trend: TrendDirection::Stable,
        });
        assert_eq!(h.score, 0);
        assert_eq!(h.label, HealthLabel::Critical);
        assert_eq!(h.attention.as_deref(), Some("critical health score"));
    }

    #[test]
    fn test_attention_churn_then_recurring_then_trend() {
        let mut inputs = neutral();
        inputs.sentiment = Some(Sentiment::Positive);
        inputs.satisfaction_score = 10;
        inputs.churn_risk = Some(Tier::High);
        inputs.recurring_issues = 1;
        inputs.overall_trend = TrendDirection::Declining;
        assert_eq!(score(&inputs).attention.as_deref(), Some("high churn risk"));

        inputs.churn_risk = Some(Tier::Low);
        assert_eq!(
            score(&inputs).attention.as_deref(),
            Some("1 recurring unresolved issues")
        );

        inputs.recurring_issues = 0;
        assert_eq!(
            score(&inputs).attention.as_deref(),
            Some("declining trend detected")
        );
    }
}
