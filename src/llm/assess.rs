use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::assessment::{
    CallAssessment, ChurnOutlook, Intent, ReportedIssue, Sentiment, Severity, Tier, UpsellOutlook,
};
use crate::date_util::strip_code_fences;
use crate::error::{Error, Result};
use crate::ingest::Transcript;

const PROMPT_VERSION: &str = "assess-v1";

/// Fixed issue categories offered to the model.
pub const CATEGORIES: &[&str] = &[
    "Lead Management",
    "Lead Quality",
    "Lead Quantity",
    "Promoted Listing / Lead Priority",
    "Visibility / Ranking",
    "Trust Badge / Verification",
    "Catalog / Storefront Setup",
    "Buyer Interaction",
    "Analytics & Insights",
    "Billing & Renewal",
    "Payments",
    "App / Platform Usability",
    "Support / Training",
    "Seller Verification",
    "Compliance / Documentation",
    "Category-City Targeting",
    "Communication",
    "Account / Dashboard",
    "Other",
];

const FALLBACK_CATEGORY: &str = "Other";

/// Turns a transcript into a structured call assessment.
///
/// Implementations return `Err` only when the assessment service could not be
/// reached; an unusable response becomes a degraded assessment.
#[async_trait]
pub trait Assessor: Send + Sync {
    async fn assess(&self, transcript: &Transcript, context: &str) -> Result<CallAssessment>;
}

/// Assessor backed by an LLM agent.
pub struct LlmAssessor {
    agent: mixtape_core::Agent,
}

impl LlmAssessor {
    pub fn new(agent: mixtape_core::Agent) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Assessor for LlmAssessor {
    async fn assess(&self, transcript: &Transcript, context: &str) -> Result<CallAssessment> {
        let prompt = build_prompt(&transcript.text, context);
        log::debug!(
            "Assessing call {} ({PROMPT_VERSION}, {} chars)",
            transcript.call_id,
            transcript.text.len()
        );

        let response = self
            .agent
            .run(&prompt)
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;
        Ok(parse_response(response.text(), transcript, Utc::now()))
    }
}

pub fn build_prompt(transcript: &str, context: &str) -> String {
    let categories = CATEGORIES.join(", ");
    let context = if context.is_empty() {
        String::new()
    } else {
        format!("\nWhat we already know about this account:\n{context}\n")
    };

    format!(
        r#"You analyze support calls between a marketplace and the businesses that sell on it.
Identify every issue raised, assess the caller's sentiment, churn risk and upsell potential,
and rate the agent. Use the account history, if given, to recognize recurring problems.
{context}
Call transcript:
{transcript}

Issue categories (use these exact names): {categories}

Respond with ONLY a JSON object (no markdown, no code fences) in this exact format:
{{
  "transcript_en": "English translation or cleaned-up transcript",
  "call_summary": "2-3 sentence summary of the call",
  "issues": [
    {{
      "problem": "Specific issue description",
      "category": "One category from the list above",
      "severity": "low|medium|high|critical",
      "action": "What should be done to fix this"
    }}
  ],
  "intent": {{
    "sentiment": "Positive|Neutral|Negative",
    "satisfaction_score": <1-10 integer>,
    "prompt_resolution": true/false,
    "overall_experience": "Good|Average|Poor"
  }},
  "churn": {{
    "risk": "low|medium|high",
    "renewal_at_risk": true/false,
    "dissatisfaction": "low|medium|high",
    "probability": <0.0-1.0 likelihood the account leaves>,
    "reason": "Why they might leave"
  }},
  "upsell": {{
    "has_opportunity": true/false,
    "score": <1-10 integer>,
    "willingness": "low|medium|high",
    "growth_oriented": true/false,
    "interested_features": ["feature"],
    "reason": "Why this opportunity exists"
  }},
  "agent_performance": "Good|Average|Poor",
  "key_insights": ["insight"],
  "follow_up_needed": true/false,
  "escalation_required": true/false
}}"#
    )
}

// ── Response parsing ───────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IssueDto {
    problem: String,
    #[serde(alias = "bucket")]
    category: String,
    severity: String,
    #[serde(alias = "actionable_summary")]
    action: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IntentDto {
    sentiment: String,
    satisfaction_score: f64,
    prompt_resolution: bool,
    overall_experience: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChurnDto {
    #[serde(alias = "is_likely_to_churn")]
    risk: String,
    renewal_at_risk: bool,
    #[serde(alias = "dissatisfaction_level")]
    dissatisfaction: String,
    #[serde(alias = "churn_probability")]
    probability: f64,
    #[serde(alias = "churn_reason")]
    reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UpsellDto {
    has_opportunity: bool,
    score: f64,
    #[serde(alias = "willingness_to_invest")]
    willingness: String,
    #[serde(alias = "is_growth_oriented")]
    growth_oriented: bool,
    interested_features: Vec<String>,
    #[serde(alias = "upsell_reason")]
    reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AssessmentDto {
    transcript_en: String,
    original_language: Option<String>,
    call_summary: String,
    issues: Vec<IssueDto>,
    intent: IntentDto,
    churn: ChurnDto,
    upsell: UpsellDto,
    agent_performance: Option<String>,
    key_insights: Vec<String>,
    follow_up_needed: bool,
    escalation_required: bool,
}

/// Cut the outermost JSON object out of a model response.
pub fn extract_json(response: &str) -> &str {
    let s = strip_code_fences(response);
    match (s.find('{'), s.rfind('}')) {
        (Some(start), Some(end)) if end > start => &s[start..=end],
        _ => s,
    }
}

/// Replace raw line breaks inside JSON string literals with spaces.
pub fn sanitize_json_newlines(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in json.chars() {
        if escaped {
            escaped = false;
            out.push(c);
            continue;
        }
        match c {
            '\\' => {
                escaped = true;
                out.push(c);
            }
            '"' => {
                in_string = !in_string;
                out.push(c);
            }
            '\n' | '\r' if in_string => out.push(' '),
            _ => out.push(c),
        }
    }
    out
}

fn canonical_category(raw: &str) -> String {
    let raw = raw.trim();
    match CATEGORIES.iter().find(|c| c.eq_ignore_ascii_case(raw)) {
        Some(c) => c.to_string(),
        None => {
            log::debug!("Unknown issue category '{raw}', filing under {FALLBACK_CATEGORY}");
            FALLBACK_CATEGORY.to_string()
        }
    }
}

fn optional_text(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl AssessmentDto {
    fn into_assessment(self, transcript: &Transcript, now: DateTime<Utc>) -> CallAssessment {
        let issues = self
            .issues
            .into_iter()
            .filter(|i| !i.problem.trim().is_empty())
            .map(|i| ReportedIssue {
                problem: i.problem.trim().to_string(),
                category: canonical_category(&i.category),
                severity: Severity::parse(&i.severity).unwrap_or(Severity::Medium),
                action: i.action.trim().to_string(),
            })
            .collect();

        let transcript_en = if self.transcript_en.trim().is_empty() {
            transcript.text.clone()
        } else {
            self.transcript_en
        };

        CallAssessment {
            call_id: transcript.call_id.clone(),
            account_id: transcript.account_id.clone(),
            timestamp: transcript.timestamp.unwrap_or(now),
            transcript_en,
            original_language: optional_text(self.original_language)
                .or_else(|| transcript.language.clone()),
            issues,
            intent: Intent {
                sentiment: Sentiment::parse(&self.intent.sentiment),
                satisfaction_score: self.intent.satisfaction_score.round().clamp(0.0, 10.0) as i32,
                prompt_resolution: self.intent.prompt_resolution,
                overall_experience: optional_text(self.intent.overall_experience),
            },
            churn: ChurnOutlook {
                risk: Tier::parse(&self.churn.risk),
                renewal_at_risk: self.churn.renewal_at_risk,
                dissatisfaction: Tier::parse(&self.churn.dissatisfaction),
                probability: self.churn.probability.clamp(0.0, 1.0),
                reason: optional_text(self.churn.reason),
            },
            upsell: UpsellOutlook {
                has_opportunity: self.upsell.has_opportunity,
                score: self.upsell.score.round().clamp(0.0, 10.0) as i32,
                willingness: Tier::parse(&self.upsell.willingness),
                growth_oriented: self.upsell.growth_oriented,
                interested_features: self.upsell.interested_features,
                reason: optional_text(self.upsell.reason),
            },
            call_summary: self.call_summary.trim().to_string(),
            agent_performance: optional_text(self.agent_performance),
            key_insights: self.key_insights,
            follow_up_needed: self.follow_up_needed,
            escalation_required: self.escalation_required,
            raw_response: None,
            parse_error: None,
            analyzed_at: now,
        }
    }
}

/// Build an assessment from a raw model response, degrading instead of failing.
pub fn parse_response(response: &str, transcript: &Transcript, now: DateTime<Utc>) -> CallAssessment {
    let json = sanitize_json_newlines(extract_json(response));
    match serde_json::from_str::<AssessmentDto>(&json) {
        Ok(dto) => dto.into_assessment(transcript, now),
        Err(e) => {
            log::warn!(
                "Could not parse assessment for call {}: {e}",
                transcript.call_id
            );
            let mut degraded = CallAssessment::degraded(
                &transcript.call_id,
                &transcript.account_id,
                transcript.timestamp.unwrap_or(now),
                &transcript.text,
                Some(response.to_string()),
                format!("Failed to parse LLM response: {e}"),
            );
            degraded.original_language = transcript.language.clone();
            degraded.analyzed_at = now;
            degraded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::CallMetadata;

    fn transcript() -> Transcript {
        Transcript {
            call_id: "c1".into(),
            account_id: "acct".into(),
            timestamp: None,
            language: Some("hi-en".into()),
            text: "Seller: my payment is stuck".into(),
            metadata: CallMetadata::default(),
        }
    }

    #[test]
    fn test_extract_json_from_chatty_response() {
        let r = "Sure! Here is the analysis:\n```json\n{\"a\": {\"b\": 1}}\n```";
        assert_eq!(extract_json(r), "{\"a\": {\"b\": 1}}");
        assert_eq!(extract_json("prefix {\"x\":1} suffix"), "{\"x\":1}");
        assert_eq!(extract_json("no json here"), "no json here");
    }

    #[test]
    fn test_sanitize_newlines_only_inside_strings() {
        let raw = "{\n\"summary\": \"line one\nline two\",\n\"q\": \"say \\\"hi\\\"\n\"}";
        let clean = sanitize_json_newlines(raw);
        assert_eq!(clean, "{\n\"summary\": \"line one line two\",\n\"q\": \"say \\\"hi\\\" \"}");
        assert!(serde_json::from_str::<serde_json::Value>(&clean).is_ok());
    }

    #[test]
    fn test_parse_full_response() {
        let response = r#"```json
{
  "transcript_en": "Seller: my payment is stuck",
  "call_summary": "Payment stuck for a week.",
  "issues": [
    {"problem": "Payment not settled", "category": "payments", "severity": "HIGH", "action": "Escalate to finance"},
    {"problem": "Wants more leads", "bucket": "Growth hacks", "severity": "urgent", "actionable_summary": "Suggest plan"},
    {"problem": "  ", "category": "Other", "severity": "low", "action": ""}
  ],
  "intent": {"sentiment": "negative", "satisfaction_score": 3, "prompt_resolution": false, "overall_experience": "Poor"},
  "churn": {"risk": "high", "renewal_at_risk": true, "dissatisfaction": "high", "probability": 1.4, "reason": "Money stuck"},
  "upsell": {"has_opportunity": false, "score": 2, "willingness": "low"},
  "agent_performance": "Average",
  "key_insights": ["finance delay"],
  "follow_up_needed": true,
  "escalation_required": true
}
```"#;
        let now = Utc::now();
        let a = parse_response(response, &transcript(), now);
        assert!(!a.is_degraded());
        assert_eq!(a.issues.len(), 2);
        assert_eq!(a.issues[0].category, "Payments");
        assert_eq!(a.issues[0].severity, Severity::High);
        assert_eq!(a.issues[1].category, "Other");
        assert_eq!(a.issues[1].severity, Severity::Medium);
        assert_eq!(a.issues[1].action, "Suggest plan");
        assert_eq!(a.intent.sentiment, Some(Sentiment::Negative));
        assert_eq!(a.intent.satisfaction_score, 3);
        assert_eq!(a.churn.risk, Some(Tier::High));
        assert_eq!(a.churn.probability, 1.0);
        assert!(a.escalation_required);
        assert_eq!(a.timestamp, now);
        assert_eq!(a.original_language.as_deref(), Some("hi-en"));
    }

    #[test]
    fn test_unparseable_response_degrades() {
        let now = Utc::now();
        let a = parse_response("I could not analyze this call.", &transcript(), now);
        assert!(a.is_degraded());
        assert!(a.issues.is_empty());
        assert_eq!(a.raw_response.as_deref(), Some("I could not analyze this call."));
        assert_eq!(a.transcript_en, "Seller: my payment is stuck");
        assert_eq!(a.call_id, "c1");
    }

    #[test]
    fn test_prompt_lists_categories_and_context() {
        let p = build_prompt("hello", "Health score: 40%");
        assert!(p.contains("Billing & Renewal"));
        assert!(p.contains("Health score: 40%"));
        assert!(p.contains("hello"));
        assert!(!build_prompt("hello", "").contains("What we already know"));
    }
}
