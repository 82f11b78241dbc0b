use regex::Regex;
use serde_json::json;

use crate::entity::{EntitySpan, EntityType, SourceTier};

const BUSINESS_TITLES: &[&str] = &[
    "CEO",
    "Chief Executive Officer",
    "CFO",
    "Chief Financial Officer",
    "COO",
    "Chief Operating Officer",
    "CTO",
    "Chief Technology Officer",
    "Chairman",
    "President",
    "Vice President",
    "VP",
    "SVP",
    "EVP",
    "Managing Director",
    "Managing Partner",
    "Director",
    "Head of",
    "Global Head",
];

const SKILL_TERMS: &[&str] = &[
    "Python",
    "SQL",
    "data analysis",
    "machine learning",
    "cloud computing",
    "customer service",
    "project management",
    "AI",
    "BPO operations",
];

/// Tier-2 regex battery: numeric, temporal, and phrase patterns that the
/// dictionaries do not cover.
pub struct PatternSet {
    money: Regex,
    percent: Regex,
    business_titles: Regex,
    skills: Regex,
    time_range: Regex,
    temporal: Regex,
    quantity: Regex,
    metric: Regex,
    duration: Regex,
    number: Regex,
}

impl PatternSet {
    pub fn compile() -> Result<Self, regex::Error> {
        let titles = BUSINESS_TITLES
            .iter()
            .map(|t| regex::escape(t))
            .collect::<Vec<_>>()
            .join("|");
        let skills = SKILL_TERMS
            .iter()
            .map(|t| regex::escape(t))
            .collect::<Vec<_>>()
            .join("|");

        Ok(Self {
            money: Regex::new(r"\$\s*\d{1,3}(?:,\d{3})*(?:\.\d{2})?")?,
            percent: Regex::new(r"\d{1,3}(?:\.\d{1,2})?\s*%")?,
            // Titles are matched case-sensitively: "ceo" in prose is noise,
            // "CEO" is a signal.
            business_titles: Regex::new(&format!(r"\b(?:{titles})\b"))?,
            skills: Regex::new(&format!(r"(?i)\b(?:{skills})\b"))?,
            time_range: Regex::new(
                r"(?i)(?:Q[1-4]\s*\d{4}|\d+\s+(?:day|week|month|year)s?|next\s+(?:quarter|year)|past\s+\d+\s+(?:months|years))",
            )?,
            temporal: Regex::new(r"(?i)\b(?:pre|post|mid)-(?:launch|merger|acquisition|pandemic)\b")?,
            quantity: Regex::new(
                r"(?i)\b\d+\s+(?:units?|employees?|customers?|users?|clients?|staff|people|workers?|agents?|members?)\b",
            )?,
            metric: Regex::new(
                r"(?i)\b\d+\.?\d*\s*%?\s*(?:uptime|SLA|availability|accuracy|efficiency|satisfaction|NPS|CSAT|FCR|AHT|MTTR|MTBF)\b",
            )?,
            duration: Regex::new(
                r"(?i)\b\d+\s+(?:seconds?|minutes?|hours?|days?|weeks?|months?|years?)\b",
            )?,
            number: Regex::new(r"\b\d{1,3}(?:,\d{3})*(?:\.\d+)?\b")?,
        })
    }

    /// Produce tier-2 candidates in fixed intra-tier order. Specific
    /// multi-token patterns run before the bare NUMBER pattern so that
    /// "500 employees" surfaces as one QUANTITY span, not a NUMBER plus
    /// discarded remainder.
    pub fn candidates(&self, text: &str) -> Vec<EntitySpan> {
        let mut out = Vec::new();

        collect(&self.money, text, EntityType::Money, 0.92, "money_pattern_v1", &mut out);
        collect(&self.percent, text, EntityType::Percent, 0.90, "percent_pattern_v1", &mut out);
        collect(
            &self.business_titles,
            text,
            EntityType::Misc,
            0.85,
            "business_title_v1",
            &mut out,
        );
        collect(&self.skills, text, EntityType::Misc, 0.82, "skill_v1", &mut out);
        collect(&self.time_range, text, EntityType::Time, 0.80, "time_range_v1", &mut out);
        collect(&self.temporal, text, EntityType::Time, 0.78, "temporal_v1", &mut out);
        collect(&self.metric, text, EntityType::Metric, 0.83, "metric_pattern_v1", &mut out);
        collect(&self.quantity, text, EntityType::Quantity, 0.82, "quantity_pattern_v1", &mut out);
        collect(&self.duration, text, EntityType::Duration, 0.81, "duration_pattern_v1", &mut out);
        collect(&self.number, text, EntityType::Number, 0.80, "number_pattern_v1", &mut out);

        out
    }
}

fn collect(
    pattern: &Regex,
    text: &str,
    entity_type: EntityType,
    confidence: f64,
    source_version: &str,
    out: &mut Vec<EntitySpan>,
) {
    for m in pattern.find_iter(text) {
        let span = EntitySpan::new(
            m.start(),
            m.end(),
            m.as_str().to_string(),
            entity_type,
            confidence,
            SourceTier::Pattern,
            source_version.to_string(),
        )
        .with_normalized(json!({ "surface": m.as_str() }));
        out.push(span);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types_of(text: &str) -> Vec<(EntityType, String)> {
        let patterns = PatternSet::compile().unwrap();
        patterns
            .candidates(text)
            .into_iter()
            .map(|s| (s.entity_type, s.surface))
            .collect()
    }

    #[test]
    fn test_money_and_percent() {
        let found = types_of("Revenue grew to $1,250,000.00, up 12.5% year over year.");

        assert!(found.contains(&(EntityType::Money, "$1,250,000.00".into())));
        assert!(found.contains(&(EntityType::Percent, "12.5%".into())));
    }

    #[test]
    fn test_business_title_case_sensitive() {
        let found = types_of("Their CEO spoke; the word ceo alone should not match.");

        let titles: Vec<_> = found
            .iter()
            .filter(|(t, s)| *t == EntityType::Misc && s == "CEO")
            .collect();
        assert_eq!(titles.len(), 1);
    }

    #[test]
    fn test_quantity_metric_duration() {
        let found = types_of("We onboarded 500 employees with 99.9% uptime over 18 months.");

        assert!(found.iter().any(|(t, s)| *t == EntityType::Quantity && s == "500 employees"));
        assert!(found.iter().any(|(t, _)| *t == EntityType::Metric));
        assert!(found.iter().any(|(t, s)| *t == EntityType::Duration && s == "18 months"));
    }

    #[test]
    fn test_time_range_phrases() {
        let found = types_of("Guidance for Q3 2025 covers the next quarter.");

        let times: Vec<_> = found.iter().filter(|(t, _)| *t == EntityType::Time).collect();
        assert_eq!(times.len(), 2);
    }

    #[test]
    fn test_temporal_descriptors() {
        let found = types_of("post-merger integration went smoothly");

        assert!(found.iter().any(|(t, s)| *t == EntityType::Time && s == "post-merger"));
    }

    #[test]
    fn test_empty_text() {
        assert!(types_of("").is_empty());
    }
}
