use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::catalog::{ContentRule, StructureSignals};

/// Outcome of scoring one document against the content-rule set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    /// Winning label, or "Other" when below threshold.
    pub label: String,
    /// Winning label before the threshold gate.
    pub raw_label: String,
    pub score: f64,
    pub confidence: f64,
    pub needs_review: bool,
    /// Per-label scores, in rule order.
    pub scores: Vec<(String, f64)>,
    pub threshold: f64,
}

struct CompiledRule {
    label: String,
    url_patterns: Vec<Regex>,
    title_patterns: Vec<Regex>,
    content_patterns: Vec<Regex>,
    url_weight: f64,
    title_weight: f64,
    pattern_weight: f64,
    min_patterns: usize,
    min_score: f64,
    signals: StructureSignals,
}

/// Scores structural features shared by every rule.
struct SignalPatterns {
    metrics: Regex,
    quotes: Regex,
    cta: Regex,
    fill_out: Regex,
    date: Regex,
    registration: Regex,
    pricing: Regex,
    currency: Regex,
    requirements: Regex,
    names: Regex,
    list: Regex,
    steps: Regex,
}

impl SignalPatterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            metrics: Regex::new(r"\d+\s*(?:%|percent|percentage|bps)")?,
            quotes: Regex::new("[\"\u{201c}\u{201d}]")?,
            cta: Regex::new(r"\b(?:get started|sign up|try free|request demo|contact (?:us|sales))\b")?,
            fill_out: Regex::new(r"\bfill out\b")?,
            date: Regex::new(
                r"\b(?:january|february|march|april|may|june|july|august|september|october|november|december|\d{1,2}/\d{1,2}/\d{2,4}|20\d{2})\b",
            )?,
            registration: Regex::new(r"\b(?:register|registration|rsvp|save your spot)\b")?,
            pricing: Regex::new(r"\b(?:per month|per user|pricing plan|pricing tier)\b")?,
            currency: Regex::new(r"[$£€¥]\s?\d|\b(?:usd|eur|gbp|cad|aud)\b")?,
            requirements: Regex::new(r"\b(?:requirements|qualifications|responsibilities):")?,
            names: Regex::new(r"\b(?:ceo|cfo|cto|coo|vp|vice president|manager|director)\b")?,
            list: Regex::new(r"(?:^|\n)\s*(?:[-*•]|\d+\.)\s")?,
            steps: Regex::new(r"\bstep\s+\d+")?,
        })
    }
}

/// Rule-based document classifier. Rules and their regexes are compiled
/// once; a rule pattern that fails to compile is skipped with a warning,
/// never fatal.
pub struct DocumentClassifier {
    rules: Vec<CompiledRule>,
    signals: SignalPatterns,
}

impl DocumentClassifier {
    pub fn new(rules: &[ContentRule]) -> Result<Self, regex::Error> {
        let compiled = rules
            .iter()
            .map(|rule| CompiledRule {
                label: rule.label.clone(),
                url_patterns: compile_patterns(&rule.label, "url", &rule.url_patterns),
                title_patterns: compile_patterns(&rule.label, "title", &rule.title_patterns),
                content_patterns: compile_patterns(&rule.label, "content", &rule.content_patterns),
                url_weight: rule.url_weight,
                title_weight: rule.title_weight,
                pattern_weight: rule.pattern_weight,
                min_patterns: rule.min_patterns,
                min_score: rule.min_score,
                signals: rule.structure_signals.clone(),
            })
            .collect();

        Ok(Self {
            rules: compiled,
            signals: SignalPatterns::compile()?,
        })
    }

    /// Score `body` (with its source `url` and optional `title`) against
    /// every rule. Returns `None` when no rules are loaded.
    #[must_use]
    pub fn classify(&self, url: &str, title: Option<&str>, body: &str) -> Option<Classification> {
        if self.rules.is_empty() {
            return None;
        }

        let url_lower = url.to_lowercase();
        let title_lower = title.unwrap_or_default().to_lowercase();
        let body_lower = body.to_lowercase();

        let mut scores: Vec<(String, f64)> = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            let mut rule_score = 0.0;

            // One hit per field: the first matching url/title pattern wins
            // its weight, further matches add nothing.
            if rule.url_patterns.iter().any(|p| p.is_match(&url_lower)) {
                rule_score += rule.url_weight;
            }
            if rule.title_patterns.iter().any(|p| p.is_match(&title_lower)) {
                rule_score += rule.title_weight;
            }

            let pattern_matches = rule
                .content_patterns
                .iter()
                .filter(|p| p.is_match(body))
                .count();
            if pattern_matches >= rule.min_patterns {
                rule_score += pattern_matches as f64 * rule.pattern_weight;
            } else if rule.min_patterns > 0 {
                // Below the content-pattern floor the whole rule is dampened.
                rule_score *= 0.6;
            }

            rule_score += self.score_signals(&rule.signals, body, &body_lower);

            scores.push((rule.label.clone(), round2(rule_score)));
        }

        // Ties resolve to the earlier rule.
        let mut best: Option<&(String, f64)> = None;
        for entry in &scores {
            if best.is_none_or(|b| entry.1 > b.1) {
                best = Some(entry);
            }
        }
        let (raw_label, max_score) = best.map(|(label, score)| (label.clone(), *score))?;

        let threshold = self
            .rules
            .iter()
            .find(|r| r.label == raw_label)
            .map_or(30.0, |r| r.min_score);

        let meets_threshold = max_score >= threshold;
        let label = if meets_threshold { raw_label.clone() } else { "Other".to_string() };
        let cap = if meets_threshold { 1.0 } else { 0.6 };
        let confidence = round3((max_score / threshold.max(30.0)).min(cap));
        let needs_review = !meets_threshold || confidence < 0.65;

        Some(Classification {
            label,
            raw_label,
            score: max_score,
            confidence,
            needs_review,
            scores,
            threshold,
        })
    }

    #[allow(clippy::too_many_lines)]
    fn score_signals(&self, signals: &StructureSignals, body: &str, body_lower: &str) -> f64 {
        let mut score = 0.0;
        let word_count = body_lower.split_whitespace().count() as u32;

        if let Some(min_length) = signals.min_length {
            if word_count >= min_length {
                score += 2.0;
            }
        }
        if let Some(max_length) = signals.max_length {
            if word_count > 0 && word_count <= max_length {
                score += 1.0;
            }
        }

        if signals.has_metrics && self.signals.metrics.is_match(body_lower) {
            score += 3.0;
        }

        if !signals.has_sections.is_empty() {
            let found = signals
                .has_sections
                .iter()
                .filter(|s| !s.is_empty() && body_lower.contains(&s.to_lowercase()))
                .count();
            if found == signals.has_sections.len() {
                score += 4.0;
            } else if found > 0 {
                score += 2.0;
            }
        }

        if signals.has_quotes && self.signals.quotes.is_match(body) {
            score += 2.0;
        }
        if signals.has_code_blocks && (body_lower.contains("```") || body_lower.contains("<code")) {
            score += 3.0;
        }
        if signals.has_cta && self.signals.cta.is_match(body_lower) {
            score += 2.0;
        }
        if signals.has_form
            && (body_lower.contains("<form") || self.signals.fill_out.is_match(body_lower))
        {
            score += 1.5;
        }
        if signals.has_date && self.signals.date.is_match(body_lower) {
            score += 2.0;
        }
        if signals.has_registration && self.signals.registration.is_match(body_lower) {
            score += 2.0;
        }
        if signals.has_pricing_table
            && (body_lower.contains("<table") || self.signals.pricing.is_match(body_lower))
        {
            score += 2.5;
        }
        if signals.has_currency && self.signals.currency.is_match(body_lower) {
            score += 1.5;
        }
        if signals.has_requirements_list && self.signals.requirements.is_match(body_lower) {
            score += 2.0;
        }
        if signals.has_names && self.signals.names.is_match(body_lower) {
            score += 1.5;
        }
        if signals.has_list && self.signals.list.is_match(body) {
            score += 2.0;
        }
        if signals.has_steps && self.signals.steps.is_match(body_lower) {
            score += 1.5;
        }

        score
    }
}

fn compile_patterns(label: &str, field: &str, patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| {
            match RegexBuilder::new(p).case_insensitive(true).build() {
                Ok(regex) => Some(regex),
                Err(error) => {
                    tracing::warn!(label, field, pattern = %p, %error, "Skipping invalid rule pattern");
                    None
                }
            }
        })
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
