pub mod patterns;
pub mod statistical;

use std::sync::Arc;

use serde_json::json;
use thiserror::Error;

use crate::catalog::{Catalog, PhraseMatch};
use crate::entity::{EntitySpan, SourceTier};
use patterns::PatternSet;
use statistical::{label_confidence, map_label, StatisticalModel};

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Extraction failed: {0}")]
    Failed(String),
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("Malformed document record: {0}")]
    MalformedDocument(String),
}

pub type ExtractionResult<T> = Result<T, ExtractionError>;

/// Applies the four extraction tiers in strict priority order and keeps the
/// first span to claim any region of text.
///
/// Tier order is trust order: taxonomy phrases, then regex patterns, then
/// the entity ruler, then the statistical model. A later candidate that
/// overlaps an accepted span is discarded.
pub struct MultiTierTagger {
    catalog: Arc<Catalog>,
    patterns: PatternSet,
    model: Arc<dyn StatisticalModel>,
}

impl MultiTierTagger {
    pub fn new(catalog: Arc<Catalog>, model: Arc<dyn StatisticalModel>) -> ExtractionResult<Self> {
        Ok(Self {
            catalog,
            patterns: PatternSet::compile()?,
            model,
        })
    }

    /// Tag `text`, returning a deduplicated, non-overlapping span set.
    ///
    /// Empty text yields an empty set, never an error.
    pub fn tag(&self, text: &str) -> ExtractionResult<Vec<EntitySpan>> {
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let mut accepted: Vec<(usize, usize)> = Vec::new();
        let mut out: Vec<EntitySpan> = Vec::new();

        for m in self.catalog.taxonomy_index().find_matches(text) {
            let span = phrase_span(text, &m, SourceTier::Taxonomy, None);
            try_accept(span, &mut accepted, &mut out);
        }

        for span in self.patterns.candidates(text) {
            try_accept(span, &mut accepted, &mut out);
        }

        for m in self.catalog.ruler_index().find_matches(text) {
            let span = phrase_span(text, &m, SourceTier::Ruler, Some(0.85));
            try_accept(span, &mut accepted, &mut out);
        }

        for predicted in self.model.predict(text)? {
            let Some(entity_type) = map_label(&predicted.label) else {
                tracing::debug!(label = %predicted.label, "Dropping unmapped model label");
                continue;
            };
            // Model output is untrusted: reject spans that are not valid
            // offsets into this document.
            if predicted.start >= predicted.end || text.get(predicted.start..predicted.end).is_none()
            {
                tracing::warn!(
                    start = predicted.start,
                    end = predicted.end,
                    "Dropping model span with invalid offsets"
                );
                continue;
            }

            let surface = text[predicted.start..predicted.end].to_string();
            let span = EntitySpan::new(
                predicted.start,
                predicted.end,
                surface.clone(),
                entity_type,
                label_confidence(&predicted.label),
                SourceTier::Statistical,
                self.model.version().to_string(),
            )
            .with_normalized(json!({ "canonical": surface, "model_label": predicted.label }));
            try_accept(span, &mut accepted, &mut out);
        }

        Ok(out)
    }
}

fn phrase_span(
    text: &str,
    m: &PhraseMatch<'_>,
    tier: SourceTier,
    confidence_override: Option<f64>,
) -> EntitySpan {
    let surface = text[m.start..m.end].to_string();
    EntitySpan::new(
        m.start,
        m.end,
        surface,
        m.entry.entity_type,
        confidence_override.unwrap_or(m.entry.confidence),
        tier,
        m.entry.source_version.clone(),
    )
    .with_normalized(m.entry.normalized.clone())
}

/// First-match-wins acceptance: a candidate joins the output iff it does not
/// numerically overlap any previously accepted interval.
fn try_accept(span: EntitySpan, accepted: &mut Vec<(usize, usize)>, out: &mut Vec<EntitySpan>) {
    let overlaps = accepted
        .iter()
        .any(|&(start, end)| !(span.end <= start || span.start >= end));
    if overlaps {
        return;
    }

    accepted.push((span.start, span.end));
    out.push(span);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::fixture_catalog;
    use crate::entity::EntityType;
    use statistical::{NullModel, PredictedSpan};

    struct StubModel {
        spans: Vec<PredictedSpan>,
    }

    impl StatisticalModel for StubModel {
        fn predict(&self, _text: &str) -> ExtractionResult<Vec<PredictedSpan>> {
            Ok(self.spans.clone())
        }

        fn version(&self) -> &str {
            "stub_model_1.0"
        }
    }

    fn tagger_with(model: Arc<dyn StatisticalModel>) -> MultiTierTagger {
        MultiTierTagger::new(Arc::new(fixture_catalog()), model).unwrap()
    }

    #[test]
    fn test_business_scenario() {
        let tagger = tagger_with(Arc::new(NullModel));
        let text = "Microsoft Corporation operates in India and uses Azure cloud services \
                    with artificial intelligence.";

        let spans = tagger.tag(text).unwrap();

        assert_eq!(spans.len(), 4);
        let types: Vec<_> = spans.iter().map(|s| (s.surface.as_str(), s.entity_type)).collect();
        assert!(types.contains(&("Microsoft Corporation", EntityType::Org)));
        assert!(types.contains(&("India", EntityType::Loc)));
        assert!(types.contains(&("Azure", EntityType::Technology)));
        assert!(types.contains(&("artificial intelligence", EntityType::Technology)));
    }

    #[test]
    fn test_no_overlapping_spans() {
        let tagger = tagger_with(Arc::new(NullModel));
        let text = "Microsoft Corporation reported $2,000,000 revenue, a 15% increase, \
                    hiring 300 employees over 6 months in India using Azure and AI.";

        let spans = tagger.tag(text).unwrap();

        for (i, a) in spans.iter().enumerate() {
            for b in spans.iter().skip(i + 1) {
                assert!(
                    !a.overlaps(b.start, b.end),
                    "spans overlap: {:?} vs {:?}",
                    (a.start, a.end, &a.surface),
                    (b.start, b.end, &b.surface)
                );
            }
        }
    }

    #[test]
    fn test_tier_priority_taxonomy_beats_statistical() {
        // The model also claims "Microsoft Corporation", typed PERSON.
        let model = StubModel {
            spans: vec![PredictedSpan::new(0, 21, "PERSON", "Microsoft Corporation")],
        };
        let tagger = tagger_with(Arc::new(model));

        let spans = tagger.tag("Microsoft Corporation announced results.").unwrap();

        let winner = spans.iter().find(|s| s.surface == "Microsoft Corporation").unwrap();
        assert_eq!(winner.entity_type, EntityType::Org);
        assert_eq!(winner.tier, SourceTier::Taxonomy);
        assert!(!spans.iter().any(|s| s.tier == SourceTier::Statistical));
    }

    #[test]
    fn test_statistical_spans_fill_gaps() {
        let text = "Satya Nadella joined Microsoft Corporation.";
        let start = text.find("Satya Nadella").unwrap();
        let model = StubModel {
            spans: vec![PredictedSpan::new(start, start + 13, "PERSON", "Satya Nadella")],
        };
        let tagger = tagger_with(Arc::new(model));

        let spans = tagger.tag(text).unwrap();

        let person = spans.iter().find(|s| s.entity_type == EntityType::Person).unwrap();
        assert_eq!(person.surface, "Satya Nadella");
        assert_eq!(person.tier, SourceTier::Statistical);
        assert_eq!(person.source_version, "stub_model_1.0");
    }

    #[test]
    fn test_unmapped_and_invalid_model_spans_dropped() {
        let model = StubModel {
            spans: vec![
                PredictedSpan::new(0, 4, "NORP", "Some"),
                PredictedSpan::new(100, 200, "PERSON", "out of range"),
                PredictedSpan::new(8, 4, "PERSON", "inverted"),
            ],
        };
        let tagger = tagger_with(Arc::new(model));

        let spans = tagger.tag("Some plain text.").unwrap();

        assert!(!spans.iter().any(|s| s.tier == SourceTier::Statistical));
    }

    #[test]
    fn test_empty_text() {
        let tagger = tagger_with(Arc::new(NullModel));
        assert!(tagger.tag("").unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_catalog_phrase_accepted_once_per_position() {
        let tagger = tagger_with(Arc::new(NullModel));
        // "Azure" appears in both the taxonomy and ruler indexes; the ruler
        // candidate must be suppressed by the tier-1 acceptance.
        let spans = tagger.tag("Azure is popular.").unwrap();

        let azure: Vec<_> = spans.iter().filter(|s| s.surface == "Azure").collect();
        assert_eq!(azure.len(), 1);
        assert_eq!(azure[0].tier, SourceTier::Taxonomy);
    }
}
