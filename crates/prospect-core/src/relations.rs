use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::entity::{EntitySpan, EntityType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    CoOccurrence,
    BelongsTo,
    HasProduct,
    WorksFor,
    UsesTechnology,
    LocatedIn,
    Implements,
}

impl RelationType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CoOccurrence => "CO_OCCURRENCE",
            Self::BelongsTo => "BELONGS_TO",
            Self::HasProduct => "HAS_PRODUCT",
            Self::WorksFor => "WORKS_FOR",
            Self::UsesTechnology => "USES_TECHNOLOGY",
            Self::LocatedIn => "LOCATED_IN",
            Self::Implements => "IMPLEMENTS",
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RelationType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CO_OCCURRENCE" => Ok(Self::CoOccurrence),
            "BELONGS_TO" => Ok(Self::BelongsTo),
            "HAS_PRODUCT" => Ok(Self::HasProduct),
            "WORKS_FOR" => Ok(Self::WorksFor),
            "USES_TECHNOLOGY" => Ok(Self::UsesTechnology),
            "LOCATED_IN" => Ok(Self::LocatedIn),
            "IMPLEMENTS" => Ok(Self::Implements),
            _ => Err(crate::Error::InvalidRelationType(s.to_string())),
        }
    }
}

/// Boundary reference to an entity span. Relationships carry boundaries,
/// not allocated identities, until persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanRef {
    pub start: usize,
    pub end: usize,
    pub surface: String,
}

impl From<&EntitySpan> for SpanRef {
    fn from(span: &EntitySpan) -> Self {
        Self {
            start: span.start,
            end: span.end,
            surface: span.surface.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "pattern", rename_all = "snake_case")]
pub enum Evidence {
    SeedPattern {
        rule: String,
        distance: usize,
    },
    Proximity {
        distance: usize,
        head_type: EntityType,
        tail_type: EntityType,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub doc_id: Uuid,
    pub relation_type: RelationType,
    pub head: SpanRef,
    pub tail: SpanRef,
    pub confidence: f64,
    pub evidence: Evidence,
}

#[derive(Debug, Clone, Copy)]
pub struct InferenceConfig {
    /// Maximum character distance for seed-pattern pairs.
    pub seed_window: usize,
    /// Maximum span-start distance for proximity pairs.
    pub proximity_window: usize,
    /// Hard cap on relationships emitted per document. Dense documents are
    /// quadratic in entity count; the cap bounds output volume. Callers
    /// wanting fewer relations should narrow the proximity window instead.
    pub max_per_doc: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            seed_window: 500,
            proximity_window: 300,
            max_per_doc: 400,
        }
    }
}

/// Derives typed relationships from a document's entity set. Deterministic
/// for a fixed entity set and catalog.
pub struct RelationshipInferencer {
    config: InferenceConfig,
}

impl RelationshipInferencer {
    #[must_use]
    pub fn new(config: InferenceConfig) -> Self {
        Self { config }
    }

    pub fn infer(
        &self,
        doc_id: Uuid,
        entities: &[EntitySpan],
        catalog: &Catalog,
    ) -> Vec<RelationshipRecord> {
        let mut records = Vec::new();

        self.infer_seed_relations(doc_id, entities, catalog, &mut records);
        self.infer_proximity_relations(doc_id, entities, &mut records);

        records
    }

    /// "X belongs to Y" seed strings: every PRODUCT-typed occurrence of X
    /// paired with every ORG-typed occurrence of Y inside the seed window.
    fn infer_seed_relations(
        &self,
        doc_id: Uuid,
        entities: &[EntitySpan],
        catalog: &Catalog,
        records: &mut Vec<RelationshipRecord>,
    ) {
        for rule in &catalog.seed_relations().relationship_strings {
            let Some((product_name, org_name)) = rule.split_once(" belongs to ") else {
                continue;
            };
            let product_name = product_name.trim();
            let org_name = org_name.trim();

            let products: Vec<&EntitySpan> = entities
                .iter()
                .filter(|e| e.entity_type == EntityType::Product && surface_matches(e, product_name))
                .collect();
            let orgs: Vec<&EntitySpan> = entities
                .iter()
                .filter(|e| e.entity_type == EntityType::Org && surface_matches(e, org_name))
                .collect();

            for product in &products {
                for org in &orgs {
                    if records.len() >= self.config.max_per_doc {
                        return;
                    }
                    let distance = product.start.abs_diff(org.start);
                    if distance > self.config.seed_window {
                        continue;
                    }
                    records.push(RelationshipRecord {
                        doc_id,
                        relation_type: RelationType::BelongsTo,
                        head: SpanRef::from(*product),
                        tail: SpanRef::from(*org),
                        confidence: 0.85,
                        evidence: Evidence::SeedPattern {
                            rule: rule.clone(),
                            distance,
                        },
                    });
                }
            }
        }
    }

    /// All entity pairs (not just adjacent) whose span starts fall inside
    /// the proximity window, typed via the fixed pair table.
    fn infer_proximity_relations(
        &self,
        doc_id: Uuid,
        entities: &[EntitySpan],
        records: &mut Vec<RelationshipRecord>,
    ) {
        for (i, head) in entities.iter().enumerate() {
            for tail in entities.iter().skip(i + 1) {
                if records.len() >= self.config.max_per_doc {
                    tracing::debug!(doc_id = %doc_id, cap = self.config.max_per_doc, "Relationship cap reached");
                    return;
                }

                let distance = head.start.abs_diff(tail.start);
                if distance > self.config.proximity_window {
                    continue;
                }

                let (relation_type, confidence) = pair_relation(head.entity_type, tail.entity_type);
                records.push(RelationshipRecord {
                    doc_id,
                    relation_type,
                    head: SpanRef::from(head),
                    tail: SpanRef::from(tail),
                    confidence,
                    evidence: Evidence::Proximity {
                        distance,
                        head_type: head.entity_type,
                        tail_type: tail.entity_type,
                    },
                });
            }
        }
    }
}

impl Default for RelationshipInferencer {
    fn default() -> Self {
        Self::new(InferenceConfig::default())
    }
}

fn surface_matches(entity: &EntitySpan, name: &str) -> bool {
    if entity.surface.eq_ignore_ascii_case(name) {
        return true;
    }
    entity
        .normalized
        .get("canonical")
        .and_then(serde_json::Value::as_str)
        .is_some_and(|canonical| canonical.eq_ignore_ascii_case(name))
}

/// Fixed type-pair table; unmatched pairs fall back to generic
/// co-occurrence.
fn pair_relation(head: EntityType, tail: EntityType) -> (RelationType, f64) {
    match (head, tail) {
        (EntityType::Product, EntityType::Org) => (RelationType::BelongsTo, 0.75),
        (EntityType::Org, EntityType::Product) => (RelationType::HasProduct, 0.75),
        (EntityType::Person, EntityType::Org) => (RelationType::WorksFor, 0.65),
        (EntityType::Technology, EntityType::Product) => (RelationType::UsesTechnology, 0.70),
        (EntityType::Org, EntityType::Loc) => (RelationType::LocatedIn, 0.70),
        (EntityType::Product, EntityType::Technology) => (RelationType::Implements, 0.70),
        _ => (RelationType::CoOccurrence, 0.60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::fixture_catalog;
    use crate::entity::SourceTier;

    fn span(start: usize, surface: &str, entity_type: EntityType) -> EntitySpan {
        EntitySpan::new(
            start,
            start + surface.len(),
            surface.into(),
            entity_type,
            0.9,
            SourceTier::Taxonomy,
            "test".into(),
        )
    }

    #[test]
    fn test_business_scenario_relations() {
        let catalog = fixture_catalog();
        let doc_id = Uuid::now_v7();
        let entities = vec![
            span(0, "Microsoft Corporation", EntityType::Org),
            span(34, "India", EntityType::Loc),
            span(49, "Azure", EntityType::Technology),
            span(80, "artificial intelligence", EntityType::Technology),
        ];

        let records = RelationshipInferencer::default().infer(doc_id, &entities, &catalog);

        assert!(records
            .iter()
            .any(|r| r.relation_type == RelationType::LocatedIn
                && r.head.surface == "Microsoft Corporation"
                && r.tail.surface == "India"));
        assert!(records.iter().any(|r| matches!(
            r.evidence,
            Evidence::Proximity { head_type: EntityType::Technology, .. }
                | Evidence::Proximity { tail_type: EntityType::Technology, .. }
        )));
    }

    #[test]
    fn test_seed_pattern_relation() {
        let catalog = fixture_catalog();
        let doc_id = Uuid::now_v7();
        let entities = vec![
            span(0, "Dynamics 365", EntityType::Product),
            span(400, "Microsoft", EntityType::Org),
        ];

        let records = RelationshipInferencer::default().infer(doc_id, &entities, &catalog);

        let seed: Vec<_> = records
            .iter()
            .filter(|r| matches!(r.evidence, Evidence::SeedPattern { .. }))
            .collect();
        assert_eq!(seed.len(), 1);
        assert_eq!(seed[0].relation_type, RelationType::BelongsTo);
        assert!((seed[0].confidence - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn test_seed_pattern_outside_window() {
        let catalog = fixture_catalog();
        let entities = vec![
            span(0, "Dynamics 365", EntityType::Product),
            span(900, "Microsoft", EntityType::Org),
        ];

        let records = RelationshipInferencer::default().infer(Uuid::now_v7(), &entities, &catalog);

        assert!(!records.iter().any(|r| matches!(r.evidence, Evidence::SeedPattern { .. })));
    }

    #[test]
    fn test_proximity_window_excludes_distant_pairs() {
        let catalog = fixture_catalog();
        let entities = vec![
            span(0, "Acme Corp", EntityType::Org),
            span(800, "India", EntityType::Loc),
        ];

        let records = RelationshipInferencer::default().infer(Uuid::now_v7(), &entities, &catalog);

        assert!(records.is_empty());
    }

    #[test]
    fn test_unmatched_pair_is_co_occurrence() {
        let catalog = fixture_catalog();
        let entities = vec![
            span(0, "12 months", EntityType::Duration),
            span(20, "99.9% uptime", EntityType::Metric),
        ];

        let records = RelationshipInferencer::default().infer(Uuid::now_v7(), &entities, &catalog);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].relation_type, RelationType::CoOccurrence);
        assert!((records[0].confidence - 0.60).abs() < f64::EPSILON);
    }

    #[test]
    fn test_per_document_cap() {
        let catalog = fixture_catalog();
        // 40 entities in a tight window is 780 pairs, well past the cap.
        let entities: Vec<EntitySpan> = (0..40)
            .map(|i| span(i * 4, "x", EntityType::Misc))
            .collect();

        let inferencer = RelationshipInferencer::new(InferenceConfig {
            max_per_doc: 100,
            ..InferenceConfig::default()
        });
        let records = inferencer.infer(Uuid::now_v7(), &entities, &catalog);

        assert_eq!(records.len(), 100);
    }

    #[test]
    fn test_deterministic() {
        let catalog = fixture_catalog();
        let entities = vec![
            span(0, "Microsoft Corporation", EntityType::Org),
            span(30, "Dynamics 365", EntityType::Product),
            span(60, "Azure", EntityType::Technology),
        ];

        let inferencer = RelationshipInferencer::default();
        let doc_id = Uuid::now_v7();
        let a = inferencer.infer(doc_id, &entities, &catalog);
        let b = inferencer.infer(doc_id, &entities, &catalog);

        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.relation_type, y.relation_type);
            assert_eq!(x.head.start, y.head.start);
            assert_eq!(x.tail.start, y.tail.start);
        }
    }
}
