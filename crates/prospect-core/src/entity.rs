use serde::{Deserialize, Serialize};

/// Closed entity-type vocabulary. Statistical-model labels outside this set
/// are dropped at the remapping boundary rather than propagated as strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Org,
    Person,
    Loc,
    Product,
    Technology,
    Money,
    Percent,
    Date,
    Time,
    Number,
    Quantity,
    Metric,
    Duration,
    Misc,
}

impl EntityType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Org => "ORG",
            Self::Person => "PERSON",
            Self::Loc => "LOC",
            Self::Product => "PRODUCT",
            Self::Technology => "TECHNOLOGY",
            Self::Money => "MONEY",
            Self::Percent => "PERCENT",
            Self::Date => "DATE",
            Self::Time => "TIME",
            Self::Number => "NUMBER",
            Self::Quantity => "QUANTITY",
            Self::Metric => "METRIC",
            Self::Duration => "DURATION",
            Self::Misc => "MISC",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ORG" => Ok(Self::Org),
            "PERSON" => Ok(Self::Person),
            "LOC" => Ok(Self::Loc),
            "PRODUCT" => Ok(Self::Product),
            "TECHNOLOGY" => Ok(Self::Technology),
            "MONEY" => Ok(Self::Money),
            "PERCENT" => Ok(Self::Percent),
            "DATE" => Ok(Self::Date),
            "TIME" => Ok(Self::Time),
            "NUMBER" => Ok(Self::Number),
            "QUANTITY" => Ok(Self::Quantity),
            "METRIC" => Ok(Self::Metric),
            "DURATION" => Ok(Self::Duration),
            "MISC" => Ok(Self::Misc),
            _ => Err(crate::Error::InvalidEntityType(s.to_string())),
        }
    }
}

/// Extraction tier that produced a span. Earlier tiers are higher trust:
/// a later tier's candidate is discarded when it overlaps an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    Taxonomy,
    Pattern,
    Ruler,
    Statistical,
}

impl SourceTier {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Taxonomy => "taxonomy",
            Self::Pattern => "pattern",
            Self::Ruler => "ruler",
            Self::Statistical => "statistical",
        }
    }
}

impl std::fmt::Display for SourceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceTier {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "taxonomy" => Ok(Self::Taxonomy),
            "pattern" => Ok(Self::Pattern),
            "ruler" => Ok(Self::Ruler),
            "statistical" => Ok(Self::Statistical),
            _ => Err(crate::Error::InvalidSourceTier(s.to_string())),
        }
    }
}

/// A typed, half-open `[start, end)` byte span in document text.
///
/// Within one document no two spans overlap; the tagger enforces this at
/// acceptance time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySpan {
    pub start: usize,
    pub end: usize,
    pub surface: String,
    pub entity_type: EntityType,
    pub normalized: serde_json::Value,
    pub confidence: f64,
    pub tier: SourceTier,
    pub source_version: String,
}

impl EntitySpan {
    #[must_use]
    pub fn new(
        start: usize,
        end: usize,
        surface: String,
        entity_type: EntityType,
        confidence: f64,
        tier: SourceTier,
        source_version: String,
    ) -> Self {
        Self {
            start,
            end,
            surface,
            entity_type,
            normalized: serde_json::Value::Null,
            confidence: confidence.clamp(0.0, 1.0),
            tier,
            source_version,
        }
    }

    #[must_use]
    pub fn with_normalized(mut self, normalized: serde_json::Value) -> Self {
        self.normalized = normalized;
        self
    }

    #[must_use]
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        !(end <= self.start || start >= self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_entity_type_round_trip() {
        for t in [
            EntityType::Org,
            EntityType::Person,
            EntityType::Loc,
            EntityType::Product,
            EntityType::Technology,
            EntityType::Money,
            EntityType::Percent,
            EntityType::Date,
            EntityType::Time,
            EntityType::Number,
            EntityType::Quantity,
            EntityType::Metric,
            EntityType::Duration,
            EntityType::Misc,
        ] {
            assert_eq!(EntityType::from_str(t.as_str()).unwrap(), t);
        }
    }

    #[test]
    fn test_unknown_entity_type_rejected() {
        assert!(EntityType::from_str("WORK_OF_ART").is_err());
    }

    #[test]
    fn test_span_overlap() {
        let span = EntitySpan::new(
            10,
            20,
            "Acme".into(),
            EntityType::Org,
            0.9,
            SourceTier::Taxonomy,
            "test".into(),
        );

        assert!(span.overlaps(15, 25));
        assert!(span.overlaps(5, 11));
        assert!(!span.overlaps(20, 30));
        assert!(!span.overlaps(0, 10));
    }

    #[test]
    fn test_confidence_clamped() {
        let span = EntitySpan::new(
            0,
            4,
            "Acme".into(),
            EntityType::Org,
            1.7,
            SourceTier::Pattern,
            "test".into(),
        );
        assert!((span.confidence - 1.0).abs() < f64::EPSILON);
    }
}
