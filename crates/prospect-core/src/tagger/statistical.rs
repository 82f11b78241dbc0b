use serde::{Deserialize, Serialize};

use super::ExtractionError;
use crate::entity::EntityType;

/// A candidate span as emitted by the statistical model, before label
/// remapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictedSpan {
    pub start: usize,
    pub end: usize,
    pub label: String,
    pub surface: String,
}

impl PredictedSpan {
    #[must_use]
    pub fn new(start: usize, end: usize, label: impl Into<String>, surface: impl Into<String>) -> Self {
        Self {
            start,
            end,
            label: label.into(),
            surface: surface.into(),
        }
    }
}

/// The frozen NER model: an opaque, versioned text-to-spans function.
/// Never trained or fine-tuned here.
pub trait StatisticalModel: Send + Sync {
    fn predict(&self, text: &str) -> Result<Vec<PredictedSpan>, ExtractionError>;

    fn version(&self) -> &str;
}

/// Model-less operation: tier 4 contributes nothing.
pub struct NullModel;

impl StatisticalModel for NullModel {
    fn predict(&self, _text: &str) -> Result<Vec<PredictedSpan>, ExtractionError> {
        Ok(Vec::new())
    }

    fn version(&self) -> &str {
        "null"
    }
}

/// Fixed remapping from model-native labels into the closed entity-type
/// vocabulary. Labels absent from this table are dropped.
#[must_use]
pub fn map_label(label: &str) -> Option<EntityType> {
    match label {
        "COMPANY" | "ORG" => Some(EntityType::Org),
        "LOCATION" | "GPE" | "LOC" => Some(EntityType::Loc),
        "PERSON" => Some(EntityType::Person),
        "PRODUCT" => Some(EntityType::Product),
        "TECHNOLOGY" => Some(EntityType::Technology),
        "CARDINAL" | "ORDINAL" => Some(EntityType::Number),
        "QUANTITY" => Some(EntityType::Quantity),
        "DATE" => Some(EntityType::Date),
        "TIME" => Some(EntityType::Time),
        "EVENT" | "WORK_OF_ART" | "LAW" | "LANGUAGE" => Some(EntityType::Misc),
        _ => None,
    }
}

/// Model labels carry different trust: numeric and time labels are more
/// reliable than PERSON/DATE, everything else bottoms out at 0.70.
#[must_use]
pub fn label_confidence(label: &str) -> f64 {
    match label {
        "CARDINAL" | "ORDINAL" | "QUANTITY" | "TIME" => 0.85,
        "PERSON" | "DATE" => 0.75,
        _ => 0.70,
    }
}
