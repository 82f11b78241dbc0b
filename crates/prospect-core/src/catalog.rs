use std::collections::HashMap;
use std::path::Path;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::entity::EntityType;
use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Country {
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TechTerm {
    pub canonical: String,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default = "default_tech_confidence")]
    pub confidence: f64,
}

fn default_tech_confidence() -> f64 {
    0.90
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaxonomyNode {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub level: u32,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Product {
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartnershipType {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Seed lists of known surface strings plus "X belongs to Y" style
/// relationship strings, consumed by the relationship inferencer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedRelations {
    #[serde(default)]
    pub relationship_strings: Vec<String>,
    #[serde(default)]
    pub entities: SeedEntities,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedEntities {
    #[serde(default, rename = "ORG")]
    pub orgs: Vec<String>,
    #[serde(default, rename = "PRODUCT")]
    pub products: Vec<String>,
    #[serde(default, rename = "CATEGORY")]
    pub categories: Vec<String>,
}

/// Structural signals a content rule may award bonus points for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructureSignals {
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub has_metrics: bool,
    #[serde(default)]
    pub has_sections: Vec<String>,
    #[serde(default)]
    pub has_quotes: bool,
    #[serde(default)]
    pub has_code_blocks: bool,
    #[serde(default)]
    pub has_cta: bool,
    #[serde(default)]
    pub has_form: bool,
    #[serde(default)]
    pub has_date: bool,
    #[serde(default)]
    pub has_registration: bool,
    #[serde(default)]
    pub has_pricing_table: bool,
    #[serde(default)]
    pub has_currency: bool,
    #[serde(default)]
    pub has_requirements_list: bool,
    #[serde(default)]
    pub has_names: bool,
    #[serde(default)]
    pub has_list: bool,
    #[serde(default)]
    pub has_steps: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRule {
    pub label: String,
    #[serde(default)]
    pub url_patterns: Vec<String>,
    #[serde(default)]
    pub title_patterns: Vec<String>,
    #[serde(default)]
    pub content_patterns: Vec<String>,
    #[serde(default = "default_url_weight")]
    pub url_weight: f64,
    #[serde(default = "default_title_weight")]
    pub title_weight: f64,
    #[serde(default = "default_pattern_weight")]
    pub pattern_weight: f64,
    #[serde(default)]
    pub min_patterns: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default)]
    pub structure_signals: StructureSignals,
}

fn default_url_weight() -> f64 {
    10.0
}

fn default_title_weight() -> f64 {
    5.0
}

fn default_pattern_weight() -> f64 {
    1.0
}

fn default_min_score() -> f64 {
    30.0
}

#[derive(Debug, Deserialize)]
struct VersionFile {
    version: String,
}

#[derive(Debug, Deserialize)]
struct TechTermsFile {
    #[serde(default)]
    tech_terms: Vec<TechTerm>,
}

#[derive(Debug, Deserialize)]
struct IndustriesFile {
    #[serde(default)]
    industries: Vec<TaxonomyNode>,
}

#[derive(Debug, Deserialize)]
struct ServicesFile {
    #[serde(default)]
    services: Vec<TaxonomyNode>,
}

#[derive(Debug, Deserialize)]
struct ProductsFile {
    #[serde(default)]
    products: Vec<Product>,
}

#[derive(Debug, Deserialize)]
struct PartnershipsFile {
    #[serde(default)]
    relationships: Vec<PartnershipType>,
}

#[derive(Debug, Deserialize)]
struct ContentRulesFile {
    #[serde(default)]
    rules: Vec<ContentRule>,
}

/// What a matched catalog phrase resolves to.
#[derive(Debug, Clone)]
pub struct PhraseEntry {
    pub entity_type: EntityType,
    pub confidence: f64,
    pub normalized: serde_json::Value,
    pub source_version: String,
}

#[derive(Debug)]
pub struct PhraseMatch<'a> {
    pub start: usize,
    pub end: usize,
    pub entry: &'a PhraseEntry,
}

/// Case-insensitive whole-phrase matcher over every catalog surface form.
///
/// All phrases are compiled into a single alternation at load time, so a
/// document scan costs O(text length + matches) rather than one pass per
/// catalog entry. Alternatives are ordered longest-first so overlapping
/// surfaces resolve to the longest phrase. Word boundaries are enforced by
/// checking the characters adjacent to each hit rather than with `\b`
/// anchors: `\b` needs a word character on the inside, which would make
/// surfaces with symbol edges ("C++", ".NET") unmatchable.
#[derive(Debug)]
pub struct PhraseIndex {
    matcher: Option<Regex>,
    entries: HashMap<String, PhraseEntry>,
}

impl PhraseIndex {
    fn build(phrases: Vec<(String, PhraseEntry)>) -> Self {
        let mut entries: HashMap<String, PhraseEntry> = HashMap::new();
        for (phrase, entry) in phrases {
            let key = phrase.trim().to_lowercase();
            if key.is_empty() {
                continue;
            }
            // First writer wins: earlier dictionaries take precedence over
            // later ones for the same surface.
            entries.entry(key).or_insert(entry);
        }

        let mut alternatives: Vec<&String> = entries.keys().collect();
        alternatives.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let matcher = if alternatives.is_empty() {
            None
        } else {
            let joined = alternatives
                .iter()
                .map(|p| regex::escape(p))
                .collect::<Vec<_>>()
                .join("|");
            match Regex::new(&format!(r"(?i)(?:{joined})")) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!("Failed to compile phrase matcher: {e}");
                    None
                }
            }
        };

        Self { matcher, entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn lookup(&self, surface: &str) -> Option<&PhraseEntry> {
        self.entries.get(&surface.to_lowercase())
    }

    /// Scan `text` and return every non-overlapping phrase match.
    pub fn find_matches<'a>(&'a self, text: &str) -> Vec<PhraseMatch<'a>> {
        let Some(matcher) = &self.matcher else {
            return Vec::new();
        };

        let mut matches = Vec::new();
        let mut pos = 0;
        while let Some(m) = matcher.find_at(text, pos) {
            if word_adjacent(text, m.start(), m.end()) {
                // A hit inside a larger word; resume one character past its
                // start so an overlapping legitimate match is not skipped.
                pos = m.start() + next_char_len(text, m.start());
                continue;
            }
            if let Some(entry) = self.entries.get(&m.as_str().to_lowercase()) {
                matches.push(PhraseMatch {
                    start: m.start(),
                    end: m.end(),
                    entry,
                });
            }
            pos = m.end();
        }
        matches
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Whether the characters immediately before `start` or after `end` would
/// glue the match onto a surrounding word.
fn word_adjacent(text: &str, start: usize, end: usize) -> bool {
    text[..start].chars().next_back().is_some_and(is_word_char)
        || text[end..].chars().next().is_some_and(is_word_char)
}

fn next_char_len(text: &str, at: usize) -> usize {
    text[at..].chars().next().map_or(1, char::len_utf8)
}

/// All dictionaries and rules, loaded once at process start and shared
/// read-only across every document in a run.
#[derive(Debug)]
pub struct Catalog {
    version: String,
    company_aliases: HashMap<String, String>,
    countries: Vec<Country>,
    country_codes: HashMap<String, String>,
    tech_terms: Vec<TechTerm>,
    industries: Vec<TaxonomyNode>,
    services: Vec<TaxonomyNode>,
    products: Vec<Product>,
    partnerships: Vec<PartnershipType>,
    seed: SeedRelations,
    content_rules: Vec<ContentRule>,
    taxonomy_index: PhraseIndex,
    ruler_index: PhraseIndex,
}

impl Catalog {
    /// Load every heuristics file from `dir` and build the reverse indexes.
    ///
    /// Fails fast when a required file is absent or not valid JSON.
    /// `content_rules.json` is the one optional file; without it document
    /// classification is disabled.
    pub fn load(dir: &Path) -> Result<Self> {
        tracing::info!(dir = %dir.display(), "Loading heuristics catalog");

        let version_file: VersionFile = load_json(dir, "version.json")?;
        let version = version_file.version;

        let raw_aliases: HashMap<String, String> = load_json(dir, "company_aliases.json")?;
        let mut company_aliases = HashMap::with_capacity(raw_aliases.len());
        for (alias, canonical) in &raw_aliases {
            company_aliases.insert(alias.to_lowercase(), canonical.clone());
        }
        tracing::info!(aliases = company_aliases.len(), "Loaded company aliases");

        let countries: Vec<Country> = load_json(dir, "countries.json")?;
        let mut country_codes = HashMap::with_capacity(countries.len());
        for country in &countries {
            country_codes.insert(country.code.clone(), country.name.clone());
        }
        tracing::info!(countries = countries.len(), "Loaded countries");

        let tech_terms = load_json::<TechTermsFile>(dir, "tech_terms.json")?.tech_terms;
        let industries = load_json::<IndustriesFile>(dir, "taxonomy_industries.json")?.industries;
        let services = load_json::<ServicesFile>(dir, "taxonomy_services.json")?.services;
        let products = load_json::<ProductsFile>(dir, "products.json")?.products;
        let partnerships = load_json::<PartnershipsFile>(dir, "partnerships.json")?.relationships;
        let seed: SeedRelations = load_json(dir, "seed_relations.json")?;
        tracing::info!(
            tech_terms = tech_terms.len(),
            industries = industries.len(),
            services = services.len(),
            products = products.len(),
            partnerships = partnerships.len(),
            "Loaded taxonomies"
        );

        let content_rules = match load_json::<ContentRulesFile>(dir, "content_rules.json") {
            Ok(file) => file.rules,
            Err(Error::MissingResource(_)) => {
                tracing::warn!("content_rules.json not found; content classification disabled");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let taxonomy_index = build_taxonomy_index(
            &raw_aliases,
            &countries,
            &tech_terms,
            &industries,
            &services,
            &products,
            &seed,
            &version,
        );
        let ruler_index = build_ruler_index(&raw_aliases, &countries, &tech_terms, &products);

        tracing::info!(
            version = %version,
            taxonomy_phrases = taxonomy_index.len(),
            ruler_phrases = ruler_index.len(),
            "Heuristics catalog ready"
        );

        Ok(Self {
            version,
            company_aliases,
            countries,
            country_codes,
            tech_terms,
            industries,
            services,
            products,
            partnerships,
            seed,
            content_rules,
            taxonomy_index,
            ruler_index,
        })
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Canonical company name for an alias, case-insensitive.
    #[must_use]
    pub fn company_canonical(&self, alias: &str) -> Option<&str> {
        self.company_aliases.get(&alias.to_lowercase()).map(String::as_str)
    }

    #[must_use]
    pub fn country_name(&self, code: &str) -> Option<&str> {
        self.country_codes.get(code).map(String::as_str)
    }

    #[must_use]
    pub fn countries(&self) -> &[Country] {
        &self.countries
    }

    #[must_use]
    pub fn tech_terms(&self) -> &[TechTerm] {
        &self.tech_terms
    }

    #[must_use]
    pub fn industries(&self) -> &[TaxonomyNode] {
        &self.industries
    }

    #[must_use]
    pub fn services(&self) -> &[TaxonomyNode] {
        &self.services
    }

    #[must_use]
    pub fn products(&self) -> &[Product] {
        &self.products
    }

    #[must_use]
    pub fn partnerships(&self) -> &[PartnershipType] {
        &self.partnerships
    }

    #[must_use]
    pub fn seed_relations(&self) -> &SeedRelations {
        &self.seed
    }

    #[must_use]
    pub fn content_rules(&self) -> &[ContentRule] {
        &self.content_rules
    }

    #[must_use]
    pub fn taxonomy_index(&self) -> &PhraseIndex {
        &self.taxonomy_index
    }

    #[must_use]
    pub fn ruler_index(&self) -> &PhraseIndex {
        &self.ruler_index
    }
}

fn load_json<T: DeserializeOwned>(dir: &Path, name: &str) -> Result<T> {
    let path = dir.join(name);
    if !path.exists() {
        return Err(Error::MissingResource(path));
    }

    let raw = std::fs::read_to_string(&path)?;
    serde_json::from_str(&raw).map_err(|e| Error::MalformedResource {
        file: name.to_string(),
        message: e.to_string(),
    })
}

#[allow(clippy::too_many_arguments)]
fn build_taxonomy_index(
    company_aliases: &HashMap<String, String>,
    countries: &[Country],
    tech_terms: &[TechTerm],
    industries: &[TaxonomyNode],
    services: &[TaxonomyNode],
    products: &[Product],
    seed: &SeedRelations,
    version: &str,
) -> PhraseIndex {
    let mut phrases = Vec::new();

    for (alias, canonical) in company_aliases {
        phrases.push((
            alias.clone(),
            PhraseEntry {
                entity_type: EntityType::Org,
                confidence: 0.90,
                normalized: json!({ "canonical": canonical }),
                source_version: "company_aliases".into(),
            },
        ));
    }

    for country in countries {
        let entry = PhraseEntry {
            entity_type: EntityType::Loc,
            confidence: 0.90,
            normalized: json!({ "canonical": country.name, "code": country.code }),
            source_version: "countries".into(),
        };
        phrases.push((country.name.clone(), entry.clone()));
        for alias in &country.aliases {
            phrases.push((alias.clone(), entry.clone()));
        }
    }

    for product in products {
        phrases.push((
            product.name.clone(),
            PhraseEntry {
                entity_type: EntityType::Product,
                confidence: 0.88,
                normalized: json!({ "canonical": product.name, "category": product.category }),
                source_version: "products".into(),
            },
        ));
        for alias in &product.aliases {
            phrases.push((
                alias.clone(),
                PhraseEntry {
                    entity_type: EntityType::Product,
                    confidence: 0.85,
                    normalized: json!({
                        "canonical": product.name,
                        "category": product.category,
                        "alias": alias,
                    }),
                    source_version: "products".into(),
                },
            ));
        }
    }

    for term in tech_terms {
        let entry = PhraseEntry {
            entity_type: EntityType::Technology,
            confidence: term.confidence.clamp(0.84, 0.92),
            normalized: json!({ "canonical": term.canonical }),
            source_version: "tech_terms".into(),
        };
        phrases.push((term.canonical.clone(), entry.clone()));
        for synonym in &term.synonyms {
            phrases.push((synonym.clone(), entry.clone()));
        }
    }

    for node in industries {
        let entry = PhraseEntry {
            entity_type: EntityType::Misc,
            confidence: 0.88,
            normalized: taxonomy_normalized(node),
            source_version: format!("taxonomy_industries_{version}"),
        };
        phrases.push((node.name.clone(), entry.clone()));
        for alias in &node.aliases {
            phrases.push((alias.clone(), entry.clone()));
        }
    }

    for node in services {
        let entry = PhraseEntry {
            entity_type: EntityType::Misc,
            confidence: 0.86,
            normalized: taxonomy_normalized(node),
            source_version: format!("taxonomy_services_{version}"),
        };
        phrases.push((node.name.clone(), entry.clone()));
        for alias in &node.aliases {
            phrases.push((alias.clone(), entry.clone()));
        }
    }

    for org in &seed.entities.orgs {
        phrases.push((
            org.clone(),
            PhraseEntry {
                entity_type: EntityType::Org,
                confidence: 0.87,
                normalized: json!({ "canonical": org }),
                source_version: "seed_relations".into(),
            },
        ));
    }
    for product in &seed.entities.products {
        phrases.push((
            product.clone(),
            PhraseEntry {
                entity_type: EntityType::Product,
                confidence: 0.86,
                normalized: json!({ "canonical": product }),
                source_version: "seed_relations".into(),
            },
        ));
    }
    for category in &seed.entities.categories {
        phrases.push((
            category.clone(),
            PhraseEntry {
                entity_type: EntityType::Misc,
                confidence: 0.84,
                normalized: json!({ "canonical": category }),
                source_version: "seed_relations".into(),
            },
        ));
    }

    PhraseIndex::build(phrases)
}

/// Tier-3 subset: the catalog entries that also run inside the linguistic
/// pipeline as an entity ruler, with canonical-id provenance.
fn build_ruler_index(
    company_aliases: &HashMap<String, String>,
    countries: &[Country],
    tech_terms: &[TechTerm],
    products: &[Product],
) -> PhraseIndex {
    let mut phrases = Vec::new();

    for (alias, canonical) in company_aliases {
        phrases.push((
            alias.clone(),
            ruler_entry(EntityType::Org, canonical),
        ));
    }

    for country in countries {
        phrases.push((country.name.clone(), ruler_entry(EntityType::Loc, &country.code)));
        for alias in &country.aliases {
            phrases.push((alias.clone(), ruler_entry(EntityType::Loc, &country.code)));
        }
    }

    for product in products {
        phrases.push((product.name.clone(), ruler_entry(EntityType::Product, &product.name)));
    }

    for term in tech_terms {
        phrases.push((
            term.canonical.clone(),
            ruler_entry(EntityType::Technology, &term.canonical),
        ));
        for synonym in &term.synonyms {
            phrases.push((synonym.clone(), ruler_entry(EntityType::Technology, &term.canonical)));
        }
    }

    PhraseIndex::build(phrases)
}

fn ruler_entry(entity_type: EntityType, canonical_id: &str) -> PhraseEntry {
    PhraseEntry {
        entity_type,
        confidence: 0.85,
        normalized: json!({ "canonical": canonical_id }),
        source_version: "entity_ruler".into(),
    }
}

fn taxonomy_normalized(node: &TaxonomyNode) -> serde_json::Value {
    json!({
        "id": node.id,
        "name": node.name,
        "level": node.level,
        "path": node.path,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    pub fn write_fixture_catalog(dir: &Path) {
        fs::write(dir.join("version.json"), r#"{"version": "2.0.0"}"#).unwrap();
        fs::write(
            dir.join("company_aliases.json"),
            r#"{"Microsoft Corporation": "Microsoft", "MSFT": "Microsoft", "Acme Corp": "Acme"}"#,
        )
        .unwrap();
        fs::write(
            dir.join("countries.json"),
            r#"[
                {"name": "India", "code": "IN"},
                {"name": "United States", "code": "US", "aliases": ["USA", "America"]}
            ]"#,
        )
        .unwrap();
        fs::write(
            dir.join("tech_terms.json"),
            r#"{"tech_terms": [
                {"canonical": "Azure", "synonyms": ["Microsoft Azure"], "confidence": 0.9},
                {"canonical": "artificial intelligence", "synonyms": ["AI"], "confidence": 0.88}
            ]}"#,
        )
        .unwrap();
        fs::write(
            dir.join("taxonomy_industries.json"),
            r#"{"industries": [
                {"id": "ind-1", "name": "healthcare", "level": 1, "path": "/healthcare"}
            ]}"#,
        )
        .unwrap();
        fs::write(
            dir.join("taxonomy_services.json"),
            r#"{"services": [
                {"id": "svc-1", "name": "payroll processing", "level": 2, "path": "/finance/payroll"}
            ]}"#,
        )
        .unwrap();
        fs::write(
            dir.join("products.json"),
            r#"{"products": [
                {"name": "Dynamics 365", "category": "CRM", "aliases": ["Dynamics"]}
            ]}"#,
        )
        .unwrap();
        fs::write(
            dir.join("partnerships.json"),
            r#"{"relationships": [{"name": "reseller"}, {"name": "technology alliance"}]}"#,
        )
        .unwrap();
        fs::write(
            dir.join("seed_relations.json"),
            r#"{
                "relationship_strings": ["Dynamics 365 belongs to Microsoft"],
                "entities": {
                    "ORG": ["Contoso"],
                    "PRODUCT": ["ContosoCRM"],
                    "CATEGORY": ["customer support"]
                }
            }"#,
        )
        .unwrap();
        fs::write(
            dir.join("content_rules.json"),
            r#"{"rules": [
                {
                    "label": "Case Study",
                    "url_patterns": ["/case-stud"],
                    "title_patterns": ["case study"],
                    "content_patterns": ["challenge", "solution", "results"],
                    "min_patterns": 2,
                    "min_score": 15,
                    "structure_signals": {"has_metrics": true, "has_quotes": true}
                },
                {
                    "label": "Job Posting",
                    "url_patterns": ["/careers?/", "/jobs?/"],
                    "title_patterns": ["hiring", "job"],
                    "content_patterns": ["apply", "qualifications"],
                    "min_patterns": 1,
                    "min_score": 12,
                    "structure_signals": {"has_requirements_list": true}
                }
            ]}"#,
        )
        .unwrap();
    }

    pub fn fixture_catalog() -> Catalog {
        let dir = tempfile::tempdir().unwrap();
        write_fixture_catalog(dir.path());
        Catalog::load(dir.path()).unwrap()
    }

    #[test]
    fn test_load_full_catalog() {
        let catalog = fixture_catalog();

        assert_eq!(catalog.version(), "2.0.0");
        assert_eq!(catalog.company_canonical("msft"), Some("Microsoft"));
        assert_eq!(catalog.country_name("IN"), Some("India"));
        assert_eq!(catalog.content_rules().len(), 2);
        assert_eq!(catalog.partnerships().len(), 2);
        assert!(!catalog.taxonomy_index().is_empty());
        assert!(!catalog.ruler_index().is_empty());
    }

    #[test]
    fn test_missing_file_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("version.json"), r#"{"version": "1"}"#).unwrap();

        let err = Catalog::load(dir.path()).unwrap_err();
        assert!(matches!(err, Error::MissingResource(_)));
    }

    #[test]
    fn test_malformed_file_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture_catalog(dir.path());
        fs::write(dir.path().join("countries.json"), "not json").unwrap();

        let err = Catalog::load(dir.path()).unwrap_err();
        assert!(matches!(err, Error::MalformedResource { .. }));
    }

    #[test]
    fn test_missing_content_rules_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture_catalog(dir.path());
        fs::remove_file(dir.path().join("content_rules.json")).unwrap();

        let catalog = Catalog::load(dir.path()).unwrap();
        assert!(catalog.content_rules().is_empty());
    }

    #[test]
    fn test_phrase_matching_case_insensitive_word_bounded() {
        let catalog = fixture_catalog();

        let matches = catalog.taxonomy_index().find_matches("We evaluated AZURE yesterday.");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].entry.entity_type, EntityType::Technology);

        // "Indiana" must not match "India" (word boundary).
        let matches = catalog.taxonomy_index().find_matches("Our Indiana office");
        assert!(matches.is_empty());
    }

    #[test]
    fn test_symbol_edged_phrases_match() {
        let entry = |canonical: &str| PhraseEntry {
            entity_type: EntityType::Technology,
            confidence: 0.9,
            normalized: json!({ "canonical": canonical }),
            source_version: "tech_2.0.0".into(),
        };
        let index = PhraseIndex::build(vec![
            ("C++".into(), entry("C++")),
            (".NET".into(), entry(".NET")),
            ("AI".into(), entry("AI")),
        ]);

        let matches = index.find_matches("We use C++ every day.");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].entry.normalized["canonical"], "C++");

        let matches = index.find_matches("Built on .net services and C++.");
        assert_eq!(matches.len(), 2);

        // An inner hit must neither match nor shadow a real one after it.
        let matches = index.find_matches("They maintain AI systems.");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].start, "They maintain ".len());

        // Glued onto a following word: no match.
        assert!(index.find_matches("The C++x dialect").is_empty());
    }

    #[test]
    fn test_longest_phrase_wins() {
        let catalog = fixture_catalog();

        let matches = catalog
            .taxonomy_index()
            .find_matches("Microsoft Corporation announced a partnership.");
        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!(m.entry.entity_type, EntityType::Org);
        assert_eq!(m.entry.normalized["canonical"], "Microsoft");
        assert_eq!(m.end - m.start, "Microsoft Corporation".len());
    }

    #[test]
    fn test_ruler_index_carries_canonical_id() {
        let catalog = fixture_catalog();

        let entry = catalog.ruler_index().lookup("microsoft azure").unwrap();
        assert_eq!(entry.entity_type, EntityType::Technology);
        assert_eq!(entry.normalized["canonical"], "Azure");
        assert!((entry.confidence - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_index_matches_nothing() {
        let index = PhraseIndex::build(Vec::new());
        assert!(index.is_empty());
        assert!(index.find_matches("anything at all").is_empty());
    }

    #[test]
    fn test_nonexistent_directory() {
        let err = Catalog::load(&PathBuf::from("/nonexistent/heuristics")).unwrap_err();
        assert!(matches!(err, Error::MissingResource(_)));
    }
}
