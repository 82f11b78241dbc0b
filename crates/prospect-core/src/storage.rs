use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use uuid::Uuid;

use crate::checkpoint::CheckpointState;
use crate::classifier::Classification;
use crate::entity::EntitySpan;
use crate::relations::{RelationshipRecord, SpanRef};
use crate::{Error, Result};

const INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    url TEXT,
    title TEXT,
    content_hash TEXT NOT NULL,
    content_type TEXT,
    classification TEXT,
    metadata TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_hash ON documents(content_hash);

CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    doc_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    entity_type TEXT NOT NULL,
    surface TEXT NOT NULL,
    normalized TEXT NOT NULL,
    span_start INTEGER NOT NULL,
    span_end INTEGER NOT NULL,
    confidence REAL NOT NULL,
    tier TEXT NOT NULL,
    source_version TEXT NOT NULL,
    heuristics_version TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_entities_natural
    ON entities(doc_id, entity_type, span_start, span_end);
CREATE INDEX IF NOT EXISTS idx_entities_doc ON entities(doc_id);
CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type);

CREATE TABLE IF NOT EXISTS relationships (
    id TEXT PRIMARY KEY,
    doc_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    relation_type TEXT NOT NULL,
    head_start INTEGER NOT NULL,
    head_end INTEGER NOT NULL,
    head_surface TEXT NOT NULL,
    tail_start INTEGER NOT NULL,
    tail_end INTEGER NOT NULL,
    tail_surface TEXT NOT NULL,
    confidence REAL NOT NULL,
    evidence TEXT NOT NULL,
    heuristics_version TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_relationships_natural
    ON relationships(doc_id, relation_type, head_start, head_end, tail_start, tail_end);
CREATE INDEX IF NOT EXISTS idx_relationships_doc ON relationships(doc_id);

CREATE TABLE IF NOT EXISTS checkpoints (
    id TEXT PRIMARY KEY,
    workflow_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    phase TEXT NOT NULL,
    doc_offset INTEGER NOT NULL,
    processed INTEGER NOT NULL,
    entities INTEGER NOT NULL,
    relationships INTEGER NOT NULL,
    status TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_checkpoints_natural
    ON checkpoints(workflow_id, run_id, phase);
CREATE INDEX IF NOT EXISTS idx_checkpoints_workflow ON checkpoints(workflow_id, phase);
"#;

/// A document row as persisted, with classification metadata attached.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub id: Uuid,
    pub url: Option<String>,
    pub title: Option<String>,
    pub content_hash: String,
    pub content_type: Option<String>,
    pub classification: Option<Classification>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct StorageCounts {
    pub documents: u64,
    pub entities: u64,
    pub relationships: u64,
}

pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn open(path: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite:{path}?mode=rwc"))
            .await?;

        sqlx::query(INIT_SQL).execute(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::query(INIT_SQL).execute(&pool).await?;

        Ok(Self { pool })
    }

    // Document operations

    /// Insert or refresh a document. Re-runs of the same source update in
    /// place rather than duplicating.
    pub async fn upsert_document(&self, doc: &StoredDocument) -> Result<()> {
        let classification_json = doc
            .classification
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let metadata_json = serde_json::to_string(&doc.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, url, title, content_hash, content_type, classification, metadata, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                url = excluded.url,
                title = excluded.title,
                content_hash = excluded.content_hash,
                content_type = excluded.content_type,
                classification = excluded.classification,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(doc.id.to_string())
        .bind(&doc.url)
        .bind(&doc.title)
        .bind(&doc.content_hash)
        .bind(&doc.content_type)
        .bind(classification_json)
        .bind(metadata_json)
        .bind(doc.created_at.to_rfc3339())
        .bind(doc.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_document(&self, id: Uuid) -> Result<StoredDocument> {
        let row: (
            String,
            Option<String>,
            Option<String>,
            String,
            Option<String>,
            Option<String>,
            String,
            String,
            String,
        ) = sqlx::query_as(
            r#"
            SELECT id, url, title, content_hash, content_type, classification, metadata, created_at, updated_at
            FROM documents WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::DocumentNotFound(id))?;

        parse_document_row(row)
    }

    // Entity operations

    /// Insert a document's spans, skipping rows whose natural key
    /// (doc, type, boundaries) already exists. Returns how many rows were
    /// actually written, so idempotent re-runs report zero.
    pub async fn insert_entities(
        &self,
        doc_id: Uuid,
        spans: &[EntitySpan],
        heuristics_version: &str,
    ) -> Result<u64> {
        let mut inserted = 0;
        let now = Utc::now().to_rfc3339();

        for span in spans {
            let result = sqlx::query(
                r#"
                INSERT INTO entities (id, doc_id, entity_type, surface, normalized, span_start, span_end, confidence, tier, source_version, heuristics_version, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (doc_id, entity_type, span_start, span_end) DO NOTHING
                "#,
            )
            .bind(Uuid::now_v7().to_string())
            .bind(doc_id.to_string())
            .bind(span.entity_type.as_str())
            .bind(&span.surface)
            .bind(serde_json::to_string(&span.normalized)?)
            .bind(span.start as i64)
            .bind(span.end as i64)
            .bind(span.confidence)
            .bind(span.tier.as_str())
            .bind(&span.source_version)
            .bind(heuristics_version)
            .bind(&now)
            .execute(&self.pool)
            .await?;

            inserted += result.rows_affected();
        }

        Ok(inserted)
    }

    pub async fn document_entities(&self, doc_id: Uuid) -> Result<Vec<EntitySpan>> {
        let rows: Vec<(String, String, String, i64, i64, f64, String, String)> = sqlx::query_as(
            r#"
            SELECT entity_type, surface, normalized, span_start, span_end, confidence, tier, source_version
            FROM entities WHERE doc_id = ? ORDER BY span_start
            "#,
        )
        .bind(doc_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(parse_entity_row).collect()
    }

    // Relationship operations

    pub async fn insert_relationships(
        &self,
        records: &[RelationshipRecord],
        heuristics_version: &str,
    ) -> Result<u64> {
        let mut inserted = 0;
        let now = Utc::now().to_rfc3339();

        for rel in records {
            let result = sqlx::query(
                r#"
                INSERT INTO relationships (id, doc_id, relation_type, head_start, head_end, head_surface, tail_start, tail_end, tail_surface, confidence, evidence, heuristics_version, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (doc_id, relation_type, head_start, head_end, tail_start, tail_end) DO NOTHING
                "#,
            )
            .bind(Uuid::now_v7().to_string())
            .bind(rel.doc_id.to_string())
            .bind(rel.relation_type.as_str())
            .bind(rel.head.start as i64)
            .bind(rel.head.end as i64)
            .bind(&rel.head.surface)
            .bind(rel.tail.start as i64)
            .bind(rel.tail.end as i64)
            .bind(&rel.tail.surface)
            .bind(rel.confidence)
            .bind(serde_json::to_string(&rel.evidence)?)
            .bind(heuristics_version)
            .bind(&now)
            .execute(&self.pool)
            .await?;

            inserted += result.rows_affected();
        }

        Ok(inserted)
    }

    pub async fn document_relationships(&self, doc_id: Uuid) -> Result<Vec<RelationshipRecord>> {
        let rows: Vec<(String, i64, i64, String, i64, i64, String, f64, String)> = sqlx::query_as(
            r#"
            SELECT relation_type, head_start, head_end, head_surface, tail_start, tail_end, tail_surface, confidence, evidence
            FROM relationships WHERE doc_id = ? ORDER BY head_start, tail_start
            "#,
        )
        .bind(doc_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|row| parse_relationship_row(doc_id, row)).collect()
    }

    // Checkpoint operations

    /// Latest-wins upsert on (workflow, run, phase).
    pub async fn save_checkpoint(&self, state: &CheckpointState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO checkpoints (id, workflow_id, run_id, phase, doc_offset, processed, entities, relationships, status, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (workflow_id, run_id, phase) DO UPDATE SET
                doc_offset = excluded.doc_offset,
                processed = excluded.processed,
                entities = excluded.entities,
                relationships = excluded.relationships,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::now_v7().to_string())
        .bind(&state.workflow_id)
        .bind(&state.run_id)
        .bind(&state.phase)
        .bind(state.doc_offset as i64)
        .bind(state.processed as i64)
        .bind(state.entities as i64)
        .bind(state.relationships as i64)
        .bind(state.status.as_str())
        .bind(state.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent checkpoint for a workflow phase, across runs.
    pub async fn latest_checkpoint(
        &self,
        workflow_id: &str,
        phase: &str,
    ) -> Result<Option<CheckpointState>> {
        let row: Option<(String, String, String, i64, i64, i64, i64, String, String)> =
            sqlx::query_as(
                r#"
            SELECT workflow_id, run_id, phase, doc_offset, processed, entities, relationships, status, updated_at
            FROM checkpoints
            WHERE workflow_id = ? AND phase = ?
            ORDER BY updated_at DESC, rowid DESC
            LIMIT 1
            "#,
            )
            .bind(workflow_id)
            .bind(phase)
            .fetch_optional(&self.pool)
            .await?;

        row.map(parse_checkpoint_row).transpose()
    }

    pub async fn counts(&self) -> Result<StorageCounts> {
        let (documents,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let (entities,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entities")
            .fetch_one(&self.pool)
            .await?;
        let (relationships,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM relationships")
            .fetch_one(&self.pool)
            .await?;

        Ok(StorageCounts {
            documents: documents as u64,
            entities: entities as u64,
            relationships: relationships as u64,
        })
    }

    /// Raw statement escape hatch for tests that need to inject faults
    /// (e.g. triggers that reject writes).
    #[cfg(test)]
    pub(crate) async fn execute_sql(&self, sql: &str) -> Result<()> {
        sqlx::query(sql).execute(&self.pool).await?;
        Ok(())
    }
}

fn parse_document_row(
    row: (
        String,
        Option<String>,
        Option<String>,
        String,
        Option<String>,
        Option<String>,
        String,
        String,
        String,
    ),
) -> Result<StoredDocument> {
    let (id, url, title, content_hash, content_type, classification, metadata, created_at, updated_at) =
        row;

    Ok(StoredDocument {
        id: parse_uuid(&id)?,
        url,
        title,
        content_hash,
        content_type,
        classification: classification
            .map(|json| serde_json::from_str(&json))
            .transpose()?,
        metadata: serde_json::from_str(&metadata)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn parse_entity_row(
    row: (String, String, String, i64, i64, f64, String, String),
) -> Result<EntitySpan> {
    let (entity_type, surface, normalized, span_start, span_end, confidence, tier, source_version) =
        row;

    Ok(EntitySpan {
        start: usize::try_from(span_start)
            .map_err(|_| Error::DataIntegrity(format!("negative span start {span_start}")))?,
        end: usize::try_from(span_end)
            .map_err(|_| Error::DataIntegrity(format!("negative span end {span_end}")))?,
        surface,
        entity_type: entity_type.parse()?,
        normalized: serde_json::from_str(&normalized)?,
        confidence,
        tier: tier.parse()?,
        source_version,
    })
}

fn parse_relationship_row(
    doc_id: Uuid,
    row: (String, i64, i64, String, i64, i64, String, f64, String),
) -> Result<RelationshipRecord> {
    let (
        relation_type,
        head_start,
        head_end,
        head_surface,
        tail_start,
        tail_end,
        tail_surface,
        confidence,
        evidence,
    ) = row;

    Ok(RelationshipRecord {
        doc_id,
        relation_type: relation_type.parse()?,
        head: SpanRef {
            start: head_start as usize,
            end: head_end as usize,
            surface: head_surface,
        },
        tail: SpanRef {
            start: tail_start as usize,
            end: tail_end as usize,
            surface: tail_surface,
        },
        confidence,
        evidence: serde_json::from_str(&evidence)?,
    })
}

fn parse_checkpoint_row(
    row: (String, String, String, i64, i64, i64, i64, String, String),
) -> Result<CheckpointState> {
    let (workflow_id, run_id, phase, doc_offset, processed, entities, relationships, status, updated_at) =
        row;

    Ok(CheckpointState {
        workflow_id,
        run_id,
        phase,
        doc_offset: doc_offset as u64,
        processed: processed as u64,
        entities: entities as u64,
        relationships: relationships as u64,
        status: status.parse()?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    raw.parse()
        .map_err(|_| Error::DataIntegrity(format!("invalid uuid {raw}")))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| Error::DataIntegrity(format!("invalid timestamp {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{RunStatus, PHASE_EXTRACTION};
    use crate::entity::{EntityType, SourceTier};
    use crate::relations::{Evidence, RelationType};
    use serde_json::json;

    fn sample_document(id: Uuid) -> StoredDocument {
        StoredDocument {
            id,
            url: Some("https://example.com/doc".into()),
            title: Some("Quarterly update".into()),
            content_hash: "deadbeefdeadbeef".into(),
            content_type: Some("Case Study".into()),
            classification: None,
            metadata: json!({ "lang": "en" }),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_span(start: usize, surface: &str) -> EntitySpan {
        EntitySpan::new(
            start,
            start + surface.len(),
            surface.into(),
            EntityType::Org,
            0.9,
            SourceTier::Taxonomy,
            "taxonomy_2.0.0".into(),
        )
        .with_normalized(json!({ "canonical": surface }))
    }

    #[tokio::test]
    async fn test_document_upsert_round_trip() {
        let storage = Storage::open_memory().await.unwrap();
        let id = Uuid::now_v7();

        let mut doc = sample_document(id);
        storage.upsert_document(&doc).await.unwrap();

        doc.title = Some("Revised title".into());
        storage.upsert_document(&doc).await.unwrap();

        let stored = storage.get_document(id).await.unwrap();
        assert_eq!(stored.title.as_deref(), Some("Revised title"));
        assert_eq!(storage.counts().await.unwrap().documents, 1);
    }

    #[tokio::test]
    async fn test_entity_insert_idempotent() {
        let storage = Storage::open_memory().await.unwrap();
        let doc_id = Uuid::now_v7();
        storage.upsert_document(&sample_document(doc_id)).await.unwrap();

        let spans = vec![sample_span(0, "Microsoft"), sample_span(20, "Acme")];

        let first = storage.insert_entities(doc_id, &spans, "2.0.0").await.unwrap();
        let second = storage.insert_entities(doc_id, &spans, "2.0.0").await.unwrap();

        assert_eq!(first, 2);
        assert_eq!(second, 0);

        let stored = storage.document_entities(doc_id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].surface, "Microsoft");
        assert_eq!(stored[0].tier, SourceTier::Taxonomy);
    }

    #[tokio::test]
    async fn test_relationship_insert_idempotent() {
        let storage = Storage::open_memory().await.unwrap();
        let doc_id = Uuid::now_v7();
        storage.upsert_document(&sample_document(doc_id)).await.unwrap();

        let records = vec![RelationshipRecord {
            doc_id,
            relation_type: RelationType::LocatedIn,
            head: SpanRef { start: 0, end: 9, surface: "Microsoft".into() },
            tail: SpanRef { start: 20, end: 25, surface: "India".into() },
            confidence: 0.70,
            evidence: Evidence::Proximity {
                distance: 20,
                head_type: EntityType::Org,
                tail_type: EntityType::Loc,
            },
        }];

        assert_eq!(storage.insert_relationships(&records, "2.0.0").await.unwrap(), 1);
        assert_eq!(storage.insert_relationships(&records, "2.0.0").await.unwrap(), 0);

        let stored = storage.document_relationships(doc_id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].relation_type, RelationType::LocatedIn);
        assert!(matches!(stored[0].evidence, Evidence::Proximity { distance: 20, .. }));
    }

    #[tokio::test]
    async fn test_checkpoint_latest_wins() {
        let storage = Storage::open_memory().await.unwrap();

        let mut state = CheckpointState::new("wf", "run-1");
        state.advance(100, 100, 200, 50);
        storage.save_checkpoint(&state).await.unwrap();

        state.advance(200, 100, 180, 40);
        state.status = RunStatus::Completed;
        storage.save_checkpoint(&state).await.unwrap();

        let loaded = storage
            .latest_checkpoint("wf", PHASE_EXTRACTION)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.doc_offset, 200);
        assert_eq!(loaded.processed, 200);
        assert_eq!(loaded.status, RunStatus::Completed);

        assert!(storage
            .latest_checkpoint("other", PHASE_EXTRACTION)
            .await
            .unwrap()
            .is_none());
    }
}
