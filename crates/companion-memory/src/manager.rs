//! Memory manager (C8): write/read pipeline over the user's episodic and
//! semantic vector-store collections (§4.5), storing content alongside its
//! embedding then indexing it. The vector store is the system of record for
//! the memory content and its embedding (§3 ownership); a thin relational
//! index row and any detected conflicts are persisted alongside it,
//! best-effort.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::Row;
use tracing::warn;
use uuid::Uuid;

use companion_core::{GatewayError, UserId};
use companion_llm::EmbeddingClient;
use companion_stores::vector::{payload_f64, payload_i64, payload_str, point_id_to_string, vector_from_scored_point};
use companion_stores::{KvCache, MemoryKind, RelationalStore, ScoredPoint, VectorStore};

use crate::importance::ImportanceScorer;
use crate::mmr::{self, MmrItem};

/// A single episodic or semantic memory (§3 `EpisodicMemory`/`SemanticMemory`
/// — the two share a shape in this port, distinguished by `kind`).
#[derive(Debug, Clone)]
pub struct Memory {
    pub id: String,
    pub user_id: UserId,
    pub content: String,
    pub kind: MemoryKind,
    pub created_at: DateTime<Utc>,
    pub importance_score: f32,
    pub recency_score: f32,
    pub last_accessed: DateTime<Utc>,
    pub access_count: i64,
    pub embedding: Option<Vec<f32>>,
    pub metadata: HashMap<String, Value>,
}

impl MmrItem for Memory {
    fn id(&self) -> &str {
        &self.id
    }
    fn embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref()
    }
    fn importance(&self) -> f32 {
        self.importance_score
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictType {
    FactualContradiction,
    TimelineInconsistency,
    PreferenceConflict,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::FactualContradiction => "factual_contradiction",
            ConflictType::TimelineInconsistency => "timeline_inconsistency",
            ConflictType::PreferenceConflict => "preference_conflict",
        }
    }
}

/// A detected (not necessarily resolved) conflict between a newly written
/// memory and an existing one (§4.5 "Conflict detection").
#[derive(Debug, Clone)]
pub struct MemoryConflict {
    pub id: String,
    pub user_id: UserId,
    pub conflict_type: ConflictType,
    pub confidence: f32,
    pub primary_memory_id: String,
    pub conflicting_memory_id: String,
    pub detected_at: DateTime<Utc>,
}

const PREFERENCE_WORDS: &[&str] = &["prefer", "like", "dislike", "love", "hate", "favorite"];
const TEMPORAL_WORDS: &[&str] = &["yesterday", "today", "last week", "last year", "now", "used to", "anymore", "no longer"];

/// Rule-based conflict tagging (§4.5: "a simple rule set suffices"). Checked
/// in order of specificity: a preference clash first, then a temporal
/// marker, defaulting to a plain factual contradiction.
fn classify_conflict(new_content: &str, existing_content: &str) -> ConflictType {
    let combined = format!("{} {}", new_content.to_lowercase(), existing_content.to_lowercase());
    if PREFERENCE_WORDS.iter().any(|word| combined.contains(word)) {
        ConflictType::PreferenceConflict
    } else if TEMPORAL_WORDS.iter().any(|word| combined.contains(word)) {
        ConflictType::TimelineInconsistency
    } else {
        ConflictType::FactualContradiction
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryManagerConfig {
    pub similarity_floor: f32,
    pub conflict_threshold: f32,
    pub mmr_lambda: f32,
    pub mmr_importance_weight: f32,
    pub embedding_cache_ttl: Duration,
}

#[derive(Clone)]
pub struct MemoryManager {
    vector: VectorStore,
    relational: RelationalStore,
    embeddings: EmbeddingClient,
    importance: ImportanceScorer,
    kv: Arc<KvCache>,
    config: MemoryManagerConfig,
}

impl MemoryManager {
    pub fn new(
        vector: VectorStore,
        relational: RelationalStore,
        embeddings: EmbeddingClient,
        importance: ImportanceScorer,
        kv: Arc<KvCache>,
        config: MemoryManagerConfig,
    ) -> Self {
        Self { vector, relational, embeddings, importance, kv, config }
    }

    /// Write pipeline (§4.5). Every step after the embedding+upsert is
    /// best-effort: a failed importance score falls back to a default
    /// inside `ImportanceScorer` itself, and a failed conflict detection or
    /// relational index write is logged and does not fail the call.
    pub async fn store(
        &self,
        user_id: &UserId,
        content: &str,
        kind: MemoryKind,
        importance: Option<f32>,
        metadata: HashMap<String, Value>,
    ) -> Result<Memory, GatewayError> {
        let embedding = self.embed_cached(content).await?;
        let importance_score = match importance {
            Some(score) => score.clamp(0.0, 1.0),
            None => self.importance.score(content, None).await,
        };

        let id = Uuid::new_v4();
        let now = Utc::now();

        let conflicts = self.detect_conflicts(user_id, &id.to_string(), content, kind, &embedding).await;

        self.vector.ensure_collection(user_id, kind).await?;
        let mut payload = memory_payload(content, now, importance_score, 1.0, now, 0, &metadata);
        payload.insert("content".to_string(), Value::String(content.to_string()));
        self.vector.upsert(user_id, kind, id, embedding.clone(), payload).await?;

        if let Err(err) = self.persist_index_row(user_id, &id.to_string(), kind, now, importance_score).await {
            warn!(%err, %id, "memory index persistence failed, continuing");
        }
        for conflict in &conflicts {
            if let Err(err) = self.persist_conflict(conflict).await {
                warn!(%err, conflict_id = %conflict.id, "memory conflict persistence failed, continuing");
            }
        }

        Ok(Memory {
            id: id.to_string(),
            user_id: user_id.clone(),
            content: content.to_string(),
            kind,
            created_at: now,
            importance_score,
            recency_score: 1.0,
            last_accessed: now,
            access_count: 0,
            embedding: Some(embedding),
            metadata,
        })
    }

    /// Read pipeline (§4.5, §4.6). `kind` restricts the search to one
    /// collection; `None` searches both episodic and semantic and merges
    /// the candidates before ranking.
    pub async fn search_mmr(
        &self,
        user_id: &UserId,
        query: &str,
        k: usize,
        lambda: Option<f32>,
        kind: Option<MemoryKind>,
    ) -> Result<Vec<Memory>, GatewayError> {
        let lambda = lambda.unwrap_or(self.config.mmr_lambda);
        let query_vector = self.embeddings.embed(query).await.map_err(|err| {
            GatewayError::MemoryManagerError(format!("query embedding failed: {err}"))
        })?;

        let candidate_limit = (k as u64 * 3).max(50);
        let kinds = match kind {
            Some(kind) => vec![kind],
            None => vec![MemoryKind::Episodic, MemoryKind::Semantic],
        };

        let mut candidates = Vec::new();
        for kind in kinds {
            match self
                .vector
                .search_candidates(user_id, kind, query_vector.clone(), candidate_limit, self.config.similarity_floor)
                .await
            {
                Ok(points) => candidates.extend(points.into_iter().filter_map(|point| scored_point_to_memory(user_id, kind, &point))),
                Err(err) => warn!(%err, ?kind, "memory candidate retrieval failed, continuing with other collection"),
            }
        }

        let selected =
            mmr::mmr_rank_with_importance(&query_vector, &candidates, k, lambda, self.config.mmr_importance_weight);

        for memory in &selected {
            if let Err(err) = self.refresh_access(user_id, memory).await {
                warn!(%err, memory_id = %memory.id, "memory access refresh failed, continuing");
            }
        }

        Ok(selected)
    }

    async fn embed_cached(&self, content: &str) -> Result<Vec<f32>, GatewayError> {
        let key = format!("embed:{:x}:{}", Sha256::digest(content.as_bytes()), self.vector.embedding_dim());
        if let Some(cached) = self.kv.get_string(&key).await {
            if let Ok(values) = serde_json::from_str::<Vec<f32>>(&cached) {
                return Ok(values);
            }
        }

        let embedding = self
            .embeddings
            .embed(content)
            .await
            .map_err(|err| GatewayError::MemoryManagerError(format!("embedding failed: {err}")))?;

        if let Ok(serialized) = serde_json::to_string(&embedding) {
            self.kv.set_string_ex(&key, &serialized, self.config.embedding_cache_ttl).await;
        }
        Ok(embedding)
    }

    /// Examines candidates above `conflict_threshold` similarity and tags
    /// each as a likely conflict (§4.5). Best-effort: failures here never
    /// block the write.
    async fn detect_conflicts(
        &self,
        user_id: &UserId,
        new_id: &str,
        content: &str,
        kind: MemoryKind,
        embedding: &[f32],
    ) -> Vec<MemoryConflict> {
        let result = self
            .vector
            .search_candidates(user_id, kind, embedding.to_vec(), 10, self.config.conflict_threshold)
            .await;

        let points = match result {
            Ok(points) => points,
            Err(err) => {
                warn!(%err, "conflict candidate search failed, skipping conflict detection");
                return Vec::new();
            }
        };

        points
            .into_iter()
            .filter_map(|point| {
                let existing_content = payload_str(&point, "content")?;
                let existing_id = point_id_to_string(&point).unwrap_or_default();
                if existing_id == new_id {
                    return None;
                }
                Some(MemoryConflict {
                    id: Uuid::new_v4().to_string(),
                    user_id: user_id.clone(),
                    conflict_type: classify_conflict(content, &existing_content),
                    confidence: point.score,
                    primary_memory_id: new_id.to_string(),
                    conflicting_memory_id: existing_id,
                    detected_at: Utc::now(),
                })
            })
            .collect()
    }

    async fn refresh_access(&self, user_id: &UserId, memory: &Memory) -> Result<(), GatewayError> {
        let days_since_creation = (Utc::now() - memory.created_at).num_seconds() as f32 / 86400.0;
        let recency = (0.95f32.powf(days_since_creation.max(0.0)) + 0.2).min(1.0);
        let access_count = memory.access_count + 1;
        let now = Utc::now();

        let mut payload = HashMap::new();
        payload.insert("access_count".to_string(), Value::from(access_count));
        payload.insert("last_accessed".to_string(), Value::String(now.to_rfc3339()));
        payload.insert("recency_score".to_string(), Value::from(recency as f64));

        let id = memory.id.parse::<Uuid>().map_err(|err| GatewayError::MemoryManagerError(err.to_string()))?;
        self.vector.update_payload(user_id, memory.kind, id, payload).await
    }

    async fn persist_index_row(
        &self,
        user_id: &UserId,
        memory_id: &str,
        kind: MemoryKind,
        created_at: DateTime<Utc>,
        importance_score: f32,
    ) -> Result<(), GatewayError> {
        self.relational
            .execute_user_scoped(
                "INSERT INTO memory_index (id, user_id, memory_type, created_at, importance_score, consolidated) \
                 VALUES ($1, $2, $3, $4, $5, false)",
                |query| {
                    query
                        .bind(memory_id)
                        .bind(user_id.as_str())
                        .bind(memory_kind_str(kind))
                        .bind(created_at)
                        .bind(importance_score)
                },
            )
            .await
            .map(|_| ())
    }

    async fn persist_conflict(&self, conflict: &MemoryConflict) -> Result<(), GatewayError> {
        self.relational
            .execute_user_scoped(
                "INSERT INTO memory_conflicts (id, user_id, conflict_type, confidence, primary_memory_id, conflicting_memory_id, status, detected_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, 'detected', $7)",
                |query| {
                    query
                        .bind(conflict.id.clone())
                        .bind(conflict.user_id.as_str())
                        .bind(conflict.conflict_type.as_str())
                        .bind(conflict.confidence)
                        .bind(conflict.primary_memory_id.clone())
                        .bind(conflict.conflicting_memory_id.clone())
                        .bind(conflict.detected_at)
                },
            )
            .await
            .map(|_| ())
    }

    /// Lists the relational index rows for a user's memories of `kind`,
    /// newest first — used by the reflection worker (C12) to pick
    /// consolidation candidates without scanning the vector store.
    pub async fn list_index(&self, user_id: &UserId, kind: MemoryKind) -> Result<Vec<(String, DateTime<Utc>, f32)>, GatewayError> {
        let rows = self
            .relational
            .fetch_all_user_scoped(
                "SELECT id, created_at, importance_score FROM memory_index WHERE user_id = $1 AND memory_type = $2 ORDER BY created_at DESC",
                |query| query.bind(user_id.as_str()).bind(memory_kind_str(kind)),
            )
            .await?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id").map_err(|err| GatewayError::MemoryManagerError(err.to_string()))?;
                let created_at: DateTime<Utc> =
                    row.try_get("created_at").map_err(|err| GatewayError::MemoryManagerError(err.to_string()))?;
                let importance: f32 =
                    row.try_get("importance_score").map_err(|err| GatewayError::MemoryManagerError(err.to_string()))?;
                Ok((id, created_at, importance))
            })
            .collect()
    }

    /// Candidate rows for the reflection worker's memory-consolidation step
    /// (§4.9): unconsolidated episodic memories created since `since`.
    pub async fn list_unconsolidated_since(
        &self,
        user_id: &UserId,
        kind: MemoryKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, DateTime<Utc>, f32)>, GatewayError> {
        let rows = self
            .relational
            .fetch_all_user_scoped(
                "SELECT id, created_at, importance_score FROM memory_index \
                 WHERE user_id = $1 AND memory_type = $2 AND created_at >= $3 AND consolidated = false \
                 ORDER BY created_at DESC",
                |query| query.bind(user_id.as_str()).bind(memory_kind_str(kind)).bind(since),
            )
            .await?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id").map_err(|err| GatewayError::MemoryManagerError(err.to_string()))?;
                let created_at: DateTime<Utc> =
                    row.try_get("created_at").map_err(|err| GatewayError::MemoryManagerError(err.to_string()))?;
                let importance: f32 =
                    row.try_get("importance_score").map_err(|err| GatewayError::MemoryManagerError(err.to_string()))?;
                Ok((id, created_at, importance))
            })
            .collect()
    }

    /// Fetches the vector store's content payload for a batch of memory ids
    /// (§4.9 step 1), skipping any id that fails to parse as a UUID or whose
    /// point has no `content` field rather than failing the whole batch.
    pub async fn fetch_contents(&self, user_id: &UserId, kind: MemoryKind, ids: &[String]) -> Result<HashMap<String, String>, GatewayError> {
        let uuids: Vec<Uuid> = ids.iter().filter_map(|id| id.parse().ok()).collect();
        if uuids.is_empty() {
            return Ok(HashMap::new());
        }
        let points = self.vector.get_points(user_id, kind, &uuids).await?;
        Ok(points
            .iter()
            .filter_map(|point| {
                let id = point.id.as_ref().and_then(|id| match id.point_id_options.as_ref()? {
                    qdrant_client::qdrant::point_id::PointIdOptions::Uuid(uuid) => Some(uuid.clone()),
                    qdrant_client::qdrant::point_id::PointIdOptions::Num(n) => Some(n.to_string()),
                })?;
                let content = companion_stores::retrieved_payload_str(point, "content")?;
                Some((id, content))
            })
            .collect())
    }

    /// Marks rows consolidated after a successful semantic-memory rollup
    /// (§4.9 step 1), so a later reflection run doesn't re-cluster them.
    pub async fn mark_consolidated(&self, user_id: &UserId, ids: &[String]) -> Result<(), GatewayError> {
        for id in ids {
            self.relational
                .execute_user_scoped(
                    "UPDATE memory_index SET consolidated = true WHERE user_id = $1 AND id = $2",
                    |query| query.bind(user_id.as_str()).bind(id.as_str()),
                )
                .await?;
        }
        Ok(())
    }

    /// Permanently deletes memories of `kind` older than `age_threshold_days`
    /// whose importance is below `importance_threshold` (§4.10
    /// `memory_cleanup`), removing both the vector point and its relational
    /// index row. Returns the number deleted.
    pub async fn cleanup_old(
        &self,
        user_id: &UserId,
        kind: MemoryKind,
        age_threshold_days: i64,
        importance_threshold: f32,
    ) -> Result<usize, GatewayError> {
        let cutoff = Utc::now() - chrono::Duration::days(age_threshold_days);
        let rows = self.list_index(user_id, kind).await?;
        let stale: Vec<(String, uuid::Uuid)> = rows
            .into_iter()
            .filter(|(_, created_at, importance)| *created_at < cutoff && *importance < importance_threshold)
            .filter_map(|(id, _, _)| id.parse::<Uuid>().ok().map(|uuid| (id, uuid)))
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let uuids: Vec<Uuid> = stale.iter().map(|(_, uuid)| *uuid).collect();
        self.vector.delete_points(user_id, kind, &uuids).await?;

        for (id, _) in &stale {
            self.relational
                .execute_user_scoped("DELETE FROM memory_index WHERE user_id = $1 AND id = $2", |query| {
                    query.bind(user_id.as_str()).bind(id.as_str())
                })
                .await?;
        }
        Ok(stale.len())
    }

    /// Recomputes and writes back `recency_score` for every memory of `kind`
    /// from its age alone, independent of access (§4.10 `recency_decay` job).
    /// `refresh_access` already keeps an individual point's recency current
    /// whenever it's retrieved; this sweeps points that haven't been
    /// accessed recently so their stored score doesn't go stale.
    pub async fn decay_recency(&self, user_id: &UserId, kind: MemoryKind) -> Result<usize, GatewayError> {
        let rows = self.list_index(user_id, kind).await?;
        let mut updated = 0;
        for (id, created_at, _importance) in rows {
            let Ok(point_id) = id.parse::<Uuid>() else { continue };
            let days_since_creation = (Utc::now() - created_at).num_seconds() as f32 / 86400.0;
            let recency = (0.95f32.powf(days_since_creation.max(0.0)) + 0.2).min(1.0);
            let mut payload = HashMap::new();
            payload.insert("recency_score".to_string(), Value::from(recency as f64));
            if self.vector.update_payload(user_id, kind, point_id, payload).await.is_ok() {
                updated += 1;
            }
        }
        Ok(updated)
    }
}

fn memory_kind_str(kind: MemoryKind) -> &'static str {
    match kind {
        MemoryKind::Episodic => "episodic",
        MemoryKind::Semantic => "semantic",
    }
}

fn memory_payload(
    content: &str,
    created_at: DateTime<Utc>,
    importance_score: f32,
    recency_score: f32,
    last_accessed: DateTime<Utc>,
    access_count: i64,
    metadata: &HashMap<String, Value>,
) -> HashMap<String, Value> {
    let mut payload = HashMap::new();
    payload.insert("content".to_string(), Value::String(content.to_string()));
    payload.insert("created_at".to_string(), Value::String(created_at.to_rfc3339()));
    payload.insert("importance_score".to_string(), Value::from(importance_score as f64));
    payload.insert("recency_score".to_string(), Value::from(recency_score as f64));
    payload.insert("last_accessed".to_string(), Value::String(last_accessed.to_rfc3339()));
    payload.insert("access_count".to_string(), Value::from(access_count));
    payload.insert("metadata".to_string(), Value::Object(metadata.clone().into_iter().collect()));
    payload
}

fn scored_point_to_memory(user_id: &UserId, kind: MemoryKind, point: &ScoredPoint) -> Option<Memory> {
    let id = point_id_to_string(point)?;
    let content = payload_str(point, "content")?;
    let created_at = payload_str(point, "created_at").and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok()).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(Utc::now);
    let last_accessed = payload_str(point, "last_accessed").and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok()).map(|dt| dt.with_timezone(&Utc)).unwrap_or(created_at);
    let importance_score = payload_f64(point, "importance_score").unwrap_or(0.0) as f32;
    let recency_score = payload_f64(point, "recency_score").unwrap_or(1.0) as f32;
    let access_count = payload_i64(point, "access_count").unwrap_or(0);

    Some(Memory {
        id,
        user_id: user_id.clone(),
        content,
        kind,
        created_at,
        importance_score,
        recency_score,
        last_accessed,
        access_count,
        embedding: vector_from_scored_point(point),
        metadata: HashMap::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_classification_prefers_preference_over_factual() {
        assert_eq!(classify_conflict("I love sushi", "I hate sushi"), ConflictType::PreferenceConflict);
    }

    #[test]
    fn conflict_classification_detects_timeline() {
        assert_eq!(classify_conflict("I moved to Denver yesterday", "I still live in Denver"), ConflictType::TimelineInconsistency);
    }

    #[test]
    fn conflict_classification_defaults_to_factual() {
        assert_eq!(classify_conflict("My sister's name is Ana", "My sister's name is Mara"), ConflictType::FactualContradiction);
    }
}
