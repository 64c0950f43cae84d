//! Vector store adapter (C1, vector half). Owns EpisodicMemory and
//! SemanticMemory (§3), two Qdrant collections per user named by prefix +
//! sanitized user id (§6: `episodic_<id>`, `semantic_<id>`). Every search
//! issues a `user_id` payload filter; the adapter makes constructing a
//! search without one impossible rather than optional.

use companion_core::{GatewayError, UserId};
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, GetPointsBuilder,
    PointStruct, RetrievedPoint, ScoredPoint, SearchPointsBuilder, SetPayloadPointsBuilder,
    UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    Episodic,
    Semantic,
}

impl MemoryKind {
    fn prefix(self) -> &'static str {
        match self {
            MemoryKind::Episodic => "episodic",
            MemoryKind::Semantic => "semantic",
        }
    }
}

#[derive(Clone)]
pub struct VectorStore {
    client: Qdrant,
    embedding_dim: u64,
}

impl VectorStore {
    pub fn connect(url: &str, embedding_dim: usize) -> Result<Self, GatewayError> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|err| {
                warn!(%err, "qdrant client construction failed");
                GatewayError::ServiceUnavailable { service: "vector store" }
            })?;
        Ok(Self { client, embedding_dim: embedding_dim as u64 })
    }

    pub fn embedding_dim(&self) -> u64 {
        self.embedding_dim
    }

    pub fn collection_name(user_id: &UserId, kind: MemoryKind) -> String {
        format!("{}_{}", kind.prefix(), user_id.sanitized())
    }

    /// Create-if-missing (§4.5 write step 4). Idempotent: Qdrant returns an
    /// "already exists" error on the second call, which is swallowed here.
    pub async fn ensure_collection(&self, user_id: &UserId, kind: MemoryKind) -> Result<(), GatewayError> {
        let name = Self::collection_name(user_id, kind);
        let result = self
            .client
            .create_collection(
                CreateCollectionBuilder::new(&name)
                    .vectors_config(VectorParamsBuilder::new(self.embedding_dim, Distance::Cosine)),
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.to_string().to_lowercase().contains("already exists") => Ok(()),
            Err(err) => {
                warn!(%err, %name, "vector store collection creation failed");
                Err(GatewayError::ServiceUnavailable { service: "vector store" })
            }
        }
    }

    /// Upsert a single point, stamping the mandatory `user_id` payload field
    /// (§6) so every later search's filter is enforceable.
    pub async fn upsert(
        &self,
        user_id: &UserId,
        kind: MemoryKind,
        point_id: uuid::Uuid,
        embedding: Vec<f32>,
        mut payload: std::collections::HashMap<String, Value>,
    ) -> Result<(), GatewayError> {
        payload.insert("user_id".to_string(), Value::String(user_id.as_str().to_string()));
        let name = Self::collection_name(user_id, kind);

        let point = PointStruct::new(point_id.to_string(), embedding, qdrant_payload(payload));

        self.client
            .upsert_points(UpsertPointsBuilder::new(name, vec![point]))
            .await
            .map_err(|err| {
                warn!(%err, "vector store upsert failed");
                GatewayError::ServiceUnavailable { service: "vector store" }
            })?;
        Ok(())
    }

    /// Candidate retrieval for MMR (§4.5 read step 2): up to `limit` points
    /// filtered by `user_id` and a similarity floor, never unfiltered.
    pub async fn search_candidates(
        &self,
        user_id: &UserId,
        kind: MemoryKind,
        query_vector: Vec<f32>,
        limit: u64,
        score_floor: f32,
    ) -> Result<Vec<ScoredPoint>, GatewayError> {
        let name = Self::collection_name(user_id, kind);
        let filter = Filter::must([Condition::matches("user_id", user_id.as_str().to_string())]);

        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(name, query_vector, limit)
                    .filter(filter)
                    .score_threshold(score_floor)
                    .with_payload(true)
                    .with_vectors(true),
            )
            .await
            .map_err(|err| {
                warn!(%err, "vector store search failed");
                GatewayError::ServiceUnavailable { service: "vector store" }
            })?;
        Ok(response.result)
    }

    /// Retrieves points by id, payload only (§4.9 memory consolidation: the
    /// reflection worker reads candidate content by the id `list_index`
    /// gave it rather than re-searching).
    pub async fn get_points(&self, user_id: &UserId, kind: MemoryKind, ids: &[uuid::Uuid]) -> Result<Vec<RetrievedPoint>, GatewayError> {
        let name = Self::collection_name(user_id, kind);
        let point_ids: Vec<qdrant_client::qdrant::PointId> = ids.iter().map(|id| id.to_string().into()).collect();

        let response = self
            .client
            .get_points(GetPointsBuilder::new(name, point_ids).with_payload(true).with_vectors(false))
            .await
            .map_err(|err| {
                warn!(%err, "vector store point retrieval failed");
                GatewayError::ServiceUnavailable { service: "vector store" }
            })?;
        Ok(response.result)
    }

    /// Merges `payload` fields into an existing point without touching its
    /// embedding (§4.5 read step 4: access_count/last_accessed/recency
    /// refresh on every retrieval).
    pub async fn update_payload(
        &self,
        user_id: &UserId,
        kind: MemoryKind,
        point_id: uuid::Uuid,
        payload: std::collections::HashMap<String, Value>,
    ) -> Result<(), GatewayError> {
        let name = Self::collection_name(user_id, kind);
        self.client
            .set_payload(SetPayloadPointsBuilder::new(name, qdrant_payload(payload)).points(vec![point_id.to_string()]))
            .await
            .map_err(|err| {
                warn!(%err, "vector store payload update failed");
                GatewayError::ServiceUnavailable { service: "vector store" }
            })?;
        Ok(())
    }

    /// Deletes the given points (§4.10 `memory_cleanup`: old, low-importance
    /// memories past their relational-index retention check).
    pub async fn delete_points(&self, user_id: &UserId, kind: MemoryKind, ids: &[uuid::Uuid]) -> Result<(), GatewayError> {
        let name = Self::collection_name(user_id, kind);
        let point_ids: Vec<qdrant_client::qdrant::PointId> = ids.iter().map(|id| id.to_string().into()).collect();
        self.client
            .delete_points(DeletePointsBuilder::new(name).points(point_ids))
            .await
            .map_err(|err| {
                warn!(%err, "vector store point deletion failed");
                GatewayError::ServiceUnavailable { service: "vector store" }
            })?;
        Ok(())
    }
}

/// Renders a point's id (numeric or UUID) back to a string, the inverse of
/// the `point_id.to_string()` passed into `PointStruct::new` at upsert time.
pub fn point_id_to_string(point: &ScoredPoint) -> Option<String> {
    use qdrant_client::qdrant::point_id::PointIdOptions;

    match point.id.as_ref()?.point_id_options.as_ref()? {
        PointIdOptions::Num(n) => Some(n.to_string()),
        PointIdOptions::Uuid(uuid) => Some(uuid.clone()),
    }
}

/// Pulls the flat embedding vector back out of a scored point, when one was
/// requested via `with_vectors(true)`. Returns `None` for named/sparse
/// vector configs, which this adapter never uses.
pub fn vector_from_scored_point(point: &ScoredPoint) -> Option<Vec<f32>> {
    use qdrant_client::qdrant::vectors_output::VectorsOptions;

    let options = point.vectors.as_ref()?.vectors_options.as_ref()?;
    match options {
        VectorsOptions::Vector(vector) => Some(vector.data.clone()),
        VectorsOptions::Vectors(_) => None,
    }
}

/// Reads a string-valued payload field off a scored point.
pub fn payload_str(point: &ScoredPoint, key: &str) -> Option<String> {
    use qdrant_client::qdrant::value::Kind;

    match point.payload.get(key)?.kind.as_ref()? {
        Kind::StringValue(value) => Some(value.clone()),
        _ => None,
    }
}

/// Reads a string-valued payload field off a retrieved (by-id) point.
pub fn retrieved_payload_str(point: &RetrievedPoint, key: &str) -> Option<String> {
    use qdrant_client::qdrant::value::Kind;

    match point.payload.get(key)?.kind.as_ref()? {
        Kind::StringValue(value) => Some(value.clone()),
        _ => None,
    }
}

/// Reads a numeric payload field off a scored point.
pub fn payload_f64(point: &ScoredPoint, key: &str) -> Option<f64> {
    use qdrant_client::qdrant::value::Kind;

    match point.payload.get(key)?.kind.as_ref()? {
        Kind::DoubleValue(value) => Some(*value),
        Kind::IntegerValue(value) => Some(*value as f64),
        _ => None,
    }
}

/// Reads an integer payload field off a scored point.
pub fn payload_i64(point: &ScoredPoint, key: &str) -> Option<i64> {
    use qdrant_client::qdrant::value::Kind;

    match point.payload.get(key)?.kind.as_ref()? {
        Kind::IntegerValue(value) => Some(*value),
        Kind::DoubleValue(value) => Some(*value as i64),
        _ => None,
    }
}

fn qdrant_payload(payload: std::collections::HashMap<String, Value>) -> std::collections::HashMap<String, qdrant_client::qdrant::Value> {
    payload
        .into_iter()
        .map(|(key, value)| (key, json_value_to_qdrant(value)))
        .collect()
}

fn json_value_to_qdrant(value: Value) -> qdrant_client::qdrant::Value {
    match value {
        Value::String(s) => s.into(),
        Value::Number(n) => n.as_f64().unwrap_or(0.0).into(),
        Value::Bool(b) => b.into(),
        _ => value.to_string().into(),
    }
}
