//! Vector collection abstraction.
//!
//! Collections are declared in code with typed field schemas; the index
//! defaults to inverted-file with cosine similarity. [`MemoryVectorStore`]
//! implements the trait for tests and single-node deployments; a remote
//! vector database plugs in behind the same trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use relay_types::StoreError;

/// Field types a collection schema may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// 64-bit integer.
    Int64,
    /// Variable-length string.
    VarChar,
    /// Dense float vector; carries a dimension.
    FloatVector,
    /// Arbitrary JSON.
    Json,
    /// JSON array.
    Array,
    /// Boolean.
    Bool,
    /// 32-bit float.
    Float,
}

/// One field in a collection schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field name.
    pub name: String,
    /// Field type.
    pub field_type: FieldType,
    /// Vector dimension; required for `FloatVector` fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
    /// Maximum length for `VarChar` fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Whether this field is the primary key.
    #[serde(default)]
    pub is_primary: bool,
}

impl FieldSchema {
    /// A primary-key `Int64` field.
    #[must_use]
    pub fn primary_int64(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Int64,
            dimension: None,
            max_length: None,
            is_primary: true,
        }
    }

    /// A `VarChar` field with a maximum length.
    #[must_use]
    pub fn varchar(name: impl Into<String>, max_length: usize) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::VarChar,
            dimension: None,
            max_length: Some(max_length),
            is_primary: false,
        }
    }

    /// A `FloatVector` field with the given dimension.
    #[must_use]
    pub fn float_vector(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::FloatVector,
            dimension: Some(dimension),
            max_length: None,
            is_primary: false,
        }
    }

    /// A `Float` scalar field.
    #[must_use]
    pub fn float(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Float,
            dimension: None,
            max_length: None,
            is_primary: false,
        }
    }
}

/// Similarity metric for the collection index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// Cosine similarity.
    #[default]
    Cosine,
}

/// Index configuration. The default is inverted-file + cosine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Similarity metric.
    pub metric: MetricType,
    /// IVF cluster count.
    pub nlist: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self { metric: MetricType::Cosine, nlist: 128 }
    }
}

/// A declared collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    /// Collection name.
    pub name: String,
    /// Field schemas.
    pub fields: Vec<FieldSchema>,
    /// Index configuration.
    #[serde(default)]
    pub index: IndexConfig,
}

impl CollectionSchema {
    /// The declared vector dimension, if the schema has a vector field.
    #[must_use]
    pub fn vector_dimension(&self) -> Option<usize> {
        self.fields
            .iter()
            .find(|f| f.field_type == FieldType::FloatVector)
            .and_then(|f| f.dimension)
    }
}

/// One row to insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Primary key.
    pub id: i64,
    /// The embedding.
    pub vector: Vec<f32>,
    /// Scalar payload fields.
    #[serde(default)]
    pub fields: HashMap<String, serde_json::Value>,
}

/// One search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Primary key of the matched row.
    pub id: i64,
    /// Similarity score (cosine, higher is closer).
    pub score: f32,
    /// Requested output fields.
    pub fields: HashMap<String, serde_json::Value>,
}

/// Collection statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionStats {
    /// Collection name.
    pub name: String,
    /// Row count.
    pub row_count: u64,
    /// Declared vector dimension.
    pub dimension: usize,
}

/// Cosine similarity between two vectors of equal length.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Vector collection operations.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create a collection.
    ///
    /// If a collection of the same name exists with a different vector
    /// dimension it is dropped and recreated; with the same dimension the
    /// call is a no-op.
    async fn create_collection(&self, schema: CollectionSchema) -> Result<(), StoreError>;

    /// Insert rows. Returns the number inserted.
    async fn insert(
        &self,
        collection: &str,
        records: Vec<VectorRecord>,
    ) -> Result<u64, StoreError>;

    /// Search by vector similarity.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        output_fields: &[String],
    ) -> Result<Vec<SearchHit>, StoreError>;

    /// Delete every row. Returns the number removed.
    async fn delete_all(&self, collection: &str) -> Result<u64, StoreError>;

    /// Collection statistics.
    async fn stats(&self, collection: &str) -> Result<CollectionStats, StoreError>;
}

// ---- In-memory implementation -------------------------------------------

struct Collection {
    schema: CollectionSchema,
    rows: Vec<VectorRecord>,
}

/// In-memory [`VectorStore`] with exact cosine search.
#[derive(Clone, Default)]
pub struct MemoryVectorStore {
    collections: Arc<RwLock<HashMap<String, Collection>>>,
}

impl MemoryVectorStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn create_collection(&self, schema: CollectionSchema) -> Result<(), StoreError> {
        let mut map = self.collections.write().await;
        if let Some(existing) = map.get(&schema.name) {
            if existing.schema.vector_dimension() == schema.vector_dimension() {
                return Ok(());
            }
            tracing::warn!(
                collection = %schema.name,
                "relay.vector.dimension_changed, dropping and recreating"
            );
            map.remove(&schema.name);
        }
        map.insert(schema.name.clone(), Collection { schema, rows: Vec::new() });
        Ok(())
    }

    async fn insert(
        &self,
        collection: &str,
        records: Vec<VectorRecord>,
    ) -> Result<u64, StoreError> {
        let mut map = self.collections.write().await;
        let coll = map
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        let expected = coll.schema.vector_dimension().unwrap_or(0);
        for record in &records {
            if record.vector.len() != expected {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    got: record.vector.len(),
                });
            }
        }
        let count = records.len() as u64;
        coll.rows.extend(records);
        Ok(count)
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        output_fields: &[String],
    ) -> Result<Vec<SearchHit>, StoreError> {
        let map = self.collections.read().await;
        let coll = map
            .get(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        let expected = coll.schema.vector_dimension().unwrap_or(0);
        if vector.len() != expected {
            return Err(StoreError::DimensionMismatch { expected, got: vector.len() });
        }

        let mut hits: Vec<SearchHit> = coll
            .rows
            .iter()
            .map(|row| SearchHit {
                id: row.id,
                score: cosine_similarity(vector, &row.vector),
                fields: output_fields
                    .iter()
                    .filter_map(|f| row.fields.get(f).map(|v| (f.clone(), v.clone())))
                    .collect(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_all(&self, collection: &str) -> Result<u64, StoreError> {
        let mut map = self.collections.write().await;
        let coll = map
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        let removed = coll.rows.len() as u64;
        coll.rows.clear();
        Ok(removed)
    }

    async fn stats(&self, collection: &str) -> Result<CollectionStats, StoreError> {
        let map = self.collections.read().await;
        let coll = map
            .get(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        Ok(CollectionStats {
            name: collection.to_string(),
            row_count: coll.rows.len() as u64,
            dimension: coll.schema.vector_dimension().unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(dim: usize) -> CollectionSchema {
        CollectionSchema {
            name: "memories".into(),
            fields: vec![
                FieldSchema::primary_int64("id"),
                FieldSchema::varchar("content", 4096),
                FieldSchema::float("importance"),
                FieldSchema::float_vector("embedding", dim),
            ],
            index: IndexConfig::default(),
        }
    }

    fn record(id: i64, vector: Vec<f32>, content: &str) -> VectorRecord {
        VectorRecord {
            id,
            vector,
            fields: HashMap::from([(
                "content".to_string(),
                serde_json::Value::String(content.into()),
            )]),
        }
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.5, 0.25, 0.1];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn search_ranks_by_similarity() {
        let store = MemoryVectorStore::new();
        store.create_collection(schema(2)).await.unwrap();
        store
            .insert(
                "memories",
                vec![
                    record(1, vec![1.0, 0.0], "east"),
                    record(2, vec![0.0, 1.0], "north"),
                    record(3, vec![0.9, 0.1], "mostly east"),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search("memories", &[1.0, 0.0], 2, &["content".to_string()])
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, 1);
        assert_eq!(hits[1].id, 3);
        assert_eq!(hits[0].fields["content"], "east");
    }

    #[tokio::test]
    async fn insert_rejects_wrong_dimension() {
        let store = MemoryVectorStore::new();
        store.create_collection(schema(3)).await.unwrap();
        let err = store
            .insert("memories", vec![record(1, vec![1.0, 0.0], "short")])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch { expected: 3, got: 2 }
        ));
    }

    #[tokio::test]
    async fn dimension_change_drops_and_recreates() {
        let store = MemoryVectorStore::new();
        store.create_collection(schema(2)).await.unwrap();
        store
            .insert("memories", vec![record(1, vec![1.0, 0.0], "x")])
            .await
            .unwrap();

        // Same dimension: no-op, rows survive.
        store.create_collection(schema(2)).await.unwrap();
        assert_eq!(store.stats("memories").await.unwrap().row_count, 1);

        // New dimension: dropped and recreated empty.
        store.create_collection(schema(4)).await.unwrap();
        let stats = store.stats("memories").await.unwrap();
        assert_eq!(stats.row_count, 0);
        assert_eq!(stats.dimension, 4);
    }

    #[tokio::test]
    async fn delete_all_empties_collection() {
        let store = MemoryVectorStore::new();
        store.create_collection(schema(2)).await.unwrap();
        store
            .insert(
                "memories",
                vec![record(1, vec![1.0, 0.0], "a"), record(2, vec![0.0, 1.0], "b")],
            )
            .await
            .unwrap();
        assert_eq!(store.delete_all("memories").await.unwrap(), 2);
        assert_eq!(store.stats("memories").await.unwrap().row_count, 0);
    }

    #[tokio::test]
    async fn unknown_collection_errors() {
        let store = MemoryVectorStore::new();
        let err = store.search("nope", &[1.0], 1, &[]).await.unwrap_err();
        assert!(matches!(err, StoreError::CollectionNotFound(_)));
    }
}
