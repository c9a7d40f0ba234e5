//! Destination index: the opaque upsert/delete store being synchronized
//!
//! The synchronizer only requires batched upsert-by-key and delete-by-key;
//! this module provides the contract, a Qdrant-backed implementation, and an
//! in-memory fake for tests. Any I/O error propagates as a fatal error for
//! the current run.

mod memory;

pub use memory::MemoryIndex;

use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::models::IndexEntry;
use async_trait::async_trait;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, DeletePointsBuilder, Distance, PointId, PointStruct,
    ScalarQuantizationBuilder, UpsertPointsBuilder, Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

/// Contract for the destination store.
///
/// Batching is the synchronizer's responsibility: each call receives at most
/// one configured batch, so implementations never see an unbounded write.
#[async_trait]
pub trait DestinationIndex: Send + Sync {
    /// Insert or replace entries by key
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()>;

    /// Delete entries by key; unknown keys are ignored
    async fn delete(&self, keys: &[Uuid]) -> Result<()>;
}

/// Qdrant-backed destination index
pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
    embedder: Box<dyn Embedder>,
}

impl QdrantIndex {
    /// Create a new index handle for a collection
    pub fn new(url: &str, collection: &str, embedder: Box<dyn Embedder>) -> Result<Self> {
        debug!("Connecting to Qdrant at {}", url);

        let client = Qdrant::from_url(url)
            .skip_compatibility_check()
            .build()
            .map_err(|e| Error::Qdrant(e.to_string()))?;

        Ok(Self {
            client,
            collection: collection.to_string(),
            embedder,
        })
    }

    /// Ensure the collection exists with the embedder's dimension
    pub async fn ensure_collection(&self) -> Result<()> {
        let exists = self.client.collection_exists(&self.collection).await?;
        if exists {
            debug!("Collection {} already exists", self.collection);
            return Ok(());
        }

        let dimension = self.embedder.dimension();
        info!(
            "Creating collection {} with dimension {}",
            self.collection, dimension
        );

        let vectors_config = VectorParamsBuilder::new(dimension as u64, Distance::Cosine);

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(vectors_config)
                    .quantization_config(ScalarQuantizationBuilder::default()),
            )
            .await?;

        Ok(())
    }

    fn build_payload(entry: &IndexEntry) -> HashMap<String, QdrantValue> {
        let mut map = HashMap::with_capacity(entry.metadata.len() + 1);
        map.insert(
            "content".to_string(),
            json_to_qdrant_value(Value::String(entry.content.clone())),
        );
        for (key, value) in &entry.metadata {
            map.insert(key.clone(), json_to_qdrant_value(value.clone()));
        }
        map
    }
}

#[async_trait]
impl DestinationIndex for QdrantIndex {
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = entries.iter().map(|e| e.content.clone()).collect();
        let vectors = self.embedder.embed(texts).await?;

        if vectors.len() != entries.len() {
            return Err(Error::Embedding(format!(
                "Embedder returned {} vectors for {} entries",
                vectors.len(),
                entries.len()
            )));
        }

        let dimension = self.embedder.dimension();
        if let Some(mismatch) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(Error::Qdrant(format!(
                "Vector dimension mismatch for collection '{}': expected {} (got {})",
                self.collection,
                dimension,
                mismatch.len()
            )));
        }

        debug!(
            "Upserting {} points to collection {}",
            entries.len(),
            self.collection
        );

        let points: Vec<PointStruct> = entries
            .iter()
            .zip(vectors)
            .map(|(entry, vector)| {
                PointStruct::new(entry.key.to_string(), vector, Self::build_payload(entry))
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points))
            .await?;

        Ok(())
    }

    async fn delete(&self, keys: &[Uuid]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        debug!(
            "Deleting {} points from collection {}",
            keys.len(),
            self.collection
        );

        let ids: Vec<PointId> = keys.iter().map(|key| PointId::from(key.to_string())).collect();

        self.client
            .delete_points(DeletePointsBuilder::new(&self.collection).points(ids))
            .await?;

        Ok(())
    }
}

/// Convert serde_json value to Qdrant payload value
fn json_to_qdrant_value(v: Value) -> QdrantValue {
    use qdrant_client::qdrant::value::Kind;

    let kind = match v {
        Value::Null => Kind::NullValue(0),
        Value::Bool(b) => Kind::BoolValue(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Kind::IntegerValue(i)
            } else {
                Kind::DoubleValue(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => Kind::StringValue(s),
        Value::Array(items) => Kind::ListValue(qdrant_client::qdrant::ListValue {
            values: items.into_iter().map(json_to_qdrant_value).collect(),
        }),
        Value::Object(fields) => Kind::StructValue(qdrant_client::qdrant::Struct {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k, json_to_qdrant_value(v)))
                .collect(),
        }),
    };

    QdrantValue { kind: Some(kind) }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEmbedder {
        dimension: usize,
        produced: usize,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.1; self.produced]).collect())
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }

    #[test]
    fn test_json_to_qdrant_value_scalars() {
        use qdrant_client::qdrant::value::Kind;

        let s = json_to_qdrant_value(Value::String("hello".to_string()));
        assert!(matches!(s.kind, Some(Kind::StringValue(v)) if v == "hello"));

        let i = json_to_qdrant_value(serde_json::json!(42));
        assert!(matches!(i.kind, Some(Kind::IntegerValue(42))));

        let b = json_to_qdrant_value(Value::Bool(true));
        assert!(matches!(b.kind, Some(Kind::BoolValue(true))));
    }

    #[tokio::test]
    async fn test_upsert_rejects_dimension_mismatch() {
        // Client construction is lazy, so no server is needed: the mismatch
        // is rejected before any network write.
        let embedder = FixedEmbedder {
            dimension: 3,
            produced: 2,
        };
        let index = QdrantIndex::new("http://127.0.0.1:6334", "test_collection", Box::new(embedder))
            .expect("index should initialize");

        let entry = IndexEntry {
            key: Uuid::new_v4(),
            content: "hello".to_string(),
            metadata: Default::default(),
        };

        let err = index
            .upsert(vec![entry])
            .await
            .expect_err("should reject mismatched vector length");

        match err {
            Error::Qdrant(message) => assert!(message.contains("Vector dimension mismatch")),
            other => panic!("expected qdrant error, got {other:?}"),
        }
    }
}
