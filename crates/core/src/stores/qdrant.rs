use crate::error::StoreError;
use crate::models::{CollectionInfo, Distance, RetrievedDocument, VectorRecord};
use crate::traits::VectorStoreCapability;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use url::Url;

const BACKEND: &str = "qdrant";

/// Qdrant over its REST API.
pub struct QdrantStore {
    endpoint: Url,
    api_key: Option<String>,
    client: Client,
    distance: Distance,
    connected: AtomicBool,
}

impl QdrantStore {
    pub fn new(client: Client, endpoint: Url, api_key: Option<String>, distance: Distance) -> Self {
        let mut endpoint = endpoint;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        Self {
            endpoint,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            client,
            distance,
            connected: AtomicBool::new(false),
        }
    }

    fn url(&self, path: &str) -> Result<Url, StoreError> {
        Ok(self.endpoint.join(path)?)
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, StoreError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(StoreError::NotConnected(self.endpoint.to_string()));
        }
        let mut builder = self.client.request(method, self.url(path)?);
        if let Some(api_key) = &self.api_key {
            builder = builder.header("api-key", api_key);
        }
        Ok(builder)
    }

    async fn exists(&self, name: &str) -> Result<bool, StoreError> {
        let response = self
            .request(Method::GET, &format!("collections/{name}/exists"))?
            .send()
            .await?;
        let parsed = ok_json(response).await?;
        parsed
            .pointer("/result/exists")
            .and_then(Value::as_bool)
            .ok_or_else(|| malformed("collection exists response has no result.exists"))
    }

    async fn put_points(&self, name: &str, records: &[VectorRecord]) -> Result<(), StoreError> {
        let points = records.iter().map(point_json).collect::<Vec<_>>();
        let response = self
            .request(Method::PUT, &format!("collections/{name}/points?wait=true"))?
            .json(&json!({ "points": points }))
            .send()
            .await?;
        ok_json(response).await.map(|_| ())
    }
}

fn malformed(details: impl Into<String>) -> StoreError {
    StoreError::BackendResponse {
        backend: BACKEND.to_string(),
        details: details.into(),
    }
}

async fn ok_json(response: Response) -> Result<Value, StoreError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(malformed(format!("{status}: {body}")));
    }
    Ok(response.json().await?)
}

fn point_json(record: &VectorRecord) -> Value {
    json!({
        "id": record.record_id,
        "vector": record.vector,
        "payload": {
            "chunk_id": record.payload.chunk_id,
            "text": record.payload.text,
            "metadata": record.payload.metadata,
        },
    })
}

fn parse_collection_info(name: &str, parsed: &Value) -> Result<CollectionInfo, StoreError> {
    let vectors = parsed
        .pointer("/result/config/params/vectors")
        .ok_or_else(|| malformed("collection info has no vector params"))?;
    let embedding_size = vectors
        .pointer("/size")
        .and_then(Value::as_u64)
        .ok_or_else(|| malformed("collection info has no vector size"))?;
    let distance = vectors
        .pointer("/distance")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("collection info has no distance"))?
        .parse::<Distance>()
        .map_err(malformed)?;
    let points_count = parsed
        .pointer("/result/points_count")
        .and_then(Value::as_u64)
        .unwrap_or(0);

    Ok(CollectionInfo {
        name: name.to_string(),
        embedding_size: embedding_size as usize,
        distance,
        points_count,
    })
}

fn parse_hits(parsed: &Value) -> Vec<RetrievedDocument> {
    parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .map(|hit| RetrievedDocument {
                    text: hit
                        .pointer("/payload/text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    score: hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl VectorStoreCapability for QdrantStore {
    async fn connect(&self) -> Result<(), StoreError> {
        let mut builder = self.client.get(self.endpoint.clone());
        if let Some(api_key) = &self.api_key {
            builder = builder.header("api-key", api_key);
        }
        ok_json(builder.send().await?).await?;
        self.connected.store(true, Ordering::Release);
        info!(endpoint = %self.endpoint, "connected to qdrant");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), StoreError> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        self.exists(name).await
    }

    async fn create_collection(
        &self,
        name: &str,
        embedding_size: usize,
        reset: bool,
    ) -> Result<bool, StoreError> {
        if reset {
            self.delete_collection(name).await?;
        }
        if self.exists(name).await? {
            return Ok(false);
        }

        let response = self
            .request(Method::PUT, &format!("collections/{name}"))?
            .json(&json!({
                "vectors": {
                    "size": embedding_size,
                    "distance": self.distance.as_qdrant(),
                }
            }))
            .send()
            .await?;
        ok_json(response).await?;
        info!(collection = name, embedding_size, "created qdrant collection");
        Ok(true)
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        if !self.exists(name).await? {
            return Ok(());
        }
        let response = self
            .request(Method::DELETE, &format!("collections/{name}"))?
            .send()
            .await?;
        ok_json(response).await?;
        info!(collection = name, "deleted qdrant collection");
        Ok(())
    }

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>, StoreError> {
        let response = self
            .request(Method::GET, &format!("collections/{name}"))?
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let parsed = ok_json(response).await?;
        parse_collection_info(name, &parsed).map(Some)
    }

    async fn upsert_many(
        &self,
        name: &str,
        records: Vec<VectorRecord>,
        batch_size: usize,
    ) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let info = self
            .collection_info(name)
            .await?
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))?;
        if let Some(record) = records
            .iter()
            .find(|record| record.vector.len() != info.embedding_size)
        {
            return Err(StoreError::DimensionMismatch {
                expected: info.embedding_size,
                actual: record.vector.len(),
            });
        }

        let mut committed = 0;
        for (batch_index, batch) in records.chunks(batch_size.max(1)).enumerate() {
            if let Err(error) = self.put_points(name, batch).await {
                warn!(collection = name, batch_index, committed, %error, "qdrant upsert batch failed");
                return Err(StoreError::BatchFailed {
                    batch_index,
                    committed,
                    details: error.to_string(),
                });
            }
            committed += batch.len();
            debug!(collection = name, batch_index, committed, "qdrant batch upserted");
        }

        Ok(committed)
    }

    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Option<Vec<RetrievedDocument>>, StoreError> {
        let response = self
            .request(Method::POST, &format!("collections/{name}/points/search"))?
            .json(&json!({
                "vector": vector,
                "limit": limit,
                "with_payload": true,
            }))
            .send()
            .await?;
        let parsed = ok_json(response).await?;

        let hits = parse_hits(&parsed);
        if hits.is_empty() {
            return Ok(None);
        }
        Ok(Some(hits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VectorPayload;
    use std::collections::BTreeMap;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record(record_id: u64, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            record_id,
            vector,
            payload: VectorPayload {
                chunk_id: record_id.to_string(),
                text: format!("chunk {record_id}"),
                metadata: BTreeMap::new(),
            },
        }
    }

    async fn connected_store(server: &MockServer) -> QdrantStore {
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"title": "qdrant"})))
            .mount(server)
            .await;
        let store = QdrantStore::new(
            Client::new(),
            Url::parse(&server.uri()).expect("url"),
            Some("secret".to_string()),
            Distance::Cosine,
        );
        store.connect().await.expect("connect");
        store
    }

    async fn mount_collection(server: &MockServer, name: &str, size: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/collections/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {
                    "points_count": 0,
                    "config": {"params": {"vectors": {"size": size, "distance": "Cosine"}}}
                }
            })))
            .mount(server)
            .await;
    }

    fn store(endpoint: &str) -> QdrantStore {
        QdrantStore::new(
            Client::new(),
            Url::parse(endpoint).expect("url"),
            Some("  ".to_string()),
            Distance::Cosine,
        )
    }

    #[test]
    fn endpoint_paths_are_joined_under_base() {
        let store = store("http://localhost:6333/qdrant");
        let url = store.url("collections/collection_7/exists").expect("url");
        assert_eq!(
            url.as_str(),
            "http://localhost:6333/qdrant/collections/collection_7/exists"
        );
        assert!(store.api_key.is_none());
    }

    #[test]
    fn requests_require_a_connection() {
        let result = store("http://localhost:6333").request(Method::GET, "collections");
        assert!(matches!(result, Err(StoreError::NotConnected(_))));
    }

    #[test]
    fn points_carry_chunk_id_and_text() {
        let record = VectorRecord {
            record_id: 9,
            vector: vec![0.5, 0.5],
            payload: VectorPayload {
                chunk_id: "abc".to_string(),
                text: "body".to_string(),
                metadata: BTreeMap::new(),
            },
        };
        let point = point_json(&record);
        assert_eq!(point["id"], 9);
        assert_eq!(point["payload"]["chunk_id"], "abc");
        assert_eq!(point["payload"]["text"], "body");
    }

    #[test]
    fn collection_info_is_parsed() {
        let body = json!({
            "result": {
                "points_count": 12,
                "config": {"params": {"vectors": {"size": 768, "distance": "Cosine"}}}
            }
        });
        let info = parse_collection_info("collection_1", &body).expect("info");
        assert_eq!(info.embedding_size, 768);
        assert_eq!(info.distance, Distance::Cosine);
        assert_eq!(info.points_count, 12);

        let broken = json!({"result": {}});
        assert!(parse_collection_info("collection_1", &broken).is_err());
    }

    #[test]
    fn search_hits_are_parsed_in_order() {
        let body = json!({
            "result": [
                {"id": 1, "score": 0.9, "payload": {"text": "first"}},
                {"id": 2, "score": 0.4, "payload": {"text": "second"}}
            ]
        });
        let hits = parse_hits(&body);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "first");
        assert!((hits[1].score - 0.4).abs() < f64::EPSILON);

        assert!(parse_hits(&json!({"result": []})).is_empty());
    }

    #[tokio::test]
    async fn failed_slice_reports_committed_records() {
        let server = MockServer::start().await;
        let store = connected_store(&server).await;
        mount_collection(&server, "collection_p", 2).await;

        Mock::given(method("PUT"))
            .and(path("/collections/collection_p/points"))
            .and(header("api-key", "secret"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"result": {"status": "completed"}, "status": "ok"})),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/collections/collection_p/points"))
            .respond_with(ResponseTemplate::new(500).set_body_string("disk full"))
            .expect(1)
            .mount(&server)
            .await;

        let records = vec![
            record(1, vec![1.0, 0.0]),
            record(2, vec![0.0, 1.0]),
            record(3, vec![0.5, 0.5]),
        ];
        let result = store.upsert_many("collection_p", records, 2).await;

        match result {
            Err(StoreError::BatchFailed {
                batch_index,
                committed,
                details,
            }) => {
                assert_eq!(batch_index, 1);
                assert_eq!(committed, 2);
                assert!(details.contains("disk full"));
            }
            other => panic!("expected a failed batch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn mismatched_vectors_are_rejected_before_any_write() {
        let server = MockServer::start().await;
        let store = connected_store(&server).await;
        mount_collection(&server, "collection_p", 3).await;
        Mock::given(method("PUT"))
            .and(path("/collections/collection_p/points"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .expect(0)
            .mount(&server)
            .await;

        let result = store
            .upsert_many("collection_p", vec![record(1, vec![1.0, 0.0])], 10)
            .await;
        assert!(matches!(
            result,
            Err(StoreError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[tokio::test]
    async fn missing_collection_has_no_info() {
        let server = MockServer::start().await;
        let store = connected_store(&server).await;
        Mock::given(method("GET"))
            .and(path("/collections/collection_gone"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Not found"))
            .mount(&server)
            .await;

        let info = store.collection_info("collection_gone").await.expect("info");
        assert!(info.is_none());
    }
}
