//! Elasticsearch REST client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};

use super::{
    BulkOutcome, EnrichPolicy, IndexError, IndexErrorKind, IndexResult, Pipeline, Refresh,
    SearchHits, SearchIndex, SearchRequest,
};
use crate::entity::{record_id, Record};

const REQUEST_TIMEOUT_SECS: u64 = 60;

/// [`SearchIndex`] over the Elasticsearch HTTP API.
pub struct EsClient {
    http: Client,
    host: String,
}

impl EsClient {
    pub fn new(host: &str) -> IndexResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| IndexError::new(IndexErrorKind::Transport, e.to_string()))?;

        Ok(Self {
            http,
            host: host.trim_end_matches('/').to_string(),
        })
    }

    /// Send a request and return the parsed body of a 2xx response.
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<RequestBody>,
    ) -> IndexResult<Value> {
        let url = format!("{}{}", self.host, path);
        let mut request = self.http.request(method.clone(), &url).query(query);
        request = match body {
            Some(RequestBody::Json(value)) => request.json(&value),
            Some(RequestBody::NdJson(text)) => request
                .header("Content-Type", "application/x-ndjson")
                .body(text),
            None => request,
        };

        let response = request.send().await.map_err(|e| {
            IndexError::new(IndexErrorKind::Transport, e.to_string())
                .with_request(method.as_str(), path)
        })?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| {
            IndexError::new(IndexErrorKind::Transport, e.to_string())
                .with_request(method.as_str(), path)
                .with_status(status)
        })?;
        let body: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if (200..300).contains(&status) {
            return Ok(body);
        }

        let kind = IndexError::kind_from_body(status, &body);
        let message = body
            .pointer("/error/reason")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", status));
        Err(IndexError::new(kind, message)
            .with_request(method.as_str(), path)
            .with_status(status)
            .with_body(body))
    }

    fn doc_path(index: &str, doc_type: &str, id: &str) -> String {
        format!("/{}/{}/{}", index, doc_type, id)
    }
}

enum RequestBody {
    Json(Value),
    NdJson(String),
}

/// Newline-delimited bulk body: an action line then the document, per record.
fn bulk_body(documents: &[Record]) -> IndexResult<String> {
    let mut body = String::new();
    for document in documents {
        let id = record_id(document).ok_or_else(|| {
            IndexError::new(IndexErrorKind::Other, "bulk document without an id")
        })?;
        body.push_str(&json!({ "index": { "_id": id } }).to_string());
        body.push('\n');
        body.push_str(&Value::Object(document.clone()).to_string());
        body.push('\n');
    }
    Ok(body)
}

fn search_body(request: &SearchRequest) -> Value {
    let filters: Vec<Value> = request
        .filters
        .iter()
        .map(|(field, value)| match value {
            Value::String(_) => json!({ "term": { (format!("{}.keyword", field)): value } }),
            _ => json!({ "term": { (field.as_str()): value } }),
        })
        .collect();

    let mut body = json!({
        "from": request.from,
        "size": request.size,
        "track_total_hits": true,
        "query": { "bool": { "filter": filters } },
    });
    if let Some(sort) = &request.sort {
        body["sort"] = json!([
            { (format!("{}.keyword", sort)): { "order": "asc", "unmapped_type": "keyword" } }
        ]);
    }
    body
}

fn parse_hits(body: &Value) -> SearchHits {
    let total = match body.pointer("/hits/total") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::Object(o)) => o.get("value").and_then(Value::as_u64).unwrap_or(0),
        _ => 0,
    };
    let documents = body
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| hit.get("_source").and_then(Value::as_object).cloned())
                .collect()
        })
        .unwrap_or_default();
    SearchHits { total, documents }
}

fn bulk_actions(body: &Value) -> impl Iterator<Item = &Value> {
    body.get("items")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| item.get("index"))
}

/// First failed item of a bulk response that reported `errors: true`.
fn first_bulk_failure(body: &Value) -> Option<Value> {
    bulk_actions(body)
        .find(|action| action.get("error").is_some())
        .cloned()
}

fn count_indexed(body: &Value) -> usize {
    bulk_actions(body)
        .filter(|action| action.get("error").is_none())
        .count()
}

#[async_trait]
impl SearchIndex for EsClient {
    async fn bulk_index(
        &self,
        index: &str,
        _doc_type: &str,
        documents: &[Record],
        pipeline: Option<&str>,
        refresh: Refresh,
    ) -> IndexResult<BulkOutcome> {
        if documents.is_empty() {
            return Ok(BulkOutcome::default());
        }
        let path = format!("/{}/_bulk", index);
        let mut query = vec![("refresh", refresh.as_str())];
        if let Some(pipeline) = pipeline {
            query.push(("pipeline", pipeline));
        }

        let body = self
            .send(Method::POST, &path, &query, Some(RequestBody::NdJson(bulk_body(documents)?)))
            .await?;

        if !body.get("errors").and_then(Value::as_bool).unwrap_or(false) {
            return Ok(BulkOutcome {
                indexed: documents.len(),
                failure: None,
            });
        }

        let failure = first_bulk_failure(&body).unwrap_or(Value::Null);
        let reason = failure
            .pointer("/error/reason")
            .and_then(Value::as_str)
            .unwrap_or("bulk request reported item errors")
            .to_string();
        Ok(BulkOutcome {
            indexed: count_indexed(&body),
            failure: Some(
                IndexError::new(IndexErrorKind::Other, reason)
                    .with_request("POST", &path)
                    .with_body(failure),
            ),
        })
    }

    async fn index_document(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
        document: &Record,
        refresh: Refresh,
    ) -> IndexResult<()> {
        let path = Self::doc_path(index, doc_type, id);
        self.send(
            Method::PUT,
            &path,
            &[("refresh", refresh.as_str())],
            Some(RequestBody::Json(Value::Object(document.clone()))),
        )
        .await?;
        Ok(())
    }

    async fn get_document(&self, index: &str, doc_type: &str, id: &str) -> IndexResult<Option<Record>> {
        let path = Self::doc_path(index, doc_type, id);
        match self.send(Method::GET, &path, &[], None).await {
            Ok(body) => Ok(body.get("_source").and_then(Value::as_object).cloned()),
            Err(e) if e.is(IndexErrorKind::DocumentNotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn delete_document(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
        refresh: Refresh,
    ) -> IndexResult<()> {
        let path = Self::doc_path(index, doc_type, id);
        self.send(Method::DELETE, &path, &[("refresh", refresh.as_str())], None)
            .await?;
        Ok(())
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> IndexResult<SearchHits> {
        let path = format!("/{}/_search", index);
        let body = self
            .send(Method::POST, &path, &[], Some(RequestBody::Json(search_body(request))))
            .await?;
        Ok(parse_hits(&body))
    }

    async fn delete_index(&self, index: &str) -> IndexResult<()> {
        self.send(Method::DELETE, &format!("/{}", index), &[], None)
            .await?;
        Ok(())
    }

    async fn put_enrich_policy(&self, name: &str, policy: &EnrichPolicy) -> IndexResult<()> {
        let path = format!("/_enrich/policy/{}", name);
        let put = self
            .send(Method::PUT, &path, &[], Some(RequestBody::Json(policy.to_json())))
            .await;

        match put {
            Ok(_) => Ok(()),
            // Policies are immutable; replace by delete and re-create.
            Err(e)
                if e.body
                    .as_ref()
                    .and_then(|b| b.pointer("/error/type"))
                    .and_then(Value::as_str)
                    == Some("resource_already_exists_exception") =>
            {
                self.delete_enrich_policy(name).await?;
                self.send(Method::PUT, &path, &[], Some(RequestBody::Json(policy.to_json())))
                    .await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn execute_enrich_policy(&self, name: &str) -> IndexResult<()> {
        let path = format!("/_enrich/policy/{}/_execute", name);
        self.send(Method::POST, &path, &[("wait_for_completion", "true")], None)
            .await?;
        Ok(())
    }

    async fn delete_enrich_policy(&self, name: &str) -> IndexResult<()> {
        self.send(Method::DELETE, &format!("/_enrich/policy/{}", name), &[], None)
            .await?;
        Ok(())
    }

    async fn put_pipeline(&self, id: &str, pipeline: &Pipeline) -> IndexResult<()> {
        let path = format!("/_ingest/pipeline/{}", id);
        self.send(Method::PUT, &path, &[], Some(RequestBody::Json(pipeline.to_json())))
            .await?;
        Ok(())
    }

    async fn delete_pipeline(&self, id: &str) -> IndexResult<()> {
        self.send(Method::DELETE, &format!("/_ingest/pipeline/{}", id), &[], None)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, name: &str) -> Record {
        json!({"id": id, "name": name}).as_object().unwrap().clone()
    }

    #[test]
    fn test_bulk_body_is_ndjson() {
        let body = bulk_body(&[doc("1", "a"), doc("2", "b")]).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);
        let action: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_id"], "1");
        let source: Value = serde_json::from_str(lines[3]).unwrap();
        assert_eq!(source["name"], "b");
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn test_bulk_body_requires_id() {
        let mut no_id = doc("1", "a");
        no_id.remove("id");
        assert!(bulk_body(&[no_id]).is_err());
    }

    #[test]
    fn test_search_body_filters_and_sort() {
        let request = SearchRequest {
            from: 10,
            size: 10,
            filters: vec![("taxonomyId".to_string(), json!("t1"))],
            sort: Some("name".to_string()),
        };
        let body = search_body(&request);
        assert_eq!(body["from"], 10);
        assert_eq!(body["query"]["bool"]["filter"][0]["term"]["taxonomyId.keyword"], "t1");
        assert_eq!(body["sort"][0]["name.keyword"]["order"], "asc");
    }

    #[test]
    fn test_parse_hits_total_shapes() {
        let v7 = json!({"hits": {"total": {"value": 25, "relation": "eq"}, "hits": [{"_source": {"id": "1"}}]}});
        let hits = parse_hits(&v7);
        assert_eq!(hits.total, 25);
        assert_eq!(hits.documents.len(), 1);

        let v6 = json!({"hits": {"total": 3, "hits": []}});
        assert_eq!(parse_hits(&v6).total, 3);
    }

    #[test]
    fn test_first_bulk_failure() {
        let body = json!({"errors": true, "items": [
            {"index": {"_id": "1", "status": 201}},
            {"index": {"_id": "2", "status": 400, "error": {"type": "mapper_parsing_exception", "reason": "bad"}}}
        ]});
        let failure = first_bulk_failure(&body).unwrap();
        assert_eq!(failure["_id"], "2");
        assert_eq!(count_indexed(&body), 1);
    }
}
