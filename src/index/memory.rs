//! In-memory search index.
//!
//! Behaves like the subset of Elasticsearch the crate relies on: indices are
//! created on first write, enrich policies only match after execution and
//! match against the snapshot taken then, pipelines run enrich and foreach
//! processors at ingest, and missing indices/policies/pipelines/documents
//! fail with the same error kinds. Faults can be injected per index.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::{
    BulkOutcome, EnrichPolicy, IndexError, IndexErrorKind, IndexResult, Pipeline, Processor,
    Refresh, SearchHits, SearchIndex, SearchRequest,
};
use crate::entity::{record_id, Record};

const INGEST_VALUE: &str = "_ingest._value";

#[derive(Default)]
struct StoredIndex {
    next_seq: u64,
    docs: HashMap<String, (u64, Record)>,
}

impl StoredIndex {
    fn put(&mut self, id: &str, document: Record) {
        let seq = match self.docs.get(id) {
            Some((seq, _)) => *seq,
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };
        self.docs.insert(id.to_string(), (seq, document));
    }

    fn ordered(&self) -> Vec<&Record> {
        let mut docs: Vec<&(u64, Record)> = self.docs.values().collect();
        docs.sort_by_key(|(seq, _)| *seq);
        docs.into_iter().map(|(_, doc)| doc).collect()
    }
}

struct StoredPolicy {
    policy: EnrichPolicy,
    /// Match value to enrich entries, filled by execution
    snapshot: Option<HashMap<String, Vec<Record>>>,
}

#[derive(Default)]
struct Faults {
    bulk: HashSet<String>,
    writes: HashSet<String>,
    delete_index: HashSet<String>,
    search: bool,
    get: bool,
}

#[derive(Default)]
struct State {
    indices: BTreeMap<String, StoredIndex>,
    policies: BTreeMap<String, StoredPolicy>,
    pipelines: BTreeMap<String, Pipeline>,
    faults: Faults,
}

/// In-process [`SearchIndex`].
#[derive(Default)]
pub struct MemoryIndex {
    state: Mutex<State>,
}

fn injected(operation: &str, target: &str) -> IndexError {
    IndexError::new(
        IndexErrorKind::Other,
        format!("injected {} failure on [{}]", operation, target),
    )
}

fn index_not_found(index: &str) -> IndexError {
    IndexError::new(
        IndexErrorKind::IndexNotFound,
        format!("no such index [{}]", index),
    )
}

fn match_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    path.split('.').try_fold(root, |value, segment| value.get(segment))
}

fn set_path(root: &mut Value, path: &str, value: Value) {
    if path.is_empty() {
        *root = value;
        return;
    }
    let mut current = root;
    for segment in path.split('.') {
        if !current.is_object() && !current.is_null() {
            *current = Value::Null;
        }
        current = &mut current[segment];
    }
    *current = value;
}

fn ingest_path(path: &str) -> Option<&str> {
    if path == INGEST_VALUE {
        Some("")
    } else {
        path.strip_prefix("_ingest._value.")
    }
}

fn read_field(doc: &Value, element: Option<&Value>, path: &str) -> Option<Value> {
    match ingest_path(path) {
        Some(rest) => element.and_then(|el| get_path(el, rest)).cloned(),
        None => get_path(doc, path).cloned(),
    }
}

fn write_field(doc: &mut Value, element: Option<&mut Value>, path: &str, value: Value) {
    match (ingest_path(path), element) {
        (Some(rest), Some(el)) => set_path(el, rest, value),
        (Some(_), None) => {}
        (None, _) => set_path(doc, path, value),
    }
}

fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn references_policy(processor: &Processor, name: &str) -> bool {
    match processor {
        Processor::Enrich { policy_name, .. } => policy_name == name,
        Processor::Foreach { processor, .. } => references_policy(processor, name),
    }
}

fn apply_processor(
    doc: &mut Value,
    element: Option<&mut Value>,
    processor: &Processor,
    policies: &BTreeMap<String, StoredPolicy>,
) -> IndexResult<()> {
    match processor {
        Processor::Enrich {
            policy_name,
            field,
            target_field,
            max_matches,
            ignore_missing,
        } => {
            let stored = policies.get(policy_name).ok_or_else(|| {
                IndexError::new(
                    IndexErrorKind::ResourceNotFound,
                    format!("enrich policy [{}] not found", policy_name),
                )
            })?;
            let snapshot = stored.snapshot.as_ref().ok_or_else(|| {
                IndexError::new(
                    IndexErrorKind::Other,
                    format!("no enrich index exists for policy with name [{}]", policy_name),
                )
            })?;

            let lookup = read_field(doc, element.as_deref(), field).filter(|v| !v.is_null());
            let Some(lookup) = lookup else {
                if *ignore_missing {
                    return Ok(());
                }
                return Err(IndexError::new(
                    IndexErrorKind::Other,
                    format!("field [{}] not present as part of path [{}]", field, field),
                ));
            };

            let limit = (*max_matches).max(1) as usize;
            let mut matches: Vec<Value> = snapshot
                .get(&match_key(&lookup))
                .map(|entries| {
                    entries
                        .iter()
                        .take(limit)
                        .cloned()
                        .map(Value::Object)
                        .collect()
                })
                .unwrap_or_default();
            if matches.is_empty() {
                return Ok(());
            }
            let enriched = if *max_matches <= 1 {
                matches.swap_remove(0)
            } else {
                Value::Array(matches)
            };
            write_field(doc, element, target_field, enriched);
            Ok(())
        }
        Processor::Foreach {
            field,
            ignore_missing,
            processor,
        } => {
            let items = match get_path(doc, field).cloned() {
                Some(Value::Array(items)) => items,
                Some(Value::Null) | None if *ignore_missing => return Ok(()),
                Some(Value::Null) | None => {
                    return Err(IndexError::new(
                        IndexErrorKind::Other,
                        format!("field [{}] not present as part of path [{}]", field, field),
                    ))
                }
                Some(_) => {
                    return Err(IndexError::new(
                        IndexErrorKind::Other,
                        format!("field [{}] is not a list", field),
                    ))
                }
            };

            let mut processed = Vec::with_capacity(items.len());
            for mut item in items {
                apply_processor(doc, Some(&mut item), processor, policies)?;
                processed.push(item);
            }
            set_path(doc, field, Value::Array(processed));
            Ok(())
        }
    }
}

fn run_pipeline(
    document: &Record,
    pipeline: &Pipeline,
    policies: &BTreeMap<String, StoredPolicy>,
) -> IndexResult<Record> {
    let mut doc = Value::Object(document.clone());
    for processor in &pipeline.processors {
        apply_processor(&mut doc, None, processor, policies)?;
    }
    match doc {
        Value::Object(map) => Ok(map),
        _ => Err(IndexError::new(
            IndexErrorKind::Other,
            "pipeline produced a non-object document",
        )),
    }
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every bulk request against `index` fail.
    pub async fn fail_bulk_for(&self, index: &str) {
        self.state.lock().await.faults.bulk.insert(index.to_string());
    }

    /// Make single-document writes and deletes against `index` fail.
    pub async fn fail_writes_for(&self, index: &str) {
        self.state.lock().await.faults.writes.insert(index.to_string());
    }

    pub async fn fail_delete_index_for(&self, index: &str) {
        self.state
            .lock()
            .await
            .faults
            .delete_index
            .insert(index.to_string());
    }

    pub async fn fail_searches(&self, fail: bool) {
        self.state.lock().await.faults.search = fail;
    }

    pub async fn fail_gets(&self, fail: bool) {
        self.state.lock().await.faults.get = fail;
    }

    pub async fn clear_faults(&self) {
        self.state.lock().await.faults = Faults::default();
    }

    pub async fn has_index(&self, index: &str) -> bool {
        self.state.lock().await.indices.contains_key(index)
    }

    /// Documents of `index` in insertion order; empty if it does not exist.
    pub async fn documents(&self, index: &str) -> Vec<Record> {
        let state = self.state.lock().await;
        state
            .indices
            .get(index)
            .map(|stored| stored.ordered().into_iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn document_count(&self, index: &str) -> usize {
        let state = self.state.lock().await;
        state.indices.get(index).map_or(0, |stored| stored.docs.len())
    }

    pub async fn has_policy(&self, name: &str) -> bool {
        self.state.lock().await.policies.contains_key(name)
    }

    pub async fn is_policy_executed(&self, name: &str) -> bool {
        let state = self.state.lock().await;
        state
            .policies
            .get(name)
            .is_some_and(|stored| stored.snapshot.is_some())
    }

    pub async fn pipeline(&self, id: &str) -> Option<Pipeline> {
        self.state.lock().await.pipelines.get(id).cloned()
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn bulk_index(
        &self,
        index: &str,
        _doc_type: &str,
        documents: &[Record],
        pipeline: Option<&str>,
        _refresh: Refresh,
    ) -> IndexResult<BulkOutcome> {
        let mut state = self.state.lock().await;
        if state.faults.bulk.contains(index) {
            return Err(injected("bulk", index).with_request("POST", &format!("/{}/_bulk", index)));
        }

        let pipeline = match pipeline {
            Some(id) => Some(state.pipelines.get(id).cloned().ok_or_else(|| {
                IndexError::new(
                    IndexErrorKind::Other,
                    format!("pipeline with id [{}] does not exist", id),
                )
            })?),
            None => None,
        };

        let mut prepared = Vec::with_capacity(documents.len());
        let mut first_error = None;
        for document in documents {
            let Some(id) = record_id(document) else {
                first_error.get_or_insert_with(|| {
                    IndexError::new(IndexErrorKind::Other, "bulk document without an id")
                });
                continue;
            };
            let processed = match &pipeline {
                Some(pipeline) => run_pipeline(document, pipeline, &state.policies),
                None => Ok(document.clone()),
            };
            match processed {
                Ok(doc) => prepared.push((id.to_string(), doc)),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        let indexed = prepared.len();
        let stored = state.indices.entry(index.to_string()).or_default();
        for (id, doc) in prepared {
            stored.put(&id, doc);
        }

        Ok(BulkOutcome {
            indexed,
            failure: first_error.map(|e| e.with_request("POST", &format!("/{}/_bulk", index))),
        })
    }

    async fn index_document(
        &self,
        index: &str,
        _doc_type: &str,
        id: &str,
        document: &Record,
        _refresh: Refresh,
    ) -> IndexResult<()> {
        let mut state = self.state.lock().await;
        if state.faults.writes.contains(index) {
            return Err(injected("write", index));
        }
        state
            .indices
            .entry(index.to_string())
            .or_default()
            .put(id, document.clone());
        Ok(())
    }

    async fn get_document(&self, index: &str, _doc_type: &str, id: &str) -> IndexResult<Option<Record>> {
        let state = self.state.lock().await;
        if state.faults.get {
            return Err(IndexError::new(IndexErrorKind::Transport, "injected get failure"));
        }
        let stored = state.indices.get(index).ok_or_else(|| index_not_found(index))?;
        Ok(stored.docs.get(id).map(|(_, doc)| doc.clone()))
    }

    async fn delete_document(
        &self,
        index: &str,
        _doc_type: &str,
        id: &str,
        _refresh: Refresh,
    ) -> IndexResult<()> {
        let mut state = self.state.lock().await;
        if state.faults.writes.contains(index) {
            return Err(injected("delete", index));
        }
        let stored = state
            .indices
            .get_mut(index)
            .ok_or_else(|| index_not_found(index))?;
        match stored.docs.remove(id) {
            Some(_) => Ok(()),
            None => Err(IndexError::new(
                IndexErrorKind::DocumentNotFound,
                format!("document [{}] not found", id),
            )
            .with_status(404)),
        }
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> IndexResult<SearchHits> {
        let state = self.state.lock().await;
        if state.faults.search {
            return Err(IndexError::new(IndexErrorKind::Transport, "injected search failure"));
        }
        let stored = state.indices.get(index).ok_or_else(|| index_not_found(index))?;

        let mut matched: Vec<&Record> = stored
            .ordered()
            .into_iter()
            .filter(|doc| {
                request
                    .filters
                    .iter()
                    .all(|(field, expected)| doc.get(field.as_str()) == Some(expected))
            })
            .collect();
        if let Some(sort) = &request.sort {
            matched.sort_by(|a, b| compare_fields(a.get(sort.as_str()), b.get(sort.as_str())));
        }

        let total = matched.len() as u64;
        let documents = matched
            .into_iter()
            .skip(request.from as usize)
            .take(request.size as usize)
            .cloned()
            .collect();
        Ok(SearchHits { total, documents })
    }

    async fn delete_index(&self, index: &str) -> IndexResult<()> {
        let mut state = self.state.lock().await;
        if state.faults.delete_index.contains(index) {
            return Err(injected("delete index", index).with_request("DELETE", &format!("/{}", index)));
        }
        state
            .indices
            .remove(index)
            .map(|_| ())
            .ok_or_else(|| index_not_found(index))
    }

    async fn put_enrich_policy(&self, name: &str, policy: &EnrichPolicy) -> IndexResult<()> {
        let mut state = self.state.lock().await;
        state.policies.insert(
            name.to_string(),
            StoredPolicy {
                policy: policy.clone(),
                snapshot: None,
            },
        );
        Ok(())
    }

    async fn execute_enrich_policy(&self, name: &str) -> IndexResult<()> {
        let mut state = self.state.lock().await;
        let policy = state
            .policies
            .get(name)
            .map(|stored| stored.policy.clone())
            .ok_or_else(|| {
                IndexError::new(
                    IndexErrorKind::ResourceNotFound,
                    format!("policy [{}] does not exist", name),
                )
            })?;

        let mut snapshot: HashMap<String, Vec<Record>> = HashMap::new();
        for index in &policy.indices {
            let stored = state.indices.get(index).ok_or_else(|| index_not_found(index))?;
            for doc in stored.ordered() {
                let Some(key) = doc.get(&policy.match_field).filter(|v| !v.is_null()) else {
                    continue;
                };
                let mut entry = Map::new();
                entry.insert(policy.match_field.clone(), key.clone());
                for field in &policy.enrich_fields {
                    if let Some(value) = doc.get(field) {
                        entry.insert(field.clone(), value.clone());
                    }
                }
                snapshot.entry(match_key(key)).or_default().push(entry);
            }
        }

        if let Some(stored) = state.policies.get_mut(name) {
            stored.snapshot = Some(snapshot);
        }
        Ok(())
    }

    async fn delete_enrich_policy(&self, name: &str) -> IndexResult<()> {
        let mut state = self.state.lock().await;
        if !state.policies.contains_key(name) {
            return Err(IndexError::new(
                IndexErrorKind::ResourceNotFound,
                format!("policy [{}] not found", name),
            ));
        }
        let in_use = state
            .pipelines
            .iter()
            .find(|(_, p)| p.processors.iter().any(|proc| references_policy(proc, name)));
        if let Some((pipeline_id, _)) = in_use {
            return Err(IndexError::new(
                IndexErrorKind::Other,
                format!(
                    "Could not delete policy [{}] because a pipeline is referencing it [{}]",
                    name, pipeline_id
                ),
            ));
        }
        state.policies.remove(name);
        Ok(())
    }

    async fn put_pipeline(&self, id: &str, pipeline: &Pipeline) -> IndexResult<()> {
        let mut state = self.state.lock().await;
        fn policies_of(processor: &Processor, out: &mut Vec<String>) {
            match processor {
                Processor::Enrich { policy_name, .. } => out.push(policy_name.clone()),
                Processor::Foreach { processor, .. } => policies_of(processor, out),
            }
        }
        let mut referenced = Vec::new();
        for processor in &pipeline.processors {
            policies_of(processor, &mut referenced);
        }
        if let Some(missing) = referenced.iter().find(|p| !state.policies.contains_key(*p)) {
            return Err(IndexError::new(
                IndexErrorKind::ResourceNotFound,
                format!("policy [{}] does not exist", missing),
            ));
        }
        state.pipelines.insert(id.to_string(), pipeline.clone());
        Ok(())
    }

    async fn delete_pipeline(&self, id: &str) -> IndexResult<()> {
        let mut state = self.state.lock().await;
        state.pipelines.remove(id).map(|_| ()).ok_or_else(|| {
            IndexError::new(
                IndexErrorKind::ResourceNotFound,
                format!("pipeline [{}] is missing", id),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Record {
        value.as_object().unwrap().clone()
    }

    async fn taxonomy_policy(index: &MemoryIndex) {
        index
            .bulk_index(
                "taxonomy",
                "_doc",
                &[doc(json!({"id": "t1", "name": "Languages", "created": "x"}))],
                None,
                Refresh::WaitFor,
            )
            .await
            .unwrap();
        index
            .put_enrich_policy(
                "taxonomy-policy",
                &EnrichPolicy {
                    indices: vec!["taxonomy".to_string()],
                    match_field: "id".to_string(),
                    enrich_fields: vec!["name".to_string()],
                },
            )
            .await
            .unwrap();
    }

    fn enrich(field: &str, target: &str) -> Processor {
        Processor::Enrich {
            policy_name: "taxonomy-policy".to_string(),
            field: field.to_string(),
            target_field: target.to_string(),
            max_matches: 1,
            ignore_missing: true,
        }
    }

    #[tokio::test]
    async fn test_enrich_requires_execution() {
        let index = MemoryIndex::new();
        taxonomy_policy(&index).await;
        index
            .put_pipeline("p", &Pipeline { description: None, processors: vec![enrich("taxonomyId", "taxonomy")] })
            .await
            .unwrap();

        let skill = doc(json!({"id": "s1", "taxonomyId": "t1"}));
        let outcome = index
            .bulk_index("skill", "_doc", &[skill.clone()], Some("p"), Refresh::WaitFor)
            .await
            .unwrap();
        assert_eq!(outcome.indexed, 0);
        assert!(outcome.failure.unwrap().message.contains("no enrich index"));

        index.execute_enrich_policy("taxonomy-policy").await.unwrap();
        let outcome = index
            .bulk_index("skill", "_doc", &[skill], Some("p"), Refresh::WaitFor)
            .await
            .unwrap();
        assert_eq!(outcome.indexed, 1);
        assert!(outcome.failure.is_none());
        let docs = index.documents("skill").await;
        assert_eq!(docs[0]["taxonomy"], json!({"id": "t1", "name": "Languages"}));
    }

    #[tokio::test]
    async fn test_foreach_enriches_each_element() {
        let index = MemoryIndex::new();
        taxonomy_policy(&index).await;
        index.execute_enrich_policy("taxonomy-policy").await.unwrap();
        let pipeline = Pipeline {
            description: None,
            processors: vec![Processor::Foreach {
                field: "links".to_string(),
                ignore_missing: true,
                processor: Box::new(enrich("_ingest._value.taxonomyId", "_ingest._value.taxonomy")),
            }],
        };
        index.put_pipeline("multi", &pipeline).await.unwrap();

        let docs = [
            doc(json!({"id": "u1", "links": [{"taxonomyId": "t1"}, {"taxonomyId": "missing"}]})),
            doc(json!({"id": "u2"})),
        ];
        index
            .bulk_index("user", "_doc", &docs, Some("multi"), Refresh::WaitFor)
            .await
            .unwrap();

        let stored = index.documents("user").await;
        assert_eq!(stored[0]["links"][0]["taxonomy"]["name"], "Languages");
        assert!(stored[0]["links"][1].get("taxonomy").is_none());
        assert!(stored[1].get("links").is_none());
    }

    #[tokio::test]
    async fn test_not_found_kinds() {
        let index = MemoryIndex::new();
        assert!(index.delete_index("nope").await.unwrap_err().is(IndexErrorKind::IndexNotFound));
        assert!(index.delete_pipeline("nope").await.unwrap_err().is(IndexErrorKind::ResourceNotFound));
        assert!(index
            .delete_enrich_policy("nope")
            .await
            .unwrap_err()
            .is(IndexErrorKind::ResourceNotFound));

        index
            .index_document("skill", "_doc", "s1", &doc(json!({"id": "s1"})), Refresh::WaitFor)
            .await
            .unwrap();
        let err = index
            .delete_document("skill", "_doc", "s2", Refresh::WaitFor)
            .await
            .unwrap_err();
        assert!(err.is_missing_document());
        assert_eq!(index.get_document("skill", "_doc", "s2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_policy_in_use_cannot_be_deleted() {
        let index = MemoryIndex::new();
        taxonomy_policy(&index).await;
        index
            .put_pipeline("p", &Pipeline { description: None, processors: vec![enrich("taxonomyId", "taxonomy")] })
            .await
            .unwrap();
        let err = index.delete_enrich_policy("taxonomy-policy").await.unwrap_err();
        assert!(err.is(IndexErrorKind::Other));

        index.delete_pipeline("p").await.unwrap();
        index.delete_enrich_policy("taxonomy-policy").await.unwrap();
        assert!(!index.has_policy("taxonomy-policy").await);
    }

    #[tokio::test]
    async fn test_search_filters_sorts_and_pages() {
        let index = MemoryIndex::new();
        let docs: Vec<Record> = ["c", "a", "b"]
            .iter()
            .enumerate()
            .map(|(i, name)| doc(json!({"id": i.to_string(), "name": name, "group": "g"})))
            .collect();
        index
            .bulk_index("skill", "_doc", &docs, None, Refresh::WaitFor)
            .await
            .unwrap();

        let hits = index
            .search(
                "skill",
                &SearchRequest {
                    from: 1,
                    size: 1,
                    filters: vec![("group".to_string(), json!("g"))],
                    sort: Some("name".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(hits.total, 3);
        assert_eq!(hits.documents[0]["name"], "b");
    }

    #[test]
    fn test_set_path_creates_intermediate_objects() {
        let mut value = json!({"a": 1});
        set_path(&mut value, "b.c", json!(2));
        set_path(&mut value, "a.d", json!(3));
        assert_eq!(value, json!({"a": {"d": 3}, "b": {"c": 2}}));
    }
}
