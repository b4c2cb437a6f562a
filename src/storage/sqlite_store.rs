use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{FindQuery, RecordStore};
use crate::auth::AuthUser;
use crate::entity::{
    record_id, strip_managed_fields, Model, Record, CREATED, CREATED_BY, ID_FIELD, UPDATED,
    UPDATED_BY,
};
use crate::error::{ApiError, Result};

const COLUMNS: &str = "id, data, created, created_by, updated, updated_by";

/// SQLite-backed record store, one table per model
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

struct RawRow {
    id: String,
    data: String,
    created: Option<String>,
    created_by: Option<String>,
    updated: Option<String>,
    updated_by: Option<String>,
}

impl RawRow {
    fn read(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            data: row.get(1)?,
            created: row.get(2)?,
            created_by: row.get(3)?,
            updated: row.get(4)?,
            updated_by: row.get(5)?,
        })
    }

    fn into_record(self) -> Result<Record> {
        let mut record: Record = serde_json::from_str(&self.data)?;
        record.insert(ID_FIELD.to_string(), Value::String(self.id));
        for (field, value) in [
            (CREATED, self.created),
            (CREATED_BY, self.created_by),
            (UPDATED, self.updated),
            (UPDATED_BY, self.updated_by),
        ] {
            record.insert(field.to_string(), value.map(Value::String).unwrap_or(Value::Null));
        }
        Ok(record)
    }
}

impl SqliteStore {
    /// Open or create the database file
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert a record exactly as given, keeping whatever audit fields it
    /// carries (migrated or seeded data).
    pub async fn import(&self, model: Model, record: &Record) -> Result<()> {
        let id = record_id(record)
            .ok_or_else(|| ApiError::Validation("\"id\" is required".to_string()))?;
        let mut data = record.clone();
        strip_managed_fields(&mut data);

        let conn = self.conn.lock().await;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                model.table(),
                COLUMNS
            ),
            params![
                id,
                serde_json::to_string(&data)?,
                audit_value(record, CREATED),
                audit_value(record, CREATED_BY),
                audit_value(record, UPDATED),
                audit_value(record, UPDATED_BY),
            ],
        )?;
        Ok(())
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    for model in Model::ALL {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id TEXT PRIMARY KEY,
                    data TEXT NOT NULL,
                    created TEXT,
                    created_by TEXT,
                    updated TEXT,
                    updated_by TEXT
                )",
                model.table()
            ),
            [],
        )?;
    }

    // Taxonomy removal and skill search both filter on it
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_skills_taxonomy
         ON skills(json_extract(data, '$.taxonomyId'))",
        [],
    )?;
    Ok(())
}

fn audit_value(record: &Record, field: &str) -> Option<String> {
    record.get(field).and_then(Value::as_str).map(str::to_string)
}

fn not_found(model: Model, id: &str) -> ApiError {
    ApiError::NotFound(format!("cannot find {} where id:{}", model, id))
}

fn is_identifier(field: &str) -> bool {
    !field.is_empty() && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// SQL expression selecting `field` from a row.
fn column_expr(field: &str) -> Result<String> {
    if !is_identifier(field) {
        return Err(ApiError::Validation(format!("invalid field name '{}'", field)));
    }
    Ok(match field {
        ID_FIELD => "id".to_string(),
        CREATED => "created".to_string(),
        CREATED_BY => "created_by".to_string(),
        UPDATED => "updated".to_string(),
        UPDATED_BY => "updated_by".to_string(),
        _ => format!("json_extract(data, '$.{}')", field),
    })
}

fn sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn display_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "null".to_string(),
        Some(other) => other.to_string(),
    }
}

/// Append `field = ?n`, or `field IS NULL` for an unset value.
fn push_condition(
    clauses: &mut Vec<String>,
    values: &mut Vec<SqlValue>,
    field: &str,
    value: Option<&Value>,
) -> Result<()> {
    let expr = column_expr(field)?;
    match value {
        None | Some(Value::Null) => clauses.push(format!("{} IS NULL", expr)),
        Some(value) => {
            values.push(sql_value(value));
            clauses.push(format!("{} = ?{}", expr, values.len()));
        }
    }
    Ok(())
}

fn select_one(conn: &Connection, model: Model, id: &str) -> Result<Option<Record>> {
    conn.query_row(
        &format!("SELECT {} FROM {} WHERE id = ?1", COLUMNS, model.table()),
        [id],
        RawRow::read,
    )
    .optional()?
    .map(RawRow::into_record)
    .transpose()
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn get(&self, model: Model, id: &str) -> Result<Option<Record>> {
        let conn = self.conn.lock().await;
        select_one(&conn, model, id)
    }

    async fn create(&self, model: Model, mut fields: Record, auth: &AuthUser) -> Result<Record> {
        strip_managed_fields(&mut fields);
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let who = auth.identity();

        let conn = self.conn.lock().await;
        conn.execute(
            &format!(
                "INSERT INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                model.table(),
                COLUMNS
            ),
            params![id, serde_json::to_string(&fields)?, now, who, now, who],
        )?;
        select_one(&conn, model, &id)?.ok_or_else(|| not_found(model, &id))
    }

    async fn update(
        &self,
        model: Model,
        id: &str,
        mut fields: Record,
        auth: &AuthUser,
    ) -> Result<Record> {
        let conn = self.conn.lock().await;
        let mut data = select_one(&conn, model, id)?.ok_or_else(|| not_found(model, id))?;
        strip_managed_fields(&mut data);
        strip_managed_fields(&mut fields);
        data.extend(fields);

        conn.execute(
            &format!(
                "UPDATE {} SET data = ?1, updated = ?2, updated_by = ?3 WHERE id = ?4",
                model.table()
            ),
            params![
                serde_json::to_string(&data)?,
                Utc::now().to_rfc3339(),
                auth.identity(),
                id
            ],
        )?;
        select_one(&conn, model, id)?.ok_or_else(|| not_found(model, id))
    }

    async fn remove(&self, model: Model, id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", model.table()),
            [id],
        )?;
        if deleted == 0 {
            return Err(not_found(model, id));
        }
        Ok(())
    }

    async fn find(&self, model: Model, query: &FindQuery) -> Result<Vec<Record>> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        for (field, value) in &query.filters {
            push_condition(&mut clauses, &mut values, field, Some(value))?;
        }

        let mut sql = format!("SELECT {} FROM {}", COLUMNS, model.table());
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        match &query.order_by {
            Some(field) => sql.push_str(&format!(" ORDER BY {}, rowid", column_expr(field)?)),
            None => sql.push_str(" ORDER BY rowid"),
        }
        if let Some(per_page) = query.per_page {
            let page = u64::from(query.page.unwrap_or(1).max(1));
            let offset = (page - 1) * u64::from(per_page);
            sql.push_str(&format!(" LIMIT {} OFFSET {}", per_page, offset));
        }

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), RawRow::read)?;
        let records = rows
            .map(|row| row.map_err(ApiError::from).and_then(RawRow::into_record))
            .collect::<Result<Vec<_>>>();
        records
    }

    async fn make_sure_unique(
        &self,
        model: Model,
        fields: &Record,
        groups: &[&[&str]],
        exclude_id: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        for group in groups {
            let any_set = group
                .iter()
                .any(|f| fields.get(*f).is_some_and(|v| !v.is_null()));
            if !any_set {
                continue;
            }

            let mut clauses = Vec::new();
            let mut values = Vec::new();
            for field in group.iter() {
                push_condition(&mut clauses, &mut values, field, fields.get(*field))?;
            }
            if let Some(exclude) = exclude_id {
                values.push(SqlValue::Text(exclude.to_string()));
                clauses.push(format!("id != ?{}", values.len()));
            }

            let sql = format!(
                "SELECT COUNT(*) FROM {} WHERE {}",
                model.table(),
                clauses.join(" AND ")
            );
            let count: i64 = conn.query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
            if count > 0 {
                let described: Vec<String> = group
                    .iter()
                    .map(|f| format!("{}: {}", f, display_value(fields.get(*f))))
                    .collect();
                return Err(ApiError::Uniqueness(format!(
                    "{} with [{}] already exists",
                    model,
                    described.join(", ")
                )));
            }
        }
        Ok(())
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        ApiError::Storage(format!("SQLite error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn fields(value: Value) -> Record {
        value.as_object().unwrap().clone()
    }

    fn alice() -> AuthUser {
        AuthUser::user("alice", &["user"])
    }

    #[tokio::test]
    async fn test_open_creates_db_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data").join("skills.db");
        let _store = SqliteStore::open(&path).unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_create_stamps_audit_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        let created = store
            .create(Model::Taxonomy, fields(json!({"name": "Languages", "createdBy": "mallory"})), &alice())
            .await
            .unwrap();

        let id = record_id(&created).unwrap();
        assert!(Uuid::parse_str(id).is_ok());
        assert_eq!(created["createdBy"], "alice");
        assert_eq!(created["updatedBy"], "alice");
        assert!(created["created"].is_string());

        let fetched = store.get(Model::Taxonomy, id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert!(store.get(Model::Skill, id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        let created = store
            .create(Model::Skill, fields(json!({"name": "Rust", "uri": "a"})), &alice())
            .await
            .unwrap();
        let id = record_id(&created).unwrap().to_string();

        let bob = AuthUser::user("bob", &["user"]);
        let updated = store
            .update(Model::Skill, &id, fields(json!({"uri": "b"})), &bob)
            .await
            .unwrap();
        assert_eq!(updated["name"], "Rust");
        assert_eq!(updated["uri"], "b");
        assert_eq!(updated["createdBy"], "alice");
        assert_eq!(updated["updatedBy"], "bob");

        let err = store
            .update(Model::Skill, "missing", fields(json!({"uri": "c"})), &bob)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot find Skill where id:missing");
    }

    #[tokio::test]
    async fn test_remove_missing_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store.remove(Model::Taxonomy, "nope").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_find_filters_orders_and_pages() {
        let store = SqliteStore::open_in_memory().unwrap();
        for (name, group) in [("c", "x"), ("a", "x"), ("b", "y"), ("d", "x")] {
            store
                .create(Model::Skill, fields(json!({"name": name, "taxonomyId": group})), &alice())
                .await
                .unwrap();
        }

        let all_x = store
            .find(Model::Skill, &FindQuery::default().filter("taxonomyId", "x"))
            .await
            .unwrap();
        let names: Vec<&str> = all_x.iter().map(|r| r["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["c", "a", "d"]);

        let page = store
            .find(
                Model::Skill,
                &FindQuery::default().filter("taxonomyId", "x").order_by("name").paged(2, 2),
            )
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0]["name"], "d");

        let err = store
            .find(Model::Skill, &FindQuery::default().order_by("name; DROP TABLE skills"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn test_make_sure_unique() {
        let store = SqliteStore::open_in_memory().unwrap();
        let groups: &[&[&str]] = &[&["taxonomyId", "externalId", "name"]];
        let existing = store
            .create(Model::Skill, fields(json!({"taxonomyId": "t1", "name": "Rust"})), &alice())
            .await
            .unwrap();

        // Same triple, externalId unset on both
        let dup = fields(json!({"taxonomyId": "t1", "name": "Rust"}));
        let err = store
            .make_sure_unique(Model::Skill, &dup, groups, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Uniqueness(_)));
        assert!(err.to_string().starts_with("Skill with [taxonomyId: t1"));

        // Excluding the record itself
        store
            .make_sure_unique(Model::Skill, &dup, groups, record_id(&existing))
            .await
            .unwrap();

        let other = fields(json!({"taxonomyId": "t1", "name": "Rust", "externalId": "e1"}));
        store
            .make_sure_unique(Model::Skill, &other, groups, None)
            .await
            .unwrap();

        store
            .make_sure_unique(Model::Skill, &fields(json!({"uri": "u"})), groups, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_import_keeps_missing_audit_fields_null() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .import(Model::Taxonomy, &fields(json!({"id": "t1", "name": "Legacy"})))
            .await
            .unwrap();
        let record = store.get(Model::Taxonomy, "t1").await.unwrap().unwrap();
        assert_eq!(record["name"], "Legacy");
        assert!(record["createdBy"].is_null());
        assert!(record["updated"].is_null());
    }
}
