use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Map, Value};
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::feeds::{EVALUATIONS, PROFESSORS, QUESTIONS, STUDENTS};
use crate::store::{
    CollectionQuery, DocumentStore, FilterOp, RawDocument, Snapshot, SnapshotStream, StoreError,
    StoreErrorCode,
};
use crate::{Error, Result};

pub async fn init_db(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn upsert_document(pool: &PgPool, collection: &str, id: &str, body: &Value) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO evaluation_store.documents (collection, id, body, updated_at)
        VALUES ($1, $2, $3, now())
        ON CONFLICT (collection, id) DO UPDATE
        SET body = EXCLUDED.body, updated_at = now()
        "#,
    )
    .bind(collection)
    .bind(id)
    .bind(body)
    .execute(pool)
    .await?;
    Ok(())
}

/// Declare an index so ordered queries on `collection.field` are served.
pub async fn declare_index(pool: &PgPool, collection: &str, field: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO evaluation_store.document_indexes (collection, field)
        VALUES ($1, $2)
        ON CONFLICT (collection, field) DO NOTHING
        "#,
    )
    .bind(collection)
    .bind(field)
    .execute(pool)
    .await?;
    Ok(())
}

/// Demo data with the inconsistent labels real imports carry. The question
/// ordering index is left undeclared so that feed runs on the fallback path.
pub async fn seed(pool: &PgPool) -> Result<()> {
    let professors = [
        ("prof-avery", "Dr. Avery Lee", "Computer Science"),
        ("prof-jules", "Dr. Jules Moreno", "Computer Science"),
        ("prof-kiara", "Dr. Kiara Patel", "Physics"),
    ];
    for (id, name, department) in professors {
        upsert_document(pool, PROFESSORS, id, &json!({"name": name, "department": department})).await?;
    }

    let students = [
        ("stu-001", "Mara Quinn", "Computer Science", true),
        ("stu-002", "Theo Park", "Computer Science", true),
        ("stu-003", "Lena Ortiz", "Physics", true),
        ("stu-004", "Omar Haddad", "Physics", false),
    ];
    for (id, name, department, active) in students {
        upsert_document(
            pool,
            STUDENTS,
            id,
            &json!({"name": name, "department": department, "active": active}),
        )
        .await?;
    }

    let questions = [
        ("q-ic-1", "Explains the subject matter clearly", "A. Instructional Competence", "scale", 1),
        ("q-cm-1", "Maintains an orderly learning environment", "b. classroom management", "scale", 2),
        ("q-rs-1", "Integrates current research into lessons", "C. RESEARCH", "scale", 3),
        ("q-ss-1", "Is available for consultation", "Student Support and Development", "scale", 4),
        ("q-pq-1", "Treats students with respect", "e. Professionalism & Personal Qualities", "scale", 5),
        ("q-misc-1", "Any other comments?", "miscellaneous feedback", "free_text", 6),
    ];
    for (id, text, section, kind, order) in questions {
        upsert_document(
            pool,
            QUESTIONS,
            id,
            &json!({"text": text, "section": section, "type": kind, "order": order}),
        )
        .await?;
    }

    let evaluations = [
        ("eval-001", "prof-avery", "Dr. Avery Lee", "Computer Science", "submitted", true, "stu-001", ["Strongly Agree", "Agree", "Agree", "Strongly Agree", "Strongly Agree"]),
        ("eval-002", "prof-avery", "Dr. Avery Lee", "Computer Science", "pending", true, "stu-002", ["Agree", "Agree", "Disagree", "Agree", "Agree"]),
        ("eval-003", "prof-jules", "Dr. Jules Moreno", "Computer Science", "Submitted", false, "stu-001", ["Agree", "Disagree", "Neutral", "Agree", "Strongly Agree"]),
        ("eval-004", "prof-kiara", "Dr. Kiara Patel", "Physics", "submitted", true, "stu-003", ["Strongly Agree", "Strongly Agree", "Strongly Agree", "Agree", "Agree"]),
        ("eval-005", "prof-kiara", "Dr. Kiara Patel", "Physics", "in_progress", false, "stu-004", ["Disagree", "Disagree", "Disagree", "Disagree", "Disagree"]),
    ];
    let scale_questions = ["q-ic-1", "q-cm-1", "q-rs-1", "q-ss-1", "q-pq-1"];
    for (day, (id, professor_id, professor_name, department, status, complete, student, answers)) in
        evaluations.into_iter().enumerate()
    {
        let mut responses: Vec<Value> = scale_questions
            .iter()
            .zip(answers)
            .map(|(question_id, answer)| {
                json!({"questionId": question_id, "questionType": "scale", "answer": answer})
            })
            .collect();
        responses.push(json!({"questionId": "q-misc-1", "questionType": "free_text", "answer": "Thanks!"}));
        upsert_document(
            pool,
            EVALUATIONS,
            id,
            &json!({
                "professorId": professor_id,
                "professorName": professor_name,
                "departmentName": department,
                "status": status,
                "isComplete": complete,
                "studentId": student,
                "submittedAt": format!("2026-02-{:02}T09:00:00Z", day + 1),
                "responses": responses,
            }),
        )
        .await?;
    }

    declare_index(pool, EVALUATIONS, "submittedAt").await?;
    declare_index(pool, PROFESSORS, "name").await?;
    declare_index(pool, STUDENTS, "name").await?;

    Ok(())
}

/// Load flat evaluation rows (one per answered question) and group them
/// into evaluation documents by record id. Returns documents written.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        record_id: Option<String>,
        professor_id: String,
        professor_name: String,
        department: String,
        status: Option<String>,
        is_complete: Option<bool>,
        student_id: Option<String>,
        student_email: Option<String>,
        session_id: Option<String>,
        submitted_at: Option<String>,
        question_id: String,
        question_text: Option<String>,
        section: Option<String>,
        question_type: Option<String>,
        answer: String,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut documents: BTreeMap<String, Map<String, Value>> = BTreeMap::new();

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result?;
        if row.professor_id.trim().is_empty() {
            return Err(Error::InvalidInput(format!("row {} has no professor_id", line + 2)));
        }
        // Rows without a record id stand alone as single-answer evaluations.
        let record_id = row
            .record_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));
        let doc = documents.entry(record_id).or_insert_with(|| {
            let mut doc = Map::new();
            doc.insert("professorId".into(), json!(row.professor_id));
            doc.insert("professorName".into(), json!(row.professor_name));
            doc.insert("departmentName".into(), json!(row.department));
            doc.insert("status".into(), json!(row.status.clone().unwrap_or_default()));
            doc.insert("isComplete".into(), json!(row.is_complete.unwrap_or(false)));
            if let Some(student) = &row.student_id {
                doc.insert("studentId".into(), json!(student));
            }
            if let Some(email) = &row.student_email {
                doc.insert("studentEmail".into(), json!(email));
            }
            if let Some(at) = &row.submitted_at {
                doc.insert("submittedAt".into(), json!(at));
            }
            doc.insert("responses".into(), Value::Array(Vec::new()));
            doc
        });

        let mut response = Map::new();
        response.insert("questionId".into(), json!(row.question_id));
        response.insert("answer".into(), json!(row.answer));
        for (key, value) in [
            ("questionText", row.question_text),
            ("section", row.section),
            ("questionType", row.question_type),
            ("sessionId", row.session_id),
        ] {
            if let Some(value) = value {
                response.insert(key.into(), json!(value));
            }
        }
        if let Some(Value::Array(responses)) = doc.get_mut("responses") {
            responses.push(Value::Object(response));
        }
    }

    for (id, body) in &documents {
        upsert_document(pool, EVALUATIONS, id, &Value::Object(body.clone())).await?;
    }
    info!(documents = documents.len(), path = %csv_path.display(), "imported evaluation rows");
    Ok(documents.len())
}

/// Document store over Postgres JSONB rows with declared-index rules.
/// Listeners poll and emit only when the result set changes.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
    poll_interval: Duration,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool, poll_interval: Duration) -> Self {
        Self { pool, poll_interval }
    }

    async fn check_index(&self, query: &CollectionQuery) -> std::result::Result<(), StoreError> {
        let Some(order) = &query.order_by else {
            return Ok(());
        };
        let declared: bool = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM evaluation_store.document_indexes
                WHERE collection = $1 AND field = $2
            ) AS declared
            "#,
        )
        .bind(&query.collection)
        .bind(&order.field)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?
        .get("declared");

        if declared {
            Ok(())
        } else {
            Err(StoreError::missing_index(&query.collection, &order.field))
        }
    }

    /// Equality filters go to Postgres as a containment test; range
    /// filters and ordering are applied to the fetched rows.
    async fn fetch(&self, query: &CollectionQuery) -> std::result::Result<Snapshot, StoreError> {
        self.check_index(query).await?;

        let equality: Map<String, Value> = query
            .filters
            .iter()
            .filter(|f| f.op == FilterOp::Eq)
            .map(|f| (f.field.clone(), f.value.clone()))
            .collect();

        let rows = sqlx::query(
            r#"
            SELECT id, body
            FROM evaluation_store.documents
            WHERE collection = $1 AND body @> $2
            "#,
        )
        .bind(&query.collection)
        .bind(Value::Object(equality))
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        let documents = rows.into_iter().map(|row| {
            let id: String = row.get("id");
            let body: Value = row.get("body");
            RawDocument::new(id, body)
        });
        Ok(query.evaluate(documents))
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn subscribe(&self, query: &CollectionQuery) -> std::result::Result<SnapshotStream, StoreError> {
        self.check_index(query).await?;
        debug!(%query, interval = ?self.poll_interval, "postgres listener opened");

        let store = self.clone();
        let query = query.clone();
        let stream = async_stream::stream! {
            let mut ticker = tokio::time::interval(store.poll_interval);
            let mut last: Option<Snapshot> = None;
            loop {
                ticker.tick().await;
                match store.fetch(&query).await {
                    Ok(snapshot) => {
                        if last.as_ref() != Some(&snapshot) {
                            last = Some(snapshot.clone());
                            yield Ok(snapshot);
                        }
                    }
                    Err(err) => yield Err(err),
                }
            }
        };
        Ok(stream.boxed())
    }

    async fn query(&self, query: &CollectionQuery) -> std::result::Result<Snapshot, StoreError> {
        self.fetch(query).await
    }
}

/// Classify a sqlx failure the way the managed store reports its own.
pub fn store_error(err: sqlx::Error) -> StoreError {
    let code = match &err {
        sqlx::Error::PoolTimedOut => StoreErrorCode::DeadlineExceeded,
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolClosed => StoreErrorCode::Unavailable,
        sqlx::Error::RowNotFound => StoreErrorCode::NotFound,
        sqlx::Error::Database(db) => sqlstate_code(db.code().as_deref()),
        _ => StoreErrorCode::Internal,
    };
    StoreError::new(code, err.to_string())
}

fn sqlstate_code(sqlstate: Option<&str>) -> StoreErrorCode {
    match sqlstate {
        Some(state) if state.starts_with("08") => StoreErrorCode::Unavailable,
        Some(state) if state.starts_with("55") => StoreErrorCode::FailedPrecondition,
        Some("42501") => StoreErrorCode::PermissionDenied,
        Some("57014") => StoreErrorCode::DeadlineExceeded,
        Some(_) => StoreErrorCode::Internal,
        None => StoreErrorCode::Unknown,
    }
}
