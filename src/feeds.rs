//! Collection presets for the four entity streams, and the typed
//! projections of the side collections that feed the ranking board.

use std::collections::HashMap;

use serde_json::Value;

use crate::models::QuestionType;
use crate::normalize::{parse_question_type, text};
use crate::store::{CollectionQuery, Direction, FilterOp, RawDocument, Snapshot};

pub const PROFESSORS: &str = "professors";
pub const STUDENTS: &str = "students";
pub const EVALUATIONS: &str = "evaluations";
pub const QUESTIONS: &str = "questions";

pub fn professors_query(department: Option<&str>) -> CollectionQuery {
    with_department(CollectionQuery::new(PROFESSORS), "department", department)
        .order_by("name", Direction::Asc)
}

pub fn students_query(department: Option<&str>) -> CollectionQuery {
    with_department(CollectionQuery::new(STUDENTS), "department", department)
        .order_by("name", Direction::Asc)
}

/// Newest submissions first.
pub fn evaluations_query(department: Option<&str>) -> CollectionQuery {
    with_department(CollectionQuery::new(EVALUATIONS), "departmentName", department)
        .order_by("submittedAt", Direction::Desc)
}

pub fn questions_query() -> CollectionQuery {
    CollectionQuery::new(QUESTIONS).order_by("order", Direction::Asc)
}

fn with_department(query: CollectionQuery, field: &str, department: Option<&str>) -> CollectionQuery {
    match department {
        Some(name) => query.filter(field, FilterOp::Eq, name),
        None => query,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfessorProfile {
    pub id: String,
    pub name: String,
    pub department: String,
}

impl ProfessorProfile {
    pub fn from_document(doc: &RawDocument) -> Self {
        Self {
            id: doc.id.clone(),
            name: text(&doc.data, &["name", "fullName"]).unwrap_or_default(),
            department: text(&doc.data, &["department", "departmentName"]).unwrap_or_default(),
        }
    }
}

pub fn professor_roster(snapshot: &Snapshot) -> HashMap<String, ProfessorProfile> {
    snapshot
        .iter()
        .map(|doc| (doc.id.clone(), ProfessorProfile::from_document(doc)))
        .collect()
}

/// Students count toward enrollment unless explicitly inactive.
pub fn enrolled_student_count(snapshot: &Snapshot) -> usize {
    snapshot
        .iter()
        .filter(|doc| !matches!(doc.field("active"), Some(Value::Bool(false))))
        .count()
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuestionMeta {
    pub id: String,
    pub text: String,
    pub section: String,
    pub question_type: QuestionType,
    pub options: Vec<String>,
}

impl QuestionMeta {
    pub fn from_document(doc: &RawDocument) -> Self {
        let options = match doc.field("options") {
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };
        Self {
            id: doc.id.clone(),
            text: text(&doc.data, &["text", "questionText"]).unwrap_or_default(),
            section: text(&doc.data, &["section", "category"]).unwrap_or_default(),
            question_type: text(&doc.data, &["type", "questionType"])
                .map(|kind| parse_question_type(&kind))
                .unwrap_or(QuestionType::Scale),
            options,
        }
    }
}

/// Question metadata keyed by id, with a normalized-text fallback index.
#[derive(Debug, Clone, Default)]
pub struct QuestionCatalog {
    by_id: HashMap<String, QuestionMeta>,
    by_text: HashMap<String, QuestionMeta>,
}

impl QuestionCatalog {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self::from_questions(snapshot.iter().map(QuestionMeta::from_document))
    }

    pub fn from_questions(questions: impl IntoIterator<Item = QuestionMeta>) -> Self {
        let mut catalog = Self::default();
        for question in questions {
            let key = normalize_question_text(&question.text);
            if !key.is_empty() {
                // First authored wins so the lookup is independent of later duplicates.
                catalog.by_text.entry(key).or_insert_with(|| question.clone());
            }
            if !question.id.is_empty() {
                catalog.by_id.insert(question.id.clone(), question);
            }
        }
        catalog
    }

    /// By id first, then by normalized question text.
    pub fn lookup(&self, question_id: &str, question_text: &str) -> Option<&QuestionMeta> {
        self.by_id
            .get(question_id)
            .or_else(|| self.by_text.get(&normalize_question_text(question_text)))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Lowercase, alphanumeric words separated by single spaces.
pub fn normalize_question_text(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
