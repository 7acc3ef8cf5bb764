//! Turns loosely-typed evaluation documents into [`EvaluationRecord`]s.
//!
//! Producers disagree on field names and on which completion flag they set,
//! so every field read here is defaulted rather than rejected.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::models::{EvaluationRecord, QuestionType, RecordStatus, ResponseItem};
use crate::store::RawDocument;

/// Substituted for scale questions authored without a choice set.
pub const DEFAULT_SCALE_OPTIONS: [&str; 4] =
    ["Strongly Agree", "Agree", "Disagree", "Strongly Disagree"];

const SESSION_KEYS: &[&str] = &["sessionId", "evaluationSessionId", "session_id"];
const RESPONDENT_KEYS: &[&str] = &["studentId", "respondentId", "student_id"];
const CONTACT_KEYS: &[&str] = &["studentEmail", "respondentEmail", "email"];

pub fn normalize(raw: &RawDocument) -> EvaluationRecord {
    let data = &raw.data;
    let responses = parse_responses(data.get("responses"));
    let raw_status = text(data, &["status"]).unwrap_or_default();

    EvaluationRecord {
        id: raw.id.clone(),
        professor_id: text(data, &["professorId", "facultyId"]).unwrap_or_default(),
        professor_name: text(data, &["professorName", "facultyName"]).unwrap_or_default(),
        department_name: text(data, &["departmentName", "department"]).unwrap_or_default(),
        status: parse_status(&raw_status),
        is_complete: data
            .get("isComplete")
            .map(truthy)
            .unwrap_or(false),
        respondent_key: respondent_key(&raw.id, data, &responses),
        raw_status,
        responses,
        submitted_at: data
            .get("submittedAt")
            .or_else(|| data.get("createdAt"))
            .and_then(parse_timestamp),
    }
}

/// Lenient union of the two completion signals.
pub fn is_valid_for_aggregation(record: &EvaluationRecord) -> bool {
    record.raw_status.to_lowercase().contains("submit") || record.is_complete
}

/// Session id on any response, then respondent id, then contact address,
/// then the record's own id. Changing this order changes uniqueness counts.
fn respondent_key(record_id: &str, data: &Map<String, Value>, responses: &[ResponseItem]) -> String {
    if let Some(session) = responses.iter().find_map(|r| r.session_id.clone()) {
        return session;
    }
    if let Some(respondent) = text(data, RESPONDENT_KEYS) {
        return respondent;
    }
    if let Some(contact) = text(data, CONTACT_KEYS) {
        return contact.to_lowercase();
    }
    record_id.to_string()
}

fn parse_status(raw: &str) -> RecordStatus {
    let lowered = raw.to_lowercase();
    if lowered.contains("submit") {
        RecordStatus::Submitted
    } else if lowered.contains("progress") {
        RecordStatus::InProgress
    } else {
        RecordStatus::Pending
    }
}

fn parse_responses(value: Option<&Value>) -> Vec<ResponseItem> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_object().map(|obj| parse_response(obj, None)))
            .collect(),
        // Older imports keyed answers by question id.
        Some(Value::Object(map)) => map
            .iter()
            .map(|(question_id, item)| match item {
                Value::Object(obj) => parse_response(obj, Some(question_id)),
                scalar => {
                    let mut obj = Map::new();
                    obj.insert("answer".to_string(), scalar.clone());
                    parse_response(&obj, Some(question_id))
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_response(obj: &Map<String, Value>, key: Option<&str>) -> ResponseItem {
    let options: Vec<String> = match obj.get("options") {
        Some(Value::Array(values)) => values.iter().filter_map(scalar_text).collect(),
        _ => Vec::new(),
    };
    let answer = obj
        .get("answer")
        .or_else(|| obj.get("value"))
        .and_then(scalar_text)
        .unwrap_or_default();
    let question_type = match text(obj, &["questionType", "type"]) {
        Some(kind) => parse_question_type(&kind),
        None if !options.is_empty() => QuestionType::Scale,
        None => QuestionType::FreeText,
    };
    let options = if question_type == QuestionType::Scale && options.is_empty() {
        DEFAULT_SCALE_OPTIONS.iter().map(|s| s.to_string()).collect()
    } else {
        options
    };

    ResponseItem {
        question_id: text(obj, &["questionId", "id"])
            .or_else(|| key.map(str::to_string))
            .unwrap_or_default(),
        question_text: text(obj, &["questionText", "question", "text"]).unwrap_or_default(),
        question_type,
        answer,
        options,
        section: text(obj, &["section", "category"]).unwrap_or_default(),
        session_id: text(obj, SESSION_KEYS),
    }
}

pub fn parse_question_type(kind: &str) -> QuestionType {
    match kind.trim().to_lowercase().as_str() {
        "scale" | "rating" | "likert" | "multiple_choice" | "radio" => QuestionType::Scale,
        _ => QuestionType::FreeText,
    }
}

/// First key holding a non-blank scalar, trimmed.
pub(crate) fn text(data: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| data.get(*key))
        .filter_map(scalar_text)
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "1"),
        Value::Number(n) => n.as_i64().is_some_and(|v| v != 0),
        _ => false,
    }
}

/// RFC 3339 strings, epoch seconds or millis, or `{seconds, nanoseconds}`.
pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => {
            let raw = n.as_i64()?;
            if raw.abs() > 100_000_000_000 {
                Utc.timestamp_millis_opt(raw).single()
            } else {
                Utc.timestamp_opt(raw, 0).single()
            }
        }
        Value::Object(obj) => {
            let seconds = obj
                .get("seconds")
                .or_else(|| obj.get("_seconds"))
                .and_then(Value::as_i64)?;
            let nanos = obj
                .get("nanoseconds")
                .or_else(|| obj.get("_nanoseconds"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            Utc.timestamp_opt(seconds, u32::try_from(nanos).unwrap_or(0)).single()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, data: Value) -> RawDocument {
        RawDocument::new(id, data)
    }

    #[test]
    fn session_id_wins_over_every_other_identity() {
        let record = normalize(&doc(
            "rec-1",
            json!({
                "studentId": "stu-9",
                "studentEmail": "Avery@Example.com",
                "responses": [
                    {"questionId": "q1", "answer": "Agree"},
                    {"questionId": "q2", "answer": "Agree", "sessionId": "sess-42"},
                    {"questionId": "q3", "answer": "Agree", "sessionId": "sess-43"}
                ]
            }),
        ));
        assert_eq!(record.respondent_key, "sess-42");
    }

    #[test]
    fn respondent_id_precedes_contact_address() {
        let record = normalize(&doc(
            "rec-1",
            json!({"studentId": "stu-9", "studentEmail": "avery@example.com"}),
        ));
        assert_eq!(record.respondent_key, "stu-9");
    }

    #[test]
    fn contact_address_is_case_folded() {
        let record = normalize(&doc("rec-1", json!({"studentEmail": " Avery.Lee@Example.COM "})));
        assert_eq!(record.respondent_key, "avery.lee@example.com");
    }

    #[test]
    fn record_id_is_last_resort() {
        let record = normalize(&doc("rec-77", json!({"studentId": "  "})));
        assert_eq!(record.respondent_key, "rec-77");
    }

    #[test]
    fn validity_is_a_union_of_status_and_completion() {
        let pending_complete = normalize(&doc("a", json!({"status": "pending", "isComplete": true})));
        let submitted_incomplete =
            normalize(&doc("b", json!({"status": "Submitted", "isComplete": false})));
        let pending_incomplete = normalize(&doc("c", json!({"status": "pending", "isComplete": false})));
        let in_progress = normalize(&doc("d", json!({"status": "in_progress"})));

        assert!(is_valid_for_aggregation(&pending_complete));
        assert!(is_valid_for_aggregation(&submitted_incomplete));
        assert!(!is_valid_for_aggregation(&pending_incomplete));
        assert!(!is_valid_for_aggregation(&in_progress));
        assert_eq!(in_progress.status, RecordStatus::InProgress);
    }

    #[test]
    fn malformed_fields_default_instead_of_failing() {
        let record = normalize(&doc(
            "rec-1",
            json!({"responses": null, "submittedAt": null, "isComplete": "yes", "professorId": 12}),
        ));
        assert!(record.responses.is_empty());
        assert!(record.submitted_at.is_none());
        assert!(record.is_complete);
        assert_eq!(record.professor_id, "12");
    }

    #[test]
    fn partial_response_lists_keep_usable_items() {
        let record = normalize(&doc(
            "rec-1",
            json!({"responses": [42, {"questionId": "q1", "answer": 4, "type": "rating"}, "junk"]}),
        ));
        assert_eq!(record.responses.len(), 1);
        assert_eq!(record.responses[0].answer, "4");
        assert_eq!(record.responses[0].question_type, QuestionType::Scale);
    }

    #[test]
    fn scale_question_without_options_gets_default_set() {
        let record = normalize(&doc(
            "rec-1",
            json!({"responses": [{"questionId": "q1", "questionType": "scale", "answer": "Agree"}]}),
        ));
        assert_eq!(record.responses[0].options, DEFAULT_SCALE_OPTIONS.to_vec());
    }

    #[test]
    fn keyed_response_maps_are_accepted() {
        let record = normalize(&doc(
            "rec-1",
            json!({"responses": {"q1": "Agree", "q2": {"answer": "Neutral", "section": "Research"}}}),
        ));
        assert_eq!(record.responses.len(), 2);
        assert_eq!(record.responses[0].question_id, "q1");
        assert_eq!(record.responses[1].section, "Research");
    }

    #[test]
    fn timestamps_accept_common_encodings() {
        let rfc = parse_timestamp(&json!("2026-02-02T10:00:00Z")).unwrap();
        let millis = parse_timestamp(&json!(rfc.timestamp_millis())).unwrap();
        let seconds = parse_timestamp(&json!({"seconds": rfc.timestamp(), "nanoseconds": 0})).unwrap();
        assert_eq!(rfc, millis);
        assert_eq!(rfc, seconds);
    }
}
