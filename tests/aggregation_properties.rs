//! Whole-pipeline properties: raw documents through normalization and
//! aggregation to ranked output.

use serde_json::{json, Value};

use evaluation_live_rankings::aggregate::{aggregate, rank_all, top_n, AggregateMap};
use evaluation_live_rankings::category;
use evaluation_live_rankings::feeds::{QuestionCatalog, QuestionMeta};
use evaluation_live_rankings::models::{Category, EvaluationRecord, QuestionType};
use evaluation_live_rankings::normalize::normalize;
use evaluation_live_rankings::store::RawDocument;

fn evaluation(id: &str, professor: &str, identity: Value, status: &str, complete: bool, answers: &[(&str, &str)]) -> RawDocument {
    let responses: Vec<Value> = answers
        .iter()
        .map(|(question_id, answer)| json!({"questionId": question_id, "questionType": "scale", "answer": answer}))
        .collect();
    let mut data = json!({
        "professorId": professor,
        "professorName": format!("Prof {professor}"),
        "departmentName": "Computer Science",
        "status": status,
        "isComplete": complete,
        "responses": responses,
    });
    if let (Value::Object(target), Value::Object(extra)) = (&mut data, identity) {
        target.extend(extra);
    }
    RawDocument::new(id, data)
}

fn catalog() -> QuestionCatalog {
    let question = |id: &str, section: &str| QuestionMeta {
        id: id.to_string(),
        text: format!("question {id}"),
        section: section.to_string(),
        question_type: QuestionType::Scale,
        options: Vec::new(),
    };
    QuestionCatalog::from_questions([
        question("ic-1", "A. Instructional Competence"),
        question("ic-2", "a. instructional competence"),
        question("cm-1", "b. classroom management"),
        question("rs-1", "C. Research"),
        question("misc", "miscellaneous feedback"),
    ])
}

fn run(docs: &[RawDocument]) -> AggregateMap {
    let records: Vec<EvaluationRecord> = docs.iter().map(normalize).collect();
    aggregate(&records, &catalog())
}

fn key(professor: &str, category: Category) -> (String, Category) {
    (professor.to_string(), category)
}

fn sample() -> Vec<RawDocument> {
    vec![
        evaluation("e-1", "A", json!({"studentId": "s-1"}), "submitted", true, &[("ic-1", "Strongly Agree"), ("cm-1", "Agree")]),
        evaluation("e-2", "A", json!({"studentEmail": "S2@uni.edu"}), "pending", true, &[("ic-1", "Disagree"), ("rs-1", "Neutral")]),
        evaluation("e-3", "B", json!({"studentId": "s-1"}), "submitted", false, &[("ic-1", "Agree"), ("ic-2", "Agree")]),
        evaluation("e-4", "B", json!({}), "pending", false, &[("ic-1", "Strongly Disagree")]),
        evaluation("e-5", "C", json!({"studentId": "s-9"}), "Submitted", true, &[("ic-2", "Strongly Agree"), ("misc", "Agree")]),
        evaluation("e-3", "B", json!({"studentId": "s-1"}), "submitted", false, &[("ic-1", "Agree"), ("ic-2", "Agree")]),
        // Same id, same timestamp, same size, different answer.
        evaluation("e-6", "D", json!({"studentId": "s-4"}), "submitted", true, &[("cm-1", "Agree")]),
        evaluation("e-6", "D", json!({"studentId": "s-4"}), "submitted", true, &[("cm-1", "Strongly Disagree")]),
    ]
}

#[test]
fn aggregation_is_independent_of_delivery_order() {
    let docs = sample();
    let baseline = run(&docs);
    let baseline_json = serde_json::to_string(&baseline.values().collect::<Vec<_>>()).unwrap();

    for shift in 0..docs.len() {
        let mut rotated = docs.clone();
        rotated.rotate_left(shift);
        assert_eq!(run(&rotated), baseline, "rotation {shift}");

        rotated.reverse();
        let reversed = run(&rotated);
        assert_eq!(reversed, baseline, "reversed rotation {shift}");
        let reversed_json = serde_json::to_string(&reversed.values().collect::<Vec<_>>()).unwrap();
        assert_eq!(reversed_json, baseline_json);
    }
    assert_eq!(baseline[&key("D", Category::ClassroomManagement)].total_responses, 1);
}

#[test]
fn respondent_answering_twice_counts_once() {
    let docs = vec![
        evaluation("e-1", "A", json!({"studentId": "s-1"}), "submitted", true, &[("ic-1", "Agree")]),
        evaluation("e-2", "A", json!({"studentId": "s-1"}), "submitted", true, &[("ic-2", "Agree")]),
    ];
    let aggregates = run(&docs);
    let agg = &aggregates[&key("A", Category::InstructionalCompetence)];
    assert_eq!(agg.total_responses, 2);
    assert_eq!(agg.unique_evaluation_count, 1);
}

#[test]
fn validity_accepts_either_completion_signal() {
    let aggregates = run(&sample());
    // e-2 is pending but complete, e-3 submitted but incomplete, e-4 neither.
    assert!(aggregates.contains_key(&key("A", Category::Research)));
    let b = &aggregates[&key("B", Category::InstructionalCompetence)];
    assert_eq!(b.total_responses, 2);
    assert_eq!(b.counts.strongly_disagree, 0);
}

#[test]
fn pairs_without_scale_responses_never_rank() {
    let aggregates = run(&sample());
    assert!(top_n(&aggregates, Category::ProfessionalismAndPersonalQualities, 10).is_empty());
    let research: Vec<_> = top_n(&aggregates, Category::Research, 10)
        .into_iter()
        .map(|a| a.professor_id)
        .collect();
    assert_eq!(research, vec!["A".to_string()]);
    assert!(rank_all(&aggregates)[&Category::StudentSupportAndDevelopment].is_empty());
}

#[test]
fn three_answer_scenario_scores_sixty_seven() {
    let docs = vec![
        evaluation("e-1", "A", json!({"studentId": "s-1"}), "submitted", true, &[("ic-1", "Strongly Agree")]),
        evaluation("e-2", "A", json!({"studentId": "s-2"}), "submitted", true, &[("ic-1", "Agree")]),
        evaluation("e-3", "A", json!({"studentId": "s-3"}), "submitted", true, &[("ic-1", "Disagree")]),
    ];
    let aggregates = run(&docs);
    let agg = &aggregates[&key("A", Category::InstructionalCompetence)];
    assert_eq!((agg.positive_count, agg.total_responses, agg.performance_score), (2, 3, 67));
}

#[test]
fn unmatched_sections_stay_out_of_every_category() {
    let aggregates = run(&sample());
    let c: Vec<_> = aggregates.keys().filter(|(p, _)| p == "C").collect();
    assert_eq!(c, vec![&key("C", Category::InstructionalCompetence)]);
    assert_eq!(aggregates[&key("C", Category::InstructionalCompetence)].total_responses, 1);
}

#[test]
fn section_labels_resolve_as_documented() {
    assert_eq!(category::resolve("b. classroom management"), Some(Category::ClassroomManagement));
    assert_eq!(category::resolve("miscellaneous feedback"), None);
}

#[test]
fn question_text_lookup_backs_up_missing_ids() {
    let doc = RawDocument::new(
        "e-1",
        json!({
            "professorId": "A",
            "status": "submitted",
            "responses": [{"questionId": "renamed", "questionText": "Question RS-1", "type": "scale", "answer": "Agree"}]
        }),
    );
    let aggregates = run(&[doc]);
    assert!(aggregates.contains_key(&key("A", Category::Research)));
}
