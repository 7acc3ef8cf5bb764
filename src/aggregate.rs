//! Per professor, per category rubric scores.
//!
//! Every pass starts from nothing: the same record set always yields the
//! same map, whatever order or duplication the feed delivered it with.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::category;
use crate::feeds::QuestionCatalog;
use crate::models::{
    BucketCounts, Category, EvaluationRecord, ProfessorCategoryAggregate, QuestionType,
    ResponseBucket,
};
use crate::normalize::{is_valid_for_aggregation, DEFAULT_SCALE_OPTIONS};

pub type AggregateKey = (String, Category);
pub type AggregateMap = BTreeMap<AggregateKey, ProfessorCategoryAggregate>;

#[derive(Default)]
struct Accumulator {
    professor_name: String,
    department_name: String,
    counts: BucketCounts,
    respondents: BTreeSet<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassStats {
    pub records: usize,
    pub duplicates: usize,
    pub skipped_invalid: usize,
    pub unmatched_responses: usize,
    pub unrecognized_answers: usize,
}

pub fn aggregate(records: &[EvaluationRecord], catalog: &QuestionCatalog) -> AggregateMap {
    aggregate_with_stats(records, catalog).0
}

pub fn aggregate_with_stats(
    records: &[EvaluationRecord],
    catalog: &QuestionCatalog,
) -> (AggregateMap, PassStats) {
    let mut stats = PassStats {
        records: records.len(),
        ..PassStats::default()
    };
    let unique = dedupe_by_id(records);
    stats.duplicates = records.len() - unique.len();

    let mut accumulators: BTreeMap<AggregateKey, Accumulator> = BTreeMap::new();

    for record in unique.values() {
        if !is_valid_for_aggregation(record) || record.professor_id.is_empty() {
            stats.skipped_invalid += 1;
            continue;
        }

        for item in &record.responses {
            let meta = catalog.lookup(&item.question_id, &item.question_text);
            let question_type = meta.map_or(item.question_type, |m| m.question_type);
            if question_type != QuestionType::Scale {
                continue;
            }

            let section = meta
                .map(|m| m.section.as_str())
                .filter(|s| !s.is_empty())
                .unwrap_or(item.section.as_str());
            let Some(category) = category::resolve(section) else {
                stats.unmatched_responses += 1;
                continue;
            };

            let options: Vec<String> = if !item.options.is_empty() {
                item.options.clone()
            } else if let Some(m) = meta.filter(|m| !m.options.is_empty()) {
                m.options.clone()
            } else {
                DEFAULT_SCALE_OPTIONS.iter().map(|s| s.to_string()).collect()
            };
            let Some(bucket) = classify_answer(&item.answer, &options) else {
                stats.unrecognized_answers += 1;
                continue;
            };

            let entry = accumulators
                .entry((record.professor_id.clone(), category))
                .or_default();
            if entry.professor_name.is_empty() {
                entry.professor_name = record.professor_name.clone();
            }
            if entry.department_name.is_empty() {
                entry.department_name = record.department_name.clone();
            }
            entry.counts.add(bucket);
            entry.respondents.insert(record.respondent_key.clone());
        }
    }

    let mut aggregates: AggregateMap = accumulators
        .into_iter()
        .map(|((professor_id, category), acc)| {
            let total = acc.counts.total();
            let positive = acc.counts.positive();
            let aggregate = ProfessorCategoryAggregate {
                professor_id: professor_id.clone(),
                professor_name: acc.professor_name,
                department_name: acc.department_name,
                category,
                counts: acc.counts,
                positive_count: positive,
                total_responses: total,
                performance_score: performance_score(positive, total),
                weighted_average: weighted_average(&acc.counts),
                unique_evaluation_count: acc.respondents.len(),
                rank: None,
            };
            ((professor_id, category), aggregate)
        })
        .collect();

    assign_ranks(&mut aggregates);
    debug!(
        records = stats.records,
        duplicates = stats.duplicates,
        skipped = stats.skipped_invalid,
        unmatched = stats.unmatched_responses,
        aggregates = aggregates.len(),
        "aggregation pass complete"
    );
    (aggregates, stats)
}

/// One record per id: latest submission, then the one with more responses,
/// then the greater serialized content so delivery order never decides.
fn dedupe_by_id(records: &[EvaluationRecord]) -> BTreeMap<&str, &EvaluationRecord> {
    let mut unique: BTreeMap<&str, &EvaluationRecord> = BTreeMap::new();
    for record in records {
        unique
            .entry(record.id.as_str())
            .and_modify(|kept| {
                if prefer(record, kept) == Ordering::Greater {
                    *kept = record;
                }
            })
            .or_insert(record);
    }
    unique
}

fn prefer(a: &EvaluationRecord, b: &EvaluationRecord) -> Ordering {
    a.submitted_at
        .cmp(&b.submitted_at)
        .then_with(|| a.responses.len().cmp(&b.responses.len()))
        .then_with(|| content_key(a).cmp(&content_key(b)))
}

fn content_key(record: &EvaluationRecord) -> String {
    serde_json::to_string(record).unwrap_or_default()
}

/// `round(100 * positive / total)`, 0 for an empty pair.
pub fn performance_score(positive: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    let (positive, total) = (u64::from(positive), u64::from(total));
    let score = (200 * positive + total) / (2 * total);
    u32::try_from(score).unwrap_or(u32::MAX)
}

/// 5..1 weighting over the ordered buckets, rounded to two decimals.
pub fn weighted_average(counts: &BucketCounts) -> f64 {
    let total = counts.total();
    if total == 0 {
        return 0.0;
    }
    let weighted: u64 = ResponseBucket::ORDERED
        .iter()
        .map(|b| u64::from(b.weight()) * u64::from(counts.get(*b)))
        .sum();
    (weighted as f64 * 100.0 / f64::from(total)).round() / 100.0
}

const FOUR_POINT: [ResponseBucket; 4] = [
    ResponseBucket::StronglyAgree,
    ResponseBucket::Agree,
    ResponseBucket::Disagree,
    ResponseBucket::StronglyDisagree,
];

/// Map an answer onto a bucket by its label, by a 5..1 numeral, or by its
/// position in a four- or five-choice option set.
pub fn classify_answer(answer: &str, options: &[String]) -> Option<ResponseBucket> {
    let normalized = answer.trim().to_lowercase();
    let by_label = match normalized.as_str() {
        "strongly agree" | "5" => Some(ResponseBucket::StronglyAgree),
        "agree" | "4" => Some(ResponseBucket::Agree),
        "neutral" | "neither agree nor disagree" | "undecided" | "3" => Some(ResponseBucket::Neutral),
        "disagree" | "2" => Some(ResponseBucket::Disagree),
        "strongly disagree" | "1" => Some(ResponseBucket::StronglyDisagree),
        _ => None,
    };
    if by_label.is_some() {
        return by_label;
    }

    let position = options
        .iter()
        .position(|option| option.trim().to_lowercase() == normalized)?;
    match options.len() {
        5 => ResponseBucket::ORDERED.get(position).copied(),
        4 => FOUR_POINT.get(position).copied(),
        _ => None,
    }
}

/// Score descending, then positive count descending. Equal entries keep
/// their incoming order when used with a stable sort.
fn ranking_order(a: &ProfessorCategoryAggregate, b: &ProfessorCategoryAggregate) -> Ordering {
    b.performance_score
        .cmp(&a.performance_score)
        .then_with(|| b.positive_count.cmp(&a.positive_count))
}

fn assign_ranks(aggregates: &mut AggregateMap) {
    for category in Category::ALL {
        let mut ranked: Vec<&ProfessorCategoryAggregate> = aggregates
            .values()
            .filter(|agg| agg.category == category && agg.total_responses > 0)
            .collect();
        ranked.sort_by(|a, b| ranking_order(a, b));
        let keys: Vec<AggregateKey> = ranked
            .iter()
            .map(|agg| (agg.professor_id.clone(), agg.category))
            .collect();
        for (position, key) in keys.iter().enumerate() {
            if let Some(agg) = aggregates.get_mut(key) {
                agg.rank = Some(position + 1);
            }
        }
    }
}

/// Ranked entries for one category; pairs without responses never appear.
pub fn top_n(aggregates: &AggregateMap, category: Category, n: usize) -> Vec<ProfessorCategoryAggregate> {
    let mut ranked: Vec<ProfessorCategoryAggregate> = aggregates
        .values()
        .filter(|agg| agg.category == category && agg.total_responses > 0)
        .cloned()
        .collect();
    ranked.sort_by(ranking_order);
    ranked.truncate(n);
    ranked
}

pub fn rank_all(aggregates: &AggregateMap) -> BTreeMap<Category, Vec<ProfessorCategoryAggregate>> {
    Category::ALL
        .iter()
        .map(|category| (*category, top_n(aggregates, *category, usize::MAX)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RecordStatus, ResponseItem};

    fn response(section: &str, answer: &str) -> ResponseItem {
        ResponseItem {
            question_id: format!("q-{section}-{answer}"),
            question_text: String::new(),
            question_type: QuestionType::Scale,
            answer: answer.to_string(),
            options: DEFAULT_SCALE_OPTIONS.iter().map(|s| s.to_string()).collect(),
            section: section.to_string(),
            session_id: None,
        }
    }

    fn record(id: &str, professor: &str, respondent: &str, responses: Vec<ResponseItem>) -> EvaluationRecord {
        EvaluationRecord {
            id: id.to_string(),
            professor_id: professor.to_string(),
            professor_name: format!("Prof {professor}"),
            department_name: "Computer Science".to_string(),
            status: RecordStatus::Submitted,
            raw_status: "submitted".to_string(),
            is_complete: true,
            respondent_key: respondent.to_string(),
            responses,
            submitted_at: None,
        }
    }

    const IC: &str = "Instructional Competence";

    #[test]
    fn scores_follow_positive_share() {
        let records = vec![
            record("r1", "A", "s1", vec![response(IC, "Strongly Agree")]),
            record("r2", "A", "s2", vec![response(IC, "Agree")]),
            record("r3", "A", "s3", vec![response(IC, "Disagree")]),
        ];
        let aggregates = aggregate(&records, &QuestionCatalog::default());
        let agg = &aggregates[&("A".to_string(), Category::InstructionalCompetence)];
        assert_eq!(agg.positive_count, 2);
        assert_eq!(agg.total_responses, 3);
        assert_eq!(agg.performance_score, 67);
        assert_eq!(agg.weighted_average, 3.67);
        assert_eq!(agg.unique_evaluation_count, 3);
        assert_eq!(agg.rank, Some(1));
    }

    #[test]
    fn same_respondent_counts_once() {
        let records = vec![
            record("r1", "A", "sess-1", vec![response(IC, "Agree")]),
            record("r2", "A", "sess-1", vec![response(IC, "Agree")]),
        ];
        let aggregates = aggregate(&records, &QuestionCatalog::default());
        let agg = &aggregates[&("A".to_string(), Category::InstructionalCompetence)];
        assert_eq!(agg.unique_evaluation_count, 1);
        assert_eq!(agg.total_responses, 2);
    }

    #[test]
    fn invalid_records_and_unmatched_sections_contribute_nothing() {
        let mut pending = record("r1", "A", "s1", vec![response(IC, "Agree")]);
        pending.raw_status = "pending".to_string();
        pending.is_complete = false;
        let unmatched = record("r2", "B", "s2", vec![response("miscellaneous feedback", "Agree")]);

        let (aggregates, stats) = aggregate_with_stats(&[pending, unmatched], &QuestionCatalog::default());
        assert!(aggregates.is_empty());
        assert_eq!(stats.skipped_invalid, 1);
        assert_eq!(stats.unmatched_responses, 1);
    }

    #[test]
    fn duplicate_ids_collapse_to_one_record() {
        let records = vec![
            record("r1", "A", "s1", vec![response(IC, "Agree")]),
            record("r1", "A", "s1", vec![response(IC, "Agree")]),
        ];
        let (aggregates, stats) = aggregate_with_stats(&records, &QuestionCatalog::default());
        assert_eq!(stats.duplicates, 1);
        assert_eq!(aggregates[&("A".to_string(), Category::InstructionalCompetence)].total_responses, 1);
    }

    #[test]
    fn ranking_breaks_score_ties_on_positive_count() {
        let records = vec![
            record("r1", "A", "s1", vec![response(IC, "Agree")]),
            record("r2", "B", "s2", vec![response(IC, "Agree"), response(IC, "Strongly Agree")]),
            record("r3", "C", "s3", vec![response(IC, "Disagree")]),
        ];
        let aggregates = aggregate(&records, &QuestionCatalog::default());
        let ranked = top_n(&aggregates, Category::InstructionalCompetence, 10);
        let order: Vec<_> = ranked.iter().map(|a| a.professor_id.as_str()).collect();
        assert_eq!(order, vec!["B", "A", "C"]);
        assert_eq!(ranked[0].rank, Some(1));
        assert_eq!(ranked[2].rank, Some(3));
        assert_eq!(top_n(&aggregates, Category::InstructionalCompetence, 1).len(), 1);
        assert!(top_n(&aggregates, Category::Research, 10).is_empty());
    }

    #[test]
    fn classify_answer_by_label_numeral_and_position() {
        let five: Vec<String> = ["Excellent", "Very Good", "Good", "Fair", "Poor"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(classify_answer(" STRONGLY agree ", &[]), Some(ResponseBucket::StronglyAgree));
        assert_eq!(classify_answer("2", &[]), Some(ResponseBucket::Disagree));
        assert_eq!(classify_answer("very good", &five), Some(ResponseBucket::Agree));
        assert_eq!(classify_answer("Poor", &five), Some(ResponseBucket::StronglyDisagree));
        assert_eq!(classify_answer("maybe", &five), None);
    }

    #[test]
    fn free_text_responses_are_ignored() {
        let mut comment = response(IC, "Great lecturer");
        comment.question_type = QuestionType::FreeText;
        let aggregates = aggregate(&[record("r1", "A", "s1", vec![comment])], &QuestionCatalog::default());
        assert!(aggregates.is_empty());
    }

    #[test]
    fn performance_score_rounds_half_up() {
        assert_eq!(performance_score(0, 0), 0);
        assert_eq!(performance_score(1, 2), 50);
        assert_eq!(performance_score(1, 8), 13);
        assert_eq!(performance_score(2, 3), 67);
        assert_eq!(performance_score(30_000_000, 40_000_000), 75);
        assert_eq!(performance_score(u32::MAX, u32::MAX), 100);
    }

    #[test]
    fn conflicting_duplicates_resolve_the_same_in_any_order() {
        let agree = record("r1", "A", "s1", vec![response(IC, "Agree")]);
        let disagree = record("r1", "A", "s1", vec![response(IC, "Disagree")]);
        let key = ("A".to_string(), Category::InstructionalCompetence);

        let forward = aggregate(&[agree.clone(), disagree.clone()], &QuestionCatalog::default());
        let backward = aggregate(&[disagree, agree], &QuestionCatalog::default());
        assert_eq!(forward, backward);
        assert_eq!(forward[&key].total_responses, 1);
    }
}
