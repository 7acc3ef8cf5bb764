use std::fmt::Write;

use crate::models::Category;
use crate::rankings::RankingSnapshot;

pub fn build_leaderboard(
    department: Option<&str>,
    snapshot: &RankingSnapshot,
    categories: &[Category],
    limit: usize,
) -> String {
    let mut output = String::new();
    let scope = department.unwrap_or("all departments");

    let _ = writeln!(output, "# Faculty Evaluation Rankings");
    match snapshot.computed_at {
        Some(at) => {
            let _ = writeln!(
                output,
                "Generated for {} from {} evaluations at {}",
                scope,
                snapshot.evaluation_count,
                at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        None => {
            let _ = writeln!(output, "Waiting for the first evaluation snapshot ({scope}).");
            return output;
        }
    }
    let participation = snapshot.participation;
    if participation.enrolled_students > 0 {
        let _ = writeln!(
            output,
            "Participation: {} of {} students ({:.0}%)",
            participation.distinct_respondents,
            participation.enrolled_students,
            100.0 * participation.distinct_respondents as f64 / participation.enrolled_students as f64
        );
    } else {
        let _ = writeln!(
            output,
            "Participation: {} distinct evaluators",
            participation.distinct_respondents
        );
    }

    for category in categories {
        let _ = writeln!(output);
        let _ = writeln!(output, "## {category}");
        let ranked = snapshot.ranked_professors(*category, limit);
        if ranked.is_empty() {
            let _ = writeln!(output, "No rated responses in this category yet.");
            continue;
        }
        for entry in ranked {
            let name = if entry.professor_name.is_empty() {
                entry.professor_id.as_str()
            } else {
                entry.professor_name.as_str()
            };
            let _ = writeln!(
                output,
                "{}. {} ({}) score {}% [{}/{} positive] avg {:.2} from {} evaluators",
                entry.rank.unwrap_or(0),
                name,
                entry.department_name,
                entry.performance_score,
                entry.positive_count,
                entry.total_responses,
                entry.weighted_average,
                entry.unique_evaluation_count
            );
        }
    }

    if snapshot.stats.unmatched_responses > 0 {
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "{} responses had section labels outside the rubric categories.",
            snapshot.stats.unmatched_responses
        );
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::QuestionCatalog;
    use crate::normalize::normalize;
    use crate::store::RawDocument;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn empty_board_says_it_is_waiting() {
        let text = build_leaderboard(None, &RankingSnapshot::default(), &Category::ALL, 5);
        assert!(text.contains("Waiting for the first evaluation snapshot"));
    }

    #[test]
    fn lists_ranked_professors_per_category() {
        let records = vec![normalize(&RawDocument::new(
            "e-1",
            json!({
                "professorId": "p-1",
                "professorName": "Dr. Kiara Patel",
                "departmentName": "Physics",
                "status": "submitted",
                "responses": [
                    {"questionId": "q1", "type": "scale", "section": "C. Research", "answer": "Strongly Agree"},
                    {"questionId": "q2", "type": "scale", "section": "Other remarks", "answer": "Agree"}
                ]
            }),
        ))];
        let snapshot = RankingSnapshot::compute(&records, &QuestionCatalog::default(), &HashMap::new(), 4);
        let text = build_leaderboard(Some("Physics"), &snapshot, &Category::ALL, 5);

        assert!(text.contains("## Research"));
        assert!(text.contains("1. Dr. Kiara Patel (Physics) score 100% [1/1 positive] avg 5.00 from 1 evaluators"));
        assert!(text.contains("Participation: 1 of 4 students (25%)"));
        assert!(text.contains("1 responses had section labels outside the rubric categories."));
    }
}
