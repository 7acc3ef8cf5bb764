//! Maps free-text rubric section labels onto the canonical categories.
//!
//! Labels arrive from hand-authored imports ("b. classroom management",
//! "INSTRUCTIONAL COMPETENCE (40%)", "Student Development") so matching is
//! keyword based and case-insensitive. A category matches when every keyword
//! group of one of its rules has at least one hit in the label.

use crate::models::Category;

type Rule = &'static [&'static [&'static str]];

const RULES: [(Category, &[Rule]); 5] = [
    (
        Category::InstructionalCompetence,
        &[&[&["instructional", "instruction"], &["competence", "competency"]]],
    ),
    (
        Category::ClassroomManagement,
        &[&[&["classroom"], &["management", "managing"]]],
    ),
    (Category::Research, &[&[&["research"]]]),
    (
        Category::StudentSupportAndDevelopment,
        &[&[&["student"], &["support", "development"]]],
    ),
    (
        Category::ProfessionalismAndPersonalQualities,
        &[&[&["professionalism"]], &[&["personal"], &["qualities", "quality"]]],
    ),
];

/// Resolve a section label. `None` is the unmatched bucket.
pub fn resolve(label: &str) -> Option<Category> {
    let label = label.to_lowercase();
    RULES.iter().find_map(|(category, rules)| {
        rules
            .iter()
            .any(|groups| {
                groups
                    .iter()
                    .all(|alternatives| alternatives.iter().any(|kw| label.contains(kw)))
            })
            .then_some(*category)
    })
}
