use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Submitted,
    Pending,
    InProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Scale,
    FreeText,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseItem {
    pub question_id: String,
    pub question_text: String,
    pub question_type: QuestionType,
    pub answer: String,
    pub options: Vec<String>,
    pub section: String,
    pub session_id: Option<String>,
}

/// One submitted evaluation of one professor by one respondent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationRecord {
    pub id: String,
    pub professor_id: String,
    pub professor_name: String,
    pub department_name: String,
    pub status: RecordStatus,
    /// Status text as the producer wrote it; validity is judged on this.
    pub raw_status: String,
    pub is_complete: bool,
    pub respondent_key: String,
    pub responses: Vec<ResponseItem>,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// The five canonical rubric categories used for ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    InstructionalCompetence,
    ClassroomManagement,
    Research,
    StudentSupportAndDevelopment,
    ProfessionalismAndPersonalQualities,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::InstructionalCompetence,
        Category::ClassroomManagement,
        Category::Research,
        Category::StudentSupportAndDevelopment,
        Category::ProfessionalismAndPersonalQualities,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Category::InstructionalCompetence => "Instructional Competence",
            Category::ClassroomManagement => "Classroom Management",
            Category::Research => "Research",
            Category::StudentSupportAndDevelopment => "Student Support & Development",
            Category::ProfessionalismAndPersonalQualities => "Professionalism & Personal Qualities",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Ordered rubric response buckets, most favorable first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResponseBucket {
    StronglyAgree,
    Agree,
    Neutral,
    Disagree,
    StronglyDisagree,
}

impl ResponseBucket {
    pub const ORDERED: [ResponseBucket; 5] = [
        ResponseBucket::StronglyAgree,
        ResponseBucket::Agree,
        ResponseBucket::Neutral,
        ResponseBucket::Disagree,
        ResponseBucket::StronglyDisagree,
    ];

    pub fn weight(self) -> u32 {
        match self {
            ResponseBucket::StronglyAgree => 5,
            ResponseBucket::Agree => 4,
            ResponseBucket::Neutral => 3,
            ResponseBucket::Disagree => 2,
            ResponseBucket::StronglyDisagree => 1,
        }
    }

    pub fn is_positive(self) -> bool {
        matches!(self, ResponseBucket::StronglyAgree | ResponseBucket::Agree)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BucketCounts {
    pub strongly_agree: u32,
    pub agree: u32,
    pub neutral: u32,
    pub disagree: u32,
    pub strongly_disagree: u32,
}

impl BucketCounts {
    pub fn add(&mut self, bucket: ResponseBucket) {
        let slot = match bucket {
            ResponseBucket::StronglyAgree => &mut self.strongly_agree,
            ResponseBucket::Agree => &mut self.agree,
            ResponseBucket::Neutral => &mut self.neutral,
            ResponseBucket::Disagree => &mut self.disagree,
            ResponseBucket::StronglyDisagree => &mut self.strongly_disagree,
        };
        *slot += 1;
    }

    pub fn get(&self, bucket: ResponseBucket) -> u32 {
        match bucket {
            ResponseBucket::StronglyAgree => self.strongly_agree,
            ResponseBucket::Agree => self.agree,
            ResponseBucket::Neutral => self.neutral,
            ResponseBucket::Disagree => self.disagree,
            ResponseBucket::StronglyDisagree => self.strongly_disagree,
        }
    }

    pub fn total(&self) -> u32 {
        ResponseBucket::ORDERED.iter().map(|b| self.get(*b)).sum()
    }

    pub fn positive(&self) -> u32 {
        ResponseBucket::ORDERED
            .iter()
            .filter(|b| b.is_positive())
            .map(|b| self.get(*b))
            .sum()
    }
}

/// Per professor, per category result of one aggregation pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfessorCategoryAggregate {
    pub professor_id: String,
    pub professor_name: String,
    pub department_name: String,
    pub category: Category,
    pub counts: BucketCounts,
    pub positive_count: u32,
    pub total_responses: u32,
    pub performance_score: u32,
    pub weighted_average: f64,
    pub unique_evaluation_count: usize,
    /// 1-based position within the category; `None` when never ranked.
    pub rank: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Participation {
    pub distinct_respondents: usize,
    pub enrolled_students: usize,
}
