//! Live ranking board: four resilient feeds in, one published snapshot out.
//!
//! Whenever any feed delivers, the board is rebuilt from the latest copy of
//! every feed and swapped in whole. Readers only ever see a complete snapshot
//! (or the empty initial one), never a partially updated board.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::aggregate::{self, AggregateMap, PassStats};
use crate::config::Config;
use crate::feeds::{self, ProfessorProfile, QuestionCatalog};
use crate::models::{Category, EvaluationRecord, Participation, ProfessorCategoryAggregate};
use crate::normalize::{is_valid_for_aggregation, normalize};
use crate::store::{CollectionQuery, DocumentStore, Snapshot, StoreError};
use crate::subscription::{self, read_once, Subscription, SubscriptionHandle, SubscriptionSettings};

#[derive(Debug, Clone, Default)]
pub struct RankingSnapshot {
    pub aggregates: AggregateMap,
    pub evaluation_count: usize,
    pub participation: Participation,
    pub stats: PassStats,
    /// `None` until the first evaluation snapshot has arrived.
    pub computed_at: Option<DateTime<Utc>>,
}

impl RankingSnapshot {
    pub fn compute(
        records: &[EvaluationRecord],
        catalog: &QuestionCatalog,
        roster: &HashMap<String, ProfessorProfile>,
        enrolled_students: usize,
    ) -> Self {
        let (mut aggregates, stats) = aggregate::aggregate_with_stats(records, catalog);
        for agg in aggregates.values_mut() {
            if let Some(profile) = roster.get(&agg.professor_id) {
                if agg.professor_name.is_empty() {
                    agg.professor_name = profile.name.clone();
                }
                if agg.department_name.is_empty() {
                    agg.department_name = profile.department.clone();
                }
            }
        }

        let distinct_respondents = records
            .iter()
            .filter(|r| is_valid_for_aggregation(r))
            .map(|r| r.respondent_key.as_str())
            .collect::<BTreeSet<_>>()
            .len();

        Self {
            aggregates,
            evaluation_count: records.len(),
            participation: Participation {
                distinct_respondents,
                enrolled_students,
            },
            stats,
            computed_at: Some(Utc::now()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.computed_at.is_some()
    }

    pub fn ranked_professors(&self, category: Category, limit: usize) -> Vec<ProfessorCategoryAggregate> {
        aggregate::top_n(&self.aggregates, category, limit)
    }

    pub fn all_categories(&self) -> BTreeMap<Category, Vec<ProfessorCategoryAggregate>> {
        aggregate::rank_all(&self.aggregates)
    }
}

/// Cloneable read side of the board; safe to share across tasks.
#[derive(Clone)]
pub struct RankingBoard {
    rx: watch::Receiver<Arc<RankingSnapshot>>,
}

impl RankingBoard {
    pub fn snapshot(&self) -> Arc<RankingSnapshot> {
        self.rx.borrow().clone()
    }

    pub fn ranked_professors(&self, category: Category, limit: usize) -> Vec<ProfessorCategoryAggregate> {
        self.snapshot().ranked_professors(category, limit)
    }

    pub fn all_categories(&self) -> BTreeMap<Category, Vec<ProfessorCategoryAggregate>> {
        self.snapshot().all_categories()
    }

    /// Wait for the next published snapshot. `false` once the board stopped.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

#[derive(Default)]
struct FeedState {
    records: Option<Vec<EvaluationRecord>>,
    catalog: QuestionCatalog,
    roster: HashMap<String, ProfessorProfile>,
    enrolled_students: usize,
}

impl FeedState {
    fn rebuild(&self) -> Option<RankingSnapshot> {
        let records = self.records.as_ref()?;
        Some(RankingSnapshot::compute(
            records,
            &self.catalog,
            &self.roster,
            self.enrolled_students,
        ))
    }
}

pub struct LiveRankings {
    board: RankingBoard,
    errors: mpsc::UnboundedReceiver<StoreError>,
    handles: Vec<SubscriptionHandle>,
    driver: JoinHandle<()>,
}

impl LiveRankings {
    /// Open the four feeds and start publishing. Needs a tokio runtime.
    pub fn start(store: Arc<dyn DocumentStore>, config: &Config, department: Option<&str>) -> Self {
        let settings = SubscriptionSettings::from(config);
        let evaluations = subscription::subscribe(
            store.clone(),
            feeds::evaluations_query(department),
            settings,
        );
        let questions = subscription::subscribe(store.clone(), feeds::questions_query(), settings);
        let professors = subscription::subscribe(
            store.clone(),
            feeds::professors_query(department),
            settings,
        );
        let students = subscription::subscribe(store, feeds::students_query(department), settings);

        let handles = vec![
            evaluations.handle.clone(),
            questions.handle.clone(),
            professors.handle.clone(),
            students.handle.clone(),
        ];
        let (board_tx, board_rx) = watch::channel(Arc::new(RankingSnapshot::default()));
        let (errors_tx, errors) = mpsc::unbounded_channel();

        info!(department = department.unwrap_or("all"), "live rankings started");
        let driver = tokio::spawn(drive(
            Feeds {
                evaluations,
                questions,
                professors,
                students,
            },
            board_tx,
            errors_tx,
        ));

        Self {
            board: RankingBoard { rx: board_rx },
            errors,
            handles,
            driver,
        }
    }

    pub fn board(&self) -> RankingBoard {
        self.board.clone()
    }

    pub fn snapshot(&self) -> Arc<RankingSnapshot> {
        self.board.snapshot()
    }

    pub fn ranked_professors(&self, category: Category, limit: usize) -> Vec<ProfessorCategoryAggregate> {
        self.board.ranked_professors(category, limit)
    }

    pub fn all_categories(&self) -> BTreeMap<Category, Vec<ProfessorCategoryAggregate>> {
        self.board.all_categories()
    }

    /// Next store error surfaced by any feed.
    pub async fn next_error(&mut self) -> Option<StoreError> {
        self.errors.recv().await
    }

    pub fn try_next_error(&mut self) -> Option<StoreError> {
        self.errors.try_recv().ok()
    }

    /// Cancel every feed and wait for the driver to wind down.
    pub async fn shutdown(self) {
        for handle in &self.handles {
            handle.cancel();
        }
        if let Err(err) = self.driver.await {
            warn!(error = %err, "ranking driver ended abnormally");
        }
        info!("live rankings stopped");
    }
}

struct Feeds {
    evaluations: Subscription,
    questions: Subscription,
    professors: Subscription,
    students: Subscription,
}

async fn drive(
    mut feeds: Feeds,
    board: watch::Sender<Arc<RankingSnapshot>>,
    errors: mpsc::UnboundedSender<StoreError>,
) {
    let mut state = FeedState::default();

    loop {
        tokio::select! {
            Some(snapshot) = feeds.evaluations.results.recv() => {
                state.records = Some(snapshot.iter().map(normalize).collect());
            }
            Some(snapshot) = feeds.questions.results.recv() => {
                state.catalog = QuestionCatalog::from_snapshot(&snapshot);
            }
            Some(snapshot) = feeds.professors.results.recv() => {
                state.roster = feeds::professor_roster(&snapshot);
            }
            Some(snapshot) = feeds.students.results.recv() => {
                state.enrolled_students = feeds::enrolled_student_count(&snapshot);
            }
            Some(err) = feeds.evaluations.errors.recv() => { let _ = errors.send(err); continue; }
            Some(err) = feeds.questions.errors.recv() => { let _ = errors.send(err); continue; }
            Some(err) = feeds.professors.errors.recv() => { let _ = errors.send(err); continue; }
            Some(err) = feeds.students.errors.recv() => { let _ = errors.send(err); continue; }
            else => break,
        }

        if let Some(snapshot) = state.rebuild() {
            debug!(
                evaluations = snapshot.evaluation_count,
                aggregates = snapshot.aggregates.len(),
                "publishing ranking snapshot"
            );
            board.send_replace(Arc::new(snapshot));
        }
    }
    debug!("ranking driver exited");
}

/// One-shot board built from single reads of every feed.
///
/// Only the evaluation read is required; side collections that cannot be
/// read degrade to empty.
pub async fn load_once(
    store: &dyn DocumentStore,
    settings: &SubscriptionSettings,
    department: Option<&str>,
) -> Result<RankingSnapshot, StoreError> {
    let evaluations = read_once(store, &feeds::evaluations_query(department), settings).await?;
    let questions = read_side(store, &feeds::questions_query(), settings).await;
    let professors = read_side(store, &feeds::professors_query(department), settings).await;
    let students = read_side(store, &feeds::students_query(department), settings).await;

    let records: Vec<EvaluationRecord> = evaluations.iter().map(normalize).collect();
    Ok(RankingSnapshot::compute(
        &records,
        &QuestionCatalog::from_snapshot(&questions),
        &feeds::professor_roster(&professors),
        feeds::enrolled_student_count(&students),
    ))
}

async fn read_side(
    store: &dyn DocumentStore,
    query: &CollectionQuery,
    settings: &SubscriptionSettings,
) -> Snapshot {
    match read_once(store, query, settings).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(collection = %query.collection, error = %err, "side collection unavailable");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use serde_json::json;

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.upsert("professors", "p-1", json!({"name": "Dr. Ada Byron", "department": "CS"}));
        store.upsert("students", "s-1", json!({"name": "Avery"}));
        store.upsert("students", "s-2", json!({"name": "Jules"}));
        store.upsert(
            "questions",
            "q-1",
            json!({"text": "Explains clearly", "section": "a. Instructional Competence", "type": "scale", "order": 1}),
        );
        store.upsert(
            "evaluations",
            "e-1",
            json!({
                "professorId": "p-1",
                "status": "submitted",
                "studentId": "s-1",
                "submittedAt": "2026-02-02T10:00:00Z",
                "responses": [{"questionId": "q-1", "answer": "Agree"}]
            }),
        );
        store
    }

    #[tokio::test(start_paused = true)]
    async fn load_once_fills_names_from_roster() {
        let store = seeded();
        let snapshot = load_once(&store, &SubscriptionSettings::default(), None)
            .await
            .unwrap();
        let ranked = snapshot.ranked_professors(Category::InstructionalCompetence, 5);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].professor_name, "Dr. Ada Byron");
        assert_eq!(ranked[0].department_name, "CS");
        assert_eq!(snapshot.participation.enrolled_students, 2);
        assert_eq!(snapshot.participation.distinct_respondents, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn live_board_republishes_on_new_submissions() {
        let store = seeded();
        store.ensure_index("evaluations", "submittedAt");
        let live = LiveRankings::start(Arc::new(store.clone()), &Config::default(), None);
        let mut board = live.board();

        while board
            .ranked_professors(Category::InstructionalCompetence, 5)
            .is_empty()
        {
            assert!(board.changed().await);
        }

        store.upsert(
            "evaluations",
            "e-2",
            json!({
                "professorId": "p-1",
                "isComplete": true,
                "studentEmail": "jules@example.com",
                "submittedAt": "2026-02-03T10:00:00Z",
                "responses": [{"questionId": "q-1", "answer": "Disagree"}]
            }),
        );
        loop {
            let ranked = board.ranked_professors(Category::InstructionalCompetence, 5);
            if ranked[0].total_responses == 2 {
                assert_eq!(ranked[0].performance_score, 50);
                assert_eq!(ranked[0].unique_evaluation_count, 2);
                break;
            }
            assert!(board.changed().await);
        }

        assert!(live.all_categories()[&Category::Research].is_empty());
        live.shutdown().await;
    }
}
