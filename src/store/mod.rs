//! Persistence collaborators: result rows, rank history and aggregates.

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    NewResult, PerformanceAggregate, RankSnapshot, ResultPatch, ResultUpdate, ScoredRow, Student,
    StoredResult,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RowOrder {
    #[default]
    Inserted,
    DateAscending,
    DateDescending,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultFilter {
    pub student_id: Option<String>,
    pub subject: Option<String>,
    pub test_name: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub order: RowOrder,
}

impl ResultFilter {
    pub fn for_test(subject: &str, test_name: &str) -> Self {
        Self {
            subject: Some(subject.to_string()),
            test_name: Some(test_name.to_string()),
            ..Self::default()
        }
    }

    pub fn for_student(student_id: &str, subject: Option<&str>) -> Self {
        Self {
            student_id: Some(student_id.to_string()),
            subject: subject.map(str::to_string),
            order: RowOrder::DateAscending,
            ..Self::default()
        }
    }

    pub fn matches(&self, row: &ScoredRow) -> bool {
        self.student_id.as_ref().map_or(true, |id| *id == row.student_id)
            && self.subject.as_ref().map_or(true, |s| *s == row.subject)
            && self.test_name.as_ref().map_or(true, |t| *t == row.test_name)
            && self.from.map_or(true, |from| row.date >= from)
            && self.to.map_or(true, |to| row.date <= to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryQuery {
    /// Every snapshot of one test, ordered by rank.
    Test { subject: String, test_name: String },
    /// One student's snapshots, ordered by date ascending.
    Student {
        student_id: String,
        subject: Option<String>,
    },
}

/// Reads and derived-state writes used by the leaderboard and performance flows.
#[async_trait]
pub trait ResultSource: Send + Sync {
    async fn find_scored_rows(&self, filter: &ResultFilter) -> Result<Vec<ScoredRow>, StoreError>;

    /// Most recent test of `subject` dated strictly before `before`.
    async fn find_previous_test(
        &self,
        subject: &str,
        before: NaiveDate,
    ) -> Result<Option<String>, StoreError>;

    async fn read_rank_history(&self, query: &HistoryQuery)
        -> Result<Vec<RankSnapshot>, StoreError>;

    /// Replaces the whole snapshot set of one test as a single unit.
    async fn replace_rank_history(
        &self,
        subject: &str,
        test_name: &str,
        snapshots: Vec<RankSnapshot>,
    ) -> Result<(), StoreError>;

    async fn delete_rank_history(&self, subject: &str, test_name: &str)
        -> Result<u64, StoreError>;

    async fn upsert_performance_aggregate(
        &self,
        student_id: &str,
        subject: &str,
        aggregate: &PerformanceAggregate,
    ) -> Result<(), StoreError>;
}

/// Write path for raw result and student records.
#[async_trait]
pub trait ResultWriter: Send + Sync {
    async fn insert_result(&self, result: NewResult) -> Result<StoredResult, StoreError>;

    async fn update_result(
        &self,
        id: Uuid,
        patch: &ResultPatch,
    ) -> Result<Option<ResultUpdate>, StoreError>;

    async fn delete_result(&self, id: Uuid) -> Result<Option<StoredResult>, StoreError>;

    async fn list_results(
        &self,
        filter: &ResultFilter,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<StoredResult>, usize), StoreError>;

    async fn upsert_student(&self, student: &Student) -> Result<(), StoreError>;

    /// Returns false when no such student exists.
    async fn rename_student(&self, student_id: &str, name: &str) -> Result<bool, StoreError>;

    async fn delete_student(&self, student_id: &str) -> Result<bool, StoreError>;
}
