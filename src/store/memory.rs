//! In-process store with switchable failures, used by tests and dry runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{HistoryQuery, ResultFilter, ResultSource, ResultWriter, RowOrder};
use crate::error::StoreError;
use crate::models::{
    NewResult, PerformanceAggregate, RankSnapshot, ResultPatch, ResultUpdate, ScoredRow, Student,
    StoredResult,
};

type TestKey = (String, String);

#[derive(Default)]
pub struct MemoryStore {
    results: RwLock<Vec<StoredResult>>,
    students: RwLock<HashMap<String, Student>>,
    history: RwLock<HashMap<TestKey, Vec<RankSnapshot>>>,
    aggregates: RwLock<HashMap<TestKey, PerformanceAggregate>>,
    fail_reads: AtomicBool,
    fail_history_writes: AtomicBool,
    fail_aggregate_writes: AtomicBool,
    row_fetches: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_history_writes(&self, fail: bool) {
        self.fail_history_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_aggregate_writes(&self, fail: bool) {
        self.fail_aggregate_writes.store(fail, Ordering::SeqCst);
    }

    /// How many times `find_scored_rows` has been served.
    pub fn row_fetches(&self) -> usize {
        self.row_fetches.load(Ordering::SeqCst)
    }

    pub fn row_count(&self) -> usize {
        self.results.read().len()
    }

    pub fn snapshots(&self, subject: &str, test_name: &str) -> Vec<RankSnapshot> {
        self.history
            .read()
            .get(&(subject.to_string(), test_name.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn aggregate(&self, student_id: &str, subject: &str) -> Option<PerformanceAggregate> {
        self.aggregates
            .read()
            .get(&(student_id.to_string(), subject.to_string()))
            .cloned()
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store reads disabled".to_string()));
        }
        Ok(())
    }

    fn check_history_writes(&self) -> Result<(), StoreError> {
        if self.fail_history_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "memory store history writes disabled".to_string(),
            ));
        }
        Ok(())
    }

    fn filtered(&self, filter: &ResultFilter) -> Vec<StoredResult> {
        let mut rows: Vec<StoredResult> = self
            .results
            .read()
            .iter()
            .filter(|stored| filter.matches(&stored.row))
            .cloned()
            .collect();

        match filter.order {
            RowOrder::Inserted => {}
            RowOrder::DateAscending => rows.sort_by(|a, b| a.row.date.cmp(&b.row.date)),
            RowOrder::DateDescending => rows.sort_by(|a, b| b.row.date.cmp(&a.row.date)),
        }
        rows
    }
}

#[async_trait]
impl ResultSource for MemoryStore {
    async fn find_scored_rows(&self, filter: &ResultFilter) -> Result<Vec<ScoredRow>, StoreError> {
        self.check_reads()?;
        self.row_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .filtered(filter)
            .into_iter()
            .map(|stored| stored.row)
            .collect())
    }

    async fn find_previous_test(
        &self,
        subject: &str,
        before: NaiveDate,
    ) -> Result<Option<String>, StoreError> {
        self.check_reads()?;
        let results = self.results.read();
        let mut latest: HashMap<&str, NaiveDate> = HashMap::new();

        for stored in results.iter() {
            let row = &stored.row;
            if row.subject != subject || row.date >= before {
                continue;
            }
            let entry = latest.entry(row.test_name.as_str()).or_insert(row.date);
            if row.date > *entry {
                *entry = row.date;
            }
        }

        Ok(latest
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)))
            .map(|(test_name, _)| test_name.to_string()))
    }

    async fn read_rank_history(
        &self,
        query: &HistoryQuery,
    ) -> Result<Vec<RankSnapshot>, StoreError> {
        self.check_reads()?;
        let history = self.history.read();

        match query {
            HistoryQuery::Test { subject, test_name } => {
                let mut rows = history
                    .get(&(subject.clone(), test_name.clone()))
                    .cloned()
                    .unwrap_or_default();
                rows.sort_by_key(|snapshot| snapshot.rank);
                Ok(rows)
            }
            HistoryQuery::Student {
                student_id,
                subject,
            } => {
                let mut rows: Vec<RankSnapshot> = history
                    .values()
                    .flatten()
                    .filter(|snapshot| snapshot.student_id == *student_id)
                    .filter(|snapshot| subject.as_ref().map_or(true, |s| *s == snapshot.subject))
                    .cloned()
                    .collect();
                rows.sort_by(|a, b| a.date.cmp(&b.date));
                Ok(rows)
            }
        }
    }

    async fn replace_rank_history(
        &self,
        subject: &str,
        test_name: &str,
        snapshots: Vec<RankSnapshot>,
    ) -> Result<(), StoreError> {
        self.check_history_writes()?;
        let key = (subject.to_string(), test_name.to_string());
        let mut history = self.history.write();
        if snapshots.is_empty() {
            history.remove(&key);
        } else {
            history.insert(key, snapshots);
        }
        Ok(())
    }

    async fn delete_rank_history(
        &self,
        subject: &str,
        test_name: &str,
    ) -> Result<u64, StoreError> {
        self.check_history_writes()?;
        let removed = self
            .history
            .write()
            .remove(&(subject.to_string(), test_name.to_string()))
            .map_or(0, |rows| rows.len());
        Ok(removed as u64)
    }

    async fn upsert_performance_aggregate(
        &self,
        student_id: &str,
        subject: &str,
        aggregate: &PerformanceAggregate,
    ) -> Result<(), StoreError> {
        if self.fail_aggregate_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "memory store aggregate writes disabled".to_string(),
            ));
        }
        self.aggregates
            .write()
            .insert((student_id.to_string(), subject.to_string()), aggregate.clone());
        Ok(())
    }
}

#[async_trait]
impl ResultWriter for MemoryStore {
    async fn insert_result(&self, result: NewResult) -> Result<StoredResult, StoreError> {
        let stored = StoredResult {
            id: Uuid::new_v4(),
            row: result.into_row(),
        };
        let mut results = self.results.write();
        if results.iter().any(|held| held.row.same_slot(&stored.row)) {
            return Err(StoreError::Duplicate(stored.row.slot_label()));
        }
        results.push(stored.clone());
        Ok(stored)
    }

    async fn update_result(
        &self,
        id: Uuid,
        patch: &ResultPatch,
    ) -> Result<Option<ResultUpdate>, StoreError> {
        let mut results = self.results.write();
        let Some(index) = results.iter().position(|stored| stored.id == id) else {
            return Ok(None);
        };

        let before = results[index].clone();
        let mut after = before.clone();
        patch.apply(&mut after.row);
        if results
            .iter()
            .any(|held| held.id != id && held.row.same_slot(&after.row))
        {
            return Err(StoreError::Duplicate(after.row.slot_label()));
        }

        results[index] = after.clone();
        Ok(Some(ResultUpdate { before, after }))
    }

    async fn delete_result(&self, id: Uuid) -> Result<Option<StoredResult>, StoreError> {
        let mut results = self.results.write();
        let position = results.iter().position(|stored| stored.id == id);
        Ok(position.map(|index| results.remove(index)))
    }

    async fn list_results(
        &self,
        filter: &ResultFilter,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<StoredResult>, usize), StoreError> {
        self.check_reads()?;
        let rows = self.filtered(filter);
        let total = rows.len();
        let page = rows.into_iter().skip(offset).take(limit).collect();
        Ok((page, total))
    }

    async fn upsert_student(&self, student: &Student) -> Result<(), StoreError> {
        self.students
            .write()
            .insert(student.student_id.clone(), student.clone());
        Ok(())
    }

    async fn rename_student(&self, student_id: &str, name: &str) -> Result<bool, StoreError> {
        {
            let mut students = self.students.write();
            let Some(student) = students.get_mut(student_id) else {
                return Ok(false);
            };
            student.name = name.to_string();
        }

        for stored in self.results.write().iter_mut() {
            if stored.row.student_id == student_id {
                stored.row.name = name.to_string();
            }
        }
        Ok(true)
    }

    async fn delete_student(&self, student_id: &str) -> Result<bool, StoreError> {
        Ok(self.students.write().remove(student_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(student_id: &str, test_name: &str, day: u32) -> NewResult {
        NewResult {
            student_id: student_id.to_string(),
            name: student_id.to_string(),
            subject: "Math".to_string(),
            marks: 70.0,
            grade: "B".to_string(),
            test_name: test_name.to_string(),
            date: NaiveDate::from_ymd_opt(2025, 2, day).unwrap(),
        }
    }

    #[tokio::test]
    async fn previous_test_is_latest_strictly_before() {
        let store = MemoryStore::new();
        store.insert_result(result("S1", "Quiz-1", 1)).await.unwrap();
        store.insert_result(result("S1", "Quiz-2", 8)).await.unwrap();
        store.insert_result(result("S1", "Quiz-3", 15)).await.unwrap();

        let before = NaiveDate::from_ymd_opt(2025, 2, 15).unwrap();
        let previous = store.find_previous_test("Math", before).await.unwrap();
        assert_eq!(previous.as_deref(), Some("Quiz-2"));

        let first = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        assert_eq!(store.find_previous_test("Math", first).await.unwrap(), None);
        assert_eq!(store.find_previous_test("Physics", before).await.unwrap(), None);
    }

    #[tokio::test]
    async fn replace_swaps_the_whole_set() {
        let store = MemoryStore::new();
        let snapshot = |student: &str, rank| RankSnapshot {
            student_id: student.to_string(),
            subject: "Math".to_string(),
            test_name: "Quiz-1".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
            rank,
            marks: 50.0,
        };

        store
            .replace_rank_history("Math", "Quiz-1", vec![snapshot("S1", 1), snapshot("S2", 2)])
            .await
            .unwrap();
        store
            .replace_rank_history("Math", "Quiz-1", vec![snapshot("S3", 1)])
            .await
            .unwrap();

        let ids: Vec<String> = store
            .snapshots("Math", "Quiz-1")
            .into_iter()
            .map(|s| s.student_id)
            .collect();
        assert_eq!(ids, vec!["S3"]);
        assert_eq!(store.delete_rank_history("Math", "Quiz-1").await.unwrap(), 1);
        assert!(store.snapshots("Math", "Quiz-1").is_empty());
    }

    #[tokio::test]
    async fn one_result_per_student_and_test() {
        let store = MemoryStore::new();
        store.insert_result(result("S1", "Quiz-1", 1)).await.unwrap();
        let moving = store.insert_result(result("S1", "Quiz-2", 8)).await.unwrap();

        let err = store.insert_result(result("S1", "Quiz-1", 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(ref slot) if slot == "S1 in Math/Quiz-1"));

        let patch = ResultPatch {
            test_name: Some("Quiz-1".to_string()),
            ..ResultPatch::default()
        };
        let err = store.update_result(moving.id, &patch).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));

        let (rows, total) = store.list_results(&ResultFilter::default(), 0, 10).await.unwrap();
        assert_eq!(total, 2);
        assert!(rows.iter().any(|r| r.id == moving.id && r.row.test_name == "Quiz-2"));
    }

    #[tokio::test]
    async fn list_pages_through_date_descending() {
        let store = MemoryStore::new();
        for day in 1..=5 {
            store.insert_result(result("S1", &format!("Quiz-{day}"), day)).await.unwrap();
        }

        let filter = ResultFilter {
            order: RowOrder::DateDescending,
            from: NaiveDate::from_ymd_opt(2025, 2, 2),
            ..ResultFilter::default()
        };
        let (page, total) = store.list_results(&filter, 1, 2).await.unwrap();
        assert_eq!(total, 4);
        let names: Vec<&str> = page.iter().map(|r| r.row.test_name.as_str()).collect();
        assert_eq!(names, vec!["Quiz-4", "Quiz-3"]);
    }
}
