use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, StoreError};
use crate::invalidation::Invalidator;
use crate::models::{NewResult, ResultListing, ResultPatch, Student, StoredResult};
use crate::store::{ResultFilter, ResultWriter, RowOrder};

/// Result and student mutations, each followed by the matching invalidation.
pub struct ResultsService {
    writer: Arc<dyn ResultWriter>,
    invalidator: Arc<Invalidator>,
    config: EngineConfig,
}

impl ResultsService {
    pub fn new(
        writer: Arc<dyn ResultWriter>,
        invalidator: Arc<Invalidator>,
        config: EngineConfig,
    ) -> Self {
        Self {
            writer,
            invalidator,
            config,
        }
    }

    pub async fn record_result(&self, result: NewResult) -> EngineResult<StoredResult> {
        validate(&result)?;
        let stored = self
            .writer
            .insert_result(result)
            .await
            .map_err(|err| write_failure("recording result", err))?;

        self.invalidator
            .on_result_mutated(&stored.row.subject, &stored.row.test_name);
        Ok(stored)
    }

    pub async fn update_result(&self, id: Uuid, patch: &ResultPatch) -> EngineResult<StoredResult> {
        validate_patch(patch)?;

        let update = self
            .writer
            .update_result(id, patch)
            .await
            .map_err(|err| write_failure("updating result", err))?
            .ok_or_else(|| EngineError::NotFound(format!("result {id}")))?;

        let (before, after) = (&update.before.row, &update.after.row);
        self.invalidator
            .on_result_mutated(&after.subject, &after.test_name);
        if before.subject != after.subject || before.test_name != after.test_name {
            self.invalidator
                .on_result_mutated(&before.subject, &before.test_name);
        }

        Ok(update.after)
    }

    pub async fn delete_result(&self, id: Uuid) -> EngineResult<StoredResult> {
        let deleted = self
            .writer
            .delete_result(id)
            .await
            .map_err(|err| EngineError::upstream("deleting result", err))?
            .ok_or_else(|| EngineError::NotFound(format!("result {id}")))?;

        self.invalidator
            .on_result_mutated(&deleted.row.subject, &deleted.row.test_name);
        Ok(deleted)
    }

    pub async fn list_results(
        &self,
        mut filter: ResultFilter,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> EngineResult<ResultListing> {
        filter.order = RowOrder::DateDescending;
        let (page, limit) = self.config.listing_paging(page, limit);
        let offset = (page as usize - 1).saturating_mul(limit as usize);
        let (data, count) = self
            .writer
            .list_results(&filter, offset, limit as usize)
            .await
            .map_err(|err| EngineError::upstream("listing results", err))?;

        Ok(ResultListing {
            page,
            limit,
            count,
            data,
        })
    }

    pub async fn upsert_student(&self, student: &Student) -> EngineResult<()> {
        if student.student_id.trim().is_empty() || student.name.trim().is_empty() {
            return Err(EngineError::InvalidRequest(
                "studentId and name are required".to_string(),
            ));
        }
        self.writer
            .upsert_student(student)
            .await
            .map_err(|err| EngineError::upstream("saving student", err))?;
        self.invalidator.on_student_renamed();
        Ok(())
    }

    pub async fn rename_student(&self, student_id: &str, name: &str) -> EngineResult<()> {
        if name.trim().is_empty() {
            return Err(EngineError::InvalidRequest("name is required".to_string()));
        }
        let renamed = self
            .writer
            .rename_student(student_id, name.trim())
            .await
            .map_err(|err| EngineError::upstream("renaming student", err))?;
        if !renamed {
            return Err(EngineError::NotFound(format!("student {student_id}")));
        }

        self.invalidator.on_student_renamed();
        Ok(())
    }

    /// Removes the student record only; their results stay ranked.
    pub async fn delete_student(&self, student_id: &str) -> EngineResult<()> {
        let deleted = self
            .writer
            .delete_student(student_id)
            .await
            .map_err(|err| EngineError::upstream("deleting student", err))?;
        if !deleted {
            return Err(EngineError::NotFound(format!("student {student_id}")));
        }

        self.invalidator.on_student_renamed();
        Ok(())
    }

    /// Checks every CSV row before inserting any, then invalidates each touched
    /// test once, including when an insert fails part way through.
    ///
    /// Expected header: `student_id,name,subject,marks,grade,test_name,date`.
    pub async fn import_csv(&self, csv_path: &Path) -> anyhow::Result<usize> {
        #[derive(serde::Deserialize)]
        struct CsvRow {
            student_id: String,
            name: String,
            subject: String,
            marks: f64,
            grade: String,
            test_name: String,
            date: NaiveDate,
        }

        let mut reader = csv::Reader::from_path(csv_path)
            .with_context(|| format!("failed to open {}", csv_path.display()))?;
        let mut pending = Vec::new();

        // line 1 is the header
        for (index, record) in reader.deserialize::<CsvRow>().enumerate() {
            let line = index + 2;
            let row = record.with_context(|| format!("unreadable csv row on line {line}"))?;
            let result = NewResult {
                student_id: row.student_id,
                name: row.name,
                subject: row.subject,
                marks: row.marks,
                grade: row.grade,
                test_name: row.test_name,
                date: row.date,
            };
            validate(&result).with_context(|| format!("rejected csv row on line {line}"))?;
            pending.push(result);
        }

        let mut scopes = BTreeSet::new();
        let mut inserted = 0usize;
        let mut failure = None;

        for result in pending {
            match self.writer.insert_result(result).await {
                Ok(stored) => {
                    scopes.insert((stored.row.subject, stored.row.test_name));
                    inserted += 1;
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        for (subject, test_name) in &scopes {
            self.invalidator.on_result_mutated(subject, test_name);
        }

        if let Some(err) = failure {
            tracing::warn!(inserted, error = %err, "csv import stopped early");
            return Err(write_failure("importing results", err))
                .with_context(|| format!("import stopped after {inserted} rows"));
        }
        tracing::info!(inserted, tests = scopes.len(), "csv import finished");

        Ok(inserted)
    }
}

fn write_failure(context: &'static str, err: StoreError) -> EngineError {
    match err {
        StoreError::Duplicate(slot) => {
            EngineError::InvalidRequest(format!("a result already exists for {slot}"))
        }
        other => EngineError::upstream(context, other),
    }
}

fn require(field: &str, value: &str) -> EngineResult<()> {
    if value.trim().is_empty() {
        return Err(EngineError::InvalidRequest(format!("{field} is required")));
    }
    Ok(())
}

fn require_marks(marks: f64) -> EngineResult<()> {
    if !marks.is_finite() {
        return Err(EngineError::InvalidRequest("marks must be a number".to_string()));
    }
    Ok(())
}

fn validate(result: &NewResult) -> EngineResult<()> {
    require("studentId", &result.student_id)?;
    require("name", &result.name)?;
    require("subject", &result.subject)?;
    require("grade", &result.grade)?;
    require("testName", &result.test_name)?;
    require_marks(result.marks)
}

/// Fields left out of a patch are kept; fields sent must still be usable.
fn validate_patch(patch: &ResultPatch) -> EngineResult<()> {
    let sent = [
        ("name", &patch.name),
        ("subject", &patch.subject),
        ("grade", &patch.grade),
        ("testName", &patch.test_name),
    ];
    for (field, value) in sent {
        if let Some(value) = value {
            require(field, value)?;
        }
    }
    patch.marks.map_or(Ok(()), require_marks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::BackgroundTasks;
    use crate::cache::MemoryCache;
    use crate::config::EngineConfig;
    use crate::history::TieredRanks;
    use crate::leaderboard::{LeaderboardQuery, LeaderboardService};
    use crate::models::LeaderboardPage;
    use crate::store::MemoryStore;

    struct World {
        store: Arc<MemoryStore>,
        tasks: Arc<BackgroundTasks>,
        results: ResultsService,
        leaderboard: LeaderboardService,
    }

    fn world() -> World {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::<LeaderboardPage>::new());
        let (tasks, _failures) = BackgroundTasks::new();
        let tasks = Arc::new(tasks);
        let invalidator = Arc::new(Invalidator::new(store.clone(), cache.clone(), tasks.clone()));
        World {
            results: ResultsService::new(store.clone(), invalidator, EngineConfig::default()),
            leaderboard: LeaderboardService::new(
                store.clone(),
                Arc::new(TieredRanks::snapshots_then_recompute(store.clone())),
                cache,
                tasks.clone(),
                EngineConfig::default(),
            ),
            store,
            tasks,
        }
    }

    fn result(student: &str, test: &str, day: u32, marks: f64) -> NewResult {
        NewResult {
            student_id: student.to_string(),
            name: format!("Name {student}"),
            subject: "Math".to_string(),
            marks,
            grade: "B".to_string(),
            test_name: test.to_string(),
            date: NaiveDate::from_ymd_opt(2025, 6, day).unwrap(),
        }
    }

    #[tokio::test]
    async fn new_result_forces_recompute_of_cached_board() {
        let w = world();
        w.results.record_result(result("S1", "T1", 2, 70.0)).await.unwrap();
        w.results.record_result(result("S2", "T1", 2, 80.0)).await.unwrap();

        let query = LeaderboardQuery::new("Math", "T1");
        let before = w.leaderboard.get_leaderboard(&query).await.unwrap();
        assert_eq!(before.count, 2);
        w.tasks.flush().await;

        w.results.record_result(result("S3", "T1", 2, 75.0)).await.unwrap();
        w.tasks.flush().await;

        let after = w.leaderboard.get_leaderboard(&query).await.unwrap();
        let board: Vec<(&str, u32)> = after
            .data
            .iter()
            .map(|e| (e.row.student_id.as_str(), e.rank))
            .collect();
        assert_eq!(board, vec![("S2", 1), ("S3", 2), ("S1", 3)]);
    }

    #[tokio::test]
    async fn moving_a_result_invalidates_both_tests() {
        let w = world();
        let moved = w.results.record_result(result("S1", "T1", 2, 70.0)).await.unwrap();
        w.results.record_result(result("S2", "T2", 9, 60.0)).await.unwrap();

        let t1 = LeaderboardQuery::new("Math", "T1");
        let t2 = LeaderboardQuery::new("Math", "T2");
        w.leaderboard.get_leaderboard(&t1).await.unwrap();
        w.leaderboard.get_leaderboard(&t2).await.unwrap();
        w.tasks.flush().await;

        let patch = ResultPatch {
            test_name: Some("T2".to_string()),
            date: NaiveDate::from_ymd_opt(2025, 6, 9),
            ..ResultPatch::default()
        };
        w.results.update_result(moved.id, &patch).await.unwrap();
        w.tasks.flush().await;

        assert_eq!(w.leaderboard.get_leaderboard(&t1).await.unwrap().count, 0);
        assert_eq!(w.leaderboard.get_leaderboard(&t2).await.unwrap().count, 2);
    }

    #[tokio::test]
    async fn delete_drops_the_row_and_its_snapshots() {
        let w = world();
        let doomed = w.results.record_result(result("S1", "T1", 2, 70.0)).await.unwrap();
        w.results.record_result(result("S2", "T1", 2, 60.0)).await.unwrap();

        let query = LeaderboardQuery::new("Math", "T1");
        w.leaderboard.get_leaderboard(&query).await.unwrap();
        w.tasks.flush().await;
        assert_eq!(w.store.snapshots("Math", "T1").len(), 2);

        w.results.delete_result(doomed.id).await.unwrap();
        w.tasks.flush().await;
        assert!(w.store.snapshots("Math", "T1").is_empty());

        let page = w.leaderboard.get_leaderboard(&query).await.unwrap();
        assert_eq!(page.count, 1);
        assert_eq!(page.data[0].rank, 1);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let w = world();
        let err = w.results.delete_result(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        let err = w
            .results
            .update_result(Uuid::new_v4(), &ResultPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        let err = w.results.rename_student("S404", "Nobody").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn missing_fields_are_named() {
        let w = world();
        let mut incomplete = result("S1", "T1", 2, 70.0);
        incomplete.subject = String::new();
        let err = w.results.record_result(incomplete).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid request: subject is required");
    }

    #[tokio::test]
    async fn rename_refreshes_cached_names() {
        let w = world();
        w.results
            .upsert_student(&Student {
                student_id: "S1".to_string(),
                name: "Avery Lee".to_string(),
                email: None,
                class_name: Some("10A".to_string()),
            })
            .await
            .unwrap();
        w.results.record_result(result("S1", "T1", 2, 70.0)).await.unwrap();

        let query = LeaderboardQuery::new("Math", "T1");
        w.leaderboard.get_leaderboard(&query).await.unwrap();

        w.results.rename_student("S1", "Avery Lee-Moreno").await.unwrap();
        let page = w.leaderboard.get_leaderboard(&query).await.unwrap();
        assert_eq!(page.data[0].row.name, "Avery Lee-Moreno");
    }

    #[tokio::test]
    async fn listing_is_newest_first() {
        let w = world();
        for day in [3, 1, 2] {
            w.results
                .record_result(result("S1", &format!("T{day}"), day, 50.0))
                .await
                .unwrap();
        }

        let listing = w
            .results
            .list_results(ResultFilter::default(), Some(1), Some(2))
            .await
            .unwrap();
        assert_eq!(listing.count, 3);
        let tests: Vec<&str> = listing.data.iter().map(|r| r.row.test_name.as_str()).collect();
        assert_eq!(tests, vec!["T3", "T2"]);
    }

    #[tokio::test]
    async fn listing_paging_is_clamped() {
        let w = world();
        for day in [1, 2] {
            w.results
                .record_result(result("S1", &format!("T{day}"), day, 50.0))
                .await
                .unwrap();
        }

        let listing = w
            .results
            .list_results(ResultFilter::default(), Some(0), Some(0))
            .await
            .unwrap();
        assert_eq!((listing.page, listing.limit), (1, 1));
        assert_eq!(listing.data.len(), 1);

        let listing = w
            .results
            .list_results(ResultFilter::default(), None, None)
            .await
            .unwrap();
        assert_eq!(listing.limit, 25);
        assert_eq!(listing.data.len(), 2);
    }

    #[tokio::test]
    async fn blank_patch_fields_are_rejected() {
        let w = world();
        let stored = w.results.record_result(result("S1", "T1", 2, 70.0)).await.unwrap();

        for (patch, message) in [
            (
                ResultPatch {
                    subject: Some(String::new()),
                    ..ResultPatch::default()
                },
                "invalid request: subject is required",
            ),
            (
                ResultPatch {
                    test_name: Some("  ".to_string()),
                    ..ResultPatch::default()
                },
                "invalid request: testName is required",
            ),
            (
                ResultPatch {
                    grade: Some(String::new()),
                    ..ResultPatch::default()
                },
                "invalid request: grade is required",
            ),
        ] {
            let err = w.results.update_result(stored.id, &patch).await.unwrap_err();
            assert_eq!(err.to_string(), message);
        }

        let (rows, _) = w.store.list_results(&ResultFilter::default(), 0, 10).await.unwrap();
        assert_eq!(rows[0].row, stored.row);
    }

    #[tokio::test]
    async fn second_result_for_the_same_test_is_rejected() {
        let w = world();
        w.results.record_result(result("S1", "T1", 2, 70.0)).await.unwrap();

        let err = w
            .results
            .record_result(result("S1", "T1", 2, 85.0))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid request: a result already exists for S1 in Math/T1"
        );

        let page = w
            .leaderboard
            .get_leaderboard(&LeaderboardQuery::new("Math", "T1"))
            .await
            .unwrap();
        assert_eq!(page.count, 1);
    }

    fn write_csv(body: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("rank-trends-{}.csv", Uuid::new_v4()));
        std::fs::write(&path, body).unwrap();
        path
    }

    const CSV_HEADER: &str = "student_id,name,subject,marks,grade,test_name,date\n";

    #[tokio::test]
    async fn rejected_csv_row_leaves_store_and_board_untouched() {
        let w = world();
        w.results.record_result(result("S1", "T1", 2, 70.0)).await.unwrap();
        let query = LeaderboardQuery::new("Math", "T1");
        w.leaderboard.get_leaderboard(&query).await.unwrap();
        w.tasks.flush().await;

        let path = write_csv(&format!(
            "{CSV_HEADER}S2,Blake,Math,80,A,T1,2025-06-02\nS3,,Math,60,C,T1,2025-06-02\n"
        ));
        let err = w.results.import_csv(&path).await.unwrap_err();
        std::fs::remove_file(&path).unwrap();

        assert!(format!("{err:#}").contains("line 3"));
        assert_eq!(w.store.row_count(), 1);
        assert_eq!(w.leaderboard.get_leaderboard(&query).await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn import_failing_part_way_still_invalidates_inserted_tests() {
        let w = world();
        w.results.record_result(result("S1", "T1", 2, 70.0)).await.unwrap();
        let query = LeaderboardQuery::new("Math", "T1");
        w.leaderboard.get_leaderboard(&query).await.unwrap();
        w.tasks.flush().await;
        assert_eq!(w.store.snapshots("Math", "T1").len(), 1);

        // the second row collides with S1's stored result
        let path = write_csv(&format!(
            "{CSV_HEADER}S2,Blake,Math,80,A,T1,2025-06-02\nS1,Avery,Math,60,C,T1,2025-06-02\n"
        ));
        let err = w.results.import_csv(&path).await.unwrap_err();
        std::fs::remove_file(&path).unwrap();
        w.tasks.flush().await;

        assert!(format!("{err:#}").contains("import stopped after 1 rows"));
        assert!(w.store.snapshots("Math", "T1").is_empty());
        let page = w.leaderboard.get_leaderboard(&query).await.unwrap();
        assert_eq!(page.count, 2);
        assert_eq!(page.data[0].row.student_id, "S2");
    }
}
