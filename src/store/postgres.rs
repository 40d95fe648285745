use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use uuid::Uuid;

use super::{HistoryQuery, ResultFilter, ResultSource, ResultWriter, RowOrder};
use crate::error::StoreError;
use crate::models::{
    NewResult, PerformanceAggregate, RankSnapshot, ResultPatch, ResultUpdate, ScoredRow, Student,
    StoredResult,
};

const RESULT_COLUMNS: &str =
    "id, student_id, full_name, subject, marks, grade, test_name, taken_on";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| StoreError::Database(err.into()))?;
        Ok(())
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &ResultFilter) {
    builder.push(" WHERE TRUE");
    if let Some(student_id) = &filter.student_id {
        builder.push(" AND student_id = ").push_bind(student_id.clone());
    }
    if let Some(subject) = &filter.subject {
        builder.push(" AND subject = ").push_bind(subject.clone());
    }
    if let Some(test_name) = &filter.test_name {
        builder.push(" AND test_name = ").push_bind(test_name.clone());
    }
    if let Some(from) = filter.from {
        builder.push(" AND taken_on >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        builder.push(" AND taken_on <= ").push_bind(to);
    }
}

fn order_clause(order: RowOrder) -> &'static str {
    match order {
        RowOrder::Inserted => " ORDER BY created_at, id",
        RowOrder::DateAscending => " ORDER BY taken_on, created_at",
        RowOrder::DateDescending => " ORDER BY taken_on DESC, created_at DESC",
    }
}

fn stored_from_row(row: &PgRow) -> StoredResult {
    StoredResult {
        id: row.get("id"),
        row: ScoredRow {
            student_id: row.get("student_id"),
            name: row.get("full_name"),
            subject: row.get("subject"),
            test_name: row.get("test_name"),
            marks: row.get("marks"),
            grade: row.get("grade"),
            date: row.get("taken_on"),
        },
    }
}

fn snapshot_from_row(row: &PgRow) -> Result<RankSnapshot, StoreError> {
    let rank: i32 = row.get("rank");
    let rank = u32::try_from(rank)
        .map_err(|_| StoreError::Corrupt(format!("negative rank {rank} in rank_history")))?;

    Ok(RankSnapshot {
        student_id: row.get("student_id"),
        subject: row.get("subject"),
        test_name: row.get("test_name"),
        date: row.get("taken_on"),
        rank,
        marks: row.get("marks"),
    })
}

/// Maps the results uniqueness constraint onto `StoreError::Duplicate`.
fn write_error(err: sqlx::Error, row: &ScoredRow) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::Duplicate(row.slot_label());
        }
    }
    StoreError::Database(err)
}

fn rank_column(rank: u32) -> Result<i32, StoreError> {
    i32::try_from(rank).map_err(|_| StoreError::Corrupt(format!("rank {rank} out of range")))
}

#[async_trait]
impl ResultSource for PgStore {
    async fn find_scored_rows(&self, filter: &ResultFilter) -> Result<Vec<ScoredRow>, StoreError> {
        let mut builder =
            QueryBuilder::new(format!("SELECT {RESULT_COLUMNS} FROM rank_trends.results"));
        push_filter(&mut builder, filter);
        builder.push(order_clause(filter.order));

        let rows = builder.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(|row| stored_from_row(row).row).collect())
    }

    async fn find_previous_test(
        &self,
        subject: &str,
        before: NaiveDate,
    ) -> Result<Option<String>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT test_name, MAX(taken_on) AS latest_on
            FROM rank_trends.results
            WHERE subject = $1 AND taken_on < $2
            GROUP BY test_name
            ORDER BY latest_on DESC, test_name DESC
            LIMIT 1
            "#,
        )
        .bind(subject)
        .bind(before)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| row.get("test_name")))
    }

    async fn read_rank_history(
        &self,
        query: &HistoryQuery,
    ) -> Result<Vec<RankSnapshot>, StoreError> {
        let rows = match query {
            HistoryQuery::Test { subject, test_name } => {
                sqlx::query(
                    r#"
                    SELECT student_id, subject, test_name, taken_on, rank, marks
                    FROM rank_trends.rank_history
                    WHERE subject = $1 AND test_name = $2
                    ORDER BY rank, student_id
                    "#,
                )
                .bind(subject)
                .bind(test_name)
                .fetch_all(&self.pool)
                .await?
            }
            HistoryQuery::Student {
                student_id,
                subject,
            } => {
                sqlx::query(
                    r#"
                    SELECT student_id, subject, test_name, taken_on, rank, marks
                    FROM rank_trends.rank_history
                    WHERE student_id = $1 AND ($2::TEXT IS NULL OR subject = $2)
                    ORDER BY taken_on, test_name
                    "#,
                )
                .bind(student_id)
                .bind(subject.as_deref())
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(snapshot_from_row).collect()
    }

    async fn replace_rank_history(
        &self,
        subject: &str,
        test_name: &str,
        snapshots: Vec<RankSnapshot>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM rank_trends.rank_history WHERE subject = $1 AND test_name = $2")
            .bind(subject)
            .bind(test_name)
            .execute(&mut *tx)
            .await?;

        for snapshot in &snapshots {
            sqlx::query(
                r#"
                INSERT INTO rank_trends.rank_history
                (id, student_id, subject, test_name, taken_on, rank, marks)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(&snapshot.student_id)
            .bind(subject)
            .bind(test_name)
            .bind(snapshot.date)
            .bind(rank_column(snapshot.rank)?)
            .bind(snapshot.marks)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_rank_history(
        &self,
        subject: &str,
        test_name: &str,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM rank_trends.rank_history WHERE subject = $1 AND test_name = $2",
        )
        .bind(subject)
        .bind(test_name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn upsert_performance_aggregate(
        &self,
        student_id: &str,
        subject: &str,
        aggregate: &PerformanceAggregate,
    ) -> Result<(), StoreError> {
        let tests_count = i32::try_from(aggregate.tests_count)
            .map_err(|_| StoreError::Corrupt("tests_count out of range".to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO rank_trends.performance_cache
            (student_id, subject, tests_count, average, last_trend_status, last_computed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (student_id, subject) DO UPDATE
            SET tests_count = EXCLUDED.tests_count,
                average = EXCLUDED.average,
                last_trend_status = EXCLUDED.last_trend_status,
                last_computed_at = EXCLUDED.last_computed_at
            "#,
        )
        .bind(student_id)
        .bind(subject)
        .bind(tests_count)
        .bind(aggregate.average)
        .bind(aggregate.last_trend_status.as_str())
        .bind(aggregate.last_computed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ResultWriter for PgStore {
    async fn insert_result(&self, result: NewResult) -> Result<StoredResult, StoreError> {
        let stored = StoredResult {
            id: Uuid::new_v4(),
            row: result.into_row(),
        };

        sqlx::query(
            r#"
            INSERT INTO rank_trends.results
            (id, student_id, full_name, subject, marks, grade, test_name, taken_on)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(stored.id)
        .bind(&stored.row.student_id)
        .bind(&stored.row.name)
        .bind(&stored.row.subject)
        .bind(stored.row.marks)
        .bind(&stored.row.grade)
        .bind(&stored.row.test_name)
        .bind(stored.row.date)
        .execute(&self.pool)
        .await
        .map_err(|err| write_error(err, &stored.row))?;

        Ok(stored)
    }

    async fn update_result(
        &self,
        id: Uuid,
        patch: &ResultPatch,
    ) -> Result<Option<ResultUpdate>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {RESULT_COLUMNS} FROM rank_trends.results WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let before = stored_from_row(&row);
        let mut after = before.clone();
        patch.apply(&mut after.row);

        sqlx::query(
            r#"
            UPDATE rank_trends.results
            SET full_name = $2, subject = $3, marks = $4, grade = $5, test_name = $6, taken_on = $7
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&after.row.name)
        .bind(&after.row.subject)
        .bind(after.row.marks)
        .bind(&after.row.grade)
        .bind(&after.row.test_name)
        .bind(after.row.date)
        .execute(&mut *tx)
        .await
        .map_err(|err| write_error(err, &after.row))?;

        tx.commit().await?;
        Ok(Some(ResultUpdate { before, after }))
    }

    async fn delete_result(&self, id: Uuid) -> Result<Option<StoredResult>, StoreError> {
        let row = sqlx::query(&format!(
            "DELETE FROM rank_trends.results WHERE id = $1 RETURNING {RESULT_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(stored_from_row))
    }

    async fn list_results(
        &self,
        filter: &ResultFilter,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<StoredResult>, usize), StoreError> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) AS total FROM rank_trends.results");
        push_filter(&mut count, filter);
        let total: i64 = count.build().fetch_one(&self.pool).await?.get("total");

        let mut page =
            QueryBuilder::new(format!("SELECT {RESULT_COLUMNS} FROM rank_trends.results"));
        push_filter(&mut page, filter);
        page.push(order_clause(filter.order));
        page.push(" LIMIT ").push_bind(limit as i64);
        page.push(" OFFSET ").push_bind(offset as i64);
        let rows = page.build().fetch_all(&self.pool).await?;

        Ok((
            rows.iter().map(stored_from_row).collect(),
            usize::try_from(total).unwrap_or_default(),
        ))
    }

    async fn upsert_student(&self, student: &Student) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO rank_trends.students (student_id, full_name, email, class_name)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (student_id) DO UPDATE
            SET full_name = EXCLUDED.full_name,
                email = COALESCE(EXCLUDED.email, rank_trends.students.email),
                class_name = COALESCE(EXCLUDED.class_name, rank_trends.students.class_name),
                updated_at = now()
            "#,
        )
        .bind(&student.student_id)
        .bind(&student.name)
        .bind(student.email.as_deref())
        .bind(student.class_name.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn rename_student(&self, student_id: &str, name: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE rank_trends.students SET full_name = $2, updated_at = now() WHERE student_id = $1",
        )
        .bind(student_id)
        .bind(name)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query("UPDATE rank_trends.results SET full_name = $2 WHERE student_id = $1")
            .bind(student_id)
            .bind(name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn delete_student(&self, student_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM rank_trends.students WHERE student_id = $1")
            .bind(student_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
