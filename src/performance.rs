use std::sync::Arc;

use chrono::Utc;

use crate::background::{BackgroundTask, BackgroundTasks};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    Comparison, Performance, PerformanceAggregate, RankHistoryPoint, SeriesPoint, StudentSeries,
    TrendPoint,
};
use crate::store::{HistoryQuery, ResultFilter, ResultSource};
use crate::trend::{TrendStatus, TrendThresholds};

pub struct PerformanceService {
    source: Arc<dyn ResultSource>,
    tasks: Arc<BackgroundTasks>,
    thresholds: TrendThresholds,
}

impl PerformanceService {
    pub fn new(
        source: Arc<dyn ResultSource>,
        tasks: Arc<BackgroundTasks>,
        thresholds: TrendThresholds,
    ) -> Self {
        Self {
            source,
            tasks,
            thresholds,
        }
    }

    /// Date-ordered marks of one student with trend and rank history.
    pub async fn get_performance(
        &self,
        student_id: &str,
        subject: Option<&str>,
    ) -> EngineResult<Performance> {
        let student_id = required(student_id, "studentId")?;
        let subject = subject.map(str::trim).filter(|s| !s.is_empty());

        let StudentSeries {
            trend_status,
            series,
            ..
        } = self.series_for(student_id, subject).await?;

        let rank_history = self.rank_history(student_id, subject).await;

        if let Some(subject) = subject {
            self.refresh_aggregate(student_id, subject, &series, trend_status);
        }

        Ok(Performance {
            student_id: student_id.to_string(),
            subject: subject.map(str::to_string),
            trend_status,
            series,
            rank_history,
        })
    }

    /// Two independent series side by side.
    pub async fn compare_performance(
        &self,
        student_a: &str,
        student_b: &str,
        subject: Option<&str>,
    ) -> EngineResult<Comparison> {
        let (student_a, student_b) =
            match (non_blank(student_a), non_blank(student_b)) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(EngineError::InvalidRequest(
                        "studentA and studentB are required".to_string(),
                    ))
                }
            };
        let subject = subject.map(str::trim).filter(|s| !s.is_empty());

        let (a, b) = tokio::try_join!(
            self.series_for(student_a, subject),
            self.series_for(student_b, subject)
        )?;

        Ok(Comparison {
            subject: subject.map(str::to_string),
            students: [a, b],
        })
    }

    async fn series_for(
        &self,
        student_id: &str,
        subject: Option<&str>,
    ) -> EngineResult<StudentSeries> {
        let rows = self
            .source
            .find_scored_rows(&ResultFilter::for_student(student_id, subject))
            .await
            .map_err(|err| EngineError::upstream("fetching student results", err))?;

        let points: Vec<TrendPoint> = rows
            .iter()
            .map(|row| TrendPoint {
                date: row.date,
                marks: row.marks,
            })
            .collect();
        let trend_status = self.thresholds.classify(&points);

        let series = rows
            .into_iter()
            .map(|row| SeriesPoint {
                test_name: row.test_name,
                marks: row.marks,
                date: row.date,
            })
            .collect();

        Ok(StudentSeries {
            student_id: student_id.to_string(),
            trend_status,
            series,
        })
    }

    async fn rank_history(&self, student_id: &str, subject: Option<&str>) -> Vec<RankHistoryPoint> {
        let query = HistoryQuery::Student {
            student_id: student_id.to_string(),
            subject: subject.map(str::to_string),
        };

        match self.source.read_rank_history(&query).await {
            Ok(snapshots) => snapshots
                .into_iter()
                .map(|snapshot| RankHistoryPoint {
                    test_name: snapshot.test_name,
                    rank: snapshot.rank,
                    date: snapshot.date,
                })
                .collect(),
            Err(err) => {
                tracing::warn!(student_id, error = %err, "rank history unavailable, returning none");
                Vec::new()
            }
        }
    }

    fn refresh_aggregate(
        &self,
        student_id: &str,
        subject: &str,
        series: &[SeriesPoint],
        trend_status: TrendStatus,
    ) {
        let average = if series.is_empty() {
            0.0
        } else {
            series.iter().map(|point| point.marks).sum::<f64>() / series.len() as f64
        };
        let aggregate = PerformanceAggregate {
            tests_count: series.len(),
            average,
            last_trend_status: trend_status,
            last_computed_at: Utc::now(),
        };

        let source = self.source.clone();
        let student_id = student_id.to_string();
        let subject = subject.to_string();
        self.tasks.spawn(BackgroundTask::AggregateRefresh, async move {
            source
                .upsert_performance_aggregate(&student_id, &subject, &aggregate)
                .await
        });
    }
}

fn non_blank(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

fn required<'a>(value: &'a str, field: &str) -> EngineResult<&'a str> {
    non_blank(value).ok_or_else(|| EngineError::InvalidRequest(format!("{field} is required")))
}
