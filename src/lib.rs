//! Rank and trend engine for student test results.
//!
//! Ranks each (subject, test) leaderboard, tracks rank movement against the
//! subject's previous test, classifies score trends, and keeps cached pages
//! and persisted rank snapshots in step with result mutations.

pub mod background;
pub mod cache;
pub mod config;
pub mod error;
pub mod history;
pub mod invalidation;
pub mod leaderboard;
pub mod models;
pub mod performance;
pub mod ranking;
pub mod report;
pub mod results;
pub mod store;
pub mod trend;

use std::sync::Arc;

use background::{BackgroundTasks, BestEffortFailure};
use cache::{CacheStore, MemoryCache};
use config::EngineConfig;
use history::TieredRanks;
use invalidation::Invalidator;
use leaderboard::LeaderboardService;
use models::LeaderboardPage;
use performance::PerformanceService;
use results::ResultsService;
use store::{ResultSource, ResultWriter};
use tokio::sync::mpsc::UnboundedReceiver;

/// The read and write services sharing one cache and one background pool.
pub struct Engine {
    pub leaderboard: LeaderboardService,
    pub performance: PerformanceService,
    pub results: ResultsService,
    pub tasks: Arc<BackgroundTasks>,
}

impl Engine {
    /// Wires the services over a backend that serves both traits.
    pub fn new<S>(store: Arc<S>, config: EngineConfig) -> (Self, UnboundedReceiver<BestEffortFailure>)
    where
        S: ResultSource + ResultWriter + 'static,
    {
        let cache: Arc<dyn CacheStore<LeaderboardPage>> =
            Arc::new(MemoryCache::<LeaderboardPage>::new());
        Self::with_cache(store, cache, config)
    }

    pub fn with_cache<S>(
        store: Arc<S>,
        cache: Arc<dyn CacheStore<LeaderboardPage>>,
        config: EngineConfig,
    ) -> (Self, UnboundedReceiver<BestEffortFailure>)
    where
        S: ResultSource + ResultWriter + 'static,
    {
        let (tasks, failures) = BackgroundTasks::new();
        let tasks = Arc::new(tasks);
        let source: Arc<dyn ResultSource> = store.clone();
        let writer: Arc<dyn ResultWriter> = store;

        let invalidator = Arc::new(Invalidator::new(
            source.clone(),
            cache.clone(),
            tasks.clone(),
        ));
        let engine = Self {
            leaderboard: LeaderboardService::new(
                source.clone(),
                Arc::new(TieredRanks::snapshots_then_recompute(source.clone())),
                cache,
                tasks.clone(),
                config.clone(),
            ),
            performance: PerformanceService::new(source, tasks.clone(), config.trend),
            results: ResultsService::new(writer, invalidator, config),
            tasks,
        };
        (engine, failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaderboard::LeaderboardQuery;
    use crate::models::NewResult;
    use crate::store::MemoryStore;
    use crate::trend::TrendStatus;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn engine_wires_reads_and_writes_together() {
        let store = Arc::new(MemoryStore::new());
        let (engine, _failures) = Engine::new(store.clone(), EngineConfig::default());

        for (test, day, marks) in [("T1", 1, 60.0), ("T2", 8, 75.0), ("T3", 15, 90.0)] {
            engine
                .results
                .record_result(NewResult {
                    student_id: "S1".to_string(),
                    name: "Avery".to_string(),
                    subject: "Math".to_string(),
                    marks,
                    grade: "B".to_string(),
                    test_name: test.to_string(),
                    date: NaiveDate::from_ymd_opt(2025, 9, day).unwrap(),
                })
                .await
                .unwrap();
        }

        for test in ["T1", "T2", "T3"] {
            engine
                .leaderboard
                .get_leaderboard(&LeaderboardQuery::new("Math", test))
                .await
                .unwrap();
        }
        engine.tasks.flush().await;

        let performance = engine
            .performance
            .get_performance("S1", Some("Math"))
            .await
            .unwrap();
        assert_eq!(performance.trend_status, TrendStatus::Improving);
        assert_eq!(performance.rank_history.len(), 3);

        engine.tasks.flush().await;
        let aggregate = store.aggregate("S1", "Math").unwrap();
        assert_eq!(aggregate.tests_count, 3);
    }
}
