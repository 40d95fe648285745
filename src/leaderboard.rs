use std::sync::Arc;

use crate::background::{BackgroundTask, BackgroundTasks};
use crate::cache::{leaderboard_key, CacheStore};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::history::{PreviousRankLookup, PreviousRanks};
use crate::models::{EnrichedRow, LeaderboardPage, RankSnapshot};
use crate::ranking::{enrich, rank_rows};
use crate::store::{ResultFilter, ResultSource};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaderboardQuery {
    pub subject: Option<String>,
    pub test_name: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl LeaderboardQuery {
    pub fn new(subject: &str, test_name: &str) -> Self {
        Self {
            subject: Some(subject.to_string()),
            test_name: Some(test_name.to_string()),
            ..Self::default()
        }
    }

    pub fn page(mut self, page: u32, limit: u32) -> Self {
        self.page = Some(page);
        self.limit = Some(limit);
        self
    }
}

pub struct LeaderboardService {
    source: Arc<dyn ResultSource>,
    previous: Arc<dyn PreviousRankLookup>,
    cache: Arc<dyn CacheStore<LeaderboardPage>>,
    tasks: Arc<BackgroundTasks>,
    config: EngineConfig,
}

impl LeaderboardService {
    pub fn new(
        source: Arc<dyn ResultSource>,
        previous: Arc<dyn PreviousRankLookup>,
        cache: Arc<dyn CacheStore<LeaderboardPage>>,
        tasks: Arc<BackgroundTasks>,
        config: EngineConfig,
    ) -> Self {
        Self {
            source,
            previous,
            cache,
            tasks,
            config,
        }
    }

    /// Ranked page of one test with movement against the subject's previous test.
    pub async fn get_leaderboard(&self, query: &LeaderboardQuery) -> EngineResult<LeaderboardPage> {
        let (subject, test_name) = match (non_empty(&query.subject), non_empty(&query.test_name)) {
            (Some(subject), Some(test_name)) => (subject, test_name),
            _ => {
                return Err(EngineError::InvalidRequest(
                    "subject and test are required".to_string(),
                ))
            }
        };
        let (page, limit) = self.config.paging(query.page, query.limit);

        let key = leaderboard_key(subject, test_name, page, limit);
        if let Some(cached) = self.cache.get(&key) {
            tracing::debug!(%key, "leaderboard cache hit");
            return Ok(cached);
        }
        tracing::debug!(%key, "leaderboard cache miss");

        let rows = self
            .source
            .find_scored_rows(&ResultFilter::for_test(subject, test_name))
            .await
            .map_err(|err| EngineError::upstream("fetching leaderboard rows", err))?;

        let previous = match rows.first() {
            Some(anchor) => self.previous_ranks(subject, anchor.date).await?,
            None => PreviousRanks::new(),
        };

        let enriched = enrich(rank_rows(&rows), &previous);
        self.persist_snapshots(subject, test_name, &enriched);

        let count = enriched.len();
        let start = (page as usize - 1).saturating_mul(limit as usize);
        let data: Vec<EnrichedRow> = enriched
            .into_iter()
            .skip(start)
            .take(limit as usize)
            .collect();

        let payload = LeaderboardPage {
            subject: subject.to_string(),
            test_name: test_name.to_string(),
            count,
            page,
            limit,
            data,
        };
        self.cache.set(&key, payload.clone(), self.config.cache_ttl);
        tracing::info!(subject, test_name, count, page, limit, "leaderboard recomputed");

        Ok(payload)
    }

    async fn previous_ranks(
        &self,
        subject: &str,
        current_date: chrono::NaiveDate,
    ) -> EngineResult<PreviousRanks> {
        let previous_test = self
            .source
            .find_previous_test(subject, current_date)
            .await
            .map_err(|err| EngineError::upstream("locating previous test", err))?;

        let Some(previous_test) = previous_test else {
            return Ok(PreviousRanks::new());
        };

        self.previous
            .ranks_for(subject, &previous_test)
            .await
            .map_err(|err| EngineError::upstream("reading previous ranks", err))
    }

    fn persist_snapshots(&self, subject: &str, test_name: &str, enriched: &[EnrichedRow]) {
        let snapshots: Vec<RankSnapshot> = enriched
            .iter()
            .map(|entry| RankSnapshot {
                student_id: entry.row.student_id.clone(),
                subject: subject.to_string(),
                test_name: test_name.to_string(),
                date: entry.row.date,
                rank: entry.rank,
                marks: entry.row.marks,
            })
            .collect();

        let source = self.source.clone();
        let subject = subject.to_string();
        let test_name = test_name.to_string();
        self.tasks.spawn(BackgroundTask::SnapshotPersist, async move {
            source
                .replace_rank_history(&subject, &test_name, snapshots)
                .await
        });
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
