use std::sync::Arc;

use crate::background::{BackgroundTask, BackgroundTasks};
use crate::cache::{leaderboard_scope, CacheStore, LEADERBOARD_NAMESPACE};
use crate::error::StoreError;
use crate::models::LeaderboardPage;
use crate::store::ResultSource;

/// Hooks the write path calls so derived leaderboard state is rebuilt on next read.
pub struct Invalidator {
    source: Arc<dyn ResultSource>,
    cache: Arc<dyn CacheStore<LeaderboardPage>>,
    tasks: Arc<BackgroundTasks>,
}

impl Invalidator {
    pub fn new(
        source: Arc<dyn ResultSource>,
        cache: Arc<dyn CacheStore<LeaderboardPage>>,
        tasks: Arc<BackgroundTasks>,
    ) -> Self {
        Self {
            source,
            cache,
            tasks,
        }
    }

    /// Drops cached pages and rank snapshots of one (subject, test).
    ///
    /// The cache is cleared before returning; the snapshot delete runs in the
    /// background and only logs on failure.
    pub fn on_result_mutated(&self, subject: &str, test_name: &str) {
        let evicted = self.cache.invalidate(Some(&leaderboard_scope(subject, test_name)));
        tracing::info!(subject, test_name, evicted, "leaderboard scope invalidated");

        let source = self.source.clone();
        let subject = subject.to_string();
        let test_name = test_name.to_string();
        self.tasks.spawn(BackgroundTask::HistoryInvalidation, async move {
            let removed = source.delete_rank_history(&subject, &test_name).await?;
            tracing::debug!(%subject, %test_name, removed, "rank snapshots dropped");
            Ok::<_, StoreError>(())
        });
    }

    /// Cached rows carry display names, so any rename clears every leaderboard.
    pub fn on_student_renamed(&self) {
        let evicted = self.cache.invalidate(Some(LEADERBOARD_NAMESPACE));
        tracing::info!(evicted, "all leaderboards invalidated after student change");
    }
}
