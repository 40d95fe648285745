//! Where a leaderboard finds the ranks of the previous test.
//!
//! Persisted snapshots are preferred. When none exist (never recorded, or
//! dropped by an invalidation) the previous test's rows are ranked again.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::ranking::{rank_rows, ranks_by_student};
use crate::store::{HistoryQuery, ResultFilter, ResultSource};

/// Rank per student id for one (subject, test).
pub type PreviousRanks = HashMap<String, u32>;

#[async_trait]
pub trait PreviousRankLookup: Send + Sync {
    /// An empty map means this tier has nothing for the test.
    async fn ranks_for(&self, subject: &str, test_name: &str)
        -> Result<PreviousRanks, StoreError>;
}

pub struct SnapshotRanks {
    source: Arc<dyn ResultSource>,
}

impl SnapshotRanks {
    pub fn new(source: Arc<dyn ResultSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl PreviousRankLookup for SnapshotRanks {
    async fn ranks_for(
        &self,
        subject: &str,
        test_name: &str,
    ) -> Result<PreviousRanks, StoreError> {
        let query = HistoryQuery::Test {
            subject: subject.to_string(),
            test_name: test_name.to_string(),
        };
        let snapshots = self.source.read_rank_history(&query).await?;
        Ok(snapshots
            .into_iter()
            .map(|snapshot| (snapshot.student_id, snapshot.rank))
            .collect())
    }
}

pub struct RecomputedRanks {
    source: Arc<dyn ResultSource>,
}

impl RecomputedRanks {
    pub fn new(source: Arc<dyn ResultSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl PreviousRankLookup for RecomputedRanks {
    async fn ranks_for(
        &self,
        subject: &str,
        test_name: &str,
    ) -> Result<PreviousRanks, StoreError> {
        let rows = self
            .source
            .find_scored_rows(&ResultFilter::for_test(subject, test_name))
            .await?;
        Ok(ranks_by_student(&rank_rows(&rows)))
    }
}

/// Asks `primary` first and falls back to `fallback` when it comes back empty.
pub struct TieredRanks<P, F> {
    primary: P,
    fallback: F,
}

impl<P, F> TieredRanks<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }
}

impl TieredRanks<SnapshotRanks, RecomputedRanks> {
    pub fn snapshots_then_recompute(source: Arc<dyn ResultSource>) -> Self {
        Self::new(
            SnapshotRanks::new(source.clone()),
            RecomputedRanks::new(source),
        )
    }
}

#[async_trait]
impl<P, F> PreviousRankLookup for TieredRanks<P, F>
where
    P: PreviousRankLookup,
    F: PreviousRankLookup,
{
    async fn ranks_for(
        &self,
        subject: &str,
        test_name: &str,
    ) -> Result<PreviousRanks, StoreError> {
        let ranks = self.primary.ranks_for(subject, test_name).await?;
        if !ranks.is_empty() {
            tracing::debug!(subject, test_name, "previous ranks served from snapshots");
            return Ok(ranks);
        }

        tracing::debug!(subject, test_name, "no snapshots for previous test, re-ranking");
        self.fallback.ranks_for(subject, test_name).await
    }
}
