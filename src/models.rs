use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::trend::TrendStatus;

/// One student's result in one test. Ranking input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredRow {
    pub student_id: String,
    pub name: String,
    pub subject: String,
    pub test_name: String,
    pub marks: f64,
    pub grade: String,
    pub date: NaiveDate,
}

impl ScoredRow {
    /// A student holds at most one result per (subject, test).
    pub fn same_slot(&self, other: &ScoredRow) -> bool {
        self.student_id == other.student_id
            && self.subject == other.subject
            && self.test_name == other.test_name
    }

    pub fn slot_label(&self) -> String {
        format!("{} in {}/{}", self.student_id, self.subject, self.test_name)
    }
}

/// A result row as held by the store, with its identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredResult {
    pub id: Uuid,
    #[serde(flatten)]
    pub row: ScoredRow,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedRow {
    pub rank: u32,
    #[serde(flatten)]
    pub row: ScoredRow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Medal {
    Gold,
    Silver,
    Bronze,
    None,
}

/// A ranked row with its movement against the previous test of the subject.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedRow {
    pub rank: u32,
    #[serde(flatten)]
    pub row: ScoredRow,
    pub rank_change: Option<i64>,
    pub medal: Medal,
}

/// Persisted rank of one student in one test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankSnapshot {
    pub student_id: String,
    pub subject: String,
    pub test_name: String,
    pub date: NaiveDate,
    pub rank: u32,
    pub marks: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub marks: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPoint {
    pub test_name: String,
    pub marks: f64,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankHistoryPoint {
    pub test_name: String,
    pub rank: u32,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceAggregate {
    pub tests_count: usize,
    pub average: f64,
    pub last_trend_status: TrendStatus,
    pub last_computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardPage {
    pub subject: String,
    pub test_name: String,
    pub count: usize,
    pub page: u32,
    pub limit: u32,
    pub data: Vec<EnrichedRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Performance {
    pub student_id: String,
    pub subject: Option<String>,
    pub trend_status: TrendStatus,
    pub series: Vec<SeriesPoint>,
    pub rank_history: Vec<RankHistoryPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSeries {
    pub student_id: String,
    pub trend_status: TrendStatus,
    pub series: Vec<SeriesPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub subject: Option<String>,
    pub students: [StudentSeries; 2],
}

/// Fields accepted when recording a new result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewResult {
    pub student_id: String,
    pub name: String,
    pub subject: String,
    pub marks: f64,
    pub grade: String,
    pub test_name: String,
    pub date: NaiveDate,
}

impl NewResult {
    pub fn into_row(self) -> ScoredRow {
        ScoredRow {
            student_id: self.student_id,
            name: self.name,
            subject: self.subject,
            test_name: self.test_name,
            marks: self.marks,
            grade: self.grade,
            date: self.date,
        }
    }
}

/// Partial update of a stored result; `None` leaves the field as stored.
#[derive(Debug, Clone, Default)]
pub struct ResultPatch {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub marks: Option<f64>,
    pub grade: Option<String>,
    pub test_name: Option<String>,
    pub date: Option<NaiveDate>,
}

impl ResultPatch {
    pub fn apply(&self, row: &mut ScoredRow) {
        if let Some(name) = &self.name {
            row.name = name.clone();
        }
        if let Some(subject) = &self.subject {
            row.subject = subject.clone();
        }
        if let Some(marks) = self.marks {
            row.marks = marks;
        }
        if let Some(grade) = &self.grade {
            row.grade = grade.clone();
        }
        if let Some(test_name) = &self.test_name {
            row.test_name = test_name.clone();
        }
        if let Some(date) = self.date {
            row.date = date;
        }
    }
}

/// Result document as stored before and after an update.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultUpdate {
    pub before: StoredResult,
    pub after: StoredResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub student_id: String,
    pub name: String,
    pub email: Option<String>,
    pub class_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultListing {
    pub page: u32,
    pub limit: u32,
    pub count: usize,
    pub data: Vec<StoredResult>,
}
