use std::collections::HashMap;

use crate::models::{EnrichedRow, Medal, RankedRow, ScoredRow};

/// Orders rows by marks, highest first, and assigns ranks.
///
/// Rows with equal marks share a rank. The next lower score takes the 1-based
/// position of its first row, so `[95, 90, 90, 80]` ranks as `[1, 2, 2, 4]`.
/// Ties keep their input order (stable sort).
pub fn rank_rows(rows: &[ScoredRow]) -> Vec<RankedRow> {
    let mut sorted = rows.to_vec();
    sorted.sort_by(|a, b| b.marks.total_cmp(&a.marks));

    let mut rank = 0u32;
    let mut last_marks: Option<f64> = None;
    let mut assigned = 0u32;

    sorted
        .into_iter()
        .map(|row| {
            assigned += 1;
            if last_marks != Some(row.marks) {
                rank = assigned;
                last_marks = Some(row.marks);
            }
            RankedRow { rank, row }
        })
        .collect()
}

/// Positive when the student moved toward rank 1.
pub fn rank_change(current: u32, previous: Option<u32>) -> Option<i64> {
    previous.map(|previous| i64::from(previous) - i64::from(current))
}

impl Medal {
    pub fn for_rank(rank: u32) -> Self {
        match rank {
            1 => Medal::Gold,
            2 => Medal::Silver,
            3 => Medal::Bronze,
            _ => Medal::None,
        }
    }
}

/// Attaches rank movement and medals, keyed by student id.
pub fn enrich(ranked: Vec<RankedRow>, previous: &HashMap<String, u32>) -> Vec<EnrichedRow> {
    ranked
        .into_iter()
        .map(|ranked| {
            let previous_rank = previous.get(&ranked.row.student_id).copied();
            EnrichedRow {
                rank: ranked.rank,
                rank_change: rank_change(ranked.rank, previous_rank),
                medal: Medal::for_rank(ranked.rank),
                row: ranked.row,
            }
        })
        .collect()
}

pub fn ranks_by_student(ranked: &[RankedRow]) -> HashMap<String, u32> {
    ranked
        .iter()
        .map(|ranked| (ranked.row.student_id.clone(), ranked.rank))
        .collect()
}
