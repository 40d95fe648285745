use std::fmt::Write;

use crate::models::{LeaderboardPage, Medal, Performance};

fn medal_label(medal: Medal) -> &'static str {
    match medal {
        Medal::Gold => " (gold)",
        Medal::Silver => " (silver)",
        Medal::Bronze => " (bronze)",
        Medal::None => "",
    }
}

fn movement_label(rank_change: Option<i64>) -> String {
    match rank_change {
        None => "new".to_string(),
        Some(0) => "=".to_string(),
        Some(delta) if delta > 0 => format!("up {delta}"),
        Some(delta) => format!("down {}", delta.unsigned_abs()),
    }
}

pub fn build_leaderboard_report(board: &LeaderboardPage) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# {} Leaderboard: {}", board.subject, board.test_name);
    let _ = writeln!(
        output,
        "{} ranked results (page {}, {} per page)",
        board.count, board.page, board.limit
    );
    let _ = writeln!(output);

    if board.data.is_empty() {
        let _ = writeln!(output, "No results recorded for this test.");
        return output;
    }

    let _ = writeln!(output, "| Rank | Student | Marks | Grade | Movement |");
    let _ = writeln!(output, "| --- | --- | --- | --- | --- |");
    for entry in &board.data {
        let _ = writeln!(
            output,
            "| {}{} | {} ({}) | {:.1} | {} | {} |",
            entry.rank,
            medal_label(entry.medal),
            entry.row.name,
            entry.row.student_id,
            entry.row.marks,
            entry.row.grade,
            movement_label(entry.rank_change)
        );
    }

    output
}

pub fn build_performance_report(performance: &Performance) -> String {
    let mut output = String::new();
    let scope = performance.subject.as_deref().unwrap_or("all subjects");

    let _ = writeln!(
        output,
        "## {} in {}: {}",
        performance.student_id, scope, performance.trend_status
    );

    if performance.series.is_empty() {
        let _ = writeln!(output, "No results recorded.");
    } else {
        for point in &performance.series {
            let _ = writeln!(
                output,
                "- {} on {}: {:.1}",
                point.test_name, point.date, point.marks
            );
        }
    }

    if !performance.rank_history.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "Rank history:");
        for point in &performance.rank_history {
            let _ = writeln!(output, "- {} on {}: #{}", point.test_name, point.date, point.rank);
        }
    }

    output
}
