//! Tabular rendering of a [`RunVerdict`].
//!
//! One row per shard or test with the columns
//! `Item | Worker | State | Attempts | Duration`. Durations print as
//! `HH:MM:SS`.

use std::time::Duration;

use super::{RunVerdict, Summary};

const HEADERS: [&str; 5] = ["Item", "Worker", "State", "Attempts", "Duration"];
const BANNER_WIDTH: usize = 100;

/// Formats a duration as `HH:MM:SS`, rounding down to whole seconds.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// The title centred in a dashed banner, e.g. `----: Title :----`.
pub fn banner(title: &str) -> String {
    format!("{:-^width$}", format!(": {} :", title), width = BANNER_WIDTH)
}

/// One-line summary, e.g. `PASS: 9 passed, 1 passed on retry, 0 failed, 0 timed out`.
pub fn summary_line(success: bool, summary: &Summary) -> String {
    format!(
        "{}: {} passed, {} passed on retry, {} failed, {} timed out",
        if success { "PASS" } else { "FAIL" },
        summary.passed,
        summary.passed_on_retry,
        summary.failed,
        summary.timed_out
    )
}

fn rows(verdict: &RunVerdict) -> Vec<[String; 5]> {
    verdict
        .items
        .iter()
        .map(|item| {
            [
                item.label.clone(),
                item.worker.clone(),
                item.state.to_string(),
                item.attempt_count().to_string(),
                format_duration(item.duration()),
            ]
        })
        .collect()
}

/// Renders the banner and a box-drawn table for terminals and logs.
pub fn render_text(verdict: &RunVerdict, title: &str) -> String {
    let rows = rows(verdict);
    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let rule = |left: &str, mid: &str, right: &str| {
        let segments: Vec<String> = widths.iter().map(|w| "─".repeat(w + 2)).collect();
        format!("{}{}{}", left, segments.join(mid), right)
    };
    let line = |cells: &[String]| {
        let padded: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, w)| format!(" {:<w$} ", cell, w = w))
            .collect();
        format!("│{}│", padded.join("│"))
    };

    let mut out = String::new();
    out.push_str(&banner(title));
    out.push('\n');
    out.push_str(&rule("┌", "┬", "┐"));
    out.push('\n');
    out.push_str(&line(&HEADERS.map(String::from)));
    out.push('\n');
    out.push_str(&rule("├", "┼", "┤"));
    out.push('\n');
    for row in &rows {
        out.push_str(&line(row));
        out.push('\n');
    }
    out.push_str(&rule("└", "┴", "┘"));
    out.push('\n');
    out.push_str(&summary_line(verdict.success, &verdict.summary()));
    out
}

fn escape_markdown_cell(cell: &str) -> String {
    cell.replace('|', "\\|")
}

/// Renders a Markdown fragment: heading, table and summary line.
pub fn render_markdown(verdict: &RunVerdict, title: &str) -> String {
    let mut out = format!("## {}\n\n", title);
    out.push_str(&format!("| {} |\n", HEADERS.join(" | ")));
    out.push_str(&format!("|{}\n", "---|".repeat(HEADERS.len())));
    for row in rows(verdict) {
        let cells: Vec<String> = row.iter().map(|c| escape_markdown_cell(c)).collect();
        out.push_str(&format!("| {} |\n", cells.join(" | ")));
    }
    out.push('\n');
    out.push_str(&format!(
        "**{}** (run `{}`, {} on {} item(s), {})\n",
        summary_line(verdict.success, &verdict.summary()),
        verdict.run_id,
        verdict.strategy,
        verdict.items.len(),
        format_duration(verdict.duration)
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandResult;
    use crate::config::Strategy;
    use crate::report::{ItemOutcome, ResultAggregator};

    fn verdict() -> RunVerdict {
        let ok = CommandResult {
            exit_code: 0,
            combined_output: String::new(),
            timed_out: false,
            duration: Duration::from_secs(65),
        };
        let bad = CommandResult {
            exit_code: 1,
            ..ok.clone()
        };
        ResultAggregator::start(Strategy::Queue).aggregate(vec![
            ItemOutcome::from_attempts("Suite.A", "gpu0", vec![ok.clone()]),
            ItemOutcome::from_attempts("a|b", "gpu1", vec![bad, ok]),
        ])
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "00:00:00");
        assert_eq!(format_duration(Duration::from_secs(3725)), "01:02:05");
        assert_eq!(format_duration(Duration::from_millis(59_999)), "00:00:59");
    }

    #[test]
    fn test_banner_is_centred() {
        let line = banner("Report");
        assert_eq!(line.len(), 100);
        assert!(line.contains(": Report :"));
        assert!(line.starts_with("---") && line.ends_with("---"));
    }

    #[test]
    fn test_text_table_rows() {
        let text = render_text(&verdict(), "Results");
        assert!(text.contains("│ Item "));
        assert!(text.contains("Suite.A"));
        assert!(text.contains("PASS-ON-RETRY"));
        assert!(text.contains("00:02:10"));
        assert!(text.ends_with("PASS: 1 passed, 1 passed on retry, 0 failed, 0 timed out"));
    }

    #[test]
    fn test_markdown_escapes_pipes() {
        let md = render_markdown(&verdict(), "Results");
        assert!(md.starts_with("## Results\n\n| Item | Worker | State | Attempts | Duration |\n"));
        assert!(md.contains("| a\\|b | gpu1 | PASS-ON-RETRY | 2 | 00:02:10 |"));
    }
}
