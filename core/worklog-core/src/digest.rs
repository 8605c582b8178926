//! Markdown digest of one recorded session.
//!
//! Read-only: built entirely from the artifacts under `summaries/`.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;

use crate::clock::COMPACT_FORMAT;
use crate::error::{Result, WorklogError};
use crate::store::ReportStore;
use crate::types::{FinalArtifact, TickArtifact};

#[derive(Debug, Clone)]
pub struct SessionDigest {
    pub session_id: String,
    pub ticks: Vec<TickArtifact>,
    pub final_artifact: Option<FinalArtifact>,
}

/// Most recent session id, if any session exists.
pub fn latest_session(reports: &ReportStore) -> Result<Option<String>> {
    Ok(reports.list_sessions()?.pop())
}

impl SessionDigest {
    pub fn load(reports: &ReportStore, session_id: &str) -> Result<Self> {
        if !reports.list_sessions()?.iter().any(|id| id == session_id) {
            return Err(WorklogError::SessionNotFound(session_id.to_string()));
        }
        Ok(Self {
            session_id: session_id.to_string(),
            ticks: reports.load_ticks(session_id)?,
            final_artifact: reports.load_final(session_id)?,
        })
    }

    /// Activity frequencies, most frequent first, ties by name.
    pub fn activity_ranking(&self) -> Vec<(String, u64)> {
        let counts: BTreeMap<String, u64> = match &self.final_artifact {
            Some(final_artifact) => final_artifact.summary.activity_counts.clone(),
            None => {
                let mut counts = BTreeMap::new();
                for activity in self.ticks.iter().flat_map(|t| t.activities.iter()) {
                    *counts.entry(activity.clone()).or_insert(0) += 1;
                }
                counts
            }
        };
        let mut ranking: Vec<(String, u64)> = counts.into_iter().collect();
        ranking.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranking
    }

    pub fn render_markdown(&self) -> String {
        let mut lines = vec![format!("# Work summary {}", self.session_id), String::new()];

        let started = match &self.final_artifact {
            Some(f) => f.summary.started_at.to_rfc3339(),
            None => NaiveDateTime::parse_from_str(&self.session_id, COMPACT_FORMAT)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|_| self.session_id.clone()),
        };
        lines.push(format!("- Started: {}", started));
        match &self.final_artifact {
            Some(f) => {
                lines.push(format!("- Finished: {}", f.summary.finished_at.to_rfc3339()));
                lines.push(format!(
                    "- Duration: {}",
                    format_duration(f.summary.total_duration_seconds)
                ));
            }
            None => lines.push("- Finished: no final summary (unclean exit or still running)".to_string()),
        }
        lines.push(format!("- Ticks: {}", self.ticks.len()));
        if let Some(f) = self.final_artifact.as_ref().filter(|f| f.summary.failed_ticks > 0) {
            lines.push(format!("- Failed ticks: {}", f.summary.failed_ticks));
        }

        let latest_branch = self
            .final_artifact
            .as_ref()
            .map(|f| f.final_snapshot.git.branch.as_str())
            .or_else(|| self.ticks.last().map(|t| t.git.branch.as_str()))
            .unwrap_or("");
        if !latest_branch.is_empty() {
            lines.push(format!("- Branch: {}", latest_branch));
        }

        if let (Some(first), Some(last)) = (self.ticks.first(), self.ticks.last()) {
            let delta = last.counts.total_files as i64 - first.counts.total_files as i64;
            lines.push(format!(
                "- Files: {} -> {} ({:+})",
                first.counts.total_files, last.counts.total_files, delta
            ));
        }

        let ranking = self.activity_ranking();
        if !ranking.is_empty() {
            lines.extend([
                String::new(),
                "## Activities".to_string(),
                String::new(),
                "| Activity | Ticks |".to_string(),
                "|---|---|".to_string(),
            ]);
            lines.extend(
                ranking
                    .iter()
                    .map(|(activity, count)| format!("| {} | {} |", activity, count)),
            );
        }

        if !self.ticks.is_empty() {
            lines.extend([String::new(), "## Timeline".to_string(), String::new()]);
            lines.extend(self.ticks.iter().map(timeline_entry));
        }

        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

/// `- HH:MM #i: tags (N changed) [degraded]`
fn timeline_entry(tick: &TickArtifact) -> String {
    let mut entry = format!(
        "- {} #{}: {}",
        tick.captured_at.format("%H:%M"),
        tick.derived.tick_index,
        tick.activities.join(", ")
    );
    if !tick.git.dirty_entries.is_empty() {
        entry.push_str(&format!(" ({} changed)", tick.git.dirty_entries.len()));
    }
    if tick.git.error.is_some() || tick.counts.error.is_some() {
        entry.push_str(" [degraded]");
    }
    entry
}

fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}h {:02}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}
