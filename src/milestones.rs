//! Step tracking for the setup run: a live progress line per step and a summary table at the end, so a run that
//! aborts halfway still shows what was done, what failed and what was skipped.

use chrono::{
    DateTime,
    Utc,
};
use std::{
    collections::BTreeMap,
    fmt,
    time::{
        Duration,
        Instant,
    },
};

const TITLE_WIDTH: usize = 70;
const DETAILS_WIDTH: usize = 90;
const HEADERS: [&str; 5] = ["#", "Milestone", "Status", "Duration", "Details"];

/// Handle returned by [`Milestones::start`]. Ids increase monotonically within one tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MilestoneId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MilestoneStatus {
    Running,
    Success,
    Failure,
    Skipped,
}

impl MilestoneStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for MilestoneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "⏳ Running",
            Self::Success => "✅ Success",
            Self::Failure => "❌ Failed",
            Self::Skipped => "⏭️ Skipped",
        })
    }
}

#[derive(Debug, Clone)]
pub struct Milestone {
    pub index: u32,
    pub title: String,
    pub status: MilestoneStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    started: Option<Instant>,
    /// Zero for skipped steps, unset while running.
    pub duration: Option<Duration>,
    pub detail: String,
    pub error: String,
}

impl Milestone {
    fn finish(&mut self, status: MilestoneStatus) {
        self.status = status;
        self.ended_at = Some(Utc::now());
        self.duration = self.started.map(|started| started.elapsed());
    }

    fn cells(&self) -> [String; 5] {
        let duration = self
            .duration
            .map(|duration| format!("{:.1}s", duration.as_secs_f64()))
            .unwrap_or_else(|| "-".to_string());

        let detail = one_line(&self.detail);
        let error = one_line(&self.error);
        let details = match (detail.is_empty(), error.is_empty()) {
            (_, true) => detail,
            (true, false) => error,
            (false, false) => format!("{detail} {error}"),
        };

        [
            self.index.to_string(),
            truncate(&one_line(&self.title), TITLE_WIDTH),
            self.status.to_string(),
            duration,
            truncate(&details, DETAILS_WIDTH),
        ]
    }
}

#[derive(Debug, Default)]
pub struct Milestones {
    next: u32,
    rows: BTreeMap<MilestoneId, Milestone>,
    active: Option<MilestoneId>,
    /// Don't print progress lines on [`Milestones::start`].
    quiet: bool,
}

impl Milestones {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracker that records without printing progress lines.
    pub fn quiet() -> Self {
        Self {
            quiet: true,
            ..Self::default()
        }
    }

    fn insert(&mut self, title: &str, status: MilestoneStatus, detail: String) -> MilestoneId {
        self.next += 1;
        let id = MilestoneId(self.next);
        let now = (status == MilestoneStatus::Running).then(|| (Utc::now(), Instant::now()));
        self.rows.insert(
            id,
            Milestone {
                index: self.next,
                title: title.to_string(),
                status,
                started_at: now.map(|(at, _)| at),
                ended_at: None,
                started: now.map(|(_, started)| started),
                duration: (status == MilestoneStatus::Skipped).then_some(Duration::ZERO),
                detail,
                error: String::new(),
            },
        );
        id
    }

    /// Open a running milestone and print its progress line.
    pub fn start(&mut self, title: &str) -> MilestoneId {
        let id = self.insert(title, MilestoneStatus::Running, String::new());
        self.active = Some(id);
        if !self.quiet {
            println!("⏳ [{:02}] {title}", id.0);
        }
        debug!(index = id.0, %title, "milestone started");
        id
    }

    pub fn done(&mut self, id: MilestoneId, detail: Option<String>) {
        let Some(milestone) = self.running(id) else {
            return;
        };
        milestone.finish(MilestoneStatus::Success);
        if let Some(detail) = detail.filter(|detail| !detail.is_empty()) {
            milestone.detail = detail;
        }
        self.clear_active(id);
    }

    pub fn fail(&mut self, id: MilestoneId, error: impl Into<String>) {
        let Some(milestone) = self.running(id) else {
            return;
        };
        milestone.finish(MilestoneStatus::Failure);
        milestone.error = error.into();
        self.clear_active(id);
    }

    /// Record a step that was never run. It goes straight to its terminal state.
    pub fn skip(&mut self, title: &str, reason: &str) -> MilestoneId {
        debug!(%title, %reason, "milestone skipped");
        self.insert(title, MilestoneStatus::Skipped, reason.to_string())
    }

    /// Mark whatever step is still running as failed. No-op when nothing is running.
    pub fn fail_active_if_any(&mut self, error: impl Into<String>) {
        if let Some(id) = self.active {
            self.fail(id, error);
        }
    }

    pub fn active(&self) -> Option<MilestoneId> {
        self.active
    }

    pub fn get(&self, id: MilestoneId) -> Option<&Milestone> {
        self.rows.get(&id)
    }

    /// All milestones in the order they were recorded.
    pub fn rows(&self) -> impl Iterator<Item = &Milestone> {
        self.rows.values()
    }

    fn running(&mut self, id: MilestoneId) -> Option<&mut Milestone> {
        match self.rows.get_mut(&id) {
            Some(milestone) if !milestone.status.is_terminal() => Some(milestone),
            Some(milestone) => {
                warn!(index = id.0, status = ?milestone.status, "milestone already finished, ignoring update");
                None
            }
            None => {
                warn!(index = id.0, "unknown milestone");
                None
            }
        }
    }

    fn clear_active(&mut self, id: MilestoneId) {
        if self.active == Some(id) {
            self.active = None;
        }
    }

    /// Bordered fixed-width table of every milestone. Column widths are counted in characters.
    pub fn render_summary_table(&self) -> String {
        let rows = self.rows().map(Milestone::cells).collect::<Vec<_>>();

        let mut widths = HEADERS.map(|header| header.chars().count());
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let separator = widths
            .iter()
            .map(|width| "-".repeat(width + 2))
            .collect::<Vec<_>>()
            .join("+");
        let separator = format!("+{separator}+");
        let format_row = |cells: &[&str]| {
            let padded = cells
                .iter()
                .zip(widths)
                .map(|(cell, width)| format!(" {cell:<width$} "))
                .collect::<Vec<_>>();
            format!("|{}|", padded.join("|"))
        };

        let mut lines = vec![separator.clone(), format_row(&HEADERS), separator.clone()];
        for row in &rows {
            lines.push(format_row(&row.iter().map(String::as_str).collect::<Vec<_>>()));
        }
        lines.push(separator);
        lines.join("\n")
    }

    pub fn print_summary_table(&self) {
        println!("\nMilestones summary:\n");
        println!("{}", self.render_summary_table());
    }
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars <= 3 {
        return text.chars().take(max_chars).collect();
    }
    let mut truncated = text.chars().take(max_chars - 3).collect::<String>();
    truncated.push_str("...");
    truncated
}
