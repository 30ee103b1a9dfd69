use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Days, Local, NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::frontmatter::format_token_count;
use crate::meta::{SessionMeta, scan_sessions};

const TOP_FILES: usize = 20;

// ===================================================================
// Ranges and file names
// ===================================================================

/// Monday of the week containing `day`.
fn week_start(day: NaiveDate) -> NaiveDate {
    day - Days::new(u64::from(day.weekday().num_days_from_monday()))
}

fn month_start(day: NaiveDate) -> NaiveDate {
    day.with_day(1).unwrap_or(day)
}

fn last_day_of_month(day: NaiveDate) -> u32 {
    let first = month_start(day);
    let next = first
        .checked_add_months(chrono::Months::new(1))
        .unwrap_or(first);
    next.pred_opt().map_or(31, |d| d.day())
}

pub fn weekly_report_path(vault: &Path, start: NaiveDate, end: NaiveDate) -> PathBuf {
    vault.join(format!(
        "Weekly-{}-to-{}.md",
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d")
    ))
}

pub fn monthly_report_path(vault: &Path, day: NaiveDate) -> PathBuf {
    vault.join(format!("Monthly-{}.md", day.format("%Y-%m")))
}

/// Whether `path` exists and was last written on `today` (local time).
fn is_fresh(path: &Path, today: NaiveDate) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|t| DateTime::<Local>::from(t).date_naive() == today)
        .unwrap_or(false)
}

/// Remove earlier versions of this week's report, written while the week
/// had fewer days.
fn remove_superseded_weekly(vault: &Path, start: NaiveDate, keep: &Path) -> Result<()> {
    let prefix = format!("Weekly-{}-to-", start.format("%Y-%m-%d"));
    let entries =
        fs::read_dir(vault).with_context(|| format!("listing vault {}", vault.display()))?;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_old = entry
            .file_name()
            .to_str()
            .is_some_and(|n| n.starts_with(&prefix))
            && path != keep
            && entry.file_type().is_ok_and(|t| t.is_file());
        if !is_old {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => tracing::debug!(report = %path.display(), "removed superseded weekly report"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("removing {}", path.display())),
        }
    }
    Ok(())
}

// ===================================================================
// Entry points
// ===================================================================

/// Regenerate this week's report (Monday through today) unless it was
/// already written today. Older versions for the same week are removed
/// first. Returns whether a report was written.
pub fn rebuild_weekly_stats_if_stale(vault: &Path, now: NaiveDateTime) -> Result<bool> {
    rebuild_weekly_stats(vault, now.date(), false)
}

/// Regenerate this month's report (1st through today) unless it was
/// already written today. Returns whether a report was written.
pub fn rebuild_monthly_stats_if_stale(vault: &Path, now: NaiveDateTime) -> Result<bool> {
    rebuild_monthly_stats(vault, now.date(), false)
}

pub fn rebuild_weekly_stats(vault: &Path, today: NaiveDate, force: bool) -> Result<bool> {
    let start = week_start(today);
    let path = weekly_report_path(vault, start, today);
    remove_superseded_weekly(vault, start, &path)?;
    if !force && is_fresh(&path, today) {
        return Ok(false);
    }

    let sessions = scan_sessions(vault, start, today)?;
    if sessions.is_empty() {
        return Ok(false);
    }
    let report = build_weekly_report(&sessions, start, today);
    fs::write(&path, report).with_context(|| format!("writing {}", path.display()))?;
    tracing::debug!(report = %path.display(), sessions = sessions.len(), "rebuilt weekly report");
    Ok(true)
}

pub fn rebuild_monthly_stats(vault: &Path, today: NaiveDate, force: bool) -> Result<bool> {
    let start = month_start(today);
    let path = monthly_report_path(vault, start);
    if !force && is_fresh(&path, today) {
        return Ok(false);
    }

    let sessions = scan_sessions(vault, start, today)?;
    if sessions.is_empty() {
        return Ok(false);
    }
    let report = build_monthly_report(&sessions, start);
    fs::write(&path, report).with_context(|| format!("writing {}", path.display()))?;
    tracing::debug!(report = %path.display(), sessions = sessions.len(), "rebuilt monthly report");
    Ok(true)
}

// ===================================================================
// Aggregation
// ===================================================================

/// `0m`, `45m`, `~2h`, `~1h 30m`.
pub fn format_duration(total_min: u64) -> String {
    let (h, m) = (total_min / 60, total_min % 60);
    match (h, m) {
        (0, m) => format!("{m}m"),
        (h, 0) => format!("~{h}h"),
        (h, m) => format!("~{h}h {m}m"),
    }
}

fn money(cost: f64) -> String {
    format!("~${cost:.2}")
}

/// Key with the highest count; ties go to the smallest key.
fn top<K: Ord + Clone>(counts: &BTreeMap<K, usize>) -> Option<(K, usize)> {
    let mut best: Option<(K, usize)> = None;
    for (key, &count) in counts {
        if best.as_ref().is_none_or(|(_, c)| count > *c) {
            best = Some((key.clone(), count));
        }
    }
    best
}

/// Sessions, time and cost of some slice of the sessions.
#[derive(Debug, Clone, Default, PartialEq)]
struct Bucket {
    sessions: usize,
    time_min: u64,
    cost: f64,
    tools: u64,
    commits: usize,
    by_project: BTreeMap<String, usize>,
    tool_counts: BTreeMap<String, u64>,
}

impl Bucket {
    fn add(&mut self, meta: &SessionMeta) {
        self.sessions += 1;
        self.time_min += meta.duration_min;
        self.cost += meta.cost;
        self.tools += meta.tool_total();
        self.commits += meta.commits;
        *self.by_project.entry(meta.project.clone()).or_default() += 1;
        for (name, count) in &meta.tools {
            *self.tool_counts.entry(name.clone()).or_default() += count;
        }
    }

    fn top_project(&self) -> Option<String> {
        top(&self.by_project).map(|(name, _)| name)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Week {
    label: String,
    bucket: Bucket,
}

#[derive(Debug, Default)]
struct Aggregate {
    total: Bucket,
    tokens_in: u64,
    tokens_out: u64,
    /// Sessions desc, then name asc.
    projects: Vec<(String, Bucket)>,
    /// Count desc, then name asc.
    tools: Vec<(String, u64)>,
    /// Count desc, then path asc.
    files: Vec<(String, usize)>,
    days: BTreeMap<NaiveDate, Bucket>,
    busiest_hour: Option<(u32, usize)>,
}

impl Aggregate {
    fn new(sessions: &[SessionMeta]) -> Self {
        let mut agg = Aggregate::default();
        let mut projects: BTreeMap<String, Bucket> = BTreeMap::new();
        let mut files: BTreeMap<String, usize> = BTreeMap::new();
        let mut hours: BTreeMap<u32, usize> = BTreeMap::new();

        for meta in sessions {
            agg.total.add(meta);
            agg.tokens_in += meta.tokens_in;
            agg.tokens_out += meta.tokens_out;
            projects.entry(meta.project.clone()).or_default().add(meta);
            agg.days.entry(meta.date).or_default().add(meta);
            for file in &meta.files_touched {
                *files.entry(file.clone()).or_default() += 1;
            }
            if let Some(hour) = meta.start_hour() {
                *hours.entry(hour).or_default() += 1;
            }
        }

        agg.projects = projects.into_iter().collect();
        agg.projects
            .sort_by(|a, b| b.1.sessions.cmp(&a.1.sessions).then_with(|| a.0.cmp(&b.0)));

        agg.tools = agg.total.tool_counts.iter().map(|(n, c)| (n.clone(), *c)).collect();
        agg.tools.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        agg.files = files.into_iter().collect();
        agg.files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        agg.busiest_hour = top(&hours);
        agg
    }

    fn active_days(&self) -> usize {
        self.days.len()
    }

    /// Day with the most sessions; ties go to the earliest.
    fn busiest_day(&self) -> Option<(NaiveDate, &Bucket)> {
        let mut best: Option<(NaiveDate, &Bucket)> = None;
        for (day, bucket) in &self.days {
            if best.is_none_or(|(_, b)| bucket.sessions > b.sessions) {
                best = Some((*day, bucket));
            }
        }
        best
    }

    fn avg_session_min(&self) -> u64 {
        match self.total.sessions {
            0 => 0,
            n => self.total.time_min / n as u64,
        }
    }
}

/// Week-of-month buckets (days 1-7, 8-14, ...) up to the last week with a
/// session. Weeks without sessions are kept as empty rows.
fn weeks_of_month(sessions: &[SessionMeta], month: NaiveDate) -> Vec<Week> {
    let mut by_week: BTreeMap<u32, Bucket> = BTreeMap::new();
    for meta in sessions {
        by_week.entry((meta.date.day() - 1) / 7 + 1).or_default().add(meta);
    }
    let Some(&last_week) = by_week.keys().next_back() else {
        return Vec::new();
    };
    let last_day = last_day_of_month(month);
    let month_abbr = month.format("%b");
    (1..=last_week)
        .map(|w| {
            let first = (w - 1) * 7 + 1;
            let last = (w * 7).min(last_day);
            Week {
                label: format!("{month_abbr} {first}-{last}"),
                bucket: by_week.remove(&w).unwrap_or_default(),
            }
        })
        .collect()
}

// ===================================================================
// Rendering
// ===================================================================

fn percent(part: f64, whole: f64) -> String {
    if whole > 0.0 {
        format!("{:.0}%", part / whole * 100.0)
    } else {
        "0%".to_string()
    }
}

fn write_projects(out: &mut String, agg: &Aggregate) {
    out.push_str("## Projects\n\n");
    out.push_str("| Project | Sessions | Time | Cost | Tools | Commits |\n");
    out.push_str("|---------|----------|------|------|-------|---------|\n");
    for (name, p) in &agg.projects {
        let _ = writeln!(
            out,
            "| {name} | {} | {} | {} | {} | {} |",
            p.sessions,
            format_duration(p.time_min),
            money(p.cost),
            p.tools,
            p.commits
        );
    }
    out.push('\n');
}

fn write_tool_usage(out: &mut String, agg: &Aggregate) {
    if agg.tools.is_empty() {
        return;
    }
    out.push_str("## Tool Usage\n\n| Tool | Count | % |\n|------|-------|---|\n");
    for (name, count) in &agg.tools {
        let pct = percent(*count as f64, agg.total.tools as f64);
        let _ = writeln!(out, "| {name} | {count} | {pct} |");
    }
    out.push('\n');
}

fn write_tool_evolution(out: &mut String, agg: &Aggregate, weeks: &[Week]) {
    if agg.tools.is_empty() || weeks.len() < 2 {
        return;
    }
    out.push_str("## Tool Usage Evolution\n\n| Tool |");
    for week in weeks {
        let _ = write!(out, " {} |", week.label);
    }
    out.push_str(" Total |\n|------|");
    for _ in weeks {
        out.push_str("--------|");
    }
    out.push_str("-------|\n");
    for (name, total) in &agg.tools {
        let _ = write!(out, "| {name} |");
        for week in weeks {
            let n = week.bucket.tool_counts.get(name).copied().unwrap_or(0);
            let _ = write!(out, " {n} |");
        }
        let _ = writeln!(out, " {total} |");
    }
    out.push('\n');
}

fn write_top_files(out: &mut String, agg: &Aggregate) {
    if agg.files.is_empty() {
        return;
    }
    out.push_str("## Most Touched Files\n\n| File | Times Accessed |\n|------|---------------|\n");
    for (path, count) in agg.files.iter().take(TOP_FILES) {
        let _ = writeln!(out, "| {path} | {count} |");
    }
    out.push('\n');
}

fn write_streaks(out: &mut String, agg: &Aggregate, total_days: i64) {
    out.push_str("## Streaks & Trends\n\n");
    let _ = writeln!(out, "- **Active days**: {}/{total_days} days", agg.active_days());
    if let Some((day, bucket)) = agg.busiest_day() {
        let _ = writeln!(
            out,
            "- **Busiest day**: {} ({} sessions, {})",
            day.format("%Y-%m-%d"),
            bucket.sessions,
            money(bucket.cost)
        );
    }
    if let Some((hour, count)) = agg.busiest_hour {
        let _ = writeln!(out, "- **Busiest hour**: {hour}:00 ({count} sessions)");
    }
    if agg.total.sessions > 0 {
        let _ = writeln!(out, "- **Avg session length**: {}min", agg.avg_session_min());
    }
    out.push('\n');
}

fn write_cost_shares(out: &mut String, agg: &Aggregate) {
    out.push_str("## Cost Analysis\n\n| Project | Cost | % of Total |\n|---------|------|------------|\n");
    for (name, p) in &agg.projects {
        let _ = writeln!(
            out,
            "| {name} | {} | {} |",
            money(p.cost),
            percent(p.cost, agg.total.cost)
        );
    }
}

fn write_daily_breakdown(out: &mut String, agg: &Aggregate) {
    out.push_str("## Daily Breakdown\n\n");
    out.push_str("| Date | Sessions | Time | Cost | Top Project |\n");
    out.push_str("|------|----------|------|------|-------------|\n");
    for (day, d) in &agg.days {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} |",
            day.format("%Y-%m-%d"),
            d.sessions,
            format_duration(d.time_min),
            money(d.cost),
            d.top_project().unwrap_or_default()
        );
    }
    out.push('\n');
}

fn build_weekly_report(sessions: &[SessionMeta], start: NaiveDate, end: NaiveDate) -> String {
    let agg = Aggregate::new(sessions);
    let (start_s, end_s) = (start.format("%Y-%m-%d"), end.format("%Y-%m-%d"));
    let total_days = (end - start).num_days() + 1;

    let mut out = String::new();
    let _ = write!(
        out,
        "---\ndate_range: \"{start_s} to {end_s}\"\ntype: weekly-stats\nauto_generated: true\n\
         tags:\n  - claude-weekly\n---\n\n# Weekly Stats: {start_s} to {end_s}\n\n\
         > *Auto-generated from session notes.*\n\n"
    );

    out.push_str("## Overview\n\n| Metric | Value |\n|--------|-------|\n");
    let _ = writeln!(out, "| Sessions | {} |", agg.total.sessions);
    let _ = writeln!(out, "| Active Days | {}/{total_days} |", agg.active_days());
    let _ = writeln!(out, "| Total Time | {} |", format_duration(agg.total.time_min));
    let _ = writeln!(out, "| Total Cost | {} |", money(agg.total.cost));
    let _ = writeln!(out, "| Tokens In | {} |", format_token_count(agg.tokens_in));
    let _ = writeln!(out, "| Tokens Out | {} |", format_token_count(agg.tokens_out));
    let _ = writeln!(out, "| Tool Calls | {} |", agg.total.tools);
    let _ = writeln!(out, "| Commits | {} |", agg.total.commits);
    out.push('\n');

    write_projects(&mut out, &agg);
    write_tool_usage(&mut out, &agg);
    write_top_files(&mut out, &agg);
    write_streaks(&mut out, &agg, total_days);
    if agg.total.cost > 0.0 {
        write_cost_shares(&mut out, &agg);
        out.push('\n');
    }
    write_daily_breakdown(&mut out, &agg);
    out
}

fn build_monthly_report(sessions: &[SessionMeta], month: NaiveDate) -> String {
    let agg = Aggregate::new(sessions);
    let weeks = weeks_of_month(sessions, month);
    let last_active = sessions.iter().map(|s| s.date).max().unwrap_or(month).max(month);
    let total_days = (last_active - month).num_days() + 1;

    let mut out = String::new();
    let _ = write!(
        out,
        "---\nmonth: \"{}\"\ntype: monthly-stats\nauto_generated: true\n\
         tags:\n  - claude-monthly\n---\n\n# Monthly Stats: {}\n\n\
         > *Auto-generated from session notes.*\n\n",
        month.format("%Y-%m"),
        month.format("%B %Y")
    );

    out.push_str("## Summary\n\n| Metric | Value |\n|--------|-------|\n");
    let _ = writeln!(out, "| Total Sessions | {} |", agg.total.sessions);
    let _ = writeln!(out, "| Active Days | {}/{total_days} |", agg.active_days());
    let _ = writeln!(out, "| Total Time | {} |", format_duration(agg.total.time_min));
    let _ = writeln!(out, "| Total Cost | {} |", money(agg.total.cost));
    let _ = writeln!(
        out,
        "| Tokens | {} in / {} out |",
        format_token_count(agg.tokens_in),
        format_token_count(agg.tokens_out)
    );
    let _ = writeln!(out, "| Tool Calls | {} |", agg.total.tools);
    let _ = writeln!(out, "| Commits | {} |", agg.total.commits);
    let _ = writeln!(out, "| Projects | {} |", agg.projects.len());
    out.push('\n');

    write_projects(&mut out, &agg);

    if !weeks.is_empty() {
        out.push_str("## Weekly Breakdown\n\n| Week | Sessions | Time | Cost | Focus |\n");
        out.push_str("|------|----------|------|------|-------|\n");
        for week in &weeks {
            let b = &week.bucket;
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                week.label,
                b.sessions,
                format_duration(b.time_min),
                money(b.cost),
                b.top_project().unwrap_or_else(|| "-".to_string())
            );
        }
        out.push('\n');
    }

    write_tool_usage(&mut out, &agg);
    write_tool_evolution(&mut out, &agg, &weeks);
    write_top_files(&mut out, &agg);
    write_streaks(&mut out, &agg, total_days);
    if agg.total.cost > 0.0 {
        write_cost_shares(&mut out, &agg);
        if agg.active_days() > 0 {
            let _ = writeln!(
                out,
                "\n**Daily average**: {}/day (active days only)",
                money(agg.total.cost / agg.active_days() as f64)
            );
        }
        if !weeks.is_empty() {
            let _ = writeln!(
                out,
                "**Weekly average**: {}/week",
                money(agg.total.cost / weeks.len() as f64)
            );
        }
        out.push('\n');
    }
    write_daily_breakdown(&mut out, &agg);
    out
}

#[cfg(test)]
mod tests;
