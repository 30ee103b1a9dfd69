use super::*;
use chrono::{NaiveTime, TimeZone};
use std::time::SystemTime;

fn date(m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, m, d).unwrap()
}

fn noon(day: NaiveDate) -> NaiveDateTime {
    day.and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap())
}

fn note(vault: &Path, project: &str, file: &str, frontmatter: &str) {
    let dir = vault.join(project);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(file), format!("---\n{frontmatter}---\n\n# Claude Session - {project}\n")).unwrap();
}

/// Set the mtime of `path` to noon (local) on `day`.
fn touch(path: &Path, day: NaiveDate) {
    let local = Local.from_local_datetime(&noon(day)).single().unwrap();
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::from(local))
        .unwrap();
}

fn week_fixture(vault: &Path) {
    note(
        vault,
        "alpha",
        "2026-02-16_0915.md",
        "start_time: 09:15\nduration: 30min\ntools:\n  Edit: 2\n  Read: 6\n\
         estimated_cost: \"$1.00\"\nfiles_touched:\n  - /a.rs\n  - /b.rs\ncommits:\n  - a1b2c3d Fix\n",
    );
    note(
        vault,
        "beta",
        "2026-02-16_1430.md",
        "start_time: 14:30\nduration: 1h 30min\ntools:\n  Read: 2\n\
         estimated_cost: \"$3.00\"\nfiles_touched:\n  - /a.rs\n",
    );
    note(
        vault,
        "alpha",
        "2026-02-18_0905.md",
        "start_time: 09:05\nduration: 20min\ntools:\n  Bash: 4\n",
    );
    // Previous week.
    note(vault, "alpha", "2026-02-15_1000.md", "start_time: 10:00\nduration: 5min\n");
}

// =================================================================
// Helpers
// =================================================================

#[test]
fn durations_are_humanized() {
    assert_eq!(format_duration(0), "0m");
    assert_eq!(format_duration(30), "30m");
    assert_eq!(format_duration(60), "~1h");
    assert_eq!(format_duration(90), "~1h 30m");
}

#[test]
fn weeks_start_on_monday() {
    assert_eq!(week_start(date(2, 19)), date(2, 16));
    assert_eq!(week_start(date(2, 16)), date(2, 16));
    assert_eq!(week_start(date(2, 22)), date(2, 16));
}

#[test]
fn month_week_labels_clamp_to_month_end() {
    let sessions = vec![SessionMeta {
        project: "p".into(),
        date: NaiveDate::from_ymd_opt(2026, 1, 30).unwrap(),
        ..Default::default()
    }];
    let weeks = weeks_of_month(&sessions, NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
    let labels: Vec<_> = weeks.iter().map(|w| w.label.as_str()).collect();
    assert_eq!(labels, ["Jan 1-7", "Jan 8-14", "Jan 15-21", "Jan 22-28", "Jan 29-31"]);
    assert_eq!(weeks[4].bucket.sessions, 1);
    assert_eq!(weeks[0].bucket.top_project(), None);
}

#[test]
fn busiest_day_and_hour_ties_go_to_earliest() {
    let meta = |d: u32, start: &str| SessionMeta {
        project: "p".into(),
        date: date(2, d),
        start_time: Some(start.into()),
        ..Default::default()
    };
    let agg = Aggregate::new(&[meta(17, "15:00"), meta(16, "11:00")]);
    assert_eq!(agg.busiest_day().map(|(d, _)| d), Some(date(2, 16)));
    assert_eq!(agg.busiest_hour, Some((11, 1)));
}

// =================================================================
// Weekly
// =================================================================

#[test]
fn weekly_report_contents() {
    let vault = tempfile::tempdir().unwrap();
    week_fixture(vault.path());

    assert!(rebuild_weekly_stats_if_stale(vault.path(), noon(date(2, 19))).unwrap());
    let path = weekly_report_path(vault.path(), date(2, 16), date(2, 19));
    let got = fs::read_to_string(&path).unwrap();

    assert!(got.starts_with(
        "---\ndate_range: \"2026-02-16 to 2026-02-19\"\ntype: weekly-stats\nauto_generated: true\n\
         tags:\n  - claude-weekly\n---\n\n# Weekly Stats: 2026-02-16 to 2026-02-19\n"
    ));
    for line in [
        "| Sessions | 3 |",
        "| Active Days | 2/4 |",
        "| Total Time | ~2h 20m |",
        "| Total Cost | ~$4.00 |",
        "| Tool Calls | 14 |",
        "| Commits | 1 |",
        "| alpha | 2 | 50m | ~$1.00 | 12 | 1 |\n| beta | 1 | ~1h 30m | ~$3.00 | 2 | 0 |",
        "| Read | 8 | 57% |\n| Bash | 4 | 29% |\n| Edit | 2 | 14% |",
        "| /a.rs | 2 |\n| /b.rs | 1 |",
        "- **Active days**: 2/4 days",
        "- **Busiest day**: 2026-02-16 (2 sessions, ~$4.00)",
        "- **Busiest hour**: 9:00 (2 sessions)",
        "- **Avg session length**: 46min",
        "| alpha | ~$1.00 | 25% |\n| beta | ~$3.00 | 75% |",
        "| 2026-02-16 | 2 | ~2h | ~$4.00 | alpha |\n| 2026-02-18 | 1 | 20m | ~$0.00 | alpha |",
    ] {
        assert!(got.contains(line), "missing {line:?} in:\n{got}");
    }
    assert!(!got.contains("2026-02-15"));
}

#[test]
fn weekly_skips_when_fresh_today() {
    let vault = tempfile::tempdir().unwrap();
    week_fixture(vault.path());
    let today = date(2, 19);
    let path = weekly_report_path(vault.path(), date(2, 16), today);
    fs::write(&path, "hand edited").unwrap();

    touch(&path, today);
    assert!(!rebuild_weekly_stats_if_stale(vault.path(), noon(today)).unwrap());
    assert_eq!(fs::read_to_string(&path).unwrap(), "hand edited");

    touch(&path, date(2, 18));
    assert!(rebuild_weekly_stats_if_stale(vault.path(), noon(today)).unwrap());
    assert!(fs::read_to_string(&path).unwrap().contains("# Weekly Stats"));
}

#[test]
fn force_ignores_freshness() {
    let vault = tempfile::tempdir().unwrap();
    week_fixture(vault.path());
    let today = date(2, 19);
    let path = weekly_report_path(vault.path(), date(2, 16), today);
    fs::write(&path, "stale").unwrap();
    touch(&path, today);

    assert!(rebuild_weekly_stats(vault.path(), today, true).unwrap());
    assert_ne!(fs::read_to_string(&path).unwrap(), "stale");
}

#[test]
fn superseded_weekly_removed_even_without_sessions() {
    let vault = tempfile::tempdir().unwrap();
    let old = vault.path().join("Weekly-2026-02-16-to-2026-02-18.md");
    let other_week = vault.path().join("Weekly-2026-02-09-to-2026-02-15.md");
    fs::write(&old, "old").unwrap();
    fs::write(&other_week, "keep").unwrap();

    assert!(!rebuild_weekly_stats_if_stale(vault.path(), noon(date(2, 19))).unwrap());
    assert!(!old.exists());
    assert!(other_week.exists());
    assert!(!weekly_report_path(vault.path(), date(2, 16), date(2, 19)).exists());
}

// =================================================================
// Monthly
// =================================================================

#[test]
fn monthly_report_contents() {
    let vault = tempfile::tempdir().unwrap();
    note(
        vault.path(),
        "alpha",
        "2026-02-03_1000.md",
        "start_time: 10:00\ntools:\n  Read: 2\nestimated_cost: \"$0.50\"\n",
    );
    note(
        vault.path(),
        "beta",
        "2026-02-10_1600.md",
        "start_time: 16:00\nduration: 45min\ntools:\n  Bash: 1\n  Read: 1\nestimated_cost: \"$1.50\"\n",
    );
    note(vault.path(), "beta", "2026-01-31_1600.md", "start_time: 16:00\n");

    assert!(rebuild_monthly_stats_if_stale(vault.path(), noon(date(2, 10))).unwrap());
    let got = fs::read_to_string(monthly_report_path(vault.path(), date(2, 1))).unwrap();

    assert!(got.starts_with("---\nmonth: \"2026-02\"\ntype: monthly-stats\n"));
    for line in [
        "# Monthly Stats: February 2026",
        "| Total Sessions | 2 |",
        "| Active Days | 2/10 |",
        "| Projects | 2 |",
        "| Feb 1-7 | 1 | 0m | ~$0.50 | alpha |\n| Feb 8-14 | 1 | 45m | ~$1.50 | beta |",
        "| Tool | Feb 1-7 | Feb 8-14 | Total |",
        "| Read | 2 | 1 | 3 |\n| Bash | 0 | 1 | 1 |",
        "**Daily average**: ~$1.00/day (active days only)",
        "**Weekly average**: ~$1.00/week",
    ] {
        assert!(got.contains(line), "missing {line:?} in:\n{got}");
    }
    assert!(!got.contains("2026-01-31"));
}

#[test]
fn monthly_without_sessions_writes_nothing() {
    let vault = tempfile::tempdir().unwrap();
    assert!(!rebuild_monthly_stats_if_stale(vault.path(), noon(date(2, 10))).unwrap());
    assert!(!monthly_report_path(vault.path(), date(2, 1)).exists());
}
