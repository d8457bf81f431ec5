use std::{collections::BTreeMap, io::Write, path::Path, sync::Arc};

use anyhow::Result;
use chrono::{Days, Duration, Local, NaiveDate};
use clap::Parser;
use futures::future::try_join_all;

use crate::{
    daemon::{
        storage::{entities::SessionRecordEntity, session_storage::SessionStorageImpl},
        SESSION_DIR,
    },
    utils::time::format_duration,
};

#[derive(Debug, Parser)]
pub struct SessionsCommand {
    #[arg(long, help = "Last day to show, in YYYY-MM-DD. Days are UTC. Defaults to today")]
    date: Option<NaiveDate>,
    #[arg(long, default_value_t = 1, help = "Number of days ending at --date")]
    days: u32,
    #[arg(long, help = "Print stored records as json lines")]
    json: bool,
    #[arg(long, help = "Print total time per application instead of single sessions")]
    summary: bool,
}

pub async fn process_sessions_command(
    command: SessionsCommand,
    app_dir: &Path,
    today: NaiveDate,
) -> Result<()> {
    let storage = SessionStorageImpl::new(app_dir.join(SESSION_DIR))?;
    let last_day = command.date.unwrap_or(today);
    let sessions = collect_sessions(&storage, last_day, command.days).await?;

    let mut out = std::io::stdout().lock();
    if command.json {
        write_json(&mut out, &sessions)
    } else if command.summary {
        write_summary(&mut out, &sessions)
    } else {
        write_sessions(&mut out, &sessions)
    }
}

/// Sessions of `days` days ending with `last_day`, oldest first.
pub async fn collect_sessions(
    storage: &SessionStorageImpl,
    last_day: NaiveDate,
    days: u32,
) -> Result<Vec<SessionRecordEntity>> {
    let dates = (0..days.max(1))
        .rev()
        .filter_map(|offset| last_day.checked_sub_days(Days::new(offset.into())));
    let per_day = try_join_all(dates.map(|date| storage.get_sessions_for(date))).await?;
    Ok(per_day.into_iter().flatten().collect())
}

fn write_json(out: &mut impl Write, sessions: &[SessionRecordEntity]) -> Result<()> {
    for session in sessions {
        serde_json::to_writer(&mut *out, session)?;
        writeln!(out)?;
    }
    Ok(())
}

fn write_sessions(out: &mut impl Write, sessions: &[SessionRecordEntity]) -> Result<()> {
    for session in sessions {
        writeln!(
            out,
            "{}  {:>8}  {:<15} {} | {}",
            session.start_time.with_timezone(&Local).format("%F %T"),
            format_duration(session.duration),
            session.category.to_string(),
            session.app_name,
            session.window_title,
        )?;
    }
    let total = sessions
        .iter()
        .fold(Duration::zero(), |acc, v| acc + v.duration);
    writeln!(out, "Total {} in {} sessions", format_duration(total), sessions.len())?;
    Ok(())
}

fn write_summary(out: &mut impl Write, sessions: &[SessionRecordEntity]) -> Result<()> {
    let mut totals: BTreeMap<Arc<str>, Duration> = BTreeMap::new();
    for session in sessions {
        *totals.entry(session.app_name.clone()).or_insert_with(Duration::zero) +=
            session.duration;
    }
    let mut totals = totals.into_iter().collect::<Vec<_>>();
    totals.sort_by(|a, b| b.1.cmp(&a.1));
    for (app, duration) in totals {
        writeln!(out, "{:>8}  {app}", format_duration(duration))?;
    }
    Ok(())
}
