//! Appointment reminders. Delivery is a log line per appointment.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use bks_db::EntityStore;
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderWindow {
    /// All of tomorrow (UTC).
    Daily,
    /// The next hour.
    Hourly,
}

impl ReminderWindow {
    /// Half-open `[start, end)` range covered at `now`.
    pub fn bounds(&self, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        match self {
            ReminderWindow::Daily => {
                let tomorrow = now
                    .date_naive()
                    .succ_opt()
                    .context("no day after current date")?;
                let start = Utc.from_utc_datetime(&tomorrow.and_time(NaiveTime::default()));
                Ok((start, start + Duration::days(1)))
            }
            ReminderWindow::Hourly => Ok((now, now + Duration::hours(1))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderWindow::Daily => "daily",
            ReminderWindow::Hourly => "hourly",
        }
    }
}

impl fmt::Display for ReminderWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReminderWindow {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(ReminderWindow::Daily),
            "hourly" => Ok(ReminderWindow::Hourly),
            other => Err(anyhow!(
                "unknown reminder window '{other}'. expected one of: daily | hourly"
            )),
        }
    }
}

/// Log a reminder for every appointment in the window. Returns how many.
pub async fn send_reminders(
    store: &dyn EntityStore,
    window: ReminderWindow,
    now: DateTime<Utc>,
) -> Result<usize> {
    let (start, end) = window.bounds(now)?;
    info!(%window, %start, %end, "starting appointment reminders");

    let due = store
        .appointments_between(start, end)
        .await
        .context("reminder query failed")?;
    for (appointment, client) in &due {
        info!(
            %window,
            appointment_id = appointment.id,
            client = %client.name,
            time = %appointment.time,
            "appointment reminder"
        );
    }

    info!(%window, sent = due.len(), "appointment reminders completed");
    Ok(due.len())
}
