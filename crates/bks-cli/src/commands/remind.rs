//! `bks remind --window daily|hourly`.

use anyhow::Result;
use bks_runtime::{send_reminders, ReminderWindow};
use chrono::Utc;

use super::open_store;

pub async fn run(window: &str) -> Result<()> {
    // reject bad input before touching the database
    let window: ReminderWindow = window.parse()?;
    let store = open_store().await?;
    let sent = send_reminders(store.as_ref(), window, Utc::now()).await?;
    println!("reminders_sent={sent} window={window}");
    Ok(())
}
