//! Countdown gate in front of the join button.
//!
//! The gate opens the first time `now >= scheduled_at` and then stays open,
//! even if the server later moves `scheduled_at`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountdownTick {
    pub remaining: String,
    pub joinable: bool,
}

#[derive(Debug, Clone)]
pub struct JoinGate {
    scheduled_at: DateTime<Utc>,
    opened_at: Option<DateTime<Utc>>,
}

impl JoinGate {
    pub fn new(scheduled_at: DateTime<Utc>) -> Self {
        Self {
            scheduled_at,
            opened_at: None,
        }
    }

    pub fn scheduled_at(&self) -> DateTime<Utc> {
        self.scheduled_at
    }

    pub fn is_open(&self) -> bool {
        self.opened_at.is_some()
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    /// A server-side edit changes the displayed countdown but never closes
    /// an already open gate.
    pub fn reschedule(&mut self, scheduled_at: DateTime<Utc>) {
        self.scheduled_at = scheduled_at;
    }

    pub fn tick(&mut self, now: DateTime<Utc>) -> CountdownTick {
        if self.opened_at.is_none() && now >= self.scheduled_at {
            info!("Join gate opened at {}", now);
            self.opened_at = Some(now);
        }

        if self.is_open() {
            CountdownTick {
                remaining: format_countdown(ChronoDuration::zero()),
                joinable: true,
            }
        } else {
            CountdownTick {
                remaining: format_countdown(self.scheduled_at - now),
                joinable: false,
            }
        }
    }
}

/// `HH:MM:SS`, prefixed with `Nd ` once a day or more remains. Partial
/// seconds round up so the display never reads zero while still closed.
pub fn format_countdown(remaining: ChronoDuration) -> String {
    let millis = remaining.num_milliseconds().max(0);
    let total_secs = (millis + 999) / 1000;
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if days > 0 {
        format!("{days}d {hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    }
}

/// Ticks the gate once per second until it opens, publishing every tick.
/// The task returns the opened gate.
pub fn spawn_countdown<F>(
    mut gate: JoinGate,
    clock: F,
) -> (watch::Receiver<CountdownTick>, JoinHandle<JoinGate>)
where
    F: Fn() -> DateTime<Utc> + Send + 'static,
{
    let first = gate.tick(clock());
    let (tx, rx) = watch::channel(first.clone());

    let handle = tokio::spawn(async move {
        if first.joinable {
            return gate;
        }
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            let tick = gate.tick(clock());
            let open = tick.joinable;
            tx.send_replace(tick);
            if open {
                return gate;
            }
        }
    });

    (rx, handle)
}
