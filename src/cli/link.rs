//! CLI handlers for join links and the countdown gate.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::io::Write;

use crate::backend::BackendClient;
use crate::cli::args::{CheckLinkCliArgs, CountdownCliArgs};
use crate::config::Config;
use crate::session::{
    spawn_countdown, validate_access, AccessDecision, JoinGate, JoinParams, MeetingDirectory,
};

pub async fn handle_check_link_command(args: CheckLinkCliArgs) -> Result<()> {
    let params = JoinParams::from_url(&args.url)?;
    let now_ms = args.now_ms.unwrap_or_else(|| Utc::now().timestamp_millis());

    match validate_access(&params, &params.meeting_id, now_ms) {
        AccessDecision::Allowed(token) => {
            println!("Allowed: meeting {} for {}", token.meeting_id, token.email);
            if let Some(expires) = DateTime::<Utc>::from_timestamp_millis(token.expires_at_ms) {
                println!("Link valid until {}", expires.to_rfc3339());
            }
        }
        AccessDecision::Denied(reason) => {
            println!("Denied: {}", reason);
            return Ok(());
        }
        AccessDecision::Expired => {
            println!("Expired: request a new join link");
            return Ok(());
        }
    }

    if args.fetch {
        let config = Config::load()?;
        let backend = BackendClient::from_config(&config.backend)?;
        let session = backend
            .fetch(&params.meeting_id)
            .await
            .context("Failed to look up meeting")?;

        let mut gate = JoinGate::new(session.scheduled_at);
        let tick = gate.tick(Utc::now());
        println!(
            "Meeting status: {:?}, {}/{} participants",
            session.status, session.current_participants, session.max_participants
        );
        if let Some(reason) = session.join_blocker() {
            println!("Cannot join: {}", reason);
        } else if tick.joinable {
            println!("Joining is open");
        } else {
            println!("Joining opens in {}", tick.remaining);
        }
    }

    Ok(())
}

pub async fn handle_countdown_command(args: CountdownCliArgs) -> Result<()> {
    let scheduled_at = DateTime::parse_from_rfc3339(&args.at)
        .with_context(|| format!("Invalid start time '{}'", args.at))?
        .with_timezone(&Utc);

    let (mut ticks, handle) = spawn_countdown(JoinGate::new(scheduled_at), Utc::now);
    let mut stdout = std::io::stdout();

    loop {
        let tick = ticks.borrow_and_update().clone();
        print!("\rJoin opens in {}   ", tick.remaining);
        stdout.flush()?;
        if tick.joinable || ticks.changed().await.is_err() {
            break;
        }
    }

    let gate = handle.await.context("Countdown task failed")?;
    let opened = gate
        .opened_at()
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| scheduled_at.to_rfc3339());
    println!("\nJoining is open (since {})", opened);
    Ok(())
}
