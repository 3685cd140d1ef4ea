//! Scripted session against an in-memory authority.
//!
//! Plays one create/move/result round followed by an accepted rematch,
//! printing each notification as the session emits it and the intents it
//! sent at the end.

use std::time::Duration;

use anyhow::{Context, Result};
use match_client::{MatchClient, MockTransport};
use match_core::Notification;
use match_types::{
    Intent, MatchCreated, MatchId, MatchStarted, MatchStats, Move, PlayerStats, PullSnapshot,
    PushEvent, RematchStarted, RematchStatusChanged, RoundResult, Winner,
};
use tokio::sync::broadcast::error::RecvError;

use super::describe_notification;
use crate::config::Config;

/// Pause between scripted steps so the session task can catch up.
const STEP: Duration = Duration::from_millis(50);

/// Run the demo session.
pub async fn run(config: &Config, coins: u64, stake: u64) -> Result<()> {
    if stake == 0 || stake > coins {
        anyhow::bail!("stake must be between 1 and the starting balance ({coins})");
    }

    let transport = MockTransport::new();
    transport.queue_pull(
        PullSnapshot {
            coins,
            stats: PlayerStats::default(),
            open_matches: Vec::new(),
            current_match: None,
        }
        .to_bytes()?,
    );

    let client = MatchClient::start(config.client_config(), transport.clone());
    let printer = tokio::spawn(print_notifications(client.subscribe()));
    settle().await;

    let first = MatchId::random();
    client.create_match(stake).await?;
    settle().await;
    push(&transport, PushEvent::MatchCreated(MatchCreated { match_id: first.clone() }))?;
    push(
        &transport,
        PushEvent::MatchStarted(MatchStarted {
            match_id: first,
            rematch: false,
        }),
    )?;
    settle().await;

    client.submit_move(Move::Rock).await?;
    push(
        &transport,
        PushEvent::RoundResult(RoundResult {
            creator_move: Move::Rock,
            joiner_move: Move::Scissors,
            winner: Winner::Player1,
            stats: MatchStats {
                creator_wins: 1,
                joiner_wins: 0,
                draws: 0,
            },
            can_rematch: true,
        }),
    )?;
    settle().await;

    client.request_rematch().await?;
    push(
        &transport,
        PushEvent::RematchStatusChanged(RematchStatusChanged {
            creator_requested: true,
            joiner_requested: true,
        }),
    )?;
    settle().await;

    // Won both stakes back, then paid the rematch stake.
    let balance = coins;
    push(
        &transport,
        PushEvent::RematchStarted(RematchStarted {
            match_id: MatchId::random(),
            coins: balance,
            role: None,
            stake: None,
        }),
    )?;
    settle().await;

    let snapshot = client.snapshot().await?;
    if let Some(current) = &snapshot.current {
        println!(
            "final: match {} {} with {} coins",
            current.id, current.status, snapshot.balance.coins
        );
    }

    client.shutdown().await;
    printer.await.context("Notification printer failed")?;

    println!("sent:");
    for frame in transport.sent_messages() {
        let intent = Intent::from_bytes(&frame)?;
        println!("  {}", serde_json::to_string(&intent)?);
    }

    Ok(())
}

fn push(transport: &MockTransport, event: PushEvent) -> Result<()> {
    tracing::debug!(event = event.name(), "pushing");
    transport.queue_push(event.to_bytes()?);
    Ok(())
}

async fn settle() {
    tokio::time::sleep(STEP).await;
}

async fn print_notifications(mut notifications: tokio::sync::broadcast::Receiver<Notification>) {
    loop {
        match notifications.recv().await {
            Ok(notification) => println!("{}", describe_notification(&notification)),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "notification printer lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
