use sqlx::{Row, SqlitePool};

use tictactoe_core::{DEFAULT_RATING, MatchId, RatingRecord};

use crate::ledger::{OutcomeReason, RatedResult, RatingChange};

/// Create all tables if they don't exist.
pub async fn init_db(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS ratings (
            user_id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            rating INTEGER NOT NULL DEFAULT 1000,
            wins INTEGER NOT NULL DEFAULT 0,
            losses INTEGER NOT NULL DEFAULT 0,
            draws INTEGER NOT NULL DEFAULT 0
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS match_results (
            match_id TEXT PRIMARY KEY,
            reason TEXT NOT NULL,
            player_one TEXT NOT NULL,
            player_two TEXT NOT NULL,
            winner_id TEXT,
            recorded_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Every persisted rating, used to seed the in-memory ledger at startup.
pub async fn load_ratings(pool: &SqlitePool) -> Result<Vec<(String, RatingRecord)>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT user_id, display_name, rating, wins, losses, draws FROM ratings",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| {
            (
                r.get::<String, _>("user_id"),
                RatingRecord {
                    display_name: r.get("display_name"),
                    rating: r.get::<i64, _>("rating") as i32,
                    wins: r.get::<i64, _>("wins") as u32,
                    losses: r.get::<i64, _>("losses") as u32,
                    draws: r.get::<i64, _>("draws") as u32,
                },
            )
        })
        .collect())
}

/// Persist one recorded outcome. The match row is the exactly-once guard:
/// a second call for the same match changes nothing and returns `false`.
pub async fn persist_outcome(
    pool: &SqlitePool,
    match_id: &MatchId,
    reason: OutcomeReason,
    result: &RatedResult,
    changes: &[RatingChange],
) -> Result<bool, sqlx::Error> {
    let (one, two, winner) = match result {
        RatedResult::Win { winner, loser } => (&winner.user_id, &loser.user_id, Some(&winner.user_id)),
        RatedResult::Draw { players } => (&players[0].user_id, &players[1].user_id, None),
    };

    let mut tx = pool.begin().await?;
    let inserted = sqlx::query(
        "INSERT OR IGNORE INTO match_results (match_id, reason, player_one, player_two, winner_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(match_id.as_str())
    .bind(reason.as_str())
    .bind(one)
    .bind(two)
    .bind(winner)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if inserted == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    for change in changes {
        let (wins, losses, draws) = counters(result, &change.user_id);
        sqlx::query(
            "INSERT INTO ratings (user_id, display_name, rating, wins, losses, draws)
             VALUES (?1, ?2, MAX(0, ?3 + ?4), ?5, ?6, ?7)
             ON CONFLICT(user_id) DO UPDATE SET
                display_name = excluded.display_name,
                rating = MAX(0, rating + ?4),
                wins = wins + ?5,
                losses = losses + ?6,
                draws = draws + ?7",
        )
        .bind(&change.user_id)
        .bind(&change.record.display_name)
        .bind(DEFAULT_RATING)
        .bind(change.delta)
        .bind(wins)
        .bind(losses)
        .bind(draws)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(true)
}

fn counters(result: &RatedResult, user_id: &str) -> (i64, i64, i64) {
    match result {
        RatedResult::Win { winner, .. } if winner.user_id == user_id => (1, 0, 0),
        RatedResult::Win { .. } => (0, 1, 0),
        RatedResult::Draw { .. } => (0, 0, 1),
    }
}
