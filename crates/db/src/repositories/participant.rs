use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Row, Sqlite, SqliteConnection, Transaction};

use santa_core::domain::participant::{MatchDetails, Participant, UserId};
use santa_core::domain::scope::{Scope, ScopeKey, ScopeStatus};
use santa_core::store::{ParticipantStore, StoreError, DEFAULT_MATCHING_LEASE};

use super::{is_unique_violation, RepositoryError};
use crate::DbPool;

pub struct SqlParticipantStore {
    pool: DbPool,
    matching_lease: Duration,
}

impl SqlParticipantStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool, matching_lease: DEFAULT_MATCHING_LEASE }
    }

    /// How long a scope may sit in `matching` before another run can take it over.
    pub fn with_matching_lease(mut self, lease: Duration) -> Self {
        self.matching_lease = lease;
        self
    }

    // Read-then-write transactions must hold the write lock from the start:
    // a deferred transaction that upgrades under WAL fails with SQLITE_BUSY
    // instead of waiting on busy_timeout.
    async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>, StoreError> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await.map_err(RepositoryError::from)?)
    }
}

/// Fixed-width UTC timestamps so that stored values order as text.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

fn row_to_participant(row: &sqlx::sqlite::SqliteRow) -> Result<Participant, RepositoryError> {
    let enterprise_id: Option<String> = row.try_get("enterprise_id").map_err(decode)?;
    let team_id: Option<String> = row.try_get("team_id").map_err(decode)?;
    let channel_id: Option<String> = row.try_get("channel_id").map_err(decode)?;
    let year: i64 = row.try_get("year").map_err(decode)?;
    let user_id: String = row.try_get("user_id").map_err(decode)?;
    let user_name: String = row.try_get("user_name").map_err(decode)?;
    let address: Option<String> = row.try_get("address").map_err(decode)?;
    let is_host: i64 = row.try_get("is_host").map_err(decode)?;
    let response_url: String = row.try_get("response_url").map_err(decode)?;
    let match_user_id: Option<String> = row.try_get("match_user_id").map_err(decode)?;
    let match_user_name: Option<String> = row.try_get("match_user_name").map_err(decode)?;
    let match_address: Option<String> = row.try_get("match_address").map_err(decode)?;

    let year = i32::try_from(year)
        .map_err(|_| RepositoryError::Decode(format!("year `{year}` is out of range")))?;

    let your_match = match_user_id.map(|match_user_id| MatchDetails {
        user_id: UserId(match_user_id),
        user_name: match_user_name.unwrap_or_default(),
        address: match_address,
    });

    Ok(Participant {
        scope: Scope::new(enterprise_id, team_id, channel_id, year),
        user_id: UserId(user_id),
        user_name,
        address,
        is_host: is_host != 0,
        response_url,
        your_match,
    })
}

fn parse_status(raw: &str) -> Result<ScopeStatus, StoreError> {
    raw.parse::<ScopeStatus>().map_err(StoreError::Decode)
}

async fn insert_participant(
    conn: &mut SqliteConnection,
    participant: &Participant,
) -> Result<(), StoreError> {
    let key = participant.scope.key();
    let now = timestamp(Utc::now());

    let result = sqlx::query(
        "INSERT INTO participant (scope_key, enterprise_id, team_id, channel_id, year,
                                  user_id, user_name, address, is_host, response_url,
                                  match_user_id, match_user_name, match_address,
                                  created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(key.as_str())
    .bind(&participant.scope.enterprise_id)
    .bind(&participant.scope.team_id)
    .bind(&participant.scope.channel_id)
    .bind(i64::from(participant.scope.year))
    .bind(&participant.user_id.0)
    .bind(&participant.user_name)
    .bind(&participant.address)
    .bind(i64::from(participant.is_host))
    .bind(&participant.response_url)
    .bind(participant.your_match.as_ref().map(|m| m.user_id.0.clone()))
    .bind(participant.your_match.as_ref().map(|m| m.user_name.clone()))
    .bind(participant.your_match.as_ref().and_then(|m| m.address.clone()))
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(error) if is_unique_violation(&error) => {
            Err(StoreError::conflict(&key, &participant.user_id))
        }
        Err(error) => Err(RepositoryError::from(error).into()),
    }
}

async fn load_status(
    conn: &mut SqliteConnection,
    scope: &ScopeKey,
) -> Result<Option<ScopeStatus>, StoreError> {
    let raw: Option<String> =
        sqlx::query_scalar("SELECT status FROM santa_scope WHERE scope_key = ?")
            .bind(scope.as_str())
            .fetch_optional(&mut *conn)
            .await
            .map_err(RepositoryError::from)?;

    raw.as_deref().map(parse_status).transpose()
}

async fn count(pool: &DbPool, sql: &str, scope: &ScopeKey) -> Result<u64, StoreError> {
    let count: i64 = sqlx::query_scalar(sql)
        .bind(scope.as_str())
        .fetch_one(pool)
        .await
        .map_err(RepositoryError::from)?;
    u64::try_from(count).map_err(|_| StoreError::Decode(format!("negative count `{count}`")))
}

#[async_trait]
impl ParticipantStore for SqlParticipantStore {
    async fn count_all(&self, scope: &ScopeKey) -> Result<u64, StoreError> {
        count(&self.pool, "SELECT COUNT(*) FROM participant WHERE scope_key = ?", scope).await
    }

    async fn count_matched(&self, scope: &ScopeKey) -> Result<u64, StoreError> {
        count(
            &self.pool,
            "SELECT COUNT(*) FROM participant WHERE scope_key = ? AND match_user_id IS NOT NULL",
            scope,
        )
        .await
    }

    async fn get_by_id(
        &self,
        scope: &ScopeKey,
        user_id: &UserId,
    ) -> Result<Participant, StoreError> {
        let row = sqlx::query(
            "SELECT enterprise_id, team_id, channel_id, year, user_id, user_name, address,
                    is_host, response_url, match_user_id, match_user_name, match_address
             FROM participant WHERE scope_key = ? AND user_id = ?",
        )
        .bind(scope.as_str())
        .bind(&user_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        match row {
            Some(ref row) => Ok(row_to_participant(row)?),
            None => Err(StoreError::not_found(scope, user_id)),
        }
    }

    async fn get_unmatched(&self, scope: &ScopeKey) -> Result<Vec<Participant>, StoreError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT enterprise_id, team_id, channel_id, year, user_id, user_name, address,
                    is_host, response_url, match_user_id, match_user_name, match_address
             FROM participant
             WHERE scope_key = ? AND match_user_id IS NULL
             ORDER BY id ASC",
        )
        .bind(scope.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_participant).collect::<Result<Vec<_>, _>>()?)
    }

    async fn get_all(&self, scope: &ScopeKey) -> Result<Vec<Participant>, StoreError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT enterprise_id, team_id, channel_id, year, user_id, user_name, address,
                    is_host, response_url, match_user_id, match_user_name, match_address
             FROM participant
             WHERE scope_key = ?
             ORDER BY id ASC",
        )
        .bind(scope.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_participant).collect::<Result<Vec<_>, _>>()?)
    }

    async fn register(&self, participant: &Participant) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        insert_participant(&mut *conn, participant).await
    }

    async fn record_match(
        &self,
        scope: &ScopeKey,
        giver: &UserId,
        recipient: &MatchDetails,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE participant
             SET match_user_id = ?, match_user_name = ?, match_address = ?, updated_at = ?
             WHERE scope_key = ? AND user_id = ? AND match_user_id IS NULL",
        )
        .bind(&recipient.user_id.0)
        .bind(&recipient.user_name)
        .bind(&recipient.address)
        .bind(timestamp(Utc::now()))
        .bind(scope.as_str())
        .bind(&giver.0)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        // Nothing updated: either the giver is unknown or already holds a match.
        match self.get_by_id(scope, giver).await {
            Ok(_) => Err(StoreError::conflict(scope, giver)),
            Err(error) => Err(error),
        }
    }

    async fn scope_status(&self, scope: &ScopeKey) -> Result<Option<ScopeStatus>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        load_status(&mut *conn, scope).await
    }

    async fn open_scope(&self, host: &Participant) -> Result<(), StoreError> {
        let key = host.scope.key();
        let now = timestamp(Utc::now());
        let mut tx = self.begin_write().await?;

        let inserted = sqlx::query(
            "INSERT INTO santa_scope (scope_key, enterprise_id, team_id, channel_id, year,
                                      host_user_id, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 'open', ?, ?)",
        )
        .bind(key.as_str())
        .bind(&host.scope.enterprise_id)
        .bind(&host.scope.team_id)
        .bind(&host.scope.channel_id)
        .bind(i64::from(host.scope.year))
        .bind(&host.user_id.0)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(error) if is_unique_violation(&error) => {
                return Err(StoreError::ScopeExists { scope_key: key.0 });
            }
            Err(error) => return Err(RepositoryError::from(error).into()),
        }

        insert_participant(&mut *tx, host).await?;
        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn enroll(&self, participant: &Participant) -> Result<(), StoreError> {
        let key = participant.scope.key();
        let mut tx = self.begin_write().await?;

        match load_status(&mut *tx, &key).await? {
            None => return Err(StoreError::ScopeMissing { scope_key: key.0 }),
            Some(ScopeStatus::Open) => {}
            Some(status) => return Err(StoreError::ScopeBusy { scope_key: key.0, status }),
        }

        insert_participant(&mut *tx, participant).await?;
        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn begin_matching(&self, scope: &ScopeKey) -> Result<(), StoreError> {
        let now = Utc::now();
        let lease = chrono::Duration::from_std(self.matching_lease)
            .map_err(|error| StoreError::Backend(format!("invalid matching lease: {error}")))?;

        // A `matching` row older than the lease belongs to a run that never finished.
        let result = sqlx::query(
            "UPDATE santa_scope SET status = 'matching', updated_at = ?
             WHERE scope_key = ?
               AND (status = 'open' OR (status = 'matching' AND updated_at < ?))",
        )
        .bind(timestamp(now))
        .bind(scope.as_str())
        .bind(timestamp(now - lease))
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        match self.scope_status(scope).await? {
            None => Err(StoreError::ScopeMissing { scope_key: scope.0.clone() }),
            Some(status) => Err(StoreError::ScopeBusy { scope_key: scope.0.clone(), status }),
        }
    }

    async fn finish_matching(&self, scope: &ScopeKey) -> Result<ScopeStatus, StoreError> {
        let mut tx = self.begin_write().await?;

        let unmatched: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM participant WHERE scope_key = ? AND match_user_id IS NULL",
        )
        .bind(scope.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(RepositoryError::from)?;

        let status = if unmatched == 0 { ScopeStatus::Matched } else { ScopeStatus::Open };

        let result = sqlx::query(
            "UPDATE santa_scope SET status = ?, updated_at = ?
             WHERE scope_key = ? AND status = 'matching'",
        )
        .bind(status.as_str())
        .bind(timestamp(Utc::now()))
        .bind(scope.as_str())
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::from)?;

        if result.rows_affected() == 0 {
            return match load_status(&mut *tx, scope).await? {
                None => Err(StoreError::ScopeMissing { scope_key: scope.0.clone() }),
                Some(current) => {
                    Err(StoreError::ScopeBusy { scope_key: scope.0.clone(), status: current })
                }
            };
        }

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(status)
    }
}
