//! PostgreSQL reservation store
//!
//! The settlement intent lives in the nullable `settle_*` columns; every
//! transition is a single conditional UPDATE.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::wallets::wallet_type;
use super::{corrupt, is_unique_violation};
use crate::error::{LedgerError, LedgerResult};
use crate::reservation::{ReservationStatus, ReservationStore, ReservedTransfer, SettlementIntent};

const SELECT_RESERVATION: &str = r#"
    SELECT reserve_number, source_symbol, dest_symbol, source_amount, reserved_dest_amount,
           sender_uuid, sender_wallet_type, receiver_uuid, receiver_wallet_type,
           reserve_date, exp_date, status, settle_ref, settle_attempt, settle_description,
           settle_started_at
    FROM reserved_transfers_tb
"#;

pub struct PgReservationStore {
    pool: PgPool,
}

impl PgReservationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Zero affected rows means either a failed expectation or an unknown number
    async fn affected(&self, reserve_number: &str, rows: u64) -> LedgerResult<bool> {
        if rows > 0 {
            return Ok(true);
        }
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM reserved_transfers_tb WHERE reserve_number = $1)")
                .bind(reserve_number)
                .fetch_one(&self.pool)
                .await?;
        if exists {
            Ok(false)
        } else {
            Err(LedgerError::ReservationNotFound(reserve_number.to_string()))
        }
    }
}

fn row_to_reservation(row: &PgRow) -> LedgerResult<ReservedTransfer> {
    let status_id: i16 = row.try_get("status")?;
    let settle_ref: Option<String> = row.try_get("settle_ref")?;
    let attempt: Option<String> = row.try_get("settle_attempt")?;
    let started_at: Option<DateTime<Utc>> = row.try_get("settle_started_at")?;
    let settlement = match (settle_ref, attempt, started_at) {
        (Some(settle_ref), Some(attempt), Some(started_at)) => Some(SettlementIntent {
            settle_ref,
            attempt,
            description: row.try_get("settle_description")?,
            started_at,
        }),
        _ => None,
    };
    Ok(ReservedTransfer {
        reserve_number: row.try_get("reserve_number")?,
        source_symbol: row.try_get("source_symbol")?,
        dest_symbol: row.try_get("dest_symbol")?,
        source_amount: row.try_get("source_amount")?,
        reserved_dest_amount: row.try_get("reserved_dest_amount")?,
        sender_uuid: row.try_get("sender_uuid")?,
        sender_wallet_type: wallet_type(row, "sender_wallet_type")?,
        receiver_uuid: row.try_get("receiver_uuid")?,
        receiver_wallet_type: wallet_type(row, "receiver_wallet_type")?,
        reserve_date: row.try_get("reserve_date")?,
        exp_date: row.try_get("exp_date")?,
        status: ReservationStatus::from_id(status_id).ok_or_else(|| corrupt("reservation status", status_id))?,
        settlement,
    })
}

#[async_trait]
impl ReservationStore for PgReservationStore {
    async fn insert(&self, r: &ReservedTransfer) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reserved_transfers_tb (
                reserve_number, source_symbol, dest_symbol, source_amount, reserved_dest_amount,
                sender_uuid, sender_wallet_type, receiver_uuid, receiver_wallet_type,
                reserve_date, exp_date, status, settle_ref, settle_attempt, settle_description,
                settle_started_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(&r.reserve_number)
        .bind(&r.source_symbol)
        .bind(&r.dest_symbol)
        .bind(r.source_amount)
        .bind(r.reserved_dest_amount)
        .bind(&r.sender_uuid)
        .bind(r.sender_wallet_type.id())
        .bind(&r.receiver_uuid)
        .bind(r.receiver_wallet_type.id())
        .bind(r.reserve_date)
        .bind(r.exp_date)
        .bind(r.status.id())
        .bind(r.settlement.as_ref().map(|s| s.settle_ref.clone()))
        .bind(r.settlement.as_ref().map(|s| s.attempt.clone()))
        .bind(r.settlement.as_ref().and_then(|s| s.description.clone()))
        .bind(r.settlement.as_ref().map(|s| s.started_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LedgerError::System(format!("duplicate reserve number: {}", r.reserve_number))
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    async fn find(&self, reserve_number: &str) -> LedgerResult<Option<ReservedTransfer>> {
        let row = sqlx::query(&format!("{SELECT_RESERVATION} WHERE reserve_number = $1"))
            .bind(reserve_number)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_reservation).transpose()
    }

    async fn begin_settlement(&self, reserve_number: &str, intent: &SettlementIntent) -> LedgerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE reserved_transfers_tb
            SET settle_ref = $2, settle_attempt = $6, settle_description = $3, settle_started_at = $4
            WHERE reserve_number = $1 AND status = $5 AND settle_ref IS NULL
            "#,
        )
        .bind(reserve_number)
        .bind(&intent.settle_ref)
        .bind(&intent.description)
        .bind(intent.started_at)
        .bind(ReservationStatus::Reserved.id())
        .bind(&intent.attempt)
        .execute(&self.pool)
        .await?;
        self.affected(reserve_number, result.rows_affected()).await
    }

    async fn clear_settlement(&self, reserve_number: &str) -> LedgerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE reserved_transfers_tb
            SET settle_ref = NULL, settle_attempt = NULL, settle_description = NULL,
                settle_started_at = NULL
            WHERE reserve_number = $1 AND status = $2 AND settle_ref IS NOT NULL
            "#,
        )
        .bind(reserve_number)
        .bind(ReservationStatus::Reserved.id())
        .execute(&self.pool)
        .await?;
        self.affected(reserve_number, result.rows_affected()).await
    }

    async fn close_if_idle(&self, reserve_number: &str, new_status: ReservationStatus) -> LedgerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE reserved_transfers_tb SET status = $3
            WHERE reserve_number = $1 AND status = $2 AND settle_ref IS NULL
            "#,
        )
        .bind(reserve_number)
        .bind(ReservationStatus::Reserved.id())
        .bind(new_status.id())
        .execute(&self.pool)
        .await?;
        self.affected(reserve_number, result.rows_affected()).await
    }

    async fn update_status_if(
        &self,
        reserve_number: &str,
        expected: ReservationStatus,
        new_status: ReservationStatus,
    ) -> LedgerResult<bool> {
        let result =
            sqlx::query("UPDATE reserved_transfers_tb SET status = $3 WHERE reserve_number = $1 AND status = $2")
                .bind(reserve_number)
                .bind(expected.id())
                .bind(new_status.id())
                .execute(&self.pool)
                .await?;
        self.affected(reserve_number, result.rows_affected()).await
    }

    async fn find_expired(&self, now: DateTime<Utc>, limit: usize) -> LedgerResult<Vec<ReservedTransfer>> {
        let rows = sqlx::query(&format!(
            "{SELECT_RESERVATION} WHERE status = $1 AND settle_ref IS NULL AND exp_date <= $2 \
             ORDER BY reserve_date, reserve_number LIMIT $3"
        ))
        .bind(ReservationStatus::Reserved.id())
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_reservation).collect()
    }

    async fn find_stalled_settlements(
        &self,
        started_before: DateTime<Utc>,
        limit: usize,
    ) -> LedgerResult<Vec<ReservedTransfer>> {
        let rows = sqlx::query(&format!(
            "{SELECT_RESERVATION} WHERE status = $1 AND settle_ref IS NOT NULL AND settle_started_at < $2 \
             ORDER BY reserve_date, reserve_number LIMIT $3"
        ))
        .bind(ReservationStatus::Reserved.id())
        .bind(started_before)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_reservation).collect()
    }
}
