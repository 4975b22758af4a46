//! PostgreSQL withdraw store

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;

use super::corrupt;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::TransferId;
use crate::withdraw::{
    NewWithdraw, Withdraw, WithdrawCriteria, WithdrawHistoryQuery, WithdrawStatus, WithdrawStore, WithdrawType,
    WithdrawUpdate,
};

const WITHDRAW_COLUMNS: &str = r#"
    id, owner_uuid, currency, wallet_id, amount, request_transaction, final_transaction,
    applied_fee, dest_amount, dest_symbol, dest_address, dest_network, dest_note,
    dest_transaction_ref, status_reason, status, applicator, withdraw_type, attachment,
    create_date, update_date
"#;

pub struct PgWithdrawStore {
    pool: PgPool,
}

impl PgWithdrawStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn transfer_id(value: &str) -> LedgerResult<TransferId> {
    TransferId::from_str(value).map_err(|_| corrupt("transfer id", value))
}

fn row_to_withdraw(row: &PgRow) -> LedgerResult<Withdraw> {
    let request_transaction: String = row.try_get("request_transaction")?;
    let final_transaction: Option<String> = row.try_get("final_transaction")?;
    let status_id: i16 = row.try_get("status")?;
    let type_id: i16 = row.try_get("withdraw_type")?;
    Ok(Withdraw {
        id: row.try_get("id")?,
        owner_uuid: row.try_get("owner_uuid")?,
        currency: row.try_get("currency")?,
        wallet_id: row.try_get("wallet_id")?,
        amount: row.try_get("amount")?,
        request_transaction: transfer_id(&request_transaction)?,
        final_transaction: final_transaction.as_deref().map(transfer_id).transpose()?,
        applied_fee: row.try_get("applied_fee")?,
        dest_amount: row.try_get("dest_amount")?,
        dest_symbol: row.try_get("dest_symbol")?,
        dest_address: row.try_get("dest_address")?,
        dest_network: row.try_get("dest_network")?,
        dest_note: row.try_get("dest_note")?,
        dest_transaction_ref: row.try_get("dest_transaction_ref")?,
        status_reason: row.try_get("status_reason")?,
        status: WithdrawStatus::from_id(status_id).ok_or_else(|| corrupt("withdraw status", status_id))?,
        applicator: row.try_get("applicator")?,
        withdraw_type: WithdrawType::from_id(type_id).ok_or_else(|| corrupt("withdraw type", type_id))?,
        attachment: row.try_get("attachment")?,
        create_date: row.try_get("create_date")?,
        update_date: row.try_get("update_date")?,
    })
}

#[async_trait]
impl WithdrawStore for PgWithdrawStore {
    async fn insert(&self, w: NewWithdraw) -> LedgerResult<Withdraw> {
        let sql = format!(
            r#"
            INSERT INTO withdraws_tb (
                owner_uuid, currency, wallet_id, amount, request_transaction, final_transaction,
                applied_fee, dest_amount, dest_symbol, dest_address, dest_network, dest_note,
                dest_transaction_ref, status, applicator, withdraw_type, attachment
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING {WITHDRAW_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(&w.owner_uuid)
            .bind(&w.currency)
            .bind(w.wallet_id)
            .bind(w.amount)
            .bind(w.request_transaction.to_string())
            .bind(w.final_transaction.map(|t| t.to_string()))
            .bind(w.applied_fee)
            .bind(w.dest_amount)
            .bind(&w.dest_symbol)
            .bind(&w.dest_address)
            .bind(&w.dest_network)
            .bind(&w.dest_note)
            .bind(&w.dest_transaction_ref)
            .bind(w.status.id())
            .bind(&w.applicator)
            .bind(w.withdraw_type.id())
            .bind(&w.attachment)
            .fetch_one(&self.pool)
            .await?;
        row_to_withdraw(&row)
    }

    async fn find(&self, id: i64) -> LedgerResult<Option<Withdraw>> {
        let row = sqlx::query(&format!("SELECT {WITHDRAW_COLUMNS} FROM withdraws_tb WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_withdraw).transpose()
    }

    async fn find_by_request_transaction(&self, tx: TransferId) -> LedgerResult<Option<Withdraw>> {
        let row = sqlx::query(&format!(
            "SELECT {WITHDRAW_COLUMNS} FROM withdraws_tb WHERE request_transaction = $1"
        ))
        .bind(tx.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_withdraw).transpose()
    }

    async fn transition(
        &self,
        id: i64,
        expected: WithdrawStatus,
        new_status: WithdrawStatus,
        update: &WithdrawUpdate,
    ) -> LedgerResult<Option<Withdraw>> {
        let sql = format!(
            r#"
            UPDATE withdraws_tb SET
                status = $3,
                final_transaction = COALESCE($4, final_transaction),
                dest_amount = COALESCE($5, dest_amount),
                dest_note = COALESCE($6, dest_note),
                dest_transaction_ref = COALESCE($7, dest_transaction_ref),
                status_reason = COALESCE($8, status_reason),
                applicator = COALESCE($9, applicator),
                update_date = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {WITHDRAW_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(expected.id())
            .bind(new_status.id())
            .bind(update.final_transaction.map(|t| t.to_string()))
            .bind(update.dest_amount)
            .bind(&update.dest_note)
            .bind(&update.dest_transaction_ref)
            .bind(&update.status_reason)
            .bind(&update.applicator)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => row_to_withdraw(&row).map(Some),
            None if self.find(id).await?.is_some() => Ok(None),
            None => Err(LedgerError::WithdrawNotFound(id)),
        }
    }

    async fn revert(&self, current: WithdrawStatus, snapshot: &Withdraw) -> LedgerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE withdraws_tb SET
                status = $3, final_transaction = $4, dest_amount = $5, dest_note = $6,
                dest_transaction_ref = $7, status_reason = $8, applicator = $9, update_date = $10
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(snapshot.id)
        .bind(current.id())
        .bind(snapshot.status.id())
        .bind(snapshot.final_transaction.map(|t| t.to_string()))
        .bind(snapshot.dest_amount)
        .bind(&snapshot.dest_note)
        .bind(&snapshot.dest_transaction_ref)
        .bind(&snapshot.status_reason)
        .bind(&snapshot.applicator)
        .bind(snapshot.update_date)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() > 0 {
            return Ok(true);
        }
        match self.find(snapshot.id).await? {
            Some(_) => Ok(false),
            None => Err(LedgerError::WithdrawNotFound(snapshot.id)),
        }
    }

    async fn set_final_transaction(&self, id: i64, tx: TransferId) -> LedgerResult<()> {
        let result = sqlx::query("UPDATE withdraws_tb SET final_transaction = $2 WHERE id = $1")
            .bind(id)
            .bind(tx.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::WithdrawNotFound(id));
        }
        Ok(())
    }

    async fn find_by_criteria(
        &self,
        criteria: &WithdrawCriteria,
        offset: usize,
        size: Option<usize>,
    ) -> LedgerResult<Vec<Withdraw>> {
        let statuses: Vec<i16> = criteria.statuses.iter().map(|s| s.id()).collect();
        let sql = format!(
            r#"
            SELECT {WITHDRAW_COLUMNS} FROM withdraws_tb
            WHERE ($1::text IS NULL OR owner_uuid = $1)
              AND ($2::text IS NULL OR currency = $2)
              AND ($3::text IS NULL OR dest_transaction_ref = $3)
              AND ($4::text IS NULL OR dest_address = $4)
              AND (cardinality($5::smallint[]) = 0 OR status = ANY($5))
            ORDER BY id DESC
            OFFSET $6 LIMIT $7
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(&criteria.owner_uuid)
            .bind(&criteria.currency)
            .bind(&criteria.dest_transaction_ref)
            .bind(&criteria.dest_address)
            .bind(statuses)
            .bind(offset as i64)
            .bind(size.map(|s| s as i64))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_withdraw).collect()
    }

    async fn history(&self, query: &WithdrawHistoryQuery) -> LedgerResult<Vec<Withdraw>> {
        let order = if query.page.ascending { "ASC" } else { "DESC" };
        let sql = format!(
            r#"
            SELECT {WITHDRAW_COLUMNS} FROM withdraws_tb
            WHERE owner_uuid = $1
              AND ($2::text IS NULL OR currency = $2)
              AND ($3::timestamptz IS NULL OR create_date >= $3)
              AND ($4::timestamptz IS NULL OR create_date <= $4)
            ORDER BY create_date {order}, id {order}
            OFFSET $5 LIMIT $6
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(&query.owner_uuid)
            .bind(&query.currency)
            .bind(query.start)
            .bind(query.end)
            .bind(query.page.offset as i64)
            .bind(query.page.limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_withdraw).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::test_pool;
    use rust_decimal_macros::dec;

    #[tokio::test]
    #[ignore = "requires PostgreSQL database"]
    async fn test_transition_and_revert() {
        let pool = test_pool().await;
        let wallet_id: Option<i64> = sqlx::query_scalar("SELECT id FROM wallets_tb LIMIT 1")
            .fetch_optional(&pool)
            .await
            .unwrap();
        let Some(wallet_id) = wallet_id else {
            return;
        };
        let store = PgWithdrawStore::new(pool);
        let owner = uuid::Uuid::new_v4().to_string();
        let created = store
            .insert(NewWithdraw {
                owner_uuid: owner.clone(),
                currency: "PGT".into(),
                wallet_id,
                amount: dec!(9),
                request_transaction: TransferId::new(),
                final_transaction: None,
                applied_fee: dec!(1),
                dest_amount: None,
                dest_symbol: Some("PGT".into()),
                dest_address: Some("0xabc".into()),
                dest_network: Some("ETH".into()),
                dest_note: None,
                dest_transaction_ref: None,
                status: WithdrawStatus::Created,
                applicator: None,
                withdraw_type: WithdrawType::OnChain,
                attachment: None,
            })
            .await
            .unwrap();

        let update = WithdrawUpdate {
            dest_transaction_ref: Some("0xtx".into()),
            ..Default::default()
        };
        let done = store
            .transition(created.id, WithdrawStatus::Created, WithdrawStatus::Done, &update)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.dest_transaction_ref.as_deref(), Some("0xtx"));
        assert!(store
            .transition(created.id, WithdrawStatus::Created, WithdrawStatus::Done, &update)
            .await
            .unwrap()
            .is_none());

        assert!(store.revert(WithdrawStatus::Done, &created).await.unwrap());
        let back = store.find(created.id).await.unwrap().unwrap();
        assert_eq!(back.status, WithdrawStatus::Created);
        assert!(back.dest_transaction_ref.is_none());

        let criteria = WithdrawCriteria {
            owner_uuid: Some(owner),
            statuses: vec![WithdrawStatus::Created],
            ..Default::default()
        };
        assert_eq!(store.find_by_criteria(&criteria, 0, None).await.unwrap().len(), 1);

        let by_tx = store
            .find_by_request_transaction(created.request_transaction)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_tx.id, created.id);
    }
}
