//! PostgreSQL wallet store
//!
//! A posting is one database transaction: two versioned balance updates and
//! the transfer insert. Any failed expectation rolls the whole unit back.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;

use super::{corrupt, is_unique_violation};
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{TransferCategory, TransferId, TransferQuery, TransferRecord};
use crate::money::Amount;
use crate::wallet::{BalanceWrite, CommitOutcome, Wallet, WalletKey, WalletOwner, WalletStore, WalletType};

const SELECT_WALLET: &str = r#"
    SELECT w.id, w.owner_id, o.uuid AS owner_uuid, w.currency, w.wallet_type, w.balance, w.version
    FROM wallets_tb w
    JOIN wallet_owners_tb o ON o.id = w.owner_id
"#;

const TRANSFER_COLUMNS: &str = r#"
    id, source_wallet_id, source_owner_uuid, source_wallet_type,
    dest_wallet_id, dest_owner_uuid, dest_wallet_type,
    source_currency, source_amount, dest_currency, dest_amount,
    source_balance_before, source_balance_after, dest_balance_before, dest_balance_after,
    description, transfer_ref, category, created_at
"#;

pub struct PgWalletStore {
    pool: PgPool,
}

impl PgWalletStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_owner(row: &PgRow) -> LedgerResult<WalletOwner> {
    Ok(WalletOwner {
        id: row.try_get("id")?,
        uuid: row.try_get("uuid")?,
        title: row.try_get("title")?,
        level: row.try_get("level")?,
        flags: row.try_get("flags")?,
    })
}

pub(super) fn wallet_type(row: &PgRow, column: &str) -> LedgerResult<WalletType> {
    let id: i16 = row.try_get(column)?;
    WalletType::from_id(id).ok_or_else(|| corrupt(column, id))
}

fn row_to_wallet(row: &PgRow) -> LedgerResult<Wallet> {
    Ok(Wallet {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        owner_uuid: row.try_get("owner_uuid")?,
        currency: row.try_get("currency")?,
        wallet_type: wallet_type(row, "wallet_type")?,
        balance: row.try_get("balance")?,
        version: row.try_get("version")?,
    })
}

fn row_to_transfer(row: &PgRow) -> LedgerResult<TransferRecord> {
    let id: String = row.try_get("id")?;
    let category_id: i16 = row.try_get("category")?;
    let source_currency: String = row.try_get("source_currency")?;
    let dest_currency: String = row.try_get("dest_currency")?;
    Ok(TransferRecord {
        id: TransferId::from_str(&id).map_err(|_| corrupt("transfer id", &id))?,
        source_wallet_id: row.try_get("source_wallet_id")?,
        source_owner_uuid: row.try_get("source_owner_uuid")?,
        source_wallet_type: wallet_type(row, "source_wallet_type")?,
        dest_wallet_id: row.try_get("dest_wallet_id")?,
        dest_owner_uuid: row.try_get("dest_owner_uuid")?,
        dest_wallet_type: wallet_type(row, "dest_wallet_type")?,
        source_amount: Amount::new(source_currency, row.try_get::<Decimal, _>("source_amount")?),
        dest_amount: Amount::new(dest_currency, row.try_get::<Decimal, _>("dest_amount")?),
        source_balance_before: row.try_get("source_balance_before")?,
        source_balance_after: row.try_get("source_balance_after")?,
        dest_balance_before: row.try_get("dest_balance_before")?,
        dest_balance_after: row.try_get("dest_balance_after")?,
        description: row.try_get("description")?,
        transfer_ref: row.try_get("transfer_ref")?,
        category: TransferCategory::from_id(category_id).ok_or_else(|| corrupt("category", category_id))?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl WalletStore for PgWalletStore {
    async fn find_owner(&self, uuid: &str) -> LedgerResult<Option<WalletOwner>> {
        let row = sqlx::query("SELECT id, uuid, title, level, flags FROM wallet_owners_tb WHERE uuid = $1")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_owner).transpose()
    }

    async fn create_owner(
        &self,
        uuid: &str,
        title: &str,
        level: &str,
        flags: i32,
    ) -> LedgerResult<WalletOwner> {
        let row = sqlx::query(
            r#"
            INSERT INTO wallet_owners_tb (uuid, title, level, flags)
            VALUES ($1, $2, $3, $4)
            RETURNING id, uuid, title, level, flags
            "#,
        )
        .bind(uuid)
        .bind(title)
        .bind(level)
        .bind(flags)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LedgerError::System(format!("wallet owner already exists: {uuid}"))
            } else {
                e.into()
            }
        })?;
        row_to_owner(&row)
    }

    async fn update_owner_flags(&self, uuid: &str, flags: i32) -> LedgerResult<WalletOwner> {
        let row = sqlx::query(
            "UPDATE wallet_owners_tb SET flags = $2 WHERE uuid = $1 RETURNING id, uuid, title, level, flags",
        )
        .bind(uuid)
        .bind(flags)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| LedgerError::WalletOwnerNotFound(uuid.to_string()))?;
        row_to_owner(&row)
    }

    async fn find_wallet(&self, key: &WalletKey) -> LedgerResult<Option<Wallet>> {
        let sql = format!("{SELECT_WALLET} WHERE w.owner_id = $1 AND w.currency = $2 AND w.wallet_type = $3");
        let row = sqlx::query(&sql)
            .bind(key.owner_id)
            .bind(&key.currency)
            .bind(key.wallet_type.id())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_wallet).transpose()
    }

    async fn find_wallet_by_id(&self, wallet_id: i64) -> LedgerResult<Option<Wallet>> {
        let sql = format!("{SELECT_WALLET} WHERE w.id = $1");
        let row = sqlx::query(&sql)
            .bind(wallet_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_wallet).transpose()
    }

    async fn wallets_of(&self, owner_id: i64) -> LedgerResult<Vec<Wallet>> {
        let sql = format!("{SELECT_WALLET} WHERE w.owner_id = $1 ORDER BY w.id");
        let rows = sqlx::query(&sql).bind(owner_id).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_wallet).collect()
    }

    async fn create_wallet(
        &self,
        owner: &WalletOwner,
        key: &WalletKey,
        initial: &Amount,
    ) -> LedgerResult<Wallet> {
        if initial.currency() != key.currency {
            return Err(LedgerError::CurrencyMismatch {
                expected: key.currency.clone(),
                actual: initial.currency().to_string(),
            });
        }
        if initial.value() < Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO wallets_tb (owner_id, currency, wallet_type, balance, version)
            VALUES ($1, $2, $3, $4, 0)
            RETURNING id
            "#,
        )
        .bind(owner.id)
        .bind(&key.currency)
        .bind(key.wallet_type.id())
        .bind(initial.value())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LedgerError::WalletAlreadyExists
            } else {
                e.into()
            }
        })?;
        Ok(Wallet {
            id,
            owner_id: owner.id,
            owner_uuid: owner.uuid.clone(),
            currency: key.currency.clone(),
            wallet_type: key.wallet_type,
            balance: initial.value(),
            version: 0,
        })
    }

    async fn compare_and_set(&self, write: &BalanceWrite) -> LedgerResult<Option<Wallet>> {
        let result = sqlx::query(
            "UPDATE wallets_tb SET balance = $1, version = version + 1 WHERE id = $2 AND version = $3",
        )
        .bind(write.new_balance)
        .bind(write.wallet_id)
        .bind(write.expected_version)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_wallet_by_id(write.wallet_id).await
    }

    async fn commit_posting(
        &self,
        debit: &BalanceWrite,
        credit: &BalanceWrite,
        record: &TransferRecord,
    ) -> LedgerResult<CommitOutcome> {
        let mut tx = self.pool.begin().await?;

        for write in [debit, credit] {
            let result = sqlx::query(
                "UPDATE wallets_tb SET balance = $1, version = version + 1 WHERE id = $2 AND version = $3",
            )
            .bind(write.new_balance)
            .bind(write.wallet_id)
            .bind(write.expected_version)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                tx.rollback().await?;
                return Ok(CommitOutcome::VersionConflict);
            }
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO transfers_tb (
                id, source_wallet_id, source_owner_uuid, source_wallet_type,
                dest_wallet_id, dest_owner_uuid, dest_wallet_type,
                source_currency, source_amount, dest_currency, dest_amount,
                source_balance_before, source_balance_after, dest_balance_before, dest_balance_after,
                description, transfer_ref, category, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            ON CONFLICT (transfer_ref) DO NOTHING
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.source_wallet_id)
        .bind(&record.source_owner_uuid)
        .bind(record.source_wallet_type.id())
        .bind(record.dest_wallet_id)
        .bind(&record.dest_owner_uuid)
        .bind(record.dest_wallet_type.id())
        .bind(record.source_amount.currency())
        .bind(record.source_amount.value())
        .bind(record.dest_amount.currency())
        .bind(record.dest_amount.value())
        .bind(record.source_balance_before)
        .bind(record.source_balance_after)
        .bind(record.dest_balance_before)
        .bind(record.dest_balance_after)
        .bind(&record.description)
        .bind(&record.transfer_ref)
        .bind(record.category.id())
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            let existing = match &record.transfer_ref {
                Some(r) => self.find_transfer_by_ref(r).await?,
                None => None,
            };
            return existing
                .map(|e| CommitOutcome::Duplicate(Box::new(e)))
                .ok_or_else(|| LedgerError::System("transfer insert conflicted without a ref".into()));
        }

        tx.commit().await?;
        Ok(CommitOutcome::Committed)
    }

    async fn find_transfer_by_ref(&self, transfer_ref: &str) -> LedgerResult<Option<TransferRecord>> {
        let sql = format!("SELECT {TRANSFER_COLUMNS} FROM transfers_tb WHERE transfer_ref = $1");
        let row = sqlx::query(&sql)
            .bind(transfer_ref)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_transfer).transpose()
    }

    async fn query_transfers(&self, query: &TransferQuery) -> LedgerResult<Vec<TransferRecord>> {
        let order = if query.page.ascending { "ASC" } else { "DESC" };
        let sql = format!(
            r#"
            SELECT {TRANSFER_COLUMNS} FROM transfers_tb
            WHERE ($1::text IS NULL OR source_owner_uuid = $1 OR dest_owner_uuid = $1)
              AND ($2::text IS NULL OR source_currency = $2 OR dest_currency = $2)
              AND ($3::smallint IS NULL OR category = $3)
              AND ($4::timestamptz IS NULL OR created_at >= $4)
              AND ($5::timestamptz IS NULL OR created_at <= $5)
            ORDER BY created_at {order}, id {order}
            OFFSET $6 LIMIT $7
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(&query.owner_uuid)
            .bind(&query.currency)
            .bind(query.category.map(|c| c.id()))
            .bind(query.start)
            .bind(query.end)
            .bind(query.page.offset as i64)
            .bind(query.page.limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_transfer).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{PgCurrencyRegistry, test_pool};
    use crate::currency::{Currency, CurrencyProvider};
    use crate::ledger::TransferEngine;
    use crate::ledger::TransferCommand;
    use crate::metrics::TracingMetrics;
    use crate::wallet::{WalletManager, WalletOwnerManager};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    #[tokio::test]
    #[ignore = "requires PostgreSQL database"]
    async fn test_posting_roundtrip_and_duplicate_ref() {
        let pool = test_pool().await;
        let registry = PgCurrencyRegistry::new(pool.clone());
        if registry.get_currency("PGT").await.unwrap().is_none() {
            registry.add_currency(Currency::new("PGT", "Pg test", 8)).await.unwrap();
        }

        let store = Arc::new(PgWalletStore::new(pool));
        let owners = WalletOwnerManager::new(store.clone(), "system");
        let wallets = WalletManager::new(store.clone());
        let suffix = ulid::Ulid::new().to_string();
        let alice = owners.create_owner(&format!("alice-{suffix}"), "t", "1").await.unwrap();
        let bob = owners.create_owner(&format!("bob-{suffix}"), "t", "1").await.unwrap();
        let a = wallets.create_wallet(&alice, Amount::new("PGT", dec!(10)), WalletType::Main).await.unwrap();
        let b = wallets.find_or_create_wallet(&bob, "PGT", WalletType::Main).await.unwrap();

        let engine = TransferEngine::new(store.clone(), Arc::new(TracingMetrics));
        let cmd = TransferCommand::new(a, b, Amount::new("PGT", dec!(4)), TransferCategory::NoCategory)
            .with_ref(Some(format!("pg-{suffix}")));
        let first = engine.transfer(cmd.clone()).await.unwrap();
        let second = engine.transfer(cmd).await.unwrap();
        assert_eq!(first.transfer_id, second.transfer_id);

        let a = wallets.find_wallet(&alice, "PGT", WalletType::Main).await.unwrap().unwrap();
        assert_eq!(a.balance, dec!(6));
        assert_eq!(a.version, 1);
    }
}
