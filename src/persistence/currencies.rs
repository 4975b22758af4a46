//! PostgreSQL currency registry

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::{corrupt, is_unique_violation};
use crate::currency::registry::validate_symbol;
use crate::currency::{Currency, CurrencyProvider};
use crate::error::{LedgerError, LedgerResult};

pub struct PgCurrencyRegistry {
    pool: PgPool,
}

impl PgCurrencyRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn set_flag(&self, symbol: &str, column: &str, value: bool) -> LedgerResult<()> {
        let sql = format!("UPDATE currencies_tb SET {column} = $2 WHERE symbol = $1");
        let result = sqlx::query(&sql)
            .bind(symbol)
            .bind(value)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::CurrencyNotFound(symbol.to_string()));
        }
        Ok(())
    }
}

fn row_to_currency(row: &PgRow) -> LedgerResult<Currency> {
    let precision: i32 = row.try_get("precision_dp")?;
    Ok(Currency {
        symbol: row.try_get("symbol")?,
        name: row.try_get("name")?,
        precision: u32::try_from(precision).map_err(|_| corrupt("precision_dp", precision))?,
        is_transitive: row.try_get("is_transitive")?,
        is_active: row.try_get("is_active")?,
    })
}

#[async_trait]
impl CurrencyProvider for PgCurrencyRegistry {
    async fn get_currency(&self, symbol: &str) -> LedgerResult<Option<Currency>> {
        let row = sqlx::query(
            "SELECT symbol, name, precision_dp, is_transitive, is_active FROM currencies_tb WHERE symbol = $1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_currency).transpose()
    }

    async fn list_currencies(&self) -> LedgerResult<Vec<Currency>> {
        let rows = sqlx::query(
            "SELECT symbol, name, precision_dp, is_transitive, is_active FROM currencies_tb ORDER BY symbol",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_currency).collect()
    }

    async fn add_currency(&self, currency: Currency) -> LedgerResult<()> {
        validate_symbol(&currency.symbol)?;
        let precision = i32::try_from(currency.precision)
            .map_err(|_| LedgerError::System(format!("precision too large: {}", currency.precision)))?;
        sqlx::query(
            r#"
            INSERT INTO currencies_tb (symbol, name, precision_dp, is_transitive, is_active)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&currency.symbol)
        .bind(&currency.name)
        .bind(precision)
        .bind(currency.is_transitive)
        .bind(currency.is_active)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LedgerError::System(format!("currency already registered: {}", currency.symbol))
            } else {
                e.into()
            }
        })?;
        tracing::info!(symbol = %currency.symbol, "Currency registered");
        Ok(())
    }

    async fn set_transitive(&self, symbol: &str, transitive: bool) -> LedgerResult<()> {
        self.set_flag(symbol, "is_transitive", transitive).await
    }

    async fn set_active(&self, symbol: &str, active: bool) -> LedgerResult<()> {
        self.set_flag(symbol, "is_active", active).await
    }
}
