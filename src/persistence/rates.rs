//! PostgreSQL rate and forbidden-pair store

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::conversion::{ForbiddenPair, Rate, RateStore};
use crate::error::{LedgerError, LedgerResult};

pub struct PgRateStore {
    pool: PgPool,
}

impl PgRateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_rate(row: &PgRow) -> LedgerResult<Rate> {
    Ok(Rate {
        source_symbol: row.try_get("source_symbol")?,
        dest_symbol: row.try_get("dest_symbol")?,
        rate: row.try_get("rate")?,
    })
}

fn rate_not_found(source_symbol: &str, dest_symbol: &str) -> LedgerError {
    LedgerError::RateNotFound {
        source_symbol: source_symbol.to_string(),
        dest_symbol: dest_symbol.to_string(),
    }
}

#[async_trait]
impl RateStore for PgRateStore {
    async fn list_rates(&self) -> LedgerResult<Vec<Rate>> {
        let rows = sqlx::query("SELECT source_symbol, dest_symbol, rate FROM rates_tb ORDER BY source_symbol, dest_symbol")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_rate).collect()
    }

    async fn get_rate(&self, source_symbol: &str, dest_symbol: &str) -> LedgerResult<Option<Rate>> {
        let row = sqlx::query(
            "SELECT source_symbol, dest_symbol, rate FROM rates_tb WHERE source_symbol = $1 AND dest_symbol = $2",
        )
        .bind(source_symbol)
        .bind(dest_symbol)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_rate).transpose()
    }

    async fn add_rate(&self, rate: &Rate, ignore_if_exists: bool) -> LedgerResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO rates_tb (source_symbol, dest_symbol, rate)
            VALUES ($1, $2, $3)
            ON CONFLICT (source_symbol, dest_symbol) DO NOTHING
            "#,
        )
        .bind(&rate.source_symbol)
        .bind(&rate.dest_symbol)
        .bind(rate.rate)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 && !ignore_if_exists {
            return Err(LedgerError::RateAlreadyExists {
                source_symbol: rate.source_symbol.clone(),
                dest_symbol: rate.dest_symbol.clone(),
            });
        }
        Ok(())
    }

    async fn update_rate(&self, rate: &Rate) -> LedgerResult<()> {
        let result = sqlx::query("UPDATE rates_tb SET rate = $3 WHERE source_symbol = $1 AND dest_symbol = $2")
            .bind(&rate.source_symbol)
            .bind(&rate.dest_symbol)
            .bind(rate.rate)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(rate_not_found(&rate.source_symbol, &rate.dest_symbol));
        }
        Ok(())
    }

    async fn delete_rate(&self, source_symbol: &str, dest_symbol: &str) -> LedgerResult<()> {
        let result = sqlx::query("DELETE FROM rates_tb WHERE source_symbol = $1 AND dest_symbol = $2")
            .bind(source_symbol)
            .bind(dest_symbol)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(rate_not_found(source_symbol, dest_symbol));
        }
        Ok(())
    }

    async fn list_forbidden_pairs(&self) -> LedgerResult<Vec<ForbiddenPair>> {
        let rows = sqlx::query("SELECT source_symbol, dest_symbol FROM forbidden_pairs_tb ORDER BY source_symbol, dest_symbol")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(ForbiddenPair {
                    source_symbol: row.try_get("source_symbol")?,
                    dest_symbol: row.try_get("dest_symbol")?,
                })
            })
            .collect()
    }

    async fn add_forbidden_pair(&self, pair: &ForbiddenPair) -> LedgerResult<()> {
        sqlx::query(
            "INSERT INTO forbidden_pairs_tb (source_symbol, dest_symbol) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(&pair.source_symbol)
        .bind(&pair.dest_symbol)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_forbidden_pair(&self, pair: &ForbiddenPair) -> LedgerResult<()> {
        sqlx::query("DELETE FROM forbidden_pairs_tb WHERE source_symbol = $1 AND dest_symbol = $2")
            .bind(&pair.source_symbol)
            .bind(&pair.dest_symbol)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::{Currency, CurrencyProvider};
    use crate::persistence::{test_pool, PgCurrencyRegistry};
    use rust_decimal_macros::dec;

    #[tokio::test]
    #[ignore = "requires PostgreSQL database"]
    async fn test_rate_lifecycle() {
        let pool = test_pool().await;
        let registry = PgCurrencyRegistry::new(pool.clone());
        let tag = &ulid::Ulid::new().to_string()[..8];
        let (a, b) = (format!("A{tag}"), format!("B{tag}"));
        registry.add_currency(Currency::new(&a, "a", 2)).await.unwrap();
        registry.add_currency(Currency::new(&b, "b", 2)).await.unwrap();

        let store = PgRateStore::new(pool);
        let rate = Rate::new(&a, &b, dec!(1.5));
        store.add_rate(&rate, false).await.unwrap();
        assert!(matches!(
            store.add_rate(&rate, false).await,
            Err(LedgerError::RateAlreadyExists { .. })
        ));
        store.add_rate(&rate, true).await.unwrap();

        store.update_rate(&Rate::new(&a, &b, dec!(2))).await.unwrap();
        assert_eq!(store.get_rate(&a, &b).await.unwrap().unwrap().rate, dec!(2));

        store.delete_rate(&a, &b).await.unwrap();
        assert!(matches!(
            store.delete_rate(&a, &b).await,
            Err(LedgerError::RateNotFound { .. })
        ));

        let pair = ForbiddenPair::new(&a, &b);
        store.add_forbidden_pair(&pair).await.unwrap();
        store.add_forbidden_pair(&pair).await.unwrap();
        assert!(store.list_forbidden_pairs().await.unwrap().contains(&pair));
        store.delete_forbidden_pair(&pair).await.unwrap();
        store.delete_forbidden_pair(&pair).await.unwrap();
    }
}
