//! Withdraw store

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::models::{NewWithdraw, Withdraw, WithdrawCriteria, WithdrawHistoryQuery, WithdrawStatus, WithdrawUpdate};
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::TransferId;

#[async_trait]
pub trait WithdrawStore: Send + Sync {
    async fn insert(&self, withdraw: NewWithdraw) -> LedgerResult<Withdraw>;

    async fn find(&self, id: i64) -> LedgerResult<Option<Withdraw>>;

    /// Row whose request leg is `tx`; at most one exists
    async fn find_by_request_transaction(&self, tx: TransferId) -> LedgerResult<Option<Withdraw>>;

    /// `expected` → `new_status`, writing every `Some` field of `update`.
    /// Returns the updated row, or `None` if the status did not match.
    async fn transition(
        &self,
        id: i64,
        expected: WithdrawStatus,
        new_status: WithdrawStatus,
        update: &WithdrawUpdate,
    ) -> LedgerResult<Option<Withdraw>>;

    /// Put `snapshot` back if the row is still in `current`
    async fn revert(&self, current: WithdrawStatus, snapshot: &Withdraw) -> LedgerResult<bool>;

    async fn set_final_transaction(&self, id: i64, tx: TransferId) -> LedgerResult<()>;

    /// Newest first; `size = None` returns everything from `offset`
    async fn find_by_criteria(
        &self,
        criteria: &WithdrawCriteria,
        offset: usize,
        size: Option<usize>,
    ) -> LedgerResult<Vec<Withdraw>>;

    async fn history(&self, query: &WithdrawHistoryQuery) -> LedgerResult<Vec<Withdraw>>;
}

pub(crate) fn apply_update(w: &mut Withdraw, update: &WithdrawUpdate) {
    if let Some(tx) = update.final_transaction {
        w.final_transaction = Some(tx);
    }
    if let Some(amount) = update.dest_amount {
        w.dest_amount = Some(amount);
    }
    if let Some(note) = &update.dest_note {
        w.dest_note = Some(note.clone());
    }
    if let Some(tx_ref) = &update.dest_transaction_ref {
        w.dest_transaction_ref = Some(tx_ref.clone());
    }
    if let Some(reason) = &update.status_reason {
        w.status_reason = Some(reason.clone());
    }
    if let Some(applicator) = &update.applicator {
        w.applicator = Some(applicator.clone());
    }
}

#[derive(Default)]
struct Inner {
    rows: BTreeMap<i64, Withdraw>,
    next_id: i64,
}

/// In-memory [`WithdrawStore`]
#[derive(Default)]
pub struct InMemoryWithdrawStore {
    inner: RwLock<Inner>,
}

impl InMemoryWithdrawStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> LedgerResult<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| LedgerError::System("withdraw store lock poisoned".into()))
    }

    fn write(&self) -> LedgerResult<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| LedgerError::System("withdraw store lock poisoned".into()))
    }
}

#[async_trait]
impl WithdrawStore for InMemoryWithdrawStore {
    async fn insert(&self, withdraw: NewWithdraw) -> LedgerResult<Withdraw> {
        let mut inner = self.write()?;
        if inner
            .rows
            .values()
            .any(|w| w.request_transaction == withdraw.request_transaction)
        {
            return Err(LedgerError::System(format!(
                "withdraw already recorded for transfer {}",
                withdraw.request_transaction
            )));
        }
        inner.next_id += 1;
        let row = withdraw.into_withdraw(inner.next_id, Utc::now());
        inner.rows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find(&self, id: i64) -> LedgerResult<Option<Withdraw>> {
        Ok(self.read()?.rows.get(&id).cloned())
    }

    async fn find_by_request_transaction(&self, tx: TransferId) -> LedgerResult<Option<Withdraw>> {
        Ok(self
            .read()?
            .rows
            .values()
            .find(|w| w.request_transaction == tx)
            .cloned())
    }

    async fn transition(
        &self,
        id: i64,
        expected: WithdrawStatus,
        new_status: WithdrawStatus,
        update: &WithdrawUpdate,
    ) -> LedgerResult<Option<Withdraw>> {
        let mut inner = self.write()?;
        let row = inner
            .rows
            .get_mut(&id)
            .ok_or(LedgerError::WithdrawNotFound(id))?;
        if row.status != expected {
            return Ok(None);
        }
        row.status = new_status;
        apply_update(row, update);
        row.update_date = Some(Utc::now());
        Ok(Some(row.clone()))
    }

    async fn revert(&self, current: WithdrawStatus, snapshot: &Withdraw) -> LedgerResult<bool> {
        let mut inner = self.write()?;
        let row = inner
            .rows
            .get_mut(&snapshot.id)
            .ok_or(LedgerError::WithdrawNotFound(snapshot.id))?;
        if row.status != current {
            return Ok(false);
        }
        *row = snapshot.clone();
        Ok(true)
    }

    async fn set_final_transaction(&self, id: i64, tx: TransferId) -> LedgerResult<()> {
        let mut inner = self.write()?;
        let row = inner
            .rows
            .get_mut(&id)
            .ok_or(LedgerError::WithdrawNotFound(id))?;
        row.final_transaction = Some(tx);
        Ok(())
    }

    async fn find_by_criteria(
        &self,
        criteria: &WithdrawCriteria,
        offset: usize,
        size: Option<usize>,
    ) -> LedgerResult<Vec<Withdraw>> {
        let inner = self.read()?;
        let matched = inner
            .rows
            .values()
            .rev()
            .filter(|w| criteria.matches(w))
            .skip(offset)
            .cloned();
        Ok(match size {
            Some(size) => matched.take(size).collect(),
            None => matched.collect(),
        })
    }

    async fn history(&self, query: &WithdrawHistoryQuery) -> LedgerResult<Vec<Withdraw>> {
        let inner = self.read()?;
        let mut rows: Vec<Withdraw> = inner
            .rows
            .values()
            .filter(|w| query.matches(w))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.create_date.cmp(&b.create_date).then(a.id.cmp(&b.id)));
        if !query.page.ascending {
            rows.reverse();
        }
        Ok(rows
            .into_iter()
            .skip(query.page.offset)
            .take(query.page.limit)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::withdraw::models::WithdrawType;
    use rust_decimal_macros::dec;

    fn new_withdraw(owner: &str, currency: &str) -> NewWithdraw {
        NewWithdraw {
            owner_uuid: owner.into(),
            currency: currency.into(),
            wallet_id: 1,
            amount: dec!(9),
            request_transaction: TransferId::new(),
            final_transaction: None,
            applied_fee: dec!(1),
            dest_amount: None,
            dest_symbol: Some(currency.into()),
            dest_address: Some("0xabc".into()),
            dest_network: Some("ETH".into()),
            dest_note: None,
            dest_transaction_ref: None,
            status: WithdrawStatus::Created,
            applicator: None,
            withdraw_type: WithdrawType::OnChain,
            attachment: None,
        }
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let store = InMemoryWithdrawStore::new();
        let w = store.insert(new_withdraw("alice", "USDT")).await.unwrap();
        assert_eq!(w.id, 1);

        let update = WithdrawUpdate {
            status_reason: Some("bad address".into()),
            ..Default::default()
        };
        let rejected = store
            .transition(w.id, WithdrawStatus::Created, WithdrawStatus::Rejected, &update)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rejected.status_reason.as_deref(), Some("bad address"));
        assert!(rejected.update_date.is_some());

        assert!(
            store
                .transition(w.id, WithdrawStatus::Created, WithdrawStatus::Canceled, &WithdrawUpdate::default())
                .await
                .unwrap()
                .is_none()
        );

        assert!(store.revert(WithdrawStatus::Rejected, &w).await.unwrap());
        assert_eq!(store.find(w.id).await.unwrap().unwrap(), w);
        assert!(!store.revert(WithdrawStatus::Rejected, &w).await.unwrap());

        assert!(matches!(
            store.transition(99, WithdrawStatus::Created, WithdrawStatus::Done, &WithdrawUpdate::default()).await,
            Err(LedgerError::WithdrawNotFound(99))
        ));
    }

    #[tokio::test]
    async fn test_request_transaction_is_unique() {
        let store = InMemoryWithdrawStore::new();
        let first = new_withdraw("alice", "USDT");
        let tx = first.request_transaction;
        let w = store.insert(first).await.unwrap();

        let mut again = new_withdraw("alice", "USDT");
        again.request_transaction = tx;
        assert!(store.insert(again).await.is_err());
        assert_eq!(store.find_by_request_transaction(tx).await.unwrap(), Some(w));
        assert!(store.find_by_request_transaction(TransferId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_by_criteria() {
        let store = InMemoryWithdrawStore::new();
        store.insert(new_withdraw("alice", "USDT")).await.unwrap();
        store.insert(new_withdraw("alice", "BTC")).await.unwrap();
        let third = store.insert(new_withdraw("bob", "USDT")).await.unwrap();
        store
            .transition(third.id, WithdrawStatus::Created, WithdrawStatus::Processing, &WithdrawUpdate::default())
            .await
            .unwrap();

        let usdt = WithdrawCriteria {
            currency: Some("USDT".into()),
            ..Default::default()
        };
        let rows = store.find_by_criteria(&usdt, 0, None).await.unwrap();
        assert_eq!(rows.iter().map(|w| w.id).collect::<Vec<_>>(), vec![3, 1]);

        let processing = WithdrawCriteria {
            statuses: vec![WithdrawStatus::Processing],
            ..Default::default()
        };
        assert_eq!(store.find_by_criteria(&processing, 0, Some(10)).await.unwrap().len(), 1);
        assert_eq!(store.find_by_criteria(&WithdrawCriteria::default(), 1, Some(1)).await.unwrap()[0].id, 2);
    }

    #[tokio::test]
    async fn test_history_order() {
        let store = InMemoryWithdrawStore::new();
        store.insert(new_withdraw("alice", "USDT")).await.unwrap();
        store.insert(new_withdraw("bob", "USDT")).await.unwrap();
        store.insert(new_withdraw("alice", "USDT")).await.unwrap();

        let mut query = WithdrawHistoryQuery::new("alice");
        let desc = store.history(&query).await.unwrap();
        assert_eq!(desc.iter().map(|w| w.id).collect::<Vec<_>>(), vec![3, 1]);

        query.page.ascending = true;
        query.page.limit = 1;
        assert_eq!(store.history(&query).await.unwrap()[0].id, 1);
    }
}
