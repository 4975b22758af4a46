//! Wallet owner manager

use std::sync::Arc;
use tracing::info;

use super::models::{WalletOwner, owner_flags};
use super::store::WalletStore;
use crate::error::{LedgerError, LedgerResult};

/// Title given to owners created implicitly by an incoming transfer
pub const DEFAULT_OWNER_TITLE: &str = "not set";
pub const DEFAULT_OWNER_LEVEL: &str = "1";

pub struct WalletOwnerManager {
    store: Arc<dyn WalletStore>,
    system_uuid: String,
}

impl WalletOwnerManager {
    pub fn new(store: Arc<dyn WalletStore>, system_uuid: impl Into<String>) -> Self {
        Self {
            store,
            system_uuid: system_uuid.into(),
        }
    }

    /// Uuid of the platform's own ledger account
    pub fn system_uuid(&self) -> &str {
        &self.system_uuid
    }

    pub async fn find_owner(&self, uuid: &str) -> LedgerResult<Option<WalletOwner>> {
        self.store.find_owner(uuid).await
    }

    pub async fn require_owner(&self, uuid: &str) -> LedgerResult<WalletOwner> {
        self.find_owner(uuid)
            .await?
            .ok_or_else(|| LedgerError::WalletOwnerNotFound(uuid.to_string()))
    }

    pub async fn create_owner(&self, uuid: &str, title: &str, level: &str) -> LedgerResult<WalletOwner> {
        let owner = self
            .store
            .create_owner(uuid, title, level, owner_flags::DEFAULT)
            .await?;
        info!(owner_id = owner.id, uuid = %uuid, level = %level, "Wallet owner created");
        Ok(owner)
    }

    /// Lazily create the owner the first time its uuid needs a wallet
    pub async fn find_or_create_owner(&self, uuid: &str) -> LedgerResult<WalletOwner> {
        if let Some(owner) = self.find_owner(uuid).await? {
            return Ok(owner);
        }
        match self
            .create_owner(uuid, DEFAULT_OWNER_TITLE, DEFAULT_OWNER_LEVEL)
            .await
        {
            Ok(owner) => Ok(owner),
            // Lost the race to another creator
            Err(_) => self.require_owner(uuid).await,
        }
    }

    pub async fn system_owner(&self) -> LedgerResult<WalletOwner> {
        self.require_owner(&self.system_uuid).await
    }

    /// Create the system owner at startup if missing
    pub async fn bootstrap_system_owner(&self) -> LedgerResult<WalletOwner> {
        if let Some(owner) = self.find_owner(&self.system_uuid).await? {
            return Ok(owner);
        }
        self.create_owner(&self.system_uuid, "system", "system").await
    }

    pub async fn set_permissions(
        &self,
        uuid: &str,
        trade: bool,
        withdraw: bool,
        deposit: bool,
    ) -> LedgerResult<WalletOwner> {
        let mut flags = 0;
        if trade {
            flags |= owner_flags::CAN_TRADE;
        }
        if withdraw {
            flags |= owner_flags::CAN_WITHDRAW;
        }
        if deposit {
            flags |= owner_flags::CAN_DEPOSIT;
        }
        let owner = self.store.update_owner_flags(uuid, flags).await?;
        info!(uuid = %uuid, flags, "Wallet owner permissions updated");
        Ok(owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::InMemoryWalletStore;

    fn manager() -> WalletOwnerManager {
        WalletOwnerManager::new(Arc::new(InMemoryWalletStore::new()), "system-uuid")
    }

    #[tokio::test]
    async fn test_find_or_create_owner() {
        let owners = manager();
        let a = owners.find_or_create_owner("u-1").await.unwrap();
        let b = owners.find_or_create_owner("u-1").await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.title, DEFAULT_OWNER_TITLE);
        assert!(a.can_trade() && a.can_withdraw() && a.can_deposit());
    }

    #[tokio::test]
    async fn test_bootstrap_system_owner_is_idempotent() {
        let owners = manager();
        let a = owners.bootstrap_system_owner().await.unwrap();
        let b = owners.bootstrap_system_owner().await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(owners.system_owner().await.unwrap().uuid, "system-uuid");
    }

    #[tokio::test]
    async fn test_set_permissions() {
        let owners = manager();
        owners.find_or_create_owner("u-1").await.unwrap();
        let owner = owners.set_permissions("u-1", true, false, true).await.unwrap();
        assert!(owner.can_trade());
        assert!(!owner.can_withdraw());
        assert!(owner.can_deposit());

        assert!(matches!(
            owners.set_permissions("missing", true, true, true).await,
            Err(LedgerError::WalletOwnerNotFound(_))
        ));
    }
}
