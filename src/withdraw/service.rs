//! Withdrawal state machine
//!
//! `request` stages funds MAIN → CASHOUT. `accept` releases the stage to the
//! system MAIN wallet; `cancel` and `reject` return it to the owner's MAIN.
//! Each leg-carrying transition first claims the status by compare-and-set,
//! then posts; a failed posting puts the previous row back.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::models::{
    ManualWithdrawCommand, NewWithdraw, Withdraw, WithdrawAcceptCommand, WithdrawActionResult,
    WithdrawCommand, WithdrawCriteria, WithdrawHistoryQuery, WithdrawRejectCommand, WithdrawStatus,
    WithdrawType, WithdrawUpdate,
};
use super::policy::WithdrawPolicyProvider;
use super::store::WithdrawStore;
use crate::currency::{CurrencyProvider, require_active_currency};
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{CustodyAccess, TransferCategory, TransferCommand, TransferEngine, TransferResult};
use crate::money::Amount;
use crate::transfer::service::checked_amount;
use crate::wallet::{Wallet, WalletManager, WalletOwnerManager, WalletType};

pub struct WithdrawService {
    store: Arc<dyn WithdrawStore>,
    policies: Arc<dyn WithdrawPolicyProvider>,
    engine: Arc<TransferEngine>,
    wallets: Arc<WalletManager>,
    owners: Arc<WalletOwnerManager>,
    currencies: Arc<dyn CurrencyProvider>,
    custody: CustodyAccess,
}

impl WithdrawService {
    pub fn new(
        store: Arc<dyn WithdrawStore>,
        policies: Arc<dyn WithdrawPolicyProvider>,
        engine: Arc<TransferEngine>,
        wallets: Arc<WalletManager>,
        owners: Arc<WalletOwnerManager>,
        currencies: Arc<dyn CurrencyProvider>,
    ) -> Self {
        Self {
            store,
            policies,
            engine,
            wallets,
            owners,
            currencies,
            custody: CustodyAccess::grant(),
        }
    }

    /// Stage `cmd.amount` (fee included) in the owner's CASHOUT wallet
    ///
    /// # Errors
    /// * `WithdrawNotAllowed` - network disabled or unknown
    /// * `WithdrawAmountExceedsBalance` / `AmountBelowMinimum`
    /// * `Forbidden` - owner may not withdraw
    pub async fn request_withdraw(&self, cmd: WithdrawCommand) -> LedgerResult<WithdrawActionResult> {
        let currency = require_active_currency(self.currencies.as_ref(), &cmd.currency).await?;
        let owner = self.owners.require_owner(&cmd.uuid).await?;
        if !owner.can_withdraw() {
            return Err(LedgerError::Forbidden);
        }
        let amount = checked_amount(&currency, cmd.amount)?;

        let policy = self
            .policies
            .get_withdraw_policy(&cmd.dest_symbol, &cmd.dest_network)
            .await?
            .filter(|p| p.enabled)
            .ok_or(LedgerError::WithdrawNotAllowed)?;
        let source = self
            .wallets
            .find_wallet(&owner, &currency.symbol, WalletType::Main)
            .await?
            .ok_or(LedgerError::WalletNotFound)?;

        if amount.value() > source.balance + policy.fee {
            return Err(LedgerError::WithdrawAmountExceedsBalance);
        }
        if amount.value() < policy.minimum || amount.value() <= policy.fee {
            return Err(LedgerError::AmountBelowMinimum);
        }
        let net = amount.value() - policy.fee;

        let cashout = self
            .wallets
            .find_or_create_wallet(&owner, &currency.symbol, WalletType::Cashout)
            .await?;

        let posted = self
            .engine
            .custody_transfer(
                TransferCommand::new(source, cashout.clone(), amount.clone(), TransferCategory::WithdrawRequest)
                    .with_description(cmd.description),
                &self.custody,
            )
            .await?;

        let new_withdraw = NewWithdraw {
            owner_uuid: owner.uuid.clone(),
            currency: currency.symbol.clone(),
            wallet_id: cashout.id,
            amount: net,
            request_transaction: posted.transfer_id,
            final_transaction: None,
            applied_fee: policy.fee,
            dest_amount: Some(net),
            dest_symbol: Some(cmd.dest_symbol),
            dest_address: Some(cmd.dest_address),
            dest_network: Some(cmd.dest_network),
            dest_note: cmd.dest_note,
            dest_transaction_ref: None,
            status: WithdrawStatus::Created,
            applicator: None,
            withdraw_type: WithdrawType::OnChain,
            attachment: None,
        };
        let withdraw = match self.store.insert(new_withdraw).await {
            Ok(w) => w,
            Err(e) => {
                error!(owner = %owner.uuid, transfer_id = %posted.transfer_id, error = %e, "Withdraw insert failed, unstaging funds");
                self.unstage_orphan(&owner.uuid, &amount, cashout.id, &posted).await;
                return Err(e);
            }
        };

        info!(
            withdraw_id = withdraw.id,
            owner = %withdraw.owner_uuid,
            amount = %withdraw.amount,
            fee = %withdraw.applied_fee,
            "Withdraw requested"
        );
        Ok(WithdrawActionResult {
            withdraw_id: withdraw.id,
            status: withdraw.status,
        })
    }

    /// Release the staged funds to the system wallet
    pub async fn accept_withdraw(&self, cmd: WithdrawAcceptCommand) -> LedgerResult<WithdrawActionResult> {
        let w = self.require(cmd.withdraw_id).await?;
        if !w.status.can_be_accepted() {
            return Err(LedgerError::WithdrawAlreadyProcessed);
        }

        let cashout = self.cashout_wallet(&w).await?;
        let system = self.owners.system_owner().await?;
        let dest = self
            .wallets
            .find_or_create_wallet(&system, &w.currency, WalletType::Main)
            .await?;

        let update = WithdrawUpdate {
            dest_amount: Some(cmd.dest_amount.unwrap_or(w.amount)),
            dest_note: w.dest_note.clone().or(cmd.dest_note),
            dest_transaction_ref: cmd.dest_transaction_ref,
            applicator: cmd.applicator,
            ..Default::default()
        };
        let done = self
            .transition_with_leg(&w, WithdrawStatus::Done, update, cashout, dest, TransferCategory::WithdrawAccept, None)
            .await?
            .ok_or(LedgerError::WithdrawAlreadyProcessed)?;
        Ok(WithdrawActionResult {
            withdraw_id: done.id,
            status: done.status,
        })
    }

    /// CREATED → PROCESSING, no balance movement
    pub async fn process_withdraw(&self, withdraw_id: i64) -> LedgerResult<WithdrawActionResult> {
        let w = self.require(withdraw_id).await?;
        if !w.status.can_be_processed() {
            return Err(LedgerError::WithdrawAlreadyProcessed);
        }
        self.store
            .transition(w.id, w.status, WithdrawStatus::Processing, &WithdrawUpdate::default())
            .await?
            .ok_or(LedgerError::WithdrawAlreadyProcessed)?;
        info!(withdraw_id, "Withdraw processing");
        Ok(WithdrawActionResult {
            withdraw_id,
            status: WithdrawStatus::Processing,
        })
    }

    /// Owner cancel; refunds CASHOUT → MAIN
    pub async fn cancel_withdraw(&self, uuid: &str, withdraw_id: i64) -> LedgerResult<WithdrawActionResult> {
        let w = self.require(withdraw_id).await?;
        if w.owner_uuid != uuid {
            return Err(LedgerError::Forbidden);
        }
        if !w.status.can_be_canceled() {
            return Err(LedgerError::WithdrawCannotBeCanceled);
        }

        let owner = self.owners.require_owner(uuid).await?;
        let cashout = self.cashout_wallet(&w).await?;
        let dest = self
            .wallets
            .find_or_create_wallet(&owner, &w.currency, WalletType::Main)
            .await?;
        let canceled = self
            .transition_with_leg(
                &w,
                WithdrawStatus::Canceled,
                WithdrawUpdate::default(),
                cashout,
                dest,
                TransferCategory::WithdrawCancel,
                None,
            )
            .await?
            .ok_or(LedgerError::WithdrawCannotBeCanceled)?;
        Ok(WithdrawActionResult {
            withdraw_id: canceled.id,
            status: canceled.status,
        })
    }

    /// Operator reject; refunds the CASHOUT owner's MAIN wallet
    pub async fn reject_withdraw(&self, cmd: WithdrawRejectCommand) -> LedgerResult<WithdrawActionResult> {
        let w = self.require(cmd.withdraw_id).await?;
        if !w.status.can_be_rejected() {
            return Err(LedgerError::WithdrawCannotBeRejected);
        }

        let cashout = self.cashout_wallet(&w).await?;
        let owner = self.owners.require_owner(&cashout.owner_uuid).await?;
        let dest = self
            .wallets
            .find_or_create_wallet(&owner, &cashout.currency, WalletType::Main)
            .await?;
        let update = WithdrawUpdate {
            status_reason: Some(cmd.status_reason.clone()),
            dest_note: cmd.dest_note,
            applicator: cmd.applicator,
            ..Default::default()
        };
        let rejected = self
            .transition_with_leg(
                &w,
                WithdrawStatus::Rejected,
                update,
                cashout,
                dest,
                TransferCategory::WithdrawReject,
                Some(cmd.status_reason),
            )
            .await?
            .ok_or(LedgerError::WithdrawCannotBeRejected)?;
        Ok(WithdrawActionResult {
            withdraw_id: rejected.id,
            status: rejected.status,
        })
    }

    /// Record a payout settled outside the chain gateway
    ///
    /// Moves MAIN → MAIN between the two owners and stores a DONE withdraw of
    /// type MANUALLY.
    pub async fn withdraw_manually(&self, cmd: ManualWithdrawCommand) -> LedgerResult<TransferResult> {
        info!(source = %cmd.source_uuid, receiver = %cmd.receiver_uuid, symbol = %cmd.symbol, "Manual withdraw");
        let currency = require_active_currency(self.currencies.as_ref(), &cmd.symbol).await?;
        let amount = checked_amount(&currency, cmd.amount)?;

        let sender = self.owners.require_owner(&cmd.source_uuid).await?;
        let source = self
            .wallets
            .find_wallet(&sender, &currency.symbol, WalletType::Main)
            .await?
            .ok_or(LedgerError::WalletNotFound)?;
        let receiver = self.owners.find_or_create_owner(&cmd.receiver_uuid).await?;
        let dest = self
            .wallets
            .find_or_create_wallet(&receiver, &currency.symbol, WalletType::Main)
            .await?;
        let dest_wallet_id = dest.id;

        let posted = self
            .engine
            .transfer(
                TransferCommand::new(source, dest, amount.clone(), TransferCategory::WithdrawManually)
                    .with_description(cmd.description.clone())
                    .with_ref(cmd.transfer_ref.clone()),
            )
            .await?;

        if let Some(existing) = self.store.find_by_request_transaction(posted.transfer_id).await? {
            info!(withdraw_id = existing.id, transfer_id = %posted.transfer_id, "Manual withdraw already recorded");
            return Ok(posted);
        }

        let inserted = self
            .store
            .insert(NewWithdraw {
                owner_uuid: cmd.source_uuid,
                currency: currency.symbol.clone(),
                wallet_id: dest_wallet_id,
                amount: amount.value(),
                request_transaction: posted.transfer_id,
                final_transaction: Some(posted.transfer_id),
                applied_fee: Decimal::ZERO,
                dest_amount: Some(Decimal::ZERO),
                dest_symbol: Some(currency.symbol),
                dest_address: Some(cmd.receiver_uuid.clone()),
                dest_network: None,
                dest_note: cmd.description,
                dest_transaction_ref: cmd.transfer_ref,
                status: WithdrawStatus::Done,
                applicator: Some(cmd.receiver_uuid),
                withdraw_type: WithdrawType::Manually,
                attachment: cmd.attachment,
            })
            .await;
        if let Err(e) = inserted {
            // A concurrent call with the same ref may have recorded it first
            if self.store.find_by_request_transaction(posted.transfer_id).await?.is_none() {
                return Err(e);
            }
        }
        Ok(posted)
    }

    pub async fn find_withdraw(&self, withdraw_id: i64) -> LedgerResult<Option<Withdraw>> {
        self.store.find(withdraw_id).await
    }

    pub async fn find_by_criteria(
        &self,
        criteria: &WithdrawCriteria,
        offset: usize,
        size: Option<usize>,
    ) -> LedgerResult<Vec<Withdraw>> {
        self.store.find_by_criteria(criteria, offset, size).await
    }

    pub async fn withdraw_history(&self, query: &WithdrawHistoryQuery) -> LedgerResult<Vec<Withdraw>> {
        self.store.history(query).await
    }

    async fn require(&self, withdraw_id: i64) -> LedgerResult<Withdraw> {
        self.store
            .find(withdraw_id)
            .await?
            .ok_or(LedgerError::WithdrawNotFound(withdraw_id))
    }

    async fn cashout_wallet(&self, w: &Withdraw) -> LedgerResult<Wallet> {
        self.wallets
            .find_wallet_by_id(w.wallet_id)
            .await?
            .ok_or(LedgerError::WalletNotFound)
    }

    /// Claim `new_status`, then move the staged amount out of CASHOUT
    ///
    /// `Ok(None)` when another transition won the status race.
    #[allow(clippy::too_many_arguments)]
    async fn transition_with_leg(
        &self,
        w: &Withdraw,
        new_status: WithdrawStatus,
        update: WithdrawUpdate,
        cashout: Wallet,
        dest: Wallet,
        category: TransferCategory,
        description: Option<String>,
    ) -> LedgerResult<Option<Withdraw>> {
        let Some(mut claimed) = self
            .store
            .transition(w.id, w.status, new_status, &update)
            .await?
        else {
            return Ok(None);
        };

        let leg_ref = format!("withdraw:{}:{}", w.id, new_status);
        let amount = Amount::new(w.currency.clone(), w.staged_amount());
        let cmd = TransferCommand::new(cashout, dest, amount, category)
            .with_description(description)
            .with_ref(Some(leg_ref.clone()));

        let posted = match self.engine.custody_transfer(cmd, &self.custody).await {
            Ok(posted) => posted,
            Err(e) => {
                // The posting may have landed before the error surfaced
                if let Ok(Some(record)) = self.engine.find_by_ref(&leg_ref).await {
                    warn!(withdraw_id = w.id, error = %e, "Withdraw leg reported failure but was posted");
                    TransferResult::from(&record)
                } else {
                    if !self.store.revert(new_status, w).await? {
                        error!(withdraw_id = w.id, status = %new_status, "CRITICAL: withdraw status could not be reverted");
                    }
                    warn!(withdraw_id = w.id, status = %new_status, error = %e, "Withdraw leg failed, status reverted");
                    return Err(e);
                }
            }
        };

        self.store
            .set_final_transaction(w.id, posted.transfer_id)
            .await?;
        claimed.final_transaction = Some(posted.transfer_id);

        info!(
            withdraw_id = w.id,
            from = %w.status,
            to = %new_status,
            transfer_id = %posted.transfer_id,
            "Withdraw transitioned"
        );
        Ok(Some(claimed))
    }

    async fn unstage_orphan(&self, owner_uuid: &str, amount: &Amount, cashout_id: i64, posted: &TransferResult) {
        let refund = async {
            let owner = self.owners.require_owner(owner_uuid).await?;
            let cashout = self
                .wallets
                .find_wallet_by_id(cashout_id)
                .await?
                .ok_or(LedgerError::WalletNotFound)?;
            let main = self
                .wallets
                .find_wallet(&owner, amount.currency(), WalletType::Main)
                .await?
                .ok_or(LedgerError::WalletNotFound)?;
            let cmd = TransferCommand::new(cashout, main, amount.clone(), TransferCategory::WithdrawCancel)
                .with_ref(Some(format!("withdraw:orphan:{}", posted.transfer_id)));
            self.engine.custody_transfer(cmd, &self.custody).await
        };
        if let Err(e) = refund.await {
            error!(
                owner = %owner_uuid,
                transfer_id = %posted.transfer_id,
                error = %e,
                "CRITICAL: staged withdraw funds could not be returned"
            );
        }
    }
}
