//! End-to-end flows over the wired in-memory ledger

mod common;

use common::{SYSTEM_UUID, balance, ledger};
use custody_ledger::ledger::{TransferCategory, TransferQuery};
use custody_ledger::reservation::{ReservationStatus, ReserveRequest};
use custody_ledger::transfer::TransferRequest;
use custody_ledger::withdraw::{WithdrawAcceptCommand, WithdrawCommand, WithdrawRejectCommand, WithdrawStatus};
use custody_ledger::{LedgerError, WalletType};
use rust_decimal_macros::dec;

fn usdt_transfer(sender: &str, receiver: &str, amount: rust_decimal::Decimal) -> TransferRequest {
    TransferRequest {
        symbol: "USDT".into(),
        sender_uuid: sender.into(),
        sender_wallet_type: WalletType::Main,
        receiver_uuid: receiver.into(),
        receiver_wallet_type: WalletType::Main,
        amount,
        description: None,
        transfer_ref: None,
        category: TransferCategory::NoCategory,
    }
}

fn withdraw_command(amount: rust_decimal::Decimal) -> WithdrawCommand {
    WithdrawCommand {
        uuid: "alice".into(),
        currency: "USDT".into(),
        amount,
        description: None,
        dest_symbol: "USDT".into(),
        dest_address: "TQ1xyz".into(),
        dest_network: "TRON".into(),
        dest_note: None,
    }
}

#[tokio::test]
async fn deposit_then_transfer_moves_balances_and_records_history() {
    let (state, metrics) = ledger(dec!(1000)).await;
    state
        .transfers
        .deposit("USDT", "alice", WalletType::Main, dec!(100), None, Some("dep-1".into()))
        .await
        .unwrap();
    state.transfers.transfer(usdt_transfer("alice", "bob", dec!(40))).await.unwrap();

    assert_eq!(balance(&state, "alice", "USDT", WalletType::Main).await, dec!(60));
    assert_eq!(balance(&state, "bob", "USDT", WalletType::Main).await, dec!(40));
    assert_eq!(balance(&state, SYSTEM_UUID, "USDT", WalletType::Main).await, dec!(900));
    assert_eq!(metrics.get("deposit_event"), 1);
    assert_eq!(metrics.get("transfer_event"), 1);

    let history = state
        .transfers
        .history(&TransferQuery {
            owner_uuid: Some("alice".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    // Newest first by default
    assert_eq!(history[0].category, TransferCategory::NoCategory);
    assert_eq!(history[1].transfer_ref.as_deref(), Some("dep-1"));
}

#[tokio::test]
async fn overdraw_fails_without_moving_anything() {
    let (state, _) = ledger(dec!(1000)).await;
    state
        .transfers
        .deposit("USDT", "alice", WalletType::Main, dec!(10), None, None)
        .await
        .unwrap();

    let err = state
        .transfers
        .transfer(usdt_transfer("alice", "bob", dec!(10.01)))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds));
    assert_eq!(balance(&state, "alice", "USDT", WalletType::Main).await, dec!(10));
    assert_eq!(balance(&state, "bob", "USDT", WalletType::Main).await, dec!(0));
}

#[tokio::test]
async fn generic_transfer_cannot_touch_cashout() {
    let (state, _) = ledger(dec!(1000)).await;
    state
        .transfers
        .deposit("USDT", "alice", WalletType::Main, dec!(10), None, None)
        .await
        .unwrap();

    let mut req = usdt_transfer("alice", "alice", dec!(1));
    req.receiver_wallet_type = WalletType::Cashout;
    assert!(matches!(
        state.transfers.transfer(req).await,
        Err(LedgerError::InvalidCashoutUsage)
    ));
}

#[tokio::test]
async fn repeated_ref_posts_once() {
    let (state, _) = ledger(dec!(1000)).await;
    let first = state
        .transfers
        .deposit("USDT", "alice", WalletType::Main, dec!(5), None, Some("once".into()))
        .await
        .unwrap();
    let second = state
        .transfers
        .deposit("USDT", "alice", WalletType::Main, dec!(5), None, Some("once".into()))
        .await
        .unwrap();

    assert_eq!(first.transfer_id, second.transfer_id);
    assert_eq!(balance(&state, "alice", "USDT", WalletType::Main).await, dec!(5));
}

#[tokio::test]
async fn multi_hop_quote_uses_transitive_pivot() {
    let (state, _) = ledger(dec!(1000)).await;
    let quote = state
        .transfers
        .calculate_destination_amount("ETH", dec!(0.5), "USDT")
        .await
        .unwrap();
    assert_eq!(quote.value(), dec!(100));

    assert!(matches!(
        state.transfers.calculate_destination_amount("USDT", dec!(1), "ETH").await,
        Err(LedgerError::NoConversionPath { .. })
    ));
}

fn eth_to_usdt(amount: rust_decimal::Decimal) -> ReserveRequest {
    ReserveRequest {
        source_amount: amount,
        source_symbol: "ETH".into(),
        dest_symbol: "USDT".into(),
        sender_uuid: "alice".into(),
        sender_wallet_type: WalletType::Main,
        receiver_uuid: "bob".into(),
        receiver_wallet_type: WalletType::Main,
    }
}

#[tokio::test]
async fn reservation_settles_once() {
    let (state, metrics) = ledger(dec!(200)).await;
    state
        .transfers
        .deposit("ETH", "alice", WalletType::Main, dec!(1), None, None)
        .await
        .unwrap();

    let r = state.reservations.reserve(eth_to_usdt(dec!(1))).await.unwrap();
    assert_eq!(r.reserved_dest_amount, dec!(200));

    state
        .reservations
        .advance(&r.reserve_number, Some("otc".into()), Some("order-7".into()), None)
        .await
        .unwrap();
    assert_eq!(balance(&state, "alice", "ETH", WalletType::Main).await, dec!(0));
    assert_eq!(balance(&state, "bob", "USDT", WalletType::Main).await, dec!(200));
    assert_eq!(balance(&state, SYSTEM_UUID, "USDT", WalletType::Main).await, dec!(0));
    assert_eq!(metrics.get("purchase_finalized_event"), 2);

    let again = state
        .reservations
        .advance(&r.reserve_number, None, Some("order-7".into()), None)
        .await;
    assert!(matches!(again, Err(LedgerError::InvalidReservation(_))));

    let stored = state.reservations.find(&r.reserve_number).await.unwrap().unwrap();
    assert_eq!(stored.status, ReservationStatus::Committed);
}

#[tokio::test]
async fn reservation_needs_system_liquidity() {
    let (state, _) = ledger(dec!(199.99)).await;
    state
        .transfers
        .deposit("ETH", "alice", WalletType::Main, dec!(1), None, None)
        .await
        .unwrap();

    assert!(matches!(
        state.reservations.reserve(eth_to_usdt(dec!(1))).await,
        Err(LedgerError::InsufficientSystemLiquidity)
    ));
}

#[tokio::test]
async fn withdraw_request_accept_round_trip() {
    let (state, metrics) = ledger(dec!(1000)).await;
    state
        .transfers
        .deposit("USDT", "alice", WalletType::Main, dec!(50), None, None)
        .await
        .unwrap();

    let requested = state.withdraws.request_withdraw(withdraw_command(dec!(20))).await.unwrap();
    assert_eq!(requested.status, WithdrawStatus::Created);
    assert_eq!(balance(&state, "alice", "USDT", WalletType::Main).await, dec!(30));
    assert_eq!(balance(&state, "alice", "USDT", WalletType::Cashout).await, dec!(20));

    let w = state.withdraws.find_withdraw(requested.withdraw_id).await.unwrap().unwrap();
    assert_eq!(w.amount, dec!(19));
    assert_eq!(w.applied_fee, dec!(1));

    state.withdraws.process_withdraw(w.id).await.unwrap();
    let done = state
        .withdraws
        .accept_withdraw(WithdrawAcceptCommand {
            withdraw_id: w.id,
            dest_transaction_ref: Some("0xchain".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(done.status, WithdrawStatus::Done);
    assert_eq!(balance(&state, "alice", "USDT", WalletType::Cashout).await, dec!(0));
    assert_eq!(balance(&state, SYSTEM_UUID, "USDT", WalletType::Main).await, dec!(970));
    assert_eq!(metrics.get("withdraw_accept_event"), 1);

    assert!(matches!(
        state.withdraws.cancel_withdraw("alice", w.id).await,
        Err(LedgerError::WithdrawCannotBeCanceled)
    ));
}

#[tokio::test]
async fn withdraw_cancel_and_reject_return_funds() {
    let (state, _) = ledger(dec!(1000)).await;
    state
        .transfers
        .deposit("USDT", "alice", WalletType::Main, dec!(50), None, None)
        .await
        .unwrap();

    let a = state.withdraws.request_withdraw(withdraw_command(dec!(10))).await.unwrap();
    let b = state.withdraws.request_withdraw(withdraw_command(dec!(15))).await.unwrap();
    assert_eq!(balance(&state, "alice", "USDT", WalletType::Main).await, dec!(25));

    assert!(matches!(
        state.withdraws.cancel_withdraw("mallory", a.withdraw_id).await,
        Err(LedgerError::Forbidden)
    ));
    let canceled = state.withdraws.cancel_withdraw("alice", a.withdraw_id).await.unwrap();
    assert_eq!(canceled.status, WithdrawStatus::Canceled);

    state.withdraws.process_withdraw(b.withdraw_id).await.unwrap();
    let rejected = state
        .withdraws
        .reject_withdraw(WithdrawRejectCommand {
            withdraw_id: b.withdraw_id,
            status_reason: "address flagged".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(rejected.status, WithdrawStatus::Rejected);

    assert_eq!(balance(&state, "alice", "USDT", WalletType::Main).await, dec!(50));
    assert_eq!(balance(&state, "alice", "USDT", WalletType::Cashout).await, dec!(0));
}
