//! Concurrent postings, races on single-shot transitions, conservation

mod common;

use common::{SYSTEM_UUID, balance, ledger};
use custody_ledger::ledger::TransferCategory;
use custody_ledger::reservation::ReserveRequest;
use custody_ledger::transfer::TransferRequest;
use custody_ledger::withdraw::{WithdrawAcceptCommand, WithdrawCommand};
use custody_ledger::{LedgerError, LedgerState, WalletType};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const OWNERS: [&str; 4] = ["alice", "bob", "carol", "dave"];

fn transfer(sender: &str, receiver: &str, amount: Decimal) -> TransferRequest {
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

async fn total_usdt(state: &LedgerState) -> Decimal {
    let mut total = balance(state, SYSTEM_UUID, "USDT", WalletType::Main).await;
    for owner in OWNERS {
        total += balance(state, owner, "USDT", WalletType::Main).await;
        total += balance(state, owner, "USDT", WalletType::Cashout).await;
    }
    total
}

async fn seeded(per_owner: Decimal) -> LedgerState {
    let (state, _) = ledger(dec!(10000)).await;
    for owner in OWNERS {
        state
            .transfers
            .deposit("USDT", owner, WalletType::Main, per_owner, None, None)
            .await
            .unwrap();
    }
    state
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_transfers_conserve_value() {
    let state = seeded(dec!(100)).await;
    let before = total_usdt(&state).await;

    let mut handles = Vec::new();
    for i in 0..200usize {
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            let sender = OWNERS[i % OWNERS.len()];
            let receiver = OWNERS[(i * 7 + 1) % OWNERS.len()];
            if sender == receiver {
                return None;
            }
            let amount = Decimal::from((i % 5) as i64 + 1);
            match state.transfers.transfer(transfer(sender, receiver, amount)).await {
                Ok(_) => Some(true),
                Err(LedgerError::InsufficientFunds | LedgerError::Contention { .. }) => Some(false),
                Err(e) => panic!("unexpected error: {e}"),
            }
        }));
    }
    let mut committed = 0;
    for h in handles {
        if h.await.unwrap() == Some(true) {
            committed += 1;
        }
    }

    assert!(committed > 0);
    assert_eq!(total_usdt(&state).await, before);
    for owner in OWNERS {
        assert!(balance(&state, owner, "USDT", WalletType::Main).await >= Decimal::ZERO);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_drain_never_overdraws() {
    let state = seeded(dec!(10)).await;

    let mut handles = Vec::new();
    for _ in 0..50 {
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            state.transfers.transfer(transfer("alice", "bob", dec!(1))).await.is_ok()
        }));
    }
    let mut ok = 0;
    for h in handles {
        if h.await.unwrap() {
            ok += 1;
        }
    }

    let alice = balance(&state, "alice", "USDT", WalletType::Main).await;
    assert!(ok <= 10);
    assert_eq!(alice, dec!(10) - Decimal::from(ok));
    assert_eq!(balance(&state, "bob", "USDT", WalletType::Main).await, dec!(10) + Decimal::from(ok));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_advances_settle_exactly_once() {
    let (state, _) = ledger(dec!(1000)).await;
    state
        .transfers
        .deposit("ETH", "alice", WalletType::Main, dec!(1), None, None)
        .await
        .unwrap();
    let r = state
        .reservations
        .reserve(ReserveRequest {
            source_amount: dec!(1),
            source_symbol: "ETH".into(),
            dest_symbol: "USDT".into(),
            sender_uuid: "alice".into(),
            sender_wallet_type: WalletType::Main,
            receiver_uuid: "bob".into(),
            receiver_wallet_type: WalletType::Main,
        })
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let state = state.clone();
        let rn = r.reserve_number.clone();
        handles.push(tokio::spawn(async move {
            state
                .reservations
                .advance(&rn, None, Some(format!("race-{i}")), None)
                .await
                .is_ok()
        }));
    }
    let mut wins = 0;
    for h in handles {
        if h.await.unwrap() {
            wins += 1;
        }
    }

    assert_eq!(wins, 1);
    assert_eq!(balance(&state, "bob", "USDT", WalletType::Main).await, dec!(200));
    assert_eq!(balance(&state, "alice", "ETH", WalletType::Main).await, dec!(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_accepts_release_once() {
    let state = seeded(dec!(100)).await;
    let requested = state
        .withdraws
        .request_withdraw(WithdrawCommand {
            uuid: "alice".into(),
            currency: "USDT".into(),
            amount: dec!(30),
            description: None,
            dest_symbol: "USDT".into(),
            dest_address: "TQ1xyz".into(),
            dest_network: "TRON".into(),
            dest_note: None,
        })
        .await
        .unwrap();
    let system_before = balance(&state, SYSTEM_UUID, "USDT", WalletType::Main).await;

    let mut handles = Vec::new();
    for _ in 0..6 {
        let state = state.clone();
        let id = requested.withdraw_id;
        handles.push(tokio::spawn(async move {
            state
                .withdraws
                .accept_withdraw(WithdrawAcceptCommand {
                    withdraw_id: id,
                    ..Default::default()
                })
                .await
                .is_ok()
        }));
    }
    let mut wins = 0;
    for h in handles {
        if h.await.unwrap() {
            wins += 1;
        }
    }

    assert_eq!(wins, 1);
    assert_eq!(
        balance(&state, SYSTEM_UUID, "USDT", WalletType::Main).await,
        system_before + dec!(30)
    );
    assert_eq!(balance(&state, "alice", "USDT", WalletType::Cashout).await, dec!(0));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_any_transfer_sequence_conserves_value(
        ops in proptest::collection::vec((0..OWNERS.len(), 0..OWNERS.len(), 1u32..5000), 1..40),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let state = seeded(dec!(20)).await;
            let before = total_usdt(&state).await;

            for (s, r, cents) in ops {
                let amount = Decimal::new(i64::from(cents), 2);
                let result = state.transfers.transfer(transfer(OWNERS[s], OWNERS[r], amount)).await;
                if let Err(e) = result {
                    assert!(
                        matches!(e, LedgerError::InsufficientFunds | LedgerError::SameWallet),
                        "unexpected error: {e}"
                    );
                }
            }

            assert_eq!(total_usdt(&state).await, before);
            for owner in OWNERS {
                assert!(balance(&state, owner, "USDT", WalletType::Main).await >= Decimal::ZERO);
            }
        });
    }
}
