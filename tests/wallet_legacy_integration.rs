//! End-to-end wallet scenarios against the in-memory node
//!
//! Blocks are mined on demand, so every scenario controls exactly when outputs
//! unlock and when relayed transactions get confirmed.

use std::{sync::Arc, time::Duration};

use cryptonote_wallet_libs::{
    common::Currency,
    data_structures::{account::AccountKeys, transaction::TransactionInput},
    events::{listeners::RecordingObserver, WalletEvent},
    scanning::mocks::{InMemoryNode, MockFailureModes},
    wallet::{
        WalletConfig, WalletLegacy, WalletLegacyTransactionState, WalletLegacyTransfer,
    },
    NodeError, WalletError,
};

const REWARD: u64 = 1_000_000;
const FEE: u64 = 10;

fn test_currency() -> Currency {
    Currency::default()
        .with_mined_money_unlock_window(2)
        .with_transaction_spendable_age(1)
}

struct TestWallet {
    wallet: WalletLegacy,
    recorder: Arc<RecordingObserver>,
}

impl TestWallet {
    fn new(node: &InMemoryNode) -> Self {
        let wallet = WalletLegacy::new(
            test_currency(),
            Arc::new(node.clone()),
            WalletConfig::default(),
        );
        let recorder = Arc::new(RecordingObserver::new("recorder"));
        wallet.add_observer(recorder.clone()).unwrap();
        Self { wallet, recorder }
    }

    fn generated(node: &InMemoryNode) -> Self {
        let test = Self::new(node);
        test.wallet.init_and_generate("pass").unwrap();
        test
    }

    fn keys(&self) -> AccountKeys {
        self.wallet.get_account_keys().unwrap()
    }

    fn state_of(&self, id: usize) -> WalletLegacyTransactionState {
        self.wallet.get_transaction(id).unwrap().unwrap().state
    }
}

/// A wallet holding one unlocked coinbase output of `REWARD`
async fn funded_wallet(node: &InMemoryNode) -> TestWallet {
    let test = TestWallet::generated(node);
    node.mine_block(Some(&test.keys().address), REWARD);
    node.mine_empty_blocks(2);
    test.wallet.synchronize().await.unwrap();
    assert_eq!(test.wallet.actual_balance(), Ok(REWARD));
    test
}

#[tokio::test]
async fn test_receive_coinbase_then_unlock() {
    let node = InMemoryNode::new(test_currency());
    let alice = TestWallet::generated(&node);
    node.mine_block(Some(&alice.keys().address), REWARD);

    alice.wallet.synchronize().await.unwrap();
    assert_eq!(alice.wallet.actual_balance(), Ok(0));
    assert_eq!(alice.wallet.pending_balance(), Ok(REWARD));
    assert_eq!(
        alice.recorder.last_of("ExternalTransactionCreated"),
        Some(WalletEvent::ExternalTransactionCreated { id: 0 })
    );

    let coinbase = alice.wallet.get_transaction(0).unwrap().unwrap();
    assert!(coinbase.is_coinbase);
    assert_eq!(coinbase.total_amount, REWARD as i64);
    assert_eq!(coinbase.block_height, 1);

    node.mine_empty_blocks(2);
    alice.wallet.synchronize().await.unwrap();
    assert_eq!(alice.wallet.actual_balance(), Ok(REWARD));
    assert_eq!(alice.wallet.pending_balance(), Ok(0));
    assert_eq!(
        alice.recorder.last_of("ActualBalanceUpdated"),
        Some(WalletEvent::ActualBalanceUpdated { balance: REWARD })
    );
}

#[tokio::test]
async fn test_send_and_receive_round_trip() {
    let node = InMemoryNode::new(test_currency());
    let alice = funded_wallet(&node).await;
    let bob = TestWallet::generated(&node);
    let bob_address = bob.wallet.get_address().unwrap();

    let id = alice
        .wallet
        .send_transaction(&[WalletLegacyTransfer::new(bob_address.clone(), 300)], FEE, &[], 0, 0)
        .await
        .unwrap();
    assert_eq!(id, 1);
    assert_eq!(alice.state_of(id), WalletLegacyTransactionState::Active);
    assert_eq!(
        alice.recorder.last_of("SendTransactionCompleted"),
        Some(WalletEvent::SendTransactionCompleted { id, result: Ok(()) })
    );
    assert_eq!(node.pool().len(), 1);

    let change = REWARD - 300 - FEE;
    assert_eq!(alice.wallet.actual_balance(), Ok(0));
    assert_eq!(alice.wallet.pending_balance(), Ok(change));

    let sent = alice.wallet.get_transaction(id).unwrap().unwrap();
    assert_eq!(sent.total_amount, -310);
    assert_eq!(sent.fee, FEE);
    assert_eq!(sent.transfer_range(), 0..1);
    let transfer = alice.wallet.get_transfer(0).unwrap().unwrap();
    assert_eq!(transfer.address, bob_address);
    assert_eq!(transfer.amount, 300);
    assert_eq!(alice.wallet.find_transaction_by_transfer_id(0), Ok(Some(id)));

    // pool round: the container takes over from the unconfirmed registry
    alice.wallet.synchronize().await.unwrap();
    assert_eq!(alice.wallet.actual_balance(), Ok(0));
    assert_eq!(alice.wallet.pending_balance(), Ok(change));
    assert_eq!(alice.wallet.get_transaction_count(), Ok(2));

    node.mine_empty_blocks(1);
    bob.wallet.synchronize().await.unwrap();
    assert_eq!(bob.wallet.pending_balance(), Ok(300));
    let received = bob.wallet.get_transaction(0).unwrap().unwrap();
    assert_eq!(received.total_amount, 300);
    assert_eq!(received.fee, FEE);
    assert!(!received.is_coinbase);
    assert_eq!(received.block_height, 4);

    node.mine_empty_blocks(1);
    alice.wallet.synchronize().await.unwrap();
    bob.wallet.synchronize().await.unwrap();
    assert_eq!(bob.wallet.actual_balance(), Ok(300));
    assert_eq!(alice.wallet.actual_balance(), Ok(change));
    assert_eq!(alice.wallet.pending_balance(), Ok(0));

    let confirmed = alice.wallet.get_transaction(id).unwrap().unwrap();
    assert_eq!(confirmed.block_height, 4);
    assert_eq!(confirmed.state, WalletLegacyTransactionState::Active);
    assert_eq!(alice.wallet.get_transaction_count(), Ok(2));
}

#[tokio::test]
async fn test_send_with_decoys_passes_node_ring_check() {
    let node = InMemoryNode::new(test_currency());
    let miner = AccountKeys::generate(&mut rand::thread_rng());
    for _ in 0..3 {
        node.mine_block(Some(&miner.address), REWARD);
    }
    let alice = funded_wallet(&node).await;
    let bob = TestWallet::generated(&node);

    alice
        .wallet
        .send_transaction(
            &[WalletLegacyTransfer::new(bob.wallet.get_address().unwrap(), 5000)],
            FEE,
            &[],
            2,
            0,
        )
        .await
        .unwrap();

    let pool = node.pool();
    assert_eq!(pool.len(), 1);
    for input in &pool[0].prefix.inputs {
        let TransactionInput::Key { output_indexes, .. } = input else {
            panic!("expected a key input");
        };
        assert_eq!(output_indexes.len(), 3);
    }
    assert_eq!(node.calls().random_outs, 1);
}

#[tokio::test]
async fn test_insufficient_funds_fail_before_any_node_call() {
    let node = InMemoryNode::new(test_currency());
    let alice = funded_wallet(&node).await;
    let before = node.calls();
    let address = alice.wallet.get_address().unwrap();

    let result = alice
        .wallet
        .send_transaction(&[WalletLegacyTransfer::new(address, 2 * REWARD as i64)], FEE, &[], 3, 0)
        .await;
    assert_eq!(
        result,
        Err(WalletError::TxTransferImpossible {
            needed: 2 * REWARD + FEE,
            available: REWARD,
        })
    );
    assert_eq!(alice.wallet.get_transaction_count(), Ok(1));
    assert_eq!(node.calls().random_outs, before.random_outs);
    assert_eq!(node.calls().relay, before.relay);

    let result = alice
        .wallet
        .send_transaction(&[WalletLegacyTransfer::new("nonsense", 5)], FEE, &[], 0, 0)
        .await;
    assert!(matches!(result, Err(WalletError::BadAddress(_))));
}

#[tokio::test]
async fn test_relay_failure_marks_transaction_failed() {
    let node = InMemoryNode::new(test_currency());
    let alice = funded_wallet(&node).await;
    let address = alice.wallet.get_address().unwrap();
    node.set_failure_mode(MockFailureModes {
        fail_relay: true,
        next_error_message: Some("relay refused".to_string()),
        ..Default::default()
    });

    let result = alice
        .wallet
        .send_transaction(&[WalletLegacyTransfer::new(address, 100)], FEE, &[], 0, 0)
        .await;
    let expected: Result<(), WalletError> = Err(WalletError::Node(NodeError::NetworkError(
        "relay refused".to_string(),
    )));
    assert_eq!(result.map(|_| ()), expected);
    assert_eq!(alice.state_of(1), WalletLegacyTransactionState::Failed);
    assert_eq!(
        alice.recorder.last_of("SendTransactionCompleted"),
        Some(WalletEvent::SendTransactionCompleted {
            id: 1,
            result: expected,
        })
    );
    // reserved outputs are released again
    assert_eq!(alice.wallet.actual_balance(), Ok(REWARD));
}

#[tokio::test]
async fn test_cancel_before_relay_skips_the_node() {
    let node = InMemoryNode::new(test_currency());
    let alice = funded_wallet(&node).await;
    let address = alice.wallet.get_address().unwrap();

    let id = alice
        .wallet
        .send_transaction_detached(&[WalletLegacyTransfer::new(address, 100)], FEE, &[], 0, 0)
        .await
        .unwrap();
    alice.wallet.cancel_transaction(id).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(node.calls().relay, 0);
    assert_eq!(alice.state_of(id), WalletLegacyTransactionState::Cancelled);
    assert_eq!(alice.recorder.count_of("SendTransactionCompleted"), 1);
    assert_eq!(
        alice.recorder.last_of("SendTransactionCompleted"),
        Some(WalletEvent::SendTransactionCompleted {
            id,
            result: Err(WalletError::TxCancelled),
        })
    );
    assert_eq!(alice.wallet.actual_balance(), Ok(REWARD));
    assert_eq!(
        alice.wallet.cancel_transaction(id),
        Err(WalletError::TxCancelImpossible)
    );
}

#[tokio::test]
async fn test_cancel_during_relay_discards_relay_outcome() {
    let node = InMemoryNode::new(test_currency());
    let alice = funded_wallet(&node).await;
    let address = alice.wallet.get_address().unwrap();
    node.set_relay_delay(Duration::from_millis(500));

    let id = alice
        .wallet
        .send_transaction_detached(&[WalletLegacyTransfer::new(address.clone(), 100)], FEE, &[], 0, 0)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(node.calls().relay, 1);

    alice.wallet.cancel_transaction(id).unwrap();
    tokio::time::sleep(Duration::from_millis(700)).await;

    // the node accepted it, but the wallet keeps the cancellation
    assert_eq!(node.pool().len(), 1);
    assert_eq!(alice.state_of(id), WalletLegacyTransactionState::Cancelled);
    assert_eq!(alice.recorder.count_of("SendTransactionCompleted"), 1);

    // the inputs stay reserved, so a second send cannot reuse them
    assert_eq!(alice.wallet.actual_balance(), Ok(0));
    let retry = alice
        .wallet
        .send_transaction(&[WalletLegacyTransfer::new(address.clone(), 100)], FEE, &[], 0, 0)
        .await;
    assert!(matches!(retry, Err(WalletError::TxTransferImpossible { .. })));
    assert_eq!(node.calls().relay, 1);

    // once observed, the container takes over the spent inputs
    alice.wallet.synchronize().await.unwrap();
    assert_eq!(alice.state_of(id), WalletLegacyTransactionState::Cancelled);
    assert_eq!(alice.wallet.actual_balance(), Ok(0));
    assert_eq!(alice.wallet.pending_balance(), Ok(REWARD - FEE));
}

#[tokio::test]
async fn test_cancel_of_relayed_transaction_is_impossible() {
    let node = InMemoryNode::new(test_currency());
    let alice = funded_wallet(&node).await;
    let address = alice.wallet.get_address().unwrap();
    let id = alice
        .wallet
        .send_transaction(&[WalletLegacyTransfer::new(address, 100)], FEE, &[], 0, 0)
        .await
        .unwrap();
    assert_eq!(
        alice.wallet.cancel_transaction(id),
        Err(WalletError::TxCancelImpossible)
    );
}

#[tokio::test]
async fn test_reorganization_deletes_detached_coinbase() {
    let node = InMemoryNode::new(test_currency());
    let alice = funded_wallet(&node).await;
    alice.recorder.clear();

    node.reorganize(3);
    alice.wallet.synchronize().await.unwrap();

    assert_eq!(alice.wallet.actual_balance(), Ok(0));
    assert_eq!(alice.wallet.pending_balance(), Ok(0));
    assert_eq!(alice.wallet.get_transaction_count(), Ok(1));
    assert_eq!(alice.state_of(0), WalletLegacyTransactionState::Deleted);
    assert_eq!(
        alice.recorder.last_of("TransactionUpdated"),
        Some(WalletEvent::TransactionUpdated { id: 0 })
    );
    assert_eq!(
        alice.recorder.last_of("ActualBalanceUpdated"),
        Some(WalletEvent::ActualBalanceUpdated { balance: 0 })
    );
    assert_eq!(
        alice
            .wallet
            .with_transfers_container(|container| container.transactions_count()),
        Ok(0)
    );
}

#[tokio::test]
async fn test_node_error_is_forwarded_and_recoverable() {
    let node = InMemoryNode::new(test_currency());
    let alice = TestWallet::generated(&node);
    node.mine_block(Some(&alice.keys().address), REWARD);
    node.set_failure_mode(MockFailureModes {
        fail_pool: true,
        ..Default::default()
    });

    let result = alice.wallet.synchronize().await;
    assert!(matches!(
        result,
        Err(WalletError::Node(NodeError::NetworkError(_)))
    ));
    assert_eq!(
        alice.recorder.last_of("SynchronizationCompleted"),
        Some(WalletEvent::SynchronizationCompleted { result })
    );
    // blocks applied before the pool failure are kept
    assert_eq!(alice.wallet.pending_balance(), Ok(REWARD));

    alice.wallet.synchronize().await.unwrap();
    assert_eq!(alice.wallet.pending_balance(), Ok(REWARD));
}

#[tokio::test]
async fn test_save_and_load() {
    let node = InMemoryNode::new(test_currency());
    let alice = funded_wallet(&node).await;
    let mut file = Vec::new();
    alice.wallet.save(&mut file, true, true).unwrap();
    assert_eq!(
        alice.recorder.last_of("SaveCompleted"),
        Some(WalletEvent::SaveCompleted { result: Ok(()) })
    );

    let restored = TestWallet::new(&node);
    assert_eq!(
        restored.wallet.init_and_load(&mut file.as_slice(), "guess"),
        Err(WalletError::WrongPassword)
    );
    assert_eq!(
        restored.recorder.last_of("InitCompleted"),
        Some(WalletEvent::InitCompleted {
            result: Err(WalletError::WrongPassword),
        })
    );

    restored
        .wallet
        .init_and_load(&mut file.as_slice(), "pass")
        .unwrap();
    assert_eq!(restored.wallet.get_address(), alice.wallet.get_address());
    assert_eq!(restored.wallet.actual_balance(), Ok(REWARD));
    assert_eq!(restored.wallet.get_transaction_count(), Ok(1));
    assert_eq!(
        restored.wallet.get_transaction(0),
        alice.wallet.get_transaction(0)
    );

    // already in sync: nothing new to apply
    restored.recorder.clear();
    restored.wallet.synchronize().await.unwrap();
    assert_eq!(restored.recorder.count_of("ExternalTransactionCreated"), 0);
}

#[tokio::test]
async fn test_save_without_details_rescans() {
    let node = InMemoryNode::new(test_currency());
    let alice = funded_wallet(&node).await;
    let mut file = Vec::new();
    alice.wallet.save(&mut file, false, false).unwrap();

    let restored = TestWallet::new(&node);
    restored
        .wallet
        .init_and_load(&mut file.as_slice(), "pass")
        .unwrap();
    assert_eq!(restored.wallet.actual_balance(), Ok(0));
    assert_eq!(restored.wallet.get_transaction_count(), Ok(0));

    restored.wallet.synchronize().await.unwrap();
    assert_eq!(restored.wallet.actual_balance(), Ok(REWARD));
    assert_eq!(restored.wallet.get_transaction_count(), Ok(1));
}

#[tokio::test]
async fn test_reset_keeps_keys_and_rescans() {
    let node = InMemoryNode::new(test_currency());
    let alice = funded_wallet(&node).await;
    let address = alice.wallet.get_address().unwrap();

    alice.wallet.reset().unwrap();
    assert_eq!(alice.wallet.get_address(), Ok(address));
    assert_eq!(alice.wallet.get_transaction_count(), Ok(0));
    assert_eq!(alice.wallet.actual_balance(), Ok(0));

    alice.wallet.synchronize().await.unwrap();
    assert_eq!(alice.wallet.actual_balance(), Ok(REWARD));
}

#[tokio::test]
async fn test_fusion_consolidates_small_outputs() {
    let node = InMemoryNode::new(test_currency());
    let alice = TestWallet::generated(&node);
    for _ in 0..12 {
        node.mine_block(Some(&alice.keys().address), 50);
    }
    node.mine_empty_blocks(2);
    alice.wallet.synchronize().await.unwrap();
    assert_eq!(alice.wallet.actual_balance(), Ok(600));

    assert_eq!(alice.wallet.estimate_fusion(100), Ok(12));
    assert_eq!(alice.wallet.estimate_fusion(50), Ok(0));

    let candidates = alice.wallet.select_fusion_candidates(100).unwrap();
    assert_eq!(candidates.len(), 12);
    let id = alice
        .wallet
        .send_fusion_transaction(candidates, 0, &[])
        .await
        .unwrap();

    let fusion = alice.wallet.get_transaction(id).unwrap().unwrap();
    assert_eq!(fusion.total_amount, 0);
    assert_eq!(fusion.fee, 0);
    assert_eq!(alice.wallet.actual_balance(), Ok(0));
    assert_eq!(alice.wallet.pending_balance(), Ok(600));
    assert_eq!(alice.wallet.estimate_fusion(100), Ok(0));

    node.mine_empty_blocks(2);
    alice.wallet.synchronize().await.unwrap();
    assert_eq!(alice.wallet.actual_balance(), Ok(600));
    assert_eq!(alice.wallet.pending_balance(), Ok(0));
}

#[tokio::test]
async fn test_fusion_rejects_too_few_inputs() {
    let node = InMemoryNode::new(test_currency());
    let alice = TestWallet::generated(&node);
    for _ in 0..3 {
        node.mine_block(Some(&alice.keys().address), 50);
    }
    node.mine_empty_blocks(2);
    alice.wallet.synchronize().await.unwrap();

    assert_eq!(alice.wallet.select_fusion_candidates(100), Ok(Vec::new()));
    let outputs = alice
        .wallet
        .with_transfers_container(|container| {
            container.get_outputs(cryptonote_wallet_libs::TransferFlags::INCLUDE_KEY_UNLOCKED)
        })
        .unwrap();
    assert_eq!(
        alice.wallet.send_fusion_transaction(outputs, 0, &[]).await,
        Err(WalletError::NotFusionTransaction)
    );
    assert_eq!(alice.wallet.get_transaction_count(), Ok(3));
}

#[tokio::test]
async fn test_shutdown_then_reinitialize() {
    let node = InMemoryNode::new(test_currency());
    let alice = funded_wallet(&node).await;
    let keys = alice.keys();
    alice.wallet.shutdown().unwrap();
    assert_eq!(alice.wallet.actual_balance(), Err(WalletError::NotInitialized));

    alice.wallet.init_with_keys(keys.clone(), "pass").unwrap();
    assert_eq!(alice.keys(), keys);
    alice.wallet.synchronize().await.unwrap();
    assert_eq!(alice.wallet.actual_balance(), Ok(REWARD));
}
