//! Single-account wallet facade
//!
//! [`WalletLegacy`] ties the synchronizer, the transactions cache and the
//! transaction sender together behind one coarse state lock. Node calls are
//! made with the lock released:
//!
//! - synchronization alternates `begin_*`/`fetch_*`/`apply_*` steps and drains
//!   the subscription events into the cache after every apply
//! - sending validates and selects inputs under the lock, then finishes in a
//!   spawned task so that dropping the caller's future never cancels a relay
//!   already in flight
//!
//! Observers are notified after the lock is released.

use std::{
    collections::BTreeMap,
    io::{Read, Write},
    sync::{Arc, Mutex, MutexGuard},
};

use rand::rngs::OsRng;
use tokio::{sync::Mutex as AsyncMutex, task::JoinHandle};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::{
    common::{unix_time_now, Currency},
    data_structures::{
        account::{AccountKeys, AccountPublicAddress},
        types::{Amount, Hash},
    },
    errors::{WalletError, WalletResult},
    events::{notify, EventDispatcher, EventDispatcherError, WalletEvent, WalletLegacyObserver},
    scanning::{
        node::{Node, NodeError},
        output_scanner::ScanKeys,
        subscription::{
            AccountSubscription, SynchronizationStart, TransfersObserver, TransfersSubscription,
        },
        synchronizer::{
            fetch_blocks, fetch_pool, FetchedBlocks, SynchronizerState, TransfersSynchronizer,
        },
    },
    signing::transaction_sender::{SendRequest, WalletTransactionSender},
    storage::{
        output_status::TransferFlags,
        stored_output::TransactionOutputInformation,
        transfers_container::{ContainerParameters, TransfersContainer},
    },
    wallet::{
        config::WalletConfig,
        transactions_cache::WalletUserTransactionsCache,
        types::{
            PaymentIdTransactions, TransactionId, TransferId, WalletLegacyTransaction,
            WalletLegacyTransactionState, WalletLegacyTransfer,
        },
        wallet_serializer::{WalletDetails, WalletSerializer, WalletSnapshot},
    },
};

/// New wallets start scanning this many seconds before their creation time
const ACCOUNT_CREATE_TIME_ACCURACY: u64 = 60 * 60 * 24;

/// Subscription event captured for the facade
#[derive(Debug, Clone, PartialEq, Eq)]
enum TransfersEvent {
    Updated(Hash),
    Deleted(Hash),
    Error { height: u32, error: NodeError },
}

/// Collects the events of the wallet's subscription until the facade drains them
#[derive(Debug, Default)]
pub(crate) struct TransfersEventSink {
    events: Mutex<Vec<TransfersEvent>>,
}

impl TransfersEventSink {
    fn push(&self, event: TransfersEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }

    fn drain(&self) -> Vec<TransfersEvent> {
        std::mem::take(
            &mut *self
                .events
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

impl TransfersObserver for TransfersEventSink {
    fn on_transaction_updated(&self, _address: &AccountPublicAddress, hash: &Hash) {
        self.push(TransfersEvent::Updated(*hash));
    }

    fn on_transaction_deleted(&self, _address: &AccountPublicAddress, hash: &Hash) {
        self.push(TransfersEvent::Deleted(*hash));
    }

    fn on_error(&self, _address: &AccountPublicAddress, height: u32, error: &NodeError) {
        self.push(TransfersEvent::Error {
            height,
            error: error.clone(),
        });
    }
}

struct WalletData {
    keys: AccountKeys,
    password: Zeroizing<String>,
    sync_start: SynchronizationStart,
    synchronizer: TransfersSynchronizer,
    cache: WalletUserTransactionsCache,
    sender: WalletTransactionSender,
    last_actual_balance: Amount,
    last_pending_balance: Amount,
}

impl WalletData {
    fn container(&self) -> WalletResult<&TransfersContainer> {
        self.synchronizer
            .subscription(&self.keys.address)
            .map(TransfersSubscription::container)
            .ok_or_else(|| WalletError::InternalError("wallet subscription missing".to_string()))
    }

    fn actual_balance(&self) -> WalletResult<Amount> {
        Ok(self
            .container()?
            .balance(TransferFlags::INCLUDE_KEY_UNLOCKED)
            .saturating_sub(self.cache.unconfirmed_outs_amount()))
    }

    fn pending_balance(&self) -> WalletResult<Amount> {
        Ok(self
            .container()?
            .balance(TransferFlags::INCLUDE_KEY_NOT_UNLOCKED)
            .saturating_add(self.cache.unconfirmed_transactions_amount()))
    }

    /// Feed captured subscription events into the cache
    fn process_transfers_events(
        &mut self,
        transfers_events: Vec<TransfersEvent>,
        events: &mut Vec<WalletEvent>,
    ) -> WalletResult<()> {
        let now = unix_time_now();
        for event in transfers_events {
            match event {
                TransfersEvent::Updated(hash) => {
                    let Some((info, amount_in, amount_out)) =
                        self.container()?.get_transaction_information(&hash)
                    else {
                        continue;
                    };
                    let delta = amount_out as i64 - amount_in as i64;
                    match self.cache.on_transaction_updated(&info, delta, now) {
                        Some((id, true)) => events.push(WalletEvent::ExternalTransactionCreated { id }),
                        Some((id, false)) => events.push(WalletEvent::TransactionUpdated { id }),
                        None => {}
                    }
                }
                TransfersEvent::Deleted(hash) => {
                    if let Some(id) = self.cache.on_transaction_deleted(&hash) {
                        events.push(WalletEvent::TransactionUpdated { id });
                    }
                }
                TransfersEvent::Error { height, error } => {
                    warn!(height, error = %error, "subscription reported a synchronization error");
                }
            }
        }
        Ok(())
    }

    /// Queue balance notifications for balances that changed since the last check
    fn push_balance_events(&mut self, events: &mut Vec<WalletEvent>) -> WalletResult<()> {
        let actual = self.actual_balance()?;
        if actual != self.last_actual_balance {
            self.last_actual_balance = actual;
            events.push(WalletEvent::ActualBalanceUpdated { balance: actual });
        }
        let pending = self.pending_balance()?;
        if pending != self.last_pending_balance {
            self.last_pending_balance = pending;
            events.push(WalletEvent::PendingBalanceUpdated { balance: pending });
        }
        Ok(())
    }

    /// Unlocked outputs not reserved by an unconfirmed send
    fn spendable_outputs(&self) -> WalletResult<Vec<TransactionOutputInformation>> {
        let used = self.cache.used_outputs();
        Ok(self
            .container()?
            .get_outputs(TransferFlags::INCLUDE_KEY_UNLOCKED)
            .into_iter()
            .filter(|output| !used.contains(&output.reference()))
            .collect())
    }
}

enum WalletState {
    NotInitialized,
    Initialized(Box<WalletData>),
}

struct WalletInner {
    currency: Currency,
    config: WalletConfig,
    node: Arc<dyn Node>,
    state: Mutex<WalletState>,
    dispatcher: Mutex<EventDispatcher>,
    sink: Arc<TransfersEventSink>,
    /// Serializes synchronization passes
    sync_lock: AsyncMutex<()>,
    /// Serializes input selection up to the reservation of the chosen outputs
    send_lock: Arc<AsyncMutex<()>>,
}

/// Wallet for one CryptoNote account
#[derive(Clone)]
pub struct WalletLegacy {
    inner: Arc<WalletInner>,
}

impl WalletLegacy {
    pub fn new(currency: Currency, node: Arc<dyn Node>, config: WalletConfig) -> Self {
        Self {
            inner: Arc::new(WalletInner {
                currency,
                config,
                node,
                state: Mutex::new(WalletState::NotInitialized),
                dispatcher: Mutex::new(EventDispatcher::new()),
                sink: Arc::new(TransfersEventSink::default()),
                sync_lock: AsyncMutex::new(()),
                send_lock: Arc::new(AsyncMutex::new(())),
            }),
        }
    }

    pub fn currency(&self) -> &Currency {
        &self.inner.currency
    }

    // === Observers ===

    pub fn add_observer(
        &self,
        observer: Arc<dyn WalletLegacyObserver>,
    ) -> Result<(), EventDispatcherError> {
        self.dispatcher().register(observer)
    }

    pub fn remove_observer(&self, name: &str) -> bool {
        self.dispatcher().unregister(name)
    }

    // === Lifecycle ===

    /// Create a new random account
    pub fn init_and_generate(&self, password: &str) -> WalletResult<()> {
        let keys = AccountKeys::generate(&mut OsRng);
        let sync_start = SynchronizationStart {
            height: 0,
            timestamp: unix_time_now().saturating_sub(ACCOUNT_CREATE_TIME_ACCURACY),
        };
        let snapshot = WalletSnapshot {
            keys,
            sync_start,
            details: None,
            cache: None,
        };
        self.initialize(snapshot, password)
    }

    /// Restore an account from its keys. The whole chain is scanned.
    pub fn init_with_keys(&self, keys: AccountKeys, password: &str) -> WalletResult<()> {
        let snapshot = WalletSnapshot {
            keys,
            sync_start: SynchronizationStart::default(),
            details: None,
            cache: None,
        };
        self.initialize(snapshot, password)
    }

    pub fn init_and_load<R: Read>(&self, reader: &mut R, password: &str) -> WalletResult<()> {
        if matches!(*self.lock_state()?, WalletState::Initialized(_)) {
            return Err(WalletError::AlreadyInitialized);
        }
        match WalletSerializer::load(reader, password) {
            Ok(snapshot) => self.initialize(snapshot, password),
            Err(error) => {
                self.notify(vec![WalletEvent::InitCompleted {
                    result: Err(error.clone()),
                }]);
                Err(error)
            }
        }
    }

    fn initialize(&self, snapshot: WalletSnapshot, password: &str) -> WalletResult<()> {
        let mut events = Vec::new();
        let result = {
            let mut state = self.lock_state()?;
            if matches!(*state, WalletState::Initialized(_)) {
                return Err(WalletError::AlreadyInitialized);
            }
            let data = snapshot.keys.validate().and_then(|()| {
                self.inner.sink.drain();
                self.build_data(snapshot, password)
            });
            data.map(|data| {
                let address = self.inner.currency.account_address_as_string(&data.keys.address);
                info!(%address, "wallet initialized");
                *state = WalletState::Initialized(Box::new(data));
            })
        };
        events.push(WalletEvent::InitCompleted {
            result: result.clone(),
        });
        self.notify(events);
        result
    }

    fn build_data(&self, snapshot: WalletSnapshot, password: &str) -> WalletResult<WalletData> {
        let WalletSnapshot {
            keys,
            sync_start,
            details,
            cache,
        } = snapshot;
        let params = ContainerParameters::from_currency(&self.inner.currency);
        let (synchronizer_state, container) = match details {
            Some(details) => (
                details.synchronizer,
                TransfersContainer::from_state(params, details.container),
            ),
            None => (SynchronizerState::default(), TransfersContainer::new(params)),
        };
        let account = AccountSubscription {
            keys: ScanKeys {
                address: keys.address,
                view_secret_key: keys.view_secret_key.clone(),
                spend_secret_key: Some(keys.spend_secret_key.clone()),
            },
            sync_start,
        };
        let mut subscription = TransfersSubscription::with_container(account, container);
        subscription.add_observer(self.inner.sink.clone());
        let mut synchronizer = TransfersSynchronizer::from_state(synchronizer_state);
        synchronizer.add_subscription(subscription);

        let config = &self.inner.config;
        let cache = WalletUserTransactionsCache::from_state(
            cache.unwrap_or_default(),
            config.unconfirmed_transaction_live_time.as_secs(),
            config.orphaned_transaction_grace_period.as_secs(),
        );
        let sender =
            WalletTransactionSender::new(self.inner.currency.clone(), keys.clone(), config.dust_policy);

        let mut data = WalletData {
            keys,
            password: Zeroizing::new(password.to_string()),
            sync_start,
            synchronizer,
            cache,
            sender,
            last_actual_balance: 0,
            last_pending_balance: 0,
        };
        data.last_actual_balance = data.actual_balance()?;
        data.last_pending_balance = data.pending_balance()?;
        Ok(data)
    }

    pub fn shutdown(&self) -> WalletResult<()> {
        let _sync = self
            .inner
            .sync_lock
            .try_lock()
            .map_err(|_| WalletError::WrongState)?;
        let mut state = self.lock_state()?;
        if matches!(*state, WalletState::NotInitialized) {
            return Err(WalletError::NotInitialized);
        }
        *state = WalletState::NotInitialized;
        self.inner.sink.drain();
        info!("wallet shut down");
        Ok(())
    }

    /// Drop the transaction history and chain position, keeping the keys
    pub fn reset(&self) -> WalletResult<()> {
        let _sync = self
            .inner
            .sync_lock
            .try_lock()
            .map_err(|_| WalletError::WrongState)?;
        let mut events = Vec::new();
        {
            let mut state = self.lock_state()?;
            let WalletState::Initialized(data) = &mut *state else {
                return Err(WalletError::NotInitialized);
            };
            let snapshot = WalletSnapshot {
                keys: data.keys.clone(),
                sync_start: data.sync_start,
                details: None,
                cache: None,
            };
            let password = data.password.clone();
            self.inner.sink.drain();
            let mut fresh = self.build_data(snapshot, &password)?;
            fresh.last_actual_balance = data.last_actual_balance;
            fresh.last_pending_balance = data.last_pending_balance;
            fresh.push_balance_events(&mut events)?;
            **data = fresh;
        }
        info!("wallet reset");
        self.notify(events);
        Ok(())
    }

    /// Write the encrypted wallet. Without `save_detailed` the chain position
    /// and owned outputs are omitted; without `save_cache` the transaction
    /// history is.
    pub fn save<W: Write>(
        &self,
        writer: &mut W,
        save_detailed: bool,
        save_cache: bool,
    ) -> WalletResult<()> {
        let (snapshot, password) = self.with_data(|data| {
            let details = if save_detailed {
                Some(WalletDetails {
                    synchronizer: data.synchronizer.state().clone(),
                    container: data.container()?.state().clone(),
                })
            } else {
                None
            };
            Ok::<_, WalletError>((
                WalletSnapshot {
                    keys: data.keys.clone(),
                    sync_start: data.sync_start,
                    details,
                    cache: save_cache.then(|| data.cache.state().clone()),
                },
                data.password.clone(),
            ))
        })??;
        let result = WalletSerializer::save(writer, &password, &snapshot);
        self.notify(vec![WalletEvent::SaveCompleted {
            result: result.clone(),
        }]);
        result
    }

    pub fn change_password(&self, old_password: &str, new_password: &str) -> WalletResult<()> {
        let mut state = self.lock_state()?;
        let WalletState::Initialized(data) = &mut *state else {
            return Err(WalletError::NotInitialized);
        };
        if data.password.as_str() != old_password {
            return Err(WalletError::WrongPassword);
        }
        data.password = Zeroizing::new(new_password.to_string());
        Ok(())
    }

    // === Queries ===

    pub fn get_address(&self) -> WalletResult<String> {
        self.with_data(|data| {
            self.inner
                .currency
                .account_address_as_string(&data.keys.address)
        })
    }

    pub fn get_account_keys(&self) -> WalletResult<AccountKeys> {
        self.with_data(|data| data.keys.clone())
    }

    /// Unlocked balance minus outputs consumed by unconfirmed sends
    pub fn actual_balance(&self) -> WalletResult<Amount> {
        self.with_data(WalletData::actual_balance)?
    }

    /// Locked balance plus change of unconfirmed sends
    pub fn pending_balance(&self) -> WalletResult<Amount> {
        self.with_data(WalletData::pending_balance)?
    }

    pub fn get_transaction_count(&self) -> WalletResult<usize> {
        self.with_data(|data| data.cache.transaction_count())
    }

    pub fn get_transfer_count(&self) -> WalletResult<usize> {
        self.with_data(|data| data.cache.transfer_count())
    }

    pub fn get_transaction(&self, id: TransactionId) -> WalletResult<Option<WalletLegacyTransaction>> {
        self.with_data(|data| data.cache.get_transaction(id).cloned())
    }

    pub fn get_transfer(&self, id: TransferId) -> WalletResult<Option<WalletLegacyTransfer>> {
        self.with_data(|data| data.cache.get_transfer(id).cloned())
    }

    pub fn find_transaction_by_transfer_id(
        &self,
        transfer_id: TransferId,
    ) -> WalletResult<Option<TransactionId>> {
        self.with_data(|data| data.cache.find_transaction_by_transfer_id(transfer_id))
    }

    pub fn get_transactions_by_payment_ids(
        &self,
        payment_ids: &[Hash],
    ) -> WalletResult<Vec<PaymentIdTransactions>> {
        self.with_data(|data| data.cache.get_transactions_by_payment_ids(payment_ids))
    }

    /// Run `f` against the live transfers container. Results must not be kept
    /// across wallet mutations.
    pub fn with_transfers_container<T>(
        &self,
        f: impl FnOnce(&TransfersContainer) -> T,
    ) -> WalletResult<T> {
        self.with_data(|data| data.container().map(f))?
    }

    // === Synchronization ===

    /// One synchronization pass: new blocks until the node has no more, then
    /// the pool, then expiry of stale transactions
    pub async fn synchronize(&self) -> WalletResult<()> {
        let _sync = self.inner.sync_lock.lock().await;
        let result = self.synchronize_pass().await;
        let mut events = Vec::new();
        if let Ok(mut state) = self.lock_state() {
            if let WalletState::Initialized(data) = &mut *state {
                let now = unix_time_now();
                for id in data.cache.delete_outdated_transactions(now) {
                    events.push(WalletEvent::TransactionUpdated { id });
                }
                if let Err(error) = data.push_balance_events(&mut events) {
                    warn!(error = %error, "balance check failed");
                }
            }
        }
        match &result {
            Ok(()) => debug!("synchronization pass completed"),
            Err(error) => warn!(error = %error, "synchronization pass failed"),
        }
        events.push(WalletEvent::SynchronizationCompleted {
            result: result.clone(),
        });
        self.notify(events);
        result
    }

    async fn synchronize_pass(&self) -> WalletResult<()> {
        let node = self.inner.node.clone();
        loop {
            let request = self.with_data(|data| data.synchronizer.begin_blocks())?;
            let fetched = match fetch_blocks(node.as_ref(), &request).await {
                Ok(fetched) => fetched,
                Err(error) => {
                    self.apply_with_events(|data| {
                        data.synchronizer.on_error(&error);
                        Ok(())
                    })?;
                    return Err(error.into());
                }
            };
            if self.apply_blocks_in_batches(fetched)? == 0 {
                break;
            }
        }

        let request = self.with_data(|data| data.synchronizer.begin_pool())?;
        match fetch_pool(node.as_ref(), &request).await {
            Ok(fetched) => self.apply_with_events(|data| {
                data.synchronizer.apply_pool(fetched);
                Ok(())
            }),
            Err(error) => {
                self.apply_with_events(|data| {
                    data.synchronizer.on_pool_error(&error);
                    Ok(())
                })?;
                Err(error.into())
            }
        }
    }

    /// Apply fetched blocks `sync_batch_size` at a time, releasing the lock in
    /// between. Returns the number of new blocks.
    fn apply_blocks_in_batches(&self, fetched: FetchedBlocks) -> WalletResult<usize> {
        let batch_size = self.inner.config.sync_batch_size.max(1);
        let FetchedBlocks {
            mut start_height,
            mut blocks,
            node_height,
        } = fetched;
        let mut new_blocks = 0;
        loop {
            let rest = blocks.split_off(batch_size.min(blocks.len()));
            let batch = FetchedBlocks {
                start_height,
                blocks,
                node_height,
            };
            start_height += batch.blocks.len() as u32;
            let applied = self.apply_with_events(|data| data.synchronizer.apply_blocks(batch))?;
            new_blocks += applied.new_blocks;
            self.notify(vec![WalletEvent::SynchronizationProgressUpdated {
                current: applied.local_block_count,
                total: applied.node_height + 1,
            }]);
            if rest.is_empty() {
                return Ok(new_blocks);
            }
            blocks = rest;
        }
    }

    /// Run a mutation under the lock, fold the subscription events into the
    /// cache and notify observers afterwards
    fn apply_with_events<T>(
        &self,
        f: impl FnOnce(&mut WalletData) -> WalletResult<T>,
    ) -> WalletResult<T> {
        let mut events = Vec::new();
        let result = {
            let mut state = self.lock_state()?;
            let WalletState::Initialized(data) = &mut *state else {
                return Err(WalletError::NotInitialized);
            };
            let result = f(data);
            data.process_transfers_events(self.inner.sink.drain(), &mut events)?;
            data.push_balance_events(&mut events)?;
            result
        };
        self.notify(events);
        result
    }

    // === Sending ===

    /// Send to `transfers` and wait for the relay. Validation errors are
    /// returned before anything is recorded; relay errors leave a `Failed`
    /// record behind.
    pub async fn send_transaction(
        &self,
        transfers: &[WalletLegacyTransfer],
        fee: Amount,
        extra: &[u8],
        mix_in: u64,
        unlock_timestamp: u64,
    ) -> WalletResult<TransactionId> {
        let (id, handle) = self
            .start_send(transfers, fee, extra, mix_in, unlock_timestamp)
            .await?;
        join_send(handle).await?;
        Ok(id)
    }

    /// Like [`send_transaction`](Self::send_transaction) but returns once the
    /// transaction is recorded. The outcome arrives through
    /// `send_transaction_completed`.
    pub async fn send_transaction_detached(
        &self,
        transfers: &[WalletLegacyTransfer],
        fee: Amount,
        extra: &[u8],
        mix_in: u64,
        unlock_timestamp: u64,
    ) -> WalletResult<TransactionId> {
        let (id, _handle) = self
            .start_send(transfers, fee, extra, mix_in, unlock_timestamp)
            .await?;
        Ok(id)
    }

    async fn start_send(
        &self,
        transfers: &[WalletLegacyTransfer],
        fee: Amount,
        extra: &[u8],
        mix_in: u64,
        unlock_timestamp: u64,
    ) -> WalletResult<(TransactionId, JoinHandle<WalletResult<()>>)> {
        let transfers = transfers.to_vec();
        self.queue_send(move |data| {
            let request = data.sender.make_send_request(
                data.container()?,
                &data.cache.used_outputs(),
                &transfers,
                fee,
                extra,
                mix_in,
                unlock_timestamp,
                &mut rand::thread_rng(),
            )?;
            Ok((request, transfers))
        })
        .await
    }

    /// Consolidate `fusion_inputs` into fewer outputs sent back to the account
    pub async fn send_fusion_transaction(
        &self,
        fusion_inputs: Vec<TransactionOutputInformation>,
        mix_in: u64,
        extra: &[u8],
    ) -> WalletResult<TransactionId> {
        let (id, handle) = self
            .queue_send(move |data| {
                let spendable: Vec<_> = data
                    .spendable_outputs()?
                    .iter()
                    .map(TransactionOutputInformation::reference)
                    .collect();
                if let Some(output) = fusion_inputs
                    .iter()
                    .find(|output| !spendable.contains(&output.reference()))
                {
                    return Err(WalletError::InvalidArgument(format!(
                        "output {} of {} is not spendable",
                        output.output_in_transaction, output.transaction_hash
                    )));
                }
                let request = data
                    .sender
                    .make_send_fusion_request(fusion_inputs, mix_in, extra)?;
                Ok((request, Vec::new()))
            })
            .await?;
        join_send(handle).await?;
        Ok(id)
    }

    /// Validate and record a send under the state lock, then finish it in a
    /// spawned task
    async fn queue_send(
        &self,
        prepare: impl FnOnce(&mut WalletData) -> WalletResult<(SendRequest, Vec<WalletLegacyTransfer>)>,
    ) -> WalletResult<(TransactionId, JoinHandle<WalletResult<()>>)> {
        let send_guard = self.inner.send_lock.clone().lock_owned().await;
        let (id, request, sender) = {
            let mut state = self.lock_state()?;
            let WalletState::Initialized(data) = &mut *state else {
                return Err(WalletError::NotInitialized);
            };
            let (request, transfers) = prepare(data)?;
            let id = data.cache.add_new_transaction(
                request.total_amount.unsigned_abs(),
                request.fee,
                &request.extra,
                &transfers,
                request.unlock_time,
                unix_time_now(),
            );
            (id, request, data.sender.clone())
        };
        debug!(id, inputs = request.inputs.len(), fusion = request.is_fusion, "send queued");

        let wallet = self.clone();
        let handle = tokio::spawn(async move {
            wallet
                .complete_send(id, request, sender, send_guard)
                .await
        });
        Ok((id, handle))
    }

    async fn complete_send(
        &self,
        id: TransactionId,
        request: SendRequest,
        sender: WalletTransactionSender,
        send_guard: tokio::sync::OwnedMutexGuard<()>,
    ) -> WalletResult<()> {
        let node = self.inner.node.clone();
        let prepared = match sender.fetch_decoys(node.as_ref(), &request).await {
            Ok(decoys) => sender.build_transaction(&request, decoys),
            Err(error) => Err(error),
        };
        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(error) => {
                drop(send_guard);
                return self.finish_send(id, Err(error));
            }
        };

        {
            let mut state = self.lock_state()?;
            let WalletState::Initialized(data) = &mut *state else {
                return Err(WalletError::NotInitialized);
            };
            let still_sending = data
                .cache
                .get_transaction(id)
                .is_some_and(|tx| tx.state == WalletLegacyTransactionState::Sending);
            if !still_sending {
                debug!(id, "send abandoned before relay");
                return Err(WalletError::TxCancelled);
            }
            data.cache.update_transaction(
                id,
                &prepared.transaction,
                prepared.change,
                &prepared.used_outputs,
                prepared.secret_key.clone(),
            )?;
        }
        drop(send_guard);

        let relayed = sender.relay(node.as_ref(), &prepared).await;
        self.finish_send(id, relayed)
    }

    /// Apply a send outcome unless a cancellation got there first
    fn finish_send(&self, id: TransactionId, result: WalletResult<()>) -> WalletResult<()> {
        let mut events = Vec::new();
        let applied = {
            let mut state = self.lock_state()?;
            let WalletState::Initialized(data) = &mut *state else {
                return Err(WalletError::NotInitialized);
            };
            let applied = data.cache.update_transaction_sending_state(id, &result);
            if applied {
                events.push(WalletEvent::SendTransactionCompleted {
                    id,
                    result: result.clone(),
                });
                data.push_balance_events(&mut events)?;
            }
            applied
        };
        self.notify(events);
        if applied {
            result
        } else {
            debug!(id, "send outcome discarded");
            Err(WalletError::TxCancelled)
        }
    }

    /// Cancel a send that has not been relayed yet
    pub fn cancel_transaction(&self, id: TransactionId) -> WalletResult<()> {
        let mut events = Vec::new();
        {
            let mut state = self.lock_state()?;
            let WalletState::Initialized(data) = &mut *state else {
                return Err(WalletError::NotInitialized);
            };
            let transaction = data.cache.get_transaction(id).ok_or_else(|| {
                WalletError::InvalidArgument(format!("unknown transaction id {id}"))
            })?;
            if transaction.state != WalletLegacyTransactionState::Sending {
                return Err(WalletError::TxCancelImpossible);
            }
            let result = Err(WalletError::TxCancelled);
            data.cache.update_transaction_sending_state(id, &result);
            events.push(WalletEvent::SendTransactionCompleted { id, result });
            data.push_balance_events(&mut events)?;
        }
        info!(id, "transaction cancelled");
        self.notify(events);
        Ok(())
    }

    // === Fusion ===

    /// Number of outputs below `threshold` that could take part in fusion
    pub fn estimate_fusion(&self, threshold: Amount) -> WalletResult<usize> {
        let buckets = self.fusion_buckets(threshold)?;
        let min_inputs = self.inner.currency.fusion_tx_min_input_count;
        Ok(buckets
            .values()
            .map(Vec::len)
            .filter(|count| *count >= min_inputs)
            .sum())
    }

    /// Outputs of the largest fusion-ready bucket, capped at what fits one
    /// fusion transaction
    pub fn select_fusion_candidates(
        &self,
        threshold: Amount,
    ) -> WalletResult<Vec<TransactionOutputInformation>> {
        let buckets = self.fusion_buckets(threshold)?;
        let min_inputs = self.inner.currency.fusion_tx_min_input_count;
        let max_inputs = self.with_data(|data| {
            data.sender
                .max_fusion_inputs(self.inner.config.default_mixin)
        })?;
        let Some(mut outputs) = buckets
            .into_values()
            .filter(|outputs| outputs.len() >= min_inputs)
            .max_by_key(Vec::len)
        else {
            return Ok(Vec::new());
        };
        outputs.sort_by_key(|output| output.amount);
        outputs.truncate(max_inputs);
        if outputs.len() < min_inputs {
            return Ok(Vec::new());
        }
        Ok(outputs)
    }

    fn fusion_buckets(
        &self,
        threshold: Amount,
    ) -> WalletResult<BTreeMap<u8, Vec<TransactionOutputInformation>>> {
        let outputs = self.with_data(WalletData::spendable_outputs)??;
        let mut buckets: BTreeMap<u8, Vec<TransactionOutputInformation>> = BTreeMap::new();
        for output in outputs {
            if let Some(power) = self
                .inner
                .currency
                .is_amount_applicable_in_fusion_transaction_input(output.amount, threshold)
            {
                buckets.entry(power).or_default().push(output);
            }
        }
        Ok(buckets)
    }

    // === Internals ===

    fn lock_state(&self) -> WalletResult<MutexGuard<'_, WalletState>> {
        Ok(self.inner.state.lock()?)
    }

    fn with_data<T>(&self, f: impl FnOnce(&WalletData) -> T) -> WalletResult<T> {
        match &*self.lock_state()? {
            WalletState::Initialized(data) => Ok(f(data)),
            WalletState::NotInitialized => Err(WalletError::NotInitialized),
        }
    }

    fn dispatcher(&self) -> MutexGuard<'_, EventDispatcher> {
        self.inner
            .dispatcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self, events: Vec<WalletEvent>) {
        if events.is_empty() {
            return;
        }
        let observers = self.dispatcher().prepare(&events);
        notify(&observers, &events);
    }
}

async fn join_send(handle: JoinHandle<WalletResult<()>>) -> WalletResult<()> {
    handle
        .await
        .map_err(|e| WalletError::InternalError(format!("send task failed: {e}")))?
}
