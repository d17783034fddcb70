//! Pending pool front end and its worker thread.
//!
//! ```text
//!   peers ── add_transaction ──▶ [bounded peer queue] ──┐
//!                                                       ▼
//!   wallet ── add_transaction_sync ─▶ [local queue] ─▶ worker ─▶ PendingSet
//!   ledger ── on_block_committed ──▶ [local queue] ──┘    │
//!                                                         └─▶ TransactionRelay
//! ```
//!
//! The worker drains the local queue before taking the next peer job, so a
//! flood of peer transactions never delays a local submission or a block
//! commit.

use {
    crate::{
        admission::{Admission, PendingSet, PendingTransaction},
        config::PoolConfig,
        error::{PoolError, Result, TxError},
    },
    crossbeam_channel::{
        bounded, select, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError,
    },
    log::{debug, info, warn},
    parking_lot::{Mutex, RwLock},
    std::{
        sync::{
            atomic::{AtomicBool, AtomicU64, Ordering},
            Arc,
        },
        thread::{Builder, JoinHandle},
        time::{Duration, Instant, SystemTime, UNIX_EPOCH},
    },
    tessera_ledger_api::{Address, BlockCommit, Ledger, Transaction},
};

/// How often the worker wakes to expire staged transactions when idle.
const WORKER_TICK_MS: u64 = 500;

/// Receives every transaction that becomes pending, for gossip.
pub trait TransactionRelay: Send + Sync {
    fn relay(&self, tx: &Transaction);
}

/// Outcome of a synchronous submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingResult {
    /// Transactions that became pending as a result of this submission.
    /// Zero when the transaction was staged behind a nonce gap.
    pub promoted: usize,
    /// Why the transaction was refused, if it was.
    pub error: Option<TxError>,
}

impl ProcessingResult {
    fn rejected(error: TxError) -> Self {
        Self {
            promoted: 0,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

// ── Counters ────────────────────────────────────────────────────────────────

/// Admission counters, updated by the worker.
#[derive(Debug, Default)]
pub struct PoolStats {
    admitted: AtomicU64,
    rejected: AtomicU64,
    staged: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of [`PoolStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    /// Transactions promoted to pending.
    pub admitted: u64,
    /// Submissions refused by an admission check.
    pub rejected: u64,
    /// Submissions held behind a nonce gap.
    pub staged: u64,
    /// Staged or queued transactions discarded without a verdict.
    pub dropped: u64,
}

impl PoolStats {
    pub(crate) fn record_admitted(&self, n: usize) {
        self.admitted.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_staged(&self) {
        self.staged.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, n: usize) {
        self.dropped.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            staged: self.staged.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

// ── Pool ────────────────────────────────────────────────────────────────────

enum Job {
    Admit {
        tx: Transaction,
        reply: Option<Sender<ProcessingResult>>,
    },
    BlockCommitted(BlockCommit),
    Shutdown,
}

/// Per-sender nonce-ordered admission control.
///
/// All per-sender state lives on a dedicated worker thread; callers only
/// enqueue work. The pending set itself is shared for reading.
pub struct PendingPool {
    config: PoolConfig,
    ledger: Arc<dyn Ledger>,
    peer_sender: Sender<Job>,
    local_sender: Sender<Job>,
    pending: Arc<RwLock<PendingSet>>,
    stats: Arc<PoolStats>,
    exit: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    done: Receiver<()>,
}

impl PendingPool {
    /// Validate `config` and start the worker thread.
    pub fn new(
        config: PoolConfig,
        ledger: Arc<dyn Ledger>,
        relay: Option<Arc<dyn TransactionRelay>>,
    ) -> Result<Self> {
        config.validate()?;

        let (peer_sender, peer_receiver) = bounded(config.queue_capacity);
        let (local_sender, local_receiver) = unbounded();
        let (done_sender, done) = bounded(1);
        let pending = Arc::new(RwLock::new(PendingSet::default()));
        let stats = Arc::new(PoolStats::default());
        let exit = Arc::new(AtomicBool::new(false));

        let mut admission = Admission::new(
            config.clone(),
            ledger.clone(),
            pending.clone(),
            relay,
            stats.clone(),
        );
        let worker_exit = exit.clone();
        let worker = Builder::new()
            .name("tesseraPendingPool".to_string())
            .spawn(move || {
                Self::run(&mut admission, &local_receiver, &peer_receiver, &worker_exit);
                let _ = done_sender.send(());
            })
            .map_err(|e| PoolError::Spawn(e.to_string()))?;

        info!("pending pool started for {}", config.network);
        Ok(Self {
            config,
            ledger,
            peer_sender,
            local_sender,
            pending,
            stats,
            exit,
            worker: Mutex::new(Some(worker)),
            done,
        })
    }

    // ── Entry points ────────────────────────────────────────────────────

    /// Queue a peer-sourced transaction. Never blocks; the transaction is
    /// dropped if the queue is full or the pool is stopping.
    pub fn add_transaction(&self, tx: Transaction) {
        if self.exit.load(Ordering::Relaxed) {
            return;
        }
        match self.peer_sender.try_send(Job::Admit { tx, reply: None }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!("pending pool queue full, dropping peer transaction");
                self.stats.record_dropped(1);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Run a locally originated transaction through admission and wait for
    /// the verdict.
    pub fn add_transaction_sync(&self, tx: Transaction) -> ProcessingResult {
        if self.exit.load(Ordering::Relaxed) {
            return ProcessingResult::rejected(TxError::ShutDown);
        }
        let (reply, verdict) = bounded(1);
        if self
            .local_sender
            .send(Job::Admit {
                tx,
                reply: Some(reply),
            })
            .is_err()
        {
            return ProcessingResult::rejected(TxError::ShutDown);
        }
        verdict
            .recv()
            .unwrap_or_else(|_| ProcessingResult::rejected(TxError::ShutDown))
    }

    /// Notify the pool that `commit` was appended to the canonical chain.
    pub fn on_block_committed(&self, commit: BlockCommit) {
        if self.local_sender.send(Job::BlockCommitted(commit)).is_err() {
            warn!("pending pool stopped, ignoring block commit");
        }
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// Pending transactions in promotion order, at most `limit` if given.
    pub fn pending_transactions(&self, limit: Option<usize>) -> Vec<PendingTransaction> {
        let pending = self.pending.read();
        let limit = limit.unwrap_or(usize::MAX).min(pending.order.len());
        pending.order[..limit].to_vec()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.read().order.len()
    }

    /// Next nonce `address` should use, counting its pending transactions.
    pub fn pending_nonce(&self, address: &Address) -> u64 {
        self.pending
            .read()
            .next_nonce
            .get(address)
            .copied()
            .unwrap_or_else(|| self.ledger.account(address).nonce)
    }

    /// Jobs waiting for the worker.
    pub fn queue_len(&self) -> usize {
        self.peer_sender.len().saturating_add(self.local_sender.len())
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Stop the worker after it drains already-queued jobs.
    ///
    /// Pending transactions stay readable afterwards. Calling `stop` twice
    /// is a no-op.
    pub fn stop(&self) -> Result<()> {
        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };
        self.exit.store(true, Ordering::Relaxed);
        let _ = self.local_sender.send(Job::Shutdown);

        match self.done.recv_timeout(self.config.shutdown_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.join().is_err() {
                    warn!("pending pool worker panicked");
                }
                info!("pending pool stopped with {} pending", self.pending_len());
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("pending pool worker did not stop in time");
                Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout))
            }
        }
    }

    // ── Worker ──────────────────────────────────────────────────────────

    fn run(
        admission: &mut Admission,
        local: &Receiver<Job>,
        peer: &Receiver<Job>,
        exit: &AtomicBool,
    ) {
        let tick = Duration::from_millis(WORKER_TICK_MS);
        let mut last_expiry = Instant::now();

        loop {
            while let Ok(job) = local.try_recv() {
                Self::handle(admission, job);
            }
            if exit.load(Ordering::Relaxed) {
                break;
            }

            select! {
                recv(local) -> job => match job {
                    Ok(job) => Self::handle(admission, job),
                    Err(_) => break,
                },
                recv(peer) -> job => match job {
                    Ok(job) => Self::handle(admission, job),
                    Err(_) => break,
                },
                default(tick) => {}
            }

            if last_expiry.elapsed() >= tick {
                admission.expire_staged(Instant::now());
                last_expiry = Instant::now();
            }
        }

        // Drain whatever was queued before the stop request.
        let mut drained = 0usize;
        while let Ok(job) = local.try_recv().or_else(|_| peer.try_recv()) {
            Self::handle(admission, job);
            drained = drained.saturating_add(1);
        }
        debug!("pending pool worker exiting, drained {drained} jobs");
    }

    fn handle(admission: &mut Admission, job: Job) {
        match job {
            Job::Admit { tx, reply } => {
                let result = match admission.admit(tx, now_ms(), Instant::now()) {
                    Ok(promoted) => ProcessingResult {
                        promoted,
                        error: None,
                    },
                    Err(error) => ProcessingResult::rejected(error),
                };
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            Job::BlockCommitted(commit) => admission.on_block_committed(&commit, Instant::now()),
            Job::Shutdown => {}
        }
    }
}

impl Drop for PendingPool {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("pending pool drop: {e}");
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        tessera_ledger_api::{Key, MemoryLedger, Network, TransactionType},
    };

    struct CollectingRelay(Mutex<Vec<u64>>);

    impl TransactionRelay for CollectingRelay {
        fn relay(&self, tx: &Transaction) {
            self.0.lock().push(tx.nonce);
        }
    }

    fn transfer(key: &Key, nonce: u64) -> Transaction {
        Transaction::new_signed(
            key,
            Network::Devnet,
            TransactionType::Transfer,
            Address([8u8; 20]),
            1,
            1,
            nonce,
            now_ms(),
            vec![],
        )
    }

    #[test]
    fn test_sync_submission_reports_result() {
        let ledger = Arc::new(MemoryLedger::new());
        let key = Key::from_seed(&[1u8; 32]).unwrap();
        ledger.fund(key.address(), 100);
        let pool = PendingPool::new(PoolConfig::dev_default(), ledger, None).unwrap();

        let tx = transfer(&key, 0);
        let result = pool.add_transaction_sync(tx.clone());
        assert_eq!(result, ProcessingResult { promoted: 1, error: None });
        assert_eq!(
            pool.add_transaction_sync(tx).error,
            Some(TxError::DuplicatedHash)
        );
        assert_eq!(pool.pending_nonce(&key.address()), 1);
        assert_eq!(pool.stats().admitted, 1);
        assert_eq!(pool.stats().rejected, 1);
    }

    #[test]
    fn test_relay_sees_promotions_in_nonce_order() {
        let ledger = Arc::new(MemoryLedger::new());
        let key = Key::from_seed(&[1u8; 32]).unwrap();
        ledger.fund(key.address(), 100);
        let relay = Arc::new(CollectingRelay(Mutex::new(Vec::new())));
        let pool = PendingPool::new(
            PoolConfig::dev_default(),
            ledger,
            Some(relay.clone() as Arc<dyn TransactionRelay>),
        )
        .unwrap();

        pool.add_transaction_sync(transfer(&key, 1));
        assert!(relay.0.lock().is_empty());
        pool.add_transaction_sync(transfer(&key, 0));
        assert_eq!(*relay.0.lock(), vec![0, 1]);
    }

    #[test]
    fn test_stop_is_idempotent_and_rejects_later_submissions() {
        let ledger = Arc::new(MemoryLedger::new());
        let key = Key::from_seed(&[1u8; 32]).unwrap();
        ledger.fund(key.address(), 100);
        let pool = PendingPool::new(PoolConfig::dev_default(), ledger, None).unwrap();
        pool.add_transaction(transfer(&key, 0));

        pool.stop().unwrap();
        pool.stop().unwrap();
        assert_eq!(pool.pending_len(), 1);
        assert_eq!(
            pool.add_transaction_sync(transfer(&key, 1)).error,
            Some(TxError::ShutDown)
        );
    }
}
