//! Admission state owned by the pool worker.
//!
//! [`Admission`] holds every per-sender structure and is only ever touched
//! from the worker thread. The pending set it promotes into is shared with
//! readers through [`PendingSet`].
//!
//! A transaction whose nonce equals the sender's next nonce is promoted to
//! pending immediately, followed by any staged successors that have become
//! contiguous. A transaction further ahead is staged until the gap fills,
//! it expires, or it is evicted to make room for newer staged entries.

use {
    crate::{
        config::PoolConfig,
        error::TxError,
        pool::{PoolStats, TransactionRelay},
    },
    log::{debug, trace, warn},
    lru::LruCache,
    parking_lot::RwLock,
    std::{
        collections::{BTreeMap, HashMap, HashSet},
        sync::Arc,
        time::Instant,
    },
    tessera_ledger_api::{AccountState, Address, BlockCommit, Ledger, Transaction, TxHash},
};

/// A transaction visible in the pending set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    pub transaction: Transaction,
    pub hash: TxHash,
    pub sender: Address,
    pub nonce: u64,
}

impl PendingTransaction {
    fn new(transaction: Transaction, hash: TxHash, sender: Address) -> Self {
        let nonce = transaction.nonce;
        Self {
            transaction,
            hash,
            sender,
            nonce,
        }
    }
}

/// The observable pending set, in promotion order.
#[derive(Debug, Default)]
pub struct PendingSet {
    pub(crate) order: Vec<PendingTransaction>,
    pub(crate) hashes: HashSet<TxHash>,
    /// Next nonce per sender after applying its pending transactions.
    pub(crate) next_nonce: HashMap<Address, u64>,
}

impl PendingSet {
    fn push(&mut self, pending: PendingTransaction) {
        self.hashes.insert(pending.hash);
        self.next_nonce
            .insert(pending.sender, pending.nonce.saturating_add(1));
        self.order.push(pending);
    }
}

#[derive(Debug)]
struct Staged {
    tx: Transaction,
    hash: TxHash,
}

#[derive(Debug)]
struct SenderState {
    /// Confirmed account with every pending transaction applied.
    projected: AccountState,
    /// Nonce-gap transactions keyed by nonce.
    staged: BTreeMap<u64, Staged>,
}

pub(crate) struct Admission {
    config: PoolConfig,
    ledger: Arc<dyn Ledger>,
    senders: HashMap<Address, SenderState>,
    /// Staging order across all senders, oldest first.
    staged_order: LruCache<(Address, u64), Instant>,
    pending: Arc<RwLock<PendingSet>>,
    relay: Option<Arc<dyn TransactionRelay>>,
    stats: Arc<PoolStats>,
}

impl Admission {
    pub(crate) fn new(
        config: PoolConfig,
        ledger: Arc<dyn Ledger>,
        pending: Arc<RwLock<PendingSet>>,
        relay: Option<Arc<dyn TransactionRelay>>,
        stats: Arc<PoolStats>,
    ) -> Self {
        let staged_order = LruCache::new(config.max_staged);
        Self {
            config,
            ledger,
            senders: HashMap::new(),
            staged_order,
            pending,
            relay,
            stats,
        }
    }

    // ── Admission ───────────────────────────────────────────────────────

    /// Run every admission check and either promote or stage `tx`.
    ///
    /// Returns the number of transactions that became pending, which is
    /// zero when `tx` was staged.
    pub(crate) fn admit(
        &mut self,
        tx: Transaction,
        now_ms: u64,
        now: Instant,
    ) -> Result<usize, TxError> {
        let sender = tx.sender();
        let result = self.try_admit(tx, sender, now_ms, now);
        if result.is_err() {
            self.release_if_idle(&sender);
        }
        match &result {
            Ok(0) => self.stats.record_staged(),
            Ok(n) => self.stats.record_admitted(*n),
            Err(e) => {
                trace!("transaction rejected: {e}");
                self.stats.record_rejected();
            }
        }
        result
    }

    fn try_admit(
        &mut self,
        tx: Transaction,
        sender: Address,
        now_ms: u64,
        now: Instant,
    ) -> Result<usize, TxError> {
        self.check_structure(&tx)?;

        let hash = tx.hash();
        if self.ledger.has_transaction(&hash) || self.pending.read().hashes.contains(&hash) {
            return Err(TxError::DuplicatedHash);
        }
        if self.config.reserved_addresses.contains(&tx.to) {
            return Err(TxError::ReservedRecipient);
        }
        let drift = u64::try_from(self.config.max_timestamp_drift.as_millis()).unwrap_or(u64::MAX);
        if now_ms.abs_diff(tx.timestamp) > drift {
            return Err(TxError::InvalidTimestamp);
        }

        let ledger = &self.ledger;
        let state = self
            .senders
            .entry(sender)
            .or_insert_with(|| SenderState {
                projected: ledger.account(&sender),
                staged: BTreeMap::new(),
            });

        let expected = state.projected.nonce;
        if tx.nonce < expected {
            return Err(TxError::NonceTooLow {
                expected,
                actual: tx.nonce,
            });
        }

        // The transaction must be affordable on its own from the projected
        // balance, whether it is promoted now or staged.
        let mut scratch = AccountState {
            nonce: tx.nonce,
            ..state.projected
        };
        scratch
            .apply_as_sender(&tx)
            .map_err(TxError::InsufficientBalance)?;

        if tx.nonce > expected {
            let gap = tx.nonce.saturating_sub(expected);
            if gap > self.config.max_nonce_gap {
                return Err(TxError::NonceGapTooLarge {
                    expected,
                    actual: tx.nonce,
                });
            }
            if let Some(existing) = state.staged.get(&tx.nonce) {
                return Err(if existing.hash == hash {
                    TxError::DuplicatedHash
                } else {
                    TxError::NonceAlreadyStaged(tx.nonce)
                });
            }
            let _ = self.stage(sender, tx, hash, now);
            return Ok(0);
        }

        state.projected = scratch;
        let pending = PendingTransaction::new(tx, hash, sender);
        self.publish(vec![pending]);
        Ok(self.promote_staged(sender).saturating_add(1))
    }

    fn check_structure(&self, tx: &Transaction) -> Result<(), TxError> {
        if tx.network != self.config.network {
            return Err(TxError::InvalidNetwork);
        }
        if tx.data.len() > self.config.max_data_size {
            return Err(TxError::DataTooLarge {
                size: tx.data.len(),
                max: self.config.max_data_size,
            });
        }
        if tx.fee < self.config.min_fee {
            return Err(TxError::FeeTooLow {
                fee: tx.fee,
                min: self.config.min_fee,
            });
        }
        if !tx.verify_signature() {
            return Err(TxError::InvalidSignature);
        }
        Ok(())
    }

    // ── Staging ─────────────────────────────────────────────────────────

    /// Hold `tx` until its predecessors arrive. An entry already staged at
    /// the same nonce is kept and `tx` is discarded; returns whether `tx`
    /// was staged.
    fn stage(&mut self, sender: Address, tx: Transaction, hash: TxHash, now: Instant) -> bool {
        let nonce = tx.nonce;
        if self
            .senders
            .get(&sender)
            .is_some_and(|state| state.staged.contains_key(&nonce))
        {
            trace!("nonce {nonce} of {sender} already staged");
            return false;
        }
        if self.staged_order.len() >= self.config.max_staged {
            if let Some(((old_sender, old_nonce), _)) = self.staged_order.pop_lru() {
                debug!("staging full, evicting nonce {old_nonce} of {old_sender}");
                self.remove_staged(&old_sender, old_nonce);
                self.stats.record_dropped(1);
            }
        }
        // Eviction above may have released this very sender.
        let ledger = &self.ledger;
        self.senders
            .entry(sender)
            .or_insert_with(|| SenderState {
                projected: ledger.account(&sender),
                staged: BTreeMap::new(),
            })
            .staged
            .insert(nonce, Staged { tx, hash });
        self.staged_order.put((sender, nonce), now);
        trace!("staged nonce {nonce} of {sender}");
        true
    }

    fn remove_staged(&mut self, sender: &Address, nonce: u64) -> Option<Staged> {
        let staged = self.senders.get_mut(sender)?.staged.remove(&nonce);
        self.release_if_idle(sender);
        staged
    }

    /// Forget a sender with nothing pending or staged. Its state is
    /// reloaded from the ledger on its next submission.
    fn release_if_idle(&mut self, sender: &Address) {
        let idle = self
            .senders
            .get(sender)
            .is_some_and(|state| state.staged.is_empty())
            && !self.pending.read().next_nonce.contains_key(sender);
        if idle {
            self.senders.remove(sender);
        }
    }

    /// Discard staged transactions older than the configured expiry.
    pub(crate) fn expire_staged(&mut self, now: Instant) -> usize {
        let mut expired = 0usize;
        while let Some((&(sender, nonce), &staged_at)) = self.staged_order.peek_lru() {
            if now.saturating_duration_since(staged_at) < self.config.staged_expiry {
                break;
            }
            self.staged_order.pop_lru();
            self.remove_staged(&sender, nonce);
            expired = expired.saturating_add(1);
        }
        if expired > 0 {
            debug!("expired {expired} staged transactions");
            self.stats.record_dropped(expired);
        }
        expired
    }

    /// Promote staged transactions of `sender` while they are contiguous
    /// with its projected nonce.
    fn promote_staged(&mut self, sender: Address) -> usize {
        let mut promoted = Vec::new();
        let mut dropped = 0usize;
        if let Some(state) = self.senders.get_mut(&sender) {
            while let Some(staged) = state.staged.remove(&state.projected.nonce) {
                self.staged_order.pop(&(sender, staged.tx.nonce));
                match state.projected.apply_as_sender(&staged.tx) {
                    Ok(()) => {
                        promoted.push(PendingTransaction::new(staged.tx, staged.hash, sender))
                    }
                    Err(e) => {
                        debug!("dropping staged nonce {} of {sender}: {e}", staged.tx.nonce);
                        dropped = dropped.saturating_add(1);
                        break;
                    }
                }
            }
        }
        if dropped > 0 {
            self.stats.record_dropped(dropped);
        }
        let count = promoted.len();
        self.publish(promoted);
        count
    }

    fn publish(&self, promoted: Vec<PendingTransaction>) {
        if promoted.is_empty() {
            return;
        }
        let outgoing: Vec<Transaction> = match self.relay {
            Some(_) => promoted.iter().map(|p| p.transaction.clone()).collect(),
            None => Vec::new(),
        };
        {
            let mut pending = self.pending.write();
            for p in promoted {
                pending.push(p);
            }
        }
        if let Some(relay) = &self.relay {
            for tx in &outgoing {
                relay.relay(tx);
            }
        }
    }

    // ── Block commit ────────────────────────────────────────────────────

    /// Re-base every affected sender on its new confirmed state.
    ///
    /// Pending entries the block made obsolete are dropped. The remaining
    /// pending chain is re-applied in nonce order; the first entry that no
    /// longer applies and everything after it go back to staging. Newly
    /// contiguous staged entries are then promoted.
    pub(crate) fn on_block_committed(&mut self, commit: &BlockCommit, now: Instant) {
        let affected = commit.affected_accounts();
        debug!(
            "block {} committed, re-evaluating {} accounts",
            commit.number,
            affected.len()
        );

        let mut chains: HashMap<Address, Vec<PendingTransaction>> = HashMap::new();
        {
            let mut pending = self.pending.write();
            let order = std::mem::take(&mut pending.order);
            for p in order {
                if affected.contains(&p.sender) {
                    chains.entry(p.sender).or_default().push(p);
                } else {
                    pending.order.push(p);
                }
            }
            for address in &affected {
                pending.next_nonce.remove(address);
            }
            for chain in chains.values() {
                for p in chain {
                    pending.hashes.remove(&p.hash);
                }
            }
        }

        let mut requeue = Vec::new();
        let mut obsolete = 0usize;
        for address in &affected {
            let confirmed = self.ledger.account(address);
            let mut chain = chains.remove(address).unwrap_or_default();
            chain.sort_by_key(|p| p.nonce);

            let mut projected = confirmed;
            let mut kept = Vec::new();
            let mut broken = false;
            for p in chain {
                if p.nonce < confirmed.nonce || self.ledger.has_transaction(&p.hash) {
                    obsolete = obsolete.saturating_add(1);
                } else if !broken && projected.apply_as_sender(&p.transaction).is_ok() {
                    kept.push(p);
                } else {
                    broken = true;
                    requeue.push(p);
                }
            }

            if let Some(state) = self.senders.get_mut(address) {
                state.projected = projected;
                let stale: Vec<u64> = state
                    .staged
                    .range(..confirmed.nonce)
                    .map(|(nonce, _)| *nonce)
                    .collect();
                for nonce in stale {
                    state.staged.remove(&nonce);
                    self.staged_order.pop(&(*address, nonce));
                    obsolete = obsolete.saturating_add(1);
                }
            } else if !kept.is_empty() {
                self.senders.insert(
                    *address,
                    SenderState {
                        projected,
                        staged: BTreeMap::new(),
                    },
                );
            }

            if !kept.is_empty() {
                let mut pending = self.pending.write();
                for p in kept {
                    pending.push(p);
                }
            }
        }

        for p in requeue {
            if let Some(state) = self.senders.get(&p.sender) {
                if p.nonce > state.projected.nonce {
                    let sender = p.sender;
                    if !self.stage(sender, p.transaction, p.hash, now) {
                        obsolete = obsolete.saturating_add(1);
                    }
                    continue;
                }
            }
            warn!("dropping pending nonce {} of {} after re-validation", p.nonce, p.sender);
            obsolete = obsolete.saturating_add(1);
        }
        if obsolete > 0 {
            trace!("{obsolete} pool entries made obsolete by block {}", commit.number);
        }

        for address in &affected {
            self.promote_staged(*address);
            self.release_if_idle(address);
        }
    }

    pub(crate) fn staged_len(&self) -> usize {
        self.staged_order.len()
    }
}
