//! Gossip of newly pending transactions.

use {
    crate::{channel_manager::ChannelManager, message::Message},
    log::trace,
    std::sync::Arc,
    tessera_ledger_api::Transaction,
    tessera_pending_pool::TransactionRelay,
};

/// Sends each transaction the pool promotes to a few random active peers.
pub struct Relay {
    channel_manager: Arc<ChannelManager>,
    redundancy: usize,
}

impl Relay {
    pub fn new(channel_manager: Arc<ChannelManager>, redundancy: usize) -> Self {
        Self {
            channel_manager,
            redundancy,
        }
    }
}

impl TransactionRelay for Relay {
    fn relay(&self, tx: &Transaction) {
        let targets = self.channel_manager.sample_active(self.redundancy);
        trace!("relaying {} to {} peers", tx.hash(), targets.len());
        for channel in targets {
            let _ = channel.send(Message::Transaction(tx.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            channel::tests::{test_channel, test_peer},
            ip_filter::IpFilter,
        },
        tessera_ledger_api::{Key, MemoryLedger, Network, TransactionType},
    };

    #[tokio::test]
    async fn test_relay_is_bounded_by_redundancy() {
        let cm = Arc::new(ChannelManager::new(
            "00".repeat(20),
            Network::Devnet,
            IpFilter::default(),
            Arc::new(MemoryLedger::new()),
        ));
        let mut queues = Vec::new();
        for i in 1..=5u8 {
            let (ch, rx) = test_channel(u64::from(i), &format!("10.0.0.{i}:4000"), 4);
            cm.add(ch.clone());
            cm.activate(&ch, test_peer(&format!("{i:02x}").repeat(20), "10.0.0.1")).unwrap();
            queues.push((ch, rx));
        }

        let key = Key::from_seed(&[4u8; 32]).unwrap();
        let tx = Transaction::new_signed(
            &key,
            Network::Devnet,
            TransactionType::Transfer,
            key.address(),
            1,
            1,
            0,
            0,
            Vec::new(),
        );
        Relay::new(cm, 3).relay(&tx);

        let sent = queues.iter().filter(|(ch, _)| !ch.is_idle()).count();
        assert_eq!(sent, 3);
    }
}
