//! Memory pool of transactions awaiting inclusion in a block
//!
//! First-in-first-out is the whole policy: no deduplication, no fee
//! ordering, no expiry.

use std::collections::VecDeque;

use crate::types::Transaction;

#[derive(Debug, Default)]
pub struct MemoryPool {
    queue: VecDeque<Transaction>,
}

impl MemoryPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, tx: Transaction) {
        self.queue.push_back(tx);
    }

    pub fn dequeue(&mut self) -> Option<Transaction> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;

    fn tx(lock_time: u32) -> Transaction {
        Transaction {
            version: 1,
            inputs: TxInputs::Coinbase(CoinbaseInput { coinbase: vec![] }),
            outputs: vec![],
            lock_time,
        }
    }

    #[test]
    fn test_fifo_order() {
        let mut pool = MemoryPool::new();
        pool.enqueue(tx(1));
        pool.enqueue(tx(2));
        pool.enqueue(tx(1));
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.dequeue().map(|t| t.lock_time), Some(1));
        assert_eq!(pool.dequeue().map(|t| t.lock_time), Some(2));
        assert_eq!(pool.dequeue().map(|t| t.lock_time), Some(1));
        assert_eq!(pool.dequeue(), None);
        assert!(pool.is_empty());
    }
}
