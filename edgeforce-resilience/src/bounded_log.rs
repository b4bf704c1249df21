use std::collections::VecDeque;

use tokio::sync::Mutex;

/// Fixed-capacity FIFO log: oldest entries are dropped once `capacity` is
/// reached. Used for CAN message history and similar bounded event trails
/// where unbounded growth would eventually exhaust memory on a
/// long-running gateway process.
pub struct BoundedLog<T> {
    capacity: usize,
    entries: Mutex<VecDeque<T>>,
}

impl<T: Clone> BoundedLog<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub async fn push(&self, item: T) {
        let mut entries = self.entries.lock().await;
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(item);
    }

    pub async fn snapshot(&self) -> Vec<T> {
        self.entries.lock().await.iter().cloned().collect()
    }

    pub async fn recent(&self, n: usize) -> Vec<T> {
        let entries = self.entries.lock().await;
        entries.iter().rev().take(n).cloned().collect::<Vec<_>>().into_iter().rev().collect()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn drops_oldest_on_overflow() {
        let log: BoundedLog<u32> = BoundedLog::new(3);
        for i in 0..5 {
            log.push(i).await;
        }
        assert_eq!(log.snapshot().await, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn recent_returns_last_n_in_order() {
        let log: BoundedLog<u32> = BoundedLog::new(10);
        for i in 0..5 {
            log.push(i).await;
        }
        assert_eq!(log.recent(2).await, vec![3, 4]);
    }
}
