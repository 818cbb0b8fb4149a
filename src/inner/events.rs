use kanal::{AsyncReceiver, AsyncSender};
use tokio::sync::Mutex;
use tracing::trace;

/// Delivers every sent value to every live subscriber, in send order.
pub struct FanOutSender<T> {
    senders: Mutex<Vec<AsyncSender<T>>>,
}

impl<T> Default for FanOutSender<T> {
    fn default() -> Self {
        Self {
            senders: Mutex::new(vec![]),
        }
    }
}

impl<T: Clone> FanOutSender<T> {
    pub async fn subscribe(&self) -> AsyncReceiver<T> {
        let (sender, receiver) = kanal::unbounded_async();
        self.senders.lock().await.push(sender);
        receiver
    }

    /// Holds the subscriber list for the whole delivery, so concurrent sends never interleave.
    pub async fn send(&self, value: T) {
        let mut senders = self.senders.lock().await;
        let mut closed = vec![];
        for (index, sender) in senders.iter().enumerate() {
            if sender.send(value.clone()).await.is_err() {
                closed.push(index);
            }
        }
        for index in closed.into_iter().rev() {
            trace!(index, "Pruning closed subscriber");
            senders.swap_remove(index);
        }
    }

    #[cfg(test)]
    async fn subscriber_count(&self) -> usize {
        self.senders.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_all_and_prunes_closed() {
        let fanout = FanOutSender::<u32>::default();
        let first = fanout.subscribe().await;
        let second = fanout.subscribe().await;

        fanout.send(1).await;
        fanout.send(2).await;
        assert_eq!(first.recv().await.unwrap(), 1);
        assert_eq!(first.recv().await.unwrap(), 2);
        assert_eq!(second.recv().await.unwrap(), 1);

        drop(second);
        fanout.send(3).await;
        assert_eq!(fanout.subscriber_count().await, 1);
        assert_eq!(first.recv().await.unwrap(), 3);
    }
}
