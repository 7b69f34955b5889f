// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Mutex;

/// A broadcast channel: every subscriber receives every event published after
/// it subscribed.
///
/// Subscribers that dropped their receiver are pruned on the next publish.
#[derive(Debug)]
pub struct EventBus<T: Clone + Send + 'static> {
    subscribers: Mutex<Vec<flume::Sender<T>>>,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        log::trace!("EventBus initialized.");
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Registers a new subscriber and returns its receiving end.
    pub fn subscribe(&self) -> flume::Receiver<T> {
        let (sender, receiver) = flume::unbounded();
        self.lock().push(sender);
        receiver
    }

    /// Sends `event` to every live subscriber.
    pub fn publish(&self, event: T) {
        let mut subscribers = self.lock();
        if subscribers.is_empty() {
            return;
        }
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
        log::trace!("Published an event to {} subscriber(s).", subscribers.len());
    }

    /// Number of subscribers still attached as of the last publish.
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<flume::Sender<T>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flume::TryRecvError;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum TestEvent {
        Started(u32),
        Stopped,
    }

    #[test]
    fn test_every_subscriber_receives_events() {
        let bus = EventBus::<TestEvent>::new();
        let first = bus.subscribe();
        let second = bus.subscribe();

        bus.publish(TestEvent::Started(1));
        bus.publish(TestEvent::Stopped);

        for receiver in [&first, &second] {
            assert_eq!(receiver.recv_timeout(Duration::from_millis(100)), Ok(TestEvent::Started(1)));
            assert_eq!(receiver.try_recv(), Ok(TestEvent::Stopped));
            assert_eq!(receiver.try_recv(), Err(TryRecvError::Empty));
        }
    }

    #[test]
    fn test_late_subscriber_misses_earlier_events() {
        let bus = EventBus::<TestEvent>::new();
        bus.publish(TestEvent::Started(7));
        let late = bus.subscribe();
        assert_eq!(late.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = EventBus::<TestEvent>::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(TestEvent::Stopped);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.try_recv(), Ok(TestEvent::Stopped));
    }

    #[test]
    fn test_publish_across_threads() {
        let bus = std::sync::Arc::new(EventBus::<TestEvent>::new());
        let receiver = bus.subscribe();
        let publisher = {
            let bus = bus.clone();
            std::thread::spawn(move || {
                for i in 0..10 {
                    bus.publish(TestEvent::Started(i));
                }
            })
        };
        publisher.join().unwrap();
        let received: Vec<_> = receiver.try_iter().collect();
        assert_eq!(received.len(), 10);
        assert_eq!(received[9], TestEvent::Started(9));
    }
}
