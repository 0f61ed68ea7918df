use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

/// Fan-out channel with a bounded drop-oldest buffer per subscriber.
pub struct Broadcast<T> {
    capacity: usize,
    slots: Mutex<Vec<Slot<T>>>,
    evicted: AtomicU64,
}

struct Slot<T> {
    sender: Sender<T>,
    /// Publisher-side handle on the same queue, used to evict the oldest item.
    evictor: Receiver<T>,
    alive: Weak<()>,
}

/// Receiving end of a [`Broadcast`]. Dropping it unsubscribes.
pub struct Subscription<T> {
    receiver: Receiver<T>,
    _alive: Arc<()>,
}

impl<T> Subscription<T> {
    pub fn receiver(&self) -> &Receiver<T> {
        &self.receiver
    }
}

impl<T> Deref for Subscription<T> {
    type Target = Receiver<T>;

    fn deref(&self) -> &Receiver<T> {
        &self.receiver
    }
}

impl<T: Clone> Broadcast<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            slots: Mutex::new(Vec::new()),
            evicted: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> Result<Subscription<T>> {
        let (sender, receiver) = bounded(self.capacity);
        let alive = Arc::new(());
        let mut slots = self.lock()?;
        slots.push(Slot {
            sender,
            evictor: receiver.clone(),
            alive: Arc::downgrade(&alive),
        });
        Ok(Subscription {
            receiver,
            _alive: alive,
        })
    }

    pub fn has_subscribers(&self) -> Result<bool> {
        let mut slots = self.lock()?;
        prune(&mut slots);
        Ok(!slots.is_empty())
    }

    pub fn subscriber_count(&self) -> Result<usize> {
        let mut slots = self.lock()?;
        prune(&mut slots);
        Ok(slots.len())
    }

    /// Deliver `item` to every live subscriber, evicting the oldest buffered item where full.
    pub fn send(&self, item: T) -> Result<()> {
        let mut slots = self.lock()?;
        prune(&mut slots);
        for slot in slots.iter() {
            let mut pending = item.clone();
            loop {
                match slot.sender.try_send(pending) {
                    Ok(()) => break,
                    Err(TrySendError::Full(back)) => {
                        if slot.evictor.try_recv().is_ok() {
                            self.evicted.fetch_add(1, Ordering::Relaxed);
                        }
                        pending = back;
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
        }
        Ok(())
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Slot<T>>>> {
        self.slots
            .lock()
            .map_err(|_| anyhow!("broadcast lock poisoned"))
    }
}

fn prune<T>(slots: &mut Vec<Slot<T>>) {
    slots.retain(|slot| slot.alive.strong_count() > 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_buffer_drops_oldest() {
        let broadcast = Broadcast::new(2);
        let sub = broadcast.subscribe().unwrap();

        for i in 0..5 {
            broadcast.send(i).unwrap();
        }

        assert_eq!(sub.try_recv().unwrap(), 3);
        assert_eq!(sub.try_recv().unwrap(), 4);
        assert!(sub.try_recv().is_err());
        assert_eq!(broadcast.evicted(), 3);
    }

    #[test]
    fn slow_subscriber_does_not_affect_fast_one() {
        let broadcast = Broadcast::new(1);
        let slow = broadcast.subscribe().unwrap();
        let fast = broadcast.subscribe().unwrap();

        for i in 0..3 {
            broadcast.send(i).unwrap();
            assert_eq!(fast.try_recv().unwrap(), i);
        }
        assert_eq!(slow.try_recv().unwrap(), 2);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let broadcast: Broadcast<u8> = Broadcast::new(4);
        let keep = broadcast.subscribe().unwrap();
        let gone = broadcast.subscribe().unwrap();
        assert_eq!(broadcast.subscriber_count().unwrap(), 2);

        drop(gone);
        broadcast.send(1).unwrap();
        assert_eq!(broadcast.subscriber_count().unwrap(), 1);
        assert_eq!(keep.recv().unwrap(), 1);
    }
}
