//! Observer bundles.
//!
//! Every graph entity owns a [`FlowSet`]: named slots that exist only while at
//! least one [`Subscription`] is attached. A slot carries a `watch` channel
//! whose value is a change counter, so a burst of invalidations reaches a slow
//! observer as a single wake-up and the observer always reads the latest
//! entity state.

use std::collections::HashMap;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};

use crate::note::Note;

/// Named flow slots shared by notes, users and channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKind {
    Metadata,
    Author,
    Replies,
    Reactions,
    Boosts,
    Zaps,
    Reports,
    Relays,
    Edits,
    Follows,
    Statuses,
    Info,
    Notes,
}

struct FlowSlot {
    observers: usize,
    tx: watch::Sender<u64>,
}

type Slots = Arc<Mutex<HashMap<FlowKind, FlowSlot>>>;

#[derive(Default)]
pub struct FlowSet {
    slots: Slots,
}

impl FlowSet {
    /// Attach an observer to `kind`, materializing the slot if needed.
    pub fn attach(&self, kind: FlowKind) -> Subscription {
        let mut slots = self.slots.lock();
        let slot = slots.entry(kind).or_insert_with(|| FlowSlot {
            observers: 0,
            tx: watch::channel(0).0,
        });
        slot.observers += 1;
        Subscription {
            kind,
            rx: slot.tx.subscribe(),
            slots: Arc::clone(&self.slots),
        }
    }

    /// Bump the slot's counter. No-op when nobody observes `kind`.
    pub fn invalidate(&self, kind: FlowKind) {
        let slots = self.slots.lock();
        if let Some(slot) = slots.get(&kind) {
            slot.tx.send_modify(|v| *v = v.wrapping_add(1));
        }
    }

    pub fn invalidate_all(&self) {
        let slots = self.slots.lock();
        for slot in slots.values() {
            slot.tx.send_modify(|v| *v = v.wrapping_add(1));
        }
    }

    pub fn is_in_use(&self) -> bool {
        !self.slots.lock().is_empty()
    }

    pub fn observers(&self, kind: FlowKind) -> usize {
        self.slots.lock().get(&kind).map_or(0, |s| s.observers)
    }

    /// Run `f` only if no observer is attached, holding the slot lock so no
    /// observer can attach while `f` runs.
    pub fn with_idle<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let slots = self.slots.lock();
        if !slots.is_empty() {
            return None;
        }
        let out = f();
        drop(slots);
        Some(out)
    }
}

/// RAII observer handle. Dropping the last one for a slot destroys the slot.
pub struct Subscription {
    kind: FlowKind,
    rx: watch::Receiver<u64>,
    slots: Slots,
}

impl Subscription {
    pub fn kind(&self) -> FlowKind {
        self.kind
    }

    /// Counter value last published for this slot.
    pub fn version(&self) -> u64 {
        *self.rx.borrow()
    }

    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Wait for the next invalidation. Returns `false` if the slot is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Mark the current value as seen.
    pub fn mark_seen(&mut self) -> u64 {
        *self.rx.borrow_and_update()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        let empty = match slots.get_mut(&self.kind) {
            Some(slot) => {
                slot.observers = slot.observers.saturating_sub(1);
                slot.observers == 0
            }
            None => false,
        };
        if empty {
            slots.remove(&self.kind);
        }
    }
}

/// Collects items and publishes them as one batch after `delay`.
///
/// Outside a tokio runtime there is nothing to run the timer on, so every push
/// is published immediately.
pub struct Bundler<T> {
    delay: Duration,
    pending: Mutex<Vec<T>>,
    scheduled: AtomicBool,
    tx: broadcast::Sender<Arc<Vec<T>>>,
}

impl<T: Send + Sync + 'static> Bundler<T> {
    pub fn new(delay: Duration) -> Arc<Self> {
        let (tx, _) = broadcast::channel(64);
        Arc::new(Self {
            delay,
            pending: Mutex::new(Vec::new()),
            scheduled: AtomicBool::new(false),
            tx,
        })
    }

    pub fn push(self: &Arc<Self>, item: T) {
        self.pending.lock().push(item);
        if self.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        match Handle::try_current() {
            Ok(handle) => {
                let this = Arc::clone(self);
                handle.spawn(async move {
                    tokio::time::sleep(this.delay).await;
                    this.flush();
                });
            }
            Err(_) => {
                self.flush();
            }
        }
    }

    /// Publish everything pending now. Returns the batch size.
    pub fn flush(&self) -> usize {
        self.scheduled.store(false, Ordering::Release);
        let batch = mem::take(&mut *self.pending.lock());
        let n = batch.len();
        if n > 0 {
            // No receivers is fine: nobody is listening for this batch.
            let _ = self.tx.send(Arc::new(batch));
        }
        n
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Vec<T>>> {
        self.tx.subscribe()
    }
}

/// Store-wide feeds of notes added to and removed from the graph.
pub struct LiveEvents {
    new_notes: Arc<Bundler<Arc<Note>>>,
    deleted_notes: Arc<Bundler<Arc<Note>>>,
}

impl LiveEvents {
    pub fn new(delay: Duration) -> Self {
        Self {
            new_notes: Bundler::new(delay),
            deleted_notes: Bundler::new(delay),
        }
    }

    pub fn new_note(&self, note: &Arc<Note>) {
        self.new_notes.push(Arc::clone(note));
    }

    pub fn deleted_note(&self, note: &Arc<Note>) {
        self.deleted_notes.push(Arc::clone(note));
    }

    pub fn subscribe_new(&self) -> broadcast::Receiver<Arc<Vec<Arc<Note>>>> {
        self.new_notes.subscribe()
    }

    pub fn subscribe_deleted(&self) -> broadcast::Receiver<Arc<Vec<Arc<Note>>>> {
        self.deleted_notes.subscribe()
    }

    /// Publish both pending batches immediately.
    pub fn flush(&self) {
        self.new_notes.flush();
        self.deleted_notes.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_lives_while_observed() {
        let flows = FlowSet::default();
        assert!(!flows.is_in_use());
        let a = flows.attach(FlowKind::Replies);
        let b = flows.attach(FlowKind::Replies);
        assert_eq!(flows.observers(FlowKind::Replies), 2);
        drop(a);
        assert!(flows.is_in_use());
        drop(b);
        assert!(!flows.is_in_use());
        assert_eq!(flows.observers(FlowKind::Replies), 0);
    }

    #[test]
    fn invalidations_coalesce_to_latest() {
        let flows = FlowSet::default();
        let mut sub = flows.attach(FlowKind::Reactions);
        for _ in 0..10 {
            flows.invalidate(FlowKind::Reactions);
        }
        flows.invalidate(FlowKind::Zaps);
        assert!(sub.has_changed());
        assert_eq!(sub.mark_seen(), 10);
        assert!(!sub.has_changed());
    }

    #[test]
    fn with_idle_refuses_observed_sets() {
        let flows = FlowSet::default();
        assert_eq!(flows.with_idle(|| 1), Some(1));
        let _sub = flows.attach(FlowKind::Metadata);
        assert_eq!(flows.with_idle(|| 1), None);
    }

    #[test]
    fn bundler_without_runtime_publishes_immediately() {
        let bundler: Arc<Bundler<u32>> = Bundler::new(Duration::from_millis(500));
        let mut rx = bundler.subscribe();
        bundler.push(1);
        assert_eq!(bundler.pending(), 0);
        assert_eq!(*rx.try_recv().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn bundler_debounces_bursts() {
        let bundler: Arc<Bundler<u32>> = Bundler::new(Duration::from_millis(30));
        let mut rx = bundler.subscribe();
        for i in 0..5 {
            bundler.push(i);
        }
        assert_eq!(bundler.pending(), 5);
        let batch = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*batch, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn subscription_wakes_on_change() {
        let flows = Arc::new(FlowSet::default());
        let mut sub = flows.attach(FlowKind::Replies);
        let writer = Arc::clone(&flows);
        tokio::spawn(async move { writer.invalidate(FlowKind::Replies) });
        assert!(sub.changed().await);
        assert_eq!(sub.version(), 1);
    }
}
