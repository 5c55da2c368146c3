//! Bounded queue of signals waiting for the current transition to settle.

use std::collections::VecDeque;

use tracing::{trace, warn};

use crate::signal::{LifecycleSignal, SignalClass};

/// Eviction order when full: lower ranks go first.
///
/// Intent changes rank highest and are only dropped when a later intent
/// change overrides them.
const fn rank(signal: &LifecycleSignal) -> u8 {
    match signal.class() {
        SignalClass::SoftSuspend
        | SignalClass::SoftResume
        | SignalClass::Unload
        | SignalClass::Load => 0,
        SignalClass::Freeze | SignalClass::Resume => 1,
        SignalClass::Online | SignalClass::Offline => 2,
    }
}

const fn changes_intent(signal: &LifecycleSignal) -> bool {
    matches!(signal.class(), SignalClass::Online | SignalClass::Offline)
}

/// FIFO of pending signals.
///
/// A signal of the same class as the queue tail replaces it (most recent
/// wins). When full, the oldest lowest-ranked entry makes room, or the
/// incoming signal is dropped if everything queued outranks it. The last
/// pending `Online`/`Offline` is never dropped.
#[derive(Debug)]
pub(crate) struct Backlog {
    queue: VecDeque<LifecycleSignal>,
    capacity: usize,
}

impl Backlog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn push(&mut self, signal: LifecycleSignal) {
        if let Some(tail) = self.queue.back_mut()
            && tail.class() == signal.class()
        {
            trace!(replaced = tail.name(), by = signal.name(), "Backlog tail coalesced");
            *tail = signal;
            return;
        }

        if self.queue.len() >= self.capacity && !self.make_room(&signal) {
            warn!(
                dropped = signal.name(),
                capacity = self.capacity,
                "Signal backlog full, dropping incoming"
            );
            return;
        }

        self.queue.push_back(signal);
    }

    /// Evicts one queued entry for `incoming`. `false` if none may go.
    fn make_room(&mut self, incoming: &LifecycleSignal) -> bool {
        let victim = match self.lowest_non_intent() {
            Some(index) if changes_intent(incoming) || rank(&self.queue[index]) <= rank(incoming) => {
                Some(index)
            }
            Some(_) => None,
            // Only intent changes queued; the oldest is overridden by a later one.
            None => (changes_intent(incoming) || self.queue.len() > 1).then_some(0),
        };

        let Some(dropped) = victim.and_then(|index| self.queue.remove(index)) else {
            return false;
        };
        warn!(
            dropped = dropped.name(),
            incoming = incoming.name(),
            capacity = self.capacity,
            "Signal backlog full, dropping queued signal"
        );
        true
    }

    /// Oldest entry of the lowest rank, ignoring intent changes.
    fn lowest_non_intent(&self) -> Option<usize> {
        self.queue
            .iter()
            .enumerate()
            .filter(|(_, signal)| !changes_intent(signal))
            .min_by_key(|&(index, signal)| (rank(signal), index))
            .map(|(index, _)| index)
    }

    pub(crate) fn pop(&mut self) -> Option<LifecycleSignal> {
        self.queue.pop_front()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}
