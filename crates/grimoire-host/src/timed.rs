use grimoire_events::ObjectGuid;
use std::collections::{BTreeMap, HashMap};

/// Unique identifier for a timed event within one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimedEventId(pub u64);

/// A scheduled callback
#[derive(Debug)]
struct TimedEvent<R> {
    callback: R,
    delay: u64,
    /// Remaining calls, 0 means forever
    repeats: u32,
    deadline: u64,
    aborted: bool,
}

/// An occurrence that is due and must be delivered by the caller
#[derive(Debug, Clone)]
pub struct DueEvent<R> {
    pub id: TimedEventId,
    pub callback: R,
    pub delay: u64,
    /// Remaining calls including this one, 0 for an endless event
    pub calls: u32,
}

/// Ordered queue of timed events for one owner, driven by an external clock
///
/// The sweep is split into [`EventProcessor::advance`] and repeated
/// [`EventProcessor::pop_due`] calls so the caller can run each callback without
/// holding a borrow of the processor. A callback may therefore schedule or cancel
/// events, including its own next occurrence.
#[derive(Debug)]
pub struct EventProcessor<R> {
    time: u64,
    events: HashMap<TimedEventId, TimedEvent<R>>,
    /// (deadline, insertion sequence) -> event
    schedule: BTreeMap<(u64, u64), TimedEventId>,
    seq: u64,
}

impl<R: Clone> EventProcessor<R> {
    pub fn new() -> Self {
        Self {
            time: 0,
            events: HashMap::new(),
            schedule: BTreeMap::new(),
            seq: 0,
        }
    }

    /// Current logical time in milliseconds
    pub fn time(&self) -> u64 {
        self.time
    }

    /// Schedule `callback` to run after `delay` ms, `repeats` times (0 = forever)
    pub fn add(&mut self, id: TimedEventId, callback: R, delay: u64, repeats: u32) {
        let delay = delay.max(1);
        let deadline = self.time + delay;

        self.events.insert(
            id,
            TimedEvent {
                callback,
                delay,
                repeats,
                deadline,
                aborted: false,
            },
        );
        self.enqueue(deadline, id);
    }

    fn enqueue(&mut self, deadline: u64, id: TimedEventId) {
        self.seq += 1;
        self.schedule.insert((deadline, self.seq), id);
    }

    /// Mark an event as aborted; it is reclaimed when the sweep reaches it
    pub fn cancel(&mut self, id: TimedEventId) -> bool {
        match self.events.get_mut(&id) {
            Some(event) if !event.aborted => {
                event.aborted = true;
                true
            }
            _ => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for event in self.events.values_mut() {
            event.aborted = true;
        }
    }

    /// Move the clock forward
    pub fn advance(&mut self, diff: u64) {
        self.time += diff;
    }

    /// Pop the earliest event whose deadline has passed
    ///
    /// Repeating events are rescheduled at `deadline + delay` before they are
    /// returned, so one large advance catches up on every missed occurrence.
    /// Aborted events are reclaimed here and never returned.
    pub fn pop_due(&mut self) -> Option<DueEvent<R>> {
        loop {
            let (&(deadline, seq), &id) = self.schedule.first_key_value()?;
            if deadline > self.time {
                return None;
            }
            self.schedule.remove(&(deadline, seq));

            let Some(event) = self.events.get_mut(&id) else {
                continue;
            };

            if event.aborted {
                self.events.remove(&id);
                continue;
            }

            let calls = event.repeats;
            let delay = event.delay;

            if calls == 1 {
                let event = self.events.remove(&id)?;
                return Some(DueEvent {
                    id,
                    callback: event.callback,
                    delay,
                    calls,
                });
            }

            if calls > 1 {
                event.repeats -= 1;
            }
            event.deadline += delay;
            let next = event.deadline;
            let callback = event.callback.clone();
            self.enqueue(next, id);

            return Some(DueEvent {
                id,
                callback,
                delay,
                calls,
            });
        }
    }

    /// Number of events still held, aborted ones included until reclaimed
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn contains(&self, id: TimedEventId) -> bool {
        self.events.get(&id).is_some_and(|e| !e.aborted)
    }
}

impl<R: Clone> Default for EventProcessor<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// The global processor plus one processor per owning object
#[derive(Debug)]
pub struct TimedEventManager<R> {
    global: EventProcessor<R>,
    owners: HashMap<ObjectGuid, EventProcessor<R>>,
    next_id: u64,
}

impl<R: Clone> TimedEventManager<R> {
    pub fn new() -> Self {
        Self {
            global: EventProcessor::new(),
            owners: HashMap::new(),
            next_id: 0,
        }
    }

    fn processor_mut(&mut self, owner: Option<ObjectGuid>) -> Option<&mut EventProcessor<R>> {
        match owner {
            None => Some(&mut self.global),
            Some(guid) => self.owners.get_mut(&guid),
        }
    }

    pub fn processor(&self, owner: Option<ObjectGuid>) -> Option<&EventProcessor<R>> {
        match owner {
            None => Some(&self.global),
            Some(guid) => self.owners.get(&guid),
        }
    }

    /// Schedule a callback on the global processor or on `owner`'s processor
    pub fn add(
        &mut self,
        owner: Option<ObjectGuid>,
        callback: R,
        delay: u64,
        repeats: u32,
    ) -> TimedEventId {
        self.next_id += 1;
        let id = TimedEventId(self.next_id);

        let processor = match owner {
            None => &mut self.global,
            Some(guid) => self.owners.entry(guid).or_default(),
        };
        processor.add(id, callback, delay, repeats);

        id
    }

    pub fn cancel(&mut self, owner: Option<ObjectGuid>, id: TimedEventId) -> bool {
        self.processor_mut(owner)
            .map(|p| p.cancel(id))
            .unwrap_or(false)
    }

    pub fn cancel_all(&mut self, owner: Option<ObjectGuid>) {
        if let Some(processor) = self.processor_mut(owner) {
            processor.cancel_all();
        }
    }

    /// Abort `id` in whichever processor holds it
    pub fn cancel_everywhere(&mut self, id: TimedEventId) -> bool {
        if self.global.cancel(id) {
            return true;
        }
        self.owners.values_mut().any(|p| p.cancel(id))
    }

    /// Abort every event of every processor
    pub fn cancel_everything(&mut self) {
        self.global.cancel_all();
        for processor in self.owners.values_mut() {
            processor.cancel_all();
        }
    }

    /// Advance the clock of one processor. Returns false if `owner` has none.
    pub fn advance(&mut self, owner: Option<ObjectGuid>, diff: u64) -> bool {
        match self.processor_mut(owner) {
            Some(processor) => {
                processor.advance(diff);
                true
            }
            None => false,
        }
    }

    pub fn pop_due(&mut self, owner: Option<ObjectGuid>) -> Option<DueEvent<R>> {
        self.processor_mut(owner)?.pop_due()
    }

    /// Drop `owner`'s processor once it holds nothing
    pub fn prune(&mut self, owner: ObjectGuid) {
        if self.owners.get(&owner).is_some_and(|p| p.is_empty()) {
            self.owners.remove(&owner);
        }
    }

    /// The owner left the world: drop its processor and every pending event
    pub fn remove_owner(&mut self, owner: ObjectGuid) -> bool {
        self.owners.remove(&owner).is_some()
    }

    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    /// Release every scheduled callback
    pub fn clear(&mut self) {
        self.global = EventProcessor::new();
        self.owners.clear();
    }
}

impl<R: Clone> Default for TimedEventManager<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sweep<R: Clone>(processor: &mut EventProcessor<R>, diff: u64) -> Vec<DueEvent<R>> {
        processor.advance(diff);
        let mut fired = Vec::new();
        while let Some(due) = processor.pop_due() {
            fired.push(due);
        }
        fired
    }

    #[test]
    fn test_one_shot_event() {
        let mut processor = EventProcessor::new();
        processor.add(TimedEventId(1), "once", 50, 1);

        assert!(sweep(&mut processor, 49).is_empty());

        let fired = sweep(&mut processor, 1);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].id, TimedEventId(1));
        assert_eq!(fired[0].calls, 1);
        assert!(processor.is_empty());
    }

    #[test]
    fn test_repeating_event_catches_up() {
        let mut processor = EventProcessor::new();
        processor.add(TimedEventId(1), "twice", 100, 2);

        let fired = sweep(&mut processor, 250);
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0].calls, 2);
        assert_eq!(fired[1].calls, 1);
        assert!(processor.is_empty());

        assert!(sweep(&mut processor, 250).is_empty());
    }

    #[test]
    fn test_endless_event_keeps_firing() {
        let mut processor = EventProcessor::new();
        processor.add(TimedEventId(1), "forever", 10, 0);

        assert_eq!(sweep(&mut processor, 35).len(), 3);
        assert_eq!(sweep(&mut processor, 10).len(), 1);
        assert!(processor.contains(TimedEventId(1)));
    }

    #[test]
    fn test_ties_fire_in_insertion_order() {
        let mut processor = EventProcessor::new();
        processor.add(TimedEventId(1), "a", 10, 1);
        processor.add(TimedEventId(2), "b", 10, 1);
        processor.add(TimedEventId(3), "c", 5, 1);

        let order: Vec<_> = sweep(&mut processor, 10)
            .into_iter()
            .map(|d| d.callback)
            .collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_cancel_is_deferred_until_sweep() {
        let mut processor = EventProcessor::new();
        processor.add(TimedEventId(1), "cb", 100, 0);

        assert!(processor.cancel(TimedEventId(1)));
        assert!(!processor.cancel(TimedEventId(1)));
        assert!(!processor.contains(TimedEventId(1)));
        // Still held until its deadline is reached
        assert_eq!(processor.len(), 1);

        assert!(sweep(&mut processor, 100).is_empty());
        assert!(processor.is_empty());
    }

    #[test]
    fn test_cancel_own_next_occurrence() {
        let mut processor = EventProcessor::new();
        processor.add(TimedEventId(7), "self", 10, 0);

        processor.advance(10);
        let due = processor.pop_due().unwrap();
        // The next occurrence already exists and can be cancelled from the callback
        assert!(processor.cancel(due.id));
        assert!(processor.pop_due().is_none());

        assert!(sweep(&mut processor, 100).is_empty());
        assert!(processor.is_empty());
    }

    #[test]
    fn test_zero_delay_is_clamped() {
        let mut processor = EventProcessor::new();
        processor.add(TimedEventId(1), "cb", 0, 0);
        assert!(sweep(&mut processor, 0).is_empty());
        assert_eq!(sweep(&mut processor, 1).len(), 1);
    }

    #[test]
    fn test_manager_owner_lifecycle() {
        let mut manager = TimedEventManager::new();
        let owner = ObjectGuid(42);

        let global = manager.add(None, "global", 10, 1);
        let owned = manager.add(Some(owner), "owned", 10, 1);
        assert_ne!(global, owned);
        assert_eq!(manager.owner_count(), 1);

        assert!(manager.advance(Some(owner), 10));
        assert_eq!(manager.pop_due(Some(owner)).unwrap().callback, "owned");
        manager.prune(owner);
        assert_eq!(manager.owner_count(), 0);
        assert!(!manager.advance(Some(owner), 10));

        manager.add(Some(owner), "again", 10, 0);
        assert!(manager.remove_owner(owner));
        assert!(manager.pop_due(Some(owner)).is_none());

        manager.advance(None, 10);
        assert_eq!(manager.pop_due(None).unwrap().id, global);
    }
}
