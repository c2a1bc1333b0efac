//! Task Queue - scheduled agent cycles
//!
//! Two stages:
//! - `waiting`: a heap ordered by eligible time, for cycles whose interval
//!   has not elapsed yet
//! - `ready`: cycles that may run now, picked by (effective priority,
//!   eligible time, sequence) whenever a resource slot is free
//!
//! Every agent owns at most one slot. A slot's generation changes whenever it
//! is re-queued, so heap entries and completions from a superseded schedule
//! are recognised as stale and ignored.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::agent::{Agent, CyclePriority};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Queued,
    InFlight,
}

struct Slot {
    agent: Arc<Agent>,
    generation: u64,
    state: SlotState,
    eligible_at: Instant,
}

/// Heap entry; earliest eligible time first, FIFO on ties
#[derive(Debug, PartialEq, Eq)]
struct WaitingEntry {
    agent_id: String,
    eligible_at: Instant,
    sequence: u64,
    generation: u64,
}

impl PartialOrd for WaitingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WaitingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: reverse so the earliest pops first
        match other.eligible_at.cmp(&self.eligible_at) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            ord => ord,
        }
    }
}

#[derive(Debug, Clone)]
struct ReadyEntry {
    agent_id: String,
    eligible_at: Instant,
    sequence: u64,
    generation: u64,
}

/// A cycle taken off the queue for dispatch
pub struct Ticket {
    pub agent: Arc<Agent>,
    pub generation: u64,
    pub eligible_at: Instant,
    /// Priority after aging, at the time it was picked
    pub priority: CyclePriority,
    sequence: u64,
}

impl Ticket {
    pub fn agent_id(&self) -> &str {
        self.agent.id()
    }

    /// Time spent ready but not dispatched
    pub fn waited(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.eligible_at)
    }
}

/// `at + delay`, clamped instead of overflowing the clock
pub(crate) fn deadline_after(at: Instant, delay: Duration) -> Instant {
    const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 3600);
    at.checked_add(delay)
        .or_else(|| at.checked_add(FAR_FUTURE))
        .unwrap_or(at)
}

/// What happened to a slot when its cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Rescheduled(Instant),
    Dropped,
    /// The slot was cancelled or re-queued while the cycle ran
    Stale,
}

pub struct TaskQueue {
    waiting: BinaryHeap<WaitingEntry>,
    ready: Vec<ReadyEntry>,
    slots: HashMap<String, Slot>,
    starvation_threshold: Duration,
    sequence_counter: u64,
    generation_counter: u64,
    enqueued_count: u64,
    cancelled_count: u64,
}

impl TaskQueue {
    /// `starvation_threshold` of zero disables aging
    pub fn new(starvation_threshold: Duration) -> Self {
        Self {
            waiting: BinaryHeap::new(),
            ready: Vec::new(),
            slots: HashMap::new(),
            starvation_threshold,
            sequence_counter: 0,
            generation_counter: 0,
            enqueued_count: 0,
            cancelled_count: 0,
        }
    }

    /// Queue a cycle for `agent`, eligible at `eligible_at`.
    ///
    /// Returns false if the agent already has a slot. A queued slot is pulled
    /// forward when the new time is earlier; an in-flight one is left alone
    /// and gets rescheduled when its cycle completes.
    pub fn schedule(&mut self, agent: Arc<Agent>, eligible_at: Instant) -> bool {
        let agent_id = agent.id().to_string();

        if let Some(slot) = self.slots.get(&agent_id) {
            if slot.state == SlotState::Queued && eligible_at < slot.eligible_at {
                self.ready.retain(|e| e.agent_id != agent_id);
                self.requeue(&agent_id, eligible_at);
            }
            return false;
        }

        let generation = self.next_generation();
        self.slots.insert(
            agent_id.clone(),
            Slot {
                agent,
                generation,
                state: SlotState::Queued,
                eligible_at,
            },
        );
        self.push_waiting(agent_id, eligible_at, generation);
        self.enqueued_count += 1;
        true
    }

    /// Move every cycle whose eligible time has passed into the ready set
    pub fn promote_due(&mut self, now: Instant) {
        while let Some(top) = self.waiting.peek() {
            if top.eligible_at > now {
                break;
            }
            let Some(entry) = self.waiting.pop() else {
                break;
            };
            if !self.is_current(&entry.agent_id, entry.generation, SlotState::Queued) {
                continue;
            }
            self.ready.push(ReadyEntry {
                agent_id: entry.agent_id,
                eligible_at: entry.eligible_at,
                sequence: entry.sequence,
                generation: entry.generation,
            });
        }
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Take the best ready cycle and mark its slot in flight
    pub fn pop_ready(&mut self, now: Instant) -> Option<Ticket> {
        let (index, priority) = self
            .ready
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| {
                let slot = self.slots.get(&entry.agent_id)?;
                let priority = self.effective_priority(slot.agent.priority(), entry.eligible_at, now);
                Some((i, priority, entry.eligible_at, entry.sequence))
            })
            .min_by(|a, b| (a.1, a.2, a.3).cmp(&(b.1, b.2, b.3)))
            .map(|(i, priority, _, _)| (i, priority))?;

        let entry = self.ready.swap_remove(index);
        let slot = self.slots.get_mut(&entry.agent_id)?;
        slot.state = SlotState::InFlight;

        Some(Ticket {
            agent: slot.agent.clone(),
            generation: entry.generation,
            eligible_at: entry.eligible_at,
            priority,
            sequence: entry.sequence,
        })
    }

    /// Put back a ticket that could not be dispatched after all
    pub fn restore(&mut self, ticket: Ticket) {
        if !self.is_current(ticket.agent_id(), ticket.generation, SlotState::InFlight) {
            return;
        }
        if let Some(slot) = self.slots.get_mut(ticket.agent_id()) {
            slot.state = SlotState::Queued;
        }
        self.ready.push(ReadyEntry {
            agent_id: ticket.agent_id().to_string(),
            eligible_at: ticket.eligible_at,
            sequence: ticket.sequence,
            generation: ticket.generation,
        });
    }

    /// Take ready cycles that have waited at least `limit` for a slot
    pub fn take_overdue(&mut self, now: Instant, limit: Duration) -> Vec<Ticket> {
        let mut overdue = Vec::new();
        let mut i = 0;
        while i < self.ready.len() {
            if now.saturating_duration_since(self.ready[i].eligible_at) < limit {
                i += 1;
                continue;
            }
            let entry = self.ready.swap_remove(i);
            if let Some(slot) = self.slots.get_mut(&entry.agent_id) {
                slot.state = SlotState::InFlight;
                overdue.push(Ticket {
                    agent: slot.agent.clone(),
                    generation: entry.generation,
                    eligible_at: entry.eligible_at,
                    priority: slot.agent.priority(),
                    sequence: entry.sequence,
                });
            }
        }
        overdue
    }

    /// Settle an in-flight slot: requeue at `next`, or drop it when `None`
    pub fn complete(&mut self, agent_id: &str, generation: u64, next: Option<Instant>) -> Completion {
        if !self.is_current(agent_id, generation, SlotState::InFlight) {
            return Completion::Stale;
        }
        match next {
            Some(at) => {
                self.requeue(agent_id, at);
                Completion::Rescheduled(at)
            }
            None => {
                self.slots.remove(agent_id);
                Completion::Dropped
            }
        }
    }

    /// Forget an agent's slot; an in-flight cycle finishes but is not rescheduled
    pub fn cancel(&mut self, agent_id: &str) -> bool {
        if self.slots.remove(agent_id).is_none() {
            return false;
        }
        self.ready.retain(|e| e.agent_id != agent_id);
        self.waiting.retain(|e| e.agent_id != agent_id);
        self.cancelled_count += 1;
        debug!(agent_id, "scheduled cycle cancelled");
        true
    }

    /// Drop every slot; returns how many there were
    pub fn clear(&mut self) -> usize {
        let cleared = self.slots.len();
        self.slots.clear();
        self.ready.clear();
        self.waiting.clear();
        self.cancelled_count += cleared as u64;
        cleared
    }

    /// When the dispatcher next has something time-driven to do
    pub fn next_wake(&mut self, lease_timeout: Option<Duration>) -> Option<Instant> {
        // discard stale heads so they don't cause spurious wakeups
        while let Some(top) = self.waiting.peek() {
            if self.is_current(&top.agent_id, top.generation, SlotState::Queued) {
                break;
            }
            self.waiting.pop();
        }

        let next_eligible = self.waiting.peek().map(|e| e.eligible_at);
        let next_overdue = lease_timeout.and_then(|limit| {
            self.ready
                .iter()
                .map(|e| deadline_after(e.eligible_at, limit))
                .min()
        });

        match (next_eligible, next_overdue) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn is_scheduled(&self, agent_id: &str) -> bool {
        self.slots.contains_key(agent_id)
    }

    pub fn scheduled_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.slots.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        let mut priority_counts = [0usize; 3];
        let mut in_flight = 0;
        for slot in self.slots.values() {
            if slot.state == SlotState::InFlight {
                in_flight += 1;
            } else {
                priority_counts[slot.agent.priority() as usize] += 1;
            }
        }

        QueueStats {
            queued: self.slots.len() - in_flight,
            ready: self.ready.len(),
            in_flight,
            enqueued_total: self.enqueued_count,
            cancelled_total: self.cancelled_count,
            high_count: priority_counts[0],
            normal_count: priority_counts[1],
            low_count: priority_counts[2],
        }
    }

    fn effective_priority(&self, base: CyclePriority, eligible_at: Instant, now: Instant) -> CyclePriority {
        let threshold = self.starvation_threshold.as_millis();
        if threshold == 0 {
            return base;
        }
        let waited = now.saturating_duration_since(eligible_at).as_millis();
        let steps = u32::try_from(waited / threshold).unwrap_or(u32::MAX);
        base.promoted(steps)
    }

    fn requeue(&mut self, agent_id: &str, eligible_at: Instant) {
        let generation = self.next_generation();
        if let Some(slot) = self.slots.get_mut(agent_id) {
            slot.generation = generation;
            slot.state = SlotState::Queued;
            slot.eligible_at = eligible_at;
        }
        self.push_waiting(agent_id.to_string(), eligible_at, generation);
    }

    fn push_waiting(&mut self, agent_id: String, eligible_at: Instant, generation: u64) {
        let sequence = self.sequence_counter;
        self.sequence_counter += 1;
        self.waiting.push(WaitingEntry {
            agent_id,
            eligible_at,
            sequence,
            generation,
        });
    }

    fn next_generation(&mut self) -> u64 {
        self.generation_counter += 1;
        self.generation_counter
    }

    fn is_current(&self, agent_id: &str, generation: u64, state: SlotState) -> bool {
        self.slots
            .get(agent_id)
            .map_or(false, |s| s.generation == generation && s.state == state)
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: usize,
    pub ready: usize,
    pub in_flight: usize,
    pub enqueued_total: u64,
    pub cancelled_total: u64,
    pub high_count: usize,
    pub normal_count: usize,
    pub low_count: usize,
}

impl std::fmt::Display for QueueStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Queue[queued={}, ready={}, in_flight={}, enq={}, cancelled={}, H={}/N={}/L={}]",
            self.queued,
            self.ready,
            self.in_flight,
            self.enqueued_total,
            self.cancelled_total,
            self.high_count,
            self.normal_count,
            self.low_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentConfig, AgentType, CycleContext, Strategy};
    use crate::error::Result;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Idle;

    #[async_trait]
    impl Strategy for Idle {
        async fn initialize(&mut self, _config: &AgentConfig) -> Result<()> {
            Ok(())
        }

        async fn run_cycle(&mut self, _ctx: &CycleContext<'_>) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    async fn agent(id: &str, priority: &str) -> Arc<Agent> {
        let config = AgentConfig::from_value(json!({"priority": priority})).unwrap();
        Arc::new(
            Agent::create(id, AgentType::Custom("idle".into()), config, Box::new(Idle), 10)
                .await
                .unwrap(),
        )
    }

    fn ago(now: Instant, secs: u64) -> Instant {
        now.checked_sub(Duration::from_secs(secs)).unwrap_or(now)
    }

    #[tokio::test]
    async fn test_priority_ordering_among_ready() {
        let mut queue = TaskQueue::new(Duration::from_secs(30));
        let now = Instant::now();

        queue.schedule(agent("normal", "normal").await, now);
        queue.schedule(agent("low", "low").await, now);
        queue.schedule(agent("high", "high").await, now);
        queue.promote_due(now);

        assert_eq!(queue.pop_ready(now).unwrap().agent_id(), "high");
        assert_eq!(queue.pop_ready(now).unwrap().agent_id(), "normal");
        assert_eq!(queue.pop_ready(now).unwrap().agent_id(), "low");
        assert!(queue.pop_ready(now).is_none());
    }

    #[tokio::test]
    async fn test_fifo_same_priority() {
        let mut queue = TaskQueue::new(Duration::from_secs(30));
        let now = Instant::now();

        queue.schedule(agent("first", "normal").await, now);
        queue.schedule(agent("second", "normal").await, now);
        queue.schedule(agent("third", "normal").await, now);
        queue.promote_due(now);

        assert_eq!(queue.pop_ready(now).unwrap().agent_id(), "first");
        assert_eq!(queue.pop_ready(now).unwrap().agent_id(), "second");
        assert_eq!(queue.pop_ready(now).unwrap().agent_id(), "third");
    }

    #[tokio::test]
    async fn test_not_ready_until_eligible() {
        let mut queue = TaskQueue::new(Duration::from_secs(30));
        let now = Instant::now();
        let later = now + Duration::from_secs(5);

        queue.schedule(agent("a1", "high").await, later);
        queue.promote_due(now);
        assert!(!queue.has_ready());
        assert_eq!(queue.next_wake(None), Some(later));

        queue.promote_due(later);
        assert!(queue.has_ready());
    }

    #[tokio::test]
    async fn test_aging_promotes_starved_task() {
        let mut queue = TaskQueue::new(Duration::from_secs(30));
        let now = Instant::now();

        // low has been ready for 70s: promoted two classes, ties with high
        // and wins on earlier eligible time
        queue.schedule(agent("starved", "low").await, ago(now, 70));
        queue.schedule(agent("fresh", "high").await, now);
        queue.promote_due(now);

        let ticket = queue.pop_ready(now).unwrap();
        assert_eq!(ticket.agent_id(), "starved");
        assert_eq!(ticket.priority, CyclePriority::High);
    }

    #[tokio::test]
    async fn test_one_slot_per_agent() {
        let mut queue = TaskQueue::new(Duration::from_secs(30));
        let now = Instant::now();
        let a1 = agent("a1", "normal").await;

        assert!(queue.schedule(a1.clone(), now + Duration::from_secs(10)));
        assert!(!queue.schedule(a1.clone(), now));
        assert_eq!(queue.len(), 1);

        // pulled forward: ready now, exactly once
        queue.promote_due(now);
        let ticket = queue.pop_ready(now).unwrap();
        assert!(queue.pop_ready(now).is_none());

        // in flight: no second slot
        assert!(!queue.schedule(a1, now));
        assert_eq!(
            queue.complete("a1", ticket.generation, Some(now + Duration::from_secs(1))),
            Completion::Rescheduled(now + Duration::from_secs(1))
        );
        assert_eq!(queue.stats().queued, 1);
    }

    #[tokio::test]
    async fn test_cancel_makes_completion_stale() {
        let mut queue = TaskQueue::new(Duration::from_secs(30));
        let now = Instant::now();
        queue.schedule(agent("a1", "normal").await, now);
        queue.promote_due(now);
        let ticket = queue.pop_ready(now).unwrap();

        assert!(queue.cancel("a1"));
        assert!(!queue.is_scheduled("a1"));
        assert_eq!(
            queue.complete("a1", ticket.generation, Some(now)),
            Completion::Stale
        );
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_purges_waiting_entries() {
        let mut queue = TaskQueue::new(Duration::from_secs(30));
        let now = Instant::now();
        let a1 = agent("a1", "normal").await;

        for _ in 0..5 {
            queue.schedule(a1.clone(), now + Duration::from_secs(3600));
            assert!(queue.cancel("a1"));
        }
        assert!(queue.waiting.is_empty());
        assert_eq!(queue.next_wake(None), None);
    }

    #[tokio::test]
    async fn test_oversized_delays_do_not_overflow() {
        let now = Instant::now();
        let far = deadline_after(now, Duration::MAX);
        assert!(far > now);
        assert_eq!(
            deadline_after(now, Duration::from_secs(2)),
            now + Duration::from_secs(2)
        );

        let mut queue = TaskQueue::new(Duration::from_secs(30));
        queue.schedule(agent("a1", "normal").await, now);
        queue.promote_due(now);
        assert!(queue.next_wake(Some(Duration::MAX)).unwrap() > now);
    }

    #[tokio::test]
    async fn test_overdue_and_restore() {
        let mut queue = TaskQueue::new(Duration::from_secs(30));
        let now = Instant::now();
        queue.schedule(agent("old", "normal").await, ago(now, 40));
        queue.schedule(agent("new", "normal").await, now);
        queue.promote_due(now);

        assert_eq!(
            queue.next_wake(Some(Duration::from_secs(30))),
            Some(ago(now, 40) + Duration::from_secs(30))
        );

        let overdue = queue.take_overdue(now, Duration::from_secs(30));
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].agent_id(), "old");
        assert_eq!(queue.stats().in_flight, 1);

        let ticket = queue.pop_ready(now).unwrap();
        queue.restore(ticket);
        assert!(queue.has_ready());
        assert_eq!(queue.pop_ready(now).unwrap().agent_id(), "new");
    }

    #[tokio::test]
    async fn test_clear_and_stats() {
        let mut queue = TaskQueue::new(Duration::ZERO);
        let now = Instant::now();
        queue.schedule(agent("a1", "high").await, now);
        queue.schedule(agent("a2", "low").await, now);

        let stats = queue.stats();
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.high_count, 1);
        assert_eq!(stats.low_count, 1);
        assert!(stats.to_string().contains("queued=2"));

        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.next_wake(None), None);
    }
}
