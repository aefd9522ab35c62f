//! Physics event system
//!
//! Contact changes are batched while a step runs and dispatched at fixed
//! points of the pipeline. Key principles carried over from the engine's
//! event system:
//! - Handler returns bool (true = consumed, stops forwarding)
//! - Registration system (only notify interested handlers)
//! - Queuing support (immediate + batched delivery)
//!
//! Handlers receive the space mutably, so pre-solve handlers can change the
//! world. A contact referenced by an event stays readable through
//! [`PhysicsSpace::contact`] until the space destroys removed contacts,
//! which happens after dispatch.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::foundation::collections::{BodyHandle, ColliderHandle, ContactHandle, HandleMap};
use crate::physics::collision_group::{CollisionGroupId, CollisionTable, FilterFlags};
use crate::physics::{Collider, Contact, Manifold, PhysicsSpace};

/// Stage of a contact's life an event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollisionEventKind {
    /// First step the pair touched
    Started,
    /// The pair is still touching
    Persisted,
    /// The pair stopped touching
    Ended,
    /// About to be resolved
    PreSolve,
}

/// Event type identification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysicsEventType {
    /// Contact created
    CollisionStarted,
    /// Contact updated
    CollisionPersisted,
    /// Contact removed
    CollisionEnded,
    /// Contact about to be solved
    PreSolve,
    /// Group filter asked for a start event
    GroupCollisionStarted,
    /// Group filter asked for an end event
    GroupCollisionEnded,
    /// Group filter asked for a pre-solve event
    GroupPreSolve,
    /// A body woke up
    BodyAwoke,
    /// A body fell asleep
    BodySlept,
}

impl PhysicsEventType {
    fn collision(kind: CollisionEventKind) -> Self {
        match kind {
            CollisionEventKind::Started => Self::CollisionStarted,
            CollisionEventKind::Persisted => Self::CollisionPersisted,
            CollisionEventKind::Ended => Self::CollisionEnded,
            CollisionEventKind::PreSolve => Self::PreSolve,
        }
    }

    fn group(kind: CollisionEventKind) -> Option<Self> {
        match kind {
            CollisionEventKind::Started => Some(Self::GroupCollisionStarted),
            CollisionEventKind::Ended => Some(Self::GroupCollisionEnded),
            CollisionEventKind::PreSolve => Some(Self::GroupPreSolve),
            CollisionEventKind::Persisted => None,
        }
    }
}

/// A physics notification
#[derive(Debug, Clone, PartialEq)]
pub enum PhysicsEvent {
    /// Contact lifecycle event for colliders that send events
    Collision {
        /// Stage of the contact
        kind: CollisionEventKind,
        /// The contact; readable until removed contacts are destroyed
        contact: ContactHandle,
        /// The colliders in manifold order
        colliders: [ColliderHandle; 2],
    },
    /// Contact event requested by a collision filter
    GroupCollision {
        /// Stage of the contact
        kind: CollisionEventKind,
        /// The contact
        contact: ContactHandle,
        /// The colliders in manifold order
        colliders: [ColliderHandle; 2],
        /// Groups of the two colliders
        groups: [CollisionGroupId; 2],
        /// Which of A, B and the space the filter addressed
        targets: FilterFlags,
    },
    /// A body woke up
    BodyAwoke(BodyHandle),
    /// A body fell asleep
    BodySlept(BodyHandle),
}

impl PhysicsEvent {
    /// Type used for handler lookup
    pub fn event_type(&self) -> PhysicsEventType {
        match self {
            Self::Collision { kind, .. } => PhysicsEventType::collision(*kind),
            Self::GroupCollision { kind, .. } => {
                PhysicsEventType::group(*kind).unwrap_or(PhysicsEventType::CollisionPersisted)
            }
            Self::BodyAwoke(_) => PhysicsEventType::BodyAwoke,
            Self::BodySlept(_) => PhysicsEventType::BodySlept,
        }
    }

    /// Contact the event refers to
    pub const fn contact(&self) -> Option<ContactHandle> {
        match self {
            Self::Collision { contact, .. } | Self::GroupCollision { contact, .. } => Some(*contact),
            Self::BodyAwoke(_) | Self::BodySlept(_) => None,
        }
    }
}

/// Event handler trait
/// Returns true if event was consumed (stops forwarding)
/// Returns false to allow forwarding to other handlers
pub trait PhysicsEventHandler {
    /// Handle an event, return true if consumed
    fn on_event(&mut self, space: &mut PhysicsSpace, event: &PhysicsEvent) -> bool;
}

type HandlerMap = HashMap<PhysicsEventType, Vec<Box<dyn PhysicsEventHandler>>>;

/// Registered handlers, moved out of the space while they run
#[derive(Default)]
pub struct EventHandlers {
    typed: HandlerMap,
    global: Vec<Box<dyn PhysicsEventHandler>>,
}

impl EventHandlers {
    /// Deliver one event: typed handlers first, then global ones, stopping
    /// at the first handler that consumes it
    pub fn deliver(&mut self, space: &mut PhysicsSpace, event: &PhysicsEvent) {
        if let Some(handlers) = self.typed.get_mut(&event.event_type()) {
            for handler in handlers.iter_mut() {
                if handler.on_event(space, event) {
                    return;
                }
            }
        }
        for handler in &mut self.global {
            if handler.on_event(space, event) {
                return;
            }
        }
    }

    fn merge(&mut self, other: Self) {
        for (event_type, mut handlers) in other.typed {
            self.typed.entry(event_type).or_default().append(&mut handlers);
        }
        self.global.extend(other.global);
    }

    fn is_empty(&self) -> bool {
        self.global.is_empty() && self.typed.values().all(Vec::is_empty)
    }
}

/// Per-space event queues and handlers
#[derive(Default)]
pub struct PhysicsEventManager {
    batched: Vec<PhysicsEvent>,
    immediate: Vec<PhysicsEvent>,
    handlers: EventHandlers,
    group_filters: HashMap<(CollisionGroupId, CollisionGroupId), FilterFlags>,
}

impl std::fmt::Debug for PhysicsEventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicsEventManager")
            .field("batched", &self.batched.len())
            .field("immediate", &self.immediate.len())
            .field("group_filters", &self.group_filters.len())
            .finish_non_exhaustive()
    }
}

impl PhysicsEventManager {
    /// Create a new empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a specific event type
    pub fn register_handler(&mut self, event_type: PhysicsEventType, handler: Box<dyn PhysicsEventHandler>) {
        self.handlers.typed.entry(event_type).or_default().push(handler);
    }

    /// Register a handler that sees every event
    pub fn register_global_handler(&mut self, handler: Box<dyn PhysicsEventHandler>) {
        self.handlers.global.push(handler);
    }

    /// Whether any handler is registered
    pub fn has_handlers(&self) -> bool {
        !self.handlers.is_empty()
    }

    /// Cache which group pairs want events from `table`
    pub fn set_group_filters(&mut self, table: &CollisionTable) {
        self.group_filters = table
            .filters()
            .iter()
            .filter(|filter| filter.wants_events())
            .map(|filter| (filter.key(), filter.flags()))
            .collect();
    }

    /// Queue the events a contact change produces
    pub fn batch_collision(
        &mut self,
        colliders: &HandleMap<ColliderHandle, Collider>,
        handle: ContactHandle,
        contact: &Contact,
        kind: CollisionEventKind,
        send_immediately: bool,
    ) {
        let manifold: &Manifold = contact.manifold();
        let [a, b] = manifold.colliders;
        let (Some(collider_a), Some(collider_b)) = (colliders.get(a), colliders.get(b)) else {
            return;
        };
        let queue = if send_immediately { &mut self.immediate } else { &mut self.batched };

        if collider_a.sends_events() || collider_b.sends_events() {
            queue.push(PhysicsEvent::Collision { kind, contact: handle, colliders: [a, b] });
        }

        let groups = [collider_a.group().id(), collider_b.group().id()];
        let key = if groups[0] <= groups[1] { (groups[0], groups[1]) } else { (groups[1], groups[0]) };
        let Some(flags) = self.group_filters.get(&key) else {
            return;
        };
        let wanted = match kind {
            CollisionEventKind::Started => FilterFlags::START_EVENT,
            CollisionEventKind::Ended => FilterFlags::END_EVENT,
            CollisionEventKind::PreSolve => FilterFlags::PRE_SOLVE_EVENT,
            CollisionEventKind::Persisted => FilterFlags::empty(),
        };
        if !wanted.is_empty() && flags.contains(wanted) {
            let targets = *flags
                & (FilterFlags::SEND_EVENTS_TO_A | FilterFlags::SEND_EVENTS_TO_B | FilterFlags::SEND_EVENTS_TO_SPACE);
            queue.push(PhysicsEvent::GroupCollision { kind, contact: handle, colliders: [a, b], groups, targets });
        }
    }

    /// Queue an event for the next batched dispatch
    pub fn send(&mut self, event: PhysicsEvent) {
        self.batched.push(event);
    }

    /// Queue an event for the next immediate dispatch
    pub fn send_immediately(&mut self, event: PhysicsEvent) {
        self.immediate.push(event);
    }

    /// Events waiting in the batch
    pub fn batched(&self) -> &[PhysicsEvent] {
        &self.batched
    }

    pub(crate) fn take_batched(&mut self) -> Vec<PhysicsEvent> {
        std::mem::take(&mut self.batched)
    }

    /// Take batched events of one kind, leaving the others queued
    pub(crate) fn take_batched_where(&mut self, keep: impl Fn(&PhysicsEvent) -> bool) -> Vec<PhysicsEvent> {
        let (taken, rest) = std::mem::take(&mut self.batched).into_iter().partition(|e| keep(e));
        self.batched = rest;
        taken
    }

    pub(crate) fn take_immediate(&mut self) -> Vec<PhysicsEvent> {
        std::mem::take(&mut self.immediate)
    }

    pub(crate) fn take_handlers(&mut self) -> EventHandlers {
        std::mem::take(&mut self.handlers)
    }

    /// Put handlers back after dispatch, keeping any registered meanwhile
    pub(crate) fn restore_handlers(&mut self, mut handlers: EventHandlers) {
        let registered_meanwhile = std::mem::take(&mut self.handlers);
        handlers.merge(registered_meanwhile);
        self.handlers = handlers;
    }

    /// Clear all queued events
    pub fn clear(&mut self) {
        self.batched.clear();
        self.immediate.clear();
    }
}

/// An event together with the manifold it referred to at dispatch time
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    /// The event
    pub event: PhysicsEvent,
    /// Snapshot of the contact's manifold, if the event had one
    pub manifold: Option<Manifold>,
}

/// Handler that stores every event it sees. Clones share the same log, so
/// one clone can be registered while the other is inspected.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    log: Rc<RefCell<Vec<RecordedEvent>>>,
}

impl EventRecorder {
    /// Create a new empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.log.borrow().clone()
    }

    /// Recorded events of one type
    pub fn of_type(&self, event_type: PhysicsEventType) -> Vec<RecordedEvent> {
        self.log
            .borrow()
            .iter()
            .filter(|recorded| recorded.event.event_type() == event_type)
            .cloned()
            .collect()
    }

    /// Number of recorded events of one type
    pub fn count(&self, event_type: PhysicsEventType) -> usize {
        self.log
            .borrow()
            .iter()
            .filter(|recorded| recorded.event.event_type() == event_type)
            .count()
    }

    /// Forget everything
    pub fn clear(&self) {
        self.log.borrow_mut().clear();
    }
}

impl PhysicsEventHandler for EventRecorder {
    fn on_event(&mut self, space: &mut PhysicsSpace, event: &PhysicsEvent) -> bool {
        let manifold = event
            .contact()
            .and_then(|handle| space.contact(handle))
            .map(|contact| contact.manifold().clone());
        self.log.borrow_mut().push(RecordedEvent { event: event.clone(), manifold });
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PhysicsSpaceConfig;
    use slotmap::SlotMap;

    struct Consumer {
        seen: Rc<RefCell<usize>>,
        consume: bool,
    }

    impl PhysicsEventHandler for Consumer {
        fn on_event(&mut self, _space: &mut PhysicsSpace, _event: &PhysicsEvent) -> bool {
            *self.seen.borrow_mut() += 1;
            self.consume
        }
    }

    fn body_event() -> PhysicsEvent {
        let mut bodies: SlotMap<BodyHandle, ()> = SlotMap::with_key();
        PhysicsEvent::BodyAwoke(bodies.insert(()))
    }

    #[test]
    fn test_event_consumption() {
        let mut space = PhysicsSpace::new(PhysicsSpaceConfig::default());
        let first = Rc::new(RefCell::new(0));
        let second = Rc::new(RefCell::new(0));

        let mut handlers = EventHandlers::default();
        handlers
            .typed
            .entry(PhysicsEventType::BodyAwoke)
            .or_default()
            .push(Box::new(Consumer { seen: Rc::clone(&first), consume: true }));
        handlers.global.push(Box::new(Consumer { seen: Rc::clone(&second), consume: false }));

        handlers.deliver(&mut space, &body_event());
        assert_eq!(*first.borrow(), 1);
        assert_eq!(*second.borrow(), 0);
    }

    #[test]
    fn test_restore_keeps_new_registrations() {
        let mut manager = PhysicsEventManager::new();
        manager.register_global_handler(Box::new(EventRecorder::new()));
        let taken = manager.take_handlers();
        assert!(!manager.has_handlers());

        manager.register_handler(PhysicsEventType::BodySlept, Box::new(EventRecorder::new()));
        manager.restore_handlers(taken);
        assert_eq!(manager.handlers.global.len(), 1);
        assert_eq!(manager.handlers.typed.get(&PhysicsEventType::BodySlept).map(Vec::len), Some(1));
    }

    #[test]
    fn test_partial_take_leaves_other_events() {
        let mut manager = PhysicsEventManager::new();
        manager.send(body_event());
        let mut bodies: SlotMap<BodyHandle, ()> = SlotMap::with_key();
        manager.send(PhysicsEvent::BodySlept(bodies.insert(())));

        let awoke = manager.take_batched_where(|e| e.event_type() == PhysicsEventType::BodyAwoke);
        assert_eq!(awoke.len(), 1);
        assert_eq!(manager.batched().len(), 1);
    }

    #[test]
    fn test_recorder_clones_share_log() {
        let mut space = PhysicsSpace::new(PhysicsSpaceConfig::default());
        let recorder = EventRecorder::new();
        let mut registered = recorder.clone();
        registered.on_event(&mut space, &body_event());
        assert_eq!(recorder.count(PhysicsEventType::BodyAwoke), 1);
        assert!(recorder.events()[0].manifold.is_none());
    }
}
