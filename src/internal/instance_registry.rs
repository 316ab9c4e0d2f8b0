use std::cell::RefCell;
use std::rc::Rc;

use crate::orchestrator::{TrustOrchestrator, WeakTrustOrchestrator};

/// Published once an orchestrator finished its first initialization.
#[derive(Debug, Clone)]
pub struct InstanceAnnouncement {
    pub client_id: String,
    pub lib_version: &'static str,
    instance: WeakTrustOrchestrator,
}

impl InstanceAnnouncement {
    pub(crate) fn new(
        client_id: String,
        lib_version: &'static str,
        instance: WeakTrustOrchestrator,
    ) -> Self {
        Self {
            client_id,
            lib_version,
            instance,
        }
    }

    /// `None` once the instance was dropped.
    pub fn instance(&self) -> Option<TrustOrchestrator> {
        self.instance.upgrade()
    }
}

type Subscriber = Rc<dyn Fn(&InstanceAnnouncement)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Bus {
    announcements: Vec<InstanceAnnouncement>,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_id: u64,
}

/// In-process discovery of orchestrator instances.
///
/// Subscribers joining late get every live announcement replayed, so a host can locate an
/// instance no matter which of the two was loaded first. Announcements only hold weak handles.
#[derive(Clone, Default)]
pub struct InstanceRegistry {
    bus: Rc<RefCell<Bus>>,
}

impl std::fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bus = self.bus.borrow();
        f.debug_struct("InstanceRegistry")
            .field("announcements", &bus.announcements.len())
            .field("subscribers", &bus.subscribers.len())
            .finish()
    }
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, announcement: InstanceAnnouncement) {
        tracing::trace!(
            client_id = announcement.client_id,
            lib_version = announcement.lib_version,
            "Announcing instance."
        );
        let subscribers: Vec<Subscriber> = {
            let mut bus = self.bus.borrow_mut();
            bus.announcements
                .retain(|it| it.instance.upgrade().is_some());
            bus.announcements.push(announcement.clone());
            bus.subscribers.iter().map(|(_, s)| s.clone()).collect()
        };
        // Subscribers may use the registry themselves.
        for subscriber in subscribers {
            subscriber(&announcement);
        }
    }

    /// Register `subscriber` and replay every live announcement to it.
    pub fn subscribe(
        &self,
        subscriber: impl Fn(&InstanceAnnouncement) + 'static,
    ) -> SubscriptionId {
        let subscriber: Subscriber = Rc::new(subscriber);
        let (id, replay) = {
            let mut bus = self.bus.borrow_mut();
            let id = SubscriptionId(bus.next_id);
            bus.next_id += 1;
            bus.subscribers.push((id, subscriber.clone()));
            (id, bus.announcements.clone())
        };
        for announcement in replay
            .iter()
            .filter(|it| it.instance.upgrade().is_some())
        {
            subscriber(announcement);
        }
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.bus
            .borrow_mut()
            .subscribers
            .retain(|(it, _)| *it != id);
    }

    /// Live instances, optionally restricted to one client.
    pub fn instances(&self, client_id: Option<&str>) -> Vec<TrustOrchestrator> {
        self.bus
            .borrow()
            .announcements
            .iter()
            .filter(|it| client_id.is_none_or(|client_id| it.client_id == client_id))
            .filter_map(InstanceAnnouncement::instance)
            .collect()
    }
}
