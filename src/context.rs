use std::rc::Rc;

use crate::clock::{Clock, SystemClock};
use crate::crypto::{Crypto, SystemCrypto};
use crate::host::{Navigator, PageLocation, WindowMessenger};
use crate::internal::instance_registry::InstanceRegistry;
use crate::internal::refresh_scheduler::AutoRefreshScheduler;
use crate::request::HttpTransport;
use crate::storage::{Storage, StorageHandle};

/// Everything an orchestrator shares with its environment.
///
/// Orchestrators created from clones of one context share storage, the refresh scheduler and the
/// instance registry. Independent contexts share nothing.
#[derive(Clone)]
pub struct TrustContext {
    pub(crate) storage: StorageHandle,
    pub(crate) crypto: Rc<dyn Crypto>,
    pub(crate) clock: Rc<dyn Clock>,
    pub(crate) http: Rc<dyn HttpTransport>,
    pub(crate) navigator: Rc<dyn Navigator>,
    pub(crate) page: Rc<dyn PageLocation>,
    pub(crate) messenger: Rc<dyn WindowMessenger>,
    pub(crate) scheduler: AutoRefreshScheduler,
    pub(crate) registry: InstanceRegistry,
}

impl std::fmt::Debug for TrustContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustContext")
            .field("storage", &self.storage)
            .field("scheduler", &self.scheduler)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl TrustContext {
    /// A context with in-memory storage, the system's clock and crypto, and a fresh scheduler
    /// and registry.
    pub fn new(
        http: Rc<dyn HttpTransport>,
        navigator: Rc<dyn Navigator>,
        page: Rc<dyn PageLocation>,
        messenger: Rc<dyn WindowMessenger>,
    ) -> Self {
        Self {
            storage: StorageHandle::memory(),
            crypto: Rc::new(SystemCrypto),
            clock: Rc::new(SystemClock),
            http,
            navigator,
            page,
            messenger,
            scheduler: AutoRefreshScheduler::default(),
            registry: InstanceRegistry::new(),
        }
    }

    /// Use `durable` storage if it passes the write probe.
    pub fn with_storage(mut self, durable: Option<Rc<dyn Storage>>) -> Self {
        self.storage = StorageHandle::select(durable);
        self
    }

    pub fn with_crypto(mut self, crypto: Rc<dyn Crypto>) -> Self {
        self.crypto = crypto;
        self
    }

    pub fn with_clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the scheduler, E.g. to change its lead time or minimum delay.
    pub fn with_scheduler(mut self, scheduler: AutoRefreshScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_registry(mut self, registry: InstanceRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn storage(&self) -> &StorageHandle {
        &self.storage
    }

    pub fn scheduler(&self) -> &AutoRefreshScheduler {
        &self.scheduler
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }
}
