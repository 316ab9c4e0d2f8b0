pub(crate) mod csrf_guard;
pub(crate) mod instance_registry;
pub(crate) mod pkce_manager;
pub(crate) mod refresh_scheduler;
pub(crate) mod response_deduper;
pub(crate) mod token_acquisition;
pub(crate) mod token_service;
pub(crate) mod token_store;
