use std::sync::Arc;

use bs_bus::Bus;
use bs_domain::config::Config;
use bs_providers::ModelRouter;
use bs_store::Store;

use crate::extensions::ExtensionTracker;
use crate::jobs::dispatcher::Dispatcher;
use crate::lifecycle::BrainStateMachine;
use crate::memory::MemoryRetriever;
use crate::registry::UnifiedToolRegistry;
use crate::sched::Scheduler;

/// Shared application state passed to all API handlers and runtime tasks.
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub bus: Arc<dyn Bus>,
    pub router: Arc<ModelRouter>,

    // ── Tools & memory ────────────────────────────────────────────
    pub registry: Arc<UnifiedToolRegistry>,
    pub retriever: Arc<dyn MemoryRetriever>,

    // ── Jobs & schedules ──────────────────────────────────────────
    pub dispatcher: Arc<Dispatcher>,
    pub scheduler: Arc<Scheduler>,

    // ── Lifecycle & observability ─────────────────────────────────
    pub machine: Arc<BrainStateMachine>,
    pub extensions: Arc<ExtensionTracker>,

    // ── Security (startup-computed) ───────────────────────────────
    /// SHA-256 hash of the API bearer token. `None` = dev mode (no auth).
    pub auth_token_hash: Option<Vec<u8>>,
}
