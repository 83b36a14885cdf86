//! DNS manager: applied-state tracking and backend switching

use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{new_backend, Config, DnsBackend, ManagerConfig, OSConfig};
use crate::error::Result;

/// Constructs a backend for a given manager configuration
pub type BackendFactory = Box<dyn Fn(&ManagerConfig) -> Box<dyn DnsBackend> + Send + Sync>;

struct State {
    backend: Box<dyn DnsBackend>,
    /// Last config the backend accepted
    config: Config,
    mconfig: ManagerConfig,
}

/// Manages system DNS settings
///
/// `set` is a no-op for a config equal to the last applied one. On any
/// failure the tracked config is left as it was, so retrying the same
/// input retries the same transition.
pub struct Manager {
    factory: BackendFactory,
    state: Mutex<State>,
}

impl Manager {
    /// Create a manager using the platform backend
    pub fn new(mconfig: ManagerConfig) -> Self {
        Self::with_factory(mconfig, Box::new(new_backend))
    }

    /// Create a manager with a custom backend constructor
    pub fn with_factory(mconfig: ManagerConfig, factory: BackendFactory) -> Self {
        let backend = factory(&mconfig);
        log::info!("dns: {}: using {}", mconfig.interface_name, backend.name());

        let config = Config {
            per_domain: mconfig.per_domain,
            ..Default::default()
        };

        Self {
            factory,
            state: Mutex::new(State {
                backend,
                config,
                mconfig,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // State is only ever replaced wholesale, so a panic mid-call cannot
        // leave it half-updated.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Converge system DNS to `config`
    pub fn set(&self, config: Config) -> Result<()> {
        let mut state = self.lock();
        if config == state.config {
            return Ok(());
        }

        log::info!("dns: {}: set {}", state.mconfig.interface_name, config);

        if config.nameservers.is_empty() {
            state.backend.down()?;
            state.config = config;
            return Ok(());
        }

        // Switching in or out of per-domain mode may need another backend.
        if config.per_domain != state.config.per_domain {
            state.backend.down()?;

            let mut mconfig = state.mconfig.clone();
            mconfig.per_domain = config.per_domain;
            let backend = (self.factory)(&mconfig);
            log::info!(
                "dns: {}: switched from {} to {}",
                mconfig.interface_name,
                state.backend.name(),
                backend.name()
            );
            state.backend = backend;
            state.mconfig = mconfig;
        }

        state.backend.up(&config)?;
        state.config = config;
        Ok(())
    }

    /// Re-apply the tracked config
    pub fn up(&self) -> Result<()> {
        let mut state = self.lock();
        if state.config.nameservers.is_empty() {
            return state.backend.down();
        }
        let config = state.config.clone();
        state.backend.up(&config)
    }

    /// Undo any applied DNS settings; a no-op if nothing was applied
    pub fn down(&self) -> Result<()> {
        self.lock().backend.down()
    }

    /// Final teardown, including cleanup of artifacts from older releases
    pub fn close(&self) -> Result<()> {
        self.lock().backend.close()
    }

    /// The host's own DNS settings
    pub fn base_config(&self) -> Result<OSConfig> {
        self.lock().backend.base_config()
    }

    pub fn supports_split_dns(&self) -> bool {
        self.lock().backend.supports_split_dns()
    }

    /// The last config successfully applied
    pub fn current_config(&self) -> Config {
        self.lock().config.clone()
    }

    pub fn backend_name(&self) -> &'static str {
        self.lock().backend.name()
    }
}
