//! Backend registry for AnvilQ.
//!
//! Maps each [`BackendType`] to a factory that builds the backend from the
//! shared [`AnvilConfig`]. The set of types is closed: unknown names are
//! rejected when the configuration is parsed, so the registry only has to
//! deal with types whose cargo feature is disabled.
//!
//! # Examples
//!
//! ```rust
//! use anvilq::config::AnvilConfig;
//! use anvilq::core::registry::get_registry;
//! use anvilq::queue::BackendType;
//!
//! let config = AnvilConfig::default();
//! let backend = get_registry().create(BackendType::Memory, &config).unwrap();
//! assert!(!backend.is_consumer_paused());
//! ```

use crate::config::AnvilConfig;
use crate::error::{AnvilError, AnvilResult};
use crate::queue::{BackendType, InMemoryBackend, JobQueueBackend};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Builds a backend from the shared configuration.
pub type BackendFactory =
    Arc<dyn Fn(&AnvilConfig) -> AnvilResult<Arc<dyn JobQueueBackend>> + Send + Sync>;

/// A backend paired with the type it was built from.
#[derive(Clone)]
pub struct ActiveBackend {
    /// Type used for diagnostics and error reports
    pub backend_type: BackendType,
    /// The backend itself
    pub backend: Arc<dyn JobQueueBackend>,
}

impl ActiveBackend {
    /// Pair a backend with its type.
    pub fn new(backend_type: BackendType, backend: Arc<dyn JobQueueBackend>) -> Self {
        Self {
            backend_type,
            backend,
        }
    }
}

impl std::fmt::Debug for ActiveBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveBackend")
            .field("backend_type", &self.backend_type)
            .finish_non_exhaustive()
    }
}

/// Dispatch table from backend type to factory.
#[derive(Clone)]
pub struct BackendRegistry {
    factories: HashMap<BackendType, BackendFactory>,
}

impl BackendRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with every backend compiled into this build.
    pub fn builtin() -> Self {
        let registry = Self::empty().with_factory(BackendType::Memory, |config: &AnvilConfig| {
            let backend: Arc<dyn JobQueueBackend> =
                Arc::new(InMemoryBackend::with_config(config.memory.clone()));
            Ok(backend)
        });

        #[cfg(feature = "redis-queue")]
        let registry = registry.with_factory(BackendType::Redis, |config: &AnvilConfig| {
            let backend: Arc<dyn JobQueueBackend> =
                Arc::new(crate::queue::RedisBackend::new(config.redis.clone())?);
            Ok(backend)
        });

        registry
    }

    /// Register (or replace) the factory for `backend_type`.
    pub fn with_factory<F>(mut self, backend_type: BackendType, factory: F) -> Self
    where
        F: Fn(&AnvilConfig) -> AnvilResult<Arc<dyn JobQueueBackend>> + Send + Sync + 'static,
    {
        tracing::debug!("Registering job queue factory: {}", backend_type);
        self.factories.insert(backend_type, Arc::new(factory));
        self
    }

    /// Whether a factory exists for `backend_type`.
    pub fn supports(&self, backend_type: BackendType) -> bool {
        self.factories.contains_key(&backend_type)
    }

    /// Build one backend.
    pub fn create(
        &self,
        backend_type: BackendType,
        config: &AnvilConfig,
    ) -> AnvilResult<Arc<dyn JobQueueBackend>> {
        let factory = self.factories.get(&backend_type).ok_or_else(|| {
            AnvilError::config(format!(
                "Job queue type '{}' is not available in this build",
                backend_type
            ))
        })?;
        factory(config)
    }

    /// Build every backend in `config.job_queues`, preserving order.
    pub fn resolve(&self, config: &AnvilConfig) -> AnvilResult<Vec<ActiveBackend>> {
        config
            .job_queues
            .iter()
            .map(|&backend_type| {
                self.create(backend_type, config)
                    .map(|backend| ActiveBackend::new(backend_type, backend))
            })
            .collect()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Global builtin registry instance.
static BACKEND_REGISTRY: OnceLock<BackendRegistry> = OnceLock::new();

/// Get the global builtin registry.
///
/// The registry is initialized on first access.
pub fn get_registry() -> &'static BackendRegistry {
    BACKEND_REGISTRY.get_or_init(|| {
        tracing::debug!("Initializing global job queue registry");
        BackendRegistry::builtin()
    })
}
