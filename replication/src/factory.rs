//! Registry of adapter factories, keyed by registry type.
//!
//! Registration happens once at start-up through [AdapterRegistryBuilder].
//! [AdapterRegistryBuilder::build] freezes the mapping into an
//! [AdapterRegistry], which is cheap to clone and safe to share between
//! concurrent replication tasks.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::adapter::Adapter;
use crate::error::AdapterError;
use crate::model::{AdapterPattern, Registry, RegistryType};

/// Builds an adapter for one registry.
pub trait AdapterFactory: fmt::Debug + Send + Sync {
    /// Construct an adapter for `registry`.
    fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>, AdapterError>;

    /// How endpoints of this type should be offered to users.
    fn pattern(&self) -> Option<AdapterPattern> {
        None
    }
}

/// Errors from registering or looking up factories.
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    /// The registry type is empty.
    #[error("invalid registry type")]
    InvalidType,

    /// No factory was supplied.
    #[error("empty adapter factory for {0}")]
    InvalidFactory(RegistryType),

    /// A factory is already registered for this type.
    #[error("adapter factory for {0} already exists")]
    DuplicateType(RegistryType),

    /// No factory is registered for this type.
    #[error("adapter factory for {0} not found")]
    NotFound(RegistryType),

    /// The factory failed to construct an adapter.
    #[error("creating {registry_type} adapter")]
    Create {
        /// Type the factory was registered for.
        registry_type: RegistryType,
        /// Why construction failed.
        #[source]
        source: AdapterError,
    },
}

type Factories = HashMap<RegistryType, Arc<dyn AdapterFactory>>;

/// Mutable registration phase of an [AdapterRegistry].
#[derive(Debug, Default)]
pub struct AdapterRegistryBuilder {
    factories: Factories,
}

impl AdapterRegistryBuilder {
    /// A builder with no factories registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` for `registry_type`.
    ///
    /// Fails when the type is empty, the factory is absent, or the type is
    /// already registered. A failed registration leaves the builder unchanged.
    pub fn register_factory<T>(
        &mut self,
        registry_type: T,
        factory: Option<Arc<dyn AdapterFactory>>,
    ) -> Result<&mut Self, FactoryError>
    where
        T: Into<RegistryType>,
    {
        let registry_type = registry_type.into();
        if registry_type.is_empty() {
            return Err(FactoryError::InvalidType);
        }
        let Some(factory) = factory else {
            return Err(FactoryError::InvalidFactory(registry_type));
        };
        if self.factories.contains_key(&registry_type) {
            return Err(FactoryError::DuplicateType(registry_type));
        }

        tracing::debug!(%registry_type, "registered adapter factory");
        self.factories.insert(registry_type, factory);
        Ok(self)
    }

    /// Register a concrete factory.
    pub fn register<T, F>(&mut self, registry_type: T, factory: F) -> Result<&mut Self, FactoryError>
    where
        T: Into<RegistryType>,
        F: AdapterFactory + 'static,
    {
        self.register_factory(registry_type, Some(Arc::new(factory)))
    }

    /// Freeze the registrations.
    pub fn build(self) -> AdapterRegistry {
        AdapterRegistry {
            factories: Arc::new(self.factories),
        }
    }
}

/// Read-only mapping from registry type to adapter factory.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    factories: Arc<Factories>,
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

impl AdapterRegistry {
    /// Start building a registry.
    pub fn builder() -> AdapterRegistryBuilder {
        AdapterRegistryBuilder::new()
    }

    /// The factory registered for `registry_type`.
    pub fn get_factory(&self, registry_type: &RegistryType) -> Result<&dyn AdapterFactory, FactoryError> {
        self.factories
            .get(registry_type)
            .map(|factory| factory.as_ref())
            .ok_or_else(|| FactoryError::NotFound(registry_type.clone()))
    }

    /// Every registered type.
    pub fn registered_types(&self) -> HashSet<RegistryType> {
        self.factories.keys().cloned().collect()
    }

    /// The adapter pattern for `registry_type`, if its factory declares one.
    pub fn pattern(&self, registry_type: &RegistryType) -> Result<Option<AdapterPattern>, FactoryError> {
        Ok(self.get_factory(registry_type)?.pattern())
    }

    /// Construct an adapter for `registry` using the factory for its type.
    #[tracing::instrument(skip_all, fields(registry_type = %registry.registry_type, url = %registry.url))]
    pub fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>, FactoryError> {
        let factory = self.get_factory(&registry.registry_type)?;
        factory.create(registry).map_err(|source| {
            tracing::warn!(error = %source, "adapter construction failed");
            FactoryError::Create {
                registry_type: registry.registry_type.clone(),
                source,
            }
        })
    }
}
