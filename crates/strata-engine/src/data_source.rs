//! Data source: registry, driver and subscribers wired together

use std::sync::Arc;

use strata_core::errors::Result;
use strata_core::events::Subscriber;
use strata_core::logging_facility;
use strata_core::model::MetadataRegistry;
use strata_store::Driver;
use tracing::info;

use crate::config::DataSourceOptions;
use crate::manager::{Context, EntityManager};

/// Builder for the shared state behind every `EntityManager`
pub struct DataSource {
    registry: Arc<MetadataRegistry>,
    driver: Arc<dyn Driver>,
    subscribers: Vec<Arc<dyn Subscriber>>,
    options: DataSourceOptions,
}

impl DataSource {
    /// # Errors
    ///
    /// Any metadata validation error of `registry`.
    pub fn new(registry: MetadataRegistry, driver: Arc<dyn Driver>) -> Result<Self> {
        registry.validate()?;
        Ok(Self {
            registry: Arc::new(registry),
            driver,
            subscribers: Vec::new(),
            options: DataSourceOptions::default(),
        })
    }

    /// Open the configured driver and, when a logging profile is set, install
    /// the global tracing subscriber
    ///
    /// # Errors
    ///
    /// Metadata validation errors; `Persistence` when the driver cannot open.
    pub fn from_options(registry: MetadataRegistry, options: DataSourceOptions) -> Result<Self> {
        if let Some(profile) = options.logging {
            logging_facility::init(profile);
        }
        let driver = options.build_driver()?;
        let source = Self::new(registry, driver)?.with_options(options);
        info!(
            driver = source.driver.name(),
            entities = source.registry.len(),
            "data source initialized"
        );
        Ok(source)
    }

    pub fn with_options(mut self, options: DataSourceOptions) -> Self {
        self.options = options;
        self
    }

    /// Register a post-commit subscriber for managers created afterwards
    pub fn subscribe(&mut self, subscriber: Arc<dyn Subscriber>) -> &mut Self {
        self.subscribers.push(subscriber);
        self
    }

    pub fn registry(&self) -> &MetadataRegistry {
        &self.registry
    }

    pub fn options(&self) -> &DataSourceOptions {
        &self.options
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// A non-transactional manager
    pub fn manager(&self) -> EntityManager {
        EntityManager::new(Arc::new(Context {
            registry: Arc::clone(&self.registry),
            driver: Arc::clone(&self.driver),
            subscribers: self.subscribers.clone(),
            options: self.options.clone(),
        }))
    }
}
