use std::collections::HashMap;
use std::sync::Arc;

use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;

use crate::driver::StorageDriver;
use crate::error::{Error, Result};
use crate::local::LocalStorageDriver;
use crate::object::ObjectStorageDriver;

/// Builds a storage driver from the type-specific configuration block,
/// passed as a flat string map.
pub trait StorageDriverFactory: Send + Sync {
    /// Short name the factory registers under, e.g. `s3`.
    fn name(&self) -> &str;

    fn create(&self, properties: &HashMap<String, String>) -> Result<Arc<dyn StorageDriver>>;
}

/// Name-keyed driver registry. `local`, `s3` and `azure` are built in;
/// other backends (`hdfs` among them) resolve only after a custom factory
/// registers, before configuration is parsed.
pub struct StorageRegistry {
    factories: Vec<Box<dyn StorageDriverFactory>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self {
            factories: vec![
                Box::new(LocalDriverFactory),
                Box::new(S3DriverFactory),
                Box::new(AzureDriverFactory),
            ],
        }
    }

    pub fn register(&mut self, factory: Box<dyn StorageDriverFactory>) {
        self.factories.push(factory);
    }

    pub fn create(
        &self,
        name: &str,
        properties: &HashMap<String, String>,
    ) -> Result<Arc<dyn StorageDriver>> {
        let lower = name.to_lowercase();
        self.factories
            .iter()
            .find(|f| f.name() == lower)
            .ok_or_else(|| Error::UnknownDriver(name.to_string()))?
            .create(properties)
    }
}

impl Default for StorageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

struct LocalDriverFactory;

impl StorageDriverFactory for LocalDriverFactory {
    fn name(&self) -> &str {
        "local"
    }

    fn create(&self, _properties: &HashMap<String, String>) -> Result<Arc<dyn StorageDriver>> {
        Ok(Arc::new(LocalStorageDriver::new()))
    }
}

fn required<'a>(properties: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    properties
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| Error::InvalidConfig(format!("missing required '{key}'")))
}

struct S3DriverFactory;

impl StorageDriverFactory for S3DriverFactory {
    fn name(&self) -> &str {
        "s3"
    }

    fn create(&self, properties: &HashMap<String, String>) -> Result<Arc<dyn StorageDriver>> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(required(properties, "bucket")?);
        if let Some(region) = properties.get("region") {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = properties.get("endpoint") {
            builder = builder.with_endpoint(endpoint).with_allow_http(true);
        }
        if let Some(key) = properties.get("access_key_id") {
            builder = builder.with_access_key_id(key);
        }
        if let Some(secret) = properties.get("secret_access_key") {
            builder = builder.with_secret_access_key(secret);
        }
        let store = builder
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build S3 client: {e}")))?;
        Ok(Arc::new(ObjectStorageDriver::new("s3", Arc::new(store))))
    }
}

struct AzureDriverFactory;

impl StorageDriverFactory for AzureDriverFactory {
    fn name(&self) -> &str {
        "azure"
    }

    fn create(&self, properties: &HashMap<String, String>) -> Result<Arc<dyn StorageDriver>> {
        let mut builder = MicrosoftAzureBuilder::from_env()
            .with_account(required(properties, "account")?)
            .with_container_name(required(properties, "container")?);
        if let Some(key) = properties.get("access_key") {
            builder = builder.with_access_key(key);
        }
        let store = builder
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build Azure client: {e}")))?;
        Ok(Arc::new(ObjectStorageDriver::new("azure", Arc::new(store))))
    }
}
