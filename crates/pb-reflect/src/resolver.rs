//! Resolves a [`Schema`] from a [`SchemaSource`], consulting the cache tiers
//! first.

use std::sync::Arc;
use std::time::Duration;

use pb_core::{Error, Result};
use tracing::{debug, info};

use crate::cache::{CacheOptions, SchemaCache};
use crate::schema::Schema;
use crate::source::{SchemaData, SchemaSource};

#[derive(Debug, Clone, Default)]
pub struct ResolverOptions {
    pub cache: CacheOptions,
    /// Upper bound on fetching from the source. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

#[derive(Clone)]
pub struct SchemaResolver {
    cache: Arc<SchemaCache>,
}

impl SchemaResolver {
    pub fn new(cache: Arc<SchemaCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<SchemaCache> {
        &self.cache
    }

    /// Memory tier, then disk tier, then the source.
    ///
    /// Concurrent first calls for the same key may each fetch; the last
    /// writer wins and every caller gets a complete schema.
    pub async fn resolve(
        &self,
        source: &dyn SchemaSource,
        options: &ResolverOptions,
    ) -> Result<Arc<Schema>> {
        let digest = options.cache.digest();

        if let Some(digest) = &digest {
            if let Some(schema) = self.cache.get(digest) {
                debug!(digest = %digest, "schema cache hit");
                return Ok(schema);
            }
            debug!(digest = %digest, "schema cache miss");
        }

        let disk = options.cache.dir.as_deref().zip(digest.as_deref());
        let cached = disk.and_then(|(dir, digest)| SchemaCache::load_disk(dir, digest, options.cache.ttl));

        let data = match cached {
            Some(data) => {
                debug!("loaded schema data from disk cache");
                data
            }
            None => {
                let data = fetch(source, options.timeout).await?;
                if let Some((dir, digest)) = disk {
                    SchemaCache::store_disk(dir, digest, &data);
                }
                data
            }
        };

        let schema = Arc::new(Schema::new(data)?);
        if let Some(digest) = &digest {
            self.cache.insert(digest, Arc::clone(&schema), options.cache.ttl);
        }
        info!(
            source = %source.cache_key(),
            services = schema.data().service_set.len(),
            "schema resolved"
        );
        Ok(schema)
    }
}

async fn fetch(source: &dyn SchemaSource, timeout: Option<Duration>) -> Result<SchemaData> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, source.fetch())
            .await
            .map_err(|_| {
                Error::DeadlineExceeded(format!("schema resolution timed out after {limit:?}"))
            })?,
        None => source.fetch().await,
    }
}
