use std::sync::Arc;

use anyhow::{bail, Context, Result};
use pb_reflect::{
    CacheOptions, DescriptorSetSource, ReflectionSource, ResolverOptions, Schema, SchemaCache, SchemaResolver,
    SchemaSource,
};
use tracing::debug;

use crate::config::Settings;

/// Resolves the schema from the reflection server when one is configured,
/// otherwise from the descriptor set bundles.
pub async fn resolve(settings: &Settings) -> Result<Arc<Schema>> {
    let source: Box<dyn SchemaSource> = match (&settings.reflection_url, settings.descriptor_sets.is_empty()) {
        (Some(url), _) => Box::new(ReflectionSource::lazy(url)?),
        (None, false) => Box::new(DescriptorSetSource::parse(&settings.descriptor_sets)?),
        (None, true) => bail!("no schema source: pass --reflection-url or --descriptor-set"),
    };

    let key = source.cache_key();
    debug!(source = %key, cached_on_disk = settings.cache_dir.is_some(), "resolving schema");
    let cache = match &settings.cache_dir {
        Some(dir) => CacheOptions::disk(key, dir, settings.cache_ttl),
        None => CacheOptions::memory(key, settings.cache_ttl),
    };
    let options = ResolverOptions {
        cache,
        timeout: settings.timeout,
    };

    let schema = SchemaResolver::new(Arc::new(SchemaCache::new()))
        .resolve(source.as_ref(), &options)
        .await
        .context("failed to resolve schema")?;
    debug!(services = schema.services().count(), "schema resolved");
    Ok(schema)
}
