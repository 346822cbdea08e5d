use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pb_reflect::testing::{self, StaticSource};
use pb_reflect::{CacheOptions, ResolverOptions, SchemaCache, SchemaData, SchemaResolver, SchemaSource};

fn resolver() -> SchemaResolver {
    SchemaResolver::new(Arc::new(SchemaCache::new()))
}

fn memory(ttl_secs: u64) -> ResolverOptions {
    ResolverOptions {
        cache: CacheOptions::memory("library", Duration::from_secs(ttl_secs)),
        timeout: None,
    }
}

#[tokio::test]
async fn test_memory_cache_returns_same_schema() {
    let resolver = resolver();
    let source = StaticSource::library("static:library");

    let first = resolver.resolve(&source, &memory(60)).await.unwrap();
    let second = resolver.resolve(&source, &memory(60)).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(source.fetches(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_memory_cache_resolves_again_after_expiry() {
    let resolver = resolver();
    let source = StaticSource::library("static:library");

    let first = resolver.resolve(&source, &memory(30)).await.unwrap();
    tokio::time::advance(Duration::from_secs(31)).await;
    let second = resolver.resolve(&source, &memory(30)).await.unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(source.fetches(), 2);
}

#[tokio::test]
async fn test_without_cache_key_always_fetches() {
    let resolver = resolver();
    let source = StaticSource::library("static:library");
    let options = ResolverOptions::default();

    resolver.resolve(&source, &options).await.unwrap();
    resolver.resolve(&source, &options).await.unwrap();

    assert_eq!(source.fetches(), 2);
    assert!(resolver.cache().is_empty());
}

#[tokio::test]
async fn test_disk_cache_is_shared_across_resolvers() {
    let dir = tempfile::tempdir().unwrap();
    let options = ResolverOptions {
        cache: CacheOptions::disk("library", dir.path(), Duration::from_secs(3600)),
        timeout: None,
    };

    let source = StaticSource::library("static:library");
    resolver().resolve(&source, &options).await.unwrap();
    let schema = resolver().resolve(&source, &options).await.unwrap();

    assert_eq!(source.fetches(), 1);
    assert!(schema.find_service(testing::LIBRARY_SERVICE).is_some());
    let entries = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(entries, 1);
}

#[tokio::test]
async fn test_unwritable_disk_cache_still_resolves() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();
    let options = ResolverOptions {
        cache: CacheOptions::disk("library", &blocker, Duration::from_secs(3600)),
        timeout: None,
    };

    let source = StaticSource::library("static:library");
    let schema = resolver().resolve(&source, &options).await.unwrap();
    assert_eq!(schema.services().count(), 2);
}

#[tokio::test]
async fn test_invalid_schema_is_not_cached() {
    let mut data = testing::library_data();
    testing::rename_method(&mut data, testing::LIBRARY_SERVICE, "ListBooks", "SearchBooks");
    let source = StaticSource::new("static:broken", data);
    let resolver = resolver();

    let err = resolver.resolve(&source, &memory(60)).await.unwrap_err();
    assert_eq!(err.code(), tonic::Code::Internal);
    assert!(resolver.cache().is_empty());
}

struct SlowSource;

#[async_trait]
impl SchemaSource for SlowSource {
    fn cache_key(&self) -> String {
        "slow".to_string()
    }

    async fn fetch(&self) -> pb_core::Result<SchemaData> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(testing::library_data())
    }
}

#[tokio::test(start_paused = true)]
async fn test_resolution_timeout_is_deadline_exceeded() {
    let options = ResolverOptions {
        cache: CacheOptions::default(),
        timeout: Some(Duration::from_secs(1)),
    };
    let err = resolver().resolve(&SlowSource, &options).await.unwrap_err();
    assert_eq!(err.code(), tonic::Code::DeadlineExceeded);
}
