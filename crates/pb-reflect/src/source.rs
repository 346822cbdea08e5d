//! Sources of raw schema data: live server reflection or descriptor-set
//! bundles on disk.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use pb_core::{Error, Result};
use prost::Message as _;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

use crate::descriptor::{FileDescriptorProto, FileDescriptorSet};
use crate::reflection::ReflectionClient;

/// File descriptors plus the services to expose from them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaData {
    pub files: Vec<FileDescriptorProto>,
    pub service_set: Vec<String>,
}

impl SchemaData {
    /// Decodes a serialized `FileDescriptorSet` exposing `services`.
    pub fn from_descriptor_set(bytes: &[u8], services: Vec<String>) -> Result<Self> {
        let set = FileDescriptorSet::decode(bytes)?;
        Ok(Self {
            files: set.file,
            service_set: services,
        })
    }

    /// Adds the files and services of `other`. Files already present by name
    /// and repeated service names are skipped.
    pub fn merge(&mut self, other: SchemaData) {
        let mut names: HashSet<String> = self.files.iter().map(|f| f.name().to_string()).collect();
        for file in other.files {
            if names.insert(file.name().to_string()) {
                self.files.push(file);
            }
        }
        for service in other.service_set {
            if !self.service_set.contains(&service) {
                self.service_set.push(service);
            }
        }
    }

    pub fn to_descriptor_set_bytes(&self) -> Vec<u8> {
        FileDescriptorSet {
            file: self.files.clone(),
        }
        .encode_to_vec()
    }
}

#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// A stable identity for the data this source serves. Used as the cache
    /// key when the caller does not supply one.
    fn cache_key(&self) -> String;

    async fn fetch(&self) -> Result<SchemaData>;
}

// ── Server reflection ──

/// Fetches descriptors over `grpc.reflection.v1` from a running server.
#[derive(Clone)]
pub struct ReflectionSource {
    endpoint: String,
    channel: Channel,
}

impl ReflectionSource {
    pub fn new(endpoint: impl Into<String>, channel: Channel) -> Self {
        Self {
            endpoint: endpoint.into(),
            channel,
        }
    }

    /// Creates a source whose channel connects on first use.
    pub fn lazy(endpoint: &str) -> Result<Self> {
        let channel = Endpoint::from_shared(endpoint.to_string())
            .map_err(|e| Error::InvalidArgument(format!("invalid endpoint {endpoint}: {e}")))?
            .connect_lazy();
        Ok(Self::new(endpoint, channel))
    }

    pub async fn connect(endpoint: &str) -> Result<Self> {
        let channel = Endpoint::from_shared(endpoint.to_string())
            .map_err(|e| Error::InvalidArgument(format!("invalid endpoint {endpoint}: {e}")))?
            .connect()
            .await
            .map_err(|e| Error::Unavailable(format!("connecting to {endpoint}: {e}")))?;
        Ok(Self::new(endpoint, channel))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The channel, for invoking methods on the same server.
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }
}

impl fmt::Debug for ReflectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReflectionSource")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[async_trait]
impl SchemaSource for ReflectionSource {
    fn cache_key(&self) -> String {
        format!("reflection:{}", self.endpoint)
    }

    async fn fetch(&self) -> Result<SchemaData> {
        let data = ReflectionClient::new(self.channel.clone()).resolve().await?;
        info!(
            endpoint = %self.endpoint,
            services = data.service_set.len(),
            files = data.files.len(),
            "fetched schema via reflection"
        );
        Ok(data)
    }
}

// ── Descriptor-set bundles ──

/// One `path:service1,service2` bundle entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleConfig {
    pub path: PathBuf,
    pub services: Vec<String>,
}

impl FromStr for BundleConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || {
            Error::InvalidArgument(format!(
                "invalid file descriptor set config {s:?}: expected format 'filepath:service1,service2'"
            ))
        };
        let (path, services) = s.split_once(':').ok_or_else(invalid)?;
        let services: Vec<String> = services
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        if path.is_empty() || services.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            path: PathBuf::from(path),
            services,
        })
    }
}

impl fmt::Display for BundleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path.display(), self.services.join(","))
    }
}

/// Serves descriptors from one or more serialized `FileDescriptorSet` files.
#[derive(Debug, Clone)]
pub struct DescriptorSetSource {
    bundles: Vec<BundleConfig>,
}

impl DescriptorSetSource {
    pub fn new(bundles: Vec<BundleConfig>) -> Self {
        Self { bundles }
    }

    pub fn parse<S: AsRef<str>>(configs: &[S]) -> Result<Self> {
        let bundles = configs
            .iter()
            .map(|config| config.as_ref().parse())
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(bundles))
    }

    pub fn bundles(&self) -> &[BundleConfig] {
        &self.bundles
    }
}

#[async_trait]
impl SchemaSource for DescriptorSetSource {
    fn cache_key(&self) -> String {
        let entries: Vec<String> = self.bundles.iter().map(ToString::to_string).collect();
        format!("descriptor-set:{}", entries.join(";"))
    }

    async fn fetch(&self) -> Result<SchemaData> {
        let mut data = SchemaData::default();
        for bundle in &self.bundles {
            let bytes = tokio::fs::read(&bundle.path).await.map_err(|e| {
                Error::Internal(format!(
                    "reading file descriptor set file {}: {e}",
                    bundle.path.display()
                ))
            })?;
            let loaded = SchemaData::from_descriptor_set(&bytes, bundle.services.clone()).map_err(|e| {
                Error::Internal(format!(
                    "parsing file descriptor set file {}: {e}",
                    bundle.path.display()
                ))
            })?;
            debug!(path = %bundle.path.display(), files = loaded.files.len(), "loaded descriptor set");
            data.merge(loaded);
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn parses_bundle_config() {
        let config: BundleConfig = "api/fds.bin:a.v1.A, b.v1.B".parse().unwrap();
        assert_eq!(config.path, PathBuf::from("api/fds.bin"));
        assert_eq!(config.services, ["a.v1.A", "b.v1.B"]);
        assert_eq!(config.to_string(), "api/fds.bin:a.v1.A,b.v1.B");
    }

    #[test]
    fn rejects_bundle_config_without_services() {
        for bad in ["api/fds.bin", "api/fds.bin:", ":a.v1.A"] {
            let err = bad.parse::<BundleConfig>().unwrap_err();
            assert_eq!(err.code(), tonic::Code::InvalidArgument, "{bad}");
        }
    }

    #[test]
    fn merge_drops_duplicate_files_and_services() {
        let mut data = testing::library_data();
        let count = data.files.len();
        data.merge(testing::library_data());
        assert_eq!(data.files.len(), count);
        assert_eq!(data.service_set.len(), 2);
    }

    #[tokio::test]
    async fn loads_and_merges_bundles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.bin");
        std::fs::write(&path, testing::library_descriptor_set_bytes()).unwrap();

        let source = DescriptorSetSource::parse(&[
            format!("{}:{}", path.display(), testing::LIBRARY_SERVICE),
            format!("{}:{}", path.display(), testing::SHELF_SERVICE),
        ])
        .unwrap();
        let data = source.fetch().await.unwrap();
        assert_eq!(data.files.len(), testing::library_files().len());
        assert_eq!(data.service_set, [testing::LIBRARY_SERVICE, testing::SHELF_SERVICE]);
        assert!(source.cache_key().starts_with("descriptor-set:"));
    }

    #[tokio::test]
    async fn missing_bundle_file_is_an_error() {
        let source = DescriptorSetSource::parse(&["/nonexistent/fds.bin:a.v1.A"]).unwrap();
        let err = source.fetch().await.unwrap_err();
        assert!(err.to_string().contains("/nonexistent/fds.bin"));
    }
}
