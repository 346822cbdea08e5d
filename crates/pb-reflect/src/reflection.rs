//! A minimal `grpc.reflection.v1` client.
//!
//! One bidirectional stream is opened per resolution. Requests are answered
//! in order, so the client sends one request and waits for its response.

use std::collections::{BTreeMap, VecDeque};

use pb_core::{Error, Result};
use prost::Message as _;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::codec::{ProstCodec, Streaming};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;
use tracing::debug;

use crate::descriptor::FileDescriptorProto;
use crate::source::SchemaData;

pub const REFLECTION_SERVICE: &str = "grpc.reflection.v1.ServerReflection";
const REFLECTION_PATH: &str = "/grpc.reflection.v1.ServerReflection/ServerReflectionInfo";

// ── Wire messages ──

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerReflectionRequest {
    #[prost(string, tag = "1")]
    pub host: String,
    #[prost(oneof = "server_reflection_request::MessageRequest", tags = "3, 4, 7")]
    pub message_request: Option<server_reflection_request::MessageRequest>,
}

pub mod server_reflection_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum MessageRequest {
        #[prost(string, tag = "3")]
        FileByFilename(String),
        #[prost(string, tag = "4")]
        FileContainingSymbol(String),
        #[prost(string, tag = "7")]
        ListServices(String),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerReflectionResponse {
    #[prost(string, tag = "1")]
    pub valid_host: String,
    #[prost(oneof = "server_reflection_response::MessageResponse", tags = "4, 6, 7")]
    pub message_response: Option<server_reflection_response::MessageResponse>,
}

pub mod server_reflection_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum MessageResponse {
        #[prost(message, tag = "4")]
        FileDescriptorResponse(super::FileDescriptorResponse),
        #[prost(message, tag = "6")]
        ListServicesResponse(super::ListServiceResponse),
        #[prost(message, tag = "7")]
        ErrorResponse(super::ErrorResponse),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FileDescriptorResponse {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub file_descriptor_proto: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListServiceResponse {
    #[prost(message, repeated, tag = "1")]
    pub service: Vec<ServiceResponse>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServiceResponse {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ErrorResponse {
    #[prost(int32, tag = "1")]
    pub error_code: i32,
    #[prost(string, tag = "2")]
    pub error_message: String,
}

use server_reflection_request::MessageRequest;
use server_reflection_response::MessageResponse;

// ── Client ──

pub struct ReflectionClient {
    grpc: tonic::client::Grpc<Channel>,
}

impl ReflectionClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            grpc: tonic::client::Grpc::new(channel),
        }
    }

    /// Lists the server's services and fetches every file they need.
    ///
    /// The reflection service itself is left out of the service set.
    pub async fn resolve(&mut self) -> Result<SchemaData> {
        let mut stream = self.open(MessageRequest::ListServices(String::new())).await?;

        let services: Vec<String> = match stream.receive().await? {
            MessageResponse::ListServicesResponse(list) => list
                .service
                .into_iter()
                .map(|s| s.name)
                .filter(|name| !name.starts_with("grpc.reflection."))
                .collect(),
            other => return Err(unexpected("list services", &other)),
        };
        debug!(count = services.len(), "listed services");

        let mut files = FileCollector::default();
        for service in &services {
            let response = stream
                .request(MessageRequest::FileContainingSymbol(service.clone()))
                .await?;
            files.add(response)?;
        }
        while let Some(name) = files.next_missing() {
            let response = stream.request(MessageRequest::FileByFilename(name)).await?;
            files.add(response)?;
        }

        Ok(SchemaData {
            files: files.into_files(),
            service_set: services,
        })
    }

    async fn open(&mut self, first: MessageRequest) -> Result<ReflectionStream> {
        self.grpc
            .ready()
            .await
            .map_err(|e| Error::Unavailable(format!("reflection service not ready: {e}")))?;

        // The server answers only once it has a request, so the first one is
        // queued before the call is started.
        let (tx, rx) = mpsc::channel(4);
        tx.send(request(first))
            .await
            .map_err(|_| Error::Internal("reflection request channel closed".to_string()))?;

        let codec: ProstCodec<ServerReflectionRequest, ServerReflectionResponse> = ProstCodec::default();
        let response = self
            .grpc
            .streaming(
                tonic::Request::new(ReceiverStream::new(rx)),
                PathAndQuery::from_static(REFLECTION_PATH),
                codec,
            )
            .await
            .map_err(|status| Error::Unavailable(format!("opening reflection stream: {}", status.message())))?;

        Ok(ReflectionStream {
            tx,
            inbound: response.into_inner(),
        })
    }
}

fn request(message: MessageRequest) -> ServerReflectionRequest {
    ServerReflectionRequest {
        host: String::new(),
        message_request: Some(message),
    }
}

fn unexpected(step: &str, response: &MessageResponse) -> Error {
    match response {
        MessageResponse::ErrorResponse(e) => Error::Unavailable(format!(
            "{step}: reflection error {}: {}",
            e.error_code, e.error_message
        )),
        _ => Error::Internal(format!("{step}: unexpected reflection response")),
    }
}

struct ReflectionStream {
    tx: mpsc::Sender<ServerReflectionRequest>,
    inbound: Streaming<ServerReflectionResponse>,
}

impl ReflectionStream {
    async fn request(&mut self, message: MessageRequest) -> Result<MessageResponse> {
        self.tx
            .send(request(message))
            .await
            .map_err(|_| Error::Unavailable("reflection stream closed".to_string()))?;
        self.receive().await
    }

    async fn receive(&mut self) -> Result<MessageResponse> {
        let response = self
            .inbound
            .message()
            .await?
            .ok_or_else(|| Error::Unavailable("reflection stream ended early".to_string()))?;
        response
            .message_response
            .ok_or_else(|| Error::Internal("empty reflection response".to_string()))
    }
}

/// Deduplicates fetched files by name and tracks imports not yet seen.
#[derive(Default)]
struct FileCollector {
    files: BTreeMap<String, FileDescriptorProto>,
    order: Vec<String>,
    missing: VecDeque<String>,
}

impl FileCollector {
    fn add(&mut self, response: MessageResponse) -> Result<()> {
        let files = match response {
            MessageResponse::FileDescriptorResponse(files) => files,
            other => return Err(unexpected("fetch file descriptor", &other)),
        };
        for bytes in files.file_descriptor_proto {
            let file = FileDescriptorProto::decode(bytes.as_slice())?;
            let name = file.name().to_string();
            if self.files.contains_key(&name) {
                continue;
            }
            self.order.push(name.clone());
            self.files.insert(name, file);
        }
        Ok(())
    }

    fn next_missing(&mut self) -> Option<String> {
        let known: Vec<String> = self
            .files
            .values()
            .flat_map(|file| file.dependency.iter().cloned())
            .filter(|dep| !self.files.contains_key(dep) && !self.missing.contains(dep))
            .collect();
        self.missing.extend(known);
        self.missing.pop_front()
    }

    fn into_files(mut self) -> Vec<FileDescriptorProto> {
        self.order
            .iter()
            .filter_map(|name| self.files.remove(name))
            .collect()
    }
}
