//! Generic unary method invocation over a tonic channel.

use std::time::Duration;

use async_trait::async_trait;
use pb_core::{Error, Result};
use prost::bytes::{Buf, BufMut};
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;
use tonic::Status;
use tracing::debug;

use crate::dynamic::DynamicMessage;
use crate::pool::MethodDescriptor;

/// Sends a request for a method and returns the decoded response.
#[async_trait]
pub trait MethodInvoker: Send + Sync {
    async fn invoke(
        &self,
        method: &MethodDescriptor,
        request: &DynamicMessage,
        timeout: Option<Duration>,
    ) -> Result<DynamicMessage>;
}

// ── Raw bytes codec ──

/// Passes already-encoded message bytes through unchanged.
#[derive(Debug, Clone, Copy, Default)]
struct BytesCodec;

impl Codec for BytesCodec {
    type Encode = Vec<u8>;
    type Decode = Vec<u8>;
    type Encoder = BytesCodec;
    type Decoder = BytesCodec;

    fn encoder(&mut self) -> Self::Encoder {
        BytesCodec
    }

    fn decoder(&mut self) -> Self::Decoder {
        BytesCodec
    }
}

impl Encoder for BytesCodec {
    type Item = Vec<u8>;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> std::result::Result<(), Self::Error> {
        dst.put_slice(&item);
        Ok(())
    }
}

impl Decoder for BytesCodec {
    type Item = Vec<u8>;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> std::result::Result<Option<Self::Item>, Self::Error> {
        let bytes = src.copy_to_bytes(src.remaining());
        Ok(Some(bytes.to_vec()))
    }
}

// ── gRPC invoker ──

#[derive(Clone)]
pub struct GrpcInvoker {
    grpc: tonic::client::Grpc<Channel>,
}

impl GrpcInvoker {
    pub fn new(channel: Channel) -> Self {
        Self {
            grpc: tonic::client::Grpc::new(channel),
        }
    }
}

#[async_trait]
impl MethodInvoker for GrpcInvoker {
    async fn invoke(
        &self,
        method: &MethodDescriptor,
        request: &DynamicMessage,
        timeout: Option<Duration>,
    ) -> Result<DynamicMessage> {
        if method.is_client_streaming() || method.is_server_streaming() {
            return Err(Error::FailedPrecondition(format!(
                "{} is a streaming method; only unary methods can be invoked",
                method.full_name()
            )));
        }
        if request.descriptor() != &method.input() {
            return Err(Error::InvalidArgument(format!(
                "request is a {}, {} expects {}",
                request.descriptor().full_name(),
                method.full_name(),
                method.input().full_name()
            )));
        }

        let path: PathAndQuery = method
            .grpc_path()
            .parse()
            .map_err(|e| Error::Internal(format!("invalid method path {}: {e}", method.grpc_path())))?;
        let mut call = tonic::Request::new(request.encode_to_vec());
        if let Some(limit) = timeout {
            call.set_timeout(limit);
        }

        let mut grpc = self.grpc.clone();
        let exchange = async move {
            grpc.ready()
                .await
                .map_err(|e| Error::Unavailable(format!("channel not ready: {e}")))?;
            grpc.unary(call, path, BytesCodec).await.map_err(Error::from)
        };
        let response = match timeout {
            Some(limit) => tokio::time::timeout(limit, exchange).await.map_err(|_| {
                Error::DeadlineExceeded(format!("{} timed out after {limit:?}", method.full_name()))
            })??,
            None => exchange.await?,
        };

        debug!(method = %method.full_name(), "invoked method");
        DynamicMessage::decode(method.output(), &response.into_inner())
    }
}
