//! Transports between a [`LiveClient`](crate::LiveClient) and a
//! [`LiveServer`].

use crate::error::{SdkError, SdkResult};
use crate::server::LiveServer;
use async_trait::async_trait;
use lgql_runtime::{DataMessage, Request, Response};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Stops the server side of a live channel.
#[async_trait]
pub trait ChannelControl: Send + Sync {
    /// Stops the publication. Idempotent.
    async fn stop(&self);
}

/// A live channel: frames of data messages from one publication.
pub struct Channel {
    frames: mpsc::UnboundedReceiver<Vec<DataMessage>>,
    control: Arc<dyn ChannelControl>,
}

impl Channel {
    pub fn new(
        frames: mpsc::UnboundedReceiver<Vec<DataMessage>>,
        control: Arc<dyn ChannelControl>,
    ) -> Self {
        Self { frames, control }
    }

    /// Receives the next frame. `None` once the server side is gone.
    pub async fn next(&mut self) -> Option<Vec<DataMessage>> {
        self.frames.recv().await
    }

    pub async fn stop(&self) {
        self.control.stop().await;
    }

    pub fn control(&self) -> Arc<dyn ChannelControl> {
        Arc::clone(&self.control)
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        let control = Arc::clone(&self.control);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move { control.stop().await });
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").finish_non_exhaustive()
    }
}

/// How a client reaches a server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// One request, one response.
    async fn call(&self, endpoint: &str, request: Request) -> SdkResult<Response>;

    /// Opens a live channel for a request.
    async fn subscribe(&self, endpoint: &str, request: Request) -> SdkResult<Channel>;
}

/// A transport that calls a server in the same process.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    server: Arc<LiveServer>,
}

impl LocalTransport {
    pub fn new(server: Arc<LiveServer>) -> Self {
        Self { server }
    }

    fn check(&self, endpoint: &str) -> SdkResult<()> {
        if endpoint == self.server.config().endpoint {
            Ok(())
        } else {
            Err(SdkError::endpoint_not_found(endpoint))
        }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn call(&self, endpoint: &str, request: Request) -> SdkResult<Response> {
        self.check(endpoint)?;
        Ok(self.server.query(&request).await)
    }

    async fn subscribe(&self, endpoint: &str, request: Request) -> SdkResult<Channel> {
        self.check(endpoint)?;
        Ok(self.server.publish(&request).await)
    }
}
