//! lgql SDK
//!
//! A live server, the transports that reach it, and a client that keeps
//! live query results in sync through a local mirror.
//!
//! ```ignore
//! use lgql_sdk::{LiveClient, LiveServer, LocalTransport};
//!
//! let server = Arc::new(LiveServer::new(server_schema));
//! let client = LiveClient::new(
//!     Arc::new(LocalTransport::new(server)),
//!     client_schema,
//!     MemoryStore::new(),
//! );
//!
//! let entries = client.subscribe("{ allEntries { content } }", json!({})).await?;
//! entries.wait_ready().await?;
//! let mut updates = entries.watch();
//! while updates.changed().await.is_ok() {
//!     println!("{:?}", entries.result());
//! }
//! ```

pub mod client;
pub mod error;
pub mod mirror;
pub mod reactive;
pub mod server;
pub mod transport;

pub use client::{ClientConfig, LiveClient, Subscription, SubscriptionState};
pub use error::{ErrorCode, ResultExt, SdkError, SdkResult};
pub use mirror::{FrameOutcome, Held, Mirror};
pub use reactive::ResultCell;
pub use server::{LiveServer, ServerConfig};
pub use transport::{Channel, ChannelControl, LocalTransport, Transport};

pub use lgql_runtime::{
    Context, DataMessage, ExecutableSchema, MemoryStore, Request, Response, ResolverMap,
};
