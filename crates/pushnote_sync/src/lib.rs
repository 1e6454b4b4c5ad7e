//! # Pushnote Sync Engine
//!
//! Services synchronization engine for the Pushnote client.
//!
//! This crate provides:
//! - Cursor pagination tracking
//! - The local store contract and an in-memory store
//! - The representable merge engine
//! - Event-sourced update operations producing list diffs
//! - The push connection state machine and its tokio/WebSocket driver
//! - A serial operation queue with cancellable chained operations
//! - The orchestrator tying it all together
//!
//! ## Architecture
//!
//! The orchestrator keeps one ordered list of services, mixing remote
//! snippets and local services. Every mutation of that list runs on a single
//! serial queue:
//! 1. Reconcile local services with the server (once per session)
//! 2. Page through the remote list on demand
//! 3. Apply push changes in arrival order
//!
//! Each mutation is an update operation: `(list, event) -> (list, diff)`.
//! The UI applies the diff, or reloads when the diff is absent.
//!
//! ## Key Invariants
//!
//! - No id appears twice in the list
//! - Operations run one at a time, in submission order
//! - Local services never cross the queue boundary, only their ids
//! - Persistence writes are best-effort and never abort an operation
//! - Websocket failures are recovered automatically and never surfaced

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod api;
mod changes;
mod config;
mod connection;
mod error;
mod http;
mod merge;
mod operations;
mod orchestrator;
mod pagination;
mod push;
mod queue;
mod snapshot;
mod store;
mod ws;

pub use api::{ApiRequest, MockServicesApi, ServicesApi};
pub use changes::{PartialChanges, RepresentableChanges};
pub use config::{ReconnectConfig, SyncConfig};
pub use connection::{
    ConnectionAction, ConnectionEvent, ConnectionManager, ConnectionState, DisconnectReason,
    ServerMetadata,
};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpResponse, HttpServicesApi};
pub use merge::{
    compare_services, has_unique_ids, merge_representables_and_local, merge_to_representables,
    position_of, sorted_position, MergeOutput,
};
pub use operations::{apply_event, UpdateContext, UpdateOutcome};
pub use orchestrator::{SyncOrchestrator, ViewEvent, ViewState};
pub use pagination::{PaginationState, PaginationTracker};
pub use push::{
    ChannelConnector, FrameSink, FrameStream, PushConnection, PushConnector, ServerSide,
    StaticTokenProvider, TokenProvider, TransportFrame,
};
pub use queue::{slot, CancelFlag, QueueOperation, SerialQueue, Slot};
pub use snapshot::ListSnapshot;
pub use store::{
    LocalStore, MemoryStore, ObserverToken, ServiceFilter, StoreChange, StoreOp,
};
pub use ws::WsConnector;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
