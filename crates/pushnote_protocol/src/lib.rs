//! # Pushnote Protocol
//!
//! Data model and wire types for the Pushnote services sync engine.
//!
//! This crate provides:
//! - `ServiceId`, `Snippet`, `LocalService` and the `Representable` sum type
//! - `Notification` records owned by a service
//! - `ChangeEvent`, the typed change signal consumed by update operations
//! - Push channel frames (`ServerFrame`) and outgoing operations (`ClientOp`)
//! - REST payloads for pagination and bulk reconciliation
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod event;
mod frames;
mod notification;
mod rest;
mod service;

pub use error::{ProtocolError, ProtocolResult};
pub use event::{ChangeEvent, ServiceChangeData, ServiceChangeKind, ServicePayload};
pub use frames::{ClientOp, DisconnectCode, ReadyData, ServerFrame};
pub use notification::{Notification, NotificationLevel};
pub use rest::{chunk_summaries, encode_component, PageRequest, SyncSummary};
pub use service::{ImageSet, LocalService, Representable, ServiceId, ServiceLike, Snippet};
