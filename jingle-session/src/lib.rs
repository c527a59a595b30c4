//! Jingle Session Engine
//!
//! Negotiates Jingle sessions between two peers, agrees on a transport for
//! each content, falls back to the next transport when one fails and moves
//! files over the resulting byte channels.
//!
//! The engine is transport- and connection-agnostic: the IM connection is
//! reached through [`MessageSender`] and [`Discovery`], byte channels come
//! from [`TransportPlugin`]s. The [`loopback`] module wires engines together
//! in-process.

pub mod capability;
pub mod config;
pub mod content;
pub mod description;
pub mod digest;
pub mod error;
pub mod events;
pub mod file_transfer;
pub mod loopback;
pub mod messaging;
pub mod registry;
pub mod security;
pub mod session;
pub mod transfers;
pub mod transports;

pub use capability::{CapabilityRegistry, Discovery};
pub use config::{ConfigError, EngineConfig};
pub use digest::{DigestService, Sha2Digests};
pub use error::{ContentError, JingleError, TransferFailure, TransportError};
pub use events::{
    EventHub, ListenerId, Listeners, SessionEvent, TransferEvent, TransferEventKind,
    TransferOutcome,
};
pub use file_transfer::{
    FileTransferManager, IncomingFileOffer, IncomingFileRequest, OutgoingFileOffer,
    OutgoingFileRequest,
};
pub use messaging::MessageSender;
pub use registry::{
    OutgoingContent, SessionRegistry, SessionRegistryBuilder, TransferHandle,
    WeakSessionRegistry,
};
pub use security::SecurityLayer;
pub use session::{SessionKey, SessionState};
pub use transports::{ByteChannel, InBandBytestreamProvider, InBandTransport, TransportPlugin};
