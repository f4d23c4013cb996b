//! TIS Protocol Engine
//!
//! Async engine on top of [`tis_packet`]: everything between "bytes arrived"
//! and "a typed event happened", plus the request side.
//!
//! # Components
//!
//! - [`Dispatcher`]: exact-match opcode table plus an ordered chain of
//!   category handlers. Immutable once built.
//! - [`CorrelationTracker`]: pairs replies with pending requests by opcode
//!   pair and source address.
//! - [`DeviceRegistry`]: every `(subnet, device)` address seen on the bus.
//! - [`Endpoint`]: one [`Transport`] binding with its receive loop, sending
//!   and correlated requests.
//! - [`begin_discovery`] / [`enumerate_opcodes`]: the broadcast discovery
//!   and opcode enumeration drivers.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tis_engine::{stop_signal, Endpoint, EngineConfig, MemoryTransport};
//! use tis_packet::Address;
//!
//! let (transport, _peer) = MemoryTransport::pair();
//! let endpoint = Arc::new(Endpoint::new(transport, EngineConfig::default()));
//! let (stop, signal) = stop_signal();
//!
//! let rx = endpoint.clone();
//! tokio::spawn(async move { rx.run_receive_loop(signal).await });
//!
//! let light = Address::new(1, 10);
//! let reply = endpoint
//!     .request(&endpoint.identity().channel_control(light, 1, 100, 0))
//!     .await?;
//! println!("feedback after {:?}", reply.latency);
//! stop.stop();
//! ```

mod categories;
mod config;
mod correlation;
mod discovery;
mod dispatch;
mod endpoint;
mod error;
mod registry;
mod signal;
mod transport;

pub use categories::{category_handlers, standard_builder, standard_dispatcher};
pub use config::{AddressPolicy, DiscoveryConfig, EngineConfig, EnumerationConfig};
pub use correlation::{
    AddressMatch, CorrelationTracker, MatchedReply, PendingRequest, ReplyTable, RequestId,
    STANDARD_REPLY_PAIRS,
};
pub use discovery::{
    begin_discovery, enumerate_opcodes, DiscoveryHandle, DiscoveryReport, DiscoveryState,
    EnumerationHit, EnumerationReport,
};
pub use dispatch::{
    handler_fn, Dispatcher, DispatcherBuilder, DomainEvent, FnHandler, Handler, HandlerOutcome,
};
pub use endpoint::{CorrelationOptions, Endpoint, EngineEvent, InboundFrame};
pub use error::{EngineError, Result};
pub use registry::{DeviceRegistry, DiscoveredAddress, RegistryUpdate};
pub use signal::{stop_signal, StopHandle, StopSignal};
pub use transport::{Datagram, Destination, MemoryPeer, MemoryTransport, SentDatagram, Transport};
