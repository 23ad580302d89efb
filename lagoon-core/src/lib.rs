//! Core types and seams shared by the lagoon cluster crates.
//!
//! This crate holds the pieces the consensus context layer is wired
//! against but does not own:
//!
//! - [`MemberId`], [`NetworkAddress`], [`MemberUri`]: member identity and addressing
//! - [`Payload`], [`Message`]: opaque values and their envelope
//! - [`PayloadCodec`], [`JsonCodec`]: payload serialization
//! - [`Executor`], [`SerialExecutor`]: where listener notifications run
//! - [`Listeners`]: ordered listener registries
//! - [`Timeouts`]: keyed protocol timeouts

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod codec;
mod executor;
mod listeners;
mod message;
mod timeouts;
mod types;

pub use codec::{CodecError, JsonCodec, PayloadCodec};
pub use executor::{Executor, InlineExecutor, SerialExecutor, Task};
pub use listeners::Listeners;
pub use message::{Message, Payload};
pub use timeouts::{InMemoryTimeouts, Timeouts};
pub use types::{
    CLUSTER_SCHEME, MemberId, MemberUri, NetworkAddress, NetworkAddressParseError, UriParseError,
};
