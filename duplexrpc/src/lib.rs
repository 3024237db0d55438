#![forbid(unsafe_code)]
//! JSON-RPC 2.0 over plain HTTP and duplex WebSocket connections.
//!
//! - [`Router`] maps `Namespace.Method` names to typed handlers built with
//!   [`Methods`].
//! - [`Server`] serves unary calls, upgrades duplex connections on which it
//!   can call its clients back through a [`Peer`], and receives streamed
//!   [`ReaderParam`] arguments posted out-of-band.
//! - [`Client`] issues unary calls, opens duplex connections and encodes
//!   reader arguments.

mod error;
pub use error::{Error, ErrorKind, Result};

pub mod msg;

mod router;
pub use router::{FromParam, FromParams, Method, MethodInfo, Methods, Router};

mod waiter;
pub use waiter::{Waiter, WaiterCleaner};

mod receiver;
pub use receiver::Receiver;

mod task_supervisor;
pub use task_supervisor::TaskSupervisor;

mod context;
pub use context::{Context, Permissions};

mod state;
pub use state::{ReverseClientBuilder, State};

mod auth;
pub use auth::Verifier;

mod stream;
pub use stream::{ReaderParam, ReaderParamEncoder, StreamRegistry};

mod ws;
pub use ws::{ConnState, Peer};

mod http;

pub mod services;

mod listener;
pub use listener::Listener;

mod server;
pub use server::{Server, ServerBuilder, ServerConfig};

mod client;
pub use client::{Client, ClientConfig};
