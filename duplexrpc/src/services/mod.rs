//! Built-in RPC services.
//!
//! Registered with every server under the reserved `rpc` namespace:
//! - `rpc.listMethods`: introspection of the method registry.

mod meta_service;
pub use meta_service::MethodList;
pub(crate) use meta_service::register;
