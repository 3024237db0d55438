//! Out-of-band streamed reader parameters.
//!
//! A caller passes a byte stream as an RPC argument by sending only a fresh
//! identifier in the envelope and POSTing the bytes to `{base}/{identifier}`.
//! The call's decode step and the POST handler meet in the
//! [`StreamRegistry`], whichever arrives first waiting for the other.

mod encoder;
pub use encoder::ReaderParamEncoder;

mod reader;
pub use reader::ReaderParam;

mod receive;
pub(crate) use receive::receive;

mod registry;
pub use registry::StreamRegistry;
