//! OAO Tool Layer
//!
//! The `Tool` seam, the registry of available tools, and the interception
//! layer that gives every invocation hash-keyed idempotency across
//! retries, recoveries and replays.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod intercept;
pub mod registry;
pub mod trait_;

pub use intercept::{arg_hash, InterceptError, ToolInterceptor};
pub use registry::{RegistryError, ToolRegistry};
pub use trait_::{Tool, ToolError, ToolOutput};
