pub mod graph;
pub mod guideline;
pub mod protocol;

pub use graph::{canonical_key, ConnectionGraph, LinkCategory};
pub use guideline::{ConnectionGuideline, Connections, LinkDirection};
pub use protocol::{ConnectionProtocol, RetryPolicy};
