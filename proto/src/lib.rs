//! Shared wire types for the CDP backup service: content hashes, fixed-size
//! chunking, the `FileMeta` record, and file-listing queries. Both `cdpd`
//! (server) and `cdp-monitor` (client) depend on this crate so the two
//! sides of the protocol serialize identical shapes.

pub mod chunk;
pub mod filemeta;
pub mod hash;
pub mod query;

pub use chunk::{chunk, Block, CompressionKind, DEFAULT_BLOCK_SIZE};
pub use filemeta::{FileMeta, FileType};
pub use hash::{Hash, HashDecodeError, HashEncoding};
pub use query::Query;
