//! Storage engine core
//!
//! Layered bottom-up:
//!
//! - [`list`], [`page`], [`paged`]: the range-list capability and the paged buffer engine
//! - [`memory`], [`io`], [`transaction`]: in-memory, memory-mapped and transactional stores
//! - [`merkle`]: flat Merkle tree and the page-granular Merkle buffer decorator
//! - [`streams`]: many byte streams multiplexed over one buffer
//! - [`collection`], [`attachment`]: items mapped to streams, with indices and a durable
//!   Merkle tree kept in reserved streams

pub mod attachment;
pub mod bitmap;
pub mod buffer_pool;
pub mod collection;
pub mod error;
pub mod header;
pub mod io;
pub mod list;
pub mod memory;
pub mod merkle;
pub mod options;
pub mod page;
pub mod paged;
pub mod serializer;
pub mod stream_list;
pub mod streams;
pub mod transaction;
