pub(crate) mod common;

pub mod protocol;
pub mod server;
pub mod tools;

mod chunk_stream;
pub use chunk_stream::*;

mod chunker;
pub use chunker::*;

mod client;
pub use client::*;

mod connect;
pub use connect::*;

mod types;
pub use types::*;

pub mod c_chunker;
pub mod c_client;
pub mod c_connector;
