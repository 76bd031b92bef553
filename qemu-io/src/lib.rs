// used for testing

mod util;
mod with_aio_context;

#[cfg(feature="standalone")]
mod aio_context;

pub use with_aio_context::WithAioContext;
pub use aio_context::AioContext;
