pub mod acl;
pub mod cert;
pub mod cli;
pub mod crypt_config;
pub mod format;
pub mod fs;
pub mod io;
pub mod json;
pub mod lru_cache;
pub mod nom;
pub mod percent_encoding;
pub mod sha;
pub mod str;
pub mod sync;
pub mod sys;
pub mod ticket;
pub mod xattr;

pub mod async_lru_cache;

mod command;
pub use command::{command_output, command_output_as_string, run_command};
