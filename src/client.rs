//! Client side interface to the proxmox backup server
//!
//! This library implements the client side to access the backups
//! server using https.

mod http_client;
pub use  http_client::*;

mod catar_backup_stream;
pub use catar_backup_stream::*;

mod backup_repo;
pub use backup_repo::*;
