pub use pbs_systemd::reload_daemon;
pub use pbs_systemd::time;
pub use pbs_systemd::{disable_unit, enable_unit, reload_unit, start_unit, stop_unit};
pub use pbs_systemd::{escape_unit, unescape_unit};

pub mod config;
pub mod types;
