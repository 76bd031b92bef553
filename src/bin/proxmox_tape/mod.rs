mod changer;
pub use changer::*;

mod drive;
pub use drive::*;

mod pool;
pub use pool::*;

mod media;
pub use media::*;

mod encryption_key;
pub use encryption_key::*;

mod backup_job;
pub use backup_job::*;
