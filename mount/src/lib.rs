mod error;
mod loopback;

pub use error::MountError;
pub use loopback::{loop_mount, unmount, MountGuard};
