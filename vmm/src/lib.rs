//! Per-request execution pipeline: stage caller files into a private rootfs,
//! boot a fresh Firecracker microVM around the command, collect the guest's
//! exit record over the agent channel, and tear everything down.

mod api;
mod channel;
mod error;
mod executor;
mod hypervisor;
mod stage;

pub use error::VmmError;
pub use executor::{Executor, VmConfig};
pub use hypervisor::{boot_args, BootConfig, Hypervisor, VmState};
