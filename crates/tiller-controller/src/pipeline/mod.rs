//! Staged execution machinery: the operation context, the hierarchical
//! model write lock, remote dispatch, and the boot-time bridge.

pub mod boot;
pub mod context;
pub mod lock;
pub mod proxy;

pub use boot::{BootHandle, ScanHandle, WorkCompletion, boot_handoff};
pub use context::{OperationContext, Stage, ValueSlot};
pub use lock::{ModelLock, WriteGuard};
pub use proxy::{ChannelProxy, ProxyController, ProxyRequest, ProxyTable};
