//! SSH-facing components: the host-key store (C1) and the collection worker pool (C2).

pub mod collector;
pub mod host_keys;

pub use collector::{
    clamp_workers, collect_all, Auth, CollectCommand, CollectorConfig, CollectorError, Device,
    DeviceResult, Ssh2Session, SshSession,
};
pub use host_keys::{HostKeyError, HostKeyStore, Mode as HostKeyMode, Verification};
