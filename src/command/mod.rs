pub mod error;
pub mod processrunner;
pub mod stream;

pub use error::CommandError;
pub use processrunner::{BoundedProcess, ProcessOutput};
pub use stream::OutputEvent;

use std::process::ExitStatus;

/// Trait for a one-shot external process invocation bounded by a wall-clock timeout.
///
/// Implemented once for every external tool Otto BGP shells out to (`bgpq4` today);
/// kept as a trait so the policy generator can be tested against a fake.
pub trait CommandExecutor {
    type Error: std::error::Error + Send + Sync;

    fn run_with_timeout(
        self,
        timeout: std::time::Duration,
    ) -> Result<ProcessOutput, Self::Error>;
}

pub trait CommandHandle {
    type Error: std::error::Error + Send + Sync;

    fn wait(self) -> Result<ExitStatus, Self::Error>;

    fn get_pid(&self) -> u32;
}
