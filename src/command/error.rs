use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("process not started")]
    ProcessNotStarted,

    #[error("process timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("io error")]
    IOError(#[source] std::io::Error),

    #[cfg(target_family = "unix")]
    #[error("system error")]
    NixError(#[source] nix::Error),
}

impl From<std::io::Error> for CommandError {
    fn from(value: std::io::Error) -> CommandError {
        CommandError::IOError(value)
    }
}

#[cfg(target_family = "unix")]
impl From<nix::errno::Errno> for CommandError {
    fn from(value: nix::errno::Errno) -> CommandError {
        CommandError::NixError(value)
    }
}
