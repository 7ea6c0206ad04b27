//! definition of the general controller error type

use std::sync::Arc;
use core::fmt;

/**
    general object reporting a failure of the controller or of the underlying fieldbus master

    The variants follow the places a failure can originate from, so the caller knows whether
    retrying, reconfiguring, or giving up is appropriate.
*/
#[derive(Clone, Debug)]
pub enum ControllerError {
    /// master/domain acquisition, activation, or process-image retrieval failed
    ///
    /// these errors leave the controller unusable, the whole bootstrap has to be restarted
    Init(&'static str),

    /// PDO programming, domain registration, or network-information interpretation failed
    ///
    /// these errors can generally be fixed by correcting the ENI file or the adapter set
    Config(String),

    /// invalid argument from the caller (null handle, bad axis index, zero cycle period)
    Param(&'static str),

    /// transient failure inside a well-formed operation
    ///
    /// these errors are recorded and the operation is retried at the next cycle
    Runtime(&'static str),

    /// error caused by the io layer (ENI file not openable or truncated)
    ///
    /// these errors are exterior to this library
    Io(Arc<std::io::Error>),
}

/// convenient alias to simplify return annotations
pub type ControllerResult<T=()> = core::result::Result<T, ControllerError>;

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init(msg) => write!(f, "init: {}", msg),
            Self::Config(msg) => write!(f, "config: {}", msg),
            Self::Param(msg) => write!(f, "param: {}", msg),
            Self::Runtime(msg) => write!(f, "runtime: {}", msg),
            Self::Io(err) => write!(f, "io: {}", err),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<std::io::Error> for ControllerError {
    fn from(src: std::io::Error) -> Self {
        ControllerError::Io(Arc::new(src))
    }
}
