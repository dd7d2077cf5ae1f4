//! definition of the error types reported by drive control

use std::sync::Arc;
use crate::{
    sdo::{SdoAbortCode, SyncDirection},
    cia402::{DeviceState, Command},
    master::DeviceId,
    data::PackingError,
    };

/**
    error reported by the fieldbus master at its boundary (register access and process data exchange)

    Its variant are meant to help finding the cause responsible for the problem and how to deal with it.
    These are propagated unchanged by this crate, see [DriveError::Transport]
*/
#[derive(Clone, Debug, thiserror::Error)]
pub enum TransportError {
    /// error caused by communication support
    ///
    /// these errors are exterior to this library
    #[error("io: {0}")]
    Io(Arc<std::io::Error>),

    /// a device refused a dictionary access
    ///
    /// these errors can generally be handled and fixed by retrying the operation or reconfiguring the device
    #[error("device refused access to {index:#06x}:{sub}: {code}")]
    Abort {index: u16, sub: u8, code: SdoAbortCode},

    /// error reported by the master
    ///
    /// these errors can generally be handled and fixed by retrying the operation or using the master differently when the issue is in the user code
    #[error("master: {0}")]
    Master(&'static str),

    /// error detected by the master in the communication
    ///
    /// these errors can generally not be fixed and the whole communication has to be restarted
    #[error("protocol: {0}")]
    Protocol(&'static str),

    /// error is due to too much time elapsed, but does not compromise the communication
    ///
    /// these errors are generally contextual and the operation can be retried.
    #[error("timeout: {0}")]
    Timeout(&'static str),
}

/// convenient alias to simplify return annotations
pub type TransportResult<T=()> = core::result::Result<T, TransportError>;

impl From<std::io::Error> for TransportError {
    fn from(src: std::io::Error) -> Self {
        TransportError::Io(Arc::new(src))
    }
}
impl From<PackingError> for TransportError {
    fn from(src: PackingError) -> Self {
        TransportError::Protocol(match src {
            PackingError::BadSize(_, text) => text,
            PackingError::InvalidValue(text) => text,
        })
    }
}


/// stage of a drive state transition, used to report which one failed
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Stage {
    FaultReset,
    Shutdown,
    SwitchOn,
    EnableOperation,
    QuickStop,
}

/// reason why a PDO mapping could not be applied to a device
#[derive(Clone, Debug, thiserror::Error)]
pub enum MappingError {
    /// the mapped entries exceed the process data buffer declared by the device
    #[error("{direction:?} mapping needs {bits} bits but the device buffer holds {capacity} bits")]
    Overflow {direction: SyncDirection, bits: usize, capacity: usize},
    /// more entries than a mapping object can hold
    #[error("{direction:?} mapping object cannot hold more than {capacity} entries")]
    TooManyEntries {direction: SyncDirection, capacity: usize},
    /// entries are laid out at byte offsets, so each must be a whole number of bytes
    #[error("object {index:#06x}:{sub} has {bits} bits, not a whole number of bytes")]
    Unaligned {index: u16, sub: u8, bits: u8},
    /// the master cannot tell the process data buffer sizes of the device
    #[error("cannot get the device buffer sizes: {0}")]
    Capacity(TransportError),
    /// a mapping register write failed, the device is left for a complete retry
    #[error("writing {index:#06x}:{sub} failed: {source}")]
    Write {index: u16, sub: u8, source: TransportError},
}

/**
    every failure of drive control, as distinct and inspectable kinds

    Transitions and homing errors keep the last statusword read from the drive so the caller can decide whether to retry, reset or abort.
*/
#[derive(Clone, Debug, thiserror::Error)]
pub enum DriveError {
    /// invalid or incomplete setup data, detected before any bus activity
    #[error("configuration: {0}")]
    Configuration(String),

    /// the PDO mapping of a device could not be applied, the device must not go operational
    #[error("mapping of {device}: {error}")]
    Mapping {device: DeviceId, #[source] error: MappingError},

    /// the drive did not reach the expected masked statusword in time
    #[error("{stage:?} timed out: expected {expected:#06x} under mask {mask:#06x}, last statusword {last:#06x}")]
    TransitionTimeout {stage: Stage, mask: u16, expected: u16, last: u16},

    /// the fault bit remained set after all fault reset attempts
    #[error("fault not cleared after {attempts} attempts, last statusword {last:#06x}")]
    FaultNotCleared {attempts: u32, last: u16},

    /// the drive reported a homing error (statusword bit 13)
    #[error("homing error, statusword {status:#06x}")]
    HomingError {status: u16},

    /// homing was not attained in time
    #[error("homing timed out, statusword {status:#06x}")]
    HomingTimeout {status: u16},

    /// the command is not allowed from the drive's current state
    #[error("{command:?} is not allowed in state {from}")]
    IllegalTransition {from: DeviceState, command: Command},

    /// a drive went to fault while it was driven
    #[error("servo {servo} faulted, statusword {status:#06x}")]
    Fault {servo: String, status: u16},

    /// no servo bound with this name
    #[error("servo {0} is not configured")]
    UnknownServo(String),

    /// the operation was interrupted from outside
    #[error("interrupted")]
    Interrupted,

    /// failure at the fieldbus master boundary
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}

/// convenient alias to simplify return annotations
pub type DriveResult<T=()> = core::result::Result<T, DriveError>;

impl DriveError {
    /**
        true if the caller may retry the operation on the same drive

        timeouts and transport errors are contextual, while faults, configuration and mapping errors require a change before anything else is attempted
    */
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::TransitionTimeout {..}
            | Self::HomingTimeout {..}
            | Self::IllegalTransition {..}
            | Self::Transport(_) => true,
            _ => false,
        }
    }
}
impl From<PackingError> for DriveError {
    fn from(src: PackingError) -> Self {
        DriveError::Transport(src.into())
    }
}
