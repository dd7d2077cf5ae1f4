/*!
    Control of CiA-402 servodrives over an EtherCAT master.

    This crate sits on top of a fieldbus master (anything implementing [master::Fieldbus]) and provides

    - [mapping] to write the process data mapping of drives and locate values in their buffers
    - [cia402] the drive state machine, and the sequences enabling and resetting drives
    - [drive] acyclic control of a drive through its dictionary: enable, limits, targets, homing
    - [cyclic] the realtime loop exchanging set-points and statuses with all drives every period
    - [session] bringing the network up with every configured servo bound and mapped, and down again
    - [config] the setup describing the network and the servos

    [simulation] provides an in-memory master with simulated drives.

    Everything doing communication is `async` on `tokio`.
*/

pub mod data;
pub mod sdo;
pub mod error;
pub mod master;
pub mod cia402;
pub mod mapping;
pub mod drive;
pub mod homing;
pub mod cyclic;
pub mod config;
pub mod session;
pub mod realtime;
pub mod simulation;

pub use crate::data::{PduData, Field};
pub use crate::sdo::Sdo;
pub use crate::error::{DriveError, DriveResult, TransportError, TransportResult, MappingError, Stage};
pub use crate::master::{DeviceId, DeviceInfo, CommunicationState, RegisterAccess, ProcessData, Fieldbus};
pub use crate::cia402::{StatusWord, ControlWord, DeviceState, Command, OperationMode, Transition};
pub use crate::mapping::{ProcessDataLayout, ProcessImage};
pub use crate::drive::Drive;
pub use crate::homing::HomingOutcome;
pub use crate::cyclic::{CyclicLoop, Cycle, Interrupt, Telemetry, Exit, Summary};
pub use crate::config::{SetupConfig, ServoConfig, Limits, Homing, ServoMode, Timeouts};
pub use crate::session::{Session, ServoHandle};
