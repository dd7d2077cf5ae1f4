/*!
    CiA-402 drive profile: statusword and controlword, the device state machine, and the transition sequences that bring a drive to operation.

    The state machine is implemented by the drive itself, the master only requests transitions with controlword commands and observes the result in the statusword. This module provides

    - [StatusWord] and [ControlWord] bit structures
    - [DeviceState] decoded from the statusword, and the legal transition graph [DeviceState::apply]
    - [Transition] constants, pairing a command with the statusword it should lead to
    - the [Port] trait over which [enable], [clear_fault] and [wait_status] are written once for both dictionary (SDO) and process data (PDO) access
*/

use crate::{
    error::{DriveError, DriveResult, Stage},
    config::Timeouts,
    };
use bilge::prelude::*;
use core::{fmt, time::Duration};
use tokio::time::Instant;


/**
bit structure of a status word

| Bit |  Meaning | Presence |
|-----|----------|----------|
| 0	| Ready to switch on	| M
| 1	| Switched on	| M
| 2	| Operation enabled	| M
| 3	| Fault	| M
| 4	| Voltage enabled	| O
| 5	| Quick stop	| O
| 6	| Switch on disabled	| M
| 7	| Warning	| O
| 8	| Manufacturer specific	| O
| 9	| Remote	| O
| 10	| Target reached	| O
| 11	| Internal limit active	| C
| 12	| Operation mode specific (set-point acknowledge, homing attained)	| O
| 13	| Operation mode specific (following error, homing error)	| O
| 14-15	| Manufacturer specific	| O
*/
#[bitsize(16)]
#[derive(FromBits, DebugBits, Copy, Clone, Eq, PartialEq, Default)]
pub struct StatusWord {
    pub ready_switch_on: bool,
    pub switched_on: bool,
    pub operation_enabled: bool,
    pub fault: bool,
    pub voltage_enabled: bool,
    pub quick_stop: bool,
    pub switch_on_disabled: bool,
    pub warning: bool,
    pub manufacturer_low: bool,
    pub remote: bool,
    pub target_reached: bool,
    pub limit_active: bool,
    pub specific_12: bool,
    pub specific_13: bool,
    pub manufacturer_high: u2,
}
crate::data::bilge_pdudata!(StatusWord, u16);

impl StatusWord {
    /// in profile position mode, the drive acknowledges a new set-point
    pub fn setpoint_acknowledge(&self) -> bool  {self.specific_12()}
    /// in homing mode, the homing procedure completed
    pub fn homing_attained(&self) -> bool  {self.specific_12()}
    /// in homing mode, the homing procedure failed
    pub fn homing_error(&self) -> bool  {self.specific_13()}
}

impl fmt::Display for StatusWord {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "StatusWord{{")?;
		for (active, mark) in [ (self.ready_switch_on(), "rtso"),
								(self.switched_on(), "so"),
								(self.operation_enabled(), "oe"),
								(self.fault(), "f"),
								(self.voltage_enabled(), "ve"),
								(self.quick_stop(), "qs"),
								(self.switch_on_disabled(), "sod"),
								(self.warning(), "w"),
								(self.remote(), "r"),
								(self.target_reached(), "tr"),
								(self.limit_active(), "la"),
								] {
			write!(f, " ")?;
			if active {
				write!(f, "{}", mark)?;
			} else {
				for _ in 0 .. mark.len() {write!(f, " ")?;}
			}
		}
		write!(f, "}}")?;
		Ok(())
	}
}

/**
Control word of a servo drive

| Bit	|	Category	|   Meaning	|
|-------|---------------|-----------|
| 0	|	M	|	Switch on |
| 1	|	M	|	Enable voltage |
| 2	|	O	|	Quick stop |
| 3	|	M	|	Enable operation |
| 4	|	O	|	Operation mode specific (new set-point, homing start) |
| 5	|	O	|	Operation mode specific (change set immediately) |
| 6	|	O	|	Operation mode specific (absolute/relative) |
| 7	|	M	|	Fault reset |
| 8	|	O	|	Halt |
| 9	|	O	|	Operation mode specific |
| 10	|	O	|	reserved |
| 11 – 15	|	O	|	Manufacturer specific |
*/
#[bitsize(16)]
#[derive(FromBits, DebugBits, Copy, Clone, Eq, PartialEq, Default)]
pub struct ControlWord {
    pub switch_on: bool,
    pub enable_voltage: bool,
    pub quick_stop: bool,
    pub enable_operation: bool,
    pub new_setpoint: bool,
    pub change_immediately: bool,
    pub relative: bool,
    pub reset_fault: bool,
    pub halt: bool,
    pub specific: bool,
    reserved: u1,
    pub manufacturer: u5,
}
crate::data::bilge_pdudata!(ControlWord, u16);

impl fmt::Display for ControlWord {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "ControlWord{{") ?;
		for (active, mark) in [ (self.switch_on(), "so"),
								(self.enable_voltage(), "ev"),
								(self.quick_stop(), "qs"),
								(self.enable_operation(), "eo"),
								(self.new_setpoint(), "ns"),
								(self.reset_fault(), "rf"),
								(self.halt(), "h"),
								] {
			write!(f, " ")?;
			if active {
				write!(f, "{}", mark)?;
			} else {
				for _ in 0 .. mark.len() {write!(f, " ")?;}
			}
		}
		write!(f, "}}")?;
		Ok(())
	}
}


/// servodrive control-loop type, as written in object `0x6060`
#[repr(i8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum OperationMode {
    #[default]
	Off = 0,
	ProfilePosition = 1,
	Velocity = 2,
	ProfileVelocity = 3,
	ProfileTorque = 4,
	Homing = 6,
	InterpolatedPosition = 7,
	/// CSP
	SynchronousPosition = 8,
	/// CSV
	SynchronousVelocity = 9,
	/// CST
	SynchronousTorque = 10,
}
impl OperationMode {
    pub fn code(self) -> i8  {self as i8}
}
impl TryFrom<i8> for OperationMode {
    type Error = DriveError;
    fn try_from(code: i8) -> DriveResult<Self> {
        Ok(match code {
            0 => Self::Off,
            1 => Self::ProfilePosition,
            2 => Self::Velocity,
            3 => Self::ProfileVelocity,
            4 => Self::ProfileTorque,
            6 => Self::Homing,
            7 => Self::InterpolatedPosition,
            8 => Self::SynchronousPosition,
            9 => Self::SynchronousVelocity,
            10 => Self::SynchronousTorque,
            _ => return Err(DriveError::Configuration(format!("unsupported operation mode {}", code))),
        })
    }
}


/**
    state of the CiA-402 state machine of a drive, as decoded from its statusword

    [Self::Unknown] keeps the raw statusword of any pattern that matches no state
*/
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DeviceState {
    NotReadyToSwitchOn,
    SwitchOnDisabled,
    ReadyToSwitchOn,
    SwitchedOn,
    OperationEnabled,
    QuickStopActive,
    FaultReactionActive,
    Fault,
    Unknown(u16),
}
impl DeviceState {
    /// decode the state from a raw statusword, other bits than the state bits are ignored
    pub fn decode(status: u16) -> Self {
        match status & 0x004f {
            0x0000 => return Self::NotReadyToSwitchOn,
            0x0040 => return Self::SwitchOnDisabled,
            0x000f => return Self::FaultReactionActive,
            0x0008 => return Self::Fault,
            _ => {},
        }
        match status & 0x006f {
            0x0021 => Self::ReadyToSwitchOn,
            0x0023 => Self::SwitchedOn,
            0x0027 => Self::OperationEnabled,
            0x0007 => Self::QuickStopActive,
            _ => Self::Unknown(status),
        }
    }
    /// canonical statusword of this state, with all bits outside the state bits cleared
    pub fn bits(self) -> u16 {
        match self {
            Self::NotReadyToSwitchOn => 0x0000,
            Self::SwitchOnDisabled => 0x0040,
            Self::ReadyToSwitchOn => 0x0021,
            Self::SwitchedOn => 0x0023,
            Self::OperationEnabled => 0x0027,
            Self::QuickStopActive => 0x0007,
            Self::FaultReactionActive => 0x000f,
            Self::Fault => 0x0008,
            Self::Unknown(status) => status,
        }
    }
    /// true in both fault states
    pub fn is_fault(self) -> bool {
        matches!(self, Self::Fault | Self::FaultReactionActive)
    }

    /**
        state reached when the given command is received in this state, or `None` if the command is not allowed here

        Commands that leave the state unchanged (like enabling operation when already enabled) are allowed.
        The automatic transitions `NotReadyToSwitchOn -> SwitchOnDisabled` and `FaultReactionActive -> Fault` happen whatever the command.
    */
    pub fn apply(self, command: Command) -> Option<Self> {
        use {DeviceState::*, Command::*};
        match (self, command) {
            (NotReadyToSwitchOn, _) => Some(SwitchOnDisabled),
            (FaultReactionActive, _) => Some(Fault),

            (SwitchOnDisabled, Shutdown) => Some(ReadyToSwitchOn),
            (SwitchOnDisabled, DisableVoltage | QuickStop) => Some(SwitchOnDisabled),

            (ReadyToSwitchOn, Shutdown) => Some(ReadyToSwitchOn),
            (ReadyToSwitchOn, SwitchOn) => Some(SwitchedOn),
            (ReadyToSwitchOn, DisableVoltage | QuickStop) => Some(SwitchOnDisabled),

            (SwitchedOn, SwitchOn | DisableOperation) => Some(SwitchedOn),
            (SwitchedOn, EnableOperation) => Some(OperationEnabled),
            (SwitchedOn, Shutdown) => Some(ReadyToSwitchOn),
            (SwitchedOn, DisableVoltage | QuickStop) => Some(SwitchOnDisabled),

            (OperationEnabled, EnableOperation) => Some(OperationEnabled),
            (OperationEnabled, SwitchOn | DisableOperation) => Some(SwitchedOn),
            (OperationEnabled, Shutdown) => Some(ReadyToSwitchOn),
            (OperationEnabled, DisableVoltage) => Some(SwitchOnDisabled),
            (OperationEnabled, QuickStop) => Some(QuickStopActive),

            (QuickStopActive, QuickStop) => Some(QuickStopActive),
            (QuickStopActive, DisableVoltage) => Some(SwitchOnDisabled),
            (QuickStopActive, EnableOperation) => Some(OperationEnabled),

            (Fault, FaultReset) => Some(SwitchOnDisabled),

            _ => None,
        }
    }
}
impl From<StatusWord> for DeviceState {
    fn from(status: StatusWord) -> Self  {Self::decode(u16::from(status))}
}
impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NotReadyToSwitchOn => write!(f, "not ready to switch on"),
            Self::SwitchOnDisabled => write!(f, "switch on disabled"),
            Self::ReadyToSwitchOn => write!(f, "ready to switch on"),
            Self::SwitchedOn => write!(f, "switched on"),
            Self::OperationEnabled => write!(f, "operation enabled"),
            Self::QuickStopActive => write!(f, "quick stop active"),
            Self::FaultReactionActive => write!(f, "fault reaction active"),
            Self::Fault => write!(f, "fault"),
            Self::Unknown(status) => write!(f, "unknown ({:#06x})", status),
        }
    }
}

/// command requested to a drive through the state bits of its controlword
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Command {
    Shutdown,
    SwitchOn,
    DisableVoltage,
    QuickStop,
    DisableOperation,
    EnableOperation,
    FaultReset,
}
impl Command {
    /// canonical controlword requesting this command
    pub fn controlword(self) -> ControlWord {
        ControlWord::from(match self {
            Self::Shutdown => 0x0006u16,
            Self::SwitchOn => 0x0007,
            Self::DisableVoltage => 0x0000,
            Self::QuickStop => 0x000b,
            Self::DisableOperation => 0x0007,
            Self::EnableOperation => 0x000f,
            Self::FaultReset => 0x0080,
        })
    }
    /**
        decode the command a controlword requests

        `SwitchOn` and `DisableOperation` share the same pattern, it is decoded as `SwitchOn` and [DeviceState::apply] gives it the meaning of the current state
    */
    pub fn decode(controlword: u16) -> Option<Self> {
        if controlword & 0x0080 != 0          {Some(Self::FaultReset)}
        else if controlword & 0x0087 == 0x0006 {Some(Self::Shutdown)}
        else if controlword & 0x008f == 0x0007 {Some(Self::SwitchOn)}
        else if controlword & 0x008f == 0x000f {Some(Self::EnableOperation)}
        else if controlword & 0x0082 == 0x0000 {Some(Self::DisableVoltage)}
        else if controlword & 0x0086 == 0x0002 {Some(Self::QuickStop)}
        else {None}
    }
}

/// controlword command and the masked statusword it must lead to
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Transition {
    pub stage: Stage,
    pub controlword: u16,
    pub mask: u16,
    pub expected: u16,
}
impl Transition {
    pub const FAULT_RESET: Self = Self {stage: Stage::FaultReset, controlword: 0x0080, mask: 0x0008, expected: 0x0000};
    pub const SHUTDOWN: Self = Self {stage: Stage::Shutdown, controlword: 0x0006, mask: 0x006f, expected: 0x0021};
    pub const SWITCH_ON: Self = Self {stage: Stage::SwitchOn, controlword: 0x0007, mask: 0x006f, expected: 0x0023};
    pub const ENABLE_OPERATION: Self = Self {stage: Stage::EnableOperation, controlword: 0x000f, mask: 0x006f, expected: 0x0027};
    pub const QUICK_STOP: Self = Self {stage: Stage::QuickStop, controlword: 0x000b, mask: 0x006f, expected: 0x0007};

    /// true if the statusword shows this transition completed
    pub fn reached(&self, status: StatusWord) -> bool {
        u16::from(status) & self.mask == self.expected
    }
}

/// controlwords toggling the new set-point bit in profile position mode: raised with immediate change, then released
pub const NEW_SETPOINT: [u16; 2] = [0x003f, 0x001f];


/// last known state of a drive on the master side, and the command it is given
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DriveState {
    /// last statusword received
    pub status: StatusWord,
    /// controlword to send
    pub controlword: ControlWord,
    /// raw target value, its meaning and unit depend on the operation mode
    pub target: i32,
    /// last actual velocity received, in counts/s
    pub velocity: i32,
    mode: OperationMode,
}
impl DriveState {
    pub fn new(mode: OperationMode) -> Self {
        Self {mode, .. Default::default()}
    }
    /// state decoded from the last statusword
    pub fn state(&self) -> DeviceState  {DeviceState::from(self.status)}
    pub fn mode(&self) -> OperationMode  {self.mode}
    /// change the operation mode that will be requested to the drive, returning the previous one
    pub fn set_mode(&mut self, mode: OperationMode) -> OperationMode {
        if mode != self.mode
            {log::debug!("operation mode {:?} -> {:?}", self.mode, mode);}
        core::mem::replace(&mut self.mode, mode)
    }
}


/**
    access to the controlword and statusword of one drive

    It is implemented over dictionary access ([crate::drive::Drive]) for setup operations and over the process data ([crate::cyclic]) once the network is operational, so the transition sequences below are shared by both.
*/
#[allow(async_fn_in_trait)]
pub trait Port {
    /// request a controlword
    async fn command(&mut self, controlword: ControlWord) -> DriveResult<()>;
    /// read the current statusword
    async fn status(&mut self) -> DriveResult<StatusWord>;
}

/**
    poll the statusword until it matches the transition's expected pattern

    The statusword is read immediately, then every `poll` until `timeout` elapsed. A timeout reports the last statusword read.
*/
pub async fn wait_status<P: Port>(port: &mut P, transition: &Transition, timeout: Duration, poll: Duration) -> DriveResult<StatusWord> {
    let deadline = Instant::now() + timeout;
    loop {
        let status = port.status().await?;
        if transition.reached(status)
            {return Ok(status)}
        let now = Instant::now();
        if now >= deadline {
            return Err(DriveError::TransitionTimeout {
                stage: transition.stage,
                mask: transition.mask,
                expected: transition.expected,
                last: u16::from(status),
                });
        }
        tokio::time::sleep(poll.min(deadline - now)).await;
    }
}

/// send the transition's command and wait for the drive to reach it
pub async fn transit<P: Port>(port: &mut P, transition: &Transition, timeouts: &Timeouts) -> DriveResult<StatusWord> {
    log::debug!("{:?}: controlword {:#06x}", transition.stage, transition.controlword);
    port.command(ControlWord::from(transition.controlword)).await?;
    wait_status(port, transition, timeouts.transition, timeouts.poll).await
}

/**
    clear a fault on the drive, if any

    When the fault bit is set, the fault reset command is sent once per attempt, waiting `fault_reset_interval` before checking the fault bit again. There is at most `fault_reset_attempts` commands sent.
*/
pub async fn clear_fault<P: Port>(port: &mut P, timeouts: &Timeouts) -> DriveResult<StatusWord> {
    let transition = Transition::FAULT_RESET;
    let mut status = port.status().await?;
    if transition.reached(status)
        {return Ok(status)}

    log::warn!("drive in fault ({}), resetting", DeviceState::from(status));
    for _ in 0 .. timeouts.fault_reset_attempts {
        port.command(ControlWord::from(transition.controlword)).await?;
        tokio::time::sleep(timeouts.fault_reset_interval).await;
        status = port.status().await?;
        if transition.reached(status) {
            log::info!("fault cleared");
            return Ok(status);
        }
    }
    Err(DriveError::FaultNotCleared {
        attempts: timeouts.fault_reset_attempts,
        last: u16::from(status),
        })
}

/**
    bring a drive to [DeviceState::OperationEnabled]

    The fault is cleared first, then the drive goes through shutdown, switch on and enable operation, each stage waiting for its statusword. A failure reports the stage that did not complete.
*/
pub async fn enable<P: Port>(port: &mut P, timeouts: &Timeouts) -> DriveResult<StatusWord> {
    clear_fault(port, timeouts).await?;
    transit(port, &Transition::SHUTDOWN, timeouts).await?;
    transit(port, &Transition::SWITCH_ON, timeouts).await?;
    let status = transit(port, &Transition::ENABLE_OPERATION, timeouts).await?;
    log::info!("drive enabled");
    Ok(status)
}
