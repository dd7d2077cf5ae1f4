use core::time::Duration;
use etherdrive::{
    cia402::{self, Port, StatusWord, ControlWord, DeviceState, Command, Transition},
    config::Timeouts,
    error::{DriveError, DriveResult, Stage},
    };
use tokio::time::Instant;

/// drive answering immediately through the state graph
struct FakeDrive {
    state: DeviceState,
    frozen: bool,
    latched: bool,
    writes: Vec<u16>,
}
impl FakeDrive {
    fn new(state: DeviceState) -> Self {
        Self {state, frozen: false, latched: false, writes: Vec::new()}
    }
}
impl Port for FakeDrive {
    async fn command(&mut self, controlword: ControlWord) -> DriveResult<()> {
        let controlword = u16::from(controlword);
        self.writes.push(controlword);
        if self.frozen
            {return Ok(())}
        match Command::decode(controlword) {
            Some(Command::FaultReset) if self.latched => {},
            Some(command) => if let Some(next) = self.state.apply(command) {self.state = next},
            None => {},
        }
        Ok(())
    }
    async fn status(&mut self) -> DriveResult<StatusWord> {
        Ok(StatusWord::from(self.state.bits() | 0x0200))
    }
}

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const STATES: [DeviceState; 8] = [
    DeviceState::NotReadyToSwitchOn,
    DeviceState::SwitchOnDisabled,
    DeviceState::ReadyToSwitchOn,
    DeviceState::SwitchedOn,
    DeviceState::OperationEnabled,
    DeviceState::QuickStopActive,
    DeviceState::FaultReactionActive,
    DeviceState::Fault,
    ];

#[test]
fn decode_canonical_statuswords() {
    for state in STATES {
        assert_eq!(DeviceState::decode(state.bits()), state);
    }
    assert_eq!(DeviceState::decode(0x0237), DeviceState::OperationEnabled);
    assert_eq!(DeviceState::decode(0x0250), DeviceState::SwitchOnDisabled);
    assert_eq!(DeviceState::decode(0x1631), DeviceState::ReadyToSwitchOn);
    assert_eq!(DeviceState::decode(0x0218), DeviceState::Fault);
    assert_eq!(DeviceState::decode(0x0001), DeviceState::Unknown(0x0001));
}

#[test]
fn decode_is_total() {
    for raw in 0 ..= u16::MAX {
        match DeviceState::decode(raw) {
            DeviceState::Unknown(kept) => assert_eq!(kept, raw),
            state => assert_eq!(DeviceState::decode(state.bits()), state, "statusword {:#06x}", raw),
        }
    }
}

#[test]
fn statusword_bits() {
    assert_eq!(u16::from(StatusWord::from(0xffff)), 0xffff);
    let status = StatusWord::from(0x1237);
    assert!(status.operation_enabled());
    assert!(status.remote());
    assert!(status.setpoint_acknowledge());
    assert!(! status.homing_error());
    assert!(! status.fault());
    assert_eq!(u16::from(ControlWord::from(0xffff)), 0xffff);
    assert!(ControlWord::from(0x001f).new_setpoint());
}

#[test]
fn decode_commands() {
    assert_eq!(Command::decode(0x0006), Some(Command::Shutdown));
    assert_eq!(Command::decode(0x0007), Some(Command::SwitchOn));
    assert_eq!(Command::decode(0x000f), Some(Command::EnableOperation));
    assert_eq!(Command::decode(0x001f), Some(Command::EnableOperation));
    assert_eq!(Command::decode(0x003f), Some(Command::EnableOperation));
    assert_eq!(Command::decode(0x000b), Some(Command::QuickStop));
    assert_eq!(Command::decode(0x0002), Some(Command::QuickStop));
    assert_eq!(Command::decode(0x0000), Some(Command::DisableVoltage));
    assert_eq!(Command::decode(0x0080), Some(Command::FaultReset));

    for command in [Command::Shutdown, Command::SwitchOn, Command::DisableVoltage, Command::QuickStop, Command::EnableOperation, Command::FaultReset] {
        assert_eq!(Command::decode(u16::from(command.controlword())), Some(command));
    }
    assert_eq!(Command::decode(u16::from(Command::DisableOperation.controlword())), Some(Command::SwitchOn));
}

#[test]
fn transition_graph() {
    use DeviceState::*;
    assert_eq!(NotReadyToSwitchOn.apply(Command::Shutdown), Some(SwitchOnDisabled));
    assert_eq!(FaultReactionActive.apply(Command::EnableOperation), Some(Fault));
    assert_eq!(SwitchOnDisabled.apply(Command::Shutdown), Some(ReadyToSwitchOn));
    assert_eq!(SwitchOnDisabled.apply(Command::EnableOperation), None);
    assert_eq!(ReadyToSwitchOn.apply(Command::SwitchOn), Some(SwitchedOn));
    assert_eq!(SwitchedOn.apply(Command::EnableOperation), Some(OperationEnabled));
    assert_eq!(OperationEnabled.apply(Command::DisableOperation), Some(SwitchedOn));
    assert_eq!(OperationEnabled.apply(Command::Shutdown), Some(ReadyToSwitchOn));
    assert_eq!(OperationEnabled.apply(Command::QuickStop), Some(QuickStopActive));
    assert_eq!(QuickStopActive.apply(Command::EnableOperation), Some(OperationEnabled));
    assert_eq!(QuickStopActive.apply(Command::DisableVoltage), Some(SwitchOnDisabled));
    assert_eq!(QuickStopActive.apply(Command::Shutdown), None);
    assert_eq!(Fault.apply(Command::Shutdown), None);
    assert_eq!(Fault.apply(Command::FaultReset), Some(SwitchOnDisabled));
}

#[test]
fn transitions_table() {
    assert_eq!(Transition::SHUTDOWN.controlword, 0x0006);
    assert!(Transition::SHUTDOWN.reached(StatusWord::from(0x0231)));
    assert!(! Transition::SHUTDOWN.reached(StatusWord::from(0x0233)));
    assert!(Transition::ENABLE_OPERATION.reached(StatusWord::from(0x1237)));
    assert!(Transition::FAULT_RESET.reached(StatusWord::from(0x0240)));
    assert!(! Transition::FAULT_RESET.reached(StatusWord::from(0x0208)));
    assert_eq!(cia402::NEW_SETPOINT, [0x003f, 0x001f]);
}

#[tokio::test]
async fn enable_from_switch_on_disabled() {
    init();
    let mut drive = FakeDrive::new(DeviceState::SwitchOnDisabled);
    let status = cia402::enable(&mut drive, &Timeouts::default()).await.unwrap();
    assert_eq!(DeviceState::from(status), DeviceState::OperationEnabled);
    assert_eq!(drive.writes, [0x0006, 0x0007, 0x000f]);
}

#[tokio::test]
async fn enable_resets_fault_first() {
    init();
    let mut drive = FakeDrive::new(DeviceState::Fault);
    cia402::enable(&mut drive, &Timeouts::default()).await.unwrap();
    assert_eq!(drive.state, DeviceState::OperationEnabled);
    assert_eq!(drive.writes, [0x0080, 0x0006, 0x0007, 0x000f]);
}

#[tokio::test]
async fn latched_fault_is_not_cleared() {
    init();
    let mut drive = FakeDrive::new(DeviceState::Fault);
    drive.latched = true;
    let timeouts = Timeouts {
        fault_reset_attempts: 5,
        fault_reset_interval: Duration::from_millis(1),
        .. Default::default()
        };
    match cia402::enable(&mut drive, &timeouts).await {
        Err(DriveError::FaultNotCleared {attempts, last}) => {
            assert_eq!(attempts, 5);
            assert_eq!(DeviceState::decode(last), DeviceState::Fault);
        },
        other => panic!("unexpected {:?}", other),
    }
    // never more reset commands than attempts, and never a shutdown
    assert_eq!(drive.writes, [0x0080; 5]);
}

#[tokio::test]
async fn frozen_drive_times_out() {
    init();
    let mut drive = FakeDrive::new(DeviceState::SwitchOnDisabled);
    drive.frozen = true;
    let timeouts = Timeouts {
        transition: Duration::from_millis(100),
        poll: Duration::from_millis(10),
        .. Default::default()
        };
    let start = Instant::now();
    let result = cia402::enable(&mut drive, &timeouts).await;
    let elapsed = start.elapsed();
    match result {
        Err(DriveError::TransitionTimeout {stage, mask, expected, last}) => {
            assert_eq!(stage, Stage::Shutdown);
            assert_eq!(mask, 0x006f);
            assert_eq!(expected, 0x0021);
            assert_eq!(last, 0x0240);
        },
        other => panic!("unexpected {:?}", other),
    }
    assert!(elapsed >= timeouts.transition);
    assert!(elapsed < timeouts.transition + timeouts.poll + Duration::from_millis(100), "took {:?}", elapsed);
}

#[tokio::test]
async fn wait_returns_as_soon_as_reached() {
    let mut drive = FakeDrive::new(DeviceState::ReadyToSwitchOn);
    let start = Instant::now();
    cia402::wait_status(&mut drive, &Transition::SHUTDOWN, Duration::from_secs(1), Duration::from_millis(10)).await.unwrap();
    assert!(start.elapsed() < Duration::from_millis(10));
    assert!(drive.writes.is_empty());
}

#[test]
fn recoverable_errors() {
    assert!(DriveError::TransitionTimeout {stage: Stage::SwitchOn, mask: 0x6f, expected: 0x23, last: 0x21}.is_recoverable());
    assert!(DriveError::HomingTimeout {status: 0x0237}.is_recoverable());
    assert!(! DriveError::FaultNotCleared {attempts: 3, last: 0x0208}.is_recoverable());
    assert!(! DriveError::Configuration("bad".into()).is_recoverable());
    assert!(! DriveError::HomingError {status: 0x2237}.is_recoverable());
}
