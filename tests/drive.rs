use core::time::Duration;
use etherdrive::{
    cia402::DeviceState,
    config::{SetupConfig, ServoConfig, Homing, Timeouts},
    master::{DeviceId, CommunicationState},
    simulation::{SimulatedBus, SimulatedDrive, Behavior},
    session::Session,
    homing::HomingOutcome,
    error::{DriveError, MappingError},
    };
use tokio::time::Instant;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn setup(servos: Vec<ServoConfig>) -> SetupConfig {
    SetupConfig {
        description: None,
        network_interface: "sim0".into(),
        cycle_time_ms: 1,
        servos,
    }
}

async fn connect(drives: Vec<SimulatedDrive>, servos: Vec<ServoConfig>) -> Session<SimulatedBus> {
    Session::connect(SimulatedBus::new(drives), setup(servos), Timeouts::default()).await.unwrap()
}

fn le32(value: i32) -> Vec<u8>  {value.to_le_bytes().to_vec()}

#[tokio::test]
async fn connect_reaches_operational() {
    init();
    let mut session = connect(
        vec![SimulatedDrive::new(1), SimulatedDrive::new(2)],
        vec![ServoConfig::new("left", 1, 0), ServoConfig::new("right", 2, 1)],
        ).await;
    let journal = session.master().journal();

    assert!(session.is_open());
    assert_eq!(session.master().state(), CommunicationState::Operational);
    assert_eq!(session.servos().len(), 2);
    let right = session.servo("right").unwrap();
    assert_eq!(right.device(), DeviceId(1));
    assert_eq!(right.info().alias, 2);
    for drive in session.master().drives() {
        assert_eq!(drive.mapping().0.len(), 3);
        assert_eq!(drive.mapping().1.len(), 2);
    }

    session.teardown().await.unwrap();
    // a second teardown does nothing
    session.teardown().await.unwrap();
    assert!(! session.is_open());

    let journal = journal.lock().unwrap();
    assert_eq!(journal.switches, [
        CommunicationState::PreOperational,
        CommunicationState::SafeOperational,
        CommunicationState::Operational,
        CommunicationState::Init,
        ]);
    assert_eq!((journal.opens, journal.closes), (1, 1));
}

#[tokio::test]
async fn missing_servo_closes_network() {
    init();
    let bus = SimulatedBus::new([SimulatedDrive::new(1)]);
    let journal = bus.journal();
    let result = Session::connect(bus, setup(vec![ServoConfig::new("axis", 7, 0)]), Timeouts::default()).await;
    match result {
        Err(DriveError::Configuration(message)) => assert!(message.contains("axis"), "{}", message),
        Err(other) => panic!("unexpected {:?}", other),
        Ok(_) => panic!("connected without the servo"),
    }
    let journal = journal.lock().unwrap();
    assert_eq!((journal.opens, journal.closes), (1, 1));
    assert!(journal.writes.is_empty());
}

#[tokio::test]
async fn invalid_setup_never_opens() {
    init();
    let bus = SimulatedBus::new([SimulatedDrive::new(0)]);
    let journal = bus.journal();
    let servos = vec![ServoConfig::new("axis", 0, 0), ServoConfig::new("axis", 0, 1)];
    assert!(matches!(
        Session::connect(bus, setup(servos), Timeouts::default()).await,
        Err(DriveError::Configuration(_)),
        ));
    assert_eq!(journal.lock().unwrap().opens, 0);
}

#[tokio::test]
async fn mapping_overflow_closes_network() {
    init();
    let bus = SimulatedBus::new([SimulatedDrive::new(0).with_capacity(4, 4)]);
    let journal = bus.journal();
    match Session::connect(bus, setup(vec![ServoConfig::new("axis", 0, 0)]), Timeouts::default()).await {
        Err(DriveError::Mapping {device, error: MappingError::Overflow {..}}) => assert_eq!(device, DeviceId(0)),
        Err(other) => panic!("unexpected {:?}", other),
        Ok(_) => panic!("connected with an oversized mapping"),
    }
    let journal = journal.lock().unwrap();
    assert_eq!(journal.closes, 1);
    assert_eq!(journal.switches.last(), Some(&CommunicationState::Init));
}

#[tokio::test]
async fn enable_and_disable() {
    init();
    let mut session = connect(vec![SimulatedDrive::new(0)], vec![ServoConfig::new("axis", 0, 0)]).await;
    let journal = session.master().journal();

    let mut drive = session.drive("axis").unwrap();
    let status = drive.enable().await.unwrap();
    assert_eq!(DeviceState::from(status), DeviceState::OperationEnabled);
    assert_eq!(drive.state().await.unwrap(), DeviceState::OperationEnabled);
    drive.disable().await.unwrap();
    assert_eq!(drive.state().await.unwrap(), DeviceState::ReadyToSwitchOn);

    assert_eq!(journal.lock().unwrap().controlword_writes(DeviceId(0)), [0x0006, 0x0007, 0x000f, 0x0006]);
    assert!(matches!(session.drive("other"), Err(DriveError::UnknownServo(_))));
    session.teardown().await.unwrap();
}

#[tokio::test]
async fn enable_clears_fault() {
    init();
    let mut session = connect(
        vec![SimulatedDrive::new(0).in_state(DeviceState::Fault)],
        vec![ServoConfig::new("axis", 0, 0)],
        ).await;
    let journal = session.master().journal();
    session.drive("axis").unwrap().enable().await.unwrap();
    assert_eq!(journal.lock().unwrap().controlword_writes(DeviceId(0)), [0x0080, 0x0006, 0x0007, 0x000f]);
    session.teardown().await.unwrap();
}

#[tokio::test]
async fn quick_stop_needs_motion_states() {
    init();
    let mut session = connect(vec![SimulatedDrive::new(0)], vec![ServoConfig::new("axis", 0, 0)]).await;
    let journal = session.master().journal();

    let mut drive = session.drive("axis").unwrap();
    match drive.quick_stop().await {
        Err(DriveError::IllegalTransition {from, ..}) => assert_eq!(from, DeviceState::SwitchOnDisabled),
        other => panic!("unexpected {:?}", other),
    }
    assert!(journal.lock().unwrap().controlword_writes(DeviceId(0)).is_empty());

    drive.enable().await.unwrap();
    drive.quick_stop().await.unwrap();
    assert_eq!(drive.state().await.unwrap(), DeviceState::QuickStopActive);
    assert_eq!(journal.lock().unwrap().controlword_writes(DeviceId(0)).last(), Some(&0x000b));
    session.teardown().await.unwrap();
}

#[tokio::test]
async fn position_setpoint_sequence() {
    init();
    let mut servo = ServoConfig::new("axis", 0, 0);
    servo.limits.pos_min = Some(-10_000);
    servo.limits.pos_max = Some(10_000);
    let mut session = connect(vec![SimulatedDrive::new(0)], vec![servo]).await;
    let journal = session.master().journal();

    let mut drive = session.drive("axis").unwrap();
    drive.enable().await.unwrap();
    drive.set_target_position(5000).await.unwrap();
    assert_eq!(drive.servo().state().target, 5000);

    let controlwords = journal.lock().unwrap().controlword_writes(DeviceId(0));
    assert_eq!(controlwords[controlwords.len()-2 ..], [0x003f, 0x001f]);
    // the set-point bit is lowered before the next set-point is raised
    drive.set_target_position(5000).await.unwrap();
    let controlwords = journal.lock().unwrap().controlword_writes(DeviceId(0));
    assert_eq!(controlwords[controlwords.len()-5 ..], [0x003f, 0x001f, 0x000f, 0x003f, 0x001f]);

    let simulated = &session.master().drives()[0];
    assert_eq!(simulated.value(0x6060, 0), Some(&[1][..]));
    assert_eq!(simulated.value(0x607a, 0), Some(le32(5000).as_slice()));
    assert_eq!(simulated.value(0x6081, 0), Some(le32(3000).as_slice()));
    assert_eq!(simulated.value(0x607d, 1), Some(le32(-10_000).as_slice()));
    assert_eq!(simulated.value(0x607d, 2), Some(le32(10_000).as_slice()));
    session.teardown().await.unwrap();
}

#[tokio::test]
async fn position_limits_need_both_bounds() {
    init();
    let mut servo = ServoConfig::new("axis", 0, 0);
    servo.limits.pos_max = Some(10_000);
    servo.limits.max_rpm = 1200;
    let mut session = connect(vec![SimulatedDrive::new(0)], vec![servo]).await;
    let journal = session.master().journal();

    session.drive("axis").unwrap().apply_limits().await.unwrap();
    let journal = journal.lock().unwrap();
    let written: Vec<(u16, u8)> = journal.writes_to(DeviceId(0)).into_iter()
        .map(|write| (write.index, write.sub))
        .filter(|&(index, _)| index >= 0x6000)
        .collect();
    assert_eq!(written, [(0x6081, 0), (0x6083, 0), (0x6084, 0)]);
    assert_eq!(session.master().drives()[0].value(0x6081, 0), Some(le32(1200).as_slice()));
    drop(journal);
    session.teardown().await.unwrap();
}

#[tokio::test]
async fn velocity_target() {
    init();
    let mut session = connect(vec![SimulatedDrive::new(0)], vec![ServoConfig::new("axis", 0, 0)]).await;
    let mut drive = session.drive("axis").unwrap();
    drive.enable().await.unwrap();
    drive.set_target_velocity(-2000).await.unwrap();
    assert_eq!(drive.servo().state().target, -2000);
    assert_eq!(session.master().drives()[0].value(0x6060, 0), Some(&[3][..]));
    assert_eq!(session.master().drives()[0].value(0x60ff, 0), Some(le32(-2000).as_slice()));
    session.teardown().await.unwrap();
}

fn homing_servo() -> ServoConfig {
    let mut servo = ServoConfig::new("axis", 0, 0);
    servo.homing = Homing {
        method: 35,
        offset: None,
        speed_fast: Some(500),
        speed_slow: Some(100),
        accel: None,
    };
    servo
}

#[tokio::test]
async fn homing_attained() {
    init();
    let drive = SimulatedDrive::new(0).with_behavior(Behavior {homing_polls: 3, .. Default::default()});
    let mut session = connect(vec![drive], vec![homing_servo()]).await;
    let journal = session.master().journal();
    let poll = session.timeouts().poll;

    let mut drive = session.drive("axis").unwrap();
    drive.enable().await.unwrap();
    let start = Instant::now();
    assert_eq!(drive.home().await.unwrap(), HomingOutcome::Attained);
    assert!(start.elapsed() >= 3*poll);

    {
        let journal = journal.lock().unwrap();
        let written: Vec<(u16, u8, Vec<u8>)> = journal.writes_to(DeviceId(0)).into_iter()
            .map(|write| (write.index, write.sub, write.data.clone()))
            .collect();
        assert!(written.contains(&(0x6060, 0, vec![6])));
        assert!(written.contains(&(0x6098, 0, vec![35])));
        assert!(written.contains(&(0x6099, 1, 500u32.to_le_bytes().to_vec())));
        assert!(written.contains(&(0x6099, 2, 100u32.to_le_bytes().to_vec())));
        assert!(! written.iter().any(|(index, ..)| *index == 0x607c || *index == 0x609a));
        assert_eq!(journal.controlword_writes(DeviceId(0)).last(), Some(&0x001f));
    }
    session.teardown().await.unwrap();
}

#[tokio::test]
async fn homing_error_reported() {
    init();
    let drive = SimulatedDrive::new(0).with_behavior(Behavior {
        homing_polls: 2,
        homing_error: true,
        .. Default::default()
        });
    let mut session = connect(vec![drive], vec![homing_servo()]).await;
    let mut drive = session.drive("axis").unwrap();
    drive.enable().await.unwrap();
    match drive.home().await {
        Err(DriveError::HomingError {status}) => assert_ne!(status & 0x2000, 0),
        other => panic!("unexpected {:?}", other),
    }
    session.teardown().await.unwrap();
}

#[tokio::test]
async fn homing_times_out() {
    init();
    let drive = SimulatedDrive::new(0).with_behavior(Behavior {homing_polls: u32::MAX, .. Default::default()});
    let timeouts = Timeouts {homing: Duration::from_millis(60), .. Default::default()};
    let mut session = Session::connect(SimulatedBus::new([drive]), setup(vec![homing_servo()]), timeouts).await.unwrap();
    let mut drive = session.drive("axis").unwrap();
    drive.enable().await.unwrap();

    let start = Instant::now();
    let error = drive.home().await.unwrap_err();
    assert!(error.is_recoverable());
    match error {
        DriveError::HomingTimeout {status} => assert_eq!(status & 0x3000, 0),
        other => panic!("unexpected {:?}", other),
    }
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(60));
    assert!(elapsed < Duration::from_millis(500), "took {:?}", elapsed);
    session.teardown().await.unwrap();
}

#[tokio::test]
async fn scope_always_tears_down() {
    init();
    let session = connect(vec![SimulatedDrive::new(0)], vec![ServoConfig::new("axis", 0, 0)]).await;
    let journal = session.master().journal();
    use futures::FutureExt;
    let result: Result<(), DriveError> = session.scope(|session| async move {
        session.drive("axis")?.enable().await?;
        session.drive("missing")?.enable().await?;
        Ok(())
    }.boxed_local()).await;
    assert!(matches!(result, Err(DriveError::UnknownServo(name)) if name == "missing"));

    let journal = journal.lock().unwrap();
    assert_eq!(journal.closes, 1);
    assert_eq!(journal.switches.last(), Some(&CommunicationState::Init));
    assert_eq!(journal.controlword_writes(DeviceId(0)), [0x0006, 0x0007, 0x000f]);
}

#[tokio::test]
async fn scope_tears_down_on_panic() {
    init();
    let session = connect(vec![SimulatedDrive::new(0)], vec![ServoConfig::new("axis", 0, 0)]).await;
    let journal = session.master().journal();
    use futures::FutureExt;
    use std::panic::AssertUnwindSafe;
    let outcome = AssertUnwindSafe(session.scope(|session| async move {
        session.drive("axis")?.enable().await?;
        session.servo("missing").unwrap();
        Ok(())
    }.boxed_local())).catch_unwind().await;
    assert!(outcome.is_err());

    let journal = journal.lock().unwrap();
    assert_eq!(journal.closes, 1);
    assert_eq!(journal.switches.last(), Some(&CommunicationState::Init));
}
