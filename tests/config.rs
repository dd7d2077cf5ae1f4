use core::time::Duration;
use etherdrive::{
    cia402::OperationMode,
    config::{self, SetupConfig, ServoConfig, ServoMode, Limits, Homing, Timeouts, ConfigProvider, JsonFile, Template},
    error::DriveError,
    };

fn assert_invalid(setup: &SetupConfig, fragment: &str) {
    match setup.validate() {
        Err(DriveError::Configuration(message)) => assert!(message.contains(fragment), "{:?} lacks {:?}", message, fragment),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn template_is_valid() {
    let setup = config::default_template();
    setup.validate().unwrap();
    assert_eq!(setup.network_interface, "eth0");
    assert_eq!(setup.cycle_time(), Duration::from_millis(10));
    let servo = &setup.servos[0];
    assert_eq!(servo.limits.pos_min, Some(-100_000));
    assert_eq!(servo.limits.pos_max, Some(100_000));
    assert_eq!(servo.homing, Homing {method: 35, offset: None, speed_fast: Some(500), speed_slow: Some(100), accel: Some(1000)});
    assert!(servo.esi.is_none());
}

#[test]
fn save_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let mut setup = config::default_template();
    setup.servos.push(ServoConfig {
        mode: ServoMode::Csv,
        counts_per_revolution: 10_000,
        .. ServoConfig::new("servo2", 3, 1)
        });
    let path = config::save_setup(&setup, dir.path().join("setup.json")).unwrap();
    assert_eq!(config::load_setup(&path).unwrap(), setup);
    assert_eq!(JsonFile(path).provide().unwrap(), setup);
}

#[test]
fn missing_fields_take_defaults() {
    let setup: SetupConfig = serde_json::from_str(r#"{
        "network_interface": "eno1",
        "servos": [{"name": "axis", "alias": 0, "position": 0, "limits": {"max_rpm": 1500}}]
        }"#).unwrap();
    setup.validate().unwrap();
    assert_eq!(setup.cycle_time_ms, 10);
    assert_eq!(setup.description, None);
    let servo = setup.servo("axis").unwrap();
    assert_eq!(servo.mode, ServoMode::Pp);
    assert_eq!(servo.limits, Limits {max_rpm: 1500, .. Limits::default()});
    assert_eq!(servo.homing, Homing::default());
    assert_eq!(servo.homing.method, 35);
    assert_eq!(servo.counts_per_revolution, 131_072);
    assert!(setup.servo("other").is_none());
}

#[test]
fn missing_alias_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("setup.json");
    std::fs::write(&path, r#"{"network_interface": "eno1", "servos": [{"name": "axis", "position": 0}]}"#).unwrap();
    match config::load_setup(&path) {
        Err(DriveError::Configuration(message)) => assert!(message.contains("alias"), "{}", message),
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(config::load_setup(dir.path().join("absent.json")), Err(DriveError::Configuration(_))));
}

#[test]
fn validation_failures() {
    let valid = config::default_template();

    let mut setup = valid.clone();
    setup.network_interface = " ".into();
    assert_invalid(&setup, "interface");

    let mut setup = valid.clone();
    setup.cycle_time_ms = 0;
    assert_invalid(&setup, "cycle time");

    let mut setup = valid.clone();
    setup.servos.clear();
    assert_invalid(&setup, "no servo");

    let mut setup = valid.clone();
    setup.servos.push(ServoConfig::new("servo1", 0, 1));
    assert_invalid(&setup, "used twice");

    let mut setup = valid.clone();
    setup.servos.push(ServoConfig::new("servo2", 0, 0));
    assert_invalid(&setup, "alias and position");

    let mut setup = valid.clone();
    setup.servos[0].limits.pos_min = Some(10);
    setup.servos[0].limits.pos_max = Some(-10);
    assert_invalid(&setup, "pos_min");

    let mut setup = valid.clone();
    setup.servos[0].counts_per_revolution = 0;
    assert_invalid(&setup, "counts per revolution");

    let mut setup = valid.clone();
    setup.servos[0].name.clear();
    assert_invalid(&setup, "name is empty");

    let mut setup = valid.clone();
    setup.servos[0].esi = Some("/nonexistent/drive.xml".into());
    assert_invalid(&setup, "not found");

    // equal bounds and an existing description file are fine
    let esi = tempfile::NamedTempFile::new().unwrap();
    let mut setup = valid;
    setup.servos[0].limits.pos_min = Some(0);
    setup.servos[0].limits.pos_max = Some(0);
    setup.servos[0].esi = Some(esi.path().to_path_buf());
    setup.validate().unwrap();
}

#[test]
fn servo_modes() {
    let modes: Vec<ServoMode> = serde_json::from_str(r#"["pp", "pv", "pt", "csp", "csv", "cst"]"#).unwrap();
    let operation: Vec<OperationMode> = modes.iter().map(|mode| mode.operation_mode()).collect();
    assert_eq!(operation, [
        OperationMode::ProfilePosition,
        OperationMode::ProfileVelocity,
        OperationMode::ProfileTorque,
        OperationMode::SynchronousPosition,
        OperationMode::SynchronousVelocity,
        OperationMode::SynchronousTorque,
        ]);
    assert_eq!(serde_json::to_string(&ServoMode::Csv).unwrap(), r#""csv""#);
    assert!(serde_json::from_str::<ServoMode>(r#""CSV""#).is_err());
}

#[test]
fn template_provider() {
    let setup = Template {network_interface: "enp3s0".into()}.provide().unwrap();
    assert_eq!(setup.network_interface, "enp3s0");
    assert_eq!(setup.servos.len(), 1);
    assert!(matches!(Template {network_interface: "".into()}.provide(), Err(DriveError::Configuration(_))));
}

#[test]
fn default_timeouts() {
    let timeouts = Timeouts::default();
    assert_eq!(timeouts.poll, Duration::from_millis(10));
    assert_eq!(timeouts.transition, Duration::from_secs(1));
    assert_eq!(timeouts.fault_reset_attempts, 50);
    assert_eq!(timeouts.fault_reset_interval, Duration::from_millis(50));
    assert_eq!(timeouts.homing, Duration::from_secs(10));
    assert_eq!(timeouts.quick_stop_attempts, 3);
    assert_eq!(timeouts.status_period, Duration::from_millis(500));
}
