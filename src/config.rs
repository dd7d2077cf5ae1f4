/*!
    Setup data: the network interface, cycle time and the servos to drive, with their limits and homing parameters.

    A setup is usually stored as a JSON file:

    ```json
    {
      "description": "bench",
      "network_interface": "eno1",
      "cycle_time_ms": 10,
      "servos": [
        {"name": "axis1", "alias": 0, "position": 0, "mode": "pv",
         "limits": {"max_rpm": 3000, "accel_rpm_s": 1000, "decel_rpm_s": 1000},
         "homing": {"method": 35, "speed_fast": 500, "speed_slow": 100}}
      ]
    }
    ```

    Missing optional fields take the defaults of [Limits::default] and [Homing::default]. A setup is only used after [SetupConfig::validate] succeeded.
*/

use crate::{
    cia402::OperationMode,
    error::{DriveError, DriveResult},
    };
use core::time::Duration;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    };


/// default encoder resolution of a servo, used for presentation of velocities
pub const DEFAULT_COUNTS_PER_REVOLUTION: u32 = 131_072;

/// motion limits applied to the profile registers of a drive before motion commands
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_rpm: u32,
    pub accel_rpm_s: u32,
    pub decel_rpm_s: u32,
    /// software position limits in counts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos_min: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos_max: Option<i32>,
}
impl Default for Limits {
    fn default() -> Self { Self {
        max_rpm: 3000,
        accel_rpm_s: 1000,
        decel_rpm_s: 1000,
        pos_min: None,
        pos_max: None,
    }}
}

/// homing procedure parameters, absent values keep the drive's own settings
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Homing {
    /// standard CiA-402 homing method code
    #[serde(default = "default_homing_method")]
    pub method: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_fast: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_slow: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accel: Option<u32>,
}
fn default_homing_method() -> u8 {35}

impl Default for Homing {
    fn default() -> Self { Self {
        method: default_homing_method(),
        offset: None,
        speed_fast: None,
        speed_slow: None,
        accel: None,
    }}
}

/// operation mode a servo is driven in
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServoMode {
    /// profile position
    #[default]
    Pp,
    /// profile velocity
    Pv,
    /// profile torque
    Pt,
    /// cyclic synchronous position
    Csp,
    /// cyclic synchronous velocity
    Csv,
    /// cyclic synchronous torque
    Cst,
}
impl ServoMode {
    pub fn operation_mode(self) -> OperationMode {
        match self {
            Self::Pp => OperationMode::ProfilePosition,
            Self::Pv => OperationMode::ProfileVelocity,
            Self::Pt => OperationMode::ProfileTorque,
            Self::Csp => OperationMode::SynchronousPosition,
            Self::Csv => OperationMode::SynchronousVelocity,
            Self::Cst => OperationMode::SynchronousTorque,
        }
    }
}

/// one physical drive, identified on the network by its alias and topological position
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ServoConfig {
    pub name: String,
    pub alias: u16,
    pub position: u16,
    /// device description file, only checked for existence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub esi: Option<PathBuf>,
    #[serde(default)]
    pub mode: ServoMode,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub homing: Homing,
    #[serde(default = "default_counts_per_revolution")]
    pub counts_per_revolution: u32,
}
fn default_counts_per_revolution() -> u32 {DEFAULT_COUNTS_PER_REVOLUTION}

impl ServoConfig {
    /// servo with default limits and homing, driven in profile position
    pub fn new(name: impl Into<String>, alias: u16, position: u16) -> Self { Self {
        name: name.into(),
        alias,
        position,
        esi: None,
        mode: ServoMode::default(),
        limits: Limits::default(),
        homing: Homing::default(),
        counts_per_revolution: DEFAULT_COUNTS_PER_REVOLUTION,
    }}
}

/// complete description of a bus session
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SetupConfig {
    #[serde(default)]
    pub description: Option<String>,
    pub network_interface: String,
    #[serde(default = "default_cycle_time_ms")]
    pub cycle_time_ms: u64,
    pub servos: Vec<ServoConfig>,
}
fn default_cycle_time_ms() -> u64 {10}

impl SetupConfig {
    /// period of the cyclic exchange
    pub fn cycle_time(&self) -> Duration {
        Duration::from_millis(self.cycle_time_ms)
    }
    /// servo configuration by name
    pub fn servo(&self, name: &str) -> Option<&ServoConfig> {
        self.servos.iter().find(|servo| servo.name == name)
    }

    /// check the setup is complete and consistent, before any bus activity
    pub fn validate(&self) -> DriveResult<()> {
        if self.network_interface.trim().is_empty()
            {return Err(invalid("network interface is empty"))}
        if self.cycle_time_ms == 0
            {return Err(invalid("cycle time must be positive"))}
        if self.servos.is_empty()
            {return Err(invalid("no servo configured"))}

        let mut names = HashSet::new();
        let mut addresses = HashSet::new();
        for servo in &self.servos {
            if servo.name.is_empty()
                {return Err(invalid("servo name is empty"))}
            if ! names.insert(servo.name.as_str())
                {return Err(invalid(format!("servo name {:?} is used twice", servo.name)))}
            if ! addresses.insert((servo.alias, servo.position))
                {return Err(invalid(format!("servo {:?} has the same alias and position as an other servo", servo.name)))}
            if let (Some(min), Some(max)) = (servo.limits.pos_min, servo.limits.pos_max) {
                if min > max
                    {return Err(invalid(format!("servo {:?} has pos_min {} greater than pos_max {}", servo.name, min, max)))}
            }
            if servo.counts_per_revolution == 0
                {return Err(invalid(format!("servo {:?} has no counts per revolution", servo.name)))}
            if let Some(esi) = &servo.esi {
                if ! esi.exists()
                    {return Err(invalid(format!("servo {:?}: device description {} not found", servo.name, esi.display())))}
            }
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> DriveError {
    DriveError::Configuration(message.into())
}

/// read and validate a setup file
pub fn load_setup(path: impl AsRef<Path>) -> DriveResult<SetupConfig> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| invalid(format!("cannot read setup file {}: {}", path.display(), e)))?;
    let setup: SetupConfig = serde_json::from_str(&text)
        .map_err(|e| invalid(format!("setup file {}: {}", path.display(), e)))?;
    setup.validate()?;
    log::info!("loaded setup {} with {} servos", path.display(), setup.servos.len());
    Ok(setup)
}

/// write a setup file, returning the path written
pub fn save_setup(setup: &SetupConfig, path: impl AsRef<Path>) -> DriveResult<PathBuf> {
    let path = path.as_ref();
    let text = serde_json::to_string_pretty(setup)
        .map_err(|e| invalid(format!("cannot serialize setup: {}", e)))?;
    std::fs::write(path, text)
        .map_err(|e| invalid(format!("cannot write setup file {}: {}", path.display(), e)))?;
    Ok(path.to_path_buf())
}

/// minimal setup for a single servo, to start a new setup file from
pub fn default_template() -> SetupConfig {
    let mut servo = ServoConfig::new("servo1", 0, 0);
    servo.limits.pos_min = Some(-100_000);
    servo.limits.pos_max = Some(100_000);
    servo.homing = Homing {
        method: 35,
        offset: None,
        speed_fast: Some(500),
        speed_slow: Some(100),
        accel: Some(1000),
    };
    SetupConfig {
        description: Some("Example EtherCAT servo setup".into()),
        network_interface: "eth0".into(),
        cycle_time_ms: default_cycle_time_ms(),
        servos: vec![servo],
    }
}

/// source of a validated setup, the core only consumes what it provides
pub trait ConfigProvider {
    fn provide(&self) -> DriveResult<SetupConfig>;
}

/// setup read from a JSON file
#[derive(Clone, Debug)]
pub struct JsonFile(pub PathBuf);

impl ConfigProvider for JsonFile {
    fn provide(&self) -> DriveResult<SetupConfig> {
        load_setup(&self.0)
    }
}

/// the [default_template] setup, on the given network interface
#[derive(Clone, Debug)]
pub struct Template {
    pub network_interface: String,
}

impl ConfigProvider for Template {
    fn provide(&self) -> DriveResult<SetupConfig> {
        let mut setup = default_template();
        setup.network_interface = self.network_interface.clone();
        setup.validate()?;
        Ok(setup)
    }
}


/// every bounded wait of drive control
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Timeouts {
    /// interval between statusword reads while waiting for a transition
    pub poll: Duration,
    /// maximum duration of one state transition
    pub transition: Duration,
    /// number of fault reset commands before giving up
    pub fault_reset_attempts: u32,
    /// delay after each fault reset command
    pub fault_reset_interval: Duration,
    /// maximum duration of a homing procedure
    pub homing: Duration,
    /// maximum duration of a process data exchange
    pub exchange: Duration,
    /// maximum duration of a network state change
    pub network_state: Duration,
    /// number of quick stop exchanges attempted when interrupted
    pub quick_stop_attempts: u32,
    /// period of the cyclic status line
    pub status_period: Duration,
}
impl Default for Timeouts {
    fn default() -> Self { Self {
        poll: Duration::from_millis(10),
        transition: Duration::from_secs(1),
        fault_reset_attempts: 50,
        fault_reset_interval: Duration::from_millis(50),
        homing: Duration::from_secs(10),
        exchange: Duration::from_millis(2),
        network_state: Duration::from_secs(5),
        quick_stop_attempts: 3,
        status_period: Duration::from_millis(500),
    }}
}
