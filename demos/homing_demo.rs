//! enable and home every servo of a setup through dictionary access, on a simulated network
//!
//! usage: homing_demo [setup.json]

use etherdrive::{
    config::{ConfigProvider, JsonFile, Template, Timeouts},
    simulation::{SimulatedBus, SimulatedDrive, Behavior},
    Session, DriveResult,
    };
use futures::FutureExt;

#[tokio::main]
async fn main() -> DriveResult<()> {
    env_logger::init();

    let setup = match std::env::args().nth(1) {
        Some(path) => JsonFile(path.into()).provide()?,
        None => Template {network_interface: "sim0".into()}.provide()?,
        };
    let mut servos = setup.servos.clone();
    servos.sort_by_key(|servo| servo.position);
    let bus = SimulatedBus::new(servos.iter().map(|servo|
        SimulatedDrive::new(servo.alias)
            .with_behavior(Behavior {homing_polls: 50, .. Default::default()})
        ));

    let session = Session::connect(bus, setup, Timeouts::default()).await?;
    session.scope(|session| async move {
        let names: Vec<String> = session.servos().iter().map(|servo| servo.name().to_owned()).collect();
        for name in names {
            let mut drive = session.drive(&name)?;
            drive.enable().await?;
            let outcome = drive.home().await?;
            println!("{}: {:?}", name, outcome);
            drive.disable().await?;
        }
        Ok(())
    }.boxed_local()).await
}
