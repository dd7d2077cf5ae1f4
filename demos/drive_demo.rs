//! run servos in profile velocity on a simulated network, following a triangle velocity profile until ctrl-C or 5 seconds
//!
//! usage: drive_demo [setup.json]

use core::{
    ops::ControlFlow,
    time::Duration,
    };
use etherdrive::{
    config::{ConfigProvider, JsonFile, Template, ServoMode, Timeouts},
    simulation::{SimulatedBus, SimulatedDrive},
    CyclicLoop, Interrupt, Session,
    };
use futures::FutureExt;

const DURATION: Duration = Duration::from_secs(5);
/// counts/s
const PEAK_VELOCITY: f64 = 200_000.;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut setup = match std::env::args().nth(1) {
        Some(path) => JsonFile(path.into()).provide()?,
        None => Template {network_interface: "sim0".into()}.provide()?,
        };
    for servo in &mut setup.servos
        {servo.mode = ServoMode::Pv;}

    // one simulated drive per servo, at the configured position
    let mut servos = setup.servos.clone();
    servos.sort_by_key(|servo| servo.position);
    let bus = SimulatedBus::new(servos.iter().map(|servo| SimulatedDrive::new(servo.alias)));

    let session = Session::connect(bus, setup, Timeouts::default()).await?;
    let interrupt = Interrupt::on_sigint()?;
    let cyclic = CyclicLoop::for_session(&session)
        .realtime(true)
        .interrupt(interrupt);

    let summary = session.scope(move |session| async move {
        let names: Vec<String> = session.servos().iter().map(|servo| servo.name().to_owned()).collect();
        cyclic.run(session, |cycle| {
            let phase = cycle.elapsed().as_secs_f64() / DURATION.as_secs_f64();
            if phase >= 1.
                {return ControlFlow::Break(())}
            let velocity = PEAK_VELOCITY * (1. - (2.*phase - 1.).abs());
            for name in &names {
                if let Err(error) = cycle.set_target(name, velocity as i32)
                    {log::error!("{}", error);}
            }
            ControlFlow::Continue(())
        }).await
    }.boxed_local()).await?;

    println!("{:?} after {} cycles", summary.exit, summary.cycles);
    Ok(())
}
