/*!
    The cyclic exchange loop, driving all servos of a session through their process data.

    Each cycle, in this order:
    1. the application's control closure reads the telemetry and sets new targets in a [Cycle]
    2. the outputs of every servo are packed (controlword, mode, target)
    3. one exchange covers all servos
    4. the inputs of every servo are unpacked (statusword, actual velocity)

    Every cycle refreshes the controlword of every servo, even when nothing changes, since drives fault when the master stops refreshing them.

    The loop enables all drives when it starts and always de-escalates them when it ends, whatever the reason it ends: the application finished, an [Interrupt] was triggered, a drive faulted, or the exchange failed.
*/

use crate::{
    cia402::{self, Port, ControlWord, StatusWord, DeviceState, OperationMode, Transition},
    mapping::ProcessImage,
    master::{Fieldbus, ProcessData},
    session::{Session, ServoHandle},
    config::Timeouts,
    realtime,
    error::{DriveError, DriveResult},
    };
use core::{
    ops::ControlFlow,
    time::Duration,
    };
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    };
use tokio::time::{Instant, MissedTickBehavior};


/// maximum number of cycles a new set-point is held waiting for the drive's acknowledge
pub const SETPOINT_CYCLES: u32 = 10;

/// convert a velocity in encoder counts per second to revolutions per minute
pub fn rpm(counts: i32, counts_per_revolution: u32) -> f64 {
    f64::from(counts) * 60. / f64::from(counts_per_revolution)
}

/// values of a servo observed during the last cycle
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Telemetry {
    pub state: DeviceState,
    pub statusword: u16,
    pub target: i32,
    /// actual velocity in counts/s
    pub velocity: i32,
    /// actual velocity in rpm, for display only
    pub rpm: f64,
}

/**
    flag requesting the cyclic loop to stop, shared between the loop and whoever may interrupt it

    Once triggered, the loop quick stops all drives and returns.
*/
#[derive(Clone, Debug, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self  {Self::default()}
    /// flag triggered by SIGINT (ctrl-C)
    pub fn on_sigint() -> std::io::Result<Self> {
        let interrupt = Self::new();
        signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&interrupt.0))?;
        Ok(interrupt)
    }
    pub fn trigger(&self)  {self.0.store(true, Ordering::Relaxed)}
    pub fn is_triggered(&self) -> bool  {self.0.load(Ordering::Relaxed)}
}


/// what the loop sends to a servo, beyond its target
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Intent {
    /// keep operation enabled
    Hold,
    /// new set-point waiting one cycle with the set-point bit low, so the drive sees a rising edge
    Pending,
    /// new set-point raised since this number of cycles
    SetPoint(u32),
    /// new set-point bit released
    Release,
    /// quick stop requested by the application
    QuickStop,
}
impl Intent {
    fn controlword(self) -> ControlWord {
        ControlWord::from(match self {
            Self::Hold | Self::Pending => Transition::ENABLE_OPERATION.controlword,
            Self::SetPoint(_) => cia402::NEW_SETPOINT[0],
            Self::Release => cia402::NEW_SETPOINT[1],
            Self::QuickStop => Transition::QUICK_STOP.controlword,
        })
    }
    /// intent of the next cycle, knowing what the drive answered
    fn next(self, status: StatusWord) -> Self {
        match self {
            Self::SetPoint(cycles) => {
                if status.setpoint_acknowledge() || cycles + 1 >= SETPOINT_CYCLES
                    {Self::Release}
                else
                    {Self::SetPoint(cycles + 1)}
            },
            Self::Pending => Self::SetPoint(0),
            Self::Release => Self::Hold,
            other => other,
        }
    }
}

/// access to the servos given to the control closure, once per cycle
pub struct Cycle<'a> {
    servos: &'a mut [ServoHandle],
    intents: &'a mut [Intent],
    count: u64,
    elapsed: Duration,
}
impl Cycle<'_> {
    /// number of exchanges done since the loop started driving
    pub fn count(&self) -> u64  {self.count}
    /// time since the loop started driving
    pub fn elapsed(&self) -> Duration  {self.elapsed}
    pub fn servos(&self) -> &[ServoHandle]  {&*self.servos}

    fn index(&self, name: &str) -> DriveResult<usize> {
        self.servos.iter()
            .position(|servo| servo.name() == name)
            .ok_or_else(|| DriveError::UnknownServo(name.into()))
    }
    pub fn telemetry(&self, name: &str) -> DriveResult<Telemetry> {
        Ok(self.servos[self.index(name)?].telemetry())
    }
    /**
        set the target of a servo, in the unit of its mode

        In profile position mode, this also raises the new set-point bit until the drive acknowledges it. When the bit is still high from a previous set-point, it is first lowered for one cycle.
    */
    pub fn set_target(&mut self, name: &str, target: i32) -> DriveResult<()> {
        let index = self.index(name)?;
        let drive = &mut self.servos[index].drive;
        let changed = drive.target != target;
        drive.target = target;
        if changed
        && drive.mode() == OperationMode::ProfilePosition
        && self.intents[index] != Intent::QuickStop {
            // the drive only latches a set-point on a rising edge
            self.intents[index] = if drive.controlword.new_setpoint()
                {Intent::Pending}
            else
                {Intent::SetPoint(0)};
        }
        Ok(())
    }
    /// quick stop a servo, it stays stopped until the loop ends
    pub fn quick_stop(&mut self, name: &str) -> DriveResult<()> {
        let index = self.index(name)?;
        let from = self.servos[index].drive.state();
        if from.apply(cia402::Command::QuickStop) != Some(DeviceState::QuickStopActive)
            {return Err(DriveError::IllegalTransition {from, command: cia402::Command::QuickStop})}
        log::info!("{}: quick stop", name);
        self.intents[index] = Intent::QuickStop;
        Ok(())
    }
}

/// why the loop returned without error
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Exit {
    /// the control closure returned [ControlFlow::Break]
    Finished,
    /// the [Interrupt] was triggered
    Interrupted,
}

/// result of a loop run
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Summary {
    pub exit: Exit,
    /// number of exchanges while driving, enabling and de-escalation excluded
    pub cycles: u64,
}


/**
    pack the outputs of all servos, exchange once, and unpack the inputs of all servos

    The outputs of every servo are packed before the exchange, so no exchange ever carries a partially updated set of commands.
*/
pub async fn exchange<M: ProcessData>(master: &mut M, servos: &mut [ServoHandle], timeout: Duration) -> DriveResult<()> {
    for servo in servos.iter() {
        let image = ProcessImage {
            controlword: servo.drive.controlword,
            mode: servo.drive.mode().code(),
            target: servo.drive.target,
            .. Default::default()
            };
        image.pack(&servo.fields, master.outputs(servo.device())?)?;
    }
    master.exchange(timeout).await?;
    for servo in servos.iter_mut() {
        let mut image = ProcessImage::default();
        image.unpack(&servo.fields, master.inputs(servo.device())?)?;
        servo.drive.status = image.statusword;
        servo.drive.velocity = image.velocity;
    }
    Ok(())
}

/// controlword and statusword of one servo through the process data, each status read is a complete exchange
struct CyclicPort<'a, M> {
    master: &'a mut M,
    servos: &'a mut [ServoHandle],
    index: usize,
    timeout: Duration,
    interrupt: &'a Interrupt,
}
impl<M: ProcessData> Port for CyclicPort<'_, M> {
    async fn command(&mut self, controlword: ControlWord) -> DriveResult<()> {
        self.servos[self.index].drive.controlword = controlword;
        Ok(())
    }
    async fn status(&mut self) -> DriveResult<StatusWord> {
        if self.interrupt.is_triggered()
            {return Err(DriveError::Interrupted)}
        exchange(self.master, self.servos, self.timeout).await?;
        Ok(self.servos[self.index].drive.status)
    }
}


/// periodic driver of all servos of a session
#[derive(Clone, Debug)]
pub struct CyclicLoop {
    period: Duration,
    realtime: bool,
    interrupt: Interrupt,
}
impl CyclicLoop {
    pub fn new(period: Duration) -> Self {
        Self {period, realtime: false, interrupt: Interrupt::new()}
    }
    /// loop at the cycle time of the session's setup
    pub fn for_session<M: Fieldbus>(session: &Session<M>) -> Self {
        Self::new(session.setup().cycle_time())
    }
    /// promote the thread running the loop to realtime priority, see [realtime::promote]
    pub fn realtime(mut self, enable: bool) -> Self {
        self.realtime = enable;
        self
    }
    /// use the given interrupt flag instead of a private one
    pub fn interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }
    /// flag stopping this loop
    pub fn interrupter(&self) -> Interrupt  {self.interrupt.clone()}
    pub fn period(&self) -> Duration  {self.period}

    /**
        enable all servos, then drive them every period until the control closure breaks

        Whatever way the loop ends, the servos are de-escalated before returning:
        - when interrupted, quick stop is attempted a bounded number of times, errors ignored
        - otherwise, one zero target command is sent to enabled drives

        then exactly one shutdown command is exchanged.
    */
    pub async fn run<M, F>(&self, session: &mut Session<M>, mut control: F) -> DriveResult<Summary>
    where
        M: Fieldbus,
        F: FnMut(&mut Cycle<'_>) -> ControlFlow<()>,
    {
        if self.realtime
            {realtime::promote();}
        let (master, servos, timeouts) = session.parts();
        let mut intents = vec![Intent::Hold; servos.len()];
        for servo in servos.iter_mut() {
            let mode = servo.config().mode.operation_mode();
            servo.drive.set_mode(mode);
            servo.drive.target = 0;
        }

        let mut cycles = 0;
        let outcome = self.drive(master, servos, &mut intents, timeouts, &mut control, &mut cycles).await;
        let interrupted = matches!(outcome, Ok(Exit::Interrupted) | Err(DriveError::Interrupted));
        let released = release(master, servos, timeouts, interrupted).await;
        log::info!("cyclic loop ended after {} cycles", cycles);

        match outcome {
            Ok(exit) => {
                released?;
                Ok(Summary {exit, cycles})
            },
            Err(DriveError::Interrupted) => Ok(Summary {exit: Exit::Interrupted, cycles}),
            Err(error) => {
                if let Err(cleanup) = released
                    {log::warn!("de-escalation failed: {}", cleanup);}
                Err(error)
            },
        }
    }

    async fn drive<M, F>(
            &self,
            master: &mut M,
            servos: &mut [ServoHandle],
            intents: &mut [Intent],
            timeouts: &Timeouts,
            control: &mut F,
            cycles: &mut u64,
            ) -> DriveResult<Exit>
    where
        M: ProcessData,
        F: FnMut(&mut Cycle<'_>) -> ControlFlow<()>,
    {
        // transition waits are paced by the cycle, each status read being an exchange
        let enabling = Timeouts {poll: self.period, .. timeouts.clone()};
        for index in 0 .. servos.len() {
            log::info!("{}: enabling", servos[index].name());
            let mut port = CyclicPort {
                master: &mut *master,
                servos: &mut *servos,
                index,
                timeout: timeouts.exchange,
                interrupt: &self.interrupt,
                };
            cia402::enable(&mut port, &enabling).await?;
        }

        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let start = Instant::now();
        let mut reported = start;

        loop {
            interval.tick().await;
            if self.interrupt.is_triggered() {
                log::info!("cyclic loop interrupted");
                return Ok(Exit::Interrupted);
            }

            let flow = control(&mut Cycle {
                servos: &mut *servos,
                intents: &mut *intents,
                count: *cycles,
                elapsed: start.elapsed(),
                });
            if flow.is_break()
                {return Ok(Exit::Finished)}

            for (servo, intent) in servos.iter_mut().zip(intents.iter()) {
                servo.drive.controlword = intent.controlword();
            }
            exchange(master, servos, timeouts.exchange).await?;
            *cycles += 1;

            for (servo, intent) in servos.iter().zip(intents.iter_mut()) {
                let state = servo.drive.state();
                if state.is_fault() {
                    return Err(DriveError::Fault {
                        servo: servo.name().into(),
                        status: u16::from(servo.drive.status),
                        });
                }
                *intent = intent.next(servo.drive.status);
            }

            if reported.elapsed() >= timeouts.status_period {
                reported = Instant::now();
                for servo in servos.iter() {
                    let telemetry = servo.telemetry();
                    log::info!("{}: {} status {:#06x} target {} velocity {} ({:.1} rpm)",
                        servo.name(),
                        telemetry.state,
                        telemetry.statusword,
                        telemetry.target,
                        telemetry.velocity,
                        telemetry.rpm,
                        );
                }
            }
        }
    }
}

/**
    bring all servos to a safe state at the end of a loop

    The shutdown exchange is attempted exactly once. Errors are only returned when not interrupted, an interrupted session is terminating anyway.
*/
async fn release<M: ProcessData>(master: &mut M, servos: &mut [ServoHandle], timeouts: &Timeouts, interrupted: bool) -> DriveResult<()> {
    for servo in servos.iter_mut()
        {servo.drive.target = 0;}

    let mut result = Ok(());
    if interrupted {
        for attempt in 0 .. timeouts.quick_stop_attempts {
            for servo in servos.iter_mut()
                {servo.drive.controlword = ControlWord::from(Transition::QUICK_STOP.controlword);}
            match exchange(master, servos, timeouts.exchange).await {
                Ok(()) => break,
                Err(error) => log::warn!("quick stop attempt {} failed: {}", attempt+1, error),
            }
        }
    }
    else {
        for servo in servos.iter_mut() {
            if servo.drive.state() == DeviceState::OperationEnabled
                {servo.drive.controlword = ControlWord::from(Transition::ENABLE_OPERATION.controlword);}
        }
        result = exchange(master, servos, timeouts.exchange).await;
    }

    for servo in servos.iter_mut()
        {servo.drive.controlword = ControlWord::from(Transition::SHUTDOWN.controlword);}
    let shutdown = exchange(master, servos, timeouts.exchange).await;
    log::info!("servos shut down");

    if interrupted {
        if let Err(error) = shutdown
            {log::warn!("shutdown failed: {}", error);}
        Ok(())
    }
    else {
        result.and(shutdown)
    }
}
