/*!
    A bus session: the network brought to operational state, with every configured servo bound to its device and mapped.

    A session owns the master for its whole life. The network must be returned to init state and released when the session ends, whatever happened during it; [Session::scope] guarantees that.

    Example

        let session = Session::connect(master, setup, Timeouts::default()).await?;
        session.scope(|session| async move {
            session.drive("axis1")?.enable().await?;
            Ok(())
        }.boxed_local()).await?;
*/

use crate::{
    cia402::DriveState,
    mapping::{self, ProcessDataLayout, DriveFields},
    master::{Fieldbus, DeviceId, DeviceInfo, CommunicationState},
    config::{SetupConfig, ServoConfig, Timeouts},
    cyclic::{Telemetry, rpm},
    drive::Drive,
    error::{DriveError, DriveResult},
    };
use futures::{FutureExt, future::LocalBoxFuture};
use std::panic::{self, AssertUnwindSafe};


/// runtime binding of a configured servo to the device discovered on the network
#[derive(Clone, Debug)]
pub struct ServoHandle {
    config: ServoConfig,
    info: DeviceInfo,
    layout: ProcessDataLayout,
    pub(crate) fields: DriveFields,
    pub(crate) drive: DriveState,
}
impl ServoHandle {
    pub fn name(&self) -> &str  {&self.config.name}
    pub fn config(&self) -> &ServoConfig  {&self.config}
    /// identity of the bound device
    pub fn info(&self) -> &DeviceInfo  {&self.info}
    pub fn device(&self) -> DeviceId  {self.info.position}
    /// process data mapping written to the device
    pub fn layout(&self) -> &ProcessDataLayout  {&self.layout}
    pub fn fields(&self) -> &DriveFields  {&self.fields}
    /// last known state of the drive
    pub fn state(&self) -> &DriveState  {&self.drive}

    /// last cyclic values of the drive, with the velocity converted to rpm
    pub fn telemetry(&self) -> Telemetry {
        Telemetry {
            state: self.drive.state(),
            statusword: u16::from(self.drive.status),
            target: self.drive.target,
            velocity: self.drive.velocity,
            rpm: rpm(self.drive.velocity, self.config.counts_per_revolution),
        }
    }
}

/// the network and the servos bound on it
pub struct Session<M: Fieldbus> {
    master: M,
    setup: SetupConfig,
    timeouts: Timeouts,
    servos: Vec<ServoHandle>,
    /// true while the network is open and not yet torn down
    open: bool,
}
impl<M: Fieldbus> Session<M> {
    /**
        open the network and bring it to operational state

        1. the setup is validated
        2. the network is opened and scanned
        3. each servo is bound to the device with its alias and position
        4. in pre-operational state, the process data mapping of each servo is written according to its mode
        5. the network goes safe-operational then operational

        When any step fails after the network was opened, it is torn down before the error is returned.
    */
    pub async fn connect(master: M, setup: SetupConfig, timeouts: Timeouts) -> DriveResult<Self> {
        setup.validate()?;
        let mut session = Self {
            master,
            setup,
            timeouts,
            servos: Vec::new(),
            open: false,
            };
        match session.bring_up().await {
            Ok(()) => Ok(session),
            Err(error) => {
                if let Err(cleanup) = session.teardown().await
                    {log::warn!("teardown after failed connection: {}", cleanup);}
                Err(error)
            },
        }
    }

    async fn bring_up(&mut self) -> DriveResult<()> {
        self.master.open(&self.setup.network_interface).await?;
        self.open = true;
        log::info!("network {} opened", self.setup.network_interface);

        let devices = self.master.discover().await?;
        log::info!("{} devices found", devices.len());

        let mut bound = Vec::with_capacity(self.setup.servos.len());
        for config in &self.setup.servos {
            let info = devices.iter()
                .find(|device| device.alias == config.alias && device.position.0 == config.position)
                .ok_or_else(|| DriveError::Configuration(format!(
                    "servo {:?} not found with alias {} at position {}",
                    config.name, config.alias, config.position)))?;
            log::info!("servo {} bound to {} {:?} (alias {}, vendor {:#010x}, product {:#010x}, revision {:#010x})",
                config.name, info.position, info.name, info.alias, info.vendor, info.product, info.revision);
            bound.push((config.clone(), info.clone()));
        }

        self.switch(CommunicationState::PreOperational).await?;

        for (config, info) in bound {
            let device = info.position;
            let mode = config.mode.operation_mode();
            let (layout, fields) = ProcessDataLayout::for_mode(mode)
                .map_err(|error| DriveError::Mapping {device, error})?;
            let writes = mapping::configure(&mut self.master, device, &layout).await
                .map_err(|error| DriveError::Mapping {device, error})?;
            log::debug!("servo {} mapped in {} writes", config.name, writes);
            self.servos.push(ServoHandle {
                config,
                info,
                layout,
                fields,
                drive: DriveState::new(mode),
                });
        }

        self.switch(CommunicationState::SafeOperational).await?;
        self.switch(CommunicationState::Operational).await?;
        Ok(())
    }

    async fn switch(&mut self, target: CommunicationState) -> DriveResult<()> {
        self.master.switch(target).await?;
        self.master.confirm(target, self.timeouts.network_state).await?;
        log::info!("network {:?}", target);
        Ok(())
    }

    /**
        return the network to init state and release it

        Switching to init is best effort, a failure is only logged. This does nothing when the session is already torn down.
    */
    pub async fn teardown(&mut self) -> DriveResult<()> {
        if ! self.open
            {return Ok(())}
        self.open = false;
        if let Err(error) = self.master.switch(CommunicationState::Init).await
            {log::warn!("cannot switch network to init: {}", error);}
        self.master.close().await?;
        log::info!("network {} closed", self.setup.network_interface);
        Ok(())
    }

    /**
        run a task on the session, then tear the session down

        The teardown runs exactly once whatever the task returned, and also when the task panics, the panic being resumed after the teardown. The task's error takes precedence over a teardown error.

        The future returned by the task may only borrow the session, everything else it needs must be moved in.

        Dropping the future returned by this function (with `tokio::time::timeout` or `select!` for instance) skips the teardown. A running [crate::CyclicLoop] is cancelled with its [crate::Interrupt] instead.
    */
    pub async fn scope<R, F>(mut self, task: F) -> DriveResult<R>
    where F: for<'s> FnOnce(&'s mut Session<M>) -> LocalBoxFuture<'s, DriveResult<R>>
    {
        let result = AssertUnwindSafe(task(&mut self)).catch_unwind().await;
        let closed = self.teardown().await;
        let result = match result {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
            };
        let value = result?;
        closed?;
        Ok(value)
    }

    /// dictionary access control of a servo
    pub fn drive(&mut self, name: &str) -> DriveResult<Drive<'_, M>> {
        let servo = self.servos.iter_mut()
            .find(|servo| servo.name() == name)
            .ok_or_else(|| DriveError::UnknownServo(name.into()))?;
        Ok(Drive::new(&mut self.master, servo, &self.timeouts))
    }
    pub fn servo(&self, name: &str) -> DriveResult<&ServoHandle> {
        self.servos.iter()
            .find(|servo| servo.name() == name)
            .ok_or_else(|| DriveError::UnknownServo(name.into()))
    }
    /// servos in the order of the setup
    pub fn servos(&self) -> &[ServoHandle]  {&self.servos}
    pub fn setup(&self) -> &SetupConfig  {&self.setup}
    pub fn timeouts(&self) -> &Timeouts  {&self.timeouts}
    pub fn master(&self) -> &M  {&self.master}
    pub fn master_mut(&mut self) -> &mut M  {&mut self.master}
    /// false once torn down
    pub fn is_open(&self) -> bool  {self.open}

    pub(crate) fn parts(&mut self) -> (&mut M, &mut [ServoHandle], &Timeouts) {
        (&mut self.master, &mut self.servos, &self.timeouts)
    }
}

impl<M: Fieldbus> Drop for Session<M> {
    fn drop(&mut self) {
        if self.open
            {log::warn!("session on {} dropped without teardown", self.setup.network_interface);}
    }
}
