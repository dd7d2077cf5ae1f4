/*!
    Control of one servo through dictionary access (SDO).

    This is the acyclic way of driving a servo: every command is a register write acknowledged by the drive, so it suits setup operations, homing and profile modes where the drive generates its own trajectory. For streaming set-points every cycle, see [crate::cyclic].
*/

use crate::{
    sdo::cia402,
    cia402::{self as profile, Port, DriveState, DeviceState, Command, Transition, ControlWord, StatusWord, OperationMode, NEW_SETPOINT},
    master::{DeviceId, RegisterAccess},
    config::Timeouts,
    homing::{self, HomingOutcome},
    session::ServoHandle,
    error::{DriveError, DriveResult},
    };


/// controlword and statusword of a drive, accessed through its dictionary
struct SdoPort<'a, M> {
    master: &'a mut M,
    device: DeviceId,
    state: &'a mut DriveState,
}
impl<M: RegisterAccess> Port for SdoPort<'_, M> {
    async fn command(&mut self, controlword: ControlWord) -> DriveResult<()> {
        self.master.write(self.device, cia402::controlword, controlword).await?;
        self.state.controlword = controlword;
        Ok(())
    }
    async fn status(&mut self) -> DriveResult<StatusWord> {
        let status = self.master.read(self.device, cia402::statusword).await?;
        self.state.status = status;
        Ok(status)
    }
}

/// dictionary access control of a bound servo, borrowed from a [crate::Session]
pub struct Drive<'a, M> {
    master: &'a mut M,
    servo: &'a mut ServoHandle,
    timeouts: &'a Timeouts,
}
impl<'a, M: RegisterAccess> Drive<'a, M> {
    pub fn new(master: &'a mut M, servo: &'a mut ServoHandle, timeouts: &'a Timeouts) -> Self {
        Self {master, servo, timeouts}
    }
    pub fn servo(&self) -> &ServoHandle  {&*self.servo}

    fn port(&mut self) -> SdoPort<'_, M> {
        SdoPort {
            master: &mut *self.master,
            device: self.servo.device(),
            state: &mut self.servo.drive,
        }
    }

    /// read and decode the statusword
    pub async fn state(&mut self) -> DriveResult<DeviceState> {
        Ok(DeviceState::from(self.port().status().await?))
    }

    /// clear any fault and bring the drive to operation enabled
    pub async fn enable(&mut self) -> DriveResult<StatusWord> {
        log::info!("{}: enabling", self.servo.name());
        let timeouts = self.timeouts;
        profile::enable(&mut self.port(), timeouts).await
    }
    /// bring the drive back to ready to switch on, removing torque
    pub async fn disable(&mut self) -> DriveResult<StatusWord> {
        log::info!("{}: disabling", self.servo.name());
        let timeouts = self.timeouts;
        profile::transit(&mut self.port(), &Transition::SHUTDOWN, timeouts).await
    }
    /// stop the motion with the quick stop deceleration, only allowed when the drive is running
    pub async fn quick_stop(&mut self) -> DriveResult<StatusWord> {
        let from = self.state().await?;
        if from.apply(Command::QuickStop) != Some(DeviceState::QuickStopActive)
            {return Err(DriveError::IllegalTransition {from, command: Command::QuickStop})}
        log::info!("{}: quick stop", self.servo.name());
        let timeouts = self.timeouts;
        profile::transit(&mut self.port(), &Transition::QUICK_STOP, timeouts).await
    }
    /// clear a fault, if any
    pub async fn fault_reset(&mut self) -> DriveResult<StatusWord> {
        let timeouts = self.timeouts;
        profile::clear_fault(&mut self.port(), timeouts).await
    }

    /// write the operation mode of the drive
    pub async fn set_mode(&mut self, mode: OperationMode) -> DriveResult<()> {
        let device = self.servo.device();
        self.master.write(device, cia402::mode, mode.code()).await?;
        self.servo.drive.set_mode(mode);
        Ok(())
    }

    /// write the configured limits to the profile registers, and the software position limits when both are set
    pub async fn apply_limits(&mut self) -> DriveResult<()> {
        let device = self.servo.device();
        let limits = &self.servo.config().limits;
        self.master.write(device, cia402::profile::velocity, limits.max_rpm).await?;
        self.master.write(device, cia402::profile::acceleration, limits.accel_rpm_s).await?;
        self.master.write(device, cia402::profile::deceleration, limits.decel_rpm_s).await?;
        if let (Some(min), Some(max)) = (limits.pos_min, limits.pos_max) {
            self.master.write(device, cia402::limit::position_min, min).await?;
            self.master.write(device, cia402::limit::position_max, max).await?;
        }
        log::debug!("{}: limits applied", self.servo.name());
        Ok(())
    }

    /// move to an absolute position in profile position mode, the new set-point is taken immediately
    ///
    /// the set-point bit is left high, the next call lowers it before raising it again
    pub async fn set_target_position(&mut self, position: i32) -> DriveResult<()> {
        self.set_mode(OperationMode::ProfilePosition).await?;
        self.apply_limits().await?;
        let device = self.servo.device();
        self.master.write(device, cia402::target::position, position).await?;
        self.servo.drive.target = position;
        let mut port = self.port();
        // the drive only latches a set-point on a rising edge
        if port.state.controlword.new_setpoint()
            {port.command(Command::EnableOperation.controlword()).await?;}
        for controlword in NEW_SETPOINT
            {port.command(ControlWord::from(controlword)).await?;}
        Ok(())
    }
    /// run at a velocity in profile velocity mode
    pub async fn set_target_velocity(&mut self, velocity: i32) -> DriveResult<()> {
        self.set_mode(OperationMode::ProfileVelocity).await?;
        self.apply_limits().await?;
        let device = self.servo.device();
        self.master.write(device, cia402::target::velocity, velocity).await?;
        self.servo.drive.target = velocity;
        self.port().command(Command::EnableOperation.controlword()).await
    }
    /// apply a torque in profile torque mode
    pub async fn set_target_torque(&mut self, torque: i16) -> DriveResult<()> {
        self.set_mode(OperationMode::ProfileTorque).await?;
        let device = self.servo.device();
        self.master.write(device, cia402::target::torque, torque).await?;
        self.servo.drive.target = torque.into();
        self.port().command(Command::EnableOperation.controlword()).await
    }

    /// run the homing procedure with the configured parameters
    pub async fn home(&mut self) -> DriveResult<HomingOutcome> {
        let device = self.servo.device();
        let homing = self.servo.config().homing.clone();
        homing::run(&mut *self.master, device, &mut self.servo.drive, &homing, self.timeouts).await
    }
}
