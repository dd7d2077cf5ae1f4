//! homing procedure of a drive, run over dictionary access

use crate::{
    sdo::cia402,
    cia402::{DriveState, OperationMode, ControlWord},
    master::{DeviceId, RegisterAccess},
    config::{Homing, Timeouts},
    error::{DriveError, DriveResult},
    };
use tokio::time::Instant;

/// statusword bits of the homing mode: homing attained (bit 12) and homing error (bit 13)
const HOMING_MASK: u16 = 0x3000;
const HOMING_ATTAINED: u16 = 0x1000;
/// enable operation with the homing start bit (bit 4)
const HOMING_START: u16 = 0x001f;

/// how a homing procedure ended
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HomingOutcome {
    /// the drive reports its reference position is set
    Attained,
}

/**
    run the homing procedure of a drive

    The drive is switched to homing mode, the configured parameters are written (absent ones keep the drive's settings), then homing is started and the statusword is polled every `timeouts.poll` until the drive reports it attained, an error, or `timeouts.homing` elapsed.

    The drive must already be operation enabled.
*/
pub async fn run<M: RegisterAccess>(
        master: &mut M,
        device: DeviceId,
        state: &mut DriveState,
        homing: &Homing,
        timeouts: &Timeouts,
        ) -> DriveResult<HomingOutcome> {
    state.set_mode(OperationMode::Homing);
    master.write(device, cia402::mode, OperationMode::Homing.code()).await?;
    master.write(device, cia402::homing::method, homing.method).await?;
    if let Some(offset) = homing.offset
        {master.write(device, cia402::homing::offset, offset).await?;}
    if let Some(speed) = homing.speed_fast
        {master.write(device, cia402::homing::speed_fast, speed).await?;}
    if let Some(speed) = homing.speed_slow
        {master.write(device, cia402::homing::speed_slow, speed).await?;}
    if let Some(accel) = homing.accel
        {master.write(device, cia402::homing::acceleration, accel).await?;}

    log::info!("{}: homing with method {}", device, homing.method);
    let start = ControlWord::from(HOMING_START);
    master.write(device, cia402::controlword, start).await?;
    state.controlword = start;

    let deadline = Instant::now() + timeouts.homing;
    loop {
        let now = Instant::now();
        if now >= deadline
            {return Err(DriveError::HomingTimeout {status: u16::from(state.status)})}
        tokio::time::sleep(timeouts.poll.min(deadline - now)).await;

        let status = master.read(device, cia402::statusword).await?;
        state.status = status;
        if status.homing_error()
            {return Err(DriveError::HomingError {status: u16::from(status)})}
        if u16::from(status) & HOMING_MASK == HOMING_ATTAINED {
            log::info!("{}: homing attained", device);
            return Ok(HomingOutcome::Attained);
        }
    }
}
