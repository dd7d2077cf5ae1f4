/*!
    This module provide helper structs to configure and use the process data mapping of a drive.

    The mapping decides which dictionary objects are copied in the cyclic output buffer (master to drive) and input buffer (drive to master), and at which byte offsets. It is written in the drive's PDO mapping objects (`0x1600`, `0x1a00`) and assigned to the sync manager channels (`0x1c12`, `0x1c13`) while the network is pre-operational.

    It highlights
    - [ProcessDataLayout] to build a mapping and compute each inserted value's offsets
    - [configure] to write a layout to a drive
    - [ProcessImage] to pack and unpack the CiA-402 values of a drive in its buffers

    Example

        // establish mapping
        let mut layout = ProcessDataLayout::new();
        let controlword = layout.output(sdo::cia402::controlword)?;
        let target = layout.output(sdo::cia402::target::velocity)?;
        let status = layout.input(sdo::cia402::statusword)?;

        // configuration of the drive
        configure(&mut master, device, &layout).await?;

        // realtime exchanges
        controlword.try_set(master.outputs(device)?, ControlWord::from(0x000f))?;
        master.exchange(timeout).await?;
        let status = status.try_get(master.inputs(device)?)?;
*/

use crate::{
    data::{PduData, Field, PackingResult},
    sdo::{self, Sdo, PdoEntry, SyncDirection},
    cia402::{ControlWord, StatusWord, OperationMode},
    master::{DeviceId, RegisterAccess, ProcessData},
    error::MappingError,
    };


/// maximum number of entries mapped in each direction
pub const MAX_ENTRIES: usize = 8;

/**
    ordered list of objects mapped in the output and input buffers of a drive

    Byte offsets are the cumulative sum of the previous entries widths, little endian encoding throughout.
*/
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProcessDataLayout {
    outputs: heapless::Vec<PdoEntry, MAX_ENTRIES>,
    inputs: heapless::Vec<PdoEntry, MAX_ENTRIES>,
}
impl ProcessDataLayout {
    pub fn new() -> Self  {Self::default()}

    /// append an object to the output buffer, returning its location in the buffer
    pub fn output<T: PduData>(&mut self, sdo: Sdo<T>) -> Result<Field<T>, MappingError> {
        Self::push(&mut self.outputs, SyncDirection::Write, sdo)
    }
    /// append an object to the input buffer, returning its location in the buffer
    pub fn input<T: PduData>(&mut self, sdo: Sdo<T>) -> Result<Field<T>, MappingError> {
        Self::push(&mut self.inputs, SyncDirection::Read, sdo)
    }
    fn push<T: PduData>(entries: &mut heapless::Vec<PdoEntry, MAX_ENTRIES>, direction: SyncDirection, sdo: Sdo<T>) -> Result<Field<T>, MappingError> {
        if sdo.bits % 8 != 0
            {return Err(MappingError::Unaligned {index: sdo.index, sub: sdo.sub, bits: sdo.bits})}
        let byte = bytes(entries);
        entries.push(PdoEntry::from(sdo))
            .map_err(|_| MappingError::TooManyEntries {direction, capacity: MAX_ENTRIES})?;
        Ok(Field::new(byte, sdo.byte_len()))
    }

    pub fn outputs(&self) -> &[PdoEntry]  {&self.outputs}
    pub fn inputs(&self) -> &[PdoEntry]  {&self.inputs}
    /// byte size of the output buffer
    pub fn output_size(&self) -> usize  {bytes(&self.outputs)}
    /// byte size of the input buffer
    pub fn input_size(&self) -> usize  {bytes(&self.inputs)}

    /**
        standard layout for driving a servo in the given mode

        - outputs: controlword, mode of operation, and the target the mode follows (position, velocity or torque)
        - inputs: statusword, actual velocity
    */
    pub fn for_mode(mode: OperationMode) -> Result<(Self, DriveFields), MappingError> {
        use sdo::cia402;

        let mut layout = Self::new();
        let controlword = layout.output(cia402::controlword)?;
        let mode_field = layout.output(cia402::mode)?;
        let target = match mode {
            OperationMode::ProfileVelocity
            | OperationMode::Velocity
            | OperationMode::SynchronousVelocity
                => TargetField::Velocity(layout.output(cia402::target::velocity)?),
            OperationMode::ProfileTorque
            | OperationMode::SynchronousTorque
                => TargetField::Torque(layout.output(cia402::target::torque)?),
            _ => TargetField::Position(layout.output(cia402::target::position)?),
            };
        let statusword = layout.input(cia402::statusword)?;
        let velocity = layout.input(cia402::current::velocity)?;
        Ok((layout, DriveFields {controlword, mode: mode_field, target, statusword, velocity}))
    }
}

fn bytes(entries: &[PdoEntry]) -> usize {
    entries.iter().map(|entry| entry.bits() as usize / 8).sum()
}

/// location of the target in the output buffer, its type depends on the operation mode
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TargetField {
    Position(Field<i32>),
    Velocity(Field<i32>),
    Torque(Field<i16>),
}

/// locations of the CiA-402 values of a drive in its buffers, as given by [ProcessDataLayout::for_mode]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DriveFields {
    pub controlword: Field<ControlWord>,
    pub mode: Field<i8>,
    pub target: TargetField,
    pub statusword: Field<StatusWord>,
    pub velocity: Field<i32>,
}

/// cyclic values of one drive, packed to or unpacked from its process data buffers
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ProcessImage {
    pub controlword: ControlWord,
    pub mode: i8,
    /// raw target, saturated to 16 bits when the target is a torque
    pub target: i32,
    pub statusword: StatusWord,
    /// actual velocity in counts/s
    pub velocity: i32,
}
impl ProcessImage {
    /// write the commanded values in the output buffer
    pub fn pack(&self, fields: &DriveFields, outputs: &mut [u8]) -> PackingResult<()> {
        fields.controlword.try_set(outputs, self.controlword)?;
        fields.mode.try_set(outputs, self.mode)?;
        match fields.target {
            TargetField::Position(field) | TargetField::Velocity(field)
                => field.try_set(outputs, self.target),
            TargetField::Torque(field)
                => field.try_set(outputs, self.target.clamp(i16::MIN.into(), i16::MAX.into()) as i16),
        }
    }
    /// read back the commanded values from an output buffer
    pub fn outputs(fields: &DriveFields, outputs: &[u8]) -> PackingResult<Self> {
        Ok(Self {
            controlword: fields.controlword.try_get(outputs)?,
            mode: fields.mode.try_get(outputs)?,
            target: match fields.target {
                TargetField::Position(field) | TargetField::Velocity(field) => field.try_get(outputs)?,
                TargetField::Torque(field) => field.try_get(outputs)?.into(),
                },
            .. Default::default()
            })
    }
    /// read the observed values from the input buffer
    pub fn unpack(&mut self, fields: &DriveFields, inputs: &[u8]) -> PackingResult<()> {
        self.statusword = fields.statusword.try_get(inputs)?;
        self.velocity = fields.velocity.try_get(inputs)?;
        Ok(())
    }
}


/// one register write of a mapping sequence
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MappingWrite {
    pub index: u16,
    pub sub: u8,
    /// little endian value
    pub data: Vec<u8>,
}

/**
    exact sequence of register writes applying a layout, in the order drives expect

    For the output direction then the input direction:
    1. clear the sync manager assignment count
    2. clear the mapping object's entry count
    3. write each entry (subindex 1, 2, ...)
    4. write the mapping object's entry count
    5. assign the mapping object to the sync manager channel
    6. set the sync manager assignment count to 1

    The sequence only depends on the layout, so applying it again on a drive reconfigures it from scratch.
*/
pub fn writes(layout: &ProcessDataLayout) -> Vec<MappingWrite> {
    let mut plan = Vec::new();
    for (assignment, pdo, entries) in [
            (sdo::rx_assignment, sdo::rx_mapping, layout.outputs()),
            (sdo::tx_assignment, sdo::tx_mapping, layout.inputs()),
            ] {
        plan.push(byte(assignment.len(), 0));
        plan.push(byte(pdo.len(), 0));
        for (i, entry) in entries.iter().enumerate() {
            let slot = pdo.slot(i as u8);
            plan.push(MappingWrite {index: slot.index, sub: slot.sub, data: u32::from(*entry).to_le_bytes().to_vec()});
        }
        plan.push(byte(pdo.len(), entries.len() as u8));
        let slot = assignment.slot(0);
        plan.push(MappingWrite {index: slot.index, sub: slot.sub, data: pdo.index.to_le_bytes().to_vec()});
        plan.push(byte(assignment.len(), 1));
    }
    plan
}

fn byte(sdo: Sdo<u8>, value: u8) -> MappingWrite {
    MappingWrite {index: sdo.index, sub: sdo.sub, data: vec![value]}
}

/**
    write the given layout to a drive, returning the number of register writes

    The layout size is checked against the buffer sizes the drive declares before anything is written. Any failed write aborts the configuration, which must then be retried from the beginning.
*/
pub async fn configure<M>(master: &mut M, device: DeviceId, layout: &ProcessDataLayout) -> Result<usize, MappingError>
where M: RegisterAccess + ProcessData
{
    let (output_capacity, input_capacity) = master.capacity(device)
        .map_err(MappingError::Capacity)?;
    for (direction, size, capacity) in [
            (SyncDirection::Write, layout.output_size(), output_capacity),
            (SyncDirection::Read, layout.input_size(), input_capacity),
            ] {
        if size > capacity
            {return Err(MappingError::Overflow {direction, bits: size*8, capacity: capacity*8})}
    }

    let plan = writes(layout);
    for write in &plan {
        log::debug!("{}: mapping write {:#06x}:{} {:02x?}", device, write.index, write.sub, write.data);
        master.sdo_write(device, write.index, write.sub, &write.data).await
            .map_err(|source| MappingError::Write {index: write.index, sub: write.sub, source})?;
    }
    log::debug!("{}: mapped {} output bytes, {} input bytes", device, layout.output_size(), layout.input_size());
    Ok(plan.len())
}
