/*!
Convenient structures to address the drive's dictionnary objects (SDO) and configure mappings.

# Example of PDO mapping objects

	// the mapping objects of the receive direction
	let rx = sdo::SyncChannel {index: 0x1c12, direction: SyncDirection::Write, capacity: 1};
	let pdo = sdo::ConfigurablePdo {index: 0x1600, capacity: 8};

	// entry 1 of the PDO maps the controlword
	master.write(device, pdo.slot(0), PdoEntry::from(sdo::cia402::controlword)).await?;
	master.write(device, pdo.len(), 1).await?;
	master.write(device, rx.slot(0), pdo.index).await?;
	master.write(device, rx.len(), 1).await?;

[crate::mapping] performs this sequence in the order drives expect.
*/

#![allow(non_upper_case_globals)]

use crate::data::{PduData, Storage};
use bilge::prelude::*;
use core::{fmt, marker::PhantomData};


/// description of an SDO's subitem, not a SDO itself
pub struct Sdo<T: PduData> {
	/// index of the item in the slave's dictionnary of objects
	pub index: u16,
	/// subindex in the item
	pub sub: u8,
	/// bit size of the subitem, as it appears in a PDO mapping entry
	pub bits: u8,
	extracted: PhantomData<T>,
}
impl<T: PduData> Sdo<T> {
	/// address an sdo subitem, deducing its bit size from the `PduData` impl
	pub const fn sub(index: u16, sub: u8) -> Self { Self{
		index,
		sub,
		bits: (T::Packed::LEN * 8) as u8,
		extracted: PhantomData,
	}}
	/// address the subitem 0 of an sdo, the usual place of simple values
	pub const fn complete(index: u16) -> Self {
		Self::sub(index, 0)
	}
	/// byte size of the subitem
	pub const fn byte_len(&self) -> usize {
		(self.bits as usize + 7) / 8
	}
}
// [Clone] and [Copy] must be implemented manually to allow copying a descriptor pointing to a type which does not implement this operation
impl<T: PduData> Clone for Sdo<T> {
	fn clone(&self) -> Self {*self}
}
impl<T: PduData> Copy for Sdo<T> {}
impl<T: PduData> PartialEq for Sdo<T> {
	fn eq(&self, other: &Self) -> bool {
		self.index == other.index && self.sub == other.sub && self.bits == other.bits
	}
}
impl<T: PduData> fmt::Debug for Sdo<T> {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "Sdo {{index: {:#06x}, sub: {}, bits: {}}}", self.index, self.sub, self.bits)
	}
}

/**
	entry of a PDO mapping object, as found in subitems 1.. of `0x1600` or `0x1a00`

	| Bits | Meaning |
	|------|---------|
	| 0-7 | bit size of the mapped object |
	| 8-15 | subindex of the mapped object |
	| 16-31 | index of the mapped object |
*/
#[bitsize(32)]
#[derive(FromBits, DebugBits, Copy, Clone, Eq, PartialEq)]
pub struct PdoEntry {
	pub bits: u8,
	pub sub: u8,
	pub index: u16,
}
crate::data::bilge_pdudata!(PdoEntry, u32);

impl<T: PduData> From<Sdo<T>> for PdoEntry {
	fn from(sdo: Sdo<T>) -> Self {
		PdoEntry::new(sdo.bits, sdo.sub, sdo.index)
	}
}

/// direction of data in a sync channel, from the master's point of view
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SyncDirection {
	/// master is reading from the slave, this is the transmit (TxPDO) direction of the slave
	Read,
	/// master is writing to the slave, this is the receive (RxPDO) direction of the slave
	Write,
}

/// description of SDO configuring a PDO
/// the SDO is assumed to follow the cia402 specifications for PDO SDOs
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct ConfigurablePdo {
	/// index of the SDO that configures the PDO
	pub index: u16,
	/// max number of entries in the PDO
	pub capacity: u8,
}
impl ConfigurablePdo {
	/// subitem holding the number of entries mapped
	pub const fn len(&self) -> Sdo<u8> {Sdo::complete(self.index)}
	/// subitem holding the entry `i` (starting from 0)
	pub const fn slot(&self, i: u8) -> Sdo<PdoEntry> {Sdo::sub(self.index, i+1)}
}
impl fmt::Debug for ConfigurablePdo {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "ConfigurablePdo {{index: {:#06x}, capacity: {}}}", self.index, self.capacity)
	}
}

/// description of SDO configuring a SyncManager channel
/// the SDO is assumed to follow the cia402 specifications for syncmanager SDOs
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct SyncChannel {
	/// index of the SDO that configures the SyncManager channel
	pub index: u16,
	/// direction of the channel
	pub direction: SyncDirection,
	/// max number of PDO that can be assigned to the SyncManager channel
	pub capacity: u8,
}
impl SyncChannel {
	/// subitem holding the number of PDOs assigned
	pub const fn len(&self) -> Sdo<u8> {Sdo::complete(self.index)}
	/// subitem holding the PDO index assigned at position `i` (starting from 0)
	pub const fn slot(&self, i: u8) -> Sdo<u16> {Sdo::sub(self.index, i+1)}
}
impl fmt::Debug for SyncChannel {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "SyncChannel {{index: {:#06x}, direction: {:?}, capacity: {}}}", self.index, self.direction, self.capacity)
	}
}

/// sync manager channel assigning the receive PDOs (outputs of the master)
pub const rx_assignment: SyncChannel = SyncChannel {index: 0x1c12, direction: SyncDirection::Write, capacity: 1};
/// sync manager channel assigning the transmit PDOs (inputs of the master)
pub const tx_assignment: SyncChannel = SyncChannel {index: 0x1c13, direction: SyncDirection::Read, capacity: 1};
/// first receive PDO mapping object
pub const rx_mapping: ConfigurablePdo = ConfigurablePdo {index: 0x1600, capacity: 8};
/// first transmit PDO mapping object
pub const tx_mapping: ConfigurablePdo = ConfigurablePdo {index: 0x1a00, capacity: 8};


/// standard objects of the CiA-402 drive profile
#[allow(non_upper_case_globals)]
pub mod cia402 {
	use super::Sdo;
	use crate::cia402::{ControlWord, StatusWord};

	pub const error: Sdo<u16> = Sdo::complete(0x603f);
	pub const controlword: Sdo<ControlWord> = Sdo::complete(0x6040);
	pub const statusword: Sdo<StatusWord> = Sdo::complete(0x6041);
	/// requested operation mode, see [crate::cia402::OperationMode]
	pub const mode: Sdo<i8> = Sdo::complete(0x6060);
	/// operation mode effectively running
	pub const mode_display: Sdo<i8> = Sdo::complete(0x6061);

	pub mod target {
		use super::*;
		/// counts
		pub const position: Sdo<i32> = Sdo::complete(0x607a);
		pub const velocity: Sdo<i32> = Sdo::complete(0x60ff);
		pub const torque: Sdo<i16> = Sdo::complete(0x6071);
	}
	pub mod current {
		use super::*;
		pub const position: Sdo<i32> = Sdo::complete(0x6064);
		pub const velocity: Sdo<i32> = Sdo::complete(0x606c);
		pub const torque: Sdo<i16> = Sdo::complete(0x6077);
	}
	pub mod profile {
		use super::*;
		pub const velocity: Sdo<u32> = Sdo::complete(0x6081);
		pub const acceleration: Sdo<u32> = Sdo::complete(0x6083);
		pub const deceleration: Sdo<u32> = Sdo::complete(0x6084);
	}
	/// software position limits
	pub mod limit {
		use super::*;
		pub const position_min: Sdo<i32> = Sdo::sub(0x607d, 1);
		pub const position_max: Sdo<i32> = Sdo::sub(0x607d, 2);
	}
	pub mod homing {
		use super::*;
		pub const offset: Sdo<i32> = Sdo::complete(0x607c);
		/// standard homing method code
		pub const method: Sdo<u8> = Sdo::complete(0x6098);
		/// speed during search for switch
		pub const speed_fast: Sdo<u32> = Sdo::sub(0x6099, 1);
		/// speed during search for zero
		pub const speed_slow: Sdo<u32> = Sdo::sub(0x6099, 2);
		pub const acceleration: Sdo<u32> = Sdo::complete(0x609a);
	}
}



/// reasons a drive gives for refusing a dictionary access
///
/// ETG.1000.6 5.6.2.7
#[bitsize(32)]
#[derive(TryFromBits, Debug, Copy, Clone, Eq, PartialEq)]
pub enum SdoAbortCode {
    /// SDO protocol timeout
    Timeout = 0x05_04_00_00,
    /// Client/Server command specifier not valid or unknown
    UnsupportedCommand = 0x05_04_00_01,
    /// Unsupported access to an object
    UnsupportedAccess = 0x06_01_00_00,
    /// Attempt to read to a write only object
    WriteOnly = 0x06_01_00_01,
    /// Attempt to write to a read only object
    ReadOnly = 0x06_01_00_02,
    /// Subindex cannot be written, SI0 must be 0 for write access
    WriteError = 0x06_01_00_03,
    /// Object mapped to RxPDO, SDO Download blocked
    LockedByPdo = 0x06_01_00_06,
    /// The object does not exist in the object directory
    InvalidIndex = 0x06_02_00_00,
    /// The object can not be mapped into the PDO
    CannotMap = 0x06_04_00_41,
    /// The number and length of the objects to be mapped would exceed the PDO length
    PdoTooSmall = 0x06_04_00_42,
    /// Access failed due to a hardware error
    HardwareError = 0x06_06_00_00,
    /// Data type does not match, length of service parameter does not match
    InvalidLength = 0x06_07_00_10,
    /// Subindex does not exist
    InvalidSubIndex = 0x06_09_00_11,
    /// Value range of parameter exceeded (only for write access)
    ValueOutOfRange = 0x06_09_00_30,
    /// General error
    GeneralError = 0x08_00_00_00,
    /**
    Data cannot be transferred or stored to the application because of the present device state

    NOTE: “device state” means the ESM state
    */
    StateRefused = 0x08_00_00_22,
}

impl SdoAbortCode {
    pub fn object_related(self) -> bool   {u32::from(self) >> 24 == 0x06}
    pub fn mapping_related(self) -> bool  {u32::from(self) >> 16 == 0x06_04}
    pub fn device_related(self) -> bool   {u32::from(self) >> 24 == 0x08}
}
impl fmt::Display for SdoAbortCode {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{:?} ({:#010x})", self, u32::from(*self))
	}
}
