/*!
    Interface of the fieldbus master this crate drives servos through.

    The master itself (frame transport, network scanning, device state machine) is provided by an other library, this module only declares what drive control needs from it:

    - [RegisterAccess] reads and writes objects of a device's dictionary (SDO)
    - [ProcessData] exchanges the mapped process data of all devices at once (PDO)
    - [Fieldbus] opens the network, discovers devices and switches their communication state

    All these operations are `async` and take `&mut self`: a master is driven by one control flow at a time, and no call is issued while an other is pending.

    [crate::simulation::SimulatedBus] implements all of them in memory.
*/

use crate::{
    data::{PduData, Storage},
    sdo::Sdo,
    error::{TransportError, TransportResult},
    };
use core::{fmt, time::Duration};


/// topological position of a device on the network, starting from 0 at the master
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u16);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "device {}", self.0)
    }
}

/// identity of a discovered device, as reported by the network scan
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceInfo {
    /// topological position
    pub position: DeviceId,
    /// configured station alias, 0 when not set
    pub alias: u16,
    pub vendor: u32,
    pub product: u32,
    pub revision: u32,
    /// human readable name of the device
    pub name: String,
}

/**
    the current communication state of devices on the network

    Changing to any mode can be requested from any upper mode or from the preceding one.
*/
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub enum CommunicationState {
    /**
        The init mode allows to set many communication settings. This mode should be used at the beginning and the end of a communication.
    */
    Init,
    /**
        the pre operational mode allows mailbox communication, which is mendatory to configure drives before realtime operations.

        PDO mappings must be written in this state.
    */
    PreOperational,
    /**
        Mode allowing realtime operations, except that commands sent to the devices via their mapping will not be executed.

        Mapping is no more allowed in this state.
    */
    SafeOperational,
    /**
        Realtime operations running

        The master has full access to the devices effector functions. drives expect the master to regularly refresh its commands.
    */
    Operational,
}

/**
    access to the dictionary objects of devices, using mailbox communication

    An implementation only has to provide the untyped [Self::sdo_read] and [Self::sdo_write], the typed accessors are derived from them.
*/
#[allow(async_fn_in_trait)]
pub trait RegisterAccess {
    /// read the raw bytes of an object subitem into `data`, returning the number of bytes received
    async fn sdo_read(&mut self, device: DeviceId, index: u16, sub: u8, data: &mut [u8]) -> TransportResult<usize>;
    /// write the raw bytes of an object subitem
    async fn sdo_write(&mut self, device: DeviceId, index: u16, sub: u8, data: &[u8]) -> TransportResult<()>;

    /// read and unpack the value of an object subitem
    async fn read<T: PduData>(&mut self, device: DeviceId, sdo: Sdo<T>) -> TransportResult<T> {
        let mut buffer = T::Packed::zeroed();
        let received = self.sdo_read(device, sdo.index, sdo.sub, buffer.as_mut()).await?;
        let data = buffer.as_ref().get(.. received)
            .ok_or(TransportError::Protocol("device answered more bytes than requested"))?;
        Ok(T::unpack(data)?)
    }
    /// pack and write a value to an object subitem
    async fn write<T: PduData>(&mut self, device: DeviceId, sdo: Sdo<T>, value: T) -> TransportResult<()> {
        let mut buffer = T::Packed::zeroed();
        value.pack(buffer.as_mut())?;
        self.sdo_write(device, sdo.index, sdo.sub, buffer.as_ref()).await
    }
}

/**
    cyclic exchange of the process data images

    The master holds one output and one input image per device, sized by the device's mapping once the network reaches [CommunicationState::SafeOperational]. Outputs are written before an exchange, inputs are read after.
*/
#[allow(async_fn_in_trait)]
pub trait ProcessData {
    /// send all output images and receive all input images in one network round trip
    async fn exchange(&mut self, timeout: Duration) -> TransportResult<()>;
    /// output image (master to device) of a device
    fn outputs(&mut self, device: DeviceId) -> TransportResult<&mut [u8]>;
    /// input image (device to master) of a device
    fn inputs(&self, device: DeviceId) -> TransportResult<&[u8]>;
    /// byte sizes of the `(output, input)` process data buffers the device declares
    fn capacity(&self, device: DeviceId) -> TransportResult<(usize, usize)>;
}

/// network management of the master
#[allow(async_fn_in_trait)]
pub trait Fieldbus: RegisterAccess + ProcessData {
    /// open the network on the given interface name
    async fn open(&mut self, interface: &str) -> TransportResult<()>;
    /// release the network interface
    async fn close(&mut self) -> TransportResult<()>;
    /// scan the network, returning devices in topological order
    async fn discover(&mut self) -> TransportResult<Vec<DeviceInfo>>;
    /// request all devices to switch to the given state
    async fn switch(&mut self, target: CommunicationState) -> TransportResult<()>;
    /// wait for all devices to report the given state, failing with [TransportError::Timeout] otherwise
    async fn confirm(&mut self, target: CommunicationState, timeout: Duration) -> TransportResult<()>;
}
