use std::future::Future;
use std::time::Duration;

use crate::error::LinkError;
use crate::types::{AddressRange, RegisterKind, UnitId};

/// Timeouts applied to every read on the link
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    /// bound on the wait for the first byte of a response
    pub response: Duration,
    /// bound on the wait for each later byte
    pub byte: Duration,
}

impl Timeouts {
    /// Create timeouts from their two components
    pub const fn new(response: Duration, byte: Duration) -> Self {
        Self { response, byte }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            response: Duration::from_millis(500),
            byte: Duration::from_millis(500),
        }
    }
}

/// Operations the collector needs from the serial bus
///
/// The link carries the currently addressed unit as state, so a collection
/// must have exclusive access to it from its first request to its last.
pub trait Transport: Send {
    /// Address every following register read to `unit`
    fn set_target(&mut self, unit: UnitId);

    /// Read `range.count` registers starting at `range.start` from the addressed unit
    fn read_registers(
        &mut self,
        kind: RegisterKind,
        range: AddressRange,
    ) -> impl Future<Output = Result<Vec<u16>, LinkError>> + Send;

    /// Write raw bytes to the bus, bypassing Modbus framing
    fn write_raw(&mut self, data: &[u8]) -> impl Future<Output = Result<(), LinkError>> + Send;

    /// Fill `buffer` from the bus
    ///
    /// The first byte is awaited for at most the response timeout and each later
    /// byte for at most the byte timeout.
    fn read_raw(
        &mut self,
        buffer: &mut [u8],
    ) -> impl Future<Output = Result<(), LinkError>> + Send;
}

impl<T> Transport for &mut T
where
    T: Transport,
{
    fn set_target(&mut self, unit: UnitId) {
        (**self).set_target(unit)
    }

    fn read_registers(
        &mut self,
        kind: RegisterKind,
        range: AddressRange,
    ) -> impl Future<Output = Result<Vec<u16>, LinkError>> + Send {
        (**self).read_registers(kind, range)
    }

    fn write_raw(&mut self, data: &[u8]) -> impl Future<Output = Result<(), LinkError>> + Send {
        (**self).write_raw(data)
    }

    fn read_raw(
        &mut self,
        buffer: &mut [u8],
    ) -> impl Future<Output = Result<(), LinkError>> + Send {
        (**self).read_raw(buffer)
    }
}
