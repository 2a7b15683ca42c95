use std::time::Duration;

use scursor::ReadCursor;

use crate::checksum::{crc16, split_trailer, CRC_LENGTH};
use crate::error::{FrameParseError, LinkError};
use crate::exception::ExceptionCode;
use crate::link::{Timeouts, Transport};
use crate::serial::phys::PhysLayer;
use crate::serial::{PhysDecodeLevel, SerialSettings};
use crate::types::{AddressRange, RegisterKind, UnitId};

pub(crate) mod constants {
    pub(crate) const REQUEST_LENGTH: usize = 8;
    /// unit, function code and byte count (or exception code)
    pub(crate) const HEADER_LENGTH: usize = 3;
    pub(crate) const ERROR_BIT: u8 = 0x80;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum FunctionCode {
    ReadHoldingRegisters = 3,
    ReadInputRegisters = 4,
}

impl FunctionCode {
    pub(crate) const fn get_value(self) -> u8 {
        self as u8
    }

    pub(crate) const fn as_error(self) -> u8 {
        self.get_value() | constants::ERROR_BIT
    }
}

impl From<RegisterKind> for FunctionCode {
    fn from(kind: RegisterKind) -> Self {
        match kind {
            RegisterKind::Holding => FunctionCode::ReadHoldingRegisters,
            RegisterKind::Input => FunctionCode::ReadInputRegisters,
        }
    }
}

impl std::fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FunctionCode::ReadHoldingRegisters => {
                write!(f, "READ HOLDING REGISTERS ({:#04X})", self.get_value())
            }
            FunctionCode::ReadInputRegisters => {
                write!(f, "READ INPUT REGISTERS ({:#04X})", self.get_value())
            }
        }
    }
}

pub(crate) fn format_read_request(
    unit: UnitId,
    function: FunctionCode,
    range: AddressRange,
) -> [u8; constants::REQUEST_LENGTH] {
    let [start_hi, start_lo] = range.start.to_be_bytes();
    let [count_hi, count_lo] = range.count.to_be_bytes();
    let body = [
        unit.value,
        function.get_value(),
        start_hi,
        start_lo,
        count_hi,
        count_lo,
    ];
    let [crc_lo, crc_hi] = crc16(&body).to_le_bytes();
    [
        body[0], body[1], body[2], body[3], body[4], body[5], crc_lo, crc_hi,
    ]
}

/// number of bytes that follow the header, determined by the header alone
fn remaining_length(
    function: FunctionCode,
    header: [u8; constants::HEADER_LENGTH],
) -> Result<usize, FrameParseError> {
    let [_, received, count] = header;
    if received == function.as_error() {
        Ok(CRC_LENGTH)
    } else if received == function.get_value() {
        Ok(usize::from(count) + CRC_LENGTH)
    } else {
        Err(FrameParseError::UnexpectedFunction {
            expected: function.get_value(),
            received,
        })
    }
}

pub(crate) fn parse_response(
    unit: UnitId,
    function: FunctionCode,
    count: u16,
    frame: &[u8],
) -> Result<Vec<u16>, LinkError> {
    let truncated = |_| FrameParseError::Truncated;

    let (adu, received_crc) = split_trailer(frame).ok_or(FrameParseError::Truncated)?;
    let calculated_crc = crc16(adu);
    if received_crc != calculated_crc {
        return Err(FrameParseError::CrcMismatch {
            received: received_crc,
            calculated: calculated_crc,
        }
        .into());
    }

    let mut cursor = ReadCursor::new(adu);

    let received_unit = cursor.read_u8().map_err(truncated)?;
    if received_unit != unit.value {
        return Err(FrameParseError::UnexpectedUnit {
            expected: unit.value,
            received: received_unit,
        }
        .into());
    }

    let received_function = cursor.read_u8().map_err(truncated)?;
    if received_function == function.as_error() {
        let code = cursor.read_u8().map_err(truncated)?;
        return Err(LinkError::Exception(ExceptionCode::from(code)));
    }
    if received_function != function.get_value() {
        return Err(FrameParseError::UnexpectedFunction {
            expected: function.get_value(),
            received: received_function,
        }
        .into());
    }

    let byte_count = usize::from(cursor.read_u8().map_err(truncated)?);
    let expected = 2 * usize::from(count);
    if byte_count != expected || cursor.remaining() != expected {
        return Err(FrameParseError::ByteCountMismatch {
            expected,
            received: byte_count,
        }
        .into());
    }

    let mut values = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        values.push(cursor.read_u16_be().map_err(truncated)?);
    }

    Ok(values)
}

/// Modbus RTU master on a serial port
///
/// Requests are issued one at a time. Every response is awaited for at most
/// [`Timeouts::response`] for the first byte and [`Timeouts::byte`] between
/// later bytes.
///
/// Input already buffered when a request is written belongs to an earlier
/// exchange and is discarded. If that exchange was dropped before its response
/// was read, the link first waits out the response timeout so that a late
/// answer is discarded too.
#[derive(Debug)]
pub struct RtuLink {
    phys: PhysLayer,
    unit: UnitId,
    timeouts: Timeouts,
    decode: PhysDecodeLevel,
    // a request was written and its response not yet fully read
    awaiting_response: bool,
}

impl RtuLink {
    /// Open the serial port at `path`
    pub fn open(
        path: &str,
        settings: SerialSettings,
        timeouts: Timeouts,
        decode: PhysDecodeLevel,
    ) -> tokio_serial::Result<Self> {
        let stream = crate::serial::open(path, settings)?;
        tracing::info!("serial port {} open at {} baud", path, settings.baud_rate);
        Ok(Self::new(PhysLayer::new_serial(stream), timeouts, decode))
    }

    fn new(phys: PhysLayer, timeouts: Timeouts, decode: PhysDecodeLevel) -> Self {
        Self {
            phys,
            unit: UnitId::default(),
            timeouts,
            decode,
            awaiting_response: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn mock() -> (Self, tokio::io::DuplexStream) {
        let (local, remote) = tokio::io::duplex(256);
        let link = Self::new(
            PhysLayer::new_mock(local),
            Timeouts::default(),
            PhysDecodeLevel::Nothing,
        );
        (link, remote)
    }

    async fn read_exact(&mut self, buffer: &mut [u8], first: Duration) -> Result<(), LinkError> {
        let expected = buffer.len();
        let mut received = 0;

        while let Some(remaining) = buffer.get_mut(received..).filter(|x| !x.is_empty()) {
            let wait = if received == 0 {
                first
            } else {
                self.timeouts.byte
            };

            match tokio::time::timeout(wait, self.phys.read(remaining, self.decode)).await {
                Err(_) => return Err(LinkError::Timeout { received, expected }),
                Ok(Err(err)) => return Err(err.into()),
                Ok(Ok(0)) => return Err(LinkError::ShortRead { received, expected }),
                Ok(Ok(count)) => received += count,
            }
        }

        Ok(())
    }

    /// Clear out anything left on the line by earlier exchanges
    async fn discard_stale_input(&mut self) {
        if self.awaiting_response {
            tracing::warn!("previous exchange was abandoned, waiting for its response to pass");
            tokio::time::sleep(self.timeouts.response).await;
            self.awaiting_response = false;
        }
        self.phys.discard_input().await;
    }

    async fn write_request(&mut self, data: &[u8]) -> Result<(), LinkError> {
        self.discard_stale_input().await;
        self.awaiting_response = true;
        self.phys.write(data, self.decode).await?;
        Ok(())
    }

    /// Finish the read of a response, discarding the rest of the line on failure
    async fn complete<R>(&mut self, result: Result<R, LinkError>) -> Result<R, LinkError> {
        self.awaiting_response = false;
        if result.is_err() {
            self.phys.discard_input().await;
        }
        result
    }

    async fn exchange(
        &mut self,
        function: FunctionCode,
        range: AddressRange,
    ) -> Result<Vec<u16>, LinkError> {
        let request = format_read_request(self.unit, function, range);
        tracing::debug!("RTU TX - unit: {} {} {}", self.unit, function, range);
        self.write_request(&request).await?;

        let mut header = [0u8; constants::HEADER_LENGTH];
        self.read_exact(&mut header, self.timeouts.response).await?;

        let mut frame = header.to_vec();
        frame.resize(
            constants::HEADER_LENGTH + remaining_length(function, header)?,
            0,
        );
        if let Some(rest) = frame.get_mut(constants::HEADER_LENGTH..) {
            self.read_exact(rest, self.timeouts.byte).await?;
        }

        parse_response(self.unit, function, range.count, &frame)
    }
}

impl Transport for RtuLink {
    fn set_target(&mut self, unit: UnitId) {
        if unit.is_rtu_reserved() {
            tracing::warn!("addressing reserved unit ID {}", unit);
        }
        self.unit = unit;
    }

    async fn read_registers(
        &mut self,
        kind: RegisterKind,
        range: AddressRange,
    ) -> Result<Vec<u16>, LinkError> {
        let range = range.of_read_registers()?;
        let result = self.exchange(FunctionCode::from(kind), range).await;
        self.complete(result).await
    }

    async fn write_raw(&mut self, data: &[u8]) -> Result<(), LinkError> {
        self.write_request(data).await
    }

    async fn read_raw(&mut self, buffer: &mut [u8]) -> Result<(), LinkError> {
        let result = self.read_exact(buffer, self.timeouts.response).await;
        self.complete(result).await
    }
}
