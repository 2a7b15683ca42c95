//! Vendor framed sub-protocol spoken by TBB inverters
//!
//! A fixed request is written to the bus and answered with a fixed length frame
//! whose last two bytes hold a little-endian CRC-16/MODBUS of everything before.
//! Fields are then read from the frame at byte offsets.

use crate::checksum::{crc16, split_trailer};
use crate::error::FrameError;
use crate::link::Transport;

/// Request written before every frame read
pub const REQUEST: [u8; 8] = [0x7e, 0xff, 0x11, 0x03, 0xa0, 0x08, 0x92, 0xeb];

/// A frame that passed its checksum
///
/// Frames are fetched fresh for every collection and never reused.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VendorFrame {
    bytes: Vec<u8>,
}

impl VendorFrame {
    /// Validate the CRC trailer of a received frame
    pub fn parse(bytes: Vec<u8>) -> Result<Self, FrameError> {
        match split_trailer(&bytes) {
            Some((payload, received)) => {
                let calculated = crc16(payload);
                if received != calculated {
                    return Err(FrameError::Checksum {
                        received,
                        calculated,
                    });
                }
            }
            None => {
                return Err(FrameError::Truncated {
                    length: bytes.len(),
                })
            }
        }

        Ok(Self { bytes })
    }

    /// Raw bytes of the frame, CRC included
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Total length of the frame, CRC included
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if the frame holds no bytes
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Big-endian u16 at byte `offset`, or `None` if it runs past the end of the frame
    pub fn word_at(&self, offset: u16) -> Option<u16> {
        let offset = usize::from(offset);
        match self.bytes.get(offset..offset.checked_add(2)?)? {
            [high, low] => Some(u16::from_be_bytes([*high, *low])),
            _ => None,
        }
    }
}

/// Write the fixed request and read back one validated frame of `length` bytes
pub async fn fetch_frame<T: Transport>(
    link: &mut T,
    length: usize,
) -> Result<VendorFrame, FrameError> {
    let result = exchange(link, length).await;
    if let Err(err) = &result {
        if err.is_corruption() {
            tracing::warn!("vendor frame corrupted: {}", err);
        } else {
            tracing::warn!("vendor frame link failure: {}", err);
        }
    }
    result
}

async fn exchange<T: Transport>(link: &mut T, length: usize) -> Result<VendorFrame, FrameError> {
    link.write_raw(&REQUEST).await.map_err(FrameError::Write)?;

    let mut buffer = vec![0; length];
    link.read_raw(&mut buffer).await.map_err(FrameError::Read)?;

    VendorFrame::parse(buffer)
}
