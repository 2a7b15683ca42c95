use std::fmt::Write;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::serial::PhysDecodeLevel;

pub(crate) struct PhysLayer {
    layer: PhysLayerImpl,
}

// the serial port, or an in-memory pipe standing in for it during tests
enum PhysLayerImpl {
    Serial(
        tokio_serial::SerialStream,
        tokio::time::Duration,
        Option<tokio::time::Instant>,
    ),
    #[cfg(test)]
    Mock(tokio::io::DuplexStream),
}

impl std::fmt::Debug for PhysLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.layer {
            PhysLayerImpl::Serial(_, _, _) => f.write_str("Serial"),
            #[cfg(test)]
            PhysLayerImpl::Mock(_) => f.write_str("Mock"),
        }
    }
}

impl PhysLayer {
    pub(crate) fn new_serial(stream: tokio_serial::SerialStream) -> Self {
        let inter_char_delay = calculate_inter_character_delay(&stream);
        Self {
            layer: PhysLayerImpl::Serial(stream, inter_char_delay, None),
        }
    }

    #[cfg(test)]
    pub(crate) fn new_mock(stream: tokio::io::DuplexStream) -> Self {
        Self {
            layer: PhysLayerImpl::Mock(stream),
        }
    }

    pub(crate) async fn read(
        &mut self,
        buffer: &mut [u8],
        decode_level: PhysDecodeLevel,
    ) -> Result<usize, std::io::Error> {
        let length = match &mut self.layer {
            PhysLayerImpl::Serial(x, _, last_activity) => {
                let length = x.read(buffer).await?;
                *last_activity = Some(tokio::time::Instant::now());
                length
            }
            #[cfg(test)]
            PhysLayerImpl::Mock(x) => x.read(buffer).await?,
        };

        if decode_level.enabled() {
            if let Some(x) = buffer.get(0..length) {
                tracing::info!("PHYS RX - {}", PhysDisplay::new(decode_level, x))
            }
        }

        Ok(length)
    }

    pub(crate) async fn write(
        &mut self,
        data: &[u8],
        decode_level: PhysDecodeLevel,
    ) -> Result<(), std::io::Error> {
        if decode_level.enabled() {
            tracing::info!("PHYS TX - {}", PhysDisplay::new(decode_level, data));
        }

        match &mut self.layer {
            PhysLayerImpl::Serial(x, inter_char_delay, last_activity) => {
                // keep the bus silent for 3.5 characters between frames
                if let Some(last_activity) = last_activity {
                    tokio::time::sleep_until(*last_activity + *inter_char_delay).await;
                }
                x.write_all(data).await?;
                *last_activity = Some(tokio::time::Instant::now());
                Ok(())
            }
            #[cfg(test)]
            PhysLayerImpl::Mock(x) => x.write_all(data).await,
        }
    }

    /// Drop any bytes already received but not yet read
    pub(crate) async fn discard_input(&mut self) {
        match &mut self.layer {
            PhysLayerImpl::Serial(x, _, _) => {
                use tokio_serial::SerialPort;
                if let Err(err) = x.clear(tokio_serial::ClearBuffer::Input) {
                    tracing::warn!("unable to discard serial input: {}", err);
                }
            }
            #[cfg(test)]
            PhysLayerImpl::Mock(x) => {
                // drain only what is already buffered, never wait for more
                let mut buffer = [0u8; 64];
                while let Ok(Ok(count)) =
                    tokio::time::timeout(tokio::time::Duration::ZERO, x.read(&mut buffer)).await
                {
                    if count == 0 {
                        break;
                    }
                }
            }
        }
    }
}

pub(crate) struct PhysDisplay<'a> {
    level: PhysDecodeLevel,
    data: &'a [u8],
}

impl<'a> PhysDisplay<'a> {
    pub(crate) fn new(level: PhysDecodeLevel, data: &'a [u8]) -> Self {
        PhysDisplay { level, data }
    }
}

impl std::fmt::Display for PhysDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} bytes", self.data.len())?;
        if self.level.data_enabled() {
            format_bytes(f, self.data)?;
        }
        Ok(())
    }
}

fn calculate_inter_character_delay(serial: &tokio_serial::SerialStream) -> tokio::time::Duration {
    use tokio_serial::SerialPort;

    match serial.baud_rate() {
        Ok(baud_rate) => inter_frame_delay(baud_rate),
        Err(_) => {
            tracing::warn!(
                "unable to determine the baud rate, defaulting to {} μs",
                MIN_DELAY.as_micros()
            );
            MIN_DELAY
        }
    }
}

// above this rate the silence is fixed rather than derived from the character time
const MAX_BAUD_RATE: u32 = 19200;
const MIN_DELAY: tokio::time::Duration = tokio::time::Duration::from_micros(1750);

fn inter_frame_delay(baud_rate: u32) -> tokio::time::Duration {
    // Modbus RTU uses 11-bit characters (1 start, 8 data, 1 parity or stop, 1 stop)
    const NUM_BITS_IN_CHAR: u64 = 11;

    if baud_rate == 0 || baud_rate > MAX_BAUD_RATE {
        return MIN_DELAY;
    }

    let character_time = tokio::time::Duration::from_secs(NUM_BITS_IN_CHAR) / baud_rate;
    35 * character_time / 10
}

const BYTES_PER_DECODE_LINE: usize = 18;

pub(crate) fn format_bytes(f: &mut std::fmt::Formatter, bytes: &[u8]) -> std::fmt::Result {
    for chunk in bytes.chunks(BYTES_PER_DECODE_LINE) {
        writeln!(f)?;
        let mut first = true;
        for byte in chunk {
            if !first {
                f.write_char(' ')?;
            }
            first = false;
            write!(f, "{byte:02X?}")?;
        }
    }
    Ok(())
}
