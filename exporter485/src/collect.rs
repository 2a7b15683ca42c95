use crate::config::{DeviceClass, InputType, MetricDescriptor, Protocol};
use crate::decode::{decode, DecodedValue};
use crate::error::{CollectError, ConfigError, FrameParseError, LinkError};
use crate::frame::{fetch_frame, VendorFrame};
use crate::link::Transport;
use crate::types::{RegisterKind, UnitId};

/// Polls every metric of a device class from one unit
///
/// A collector owns its link for as long as it lives, so collections through the
/// same collector never interleave.
#[derive(Debug)]
pub struct Collector<T> {
    backend: Backend<T>,
}

#[derive(Debug)]
enum Backend<T> {
    Device(T),
    Simulated(SimulationCounter),
}

/// Source of fake register words used instead of real I/O
#[derive(Debug, Default)]
struct SimulationCounter {
    next: u16,
}

impl SimulationCounter {
    fn next(&mut self) -> u16 {
        let value = self.next;
        self.next = self.next.wrapping_add(1);
        value
    }

    fn words(&mut self, count: u16) -> [u16; 2] {
        let first = self.next();
        let second = if count > 1 { self.next() } else { 0 };
        [first, second]
    }
}

impl<T> Collector<T>
where
    T: Transport,
{
    /// Collect from real devices over `link`
    pub fn new(link: T) -> Self {
        Self {
            backend: Backend::Device(link),
        }
    }

    /// Collect without any I/O, substituting an increasing counter for every word read
    pub fn simulated() -> Self {
        Self {
            backend: Backend::Simulated(SimulationCounter::default()),
        }
    }

    /// True if the collector never touches a link
    pub fn is_simulated(&self) -> bool {
        matches!(self.backend, Backend::Simulated(_))
    }

    /// Collect every metric of `class` from unit `target`
    ///
    /// On success the values are in the same order as `class.metrics`. Any
    /// failure aborts the whole collection and no values are returned.
    pub async fn collect(
        &mut self,
        class: &DeviceClass,
        target: UnitId,
    ) -> Result<Vec<DecodedValue>, CollectError> {
        class.check()?;

        let values = match &mut self.backend {
            Backend::Simulated(counter) => simulate(counter, class),
            Backend::Device(link) => poll(link, class, target).await?,
        };

        tracing::debug!(
            "collected {} metrics of {} from unit {}",
            values.len(),
            class.name,
            target
        );

        Ok(values)
    }
}

fn simulate(counter: &mut SimulationCounter, class: &DeviceClass) -> Vec<DecodedValue> {
    class
        .metrics
        .iter()
        .map(|metric| {
            let words = counter.words(metric.data_type.word_count());
            decode(metric.data_type, metric.word_order, words, metric.factor)
        })
        .collect()
}

async fn poll<T: Transport>(
    link: &mut T,
    class: &DeviceClass,
    target: UnitId,
) -> Result<Vec<DecodedValue>, CollectError> {
    let frame = match class.protocol {
        Protocol::Modbus => {
            link.set_target(target);
            None
        }
        Protocol::TbbInverter => {
            let length = class
                .frame_length
                .ok_or_else(|| ConfigError::MissingFrameLength {
                    module: class.name.clone(),
                    protocol: class.protocol,
                })?;
            Some(fetch_frame(link, length).await?)
        }
    };

    let mut values = Vec::with_capacity(class.metrics.len());
    for metric in &class.metrics {
        let words = match metric.input_type {
            InputType::HoldingRegister => {
                read_registers(link, metric, RegisterKind::Holding).await?
            }
            InputType::InputRegister => read_registers(link, metric, RegisterKind::Input).await?,
            InputType::PayloadOffset => read_payload(frame.as_ref(), metric, class)?,
        };
        values.push(decode(
            metric.data_type,
            metric.word_order,
            words,
            metric.factor,
        ));
    }

    Ok(values)
}

async fn read_registers<T: Transport>(
    link: &mut T,
    metric: &MetricDescriptor,
    kind: RegisterKind,
) -> Result<[u16; 2], CollectError> {
    let range = metric.register_range()?;
    let transport_error = |source| CollectError::Transport {
        metric: metric.name.clone(),
        address: metric.address,
        source,
    };

    let registers = link
        .read_registers(kind, range)
        .await
        .map_err(transport_error)?;

    match registers.as_slice() {
        [first] if range.count == 1 => Ok([*first, 0]),
        [first, second] if range.count == 2 => Ok([*first, *second]),
        _ => Err(transport_error(LinkError::BadFrame(
            FrameParseError::ByteCountMismatch {
                expected: 2 * usize::from(range.count),
                received: 2 * registers.len(),
            },
        ))),
    }
}

fn read_payload(
    frame: Option<&VendorFrame>,
    metric: &MetricDescriptor,
    class: &DeviceClass,
) -> Result<[u16; 2], CollectError> {
    let frame = frame.ok_or_else(|| ConfigError::UnsupportedSource {
        metric: metric.name.clone(),
        input: metric.input_type,
        protocol: class.protocol,
    })?;

    let word = frame
        .word_at(metric.address)
        .ok_or_else(|| ConfigError::OffsetOutOfRange {
            metric: metric.name.clone(),
            offset: metric.address,
            frame_length: frame.len(),
        })?;

    Ok([word, 0])
}
