use std::collections::HashMap;

use exporter485::checksum::crc16;
use exporter485::frame::REQUEST;
use exporter485::*;

/// Transport that answers from in-memory register tables and a canned vendor frame
#[derive(Default)]
struct ScriptedLink {
    registers: HashMap<(RegisterKind, u16), u16>,
    frame: Vec<u8>,
    fail_at: Option<u16>,
    fail_write: bool,
    targets: Vec<UnitId>,
    reads: Vec<(RegisterKind, AddressRange)>,
    written: Vec<Vec<u8>>,
}

impl ScriptedLink {
    fn with_registers(kind: RegisterKind, start: u16, values: &[u16]) -> Self {
        let mut link = Self::default();
        link.set_registers(kind, start, values);
        link
    }

    fn with_frame(payload: &[u8]) -> Self {
        let mut frame = payload.to_vec();
        frame.extend_from_slice(&crc16(payload).to_le_bytes());
        Self {
            frame,
            ..Default::default()
        }
    }

    fn set_registers(&mut self, kind: RegisterKind, start: u16, values: &[u16]) {
        for (address, value) in (start..).zip(values) {
            self.registers.insert((kind, address), *value);
        }
    }

    fn has_done_io(&self) -> bool {
        !self.targets.is_empty() || !self.reads.is_empty() || !self.written.is_empty()
    }
}

impl Transport for ScriptedLink {
    fn set_target(&mut self, unit: UnitId) {
        self.targets.push(unit);
    }

    async fn read_registers(
        &mut self,
        kind: RegisterKind,
        range: AddressRange,
    ) -> Result<Vec<u16>, LinkError> {
        self.reads.push((kind, range));
        if self.fail_at == Some(range.start) {
            return Err(LinkError::Timeout {
                received: 0,
                expected: 5 + 2 * usize::from(range.count),
            });
        }
        Ok((0..range.count)
            .map(|i| {
                let address = range.start.wrapping_add(i);
                self.registers.get(&(kind, address)).copied().unwrap_or(0)
            })
            .collect())
    }

    async fn write_raw(&mut self, data: &[u8]) -> Result<(), LinkError> {
        if self.fail_write {
            return Err(LinkError::Io(std::io::ErrorKind::BrokenPipe));
        }
        self.written.push(data.to_vec());
        Ok(())
    }

    async fn read_raw(&mut self, buffer: &mut [u8]) -> Result<(), LinkError> {
        match self.frame.get(..buffer.len()) {
            Some(bytes) => {
                buffer.copy_from_slice(bytes);
                Ok(())
            }
            None => Err(LinkError::Timeout {
                received: self.frame.len(),
                expected: buffer.len(),
            }),
        }
    }
}

fn metric(
    name: &str,
    input_type: InputType,
    data_type: Encoding,
    address: u16,
) -> MetricDescriptor {
    MetricDescriptor {
        name: name.to_string(),
        help: None,
        metric_type: MetricType::Gauge,
        input_type,
        data_type,
        word_order: WordOrder::LowHigh,
        address,
        factor: None,
    }
}

fn modbus_class(metrics: Vec<MetricDescriptor>) -> DeviceClass {
    DeviceClass {
        name: "meter".to_string(),
        protocol: Protocol::Modbus,
        frame_length: None,
        metrics,
    }
}

fn inverter_class(frame_length: usize, metrics: Vec<MetricDescriptor>) -> DeviceClass {
    DeviceClass {
        name: "inverter".to_string(),
        protocol: Protocol::TbbInverter,
        frame_length: Some(frame_length),
        metrics,
    }
}

fn range(start: u16, count: u16) -> AddressRange {
    AddressRange::try_from(start, count).unwrap()
}

#[tokio::test]
async fn uint16_holding_register_decodes_to_unsigned() {
    let class = modbus_class(vec![metric(
        "power",
        InputType::HoldingRegister,
        Encoding::Uint16,
        10,
    )]);
    let mut collector = Collector::new(ScriptedLink::with_registers(
        RegisterKind::Holding,
        10,
        &[5],
    ));

    let values = tokio_test::assert_ok!(collector.collect(&class, UnitId::new(7)).await);
    assert_eq!(values, vec![DecodedValue::Unsigned(5)]);
}

#[tokio::test]
async fn int32_input_register_low_word_first() {
    let class = modbus_class(vec![metric(
        "energy",
        InputType::InputRegister,
        Encoding::Int32,
        20,
    )]);
    let mut link = ScriptedLink::with_registers(RegisterKind::Input, 20, &[0x0002, 0x0001]);

    let values = {
        let mut collector = Collector::new(&mut link);
        tokio_test::assert_ok!(collector.collect(&class, UnitId::new(1)).await)
    };

    assert_eq!(values, vec![DecodedValue::Signed(65538)]);
    assert_eq!(link.reads, vec![(RegisterKind::Input, range(20, 2))]);
}

#[tokio::test]
async fn vendor_frame_offset_decodes_big_endian_word() {
    let class = inverter_class(
        8,
        vec![metric("current", InputType::PayloadOffset, Encoding::Uint16, 4)],
    );
    let mut link = ScriptedLink::with_frame(&[0x7e, 0xff, 0x11, 0x03, 0x00, 0x65]);

    let values = {
        let mut collector = Collector::new(&mut link);
        tokio_test::assert_ok!(collector.collect(&class, UnitId::new(1)).await)
    };

    assert_eq!(values, vec![DecodedValue::Unsigned(101)]);
    assert_eq!(link.written, vec![REQUEST.to_vec()]);
    assert!(link.targets.is_empty());
    assert!(link.reads.is_empty());
}

#[tokio::test]
async fn failure_at_any_metric_aborts_the_whole_collection() {
    let names = ["a", "b", "c", "d"];
    let class = modbus_class(
        (0u16..)
            .zip(names)
            .map(|(i, name)| metric(name, InputType::HoldingRegister, Encoding::Uint16, 100 + i))
            .collect(),
    );

    for (position, name) in names.iter().enumerate() {
        let mut link = ScriptedLink::with_registers(RegisterKind::Holding, 100, &[1, 2, 3, 4]);
        let failing = 100 + position as u16;
        link.fail_at = Some(failing);

        let err = {
            let mut collector = Collector::new(&mut link);
            tokio_test::assert_err!(collector.collect(&class, UnitId::new(1)).await)
        };

        assert_eq!(err.kind(), ErrorKind::Transport);
        match err {
            CollectError::Transport {
                metric, address, ..
            } => {
                assert_eq!(metric, *name);
                assert_eq!(address, failing);
            }
            other => panic!("unexpected error: {other}"),
        }

        // nothing after the failing metric is read
        assert_eq!(link.reads.len(), position + 1);
    }
}

#[tokio::test]
async fn values_follow_metric_order() {
    let class = modbus_class(vec![
        metric("c", InputType::InputRegister, Encoding::Int16, 3),
        metric("a", InputType::HoldingRegister, Encoding::Uint16, 1),
        metric("b", InputType::InputRegister, Encoding::Float16, 2),
        metric("d", InputType::HoldingRegister, Encoding::Uint32, 4),
    ]);
    let mut link = ScriptedLink::default();
    link.set_registers(RegisterKind::Holding, 1, &[11]);
    link.set_registers(RegisterKind::Holding, 4, &[0x0004, 0x0001]);
    link.set_registers(RegisterKind::Input, 2, &[22, 0xFFFD]);

    let values = {
        let mut collector = Collector::new(&mut link);
        tokio_test::assert_ok!(collector.collect(&class, UnitId::new(1)).await)
    };

    assert_eq!(
        values,
        vec![
            DecodedValue::Signed(-3),
            DecodedValue::Unsigned(11),
            DecodedValue::Float(22.0),
            DecodedValue::Unsigned(0x0001_0004),
        ]
    );
    assert_eq!(
        link.reads,
        vec![
            (RegisterKind::Input, range(3, 1)),
            (RegisterKind::Holding, range(1, 1)),
            (RegisterKind::Input, range(2, 1)),
            (RegisterKind::Holding, range(4, 2)),
        ]
    );
}

#[tokio::test]
async fn target_is_addressed_before_every_collection() {
    let class = modbus_class(vec![metric(
        "a",
        InputType::HoldingRegister,
        Encoding::Uint16,
        0,
    )]);
    let mut link = ScriptedLink::default();

    {
        let mut collector = Collector::new(&mut link);
        tokio_test::assert_ok!(collector.collect(&class, UnitId::new(3)).await);
        tokio_test::assert_ok!(collector.collect(&class, UnitId::new(9)).await);
    }

    assert_eq!(link.targets, vec![UnitId::new(3), UnitId::new(9)]);
}

#[tokio::test]
async fn one_vendor_frame_is_fetched_per_collection() {
    let class = inverter_class(
        12,
        vec![
            metric("a", InputType::PayloadOffset, Encoding::Uint16, 4),
            metric("b", InputType::PayloadOffset, Encoding::Int16, 6),
            metric("c", InputType::PayloadOffset, Encoding::Float16, 8),
        ],
    );
    let mut link = ScriptedLink::with_frame(&[
        0x7e, 0xff, 0x11, 0x03, 0x33, 0x0c, 0xff, 0x9b, 0x00, 0x64,
    ]);

    let values = {
        let mut collector = Collector::new(&mut link);
        let first = tokio_test::assert_ok!(collector.collect(&class, UnitId::new(1)).await);
        tokio_test::assert_ok!(collector.collect(&class, UnitId::new(1)).await);
        first
    };

    assert_eq!(
        values,
        vec![
            DecodedValue::Unsigned(0x330c),
            DecodedValue::Signed(-101),
            DecodedValue::Float(100.0),
        ]
    );
    assert_eq!(link.written.len(), 2);
}

#[tokio::test]
async fn corrupted_vendor_frame_is_an_integrity_error() {
    let class = inverter_class(
        8,
        vec![metric("a", InputType::PayloadOffset, Encoding::Uint16, 4)],
    );
    let mut link = ScriptedLink::with_frame(&[0x7e, 0xff, 0x11, 0x03, 0x00, 0x65]);
    if let Some(last) = link.frame.last_mut() {
        *last ^= 0x01;
    }

    let mut collector = Collector::new(link);
    let err = tokio_test::assert_err!(collector.collect(&class, UnitId::new(1)).await);
    assert!(matches!(err, CollectError::Frame(FrameError::Checksum { .. })));
    assert_eq!(err.kind(), ErrorKind::Integrity);
}

#[tokio::test]
async fn vendor_link_failures_are_transport_errors() {
    let class = inverter_class(
        8,
        vec![metric("a", InputType::PayloadOffset, Encoding::Uint16, 4)],
    );

    let mut link = ScriptedLink::with_frame(&[0x7e, 0xff, 0x11, 0x03, 0x00, 0x65]);
    link.fail_write = true;
    let mut collector = Collector::new(link);
    let err = tokio_test::assert_err!(collector.collect(&class, UnitId::new(1)).await);
    assert!(matches!(err, CollectError::Frame(FrameError::Write(_))));
    assert_eq!(err.kind(), ErrorKind::Transport);

    // a frame shorter than configured never completes
    let link = ScriptedLink::with_frame(&[0x7e, 0xff, 0x11]);
    let mut collector = Collector::new(link);
    let err = tokio_test::assert_err!(collector.collect(&class, UnitId::new(1)).await);
    assert!(matches!(err, CollectError::Frame(FrameError::Read(_))));
    assert_eq!(err.kind(), ErrorKind::Transport);
}

#[tokio::test]
async fn unsupported_combinations_fail_before_any_io() {
    let cases = [
        modbus_class(vec![metric(
            "a",
            InputType::PayloadOffset,
            Encoding::Uint16,
            4,
        )]),
        inverter_class(
            12,
            vec![metric("a", InputType::InputRegister, Encoding::Uint16, 4)],
        ),
        inverter_class(
            12,
            vec![metric("a", InputType::PayloadOffset, Encoding::Int32, 4)],
        ),
        inverter_class(
            12,
            vec![metric("a", InputType::PayloadOffset, Encoding::Uint16, 9)],
        ),
        DeviceClass {
            frame_length: None,
            ..inverter_class(12, vec![])
        },
    ];

    for class in cases {
        let mut link = ScriptedLink::with_frame(&[0u8; 10]);
        let err = {
            let mut collector = Collector::new(&mut link);
            tokio_test::assert_err!(collector.collect(&class, UnitId::new(1)).await)
        };
        assert_eq!(err.kind(), ErrorKind::Configuration, "{err}");
        assert!(!link.has_done_io());
    }
}

#[tokio::test]
async fn factor_scales_register_values() {
    let mut voltage = metric("voltage", InputType::InputRegister, Encoding::Uint16, 0);
    voltage.factor = Some(10.0);
    let mut current = metric("current", InputType::InputRegister, Encoding::Float16, 1);
    current.factor = Some(0.5);
    let class = modbus_class(vec![voltage, current]);

    let mut collector = Collector::new(ScriptedLink::with_registers(
        RegisterKind::Input,
        0,
        &[23, 7],
    ));
    let values = tokio_test::assert_ok!(collector.collect(&class, UnitId::new(1)).await);
    assert_eq!(
        values,
        vec![DecodedValue::Unsigned(230), DecodedValue::Float(3.5)]
    );
}
