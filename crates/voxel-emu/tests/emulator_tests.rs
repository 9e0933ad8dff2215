//! Whole-emulator smoke test: bring the supervisor up over an in-process
//! socket pair and run the identify exchange a real host performs first.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};
use voxel_core::objects::create_object;
use voxel_core::registry::RegistryBuilder;
use voxel_emu::config::EmulatorConfig;
use voxel_emu::link::HostLink;
use voxel_emu::supervisor::{Supervisor, SupervisorOptions};
use voxel_proto::framing::{
    build_frame, check_packet, MESSAGE_HEADER_SIZE, MESSAGE_TRAILER_SIZE,
};

const MACHINE_CFG: &str = "\
[mcu]\n\
frequency = 1MHz\n\
\n\
[digital_pin led]\n\
pin = PC7\n\
\n\
[thermistor hotend_sensor]\n\
pin = PC0\n";

#[test]
fn identify_exchange_over_a_live_supervisor() {
    let config = EmulatorConfig::parse(MACHINE_CFG).unwrap();
    let mut builder = RegistryBuilder::new(voxel_core::board::Board::generic(
        config.frequency.unwrap(),
    ));
    for section in &config.objects {
        let object = create_object(
            section.class,
            builder.next_id(),
            &section.name,
            &section.options,
            builder.board(),
        )
        .unwrap();
        builder.register(object).unwrap();
    }
    let registry = builder.build();

    let (mut host, mcu) = UnixStream::pair().unwrap();
    mcu.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
    host.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
    let link = HostLink::from_parts(
        Box::new(mcu.try_clone().unwrap()),
        Box::new(mcu),
    );

    let emulator = Supervisor::start(
        registry,
        link,
        SupervisorOptions {
            process_frequency: 1_000,
            realtime: false,
        },
    )
    .unwrap();

    // identify offset=0 count=40, using the protocol's fixed tag 1.
    let payload = [0x01, 0x00, 40];
    host.write_all(&build_frame(1, &payload)).unwrap();

    // Collect frames until the identify_response (tag 0) shows up.
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 256];
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut identify_payload = None;
    'outer: while Instant::now() < deadline {
        match host.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(err) => panic!("host read failed: {err}"),
        }
        loop {
            let n = check_packet(&buffer);
            if n == 0 {
                break;
            }
            assert!(n > 0, "MCU emitted an unparseable frame");
            let frame: Vec<u8> = buffer.drain(..n as usize).collect();
            let payload = &frame[MESSAGE_HEADER_SIZE..frame.len() - MESSAGE_TRAILER_SIZE];
            if payload.first() == Some(&0) {
                identify_payload = Some(payload.to_vec());
                break 'outer;
            }
        }
    }

    let payload = identify_payload.expect("no identify_response before timeout");
    // Payload: tag 0, offset (VLQ 0), length byte, then the blob chunk.
    assert_eq!(payload[0], 0);
    assert_eq!(payload[1], 0);
    let chunk_len = payload[2] as usize;
    assert!(chunk_len > 0, "identity blob chunk is empty");
    assert_eq!(payload.len(), 3 + chunk_len);
    // zlib header of the compressed identity dictionary.
    assert_eq!(payload[3], 0x78);

    emulator.stop();
}
