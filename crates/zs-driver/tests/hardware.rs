//! Tests against a real ZS controller board
//!
//! Run on the target with `cargo test -- --ignored`; the device location is
//! taken from the `ZS_*` environment variables.

use zs_driver::{open_reset_line, Channel, DeviceConfig, DmaEngine, StreamingQueue};

#[test]
#[ignore] // Requires ZS controller hardware
fn test_hardware_init_and_status() {
    let config = DeviceConfig::from_env().expect("Invalid ZS_* configuration");
    let engine = DmaEngine::open(&config).expect("Failed to map DMA block");
    engine.init(4096).expect("Failed to start DMA channels");

    assert!(engine.check_mm2s_status(zs_driver::chip::regs::status::RUNNING));
    assert!(engine.check_s2mm_status(zs_driver::chip::regs::status::RUNNING));
    println!("{}", engine.status_report(Channel::Mm2s));
    println!("{}", engine.status_report(Channel::S2mm));
    engine.stop();
}

#[test]
#[ignore] // Requires ZS controller hardware and a loaded network
fn test_hardware_queue_reset_and_read() {
    let config = DeviceConfig::from_env().expect("Invalid ZS_* configuration");
    let engine = DmaEngine::open(&config).expect("Failed to map DMA block");
    let gpio = open_reset_line(config.gpio).expect("Failed to open reset line");
    let queue = StreamingQueue::new(engine, gpio);
    queue.init(4096).expect("Failed to start streaming queue");

    queue.write(&[0; 64]).expect("Failed to queue buffer");
    let mut layer = Vec::new();
    match queue.read_layer(&mut layer) {
        Ok(bytes) => println!("read {bytes} bytes"),
        Err(e) => println!("no layer output: {e}"),
    }
    queue.stop();
}
