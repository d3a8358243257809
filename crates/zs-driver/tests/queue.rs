//! Streaming queue behaviour against the simulated loopback device

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use zs_driver::chip::regs::status;
use zs_driver::chip::wire::ZS_IDLE_WORD;
use zs_driver::{Channel, DmaError, LoopbackDevice, NullGpio, PollSync, StreamingQueue};

const READ_LEN: usize = 1024;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn running_queue(device: &LoopbackDevice) -> StreamingQueue {
    let engine = device.engine(Box::new(PollSync), 64).unwrap();
    let queue = StreamingQueue::new(engine, Box::new(NullGpio));
    queue.init(READ_LEN).unwrap();
    queue
}

/// Poll `condition` until it holds or two seconds pass
fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

#[test]
fn test_two_producers_keep_their_own_order() {
    init_tracing();
    let device = LoopbackDevice::with_window_words(4096);
    let queue = Arc::new(running_queue(&device));

    let producers: Vec<_> = (0..2_u64)
        .map(|producer| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for seq in 0..100_u64 {
                    let word = (producer << 32) | seq;
                    queue.write(&[word, word, word]).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    assert!(wait_for(|| device.received_words().len() == 600));
    let received = device.received_words();
    for producer in 0..2_u64 {
        let sequence: Vec<u64> = received
            .iter()
            .filter(|&&w| w >> 32 == producer)
            .map(|&w| w & 0xFFFF_FFFF)
            .collect();
        let expected: Vec<u64> = (0..100).flat_map(|seq| [seq; 3]).collect();
        assert_eq!(sequence, expected, "producer {producer}");
    }
    assert_eq!(queue.dropped_buffers(), 0);
    assert_eq!(queue.pending(), 0);
}

#[test]
fn test_no_register_writes_after_stop() {
    let device = LoopbackDevice::with_window_words(4096);
    let queue = running_queue(&device);

    queue.write(&[1, 2, 3]).unwrap();
    assert!(wait_for(|| device.received_words().len() == 3));
    queue.stop();
    assert!(!queue.is_running());

    let frozen = device.register_writes().len();
    queue.write(&[4, 5, 6]).unwrap();
    queue.enqueue(vec![7; 200]).unwrap();
    thread::sleep(Duration::from_millis(20));

    assert_eq!(device.register_writes().len(), frozen);
    assert_eq!(queue.pending(), 2);
    assert_eq!(device.received_words(), vec![1, 2, 3]);
}

#[test]
fn test_write_timeout_drops_buffer_and_halts() {
    let device = LoopbackDevice::with_window_words(4096);
    let queue = running_queue(&device);
    queue.engine().set_channel_timeout(Duration::from_millis(10));
    device.set_stalled(true);

    queue.write(&[1, 2, 3]).unwrap();
    assert!(wait_for(|| queue.dropped_buffers() == 1));
    assert!(wait_for(|| !queue.is_running()));
    assert!(queue
        .last_write_error()
        .is_some_and(|e| e.contains("MM2S")));
    assert!(device.received_words().is_empty());

    // Resume after the owner re-initialises.
    device.set_stalled(false);
    queue.init(READ_LEN).unwrap();
    queue.write(&[8, 9]).unwrap();
    assert!(wait_for(|| device.received_words() == vec![8, 9]));
}

#[test]
fn test_read_layer_round_trip() {
    let device = LoopbackDevice::with_window_words(4096);
    let queue = running_queue(&device);

    let data: Vec<u64> = (1..=40).collect();
    queue.write(&data).unwrap();

    let mut layer = vec![0xFFFF];
    let bytes = queue.read_layer(&mut layer).unwrap();
    assert_eq!(bytes, READ_LEN);
    assert_eq!(&layer[..40], &data[..]);
    assert_eq!(layer.last(), Some(&ZS_IDLE_WORD));
}

#[test]
fn test_read_timeout_reinitialises_queue() {
    let device = LoopbackDevice::with_window_words(4096);
    let queue = running_queue(&device);
    queue.engine().set_channel_timeout(Duration::from_millis(10));

    let mut layer = Vec::new();
    let err = queue.read_layer(&mut layer).unwrap_err();
    assert!(matches!(
        err,
        DmaError::ChannelTimeout { channel: Channel::S2mm, .. }
    ));
    assert!(queue.is_running());
    assert_eq!(queue.engine().read_transfer_len_bytes(), READ_LEN);

    queue.engine().set_channel_timeout(Duration::from_secs(5));
    queue.write(&[11, 12, 13]).unwrap();
    let bytes = queue.read_layer(&mut layer).unwrap();
    assert_eq!(bytes, READ_LEN);
    assert_eq!(&layer[..3], &[11, 12, 13]);
}

#[test]
fn test_stop_during_blocked_read_stays_stopped() {
    let device = LoopbackDevice::with_window_words(4096);
    let queue = running_queue(&device);
    queue.engine().set_channel_timeout(Duration::from_millis(50));

    let (result, writes_after_stop) = thread::scope(|scope| {
        let reader = scope.spawn(|| {
            let mut layer = Vec::new();
            queue.read_layer(&mut layer)
        });
        thread::sleep(Duration::from_millis(10));
        queue.stop();
        let writes_after_stop = device.register_writes().len();
        (reader.join().unwrap(), writes_after_stop)
    });

    assert!(result.unwrap_err().is_timeout());
    assert!(!queue.is_running());
    thread::sleep(Duration::from_millis(5));
    assert_eq!(device.register_writes().len(), writes_after_stop);
}

#[test]
fn test_drop_stops_worker() {
    let device = LoopbackDevice::with_window_words(4096);
    let queue = running_queue(&device);
    drop(queue);
    assert!(status::matches(device.status(Channel::Mm2s), status::HALTED));
    assert!(status::matches(device.status(Channel::S2mm), status::HALTED));
    let frozen = device.register_writes().len();
    thread::sleep(Duration::from_millis(5));
    assert_eq!(device.register_writes().len(), frozen);
}
