//! Criterion benchmarks for the EI wire codec.
//!
//! Measures request encoding and event decoding on the paths a gesture
//! exercises: every drag step encodes a motion plus a frame, and device
//! setup decodes a burst of small events.
//!
//! Run with:
//! ```bash
//! cargo bench --package eis-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use eis_core::protocol::{
    decode, decode_event, Event, FrameCommit, InterfaceKind, MessageBuffer, PressState, Region,
    Request,
};

const DEV: u64 = 0xff00_0000_0000_0003;
const POINTER: u64 = 0xff00_0000_0000_0004;

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn requests() -> Vec<(&'static str, Request)> {
    vec![
        (
            "motion_absolute",
            Request::MotionAbsolute {
                pointer: POINTER,
                x: 960.0,
                y: 540.0,
            },
        ),
        (
            "button",
            Request::Button {
                button: 0xff00_0000_0000_0005,
                code: 0x110,
                state: PressState::Pressed,
            },
        ),
        ("frame", Request::Frame(FrameCommit::new(DEV, 7, 1_234_567))),
        (
            "handshake_name",
            Request::HandshakeName {
                name: "eis-client".to_string(),
            },
        ),
    ]
}

/// The events a server sends while announcing one device.
fn device_setup_bytes() -> Vec<u8> {
    let events = [
        Event::DeviceName {
            device: DEV,
            name: "virtual pointer".to_string(),
        },
        Event::DeviceRegion {
            device: DEV,
            region: Region {
                offset_x: 0,
                offset_y: 0,
                width: 1920,
                height: 1080,
                scale: 1.0,
            },
        },
        Event::DeviceInterface {
            device: DEV,
            object: POINTER,
            interface: "ei_pointer_absolute".to_string(),
            version: 1,
        },
        Event::DeviceDone { device: DEV },
        Event::DeviceResumed {
            device: DEV,
            serial: 3,
        },
    ];
    events
        .iter()
        .flat_map(|e| e.encode(DEV).expect("fixture must encode"))
        .collect()
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn bench_encode_requests(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_request");
    for (name, request) in requests() {
        group.bench_with_input(BenchmarkId::new("request", name), &request, |b, r| {
            b.iter(|| black_box(r).encode())
        });
    }
    group.finish();
}

fn bench_decode_device_setup(c: &mut Criterion) {
    let bytes = device_setup_bytes();
    let mut group = c.benchmark_group("decode_event");

    group.bench_function("device_setup_burst", |b| {
        b.iter(|| {
            let mut buffer = MessageBuffer::new();
            buffer.extend(black_box(&bytes));
            let mut events = Vec::with_capacity(5);
            while let Ok(Some(raw)) = buffer.next_message() {
                events.push(decode_event(InterfaceKind::Device, &raw));
            }
            events
        })
    });

    group.finish();
}

fn bench_drag_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("hot_path");

    // One drag step: motion + frame, encoded then split back into messages.
    group.bench_function("drag_step_roundtrip", |b| {
        let motion = Request::MotionAbsolute {
            pointer: POINTER,
            x: 100.0,
            y: 100.0,
        };
        let frame = Request::Frame(FrameCommit::new(DEV, 7, 1_000));
        b.iter(|| {
            let mut wire = black_box(&motion).encode().expect("motion must encode");
            wire.extend(black_box(&frame).encode().expect("frame must encode"));
            let (first, used) = decode(&wire).expect("first message must decode");
            let (second, _) = decode(&wire[used..]).expect("second message must decode");
            (first.opcode, second.opcode)
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_encode_requests,
    bench_decode_device_setup,
    bench_drag_step
);
criterion_main!(benches);
