//! Cost of one open -> write -> read -> release cycle, and of a busy open.

use chardev::{CharDevice, DeviceConfig};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn session_cycle(c: &mut Criterion) {
    let device = CharDevice::new(DeviceConfig::default()).unwrap();
    let mut buf = [0u8; 256];

    c.bench_function("open_write_read_release", |b| {
        b.iter(|| {
            device.on_open().unwrap();
            device.on_write(black_box(b"some data")).unwrap();
            let n = device.on_read(&mut buf).unwrap();
            device.on_release();
            black_box(n)
        })
    });
}

fn busy_open(c: &mut Criterion) {
    let device = CharDevice::new(DeviceConfig::default()).unwrap();
    device.on_open().unwrap();

    c.bench_function("busy_open", |b| {
        b.iter(|| black_box(device.on_open().is_err()))
    });
}

criterion_group!(benches, session_cycle, busy_open);
criterion_main!(benches);
