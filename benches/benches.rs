use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use eps::calibration::{radiance_to_bt, radiance_to_reflectance};
use eps::record::{read_records, RecordClass};
use eps::schema::{Field, FieldType, Schema, SchemaEntry};
use eps::section::SectionStore;
use ndarray::Array2;

const VIEWS: usize = 2048;
const SCANLINES: usize = 360;

fn schema() -> Schema {
    let mdr = vec![
        Field::new("FRAME_INDICATOR", 0, FieldType::U4, vec![]),
        Field::new("SCENE_RADIANCES", 4, FieldType::I2, vec![5, VIEWS]).with_scale(0.01),
    ];
    Schema::from_sections(
        "bench",
        "1",
        vec![SchemaEntry::new(RecordClass::Mdr, 2, mdr)],
    )
    .unwrap()
}

fn record(buf: &mut Vec<u8>, class: RecordClass, sub_class: u8, payload: &[u8]) {
    let size = (20 + payload.len()) as u32;
    buf.extend([class as u8, 5, sub_class, 1]);
    buf.extend(size.to_be_bytes());
    buf.extend([0u8; 12]);
    buf.extend(payload);
}

// MDRs with a skipped record every 10 scan-lines.
fn stream() -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + 10 * VIEWS);
    payload.extend(1u32.to_be_bytes());
    for i in 0..5 * VIEWS {
        payload.extend(((i % 4000) as i16 + 100).to_be_bytes());
    }

    let mut buf = Vec::default();
    for line in 0..SCANLINES {
        record(&mut buf, RecordClass::Mdr, 2, &payload);
        if line % 10 == 0 {
            record(&mut buf, RecordClass::Viadr, 1, &[0u8; 64]);
        }
    }
    buf
}

fn bench_decode(c: &mut Criterion) {
    let schema = schema();
    let dat = stream();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(dat.len() as u64));
    group.bench_function("sections", |b| {
        b.iter(|| {
            let store = SectionStore::from_records(read_records(&dat[..], &schema)).unwrap();
            assert_eq!(store.count(RecordClass::Mdr), SCANLINES);
        });
    });
    group.finish();
}

fn bench_calibrate(c: &mut Criterion) {
    let radiance = Array2::from_shape_fn((SCANLINES, VIEWS), |(i, j)| {
        1.0 + ((i * VIEWS + j) % 1000) as f64 * 0.1
    });

    let mut group = c.benchmark_group("calibrate");
    group.throughput(Throughput::Elements(radiance.len() as u64));
    group.bench_function("reflectance", |b| {
        b.iter(|| radiance_to_reflectance(&radiance, 139.9));
    });
    group.bench_function("brightness_temperature", |b| {
        b.iter(|| radiance_to_bt(&radiance, 927.0, 0.3, 0.998));
    });
    group.finish();
}

criterion_group!(benches, bench_decode, bench_calibrate);
criterion_main!(benches);
