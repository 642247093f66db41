#![allow(dead_code)]
//! Synthetic EPS AVHRR/3 level 1b products.
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use eps::record::RecordClass;
use eps::schema::{Field, FieldType, Schema, SchemaEntry};

/// Earth views per scan-line in the synthetic products.
pub const VIEWS: usize = 8;
/// Intermediate tie-points per scan-line.
pub const TIE_POINTS: usize = 3;
/// Bytes after the last MDR field, not covered by the layout.
pub const MDR_PADDING: usize = 4;
pub const MDR_PAYLOAD_LEN: usize = 128 + MDR_PADDING;
pub const GIADR_PAYLOAD_LEN: usize = 42;
pub const MPHR_FIELD_LEN: usize = 48;
pub const VIADR_PAYLOAD_LEN: usize = 16;

pub const CH1_IRRADIANCE: f64 = 139.9;
pub const CH2_IRRADIANCE: f64 = 233.2;
pub const CH3A_IRRADIANCE: f64 = 65.4;
/// (wavenumber, constant1, constant2 slope) for 3b, 4 and 5
pub const THERMAL: [(f64, f64, f64); 3] = [
    (2687.0, 1.8, 0.9968),
    (927.0, 0.3, 0.998),
    (837.0, 0.4, 0.998),
];

const MPHR_FIELDS: [&str; 6] = [
    "SENSING_START",
    "SENSING_END",
    "SPACECRAFT_ID",
    "INSTRUMENT_ID",
    "ORBIT_START",
    "ORBIT_END",
];

pub fn schema() -> Schema {
    let mphr = MPHR_FIELDS
        .iter()
        .enumerate()
        .map(|(i, name)| Field::text(name, i * MPHR_FIELD_LEN, MPHR_FIELD_LEN))
        .collect();

    let mut giadr = vec![
        Field::new("CH1_SOLAR_FILTERED_IRRADIANCE", 0, FieldType::I2, vec![]).with_scale(0.1),
        Field::new("CH2_SOLAR_FILTERED_IRRADIANCE", 2, FieldType::I2, vec![]).with_scale(0.1),
        Field::new("CH3A_SOLAR_FILTERED_IRRADIANCE", 4, FieldType::I2, vec![]).with_scale(0.1),
    ];
    for (i, ch) in ["CH3B", "CH4", "CH5"].iter().enumerate() {
        let offset = 6 + i * 12;
        giadr.push(
            Field::new(&format!("{ch}_CENTRAL_WAVENUMBER"), offset, FieldType::I4, vec![])
                .with_scale(1e-3),
        );
        giadr.push(
            Field::new(&format!("{ch}_CONSTANT1"), offset + 4, FieldType::I4, vec![])
                .with_scale(1e-5),
        );
        giadr.push(
            Field::new(&format!("{ch}_CONSTANT2_SLOPE"), offset + 8, FieldType::I4, vec![])
                .with_scale(1e-6),
        );
    }

    let mdr = vec![
        Field::new("FRAME_INDICATOR", 0, FieldType::U4, vec![]),
        Field::new("EARTH_VIEWS_PER_SCANLINE", 4, FieldType::U2, vec![]),
        Field::new("NAV_SAMPLE_RATE", 6, FieldType::U2, vec![]),
        Field::new("SCENE_RADIANCES", 8, FieldType::I2, vec![5, VIEWS]).with_scale(0.01),
        Field::new("EARTH_LOCATION_FIRST", 88, FieldType::I4, vec![2]).with_scale(1e-4),
        Field::new("EARTH_LOCATIONS", 96, FieldType::I4, vec![TIE_POINTS, 2]).with_scale(1e-4),
        Field::new("EARTH_LOCATION_LAST", 120, FieldType::I4, vec![2]).with_scale(1e-4),
    ];

    Schema::from_sections(
        "eps_avhrrl1b",
        "test",
        vec![
            SchemaEntry::new(RecordClass::Mphr, 0, mphr),
            SchemaEntry::new(RecordClass::Giadr, 1, giadr),
            SchemaEntry::new(RecordClass::Mdr, 2, mdr),
        ],
    )
    .unwrap()
}

/// Radiance at a pixel of a band.
pub fn radiance(line: usize, band: usize, col: usize) -> f64 {
    (band as f64 + 1.0) * 10.0 + line as f64 + col as f64 * 0.1
}

/// Tie-point (lat, lon) at tie-point column `k`, 0 being the first earth location.
pub fn location(line: usize, k: usize) -> (f64, f64) {
    (10.0 + line as f64 + k as f64 * 0.5, 20.0 + line as f64 + k as f64 * 0.5)
}

/// Parameters of a synthetic product.
#[derive(Debug, Clone)]
pub struct Granule {
    pub spacecraft: &'static str,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub scanlines: usize,
    /// Scan-lines where channel 3a rather than 3b is active.
    pub channel_3a_lines: Vec<usize>,
    pub nav_sample_rate: u16,
    pub views: u16,
    /// Add an MDR of a sub-class the schema does not describe.
    pub unknown_records: bool,
}

impl Granule {
    pub fn new(start_hour: u32, scanlines: usize) -> Self {
        let start = Utc.with_ymd_and_hms(2023, 6, 1, start_hour, 0, 0).unwrap();
        Self {
            spacecraft: "M01",
            start,
            end: start + chrono::Duration::minutes(3),
            scanlines,
            channel_3a_lines: vec![],
            nav_sample_rate: 20,
            views: 2048,
            unknown_records: true,
        }
    }

    pub fn filename(&self) -> String {
        format!(
            "AVHR_xxx_1B_{}_{}_{}_N_O_{}",
            self.spacecraft,
            self.start.format("%Y%m%d%H%M%SZ"),
            self.end.format("%Y%m%d%H%M%SZ"),
            self.end.format("%Y%m%d%H%M%SZ"),
        )
    }

    pub fn write(&self, dir: &Path) -> PathBuf {
        self.write_as(dir, &self.filename())
    }

    pub fn write_as(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, self.bytes()).unwrap();
        path
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut buf = Vec::default();

        record(&mut buf, RecordClass::Mphr, 0, &self.mphr());
        if self.unknown_records {
            record(&mut buf, RecordClass::Viadr, 1, &[0xaa; VIADR_PAYLOAD_LEN]);
        }
        record(&mut buf, RecordClass::Giadr, 1, &giadr());
        for line in 0..self.scanlines {
            record(&mut buf, RecordClass::Mdr, 2, &self.mdr(line));
        }
        if self.unknown_records {
            record(&mut buf, RecordClass::Mdr, 9, &[0xbb; 10]);
        }
        buf
    }

    fn mphr(&self) -> Vec<u8> {
        let values = [
            self.start.format("%Y%m%d%H%M%SZ").to_string(),
            self.end.format("%Y%m%d%H%M%SZ").to_string(),
            self.spacecraft.to_string(),
            "AVHR".to_string(),
            "12345".to_string(),
            "12346".to_string(),
        ];
        let mut buf = Vec::default();
        for (name, value) in MPHR_FIELDS.iter().zip(values) {
            let mut field = format!("{name:<30}= {value}");
            while field.len() < MPHR_FIELD_LEN - 1 {
                field.push(' ');
            }
            field.push('\n');
            buf.extend(field.as_bytes());
        }
        buf
    }

    fn mdr(&self, line: usize) -> Vec<u8> {
        let mut buf = Vec::default();
        let frame: u32 = if self.channel_3a_lines.contains(&line) {
            (1 << 16) | 1
        } else {
            1
        };
        buf.extend(frame.to_be_bytes());
        buf.extend(self.views.to_be_bytes());
        buf.extend(self.nav_sample_rate.to_be_bytes());
        for band in 0..5 {
            for col in 0..VIEWS {
                let val = (radiance(line, band, col) * 100.0).round() as i16;
                buf.extend(val.to_be_bytes());
            }
        }
        for k in 0..TIE_POINTS + 2 {
            let (lat, lon) = location(line, k);
            buf.extend(((lat * 1e4).round() as i32).to_be_bytes());
            buf.extend(((lon * 1e4).round() as i32).to_be_bytes());
        }
        buf.extend([0u8; MDR_PADDING]);
        assert_eq!(buf.len(), MDR_PAYLOAD_LEN);
        buf
    }
}

fn giadr() -> Vec<u8> {
    let mut buf = Vec::default();
    for irr in [CH1_IRRADIANCE, CH2_IRRADIANCE, CH3A_IRRADIANCE] {
        buf.extend(((irr * 10.0).round() as i16).to_be_bytes());
    }
    for (wn, c1, c2) in THERMAL {
        buf.extend(((wn * 1e3).round() as i32).to_be_bytes());
        buf.extend(((c1 * 1e5).round() as i32).to_be_bytes());
        buf.extend(((c2 * 1e6).round() as i32).to_be_bytes());
    }
    assert_eq!(buf.len(), GIADR_PAYLOAD_LEN);
    buf
}

/// Append a record with a Generic Record Header to `buf`.
pub fn record(buf: &mut Vec<u8>, class: RecordClass, sub_class: u8, payload: &[u8]) {
    let size = (20 + payload.len()) as u32;
    buf.extend([class as u8, 5, sub_class, 1]);
    buf.extend(size.to_be_bytes());
    buf.extend([0u8; 12]);
    buf.extend(payload);
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {expected}, got {actual}"
    );
}
