//! Synthetic GRIB2 message builder.
//!
//! Produces structurally valid edition 2 messages with a regular lat/lon
//! grid (template 3.0), product template 4.0 (4.8 for accumulations) and
//! simple packing (5.0). NaN data values are encoded through a bitmap
//! section.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};

/// Build a minimal GRIB2 message with the specified parameters
#[derive(Debug, Clone)]
pub struct Grib2Builder {
    discipline: u8,
    center: u16,
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    // Grid definition, microdegrees
    ni: u32,
    nj: u32,
    la1: i32,
    lo1: i32,
    di: u32,
    dj: u32,
    scanning_mode: u8,
    // Product definition
    param_category: u8,
    param_number: u8,
    level_type: u8,
    level_scale: u8,
    level_value: u32,
    time_unit: u8,
    forecast_time: u32,
    /// Accumulation length in hours; switches the product to template 4.8.
    accumulation_hours: Option<u32>,
    // Data
    data_values: Vec<f32>,
}

impl Default for Grib2Builder {
    fn default() -> Self {
        Self::new_ecmwf()
    }
}

impl Grib2Builder {
    /// ECMWF 2 m temperature on a 2x2 grid covering lat {1, 0} x lon {0, 1}.
    pub fn new_ecmwf() -> Self {
        Self {
            discipline: 0,
            center: 98,
            year: 2024,
            month: 1,
            day: 1,
            hour: 0,
            ni: 2,
            nj: 2,
            la1: 1_000_000,
            lo1: 0,
            di: 1_000_000,
            dj: 1_000_000,
            scanning_mode: 0, // +i, -j, i consecutive
            param_category: 0,
            param_number: 0,
            level_type: 103,
            level_scale: 0,
            level_value: 2,
            time_unit: 1,
            forecast_time: 0,
            accumulation_hours: None,
            data_values: vec![288.15; 4],
        }
    }

    /// NCEP GFS-like message on a 10x10 grid.
    pub fn new_gfs() -> Self {
        Self {
            center: 7,
            year: 2025,
            month: 12,
            day: 10,
            hour: 12,
            ni: 10,
            nj: 10,
            la1: 45_000_000,
            lo1: 230_000_000,
            data_values: vec![288.15; 100],
            ..Self::new_ecmwf()
        }
    }

    pub fn with_discipline(mut self, discipline: u8) -> Self {
        self.discipline = discipline;
        self
    }

    pub fn with_center(mut self, center: u16) -> Self {
        self.center = center;
        self
    }

    pub fn with_reference_time(mut self, year: u16, month: u8, day: u8, hour: u8) -> Self {
        self.year = year;
        self.month = month;
        self.day = day;
        self.hour = hour;
        self
    }

    /// Resize the grid, keeping origin and increments. Data is reset to zero.
    pub fn with_grid(mut self, ni: u32, nj: u32) -> Self {
        self.ni = ni;
        self.nj = nj;
        self.data_values = vec![0.0; (ni * nj) as usize];
        self
    }

    /// Place the first grid point and set the increments, in degrees.
    pub fn with_origin(mut self, first_lat: f64, first_lon: f64, di: f64, dj: f64) -> Self {
        self.la1 = to_micro(first_lat);
        self.lo1 = to_micro(first_lon);
        self.di = to_micro(di).unsigned_abs();
        self.dj = to_micro(dj).unsigned_abs();
        self
    }

    pub fn with_scanning_mode(mut self, scanning_mode: u8) -> Self {
        self.scanning_mode = scanning_mode;
        self
    }

    pub fn with_parameter(mut self, category: u8, number: u8) -> Self {
        self.param_category = category;
        self.param_number = number;
        self
    }

    pub fn with_level(mut self, level_type: u8, level_value: u32) -> Self {
        self.level_type = level_type;
        self.level_scale = 0;
        self.level_value = level_value;
        self
    }

    /// Surface-type level whose value is encoded as missing (ECMWF style).
    pub fn with_missing_level(mut self, level_type: u8) -> Self {
        self.level_type = level_type;
        self.level_scale = 0xFF;
        self.level_value = u32::MAX;
        self
    }

    pub fn with_forecast_hour(mut self, hour: u32) -> Self {
        self.time_unit = 1;
        self.forecast_time = hour;
        self
    }

    /// Forecast time in an arbitrary code table 4.4 unit.
    pub fn with_forecast_time(mut self, unit: u8, value: u32) -> Self {
        self.time_unit = unit;
        self.forecast_time = value;
        self
    }

    /// Accumulation over `[start_hour, start_hour + length_hours]` after the
    /// reference time, encoded with product template 4.8.
    pub fn with_accumulation(mut self, start_hour: u32, length_hours: u32) -> Self {
        self.time_unit = 1;
        self.forecast_time = start_hour;
        self.accumulation_hours = Some(length_hours);
        self
    }

    pub fn with_constant_value(mut self, value: f32) -> Self {
        self.data_values = vec![value; (self.ni * self.nj) as usize];
        self
    }

    pub fn with_gradient(mut self, min_val: f32, max_val: f32) -> Self {
        let n = (self.ni * self.nj) as usize;
        self.data_values = (0..n)
            .map(|i| min_val + (max_val - min_val) * (i as f32 / n as f32))
            .collect();
        self
    }

    /// Field values in payload order. NaN marks a missing point.
    pub fn with_data(mut self, data: Vec<f32>) -> Self {
        self.data_values = data;
        self
    }

    /// Build the complete GRIB2 message bytes
    pub fn build(&self) -> Vec<u8> {
        let sections = [
            self.build_section1(),
            self.build_section3(),
            self.build_section4(),
            self.build_section5(),
            self.build_section6(),
            self.build_section7(),
        ];

        let message_length = 16 + sections.iter().map(Vec::len).sum::<usize>() + 4;

        let mut message = Vec::with_capacity(message_length);
        message.extend_from_slice(b"GRIB");
        message.extend_from_slice(&[0, 0]);
        message.push(self.discipline);
        message.push(2); // Edition 2
        message.extend_from_slice(&(message_length as u64).to_be_bytes());
        for section in &sections {
            message.extend_from_slice(section);
        }
        message.extend_from_slice(b"7777");

        message
    }

    fn present_values(&self) -> Vec<f32> {
        self.data_values.iter().copied().filter(|v| !v.is_nan()).collect()
    }

    fn has_missing(&self) -> bool {
        self.data_values.iter().any(|v| v.is_nan())
    }

    /// (reference, binary scale, bits per value)
    fn packing(&self) -> (f32, i16, u8) {
        let present = self.present_values();
        let (min_val, max_val) = present.iter().fold(
            (f32::INFINITY, f32::NEG_INFINITY),
            |(min, max), &v| (min.min(v), max.max(v)),
        );
        if present.is_empty() {
            return (0.0, 0, 0);
        }
        let range = max_val - min_val;
        if range == 0.0 {
            return (min_val, 0, 0);
        }
        // 16-bit packing: range = 65535 * 2^E
        let binary_scale = (range / 65535.0).log2().ceil() as i16;
        (min_val, binary_scale, 16)
    }

    fn build_section1(&self) -> Vec<u8> {
        let mut section = Vec::new();
        section.extend_from_slice(&21u32.to_be_bytes());
        section.push(1);

        section.extend_from_slice(&self.center.to_be_bytes());
        section.extend_from_slice(&0u16.to_be_bytes()); // Sub-center
        section.push(2); // Master table version
        section.push(0); // Local table version
        section.push(1); // Start of forecast

        section.extend_from_slice(&self.year.to_be_bytes());
        section.push(self.month);
        section.push(self.day);
        section.push(self.hour);
        section.push(0);
        section.push(0);

        section.push(0); // Operational
        section.push(1); // Forecast
        section
    }

    fn build_section3(&self) -> Vec<u8> {
        let mut section = Vec::new();
        section.extend_from_slice(&72u32.to_be_bytes());
        section.push(3);

        section.push(0); // Source of grid definition
        section.extend_from_slice(&(self.ni * self.nj).to_be_bytes());
        section.push(0);
        section.push(0);
        section.extend_from_slice(&0u16.to_be_bytes()); // Template 3.0

        section.push(6); // Spherical earth, radius 6371229 m
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());

        section.extend_from_slice(&self.ni.to_be_bytes());
        section.extend_from_slice(&self.nj.to_be_bytes());
        section.extend_from_slice(&0u32.to_be_bytes()); // Basic angle
        section.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes()); // Subdivisions

        let (la2, lo2) = self.last_point();
        section.extend_from_slice(&encode_signed(self.la1));
        section.extend_from_slice(&encode_signed(self.lo1));
        section.push(48); // Resolution and component flags
        section.extend_from_slice(&encode_signed(la2));
        section.extend_from_slice(&encode_signed(lo2));
        section.extend_from_slice(&self.di.to_be_bytes());
        section.extend_from_slice(&self.dj.to_be_bytes());
        section.push(self.scanning_mode);
        section
    }

    fn last_point(&self) -> (i32, i32) {
        let steps_i = self.ni.saturating_sub(1) as i64 * self.di as i64;
        let steps_j = self.nj.saturating_sub(1) as i64 * self.dj as i64;
        let lo2 = if self.scanning_mode & 0x80 != 0 {
            self.lo1 as i64 - steps_i
        } else {
            self.lo1 as i64 + steps_i
        };
        let la2 = if self.scanning_mode & 0x40 != 0 {
            self.la1 as i64 + steps_j
        } else {
            self.la1 as i64 - steps_j
        };
        (la2 as i32, lo2 as i32)
    }

    fn reference_time(&self) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)
            .and_then(|date| date.and_hms_opt(self.hour as u32, 0, 0))
            .unwrap_or_default()
    }

    fn build_section4(&self) -> Vec<u8> {
        let (length, template) = match self.accumulation_hours {
            Some(_) => (58u32, 8u16),
            None => (34, 0),
        };

        let mut section = Vec::new();
        section.extend_from_slice(&length.to_be_bytes());
        section.push(4);

        section.extend_from_slice(&0u16.to_be_bytes()); // Coordinate values
        section.extend_from_slice(&template.to_be_bytes());

        section.push(self.param_category);
        section.push(self.param_number);
        section.push(2); // Forecast
        section.push(0);
        section.push(0);
        section.extend_from_slice(&0u16.to_be_bytes()); // Hours of cutoff
        section.push(0); // Minutes of cutoff
        section.push(self.time_unit);
        section.extend_from_slice(&self.forecast_time.to_be_bytes());

        section.push(self.level_type);
        section.push(self.level_scale);
        section.extend_from_slice(&self.level_value.to_be_bytes());

        section.push(255); // No second fixed surface
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());

        if let Some(hours) = self.accumulation_hours {
            let end = self.reference_time()
                + Duration::hours(i64::from(self.forecast_time) + i64::from(hours));
            section.extend_from_slice(&(end.year() as u16).to_be_bytes());
            section.push(end.month() as u8);
            section.push(end.day() as u8);
            section.push(end.hour() as u8);
            section.push(end.minute() as u8);
            section.push(end.second() as u8);

            section.push(1); // One time range
            section.extend_from_slice(&0u32.to_be_bytes()); // Values missing
            section.push(1); // Accumulation
            section.push(2); // Successive steps, same reference time
            section.push(1); // Hours
            section.extend_from_slice(&hours.to_be_bytes());
            section.push(255); // No increment
            section.extend_from_slice(&0u32.to_be_bytes());
        }
        section
    }

    fn build_section5(&self) -> Vec<u8> {
        let (reference, binary_scale, bits) = self.packing();

        let mut section = Vec::new();
        section.extend_from_slice(&21u32.to_be_bytes());
        section.push(5);

        section.extend_from_slice(&(self.present_values().len() as u32).to_be_bytes());
        section.extend_from_slice(&0u16.to_be_bytes()); // Template 5.0
        section.extend_from_slice(&reference.to_be_bytes());
        section.extend_from_slice(&encode_signed_i16(binary_scale));
        section.extend_from_slice(&0u16.to_be_bytes()); // Decimal scale
        section.push(bits);
        section.push(0); // Floating point
        section
    }

    fn build_section6(&self) -> Vec<u8> {
        let mut section = Vec::new();
        if !self.has_missing() {
            section.extend_from_slice(&6u32.to_be_bytes());
            section.push(6);
            section.push(255);
            return section;
        }

        let mut bitmap = vec![0u8; self.data_values.len().div_ceil(8)];
        for (i, v) in self.data_values.iter().enumerate() {
            if !v.is_nan() {
                bitmap[i / 8] |= 0x80 >> (i % 8);
            }
        }
        section.extend_from_slice(&(6 + bitmap.len() as u32).to_be_bytes());
        section.push(6);
        section.push(0);
        section.extend_from_slice(&bitmap);
        section
    }

    fn build_section7(&self) -> Vec<u8> {
        let (reference, binary_scale, bits) = self.packing();

        let mut packed = Vec::new();
        if bits > 0 {
            let scale = 2.0_f32.powi(binary_scale as i32);
            for v in self.present_values() {
                let p = ((v - reference) / scale).round() as u16;
                packed.extend_from_slice(&p.to_be_bytes());
            }
        }

        let mut section = Vec::new();
        section.extend_from_slice(&(5 + packed.len() as u32).to_be_bytes());
        section.push(7);
        section.extend_from_slice(&packed);
        section
    }
}

fn to_micro(degrees: f64) -> i32 {
    (degrees * 1e6).round() as i32
}

/// GRIB2 sign-magnitude encoding of a 4-byte integer.
fn encode_signed(value: i32) -> [u8; 4] {
    let magnitude = value.unsigned_abs() & 0x7FFF_FFFF;
    let raw = if value < 0 { magnitude | 0x8000_0000 } else { magnitude };
    raw.to_be_bytes()
}

fn encode_signed_i16(value: i16) -> [u8; 2] {
    let magnitude = value.unsigned_abs() & 0x7FFF;
    let raw = if value < 0 { magnitude | 0x8000 } else { magnitude };
    raw.to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_message_framing() {
        let data = Grib2Builder::new_gfs().build();

        assert_eq!(&data[0..4], b"GRIB");
        assert_eq!(data[7], 2);
        assert_eq!(data[6], 0);
        assert_eq!(
            u64::from_be_bytes(data[8..16].try_into().unwrap()),
            data.len() as u64
        );
        assert_eq!(&data[data.len() - 4..], b"7777");
    }

    #[test]
    fn test_negative_coordinates_are_sign_magnitude() {
        assert_eq!(encode_signed(-1), [0x80, 0, 0, 1]);
        assert_eq!(encode_signed(1_000_000), 1_000_000u32.to_be_bytes());
        assert_eq!(encode_signed_i16(-12), [0x80, 12]);
    }

    #[test]
    fn test_missing_values_produce_bitmap() {
        let with_gap = Grib2Builder::new_ecmwf()
            .with_data(vec![1.0, f32::NAN, 3.0, 4.0])
            .build();
        let without = Grib2Builder::new_ecmwf()
            .with_data(vec![1.0, 2.0, 3.0, 4.0])
            .build();

        // One bitmap byte added, one packed value removed
        assert_eq!(with_gap.len(), without.len() + 1 - 2);
    }

    #[test]
    fn test_accumulation_uses_template_4_8() {
        let plain = Grib2Builder::new_ecmwf().build();
        let accum = Grib2Builder::new_ecmwf().with_accumulation(0, 30).build();
        assert_eq!(accum.len(), plain.len() + 24);

        // Section 4 follows sections 0 (16), 1 (21) and 3 (72)
        let s4 = &accum[109..];
        assert_eq!(u32::from_be_bytes(s4[0..4].try_into().unwrap()), 58);
        assert_eq!(u16::from_be_bytes([s4[7], s4[8]]), 8);
        // 2024-01-01T00 + 30 h
        assert_eq!(&s4[34..41], &[0x07, 0xE8, 1, 2, 6, 0, 0]);
    }

    #[test]
    fn test_last_point_follows_scanning_mode() {
        let b = Grib2Builder::new_ecmwf().with_grid(3, 2).with_origin(10.0, 0.0, 1.0, 1.0);
        assert_eq!(b.last_point(), (9_000_000, 2_000_000));

        let b = b.with_scanning_mode(0x40);
        assert_eq!(b.last_point(), (11_000_000, 2_000_000));
    }
}
