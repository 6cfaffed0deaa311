//! GRIB2 section parsing.
//!
//! Each GRIB2 message consists of numbered sections. Only the header
//! sections are decoded here; the data section is handed to the
//! [`unpacking`](crate::unpacking) codec on demand.

use crate::error::{Grib2Error, Result};
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Length of Section 0 in edition 2.
pub const INDICATOR_LENGTH: usize = 16;

/// Section 0: Indicator Section (16 bytes)
#[derive(Debug, Clone)]
pub struct Indicator {
    pub magic: [u8; 4],
    pub reserved: u16,
    pub edition: u8,
    pub discipline: u8,
    pub message_length: u64,
}

/// Section 1: Identification Section
#[derive(Debug, Clone)]
pub struct Identification {
    pub center: u16,
    pub sub_center: u16,
    pub table_version: u8,
    pub local_table_version: u8,
    pub significance_of_reference_time: u8,
    pub reference_time: DateTime<Utc>,
    pub production_status: u8,
    pub data_type: u8,
}

/// Section 3: Grid Definition Section.
///
/// Coordinates are stored in degrees. For templates other than 3.0 only
/// the point counts are filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridDefinition {
    pub template: u16,
    pub num_points: u32,
    /// Number of points along a parallel.
    pub ni: u32,
    /// Number of points along a meridian.
    pub nj: u32,
    pub first_latitude: f64,
    pub first_longitude: f64,
    pub last_latitude: f64,
    pub last_longitude: f64,
    pub i_increment: f64,
    pub j_increment: f64,
    pub scanning_mode: u8,
}

/// Section 4: Product Definition Section (common prefix of templates 4.0-4.15)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDefinition {
    pub template: u16,
    pub parameter_category: u8,
    pub parameter_number: u8,
    /// Code table 4.4 unit of `forecast_time`.
    pub time_range_unit: u8,
    pub forecast_time: u32,
    pub level_type: u8,
    /// Physical value of the first fixed surface (scale factor applied).
    pub level_value: f64,
    /// End of the overall time interval of statistically processed
    /// products (templates 4.8 and 4.11).
    pub interval_end: Option<DateTime<Utc>>,
}

/// Section 5: Data Representation Section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRepresentation {
    /// Number of points with a value (bitmap-present points only).
    pub num_data_points: u32,
    pub template: u16,
    pub original_data_type: u8,
    pub reference_value: f32,
    pub binary_scale_factor: i16,
    pub decimal_scale_factor: i16,
    pub bits_per_value: u8,
}

/// Section 6: Bitmap Section
#[derive(Debug, Clone)]
pub struct Bitmap {
    pub indicator: u8,
    pub data: Bytes,
}

/// Section 7: Data Section
#[derive(Debug, Clone)]
pub struct DataSection {
    pub data: Bytes,
}

impl ProductDefinition {
    /// Forecast step in seconds, from code table 4.4.
    pub fn forecast_seconds(&self) -> Result<i64> {
        let unit: i64 = match self.time_range_unit {
            0 => 60,
            1 => 3_600,
            2 => 86_400,
            10 => 3 * 3_600,
            11 => 6 * 3_600,
            12 => 12 * 3_600,
            13 => 1,
            other => {
                return Err(Grib2Error::InvalidSection {
                    section: 4,
                    reason: format!("unsupported time range unit {}", other),
                })
            }
        };
        Ok(i64::from(self.forecast_time) * unit)
    }

    /// Seconds from `reference_time` to the time the field is valid at.
    ///
    /// Accumulations and other statistics are valid at the end of their
    /// interval; `forecast_time` only marks its start.
    pub fn step_seconds(&self, reference_time: DateTime<Utc>) -> Result<i64> {
        match self.interval_end {
            Some(end) => Ok((end - reference_time).num_seconds()),
            None => self.forecast_seconds(),
        }
    }
}

/// Offset of the end-of-interval timestamp within Section 4.
fn interval_end_offset(template: u16) -> Option<usize> {
    match template {
        8 => Some(34),
        11 => Some(37),
        _ => None,
    }
}

/// Decode a 7-octet year/month/day/hour/minute/second timestamp.
fn parse_timestamp(bytes: &[u8], section: u8) -> Result<DateTime<Utc>> {
    if bytes.len() < 7 {
        return Err(Grib2Error::InvalidSection {
            section,
            reason: "timestamp truncated".to_string(),
        });
    }
    let year = u16::from_be_bytes([bytes[0], bytes[1]]);
    let (month, day, hour, minute, second) = (bytes[2], bytes[3], bytes[4], bytes[5], bytes[6]);

    let time = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .and_then(|date| date.and_hms_opt(hour as u32, minute as u32, second as u32))
        .ok_or_else(|| Grib2Error::InvalidSection {
            section,
            reason: format!(
                "Invalid date: {}-{:02}-{:02} {:02}:{:02}:{:02}",
                year, month, day, hour, minute, second
            ),
        })?;
    Ok(DateTime::<Utc>::from_naive_utc_and_offset(time, Utc))
}

impl GridDefinition {
    /// Expand the grid into (lat, lon) sample pairs, in payload order.
    ///
    /// Only regular latitude/longitude grids (template 3.0) are supported.
    /// Scanning-mode flags 0x80 (i negative), 0x40 (j positive) and 0x20
    /// (j consecutive) are honoured.
    pub fn sample_coordinates(&self) -> Result<Vec<(f64, f64)>> {
        if self.template != 0 {
            return Err(Grib2Error::UnsupportedGrid(self.template));
        }

        let ni = self.ni as usize;
        let nj = self.nj as usize;
        let i_negative = self.scanning_mode & 0x80 != 0;
        let j_positive = self.scanning_mode & 0x40 != 0;
        let j_consecutive = self.scanning_mode & 0x20 != 0;

        let lon_step = if i_negative { -self.i_increment } else { self.i_increment };
        let lat_step = if j_positive { self.j_increment } else { -self.j_increment };

        let lon_at = |i: usize| normalize_longitude(self.first_longitude + lon_step * i as f64);
        let lat_at = |j: usize| round_micro(self.first_latitude + lat_step * j as f64);

        let mut points = Vec::with_capacity(ni * nj);
        if j_consecutive {
            for i in 0..ni {
                for j in 0..nj {
                    points.push((lat_at(j), lon_at(i)));
                }
            }
        } else {
            for j in 0..nj {
                for i in 0..ni {
                    points.push((lat_at(j), lon_at(i)));
                }
            }
        }
        Ok(points)
    }
}

/// Round to the microdegree resolution of the grid definition, so that
/// repeated additions of the increment compare equal across messages.
fn round_micro(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

fn normalize_longitude(value: f64) -> f64 {
    let value = round_micro(value);
    if value >= 360.0 {
        round_micro(value - 360.0)
    } else {
        value
    }
}

// ===== Parsing Functions =====

/// Parse Section 0 (Indicator) from start of message
pub fn parse_indicator(data: &[u8]) -> Result<Indicator> {
    if data.len() < INDICATOR_LENGTH {
        return Err(Grib2Error::InvalidFormat(
            "Not enough data for indicator section".to_string(),
        ));
    }

    if &data[0..4] != b"GRIB" {
        return Err(Grib2Error::InvalidFormat(
            "Invalid GRIB magic bytes".to_string(),
        ));
    }

    // Octets 5-6 reserved, 7 discipline, 8 edition, 9-16 total length
    let discipline = data[6];
    let edition = data[7];

    if edition != 2 {
        return Err(Grib2Error::InvalidFormat(format!(
            "Expected GRIB edition 2, got {}",
            edition
        )));
    }

    let mut length = [0u8; 8];
    length.copy_from_slice(&data[8..16]);

    Ok(Indicator {
        magic: [data[0], data[1], data[2], data[3]],
        reserved: u16::from_be_bytes([data[4], data[5]]),
        discipline,
        edition,
        message_length: u64::from_be_bytes(length),
    })
}

/// Parse Section 1 (Identification)
pub fn parse_identification(data: &[u8]) -> Result<Identification> {
    let section_offset = find_section(data, 1)?;
    let section_data = &data[section_offset..];

    if section_data.len() < 21 {
        return Err(Grib2Error::InvalidSection {
            section: 1,
            reason: "Not enough data".to_string(),
        });
    }

    // Skip section header (4 bytes) and section number (1 byte)
    let sec_data = &section_data[5..];

    let center = u16::from_be_bytes([sec_data[0], sec_data[1]]);
    let sub_center = u16::from_be_bytes([sec_data[2], sec_data[3]]);
    let table_version = sec_data[4];
    let local_table_version = sec_data[5];
    let significance_of_reference_time = sec_data[6];

    let reference_time = parse_timestamp(&sec_data[7..], 1)?;

    let production_status = sec_data.get(14).copied().unwrap_or(0);
    let data_type = sec_data.get(15).copied().unwrap_or(0);

    Ok(Identification {
        center,
        sub_center,
        table_version,
        local_table_version,
        significance_of_reference_time,
        reference_time,
        production_status,
        data_type,
    })
}

/// Parse Section 3 (Grid Definition)
pub fn parse_grid_definition(data: &[u8]) -> Result<GridDefinition> {
    let section_offset = find_section(data, 3)?;
    let section_data = &data[section_offset..];

    if section_data.len() < 14 {
        return Err(Grib2Error::InvalidSection {
            section: 3,
            reason: "Not enough data".to_string(),
        });
    }

    // Bytes 6-9: number of data points, 12-13: template number, 14+: template
    let num_points = u32::from_be_bytes([
        section_data[6],
        section_data[7],
        section_data[8],
        section_data[9],
    ]);
    let template = u16::from_be_bytes([section_data[12], section_data[13]]);
    let gd = &section_data[14..];

    let ni = read_u32(gd, 16).unwrap_or(0);
    let nj = read_u32(gd, 20).unwrap_or(0);

    if template != 0 {
        return Ok(GridDefinition {
            template,
            num_points,
            ni,
            nj,
            first_latitude: 0.0,
            first_longitude: 0.0,
            last_latitude: 0.0,
            last_longitude: 0.0,
            i_increment: 0.0,
            j_increment: 0.0,
            scanning_mode: gd.get(57).copied().unwrap_or(0),
        });
    }

    // Template 3.0 (regular lat/lon):
    //  0      shape of the earth
    //  16-19  Ni, 20-23 Nj
    //  24-27  basic angle, 28-31 subdivisions
    //  32-35  La1, 36-39 Lo1, 40 resolution flags
    //  41-44  La2, 45-48 Lo2
    //  49-52  Di,  53-56 Dj, 57 scanning mode
    if gd.len() < 58 {
        return Err(Grib2Error::InvalidSection {
            section: 3,
            reason: format!("Template 0 needs at least 58 bytes, got {}", gd.len()),
        });
    }

    let basic_angle = read_u32(gd, 24).unwrap_or(0);
    let subdivisions = read_u32(gd, 28).unwrap_or(0);
    let unit = if basic_angle == 0
        || basic_angle == u32::MAX
        || subdivisions == 0
        || subdivisions == u32::MAX
    {
        1e-6
    } else {
        basic_angle as f64 / subdivisions as f64
    };

    let la1 = decode_grib2_signed(&gd[32..36]);
    let lo1 = decode_grib2_signed(&gd[36..40]);
    let la2 = decode_grib2_signed(&gd[41..45]);
    let lo2 = decode_grib2_signed(&gd[45..49]);
    let di = read_u32(gd, 49).unwrap_or(0);
    let dj = read_u32(gd, 53).unwrap_or(0);

    Ok(GridDefinition {
        template,
        num_points,
        ni,
        nj,
        first_latitude: la1 as f64 * unit,
        first_longitude: lo1 as f64 * unit,
        last_latitude: la2 as f64 * unit,
        last_longitude: lo2 as f64 * unit,
        i_increment: di as f64 * unit,
        j_increment: dj as f64 * unit,
        scanning_mode: gd[57],
    })
}

/// Parse Section 4 (Product Definition)
pub fn parse_product_definition(data: &[u8]) -> Result<ProductDefinition> {
    let section_offset = find_section(data, 4)?;
    let section_data = &data[section_offset..];

    if section_data.len() < 28 {
        return Err(Grib2Error::InvalidSection {
            section: 4,
            reason: "Not enough data".to_string(),
        });
    }

    // Bytes 7-8: template number, 9: category, 10: number,
    // 17: time range unit, 18-21: forecast time,
    // 22: type of first fixed surface, 23: scale factor, 24-27: scaled value,
    // 34-40 (4.8) or 37-43 (4.11): end of overall time interval
    let template = u16::from_be_bytes([section_data[7], section_data[8]]);
    let parameter_category = section_data[9];
    let parameter_number = section_data[10];
    let time_range_unit = section_data[17];
    let forecast_time = read_u32(section_data, 18).unwrap_or(0);

    let level_type = section_data[22];
    let scale_byte = section_data[23];
    let scaled_value = read_u32(section_data, 24).unwrap_or(0);

    let level_value = if scale_byte == 0xFF || scaled_value == u32::MAX {
        0.0
    } else {
        let magnitude = i32::from(scale_byte & 0x7F);
        let scale = if scale_byte & 0x80 != 0 { -magnitude } else { magnitude };
        scaled_value as f64 * 10f64.powi(-scale)
    };

    let section_length = read_u32(section_data, 0)
        .map(|len| (len as usize).min(section_data.len()))
        .unwrap_or(section_data.len());
    let interval_end = match interval_end_offset(template) {
        Some(at) => {
            let octets = section_data[..section_length].get(at..).unwrap_or_default();
            Some(parse_timestamp(octets, 4)?)
        }
        None => None,
    };

    Ok(ProductDefinition {
        template,
        parameter_category,
        parameter_number,
        time_range_unit,
        forecast_time,
        level_type,
        level_value,
        interval_end,
    })
}

/// Parse Section 5 (Data Representation)
pub fn parse_data_representation(data: &[u8]) -> Result<DataRepresentation> {
    let section_offset = find_section(data, 5)?;
    let section_data = &data[section_offset..];

    if section_data.len() < 11 {
        return Err(Grib2Error::InvalidSection {
            section: 5,
            reason: "Not enough data".to_string(),
        });
    }

    // Octets 6-9: number of data points, 10-11: template number,
    // then for the packing templates sharing the 5.0 prefix:
    // reference value (f32), binary scale (i16), decimal scale (i16),
    // bits per value, type of original field values.
    let num_data_points = read_u32(section_data, 5).unwrap_or(0);
    let template = u16::from_be_bytes([section_data[9], section_data[10]]);
    let template_data = &section_data[11..];

    let reference_value = if template_data.len() >= 4 {
        f32::from_be_bytes([
            template_data[0],
            template_data[1],
            template_data[2],
            template_data[3],
        ])
    } else {
        0.0
    };
    let binary_scale_factor = if template_data.len() >= 6 {
        decode_grib2_signed_i16([template_data[4], template_data[5]])
    } else {
        0
    };
    let decimal_scale_factor = if template_data.len() >= 8 {
        decode_grib2_signed_i16([template_data[6], template_data[7]])
    } else {
        0
    };
    let bits_per_value = template_data.get(8).copied().unwrap_or(0);
    let original_data_type = template_data.get(9).copied().unwrap_or(0);

    Ok(DataRepresentation {
        num_data_points,
        template,
        original_data_type,
        reference_value,
        binary_scale_factor,
        decimal_scale_factor,
        bits_per_value,
    })
}

/// Parse Section 6 (Bitmap). Returns `None` when no bitmap applies.
pub fn parse_bitmap(data: &[u8]) -> Result<Option<Bitmap>> {
    let section_offset = find_section(data, 6)?;
    let section_data = &data[section_offset..];

    let section_length = read_u32(section_data, 0).unwrap_or(0) as usize;
    if section_length < 6 {
        return Err(Grib2Error::InvalidSection {
            section: 6,
            reason: "Not enough data".to_string(),
        });
    }
    let indicator = section_data[5];

    match indicator {
        255 => Ok(None),
        0 => Ok(Some(Bitmap {
            indicator,
            data: Bytes::copy_from_slice(&section_data[6..section_length]),
        })),
        other => Err(Grib2Error::InvalidSection {
            section: 6,
            reason: format!("unsupported bitmap indicator {}", other),
        }),
    }
}

/// Parse Section 7 (Data)
pub fn parse_data_section(data: &[u8]) -> Result<DataSection> {
    let section_offset = find_section(data, 7)?;
    let section_data = &data[section_offset..];

    let section_length = read_u32(section_data, 0).unwrap_or(0) as usize;

    let data_bytes = if section_length > 5 {
        Bytes::copy_from_slice(&section_data[5..section_length])
    } else {
        Bytes::new()
    };

    Ok(DataSection { data: data_bytes })
}

// ===== Helper Functions =====

/// Decode a 4-byte GRIB2 sign-magnitude integer (MSB is the sign bit).
///
/// Returns 0 when `bytes` is not exactly 4 bytes long.
pub fn decode_grib2_signed(bytes: &[u8]) -> i32 {
    if bytes.len() != 4 {
        return 0;
    }
    let raw = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let magnitude = (raw & 0x7FFF_FFFF) as i32;
    if raw & 0x8000_0000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

fn decode_grib2_signed_i16(bytes: [u8; 2]) -> i16 {
    let raw = u16::from_be_bytes(bytes);
    let magnitude = (raw & 0x7FFF) as i16;
    if raw & 0x8000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// Find a section by number within a message. Returns its byte offset.
pub(crate) fn find_section(data: &[u8], section_num: u8) -> Result<usize> {
    let mut offset = INDICATOR_LENGTH;

    loop {
        if offset + 5 > data.len() {
            return Err(Grib2Error::InvalidSection {
                section: section_num,
                reason: "Section not found".to_string(),
            });
        }

        // "7777" end marker
        if &data[offset..offset + 4] == b"7777" {
            return Err(Grib2Error::InvalidSection {
                section: section_num,
                reason: "Reached end of message without finding section".to_string(),
            });
        }

        let section_length = read_u32(data, offset).unwrap_or(0) as usize;

        if section_length < 5 || offset + section_length > data.len() {
            return Err(Grib2Error::InvalidSection {
                section: section_num,
                reason: "Invalid section length".to_string(),
            });
        }

        if data[offset + 4] == section_num {
            return Ok(offset);
        }

        offset += section_length;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regular_grid(scanning_mode: u8) -> GridDefinition {
        GridDefinition {
            template: 0,
            num_points: 6,
            ni: 3,
            nj: 2,
            first_latitude: 10.0,
            first_longitude: 358.0,
            last_latitude: 9.0,
            last_longitude: 0.0,
            i_increment: 1.0,
            j_increment: 1.0,
            scanning_mode,
        }
    }

    #[test]
    fn test_sample_coordinates_default_scan() {
        let points = regular_grid(0).sample_coordinates().unwrap();
        assert_eq!(
            points,
            vec![
                (10.0, 358.0),
                (10.0, 359.0),
                (10.0, 0.0),
                (9.0, 358.0),
                (9.0, 359.0),
                (9.0, 0.0),
            ]
        );
    }

    #[test]
    fn test_sample_coordinates_j_positive_j_consecutive() {
        let mut grid = regular_grid(0x40 | 0x20);
        grid.first_longitude = 0.0;
        let points = grid.sample_coordinates().unwrap();
        assert_eq!(points[0], (10.0, 0.0));
        assert_eq!(points[1], (11.0, 0.0));
        assert_eq!(points[2], (10.0, 1.0));
    }

    #[test]
    fn test_sample_coordinates_rejects_other_templates() {
        let mut grid = regular_grid(0);
        grid.template = 40;
        assert!(matches!(
            grid.sample_coordinates(),
            Err(Grib2Error::UnsupportedGrid(40))
        ));
    }

    #[test]
    fn test_forecast_seconds_units() {
        let mut pd = ProductDefinition {
            template: 0,
            parameter_category: 0,
            parameter_number: 0,
            time_range_unit: 1,
            forecast_time: 6,
            level_type: 1,
            level_value: 0.0,
            interval_end: None,
        };
        assert_eq!(pd.forecast_seconds().unwrap(), 6 * 3600);
        pd.time_range_unit = 0;
        assert_eq!(pd.forecast_seconds().unwrap(), 360);
        pd.time_range_unit = 99;
        assert!(pd.forecast_seconds().is_err());
    }

    #[test]
    fn test_signed_i16_sign_magnitude() {
        assert_eq!(decode_grib2_signed_i16([0x80, 0x02]), -2);
        assert_eq!(decode_grib2_signed_i16([0x00, 0x02]), 2);
    }
}
