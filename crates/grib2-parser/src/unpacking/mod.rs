//! GRIB2 payload codec.
//!
//! A chunk reference always covers one complete message. Decoding turns
//! that message back into a flat `f32` field of `num_points` values, with
//! bitmap-masked points set to NaN.
//!
//! - Simple packing (template 5.0) is decoded natively
//! - Every other packing is delegated to the `grib` crate

use std::io::Cursor;

use crate::error::{Grib2Error, Result};
use crate::sections::{
    parse_bitmap, parse_data_representation, parse_data_section, parse_grid_definition,
};

/// Decode one complete GRIB2 message into its field values.
pub fn decode_message(message: &[u8]) -> Result<Vec<f32>> {
    let representation = parse_data_representation(message)?;
    if representation.template != 0 {
        return decode_with_grib_crate(message);
    }

    let grid = parse_grid_definition(message)?;
    let bitmap = parse_bitmap(message)?;
    let data = parse_data_section(message)?;

    unpack_simple(
        &data.data,
        grid.num_points as usize,
        representation.reference_value,
        representation.binary_scale_factor,
        representation.decimal_scale_factor,
        representation.bits_per_value,
        bitmap.as_ref().map(|b| b.data.as_ref()),
    )
}

/// Unpack simple packed GRIB2 data.
///
/// Simple packing formula: value = (R + X * 2^E) * 10^(-D)
///
/// `total_points` is the size of the full grid. With a bitmap, only points
/// whose bit is set consume a packed value; the others decode to NaN.
pub fn unpack_simple(
    packed_data: &[u8],
    total_points: usize,
    reference_value: f32,
    binary_scale_factor: i16,
    decimal_scale_factor: i16,
    bits_per_value: u8,
    bitmap: Option<&[u8]>,
) -> Result<Vec<f32>> {
    if let Some(bm) = bitmap {
        if bm.len() * 8 < total_points {
            return Err(Grib2Error::UnpackingError(format!(
                "bitmap covers {} points, grid has {}",
                bm.len() * 8,
                total_points
            )));
        }
    }

    let reference = f64::from(reference_value);
    let binary_scale = 2.0_f64.powi(i32::from(binary_scale_factor));
    let decimal_scale = 10.0_f64.powi(-i32::from(decimal_scale_factor));
    let bits = bits_per_value as usize;

    let mut values = Vec::with_capacity(total_points);
    let mut bit_position = 0usize;

    for i in 0..total_points {
        let present = match bitmap {
            Some(bm) => (bm[i / 8] >> (7 - (i % 8))) & 1 == 1,
            None => true,
        };
        if !present {
            values.push(f32::NAN);
            continue;
        }

        let packed = if bits == 0 {
            0
        } else {
            let raw = extract_bits(packed_data, bit_position, bits).map_err(|e| {
                Grib2Error::UnpackingError(format!("point {}: {}", i, e))
            })?;
            bit_position += bits;
            raw
        };

        let value = (reference + f64::from(packed) * binary_scale) * decimal_scale;
        values.push(value as f32);
    }

    Ok(values)
}

fn decode_with_grib_crate(message: &[u8]) -> Result<Vec<f32>> {
    let grib_file = grib::from_reader(Cursor::new(message))
        .map_err(|e| Grib2Error::UnpackingError(format!("grib reader: {}", e)))?;

    let (_, submessage) = grib_file
        .iter()
        .next()
        .ok_or_else(|| Grib2Error::UnpackingError("message has no fields".to_string()))?;

    let decoder = grib::Grib2SubmessageDecoder::from(submessage)
        .map_err(|e| Grib2Error::UnpackingError(format!("grib decoder: {}", e)))?;
    let values = decoder
        .dispatch()
        .map_err(|e| Grib2Error::UnpackingError(format!("grib decode: {}", e)))?;

    Ok(values.collect())
}

/// Extract bits from a byte array, MSB first.
fn extract_bits(data: &[u8], start_bit: usize, num_bits: usize) -> std::result::Result<u32, String> {
    if num_bits > 32 || num_bits == 0 {
        return Err(format!("Invalid number of bits: {}", num_bits));
    }

    let mut result = 0u32;

    for i in 0..num_bits {
        let absolute_bit = start_bit + i;
        let byte_idx = absolute_bit / 8;
        let bit_idx = 7 - (absolute_bit % 8);

        if byte_idx >= data.len() {
            return Err("Not enough data to extract bits".to_string());
        }

        let bit = (data[byte_idx] >> bit_idx) & 1;
        result = (result << 1) | (bit as u32);
    }

    Ok(result)
}
