//! Archive scanning: one descriptor per GRIB2 message.
//!
//! The scanner reads only the section headers of each message and records
//! where the message lives in the archive. Payloads are never unpacked
//! here; the whole message is the unit a chunk reference points at.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Grib2Error, Result};
use crate::sections::{
    parse_bitmap, parse_data_representation, parse_grid_definition,
    parse_identification, parse_indicator, parse_product_definition, DataRepresentation,
    GridDefinition, INDICATOR_LENGTH,
};

const MAGIC: &[u8; 4] = b"GRIB";
const END_MARKER: &[u8; 4] = b"7777";
const SEARCH_WINDOW: usize = 64 * 1024;

/// Parameter identity: (discipline, category, number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterId {
    pub discipline: u8,
    pub category: u8,
    pub number: u8,
}

/// First fixed surface of a message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Level {
    /// Code table 4.5 type of surface.
    pub level_type: u8,
    pub value: f64,
}

/// Immutable description of one message in an archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDescriptor {
    /// Byte offset of the `GRIB` magic within the archive.
    pub offset: u64,
    /// Total message length, end marker included.
    pub length: u64,
    pub center: u16,
    pub reference_time: DateTime<Utc>,
    pub step_seconds: i64,
    pub parameter: ParameterId,
    pub level: Level,
    pub grid: GridDefinition,
    pub encoding: DataRepresentation,
    pub has_bitmap: bool,
}

impl MessageDescriptor {
    /// Reference time plus forecast step.
    pub fn valid_time(&self) -> DateTime<Utc> {
        self.reference_time + Duration::seconds(self.step_seconds)
    }

    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Number of grid points the decoded payload expands to.
    pub fn num_points(&self) -> u64 {
        u64::from(self.grid.num_points)
    }
}

/// Scan a GRIB2 archive on disk.
pub fn scan_file(path: impl AsRef<Path>) -> Result<Vec<MessageDescriptor>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let descriptors = scan_reader(BufReader::new(file), file_len)?;
    debug!(
        file = %path.display(),
        messages = descriptors.len(),
        bytes = file_len,
        "Scanned GRIB2 archive"
    );
    Ok(descriptors)
}

/// Scan an in-memory GRIB2 archive.
pub fn scan_bytes(data: &[u8]) -> Result<Vec<MessageDescriptor>> {
    scan_reader(std::io::Cursor::new(data), data.len() as u64)
}

/// Scan any seekable reader of known length.
///
/// Descriptors are returned in file order. Bytes between messages that do
/// not start a `GRIB` magic are skipped.
pub fn scan_reader<R: Read + Seek>(mut reader: R, len: u64) -> Result<Vec<MessageDescriptor>> {
    let mut descriptors = Vec::new();
    let mut pos = 0u64;

    while let Some(start) = find_magic(&mut reader, pos, len)? {
        let available = len - start;
        if available < INDICATOR_LENGTH as u64 {
            return Err(Grib2Error::Truncated {
                offset: start,
                declared: INDICATOR_LENGTH as u64,
                available,
            });
        }

        let mut header = [0u8; INDICATOR_LENGTH];
        reader.seek(SeekFrom::Start(start))?;
        reader.read_exact(&mut header)?;
        let indicator = parse_indicator(&header).map_err(|e| Grib2Error::InvalidMessage {
            offset: start,
            reason: e.to_string(),
        })?;

        let declared = indicator.message_length;
        if declared > available {
            return Err(Grib2Error::Truncated {
                offset: start,
                declared,
                available,
            });
        }
        if declared < (INDICATOR_LENGTH + END_MARKER.len()) as u64 {
            return Err(Grib2Error::InvalidMessage {
                offset: start,
                reason: format!("declared length {} is too small", declared),
            });
        }

        let mut message = vec![0u8; declared as usize];
        message[..INDICATOR_LENGTH].copy_from_slice(&header);
        reader.read_exact(&mut message[INDICATOR_LENGTH..])?;

        if &message[message.len() - END_MARKER.len()..] != END_MARKER {
            return Err(Grib2Error::InvalidMessage {
                offset: start,
                reason: "missing 7777 end marker".to_string(),
            });
        }

        let descriptor = describe_message(&message, start).map_err(|e| match e {
            Grib2Error::InvalidMessage { .. } => e,
            other => Grib2Error::InvalidMessage {
                offset: start,
                reason: other.to_string(),
            },
        })?;
        descriptors.push(descriptor);

        pos = start + declared;
    }

    Ok(descriptors)
}

/// Build the descriptor of a single complete message located at `offset`.
pub fn describe_message(message: &[u8], offset: u64) -> Result<MessageDescriptor> {
    let indicator = parse_indicator(message)?;
    let identification = parse_identification(message)?;
    let grid = parse_grid_definition(message)?;
    let product = parse_product_definition(message)?;
    let encoding = parse_data_representation(message)?;
    let has_bitmap = parse_bitmap(message)?.is_some();

    Ok(MessageDescriptor {
        offset,
        length: message.len() as u64,
        center: identification.center,
        reference_time: identification.reference_time,
        step_seconds: product.step_seconds(identification.reference_time)?,
        parameter: ParameterId {
            discipline: indicator.discipline,
            category: product.parameter_category,
            number: product.parameter_number,
        },
        level: Level {
            level_type: product.level_type,
            value: product.level_value,
        },
        grid,
        encoding,
        has_bitmap,
    })
}

/// Locate the next `GRIB` magic at or after `from`.
fn find_magic<R: Read + Seek>(reader: &mut R, from: u64, len: u64) -> Result<Option<u64>> {
    let mut window_start = from;
    let mut buf = vec![0u8; SEARCH_WINDOW];

    while window_start + MAGIC.len() as u64 <= len {
        let want = ((len - window_start) as usize).min(SEARCH_WINDOW);
        reader.seek(SeekFrom::Start(window_start))?;
        reader.read_exact(&mut buf[..want])?;

        if let Some(at) = buf[..want].windows(MAGIC.len()).position(|w| w == MAGIC) {
            return Ok(Some(window_start + at as u64));
        }
        if want < SEARCH_WINDOW {
            break;
        }
        // Overlap so a magic straddling two windows is still found
        window_start += (want - (MAGIC.len() - 1)) as u64;
    }

    Ok(None)
}
