//! GRIB2 parser implementation (WMO FM 92 GRIB Edition 2).
//!
//! This crate indexes GRIB2 archives without decoding their payloads:
//!
//! - [`scan`] walks an archive and produces one [`MessageDescriptor`] per
//!   message (byte range plus grid/parameter/level/time metadata)
//! - [`sections`] decodes the individual section headers
//! - [`unpacking`] is the payload codec used when a referenced message is
//!   finally read
//! - [`tables`] translates numeric parameter codes into short names

pub mod error;
pub mod scan;
pub mod sections;
pub mod tables;
pub mod unpacking;

pub use error::{Grib2Error, Result};
pub use scan::{scan_bytes, scan_file, scan_reader, Level, MessageDescriptor, ParameterId};
pub use sections::{decode_grib2_signed, DataRepresentation, GridDefinition};
pub use tables::{Grib2Tables, LevelDescription};
pub use unpacking::{decode_message, unpack_simple};
