//! Binary table files.
//!
//! Layout, all little-endian and unpadded:
//!
//! ```text
//! i32 X, i32 Y, i32 Z
//! X*Y*Z records of f32 x, f32 y, f32 z   // table order, x fastest
//! ```
//!
//! There is no magic number, version or checksum. A reader that assumes
//! different dimensions or a different flattening order will misinterpret the
//! data without noticing.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

use crate::table::{Dimensions, LowPoint, Table};

/// Size of the dimension header in bytes.
pub const HEADER_LEN: usize = 3 * 4;
/// Size of one sample record in bytes.
pub const RECORD_LEN: usize = 3 * 4;

#[derive(Debug, Error)]
pub enum TableIoError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("table data truncated after {read} of {expected} records")]
    Truncated { read: usize, expected: usize },
    #[error("invalid table header {x}x{y}x{z}")]
    InvalidHeader { x: i32, y: i32, z: i32 },
    #[error("dimension {0} does not fit in the header")]
    DimensionTooLarge(usize),
}

pub fn write_table<W: Write>(table: &Table, mut out: W) -> Result<(), TableIoError> {
    let dims = table.dimensions();
    for n in [dims.x, dims.y, dims.z] {
        let n = i32::try_from(n).map_err(|_| TableIoError::DimensionTooLarge(n))?;
        out.write_i32::<LittleEndian>(n)?;
    }
    for sample in table.samples() {
        out.write_f32::<LittleEndian>(sample.x)?;
        out.write_f32::<LittleEndian>(sample.y)?;
        out.write_f32::<LittleEndian>(sample.z)?;
    }
    out.flush()?;
    Ok(())
}

pub fn read_table<R: Read>(mut input: R) -> Result<Table, TableIoError> {
    let x = input.read_i32::<LittleEndian>()?;
    let y = input.read_i32::<LittleEndian>()?;
    let z = input.read_i32::<LittleEndian>()?;
    if x <= 0 || y <= 0 || z <= 0 {
        return Err(TableIoError::InvalidHeader { x, y, z });
    }
    let dims = Dimensions::new(x as usize, y as usize, z as usize);
    let expected = dims
        .x
        .checked_mul(dims.y)
        .and_then(|n| n.checked_mul(dims.z))
        .ok_or(TableIoError::InvalidHeader { x, y, z })?;

    // The header is untrusted until the records actually arrive.
    let mut samples = Vec::with_capacity(expected.min(1 << 20));
    let mut record = [0f32; 3];
    for read in 0..expected {
        match input.read_f32_into::<LittleEndian>(&mut record) {
            Ok(()) => samples.push(LowPoint::new(record[0], record[1], record[2])),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(TableIoError::Truncated { read, expected });
            }
            Err(e) => return Err(e.into()),
        }
    }

    Table::from_samples(dims, samples).ok_or(TableIoError::Truncated {
        read: 0,
        expected,
    })
}

pub fn save_table(table: &Table, path: impl AsRef<Path>) -> Result<(), TableIoError> {
    let file = File::create(path)?;
    write_table(table, BufWriter::new(file))
}

pub fn load_table(path: impl AsRef<Path>) -> Result<Table, TableIoError> {
    let file = File::open(path)?;
    read_table(BufReader::new(file))
}
