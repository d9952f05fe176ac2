// SPDX-License-Identifier: GPL-3.0-only

//! Per-device calibration tables
//!
//! The depth pipeline needs three kinds of table before it can decode a
//! packet:
//!
//! - P0 phase-offset tables, parsed from the device's command response
//! - X/Z geometry tables, one `f32` per pixel
//! - an 11-bit raw sample lookup table
//!
//! Every table is validated completely before it replaces anything in the
//! [`CalibrationStore`], so a rejected load never disturbs earlier tables.

use crate::constants::{
    DEPTH_HEIGHT, DEPTH_WIDTH, LUT_SIZE, P0_HEADER_WORDS, P0_TABLES_RESPONSE_SIZE, TABLE_SIZE,
};
use crate::errors::CalibrationError;
use std::f32::consts::PI;

/// Scale from raw P0 units to radians
const P0_TO_RADIANS: f32 = 0.000031 * PI;

/// Raw P0 tables for the three modulation frequencies
#[derive(Clone, PartialEq)]
pub struct P0Tables {
    tables: [Vec<u16>; 3],
}

impl P0Tables {
    /// Parse the P0 tables command response
    ///
    /// The response must be exactly [`P0_TABLES_RESPONSE_SIZE`] bytes:
    /// a header of eight little-endian u32 words, then three blocks of
    /// `u16 pad, [u16; 512*424], u16 pad`. Rows are flipped vertically so
    /// row 0 is the top of the image.
    pub fn from_command_response(buffer: &[u8]) -> Result<Self, CalibrationError> {
        if buffer.len() != P0_TABLES_RESPONSE_SIZE {
            return Err(CalibrationError::WrongLength {
                table: "P0 tables response",
                expected: P0_TABLES_RESPONSE_SIZE,
                actual: buffer.len(),
            });
        }

        let block_size = 2 + TABLE_SIZE * 2 + 2;
        let header_size = P0_HEADER_WORDS * 4;

        let tables = [0, 1, 2].map(|index| {
            let start = header_size + index * block_size + 2;
            let raw = &buffer[start..start + TABLE_SIZE * 2];
            let mut table = vec![0u16; TABLE_SIZE];
            for (row, src_row) in raw.chunks_exact(DEPTH_WIDTH * 2).enumerate() {
                let dst_row = DEPTH_HEIGHT - 1 - row;
                let dst = &mut table[dst_row * DEPTH_WIDTH..(dst_row + 1) * DEPTH_WIDTH];
                for (value, bytes) in dst.iter_mut().zip(src_row.chunks_exact(2)) {
                    *value = u16::from_le_bytes([bytes[0], bytes[1]]);
                }
            }
            table
        });

        Ok(Self { tables })
    }

    /// Raw table for one modulation frequency (0..3)
    pub fn table(&self, frequency: usize) -> &[u16] {
        &self.tables[frequency]
    }

    /// Phase offsets in radians, as consumed by the decode stage
    pub fn phase_offsets(&self) -> [Vec<f32>; 3] {
        self.tables.each_ref().map(|table| {
            table
                .iter()
                .map(|&raw| -(raw as f32) * P0_TO_RADIANS)
                .collect()
        })
    }
}

impl std::fmt::Debug for P0Tables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("P0Tables")
            .field("entries", &self.tables[0].len())
            .finish()
    }
}

/// Per-pixel X/Z ray geometry
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryTables {
    pub x: Vec<f32>,
    pub z: Vec<f32>,
}

impl GeometryTables {
    /// Validate and copy the X and Z tables
    pub fn new(x: &[f32], z: &[f32]) -> Result<Self, CalibrationError> {
        check_table("X table", x)?;
        check_table("Z table", z)?;
        Ok(Self {
            x: x.to_vec(),
            z: z.to_vec(),
        })
    }
}

fn check_table(table: &'static str, values: &[f32]) -> Result<(), CalibrationError> {
    if values.len() != TABLE_SIZE {
        return Err(CalibrationError::WrongLength {
            table,
            expected: TABLE_SIZE,
            actual: values.len(),
        });
    }
    if let Some(index) = values.iter().position(|v| !v.is_finite()) {
        return Err(CalibrationError::NonFinite { table, index });
    }
    Ok(())
}

/// Widen the 11-bit lookup table to the accelerator's float type
pub fn widen_lookup_table(lut: &[i16]) -> Result<Vec<f32>, CalibrationError> {
    if lut.len() != LUT_SIZE {
        return Err(CalibrationError::WrongLength {
            table: "lookup table",
            expected: LUT_SIZE,
            actual: lut.len(),
        });
    }
    Ok(lut.iter().map(|&v| v as f32).collect())
}

/// Calibration tables owned by one depth processor
#[derive(Debug, Default)]
pub struct CalibrationStore {
    p0: Option<P0Tables>,
    geometry: Option<GeometryTables>,
    lookup: Option<Vec<f32>>,
}

impl CalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_p0_tables(&mut self, tables: P0Tables) {
        self.p0 = Some(tables);
    }

    pub fn set_geometry(&mut self, tables: GeometryTables) {
        self.geometry = Some(tables);
    }

    pub fn set_lookup_table(&mut self, lut: Vec<f32>) {
        self.lookup = Some(lut);
    }

    pub fn p0_tables(&self) -> Option<&P0Tables> {
        self.p0.as_ref()
    }

    pub fn geometry(&self) -> Option<&GeometryTables> {
        self.geometry.as_ref()
    }

    pub fn lookup_table(&self) -> Option<&[f32]> {
        self.lookup.as_deref()
    }

    /// Whether every table kind has been loaded
    pub fn is_complete(&self) -> bool {
        self.p0.is_some() && self.geometry.is_some() && self.lookup.is_some()
    }
}

/// Build a P0 response with the given per-frequency fill values (test helper)
#[cfg(test)]
pub(crate) fn synthetic_p0_response(values: [u16; 3]) -> Vec<u8> {
    let mut buffer = vec![0u8; P0_TABLES_RESPONSE_SIZE];
    let block_size = 2 + TABLE_SIZE * 2 + 2;
    for (index, value) in values.iter().enumerate() {
        let start = P0_HEADER_WORDS * 4 + index * block_size + 2;
        for chunk in buffer[start..start + TABLE_SIZE * 2].chunks_exact_mut(2) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
    }
    buffer
}
