//! Per-sector sample storage with optional spooling to temporary files.
//!
//! ## Purpose
//!
//! A run accumulates far more residual samples than are needed at any one time:
//! sectors are processed one by one (or a few in parallel). This module keeps the
//! per-sector sample lists either in memory or in anonymous temporary files that
//! are read back sector by sector.
//!
//! ## Design notes
//!
//! * **Ownership**: `finish` hands out one owned [`SectorBuffer`] per sector, which
//!   is moved into the sector's processing task.
//! * **Format**: Fixed-size little-endian records; the files are private to the run
//!   and deleted by the OS when dropped.
//!
//! ## Non-goals
//!
//! * Persisting samples across runs.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};

use crate::algorithms::aggregation::VoxelSample;
use crate::primitives::errors::CalibError;

/// Bytes per spooled sample: packed key plus seven `f64`.
const RECORD_SIZE: usize = 4 + 7 * 8;

/// Storage strategy for aggregated samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpoolMode {
    /// Keep every sample in memory.
    #[default]
    Memory,

    /// Write samples to per-sector temporary files once `flush_threshold`
    /// samples of a sector are pending.
    TempFile {
        /// Pending samples per sector before a flush.
        flush_threshold: usize,
    },
}

/// Samples of one sector, ready to be loaded by its processing task.
#[derive(Debug)]
pub enum SectorBuffer {
    /// Samples held in memory.
    Memory(Vec<VoxelSample>),
    /// Samples spooled to a temporary file.
    Spooled {
        /// Temporary file positioned anywhere.
        file: File,
        /// Number of records.
        len: usize,
    },
}

impl SectorBuffer {
    /// Number of samples.
    pub fn len(&self) -> usize {
        match self {
            SectorBuffer::Memory(v) => v.len(),
            SectorBuffer::Spooled { len, .. } => *len,
        }
    }

    /// True if the sector received no sample.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materialize the samples in their original order.
    pub fn load(self) -> Result<Vec<VoxelSample>, CalibError> {
        match self {
            SectorBuffer::Memory(v) => Ok(v),
            SectorBuffer::Spooled { mut file, len } => {
                file.seek(SeekFrom::Start(0))?;
                let mut bytes = Vec::with_capacity(len * RECORD_SIZE);
                file.read_to_end(&mut bytes)?;
                if bytes.len() != len * RECORD_SIZE {
                    return Err(CalibError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!(
                            "spool holds {} bytes, expected {} records",
                            bytes.len(),
                            len
                        ),
                    )));
                }
                Ok(bytes.chunks_exact(RECORD_SIZE).map(decode).collect())
            }
        }
    }
}

/// Accumulating store, one lane per sector.
#[derive(Debug)]
pub(crate) struct SampleSpool {
    mode: SpoolMode,
    pending: Vec<Vec<VoxelSample>>,
    files: Vec<Option<(BufWriter<File>, usize)>>,
}

impl SampleSpool {
    pub(crate) fn new(mode: SpoolMode, n_sectors: usize) -> Self {
        Self {
            mode,
            pending: (0..n_sectors).map(|_| Vec::new()).collect(),
            files: (0..n_sectors).map(|_| None).collect(),
        }
    }

    pub(crate) fn push(&mut self, sector: usize, sample: VoxelSample) -> Result<(), CalibError> {
        self.pending[sector].push(sample);
        if let SpoolMode::TempFile { flush_threshold } = self.mode {
            if self.pending[sector].len() >= flush_threshold.max(1) {
                self.flush(sector)?;
            }
        }
        Ok(())
    }

    fn flush(&mut self, sector: usize) -> Result<(), CalibError> {
        if self.pending[sector].is_empty() {
            return Ok(());
        }
        if self.files[sector].is_none() {
            self.files[sector] = Some((BufWriter::new(tempfile::tempfile()?), 0));
        }
        if let Some((writer, len)) = self.files[sector].as_mut() {
            let mut record = [0u8; RECORD_SIZE];
            for sample in self.pending[sector].drain(..) {
                encode(&sample, &mut record);
                writer.write_all(&record)?;
                *len += 1;
            }
        }
        Ok(())
    }

    pub(crate) fn finish(mut self) -> Result<Vec<SectorBuffer>, CalibError> {
        if self.mode == SpoolMode::Memory {
            return Ok(self.pending.into_iter().map(SectorBuffer::Memory).collect());
        }

        let mut out = Vec::with_capacity(self.pending.len());
        for sector in 0..self.pending.len() {
            self.flush(sector)?;
            match self.files[sector].take() {
                Some((writer, len)) => {
                    let file = writer.into_inner().map_err(|e| e.into_error())?;
                    out.push(SectorBuffer::Spooled { file, len });
                }
                None => out.push(SectorBuffer::Memory(Vec::new())),
            }
        }
        Ok(out)
    }
}

fn encode(s: &VoxelSample, out: &mut [u8; RECORD_SIZE]) {
    out[0..4].copy_from_slice(&s.key.to_le_bytes());
    let values = [s.x, s.y2x, s.z2x, s.dy, s.dz, s.tg_slp, s.sy];
    for (k, v) in values.iter().enumerate() {
        out[4 + 8 * k..12 + 8 * k].copy_from_slice(&v.to_le_bytes());
    }
}

fn decode(chunk: &[u8]) -> VoxelSample {
    let f = |k: usize| {
        let mut b = [0u8; 8];
        b.copy_from_slice(&chunk[4 + 8 * k..12 + 8 * k]);
        f64::from_le_bytes(b)
    };
    let mut key = [0u8; 4];
    key.copy_from_slice(&chunk[0..4]);
    VoxelSample {
        key: u32::from_le_bytes(key),
        x: f(0),
        y2x: f(1),
        z2x: f(2),
        dy: f(3),
        dz: f(4),
        tg_slp: f(5),
        sy: f(6),
    }
}
