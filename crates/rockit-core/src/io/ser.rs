use std::fs::File;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use memmap2::Mmap;
use ndarray::{Array2, Array3, ArrayViewMut2, Axis};
use rayon::prelude::*;
use tracing::debug;

use crate::consts::{SER_HEADER_SIZE, SER_MAGIC};
use crate::error::{Result, RockitError};
use crate::volume::{SourceInfo, VolumeShape};

/// SER color id of single-plane monochrome data.
pub const SER_COLOR_MONO: i32 = 0;

/// SER file header (178 bytes).
#[derive(Clone, Debug)]
pub struct SerHeader {
    pub color_id: i32,
    pub little_endian: bool,
    pub width: u32,
    pub height: u32,
    pub pixel_depth: u32,
    pub frame_count: u32,
    pub observer: String,
    pub instrument: String,
    pub telescope: String,
    pub date_time: u64,
    pub date_time_utc: u64,
}

impl SerHeader {
    /// Little-endian mono header with empty text fields.
    pub fn mono(width: u32, height: u32, pixel_depth: u32, frame_count: u32) -> Self {
        Self {
            color_id: SER_COLOR_MONO,
            little_endian: true,
            width,
            height,
            pixel_depth,
            frame_count,
            observer: String::new(),
            instrument: String::new(),
            telescope: String::new(),
            date_time: 0,
            date_time_utc: 0,
        }
    }

    /// 1 for 8-bit samples, 2 for 9-16 bit.
    pub fn bytes_per_sample(&self) -> usize {
        if self.pixel_depth <= 8 {
            1
        } else {
            2
        }
    }

    pub fn frame_byte_size(&self) -> usize {
        self.width as usize * self.height as usize * self.bytes_per_sample()
    }

    pub fn color_name(&self) -> &'static str {
        match self.color_id {
            0 => "MONO",
            8 => "BAYER_RGGB",
            9 => "BAYER_GRBG",
            10 => "BAYER_GBRG",
            11 => "BAYER_BGGR",
            100 => "RGB",
            101 => "BGR",
            _ => "UNKNOWN",
        }
    }
}

/// Memory-mapped reader for mono SER stacks.
///
/// Samples are returned as raw detector counts, not normalized, so the
/// intensity threshold keeps its count-domain meaning.
pub struct SerReader {
    mmap: Mmap,
    pub header: SerHeader,
}

impl SerReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < SER_HEADER_SIZE {
            return Err(RockitError::InvalidSer("File too small for SER header".into()));
        }
        if &mmap[0..14] != SER_MAGIC {
            return Err(RockitError::InvalidSer("Missing LUCAM-RECORDER magic".into()));
        }

        let header = parse_header(&mmap[..SER_HEADER_SIZE])?;
        if header.color_id != SER_COLOR_MONO {
            return Err(RockitError::UnsupportedColorMode(header.color_name().into()));
        }
        if header.pixel_depth == 0 || header.pixel_depth > 16 {
            return Err(RockitError::InvalidSer(format!(
                "Unsupported pixel depth {}",
                header.pixel_depth
            )));
        }

        let expected = SER_HEADER_SIZE + header.frame_byte_size() * header.frame_count as usize;
        if mmap.len() < expected {
            return Err(RockitError::InvalidSer(format!(
                "File truncated: expected at least {} bytes, got {}",
                expected,
                mmap.len()
            )));
        }

        debug!(
            width = header.width,
            height = header.height,
            frames = header.frame_count,
            depth = header.pixel_depth,
            "Opened SER file"
        );
        Ok(Self { mmap, header })
    }

    pub fn frame_count(&self) -> usize {
        self.header.frame_count as usize
    }

    /// Shape of the full volume, `(frames, height, width)`.
    pub fn shape(&self) -> VolumeShape {
        VolumeShape::new(
            self.frame_count(),
            self.header.height as usize,
            self.header.width as usize,
        )
    }

    /// Raw bytes of one frame (zero-copy).
    pub fn frame_raw(&self, index: usize) -> Result<&[u8]> {
        let count = self.frame_count();
        if index >= count {
            return Err(RockitError::FrameIndexOutOfRange {
                index,
                total: count,
            });
        }
        let size = self.header.frame_byte_size();
        let offset = SER_HEADER_SIZE + index * size;
        Ok(&self.mmap[offset..offset + size])
    }

    /// One frame as raw counts.
    pub fn read_frame(&self, index: usize) -> Result<Array2<f64>> {
        let mut plane = Array2::zeros((self.header.height as usize, self.header.width as usize));
        self.decode_into(self.frame_raw(index)?, plane.view_mut());
        Ok(plane)
    }

    /// The whole stack as a `(frames, height, width)` volume.
    pub fn read_volume(&self) -> Result<Array3<f64>> {
        let indices: Vec<usize> = (0..self.frame_count()).collect();
        self.read_volume_frames(&indices)
    }

    /// The listed frames, in the given order, as a volume.
    pub fn read_volume_frames(&self, indices: &[usize]) -> Result<Array3<f64>> {
        let raws = indices
            .iter()
            .map(|&i| self.frame_raw(i))
            .collect::<Result<Vec<_>>>()?;

        let mut volume = Array3::zeros((
            indices.len(),
            self.header.height as usize,
            self.header.width as usize,
        ));
        volume
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(raws.par_iter())
            .for_each(|(plane, raw)| self.decode_into(raw, plane));
        Ok(volume)
    }

    pub fn source_info(&self, path: &Path) -> SourceInfo {
        SourceInfo {
            filename: path.to_path_buf(),
            total_frames: self.frame_count(),
            width: self.header.width,
            height: self.header.height,
            bit_depth: self.header.pixel_depth as u8,
            observer: non_empty(&self.header.observer),
            instrument: non_empty(&self.header.instrument),
        }
    }

    fn decode_into(&self, raw: &[u8], mut plane: ArrayViewMut2<'_, f64>) {
        let width = self.header.width as usize;
        let little_endian = self.header.little_endian;
        match self.header.bytes_per_sample() {
            1 => {
                for ((row, col), v) in plane.indexed_iter_mut() {
                    *v = raw[row * width + col] as f64;
                }
            }
            _ => {
                for ((row, col), v) in plane.indexed_iter_mut() {
                    let idx = (row * width + col) * 2;
                    let sample = if little_endian {
                        LittleEndian::read_u16(&raw[idx..idx + 2])
                    } else {
                        BigEndian::read_u16(&raw[idx..idx + 2])
                    };
                    *v = sample as f64;
                }
            }
        }
    }
}

fn parse_header(buf: &[u8]) -> Result<SerHeader> {
    let mut cursor = std::io::Cursor::new(&buf[14..]);

    let _lu_id = cursor.read_i32::<LittleEndian>()?;
    let color_id = cursor.read_i32::<LittleEndian>()?;
    let le_flag = cursor.read_i32::<LittleEndian>()?;
    let width = cursor.read_i32::<LittleEndian>()?;
    let height = cursor.read_i32::<LittleEndian>()?;
    let pixel_depth = cursor.read_i32::<LittleEndian>()?;
    let frame_count = cursor.read_i32::<LittleEndian>()?;

    if width <= 0 || height <= 0 || pixel_depth < 0 || frame_count < 0 {
        return Err(RockitError::InvalidSer(format!(
            "Invalid header values: {width}x{height}, depth {pixel_depth}, {frame_count} frames"
        )));
    }

    let observer = read_fixed_string(&buf[42..82]);
    let instrument = read_fixed_string(&buf[82..122]);
    let telescope = read_fixed_string(&buf[122..162]);

    let mut cursor = std::io::Cursor::new(&buf[162..]);
    let date_time = cursor.read_u64::<LittleEndian>()?;
    let date_time_utc = cursor.read_u64::<LittleEndian>()?;

    // Most writers store 0 for little-endian data despite the format's
    // definition; only an explicit 1 means big-endian.
    let little_endian = le_flag != 1;

    Ok(SerHeader {
        color_id,
        little_endian,
        width: width as u32,
        height: height as u32,
        pixel_depth: pixel_depth as u32,
        frame_count: frame_count as u32,
        observer,
        instrument,
        telescope,
        date_time,
        date_time_utc,
    })
}

fn read_fixed_string(buf: &[u8]) -> String {
    String::from_utf8_lossy(buf)
        .trim_end_matches('\0')
        .trim()
        .to_string()
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
