use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use ndarray::{ArrayView2, ArrayView3, Axis};
use tracing::debug;

use crate::consts::{SER_HEADER_SIZE, SER_MAGIC};
use crate::error::{Result, RockitError};
use crate::io::ser::SerHeader;

/// Writes mono SER stacks at the byte level.
pub struct SerWriter {
    writer: BufWriter<File>,
    header: SerHeader,
    frames_written: u32,
}

impl SerWriter {
    /// Create the file and write the header.
    pub fn create(path: &Path, header: &SerHeader) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        write_header(&mut writer, header)?;
        Ok(Self {
            writer,
            header: header.clone(),
            frames_written: 0,
        })
    }

    /// Write one frame of pre-encoded bytes.
    pub fn write_raw_frame(&mut self, data: &[u8]) -> Result<()> {
        if data.len() != self.header.frame_byte_size() {
            return Err(RockitError::InvalidSer(format!(
                "frame holds {} bytes, header expects {}",
                data.len(),
                self.header.frame_byte_size()
            )));
        }
        self.writer.write_all(data)?;
        self.frames_written += 1;
        Ok(())
    }

    /// Write one frame of counts, rounded and clamped to the header's depth.
    pub fn write_frame(&mut self, plane: &ArrayView2<'_, f64>) -> Result<()> {
        let (rows, cols) = plane.dim();
        if rows != self.header.height as usize || cols != self.header.width as usize {
            return Err(RockitError::ShapeMismatch {
                left: vec![self.header.height as usize, self.header.width as usize],
                right: vec![rows, cols],
            });
        }
        let max = ((1u32 << self.header.pixel_depth.min(16)) - 1) as f64;
        let mut bytes = Vec::with_capacity(self.header.frame_byte_size());
        for &v in plane.iter() {
            let count = v.round().clamp(0.0, max);
            if self.header.bytes_per_sample() == 1 {
                bytes.push(count as u8);
            } else {
                bytes.write_u16::<LittleEndian>(count as u16)?;
            }
        }
        self.write_raw_frame(&bytes)
    }

    pub fn frames_written(&self) -> u32 {
        self.frames_written
    }

    /// Flush and check the frame count against the header.
    pub fn finalize(mut self) -> Result<()> {
        self.writer.flush()?;
        if self.frames_written != self.header.frame_count {
            return Err(RockitError::InvalidSer(format!(
                "wrote {} frames, header declares {}",
                self.frames_written, self.header.frame_count
            )));
        }
        Ok(())
    }
}

/// Write a `(frames, height, width)` volume as a mono 16-bit SER stack.
pub fn write_volume(path: &Path, volume: &ArrayView3<'_, f64>) -> Result<()> {
    let (frames, rows, cols) = volume.dim();
    let header = SerHeader::mono(cols as u32, rows as u32, 16, frames as u32);
    let mut writer = SerWriter::create(path, &header)?;
    for plane in volume.axis_iter(Axis(0)) {
        writer.write_frame(&plane)?;
    }
    writer.finalize()?;
    debug!(path = %path.display(), frames, rows, cols, "Wrote SER volume");
    Ok(())
}

fn write_header(w: &mut impl Write, header: &SerHeader) -> Result<()> {
    w.write_all(SER_MAGIC)?;
    w.write_i32::<LittleEndian>(0)?; // LuID
    w.write_i32::<LittleEndian>(header.color_id)?;
    // 0 marks little-endian data, matching what common readers expect
    w.write_i32::<LittleEndian>(if header.little_endian { 0 } else { 1 })?;
    w.write_i32::<LittleEndian>(header.width as i32)?;
    w.write_i32::<LittleEndian>(header.height as i32)?;
    w.write_i32::<LittleEndian>(header.pixel_depth as i32)?;
    w.write_i32::<LittleEndian>(header.frame_count as i32)?;
    write_fixed_string(w, &header.observer, 40)?;
    write_fixed_string(w, &header.instrument, 40)?;
    write_fixed_string(w, &header.telescope, 40)?;
    w.write_u64::<LittleEndian>(header.date_time)?;
    w.write_u64::<LittleEndian>(header.date_time_utc)?;

    debug_assert_eq!(14 + 7 * 4 + 3 * 40 + 2 * 8, SER_HEADER_SIZE);
    Ok(())
}

fn write_fixed_string(w: &mut impl Write, s: &str, len: usize) -> Result<()> {
    let bytes = s.as_bytes();
    let n = bytes.len().min(len);
    w.write_all(&bytes[..n])?;
    w.write_all(&vec![0u8; len - n])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ser::SerReader;
    use ndarray::Array3;

    #[test]
    fn header_is_exactly_178_bytes() {
        let mut buf = Vec::new();
        write_header(&mut buf, &SerHeader::mono(4, 3, 16, 2)).unwrap();
        assert_eq!(buf.len(), SER_HEADER_SIZE);
        assert_eq!(&buf[..14], SER_MAGIC);
    }

    #[test]
    fn volume_written_and_read_back_as_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.ser");
        let volume = Array3::from_shape_fn((3, 2, 4), |(f, r, c)| (f * 1000 + r * 10 + c) as f64);
        write_volume(&path, &volume.view()).unwrap();

        let reader = SerReader::open(&path).unwrap();
        assert_eq!(reader.header.pixel_depth, 16);
        assert_eq!(reader.read_volume().unwrap(), volume);
    }

    #[test]
    fn out_of_range_counts_are_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clamp.ser");
        let mut volume = Array3::<f64>::zeros((1, 1, 2));
        volume[[0, 0, 0]] = -5.0;
        volume[[0, 0, 1]] = 70000.0;
        write_volume(&path, &volume.view()).unwrap();

        let frame = SerReader::open(&path).unwrap().read_frame(0).unwrap();
        assert_eq!(frame[[0, 0]], 0.0);
        assert_eq!(frame[[0, 1]], 65535.0);
    }
}
