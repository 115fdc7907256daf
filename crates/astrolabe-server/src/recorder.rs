//! Frame recording to an MJPEG AVI with a status banner.
//!
//! Each recording session writes `<data_dir>/<serial>/<timestamp>.avi`.
//! The muxer is a minimal RIFF writer: header with placeholders, one `00dc`
//! chunk per JPEG frame, and an `idx1` index plus size patches on finalize.
//! Frames dropped between finalize and close are not a concern because every
//! write lands in the file before `write_frame` returns.

use std::fs::{self, File};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use image::RgbImage;
use log::info;

const FPS: u32 = 10;
const JPEG_QUALITY: u8 = 85;

/// Overlay text plus the found/not-found color coding.
pub struct Banner {
    pub text: String,
    pub found: bool,
}

pub struct Recorder {
    file: File,
    path: PathBuf,
    width: u32,
    height: u32,
    /// Size of each written frame chunk, for the index.
    frame_sizes: Vec<u32>,
    movi_start: u64,
    finalized: bool,
}

impl Recorder {
    /// Open a new recording file. Failure here is a fatal condition for the
    /// owning process; the caller escalates it.
    pub fn create(data_dir: &Path, serial: &str, width: u32, height: u32) -> io::Result<Self> {
        let dir = data_dir.join(serial);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.avi", Local::now().format("%Y-%m-%d_%H-%M-%S")));

        let mut file = File::create(&path)?;
        write_headers(&mut file, width, height)?;
        let movi_start = file.stream_position()?;

        info!("recording to {}", path.display());
        Ok(Self {
            file,
            path,
            width,
            height,
            frame_sizes: Vec::new(),
            movi_start,
            finalized: false,
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frame_sizes.len()
    }

    /// Stamp the banner onto a copy of the frame and append it.
    pub fn write_frame(&mut self, frame: &RgbImage, banner: &Banner) -> io::Result<()> {
        let mut stamped = frame.clone();
        draw_banner(&mut stamped, banner);

        let mut jpeg = Vec::new();
        let mut encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY);
        encoder.encode_image(&stamped).map_err(io::Error::other)?;

        self.file.write_all(b"00dc")?;
        self.file.write_all(&(jpeg.len() as u32).to_le_bytes())?;
        self.file.write_all(&jpeg)?;
        if jpeg.len() % 2 == 1 {
            self.file.write_all(&[0])?;
        }
        self.frame_sizes.push(jpeg.len() as u32);
        Ok(())
    }

    /// Write the index and patch the header placeholders.
    pub fn finalize(&mut self) -> io::Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        let movi_end = self.file.stream_position()?;

        // idx1: one entry per frame, offsets relative to the movi list data.
        self.file.write_all(b"idx1")?;
        self.file
            .write_all(&((self.frame_sizes.len() * 16) as u32).to_le_bytes())?;
        let mut offset = 4u32;
        for &size in &self.frame_sizes {
            self.file.write_all(b"00dc")?;
            self.file.write_all(&0x10u32.to_le_bytes())?; // keyframe
            self.file.write_all(&offset.to_le_bytes())?;
            self.file.write_all(&size.to_le_bytes())?;
            offset += 8 + size + size % 2;
        }
        let file_end = self.file.stream_position()?;

        let frames = self.frame_sizes.len() as u32;
        // RIFF size.
        self.patch(4, (file_end - 8) as u32)?;
        // avih dwTotalFrames (see write_headers for the layout).
        self.patch(AVIH_TOTAL_FRAMES_POS, frames)?;
        // strh dwLength.
        self.patch(STRH_LENGTH_POS, frames)?;
        // movi list size: list starts 12 bytes before movi_start ("LIST",
        // size, "movi"), size covers "movi" + chunks.
        self.patch(self.movi_start - 8, (movi_end - self.movi_start + 4) as u32)?;

        self.file.flush()?;
        info!(
            "finalized {} ({} frames, {}x{})",
            self.path.display(),
            frames,
            self.width,
            self.height
        );
        Ok(())
    }

    fn patch(&mut self, pos: u64, value: u32) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.write_all(&value.to_le_bytes())?;
        self.file.seek(SeekFrom::End(0)).map(|_| ())
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        let _ = self.finalize();
    }
}

// Byte offsets of patched fields, fixed by the header layout below.
const AVIH_TOTAL_FRAMES_POS: u64 = 48;
const STRH_LENGTH_POS: u64 = 140;

fn write_headers(file: &mut File, width: u32, height: u32) -> io::Result<()> {
    let mut h: Vec<u8> = Vec::with_capacity(224);
    let w32 = |buf: &mut Vec<u8>, v: u32| buf.extend_from_slice(&v.to_le_bytes());

    h.extend_from_slice(b"RIFF");
    w32(&mut h, 0); // patched on finalize
    h.extend_from_slice(b"AVI ");

    // hdrl list: avih + strl.
    h.extend_from_slice(b"LIST");
    w32(&mut h, 4 + 64 + 124); // "hdrl" + avih chunk + strl list
    h.extend_from_slice(b"hdrl");

    h.extend_from_slice(b"avih");
    w32(&mut h, 56);
    w32(&mut h, 1_000_000 / FPS); // microseconds per frame
    w32(&mut h, 0); // max bytes per second
    w32(&mut h, 0); // padding granularity
    w32(&mut h, 0x10); // AVIF_HASINDEX
    debug_assert_eq!(h.len() as u64, AVIH_TOTAL_FRAMES_POS);
    w32(&mut h, 0); // total frames, patched
    w32(&mut h, 0); // initial frames
    w32(&mut h, 1); // streams
    w32(&mut h, 0); // suggested buffer size
    w32(&mut h, width);
    w32(&mut h, height);
    for _ in 0..4 {
        w32(&mut h, 0); // reserved
    }

    // strl list: strh + strf.
    h.extend_from_slice(b"LIST");
    w32(&mut h, 4 + 64 + 48); // "strl" + strh chunk + strf chunk
    h.extend_from_slice(b"strl");

    h.extend_from_slice(b"strh");
    w32(&mut h, 56);
    h.extend_from_slice(b"vids");
    h.extend_from_slice(b"MJPG");
    w32(&mut h, 0); // flags
    w32(&mut h, 0); // priority + language
    w32(&mut h, 0); // initial frames
    w32(&mut h, 1); // scale
    w32(&mut h, FPS); // rate
    w32(&mut h, 0); // start
    debug_assert_eq!(h.len() as u64, STRH_LENGTH_POS);
    w32(&mut h, 0); // length, patched
    w32(&mut h, 0); // suggested buffer size
    w32(&mut h, u32::MAX); // quality
    w32(&mut h, 0); // sample size
    // rcFrame
    h.extend_from_slice(&0u16.to_le_bytes());
    h.extend_from_slice(&0u16.to_le_bytes());
    h.extend_from_slice(&(width as u16).to_le_bytes());
    h.extend_from_slice(&(height as u16).to_le_bytes());

    h.extend_from_slice(b"strf");
    w32(&mut h, 40);
    w32(&mut h, 40); // biSize
    w32(&mut h, width);
    w32(&mut h, height);
    h.extend_from_slice(&1u16.to_le_bytes()); // planes
    h.extend_from_slice(&24u16.to_le_bytes()); // bit count
    h.extend_from_slice(b"MJPG");
    w32(&mut h, width * height * 3); // size image
    for _ in 0..4 {
        w32(&mut h, 0); // resolution, clr fields
    }

    // movi list, size patched on finalize.
    h.extend_from_slice(b"LIST");
    w32(&mut h, 0);
    h.extend_from_slice(b"movi");

    file.write_all(&h)
}

/// Fill the top tenth of the frame with the status color and render the
/// banner text in a scaled 5x7 font.
fn draw_banner(frame: &mut RgbImage, banner: &Banner) {
    let (w, h) = frame.dimensions();
    let band = (h / 10).max(9);
    let background = if banner.found {
        image::Rgb([0, 110, 0])
    } else {
        image::Rgb([150, 0, 0])
    };

    for y in 0..band.min(h) {
        for x in 0..w {
            frame.put_pixel(x, y, background);
        }
    }

    let scale = (band / 9).max(1);
    let mut cursor = scale;
    let top = (band.saturating_sub(7 * scale)) / 2;
    for c in banner.text.chars() {
        let Some(rows) = glyph(c.to_ascii_uppercase()) else {
            cursor += 6 * scale;
            continue;
        };
        for (ry, row) in rows.iter().enumerate() {
            for rx in 0..5u32 {
                if row & (0x10 >> rx) == 0 {
                    continue;
                }
                for sy in 0..scale {
                    for sx in 0..scale {
                        let px = cursor + rx * scale + sx;
                        let py = top + ry as u32 * scale + sy;
                        if px < w && py < band.min(h) {
                            frame.put_pixel(px, py, image::Rgb([255, 255, 255]));
                        }
                    }
                }
            }
        }
        cursor += 6 * scale;
        if cursor >= w {
            break;
        }
    }
}

/// 5x7 bitmap rows, 5 bits per row, MSB leftmost.
fn glyph(c: char) -> Option<[u8; 7]> {
    Some(match c {
        'A' => [0x0e, 0x11, 0x11, 0x1f, 0x11, 0x11, 0x11],
        'B' => [0x1e, 0x11, 0x11, 0x1e, 0x11, 0x11, 0x1e],
        'C' => [0x0e, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0e],
        'D' => [0x1c, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1c],
        'E' => [0x1f, 0x10, 0x10, 0x1e, 0x10, 0x10, 0x1f],
        'F' => [0x1f, 0x10, 0x10, 0x1e, 0x10, 0x10, 0x10],
        'G' => [0x0e, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0e],
        'H' => [0x11, 0x11, 0x11, 0x1f, 0x11, 0x11, 0x11],
        'I' => [0x0e, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0e],
        'J' => [0x01, 0x01, 0x01, 0x01, 0x11, 0x11, 0x0e],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1f],
        'M' => [0x11, 0x1b, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11],
        'O' => [0x0e, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0e],
        'P' => [0x1e, 0x11, 0x11, 0x1e, 0x10, 0x10, 0x10],
        'Q' => [0x0e, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0d],
        'R' => [0x1e, 0x11, 0x11, 0x1e, 0x14, 0x12, 0x11],
        'S' => [0x0f, 0x10, 0x10, 0x0e, 0x01, 0x01, 0x1e],
        'T' => [0x1f, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0e],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0a, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x1b, 0x11],
        'X' => [0x11, 0x0a, 0x04, 0x04, 0x04, 0x0a, 0x11],
        'Y' => [0x11, 0x0a, 0x04, 0x04, 0x04, 0x04, 0x04],
        'Z' => [0x1f, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1f],
        '0' => [0x0e, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0e],
        '1' => [0x04, 0x0c, 0x04, 0x04, 0x04, 0x04, 0x0e],
        '2' => [0x0e, 0x11, 0x01, 0x06, 0x08, 0x10, 0x1f],
        '3' => [0x1f, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0e],
        '4' => [0x02, 0x06, 0x0a, 0x12, 0x1f, 0x02, 0x02],
        '5' => [0x1f, 0x10, 0x1e, 0x01, 0x01, 0x11, 0x0e],
        '6' => [0x06, 0x08, 0x10, 0x1e, 0x11, 0x11, 0x0e],
        '7' => [0x1f, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0e, 0x11, 0x11, 0x0e, 0x11, 0x11, 0x0e],
        '9' => [0x0e, 0x11, 0x11, 0x0f, 0x01, 0x02, 0x0c],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0c, 0x0c],
        ':' => [0x00, 0x0c, 0x0c, 0x00, 0x0c, 0x0c, 0x00],
        '-' => [0x00, 0x00, 0x00, 0x1f, 0x00, 0x00, 0x00],
        '%' => [0x18, 0x19, 0x02, 0x04, 0x08, 0x13, 0x03],
        _ => return None,
    })
}
