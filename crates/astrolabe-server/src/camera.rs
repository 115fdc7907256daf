//! Frame acquisition behind a trait so the server runs without hardware.
//!
//! The real source drives a V4L2 device in MJPG; the sentinel device name
//! `test` selects a deterministic synthetic frame instead, keeping every
//! code path above this module exercisable on a dev machine.

use std::io;
use std::path::{Path, PathBuf};

use astrolabe_core::CameraProfile;
use image::RgbImage;
use log::{debug, info, warn};
use v4l::buffer::Type;
use v4l::control::{Control, Value as ControlValue};
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

/// Device name that selects the synthetic source.
pub const TEST_DEVICE: &str = "test";

/// Capture property names accepted in a profile, with their V4L2 control
/// ids. Unknown names are preserved in the profile but not applied.
pub const CONTROL_IDS: &[(&str, u32)] = &[
    ("brightness", 0x0098_0900),
    ("contrast", 0x0098_0901),
    ("saturation", 0x0098_0902),
    ("hue", 0x0098_0903),
    ("auto_white_balance", 0x0098_090c),
    ("gamma", 0x0098_0910),
    ("gain", 0x0098_0913),
    ("white_balance_temperature", 0x0098_091a),
    ("sharpness", 0x0098_091b),
    ("backlight_compensation", 0x0098_091c),
    ("auto_exposure", 0x009a_0901),
    ("exposure", 0x009a_0902),
    ("focus_absolute", 0x009a_090a),
    ("autofocus", 0x009a_090c),
    ("zoom_absolute", 0x009a_090d),
];

fn control_id(name: &str) -> Option<u32> {
    CONTROL_IDS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, id)| *id)
}

pub trait FrameSource: Send {
    /// Grab one frame at the configured resolution.
    fn frame(&mut self) -> io::Result<RgbImage>;

    /// Release and re-acquire the underlying handle.
    fn reopen(&mut self) -> io::Result<()>;

    /// Push resolution and capture controls from a profile.
    fn apply_profile(&mut self, profile: &CameraProfile);
}

/// Select a source for a device path; `test` gets the synthetic frame.
pub fn open_source(device: &Path, profile: &CameraProfile) -> Box<dyn FrameSource> {
    if device == Path::new(TEST_DEVICE) {
        info!("using synthetic test source");
        let mut source = TestSource::default();
        source.apply_profile(profile);
        Box::new(source)
    } else {
        let mut source = V4lSource::new(device.to_path_buf());
        source.apply_profile(profile);
        Box::new(source)
    }
}

pub struct V4lSource {
    path: PathBuf,
    device: Option<Device>,
    width: u32,
    height: u32,
    controls: Vec<(u32, i64)>,
}

impl V4lSource {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            device: None,
            width: 640,
            height: 480,
            controls: Vec::new(),
        }
    }

    fn ensure_open(&mut self) -> io::Result<&Device> {
        if self.device.is_none() {
            let device = Device::with_path(&self.path)?;
            device.set_format(&Format::new(self.width, self.height, FourCC::new(b"MJPG")))?;
            for &(id, value) in &self.controls {
                if let Err(err) = device.set_control(Control {
                    id,
                    value: ControlValue::Integer(value),
                }) {
                    warn!("control {id:#x} rejected by {}: {err}", self.path.display());
                }
            }
            info!("opened {} at {}x{}", self.path.display(), self.width, self.height);
            self.device = Some(device);
        }
        Ok(self.device.as_ref().ok_or(io::ErrorKind::NotFound)?)
    }
}

impl FrameSource for V4lSource {
    fn frame(&mut self) -> io::Result<RgbImage> {
        let device = self.ensure_open()?;

        // The stream borrows the device, so it lives for one grab only.
        // Requests arrive at client rate, well under the sensor frame rate,
        // and the second grab skips the stale buffer queued at stream start.
        let mut stream = Stream::with_buffers(device, Type::VideoCapture, 2)?;
        stream.next()?;
        let (data, _meta) = stream.next()?;

        let decoded = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
            .map_err(io::Error::other)?;
        Ok(decoded.to_rgb8())
    }

    fn reopen(&mut self) -> io::Result<()> {
        debug!("reopening {}", self.path.display());
        self.device = None;
        self.ensure_open().map(|_| ())
    }

    fn apply_profile(&mut self, profile: &CameraProfile) {
        self.width = profile.horizontal_resolution_pixels;
        self.height = profile.vertical_resolution_pixels;
        self.controls = profile
            .capture
            .iter()
            .filter_map(|(name, value)| control_id(name).map(|id| (id, *value as i64)))
            .collect();
        // Force a reconfigure on the next grab.
        self.device = None;
    }
}

/// Deterministic frame: dark background with an orange block and a gradient
/// strip, enough structure for the color pipeline to find something.
#[derive(Default)]
pub struct TestSource {
    width: u32,
    height: u32,
}

impl FrameSource for TestSource {
    fn frame(&mut self) -> io::Result<RgbImage> {
        let (w, h) = (self.width.max(8), self.height.max(8));
        let mut img = RgbImage::from_pixel(w, h, image::Rgb([30, 30, 30]));

        // Horizontal gradient strip along the top eighth.
        for y in 0..h / 8 {
            for x in 0..w {
                let v = (x * 255 / w.max(1)) as u8;
                img.put_pixel(x, y, image::Rgb([v, v, v]));
            }
        }

        // Orange block in the lower middle.
        for y in h / 2..h * 3 / 4 {
            for x in w * 3 / 8..w * 5 / 8 {
                img.put_pixel(x, y, image::Rgb([255, 128, 0]));
            }
        }

        Ok(img)
    }

    fn reopen(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn apply_profile(&mut self, profile: &CameraProfile) {
        self.width = profile.horizontal_resolution_pixels;
        self.height = profile.vertical_resolution_pixels;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use astrolabe_core::Defaults;

    #[test]
    fn test_source_matches_profile_resolution() {
        let profile = CameraProfile::from_defaults(&Defaults::default());
        let mut source = TestSource::default();
        source.apply_profile(&profile);
        let frame = source.frame().unwrap();
        assert_eq!(frame.dimensions(), (640, 480));
    }

    #[test]
    fn test_source_contains_the_orange_block() {
        let profile = CameraProfile::from_defaults(&Defaults::default());
        let mut source = TestSource::default();
        source.apply_profile(&profile);
        let frame = source.frame().unwrap();
        assert_eq!(frame.get_pixel(320, 300).0, [255, 128, 0]);
    }

    #[test]
    fn known_control_names_resolve() {
        assert!(control_id("exposure").is_some());
        assert!(control_id("gain").is_some());
        assert!(control_id("made_up_property").is_none());
    }

    #[test]
    fn sentinel_name_selects_the_test_source() {
        let profile = CameraProfile::from_defaults(&Defaults::default());
        let mut source = open_source(Path::new(TEST_DEVICE), &profile);
        assert!(source.frame().is_ok());
    }
}
