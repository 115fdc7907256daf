//! The per-camera functional unit: owns the camera handle, the profile,
//! the color list and the optional recorder, and implements every command
//! in the registry.

use std::path::{Path, PathBuf};

use astrolabe_core::{CameraProfile, ColorList, ColorTarget, Defaults, Geometry};
use astrolabe_locate::Locater;
use astrolabe_tag::{
    default_detector, preprocess, PreprocessMode, PreprocessParams, TagCamera, TagDetector,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::RgbImage;
use log::{debug, warn};
use serde_json::{json, Map, Value};

use crate::camera::{open_source, FrameSource};
use crate::command::{opt_bool, opt_f64, opt_i64, opt_u32};
use crate::error::RpcError;
use crate::recorder::{Banner, Recorder};
use crate::server::Handler;
use crate::store::ProfileStore;

const DEFAULT_JPEG_QUALITY: f64 = 0.9;
/// Bounded reopen retry on a failed frame read.
const CAPTURE_RETRIES: usize = 2;

pub struct CameraUnit {
    serial: String,
    data_dir: PathBuf,
    store: ProfileStore,
    profile: CameraProfile,
    colors: ColorList,
    source: Box<dyn FrameSource>,
    recorder: Option<Recorder>,
    detector: TagDetector,
    tag_side: f64,
}

impl CameraUnit {
    pub fn new(
        serial: &str,
        device: &Path,
        data_dir: &Path,
        defaults: Defaults,
    ) -> Result<Self, RpcError> {
        let store = ProfileStore::new(data_dir, defaults);
        let profile = store.load_profile(serial);
        let colors = store.load_colors();
        let source = open_source(device, &profile);

        let mut unit = Self {
            serial: serial.to_string(),
            data_dir: data_dir.to_path_buf(),
            store,
            profile,
            colors,
            source,
            recorder: None,
            detector: default_detector(),
            tag_side: defaults.tag_side,
        };
        if unit.profile.record {
            unit.open_recorder()?;
        }
        Ok(unit)
    }

    fn geometry(&self) -> Geometry {
        Geometry::from_profile(&self.profile)
    }

    /// Grab a frame, reopening the handle up to twice on failure.
    fn get_image(&mut self) -> Result<RgbImage, RpcError> {
        match self.source.frame() {
            Ok(frame) => return Ok(frame),
            Err(err) => debug!("frame read failed: {err}"),
        }
        for attempt in 1..=CAPTURE_RETRIES {
            if let Err(err) = self.source.reopen() {
                debug!("reopen attempt {attempt} failed: {err}");
                continue;
            }
            match self.source.frame() {
                Ok(frame) => return Ok(frame),
                Err(err) => debug!("frame read failed after reopen {attempt}: {err}"),
            }
        }
        Err(RpcError::Device)
    }

    /// Downscale per the profile, JPEG-encode and base64 the result.
    fn encode_image(&self, image: &RgbImage, quality: f64) -> Result<String, RpcError> {
        let ds = self.profile.downscale_factor.max(1);
        let scaled;
        let image = if ds > 1 {
            scaled = image::imageops::resize(
                image,
                (image.width() / ds).max(1),
                (image.height() / ds).max(1),
                image::imageops::FilterType::Triangle,
            );
            &scaled
        } else {
            image
        };

        let q = (quality.clamp(0.0, 1.0) * 100.0).round().clamp(1.0, 100.0) as u8;
        let mut jpeg = Vec::new();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, q);
        encoder
            .encode_image(image)
            .map_err(|err| RpcError::State(format!("image encoding failed: {err}")))?;
        Ok(BASE64.encode(jpeg))
    }

    fn encode_gray(&self, image: &image::GrayImage, quality: f64) -> Result<String, RpcError> {
        let rgb = image::DynamicImage::ImageLuma8(image.clone()).to_rgb8();
        self.encode_image(&rgb, quality)
    }

    /// Profile, color list and selection as one snapshot object.
    fn info_snapshot(&self) -> Result<Value, RpcError> {
        let mut out = match serde_json::to_value(&self.profile) {
            Ok(Value::Object(map)) => map,
            _ => return Err(RpcError::State("profile is not serializable".into())),
        };
        out.insert("serial".into(), json!(self.serial));
        out.insert("active_color".into(), json!(self.colors.active_index()));
        out.insert(
            "colors".into(),
            serde_json::to_value(self.colors.targets())
                .map_err(|err| RpcError::State(err.to_string()))?,
        );
        Ok(Value::Object(out))
    }

    fn persist_colors(&self) -> Result<(), RpcError> {
        self.store
            .save_colors(&self.colors)
            .map_err(|err| RpcError::State(format!("cannot persist colors: {err}")))
    }

    fn persist_profile(&self) -> Result<(), RpcError> {
        self.store
            .save_profile(&self.serial, &self.profile)
            .map_err(|err| RpcError::State(format!("cannot persist profile: {err}")))
    }

    /// Recording is a hard requirement once enabled: a writer that cannot
    /// open terminates the process.
    fn open_recorder(&mut self) -> Result<(), RpcError> {
        let recorder = Recorder::create(
            &self.data_dir,
            &self.serial,
            self.profile.horizontal_resolution_pixels,
            self.profile.vertical_resolution_pixels,
        )
        .map_err(|err| RpcError::Fatal(format!("cannot open video writer: {err}")))?;
        self.recorder = Some(recorder);
        Ok(())
    }

    fn record(&mut self, frame: &RgbImage, banner: Banner) {
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(err) = recorder.write_frame(frame, &banner) {
                warn!("dropped a recorded frame: {err}");
            }
        }
    }

    fn cmd_raw(&mut self, args: &Map<String, Value>) -> Result<Value, RpcError> {
        let quality = opt_f64(args, "quality")?.unwrap_or(DEFAULT_JPEG_QUALITY);
        let frame = self.get_image()?;
        self.record(
            &frame,
            Banner {
                text: "RAW IMAGE".into(),
                found: true,
            },
        );
        Ok(json!({ "image_string": self.encode_image(&frame, quality)? }))
    }

    fn cmd_piece(&mut self, args: &Map<String, Value>) -> Result<Value, RpcError> {
        let return_image = opt_bool(args, "return_image")?.unwrap_or(false);
        let quality = opt_f64(args, "quality")?.unwrap_or(DEFAULT_JPEG_QUALITY);

        let frame = self.get_image()?;
        let geometry = self.geometry();
        let locater = Locater::new(geometry);
        let target = *self.colors.active();

        let (annotated, region) = if return_image {
            let (img, region) = locater.locate(&frame, &target, None, None);
            (Some(img), region)
        } else {
            (None, locater.locate_stripped(&frame, &target, None, None))
        };

        let mut response = if region.found() {
            let bearing = locater.loc_from_center(region.center);
            let piece_angle = geometry.piece_angle(region.slope, bearing.vertical_angle);
            json!({
                "distance": bearing.distance,
                "horizontal_angle": bearing.horizontal_angle,
                "vertical_angle": bearing.vertical_angle,
                "piece_angle": piece_angle,
                "center": [region.center.0, region.center.1],
                "width": region.width,
            })
        } else {
            json!({
                "distance": -1.0,
                "horizontal_angle": 0.0,
                "vertical_angle": 0.0,
                "piece_angle": 0.0,
                "center": [-1.0, -1.0],
                "width": -1,
            })
        };

        if let Some(img) = &annotated {
            response["image_string"] = json!(self.encode_image(img, quality)?);
        }

        if self.recorder.is_some() {
            let banner = if region.found() {
                let hres = self.profile.horizontal_resolution_pixels.max(1) as f64;
                Banner {
                    text: format!(
                        "CENTER: {:.0}% WIDTH: {:.0}%",
                        region.center.1 / hres * 100.0,
                        f64::from(region.width) / hres * 100.0,
                    ),
                    found: true,
                }
            } else {
                Banner {
                    text: "NOT FOUND".into(),
                    found: false,
                }
            };
            let to_record = annotated.unwrap_or(frame);
            self.record(&to_record, banner);
        }

        Ok(response)
    }

    fn cmd_apriltag(&mut self, args: &Map<String, Value>) -> Result<Value, RpcError> {
        let return_image = opt_bool(args, "return_image")?.unwrap_or(false);
        let quality = opt_f64(args, "quality")?.unwrap_or(DEFAULT_JPEG_QUALITY);
        let mode = PreprocessMode::from_wire(opt_i64(args, "preprocessing_mode")?.unwrap_or(0));
        let params = match args.get("preprocessor_parameters") {
            None => PreprocessParams::default(),
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|_| RpcError::validation("preprocessor_parameters", v))?,
        };

        let frame = self.get_image()?;
        let gray = preprocess(&frame, mode, &params);
        let detections = self.detector.detect(&gray);

        let geometry = self.geometry();
        let camera = TagCamera {
            focal_length_h: self.profile.horizontal_focal_length,
            focal_length_v: self.profile.vertical_focal_length,
            principal_x: f64::from(self.profile.horizontal_resolution_pixels) / 2.0,
            principal_y: f64::from(self.profile.vertical_resolution_pixels) / 2.0,
            tag_side: self.tag_side,
        };
        let tags: Vec<Value> = detections
            .iter()
            .map(|det| {
                serde_json::to_value(astrolabe_tag::report(det, &camera, &geometry))
                    .unwrap_or(Value::Null)
            })
            .collect();

        let mut response = json!({ "tags": tags });
        if return_image {
            response["image_string"] = json!(self.encode_gray(&gray, quality)?);
        }
        Ok(response)
    }

    fn cmd_switch_color(&mut self, args: &Map<String, Value>) -> Result<Value, RpcError> {
        let index =
            opt_i64(args, "new_color")?.ok_or_else(|| RpcError::validation("new_color", "null"))?;
        self.colors.switch(index);
        self.info_snapshot()
    }

    fn cmd_save_color(&mut self, args: &Map<String, Value>) -> Result<Value, RpcError> {
        let base = *self.colors.active();
        let target = color_from_args(args, base)?;
        self.colors.save_active(target);
        self.persist_colors()?;
        self.info_snapshot()
    }

    fn cmd_add_color(&mut self, args: &Map<String, Value>) -> Result<Value, RpcError> {
        let target = color_from_args(args, ColorTarget::default())?;
        self.colors
            .add(target)
            .map_err(|err| RpcError::State(err.to_string()))?;
        self.persist_colors()?;
        self.info_snapshot()
    }

    fn cmd_delete_color(&mut self, args: &Map<String, Value>) -> Result<Value, RpcError> {
        let index =
            opt_i64(args, "color")?.ok_or_else(|| RpcError::validation("color", "null"))?;
        self.colors.delete(index);
        self.persist_colors()?;
        self.info_snapshot()
    }

    fn cmd_set_camera_params(&mut self, args: &Map<String, Value>) -> Result<Value, RpcError> {
        let was_recording = self.recorder.is_some();
        let old_resolution = (
            self.profile.horizontal_resolution_pixels,
            self.profile.vertical_resolution_pixels,
        );

        // Stage every change on a copy; a validation failure anywhere in
        // the request must leave the live profile untouched.
        let mut staged = self.profile.clone();

        let explicit_h_focal = opt_f64(args, "horizontal_focal_length")?;
        let explicit_v_focal = opt_f64(args, "vertical_focal_length")?;

        if let Some(v) = explicit_h_focal {
            staged.horizontal_focal_length = v;
        }
        if let Some(v) = explicit_v_focal {
            staged.vertical_focal_length = v;
        }
        if let Some(v) = opt_f64(args, "camera_height")? {
            staged.camera_height = v;
        }
        if let Some(v) = opt_u32(args, "horizontal_resolution_pixels")? {
            staged.horizontal_resolution_pixels = v;
        }
        if let Some(v) = opt_u32(args, "vertical_resolution_pixels")? {
            staged.vertical_resolution_pixels = v;
        }
        if let Some(v) = opt_f64(args, "tilt_angle_radians")? {
            staged.tilt_angle_radians = v;
        }
        if let Some(v) = opt_f64(args, "horizontal_field_of_view_radians")? {
            staged.horizontal_field_of_view_radians = v;
        }
        if let Some(v) = opt_f64(args, "vertical_field_of_view_radians")? {
            staged.vertical_field_of_view_radians = v;
        }
        if let Some(v) = opt_u32(args, "downscale_factor")? {
            staged.downscale_factor = v;
        }
        if let Some(v) = opt_bool(args, "record")? {
            staged.record = v;
        }

        // Remaining numeric arguments are hardware capture properties.
        for (name, value) in args {
            if PROFILE_FIELDS.contains(&name.as_str()) {
                continue;
            }
            let v = value
                .as_f64()
                .ok_or_else(|| RpcError::validation(name, value))?;
            staged.capture.insert(name.clone(), v);
        }

        staged.clamp();

        // A focal length not set explicitly follows the resolution and FOV.
        let geometry_changed = |args: &Map<String, Value>, keys: [&str; 2]| {
            keys.iter().any(|k| args.contains_key(*k))
        };
        if explicit_h_focal.is_none()
            && geometry_changed(
                args,
                [
                    "horizontal_resolution_pixels",
                    "horizontal_field_of_view_radians",
                ],
            )
        {
            staged.horizontal_focal_length = Defaults::focal_length(
                staged.horizontal_resolution_pixels,
                staged.horizontal_field_of_view_radians,
            );
        }
        if explicit_v_focal.is_none()
            && geometry_changed(
                args,
                [
                    "vertical_resolution_pixels",
                    "vertical_field_of_view_radians",
                ],
            )
        {
            staged.vertical_focal_length = Defaults::focal_length(
                staged.vertical_resolution_pixels,
                staged.vertical_field_of_view_radians,
            );
        }

        self.profile = staged;
        self.persist_profile()?;
        self.source.apply_profile(&self.profile);

        let resolution = (
            self.profile.horizontal_resolution_pixels,
            self.profile.vertical_resolution_pixels,
        );
        if self.profile.record {
            if !was_recording || resolution != old_resolution {
                self.open_recorder()?;
            }
        } else if was_recording {
            self.recorder = None;
        }

        self.info_snapshot()
    }

    fn cmd_function_info(&self) -> Value {
        json!({
            "raw": { "quality": "float in [0,1], JPEG quality" },
            "apriltag": {
                "return_image": "bool, include the preprocessed frame",
                "preprocessing_mode": "int 0..3",
                "quality": "float in [0,1], JPEG quality",
                "preprocessor_parameters": "object {block_radius, threshold, canny_low, canny_high}",
            },
            "piece": {
                "return_image": "bool, include the annotated frame",
                "quality": "float in [0,1], JPEG quality",
            },
            "switch_color": { "new_color": "int, target index (clamped)" },
            "save_color": { "red": "int", "green": "int", "blue": "int", "difference": "int", "blur": "int" },
            "add_color": { "red": "int", "green": "int", "blue": "int", "difference": "int", "blur": "int" },
            "delete_color": { "color": "int, target index" },
            "set_camera_params": {
                "horizontal_focal_length": "float, pixels",
                "vertical_focal_length": "float, pixels",
                "camera_height": "float",
                "horizontal_resolution_pixels": "int >= 1",
                "vertical_resolution_pixels": "int >= 1",
                "tilt_angle_radians": "float, 0 is straight down",
                "horizontal_field_of_view_radians": "float",
                "vertical_field_of_view_radians": "float",
                "downscale_factor": "int >= 1",
                "record": "bool",
                "...": "any other numeric key is a capture property",
            },
            "info": {},
            "function_info": {},
        })
    }
}

const PROFILE_FIELDS: &[&str] = &[
    "horizontal_focal_length",
    "vertical_focal_length",
    "camera_height",
    "horizontal_resolution_pixels",
    "vertical_resolution_pixels",
    "tilt_angle_radians",
    "horizontal_field_of_view_radians",
    "vertical_field_of_view_radians",
    "downscale_factor",
    "record",
];

fn color_from_args(args: &Map<String, Value>, base: ColorTarget) -> Result<ColorTarget, RpcError> {
    let field = |name: &str, current: i32| -> Result<i32, RpcError> {
        match opt_i64(args, name)? {
            None => Ok(current),
            Some(v) => i32::try_from(v).map_err(|_| RpcError::validation(name, v)),
        }
    };
    Ok(ColorTarget {
        red: field("red", base.red)?,
        green: field("green", base.green)?,
        blue: field("blue", base.blue)?,
        difference: field("difference", base.difference)?,
        blur: field("blur", base.blur)?,
    })
}

impl Handler for CameraUnit {
    fn handle(&mut self, function: &str, args: &Map<String, Value>) -> Result<Value, RpcError> {
        match function {
            "raw" => self.cmd_raw(args),
            "apriltag" => self.cmd_apriltag(args),
            "piece" => self.cmd_piece(args),
            "switch_color" => self.cmd_switch_color(args),
            "save_color" => self.cmd_save_color(args),
            "add_color" => self.cmd_add_color(args),
            "delete_color" => self.cmd_delete_color(args),
            "set_camera_params" => self.cmd_set_camera_params(args),
            "info" => self.info_snapshot(),
            "function_info" => Ok(self.cmd_function_info()),
            other => Err(RpcError::UnknownCommand(other.to_string())),
        }
    }
}
