use std::collections::BTreeMap;
use std::io::Cursor;

use chrono::{Local, SecondsFormat};
use exif::experimental::Writer;
use exif::{Field, In, Rational, Tag, Value};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_text_mut;
use rusttype::{Font, Scale};
use serde::{Deserialize, Serialize};

use crate::camera::RawFrame;
use crate::config::AnnotationConfig;
use crate::error::ComposeError;
use crate::geo::{AddressFormat, AddressFormatter, LocationSnapshot};

/// Bundled so caption rendering works without a fontconfig lookup.
const FONT_BYTES: &[u8] = include_bytes!("../fonts/DejaVuSans.ttf");

const EXIF_HEADER: &[u8] = b"Exif\0\0";
const USER_COMMENT_ASCII: &[u8] = b"ASCII\0\0\0";

pub const GPS_LATITUDE: &str = "GPSLatitude";
pub const GPS_LONGITUDE: &str = "GPSLongitude";
pub const GPS_LATITUDE_REF: &str = "GPSLatitudeRef";
pub const GPS_LONGITUDE_REF: &str = "GPSLongitudeRef";
pub const DATE_TIME_ORIGINAL: &str = "DateTimeOriginal";
pub const USER_COMMENT: &str = "UserComment";

/// The selected method for producing an annotated image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Write structured fields into the image's metadata container;
    /// pixel data is untouched.
    Metadata,
    /// Rasterize a visible caption band into the pixel data.
    Caption,
}

/// One structured metadata field value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Text(String),
    Num(f64),
}

impl MetadataValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            MetadataValue::Num(_) => None,
        }
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            MetadataValue::Num(n) => Some(*n),
            MetadataValue::Text(_) => None,
        }
    }
}

/// The finished artifact handed to the library writer. Either the original
/// frame's pixels with metadata fields alongside, or a re-rendered pixel
/// buffer with the caption baked in (and an empty metadata map).
#[derive(Debug, Clone)]
pub struct AnnotatedImage {
    pub pixels: RgbImage,
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl AnnotatedImage {
    /// Encodes to a single JPEG artifact. A non-empty metadata map is written
    /// as an EXIF APP1 segment (GPS IFD coordinates in degree/minute/second
    /// rationals, hemisphere refs, timestamp, comment).
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>, ComposeError> {
        let mut jpeg = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, quality);
        encoder.encode(
            self.pixels.as_raw(),
            self.pixels.width(),
            self.pixels.height(),
            image::ColorType::Rgb8,
        )?;

        if self.metadata.is_empty() {
            return Ok(jpeg);
        }
        let exif_block = build_exif_block(&self.metadata)?;
        splice_app1(&jpeg, &exif_block)
    }
}

/// Caption band appearance.
#[derive(Debug, Clone)]
pub struct CaptionStyle {
    /// Padding around the text block, in pixels.
    pub padding: u32,
    /// Band opacity over the frame, `0.0..=1.0`.
    pub opacity: f32,
}

impl Default for CaptionStyle {
    fn default() -> Self {
        Self {
            padding: 12,
            opacity: 0.55,
        }
    }
}

/// Configured annotation behavior, fixed for the lifetime of a session.
#[derive(Debug, Clone)]
pub struct AnnotationOptions {
    pub strategy: Strategy,
    pub address_format: AddressFormat,
    pub caption: CaptionStyle,
}

impl AnnotationOptions {
    pub fn from_config(config: &AnnotationConfig) -> Self {
        Self {
            strategy: config.strategy,
            address_format: config.address_format,
            caption: CaptionStyle {
                padding: config.caption_padding,
                opacity: config.caption_opacity,
            },
        }
    }
}

/// Combines a captured frame with a location snapshot into one finished image.
///
/// Never fails on a missing location: an empty snapshot still produces a valid
/// artifact with no GPS fields and no location caption line. The snapshot is
/// whatever was available when this was invoked; capture is never blocked
/// waiting on a fresh fix.
pub fn compose(
    frame: &RawFrame,
    snapshot: &LocationSnapshot,
    options: &AnnotationOptions,
) -> Result<AnnotatedImage, ComposeError> {
    let formatter = options.address_format.formatter();
    match options.strategy {
        Strategy::Metadata => Ok(AnnotatedImage {
            pixels: frame.pixels().clone(),
            metadata: metadata_fields(frame, snapshot, formatter),
        }),
        Strategy::Caption => {
            let lines = caption_lines(frame, snapshot, formatter);
            let mut pixels = frame.pixels().clone();
            draw_caption(&mut pixels, &lines, &options.caption)?;
            Ok(AnnotatedImage {
                pixels,
                metadata: BTreeMap::new(),
            })
        }
    }
}

/// Structured fields for the metadata strategy. Deterministic for a given
/// frame and snapshot. GPS fields are omitted without a fix, the comment is
/// omitted without an address; the capture instant is always present.
fn metadata_fields(
    frame: &RawFrame,
    snapshot: &LocationSnapshot,
    formatter: &dyn AddressFormatter,
) -> BTreeMap<String, MetadataValue> {
    let mut metadata = BTreeMap::new();
    metadata.insert(
        DATE_TIME_ORIGINAL.to_string(),
        MetadataValue::Text(
            frame
                .captured_at()
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
    );

    if let Some(fix) = &snapshot.fix {
        metadata.insert(GPS_LATITUDE.to_string(), MetadataValue::Num(fix.latitude));
        metadata.insert(GPS_LONGITUDE.to_string(), MetadataValue::Num(fix.longitude));
        metadata.insert(
            GPS_LATITUDE_REF.to_string(),
            MetadataValue::Text(fix.latitude_ref().to_string()),
        );
        metadata.insert(
            GPS_LONGITUDE_REF.to_string(),
            MetadataValue::Text(fix.longitude_ref().to_string()),
        );
    }

    if let Some(address) = &snapshot.address {
        let formatted = formatter.format(address);
        if !formatted.is_empty() {
            metadata.insert(USER_COMMENT.to_string(), MetadataValue::Text(formatted));
        }
    }

    metadata
}

/// Caption lines in display order: address, timestamp, coordinates.
/// The timestamp line is always emitted; the others degrade with the snapshot.
pub(crate) fn caption_lines(
    frame: &RawFrame,
    snapshot: &LocationSnapshot,
    formatter: &dyn AddressFormatter,
) -> Vec<String> {
    let mut lines = Vec::new();

    if let Some(address) = &snapshot.address {
        let formatted = formatter.format(address);
        if !formatted.is_empty() {
            lines.push(formatted);
        }
    }

    lines.push(
        frame
            .captured_at()
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
    );

    if let Some(fix) = &snapshot.fix {
        lines.push(format!(
            "Lat: {:.6}, Long: {:.6}",
            fix.latitude, fix.longitude
        ));
    }

    lines
}

/// Rasterizes a bottom-anchored, full-width, semi-opaque caption band into the
/// frame's pixels at native resolution.
fn draw_caption(
    pixels: &mut RgbImage,
    lines: &[String],
    style: &CaptionStyle,
) -> Result<(), ComposeError> {
    let font = Font::try_from_bytes(FONT_BYTES).ok_or(ComposeError::Font)?;

    let (width, height) = pixels.dimensions();
    let font_px = (width.min(height) / 40).max(16);
    let line_height = font_px + font_px / 3;
    let band_height = (lines.len() as u32 * line_height + 2 * style.padding).min(height);
    let band_top = height - band_height;

    let opacity = style.opacity.clamp(0.0, 1.0);
    for y in band_top..height {
        for x in 0..width {
            let pixel = pixels.get_pixel_mut(x, y);
            for channel in pixel.0.iter_mut() {
                *channel = (*channel as f32 * (1.0 - opacity)) as u8;
            }
        }
    }

    let scale = Scale::uniform(font_px as f32);
    for (i, line) in lines.iter().enumerate() {
        let y = band_top + style.padding + i as u32 * line_height;
        draw_text_mut(
            pixels,
            Rgb([255u8, 255u8, 255u8]),
            style.padding as i32,
            y as i32,
            scale,
            &font,
            line,
        );
    }

    Ok(())
}

/// Serializes the metadata map into a raw TIFF/EXIF block.
fn build_exif_block(
    metadata: &BTreeMap<String, MetadataValue>,
) -> Result<Vec<u8>, ComposeError> {
    let mut fields = Vec::new();
    for (key, value) in metadata {
        match (key.as_str(), value) {
            (GPS_LATITUDE, MetadataValue::Num(degrees)) => {
                fields.push(rational_field(Tag::GPSLatitude, degrees.abs()));
            }
            (GPS_LONGITUDE, MetadataValue::Num(degrees)) => {
                fields.push(rational_field(Tag::GPSLongitude, degrees.abs()));
            }
            (GPS_LATITUDE_REF, MetadataValue::Text(text)) => {
                fields.push(ascii_field(Tag::GPSLatitudeRef, text));
            }
            (GPS_LONGITUDE_REF, MetadataValue::Text(text)) => {
                fields.push(ascii_field(Tag::GPSLongitudeRef, text));
            }
            (DATE_TIME_ORIGINAL, MetadataValue::Text(text)) => {
                fields.push(ascii_field(Tag::DateTimeOriginal, text));
            }
            (USER_COMMENT, MetadataValue::Text(text)) => {
                let mut bytes = USER_COMMENT_ASCII.to_vec();
                bytes.extend_from_slice(text.as_bytes());
                fields.push(Field {
                    tag: Tag::UserComment,
                    ifd_num: In::PRIMARY,
                    value: Value::Undefined(bytes, 0),
                });
            }
            _ => {
                log::debug!("Skipping unmapped metadata field {}", key);
            }
        }
    }

    let mut writer = Writer::new();
    for field in &fields {
        writer.push_field(field);
    }
    let mut cursor = Cursor::new(Vec::new());
    writer.write(&mut cursor, false)?;
    Ok(cursor.into_inner())
}

fn ascii_field(tag: Tag, text: &str) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value: Value::Ascii(vec![text.as_bytes().to_vec()]),
    }
}

fn rational_field(tag: Tag, degrees: f64) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value: Value::Rational(degrees_to_dms(degrees)),
    }
}

/// Unsigned decimal degrees to degree/minute/second rationals, seconds kept
/// at millisecond-of-arc resolution.
fn degrees_to_dms(degrees: f64) -> Vec<Rational> {
    let mut whole_degrees = degrees.trunc() as u32;
    let minutes_full = (degrees - degrees.trunc()) * 60.0;
    let mut minutes = minutes_full.trunc() as u32;
    let mut second_millis = ((minutes_full - minutes_full.trunc()) * 60.0 * 1000.0).round() as u32;

    if second_millis >= 60_000 {
        second_millis -= 60_000;
        minutes += 1;
    }
    if minutes >= 60 {
        minutes -= 60;
        whole_degrees += 1;
    }

    vec![
        Rational::from((whole_degrees, 1)),
        Rational::from((minutes, 1)),
        Rational::from((second_millis, 1000)),
    ]
}

/// Inserts the EXIF block as an APP1 segment directly after the JPEG SOI
/// marker.
fn splice_app1(jpeg: &[u8], exif_block: &[u8]) -> Result<Vec<u8>, ComposeError> {
    debug_assert!(jpeg.starts_with(&[0xFF, 0xD8]));

    let segment_len = 2 + EXIF_HEADER.len() + exif_block.len();
    if segment_len > 0xFFFF {
        return Err(ComposeError::OversizedMetadata(exif_block.len()));
    }

    let mut out = Vec::with_capacity(jpeg.len() + segment_len + 2);
    out.extend_from_slice(&jpeg[..2]);
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&(segment_len as u16).to_be_bytes());
    out.extend_from_slice(EXIF_HEADER);
    out.extend_from_slice(exif_block);
    out.extend_from_slice(&jpeg[2..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use image::ImageBuffer;

    use crate::geo::{Address, GeoFix};

    fn test_frame() -> RawFrame {
        let pixels: RgbImage = ImageBuffer::from_fn(160, 120, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        let captured_at = Utc.with_ymd_and_hms(2024, 5, 17, 10, 30, 0).unwrap();
        RawFrame::new(pixels, captured_at)
    }

    fn san_francisco_snapshot() -> LocationSnapshot {
        LocationSnapshot {
            fix: Some(GeoFix::at(
                37.7749,
                -122.4194,
                Utc.with_ymd_and_hms(2024, 5, 17, 10, 29, 58).unwrap(),
            )),
            address: Some(Address {
                city: Some("San Francisco".to_string()),
                region: Some("CA".to_string()),
                country: Some("USA".to_string()),
                ..Default::default()
            }),
        }
    }

    fn metadata_options() -> AnnotationOptions {
        AnnotationOptions {
            strategy: Strategy::Metadata,
            address_format: AddressFormat::Components,
            caption: CaptionStyle::default(),
        }
    }

    fn caption_options() -> AnnotationOptions {
        AnnotationOptions {
            strategy: Strategy::Caption,
            ..metadata_options()
        }
    }

    #[test]
    fn test_metadata_strategy_never_mutates_pixels() {
        let frame = test_frame();
        let annotated = compose(&frame, &san_francisco_snapshot(), &metadata_options()).unwrap();
        assert_eq!(annotated.pixels.as_raw(), frame.pixels().as_raw());
    }

    #[test]
    fn test_metadata_fields_for_san_francisco() {
        let frame = test_frame();
        let annotated = compose(&frame, &san_francisco_snapshot(), &metadata_options()).unwrap();

        let metadata = &annotated.metadata;
        assert_eq!(metadata[GPS_LATITUDE].as_num(), Some(37.7749));
        assert_eq!(metadata[GPS_LONGITUDE].as_num(), Some(-122.4194));
        assert_eq!(metadata[GPS_LATITUDE_REF].as_text(), Some("N"));
        assert_eq!(metadata[GPS_LONGITUDE_REF].as_text(), Some("W"));
        assert_eq!(
            metadata[DATE_TIME_ORIGINAL].as_text(),
            Some("2024-05-17T10:30:00Z")
        );
        assert_eq!(
            metadata[USER_COMMENT].as_text(),
            Some("San Francisco, CA, USA")
        );
    }

    #[test]
    fn test_southern_hemisphere_refs() {
        let frame = test_frame();
        let snapshot = LocationSnapshot {
            fix: Some(GeoFix::new(-33.8688, 151.2093)),
            address: None,
        };
        let annotated = compose(&frame, &snapshot, &metadata_options()).unwrap();
        assert_eq!(annotated.metadata[GPS_LATITUDE_REF].as_text(), Some("S"));
        assert_eq!(annotated.metadata[GPS_LONGITUDE_REF].as_text(), Some("E"));
    }

    #[test]
    fn test_empty_snapshot_still_composes() {
        let frame = test_frame();

        let annotated = compose(&frame, &LocationSnapshot::empty(), &metadata_options()).unwrap();
        assert!(annotated.metadata.contains_key(DATE_TIME_ORIGINAL));
        assert!(!annotated.metadata.contains_key(GPS_LATITUDE));
        assert!(!annotated.metadata.contains_key(USER_COMMENT));

        let annotated = compose(&frame, &LocationSnapshot::empty(), &caption_options()).unwrap();
        assert!(annotated.metadata.is_empty());
    }

    #[test]
    fn test_fix_without_address_omits_comment_only() {
        let frame = test_frame();
        let snapshot = LocationSnapshot {
            fix: Some(GeoFix::new(37.7749, -122.4194)),
            address: None,
        };
        let annotated = compose(&frame, &snapshot, &metadata_options()).unwrap();
        assert!(annotated.metadata.contains_key(GPS_LATITUDE));
        assert!(!annotated.metadata.contains_key(USER_COMMENT));
    }

    #[test]
    fn test_caption_lines_render_six_decimal_digits() {
        let frame = test_frame();
        let lines = caption_lines(
            &frame,
            &san_francisco_snapshot(),
            AddressFormat::Components.formatter(),
        );
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "San Francisco, CA, USA");
        assert_eq!(lines[2], "Lat: 37.774900, Long: -122.419400");
    }

    #[test]
    fn test_caption_lines_degrade_with_snapshot() {
        let frame = test_frame();

        let lines = caption_lines(
            &frame,
            &LocationSnapshot::empty(),
            AddressFormat::Components.formatter(),
        );
        // Timestamp only: no address line, no coordinate line.
        assert_eq!(lines.len(), 1);
        assert!(!lines[0].starts_with("Lat:"));

        let fix_only = LocationSnapshot {
            fix: Some(GeoFix::new(1.5, 2.5)),
            address: None,
        };
        let lines = caption_lines(&frame, &fix_only, AddressFormat::Components.formatter());
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "Lat: 1.500000, Long: 2.500000");
    }

    #[test]
    fn test_caption_strategy_darkens_band_and_keeps_rest() {
        let frame = test_frame();
        let annotated = compose(&frame, &san_francisco_snapshot(), &caption_options()).unwrap();

        let height = frame.height();
        // Top rows are untouched.
        for x in [0, 50, 150] {
            assert_eq!(annotated.pixels.get_pixel(x, 0), frame.pixels().get_pixel(x, 0));
        }
        // The band region differs from the source frame.
        let bottom = height - 2;
        assert_ne!(
            annotated.pixels.get_pixel(150, bottom),
            frame.pixels().get_pixel(150, bottom)
        );
    }

    #[test]
    fn test_degrees_to_dms_roundtrip() {
        let dms = degrees_to_dms(37.7749);
        let back = dms[0].to_f64() + dms[1].to_f64() / 60.0 + dms[2].to_f64() / 3600.0;
        assert!((back - 37.7749).abs() < 1e-6);
    }

    #[test]
    fn test_degrees_to_dms_carries_rounded_seconds() {
        // 0.9999999 degrees rounds to 60.000 seconds and must carry over.
        let dms = degrees_to_dms(0.999_999_9);
        let back = dms[0].to_f64() + dms[1].to_f64() / 60.0 + dms[2].to_f64() / 3600.0;
        assert!((back - 1.0).abs() < 1e-6);
        assert!(dms[1].to_f64() < 60.0);
        assert!(dms[2].to_f64() < 60.0);
    }

    #[test]
    fn test_jpeg_exif_roundtrip() {
        let frame = test_frame();
        let annotated = compose(&frame, &san_francisco_snapshot(), &metadata_options()).unwrap();
        let jpeg = annotated.to_jpeg(85).unwrap();

        let exif = exif::Reader::new()
            .read_from_container(&mut Cursor::new(&jpeg))
            .unwrap();

        let lat_ref = exif.get_field(Tag::GPSLatitudeRef, In::PRIMARY).unwrap();
        match &lat_ref.value {
            Value::Ascii(v) => assert_eq!(v[0], b"N"),
            other => panic!("unexpected value {:?}", other),
        }
        let lon_ref = exif.get_field(Tag::GPSLongitudeRef, In::PRIMARY).unwrap();
        match &lon_ref.value {
            Value::Ascii(v) => assert_eq!(v[0], b"W"),
            other => panic!("unexpected value {:?}", other),
        }

        let lat = exif.get_field(Tag::GPSLatitude, In::PRIMARY).unwrap();
        match &lat.value {
            Value::Rational(dms) => {
                let degrees =
                    dms[0].to_f64() + dms[1].to_f64() / 60.0 + dms[2].to_f64() / 3600.0;
                assert!((degrees - 37.7749).abs() < 1e-6);
            }
            other => panic!("unexpected value {:?}", other),
        }

        let comment = exif.get_field(Tag::UserComment, In::PRIMARY).unwrap();
        match &comment.value {
            Value::Undefined(bytes, _) => {
                let text = String::from_utf8_lossy(bytes);
                assert!(text.contains("San Francisco, CA, USA"));
            }
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn test_jpeg_without_metadata_is_plain() {
        let frame = test_frame();
        let annotated = compose(&frame, &san_francisco_snapshot(), &caption_options()).unwrap();
        let jpeg = annotated.to_jpeg(85).unwrap();

        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        // Caption output carries no EXIF segment.
        assert!(exif::Reader::new()
            .read_from_container(&mut Cursor::new(&jpeg))
            .is_err());
        // And still decodes to the captioned pixels.
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.width(), frame.width());
    }

    #[test]
    fn test_compose_is_deterministic() {
        let frame = test_frame();
        let snapshot = san_francisco_snapshot();
        let first = compose(&frame, &snapshot, &metadata_options()).unwrap();
        let second = compose(&frame, &snapshot, &metadata_options()).unwrap();
        assert_eq!(first.metadata, second.metadata);
        assert_eq!(first.pixels.as_raw(), second.pixels.as_raw());
    }
}
