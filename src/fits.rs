//! A minimal, self-contained FITS writer.
//!
//! This is deliberately not a full FITS-standard implementation — a real
//! deployment would hand frames to an external collaborator library for
//! that. [`SimpleFitsEncoder`] writes just enough of the standard (an
//! 80-column card header padded to a 2880-byte block, followed by
//! big-endian pixel data, also block-padded) to produce a file any FITS
//! reader can open, gzip-compressed as `.fits.gz`. [`FrameEncoder`] is the
//! seam a richer encoder would plug into.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::Rng;

use crate::config::{AcquisitionConfig, ObjectType, RunMetadata};
use crate::error::DaqError;
use crate::frame::CameraFrame;
use crate::timestamp::TriggerTimestamp;

const CARD_SIZE: usize = 80;
const BLOCK_SIZE: usize = 2880;

/// Everything needed to build one FITS header/data unit for a paired frame.
pub struct FrameRecord<'a> {
    pub frame: &'a CameraFrame,
    pub trigger: Option<&'a TriggerTimestamp>,
    pub exposure_time: u32,
    pub milliseconds_precision: bool,
    pub config: &'a AcquisitionConfig,
    pub metadata: &'a RunMetadata,
    pub run_number: u32,
    pub frame_number: u32,
    pub downloaded_at: DateTime<Utc>,
}

/// The `FrameEncoder` seam: an external collaborator that knows how to turn
/// a [`FrameRecord`] into bytes on disk.
pub trait FrameEncoder: Send + Sync {
    fn encode(&self, record: &FrameRecord<'_>) -> Result<Vec<u8>, DaqError>;

    /// File extension this encoder produces, including the leading dot.
    fn extension(&self) -> &'static str;
}

/// Concrete [`FrameEncoder`] producing gzip-compressed minimal FITS files.
#[derive(Default)]
pub struct SimpleFitsEncoder;

impl SimpleFitsEncoder {
    /// Builds the header cards required by spec.md §6. In BIAS mode no
    /// external trigger exists: `OBJECT` is forced to `"Bias"`, EXPTIME and
    /// every UT/UTC/TRG-ALGN key are omitted entirely.
    fn header_cards(record: &FrameRecord<'_>) -> Vec<String> {
        let f = record.frame;
        let bias_mode = record.config.trigger_mode == crate::config::TriggerMode::Bias;
        let mut cards = Vec::new();
        cards.push(card_str("SIMPLE", "T", "file does conform to FITS standard"));
        cards.push(card_int("BITPIX", 16, "number of bits per data pixel"));
        cards.push(card_int("NAXIS", 2, "number of data axes"));
        cards.push(card_int("NAXIS1", f.width as i64, "length of data axis 1"));
        cards.push(card_int("NAXIS2", f.height as i64, "length of data axis 2"));
        cards.push(card_str("BZERO", "32768", "offset data range to that of unsigned short"));
        cards.push(card_str("BSCALE", "1", "default scaling factor"));

        cards.push(card_int("RUN", record.run_number as i64, "run number"));
        cards.push(card_int("FRAME", record.frame_number as i64, "frame number within run"));

        let object = if bias_mode {
            "Bias"
        } else if record.config.object_type == ObjectType::Target {
            record.metadata.target_name.as_str()
        } else {
            object_type_str(record.config.object_type)
        };
        cards.push(card_str("OBJECT", object, "object type or user-configured target name"));
        if !bias_mode {
            let exptime_secs = if record.milliseconds_precision {
                record.exposure_time as f64 / 1000.0
            } else {
                record.exposure_time as f64
            };
            cards.push(card_float("EXPTIME", exptime_secs, "exposure time (s)"));
        }
        cards.push(card_str("OBSERVER", &record.metadata.observer, "observer name"));
        cards.push(card_str("OBSERVAT", &record.metadata.observatory, "observatory name"));
        cards.push(card_str("TELESCOP", &record.metadata.telescope, "telescope name"));
        cards.push(card_str("INSTRUME", &record.metadata.instrument, "instrument name"));
        cards.push(card_str("FILTER", &record.metadata.filter_name, "filter name"));
        cards.push(card_str("PROG-VER", &record.metadata.program_version, "acquisition software version"));

        if !bias_mode {
            if let Some(ts) = record.trigger {
                let begin = ts.format_time(record.milliseconds_precision);
                let shift_ms = if record.milliseconds_precision {
                    record.exposure_time as i64
                } else {
                    record.exposure_time as i64 * 1000
                };
                let end_ts = ts.shifted_by_millis(shift_ms);
                let end = end_ts.format_time(record.milliseconds_precision);
                cards.push(card_str("UT_DATE", &ts.format_date(), "UT date of exposure start"));
                cards.push(card_str("UT_TIME", &begin, "UT time of exposure start"));
                cards.push(card_str("UTC-DATE", &ts.format_date(), "UTC date of exposure start"));
                cards.push(card_str("UTC-BEG", &begin, "UTC time of exposure start"));
                cards.push(card_str("UTC-END", &end, "UTC time of exposure end"));
                cards.push(card_str("UTC-LOCK", if ts.locked { "T" } else { "F" }, "GPS was locked"));
            }
            cards.push(card_str(
                "TRG-ALGN",
                if record.config.align_first_exposure { "T" } else { "F" },
                "first exposure aligned to minute boundary",
            ));
        }

        cards.push(card_str(
            "PC-DATE",
            &record.downloaded_at.format("%Y-%m-%d").to_string(),
            "host PC date at frame download",
        ));
        cards.push(card_str(
            "PC-TIME",
            &record.downloaded_at.format("%H:%M:%S%.3f").to_string(),
            "host PC time at frame download",
        ));

        cards.push(card_float("CCD-TEMP", f.temperature, "CCD temperature (C)"));
        cards.push(card_str("CCD-PORT", &f.port, "CCD readout port"));
        cards.push(card_str("CCD-RATE", &f.speed, "CCD readout speed"));
        cards.push(card_str("CCD-GAIN", &f.gain, "CCD gain setting"));
        cards.push(card_int("CCD-BIN", record.config.camera_binning as i64, "CCD on-chip binning"));
        cards.push(card_float("CCD-ROUT", f.readout_time.as_secs_f64(), "CCD readout time (s)"));
        cards.push(card_float(
            "CCD-SHFT",
            f.vertical_shift_time.as_secs_f64() * 1_000_000.0,
            "vertical shift time (us)",
        ));

        cards.push(card_str("TRG-MODE", trigger_mode_str(record.config.trigger_mode), "trigger mode"));
        cards.push(card_float(
            "IM-SCALE",
            record.metadata.plate_scale_arcsec_per_pixel,
            "plate scale (arcsec/pixel)",
        ));

        if f.has_timestamp {
            cards.push(card_float("CCD-TIME", f.relative_timestamp_secs, "relative timestamp (s), no external trigger"));
        }
        if let Some(em) = f.em_gain {
            cards.push(card_int("CCD-EMGN", em as i64, "electron-multiplying gain"));
        }
        if let Some(shortcut) = f.exposure_shortcut_ms {
            cards.push(card_int("CCD-SCUT", shortcut as i64, "exposure shortcut (ms)"));
        }
        if let Some(region) = f.image_region {
            cards.push(card_str("IMAG-RGN", &region_str(region), "light-sensitive sub-array"));
        }
        if let Some(region) = f.bias_region {
            cards.push(card_str("BIAS-RGN", &region_str(region), "overscan sub-array"));
        }

        cards.push("END".to_string());
        cards
    }

    fn build_header_block(record: &FrameRecord<'_>) -> Vec<u8> {
        let mut bytes = Vec::new();
        for card in Self::header_cards(record) {
            let mut padded = card.into_bytes();
            padded.resize(CARD_SIZE, b' ');
            bytes.extend_from_slice(&padded[..CARD_SIZE]);
        }
        pad_to_block(&mut bytes);
        bytes
    }
}

impl FrameEncoder for SimpleFitsEncoder {
    fn encode(&self, record: &FrameRecord<'_>) -> Result<Vec<u8>, DaqError> {
        let mut plain = Self::build_header_block(record);

        // FITS stores 16-bit integer data as signed big-endian with a BZERO
        // offset of 32768 to represent unsigned values, per convention.
        let mut data = Vec::with_capacity(record.frame.pixels.len() * 2);
        for &pixel in &record.frame.pixels {
            let signed = pixel as i32 - 32768;
            data.extend_from_slice(&(signed as i16).to_be_bytes());
        }
        pad_to_block(&mut data);
        plain.extend_from_slice(&data);

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&plain)
            .map_err(|e| DaqError::Encoder(format!("gzip compression failed: {e}")))?;
        encoder
            .finish()
            .map_err(|e| DaqError::Encoder(format!("gzip finalize failed: {e}")))
    }

    fn extension(&self) -> &'static str {
        ".fits.gz"
    }
}

fn card_str(key: &str, value: &str, comment: &str) -> String {
    format!("{key:<8}= '{value:<18}' / {comment}")
}

fn card_int(key: &str, value: i64, comment: &str) -> String {
    format!("{key:<8}= {value:>20} / {comment}")
}

fn card_float(key: &str, value: f64, comment: &str) -> String {
    format!("{key:<8}= {value:>20.4} / {comment}")
}

fn object_type_str(object_type: ObjectType) -> &'static str {
    match object_type {
        ObjectType::Dark => "Dark",
        ObjectType::Flat => "Flat Field",
        ObjectType::Focus => "Focus",
        ObjectType::Target => "TARGET",
    }
}

/// TRG-MODE header string. SECONDS is the camera's lower-resolution
/// trigger granularity, MILLISECONDS its higher-resolution one. The Bias
/// arm is distinct from the bare "Bias" written under OBJECT.
fn trigger_mode_str(mode: crate::config::TriggerMode) -> &'static str {
    match mode {
        crate::config::TriggerMode::Seconds => "Low Resolution",
        crate::config::TriggerMode::Milliseconds => "High Resolution",
        crate::config::TriggerMode::Bias => "Bias (no triggers)",
    }
}

fn region_str(region: crate::frame::Rect) -> String {
    format!(
        "[{}:{},{}:{}]",
        region.x,
        region.x + region.width,
        region.y,
        region.y + region.height
    )
}

fn pad_to_block(bytes: &mut Vec<u8>) {
    let remainder = bytes.len() % BLOCK_SIZE;
    if remainder != 0 {
        bytes.resize(bytes.len() + (BLOCK_SIZE - remainder), 0);
    }
}

/// Maximum number of random temp-suffix collisions tolerated before
/// `atomic_write` gives up.
const MAX_TEMP_NAME_ATTEMPTS: u32 = 1000;

/// Writes `bytes` to `final_path` atomically: write to a sibling temp file
/// named with a random 16-bit suffix, then rename into place, so a reader
/// never observes a partial file. Retries with a fresh suffix if the temp
/// name happens to collide with an existing file (tried up to
/// [`MAX_TEMP_NAME_ATTEMPTS`] times). When `allow_overwrite` is false the
/// write is refused outright if `final_path` already exists — canonical
/// science frames are never clobbered, while the rolling preview file is
/// written with `allow_overwrite = true`.
pub fn atomic_write(final_path: &Path, bytes: &[u8], allow_overwrite: bool) -> Result<(), DaqError> {
    if let Some(parent) = final_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if !allow_overwrite && final_path.exists() {
        return Err(DaqError::Io(format!(
            "refusing to overwrite existing file {}",
            final_path.display()
        )));
    }

    let dir = final_path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    let stem = final_path.file_name().and_then(|n| n.to_str()).unwrap_or("frame");

    for _ in 0..MAX_TEMP_NAME_ATTEMPTS {
        let suffix: u16 = rand::thread_rng().gen();
        let tmp_path = dir.join(format!(".{stem}.{suffix:04x}.tmp"));
        if tmp_path.exists() {
            continue;
        }
        std::fs::write(&tmp_path, bytes)?;
        if !allow_overwrite && final_path.exists() {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(DaqError::Io(format!(
                "refusing to overwrite existing file {}",
                final_path.display()
            )));
        }
        std::fs::rename(&tmp_path, final_path)?;
        return Ok(());
    }
    Err(DaqError::Io(format!(
        "could not find a free temp filename for {} after {MAX_TEMP_NAME_ATTEMPTS} attempts",
        final_path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Rect;
    use std::time::Duration;

    fn sample_frame() -> CameraFrame {
        CameraFrame {
            pixels: vec![0u16; 16],
            width: 4,
            height: 4,
            temperature: -20.0,
            readout_time: Duration::from_millis(20),
            vertical_shift_time: Duration::from_micros(400),
            image_region: Some(Rect::new(0, 0, 4, 4)),
            bias_region: None,
            em_gain: None,
            exposure_shortcut_ms: None,
            port: "Normal".into(),
            speed: "1MHz".into(),
            gain: "1x".into(),
            downloaded_time: Utc::now(),
            has_timestamp: false,
            relative_timestamp_secs: 0.0,
        }
    }

    #[test]
    fn encoded_bytes_are_gzip_magic_prefixed() {
        let frame = sample_frame();
        let config = AcquisitionConfig::default();
        let metadata = RunMetadata::default();
        let ts = TriggerTimestamp::new(2026, 7, 28, 10, 0, 0, 0, true, 0);
        let record = FrameRecord {
            frame: &frame,
            trigger: Some(&ts),
            exposure_time: 5,
            milliseconds_precision: false,
            config: &config,
            metadata: &metadata,
            run_number: 1,
            frame_number: 1,
            downloaded_at: Utc::now(),
        };
        let encoder = SimpleFitsEncoder;
        let bytes = encoder.encode(&record).unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
    }

    fn decode_header(bytes: &[u8]) -> String {
        use flate2::read::GzDecoder;
        use std::io::Read;
        let mut plain = Vec::new();
        GzDecoder::new(bytes).read_to_end(&mut plain).unwrap();
        String::from_utf8_lossy(&plain[..BLOCK_SIZE]).to_string()
    }

    #[test]
    fn non_bias_header_carries_required_keys_and_trg_mode() {
        let frame = sample_frame();
        let mut config = AcquisitionConfig::default();
        config.trigger_mode = crate::config::TriggerMode::Seconds;
        let metadata = RunMetadata::default();
        let ts = TriggerTimestamp::new(2026, 7, 28, 10, 0, 0, 0, true, 0);
        let record = FrameRecord {
            frame: &frame,
            trigger: Some(&ts),
            exposure_time: 5,
            milliseconds_precision: false,
            config: &config,
            metadata: &metadata,
            run_number: 1,
            frame_number: 1,
            downloaded_at: Utc::now(),
        };
        let header = decode_header(&SimpleFitsEncoder.encode(&record).unwrap());
        for key in [
            "OBJECT", "EXPTIME", "OBSERVER", "OBSERVAT", "TELESCOP", "INSTRUME", "FILTER",
            "PROG-VER", "UT_DATE", "UT_TIME", "UTC-DATE", "UTC-BEG", "UTC-END", "UTC-LOCK",
            "PC-DATE", "PC-TIME", "CCD-TEMP", "CCD-PORT", "CCD-RATE", "CCD-GAIN", "CCD-BIN",
            "CCD-ROUT", "CCD-SHFT", "TRG-MODE", "TRG-ALGN", "IM-SCALE",
        ] {
            assert!(header.contains(key), "header missing required key {key}");
        }
        assert!(header.contains("'Low Resolution"), "SECONDS mode must report TRG-MODE=Low Resolution");
    }

    #[test]
    fn object_key_carries_the_configured_target_name_for_target_frames() {
        let frame = sample_frame();
        let mut config = AcquisitionConfig::default();
        config.trigger_mode = crate::config::TriggerMode::Seconds;
        config.object_type = ObjectType::Target;
        let mut metadata = RunMetadata::default();
        metadata.target_name = "M42".into();
        let ts = TriggerTimestamp::new(2026, 7, 28, 10, 0, 0, 0, true, 0);
        let record = FrameRecord {
            frame: &frame,
            trigger: Some(&ts),
            exposure_time: 5,
            milliseconds_precision: false,
            config: &config,
            metadata: &metadata,
            run_number: 1,
            frame_number: 1,
            downloaded_at: Utc::now(),
        };
        let header = decode_header(&SimpleFitsEncoder.encode(&record).unwrap());
        assert!(header.contains("'M42"), "OBJECT must carry the user-configured target name");
    }

    #[test]
    fn milliseconds_mode_reports_exptime_in_seconds_and_shifts_utc_end_by_the_raw_value() {
        let frame = sample_frame();
        let mut config = AcquisitionConfig::default();
        config.trigger_mode = crate::config::TriggerMode::Milliseconds;
        let metadata = RunMetadata::default();
        let ts = TriggerTimestamp::new(2026, 7, 28, 10, 0, 0, 0, true, 0);
        let record = FrameRecord {
            frame: &frame,
            trigger: Some(&ts),
            exposure_time: 500,
            milliseconds_precision: true,
            config: &config,
            metadata: &metadata,
            run_number: 1,
            frame_number: 1,
            downloaded_at: Utc::now(),
        };
        let header = decode_header(&SimpleFitsEncoder.encode(&record).unwrap());
        assert!(
            header.contains("0.5000"),
            "a 500ms exposure must report EXPTIME=0.5 seconds, not 500"
        );
        assert!(
            !header.contains("500.0000"),
            "EXPTIME must not be left unscaled in MILLISECONDS mode"
        );
        let expected_end = ts.shifted_by_millis(500).format_time(true);
        assert!(
            header.contains(&expected_end),
            "UTC-END must be exactly 500ms after UTC-BEG in MILLISECONDS mode, not 500s"
        );
    }

    #[test]
    fn bias_mode_header_omits_exptime_and_ut_utc_keys() {
        let frame = sample_frame();
        let mut config = AcquisitionConfig::default();
        config.trigger_mode = crate::config::TriggerMode::Bias;
        config.object_type = ObjectType::Dark;
        let metadata = RunMetadata::default();
        let record = FrameRecord {
            frame: &frame,
            trigger: None,
            exposure_time: 0,
            milliseconds_precision: false,
            config: &config,
            metadata: &metadata,
            run_number: 1,
            frame_number: 1,
            downloaded_at: Utc::now(),
        };
        let header = decode_header(&SimpleFitsEncoder.encode(&record).unwrap());
        assert!(header.contains("'Bias"), "BIAS mode must force OBJECT=Bias");
        assert!(!header.contains("EXPTIME"), "BIAS mode must omit EXPTIME");
        assert!(!header.contains("UTC-BEG"), "BIAS mode must omit UTC keys");
        assert!(!header.contains("UT_DATE"), "BIAS mode must omit UT keys");
        assert!(!header.contains("TRG-ALGN"), "BIAS mode must omit TRG-ALGN");
    }

    #[test]
    fn atomic_write_never_leaves_a_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run0001.fits.gz");
        atomic_write(&path, b"hello", true).unwrap();
        assert!(path.exists());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().to_string_lossy().contains(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn atomic_write_refuses_to_overwrite_when_disallowed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run0001.fits.gz");
        atomic_write(&path, b"first", false).unwrap();
        let err = atomic_write(&path, b"second", false).unwrap_err();
        assert!(matches!(err, DaqError::Io(_)));
        assert_eq!(std::fs::read(&path).unwrap(), b"first");
    }

    #[test]
    fn atomic_write_overwrites_when_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.fits.gz");
        atomic_write(&path, b"first", true).unwrap();
        atomic_write(&path, b"second", true).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
    }
}
