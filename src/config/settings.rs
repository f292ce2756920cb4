//! Compression settings and their resolution into codec-specific values

use std::path::Path;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use crate::config::profiles::codec_defaults;
use crate::config::ImageFormat;
use crate::error::{CompressError, Result};

/// Default file naming template
pub const DEFAULT_FILE_NAMING: &str = "{filename}_compressed";

/// Default file extension template
pub const DEFAULT_FILE_EXTENSION: &str = ".{ext}";

/// Quality above which WebP output switches to lossless when not told otherwise
pub const LOSSLESS_QUALITY_THRESHOLD: u8 = 90;

/// Partially specified settings.
///
/// Used for caller input, presets and codec defaults alike. `None` means
/// "not set here, fall through to the next layer".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_dimensions: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_format: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove_metadata: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimize_colors: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progressive: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_naming: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_extension: Option<String>,

    // JPEG
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trellis_quantisation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overshoot_deringing: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimize_scans: Option<bool>,

    // PNG
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adaptive_filtering: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub palette: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dither: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colors: Option<u16>,

    // WebP
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lossless: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub near_lossless: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smart_subsample: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<u8>,
}

macro_rules! layer_fields {
    ($bottom:expr, $top:expr, $($field:ident),+ $(,)?) => {
        SettingsOverrides {
            $($field: $top.$field.clone().or_else(|| $bottom.$field.clone()),)+
        }
    };
}

impl SettingsOverrides {
    /// Empty overrides
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer `top` over `self`; every field set in `top` wins
    pub fn overlay(&self, top: &SettingsOverrides) -> SettingsOverrides {
        layer_fields!(
            self, top,
            quality, keep_dimensions, width, height, keep_format, output_format,
            remove_metadata, optimize_colors, progressive, file_naming, file_extension,
            trellis_quantisation, overshoot_deringing, optimize_scans,
            compression_level, adaptive_filtering, palette, dither, colors,
            lossless, near_lossless, smart_subsample, effort,
        )
    }

    /// Set quality
    pub fn quality(mut self, quality: u8) -> Self {
        self.quality = Some(quality);
        self
    }

    /// Keep the input's format
    pub fn keep_format(mut self, keep: bool) -> Self {
        self.keep_format = Some(keep);
        self
    }

    /// Convert to the given format (implies `keep_format(false)`)
    pub fn output_format<S: Into<String>>(mut self, format: S) -> Self {
        self.keep_format = Some(false);
        self.output_format = Some(format.into());
        self
    }

    /// Resize to the given bounds (implies `keep_dimensions(false)`)
    pub fn resize(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.keep_dimensions = Some(false);
        self.width = width;
        self.height = height;
        self
    }

    /// Set the file naming template
    pub fn file_naming<S: Into<String>>(mut self, template: S) -> Self {
        self.file_naming = Some(template.into());
        self
    }

    /// Force WebP lossless on or off
    pub fn lossless(mut self, lossless: bool) -> Self {
        self.lossless = Some(lossless);
        self
    }

    /// Check the values that would make resolution fail
    pub fn validate(&self) -> Result<()> {
        if let Some(quality) = self.quality {
            check_quality(quality)?;
        }
        if let Some(naming) = &self.file_naming {
            check_template("File naming", naming)?;
        }
        if let Some(extension) = &self.file_extension {
            check_template("File extension", extension)?;
        }
        Ok(())
    }
}

/// Common settings with every field populated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionSettings {
    pub quality: u8,
    pub keep_dimensions: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub keep_format: bool,
    pub output_format: Option<String>,
    pub remove_metadata: bool,
    pub optimize_colors: bool,
    pub progressive: bool,
    pub file_naming: String,
    pub file_extension: String,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            quality: 70,
            keep_dimensions: true,
            width: None,
            height: None,
            keep_format: true,
            output_format: None,
            remove_metadata: true,
            optimize_colors: false,
            progressive: false,
            file_naming: DEFAULT_FILE_NAMING.to_string(),
            file_extension: DEFAULT_FILE_EXTENSION.to_string(),
        }
    }
}

impl From<CompressionSettings> for SettingsOverrides {
    fn from(settings: CompressionSettings) -> Self {
        Self {
            quality: Some(settings.quality),
            keep_dimensions: Some(settings.keep_dimensions),
            width: settings.width,
            height: settings.height,
            keep_format: Some(settings.keep_format),
            output_format: settings.output_format,
            remove_metadata: Some(settings.remove_metadata),
            optimize_colors: Some(settings.optimize_colors),
            progressive: Some(settings.progressive),
            file_naming: Some(settings.file_naming),
            file_extension: Some(settings.file_extension),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JpegOptions {
    pub progressive: bool,
    pub trellis_quantisation: bool,
    pub overshoot_deringing: bool,
    pub optimize_scans: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PngOptions {
    /// zlib level, 0-9
    pub compression_level: u8,
    pub adaptive_filtering: bool,
    /// Quantize to a palette
    pub palette: bool,
    /// Dithering strength, 0-1
    pub dither: f32,
    /// Palette size, 2-256
    pub colors: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebpOptions {
    pub lossless: bool,
    pub near_lossless: bool,
    pub smart_subsample: bool,
    /// Encoder effort, 0-6
    pub effort: u8,
}

/// Codec-specific part of the resolved settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "codec", rename_all = "lowercase")]
pub enum CodecOptions {
    Jpeg(JpegOptions),
    Png(PngOptions),
    WebP(WebpOptions),
    /// Output format without tunables; the codec decides if it can write it
    Generic,
}

/// Fully populated settings for one input file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSettings {
    pub common: CompressionSettings,
    /// Lowercase output format (extension form, e.g. `jpg`)
    pub output_format: String,
    pub codec: CodecOptions,
}

impl ResolvedSettings {
    /// Known format for the output, if any
    pub fn image_format(&self) -> Option<ImageFormat> {
        ImageFormat::from_extension(&self.output_format)
    }

    /// Target resize bounds, `None` when dimensions are kept
    pub fn target_dimensions(&self) -> Option<(Option<u32>, Option<u32>)> {
        if self.common.keep_dimensions {
            return None;
        }
        match (self.common.width, self.common.height) {
            (None, None) => None,
            bounds => Some(bounds),
        }
    }
}

/// Decide WebP lossless mode from quality when nobody set it explicitly.
///
/// Returns `true` for `quality > 90`.
pub fn infer_lossless(quality: u8) -> bool {
    quality > LOSSLESS_QUALITY_THRESHOLD
}

fn check_quality(quality: u8) -> Result<()> {
    if quality == 0 || quality > 100 {
        return Err(CompressError::config(
            format!("Quality must be between 1-100, got {}", quality)
        ));
    }
    Ok(())
}

/// Output names are joined onto the output directory, so a template must
/// not be able to leave it.
fn check_template(what: &str, template: &str) -> Result<()> {
    if template.contains(['/', '\\']) {
        return Err(CompressError::config(format!(
            "{} template must not contain path separators, got {:?}",
            what, template
        )));
    }
    Ok(())
}

fn clamp_field<T: PartialOrd + Copy + std::fmt::Display>(name: &str, value: T, min: T, max: T) -> T {
    if value < min {
        warn!("{} {} below {}, clamping", name, value, min);
        min
    } else if value > max {
        warn!("{} {} above {}, clamping", name, value, max);
        max
    } else {
        value
    }
}

/// Pick the output format for `input_path`.
fn output_format_for(input_path: &Path, keep_format: bool, requested: Option<&str>) -> Result<String> {
    if keep_format {
        return input_path
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty())
            .map(str::to_lowercase)
            .ok_or_else(|| CompressError::config(format!(
                "Cannot keep format of {:?}: file has no extension",
                input_path
            )));
    }

    requested
        .map(|format| format.trim().trim_start_matches('.').to_lowercase())
        .filter(|format| !format.is_empty())
        .ok_or_else(|| CompressError::config(
            "outputFormat is required when keepFormat is false"
        ))
}

/// Merge caller settings, a preset and codec defaults into a fully
/// populated settings value for `input_path`.
///
/// Precedence per field: `user`, then `base`, then the defaults of the
/// chosen output codec, then global defaults. Fails with a configuration
/// error on a missing output format, a quality outside 1-100 or a naming
/// template containing a path separator; codec tunables out of range are
/// clamped.
pub fn resolve(
    input_path: &Path,
    base: &SettingsOverrides,
    user: &SettingsOverrides,
) -> Result<ResolvedSettings> {
    let globals = CompressionSettings::default();
    let requested = base.overlay(user);

    let keep_format = requested.keep_format.unwrap_or(globals.keep_format);
    let output_format = output_format_for(
        input_path,
        keep_format,
        requested.output_format.as_deref(),
    )?;
    let format = ImageFormat::from_extension(&output_format);

    let merged = codec_defaults(format).overlay(&requested);

    let quality = merged.quality.unwrap_or(globals.quality);
    check_quality(quality)?;

    let common = CompressionSettings {
        quality,
        keep_dimensions: merged.keep_dimensions.unwrap_or(globals.keep_dimensions),
        width: merged.width,
        height: merged.height,
        keep_format,
        output_format: requested.output_format.clone(),
        remove_metadata: merged.remove_metadata.unwrap_or(globals.remove_metadata),
        optimize_colors: merged.optimize_colors.unwrap_or(globals.optimize_colors),
        progressive: merged.progressive.unwrap_or(globals.progressive),
        file_naming: merged.file_naming.clone().unwrap_or(globals.file_naming),
        file_extension: merged.file_extension.clone().unwrap_or(globals.file_extension),
    };
    check_template("File naming", &common.file_naming)?;
    check_template("File extension", &common.file_extension)?;

    let codec = match format {
        Some(ImageFormat::Jpeg) => CodecOptions::Jpeg(JpegOptions {
            progressive: common.progressive,
            trellis_quantisation: merged.trellis_quantisation.unwrap_or(true),
            overshoot_deringing: merged.overshoot_deringing.unwrap_or(true),
            optimize_scans: merged.optimize_scans.unwrap_or(true),
        }),
        Some(ImageFormat::Png) => {
            let dither = match merged.dither {
                Some(d) if d.is_finite() => clamp_field("dither", d, 0.0, 1.0),
                _ => 1.0,
            };
            CodecOptions::Png(PngOptions {
                compression_level: clamp_field(
                    "compressionLevel",
                    merged.compression_level.unwrap_or(9),
                    0,
                    9,
                ),
                adaptive_filtering: merged.adaptive_filtering.unwrap_or(common.optimize_colors),
                palette: merged.palette.unwrap_or(common.optimize_colors),
                dither,
                colors: clamp_field("colors", merged.colors.unwrap_or(256), 2, 256),
            })
        }
        Some(ImageFormat::WebP) => {
            let lossless = match merged.lossless {
                Some(lossless) => lossless,
                None => {
                    let lossless = infer_lossless(quality);
                    debug!(quality, lossless, "Inferred WebP lossless mode from quality");
                    lossless
                }
            };
            CodecOptions::WebP(WebpOptions {
                lossless,
                near_lossless: merged.near_lossless.unwrap_or(false),
                smart_subsample: merged.smart_subsample.unwrap_or(true),
                effort: clamp_field("effort", merged.effort.unwrap_or(4), 0, 6),
            })
        }
        _ => CodecOptions::Generic,
    };

    Ok(ResolvedSettings {
        common,
        output_format,
        codec,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_precedence() {
        let base = SettingsOverrides::new().quality(80).file_naming("{filename}_small");
        let user = SettingsOverrides::new().quality(50);

        let merged = base.overlay(&user);
        assert_eq!(merged.quality, Some(50));
        assert_eq!(merged.file_naming.as_deref(), Some("{filename}_small"));
        assert_eq!(merged.lossless, None);
    }

    #[test]
    fn test_resolve_with_no_overrides_round_trips_defaults() {
        let defaults = CompressionSettings {
            quality: 64,
            keep_format: false,
            output_format: Some("jpg".to_string()),
            progressive: true,
            ..Default::default()
        };
        let resolved = resolve(
            Path::new("photo.png"),
            &defaults.clone().into(),
            &SettingsOverrides::new(),
        )
        .unwrap();

        assert_eq!(resolved.common, defaults);
        assert_eq!(resolved.output_format, "jpg");
    }

    #[test]
    fn test_keep_format_uses_lowercase_extension() {
        let resolved = resolve(
            Path::new("/tmp/Holiday.PNG"),
            &SettingsOverrides::new(),
            &SettingsOverrides::new().keep_format(true),
        )
        .unwrap();

        assert_eq!(resolved.output_format, "png");
        assert!(matches!(resolved.codec, CodecOptions::Png(_)));
    }

    #[test]
    fn test_missing_extension_is_config_error() {
        let err = resolve(
            Path::new("/tmp/README"),
            &SettingsOverrides::new(),
            &SettingsOverrides::new().keep_format(true),
        )
        .unwrap_err();
        assert!(matches!(err, CompressError::ConfigError { .. }));
    }

    #[test]
    fn test_missing_output_format_is_config_error() {
        let err = resolve(
            Path::new("a.jpg"),
            &SettingsOverrides::new(),
            &SettingsOverrides::new().keep_format(false),
        )
        .unwrap_err();
        assert!(matches!(err, CompressError::ConfigError { .. }));
    }

    #[test]
    fn test_quality_out_of_range_is_config_error() {
        for quality in [0, 101, 255] {
            let result = resolve(
                Path::new("a.jpg"),
                &SettingsOverrides::new(),
                &SettingsOverrides::new().quality(quality),
            );
            assert!(result.is_err(), "quality {} should be rejected", quality);
        }
    }

    #[test]
    fn test_naming_template_cannot_leave_output_dir() {
        for user in [
            SettingsOverrides::new().file_naming("../../escaped_{filename}"),
            SettingsOverrides::new().file_naming("sub\\{filename}"),
            SettingsOverrides {
                file_extension: Some("/../.{ext}".to_string()),
                ..SettingsOverrides::new()
            },
        ] {
            let err = resolve(Path::new("a.png"), &SettingsOverrides::new(), &user).unwrap_err();
            assert!(matches!(err, CompressError::ConfigError { .. }), "{:?}", user);
            assert!(user.validate().is_err());
        }

        // A preset carrying a bad template is rejected too
        let base = SettingsOverrides::new().file_naming("out/{filename}");
        assert!(resolve(Path::new("a.png"), &base, &SettingsOverrides::new()).is_err());
    }

    #[test]
    fn test_codec_defaults_fill_gaps() {
        // No quality anywhere: JPEG codec default (75) beats the global 70
        let resolved = resolve(
            Path::new("a.jpeg"),
            &SettingsOverrides::new(),
            &SettingsOverrides::new(),
        )
        .unwrap();
        assert_eq!(resolved.common.quality, 75);
        match resolved.codec {
            CodecOptions::Jpeg(jpeg) => {
                assert!(jpeg.progressive);
                assert!(jpeg.trellis_quantisation);
            }
            other => panic!("expected JPEG options, got {:?}", other),
        }
    }

    #[test]
    fn test_webp_lossless_inferred_from_quality() {
        let user = SettingsOverrides::new().output_format("WebP");

        let high = resolve(Path::new("a.png"), &SettingsOverrides::new(), &user.clone().quality(95)).unwrap();
        let low = resolve(Path::new("a.png"), &SettingsOverrides::new(), &user.clone().quality(90)).unwrap();

        assert_eq!(high.output_format, "webp");
        assert!(matches!(high.codec, CodecOptions::WebP(WebpOptions { lossless: true, .. })));
        assert!(matches!(low.codec, CodecOptions::WebP(WebpOptions { lossless: false, .. })));
    }

    #[test]
    fn test_explicit_lossless_beats_inference() {
        let user = SettingsOverrides::new().output_format("webp").quality(99).lossless(false);
        let resolved = resolve(Path::new("a.png"), &SettingsOverrides::new(), &user).unwrap();
        assert!(matches!(resolved.codec, CodecOptions::WebP(WebpOptions { lossless: false, .. })));
    }

    #[test]
    fn test_png_tunables_are_clamped() {
        let user = SettingsOverrides {
            compression_level: Some(12),
            colors: Some(1),
            dither: Some(3.5),
            ..SettingsOverrides::new().output_format("png")
        };
        let resolved = resolve(Path::new("a.jpg"), &SettingsOverrides::new(), &user).unwrap();

        match resolved.codec {
            CodecOptions::Png(png) => {
                assert_eq!(png.compression_level, 9);
                assert_eq!(png.colors, 2);
                assert_eq!(png.dither, 1.0);
            }
            other => panic!("expected PNG options, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_format_is_generic() {
        let resolved = resolve(
            Path::new("scan.tif"),
            &SettingsOverrides::new(),
            &SettingsOverrides::new(),
        )
        .unwrap();
        assert_eq!(resolved.output_format, "tif");
        assert_eq!(resolved.codec, CodecOptions::Generic);
        assert_eq!(resolved.common.quality, 70);
    }

    #[test]
    fn test_target_dimensions() {
        let resolved = resolve(
            Path::new("a.jpg"),
            &SettingsOverrides::new(),
            &SettingsOverrides::new().resize(Some(800), None),
        )
        .unwrap();
        assert_eq!(resolved.target_dimensions(), Some((Some(800), None)));

        let kept = resolve(Path::new("a.jpg"), &SettingsOverrides::new(), &SettingsOverrides::new()).unwrap();
        assert_eq!(kept.target_dimensions(), None);
    }

    #[test]
    fn test_resolved_settings_serialize_with_codec_tag() {
        let resolved = resolve(
            Path::new("a.png"),
            &SettingsOverrides::new(),
            &SettingsOverrides::new().output_format("webp"),
        )
        .unwrap();
        let json = serde_json::to_value(&resolved).unwrap();
        assert_eq!(json["codec"]["codec"], "webp");
        assert_eq!(json["outputFormat"], "webp");

        let back: ResolvedSettings = serde_json::from_value(json).unwrap();
        assert_eq!(back, resolved);
    }
}
