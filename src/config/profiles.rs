//! Built-in presets and per-codec tuned defaults

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use crate::config::settings::SettingsOverrides;
use crate::config::ImageFormat;

/// Tuning profile for a single codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CodecProfile {
    /// Balanced size and quality
    Default,
    /// Larger files, fewer artifacts
    HighQuality,
    /// Smallest files
    HighCompression,
}

impl CodecProfile {
    pub const ALL: [CodecProfile; 3] = [
        CodecProfile::Default,
        CodecProfile::HighQuality,
        CodecProfile::HighCompression,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::HighQuality => "high-quality",
            Self::HighCompression => "high-compression",
        }
    }
}

fn common(quality: u8, optimize_colors: bool, progressive: bool) -> SettingsOverrides {
    SettingsOverrides {
        quality: Some(quality),
        keep_dimensions: Some(true),
        remove_metadata: Some(true),
        optimize_colors: Some(optimize_colors),
        progressive: Some(progressive),
        ..Default::default()
    }
}

fn jpeg_profile(profile: CodecProfile) -> SettingsOverrides {
    let (quality, optimize_scans) = match profile {
        CodecProfile::Default => (75, true),
        CodecProfile::HighQuality => (85, false),
        CodecProfile::HighCompression => (60, true),
    };
    SettingsOverrides {
        trellis_quantisation: Some(true),
        overshoot_deringing: Some(true),
        optimize_scans: Some(optimize_scans),
        ..common(quality, false, true)
    }
}

fn png_profile(profile: CodecProfile) -> SettingsOverrides {
    let (quality, level, palette, dither, colors) = match profile {
        CodecProfile::Default => (80, 9, true, 1.0, 256),
        CodecProfile::HighQuality => (90, 7, false, 0.0, 256),
        CodecProfile::HighCompression => (60, 9, true, 1.0, 128),
    };
    SettingsOverrides {
        compression_level: Some(level),
        adaptive_filtering: Some(true),
        palette: Some(palette),
        dither: Some(dither),
        colors: Some(colors),
        ..common(quality, true, false)
    }
}

fn webp_profile(profile: CodecProfile) -> SettingsOverrides {
    let base = SettingsOverrides {
        smart_subsample: Some(true),
        ..common(75, true, false)
    };
    match profile {
        // lossless stays unset so it is inferred from quality
        CodecProfile::Default => SettingsOverrides {
            near_lossless: Some(false),
            effort: Some(4),
            ..base
        },
        CodecProfile::HighQuality => SettingsOverrides {
            quality: Some(90),
            lossless: Some(true),
            near_lossless: Some(true),
            effort: Some(6),
            ..base
        },
        CodecProfile::HighCompression => SettingsOverrides {
            quality: Some(60),
            lossless: Some(false),
            near_lossless: Some(false),
            effort: Some(2),
            ..base
        },
    }
}

/// Tuned settings for `format` under `profile`; empty for formats without tunables
pub fn codec_profile(format: Option<ImageFormat>, profile: CodecProfile) -> SettingsOverrides {
    match format {
        Some(ImageFormat::Jpeg) => jpeg_profile(profile),
        Some(ImageFormat::Png) => png_profile(profile),
        Some(ImageFormat::WebP) => webp_profile(profile),
        _ => SettingsOverrides::default(),
    }
}

/// Defaults the resolver falls back to for a given output codec
pub fn codec_defaults(format: Option<ImageFormat>) -> SettingsOverrides {
    codec_profile(format, CodecProfile::Default)
}

/// Predefined presets for common use cases
pub struct Presets;

impl Presets {
    /// Light compression, visually lossless for most photos
    pub fn low() -> SettingsOverrides {
        SettingsOverrides::new().quality(80)
    }

    /// Balanced compression
    pub fn medium() -> SettingsOverrides {
        SettingsOverrides::new().quality(60)
    }

    /// Aggressive compression
    pub fn high() -> SettingsOverrides {
        SettingsOverrides::new().quality(40)
    }

    /// WebP, bounded to 1920px wide, metadata stripped
    pub fn web() -> SettingsOverrides {
        SettingsOverrides {
            remove_metadata: Some(true),
            file_naming: Some("{filename}_web".to_string()),
            ..SettingsOverrides::new()
                .quality(80)
                .output_format("webp")
                .resize(Some(1920), None)
        }
    }

    /// Look up a built-in preset by name
    pub fn get(name: &str) -> Option<SettingsOverrides> {
        Self::all().remove(name)
    }

    /// Names of every built-in preset
    pub fn names() -> impl Iterator<Item = &'static str> {
        ["low", "medium", "high", "web"]
            .into_iter()
            .chain(CODEC_PRESET_NAMES.iter().copied())
    }

    /// Get all predefined presets
    pub fn all() -> BTreeMap<String, SettingsOverrides> {
        let mut presets = BTreeMap::new();
        presets.insert("low".to_string(), Self::low());
        presets.insert("medium".to_string(), Self::medium());
        presets.insert("high".to_string(), Self::high());
        presets.insert("web".to_string(), Self::web());

        for format in [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::WebP] {
            for profile in CodecProfile::ALL {
                // Codec presets also pin the output format
                let preset = codec_profile(Some(format), profile)
                    .overlay(&SettingsOverrides::new().output_format(format.extension()));
                presets.insert(codec_preset_name(format, profile), preset);
            }
        }
        presets
    }
}

const CODEC_PRESET_NAMES: [&str; 9] = [
    "jpeg-default",
    "jpeg-high-quality",
    "jpeg-high-compression",
    "png-default",
    "png-high-quality",
    "png-high-compression",
    "webp-default",
    "webp-high-quality",
    "webp-high-compression",
];

fn codec_preset_name(format: ImageFormat, profile: CodecProfile) -> String {
    let codec = match format {
        ImageFormat::Jpeg => "jpeg",
        other => other.extension(),
    };
    format!("{}-{}", codec, profile.name())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predefined_presets_validate() {
        let all = Presets::all();
        assert_eq!(all.len(), 13);
        for (name, preset) in &all {
            assert!(preset.validate().is_ok(), "preset {} invalid", name);
        }
    }

    #[test]
    fn test_names_match_all() {
        let mut names: Vec<&str> = Presets::names().collect();
        names.sort_unstable();
        let keys: Vec<String> = Presets::all().into_keys().collect();
        assert_eq!(names, keys);
    }

    #[test]
    fn test_quality_ladder() {
        assert_eq!(Presets::low().quality, Some(80));
        assert_eq!(Presets::medium().quality, Some(60));
        assert_eq!(Presets::high().quality, Some(40));
    }

    #[test]
    fn test_codec_presets_pin_format() {
        let preset = Presets::get("png-high-compression").unwrap();
        assert_eq!(preset.output_format.as_deref(), Some("png"));
        assert_eq!(preset.keep_format, Some(false));
        assert_eq!(preset.colors, Some(128));
    }

    #[test]
    fn test_webp_default_leaves_lossless_unset() {
        assert_eq!(codec_defaults(Some(ImageFormat::WebP)).lossless, None);
        assert_eq!(
            codec_profile(Some(ImageFormat::WebP), CodecProfile::HighQuality).lossless,
            Some(true)
        );
    }

    #[test]
    fn test_formats_without_tunables_have_no_defaults() {
        assert_eq!(codec_defaults(Some(ImageFormat::Gif)), SettingsOverrides::default());
        assert_eq!(codec_defaults(None), SettingsOverrides::default());
    }
}
