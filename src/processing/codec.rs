//! Built-in codec on top of the `image`, `mozjpeg`, `imagequant`, `oxipng`
//! and `webp` crates

use std::io::Cursor;
use std::path::Path;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::imageops;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader, RgbaImage};
use mozjpeg::{ColorSpace, Compress, ScanMode};
use tracing::{debug, trace};

use crate::config::{CodecOptions, ImageFormat, JpegOptions, PngOptions, ResolvedSettings, WebpOptions};
use crate::error::{Result, CompressError};
use crate::processing::formats::detect_format_from_header;
use crate::processing::{Codec, EncodedImage};

/// libwebp near-lossless preprocessing level used when `near_lossless` is set
pub const NEAR_LOSSLESS_LEVEL: i32 = 60;

/// Decodes any supported input and re-encodes it with the resolved settings
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCodec;

impl ImageCodec {
    pub fn new() -> Self {
        Self
    }

    /// Decode `input` upright: the EXIF orientation is applied to the pixels,
    /// since re-encoding never carries the tag over.
    fn decode(&self, input: &Path) -> Result<DynamicImage> {
        let data = std::fs::read(input)?;
        let reader = match detect_format_from_header(&data) {
            Some(format) => ImageReader::with_format(Cursor::new(data.as_slice()), format.into()),
            None => ImageReader::new(Cursor::new(data.as_slice())).with_guessed_format()?,
        };

        let mut decoder = reader.into_decoder()?;
        let orientation = decoder.orientation()?;
        let mut image = DynamicImage::from_decoder(decoder)?;
        if orientation != Orientation::NoTransforms {
            debug!("Applying EXIF orientation {:?} to {:?}", orientation, input);
            image.apply_orientation(orientation);
        }

        trace!("Decoded {:?}: {}x{}", input, image.width(), image.height());
        Ok(image)
    }
}

impl Codec for ImageCodec {
    fn encode(&self, input: &Path, settings: &ResolvedSettings) -> Result<EncodedImage> {
        let image = self.decode(input)?;
        let image = match settings.target_dimensions() {
            Some(bounds) => fit_within(image, bounds),
            None => image,
        };

        let quality = settings.common.quality;
        let bytes = match (settings.image_format(), settings.codec) {
            (Some(ImageFormat::Jpeg), CodecOptions::Jpeg(opts)) => encode_jpeg(&image, quality, &opts)?,
            (Some(ImageFormat::Png), CodecOptions::Png(opts)) => encode_png(&image, quality, &opts)?,
            (Some(ImageFormat::WebP), CodecOptions::WebP(opts)) => encode_webp(&image, quality, &opts)?,
            (Some(format), _) => encode_generic(&image, format)?,
            (None, _) => {
                return Err(CompressError::unsupported_format(
                    settings.output_format.clone(),
                    Some(input.to_path_buf()),
                ))
            }
        };

        Ok(EncodedImage {
            bytes,
            width: image.width(),
            height: image.height(),
            format: settings.output_format.clone(),
        })
    }

    fn name(&self) -> &'static str {
        "image"
    }
}

/// Shrink `image` to fit inside the bounds, keeping aspect ratio. Never enlarges.
fn fit_within(image: DynamicImage, (width, height): (Option<u32>, Option<u32>)) -> DynamicImage {
    let max_width = width.unwrap_or(u32::MAX).max(1);
    let max_height = height.unwrap_or(u32::MAX).max(1);

    if image.width() <= max_width && image.height() <= max_height {
        return image;
    }

    let resized = image.resize(max_width, max_height, imageops::FilterType::Lanczos3);
    debug!(
        "Resized {}x{} -> {}x{}",
        image.width(), image.height(),
        resized.width(), resized.height()
    );
    resized
}

/// Encode through mozjpeg.
///
/// Trellis quantisation and overshoot deringing belong to mozjpeg's
/// max-compression profile and cannot be toggled one at a time: the fastest
/// profile is used only when both are off.
fn encode_jpeg(image: &DynamicImage, quality: u8, opts: &JpegOptions) -> Result<Vec<u8>> {
    // JPEG has no alpha channel
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    if width == 0 || height == 0 {
        return Err(CompressError::codec("cannot encode an empty image as JPEG", None));
    }

    let mut comp = Compress::new(ColorSpace::JCS_RGB);
    if !opts.trellis_quantisation && !opts.overshoot_deringing {
        comp.set_fastest_defaults();
    }
    comp.set_size(width as usize, height as usize);
    comp.set_color_space(ColorSpace::JCS_YCbCr);
    comp.set_quality(f32::from(quality));
    comp.set_optimize_coding(true);

    if opts.progressive {
        comp.set_progressive_mode();
        comp.set_optimize_scans(opts.optimize_scans);
        if opts.optimize_scans {
            comp.set_scan_optimization_mode(ScanMode::AllComponentsTogether);
        }
    } else {
        // Scan optimisation only applies to progressive output
        comp.set_optimize_scans(false);
    }

    let jpeg_error = |e: std::io::Error| CompressError::codec(format!("mozjpeg: {e:?}"), None);
    let mut writer = comp
        .start_compress(Vec::with_capacity(rgb.as_raw().len() / 8))
        .map_err(jpeg_error)?;
    for row in rgb.as_raw().chunks(width as usize * 3) {
        writer.write_scanlines(row).map_err(jpeg_error)?;
    }
    writer.finish().map_err(jpeg_error)
}

fn encode_png(image: &DynamicImage, quality: u8, opts: &PngOptions) -> Result<Vec<u8>> {
    if opts.palette {
        return encode_png_palette(image, quality, opts);
    }

    let compression = match opts.compression_level {
        0..=3 => CompressionType::Fast,
        4..=6 => CompressionType::Default,
        _ => CompressionType::Best,
    };
    let filter = if opts.adaptive_filtering {
        FilterType::Adaptive
    } else {
        FilterType::NoFilter
    };

    let mut buffer = Vec::new();
    let encoder = PngEncoder::new_with_quality(Cursor::new(&mut buffer), compression, filter);
    image.write_with_encoder(encoder)?;
    Ok(buffer)
}

/// Quantize to at most `opts.colors` colours with libimagequant, then let
/// oxipng store the result as an indexed PNG.
fn encode_png_palette(image: &DynamicImage, quality: u8, opts: &PngOptions) -> Result<Vec<u8>> {
    let quant_error = |e: imagequant::Error| {
        CompressError::codec(format!("palette quantisation failed: {}", e), None)
    };

    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let pixels: Vec<imagequant::RGBA> = rgba
        .pixels()
        .map(|p| imagequant::RGBA::new(p[0], p[1], p[2], p[3]))
        .collect();

    let mut attr = imagequant::Attributes::new();
    attr.set_max_colors(u32::from(opts.colors)).map_err(quant_error)?;
    attr.set_quality(0, quality).map_err(quant_error)?;

    let mut liq_image = attr
        .new_image(pixels, width as usize, height as usize, 0.0)
        .map_err(quant_error)?;
    let mut quantized = attr.quantize(&mut liq_image).map_err(quant_error)?;
    quantized.set_dithering_level(opts.dither).map_err(quant_error)?;
    let (palette, indices) = quantized.remapped(&mut liq_image).map_err(quant_error)?;
    debug!("Quantized {}x{} to {} colours", width, height, palette.len());

    let mut expanded = Vec::with_capacity(indices.len() * 4);
    for index in indices {
        let color = palette[usize::from(index)];
        expanded.extend_from_slice(&[color.r, color.g, color.b, color.a]);
    }
    let remapped = RgbaImage::from_raw(width, height, expanded)
        .ok_or_else(|| CompressError::codec("remapped pixel buffer has the wrong length", None))?;

    let mut buffer = Vec::new();
    let encoder = PngEncoder::new_with_quality(
        Cursor::new(&mut buffer),
        CompressionType::Fast,
        FilterType::NoFilter,
    );
    DynamicImage::ImageRgba8(remapped).write_with_encoder(encoder)?;

    let mut options = oxipng::Options::from_preset(oxipng_preset(opts.compression_level));
    options.strip = oxipng::StripChunks::Safe;
    oxipng::optimize_from_memory(&buffer, &options)
        .map_err(|e| CompressError::codec(format!("PNG optimisation failed: {}", e), None))
}

/// zlib-style level 0-9 onto oxipng's presets 0-6
fn oxipng_preset(compression_level: u8) -> u8 {
    match compression_level {
        0..=1 => 0,
        2..=3 => 1,
        4..=5 => 2,
        6 => 3,
        7 => 4,
        8 => 5,
        _ => 6,
    }
}

/// `near_lossless` selects libwebp's lossless encoder with near-lossless
/// preprocessing, whatever `lossless` says.
fn encode_webp(image: &DynamicImage, quality: u8, opts: &WebpOptions) -> Result<Vec<u8>> {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let encoder = webp::Encoder::from_rgba(rgba.as_raw(), width, height);

    let mut config = webp::WebPConfig::new()
        .map_err(|_| CompressError::codec("failed to create WebP encoder config", None))?;
    config.quality = f32::from(quality);
    config.method = i32::from(opts.effort);
    config.lossless = i32::from(opts.lossless);
    config.use_sharp_yuv = i32::from(opts.smart_subsample);
    if opts.near_lossless {
        config.lossless = 1;
        config.near_lossless = NEAR_LOSSLESS_LEVEL;
    }

    let encoded = encoder.encode_advanced(&config).map_err(|e| {
        CompressError::codec(format!("WebP encode failed: {:?}", e), None)
    })?;
    Ok(encoded.to_vec())
}

fn encode_generic(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image.to_rgba8()).write_to(&mut cursor, format.into())?;
    Ok(cursor.into_inner())
}
