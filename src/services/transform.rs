use std::io::Cursor;
use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

use crate::models::command::{Command, CropRegion, Flip, Transform};

/// Decoded source image shared read-only by every command of a job.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub image: DynamicImage,
    pub format: ImageFormat,
}

impl SourceImage {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }
}

/// Parameters of one `apply` call.
#[derive(Debug, Clone)]
pub struct TransformParams {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub crop: Option<CropRegion>,
    pub transform: Option<Transform>,
    pub format: ImageFormat,
}

impl TransformParams {
    /// Parameters for `command`, encoding in the format implied by its target
    /// file name or, failing that, the source format.
    pub fn for_command(command: &Command, source_format: ImageFormat) -> Self {
        Self {
            width: command.width,
            height: command.height,
            crop: command.crop,
            transform: command.transform.clone(),
            format: output_format(&command.target_filename, source_format),
        }
    }
}

/// Pixel-level image operations consumed by command tasks.
///
/// Implementations must treat the source as immutable input and return a new
/// encoded buffer.
pub trait TransformAdapter: Send + Sync + 'static {
    /// Decode source bytes, applying an optional job-wide transform.
    fn decode(&self, bytes: &[u8], transform: Option<&Transform>) -> Result<SourceImage, TransformError>;

    /// Produce the encoded output for one command.
    fn apply(&self, source: &SourceImage, params: &TransformParams) -> Result<Vec<u8>, TransformError>;
}

/// `TransformAdapter` backed by the `image` crate.
///
/// Order of operations: flip, rotate, crop, resize.
#[derive(Debug, Clone)]
pub struct ImageTransformer {
    filter: FilterType,
}

impl Default for ImageTransformer {
    fn default() -> Self {
        Self {
            filter: FilterType::Lanczos3,
        }
    }
}

/// Largest pixel count any resize may allocate, including the intermediate
/// cover image of a fill.
pub const MAX_OUTPUT_PIXELS: u64 = 64 * 1024 * 1024;

impl ImageTransformer {
    fn resize(
        &self,
        image: DynamicImage,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<DynamicImage, TransformError> {
        let (src_w, src_h) = (image.width(), image.height());
        let (target, working) = match (width, height) {
            (Some(w), Some(h)) => ((w, h), cover_dimensions(src_w, src_h, w, h)),
            (Some(w), None) => {
                let target = (w, scale_dimension(src_h, w, src_w));
                (target, target)
            }
            (None, Some(h)) => {
                let target = (scale_dimension(src_w, h, src_h), h);
                (target, target)
            }
            (None, None) => return Ok(image),
        };
        if pixel_count(target) > MAX_OUTPUT_PIXELS || pixel_count(working) > MAX_OUTPUT_PIXELS {
            return Err(TransformError::InvalidSize { width, height });
        }

        let (w, h) = target;
        Ok(match (width, height) {
            // Cover the box, then crop the overflow around the centre.
            (Some(_), Some(_)) => image.resize_to_fill(w, h, self.filter),
            _ => image.resize_exact(w, h, self.filter),
        })
    }
}

impl TransformAdapter for ImageTransformer {
    fn decode(&self, bytes: &[u8], transform: Option<&Transform>) -> Result<SourceImage, TransformError> {
        let format = image::guess_format(bytes).map_err(TransformError::Decode)?;
        let decoded = image::load_from_memory_with_format(bytes, format).map_err(TransformError::Decode)?;
        let image = match transform {
            Some(t) => apply_orientation(decoded, t)?,
            None => decoded,
        };
        Ok(SourceImage { image, format })
    }

    fn apply(&self, source: &SourceImage, params: &TransformParams) -> Result<Vec<u8>, TransformError> {
        if params.width == Some(0) || params.height == Some(0) {
            return Err(TransformError::InvalidSize {
                width: params.width,
                height: params.height,
            });
        }

        let mut image = match &params.transform {
            Some(t) => apply_orientation(source.image.clone(), t)?,
            None => source.image.clone(),
        };

        if let Some(region) = params.crop {
            image = crop(&image, region)?;
        }

        let image = self.resize(image, params.width, params.height)?;
        encode(image, params.format)
    }
}

fn apply_orientation(image: DynamicImage, transform: &Transform) -> Result<DynamicImage, TransformError> {
    if transform.is_identity() {
        return Ok(image);
    }
    let image = match transform.flip {
        Some(Flip::X) => image.fliph(),
        Some(Flip::Y) => image.flipv(),
        None => image,
    };

    let Some(degrees) = transform.rotate else {
        return Ok(image);
    };
    if !degrees.is_finite() {
        return Err(TransformError::UnsupportedRotation(degrees));
    }

    // Positive angles turn clockwise.
    let degrees = degrees.rem_euclid(360.0);
    Ok(match degrees {
        d if d == 0.0 => image,
        d if d == 90.0 => image.rotate90(),
        d if d == 180.0 => image.rotate180(),
        d if d == 270.0 => image.rotate270(),
        d => rotate_expanded(&image, d),
    })
}

/// Rotate by any angle onto a canvas large enough to hold every source pixel.
/// Uncovered corners are transparent.
fn rotate_expanded(image: &DynamicImage, degrees: f64) -> DynamicImage {
    let source = image.to_rgba8();
    if source.width() == 0 || source.height() == 0 {
        return image.clone();
    }
    let (w, h) = (f64::from(source.width()), f64::from(source.height()));
    let (sin, cos) = degrees.to_radians().sin_cos();
    let out_w = (w * cos.abs() + h * sin.abs()).round().max(1.0) as u32;
    let out_h = (w * sin.abs() + h * cos.abs()).round().max(1.0) as u32;
    let (out_cx, out_cy) = (f64::from(out_w) / 2.0, f64::from(out_h) / 2.0);

    let rotated = RgbaImage::from_fn(out_w, out_h, |x, y| {
        let dx = f64::from(x) + 0.5 - out_cx;
        let dy = f64::from(y) + 0.5 - out_cy;
        let sx = cos * dx + sin * dy + w / 2.0 - 0.5;
        let sy = cos * dy - sin * dx + h / 2.0 - 0.5;
        sample_bilinear(&source, sx, sy)
    });
    DynamicImage::ImageRgba8(rotated)
}

fn sample_bilinear(image: &RgbaImage, x: f64, y: f64) -> Rgba<u8> {
    let (max_x, max_y) = (f64::from(image.width() - 1), f64::from(image.height() - 1));
    if x < -0.5 || y < -0.5 || x > max_x + 0.5 || y > max_y + 0.5 {
        return Rgba([0, 0, 0, 0]);
    }
    let (x, y) = (x.clamp(0.0, max_x), y.clamp(0.0, max_y));
    let (x0, y0) = (x.floor(), y.floor());
    let (x1, y1) = ((x0 + 1.0).min(max_x), (y0 + 1.0).min(max_y));
    let (fx, fy) = (x - x0, y - y0);

    let px = |px: f64, py: f64| image.get_pixel(px as u32, py as u32).0;
    let (tl, tr, bl, br) = (px(x0, y0), px(x1, y0), px(x0, y1), px(x1, y1));
    let mut out = [0u8; 4];
    for (c, value) in out.iter_mut().enumerate() {
        let top = f64::from(tl[c]) * (1.0 - fx) + f64::from(tr[c]) * fx;
        let bottom = f64::from(bl[c]) * (1.0 - fx) + f64::from(br[c]) * fx;
        *value = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgba(out)
}

fn crop(image: &DynamicImage, region: CropRegion) -> Result<DynamicImage, TransformError> {
    let fits = |offset: u32, extent: u32, limit: u32| {
        extent > 0 && offset.checked_add(extent).is_some_and(|end| end <= limit)
    };
    if !fits(region.left, region.width, image.width()) || !fits(region.top, region.height, image.height()) {
        return Err(TransformError::CropOutOfBounds {
            region,
            width: image.width(),
            height: image.height(),
        });
    }
    Ok(image.crop_imm(region.left, region.top, region.width, region.height))
}

fn encode(image: DynamicImage, format: ImageFormat) -> Result<Vec<u8>, TransformError> {
    // JPEG has no alpha channel.
    let image = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()),
        _ => image,
    };
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, format).map_err(TransformError::Encode)?;
    Ok(buffer.into_inner())
}

/// `other * target / reference`, rounded, never below one pixel.
fn scale_dimension(other: u32, target: u32, reference: u32) -> u32 {
    let scaled = (u64::from(other) * u64::from(target) + u64::from(reference) / 2) / u64::from(reference.max(1));
    u32::try_from(scaled).unwrap_or(u32::MAX).max(1)
}

/// Size of the image `resize_to_fill` scales to before cropping down to
/// `width` x `height`.
fn cover_dimensions(src_w: u32, src_h: u32, width: u32, height: u32) -> (u32, u32) {
    if u64::from(width) * u64::from(src_h) >= u64::from(height) * u64::from(src_w) {
        (width, scale_dimension(src_h, width, src_w))
    } else {
        (scale_dimension(src_w, height, src_h), height)
    }
}

fn pixel_count((width, height): (u32, u32)) -> u64 {
    u64::from(width) * u64::from(height)
}

/// Output format for `file_name`: its extension when it names a format we can
/// encode, otherwise `fallback`.
pub fn output_format(file_name: &str, fallback: ImageFormat) -> ImageFormat {
    match ImageFormat::from_path(Path::new(file_name)) {
        Ok(format @ (ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP)) => format,
        _ => fallback,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Failed to decode image: {0}")]
    Decode(image::ImageError),

    #[error("Failed to encode image: {0}")]
    Encode(image::ImageError),

    #[error("Unsupported rotation of {0} degrees")]
    UnsupportedRotation(f64),

    #[error("Crop region {region:?} exceeds image bounds {width}x{height}")]
    CropOutOfBounds {
        region: CropRegion,
        width: u32,
        height: u32,
    },

    #[error("Invalid output size {width:?}x{height:?}")]
    InvalidSize {
        width: Option<u32>,
        height: Option<u32>,
    },
}
