//! Image Ops Backend - Registered Transforms over `image::imageops`
//!
//! Each registry entry maps a transform name to its accepted parameters and
//! a constructor producing an `OpKind`. Pixel work is delegated to the
//! `image` crate wherever it has a primitive.

use image::imageops::FilterType;
use image::{ColorType, DynamicImage, Rgba, RgbaImage};
use rand::rngs::StdRng;
use rand::Rng;

use crate::backend::{BackendError, ParamReader, Pipeline, Transform, TransformBackend, TransformInfo};
use crate::config::ProcessingLimits;
use crate::seed::Seed;
use crate::transform::Parameters;

/// The concrete operation a registered transform performs.
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    Blur { kernel: (u32, u32) },
    GaussianBlur { kernel: (u32, u32) },
    MotionBlur { kernel: (u32, u32) },
    Rotate { degrees: (f64, f64) },
    BrightnessContrast { brightness: (f64, f64), contrast: (f64, f64) },
    GaussNoise { variance: (f64, f64), mean: f64 },
    RandomCrop { height: u32, width: u32 },
    RandomResizedCrop { height: u32, width: u32, scale: (f64, f64), ratio: (f64, f64) },
    HorizontalFlip,
    VerticalFlip,
    ToGray,
    Invert,
}

type Constructor = fn(&ParamReader<'_>) -> Result<OpKind, BackendError>;

struct RegistryEntry {
    info: TransformInfo,
    build: Constructor,
}

static REGISTRY: &[RegistryEntry] = &[
    RegistryEntry {
        info: TransformInfo {
            name: "Blur",
            description: "Box blur with a random odd kernel size",
            parameters: &["blur_limit", "p"],
            default_probability: 0.5,
        },
        build: |r| Ok(OpKind::Blur { kernel: kernel_range(r, (3, 7))? }),
    },
    RegistryEntry {
        info: TransformInfo {
            name: "GaussianBlur",
            description: "Gaussian blur with a random odd kernel size",
            parameters: &["blur_limit", "p"],
            default_probability: 0.5,
        },
        build: |r| Ok(OpKind::GaussianBlur { kernel: kernel_range(r, (3, 7))? }),
    },
    RegistryEntry {
        info: TransformInfo {
            name: "MotionBlur",
            description: "Linear motion blur along a random axis",
            parameters: &["blur_limit", "p"],
            default_probability: 0.5,
        },
        build: |r| Ok(OpKind::MotionBlur { kernel: kernel_range(r, (3, 7))? }),
    },
    RegistryEntry {
        info: TransformInfo {
            name: "Rotate",
            description: "Rotate by a random angle within the limit",
            parameters: &["limit", "p"],
            default_probability: 0.5,
        },
        build: |r| {
            Ok(OpKind::Rotate {
                degrees: r.range("limit", (-90.0, 90.0), true, 0.0)?,
            })
        },
    },
    RegistryEntry {
        info: TransformInfo {
            name: "RandomBrightnessContrast",
            description: "Randomly shift brightness and contrast",
            parameters: &["brightness_limit", "contrast_limit", "p"],
            default_probability: 0.5,
        },
        build: |r| {
            Ok(OpKind::BrightnessContrast {
                brightness: r.range("brightness_limit", (-0.2, 0.2), true, 0.0)?,
                contrast: r.range("contrast_limit", (-0.2, 0.2), true, 0.0)?,
            })
        },
    },
    RegistryEntry {
        info: TransformInfo {
            name: "GaussNoise",
            description: "Add gaussian noise with a random variance",
            parameters: &["var_limit", "mean", "p"],
            default_probability: 0.5,
        },
        build: |r| {
            let variance = r.range("var_limit", (10.0, 50.0), false, 0.0)?;
            if variance.0 < 0.0 {
                return Err(r.invalid("var_limit", "variance must be non-negative"));
            }
            Ok(OpKind::GaussNoise {
                variance,
                mean: r.number("mean")?.unwrap_or(0.0),
            })
        },
    },
    RegistryEntry {
        info: TransformInfo {
            name: "RandomCrop",
            description: "Crop a random region of fixed size",
            parameters: &["height", "width", "p"],
            default_probability: 1.0,
        },
        build: |r| {
            Ok(OpKind::RandomCrop {
                height: r.dimension("height")?,
                width: r.dimension("width")?,
            })
        },
    },
    RegistryEntry {
        info: TransformInfo {
            name: "RandomResizedCrop",
            description: "Crop a random area and aspect ratio, then resize",
            parameters: &["height", "width", "scale", "ratio", "p"],
            default_probability: 1.0,
        },
        build: |r| {
            let scale = r.range("scale", (0.08, 1.0), false, 0.0)?;
            let ratio = r.range("ratio", (0.75, 4.0 / 3.0), false, 0.0)?;
            if scale.0 <= 0.0 || ratio.0 <= 0.0 {
                return Err(r.invalid("scale", "scale and ratio must be positive"));
            }
            Ok(OpKind::RandomResizedCrop {
                height: r.dimension("height")?,
                width: r.dimension("width")?,
                scale,
                ratio,
            })
        },
    },
    RegistryEntry {
        info: TransformInfo {
            name: "HorizontalFlip",
            description: "Mirror left to right",
            parameters: &["p"],
            default_probability: 0.5,
        },
        build: |_| Ok(OpKind::HorizontalFlip),
    },
    RegistryEntry {
        info: TransformInfo {
            name: "VerticalFlip",
            description: "Mirror top to bottom",
            parameters: &["p"],
            default_probability: 0.5,
        },
        build: |_| Ok(OpKind::VerticalFlip),
    },
    RegistryEntry {
        info: TransformInfo {
            name: "ToGray",
            description: "Convert to grayscale, keeping the channel layout",
            parameters: &["p"],
            default_probability: 0.5,
        },
        build: |_| Ok(OpKind::ToGray),
    },
    RegistryEntry {
        info: TransformInfo {
            name: "InvertImg",
            description: "Invert every color channel",
            parameters: &["p"],
            default_probability: 0.5,
        },
        build: |_| Ok(OpKind::Invert),
    },
];

fn kernel_range(r: &ParamReader<'_>, default: (u32, u32)) -> Result<(u32, u32), BackendError> {
    let (low, high) = r.range(
        "blur_limit",
        (f64::from(default.0), f64::from(default.1)),
        false,
        3.0,
    )?;
    for k in [low, high] {
        if k < 3.0 || k.fract() != 0.0 || (k as u32) % 2 == 0 {
            return Err(r.invalid("blur_limit", format!("kernel size {k} must be an odd integer >= 3")));
        }
    }
    Ok((low as u32, high as u32))
}

/// A registered transform bound to its parameters.
#[derive(Debug)]
pub struct ImageOp {
    name: &'static str,
    probability: f64,
    parameters: Parameters,
    kind: OpKind,
}

impl ImageOp {
    pub fn kind(&self) -> &OpKind {
        &self.kind
    }
}

impl Transform for ImageOp {
    fn name(&self) -> &str {
        self.name
    }

    fn probability(&self) -> f64 {
        self.probability
    }

    fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    fn apply(&self, image: DynamicImage, rng: &mut StdRng) -> Result<DynamicImage, BackendError> {
        let color = image.color();
        let out = match &self.kind {
            OpKind::Blur { kernel } => {
                let k = sample_kernel(*kernel, rng);
                // Standard deviation of a box of width k.
                image.blur(k as f32 / 12f32.sqrt())
            }
            OpKind::GaussianBlur { kernel } => {
                let k = sample_kernel(*kernel, rng) as f32;
                image.blur(0.3 * ((k - 1.0) * 0.5 - 1.0) + 0.8)
            }
            OpKind::MotionBlur { kernel } => {
                let k = sample_kernel(*kernel, rng);
                let horizontal = rng.gen_bool(0.5);
                with_color(color, DynamicImage::ImageRgba8(motion_blur(&image.to_rgba8(), k, horizontal)))
            }
            OpKind::Rotate { degrees } => {
                let angle = rng.gen_range(degrees.0..=degrees.1);
                with_color(color, DynamicImage::ImageRgba8(rotate(&image.to_rgba8(), angle)))
            }
            OpKind::BrightnessContrast { brightness, contrast } => {
                let beta = rng.gen_range(brightness.0..=brightness.1);
                let alpha = rng.gen_range(contrast.0..=contrast.1);
                image
                    .brighten((beta * 255.0).round() as i32)
                    .adjust_contrast((alpha * 100.0) as f32)
            }
            OpKind::GaussNoise { variance, mean } => {
                let sigma = rng.gen_range(variance.0..=variance.1).sqrt();
                let mut buf = image.to_rgba8();
                for pixel in buf.pixels_mut() {
                    for channel in pixel.0.iter_mut().take(3) {
                        let noisy = f64::from(*channel) + mean + sigma * standard_normal(rng);
                        *channel = noisy.round().clamp(0.0, 255.0) as u8;
                    }
                }
                with_color(color, DynamicImage::ImageRgba8(buf))
            }
            OpKind::RandomCrop { height, width } => {
                let (h, w) = (image.height(), image.width());
                if *height > h || *width > w {
                    return Err(BackendError::Execution {
                        transform: self.name.to_string(),
                        message: format!(
                            "Requested crop size ({height}, {width}) is larger than the image size ({h}, {w})"
                        ),
                    });
                }
                let x = rng.gen_range(0..=w - width);
                let y = rng.gen_range(0..=h - height);
                image.crop_imm(x, y, *width, *height)
            }
            OpKind::RandomResizedCrop { height, width, scale, ratio } => {
                let (x, y, w, h) = resized_crop_window(image.width(), image.height(), *scale, *ratio, rng);
                image
                    .crop_imm(x, y, w, h)
                    .resize_exact(*width, *height, FilterType::Triangle)
            }
            OpKind::HorizontalFlip => image.fliph(),
            OpKind::VerticalFlip => image.flipv(),
            OpKind::ToGray => with_color(color, image.grayscale()),
            OpKind::Invert => {
                let mut image = image;
                image.invert();
                image
            }
        };
        Ok(out)
    }
}

fn sample_kernel(kernel: (u32, u32), rng: &mut StdRng) -> u32 {
    let steps = (kernel.1 - kernel.0) / 2;
    kernel.0 + 2 * rng.gen_range(0..=steps)
}

/// Box-Muller transform over the seeded generator.
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Convert back to the caller's color type after working in RGBA8.
///
/// Pixel loops run at 8 bits per channel, so 16-bit and float inputs keep
/// their type but lose the extra precision.
fn with_color(color: ColorType, image: DynamicImage) -> DynamicImage {
    match color {
        ColorType::L8 => DynamicImage::ImageLuma8(image.to_luma8()),
        ColorType::La8 => DynamicImage::ImageLumaA8(image.to_luma_alpha8()),
        ColorType::Rgb8 => DynamicImage::ImageRgb8(image.to_rgb8()),
        ColorType::Rgba8 => DynamicImage::ImageRgba8(image.to_rgba8()),
        ColorType::L16 => DynamicImage::ImageLuma16(image.to_luma16()),
        ColorType::La16 => DynamicImage::ImageLumaA16(image.to_luma_alpha16()),
        ColorType::Rgb16 => DynamicImage::ImageRgb16(image.to_rgb16()),
        ColorType::Rgba16 => DynamicImage::ImageRgba16(image.to_rgba16()),
        ColorType::Rgb32F => DynamicImage::ImageRgb32F(image.to_rgb32f()),
        ColorType::Rgba32F => DynamicImage::ImageRgba32F(image.to_rgba32f()),
        _ => image,
    }
}

fn motion_blur(src: &RgbaImage, kernel: u32, horizontal: bool) -> RgbaImage {
    let (w, h) = src.dimensions();
    let half = i64::from(kernel / 2);
    RgbaImage::from_fn(w, h, |x, y| {
        let mut acc = [0u32; 4];
        for offset in -half..=half {
            let (sx, sy) = if horizontal {
                ((i64::from(x) + offset).clamp(0, i64::from(w) - 1) as u32, y)
            } else {
                (x, (i64::from(y) + offset).clamp(0, i64::from(h) - 1) as u32)
            };
            let p = src.get_pixel(sx, sy);
            for (sum, channel) in acc.iter_mut().zip(p.0) {
                *sum += u32::from(channel);
            }
        }
        let n = (2 * half + 1) as u32;
        Rgba(acc.map(|sum| (sum / n) as u8))
    })
}

/// Rotate about the center, nearest-neighbour, transparent outside.
fn rotate(src: &RgbaImage, degrees: f64) -> RgbaImage {
    let (w, h) = src.dimensions();
    let (sin, cos) = degrees.to_radians().sin_cos();
    let cx = (f64::from(w) - 1.0) / 2.0;
    let cy = (f64::from(h) - 1.0) / 2.0;
    RgbaImage::from_fn(w, h, |x, y| {
        let dx = f64::from(x) - cx;
        let dy = f64::from(y) - cy;
        let sx = (cos * dx + sin * dy + cx).round();
        let sy = (-sin * dx + cos * dy + cy).round();
        if sx >= 0.0 && sy >= 0.0 && sx < f64::from(w) && sy < f64::from(h) {
            *src.get_pixel(sx as u32, sy as u32)
        } else {
            Rgba([0, 0, 0, 0])
        }
    })
}

/// Pick a crop window by area fraction and aspect ratio, falling back to
/// the whole image after ten misses.
fn resized_crop_window(
    width: u32,
    height: u32,
    scale: (f64, f64),
    ratio: (f64, f64),
    rng: &mut StdRng,
) -> (u32, u32, u32, u32) {
    let area = f64::from(width) * f64::from(height);
    let (log_lo, log_hi) = (ratio.0.ln(), ratio.1.ln());

    for _ in 0..10 {
        let target = area * rng.gen_range(scale.0..=scale.1);
        let aspect = rng.gen_range(log_lo..=log_hi).exp();
        let w = (target * aspect).sqrt().round() as u32;
        let h = (target / aspect).sqrt().round() as u32;
        if w > 0 && h > 0 && w <= width && h <= height {
            let x = rng.gen_range(0..=width - w);
            let y = rng.gen_range(0..=height - h);
            return (x, y, w, h);
        }
    }
    (0, 0, width, height)
}

impl OpKind {
    /// Fixed output size as `(height, width)`, for ops that set one.
    pub fn output_size(&self) -> Option<(u32, u32)> {
        match self {
            OpKind::RandomCrop { height, width } | OpKind::RandomResizedCrop { height, width, .. } => {
                Some((*height, *width))
            }
            _ => None,
        }
    }
}

/// Backend over the static registry above.
pub struct ImageOpsBackend {
    max_pipeline_length: usize,
    max_width: u32,
    max_height: u32,
}

impl ImageOpsBackend {
    /// Backend with the default output size bounds.
    pub fn new(max_pipeline_length: usize) -> Self {
        let limits = ProcessingLimits::default();
        Self {
            max_pipeline_length,
            max_width: limits.max_image_width,
            max_height: limits.max_image_height,
        }
    }

    /// Backend bounded by every limit in `limits`.
    pub fn from_limits(limits: &ProcessingLimits) -> Self {
        Self {
            max_pipeline_length: limits.max_pipeline_length,
            max_width: limits.max_image_width,
            max_height: limits.max_image_height,
        }
    }

    fn entry(&self, name: &str) -> Option<&'static RegistryEntry> {
        REGISTRY.iter().find(|e| e.info.name == name)
    }
}

impl Default for ImageOpsBackend {
    fn default() -> Self {
        Self::from_limits(&ProcessingLimits::default())
    }
}

impl TransformBackend for ImageOpsBackend {
    fn lookup(&self, name: &str) -> Option<&TransformInfo> {
        self.entry(name).map(|e| &e.info)
    }

    fn known_transforms(&self) -> Vec<&TransformInfo> {
        REGISTRY.iter().map(|e| &e.info).collect()
    }

    fn instantiate(&self, name: &str, params: &Parameters) -> Result<Box<dyn Transform>, BackendError> {
        let entry = self
            .entry(name)
            .ok_or_else(|| BackendError::UnknownTransform(name.to_string()))?;
        let reader = ParamReader::new(entry.info.name, params);

        if let Some(key) = params.keys().find(|k| !entry.info.parameters.contains(&k.as_str())) {
            return Err(reader.invalid(key, "unexpected parameter"));
        }

        let probability = reader.probability(entry.info.default_probability)?;
        let kind = (entry.build)(&reader)?;
        if let Some((height, width)) = kind.output_size() {
            if height > self.max_height {
                return Err(reader.invalid("height", format!("{height} exceeds the limit of {}", self.max_height)));
            }
            if width > self.max_width {
                return Err(reader.invalid("width", format!("{width} exceeds the limit of {}", self.max_width)));
            }
        }

        Ok(Box::new(ImageOp {
            name: entry.info.name,
            probability,
            parameters: params.clone(),
            kind,
        }))
    }

    fn compose(
        &self,
        transforms: Vec<Box<dyn Transform>>,
        seed: Option<Seed>,
    ) -> Result<Pipeline, BackendError> {
        if transforms.len() > self.max_pipeline_length {
            return Err(BackendError::Compose(format!(
                "{} transforms exceed the pipeline limit of {}",
                transforms.len(),
                self.max_pipeline_length
            )));
        }
        Ok(Pipeline::new(transforms, seed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::ParamValue;
    use image::{Rgb, RgbImage};

    fn gradient(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
            Rgb([(x * 7) as u8, (y * 11) as u8, ((x + y) * 3) as u8])
        }))
    }

    fn params(pairs: &[(&str, ParamValue)]) -> Parameters {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn always(pairs: &[(&str, ParamValue)]) -> Parameters {
        let mut p = params(pairs);
        p.insert("p".to_string(), ParamValue::Float(1.0));
        p
    }

    fn run(name: &str, p: Parameters, image: &DynamicImage, seed: Seed) -> Result<DynamicImage, BackendError> {
        let backend = ImageOpsBackend::default();
        let op = backend.instantiate(name, &p)?;
        backend.compose(vec![op], Some(seed))?.apply(image)
    }

    #[test]
    fn test_every_registered_transform_runs() {
        let image = gradient(24, 16);
        let backend = ImageOpsBackend::default();
        for info in backend.known_transforms() {
            let mut p = always(&[]);
            if info.parameters.contains(&"height") {
                p.insert("height".into(), ParamValue::Int(8));
                p.insert("width".into(), ParamValue::Int(8));
            }
            let out = run(info.name, p, &image, 1).unwrap();
            assert_eq!(out.color(), image.color(), "{} changed the color type", info.name);
        }
    }

    #[test]
    fn test_unknown_transform() {
        let backend = ImageOpsBackend::default();
        assert!(backend.lookup("Bogus").is_none());
        assert!(matches!(
            backend.instantiate("Bogus", &Parameters::new()),
            Err(BackendError::UnknownTransform(_))
        ));
    }

    #[test]
    fn test_flip_is_exact() {
        let image = gradient(5, 3);
        let out = run("HorizontalFlip", always(&[]), &image, 0).unwrap();
        let (src, dst) = (image.to_rgb8(), out.to_rgb8());
        assert_eq!(src.get_pixel(0, 1), dst.get_pixel(4, 1));
    }

    #[test]
    fn test_zero_probability_is_identity() {
        let image = gradient(8, 8);
        let p = params(&[("p", ParamValue::Float(0.0))]);
        let out = run("InvertImg", p, &image, 9).unwrap();
        assert_eq!(out.as_bytes(), image.as_bytes());
    }

    #[test]
    fn test_crop_larger_than_image_fails_at_execution() {
        let image = gradient(8, 8);
        let p = always(&[("height", ParamValue::Int(16)), ("width", ParamValue::Int(4))]);
        let err = run("RandomCrop", p, &image, 0).unwrap_err();
        assert!(matches!(err, BackendError::Execution { .. }));
    }

    #[test]
    fn test_resized_crop_output_size() {
        let image = gradient(32, 20);
        let p = always(&[("height", ParamValue::Int(10)), ("width", ParamValue::Int(12))]);
        let out = run("RandomResizedCrop", p, &image, 3).unwrap();
        assert_eq!((out.width(), out.height()), (12, 10));
    }

    #[test]
    fn test_even_kernel_rejected() {
        let backend = ImageOpsBackend::default();
        let p = params(&[("blur_limit", ParamValue::Int(4))]);
        assert!(matches!(
            backend.instantiate("Blur", &p),
            Err(BackendError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_unexpected_parameter_rejected() {
        let backend = ImageOpsBackend::default();
        let p = params(&[("angle", ParamValue::Int(4))]);
        assert!(backend.instantiate("Rotate", &p).is_err());
    }

    #[test]
    fn test_seeded_noise_deterministic() {
        let image = gradient(16, 16);
        let p = always(&[("var_limit", ParamValue::from(vec![50.0, 100.0]))]);
        let a = run("GaussNoise", p.clone(), &image, 42).unwrap();
        let b = run("GaussNoise", p, &image, 42).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), image.as_bytes());
    }

    #[test]
    fn test_crop_size_bounded_by_limits() {
        let backend = ImageOpsBackend::default();
        let huge = f64::from(u32::MAX);
        for name in ["RandomCrop", "RandomResizedCrop"] {
            let p = always(&[("height", ParamValue::Float(huge)), ("width", ParamValue::Float(huge))]);
            assert!(matches!(
                backend.instantiate(name, &p),
                Err(BackendError::InvalidParameter { .. })
            ));
        }

        let limits = ProcessingLimits {
            max_image_width: 16,
            ..Default::default()
        };
        let backend = ImageOpsBackend::from_limits(&limits);
        let p = always(&[("height", ParamValue::Int(8)), ("width", ParamValue::Int(17))]);
        assert!(backend.instantiate("RandomResizedCrop", &p).is_err());
        let p = always(&[("height", ParamValue::Int(8)), ("width", ParamValue::Int(16))]);
        assert!(backend.instantiate("RandomResizedCrop", &p).is_ok());
    }

    #[test]
    fn test_wide_color_types_preserved() {
        let image = DynamicImage::ImageRgb16(gradient(12, 10).to_rgb16());
        for name in ["Rotate", "MotionBlur", "GaussNoise"] {
            let out = run(name, always(&[]), &image, 4).unwrap();
            assert_eq!(out.color(), ColorType::Rgb16, "{} changed the color type", name);
        }
        let image = DynamicImage::ImageRgba32F(gradient(12, 10).to_rgba32f());
        let out = run("Rotate", always(&[]), &image, 4).unwrap();
        assert_eq!(out.color(), ColorType::Rgba32F);
    }

    #[test]
    fn test_compose_limit() {
        let backend = ImageOpsBackend::new(1);
        let ops = vec![
            backend.instantiate("HorizontalFlip", &Parameters::new()).unwrap(),
            backend.instantiate("VerticalFlip", &Parameters::new()).unwrap(),
        ];
        assert!(matches!(backend.compose(ops, None), Err(BackendError::Compose(_))));
    }
}
