//! Transform Backend - The Pixel-Execution Boundary
//!
//! The compiler never touches pixels. It asks a `TransformBackend` to look
//! up, instantiate and compose transforms, and hands the resulting
//! `Pipeline` an image. Unknown names are a typed lookup miss, not an error
//! raised deep inside construction.

use image::DynamicImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;

use crate::seed::Seed;
use crate::transform::{ParamValue, Parameters};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("Unknown transform: {0}")]
    UnknownTransform(String),

    #[error("{transform}: missing required parameter '{parameter}'")]
    MissingParameter { transform: String, parameter: String },

    #[error("{transform}: invalid parameter '{parameter}': {message}")]
    InvalidParameter {
        transform: String,
        parameter: String,
        message: String,
    },

    #[error("Failed to compose pipeline: {0}")]
    Compose(String),

    #[error("{transform} failed: {message}")]
    Execution { transform: String, message: String },
}

/// Static description of a transform the backend knows how to build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformInfo {
    pub name: &'static str,
    pub description: &'static str,
    /// Parameter names the constructor accepts (always includes `p`)
    pub parameters: &'static [&'static str],
    pub default_probability: f64,
}

/// An instantiated transform, ready to run inside a `Pipeline`.
pub trait Transform: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Chance that this transform applies on a given run.
    fn probability(&self) -> f64;

    /// The parameters the transform was built from.
    fn parameters(&self) -> &Parameters;

    fn apply(&self, image: DynamicImage, rng: &mut StdRng) -> Result<DynamicImage, BackendError>;
}

pub trait TransformBackend: Send + Sync {
    fn lookup(&self, name: &str) -> Option<&TransformInfo>;

    fn known_transforms(&self) -> Vec<&TransformInfo>;

    fn instantiate(&self, name: &str, params: &Parameters) -> Result<Box<dyn Transform>, BackendError>;

    fn compose(
        &self,
        transforms: Vec<Box<dyn Transform>>,
        seed: Option<Seed>,
    ) -> Result<Pipeline, BackendError>;
}

/// A composed, optionally seeded sequence of transforms.
///
/// With a seed, `apply` is deterministic: the same input image always
/// produces the same output bytes.
#[derive(Debug)]
pub struct Pipeline {
    transforms: Vec<Box<dyn Transform>>,
    seed: Option<Seed>,
}

impl Pipeline {
    pub fn new(transforms: Vec<Box<dyn Transform>>, seed: Option<Seed>) -> Self {
        Self { transforms, seed }
    }

    pub fn transforms(&self) -> &[Box<dyn Transform>] {
        &self.transforms
    }

    pub fn seed(&self) -> Option<Seed> {
        self.seed
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn apply(&self, image: &DynamicImage) -> Result<DynamicImage, BackendError> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(u64::from(seed)),
            None => StdRng::from_entropy(),
        };

        let mut current = image.clone();
        for transform in &self.transforms {
            let roll: f64 = rng.gen();
            if roll < transform.probability() {
                tracing::trace!(transform = transform.name(), "applying");
                current = transform.apply(current, &mut rng)?;
            }
        }
        Ok(current)
    }
}

/// Typed access to a transform's parameters during construction.
pub struct ParamReader<'a> {
    transform: &'a str,
    params: &'a Parameters,
}

impl<'a> ParamReader<'a> {
    pub fn new(transform: &'a str, params: &'a Parameters) -> Self {
        Self { transform, params }
    }

    pub fn transform(&self) -> &str {
        self.transform
    }

    pub fn invalid(&self, parameter: &str, message: impl Into<String>) -> BackendError {
        BackendError::InvalidParameter {
            transform: self.transform.to_string(),
            parameter: parameter.to_string(),
            message: message.into(),
        }
    }

    fn finite(&self, key: &str, value: &ParamValue) -> Result<f64, BackendError> {
        match value.as_f64() {
            Some(v) if v.is_finite() => Ok(v),
            Some(v) => Err(self.invalid(key, format!("expected a finite number, got {v}"))),
            None => Err(self.invalid(key, format!("expected a number, got {value:?}"))),
        }
    }

    pub fn number(&self, key: &str) -> Result<Option<f64>, BackendError> {
        self.params.get(key).map(|v| self.finite(key, v)).transpose()
    }

    pub fn pair(&self, key: &str) -> Result<Option<(f64, f64)>, BackendError> {
        let Some(value) = self.params.get(key) else {
            return Ok(None);
        };
        match value.as_list() {
            Some([a, b]) => Ok(Some((self.finite(key, a)?, self.finite(key, b)?))),
            _ => Err(self.invalid(key, "expected a pair of numbers")),
        }
    }

    /// A range given either as a scalar or as a `[low, high]` pair.
    ///
    /// A scalar `v` means `(-|v|, |v|)` when `symmetric`, else `(floor, v)`.
    pub fn range(
        &self,
        key: &str,
        default: (f64, f64),
        symmetric: bool,
        floor: f64,
    ) -> Result<(f64, f64), BackendError> {
        let range = match self.params.get(key) {
            None => default,
            Some(ParamValue::List(_)) => self.pair(key)?.unwrap_or(default),
            Some(value) => {
                let v = self.finite(key, value)?;
                if symmetric {
                    (-v.abs(), v.abs())
                } else {
                    (floor, v)
                }
            }
        };
        if range.0 > range.1 {
            return Err(self.invalid(key, format!("low {} exceeds high {}", range.0, range.1)));
        }
        Ok(range)
    }

    pub fn dimension(&self, key: &str) -> Result<u32, BackendError> {
        let value = self.number(key)?.ok_or_else(|| BackendError::MissingParameter {
            transform: self.transform.to_string(),
            parameter: key.to_string(),
        })?;
        if value < 1.0 || value.fract() != 0.0 || value > f64::from(u32::MAX) {
            return Err(self.invalid(key, format!("expected a positive integer, got {value}")));
        }
        Ok(value as u32)
    }

    pub fn probability(&self, default: f64) -> Result<f64, BackendError> {
        match self.number("p")? {
            None => Ok(default),
            Some(p) if (0.0..=1.0).contains(&p) => Ok(p),
            Some(p) => Err(self.invalid("p", format!("probability {p} outside [0, 1]"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, ParamValue)]) -> Parameters {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_range_scalar_symmetric() {
        let p = params(&[("limit", ParamValue::Float(-30.0))]);
        let r = ParamReader::new("Rotate", &p);
        assert_eq!(r.range("limit", (-90.0, 90.0), true, 0.0).unwrap(), (-30.0, 30.0));
    }

    #[test]
    fn test_range_pair_and_default() {
        let p = params(&[("var_limit", ParamValue::from(vec![10.0, 50.0]))]);
        let r = ParamReader::new("GaussNoise", &p);
        assert_eq!(r.range("var_limit", (0.0, 1.0), false, 0.0).unwrap(), (10.0, 50.0));
        assert_eq!(r.range("missing", (1.0, 2.0), false, 0.0).unwrap(), (1.0, 2.0));
    }

    #[test]
    fn test_range_rejects_inverted_pair() {
        let p = params(&[("var_limit", ParamValue::from(vec![60.0, 50.0]))]);
        let r = ParamReader::new("GaussNoise", &p);
        assert!(matches!(
            r.range("var_limit", (0.0, 1.0), false, 0.0),
            Err(BackendError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_dimension_required() {
        let p = Parameters::new();
        let r = ParamReader::new("RandomCrop", &p);
        assert!(matches!(r.dimension("height"), Err(BackendError::MissingParameter { .. })));
    }

    #[test]
    fn test_wrong_type_is_invalid() {
        let p = params(&[("p", ParamValue::from("often"))]);
        let r = ParamReader::new("HorizontalFlip", &p);
        let err = r.probability(0.5).unwrap_err();
        assert!(err.to_string().contains("HorizontalFlip"));
    }
}
