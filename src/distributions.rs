//! Scalar distribution strings used for inter-arrival times, key sizes and
//! value sizes (`--iadist`/`--keysize`/`--valuesize`).
//!
//! The CLI surface treats these as opaque strings (spec §6); this module is
//! the concrete `Generator` collaborator the rest of the crate samples from.

use rand::Rng;
use rand_distr::{Distribution as _, Exp, Gumbel, Normal, Pareto};

use crate::error::{MutenantError, Result};

/// A sampler producing non-negative `f64`s, e.g. an inter-arrival gap in
/// seconds or a size in bytes before rounding.
pub trait Generator: Send + Sync {
    fn sample(&self, rng: &mut dyn rand::RngCore) -> f64;
}

#[derive(Debug, Clone)]
pub enum Dist {
    Fixed(f64),
    Uniform(f64),
    Normal { mean: f64, sd: f64 },
    Exponential { lambda: f64 },
    Pareto { loc: f64, scale: f64, shape: f64 },
    Gev { loc: f64, scale: f64, shape: f64 },
}

impl Dist {
    /// Parse one of the strings documented for `--iadist`/`--keysize`/
    /// `--valuesize`: `fixed:v`, `uniform:max`, `normal:mean,sd`,
    /// `exponential:lambda`, `pareto:loc,scale,shape`, `gev:loc,scale,shape`,
    /// and the named shorthands `fb_value`, `fb_key`, `fb_ia`.
    pub fn parse(s: &str) -> Result<Dist> {
        match s {
            "fb_value" => return Ok(Dist::Gev { loc: 15.0, scale: 335.0, shape: 0.993 }),
            "fb_key" => return Ok(Dist::Normal { mean: 30.0, sd: 10.0 }),
            "fb_ia" => return Ok(Dist::Exponential { lambda: 1.0 }),
            _ => {}
        }

        let (name, rest) = s.split_once(':').ok_or_else(|| {
            MutenantError::Config(format!("malformed distribution string: {s:?}"))
        })?;
        let nums: Vec<f64> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split(',')
                .map(|p| {
                    p.trim().parse::<f64>().map_err(|_| {
                        MutenantError::Config(format!("malformed distribution parameter in {s:?}"))
                    })
                })
                .collect::<Result<_>>()?
        };

        let need = |n: usize| -> Result<()> {
            if nums.len() != n {
                return Err(MutenantError::Config(format!(
                    "distribution {name:?} expects {n} parameter(s), got {}",
                    nums.len()
                )));
            }
            Ok(())
        };

        match name {
            "fixed" => {
                need(1)?;
                Ok(Dist::Fixed(nums[0]))
            }
            "uniform" => {
                need(1)?;
                Ok(Dist::Uniform(nums[0]))
            }
            "normal" => {
                need(2)?;
                Ok(Dist::Normal { mean: nums[0], sd: nums[1] })
            }
            "exponential" => {
                need(1)?;
                Ok(Dist::Exponential { lambda: nums[0] })
            }
            "pareto" => {
                need(3)?;
                Ok(Dist::Pareto { loc: nums[0], scale: nums[1], shape: nums[2] })
            }
            "gev" => {
                need(3)?;
                Ok(Dist::Gev { loc: nums[0], scale: nums[1], shape: nums[2] })
            }
            other => Err(MutenantError::Config(format!("unknown distribution: {other:?}"))),
        }
    }

    pub fn sample(&self, rng: &mut dyn rand::RngCore) -> f64 {
        match *self {
            Dist::Fixed(v) => v,
            Dist::Uniform(max) => rng.gen_range(0.0..max.max(f64::EPSILON)),
            Dist::Normal { mean, sd } => Normal::new(mean, sd.max(f64::EPSILON))
                .map(|d| d.sample(rng).max(0.0))
                .unwrap_or(mean),
            Dist::Exponential { lambda } => Exp::new(lambda.max(f64::EPSILON))
                .map(|d| d.sample(rng))
                .unwrap_or(0.0),
            Dist::Pareto { loc, scale, shape } => Pareto::new(scale.max(f64::EPSILON), shape.max(f64::EPSILON))
                .map(|d| loc + d.sample(rng))
                .unwrap_or(loc),
            Dist::Gev { loc, scale, shape } => {
                // Approximate the GEV via a Gumbel when shape is ~0 (the
                // fb_value shorthand's shape is effectively unbounded tail);
                // otherwise invert the CDF directly.
                if shape.abs() < 1e-6 {
                    Gumbel::new(loc, scale.max(f64::EPSILON))
                        .map(|d| d.sample(rng))
                        .unwrap_or(loc)
                } else {
                    let u: f64 = rng.gen_range(1e-9..1.0);
                    loc + scale * ((-u.ln()).powf(-shape) - 1.0) / shape
                }
            }
        }
    }
}

/// Samples non-negative integer sizes (key/value lengths) from a [`Dist`],
/// clamped to `[min, max]` inclusive.
pub struct SizeGenerator {
    dist: Dist,
    min: usize,
    max: usize,
}

impl SizeGenerator {
    pub fn new(dist: Dist, min: usize, max: usize) -> Self {
        Self { dist, min, max }
    }

    pub fn sample(&self, rng: &mut dyn rand::RngCore) -> usize {
        let v = self.dist.sample(rng).round();
        let v = if v.is_finite() && v >= 0.0 { v as usize } else { self.min };
        v.clamp(self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fixed() {
        match Dist::parse("fixed:128").unwrap() {
            Dist::Fixed(v) => assert_eq!(v, 128.0),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parses_normal_with_two_params() {
        match Dist::parse("normal:30,10").unwrap() {
            Dist::Normal { mean, sd } => {
                assert_eq!(mean, 30.0);
                assert_eq!(sd, 10.0);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn rejects_wrong_arity() {
        assert!(Dist::parse("normal:30").is_err());
    }

    #[test]
    fn named_shorthands_resolve() {
        assert!(Dist::parse("fb_value").is_ok());
        assert!(Dist::parse("fb_key").is_ok());
        assert!(Dist::parse("fb_ia").is_ok());
    }

    #[test]
    fn size_generator_clamps() {
        let gen = SizeGenerator::new(Dist::Fixed(-5.0), 1, 524_000);
        let mut rng = rand::thread_rng();
        assert_eq!(gen.sample(&mut rng), 1);
    }
}
