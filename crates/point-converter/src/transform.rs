//! Per-cell value transform: nodata detection, scale/offset, unit conversion.

use crate::request::{NodataPolicy, ValueTransformOptions};
use crate::units::UnitConversion;

/// Resolved value transform for one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueTransform {
    nodata: f64,
    tolerance: f64,
    policy: NodataPolicy,
    scale: f64,
    offset: f64,
    units: UnitConversion,
}

impl ValueTransform {
    pub fn new(
        nodata: f64,
        options: &ValueTransformOptions,
        tolerance: f64,
    ) -> Result<Self, String> {
        Ok(Self {
            nodata,
            tolerance,
            policy: options.nodata,
            scale: options.scale,
            offset: options.offset,
            units: options.unit_conversion()?,
        })
    }

    /// True when `raw` is the nodata sentinel (within tolerance) or NaN.
    pub fn is_nodata(&self, raw: f64) -> bool {
        if raw.is_nan() {
            return true;
        }
        if !self.nodata.is_finite() {
            return raw == self.nodata;
        }
        (raw - self.nodata).abs() <= self.tolerance * self.nodata.abs().max(1.0)
    }

    /// Transformed value, or `None` when the cell is absent.
    pub fn apply(&self, raw: f64) -> Option<f64> {
        if self.is_nodata(raw) {
            return match self.policy {
                NodataPolicy::Substitute(value) => Some(value),
                NodataPolicy::Drop | NodataPolicy::PassThrough => None,
            };
        }
        Some(self.units.apply(raw * self.scale + self.offset))
    }

    /// True when absent cells still produce a point (with a null attribute).
    pub fn emits_absent(&self) -> bool {
        self.policy == NodataPolicy::PassThrough
    }

    pub fn policy(&self) -> NodataPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Unit;
    use test_utils::assert_approx_eq;

    fn transform(policy: NodataPolicy) -> ValueTransform {
        let options = ValueTransformOptions {
            nodata: policy,
            ..Default::default()
        };
        ValueTransform::new(-9999.0, &options, 1e-6).unwrap()
    }

    #[test]
    fn test_nodata_tolerance() {
        let t = transform(NodataPolicy::Drop);
        assert!(t.is_nodata(-9999.0));
        assert!(t.is_nodata(-9999.000001));
        assert!(t.is_nodata(f64::NAN));
        assert!(!t.is_nodata(-9998.9));
        assert!(!t.is_nodata(0.0));
    }

    #[test]
    fn test_policies() {
        assert_eq!(transform(NodataPolicy::Drop).apply(-9999.0), None);
        let pass = transform(NodataPolicy::PassThrough);
        assert_eq!(pass.apply(-9999.0), None);
        assert!(pass.emits_absent());
        assert_eq!(transform(NodataPolicy::Substitute(0.0)).apply(-9999.0), Some(0.0));
        assert_eq!(transform(NodataPolicy::Drop).apply(12.5), Some(12.5));
    }

    #[test]
    fn test_scale_offset_then_units() {
        let options = ValueTransformOptions {
            scale: 0.1,
            offset: 0.0,
            from_units: Some(Unit::Celsius),
            to_units: Some(Unit::Fahrenheit),
            ..Default::default()
        };
        let t = ValueTransform::new(-9999.0, &options, 1e-6).unwrap();
        // 250 tenths of a degree C -> 25 C -> 77 F
        assert_approx_eq!(t.apply(250.0).unwrap(), 77.0, 1e-9);
    }

    #[test]
    fn test_substitute_is_not_rescaled() {
        let options = ValueTransformOptions {
            nodata: NodataPolicy::Substitute(-1.0),
            scale: 100.0,
            ..Default::default()
        };
        let t = ValueTransform::new(-9999.0, &options, 1e-6).unwrap();
        assert_eq!(t.apply(-9999.0), Some(-1.0));
    }

    #[test]
    fn test_nan_sentinel() {
        let t = ValueTransform::new(f64::NAN, &ValueTransformOptions::default(), 1e-6).unwrap();
        assert!(t.is_nodata(f64::NAN));
        assert!(!t.is_nodata(1.0));
    }
}
