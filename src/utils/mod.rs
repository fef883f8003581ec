//! Shared helpers: input checks and numeric formatting.

pub mod validation;

/// Convert a count to `f64` for ratios and means.
///
/// Counts in this crate are node and taxon tallies, far below the point where
/// `f64` loses integer precision.
#[inline]
#[must_use]
pub fn count_to_f64(count: usize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    {
        count as f64
    }
}

/// Format an optional value with a fixed number of decimals, `NA` if undefined.
#[must_use]
pub fn format_optional(value: Option<f64>, decimals: usize) -> String {
    value.map_or_else(|| "NA".to_string(), |v| format!("{v:.decimals$}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_optional() {
        assert_eq!(format_optional(Some(0.41234), 3), "0.412");
        assert_eq!(format_optional(Some(12.0), 1), "12.0");
        assert_eq!(format_optional(None, 3), "NA");
    }
}
