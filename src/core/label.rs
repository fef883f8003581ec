//! Encoding and decoding of composite node labels.
//!
//! An internal node label may carry up to three pieces of information:
//!
//! ```text
//! [support:]taxon[|auxiliary]
//! ```
//!
//! - a numeric support value, either alone (`"98"`) or as a prefix
//!   separated from the taxon by `:` (`"98:g__Escherichia"`),
//! - a taxon string, possibly naming several ranks
//!   (`"f__Enterobacteriaceae; g__Escherichia"`),
//! - an auxiliary payload after the first `|` (or enclosed in a trailing
//!   `[...]`), holding free-form annotations.
//!
//! Decoding never fails: malformed input yields an empty [`DecodedLabel`].

use crate::core::types::split_taxa;

/// A support value together with the text it was parsed from, so that
/// re-encoding reproduces the input exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct Support {
    value: f64,
    text: String,
}

impl Support {
    /// Parse a support value; rejects non-numeric and non-finite text.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let value: f64 = text.parse().ok()?;
        value.is_finite().then(|| Self {
            value,
            text: text.to_string(),
        })
    }

    #[must_use]
    pub fn from_value(value: f64) -> Self {
        Self {
            value,
            text: value.to_string(),
        }
    }

    #[must_use]
    pub fn value(&self) -> f64 {
        self.value
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// The support/taxon portion of a label.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum LabelBody {
    #[default]
    Empty,
    Support(Support),
    Taxon(String),
    SupportedTaxon { support: Support, taxon: String },
}

/// Result of decoding a node label.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedLabel {
    pub body: LabelBody,
    pub auxiliary: Option<String>,
}

impl DecodedLabel {
    #[must_use]
    pub fn new(support: Option<Support>, taxon: Option<String>, auxiliary: Option<String>) -> Self {
        let taxon = taxon.filter(|t| !t.trim().is_empty());
        let body = match (support, taxon) {
            (None, None) => LabelBody::Empty,
            (Some(support), None) => LabelBody::Support(support),
            (None, Some(taxon)) => LabelBody::Taxon(taxon),
            (Some(support), Some(taxon)) => LabelBody::SupportedTaxon { support, taxon },
        };
        Self {
            body,
            auxiliary: auxiliary.filter(|a| !a.is_empty()),
        }
    }

    #[must_use]
    pub fn support(&self) -> Option<&Support> {
        match &self.body {
            LabelBody::Support(s) | LabelBody::SupportedTaxon { support: s, .. } => Some(s),
            LabelBody::Empty | LabelBody::Taxon(_) => None,
        }
    }

    #[must_use]
    pub fn support_value(&self) -> Option<f64> {
        self.support().map(Support::value)
    }

    #[must_use]
    pub fn taxon(&self) -> Option<&str> {
        match &self.body {
            LabelBody::Taxon(t) | LabelBody::SupportedTaxon { taxon: t, .. } => Some(t),
            LabelBody::Empty | LabelBody::Support(_) => None,
        }
    }

    /// Individual taxa of the taxon string, most general first.
    #[must_use]
    pub fn taxa(&self) -> Vec<&str> {
        self.taxon().map(|t| split_taxa(t).collect()).unwrap_or_default()
    }

    #[must_use]
    pub fn auxiliary(&self) -> Option<&str> {
        self.auxiliary.as_deref()
    }

    #[must_use]
    pub fn encode(&self) -> String {
        encode(self.support(), self.taxon(), self.auxiliary())
    }
}

/// Decode a raw node label into support, taxon and auxiliary parts.
#[must_use]
pub fn decode(label: &str) -> DecodedLabel {
    try_decode(label).unwrap_or_default()
}

/// Like [`decode`], but `None` for a non-empty label that does not follow
/// the `[support:]taxon[|auxiliary]` layout, so callers rewriting labels
/// can leave such text alone.
#[must_use]
pub fn try_decode(label: &str) -> Option<DecodedLabel> {
    let label = label.trim();
    if label.is_empty() {
        return Some(DecodedLabel::default());
    }

    let (head, auxiliary) = match label.split_once('|') {
        Some((head, aux)) => (head, Some(aux.to_string())),
        None => match bracketed_payload(label) {
            Some((head, aux)) => (head, Some(aux.to_string())),
            None => (label, None),
        },
    };
    let head = head.trim();

    let (support, taxon) = if let Some((support, taxon)) = head.split_once(':') {
        if taxon.contains(':') {
            return None;
        }
        (Some(Support::parse(support)?), Some(taxon.trim().to_string()))
    } else if let Some(support) = Support::parse(head) {
        (Some(support), None)
    } else if head.is_empty() {
        (None, None)
    } else {
        (None, Some(head.to_string()))
    };

    Some(DecodedLabel::new(support, taxon, auxiliary))
}

/// Split `"taxon[payload]"` into `("taxon", "payload")`.
fn bracketed_payload(label: &str) -> Option<(&str, &str)> {
    let inner = label.strip_suffix(']')?;
    let open = inner.rfind('[')?;
    Some((&inner[..open], &inner[open + 1..]))
}

/// Compose a node label. Left inverse of [`decode`] on labels it produces.
#[must_use]
pub fn encode(support: Option<&Support>, taxon: Option<&str>, auxiliary: Option<&str>) -> String {
    let taxon = taxon.filter(|t| !t.is_empty());
    let mut label = match (support, taxon) {
        (Some(s), Some(t)) => format!("{}:{t}", s.as_str()),
        (Some(s), None) => s.as_str().to_string(),
        (None, Some(t)) => t.to_string(),
        (None, None) => String::new(),
    };

    if let Some(aux) = auxiliary.filter(|a| !a.is_empty()) {
        label.push('|');
        label.push_str(aux);
    }

    label
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_support_only() {
        let d = decode("98.5");
        assert_eq!(d.support_value(), Some(98.5));
        assert_eq!(d.taxon(), None);
        assert_eq!(d.auxiliary(), None);
    }

    #[test]
    fn test_decode_supported_taxon_with_aux() {
        let d = decode("100:p__Firmicutes; c__Bacilli|RED=0.412");
        assert_eq!(d.support_value(), Some(100.0));
        assert_eq!(d.taxon(), Some("p__Firmicutes; c__Bacilli"));
        assert_eq!(d.taxa(), vec!["p__Firmicutes", "c__Bacilli"]);
        assert_eq!(d.auxiliary(), Some("RED=0.412"));
    }

    #[test]
    fn test_decode_taxon_only() {
        let d = decode("g__Escherichia");
        assert_eq!(d.support(), None);
        assert_eq!(d.taxon(), Some("g__Escherichia"));
    }

    #[test]
    fn test_decode_bracketed_payload() {
        let d = decode("g__Escherichia[note]");
        assert_eq!(d.taxon(), Some("g__Escherichia"));
        assert_eq!(d.auxiliary(), Some("note"));
    }

    #[test]
    fn test_decode_malformed_is_empty() {
        assert_eq!(decode("abc:g__X"), DecodedLabel::default());
        assert_eq!(decode("1:2:3"), DecodedLabel::default());
        assert_eq!(decode(""), DecodedLabel::default());
    }

    #[test]
    fn test_try_decode_distinguishes_malformed() {
        assert_eq!(try_decode("abc:g__X"), None);
        assert_eq!(try_decode(""), Some(DecodedLabel::default()));
        assert_eq!(
            try_decode("g__X").and_then(|d| d.taxon().map(str::to_string)),
            Some("g__X".to_string())
        );
    }

    #[test]
    fn test_nan_is_not_support() {
        let d = decode("nan");
        assert_eq!(d.support(), None);
        assert_eq!(d.taxon(), Some("nan"));
    }

    #[test]
    fn test_round_trip_of_produced_labels() {
        let support = Support::parse("95.0").unwrap();
        let labels = [
            encode(Some(&support), Some("g__A"), Some("perc=12.5|RED=0.871|pred=g__")),
            encode(None, Some("f__B; g__C"), Some("RED=0.500")),
            encode(Some(&support), None, Some("perc=NA|RED=0.100|pred=NA")),
            encode(None, None, Some("RED=0.000")),
            encode(Some(&support), Some("p__D"), None),
        ];
        for label in labels {
            assert_eq!(decode(&label).encode(), label);
        }
    }
}
