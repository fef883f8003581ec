use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::core::tree::NodeId;
use crate::core::types::Rank;
use crate::divergence::distribution::{RankDistributions, TaxonObservation};

/// Percentile interval considered typical for a rank.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PercentileBand {
    pub lower: f64,
    pub upper: f64,
}

impl Default for PercentileBand {
    fn default() -> Self {
        Self {
            lower: 5.0,
            upper: 95.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutlierClass {
    Within,
    Below,
    Above,
}

impl OutlierClass {
    #[must_use]
    pub fn is_outlier(self) -> bool {
        self != Self::Within
    }
}

impl fmt::Display for OutlierClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Within => "within",
            Self::Below => "below",
            Self::Above => "above",
        };
        f.write_str(s)
    }
}

/// Values of a rank distribution at the band's percentiles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

/// Classification of a single value against its rank.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Classification {
    pub class: OutlierClass,
    /// Distance to the violated bound; 0 when within bounds
    pub deviation: f64,
    pub bounds: Bounds,
}

/// Outlier verdict for one named node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlierAssessment {
    pub node: NodeId,
    pub taxon: String,
    pub value: f64,
    /// Median of the rank distribution
    pub median: Option<f64>,
    pub percentile: Option<f64>,
    /// Whether the node itself contributed to the rank distribution
    pub in_baseline: bool,
    #[serde(flatten)]
    pub classification: Classification,
}

#[derive(Debug, Clone, Default)]
pub struct OutlierConfig {
    pub band: PercentileBand,
    /// Only assess nodes whose lineage includes this domain taxon
    pub domain: Option<String>,
    /// Only assess these taxa
    pub allow_list: Option<BTreeSet<String>>,
}

/// Flags nodes whose value falls outside the percentile band of their rank.
pub struct OutlierDetector<'a> {
    distributions: &'a RankDistributions,
    config: OutlierConfig,
}

impl<'a> OutlierDetector<'a> {
    #[must_use]
    pub fn new(distributions: &'a RankDistributions) -> Self {
        Self::with_config(distributions, OutlierConfig::default())
    }

    #[must_use]
    pub fn with_config(distributions: &'a RankDistributions, config: OutlierConfig) -> Self {
        Self {
            distributions,
            config,
        }
    }

    /// Classify `value` against the distribution of `rank`; `None` if the
    /// rank has no distribution.
    #[must_use]
    pub fn classify(&self, rank: Rank, value: f64) -> Option<Classification> {
        let dist = self.distributions.get(rank)?;
        let bounds = Bounds {
            lower: dist.percentile(self.config.band.lower)?,
            upper: dist.percentile(self.config.band.upper)?,
        };

        let (class, deviation) = if value < bounds.lower {
            (OutlierClass::Below, bounds.lower - value)
        } else if value > bounds.upper {
            (OutlierClass::Above, value - bounds.upper)
        } else {
            (OutlierClass::Within, 0.0)
        };

        Some(Classification {
            class,
            deviation,
            bounds,
        })
    }

    /// Assess every observation selected by the domain and allow-list
    /// restrictions, in tree pre-order.
    #[must_use]
    pub fn assess(&self) -> Vec<OutlierAssessment> {
        self.distributions
            .observations()
            .iter()
            .filter(|o| self.is_selected(o))
            .filter_map(|o| {
                let classification = self.classify(o.rank, o.value)?;
                let dist = self.distributions.get(o.rank)?;
                Some(OutlierAssessment {
                    node: o.node,
                    taxon: o.taxon.clone(),
                    value: o.value,
                    median: dist.median(),
                    percentile: dist.percentile_of(o.value),
                    in_baseline: o.in_baseline,
                    classification,
                })
            })
            .collect()
    }

    fn is_selected(&self, observation: &TaxonObservation) -> bool {
        if let Some(domain) = &self.config.domain {
            if !observation.lineage.iter().any(|t| t == domain) {
                return false;
            }
        }
        if let Some(allowed) = &self.config.allow_list {
            if !allowed.contains(&observation.taxon) {
                return false;
            }
        }
        true
    }
}
