//! Point-to-point link descriptions.

use crate::config::ConfigError;
use crate::units::{BitsPerSec, Nanosecs, Packets};

/// An immutable description of a point-to-point link. Every segment built from a `LinkSpec`
/// receives its own copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LinkSpec {
    /// The data rate of each direction.
    pub rate: BitsPerSec,
    /// The one-way propagation delay.
    pub delay: Nanosecs,
    /// Optional limit on the device queue, overriding the experiment-wide default.
    #[serde(default)]
    pub queue_limit: Option<Packets>,
}

impl LinkSpec {
    pub fn new(rate: impl Into<BitsPerSec>, delay: impl Into<Nanosecs>) -> Self {
        Self {
            rate: rate.into(),
            delay: delay.into(),
            queue_limit: None,
        }
    }

    pub fn with_queue_limit(self, limit: impl Into<Packets>) -> Self {
        Self {
            queue_limit: Some(limit.into()),
            ..self
        }
    }

    /// Delays are unsigned, so only the rate can be invalid.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.rate == BitsPerSec::ZERO {
            return Err(ConfigError::NonPositiveRate);
        }
        if self.queue_limit == Some(Packets::ZERO) {
            return Err(ConfigError::ZeroQueueLimit);
        }
        Ok(())
    }
}

/// Edge link parameters for one side of a dumbbell: either one spec applied to every leaf, or
/// one spec per leaf (and therefore per flow).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum EdgeLinks {
    /// The same link for every leaf.
    Uniform(LinkSpec),
    /// Leaf `i` uses entry `i`.
    PerFlow(Vec<LinkSpec>),
}

impl EdgeLinks {
    /// Resolves the spec for each of `count` leaves. A single-element sequence is uniform.
    pub(crate) fn resolve(&self, count: usize) -> Result<Vec<LinkSpec>, ConfigError> {
        let specs = match self {
            EdgeLinks::Uniform(spec) => vec![*spec; count],
            EdgeLinks::PerFlow(specs) if specs.len() == 1 => vec![specs[0]; count],
            EdgeLinks::PerFlow(specs) if specs.len() == count => specs.clone(),
            EdgeLinks::PerFlow(specs) => {
                return Err(ConfigError::EdgeLinkCount {
                    expected: count,
                    got: specs.len(),
                })
            }
        };
        for spec in &specs {
            spec.validate()?;
        }
        Ok(specs)
    }
}

impl From<LinkSpec> for EdgeLinks {
    fn from(spec: LinkSpec) -> Self {
        EdgeLinks::Uniform(spec)
    }
}

impl From<Vec<LinkSpec>> for EdgeLinks {
    fn from(specs: Vec<LinkSpec>) -> Self {
        EdgeLinks::PerFlow(specs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::{Mbps, Millisecs};

    fn edge(delay_ms: u64) -> LinkSpec {
        LinkSpec::new(Mbps::new(1000), Millisecs::new(delay_ms))
    }

    #[test]
    fn uniform_repeats_for_every_leaf() {
        let specs = EdgeLinks::from(edge(5)).resolve(3).unwrap();
        assert_eq!(specs, vec![edge(5); 3]);
    }

    #[test]
    fn single_entry_sequence_is_uniform() {
        let specs = EdgeLinks::from(vec![edge(25)]).resolve(2).unwrap();
        assert_eq!(specs, vec![edge(25), edge(25)]);
    }

    #[test]
    fn per_flow_keeps_order() {
        let specs = EdgeLinks::from(vec![edge(5), edge(25)]).resolve(2).unwrap();
        assert_eq!(specs[0].delay, Millisecs::new(5).into());
        assert_eq!(specs[1].delay, Millisecs::new(25).into());
    }

    #[test]
    fn per_flow_length_mismatch_fails() {
        let res = EdgeLinks::from(vec![edge(5), edge(25)]).resolve(3);
        assert!(matches!(
            res,
            Err(ConfigError::EdgeLinkCount {
                expected: 3,
                got: 2
            })
        ));
    }

    #[test]
    fn zero_rate_fails() {
        let spec = LinkSpec::new(BitsPerSec::ZERO, Millisecs::new(5));
        assert!(matches!(
            EdgeLinks::from(spec).resolve(1),
            Err(ConfigError::NonPositiveRate)
        ));
    }
}
