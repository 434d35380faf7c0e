//! Taint types and list helpers following Kubernetes taint semantics
//!
//! Two taints are the same slot when key and effect match; the value is
//! payload. Adding a taint into an occupied slot overwrites it, the way
//! `kubectl taint --overwrite` does.

use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::core::v1::Taint as K8sTaint;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Standard taint effects
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

impl TaintEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaintEffect::NoSchedule => "NoSchedule",
            TaintEffect::PreferNoSchedule => "PreferNoSchedule",
            TaintEffect::NoExecute => "NoExecute",
        }
    }
}

impl fmt::Display for TaintEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaintEffect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NoSchedule" => Ok(TaintEffect::NoSchedule),
            "PreferNoSchedule" => Ok(TaintEffect::PreferNoSchedule),
            "NoExecute" => Ok(TaintEffect::NoExecute),
            other => Err(Error::ParseError(format!("unknown taint effect '{other}'"))),
        }
    }
}

/// A node taint
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Taint {
    pub key: String,
    pub value: String,
    pub effect: TaintEffect,
}

impl Taint {
    pub fn new(key: impl Into<String>, value: impl Into<String>, effect: TaintEffect) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            effect,
        }
    }

    /// Same key and effect, regardless of value
    pub fn same_slot(&self, other: &Taint) -> bool {
        self.key == other.key && self.effect == other.effect
    }

    /// Whether a raw Kubernetes taint occupies the same slot
    pub fn matches_k8s(&self, other: &K8sTaint) -> bool {
        self.key == other.key && self.effect.as_str() == other.effect
    }
}

/// Renders as `key=value:Effect`, the kubectl notation
impl fmt::Display for Taint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.is_empty() {
            write!(f, "{}:{}", self.key, self.effect)
        } else {
            write!(f, "{}={}:{}", self.key, self.value, self.effect)
        }
    }
}

impl TryFrom<&K8sTaint> for Taint {
    type Error = Error;

    fn try_from(taint: &K8sTaint) -> Result<Self> {
        Ok(Taint {
            key: taint.key.clone(),
            value: taint.value.clone().unwrap_or_default(),
            effect: taint.effect.parse()?,
        })
    }
}

impl From<&Taint> for K8sTaint {
    fn from(taint: &Taint) -> Self {
        K8sTaint {
            key: taint.key.clone(),
            value: (!taint.value.is_empty()).then(|| taint.value.clone()),
            effect: taint.effect.as_str().to_string(),
            time_added: None,
        }
    }
}

/// Find the taint occupying the slot of `key` and `effect`
pub fn find_taint<'a>(taints: &'a [Taint], key: &str, effect: TaintEffect) -> Option<&'a Taint> {
    taints.iter().find(|t| t.key == key && t.effect == effect)
}

/// Check for an exact match, value included
pub fn has_taint(taints: &[Taint], taint: &Taint) -> bool {
    taints.iter().any(|t| t == taint)
}

/// Insert `taint`, overwriting a taint in the same slot.
///
/// Returns whether the list changed.
pub fn upsert_taint(taints: &mut Vec<Taint>, taint: Taint) -> bool {
    if let Some(existing) = taints.iter_mut().find(|t| t.same_slot(&taint)) {
        if *existing == taint {
            return false;
        }
        *existing = taint;
        return true;
    }
    taints.push(taint);
    true
}

/// Remove the taint in the slot of `taint`.
///
/// Returns whether anything was removed; an absent taint is not an error.
pub fn remove_taint(taints: &mut Vec<Taint>, taint: &Taint) -> bool {
    let before = taints.len();
    taints.retain(|t| !t.same_slot(taint));
    taints.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;

    fn busy() -> Taint {
        Taint::new("idle", "false", TaintEffect::NoExecute)
    }

    #[test]
    fn test_display_uses_kubectl_notation() {
        assert_eq!(busy().to_string(), "idle=false:NoExecute");
        assert_eq!(
            Taint::new("dedicated", "", TaintEffect::NoSchedule).to_string(),
            "dedicated:NoSchedule"
        );
    }

    #[test]
    fn test_effect_parsing() {
        assert_eq!("NoExecute".parse::<TaintEffect>().unwrap(), TaintEffect::NoExecute);
        assert!("Evict".parse::<TaintEffect>().is_err());
    }

    #[test]
    fn test_upsert_adds_then_overwrites() {
        let mut taints = Vec::new();
        assert!(upsert_taint(&mut taints, busy()));
        assert!(!upsert_taint(&mut taints, busy()));
        assert_eq!(taints.len(), 1);

        assert!(upsert_taint(
            &mut taints,
            Taint::new("idle", "maybe", TaintEffect::NoExecute)
        ));
        assert_eq!(taints.len(), 1);
        assert_eq!(taints[0].value, "maybe");

        // different effect is a different slot
        assert!(upsert_taint(
            &mut taints,
            Taint::new("idle", "false", TaintEffect::NoSchedule)
        ));
        assert_eq!(taints.len(), 2);
    }

    #[test]
    fn test_remove_absent_taint_is_noop() {
        let mut taints = vec![Taint::new("gpu", "true", TaintEffect::NoSchedule)];
        assert!(!remove_taint(&mut taints, &busy()));
        assert_eq!(taints.len(), 1);

        taints.push(busy());
        assert!(remove_taint(&mut taints, &busy()));
        assert!(!has_taint(&taints, &busy()));
        assert!(find_taint(&taints, "gpu", TaintEffect::NoSchedule).is_some());
    }

    #[test]
    fn test_k8s_conversion() {
        let raw = K8sTaint::from(&busy());
        assert_eq!(raw.key, "idle");
        assert_eq!(raw.value.as_deref(), Some("false"));
        assert_eq!(raw.effect, "NoExecute");
        assert!(busy().matches_k8s(&raw));

        let back = Taint::try_from(&raw).unwrap();
        assert_eq!(back, busy());
    }
}
