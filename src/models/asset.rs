use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Readiness of an asset for the next stage of the migration pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetReadiness {
    NotReady,
    Ready,
}

impl AssetReadiness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotReady => "not_ready",
            Self::Ready => "ready",
        }
    }
}

impl fmt::Display for AssetReadiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AssetReadiness {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_ready" => Ok(Self::NotReady),
            "ready" => Ok(Self::Ready),
            _ => Err(format!("Invalid asset readiness: {s}")),
        }
    }
}

/// Projection of an asset produced by a discovery flow.
/// Only the fields the phase hand-off touches are modelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowAsset {
    pub asset_id: Uuid,
    /// Discovery flow that produced the asset
    pub flow_id: Uuid,
    pub name: String,
    pub current_phase: Option<String>,
    /// Forward pointer to the downstream flow that owns the asset next
    pub assessment_flow_id: Option<Uuid>,
    pub readiness: AssetReadiness,
}
