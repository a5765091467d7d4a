//! Transformation style presets.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// The styles a drawing can be transformed into. Closed set; unknown names
/// are rejected at the boundary before any work starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    Cartoon,
    Pixar,
    Realistic,
}

impl Style {
    pub const ALL: [Style; 3] = [Style::Cartoon, Style::Pixar, Style::Realistic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Style::Cartoon => "cartoon",
            Style::Pixar => "pixar",
            Style::Realistic => "realistic",
        }
    }
}

impl core::fmt::Display for Style {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Style {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cartoon" => Ok(Style::Cartoon),
            "pixar" => Ok(Style::Pixar),
            "realistic" => Ok(Style::Realistic),
            other => Err(DomainError::validation(format!(
                "unknown style '{other}', must be one of: cartoon, pixar, realistic"
            ))),
        }
    }
}
