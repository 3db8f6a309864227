//! Swipe-candidate profiles and the search filter used to page through them.

use serde::{Deserialize, Serialize};

use crate::message::UserId;

/// A profile offered in the swipe feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateProfile {
    /// Account identifier; also the paging cursor of the search endpoint.
    pub id: UserId,
    /// Name shown on the card.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Age in years.
    #[serde(default)]
    pub age: Option<u32>,
    /// Free-text location.
    #[serde(default)]
    pub location: Option<String>,
    /// Short biography.
    #[serde(default)]
    pub bio: Option<String>,
}

/// Criteria for `GET /profiles/search`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter {
    /// Gender of the candidates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    /// Gender the candidates are interested in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interested_in: Option<String>,
    /// Minimum age, inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_age: Option<u32>,
    /// Maximum age, inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u32>,
    /// Search origin latitude.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    /// Search origin longitude.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// Search radius.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_distance_km: Option<u32>,
}

impl SearchFilter {
    /// Renders the filter as query pairs, skipping unset fields.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(v) = &self.gender {
            pairs.push(("gender", v.clone()));
        }
        if let Some(v) = &self.interested_in {
            pairs.push(("interested_in", v.clone()));
        }
        if let Some(v) = self.min_age {
            pairs.push(("min_age", v.to_string()));
        }
        if let Some(v) = self.max_age {
            pairs.push(("max_age", v.to_string()));
        }
        if let Some(v) = self.latitude {
            pairs.push(("latitude", v.to_string()));
        }
        if let Some(v) = self.longitude {
            pairs.push(("longitude", v.to_string()));
        }
        if let Some(v) = self.max_distance_km {
            pairs.push(("max_distance_km", v.to_string()));
        }
        pairs
    }
}
