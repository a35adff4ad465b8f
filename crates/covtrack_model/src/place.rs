//! The place hierarchy.

use crate::error::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Depth of a place in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceLevel {
    /// The whole world.
    World,
    /// A country.
    Country,
    /// A region inside a country.
    Region,
    /// A sub-region inside a region.
    SubRegion,
}

impl PlaceLevel {
    /// Level of the direct children, if this level has any.
    pub fn child(&self) -> Option<PlaceLevel> {
        match self {
            PlaceLevel::World => Some(PlaceLevel::Country),
            PlaceLevel::Country => Some(PlaceLevel::Region),
            PlaceLevel::Region => Some(PlaceLevel::SubRegion),
            PlaceLevel::SubRegion => None,
        }
    }
}

/// A node of the strict hierarchy world ⊃ country ⊃ region ⊃ sub-region.
///
/// Identifiers are the upstream slugs (`spain`, `madrid`, ...). A record
/// stored for one place never stands in for its children.
///
/// The textual form is a slash-separated path: `world`, `spain`,
/// `spain/madrid`, `spain/madrid/alcala`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum Place {
    /// The whole world.
    World,
    /// A country.
    Country {
        /// Country id.
        country: String,
    },
    /// A region of a country.
    Region {
        /// Country id.
        country: String,
        /// Region id.
        region: String,
    },
    /// A sub-region of a region.
    SubRegion {
        /// Country id.
        country: String,
        /// Region id.
        region: String,
        /// Sub-region id.
        sub_region: String,
    },
}

impl Place {
    /// Creates a country place.
    pub fn country(country: impl Into<String>) -> Self {
        Place::Country {
            country: country.into(),
        }
    }

    /// Creates a region place.
    pub fn region(country: impl Into<String>, region: impl Into<String>) -> Self {
        Place::Region {
            country: country.into(),
            region: region.into(),
        }
    }

    /// Creates a sub-region place.
    pub fn sub_region(
        country: impl Into<String>,
        region: impl Into<String>,
        sub_region: impl Into<String>,
    ) -> Self {
        Place::SubRegion {
            country: country.into(),
            region: region.into(),
            sub_region: sub_region.into(),
        }
    }

    /// Returns the hierarchy level.
    pub fn level(&self) -> PlaceLevel {
        match self {
            Place::World => PlaceLevel::World,
            Place::Country { .. } => PlaceLevel::Country,
            Place::Region { .. } => PlaceLevel::Region,
            Place::SubRegion { .. } => PlaceLevel::SubRegion,
        }
    }

    /// Returns the direct parent; `None` for the world.
    pub fn parent(&self) -> Option<Place> {
        match self {
            Place::World => None,
            Place::Country { .. } => Some(Place::World),
            Place::Region { country, .. } => Some(Place::country(country.clone())),
            Place::SubRegion {
                country, region, ..
            } => Some(Place::region(country.clone(), region.clone())),
        }
    }

    /// True when `self` is a direct child of `parent`.
    pub fn is_child_of(&self, parent: &Place) -> bool {
        self.parent().as_ref() == Some(parent)
    }

    /// True when this place can have children.
    pub fn has_children(&self) -> bool {
        self.level().child().is_some()
    }

    /// Last path segment (`world` for the world).
    pub fn id(&self) -> &str {
        match self {
            Place::World => "world",
            Place::Country { country } => country,
            Place::Region { region, .. } => region,
            Place::SubRegion { sub_region, .. } => sub_region,
        }
    }

    /// Parses the slash-separated path form.
    pub fn parse(text: &str) -> ModelResult<Self> {
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("world") {
            return Ok(Place::World);
        }

        let parts: Vec<&str> = trimmed.split('/').collect();
        if parts.iter().any(|p| p.trim().is_empty()) {
            return Err(ModelError::InvalidPlace(text.to_string()));
        }
        // `world` is the root, never a country segment
        if parts.len() > 1 && parts[0].eq_ignore_ascii_case("world") {
            return Err(ModelError::InvalidPlace(text.to_string()));
        }

        match parts.as_slice() {
            [country] => Ok(Place::country(*country)),
            [country, region] => Ok(Place::region(*country, *region)),
            [country, region, sub_region] => Ok(Place::sub_region(*country, *region, *sub_region)),
            _ => Err(ModelError::InvalidPlace(text.to_string())),
        }
    }
}

impl FromStr for Place {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Place::World => write!(f, "world"),
            Place::Country { country } => write!(f, "{country}"),
            Place::Region { country, region } => write!(f, "{country}/{region}"),
            Place::SubRegion {
                country,
                region,
                sub_region,
            } => write!(f, "{country}/{region}/{sub_region}"),
        }
    }
}
