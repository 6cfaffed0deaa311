//! Level types and their fixed group names.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RefsError;

pub const SURFACE_GROUP: &str = "atm2d";
pub const PRESSURE_GROUP: &str = "atm3d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelType {
    Surface,
    PressureLevel,
}

impl LevelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LevelType::Surface => "surface",
            LevelType::PressureLevel => "pressure_level",
        }
    }

    /// Top-level manifest group holding this level type.
    pub fn group_name(&self) -> &'static str {
        match self {
            LevelType::Surface => SURFACE_GROUP,
            LevelType::PressureLevel => PRESSURE_GROUP,
        }
    }
}

impl FromStr for LevelType {
    type Err = RefsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "surface" => Ok(LevelType::Surface),
            "pressure_level" => Ok(LevelType::PressureLevel),
            other => Err(RefsError::schema(format!(
                "unrecognized level_type '{}' (expected surface or pressure_level)",
                other
            ))),
        }
    }
}

impl fmt::Display for LevelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level_type() {
        assert_eq!("surface".parse::<LevelType>().unwrap(), LevelType::Surface);
        assert_eq!(
            "pressure_level".parse::<LevelType>().unwrap(),
            LevelType::PressureLevel
        );
        assert!(matches!(
            "model_level".parse::<LevelType>(),
            Err(RefsError::Schema(_))
        ));
    }

    #[test]
    fn test_group_names() {
        assert_eq!(LevelType::Surface.group_name(), "atm2d");
        assert_eq!(LevelType::PressureLevel.group_name(), "atm3d");
        assert_eq!(LevelType::PressureLevel.to_string(), "pressure_level");
    }
}
