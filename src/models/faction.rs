use crate::errors::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The three playable factions.
///
/// Wire form is the canonical lowercase name; display form is capitalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Faction {
    Arm = 0,
    Core = 1,
    Gok = 2,
}

pub const FACTIONS: [Faction; 3] = [Faction::Arm, Faction::Core, Faction::Gok];

impl Faction {
    pub fn from_value(value: i64) -> Result<Self, AppError> {
        match value {
            0 => Ok(Faction::Arm),
            1 => Ok(Faction::Core),
            2 => Ok(Faction::Gok),
            other => Err(AppError::InvalidInput(format!("Unknown faction: {other}"))),
        }
    }

    pub fn capitalized(&self) -> &'static str {
        match self {
            Faction::Arm => "Arm",
            Faction::Core => "Core",
            Faction::Gok => "GoK",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Faction::Arm => "arm",
            Faction::Core => "core",
            Faction::Gok => "gok",
        }
    }
}

impl FromStr for Faction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "arm" => Ok(Faction::Arm),
            "core" => Ok(Faction::Core),
            "gok" => Ok(Faction::Gok),
            other => Err(AppError::InvalidInput(format!("Unknown faction: {other}"))),
        }
    }
}

impl fmt::Display for Faction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.capitalized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("ARM".parse::<Faction>().unwrap(), Faction::Arm);
        assert_eq!("Core".parse::<Faction>().unwrap(), Faction::Core);
        assert_eq!("GoK".parse::<Faction>().unwrap(), Faction::Gok);
        assert!("aliens".parse::<Faction>().is_err());
    }

    #[test]
    fn wire_form_is_lowercase() {
        assert_eq!(serde_json::to_string(&Faction::Gok).unwrap(), "\"gok\"");
        let parsed: Faction = serde_json::from_str("\"core\"").unwrap();
        assert_eq!(parsed, Faction::Core);
    }

    #[test]
    fn display_is_capitalized() {
        assert_eq!(Faction::Arm.to_string(), "Arm");
        assert_eq!(Faction::Gok.to_string(), "GoK");
    }

    #[test]
    fn numeric_values_round_trip() {
        for faction in FACTIONS {
            assert_eq!(Faction::from_value(faction as i64).unwrap(), faction);
        }
    }
}
