//! GRIB2 parameter and level lookup tables.
//!
//! Translates (discipline, category, number) codes into short variable
//! names. Some centres reuse one code for different variables depending on
//! the fixed surface (ECMWF encodes both `sp` and `msl` as 0/3/0), so a name
//! can also be registered for a specific level type and level value.

use std::collections::HashMap;

/// Lookup key for parameter: (discipline, category, number)
pub type ParamKey = (u8, u8, u8);

/// Level-specific key: parameter, level type, optional exact level value.
type LevelParamKey = (ParamKey, u8, Option<u32>);

/// Level description - either static text or a template with {value} placeholder
#[derive(Debug, Clone)]
pub enum LevelDescription {
    /// Static description (e.g., "sfc", "msl")
    Static(String),
    /// Template with {value} placeholder (e.g., "{value_mb}mb", "{value}m")
    Template(String),
}

impl LevelDescription {
    /// Format the level description, substituting placeholders if it's a template.
    ///
    /// Supported placeholders:
    /// - `{value}` - Raw level value (e.g., 100000 for 1000 mb in Pa)
    /// - `{value_mb}` - Value converted from Pa to mb (divided by 100)
    pub fn format(&self, value: u32) -> String {
        match self {
            LevelDescription::Static(s) => s.clone(),
            LevelDescription::Template(t) => {
                let result = t.replace("{value}", &value.to_string());
                result.replace("{value_mb}", &(value / 100).to_string())
            }
        }
    }
}

/// GRIB2 parameter and level lookup tables.
#[derive(Debug, Clone, Default)]
pub struct Grib2Tables {
    parameters: HashMap<ParamKey, String>,
    level_parameters: HashMap<LevelParamKey, String>,
    levels: HashMap<u8, LevelDescription>,
}

impl Grib2Tables {
    pub fn new() -> Self {
        Self::default()
    }

    /// ECMWF short names, as written by MARS retrievals.
    pub fn ecmwf() -> Self {
        let mut t = Self::new();

        // Pressure-level and generic names
        t.add_parameter(0, 0, 0, "t");
        t.add_parameter(0, 1, 0, "q");
        t.add_parameter(0, 1, 1, "r");
        t.add_parameter(0, 1, 8, "tp");
        t.add_parameter(0, 2, 2, "u");
        t.add_parameter(0, 2, 3, "v");
        t.add_parameter(0, 2, 8, "w");
        t.add_parameter(0, 3, 4, "z");
        t.add_parameter(0, 6, 1, "tcc");
        t.add_parameter(2, 0, 0, "lsm");

        // Surface names
        t.add_level_parameter((0, 0, 0), 103, Some(2), "2t");
        t.add_level_parameter((0, 0, 6), 103, Some(2), "2d");
        t.add_level_parameter((0, 2, 2), 103, Some(10), "10u");
        t.add_level_parameter((0, 2, 3), 103, Some(10), "10v");
        t.add_level_parameter((0, 0, 0), 1, None, "skt");
        t.add_level_parameter((0, 3, 0), 1, None, "sp");
        t.add_level_parameter((0, 3, 0), 101, None, "msl");
        t.add_level_parameter((0, 4, 9), 1, None, "ssr");
        t.add_level_parameter((0, 5, 5), 1, None, "str");

        t
    }

    /// NCEP short names with the level descriptions used as GFS suffixes.
    pub fn ncep() -> Self {
        let mut t = Self::new();

        t.add_parameter(0, 0, 0, "TMP");
        t.add_parameter(0, 0, 6, "DPT");
        t.add_parameter(0, 1, 0, "SPFH");
        t.add_parameter(0, 1, 1, "RH");
        t.add_parameter(0, 1, 8, "APCP");
        t.add_parameter(0, 2, 2, "UGRD");
        t.add_parameter(0, 2, 3, "VGRD");
        t.add_parameter(0, 2, 8, "VVEL");
        t.add_parameter(0, 3, 0, "PRES");
        t.add_parameter(0, 3, 1, "PRMSL");
        t.add_parameter(0, 3, 5, "HGT");
        t.add_parameter(0, 4, 7, "DSWRF");
        t.add_parameter(0, 5, 3, "DLWRF");
        t.add_parameter(0, 6, 1, "TCDC");
        t.add_parameter(2, 0, 0, "LAND");

        t.add_level(1, LevelDescription::Static("sfc".to_string()));
        t.add_level(100, LevelDescription::Template("{value_mb}mb".to_string()));
        t.add_level(101, LevelDescription::Static("msl".to_string()));
        t.add_level(103, LevelDescription::Template("{value}m".to_string()));

        t
    }

    /// Add a parameter mapping valid on every level.
    pub fn add_parameter(&mut self, discipline: u8, category: u8, number: u8, name: impl Into<String>) {
        self.parameters
            .insert((discipline, category, number), name.into());
    }

    /// Add a parameter mapping that only applies on one level type, and
    /// optionally only at one level value.
    pub fn add_level_parameter(
        &mut self,
        key: ParamKey,
        level_type: u8,
        level_value: Option<u32>,
        name: impl Into<String>,
    ) {
        self.level_parameters
            .insert((key, level_type, level_value), name.into());
    }

    /// Add a level description mapping
    pub fn add_level(&mut self, level_type: u8, description: LevelDescription) {
        self.levels.insert(level_type, description);
    }

    /// Look up parameter short name by GRIB2 codes alone.
    ///
    /// Returns "p{discipline}_{category}_{number}" if not found.
    pub fn get_parameter_name(&self, discipline: u8, category: u8, number: u8) -> String {
        self.parameters
            .get(&(discipline, category, number))
            .cloned()
            .unwrap_or_else(|| fallback_name((discipline, category, number)))
    }

    /// Look up the name of a parameter on a given fixed surface.
    ///
    /// Most specific entry wins: exact level value, then level type, then
    /// the level-independent name.
    pub fn get_level_parameter_name(&self, key: ParamKey, level_type: u8, level_value: f64) -> String {
        let exact = level_value_key(level_value);
        exact
            .and_then(|v| self.level_parameters.get(&(key, level_type, Some(v))))
            .or_else(|| self.level_parameters.get(&(key, level_type, None)))
            .cloned()
            .unwrap_or_else(|| self.get_parameter_name(key.0, key.1, key.2))
    }

    /// Look up level description by type code and value.
    pub fn get_level_description(&self, level_type: u8, level_value: u32) -> Option<String> {
        self.levels.get(&level_type).map(|d| d.format(level_value))
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len() + self.level_parameters.len()
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty() && self.level_parameters.is_empty() && self.levels.is_empty()
    }
}

fn fallback_name((discipline, category, number): ParamKey) -> String {
    format!("p{}_{}_{}", discipline, category, number)
}

/// Level values used as table keys must be whole, non-negative numbers.
fn level_value_key(value: f64) -> Option<u32> {
    if value >= 0.0 && value.fract() == 0.0 && value <= f64::from(u32::MAX) {
        Some(value as u32)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ecmwf_surface_names() {
        let tables = Grib2Tables::ecmwf();

        assert_eq!(tables.get_level_parameter_name((0, 0, 0), 103, 2.0), "2t");
        assert_eq!(tables.get_level_parameter_name((0, 2, 2), 103, 10.0), "10u");
        assert_eq!(tables.get_level_parameter_name((0, 3, 0), 1, 0.0), "sp");
        assert_eq!(tables.get_level_parameter_name((0, 3, 0), 101, 0.0), "msl");
        assert_eq!(tables.get_level_parameter_name((0, 3, 4), 1, 0.0), "z");
        assert_eq!(tables.get_level_parameter_name((2, 0, 0), 1, 0.0), "lsm");
    }

    #[test]
    fn test_ecmwf_pressure_names() {
        let tables = Grib2Tables::ecmwf();

        assert_eq!(tables.get_level_parameter_name((0, 0, 0), 100, 50000.0), "t");
        assert_eq!(tables.get_level_parameter_name((0, 2, 8), 100, 85000.0), "w");
        assert_eq!(tables.get_level_parameter_name((0, 3, 4), 100, 50000.0), "z");
    }

    #[test]
    fn test_level_value_must_match_exactly() {
        let tables = Grib2Tables::ecmwf();

        // Temperature at 100 m is not "2t"
        assert_eq!(tables.get_level_parameter_name((0, 0, 0), 103, 100.0), "t");
        assert_eq!(tables.get_level_parameter_name((0, 0, 0), 103, 2.5), "t");
    }

    #[test]
    fn test_parameter_not_found() {
        let tables = Grib2Tables::ecmwf();

        assert_eq!(tables.get_parameter_name(99, 99, 99), "p99_99_99");
        assert_eq!(tables.get_level_parameter_name((0, 0, 99), 1, 0.0), "p0_0_99");
    }

    #[test]
    fn test_ncep_level_descriptions() {
        let tables = Grib2Tables::ncep();

        assert_eq!(tables.get_level_description(1, 0).as_deref(), Some("sfc"));
        assert_eq!(tables.get_level_description(101, 0).as_deref(), Some("msl"));
        assert_eq!(tables.get_level_description(103, 2).as_deref(), Some("2m"));
        assert_eq!(
            tables.get_level_description(100, 50000).as_deref(),
            Some("500mb")
        );
        assert_eq!(tables.get_level_description(200, 0), None);
    }

    #[test]
    fn test_empty_tables() {
        let tables = Grib2Tables::new();

        assert_eq!(tables.parameter_count(), 0);
        assert_eq!(tables.level_count(), 0);
        assert!(tables.is_empty());
        assert_eq!(tables.get_parameter_name(0, 0, 0), "p0_0_0");
    }
}
