use crate::{Result, error::manifest_error};
use alloc::string::String;
use serde::Deserialize;

/// Optional per-extension metadata stored next to the module.
///
/// ```json
/// { "name": "Weather", "version": "1.2.0", "entry_symbol": "weather_entry" }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Manifest {
    /// Display name. The directory name is used when absent.
    pub name: Option<String>,
    pub version: Option<String>,
    /// Overrides the manager's default entry symbol.
    pub entry_symbol: Option<String>,
}

impl Manifest {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| manifest_error(alloc::format!("{e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_manifests() {
        let m = Manifest::parse(br#"{"name":"Weather","entry_symbol":"weather_entry"}"#).unwrap();
        assert_eq!(m.name.as_deref(), Some("Weather"));
        assert_eq!(m.version, None);
        assert_eq!(m.entry_symbol.as_deref(), Some("weather_entry"));
        assert_eq!(Manifest::parse(b"{}").unwrap(), Manifest::default());
        assert!(matches!(
            Manifest::parse(b"{\"name\": 3}"),
            Err(crate::Error::Manifest { .. })
        ));
    }
}
