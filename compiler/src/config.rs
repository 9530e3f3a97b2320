use crate::error::KdlError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_NESTING_DEPTH: usize = 16;
pub const DEFAULT_FIRST_AUTO_ID: i64 = 128;

/// Options for one compile. Loadable from JSON; missing keys keep their
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompileOptions {
    /// Parse and validate everything but produce no resources.
    pub suppress_resources: bool,
    /// Maximum depth of inline `new` declarations.
    pub max_nesting_depth: usize,
    /// Directory imports resolve against. Defaults to the directory of the
    /// source file being compiled.
    pub import_root: Option<PathBuf>,
    /// Lowest id handed out for `#auto` references.
    pub first_auto_id: i64,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            suppress_resources: false,
            max_nesting_depth:  DEFAULT_MAX_NESTING_DEPTH,
            import_root:        None,
            first_auto_id:      DEFAULT_FIRST_AUTO_ID,
        }
    }
}

impl CompileOptions {
    pub fn from_json(text: &str) -> Result<Self, KdlError> {
        serde_json::from_str(text).map_err(|e| KdlError::ConfigError(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, KdlError> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| KdlError::ConfigError(format!("{}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_keep_defaults() {
        let options = CompileOptions::from_json(r#"{ "first_auto_id": 1000 }"#).unwrap();
        assert_eq!(options.first_auto_id, 1000);
        assert_eq!(options.max_nesting_depth, DEFAULT_MAX_NESTING_DEPTH);
        assert!(!options.suppress_resources);
        assert_eq!(options.import_root, None);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = CompileOptions::from_json(r#"{ "suppress": true }"#).unwrap_err();
        assert!(matches!(err, KdlError::ConfigError(_)));
    }
}
