//! Optional JSON file with depth-map parameters.
//!
//! Every field may be omitted. Values given on the command line win over the
//! file, and the file wins over the built-in defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::params::StereoParams;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StereoConfig {
    pub im_height: Option<i64>,
    pub im_width: Option<i64>,
    pub max_disparity: Option<i64>,
    pub block_size: Option<i64>,
    pub p1: Option<i64>,
    pub p2: Option<i64>,
    pub lambda: Option<f64>,
    pub sigma: Option<f64>,
}

impl StereoConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Configuration(format!("invalid config file {}: {e}", path.display())))
    }

    /// Fills every field `self` leaves unset from `fallback`.
    pub fn or(self, fallback: StereoConfig) -> StereoConfig {
        StereoConfig {
            im_height: self.im_height.or(fallback.im_height),
            im_width: self.im_width.or(fallback.im_width),
            max_disparity: self.max_disparity.or(fallback.max_disparity),
            block_size: self.block_size.or(fallback.block_size),
            p1: self.p1.or(fallback.p1),
            p2: self.p2.or(fallback.p2),
            lambda: self.lambda.or(fallback.lambda),
            sigma: self.sigma.or(fallback.sigma),
        }
    }

    pub fn into_params(self) -> StereoParams {
        let defaults = StereoParams::default();
        StereoParams {
            im_height: self.im_height.unwrap_or(defaults.im_height),
            im_width: self.im_width.unwrap_or(defaults.im_width),
            max_disparity: self.max_disparity.unwrap_or(defaults.max_disparity),
            block_size: self.block_size.unwrap_or(defaults.block_size),
            p1: self.p1.or(defaults.p1),
            p2: self.p2.or(defaults.p2),
            lambda: self.lambda.unwrap_or(defaults.lambda),
            sigma: self.sigma.unwrap_or(defaults.sigma),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_overrides_file_overrides_defaults() {
        let file: StereoConfig = serde_json::from_str(r#"{ "block_size": 5, "lambda": 100.0 }"#).unwrap();
        let cli = StereoConfig {
            lambda: Some(42.0),
            ..Default::default()
        };
        let params = cli.or(file).into_params();
        assert_eq!(params.block_size, 5);
        assert_eq!(params.lambda, 42.0);
        assert_eq!(params.max_disparity, 160);
        assert_eq!(params.p1, None);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let parsed: std::result::Result<StereoConfig, _> = serde_json::from_str(r#"{ "blocksize": 5 }"#);
        assert!(parsed.is_err());
    }
}
