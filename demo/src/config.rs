// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// The contents of `app.toml`. Every section and key is optional.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub button: Button,
    #[serde(default)]
    pub store: Store,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct Button {
    /// Holds strictly longer than this count as a long press.
    pub threshold_ms: u64,
}

impl Default for Button {
    fn default() -> Self {
        Self {
            threshold_ms: long_press::DEFAULT_THRESHOLD_US / 1000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct Store {
    pub path: PathBuf,
    pub format_version: u32,
}

impl Default for Store {
    fn default() -> Self {
        Self {
            path: PathBuf::from("nvs"),
            format_version: 1,
        }
    }
}

impl Config {
    pub fn from_file(cfg: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(cfg)
            .with_context(|| format!("could not read {}", cfg.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("bad config in {}", cfg.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.button.threshold_ms == 0 {
            bail!("button.threshold-ms must be at least 1");
        }
        if self.button.threshold_ms.checked_mul(1000).is_none() {
            bail!(
                "button.threshold-ms of {} is out of range",
                self.button.threshold_ms
            );
        }
        Ok(())
    }

    /// The long-press threshold in microseconds, the unit of the button clock.
    pub fn threshold_us(&self) -> u64 {
        self.button.threshold_ms.saturating_mul(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.threshold_us(), long_press::DEFAULT_THRESHOLD_US);
        assert_eq!(config.store.path, Path::new("nvs"));
        assert_eq!(config.store.format_version, 1);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [store]
            format-version = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.store.format_version, 3);
        assert_eq!(config.store.path, Path::new("nvs"));
        assert_eq!(config.button, Button::default());
    }

    #[test]
    fn full_file() {
        let config = Config::parse(
            r#"
            [button]
            threshold-ms = 250

            [store]
            path = "/var/tmp/nvs"
            format-version = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.threshold_us(), 250_000);
        assert_eq!(config.store.path, Path::new("/var/tmp/nvs"));
        assert_eq!(config.store.format_version, 2);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::parse("[button]\nthreshold = 5\n").is_err());
        assert!(Config::parse("[buton]\nthreshold-ms = 5\n").is_err());
        assert!(Config::parse("verbose = true\n").is_err());
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let err = Config::parse("[button]\nthreshold-ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("threshold-ms"));
    }

    #[test]
    fn app_toml_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("app.toml");
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config, Config::default());
    }
}
