//! Per-tree configuration from `.mutate4swift.toml` in the package root.
//!
//! Everything here can also be set on the command line; arguments win.

use std::fs::read_to_string;
use std::str::FromStr;

use anyhow::Context;
use camino::Utf8Path;
use serde::Deserialize;

use crate::lab::SchedulerMode;
use crate::swift::RunnerKind;
use crate::Result;

pub const CONFIG_FILE_NAME: &str = ".mutate4swift.toml";

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Extra directory names under `Sources/` to exclude from mutation.
    pub exclude_dirs: Vec<String>,
    pub jobs: Option<usize>,
    pub scheduler: Option<SchedulerMode>,
    pub runner: Option<RunnerKind>,
    /// Test filter applied to every file, instead of scope resolution.
    pub test_filter: Option<String>,
    pub timeout_multiplier: Option<f64>,
    pub timeout_retries: Option<usize>,
    pub build_first_sample_size: Option<usize>,
    pub build_first_error_ratio: Option<f64>,
    pub max_build_error_ratio: Option<f64>,
}

impl Config {
    /// Read the config from the package root; a missing file is the default.
    pub fn read_tree_config(root: &Utf8Path) -> Result<Config> {
        let path = root.join(CONFIG_FILE_NAME);
        if path.is_file() {
            read_to_string(&path)
                .with_context(|| format!("read config {path}"))?
                .parse()
                .with_context(|| format!("parse config {path}"))
        } else {
            Ok(Config::default())
        }
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Config> {
        toml::from_str(s).context("parse toml configuration")
    }
}

#[cfg(test)]
mod test {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parse_all_keys() {
        let config: Config = indoc! {r#"
            exclude_dirs = ["ThirdParty"]
            jobs = 4
            scheduler = "dynamic"
            runner = "swift"
            test_filter = "AppTests"
            timeout_multiplier = 10.0
            timeout_retries = 2
            build_first_sample_size = 5
            build_first_error_ratio = 0.4
            max_build_error_ratio = 0.2
        "#}
        .parse()
        .unwrap();
        assert_eq!(config.exclude_dirs, ["ThirdParty"]);
        assert_eq!(config.jobs, Some(4));
        assert_eq!(config.scheduler, Some(SchedulerMode::Dynamic));
        assert_eq!(config.runner, Some(RunnerKind::Swift));
        assert_eq!(config.timeout_multiplier, Some(10.0));
        assert_eq!(config.max_build_error_ratio, Some(0.2));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: Result<Config> = "unknown_knob = true\n".parse();
        assert!(result.is_err());
    }

    #[test]
    fn missing_file_is_the_default() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        assert_eq!(Config::read_tree_config(root).unwrap(), Config::default());
    }
}
