//! Resolved run options: command-line arguments layered over the tree
//! config, with range validation.

use std::collections::BTreeSet;

use anyhow::ensure;

use crate::config::Config;
use crate::lab::SchedulerMode;
use crate::orchestrator::OrchestratorConfig;
use crate::swift::RunnerKind;
use crate::Args;
use crate::Result;

#[derive(Debug, Clone, Copy, Eq, PartialEq, clap::ValueEnum)]
pub enum OutputMode {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub jobs: usize,
    pub scheduler: SchedulerMode,
    pub runner_kind: RunnerKind,
    pub test_filter: Option<String>,
    /// Line allowlist from repeated `--line`.
    pub lines: Option<BTreeSet<u32>>,
    pub exclude_dirs: Vec<String>,
    pub max_build_error_ratio: f64,
    pub require_clean: bool,
    pub output: OutputMode,
    pub orchestrator: OrchestratorConfig,
}

impl Options {
    pub fn new(args: &Args, config: &Config) -> Result<Options> {
        let defaults = OrchestratorConfig::default();
        let orchestrator = OrchestratorConfig {
            timeout_multiplier: args
                .timeout_multiplier
                .or(config.timeout_multiplier)
                .unwrap_or(defaults.timeout_multiplier),
            timeout_retries: args
                .timeout_retries
                .or(config.timeout_retries)
                .unwrap_or(defaults.timeout_retries),
            build_first_sample_size: args
                .build_first_sample_size
                .or(config.build_first_sample_size)
                .unwrap_or(defaults.build_first_sample_size),
            build_first_error_ratio: args
                .build_first_error_ratio
                .or(config.build_first_error_ratio)
                .unwrap_or(defaults.build_first_error_ratio),
        };
        ensure!(
            orchestrator.timeout_multiplier > 0.0,
            "timeout multiplier must be positive"
        );
        ensure!(
            orchestrator.build_first_sample_size >= 1,
            "build-first sample size must be at least 1"
        );
        ensure!(
            (0.0..=1.0).contains(&orchestrator.build_first_error_ratio),
            "build-first error ratio must be between 0 and 1"
        );
        let max_build_error_ratio = args
            .max_build_error_ratio
            .or(config.max_build_error_ratio)
            .unwrap_or(1.0);
        ensure!(
            (0.0..=1.0).contains(&max_build_error_ratio),
            "max build error ratio must be between 0 and 1"
        );

        let mut exclude_dirs = config.exclude_dirs.clone();
        exclude_dirs.extend(args.exclude_dir.iter().cloned());

        Ok(Options {
            jobs: args.jobs.or(config.jobs).unwrap_or(1).max(1),
            scheduler: args
                .scheduler
                .or(config.scheduler)
                .unwrap_or(SchedulerMode::Dynamic),
            runner_kind: args.runner.or(config.runner).unwrap_or(RunnerKind::Swift),
            test_filter: args.test_filter.clone().or_else(|| config.test_filter.clone()),
            lines: if args.line.is_empty() {
                None
            } else {
                Some(args.line.iter().copied().collect())
            },
            exclude_dirs,
            max_build_error_ratio,
            require_clean: args.require_clean,
            output: args.output,
            orchestrator,
        })
    }

    #[cfg(test)]
    pub fn from_arg_strs<I, S>(arg_strs: I) -> Options
    where
        I: IntoIterator<Item = S>,
        S: Into<std::ffi::OsString> + Clone,
    {
        use clap::Parser;
        let args = Args::parse_from(arg_strs);
        Options::new(&args, &Config::default()).expect("options from test args")
    }
}
