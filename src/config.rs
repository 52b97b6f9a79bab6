//! Runner configuration with precedence tracking.
//!
//! Values are resolved from, lowest to highest precedence:
//! 1. Built-in defaults
//! 2. Environment variables (`TESTBRIDGE_RUNNER_BITNESS`, `TESTBRIDGE_WORKER_DIR`)
//! 3. The project's `testbridge.toml` `[runner]` section
//! 4. CLI flags
//!
//! ```toml
//! [runner]
//! bitness = "x86"
//! worker_dir = "target/debug"
//! results_dir = ".testbridge/test-results"
//! idle_timeout_secs = 5
//! handshake_timeout_secs = 10
//! ```

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

// ============================================================================
// Constants
// ============================================================================

/// Name of the project-local run-settings file.
pub const RUN_SETTINGS_FILE: &str = "testbridge.toml";

/// Environment variable selecting the worker bitness.
pub const BITNESS_ENV_VAR: &str = "TESTBRIDGE_RUNNER_BITNESS";

/// Environment variable naming the directory that holds worker executables.
pub const WORKER_DIR_ENV_VAR: &str = "TESTBRIDGE_WORKER_DIR";

/// Default results directory, relative to the project root.
pub const DEFAULT_RESULTS_DIR: &str = ".testbridge/test-results";

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Bitness
// ============================================================================

/// Which worker executable variant to launch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Bitness {
    X86,
    #[default]
    X64,
}

impl Bitness {
    /// File name (without platform suffix) of the worker for this variant.
    pub fn worker_executable_name(self) -> &'static str {
        match self {
            Bitness::X64 => "testbridge-worker",
            Bitness::X86 => "testbridge-worker-x86",
        }
    }
}

impl FromStr for Bitness {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x86" | "32" | "32bit" => Ok(Bitness::X86),
            "x64" | "64" | "64bit" | "amd64" => Ok(Bitness::X64),
            other => Err(format!("unknown bitness '{}', expected 'x86' or 'x64'", other)),
        }
    }
}

impl fmt::Display for Bitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bitness::X86 => write!(f, "x86"),
            Bitness::X64 => write!(f, "x64"),
        }
    }
}

// ============================================================================
// Configuration Sources
// ============================================================================

/// Where a configuration value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigSource {
    Default = 0,
    EnvVar = 1,
    /// From `testbridge.toml` `[runner]`.
    RunSettings = 2,
    /// From a CLI flag (highest precedence).
    CliFlag = 3,
}

/// A configuration value with its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        ConfigValue { value, source }
    }

    /// Merge with another value, preferring higher precedence.
    pub fn merge(self, other: Self) -> Self {
        if other.source >= self.source {
            other
        } else {
            self
        }
    }
}

// ============================================================================
// Run Settings File
// ============================================================================

/// Values read from the `[runner]` section of `testbridge.toml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub bitness: Option<String>,
    pub worker_dir: Option<PathBuf>,
    pub results_dir: Option<PathBuf>,
    pub idle_timeout_secs: Option<u64>,
    pub handshake_timeout_secs: Option<u64>,
}

/// Top level of `testbridge.toml`. Other tables are ignored.
#[derive(Debug, Default, Deserialize)]
struct RunSettingsFile {
    #[serde(default)]
    runner: Option<RunSettings>,
}

impl RunSettings {
    /// Load from `<project_root>/testbridge.toml`. A missing file gives empty
    /// settings; a file that is not valid TOML is `InvalidData`.
    pub fn load(project_root: &Path) -> io::Result<Self> {
        match fs::read_to_string(project_root.join(RUN_SETTINGS_FILE)) {
            Ok(content) => RunSettings::parse(&content)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(RunSettings::default()),
            Err(e) => Err(e),
        }
    }

    /// Parse the `[runner]` table of a settings document.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        let file: RunSettingsFile = toml::from_str(content)?;
        Ok(file.runner.unwrap_or_default())
    }
}

// ============================================================================
// Resolved Configuration
// ============================================================================

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub bitness: Option<Bitness>,
    pub worker_dir: Option<PathBuf>,
    pub results_dir: Option<PathBuf>,
}

/// Fully resolved runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub project_root: PathBuf,
    pub bitness: ConfigValue<Bitness>,
    pub worker_dir: Option<ConfigValue<PathBuf>>,
    pub results_dir: ConfigValue<PathBuf>,
    pub idle_timeout: ConfigValue<Duration>,
    pub handshake_timeout: ConfigValue<Duration>,
}

impl RunnerConfig {
    /// Configuration with defaults only.
    pub fn defaults(project_root: &Path) -> Self {
        RunnerConfig {
            project_root: project_root.to_path_buf(),
            bitness: ConfigValue::new(Bitness::default(), ConfigSource::Default),
            worker_dir: None,
            results_dir: ConfigValue::new(
                project_root.join(DEFAULT_RESULTS_DIR),
                ConfigSource::Default,
            ),
            idle_timeout: ConfigValue::new(DEFAULT_IDLE_TIMEOUT, ConfigSource::Default),
            handshake_timeout: ConfigValue::new(DEFAULT_HANDSHAKE_TIMEOUT, ConfigSource::Default),
        }
    }

    /// Resolve from every source, reading environment variables through
    /// `env` so callers and tests control the lookup.
    pub fn resolve<F>(
        project_root: &Path,
        settings: &RunSettings,
        cli: &CliOverrides,
        env: F,
    ) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = RunnerConfig::defaults(project_root);
        config.apply_env_vars(env);
        config.apply_run_settings(settings);
        config.apply_cli_overrides(cli);
        config
    }

    /// Resolve using the process environment and the project's run-settings
    /// file. An unreadable or malformed settings file is logged and skipped.
    pub fn load(project_root: &Path, cli: &CliOverrides) -> Self {
        let settings = RunSettings::load(project_root).unwrap_or_else(|e| {
            warn!(error = %e, "cannot read {}", RUN_SETTINGS_FILE);
            RunSettings::default()
        });
        RunnerConfig::resolve(project_root, &settings, cli, |key| std::env::var(key).ok())
    }

    pub fn bitness(&self) -> Bitness {
        self.bitness.value
    }

    pub fn worker_dir(&self) -> Option<&Path> {
        self.worker_dir.as_ref().map(|v| v.value.as_path())
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir.value
    }

    fn apply_run_settings(&mut self, settings: &RunSettings) {
        let source = ConfigSource::RunSettings;
        if let Some(bitness) = settings.bitness.as_deref().and_then(parse_bitness) {
            self.set_bitness(bitness, source);
        }
        if let Some(dir) = &settings.worker_dir {
            self.set_worker_dir(self.project_root.join(dir), source);
        }
        if let Some(dir) = &settings.results_dir {
            let value = ConfigValue::new(self.project_root.join(dir), source);
            self.results_dir = self.results_dir.clone().merge(value);
        }
        if let Some(secs) = settings.idle_timeout_secs {
            let value = ConfigValue::new(Duration::from_secs(secs), source);
            self.idle_timeout = self.idle_timeout.clone().merge(value);
        }
        if let Some(secs) = settings.handshake_timeout_secs {
            let value = ConfigValue::new(Duration::from_secs(secs), source);
            self.handshake_timeout = self.handshake_timeout.clone().merge(value);
        }
    }

    fn apply_env_vars<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bitness) = env(BITNESS_ENV_VAR).as_deref().and_then(parse_bitness) {
            self.set_bitness(bitness, ConfigSource::EnvVar);
        }
        if let Some(dir) = env(WORKER_DIR_ENV_VAR).filter(|d| !d.is_empty()) {
            self.set_worker_dir(PathBuf::from(dir), ConfigSource::EnvVar);
        }
    }

    fn apply_cli_overrides(&mut self, cli: &CliOverrides) {
        let source = ConfigSource::CliFlag;
        if let Some(bitness) = cli.bitness {
            self.set_bitness(bitness, source);
        }
        if let Some(dir) = &cli.worker_dir {
            self.set_worker_dir(dir.clone(), source);
        }
        if let Some(dir) = &cli.results_dir {
            let value = ConfigValue::new(dir.clone(), source);
            self.results_dir = self.results_dir.clone().merge(value);
        }
    }

    fn set_bitness(&mut self, bitness: Bitness, source: ConfigSource) {
        self.bitness = self.bitness.clone().merge(ConfigValue::new(bitness, source));
    }

    fn set_worker_dir(&mut self, dir: PathBuf, source: ConfigSource) {
        let value = ConfigValue::new(dir, source);
        self.worker_dir = Some(match self.worker_dir.take() {
            Some(current) => current.merge(value),
            None => value,
        });
    }
}

/// Unknown values fall back to the lower-precedence value and are logged.
fn parse_bitness(value: &str) -> Option<Bitness> {
    match value.parse() {
        Ok(bitness) => Some(bitness),
        Err(reason) => {
            warn!(%reason, "ignoring bitness setting");
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    mod bitness {
        use super::*;

        #[test]
        fn parses_common_spellings() {
            assert_eq!("x86".parse::<Bitness>().unwrap(), Bitness::X86);
            assert_eq!(" X64 ".parse::<Bitness>().unwrap(), Bitness::X64);
            assert!("arm".parse::<Bitness>().is_err());
        }

        #[test]
        fn executable_names() {
            assert_eq!(Bitness::X64.worker_executable_name(), "testbridge-worker");
            assert_eq!(Bitness::X86.worker_executable_name(), "testbridge-worker-x86");
        }
    }

    mod run_settings {
        use super::*;

        #[test]
        fn parses_runner_section_only() {
            let content = r#"
[other]
bitness = "x86"

[runner]
bitness = "x86"   # 32-bit worker
worker_dir = "bin"
idle_timeout_secs = 2

[later]
results_dir = "ignored"
"#;
            let settings = RunSettings::parse(content).unwrap();
            assert_eq!(settings.bitness.as_deref(), Some("x86"));
            assert_eq!(settings.worker_dir, Some(PathBuf::from("bin")));
            assert_eq!(settings.idle_timeout_secs, Some(2));
            assert!(settings.results_dir.is_none());
        }

        #[test]
        fn literal_strings_and_inline_tables() {
            let settings = RunSettings::parse("[runner]\nbitness = 'x86'\n").unwrap();
            assert_eq!(settings.bitness.as_deref(), Some("x86"));

            let settings = RunSettings::parse("runner = { bitness = \"x86\" }\n").unwrap();
            assert_eq!(settings.bitness.as_deref(), Some("x86"));
        }

        #[test]
        fn no_runner_table_is_empty() {
            let settings = RunSettings::parse("[other]\nkey = 1\n").unwrap();
            assert_eq!(settings, RunSettings::default());
        }

        #[test]
        fn malformed_settings_are_rejected() {
            assert!(RunSettings::parse("[runner]\nidle_timeout_secs = soon\n").is_err());
            assert!(RunSettings::parse("[runner]\nidle_timeout_secs = \"soon\"\n").is_err());
        }

        #[test]
        fn missing_file_is_empty() {
            let dir = TempDir::new().unwrap();
            assert_eq!(RunSettings::load(dir.path()).unwrap(), RunSettings::default());
        }

        #[test]
        fn loads_from_project_root() {
            let dir = TempDir::new().unwrap();
            fs::write(dir.path().join(RUN_SETTINGS_FILE), "[runner]\nbitness = \"x86\"\n")
                .unwrap();
            let settings = RunSettings::load(dir.path()).unwrap();
            assert_eq!(settings.bitness.as_deref(), Some("x86"));
        }

        #[test]
        fn malformed_file_is_skipped_by_load() {
            let dir = TempDir::new().unwrap();
            fs::write(
                dir.path().join(RUN_SETTINGS_FILE),
                "[runner\nworker_dir = \"bin\"\n",
            )
            .unwrap();
            let err = RunSettings::load(dir.path()).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidData);

            let config = RunnerConfig::load(dir.path(), &CliOverrides::default());
            assert_eq!(config.results_dir(), dir.path().join(DEFAULT_RESULTS_DIR));
        }
    }

    mod precedence {
        use super::*;

        #[test]
        fn defaults() {
            let root = Path::new("/project");
            let config = RunnerConfig::resolve(
                root,
                &RunSettings::default(),
                &CliOverrides::default(),
                env_of(&[]),
            );
            assert_eq!(config.bitness(), Bitness::X64);
            assert_eq!(config.bitness.source, ConfigSource::Default);
            assert_eq!(config.results_dir(), root.join(DEFAULT_RESULTS_DIR));
            assert_eq!(config.idle_timeout.value, DEFAULT_IDLE_TIMEOUT);
            assert!(config.worker_dir().is_none());
        }

        #[test]
        fn run_settings_beat_env() {
            let settings = RunSettings {
                bitness: Some("x86".to_string()),
                ..Default::default()
            };
            let config = RunnerConfig::resolve(
                Path::new("/p"),
                &settings,
                &CliOverrides::default(),
                env_of(&[(BITNESS_ENV_VAR, "x64")]),
            );
            assert_eq!(config.bitness(), Bitness::X86);
            assert_eq!(config.bitness.source, ConfigSource::RunSettings);
        }

        #[test]
        fn env_beats_default() {
            let config = RunnerConfig::resolve(
                Path::new("/p"),
                &RunSettings::default(),
                &CliOverrides::default(),
                env_of(&[(BITNESS_ENV_VAR, "x86"), (WORKER_DIR_ENV_VAR, "/w")]),
            );
            assert_eq!(config.bitness(), Bitness::X86);
            assert_eq!(config.bitness.source, ConfigSource::EnvVar);
            assert_eq!(config.worker_dir(), Some(Path::new("/w")));
        }

        #[test]
        fn cli_beats_everything() {
            let settings = RunSettings {
                bitness: Some("x64".to_string()),
                ..Default::default()
            };
            let cli = CliOverrides {
                bitness: Some(Bitness::X86),
                ..Default::default()
            };
            let config = RunnerConfig::resolve(
                Path::new("/p"),
                &settings,
                &cli,
                env_of(&[(BITNESS_ENV_VAR, "x64")]),
            );
            assert_eq!(config.bitness(), Bitness::X86);
            assert_eq!(config.bitness.source, ConfigSource::CliFlag);
        }

        #[test]
        fn unknown_values_fall_back() {
            let settings = RunSettings {
                bitness: Some("itanium".to_string()),
                ..Default::default()
            };
            let config = RunnerConfig::resolve(
                Path::new("/p"),
                &settings,
                &CliOverrides::default(),
                env_of(&[(BITNESS_ENV_VAR, "sparc")]),
            );
            assert_eq!(config.bitness(), Bitness::X64);
            assert_eq!(config.bitness.source, ConfigSource::Default);
        }

        #[test]
        fn relative_dirs_resolve_against_project_root() {
            let settings = RunSettings {
                worker_dir: Some(PathBuf::from("target/debug")),
                results_dir: Some(PathBuf::from("out")),
                ..Default::default()
            };
            let config = RunnerConfig::resolve(
                Path::new("/p"),
                &settings,
                &CliOverrides::default(),
                env_of(&[]),
            );
            assert_eq!(config.worker_dir(), Some(Path::new("/p/target/debug")));
            assert_eq!(config.results_dir(), Path::new("/p/out"));
        }

        #[test]
        fn merge_prefers_higher_source() {
            let low = ConfigValue::new(1, ConfigSource::RunSettings);
            let high = ConfigValue::new(2, ConfigSource::CliFlag);
            assert_eq!(low.clone().merge(high.clone()).value, 2);
            assert_eq!(high.merge(low).value, 2);
        }
    }
}
