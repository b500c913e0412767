//! Process-level settings. Simulation defaults live in [`crate::params`]; this only covers
//! how the binary is run.

use thiserror::Error;

pub const SEED_VAR: &str = "CELLSIM_SEED";

#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    /// Fixed seed for the initial grid. Unseeded runs draw fresh randomness.
    pub seed: Option<u64>,
    pub log_level: log::LevelFilter,
    /// Run this many ticks against the headless device instead of opening a window.
    pub headless_ticks: Option<u64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            seed: None,
            log_level: log::LevelFilter::Info,
            headless_ticks: None,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} expects a value")]
    MissingValue(&'static str),
    #[error("{flag}: `{value}` is not a whole number")]
    InvalidNumber { flag: &'static str, value: String },
    #[error("unknown argument `{0}`")]
    UnknownArgument(String),
}

fn number(flag: &'static str, value: Option<&str>) -> Result<u64, ConfigError> {
    let value = value.ok_or(ConfigError::MissingValue(flag))?;
    value.parse().map_err(|_| ConfigError::InvalidNumber {
        flag,
        value: value.to_string(),
    })
}

impl AppConfig {
    /// Read the command line and `CELLSIM_SEED`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let args: Vec<String> = std::env::args().skip(1).collect();
        Self::parse(&args, std::env::var(SEED_VAR).ok().as_deref())
    }

    /// `--seed` on the command line wins over the environment variable.
    pub fn parse<S: AsRef<str>>(args: &[S], env_seed: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = Self {
            seed: env_seed.map(|s| number(SEED_VAR, Some(s))).transpose()?,
            ..Self::default()
        };

        let mut args = args.iter().map(AsRef::as_ref);
        while let Some(arg) = args.next() {
            match arg {
                "--seed" => config.seed = Some(number("--seed", args.next())?),
                "--headless" => config.headless_ticks = Some(number("--headless", args.next())?),
                "--verbose" | "-v" => config.log_level = log::LevelFilter::Debug,
                other => return Err(ConfigError::UnknownArgument(other.to_string())),
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_arguments() {
        let none: [&str; 0] = [];
        assert_eq!(AppConfig::parse(&none, None).unwrap(), AppConfig::default());
    }

    #[test]
    fn reads_flags() {
        let config = AppConfig::parse(&["--headless", "500", "--seed", "9", "-v"], None).unwrap();
        assert_eq!(config.headless_ticks, Some(500));
        assert_eq!(config.seed, Some(9));
        assert_eq!(config.log_level, log::LevelFilter::Debug);
    }

    #[test]
    fn flag_seed_overrides_environment() {
        let none: [&str; 0] = [];
        assert_eq!(AppConfig::parse(&none, Some("3")).unwrap().seed, Some(3));
        assert_eq!(
            AppConfig::parse(&["--seed", "4"], Some("3")).unwrap().seed,
            Some(4)
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            AppConfig::parse(&["--seed"], None),
            Err(ConfigError::MissingValue("--seed"))
        );
        assert!(matches!(
            AppConfig::parse(&["--headless", "lots"], None),
            Err(ConfigError::InvalidNumber { .. })
        ));
        assert_eq!(
            AppConfig::parse(&["--fast"], None),
            Err(ConfigError::UnknownArgument("--fast".into()))
        );
    }
}
