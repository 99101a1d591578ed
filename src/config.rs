use std::{env, fmt::Display, str::FromStr};

use anyhow::{anyhow, Context};
use tracing::{debug, info};

use crate::metrics::Threshold;

pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub threshold: Threshold,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .context("DATABASE_URL must be set to a production Postgres instance")?;

        let threshold: Threshold = try_load("ATTENDANCE_THRESHOLD", "75")?;
        debug!("Attendance threshold ratio {}", threshold.ratio());

        Ok(Self {
            database_url,
            max_connections: try_load("ATTENDANCE_MAX_CONNECTIONS", "5")?,
            threshold,
        })
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> anyhow::Result<T>
where
    T::Err: Display,
{
    parse_setting(key, env::var(key).ok(), default)
}

fn parse_setting<T: FromStr>(key: &str, raw: Option<String>, default: &str) -> anyhow::Result<T>
where
    T::Err: Display,
{
    let value = raw.unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    debug!("{key} = {value}");

    value
        .parse()
        .map_err(|e| anyhow!("Invalid {key} value {value:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_setting_falls_back_to_default() {
        let connections: u32 = parse_setting("ATTENDANCE_MAX_CONNECTIONS", None, "5").unwrap();
        assert_eq!(connections, 5);
    }

    #[test]
    fn present_setting_wins() {
        let threshold: Threshold =
            parse_setting("ATTENDANCE_THRESHOLD", Some("80".to_string()), "75").unwrap();
        assert_eq!(threshold.ratio(), 0.8);
    }

    #[test]
    fn invalid_setting_is_an_error() {
        let result: anyhow::Result<Threshold> =
            parse_setting("ATTENDANCE_THRESHOLD", Some("150".to_string()), "75");
        let message = result.unwrap_err().to_string();
        assert!(message.contains("ATTENDANCE_THRESHOLD"));
    }
}
