use std::{path::PathBuf, time::Duration};

use clap::Parser;
use serde::Deserialize;

#[derive(Parser)]
#[clap(version = clap::crate_version!(), author = clap::crate_authors!())]
pub struct Args {
    /// Turn debugging information on
    #[clap(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to the proxy configuration file; missing files fall back to
    /// defaults
    #[clap(short, long, default_value = "twproxy.toml", value_parser = Config::load)]
    pub config: Config,

    /// hostname:port of the game server, overriding the config file
    #[clap(short, long)]
    pub address: Option<String>,

    /// Script to start as soon as the connection is up
    pub script: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// hostname:port of the game server
    pub address: String,
    /// Terminal type announced during telnet negotiation
    pub terminal_type: String,
    /// Directory per-game databases are created in
    pub data_dir: PathBuf,
    /// Idle time before the game detector resets to idle
    #[serde(with = "serde_humantime")]
    pub detection_timeout: Duration,
    /// Dial timeout for outgoing connections
    #[serde(with = "serde_humantime")]
    pub dial_timeout: Duration,
    /// Depth of the bounded outbound queue
    pub outbound_queue_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: "localhost:2002".to_string(),
            terminal_type: "ansi".to_string(),
            data_dir: PathBuf::from("."),
            detection_timeout: crate::detector::DEFAULT_DETECTION_TIMEOUT,
            dial_timeout: crate::telnet::DEFAULT_DIAL_TIMEOUT,
            outbound_queue_depth: 128,
        }
    }
}

impl Config {
    /// Loads a config file, or the defaults when the path doesn't exist.
    pub fn load(path: &str) -> Result<Self, String> {
        let path = PathBuf::from(path);
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path).map_err(|e| e.to_string())?;
        toml::from_str(&raw).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::Config;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.detection_timeout, Duration::from_secs(300));
        assert_eq!(config.outbound_queue_depth, 128);
    }

    #[test]
    fn durations_deserialize_as_humantime() {
        let config: Config = toml::from_str(
            "address = \"play.example.com:23\"\ndetection_timeout = \"2m\"\n",
        )
        .unwrap();

        assert_eq!(config.address, "play.example.com:23");
        assert_eq!(config.detection_timeout, Duration::from_secs(120));
        assert_eq!(config.terminal_type, "ansi");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(toml::from_str::<Config>("listen_address = \"nope\"\n").is_err());
    }
}
