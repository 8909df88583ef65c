/*!
Validated runtime configuration.

[`Config::from_cli`] applies the interval floors, resolves the protocol
filter and the `none`/`false` output disables, and rejects contradictory
option sets. A validation failure is fatal at startup (exit code 1).
*/

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::cli::{Cli, ProtocolFilter};
use crate::models::ProxyProtocol;
use crate::useragent::Browser;

pub const MIN_REFRESH_MINUTES: u64 = 15;
pub const MIN_SCAN_MINUTES: u64 = 5;
pub const MIN_OUTPUT_MINUTES: u64 = 15;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("you must supply a proxy list file or enable scraping")]
    NoSources,
    #[error("you must specify at least one proxy judge URL")]
    NoJudge,
    #[error("invalid URL for {0}: {1}")]
    BadUrl(&'static str, String),
    #[error("tester count must be greater than zero")]
    NoTesters,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub verbose: bool,
    pub download_path: PathBuf,
    pub proxy_judges: Vec<String>,
    pub user_agent: Browser,
    pub geoip_file: Option<PathBuf>,

    pub db_path: PathBuf,
    pub db_max_conn: u32,
    pub db_batch_size: usize,

    pub proxy_file: Option<PathBuf>,
    pub proxy_scrap: bool,
    /// Protocols under test; empty means all.
    pub protocols: Vec<ProxyProtocol>,
    pub refresh_interval: Duration,
    pub scan_interval: Duration,
    pub ignore_countries: Vec<String>,

    pub output_interval: Duration,
    pub output_limit: i64,
    pub output_no_protocol: bool,
    pub output_http: Option<PathBuf>,
    pub output_socks: Option<PathBuf>,
    pub output_kinancity: Option<PathBuf>,
    pub output_proxychains: Option<PathBuf>,
    pub output_rocketmap: Option<PathBuf>,

    pub tester_count: usize,
    pub tester_retries: u32,
    pub tester_backoff_factor: f64,
    pub tester_timeout: Duration,
    pub tester_force: bool,
    pub tester_anonymity: bool,
    pub tester_vendor: bool,
    pub tester_notice_interval: Duration,

    pub cleanup_age_days: i64,
    pub cleanup_test_count: i64,
    pub cleanup_fail_ratio: f64,

    pub scraper_retries: u32,
    pub scraper_backoff_factor: f64,
    pub scraper_timeout: Duration,
    pub scraper_proxy: Option<String>,
    pub scraper_anonymous: bool,

    pub web_port: u16,
    pub web_enabled: bool,
}

/// Output filenames accept `none`/`false` as an explicit disable.
fn output_file(name: &str) -> Option<PathBuf> {
    match name.to_lowercase().as_str() {
        "" | "none" | "false" => None,
        _ => Some(PathBuf::from(name)),
    }
}

fn floor_minutes(value: u64, floor: u64, what: &str) -> u64 {
    if value < floor {
        warn!("{what} every {value} minutes is inefficient; overridden to {floor} minutes.");
        floor
    } else {
        value
    }
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        if cli.proxy_file.is_none() && !cli.proxy_scrap {
            return Err(ConfigError::NoSources);
        }
        if cli.proxy_judge.is_empty() {
            return Err(ConfigError::NoJudge);
        }
        for judge in &cli.proxy_judge {
            url::Url::parse(judge)
                .map_err(|_| ConfigError::BadUrl("proxy judge", judge.clone()))?;
        }
        if let Some(upstream) = &cli.scraper_proxy {
            url::Url::parse(upstream)
                .map_err(|_| ConfigError::BadUrl("scraper proxy", upstream.clone()))?;
        }
        if cli.tester_count == 0 {
            return Err(ConfigError::NoTesters);
        }

        let protocols = match cli.proxy_protocol {
            ProtocolFilter::All => Vec::new(),
            ProtocolFilter::Http => vec![ProxyProtocol::Http],
            ProtocolFilter::Socks4 => vec![ProxyProtocol::Socks4],
            ProtocolFilter::Socks5 => vec![ProxyProtocol::Socks5],
        };

        let refresh =
            floor_minutes(cli.proxy_refresh_interval, MIN_REFRESH_MINUTES, "Checking proxy sources");
        let scan = floor_minutes(cli.proxy_scan_interval, MIN_SCAN_MINUTES, "Scanning proxies");
        let output = floor_minutes(cli.output_interval, MIN_OUTPUT_MINUTES, "Outputting proxy lists");

        Ok(Config {
            verbose: cli.verbose,
            download_path: cli.download_path,
            proxy_judges: cli.proxy_judge,
            user_agent: cli.user_agent,
            geoip_file: cli.geoip_file,

            db_path: cli.db_path,
            db_max_conn: cli.db_max_conn.max(1),
            db_batch_size: cli.db_batch_size.max(1),

            proxy_file: cli.proxy_file,
            proxy_scrap: cli.proxy_scrap,
            protocols,
            refresh_interval: Duration::from_secs(refresh * 60),
            scan_interval: Duration::from_secs(scan * 60),
            ignore_countries: cli
                .proxy_ignore_country
                .iter()
                .map(|c| c.to_lowercase())
                .collect(),

            output_interval: Duration::from_secs(output * 60),
            output_limit: cli.output_limit,
            output_no_protocol: cli.output_no_protocol,
            output_http: output_file(&cli.output_http),
            output_socks: output_file(&cli.output_socks),
            output_kinancity: cli.output_kinancity.as_deref().and_then(output_file),
            output_proxychains: cli.output_proxychains.as_deref().and_then(output_file),
            output_rocketmap: cli.output_rocketmap.as_deref().and_then(output_file),

            tester_count: cli.tester_count,
            tester_retries: cli.tester_retries,
            tester_backoff_factor: cli.tester_backoff_factor,
            tester_timeout: Duration::from_secs_f64(cli.tester_timeout),
            tester_force: cli.tester_force,
            tester_anonymity: !cli.tester_disable_anonymity,
            tester_vendor: cli.tester_vendor,
            tester_notice_interval: Duration::from_secs(cli.tester_notice_interval),

            cleanup_age_days: cli.cleanup_age,
            cleanup_test_count: cli.cleanup_test_count,
            cleanup_fail_ratio: cli.cleanup_fail_ratio,

            scraper_retries: cli.scraper_retries,
            scraper_backoff_factor: cli.scraper_backoff_factor,
            scraper_timeout: Duration::from_secs_f64(cli.scraper_timeout),
            scraper_proxy: cli.scraper_proxy,
            scraper_anonymous: cli.scraper_anonymous,

            web_port: cli.web_port,
            web_enabled: !cli.no_web,
        })
    }

    /// Scan-interval in seconds, the staleness bound for `need_scan`.
    pub fn scan_age_secs(&self) -> i64 {
        self.scan_interval.as_secs() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec!["proxyscan"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).unwrap()
    }

    #[test]
    fn requires_a_source() {
        let cli = parse(&[]);
        assert!(matches!(Config::from_cli(cli), Err(ConfigError::NoSources)));
    }

    #[test]
    fn intervals_are_floored() {
        let cli = parse(&[
            "--proxy-scrap",
            "--proxy-refresh-interval", "5",
            "--proxy-scan-interval", "1",
            "--output-interval", "3",
        ]);
        let config = Config::from_cli(cli).unwrap();
        assert_eq!(config.refresh_interval, Duration::from_secs(15 * 60));
        assert_eq!(config.scan_interval, Duration::from_secs(5 * 60));
        assert_eq!(config.output_interval, Duration::from_secs(15 * 60));
    }

    #[test]
    fn disable_literals_turn_outputs_off() {
        let cli = parse(&[
            "--proxy-scrap",
            "--output-http", "none",
            "--output-socks", "False",
            "--output-kinancity", "kinan.txt",
        ]);
        let config = Config::from_cli(cli).unwrap();
        assert_eq!(config.output_http, None);
        assert_eq!(config.output_socks, None);
        assert_eq!(config.output_kinancity, Some(PathBuf::from("kinan.txt")));
    }

    #[test]
    fn protocol_filter_maps_to_list() {
        let cli = parse(&["--proxy-scrap", "--proxy-protocol", "socks5"]);
        let config = Config::from_cli(cli).unwrap();
        assert_eq!(config.protocols, vec![ProxyProtocol::Socks5]);

        let cli = parse(&["--proxy-scrap", "--proxy-protocol", "all"]);
        let config = Config::from_cli(cli).unwrap();
        assert!(config.protocols.is_empty());
    }

    #[test]
    fn malformed_judge_url_is_fatal() {
        let cli = parse(&["--proxy-scrap", "--proxy-judge", "not a url"]);
        assert!(matches!(
            Config::from_cli(cli),
            Err(ConfigError::BadUrl("proxy judge", _))
        ));
    }

    #[test]
    fn zero_testers_is_fatal() {
        let cli = parse(&["--proxy-scrap", "--tester-count", "0"]);
        assert!(matches!(Config::from_cli(cli), Err(ConfigError::NoTesters)));
    }

    #[test]
    fn anonymity_toggle_inverts() {
        let cli = parse(&["--proxy-scrap", "--tester-disable-anonymity"]);
        let config = Config::from_cli(cli).unwrap();
        assert!(!config.tester_anonymity);
    }
}
