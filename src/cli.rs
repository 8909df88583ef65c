use std::path::PathBuf;

use clap::Parser;

use crate::useragent::Browser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[clap(rename_all = "lowercase")]
pub enum ProtocolFilter {
    Http,
    Socks4,
    Socks5,
    All,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "proxyscan")]
#[command(version = concat!("Ver:", env!("CARGO_PKG_VERSION")))]
#[command(about = "Harvests, probes and publishes working network proxies")]
pub struct Cli {
    /// Run in verbose mode
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Directory where downloaded/cached files are saved
    #[arg(long, default_value = "downloads")]
    pub download_path: PathBuf,

    /// URL of an env-dump proxy judge; repeat to round-robin several
    #[arg(short = 'j', long = "proxy-judge", default_value = "http://pascal.hoez.free.fr/azenv.php")]
    pub proxy_judge: Vec<String>,

    /// User-Agent family used for outbound requests
    #[arg(long, value_enum, default_value = "random")]
    pub user_agent: Browser,

    /// IPv4 range -> country CSV used for geolocation (optional)
    #[arg(long)]
    pub geoip_file: Option<PathBuf>,

    // Database
    /// Database file path
    #[arg(long, env = "PROXYSCAN_DB", default_value = "proxyscan.db", help_heading = "Database")]
    pub db_path: PathBuf,

    /// Maximum pooled database connections
    #[arg(long, env = "PROXYSCAN_DB_MAX_CONN", default_value_t = 10, help_heading = "Database")]
    pub db_max_conn: u32,

    /// Rows per batched write
    #[arg(long, env = "PROXYSCAN_DB_BATCH_SIZE", default_value_t = 250, help_heading = "Database")]
    pub db_batch_size: usize,

    // Proxy sources
    /// Filename of a proxy list to verify
    #[arg(short = 'f', long, help_heading = "Proxy Sources")]
    pub proxy_file: Option<PathBuf>,

    /// Scrape configured webpages for proxy lists
    #[arg(short = 's', long, help_heading = "Proxy Sources")]
    pub proxy_scrap: bool,

    /// Protocol being tested
    #[arg(short = 'p', long, value_enum, default_value = "all", help_heading = "Proxy Sources")]
    pub proxy_protocol: ProtocolFilter,

    /// Refresh proxy lists from sources every X minutes (floor: 15)
    #[arg(long, default_value_t = 180, help_heading = "Proxy Sources")]
    pub proxy_refresh_interval: u64,

    /// Re-scan stored proxies every X minutes (floor: 5)
    #[arg(long, default_value_t = 60, help_heading = "Proxy Sources")]
    pub proxy_scan_interval: u64,

    /// Ignore proxies from these ISO 3166-1 alpha-2 countries
    #[arg(long = "proxy-ignore-country", help_heading = "Proxy Sources")]
    pub proxy_ignore_country: Vec<String>,

    // Output
    /// Output working proxy lists every X minutes (floor: 15)
    #[arg(long, default_value_t = 60, help_heading = "Output")]
    pub output_interval: u64,

    /// Maximum number of proxies to output
    #[arg(long, default_value_t = 100, help_heading = "Output")]
    pub output_limit: i64,

    /// Proxy URL format will not include the protocol
    #[arg(long, help_heading = "Output")]
    pub output_no_protocol: bool,

    /// Output filename for working HTTP proxies ("none"/"false" disables)
    #[arg(long, default_value = "working_http.txt", help_heading = "Output")]
    pub output_http: String,

    /// Output filename for working SOCKS proxies ("none"/"false" disables)
    #[arg(long, default_value = "working_socks.txt", help_heading = "Output")]
    pub output_socks: String,

    /// Output filename for a KinanCity proxy bundle
    #[arg(long, help_heading = "Output")]
    pub output_kinancity: Option<String>,

    /// Output filename for a ProxyChains proxy list
    #[arg(long, help_heading = "Output")]
    pub output_proxychains: Option<String>,

    /// Output filename for a RocketMap proxy list (SOCKS5 only)
    #[arg(long, help_heading = "Output")]
    pub output_rocketmap: Option<String>,

    // Proxy tester
    /// Number of concurrent tester workers
    #[arg(long, default_value_t = 100, help_heading = "Proxy Tester")]
    pub tester_count: usize,

    /// Maximum web request attempts per probe
    #[arg(long, default_value_t = 5, help_heading = "Proxy Tester")]
    pub tester_retries: u32,

    /// Seconds multiplied by the attempt number between retries
    #[arg(long, default_value_t = 0.5, help_heading = "Proxy Tester")]
    pub tester_backoff_factor: f64,

    /// Connection timeout in seconds
    #[arg(long, default_value_t = 5.0, help_heading = "Proxy Tester")]
    pub tester_timeout: f64,

    /// Run every probe even after a failure (diagnostics)
    #[arg(long, help_heading = "Proxy Tester")]
    pub tester_force: bool,

    /// Disable the anonymity probe
    #[arg(long, help_heading = "Proxy Tester")]
    pub tester_disable_anonymity: bool,

    /// Enable the vendor endpoint probes
    #[arg(long, help_heading = "Proxy Tester")]
    pub tester_vendor: bool,

    /// Print tester statistics every X seconds
    #[arg(long, default_value_t = 60, help_heading = "Proxy Tester")]
    pub tester_notice_interval: u64,

    /// Delete proxies older than X days that keep failing
    #[arg(long, default_value_t = 14, help_heading = "Proxy Tester")]
    pub cleanup_age: i64,

    /// Minimum tests before a proxy is eligible for cleanup
    #[arg(long, default_value_t = 20, help_heading = "Proxy Tester")]
    pub cleanup_test_count: i64,

    /// Lifetime fail ratio beyond which a proxy is deleted
    #[arg(long, default_value_t = 0.9, help_heading = "Proxy Tester")]
    pub cleanup_fail_ratio: f64,

    // Proxy scraper
    /// Maximum web request attempts per scrape
    #[arg(long, default_value_t = 3, help_heading = "Proxy Scraper")]
    pub scraper_retries: u32,

    /// Seconds multiplied by the attempt number between retries
    #[arg(long, default_value_t = 0.5, help_heading = "Proxy Scraper")]
    pub scraper_backoff_factor: f64,

    /// Connection timeout in seconds
    #[arg(long, default_value_t = 5.0, help_heading = "Proxy Scraper")]
    pub scraper_timeout: f64,

    /// Route scrapers through this proxy (<proto>://[<user>:<pass>@]<ip>:<port>)
    #[arg(long, help_heading = "Proxy Scraper")]
    pub scraper_proxy: Option<String>,

    /// Route scrapers through a random validated proxy from storage
    #[arg(long, help_heading = "Proxy Scraper")]
    pub scraper_anonymous: bool,

    // Status service
    /// Port for the read-only HTTP status service
    #[arg(long, default_value_t = 5000, help_heading = "Status Service")]
    pub web_port: u16,

    /// Disable the status service
    #[arg(long, help_heading = "Status Service")]
    pub no_web: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
