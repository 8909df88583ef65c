pub mod app;
pub mod cli;
pub mod config;
pub mod deobfuscate;
pub mod export;
pub mod geoip;
pub mod models;
pub mod probes;
pub mod queue;
pub mod scrape;
pub mod server;
pub mod storage;
pub mod tester;
pub mod useragent;

pub use config::Config;
pub use models::{Proxy, ProxyProtocol, ProxyStatus, ProxyTest};
pub use storage::Storage;
