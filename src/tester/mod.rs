//! Tester pool: claims proxies from the fetch pipe and runs the probe
//! pipeline against each one.

pub mod pool;
pub mod worker;

pub use pool::TesterPool;
