//! User-Agent generation from a small pool keyed by platform and browser.
//!
//! Format: `<product> / <product-version> <comment>`

use rand::seq::SliceRandom;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[clap(rename_all = "lowercase")]
pub enum Browser {
    Random,
    Chrome,
    Firefox,
    Safari,
}

const WINDOWS: &[&str] = &["Windows NT 10.0; Win64; x64;"];

const MACOS: &[&str] = &[
    "Macintosh; Intel Mac OS X 13_0",
    "Macintosh; Intel Mac OS X 12_6",
    "Macintosh; Intel Mac OS X 10_15_7",
];

const LINUX: &[&str] = &["X11; Linux x86_64;"];

const CHROME: &[&str] = &[
    "({}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/106.0.0.0 Safari/537.36",
    "({}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/105.0.0.0 Safari/537.36",
];

const FIREFOX: &[&str] = &[
    "({}; rv:106.0) Gecko/20100101 Firefox/106.0",
    "({}; rv:105.0) Gecko/20100101 Firefox/105.0",
];

const SAFARI: &[&str] = &[
    "({}) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.0 Safari/605.1.15",
    "({}) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.5 Safari/605.1.15",
];

/// Generate a User-Agent string for the requested browser family.
pub fn generate(browser: Browser) -> String {
    let mut rng = rand::thread_rng();

    let browser = match browser {
        Browser::Random => *[Browser::Chrome, Browser::Firefox, Browser::Safari]
            .choose(&mut rng)
            .unwrap(),
        fixed => fixed,
    };

    let all_platforms: Vec<&str> = WINDOWS
        .iter()
        .chain(MACOS.iter())
        .chain(LINUX.iter())
        .copied()
        .collect();

    let (template, platform) = match browser {
        Browser::Chrome => (*CHROME.choose(&mut rng).unwrap(), *all_platforms.choose(&mut rng).unwrap()),
        Browser::Firefox => (*FIREFOX.choose(&mut rng).unwrap(), *all_platforms.choose(&mut rng).unwrap()),
        Browser::Safari => (*SAFARI.choose(&mut rng).unwrap(), *MACOS.choose(&mut rng).unwrap()),
        Browser::Random => unreachable!(),
    };

    format!("Mozilla/5.0 {}", template.replacen("{}", platform, 1))
}
