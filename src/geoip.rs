//! Best-effort ISO-country lookup from an IPv4 range table.
//!
//! Loads a `ip_from,ip_to,country_code` CSV once at startup (numeric range
//! bounds, inclusive). Lookups are shared behind a mutex and never fail the
//! caller: a miss or a missing database yields `None`.

use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use tracing::{debug, warn};

struct Range {
    from: u32,
    to: u32,
    country: String,
}

pub struct GeoIpDatabase {
    ranges: Mutex<Vec<Range>>,
}

impl GeoIpDatabase {
    /// Load the range table from `path`. A missing or unreadable file is
    /// tolerated and produces an empty database.
    pub fn load(path: &Path) -> Self {
        let mut ranges = Vec::new();

        match std::fs::read_to_string(path) {
            Ok(content) => {
                for line in content.lines() {
                    let line = line.trim().trim_matches('"');
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    let fields: Vec<&str> = line.split(',').map(|f| f.trim_matches('"')).collect();
                    if fields.len() < 3 {
                        continue;
                    }
                    let (Ok(from), Ok(to)) = (fields[0].parse(), fields[1].parse()) else {
                        continue;
                    };
                    ranges.push(Range {
                        from,
                        to,
                        country: fields[2].to_lowercase(),
                    });
                }
                ranges.sort_by_key(|r| r.from);
                debug!("Loaded {} IP ranges from {}", ranges.len(), path.display());
            }
            Err(e) => {
                warn!("Geolocation database unavailable ({}): {}", path.display(), e);
            }
        }

        GeoIpDatabase {
            ranges: Mutex::new(ranges),
        }
    }

    /// Empty database; every lookup misses.
    pub fn empty() -> Self {
        GeoIpDatabase {
            ranges: Mutex::new(Vec::new()),
        }
    }

    /// Find the ISO 3166-1 alpha-2 code for an IPv4 address.
    pub fn lookup_country(&self, ip: &str) -> Option<String> {
        let addr = u32::from(Ipv4Addr::from_str(ip).ok()?);
        let ranges = self.ranges.lock().unwrap_or_else(|e| e.into_inner());

        let idx = ranges.partition_point(|r| r.from <= addr);
        if idx == 0 {
            return None;
        }
        let range = &ranges[idx - 1];
        if addr <= range.to {
            Some(range.country.clone())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn database(content: &str) -> GeoIpDatabase {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        GeoIpDatabase::load(file.path())
    }

    #[test]
    fn lookup_hit_and_miss() {
        // 1.0.0.0 = 16777216, 1.0.0.255 = 16777471
        let db = database("16777216,16777471,AU\n16777472,16778239,CN\n");

        assert_eq!(db.lookup_country("1.0.0.1").as_deref(), Some("au"));
        assert_eq!(db.lookup_country("1.0.1.1").as_deref(), Some("cn"));
        assert_eq!(db.lookup_country("9.9.9.9"), None);
    }

    #[test]
    fn quoted_fields_are_accepted() {
        let db = database("\"16777216\",\"16777471\",\"AU\"\n");
        assert_eq!(db.lookup_country("1.0.0.1").as_deref(), Some("au"));
    }

    #[test]
    fn missing_file_yields_empty_database() {
        let db = GeoIpDatabase::load(Path::new("/nonexistent/geoip.csv"));
        assert_eq!(db.lookup_country("1.0.0.1"), None);
    }

    #[test]
    fn invalid_ip_yields_none() {
        let db = GeoIpDatabase::empty();
        assert_eq!(db.lookup_country("not-an-ip"), None);
    }
}
