//! Finds observable emulator processes by scanning `/dev/shm` for published
//! stats regions.

use std::path::Path;

use log::debug;

use crate::stats::reader::ShmReader;
use crate::stats::AppType;

#[derive(Debug, Clone)]
pub struct DiscoveredProcess {
    pub pid: u32,
    pub comm: String,
    pub fex_version: Option<String>,
    pub app_type: Option<AppType>,
}

pub fn discover() -> Vec<DiscoveredProcess> {
    discover_in(Path::new("/dev/shm"))
}

fn discover_in(shm_dir: &Path) -> Vec<DiscoveredProcess> {
    let Ok(entries) = std::fs::read_dir(shm_dir) else {
        return Vec::new();
    };

    let mut found = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = parse_region_name(&name.to_string_lossy()) else {
            continue;
        };
        let comm = read_string_lossy(format!("/proc/{pid}/comm"))
            .map(|s| s.trim_end().to_owned())
            .unwrap_or_else(|_| "?".to_owned());

        // Probe the header; a region we cannot attach to is still listed so
        // the user can see why (stale file, version skew).
        let (fex_version, app_type) = match ShmReader::open_path(&entry.path()) {
            Ok(reader) => {
                let header = reader.header();
                (Some(header.fex_version), Some(header.app_type))
            }
            Err(err) => {
                debug!("cannot probe {}: {err}", entry.path().display());
                (None, None)
            }
        };

        found.push(DiscoveredProcess {
            pid,
            comm,
            fex_version,
            app_type,
        });
    }
    found.sort_by_key(|p| p.pid);
    found
}

fn parse_region_name(name: &str) -> Option<u32> {
    name.strip_prefix("fex-")?
        .strip_suffix("-stats")?
        .parse()
        .ok()
}

pub fn read_string_lossy<P: AsRef<Path>>(path: P) -> std::io::Result<String> {
    let data = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&data).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_names_parse_to_pids() {
        assert_eq!(parse_region_name("fex-1234-stats"), Some(1234));
        assert_eq!(parse_region_name("fex--stats"), None);
        assert_eq!(parse_region_name("fex-12x4-stats"), None);
        assert_eq!(parse_region_name("sem.foo"), None);
        assert_eq!(parse_region_name("fex-1234-stats.bak"), None);
    }
}
