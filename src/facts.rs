//! Host fact gathering
//!
//! Builds the read-only snapshot handed to the core. Parsing is kept separate
//! from file access so it can be tested with fixed inputs.

use anyhow::Result;
use declarative::Facts;
use declarative::facts::{ARCHITECTURE, OS_FAMILY, OS_RELEASE_MAJOR, SELINUX};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

const OS_RELEASE: &str = "/etc/os-release";
const SELINUX_ENFORCE: &str = "/sys/fs/selinux/enforce";

/// Gather facts from the running host, then apply overrides
pub fn gather(overrides: &BTreeMap<String, String>) -> Result<Facts> {
    let mut facts = Facts::new().with(ARCHITECTURE, architecture(std::env::consts::ARCH));

    match fs::read_to_string(OS_RELEASE) {
        Ok(content) => {
            let release = parse_os_release(&content);
            if let Some(family) = os_family(&release) {
                facts.insert(OS_FAMILY, family);
            }
            if let Some(major) = release.get("VERSION_ID").and_then(|v| release_major(v)) {
                facts.insert(OS_RELEASE_MAJOR, major);
            }
            if let Some(id) = release.get("ID") {
                facts.insert("os_name", id.clone());
            }
        }
        Err(e) => log::debug!("Could not read {OS_RELEASE}: {e}"),
    }

    facts.insert(SELINUX, selinux_mode(Path::new(SELINUX_ENFORCE)));

    if let Some(hostname) = hostname() {
        facts.insert("hostname", hostname);
    }

    let facts = facts.merged(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    log::debug!("Gathered {} facts", facts.len());
    Ok(facts)
}

/// Parse `KEY=value` lines, stripping optional quotes
pub fn parse_os_release(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            (key.trim().to_string(), value.to_string())
        })
        .collect()
}

/// Map `ID`/`ID_LIKE` to an OS family name
pub fn os_family(release: &BTreeMap<String, String>) -> Option<&'static str> {
    let mut ids: Vec<&str> = Vec::new();
    if let Some(id) = release.get("ID") {
        ids.push(id);
    }
    if let Some(like) = release.get("ID_LIKE") {
        ids.extend(like.split_whitespace());
    }

    ids.iter().find_map(|id| match *id {
        "rhel" | "centos" | "fedora" | "rocky" | "almalinux" | "ol" | "amzn" => Some("RedHat"),
        "debian" | "ubuntu" | "linuxmint" | "raspbian" => Some("Debian"),
        "suse" | "opensuse" | "sles" | "opensuse-leap" | "opensuse-tumbleweed" => Some("Suse"),
        "arch" | "manjaro" => Some("Archlinux"),
        "alpine" => Some("Alpine"),
        _ => None,
    })
}

/// Major component of `VERSION_ID`, e.g. `9` from `9.3`
pub fn release_major(version: &str) -> Option<String> {
    let major = version.split('.').next()?.trim();
    (!major.is_empty() && major.chars().all(|c| c.is_ascii_digit())).then(|| major.to_string())
}

/// Architecture names as configuration manifests spell them
pub fn architecture(arch: &str) -> &str {
    match arch {
        "x86" => "i386",
        other => other,
    }
}

/// SELinux mode from the enforce flag; a missing file means disabled
pub fn selinux_mode(enforce: &Path) -> &'static str {
    match fs::read_to_string(enforce) {
        Ok(flag) if flag.trim() == "1" => "enforcing",
        Ok(_) => "permissive",
        Err(_) => "disabled",
    }
}

fn hostname() -> Option<String> {
    fs::read_to_string("/etc/hostname")
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}
