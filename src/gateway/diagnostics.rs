//! Target diagnostics battery
//!
//! A single read-only composite command collects distro, platform, network
//! and user facts. Each probe writes into its own `===NAME===` section so one
//! missing tool never hides the others.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Composite discovery command (read-only)
pub const DIAGNOSTICS_COMMAND: &str = concat!(
    "echo '===OSRELEASE==='; cat /etc/os-release 2>/dev/null || true; ",
    "echo '===LSB==='; [ -r /etc/os-release ] || lsb_release -a 2>/dev/null || true; ",
    "echo '===KERNEL==='; uname -r 2>/dev/null; ",
    "echo '===MACHINE==='; uname -m 2>/dev/null; ",
    "echo '===INIT==='; ps -p 1 -o comm= 2>/dev/null || true; ",
    "echo '===PKG==='; command -v apt dnf yum zypper pacman apk 2>/dev/null || true; ",
    "echo '===USER==='; whoami 2>/dev/null; ",
    "echo '===SHELL==='; echo \"$SHELL\"; ",
    "echo '===HOSTNAME==='; hostname 2>/dev/null; ",
    "echo '===FQDN==='; hostname -f 2>/dev/null || hostname 2>/dev/null; ",
    "echo '===ADDRS==='; ip -o -4 addr show up scope global 2>/dev/null | awk '{print $2 \":\" $4}' || true; ",
    "echo '===END==='"
);

/// Package managers in detection priority order
const PACKAGE_MANAGERS: [&str; 6] = ["apt", "dnf", "yum", "zypper", "pacman", "apk"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistroInfo {
    pub id: Option<String>,
    pub version_id: Option<String>,
    pub name: Option<String>,
    pub pretty_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub kernel_release: Option<String>,
    pub machine: Option<String>,
    pub init: Option<String>,
    pub pkg_manager: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub hostname: Option<String>,
    pub fqdn: Option<String>,
    /// `interface:address/prefix` entries
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub username: Option<String>,
    pub shell: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticsStatus {
    Ok,
    /// Output ended early; sections after the cut are empty
    Partial,
}

/// Facts gathered from one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDiagnostics {
    pub target: String,
    pub host: String,
    pub port: u16,
    pub status: DiagnosticsStatus,
    pub distro: DistroInfo,
    pub platform: PlatformInfo,
    pub network: NetworkInfo,
    pub user: UserInfo,
    pub notes: Vec<String>,
}

/// Parsed sections, before target metadata is attached
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticsFacts {
    pub complete: bool,
    pub distro: DistroInfo,
    pub platform: PlatformInfo,
    pub network: NetworkInfo,
    pub user: UserInfo,
    pub notes: Vec<String>,
}

impl DiagnosticsFacts {
    pub fn into_report(self, target: &str, host: &str, port: u16) -> TargetDiagnostics {
        TargetDiagnostics {
            target: target.to_string(),
            host: host.to_string(),
            port,
            status: if self.complete {
                DiagnosticsStatus::Ok
            } else {
                DiagnosticsStatus::Partial
            },
            distro: self.distro,
            platform: self.platform,
            network: self.network,
            user: self.user,
            notes: self.notes,
        }
    }
}

fn extract_section<'a>(output: &'a str, marker: &str) -> Option<&'a str> {
    let start_marker = format!("==={}===", marker);
    let start = output.find(&start_marker)?;
    let rest = &output[start + start_marker.len()..];
    let end = rest.find("\n===").map(|i| i + 1).unwrap_or(rest.len());
    Some(rest[..end].trim())
}

fn first_line(output: &str, marker: &str) -> Option<String> {
    extract_section(output, marker)
        .and_then(|s| s.lines().next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

static OS_RELEASE_LINE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^([A-Z_]+)=(.*)$").ok());

/// Parse `/etc/os-release` content
pub fn parse_os_release(text: &str) -> DistroInfo {
    let Some(line_re) = OS_RELEASE_LINE.as_ref() else {
        return DistroInfo::default();
    };
    let mut info = DistroInfo::default();
    for line in text.lines() {
        let Some(caps) = line_re.captures(line.trim()) else {
            continue;
        };
        let value = unquote(&caps[2]).to_string();
        match &caps[1] {
            "ID" => info.id = Some(value),
            "VERSION_ID" => info.version_id = Some(value),
            "NAME" => info.name = Some(value),
            "PRETTY_NAME" => info.pretty_name = Some(value),
            _ => {}
        }
    }
    info
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2
        && bytes[0] == bytes[bytes.len() - 1]
        && (bytes[0] == b'"' || bytes[0] == b'\'')
    {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Parse `lsb_release -a` output
pub fn parse_lsb_release(text: &str) -> Option<DistroInfo> {
    let mut name = None;
    let mut version = None;
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "distributor id" => name = Some(value.trim().to_string()),
            "release" => version = Some(value.trim().to_string()),
            _ => {}
        }
    }
    if name.is_none() && version.is_none() {
        return None;
    }
    Some(DistroInfo {
        id: name.as_ref().map(|n| n.to_lowercase()),
        pretty_name: match (&name, &version) {
            (Some(n), Some(v)) => Some(format!("{} {}", n, v)),
            _ => None,
        },
        name,
        version_id: version,
    })
}

/// First package manager whose binary appears in `command -v` output
pub fn detect_package_manager(command_v_output: &str) -> Option<String> {
    let found: Vec<&str> = command_v_output
        .lines()
        .filter_map(|line| line.trim().rsplit('/').next())
        .collect();
    PACKAGE_MANAGERS
        .iter()
        .find(|mgr| found.contains(mgr))
        .map(|mgr| mgr.to_string())
}

/// Parse the combined output of [`DIAGNOSTICS_COMMAND`]
pub fn parse_diagnostics(output: &str) -> DiagnosticsFacts {
    let mut notes = Vec::new();

    let distro = match extract_section(output, "OSRELEASE").filter(|s| !s.is_empty()) {
        Some(section) => parse_os_release(section),
        None => match extract_section(output, "LSB").and_then(parse_lsb_release) {
            Some(info) => info,
            None => {
                notes.push("Neither /etc/os-release nor lsb_release available".to_string());
                DistroInfo::default()
            }
        },
    };

    let platform = PlatformInfo {
        kernel_release: first_line(output, "KERNEL"),
        machine: first_line(output, "MACHINE"),
        init: first_line(output, "INIT"),
        pkg_manager: extract_section(output, "PKG").and_then(detect_package_manager),
    };
    if platform.pkg_manager.is_none() {
        notes.push("No known package manager found".to_string());
    }

    let addresses: Vec<String> = extract_section(output, "ADDRS")
        .map(|s| {
            s.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let network = NetworkInfo {
        hostname: first_line(output, "HOSTNAME"),
        fqdn: first_line(output, "FQDN"),
        addresses,
    };

    let user = UserInfo {
        username: first_line(output, "USER"),
        shell: first_line(output, "SHELL"),
    };

    let complete = output.contains("===END===");
    if !complete {
        notes.push("Diagnostics output was truncated".to_string());
    }

    DiagnosticsFacts {
        complete,
        distro,
        platform,
        network,
        user,
        notes,
    }
}
