//! Tunnel client configuration handling
//!
//! The supervised binary consumes a TOML configuration the supervisor does
//! not own but must inspect: one upstream service variant ships tunnel
//! entries with an `autoTLS` flag the client rejects, so the file is
//! patched before every start. The same file also names the public
//! endpoint (server address plus the first tunnel's remote port), which is
//! announced after a successful start.
//!
//! All file I/O here is explicit UTF-8; no runtime-wide encoding defaults
//! are touched.

use crate::Result;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Configuration key the supervised binary rejects
pub const INCOMPATIBLE_FLAG: &str = "autoTLS";

/// Public endpoint advertised by the tunnel configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelEndpoint {
    /// Remote server address
    pub server_addr: String,
    /// Remote port of the first tunnel entry
    pub remote_port: i64,
}

/// Strip the incompatible flag from the configuration file
///
/// Parses the TOML and checks the tunnel entries for the `autoTLS` key;
/// when present, rewrites the file with every line naming that key
/// removed and returns how many lines were dropped. A clean file is left
/// byte-identical, so the patch is idempotent and tolerates the flag
/// reappearing after the operator re-downloads a template.
pub fn sanitize_config(path: &Path) -> Result<usize> {
    let content = fs::read_to_string(path)?;
    let doc: toml::Value = toml::from_str(&content)?;

    let has_flag = doc
        .get("proxies")
        .and_then(|v| v.as_array())
        .map(|proxies| proxies.iter().any(|p| p.get(INCOMPATIBLE_FLAG).is_some()))
        .unwrap_or(false);

    if !has_flag {
        debug!("No {} entries in {}", INCOMPATIBLE_FLAG, path.display());
        return Ok(0);
    }

    info!("Detected {} entries in {}, removing", INCOMPATIBLE_FLAG, path.display());

    let mut kept = String::with_capacity(content.len());
    let mut removed = 0usize;
    for line in content.lines() {
        if line.trim_start().starts_with(INCOMPATIBLE_FLAG) {
            removed += 1;
            continue;
        }
        kept.push_str(line);
        kept.push('\n');
    }

    fs::write(path, kept)?;
    info!("Removed {} {} line(s) from {}", removed, INCOMPATIBLE_FLAG, path.display());
    Ok(removed)
}

/// Read the public endpoint from the configuration file
///
/// Returns `None` when the server address or the first tunnel entry's
/// remote port is missing; the endpoint announcement is informational and
/// never blocks a start.
pub fn resolve_endpoint(path: &Path) -> Result<Option<TunnelEndpoint>> {
    let content = fs::read_to_string(path)?;
    let doc: toml::Value = toml::from_str(&content)?;

    let server_addr = doc.get("serverAddr").and_then(|v| v.as_str());
    let remote_port = doc
        .get("proxies")
        .and_then(|v| v.as_array())
        .and_then(|proxies| proxies.first())
        .and_then(|p| p.get("remotePort"))
        .and_then(|v| v.as_integer());

    Ok(match (server_addr, remote_port) {
        (Some(addr), Some(port)) => Some(TunnelEndpoint {
            server_addr: addr.to_string(),
            remote_port: port,
        }),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const FLAGGED_CONFIG: &str = r#"serverAddr = "frp.example.com"
serverPort = 7000

[[proxies]]
name = "minecraft"
type = "tcp"
localPort = 25565
remotePort = 25570
autoTLS = true
"#;

    fn write_config(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("frpc.toml");
        fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn sanitize_strips_only_flagged_lines() {
        let (_dir, path) = write_config(FLAGGED_CONFIG);

        let removed = sanitize_config(&path).expect("sanitize ok");
        assert_eq!(removed, 1);

        let content = fs::read_to_string(&path).unwrap();
        assert!(!content.contains("autoTLS"));
        assert!(content.contains("remotePort = 25570"));
        assert!(content.contains("[[proxies]]"));
        // The result must still be valid TOML
        toml::from_str::<toml::Value>(&content).expect("still parseable");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let (_dir, path) = write_config(FLAGGED_CONFIG);

        sanitize_config(&path).expect("first pass ok");
        let after_first = fs::read_to_string(&path).unwrap();

        let removed = sanitize_config(&path).expect("second pass ok");
        assert_eq!(removed, 0);
        let after_second = fs::read_to_string(&path).unwrap();
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn sanitize_leaves_clean_file_untouched() {
        let clean = "serverAddr = \"frp.example.com\"\n\n[[proxies]]\nremotePort = 9000\n";
        let (_dir, path) = write_config(clean);

        let removed = sanitize_config(&path).expect("sanitize ok");
        assert_eq!(removed, 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), clean);
    }

    #[test]
    fn sanitize_strips_indented_flags() {
        let config = "[[proxies]]\n  autoTLS = true\nremotePort = 9000\n";
        let (_dir, path) = write_config(config);

        let removed = sanitize_config(&path).expect("sanitize ok");
        assert_eq!(removed, 1);
        assert!(!fs::read_to_string(&path).unwrap().contains("autoTLS"));
    }

    #[test]
    fn endpoint_is_resolved_from_config() {
        let (_dir, path) = write_config(FLAGGED_CONFIG);

        let endpoint = resolve_endpoint(&path).expect("resolve ok").expect("present");
        assert_eq!(endpoint.server_addr, "frp.example.com");
        assert_eq!(endpoint.remote_port, 25570);
    }

    #[test]
    fn endpoint_is_absent_without_proxies() {
        let (_dir, path) = write_config("serverAddr = \"frp.example.com\"\n");
        assert_eq!(resolve_endpoint(&path).expect("resolve ok"), None);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let (_dir, path) = write_config("serverAddr = [unclosed\n");
        assert!(sanitize_config(&path).is_err());
    }
}
