use super::{Answer, DnsBackend};
use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::process::Command;

/// NslookupBackend asks the platform `nslookup` tool to query a given server
/// and scrapes the address out of its text output
#[derive(Debug, Clone)]
pub struct NslookupBackend {
    program: String,
}

impl NslookupBackend {
    pub fn new() -> Self {
        Self {
            program: "nslookup".to_string(),
        }
    }

    /// with_program swaps the executable, mainly for odd installs
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for NslookupBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DnsBackend for NslookupBackend {
    async fn resolve_via(
        &self,
        server: Ipv4Addr,
        hostname: &str,
        timeout: Duration,
    ) -> Result<Answer> {
        // nslookup would read a leading dash as an option
        if hostname.starts_with('-') {
            bail!("refusing to pass {hostname:?} to {}", self.program);
        }

        let output = Command::new(&self.program)
            .arg(hostname)
            .arg(server.to_string())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(timeout, output)
            .await
            .map_err(|_| anyhow!("{} timed out after {timeout:?}", self.program))??;

        if !output.status.success() {
            bail!("{} exited with {}", self.program, output.status);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_nslookup_output(&stdout, server)
            .ok_or_else(|| anyhow!("no usable address for {hostname} in {server}'s answer"))
    }
}

/// parse_nslookup_output extracts the target's IPv4 address.
///
/// The answer section starts at the first `Name:` line; the first
/// `Address:` after it holding a dotted-quad wins. Failing that, any
/// `Address:` line not mentioning `Server:` is accepted as long as its value
/// is not the queried server itself.
pub fn parse_nslookup_output(output: &str, server: Ipv4Addr) -> Option<Answer> {
    let mut in_answer = false;

    for line in output.lines().map(str::trim) {
        if line.starts_with("Name:") {
            in_answer = true;
            continue;
        }

        if in_answer {
            if let Some(ip) = line.strip_prefix("Address:").and_then(candidate) {
                return Some(Answer {
                    ip,
                    fallback: false,
                });
            }
        }
    }

    output
        .lines()
        .filter(|line| line.contains("Address:") && !line.contains("Server:"))
        .filter_map(|line| line.split("Address:").nth(1))
        .filter_map(candidate)
        .find(|&ip| ip != server)
        .map(|ip| Answer { ip, fallback: true })
}

/// candidate validates one `Address:` value as a strict dotted-quad
fn candidate(value: &str) -> Option<Ipv4Addr> {
    let value = value.trim();
    if value.is_empty() || !value.contains('.') || value.contains(':') {
        return None;
    }
    value.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER: Ipv4Addr = Ipv4Addr::new(10, 19, 1, 23);

    #[test]
    fn test_answer_section_windows_format() {
        let output = "\
Server:  dns1.corp.example
Address:  10.19.1.23

Name:    intranet.corp.example
Address:  10.44.0.12
";
        let answer = parse_nslookup_output(output, SERVER).unwrap();
        assert_eq!(answer.ip, Ipv4Addr::new(10, 44, 0, 12));
        assert!(!answer.fallback);
    }

    #[test]
    fn test_answer_section_skips_ipv6() {
        let output = "\
Server:\t\t10.19.1.23
Address:\t10.19.1.23#53

Non-authoritative answer:
Name:\texample.com
Address: 2606:2800:220:1:248:1893:25c8:1946
Name:\texample.com
Address: 93.184.216.34
";
        let answer = parse_nslookup_output(output, SERVER).unwrap();
        assert_eq!(answer.ip, Ipv4Addr::new(93, 184, 216, 34));
        assert!(!answer.fallback);
    }

    #[test]
    fn test_server_address_is_never_returned() {
        // No Name: line, so only the loose scan applies
        let output = "\
Address:  10.19.1.23
Address:  10.44.0.99
";
        let answer = parse_nslookup_output(output, SERVER).unwrap();
        assert_eq!(answer.ip, Ipv4Addr::new(10, 44, 0, 99));
        assert!(answer.fallback);
    }

    #[test]
    fn test_malformed_addresses_are_skipped() {
        let output = "\
Name:    host.corp
Address:  10.44.0
Address:  300.1.1.1
Address:  10.44.0.7
";
        let answer = parse_nslookup_output(output, SERVER).unwrap();
        assert_eq!(answer.ip, Ipv4Addr::new(10, 44, 0, 7));
    }

    #[test]
    fn test_nxdomain_yields_nothing() {
        let output = "\
Server:  dns1.corp.example
Address:  10.19.1.23

*** dns1.corp.example can't find nowhere.invalid: Non-existent domain
";
        assert_eq!(parse_nslookup_output(output, SERVER), None);
    }

    /// Writes an executable shell script standing in for nslookup
    #[cfg(unix)]
    fn fake_nslookup(name: &str, body: &str) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join(format!("splitsocks-{}-{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("nslookup");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_queries_named_server_and_parses_answer() {
        let script = fake_nslookup(
            "answer",
            r#"[ "$#" -eq 2 ] && [ "$1" = "intranet.corp" ] && [ "$2" = "10.19.1.23" ] || exit 3
printf 'Server:  10.19.1.23\nAddress:  10.19.1.23#53\n\nName:  intranet.corp\nAddress: 10.44.0.12\n'"#,
        );
        let backend = NslookupBackend::with_program(script.to_string_lossy());

        let answer = backend
            .resolve_via(SERVER, "intranet.corp", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            answer,
            Answer {
                ip: Ipv4Addr::new(10, 44, 0, 12),
                fallback: false
            }
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_an_error() {
        // Prints a usable address but reports failure
        let script = fake_nslookup(
            "exit",
            "printf 'Name:  intranet.corp\nAddress: 10.44.0.12\n'\nexit 1",
        );
        let backend = NslookupBackend::with_program(script.to_string_lossy());

        let result = backend
            .resolve_via(SERVER, "intranet.corp", Duration::from_secs(5))
            .await;
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_lookup_times_out() {
        let script = fake_nslookup("slow", "sleep 10");
        let backend = NslookupBackend::with_program(script.to_string_lossy());

        let started = std::time::Instant::now();
        let err = backend
            .resolve_via(SERVER, "intranet.corp", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_dash_hostname_is_not_passed_as_option() {
        // Any spawn would fail loudly; the guard must trip first
        let backend = NslookupBackend::with_program("definitely-not-nslookup-binary");
        let err = backend
            .resolve_via(SERVER, "-port=5353", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("refusing"));
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let backend = NslookupBackend::with_program("definitely-not-nslookup-binary");
        let result = backend
            .resolve_via(SERVER, "example.com", Duration::from_secs(1))
            .await;
        assert!(result.is_err());
    }
}
