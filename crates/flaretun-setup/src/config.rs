use std::fmt;

/// How the tunnel binary is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Run in the foreground; the public URL is printed by the binary itself.
    Foreground,
    /// Register with the host service manager and discover the URL afterwards.
    Service,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Foreground => write!(f, "foreground"),
            Self::Service => write!(f, "service"),
        }
    }
}

pub fn parse_mode(s: &str) -> Result<RunMode, String> {
    match s {
        "foreground" => Ok(RunMode::Foreground),
        "service" => Ok(RunMode::Service),
        other => Err(format!(
            "unknown mode: {other} (expected 'foreground' or 'service')"
        )),
    }
}

/// Schemes the tunnel binary accepts for its `--url` origin.
const ORIGIN_SCHEMES: &[&str] = &["http", "https", "tcp", "ssh", "rdp", "unix", "unix+tls"];

/// Validate the local origin the tunnel forwards to.
///
/// Accepts `host:port` (as in `127.0.0.1:8080`) or a URL with a scheme the
/// tunnel binary understands.
pub fn validate_local_addr(addr: &str) -> Result<String, String> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err("local address must not be empty".into());
    }
    if addr.chars().any(char::is_whitespace) {
        return Err(format!("local address must not contain spaces: {addr:?}"));
    }

    if let Some((scheme, rest)) = addr.split_once("://") {
        if !ORIGIN_SCHEMES.contains(&scheme) {
            return Err(format!(
                "unsupported scheme {scheme:?} (expected one of {})",
                ORIGIN_SCHEMES.join(", ")
            ));
        }
        if rest.is_empty() {
            return Err(format!("missing host after {scheme}://"));
        }
        return Ok(addr.to_string());
    }

    let Some((host, port)) = addr.rsplit_once(':') else {
        return Err(format!("expected host:port, got {addr:?}"));
    };
    if host.is_empty() {
        return Err(format!("missing host in {addr:?}"));
    }
    match port.parse::<u16>() {
        Ok(p) if p > 0 => Ok(addr.to_string()),
        _ => Err(format!("invalid port {port:?} in {addr:?}")),
    }
}
