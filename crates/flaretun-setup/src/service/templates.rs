use std::fmt::Write as _;

use super::ServiceDescriptor;

/// Generate the systemd unit file for the tunnel service.
pub fn systemd_unit(descriptor: &ServiceDescriptor, restart_sec: u64) -> String {
    let user = descriptor
        .run_as
        .as_deref()
        .map(|u| format!("User={u}\nGroup={u}\n"))
        .unwrap_or_default();
    format!(
        r"[Unit]
Description=Cloudflare quick tunnel ({name})
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
{user}ExecStart={exec}
Restart=on-failure
RestartSec={restart_sec}

[Install]
WantedBy=multi-user.target
",
        name = descriptor.name,
        exec = systemd_exec_line(descriptor),
    )
}

/// `ExecStart=` value: binary and arguments, quoted where needed.
fn systemd_exec_line(descriptor: &ServiceDescriptor) -> String {
    let mut line = systemd_quote(&descriptor.binary.display().to_string());
    for arg in &descriptor.args {
        line.push(' ');
        line.push_str(&systemd_quote(arg));
    }
    line
}

fn systemd_quote(arg: &str) -> String {
    let needs_quotes = arg.is_empty()
        || arg
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\' | ';' | '$' | '%'));
    if !needs_quotes {
        return arg.to_string();
    }
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        match c {
            '"' | '\\' => {
                quoted.push('\\');
                quoted.push(c);
            }
            '$' => quoted.push_str("$$"),
            '%' => quoted.push_str("%%"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Command line registered as the Windows service `binPath`.
pub fn windows_command_line(descriptor: &ServiceDescriptor) -> String {
    let mut line = windows_quote(&descriptor.binary.display().to_string());
    for arg in &descriptor.args {
        let _ = write!(line, " {}", windows_quote(arg));
    }
    line
}

fn windows_quote(arg: &str) -> String {
    if arg.is_empty() || arg.contains([' ', '\t']) {
        format!("\"{arg}\"")
    } else {
        arg.to_string()
    }
}
