use std::fmt;
use std::path::PathBuf;

use flaretun_core::Error;

/// Release location of the upstream tunnel binary.
const RELEASE_BASE_URL: &str = "https://github.com/cloudflare/cloudflared/releases/download";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Linux,
    Windows,
    MacOs,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Amd64,
    Arm64,
    Arm,
    X86,
    Other,
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linux => write!(f, "linux"),
            Self::Windows => write!(f, "windows"),
            Self::MacOs => write!(f, "macos"),
            Self::Other => write!(f, "unknown"),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Amd64 => write!(f, "amd64"),
            Self::Arm64 => write!(f, "arm64"),
            Self::Arm => write!(f, "arm"),
            Self::X86 => write!(f, "386"),
            Self::Other => write!(f, "unknown"),
        }
    }
}

/// Operating system and CPU architecture of the host, probed once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostPlatform {
    pub os: Os,
    pub arch: Arch,
}

impl HostPlatform {
    pub fn detect() -> Self {
        Self::from_consts(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Map `std::env::consts` style names onto a platform.
    pub fn from_consts(os: &str, arch: &str) -> Self {
        let os = match os {
            "linux" => Os::Linux,
            "windows" => Os::Windows,
            "macos" => Os::MacOs,
            _ => Os::Other,
        };
        let arch = match arch {
            "x86_64" => Arch::Amd64,
            "aarch64" => Arch::Arm64,
            "arm" => Arch::Arm,
            "x86" => Arch::X86,
            _ => Arch::Other,
        };
        Self { os, arch }
    }

    /// Name of the single-file release asset for this platform.
    ///
    /// macOS releases ship as archives only, so they are not supported here.
    pub fn asset_name(&self) -> Result<&'static str, Error> {
        match (self.os, self.arch) {
            (Os::Linux, Arch::Amd64) => Ok("cloudflared-linux-amd64"),
            (Os::Linux, Arch::Arm64) => Ok("cloudflared-linux-arm64"),
            (Os::Linux, Arch::Arm) => Ok("cloudflared-linux-arm"),
            (Os::Linux, Arch::X86) => Ok("cloudflared-linux-386"),
            (Os::Windows, Arch::Amd64 | Arch::Arm64) => Ok("cloudflared-windows-amd64.exe"),
            (Os::Windows, Arch::X86) => Ok("cloudflared-windows-386.exe"),
            (os, arch) => Err(Error::Setup(format!(
                "unsupported platform {os}/{arch}: flaretun-setup supports Linux (systemd) \
                 and Windows hosts"
            ))),
        }
    }

    /// Fail early on hosts without a supported binary or service manager.
    pub fn ensure_supported(&self) -> Result<(), Error> {
        self.asset_name().map(|_| ())
    }

    pub fn download_url(&self, version: &str) -> Result<String, Error> {
        Ok(format!("{RELEASE_BASE_URL}/{version}/{}", self.asset_name()?))
    }

    pub const fn binary_file_name(&self) -> &'static str {
        match self.os {
            Os::Windows => "cloudflared.exe",
            _ => "cloudflared",
        }
    }

    pub fn default_install_dir(&self) -> PathBuf {
        match self.os {
            Os::Windows => program_data().join("cloudflared"),
            _ => PathBuf::from("/opt/cloudflared"),
        }
    }

    /// Default service log location: the system log directory.
    pub fn default_log_path(&self) -> PathBuf {
        match self.os {
            Os::Windows => self.default_install_dir().join("cloudflared.log"),
            _ => PathBuf::from("/var/log/cloudflared/cloudflared.log"),
        }
    }
}

fn program_data() -> PathBuf {
    std::env::var_os("ProgramData").map_or_else(|| PathBuf::from(r"C:\ProgramData"), PathBuf::from)
}
