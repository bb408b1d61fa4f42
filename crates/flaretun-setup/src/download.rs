//! Acquisition of the tunnel binary.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use flaretun_core::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Make sure the binary exists at `dest`, downloading it from `url` if not.
///
/// An existing file is reused as is. Every failure is fatal and its message
/// names `url` so the operator can fetch the file by hand.
pub fn ensure_binary(url: &str, dest: &Path) -> Result<()> {
    if let Ok(metadata) = fs::metadata(dest)
        && metadata.is_file()
    {
        tracing::info!(
            "using existing binary {} ({})",
            dest.display(),
            human_size(metadata.len())
        );
        return Ok(());
    }

    tracing::info!("downloading {url}");
    let size = download(url, dest).map_err(|e| {
        Error::Setup(format!(
            "failed to download the tunnel binary: {e}\n\
             download it manually from {url} and save it as {}",
            dest.display()
        ))
    })?;
    tracing::info!("saved {} ({})", dest.display(), human_size(size));
    Ok(())
}

fn download(url: &str, dest: &Path) -> anyhow::Result<u64> {
    // reqwest is built without a default crypto provider. Err means one is
    // already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let client = reqwest::blocking::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(concat!("flaretun-setup/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let mut response = client.get(url).send()?.error_for_status()?;

    if let Some(dir) = dest.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let partial = partial_path(dest);
    let written = {
        let mut file = File::create(&partial)?;
        let written = response.copy_to(&mut file);
        file.sync_all()?;
        written
    };
    let written = match written {
        Ok(n) => n,
        Err(e) => {
            let _ = fs::remove_file(&partial);
            return Err(e.into());
        }
    };
    fs::rename(&partial, dest)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dest, fs::Permissions::from_mode(0o755))?;
    }
    Ok(written)
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

#[allow(clippy::cast_precision_loss)]
fn human_size(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / 1_048_576.0)
}
