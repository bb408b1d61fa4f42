use flaretun_core::{Error, Result};

use super::JournalReader;
use crate::cmd;

/// Reads unit output through `journalctl`, message text only.
#[derive(Debug, Default, Clone, Copy)]
pub struct JournalctlReader;

impl JournalReader for JournalctlReader {
    fn read_recent(&self, unit: &str, lines: usize) -> Result<String> {
        let lines = lines.to_string();
        let out = cmd::capture(
            "journalctl",
            &["-u", unit, "-n", &lines, "--no-pager", "-o", "cat"],
        )?;
        if !out.success {
            return Err(Error::Discovery(format!(
                "journalctl -u {unit} failed: {}",
                out.stderr.trim()
            )));
        }
        Ok(out.stdout)
    }
}
