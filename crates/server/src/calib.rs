use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use deskslice_protocol::Calibration;

/// Read calibration data from disk. A missing file yields the zero value.
pub fn load(path: &Path) -> Result<Calibration> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Calibration::default()),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    serde_json::from_slice(&data).with_context(|| format!("parsing {}", path.display()))
}

/// Persist calibration data, creating parent directories as needed.
///
/// The file is written to a sibling temp path and renamed into place so a
/// crash mid-write never leaves a truncated calibration behind.
pub fn save(path: &Path, calib: &Calibration) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }

    let data = serde_json::to_vec_pretty(calib).context("encoding calibration")?;
    let tmp = path.with_extension("json.tmp");
    write_private(&tmp, &data).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("renaming {} into place", tmp.display()))?;
    Ok(())
}

#[cfg(unix)]
fn create_dir_all(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new().recursive(true).mode(0o755).create(path)
}

#[cfg(not(unix))]
fn create_dir_all(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}

#[cfg(unix)]
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;
    let mut f = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    f.write_all(data)?;
    f.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, data)
}
