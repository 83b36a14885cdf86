//! Direct management of resolv.conf
//!
//! Replaces the live resolv.conf with a generated file, keeping the host's
//! original under a backup path until teardown. Ownership is decided from
//! the file itself on every call, because other programs may rewrite
//! resolv.conf at any time.
//!
//! This is precarious in one respect: nothing reverts the file if the
//! tunnel disappears. Callers must call [`DnsBackend::down`] or
//! [`DnsBackend::close`] before exit, and again on startup after a crash.

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use tempfile::NamedTempFile;

use super::resolv::{read_resolv_file, write_resolv_conf, GENERATED_MARKER};
use super::{Config, DnsBackend, OSConfig, ResolvPaths};
use crate::error::Result;
use crate::exec::{argv, CommandRunner};

const RESOLVED_UNIT: &str = "systemd-resolved.service";

/// DNS backend that writes resolv.conf itself
pub struct DirectBackend {
    paths: ResolvPaths,
    runner: Arc<dyn CommandRunner>,
}

impl DirectBackend {
    pub fn new(paths: ResolvPaths, runner: Arc<dyn CommandRunner>) -> Self {
        Self { paths, runner }
    }

    /// Whether the live resolv.conf is a regular file written by us
    pub fn owned(&self) -> Result<bool> {
        let meta = match fs::metadata(&self.paths.resolv_conf) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if !meta.is_file() {
            return Ok(false);
        }

        let contents = match fs::read(&self.paths.resolv_conf) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        Ok(contains(&contents, GENERATED_MARKER.as_bytes()))
    }

    /// Move the host's resolv.conf aside, unless it is already ours
    fn backup_config(&self) -> Result<()> {
        if !exists(&self.paths.resolv_conf)? {
            // Nothing to back up; also drop any stale backup so it is
            // never restored over a host that had no resolv.conf.
            remove_if_exists(&self.paths.backup)?;
            return Ok(());
        }

        if self.owned()? {
            return Ok(());
        }

        log::info!(
            "dns: backing up {} to {}",
            self.paths.resolv_conf.display(),
            self.paths.backup.display()
        );
        fs::rename(&self.paths.resolv_conf, &self.paths.backup)?;
        Ok(())
    }

    fn write_config(&self, config: &Config) -> Result<()> {
        self.backup_config()?;

        let contents = write_resolv_conf(&config.nameservers, &config.search_domains);
        atomic_write(&self.paths.resolv_conf, contents.as_bytes())?;
        log::info!(
            "dns: wrote {} ({} nameservers, {} search domains)",
            self.paths.resolv_conf.display(),
            config.nameservers.len(),
            config.search_domains.len()
        );
        Ok(())
    }

    /// Return the live resolv.conf to the host's state
    ///
    /// - no backup, file ours: the host had no resolv.conf, remove ours
    /// - no backup otherwise: nothing to do
    /// - backup present, file foreign: someone else took over, drop backup
    /// - backup present otherwise: move the backup back into place
    fn restore_pristine(&self) -> Result<()> {
        let owned = self.owned()?;

        if !exists(&self.paths.backup)? {
            if owned {
                log::info!("dns: removing {}", self.paths.resolv_conf.display());
                remove_if_exists(&self.paths.resolv_conf)?;
            }
            return Ok(());
        }

        if exists(&self.paths.resolv_conf)? && !owned {
            log::info!(
                "dns: {} was replaced by another program, discarding backup",
                self.paths.resolv_conf.display()
            );
            remove_if_exists(&self.paths.backup)?;
            return Ok(());
        }

        log::info!(
            "dns: restoring {} from {}",
            self.paths.resolv_conf.display(),
            self.paths.backup.display()
        );
        fs::rename(&self.paths.backup, &self.paths.resolv_conf)?;
        Ok(())
    }

    /// Nudge systemd-resolved to pick up the new file; best effort.
    fn restart_resolved_if_running(&self) {
        if !cfg!(target_os = "linux") {
            return;
        }

        let active = self
            .runner
            .run(&argv(["systemctl", "is-active", RESOLVED_UNIT]))
            .is_ok();
        if !active {
            return;
        }

        if let Err(e) = self
            .runner
            .run(&argv(["systemctl", "restart", RESOLVED_UNIT]))
        {
            log::debug!("dns: restarting {} failed: {}", RESOLVED_UNIT, e);
        }
    }
}

impl DnsBackend for DirectBackend {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn up(&mut self, config: &Config) -> Result<()> {
        if config.nameservers.is_empty() && config.search_domains.is_empty() {
            self.restore_pristine()?;
        } else {
            self.write_config(config)?;
        }
        self.restart_resolved_if_running();
        Ok(())
    }

    fn down(&mut self) -> Result<()> {
        self.restore_pristine()?;
        self.restart_resolved_if_running();
        Ok(())
    }

    fn supports_split_dns(&self) -> bool {
        false
    }

    fn base_config(&self) -> Result<OSConfig> {
        let path = if self.owned()? {
            &self.paths.backup
        } else {
            &self.paths.resolv_conf
        };

        match read_resolv_file(path) {
            Err(e) if e.is_not_found() => Ok(OSConfig::default()),
            other => other,
        }
    }

    fn close(&mut self) -> Result<()> {
        for legacy in &self.paths.legacy {
            if let Err(e) = remove_if_exists(legacy) {
                log::debug!("dns: removing {}: {}", legacy.display(), e);
            }
        }
        self.down()
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn exists(path: &Path) -> Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Write via a temp file in the same directory and rename it into place
fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o644))?;
    }

    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
