//! Service lifecycle: install, remove, start and stop the bridge as a
//! systemd unit.

use crate::runtime::config::RuntimeConfig;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{info, warn};

pub const SERVICE_NAME: &str = "scale-bridge";
pub const SERVICE_DESCRIPTION: &str = "HTTP bridge for a serial weighing scale";
pub const SYSTEM_UNIT_DIR: &str = "/etc/systemd/system";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service unit {0} already exists")]
    AlreadyInstalled(PathBuf),
    #[error("service unit {0} is not installed")]
    NotInstalled(PathBuf),
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot run systemctl: {0}")]
    Spawn(#[source] io::Error),
    #[error("systemctl {args} exited with {status}")]
    Systemctl { args: String, status: String },
    #[error("service commands need systemd, which is not available on {0}")]
    Unsupported(&'static str),
}

#[derive(Debug, Clone)]
pub struct ServiceManager {
    unit_dir: PathBuf,
    name: String,
    /// `None` skips systemctl entirely; unit files are still managed.
    systemctl: Option<PathBuf>,
}

impl ServiceManager {
    /// The host's systemd instance. Fails on platforms without systemd.
    pub fn system() -> Result<Self, ServiceError> {
        if !cfg!(target_os = "linux") {
            return Err(ServiceError::Unsupported(std::env::consts::OS));
        }
        Ok(Self::new(SYSTEM_UNIT_DIR, SERVICE_NAME)
            .with_systemctl(Some(PathBuf::from("systemctl"))))
    }

    pub fn new(unit_dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            unit_dir: unit_dir.into(),
            name: name.into(),
            systemctl: None,
        }
    }

    pub fn with_systemctl(mut self, program: Option<PathBuf>) -> Self {
        self.systemctl = program;
        self
    }

    pub fn unit_path(&self) -> PathBuf {
        self.unit_dir.join(format!("{}.service", self.name))
    }

    pub fn install(&self, exe: &Path, config: &RuntimeConfig) -> Result<PathBuf, ServiceError> {
        let path = self.unit_path();
        if path.exists() {
            return Err(ServiceError::AlreadyInstalled(path));
        }
        fs::write(&path, render_unit(exe, config)).map_err(|source| ServiceError::Io {
            action: "write",
            path: path.clone(),
            source,
        })?;

        let registered = self
            .systemctl(&["daemon-reload"])
            .and_then(|()| self.systemctl(&["enable", &self.name]));
        if let Err(e) = registered {
            if let Err(remove) = fs::remove_file(&path) {
                warn!(
                    unit = %path.display(),
                    error = %remove,
                    "Cannot remove unit after failed install"
                );
            }
            return Err(e);
        }
        info!(unit = %path.display(), "Service unit installed");
        Ok(path)
    }

    pub fn uninstall(&self) -> Result<(), ServiceError> {
        let path = self.unit_path();
        if !path.exists() {
            return Err(ServiceError::NotInstalled(path));
        }
        self.systemctl(&["disable", &self.name])?;
        fs::remove_file(&path).map_err(|source| ServiceError::Io {
            action: "remove",
            path: path.clone(),
            source,
        })?;
        info!(unit = %path.display(), "Service unit removed");
        self.systemctl(&["daemon-reload"])
    }

    pub fn start(&self) -> Result<(), ServiceError> {
        self.require_installed()?;
        self.systemctl(&["start", &self.name])?;
        info!(service = %self.name, "Service started");
        Ok(())
    }

    pub fn stop(&self) -> Result<(), ServiceError> {
        self.require_installed()?;
        self.systemctl(&["stop", &self.name])?;
        info!(service = %self.name, "Service stopped");
        Ok(())
    }

    fn require_installed(&self) -> Result<(), ServiceError> {
        let path = self.unit_path();
        if path.exists() {
            Ok(())
        } else {
            Err(ServiceError::NotInstalled(path))
        }
    }

    fn systemctl(&self, args: &[&str]) -> Result<(), ServiceError> {
        let Some(program) = &self.systemctl else {
            return Ok(());
        };
        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(ServiceError::Spawn)?;
        if status.success() {
            Ok(())
        } else {
            Err(ServiceError::Systemctl {
                args: args.join(" "),
                status: status.to_string(),
            })
        }
    }
}

/// Quote one `ExecStart` word for systemd.
fn quote_exec_arg(arg: &str) -> String {
    let escaped = arg.replace('%', "%%");
    if escaped.is_empty() || escaped.contains(|c: char| c.is_whitespace() || c == '"' || c == '\\')
    {
        format!(
            "\"{}\"",
            escaped.replace('\\', "\\\\").replace('"', "\\\"")
        )
    } else {
        escaped
    }
}

pub fn render_unit(exe: &Path, config: &RuntimeConfig) -> String {
    let exec = std::iter::once(exe.display().to_string())
        .chain(config.run_args())
        .map(|arg| quote_exec_arg(&arg))
        .collect::<Vec<_>>()
        .join(" ");

    format!(
        "[Unit]\n\
         Description={description}\n\
         After=network.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         ExecStart={exec}\n\
         Restart=on-failure\n\
         RestartSec=2\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        description = SERVICE_DESCRIPTION,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RuntimeConfig {
        RuntimeConfig {
            host: "0.0.0.0:1200".to_string(),
            serial_port: "/dev/ttyS2".to_string(),
            baud_rate: 4800,
            ..Default::default()
        }
    }

    #[test]
    fn unit_runs_bridge_with_configured_flags() {
        let unit = render_unit(Path::new("/usr/local/bin/scale-bridge"), &config());
        assert!(unit.contains(
            "ExecStart=/usr/local/bin/scale-bridge run --host 0.0.0.0:1200 --serial /dev/ttyS2 --baud 4800\n"
        ));
        assert!(unit.contains("WantedBy=multi-user.target"));
    }

    #[test]
    fn exec_words_are_quoted() {
        assert_eq!(quote_exec_arg("plain"), "plain");
        assert_eq!(quote_exec_arg("/opt/my scale/bin"), "\"/opt/my scale/bin\"");
        assert_eq!(quote_exec_arg("50%"), "50%%");
        assert_eq!(quote_exec_arg(""), "\"\"");
    }

    #[test]
    fn install_then_uninstall() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ServiceManager::new(dir.path(), "scale-test");
        let exe = Path::new("/usr/bin/scale-bridge");

        let path = manager.install(exe, &config()).unwrap();
        assert_eq!(path, dir.path().join("scale-test.service"));
        assert!(fs::read_to_string(&path).unwrap().contains("--baud 4800"));

        assert!(matches!(
            manager.install(exe, &config()),
            Err(ServiceError::AlreadyInstalled(_))
        ));

        manager.uninstall().unwrap();
        assert!(!path.exists());
        assert!(matches!(
            manager.uninstall(),
            Err(ServiceError::NotInstalled(_))
        ));
    }

    #[test]
    fn start_requires_installed_unit() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ServiceManager::new(dir.path(), "scale-test");
        assert!(matches!(manager.start(), Err(ServiceError::NotInstalled(_))));
        assert!(matches!(manager.stop(), Err(ServiceError::NotInstalled(_))));
    }

    #[cfg(unix)]
    #[test]
    fn failing_systemctl_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ServiceManager::new(dir.path(), "scale-test")
            .with_systemctl(Some(PathBuf::from("false")));
        fs::write(manager.unit_path(), "").unwrap();

        match manager.start() {
            Err(ServiceError::Systemctl { args, .. }) => assert_eq!(args, "start scale-test"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn failed_install_leaves_no_unit_behind() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ServiceManager::new(dir.path(), "scale-test")
            .with_systemctl(Some(PathBuf::from("false")));
        let exe = Path::new("/usr/bin/scale-bridge");

        assert!(matches!(
            manager.install(exe, &config()),
            Err(ServiceError::Systemctl { .. })
        ));
        assert!(!manager.unit_path().exists());

        // a retry reaches systemctl again instead of finding a stale unit
        assert!(matches!(
            manager.install(exe, &config()),
            Err(ServiceError::Systemctl { .. })
        ));
    }

    #[test]
    fn system_manager_requires_systemd_platform() {
        let manager = ServiceManager::system();
        if cfg!(target_os = "linux") {
            let manager = manager.unwrap();
            assert_eq!(
                manager.unit_path(),
                Path::new(SYSTEM_UNIT_DIR).join("scale-bridge.service")
            );
        } else {
            assert!(matches!(manager, Err(ServiceError::Unsupported(_))));
        }
    }
}
