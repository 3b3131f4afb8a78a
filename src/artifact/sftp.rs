//! SFTP access to the storage host
//!
//! One authenticated ssh master connection is opened at connect time and
//! every operation runs an `sftp` batch multiplexed over it. The master is
//! shut down when the [`SftpRemote`] is dropped, whichever way the session
//! ends.
//!
//! Password authentication goes through `sshpass -e` so the password never
//! appears on a command line.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::sleep;
use std::time::{Duration, Instant};

use super::remote::{DirEntry, EntryKind, RemoteError, RemoteFs};
use crate::config::StorageSettings;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Poll interval while waiting for the master connection
const CHECK_INTERVAL: Duration = Duration::from_millis(200);

/// SFTP session configuration
#[derive(Clone)]
pub struct SftpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: Option<String>,
    pub key_path: Option<String>,
    /// Directory every relative path is resolved against
    pub root: String,
    pub connect_timeout: Duration,
    pub server_alive_interval: u32,
}

impl From<&StorageSettings> for SftpConfig {
    fn from(settings: &StorageSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.sftp_port,
            user: settings.user.clone(),
            pass: settings.pass.clone(),
            key_path: settings.key_path.clone(),
            root: settings.root.clone(),
            connect_timeout: settings.connect_timeout,
            server_alive_interval: 15,
        }
    }
}

impl std::fmt::Debug for SftpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

/// Storage session over a multiplexed ssh connection
pub struct SftpRemote {
    config: SftpConfig,
    control_path: PathBuf,
    master: Option<Child>,
}

impl SftpRemote {
    /// Open and authenticate the master connection
    pub fn connect(config: SftpConfig) -> Result<Self, RemoteError> {
        let session = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
        let control_path =
            std::env::temp_dir().join(format!("lava-ctl-{}-{}.sock", std::process::id(), session));

        let mut command = ssh_command(&config);
        command
            .args(["-M", "-N", "-S"])
            .arg(&control_path)
            .args(common_options(&config))
            .args(["-p", &config.port.to_string()])
            .arg(destination(&config))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let master = command
            .spawn()
            .map_err(|e| RemoteError::Connection(format!("failed to spawn ssh: {}", e)))?;

        let mut remote = Self {
            config,
            control_path,
            master: Some(master),
        };
        remote.wait_for_master()?;

        tracing::debug!(host = %remote.config.host, port = remote.config.port, "storage session open");
        Ok(remote)
    }

    fn wait_for_master(&mut self) -> Result<(), RemoteError> {
        let started = Instant::now();
        loop {
            if let Some(master) = self.master.as_mut() {
                if let Ok(Some(status)) = master.try_wait() {
                    let stderr = master
                        .stderr
                        .take()
                        .and_then(|mut pipe| {
                            let mut text = String::new();
                            std::io::Read::read_to_string(&mut pipe, &mut text).ok()?;
                            Some(text)
                        })
                        .unwrap_or_default();
                    self.master = None;
                    return Err(RemoteError::Connection(format!(
                        "ssh exited with {}: {}",
                        status,
                        stderr.trim()
                    )));
                }
            }

            if self.control_check() {
                return Ok(());
            }

            if started.elapsed() >= self.config.connect_timeout {
                return Err(RemoteError::Connection(format!(
                    "timed out connecting to {}:{}",
                    self.config.host, self.config.port
                )));
            }
            sleep(CHECK_INTERVAL);
        }
    }

    fn control_check(&self) -> bool {
        Command::new("ssh")
            .arg("-S")
            .arg(&self.control_path)
            .args(["-O", "check"])
            .arg(destination(&self.config))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Run an sftp batch over the master connection
    fn run_batch(&self, batch: &str, subject: &str) -> Result<String, RemoteError> {
        let mut child = Command::new("sftp")
            .args(["-b", "-"])
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .args(["-o", "ControlMaster=no", "-o", "BatchMode=yes"])
            .args(["-P", &self.config.port.to_string()])
            .arg(destination(&self.config))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RemoteError::Connection(format!("failed to spawn sftp: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(batch.as_bytes())
                .map_err(|e| RemoteError::Io(format!("writing sftp batch: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| RemoteError::Io(format!("sftp process error: {}", e)))?;
        classify(output, subject)
    }

    /// Batch prologue moving into the storage root
    fn batch(&self) -> String {
        format!("cd {}\n", quote(&self.config.root))
    }

    fn scratch_path(&self) -> PathBuf {
        let n = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("lava-ctl-{}-{}.tmp", std::process::id(), n))
    }
}

impl RemoteFs for SftpRemote {
    fn put(&mut self, local: &Path, remote: &str) -> Result<u64, RemoteError> {
        let size = fs::metadata(local)
            .map_err(|e| RemoteError::Io(format!("{}: {}", local.display(), e)))?
            .len();
        let mut batch = self.batch();
        batch.push_str(&format!("put {} {}\n", quote(&local.to_string_lossy()), quote(remote)));

        tracing::info!(file = %local.display(), remote = %remote, bytes = size, "uploading");
        self.run_batch(&batch, remote)?;
        Ok(size)
    }

    fn read(&mut self, remote: &str) -> Result<Vec<u8>, RemoteError> {
        let scratch = self.scratch_path();
        let mut batch = self.batch();
        batch.push_str(&format!("get {} {}\n", quote(remote), quote(&scratch.to_string_lossy())));

        let result = self
            .run_batch(&batch, remote)
            .and_then(|_| fs::read(&scratch).map_err(|e| RemoteError::Io(e.to_string())));
        let _ = fs::remove_file(&scratch);
        result
    }

    fn write(&mut self, remote: &str, contents: &[u8]) -> Result<(), RemoteError> {
        let scratch = self.scratch_path();
        fs::write(&scratch, contents).map_err(|e| RemoteError::Io(e.to_string()))?;

        let mut batch = self.batch();
        batch.push_str(&format!("put {} {}\n", quote(&scratch.to_string_lossy()), quote(remote)));
        let result = self.run_batch(&batch, remote).map(|_| ());
        let _ = fs::remove_file(&scratch);
        result
    }

    fn list_dir(&mut self, remote: &str) -> Result<Vec<DirEntry>, RemoteError> {
        let mut batch = self.batch();
        batch.push_str(&format!("ls -l {}\n", quote(remote)));
        let stdout = self.run_batch(&batch, remote)?;
        Ok(parse_listing(&stdout))
    }

    fn create_dir_all(&mut self, remote: &str) -> Result<(), RemoteError> {
        let mut batch = self.batch();
        let mut current = String::new();
        for part in remote.split('/').filter(|p| !p.is_empty() && *p != ".") {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(part);
            // Leading '-' lets the batch continue when the directory exists
            batch.push_str(&format!("-mkdir {}\n", quote(&current)));
        }
        self.run_batch(&batch, remote).map(|_| ())
    }
}

impl Drop for SftpRemote {
    fn drop(&mut self) {
        let _ = Command::new("ssh")
            .arg("-S")
            .arg(&self.control_path)
            .args(["-O", "exit"])
            .arg(destination(&self.config))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        if let Some(mut master) = self.master.take() {
            let _ = master.kill();
            let _ = master.wait();
        }
        let _ = fs::remove_file(&self.control_path);
        tracing::debug!(host = %self.config.host, "storage session closed");
    }
}

fn ssh_command(config: &SftpConfig) -> Command {
    match &config.pass {
        Some(pass) if config.key_path.is_none() => {
            let mut command = Command::new("sshpass");
            command.env("SSHPASS", pass).args(["-e", "ssh"]);
            command
        }
        _ => Command::new("ssh"),
    }
}

fn common_options(config: &SftpConfig) -> Vec<String> {
    let mut args = vec![
        "-o".to_string(),
        format!("ConnectTimeout={}", config.connect_timeout.as_secs().max(1)),
        "-o".to_string(),
        format!("ServerAliveInterval={}", config.server_alive_interval),
        "-o".to_string(),
        "StrictHostKeyChecking=accept-new".to_string(),
        "-o".to_string(),
        "ControlPersist=no".to_string(),
    ];
    match &config.key_path {
        Some(key) => {
            args.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
            args.extend(["-i".to_string(), key.clone()]);
        }
        None => args.extend([
            "-o".to_string(),
            "PreferredAuthentications=password,keyboard-interactive".to_string(),
        ]),
    }
    args
}

fn destination(config: &SftpConfig) -> String {
    format!("{}@{}", config.user, config.host)
}

/// Double-quote a path for an sftp batch
fn quote(path: &str) -> String {
    format!("\"{}\"", path.replace('\\', "\\\\").replace('"', "\\\""))
}

fn classify(output: Output, subject: &str) -> Result<String, RemoteError> {
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if output.status.success() {
        return Ok(stdout);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let lower = stderr.to_lowercase();
    if lower.contains("no such file") || lower.contains("not found") {
        Err(RemoteError::NotFound(subject.to_string()))
    } else if lower.contains("connection") || lower.contains("control socket") || lower.contains("permission denied (") {
        Err(RemoteError::Connection(stderr.trim().to_string()))
    } else {
        Err(RemoteError::Io(format!(
            "sftp exited with {}: {}",
            output.status,
            stderr.trim()
        )))
    }
}

/// Parse `ls -l` output from an sftp batch
fn parse_listing(stdout: &str) -> Vec<DirEntry> {
    stdout
        .lines()
        .filter(|line| !line.starts_with("sftp>"))
        .filter_map(|line| {
            let mode = line.split_whitespace().next()?;
            let name = after_fields(line.trim_end_matches('\r'), 8)?;
            if name.is_empty() || name == "." || name == ".." {
                return None;
            }
            let kind = match mode.chars().next()? {
                'd' => EntryKind::Directory,
                '-' => EntryKind::File,
                _ => EntryKind::Other,
            };
            // Listings of a subdirectory print paths; keep the last component
            let name = name.rsplit('/').next().unwrap_or(name).to_string();
            Some(DirEntry { name, kind })
        })
        .collect()
}

/// Remainder of `line` after `count` whitespace-separated fields, verbatim
fn after_fields(line: &str, count: usize) -> Option<&str> {
    let mut rest = line.trim_start();
    for _ in 0..count {
        let end = rest.find(char::is_whitespace)?;
        rest = rest[end..].trim_start();
    }
    Some(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listing() {
        let stdout = "sftp> cd \"/data/lava-ftp\"\n\
                      sftp> ls -l \".\"\n\
                      drwxr-xr-x    2 lava     lava         4096 Mar  7 10:00 qemux862024-03-07\n\
                      -rw-r--r--    1 lava     lava          120 Mar  7 10:00 notes.txt\n\
                      drwxr-xr-x    2 lava     lava         4096 Mar  7 10:00 with space\n\
                      lrwxrwxrwx    1 lava     lava            4 Mar  7 10:00 latest\n";
        let entries = parse_listing(stdout);
        assert_eq!(
            entries,
            vec![
                DirEntry { name: "qemux862024-03-07".to_string(), kind: EntryKind::Directory },
                DirEntry { name: "notes.txt".to_string(), kind: EntryKind::File },
                DirEntry { name: "with space".to_string(), kind: EntryKind::Directory },
                DirEntry { name: "latest".to_string(), kind: EntryKind::Other },
            ]
        );
    }

    #[test]
    fn test_parse_listing_keeps_inner_spacing() {
        let stdout = "drwxr-xr-x    2 lava     lava         4096 Mar  7 10:00 a  b\r\n\
                      drwxr-xr-x    2 lava     lava         4096 Mar  7 10:00 \n";
        assert_eq!(
            parse_listing(stdout),
            vec![DirEntry { name: "a  b".to_string(), kind: EntryKind::Directory }]
        );
        assert_eq!(after_fields("  one two   three  four", 2), Some("three  four"));
        assert_eq!(after_fields("one", 2), None);
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("a b/c"), "\"a b/c\"");
        assert_eq!(quote("say \"hi\""), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn test_password_goes_through_env() {
        let config = SftpConfig {
            host: "lava.local".to_string(),
            port: 2040,
            user: "ftp".to_string(),
            pass: Some("hunter2".to_string()),
            key_path: None,
            root: "/data/lava-ftp".to_string(),
            connect_timeout: Duration::from_secs(5),
            server_alive_interval: 15,
        };
        let command = ssh_command(&config);
        assert_eq!(command.get_program(), "sshpass");
        assert!(command.get_args().all(|arg| arg != "hunter2"));
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn test_key_auth_uses_batch_mode() {
        let config = SftpConfig {
            host: "lava.local".to_string(),
            port: 22,
            user: "ftp".to_string(),
            pass: None,
            key_path: Some("/keys/id".to_string()),
            root: "/data/lava-ftp".to_string(),
            connect_timeout: Duration::from_secs(5),
            server_alive_interval: 15,
        };
        assert_eq!(ssh_command(&config).get_program(), "ssh");
        let options = common_options(&config);
        assert!(options.contains(&"BatchMode=yes".to_string()));
        assert!(options.contains(&"/keys/id".to_string()));
    }
}
