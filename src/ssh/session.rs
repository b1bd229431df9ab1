use super::auth::{open_authenticated, Authenticator};
use super::command::CommandSession;
use super::settings::SessionSettings;
use super::{run_blocking, shell_quote, CommandResult, SessionOptions};
use crate::error::{AppError, AppResult};
use crate::logging::sanitize;
use crate::transfer::progress::{ProgressSink, ProgressTracker};
use once_cell::sync::OnceCell;
use ssh2::Session as Ssh2Session;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

const SCP_CHUNK_BYTES: usize = 32 * 1024;

/// Directories per `mkdir -p` invocation when preparing a folder upload
const MKDIR_BATCH: usize = 64;

const OUTPUT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Connection factory for one set of session settings.
///
/// Every call opens its own SSH transport and tears it down afterwards; a
/// long-lived channel is available through [`SecureShellSession::create_command_session`].
pub struct SecureShellSession {
    settings: Arc<SessionSettings>,
    auth: Arc<Authenticator>,
    options: SessionOptions,
    home: OnceCell<String>,
}

impl SecureShellSession {
    pub fn new(settings: Arc<SessionSettings>, auth: Arc<Authenticator>, options: SessionOptions) -> Self {
        Self {
            settings,
            auth,
            options,
            home: OnceCell::new(),
        }
    }

    pub fn settings(&self) -> &Arc<SessionSettings> {
        &self.settings
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn authenticator(&self) -> &Arc<Authenticator> {
        &self.auth
    }

    /// Connect, authenticate and run `true`
    pub async fn check_connection(&self) -> AppResult<()> {
        self.execute_single_command("true").await.map(|_| ())
    }

    /// Run one command on a fresh connection; non-zero exit is an error
    pub async fn execute_single_command(&self, command: &str) -> AppResult<String> {
        self.try_execute_single_command(command)
            .await?
            .into_stdout(command)
    }

    /// Run one command on a fresh connection and return its exit status
    pub async fn try_execute_single_command(&self, command: &str) -> AppResult<CommandResult> {
        let (settings, auth, options) = self.parts();
        let command = command.to_string();
        run_blocking(&self.options.cancel, move || {
            let session = open_authenticated(&settings, &options, &auth)?;
            let result = exec(&session, &command);
            disconnect(&session);
            result
        })
        .await
    }

    /// Long-lived channel for a sequence of commands
    pub async fn create_command_session(&self) -> AppResult<CommandSession> {
        CommandSession::connect(self.settings.clone(), self.auth.clone(), self.options.clone()).await
    }

    /// Remote `$HOME`, looked up once per session object
    pub async fn remote_home(&self) -> AppResult<String> {
        if let Some(home) = self.home.get() {
            return Ok(home.clone());
        }
        let home = self.execute_single_command(r#"printf %s "$HOME""#).await?;
        let home = home.trim().to_string();
        if home.is_empty() {
            return Err(AppError::session("Remote $HOME is empty"));
        }
        Ok(self.home.get_or_init(|| home).clone())
    }

    /// Replace a leading `~` with the remote home directory. SCP paths are not
    /// shell-expanded, so every upload target goes through here.
    pub async fn expand_remote_path(&self, path: &str) -> AppResult<String> {
        if path == "~" || path.starts_with("~/") {
            let home = self.remote_home().await?;
            Ok(expand_home(path, &home))
        } else {
            Ok(path.to_string())
        }
    }

    /// Copy one file, creating the remote parent directory first
    pub async fn upload_file(
        &self,
        local: &Path,
        remote: &str,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> AppResult<()> {
        let remote = self.expand_remote_path(remote).await?;
        let local = local.to_path_buf();
        let (settings, auth, options) = self.parts();
        let cancel = self.options.cancel.clone();

        run_blocking(&self.options.cancel, move || {
            let session = open_authenticated(&settings, &options, &auth)?;
            if let Some(parent) = remote_parent(&remote) {
                exec(&session, &format!("mkdir -p {}", shell_quote(parent)))?.into_stdout("mkdir -p")?;
            }
            let mut tracker = progress.map(ProgressTracker::new);
            let name = file_name(&local);
            let result = scp_file(&session, &local, &remote, &name, tracker.as_mut(), &cancel);
            disconnect(&session);
            result
        })
        .await
    }

    /// Copy a directory tree below `remote`, which is created if needed.
    /// Every file is sent on every call.
    pub async fn upload_folder_recursive(
        &self,
        local: &Path,
        remote: &str,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> AppResult<()> {
        let remote = self.expand_remote_path(remote).await?;
        let plan = UploadPlan::scan(local, &remote)?;
        tracing::info!(
            "Uploading {} files in {} directories to {}",
            plan.files.len(),
            plan.directories.len(),
            remote
        );

        let (settings, auth, options) = self.parts();
        let cancel = self.options.cancel.clone();

        run_blocking(&self.options.cancel, move || {
            let session = open_authenticated(&settings, &options, &auth)?;
            let result = plan.run(&session, progress, &cancel);
            disconnect(&session);
            result
        })
        .await
    }

    /// Write an in-memory payload to a remote file (mode 600)
    pub async fn upload_bytes(&self, bytes: Vec<u8>, remote: &str) -> AppResult<()> {
        let remote = self.expand_remote_path(remote).await?;
        let (settings, auth, options) = self.parts();

        run_blocking(&self.options.cancel, move || {
            let session = open_authenticated(&settings, &options, &auth)?;
            let result = scp_bytes(&session, &bytes, &remote);
            disconnect(&session);
            result
        })
        .await
    }

    fn parts(&self) -> (Arc<SessionSettings>, Arc<Authenticator>, SessionOptions) {
        (self.settings.clone(), self.auth.clone(), self.options.clone())
    }
}

/// Local tree flattened into remote directories and (local, remote) file pairs
struct UploadPlan {
    directories: Vec<String>,
    files: Vec<(PathBuf, String, String)>,
}

impl UploadPlan {
    fn scan(local: &Path, remote_root: &str) -> AppResult<Self> {
        if !local.is_dir() {
            return Err(AppError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is not a directory", local.display()),
            )));
        }

        let mut directories = vec![remote_root.to_string()];
        let mut files = Vec::new();

        for entry in WalkDir::new(local).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| AppError::Io(std::io::Error::other(e.to_string())))?;
            let relative = entry
                .path()
                .strip_prefix(local)
                .map_err(|e| AppError::Unknown(e.to_string()))?
                .to_string_lossy()
                .replace('\\', "/");
            let target = super::remote_join(remote_root, &relative);

            if entry.file_type().is_dir() {
                directories.push(target);
            } else if entry.file_type().is_file() {
                files.push((entry.path().to_path_buf(), target, relative));
            }
        }

        Ok(Self { directories, files })
    }

    fn run(
        &self,
        session: &Ssh2Session,
        progress: Option<Arc<dyn ProgressSink>>,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        for batch in self.directories.chunks(MKDIR_BATCH) {
            let quoted: Vec<String> = batch.iter().map(|d| shell_quote(d)).collect();
            let command = format!("mkdir -p {}", quoted.join(" "));
            exec(session, &command)?.into_stdout("mkdir -p")?;
        }

        let mut tracker = progress.map(ProgressTracker::new);
        for (local, remote, display) in &self.files {
            scp_file(session, local, remote, display, tracker.as_mut(), cancel)?;
        }
        Ok(())
    }
}

/// Run a command on an authenticated session and collect its output
pub(crate) fn exec(session: &Ssh2Session, command: &str) -> AppResult<CommandResult> {
    tracing::debug!("Executing: {}", sanitize(command));

    let mut channel = session.channel_session()?;
    channel.exec(command)?;

    // Both streams are drained together so a chatty stderr cannot fill the
    // channel window while stdout is still being read
    let idle_limit = match session.timeout() {
        0 => None,
        ms => Some(Duration::from_millis(ms.into())),
    };
    session.set_blocking(false);
    let drained = drain_output(&mut channel.stream(0), &mut channel.stderr(), || channel.eof(), idle_limit);
    session.set_blocking(true);
    let (stdout, stderr) =
        drained.map_err(|e| AppError::session(format!("Failed to read output of '{}': {}", sanitize(command), e)))?;

    channel.wait_close()?;
    let exit_code = channel.exit_status()?;

    Ok(CommandResult {
        exit_code,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

/// Read two non-blocking streams in turn until `finished` reports the end
/// of both. Fails with `TimedOut` after `idle_limit` without any data.
fn drain_output<O: Read, E: Read>(
    stdout: &mut O,
    stderr: &mut E,
    mut finished: impl FnMut() -> bool,
    idle_limit: Option<Duration>,
) -> io::Result<(Vec<u8>, Vec<u8>)> {
    let (mut out, mut err) = (Vec::new(), Vec::new());
    let mut buf = vec![0u8; SCP_CHUNK_BYTES];
    let mut last_data = Instant::now();

    loop {
        let got = read_available(stdout, &mut buf, &mut out)? + read_available(stderr, &mut buf, &mut err)?;
        if got > 0 {
            last_data = Instant::now();
            continue;
        }
        if finished() {
            return Ok((out, err));
        }
        if let Some(limit) = idle_limit {
            if last_data.elapsed() >= limit {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no output for {:?}", limit),
                ));
            }
        }
        std::thread::sleep(OUTPUT_POLL_INTERVAL);
    }
}

/// One read into `sink`; zero when nothing is buffered
fn read_available<R: Read>(reader: &mut R, buf: &mut [u8], sink: &mut Vec<u8>) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Ok(n) => {
                sink.extend_from_slice(&buf[..n]);
                return Ok(n);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

fn scp_file(
    session: &Ssh2Session,
    local: &Path,
    remote: &str,
    display: &str,
    mut tracker: Option<&mut ProgressTracker>,
    cancel: &CancellationToken,
) -> AppResult<()> {
    if cancel.is_cancelled() {
        return Err(AppError::Cancelled);
    }

    let metadata = fs::metadata(local)?;
    let size = metadata.len();
    let mut file = File::open(local)?;
    let mut channel = session
        .scp_send(Path::new(remote), file_mode(&metadata), size, None)
        .map_err(|e| AppError::session(format!("SCP to {} failed: {}", remote, e.message())))?;

    let mut buf = vec![0u8; SCP_CHUNK_BYTES];
    let mut sent = 0u64;
    if let Some(t) = tracker.as_deref_mut() {
        t.observe(display, 0, size);
    }
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        channel
            .write_all(&buf[..n])
            .map_err(|e| AppError::session(format!("SCP write to {} failed: {}", remote, e)))?;
        sent += n as u64;
        if let Some(t) = tracker.as_deref_mut() {
            t.observe(display, sent, size);
        }
    }
    if let Some(t) = tracker {
        t.finish();
    }

    close_scp(channel)
}

fn scp_bytes(session: &Ssh2Session, bytes: &[u8], remote: &str) -> AppResult<()> {
    let mut channel = session
        .scp_send(Path::new(remote), 0o600, bytes.len() as u64, None)
        .map_err(|e| AppError::session(format!("SCP to {} failed: {}", remote, e.message())))?;
    channel
        .write_all(bytes)
        .map_err(|e| AppError::session(format!("SCP write to {} failed: {}", remote, e)))?;
    close_scp(channel)
}

fn close_scp(mut channel: ssh2::Channel) -> AppResult<()> {
    channel.send_eof()?;
    channel.wait_eof()?;
    channel.close()?;
    channel.wait_close()?;
    Ok(())
}

pub(crate) fn disconnect(session: &Ssh2Session) {
    let _ = session.disconnect(None, "done", None);
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> i32 {
    use std::os::unix::fs::PermissionsExt;
    (metadata.permissions().mode() & 0o777) as i32
}

#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> i32 {
    0o644
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn remote_parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => None,
        Some(idx) => Some(&trimmed[..idx]),
    }
}

/// `~` or `~/x` against a known home directory
pub fn expand_home(path: &str, home: &str) -> String {
    let home = home.trim_end_matches('/');
    match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => format!("{}{}", home, rest),
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("~/apps/web", "/home/pi"), "/home/pi/apps/web");
        assert_eq!(expand_home("~", "/home/pi/"), "/home/pi");
        assert_eq!(expand_home("/opt/app", "/home/pi"), "/opt/app");
        assert_eq!(expand_home("~other/x", "/home/pi"), "~other/x");
    }

    #[test]
    fn test_remote_parent() {
        assert_eq!(remote_parent("/home/pi/apps/app.dll"), Some("/home/pi/apps"));
        assert_eq!(remote_parent("/file"), None);
        assert_eq!(remote_parent("file"), None);
    }

    #[test]
    fn test_upload_plan_collects_tree() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("wwwroot/css")).unwrap();
        fs::write(dir.path().join("app.dll"), b"MZ").unwrap();
        fs::write(dir.path().join("wwwroot/css/site.css"), b"body{}").unwrap();

        let plan = UploadPlan::scan(dir.path(), "/home/pi/apps").unwrap();
        assert_eq!(
            plan.directories,
            vec!["/home/pi/apps", "/home/pi/apps/wwwroot", "/home/pi/apps/wwwroot/css"]
        );
        let targets: Vec<&str> = plan.files.iter().map(|(_, r, _)| r.as_str()).collect();
        assert_eq!(targets, vec!["/home/pi/apps/app.dll", "/home/pi/apps/wwwroot/css/site.css"]);
    }

    #[test]
    fn test_upload_plan_rejects_missing_folder() {
        assert!(UploadPlan::scan(Path::new("/nonexistent/publish"), "/srv").is_err());
    }

    #[tokio::test]
    async fn test_cancelled_session_does_not_connect() {
        let settings = Arc::new(SessionSettings::new("127.0.0.1", 1, "pi", "/nonexistent", false));
        let auth = Arc::new(Authenticator::new(Arc::new(crate::keychain::PassphraseCache::new()), None, None));
        let options = SessionOptions::default();
        options.cancel.cancel();
        let shell = SecureShellSession::new(settings, auth, options);
        assert!(matches!(shell.check_connection().await, Err(AppError::Cancelled)));
    }

    /// Non-blocking stream that replays a script; `None` means no data yet
    struct Scripted {
        name: &'static str,
        steps: std::collections::VecDeque<Option<&'static [u8]>>,
        reads: Arc<parking_lot::Mutex<Vec<String>>>,
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.steps.pop_front() {
                Some(Some(data)) => {
                    self.reads.lock().push(format!("{}:{}", self.name, String::from_utf8_lossy(data)));
                    buf[..data.len()].copy_from_slice(data);
                    Ok(data.len())
                }
                Some(None) => Err(io::ErrorKind::WouldBlock.into()),
                None => Ok(0),
            }
        }
    }

    #[test]
    fn test_drain_output_reads_stderr_while_stdout_is_open() {
        let reads = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut stdout = Scripted {
            name: "out",
            steps: [Some(&b"Restoring "[..]), None, None, Some(&b"done\n"[..])].into(),
            reads: reads.clone(),
        };
        let mut stderr = Scripted {
            name: "err",
            steps: [None, Some(&b"warning: "[..]), Some(&b"NU1603\n"[..])].into(),
            reads: reads.clone(),
        };

        let (out, err) = drain_output(&mut stdout, &mut stderr, || true, None).unwrap();
        assert_eq!(out, b"Restoring done\n");
        assert_eq!(err, b"warning: NU1603\n");

        let reads = reads.lock();
        let stderr_done = reads.iter().position(|r| r == "err:NU1603\n").unwrap();
        let stdout_done = reads.iter().position(|r| r == "out:done\n").unwrap();
        assert!(stderr_done < stdout_done);
    }

    #[test]
    fn test_drain_output_waits_for_end_of_channel() {
        let reads = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut stdout = Scripted {
            name: "out",
            steps: [Some(&b"4242\n"[..])].into(),
            reads: reads.clone(),
        };
        let mut stderr = Scripted {
            name: "err",
            steps: Default::default(),
            reads,
        };

        let mut polls = 0;
        let (out, err) = drain_output(
            &mut stdout,
            &mut stderr,
            || {
                polls += 1;
                polls > 2
            },
            None,
        )
        .unwrap();
        assert_eq!(out, b"4242\n");
        assert!(err.is_empty());
        assert_eq!(polls, 3);
    }

    #[test]
    fn test_drain_output_times_out_when_silent() {
        struct Silent;
        impl Read for Silent {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::ErrorKind::WouldBlock.into())
            }
        }

        let err = drain_output(&mut Silent, &mut Silent, || false, Some(Duration::from_millis(30))).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
