//! Fossilize replay orchestration.
//!
//! Shader pre-warming delegates the actual pipeline compilation to the
//! external `fossilize_replay` tool. This module locates the binary,
//! drives it one `.foz` container at a time, and reports progress through
//! an optional callback. Parallelism lives inside the child
//! (`--num-threads`); invocations here are strictly sequential.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use nvshader_core::{CacheKind, NvError, Result};

use crate::manager::CacheManager;

/// Poll interval while waiting for the child to exit.
const WAIT_POLL: Duration = Duration::from_millis(50);

/// Well-known install locations probed after an explicit override.
const SYSTEM_CANDIDATES: [&str; 3] = [
    "/usr/bin/fossilize_replay",
    "/usr/local/bin/fossilize_replay",
    "/opt/fossilize/fossilize_replay",
];

/// Steam-bundled replay binaries relative to the home directory.
const STEAM_CANDIDATES: [&str; 2] = [
    ".local/share/Steam/ubuntu12_64/fossilize_replay",
    ".steam/steam/ubuntu12_64/fossilize_replay",
];

/// Configuration for replay runs.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Explicit replay binary, bypassing the probe order.
    pub replay_binary: Option<PathBuf>,
    /// Worker threads inside the child process.
    pub num_threads: u32,
    /// Optional `--pipeline-cache` directory handed to the child.
    pub pipeline_cache_dir: Option<PathBuf>,
    /// Per-file wall-clock budget; the child is killed on expiry.
    pub timeout_ms: u64,
    /// Pass `--spirv-val 0` to skip SPIR-V validation.
    pub skip_validation: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            replay_binary: None,
            num_threads: 4,
            pipeline_cache_dir: None,
            timeout_ms: 30_000,
            skip_validation: true,
        }
    }
}

impl ReplayConfig {
    /// Builder: explicit binary path.
    #[must_use]
    pub fn with_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.replay_binary = Some(path.into());
        self
    }

    /// Builder: child worker thread count.
    #[must_use]
    pub fn with_threads(mut self, threads: u32) -> Self {
        self.num_threads = threads;
        self
    }

    /// Builder: pipeline cache directory.
    #[must_use]
    pub fn with_pipeline_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pipeline_cache_dir = Some(dir.into());
        self
    }

    /// Builder: per-file timeout in milliseconds.
    #[must_use]
    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }
}

/// Where a file currently is in its replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayStatus {
    Started,
    Completed,
    Failed,
}

/// Snapshot handed to the progress callback at per-file start and finish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayProgress {
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub current_file: PathBuf,
    pub status: ReplayStatus,
}

/// Progress callback type.
pub type ProgressFn<'a> = dyn FnMut(&ReplayProgress) + 'a;

/// Aggregate result of a multi-file replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayOutcome {
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    /// Entries passed over because they are not Fossilize containers.
    pub skipped: u32,
}

/// Locate a usable `fossilize_replay` binary.
///
/// Probe order: explicit override, system install locations, then the
/// Steam-bundled copies under the home directory.
#[must_use]
pub fn locate_replay_binary(config: &ReplayConfig) -> Option<PathBuf> {
    if let Some(explicit) = &config.replay_binary {
        return explicit.is_file().then(|| explicit.clone());
    }

    for candidate in SYSTEM_CANDIDATES {
        let path = PathBuf::from(candidate);
        if path.is_file() {
            return Some(path);
        }
    }

    let home = dirs::home_dir()?;
    STEAM_CANDIDATES
        .iter()
        .map(|rel| home.join(rel))
        .find(|p| p.is_file())
}

/// Whether replay is possible with this configuration.
#[must_use]
pub fn is_available(config: &ReplayConfig) -> bool {
    locate_replay_binary(config).is_some()
}

/// Drives `fossilize_replay` over files, directories or a whole scanned
/// entry set.
pub struct Replayer {
    config: ReplayConfig,
    binary: PathBuf,
}

impl Replayer {
    /// Resolve the replay binary, failing with
    /// [`NvError::FossilizeNotFound`] when none exists.
    pub fn new(config: ReplayConfig) -> Result<Self> {
        let binary = locate_replay_binary(&config).ok_or(NvError::FossilizeNotFound)?;
        tracing::debug!(binary = %binary.display(), "using fossilize_replay");
        Ok(Self { config, binary })
    }

    /// The resolved binary path.
    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Replay one `.foz` container. Returns `true` when the child exited
    /// with status zero within the timeout.
    pub fn replay_file(&self, path: &Path) -> Result<bool> {
        let mut command = Command::new(&self.binary);
        if self.config.skip_validation {
            command.args(["--spirv-val", "0"]);
        }
        command.args(["--num-threads", &self.config.num_threads.to_string()]);
        if let Some(dir) = &self.config.pipeline_cache_dir {
            command.arg("--pipeline-cache").arg(dir);
        }
        command
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // Own process group so a timeout can kill the whole tree.
        #[cfg(unix)]
        unsafe {
            use std::os::unix::process::CommandExt;
            command.pre_exec(|| {
                if libc::setpgid(0, 0) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = command.spawn()?;
        let deadline = Instant::now() + Duration::from_millis(self.config.timeout_ms);

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                tracing::warn!(path = %path.display(), timeout_ms = self.config.timeout_ms, "replay timed out, killing child");
                kill_process_group(&mut child);
                break child.wait()?;
            }
            std::thread::sleep(WAIT_POLL);
        };

        Ok(status.success())
    }

    /// Replay every `.foz` file directly inside `dir`, sequentially.
    pub fn replay_dir(
        &self,
        dir: &Path,
        mut progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<ReplayOutcome> {
        let files = foz_files(dir);
        let mut outcome = ReplayOutcome {
            total: files.len() as u32,
            ..ReplayOutcome::default()
        };

        for file in files {
            self.replay_one(&file, &mut outcome, &mut progress)?;
        }
        Ok(outcome)
    }

    /// Replay every Fossilize entry held by `manager`; other kinds are
    /// counted as skipped.
    pub fn replay_all(
        &self,
        manager: &CacheManager,
        mut progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<ReplayOutcome> {
        self.replay_entries(manager.entries().iter(), &mut progress)
    }

    /// Replay only the entries bound to `game_id`.
    pub fn replay_game(
        &self,
        manager: &CacheManager,
        game_id: &str,
        mut progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<ReplayOutcome> {
        let entries = manager
            .entries()
            .iter()
            .filter(|e| e.game_id.as_deref() == Some(game_id));
        self.replay_entries(entries, &mut progress)
    }

    // The callback fires once per entry start and once per finish; a
    // directory entry's contained files replay inside that bracket.
    fn replay_entries<'e>(
        &self,
        entries: impl Iterator<Item = &'e nvshader_core::CacheEntry>,
        progress: &mut Option<&mut ProgressFn<'_>>,
    ) -> Result<ReplayOutcome> {
        let mut outcome = ReplayOutcome::default();
        for entry in entries {
            outcome.total += 1;
            if entry.kind != CacheKind::Fossilize {
                outcome.skipped += 1;
                continue;
            }
            if entry.is_directory {
                report(progress, &outcome, &entry.path, ReplayStatus::Started);
                let nested = self.replay_dir(&entry.path, None)?;
                outcome.completed += nested.completed;
                outcome.failed += nested.failed;
                let status = if nested.failed == 0 {
                    ReplayStatus::Completed
                } else {
                    ReplayStatus::Failed
                };
                report(progress, &outcome, &entry.path, status);
            } else {
                self.replay_one(&entry.path, &mut outcome, progress)?;
            }
        }
        Ok(outcome)
    }

    fn replay_one(
        &self,
        file: &Path,
        outcome: &mut ReplayOutcome,
        progress: &mut Option<&mut ProgressFn<'_>>,
    ) -> Result<()> {
        report(progress, outcome, file, ReplayStatus::Started);
        let ok = self.replay_file(file)?;
        if ok {
            outcome.completed += 1;
        } else {
            outcome.failed += 1;
            tracing::warn!(path = %file.display(), "replay failed");
        }
        report(
            progress,
            outcome,
            file,
            if ok {
                ReplayStatus::Completed
            } else {
                ReplayStatus::Failed
            },
        );
        Ok(())
    }
}

fn report(
    progress: &mut Option<&mut ProgressFn<'_>>,
    outcome: &ReplayOutcome,
    file: &Path,
    status: ReplayStatus,
) {
    if let Some(callback) = progress {
        callback(&ReplayProgress {
            total: outcome.total,
            completed: outcome.completed,
            failed: outcome.failed,
            current_file: file.to_path_buf(),
            status,
        });
    }
}

fn foz_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(read) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = read
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(".foz"))
        })
        .collect();
    files.sort();
    files
}

fn kill_process_group(child: &mut std::process::Child) {
    #[cfg(unix)]
    {
        // Negative pid targets the group installed via setpgid(0, 0).
        let pid = child.id() as i32;
        unsafe {
            let _ = libc::kill(-pid, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.kill();
    }
}
