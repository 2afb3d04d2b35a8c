// tests/common/mod.rs

//! Shared fakes for integration tests.
//!
//! The fake runtime is a shell script run through the elevation prefix:
//! `/bin/sh <script> <runtime binary> <subcommand> ...`. That keeps the
//! script non-executable and exercises prefix ordering at the same time.

#![allow(dead_code)]

use dangerzone::platform::{GroupStatus, Platform, PlatformKind};
use dangerzone::prompt::{ElevationChoice, Prompter};
use dangerzone::readiness::RuntimeProbe;
use dangerzone::{AppConfig, AppContext, ElevationMode, Error, Result, SettingsStore};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Runtime binary name passed through to the fake script
pub const RUNTIME_BINARY: &str = "dangerzone-container";

/// `ls` prints an image table; `convert` exits with the code written on the
/// first line of the document, or execs a long sleep for `sleep`.
const FAKE_RUNTIME: &str = r#"
shift
case "$1" in
  ls)
    printf 'REPOSITORY           TAG       IMAGE ID       CREATED       SIZE\n'
    printf 'flmcode/dangerzone   latest    0123456789ab   2 days ago    1.1GB\n'
    printf 'my-containerXYZ      latest    ba9876543210   3 weeks ago   900MB\n'
    exit 0
    ;;
  convert)
    shift
    while [ $# -gt 0 ]; do
      case "$1" in
        --document-filename) doc="$2"; shift ;;
        --output-filename) out="$2"; shift ;;
      esac
      shift
    done
    code=$(head -n 1 "$doc")
    echo "Converting $doc"
    if [ "$code" = "sleep" ]; then
      exec sleep 30
    fi
    if [ "$code" = "0" ]; then
      printf 'safe pdf' > "$out"
    else
      echo "conversion failed" >&2
    fi
    exit "$code"
    ;;
esac
exit 2
"#;

/// Write the fake runtime script and return the elevation prefix that runs it
pub fn fake_runtime(dir: &Path) -> Vec<String> {
    let script = dir.join("fake-runtime.sh");
    std::fs::write(&script, FAKE_RUNTIME).unwrap();
    vec!["/bin/sh".to_string(), script.to_string_lossy().into_owned()]
}

/// Write a document whose first line tells the fake runtime how to behave
pub fn document(dir: &Path, name: &str, behavior: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("{}\n", behavior)).unwrap();
    path
}

pub struct FakePlatform {
    pub kind: PlatformKind,
    pub status: GroupStatus,
    pub prefix: Vec<String>,
    pub virtualization: bool,
    pub group_adds: AtomicUsize,
    pub service_starts: AtomicUsize,
}

impl FakePlatform {
    pub fn new(status: GroupStatus, prefix: Vec<String>) -> Self {
        Self {
            kind: PlatformKind::Linux,
            status,
            prefix,
            virtualization: false,
            group_adds: AtomicUsize::new(0),
            service_starts: AtomicUsize::new(0),
        }
    }

    pub fn not_member(prefix: Vec<String>) -> Self {
        Self::new(
            GroupStatus::NotMember {
                user: "tester".to_string(),
                group: "docker".to_string(),
            },
            prefix,
        )
    }
}

impl Platform for FakePlatform {
    fn kind(&self) -> PlatformKind {
        self.kind
    }

    fn elevation_prefix(&self, _mode: Option<ElevationMode>) -> Vec<String> {
        self.prefix.clone()
    }

    fn group_check(&self) -> GroupStatus {
        self.status.clone()
    }

    fn add_user_to_group(&self, _user: &str, _group: &str) -> Result<()> {
        self.group_adds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn start_service(&self) -> Result<()> {
        self.service_starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn runtime_cli(&self) -> Option<PathBuf> {
        None
    }

    fn uses_virtualization(&self) -> bool {
        self.virtualization
    }
}

pub struct FakeProbe {
    pub installed: bool,
    pub running: AtomicBool,
}

impl FakeProbe {
    pub fn new(installed: bool, running: bool) -> Self {
        Self {
            installed,
            running: AtomicBool::new(running),
        }
    }
}

impl RuntimeProbe for FakeProbe {
    fn is_installed(&self) -> bool {
        self.installed
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Answers with fixed choices and counts how often it was asked
pub struct ScriptedPrompter {
    pub elevation: ElevationChoice,
    pub start_service: bool,
    pub elevation_asks: AtomicUsize,
    pub service_asks: AtomicUsize,
    pub notices: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new(elevation: ElevationChoice, start_service: bool) -> Self {
        Self {
            elevation,
            start_service,
            elevation_asks: AtomicUsize::new(0),
            service_asks: AtomicUsize::new(0),
            notices: Mutex::new(Vec::new()),
        }
    }

    pub fn asks(&self) -> usize {
        self.elevation_asks.load(Ordering::SeqCst) + self.service_asks.load(Ordering::SeqCst)
    }
}

impl Prompter for ScriptedPrompter {
    fn choose_elevation(&self, _user: &str, _group: &str) -> Result<ElevationChoice> {
        self.elevation_asks.fetch_add(1, Ordering::SeqCst);
        Ok(self.elevation)
    }

    fn confirm_service_start(&self) -> Result<bool> {
        self.service_asks.fetch_add(1, Ordering::SeqCst);
        Ok(self.start_service)
    }

    fn notify(&self, message: &str) {
        self.notices.lock().unwrap().push(message.to_string());
    }
}

/// Context over a fresh settings directory
pub fn context(dir: &TempDir, platform: Arc<FakePlatform>) -> AppContext {
    let settings = Arc::new(SettingsStore::open(&dir.path().join("config")).unwrap());
    let config = AppConfig::for_platform(PlatformKind::Linux)
        .with_runtime_binary(RUNTIME_BINARY)
        .with_resource_dir(dir.path())
        .with_termination_grace(std::time::Duration::from_secs(2));
    AppContext::new(config, settings, platform)
}

pub fn is_unreadable(err: &Error) -> bool {
    matches!(err, Error::DocumentUnreadable { .. })
}
