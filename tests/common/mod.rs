#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use filetime::FileTime;

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

impl CmdResult {
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }
}

const DBK_ENV_VARS: &[&str] = &[
    "DBK_SOURCE_DIR",
    "DBK_DESTINATION_DIR",
    "DBK_LOG_DIR",
    "DBK_BACKUP_AGE_DAYS",
    "DBK_VERIFY_COPY",
    "DBK_DELETE_SOURCE",
    "DBK_EXCLUDED_PATTERNS",
    "DBK_HASH_ALGORITHM",
    "DBK_PARALLELISM",
    "DBK_OUTPUT_FORMAT",
];

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_dbk") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "dbk.exe" } else { "dbk" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve dbk binary path for integration test"),
    }
}

/// Run `dbk` with a clean DBK_* environment and `home` as `$HOME`.
pub fn run_cli_in(case_name: &str, home: &Path, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("dbk-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let mut command = Command::new(&bin_path);
    command
        .args(args)
        .env("HOME", home)
        .env("DBK_TEST_VERBOSE", "1")
        .env("RUST_BACKTRACE", "1");
    for var in DBK_ENV_VARS {
        command.env_remove(var);
    }
    let output = command.output().expect("execute dbk command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let home = std::env::temp_dir().join("dbk-test-home");
    fs::create_dir_all(&home).expect("create temp test home");
    run_cli_in(case_name, &home, args)
}

/// Write `contents` at `root/rel`, creating parents, then age it by `days`.
pub fn write_aged(root: &Path, rel: &str, contents: &[u8], days: u64) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dirs");
    }
    fs::write(&path, contents).expect("write fixture file");
    set_age(&path, days);
    path
}

pub fn set_age(path: &Path, days: u64) {
    let when = SystemTime::now() - Duration::from_secs(days * 86_400);
    filetime::set_file_mtime(path, FileTime::from_system_time(when)).expect("set mtime");
}

/// Sole entry under `dst`, which a single run creates.
pub fn only_run_dir(dst: &Path) -> PathBuf {
    let mut entries: Vec<PathBuf> = fs::read_dir(dst)
        .expect("read destination")
        .map(|e| e.expect("dir entry").path())
        .collect();
    assert_eq!(entries.len(), 1, "expected one run dir in {}", dst.display());
    entries.remove(0)
}

/// Parse the last JSON line of stdout.
pub fn last_json_line(stdout: &str) -> serde_json::Value {
    let line = stdout
        .lines()
        .rev()
        .find(|l| l.trim_start().starts_with('{'))
        .expect("json line on stdout");
    serde_json::from_str(line).expect("valid json")
}
