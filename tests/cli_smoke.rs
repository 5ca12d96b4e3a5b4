//! CLI smoke tests: drive the built `dbk` binary against temp directories.

mod common;

use std::fs;

use serde_json::Value;

#[test]
fn help_command_prints_usage() {
    let result = common::run_cli_case("help_command_prints_usage", &["--help"]);
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    assert!(
        result.stdout.contains("Usage: dbk [OPTIONS] <COMMAND>"),
        "missing help banner; log: {}",
        result.log_path.display()
    );
}

#[test]
fn subcommand_help_flags_work() {
    for sub in ["run", "scan", "digest", "compare", "config", "completions"] {
        let result = common::run_cli_case(&format!("help_{sub}"), &[sub, "--help"]);
        assert!(
            result.status.success(),
            "`dbk {sub} --help` failed; log: {}",
            result.log_path.display()
        );
    }
}

#[test]
fn completions_command_generates_shell_script() {
    let result = common::run_cli_case("completions_bash", &["completions", "bash"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(result.stdout.contains("dbk"), "log: {}", result.log_path.display());
}

#[test]
fn config_path_reports_default_location_under_home() {
    let home = tempfile::TempDir::new().unwrap();
    let result = common::run_cli_in("config_path", home.path(), &["--json", "config", "path"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());

    let json = common::last_json_line(&result.stdout);
    assert_eq!(json["command"], "config path");
    assert_eq!(json["exists"], false);
    assert!(
        json["path"]
            .as_str()
            .unwrap()
            .ends_with(".config/dbk/config.toml")
    );
}

#[test]
fn config_validate_rejects_missing_paths() {
    let home = tempfile::TempDir::new().unwrap();
    let result = common::run_cli_in(
        "config_validate_invalid",
        home.path(),
        &["config", "validate"],
    );
    assert_eq!(result.code(), Some(1), "log: {}", result.log_path.display());
    assert!(
        result.stderr.contains("INVALID") || result.stdout.contains("\"valid\":false"),
        "log: {}",
        result.log_path.display()
    );
}

#[test]
fn config_validate_accepts_legacy_json_file() {
    let tmp = tempfile::TempDir::new().unwrap();
    let src = tmp.path().join("src");
    let dst = tmp.path().join("dst");
    fs::create_dir_all(&src).unwrap();
    let cfg_path = tmp.path().join("settings.json");
    let legacy = serde_json::json!({
        "src_dir": src,
        "dst_dir": dst,
        "verify_copy": true,
        "delete_source": false,
        "excluded_patterns": ["*.tmp"],
        "backup_age_days": 14,
    });
    fs::write(&cfg_path, legacy.to_string()).unwrap();

    let result = common::run_cli_in(
        "config_validate_legacy",
        tmp.path(),
        &["--json", "--config", cfg_path.to_str().unwrap(), "config", "validate"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let json = common::last_json_line(&result.stdout);
    assert_eq!(json["valid"], true);
}

#[test]
fn explicit_missing_config_is_a_user_error() {
    let tmp = tempfile::TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");
    let result = common::run_cli_in(
        "missing_config",
        tmp.path(),
        &["--config", missing.to_str().unwrap(), "config", "show"],
    );
    assert_eq!(result.code(), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("DBK-1002"), "log: {}", result.log_path.display());
}

#[test]
fn run_backs_up_dormant_folder_and_writes_reports() {
    let tmp = tempfile::TempDir::new().unwrap();
    let src = tmp.path().join("src");
    let dst = tmp.path().join("dst");
    let logs = tmp.path().join("logs");
    common::write_aged(&src, "proj1/a.txt", b"alpha", 60);
    common::write_aged(&src, "proj2/b.txt", b"beta", 1);

    let result = common::run_cli_in(
        "run_dormant",
        tmp.path(),
        &[
            "--json",
            "run",
            "--src",
            src.to_str().unwrap(),
            "--dst",
            dst.to_str().unwrap(),
            "--log-dir",
            logs.to_str().unwrap(),
            "--backup-age-days",
            "30",
        ],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());

    let json = common::last_json_line(&result.stdout);
    assert_eq!(json["command"], "run");
    assert_eq!(json["summary"]["counts"]["succeeded"], 1);
    assert_eq!(json["summary"]["counts"]["not_eligible"], 1);

    let run_dir = common::only_run_dir(&dst);
    assert_eq!(fs::read(run_dir.join("proj1/a.txt")).unwrap(), b"alpha".to_vec());
    assert!(!run_dir.join("proj2").exists());

    let report = json["report"].as_str().unwrap();
    assert!(fs::read_to_string(report).unwrap().starts_with("Backup Task Report"));
    let log_files: Vec<String> = fs::read_dir(&logs)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    let stamp = run_dir.file_name().unwrap().to_string_lossy().to_string();
    assert!(
        log_files.contains(&format!("{stamp}_backup.jsonl")),
        "activity log should share the run folder stamp: {log_files:?}"
    );
    assert!(log_files.contains(&format!("{stamp}_summary.json")));
}

#[test]
fn run_without_destination_exits_with_user_error() {
    let tmp = tempfile::TempDir::new().unwrap();
    let src = tmp.path().join("src");
    fs::create_dir_all(&src).unwrap();

    let result = common::run_cli_in(
        "run_no_dst",
        tmp.path(),
        &["run", "--src", src.to_str().unwrap()],
    );
    assert_eq!(result.code(), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("DBK-1001"), "log: {}", result.log_path.display());
}

#[test]
fn run_with_missing_source_aborts() {
    let tmp = tempfile::TempDir::new().unwrap();
    let result = common::run_cli_in(
        "run_missing_src",
        tmp.path(),
        &[
            "run",
            "--src",
            tmp.path().join("absent").to_str().unwrap(),
            "--dst",
            tmp.path().join("dst").to_str().unwrap(),
            "--log-dir",
            tmp.path().join("logs").to_str().unwrap(),
        ],
    );
    assert_eq!(result.code(), Some(5), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("DBK-2001"), "log: {}", result.log_path.display());

    let activity = fs::read_dir(tmp.path().join("logs"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| p.to_string_lossy().ends_with("_backup.jsonl"))
        .expect("activity log written");
    let fatal = fs::read_to_string(activity)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str::<Value>(line).unwrap())
        .find(|entry| entry["event"] == "error")
        .expect("fatal error logged");
    assert_eq!(fatal["error_code"], "DBK-2001");
    assert!(fatal["error_message"].as_str().unwrap().contains("absent"));
}

#[test]
fn scan_lists_verdicts_without_copying() {
    let tmp = tempfile::TempDir::new().unwrap();
    let src = tmp.path().join("src");
    let dst = tmp.path().join("dst");
    common::write_aged(&src, "old/a.txt", b"a", 90);
    common::write_aged(&src, "new/a.txt", b"a", 0);
    common::write_aged(&src, "scratch/x.tmp", b"x", 90);

    let result = common::run_cli_in(
        "scan_verdicts",
        tmp.path(),
        &[
            "--json",
            "scan",
            "--src",
            src.to_str().unwrap(),
            "--dst",
            dst.to_str().unwrap(),
            "--exclude",
            "*.tmp",
        ],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());

    let json = common::last_json_line(&result.stdout);
    let labels: Vec<(String, String)> = json["targets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t: &Value| {
            (
                t["name"].as_str().unwrap().to_string(),
                t["label"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        labels,
        vec![
            ("new".to_string(), "too_recent".to_string()),
            ("old".to_string(), "eligible".to_string()),
            ("scratch".to_string(), "empty".to_string()),
        ]
    );
    assert!(!dst.exists(), "scan must not touch the destination");
}

#[test]
fn digest_then_compare_detects_modification() {
    let tmp = tempfile::TempDir::new().unwrap();
    let tree = tmp.path().join("tree");
    common::write_aged(&tree, "a.txt", b"alpha", 0);
    common::write_aged(&tree, "sub/b.txt", b"beta", 0);
    let manifest = tmp.path().join("tree.md5");

    let digest = common::run_cli_in(
        "digest_tree",
        tmp.path(),
        &[
            "digest",
            tree.to_str().unwrap(),
            "--output",
            manifest.to_str().unwrap(),
        ],
    );
    assert!(digest.status.success(), "log: {}", digest.log_path.display());
    let body = fs::read_to_string(&manifest).unwrap();
    assert!(body.contains("  a.txt"));
    assert!(body.contains("  sub/b.txt"));

    let same = common::run_cli_in(
        "compare_same",
        tmp.path(),
        &["--json", "compare", manifest.to_str().unwrap(), tree.to_str().unwrap()],
    );
    assert!(same.status.success(), "log: {}", same.log_path.display());

    fs::write(tree.join("sub/b.txt"), b"BETA").unwrap();
    let changed = common::run_cli_in(
        "compare_changed",
        tmp.path(),
        &["--json", "compare", manifest.to_str().unwrap(), tree.to_str().unwrap()],
    );
    assert_eq!(changed.code(), Some(4), "log: {}", changed.log_path.display());
    let json = common::last_json_line(&changed.stdout);
    assert_eq!(json["comparison"]["result"], "mismatch");
    assert_eq!(
        json["comparison"]["differing"],
        serde_json::json!(["sub/b.txt"])
    );
}

#[test]
fn compare_output_writes_tables() {
    let tmp = tempfile::TempDir::new().unwrap();
    let left = tmp.path().join("left");
    let right = tmp.path().join("right");
    common::write_aged(&left, "same.txt", b"same", 0);
    common::write_aged(&right, "same.txt", b"same", 0);
    common::write_aged(&left, "changed.txt", b"one", 0);
    common::write_aged(&right, "changed.txt", b"two", 0);
    common::write_aged(&left, "only_left.txt", b"x", 0);
    let out = tmp.path().join("tables");

    let result = common::run_cli_in(
        "compare_tables",
        tmp.path(),
        &[
            "--json",
            "compare",
            left.to_str().unwrap(),
            right.to_str().unwrap(),
            "--output",
            out.to_str().unwrap(),
        ],
    );
    assert_eq!(result.code(), Some(4), "log: {}", result.log_path.display());
    let json = common::last_json_line(&result.stdout);
    assert_eq!(json["tables"].as_array().unwrap().len(), 2);

    let full = fs::read_to_string(out.join("compare.csv")).unwrap();
    let full_paths: Vec<&str> = full
        .lines()
        .map(|line| line.split(',').next().unwrap())
        .collect();
    assert_eq!(full_paths, vec!["path", "changed.txt", "only_left.txt", "same.txt"]);

    let diff = fs::read_to_string(out.join("compare_diff.csv")).unwrap();
    let rows: Vec<Vec<&str>> = diff.lines().skip(1).map(|l| l.split(',').collect()).collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0], "changed.txt");
    assert_ne!(rows[0][1], rows[0][2]);
    assert_eq!(rows[1][0], "only_left.txt");
    assert_eq!(rows[1][2], "");
}
