use assert_cmd::Command;
use predicates::prelude::*;
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::fs;
use tempfile::{tempdir, TempDir};

/// Stands in for a Stata console: echoes `di`, fails `bad`, answers markers
const FAKE_STATA: &str = r#"while IFS= read -r line; do
  case "$line" in
    'display "'*) marker=${line#display \"}; printf '%s\n' "${marker%\"}" ;;
    'di '*) printf '. %s\n%s\n' "$line" "${line#di }" ;;
    bad*) printf 'command bad is unrecognized\nr(199);\n' ;;
  esac
done
"#;

#[allow(deprecated)]
fn cli(workdir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("stata-bridge").expect("binary");
    cmd.current_dir(workdir.path())
        .env("STATA_BRIDGE_CACHE_DIR", workdir.path().join("cache"))
        .env_remove("STATA_BRIDGE_STATA_PATH")
        .env_remove("STATA_BRIDGE_ERROR_POLICY")
        .arg("--quiet");
    cmd
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("valid json")
}

fn with_fake_stata() -> TempDir {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("fake_stata.sh"), FAKE_STATA).unwrap();
    fs::write(
        temp.path().join("stata-bridge.toml"),
        "stata_path = \"sh\"\nstata_args = [\"fake_stata.sh\"]\n",
    )
    .unwrap();
    temp
}

#[test]
fn chunk_prints_plan() {
    let temp = tempdir().unwrap();
    let output = cli(&temp)
        .arg("chunk")
        .write_stdin("di 1\n#delimit ;\ndi\n  2;\n")
        .output()
        .unwrap();
    assert!(output.status.success());

    let plan = stdout_json(&output);
    assert_eq!(plan["starting_mode"], "newline");
    assert_eq!(plan["ending_mode"], "semicolon");
    assert_eq!(plan["fingerprint"].as_str().unwrap().len(), 64);
    let texts: Vec<&str> = plan["statements"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|s| s["text"].as_str())
        .collect();
    assert!(texts.contains(&"di 1"));
    assert!(texts.contains(&"di 2"));
}

#[test]
fn chunk_refuses_incomplete_input() {
    let temp = tempdir().unwrap();
    cli(&temp)
        .arg("chunk")
        .write_stdin("foreach v in a b {\n di 1\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unclosed brace"));
}

#[test]
fn check_reports_blocker_and_exit_code() {
    let temp = tempdir().unwrap();
    let output = cli(&temp)
        .arg("check")
        .write_stdin("di 1 + ///\n")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let body = stdout_json(&output);
    assert_eq!(body["status"], "incomplete");
    assert_eq!(body["blocker"], "open_continuation");

    cli(&temp)
        .args(["check", "--mode", ";"])
        .write_stdin("di\n 1;\n#delimit cr\n")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""ending_mode":"newline""#));
}

#[test]
fn complete_uses_names_from_input() {
    let temp = tempdir().unwrap();
    let output = cli(&temp)
        .arg("complete")
        .write_stdin("gen price2 = 1\nlocal ctrl x\nsu pr")
        .output()
        .unwrap();
    assert!(output.status.success());
    let reply = stdout_json(&output);
    assert_eq!(reply["matches"], serde_json::json!(["price2"]));
    assert_eq!(reply["cursor_start"], 31);

    let output = cli(&temp)
        .args(["complete", "--cursor", "4"])
        .write_stdin("%tim")
        .output()
        .unwrap();
    assert_eq!(stdout_json(&output)["matches"], serde_json::json!(["time"]));
}

#[test]
fn info_describes_language() {
    let temp = tempdir().unwrap();
    let output = cli(&temp).arg("info").output().unwrap();
    assert!(output.status.success());
    let info = stdout_json(&output);
    assert_eq!(info["language_info"]["name"], "stata");
    assert_eq!(info["language_info"]["file_extension"], ".do");
}

#[test]
fn invalid_config_is_reported() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("stata-bridge.toml"), "command_log = \"yes\"\n").unwrap();
    cli(&temp)
        .arg("info")
        .assert()
        .failure()
        .stderr(predicate::str::contains("stata-bridge.toml"));
}

#[cfg(unix)]
#[test]
fn run_executes_do_file() {
    let temp = with_fake_stata();
    fs::write(temp.path().join("ok.do"), "di hello\n* note\ndi world\n").unwrap();

    cli(&temp)
        .args(["run", "ok.do"])
        .assert()
        .success()
        .stdout("hello\nworld\n");

    assert_eq!(fs::read_dir(temp.path().join("cache/commands")).unwrap().count(), 1);
}

#[cfg(unix)]
#[test]
fn run_halts_on_first_failure() {
    let temp = with_fake_stata();
    fs::write(temp.path().join("bad.do"), "di first\nbad\ndi never\n").unwrap();

    cli(&temp)
        .args(["run", "bad.do"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("first"))
        .stdout(predicate::str::contains("command bad is unrecognized"))
        .stdout(predicate::str::contains("never").not());

    cli(&temp)
        .args(["run", "--keep-going", "bad.do"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("never"));
}

#[cfg(unix)]
#[test]
fn run_reads_stdin_statement_by_statement() {
    let temp = with_fake_stata();

    cli(&temp)
        .arg("run")
        .write_stdin("#delimit ;\ndi\n  one;\n#delimit cr\ndi two\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("delimiter now ;"))
        .stdout(predicate::str::contains("one\n"))
        .stdout(predicate::str::contains("delimiter now cr"))
        .stdout(predicate::str::contains("two\n"));
}
