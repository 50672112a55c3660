//! CLI integration tests for dagen.
//!
//! These tests drive the binary against dagen.toml workspaces written to
//! temporary directories.

use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use tempfile::TempDir;

const FOO_BAR: &str = r#"
[flags.opt]
type = "string"
description = "Optimization level"
allowed = ["0", "2"]
default = "0"

[targets.Foo]
description = "Compile foo"

[[targets.Foo.steps]]
inputs = ["src/foo.c"]
outputs = ["out/foo.bin"]
command = "cc -O{{opt}} -o $out $in"

[targets.Bar]
description = "Package bar"
run = "{{cwd}}/out/bar.bin"

[[targets.Bar.steps]]
inputs = ["out:out/foo.bin"]
outputs = ["out/bar.bin"]
command = "cp $in $out"
"#;

/// Get the dagen binary command.
fn dagen() -> Command {
    let mut cmd = Command::cargo_bin("dagen").unwrap();
    // Keep the user's global configuration out of the tests.
    cmd.env("HOME", "/nonexistent").env("XDG_CONFIG_HOME", "/nonexistent");
    cmd
}

/// Create a workspace with the Foo/Bar manifest.
fn workspace() -> TempDir {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("dagen.toml"), FOO_BAR).unwrap();
    fs::create_dir_all(tmp.path().join("src")).unwrap();
    fs::write(tmp.path().join("src/foo.c"), "int main(void) { return 0; }\n").unwrap();
    tmp
}

fn generate(ws: &Path, mode: &str) -> Command {
    let mut cmd = dagen();
    cmd.arg("generate")
        .arg(mode)
        .arg(ws)
        .arg(ws.join("build"))
        .arg(ws.join("build"));
    cmd
}

// ============================================================================
// dagen generate
// ============================================================================

#[test]
fn test_generate_writes_ninja_file() {
    let ws = workspace();

    generate(ws.path(), "build")
        .assert()
        .success()
        .stdout(predicate::str::contains("Generated"));

    let ninja = fs::read_to_string(ws.path().join("build/build.ninja")).unwrap();
    assert!(ninja.starts_with("build __phony__: phony\n"));
    assert!(ninja.contains("build Foo:"));
    assert!(ninja.contains("build Bar:"));
    assert!(ninja.contains("build Bar#run:"));
    assert!(ninja.contains("cc -O0 -o $out $in"));

    let flags = fs::read_to_string(ws.path().join("build/FLAGS.json")).unwrap();
    assert!(flags.contains("\"opt\": \"0\""));
}

#[test]
fn test_generate_flag_override() {
    let ws = workspace();

    generate(ws.path(), "build").arg("opt=2").assert().success();

    let ninja = fs::read_to_string(ws.path().join("build/build.ninja")).unwrap();
    assert!(ninja.contains("cc -O2 -o $out $in"));
}

#[test]
fn test_generate_no_persist() {
    let ws = workspace();

    generate(ws.path(), "build")
        .arg("--no-persist")
        .assert()
        .success();

    assert!(!ws.path().join("build/FLAGS.json").exists());
}

#[test]
fn test_generate_disallowed_flag_fails() {
    let ws = workspace();

    generate(ws.path(), "build")
        .arg("opt=3")
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("error: "))
        .stderr(predicate::str::contains("unallowed value `3`"));

    assert!(!ws.path().join("build/build.ninja").exists());
}

#[test]
fn test_generate_output_document() {
    let ws = workspace();

    let output = generate(ws.path(), "run")
        .args(["--output", "-", "--run-arg", "--fast"])
        .output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let json_start = stdout.find('{').unwrap();
    let doc: serde_json::Value = serde_json::from_str(&stdout[json_start..]).unwrap();

    assert_eq!(doc["selected_targets"], serde_json::json!(["Bar"]));
    assert_eq!(doc["targets"]["Bar"]["runnable"], true);
    assert_eq!(doc["flags"]["opt"]["value"], "0");
    assert!(doc["ninja_file"]
        .as_str()
        .unwrap()
        .contains("/out/bar.bin --fast\n"));
}

#[test]
fn test_generate_list_mode_writes_no_ninja_file() {
    let ws = workspace();

    generate(ws.path(), "list").assert().success();

    assert!(!ws.path().join("build/build.ninja").exists());
}

#[test]
fn test_generate_invalid_manifest_fails() {
    let ws = TempDir::new().unwrap();
    fs::write(
        ws.path().join("dagen.toml"),
        "[[targets.T.steps]]\noutputs = [\"x\"]\ncommand = \"cc {{nope}}\"\n",
    )
    .unwrap();

    generate(ws.path(), "build")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown placeholder `{{nope}}`"));
}

#[test]
fn test_generate_conflicting_outputs_fail() {
    let ws = TempDir::new().unwrap();
    fs::write(
        ws.path().join("dagen.toml"),
        r#"
[[libraries.a.steps]]
outputs = ["shared.o"]
command = "cc -O0"

[[libraries.b.steps]]
outputs = ["shared.o"]
command = "cc -O2"

[[targets.A.steps]]
libs = ["a"]
outputs = ["a"]
command = "ld"

[[targets.B.steps]]
libs = ["b"]
outputs = ["b"]
command = "ld"
"#,
    )
    .unwrap();

    generate(ws.path(), "build")
        .assert()
        .failure()
        .stderr(predicate::str::contains("while processing target 'B'"))
        .stderr(predicate::str::contains("top:A // lib:a"))
        .stderr(predicate::str::contains("top:B // lib:b"));
}

#[test]
fn test_verbose_prints_help() {
    let ws = workspace();

    generate(ws.path(), "build")
        .args(["-v", "opt=3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unallowed value"));

    let ws = TempDir::new().unwrap();
    fs::write(
        ws.path().join("dagen.toml"),
        "[targets.All]\ndeps = [\"Missing\"]\n",
    )
    .unwrap();

    generate(ws.path(), "build")
        .arg("--verbose")
        .assert()
        .failure()
        .stderr(predicate::str::contains("help: Run `dagen targets`"));
}

// ============================================================================
// dagen targets / flags
// ============================================================================

#[test]
fn test_targets_lists_exported_targets() {
    let ws = workspace();

    dagen()
        .arg("targets")
        .current_dir(ws.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Foo"))
        .stdout(predicate::str::contains("Compile foo"))
        .stdout(predicate::str::contains("[run]"));
}

#[test]
fn test_flags_shows_resolved_values() {
    let ws = workspace();

    dagen()
        .args(["flags", "opt=2"])
        .current_dir(ws.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("opt = 2"))
        .stdout(predicate::str::contains("allowed: 0, 2"));

    // Inspection does not persist.
    assert!(!ws.path().join("build/FLAGS.json").exists());
}

#[test]
fn test_targets_without_manifest_fails() {
    let tmp = TempDir::new().unwrap();

    dagen()
        .arg("targets")
        .current_dir(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("could not find `dagen.toml`"));
}

// ============================================================================
// dagen completions
// ============================================================================

#[test]
fn test_completions_bash() {
    dagen()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dagen"));
}
