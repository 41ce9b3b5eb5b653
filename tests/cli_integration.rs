//! CLI integration tests for cellar.
//!
//! These tests drive the real binary against a throwaway root and a
//! registry of `sh`-based descriptors whose sources are local tarballs.

#![cfg(unix)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use flate2::write::GzEncoder;
use flate2::Compression;
use predicates::prelude::*;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

/// A root, a registry directory and a directory of source tarballs.
struct Fixture {
    tmp: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let fixture = Fixture {
            tmp: TempDir::new().unwrap(),
        };
        fs::create_dir_all(fixture.registry()).unwrap();
        fs::create_dir_all(fixture.tmp.path().join("sources")).unwrap();
        fixture
    }

    fn root(&self) -> PathBuf {
        self.tmp.path().join("root")
    }

    fn registry(&self) -> PathBuf {
        self.tmp.path().join("registry")
    }

    /// Get the cellar binary command, pointed at this fixture.
    fn cellar(&self) -> Command {
        let mut cmd = Command::cargo_bin("cellar").unwrap();
        cmd.arg("--root")
            .arg(self.root())
            .arg("--registry")
            .arg(self.registry())
            .env_remove("CELLAR_ROOT")
            .env_remove("RUST_LOG");
        cmd
    }

    /// Write `<name>-1.0.0.tar.gz` and return its URL and digest.
    fn tarball(&self, name: &str, files: &[(&str, &str)]) -> (String, String) {
        let path = self
            .tmp
            .path()
            .join("sources")
            .join(format!("{}-1.0.0.tar.gz", name));

        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (file, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(
                    &mut header,
                    format!("{}-1.0.0/{}", name, file),
                    contents.as_bytes(),
                )
                .unwrap();
        }
        let bytes = builder.into_inner().unwrap().finish().unwrap();
        fs::File::create(&path).unwrap().write_all(&bytes).unwrap();

        let url = url::Url::from_file_path(&path).unwrap().to_string();
        (url, hex::encode(Sha256::digest(&bytes)))
    }

    /// Register a descriptor. `body` holds everything after `[[source]]`.
    fn descriptor(&self, name: &str, url: &str, sha256: &str, body: &str) {
        let text = format!(
            "schema = 1\n\n[package]\nname = \"{name}\"\nversion = \"1.0.0\"\ndescription = \"the {name} package\"\n\n[[source]]\nurl = \"{url}\"\nsha256 = \"{sha256}\"\n\n{body}"
        );
        fs::write(self.registry().join(format!("{}.toml", name)), text).unwrap();
    }

    /// `libgreet` installs a data file; `hello` depends on it and installs
    /// a script that prints the greeting.
    fn hello_world(&self) {
        let (url, sha) = self.tarball("libgreet", &[("greeting", "hello\n")]);
        self.descriptor(
            "libgreet",
            &url,
            &sha,
            r#"[[install]]
run = ["sh", "-c", "mkdir -p ${share}/greet && cp greeting ${share}/greet/greeting"]
"#,
        );

        let (url, sha) = self.tarball("hello", &[("hello.sh", "#!/bin/sh\necho hello\n")]);
        self.descriptor(
            "hello",
            &url,
            &sha,
            r#"[dependencies]
run = ["libgreet"]

[[install]]
run = ["sh", "-c", "mkdir -p ${bin} && cp hello.sh ${bin}/hello && chmod +x ${bin}/hello"]

[[test]]
run = ["sh", "-c", "${bin}/hello > out.txt"]

[[test]]
assert_contains = { path = "out.txt", text = "hello" }
"#,
        );
    }
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

// ============================================================================
// cellar install
// ============================================================================

#[test]
fn test_install_builds_dependencies_and_links() {
    let f = Fixture::new();
    f.hello_world();

    f.cellar()
        .args(["install", "hello"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Installed"))
        .stderr(predicate::str::contains("libgreet v1.0.0"))
        .stderr(predicate::str::contains("Tested"));

    let root = f.root();
    assert!(root.join("cellar/hello/1.0.0/bin/hello").exists());
    assert!(is_symlink(&root.join("bin/hello")));
    assert!(root.join("share/greet/greeting").exists());
    assert!(root.join("var/db/installed.json").exists());

    let output = Command::new(root.join("bin/hello")).output().unwrap();
    assert_eq!(String::from_utf8_lossy(&output.stdout), "hello\n");
}

#[test]
fn test_install_twice_is_a_no_op() {
    let f = Fixture::new();
    f.hello_world();

    f.cellar().args(["install", "hello"]).assert().success();
    f.cellar()
        .args(["install", "hello", "--no-verify"])
        .assert()
        .success()
        .stderr(predicate::str::contains("already installed"));
}

#[test]
fn test_install_unknown_package_exits_2() {
    let f = Fixture::new();
    f.hello_world();

    f.cellar()
        .args(["install", "helo"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("could not find package `helo`"))
        .stderr(predicate::str::contains("cellar list --available"));
}

#[test]
fn test_checksum_mismatch_exits_3_and_installs_nothing() {
    let f = Fixture::new();
    let (url, _) = f.tarball("tampered", &[("README", "x\n")]);
    f.descriptor(
        "tampered",
        &url,
        &"0".repeat(64),
        "[[install]]\nrun = [\"sh\", \"-c\", \"mkdir -p ${bin} && touch ${bin}/tampered\"]\n",
    );

    f.cellar()
        .args(["install", "tampered"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("checksum mismatch"));

    assert!(!f.root().join("cellar/tampered").exists());
    assert!(!f.root().join("bin/tampered").exists());
}

#[test]
fn test_step_failure_exits_4_with_output_and_workdir() {
    let f = Fixture::new();
    let (url, sha) = f.tarball("broken", &[("README", "x\n")]);
    f.descriptor(
        "broken",
        &url,
        &sha,
        r#"[[install]]
run = ["sh", "-c", "echo configuring"]

[[install]]
run = ["sh", "-c", "echo 'cc: fatal error' >&2; exit 3"]

[[install]]
run = ["sh", "-c", "mkdir -p ${bin} && touch ${bin}/broken"]
"#,
    );

    f.cellar()
        .args(["install", "broken"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("failed to build `broken v1.0.0`"))
        .stderr(predicate::str::contains("exit code 3"))
        .stderr(predicate::str::contains("cc: fatal error"))
        .stderr(predicate::str::contains("working directory kept at"));

    assert!(!f.root().join("cellar/broken").exists());
    assert_eq!(fs::read_dir(f.root().join("var/work")).unwrap().count(), 1);

    f.cellar()
        .arg("cleanup")
        .assert()
        .success()
        .stderr(predicate::str::contains("1 working directory"));
}

#[test]
fn test_json_output_is_one_event_per_line() {
    let f = Fixture::new();
    f.hello_world();

    let output = f
        .cellar()
        .args(["install", "hello", "--message-format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let reasons: Vec<String> = stdout
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            value["reason"].as_str().unwrap().to_string()
        })
        .collect();

    assert_eq!(reasons.first().map(String::as_str), Some("plan"));
    assert_eq!(reasons.last().map(String::as_str), Some("finished"));
    assert_eq!(reasons.iter().filter(|r| *r == "package-installed").count(), 2);
    assert!(reasons.iter().any(|r| r == "verify-finished"));
}

// ============================================================================
// cellar list / deps / test
// ============================================================================

#[test]
fn test_list_installed_and_available() {
    let f = Fixture::new();
    f.hello_world();

    f.cellar()
        .arg("list")
        .assert()
        .success()
        .stderr(predicate::str::contains("no packages installed"));

    f.cellar()
        .args(["install", "hello", "--no-verify"])
        .assert()
        .success();

    f.cellar()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("hello"))
        .stdout(predicate::str::contains("libgreet  1.0.0 (dependency)"));

    f.cellar()
        .args(["list", "--available"])
        .assert()
        .success()
        .stdout(predicate::str::contains("* hello"))
        .stdout(predicate::str::contains("the hello package"));
}

#[test]
fn test_deps_prints_tree_and_order() {
    let f = Fixture::new();
    f.hello_world();

    f.cellar()
        .args(["deps", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::diff("hello v1.0.0\n└── libgreet v1.0.0\n"));

    f.cellar()
        .args(["deps", "hello", "--order"])
        .assert()
        .success()
        .stdout(predicate::str::diff("libgreet v1.0.0\nhello v1.0.0\n"));
}

#[test]
fn test_test_command() {
    let f = Fixture::new();
    f.hello_world();

    f.cellar()
        .args(["test", "hello"])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("package `hello` is not installed"));

    f.cellar()
        .args(["install", "hello", "--no-verify"])
        .assert()
        .success();

    f.cellar()
        .args(["test", "hello"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Tested"));
}

// ============================================================================
// cellar uninstall
// ============================================================================

#[test]
fn test_uninstall_respects_dependents() {
    let f = Fixture::new();
    f.hello_world();

    f.cellar()
        .args(["install", "hello", "--no-verify"])
        .assert()
        .success();

    f.cellar()
        .args(["uninstall", "libgreet"])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("required by hello"));

    f.cellar()
        .args(["uninstall", "hello"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Removed"));

    assert!(!f.root().join("bin/hello").exists());
    assert!(!f.root().join("cellar/hello").exists());
    assert!(f.root().join("share/greet/greeting").exists());

    f.cellar().args(["uninstall", "libgreet"]).assert().success();
    assert!(!f.root().join("share/greet").exists());
}

// ============================================================================
// misc
// ============================================================================

#[test]
fn test_completions() {
    Command::cargo_bin("cellar")
        .unwrap()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cellar"));
}

#[test]
fn test_usage_error_exits_1() {
    Command::cargo_bin("cellar")
        .unwrap()
        .arg("install")
        .assert()
        .code(1);
}
