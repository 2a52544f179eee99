#![allow(deprecated)]
use assert_cmd::Command;
use flate2::read::GzDecoder;
use predicates::prelude::*;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

struct Buckets {
    root: TempDir,
}

impl Buckets {
    /// Source bucket seeded with `objects`, plus an empty destination.
    fn new(objects: &[(&str, &[u8])]) -> Self {
        let root = tempdir().unwrap();
        for dir in ["src", "dst", "work"] {
            fs::create_dir_all(root.path().join(dir)).unwrap();
        }
        for (key, body) in objects {
            fs::write(root.path().join("src").join(key), body).unwrap();
        }
        Self { root }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }

    fn url(&self, name: &str) -> String {
        format!("file://{}", self.path(name).display())
    }

    fn persisted(&self) -> Vec<PathBuf> {
        archives_in(&self.path("dst"))
    }
}

fn collate() -> Command {
    let mut cmd = Command::cargo_bin("collate").unwrap();
    for var in [
        "COLLATE_CONFIG",
        "COLLATE_SOURCE_URL",
        "COLLATE_DEST_URL",
        "COLLATE_LINK_TTL",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn run_cmd(b: &Buckets) -> Command {
    let mut cmd = collate();
    cmd.arg("run")
        .arg("--source")
        .arg(b.url("src"))
        .arg("--dest")
        .arg(b.url("dst"))
        .arg("--work-dir")
        .arg(b.path("work"));
    cmd
}

fn archives_in(dir: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.to_string_lossy().ends_with(".tar.gz"))
        .collect();
    found.sort();
    found
}

fn entries(path: &Path) -> Vec<(String, Vec<u8>)> {
    let file = fs::File::open(path).unwrap();
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive
        .entries()
        .unwrap()
        .map(|e| {
            let mut e = e.unwrap();
            let name = e.path().unwrap().to_string_lossy().into_owned();
            let mut data = Vec::new();
            e.read_to_end(&mut data).unwrap();
            (name, data)
        })
        .collect()
}

fn names(entries: &[(String, Vec<u8>)]) -> Vec<&str> {
    entries.iter().map(|(n, _)| n.as_str()).collect()
}

#[test]
fn test_run_directory_manifest() {
    let b = Buckets::new(&[("b.png", b"BB"), ("a.png", b"AAAA")]);

    let output = run_cmd(&b)
        .arg("--dir")
        .arg(b.path("src"))
        .assert()
        .success()
        .stdout(predicate::str::starts_with("file://"))
        .stderr(predicate::str::contains("2 written, 0 failed"))
        .get_output()
        .stdout
        .clone();

    let link = String::from_utf8(output).unwrap();
    let linked = PathBuf::from(link.trim().trim_start_matches("file://"));
    assert!(linked.exists());

    let persisted = b.persisted();
    assert_eq!(persisted.len(), 1);
    assert_eq!(linked.file_name(), persisted[0].file_name());

    let all = entries(&persisted[0]);
    assert_eq!(names(&all), ["index.html", "a.png", "b.png"]);
    assert_eq!(all[1].1, b"AAAA");

    // Local copy is kept by default
    assert_eq!(archives_in(&b.path("work")).len(), 1);
}

#[test]
fn test_missing_object_still_publishes() {
    let b = Buckets::new(&[("a.png", b"AAAA")]);

    run_cmd(&b)
        .args(["--key", "a.png", "--key", "missing.png"])
        .assert()
        .success()
        .stdout(predicate::str::contains(".tar.gz"))
        .stderr(predicate::str::contains("missing.png").and(predicate::str::contains("1 failed")));

    let all = entries(&b.persisted()[0]);
    assert_eq!(names(&all), ["index.html", "a.png", "missing.png"]);
    assert!(all[2].1.is_empty());
}

#[test]
fn test_fail_on_partial_exit_code() {
    let b = Buckets::new(&[("a.png", b"AAAA")]);

    run_cmd(&b)
        .args(["--key", "a.png", "--key", "missing.png", "--fail-on-partial"])
        .assert()
        .code(4);

    // The archive was still published
    assert_eq!(b.persisted().len(), 1);
}

#[test]
fn test_omit_failed() {
    let b = Buckets::new(&[("a.png", b"AAAA")]);

    run_cmd(&b)
        .args(["--key", "missing.png", "--key", "a.png", "--omit-failed"])
        .assert()
        .success();

    let all = entries(&b.persisted()[0]);
    assert_eq!(names(&all), ["index.html", "a.png"]);
}

#[test]
fn test_report_file() {
    let b = Buckets::new(&[("a.png", b"AAAA")]);
    let report = b.path("report.json");

    run_cmd(&b)
        .args(["--key", "a.png", "--key", "missing.png", "--ttl", "10m"])
        .arg("--report")
        .arg(&report)
        .assert()
        .success();

    let json: serde_json::Value = serde_json::from_slice(&fs::read(&report).unwrap()).unwrap();
    assert_eq!(json["link"]["ttl"], "10m");
    assert_eq!(json["report"]["entries"][0]["status"], "written");
    assert_eq!(json["report"]["entries"][0]["bytes"], 4);
    assert_eq!(json["report"]["entries"][1]["key"], "missing.png");
    assert_eq!(json["report"]["entries"][1]["status"], "empty");
}

#[test]
fn test_unwritable_report_after_publish() {
    let b = Buckets::new(&[("a.png", b"AAAA")]);

    run_cmd(&b)
        .args(["--key", "a.png", "--report"])
        .arg(b.path("no-such-dir").join("report.json"))
        .assert()
        .code(5)
        .stdout(predicate::str::starts_with("file://"))
        .stderr(predicate::str::contains("failed to write report"));

    // The run itself completed
    assert_eq!(b.persisted().len(), 1);
}

#[test]
fn test_config_file() {
    let b = Buckets::new(&[("a.png", b"AAAA"), ("b.png", b"BB")]);
    let keys = b.path("keys.txt");
    fs::write(&keys, "# gallery\nb.png\na.png\n").unwrap();

    let config = b.path("collate.yaml");
    fs::write(
        &config,
        format!(
            "source: {}\ndestination: {}\nwork_dir: {}\nmanifest:\n  file: {}\nkeep_local: false\n",
            b.url("src"),
            b.url("dst"),
            b.path("work").display(),
            keys.display()
        ),
    )
    .unwrap();

    collate()
        .arg("run")
        .arg("--config")
        .arg(&config)
        .assert()
        .success();

    let all = entries(&b.persisted()[0]);
    assert_eq!(names(&all), ["index.html", "b.png", "a.png"]);
    assert!(archives_in(&b.path("work")).is_empty());
}

#[test]
fn test_invalid_store_url_is_config_error() {
    let b = Buckets::new(&[]);

    collate()
        .arg("run")
        .args(["--source", "ftp://example.com/images"])
        .arg("--dest")
        .arg(b.url("dst"))
        .args(["--key", "a.png"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unsupported scheme"));
}

#[test]
fn test_missing_manifest_is_config_error() {
    let b = Buckets::new(&[]);

    run_cmd(&b)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("manifest"));
}

#[test]
fn test_unreadable_manifest_exit_code() {
    let b = Buckets::new(&[]);

    run_cmd(&b)
        .arg("--dir")
        .arg(b.path("does-not-exist"))
        .assert()
        .code(3)
        .stderr(predicate::str::contains("resolve failed"));

    assert!(b.persisted().is_empty());
    assert!(archives_in(&b.path("work")).is_empty());
}

#[test]
fn test_show_lists_entries() {
    let b = Buckets::new(&[("a.png", b"AAAA")]);

    run_cmd(&b)
        .args(["--key", "a.png", "--key", "missing.png"])
        .assert()
        .success();
    let archive = archives_in(&b.path("work")).remove(0);

    collate()
        .arg("show")
        .arg(&archive)
        .assert()
        .success()
        .stdout(
            predicate::str::contains("NAME")
                .and(predicate::str::contains("index.html"))
                .and(predicate::str::contains("missing.png")),
        )
        .stderr(predicate::str::contains("1 empty entry"));

    let output = collate()
        .arg("show")
        .arg(&archive)
        .args(["--format", "json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json["count"], 3);
    assert_eq!(json["entries"][1]["name"], "a.png");
    assert_eq!(json["entries"][1]["size"], 4);
}

#[test]
fn test_show_rejects_non_archive() {
    let dir = tempdir().unwrap();
    let bogus = dir.path().join("bogus.tar.gz");
    fs::write(&bogus, b"not an archive").unwrap();

    collate()
        .arg("show")
        .arg(&bogus)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read archive"));
}
