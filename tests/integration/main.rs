//! Integration tests for Stager

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    const LOCKFILE: &str = "\
GIT
  remote: git://example.com/foo.git
  revision: deadbeef0000aaaabbbbccccdddd
  specs:
    foo (0.3.0)

GEM
  remote: http://rubygems.org/
  specs:
    rack (1.2.1)
    sinatra (1.0)
      rack (>= 1.0)
      tilt (~> 1.1)
    tilt (1.1)

PLATFORMS
  ruby

DEPENDENCIES
  foo!
  sinatra
";

    fn stager() -> Command {
        let mut cmd = cargo_bin_cmd!("stager");
        // keep a developer's own config out of the tests
        cmd.env("STAGER_CONFIG", "/nonexistent/stager/config.toml");
        cmd
    }

    fn app_with_lockfile() -> TempDir {
        let root = TempDir::new().unwrap();
        let app = root.path().join("app");
        fs::create_dir_all(&app).unwrap();
        fs::write(app.join("Gemfile.lock"), LOCKFILE).unwrap();
        root
    }

    #[test]
    fn help_displays() {
        stager()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Stager - stage uploaded applications"));
    }

    #[test]
    fn version_displays() {
        stager()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("stager"));
    }

    #[test]
    fn config_path() {
        stager()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("/nonexistent/stager/config.toml"));
    }

    #[test]
    fn config_show() {
        stager()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[ruby]"))
            .stdout(predicate::str::contains("library_version = \"1.9.1\""));
    }

    #[test]
    fn config_show_reads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[ruby]\nlibrary_version = \"1.8\"\n").unwrap();

        stager()
            .args(["config", "show", "--config"])
            .arg(&path)
            .assert()
            .success()
            .stdout(predicate::str::contains("library_version = \"1.8\""));
    }

    #[test]
    fn deps_partitions_lockfile() {
        let root = app_with_lockfile();
        stager()
            .args(["deps", "--format", "plain"])
            .arg(root.path().join("app"))
            .assert()
            .success()
            .stdout(predicate::str::contains("rack-1.2.1"))
            .stdout(predicate::str::contains("tilt-1.1"))
            .stdout(predicate::str::contains("foo-0.3.0 foo-deadbeef0000"));
    }

    #[test]
    fn deps_as_json() {
        let root = app_with_lockfile();
        let output = stager()
            .args(["deps", "--format", "json"])
            .arg(root.path().join("app"))
            .output()
            .unwrap();
        assert!(output.status.success());

        let doc: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        let gems = doc["gems"].as_array().unwrap();
        assert_eq!(gems.len(), 3);
        assert!(gems.iter().all(|g| g["name"] != "foo"));
        assert_eq!(doc["git"][0]["uri"], "git://example.com/foo.git");
    }

    #[test]
    fn deps_without_lockfile_fails() {
        let dir = TempDir::new().unwrap();
        stager()
            .arg("deps")
            .arg(dir.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("Gemfile.lock"));
    }

    #[test]
    fn gems_on_missing_app_fails() {
        stager()
            .args(["gems", "/nonexistent/app"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Path not found"));
    }

    #[test]
    fn buildpack_without_buildpacks_fails() {
        let root = app_with_lockfile();
        let buildpacks = root.path().join("buildpacks");
        fs::create_dir_all(&buildpacks).unwrap();

        stager()
            .arg("buildpack")
            .arg(root.path().join("app"))
            .arg("--buildpacks")
            .arg(&buildpacks)
            .assert()
            .failure()
            .stderr(predicate::str::contains("No buildpacks installed"));
    }

    #[test]
    fn buildpack_runs_protocol() {
        let root = app_with_lockfile();
        let pack = root.path().join("buildpacks/shell");
        fs::create_dir_all(pack.join("bin")).unwrap();
        write_script(&pack.join("bin/detect"), "#!/bin/sh\nexit 0\n");
        write_script(&pack.join("bin/compile"), "#!/bin/sh\ntouch \"$1/compiled\"\n");
        write_script(
            &pack.join("bin/release"),
            "#!/bin/sh\necho 'config_vars:'\necho '  RACK_ENV: production'\necho 'default_process_types:'\necho '  web: rackup'\n",
        );

        stager()
            .arg("buildpack")
            .arg(root.path().join("app"))
            .arg("--buildpacks")
            .arg(root.path().join("buildpacks"))
            .arg("--cache-dir")
            .arg(root.path().join("cache"))
            .assert()
            .success()
            .stdout(predicate::str::contains("\"buildpack\": \"shell\""))
            .stdout(predicate::str::contains("\"web\": \"rackup\""));

        assert!(root.path().join("app/compiled").exists());
        let log = fs::read_to_string(root.path().join("logs/staging.log")).unwrap();
        assert!(log.contains("Checking shell ..."));
    }

    fn write_script(path: &std::path::Path, body: &str) {
        use std::os::unix::fs::PermissionsExt;
        fs::write(path, body).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }
}
