//! Integration tests for the aios binary.
//!
//! These exercise the CLI surface end to end; the HTTP and WebSocket
//! handlers are covered by unit tests against the in-memory router.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create an aios Command isolated from the caller's environment
fn aios() -> Command {
    let mut cmd = cargo_bin_cmd!("aios");
    cmd.env_remove("OPENAI_API_KEY")
        .env_remove("AIOS_PORT")
        .env_remove("AIOS_DB_PATH")
        .env_remove("RUST_LOG");
    cmd
}

mod cli_basics {
    use super::*;

    #[test]
    fn test_aios_help() {
        aios()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("init-db"));
    }

    #[test]
    fn test_aios_version() {
        aios()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_unknown_subcommand_fails() {
        aios().arg("reboot").assert().failure();
    }
}

mod init_db {
    use super::*;

    #[test]
    fn test_init_db_creates_database_file() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("data").join("aios.db");

        aios()
            .current_dir(dir.path())
            .args(["init-db", "--db-path"])
            .arg(&db_path)
            .assert()
            .success()
            .stdout(predicate::str::contains("Database initialized"));

        assert!(db_path.exists());
    }

    #[test]
    fn test_init_db_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("aios.db");

        for _ in 0..2 {
            aios()
                .current_dir(dir.path())
                .args(["init-db", "--db-path"])
                .arg(&db_path)
                .assert()
                .success();
        }
    }

    #[test]
    fn test_init_db_uses_config_file_path() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("aios.toml"),
            "[database]\npath = \"store/desktop.db\"\n",
        )
        .unwrap();

        aios()
            .current_dir(dir.path())
            .arg("init-db")
            .assert()
            .success();

        assert!(dir.path().join("store/desktop.db").exists());
    }

    #[test]
    fn test_env_overrides_db_path() {
        let dir = TempDir::new().unwrap();

        aios()
            .current_dir(dir.path())
            .env("AIOS_DB_PATH", "from-env.db")
            .arg("init-db")
            .assert()
            .success();

        assert!(dir.path().join("from-env.db").exists());
    }
}

mod config {
    use super::*;

    #[test]
    fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();

        aios()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created aios.toml"));

        let content = fs::read_to_string(dir.path().join("aios.toml")).unwrap();
        assert!(content.contains("[server]"));
        assert!(content.contains("port = 5000"));
        assert!(!content.contains("api_key"));
    }

    #[test]
    fn test_config_init_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("aios.toml"), "[server]\nport = 9000\n").unwrap();

        aios()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));

        let content = fs::read_to_string(dir.path().join("aios.toml")).unwrap();
        assert!(content.contains("port = 9000"));
    }

    #[test]
    fn test_config_show_reflects_file_and_hides_key() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("aios.toml"),
            "[server]\nport = 9000\n\n[ai]\napi_key = \"sk-secret\"\n",
        )
        .unwrap();

        aios()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 9000"))
            .stdout(predicate::str::contains("api_key = <set>"))
            .stdout(predicate::str::contains("sk-secret").not());
    }

    #[test]
    fn test_config_validate_warns_without_api_key() {
        let dir = TempDir::new().unwrap();

        aios()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_config_validate_clean_with_key() {
        let dir = TempDir::new().unwrap();

        aios()
            .current_dir(dir.path())
            .env("OPENAI_API_KEY", "sk-test")
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_invalid_config_file_is_reported() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("aios.toml"), "[server\nport = ").unwrap();

        aios()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .failure();
    }

    #[test]
    fn test_explicit_config_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[server]\nport = 7777\n").unwrap();

        aios()
            .current_dir(dir.path())
            .arg("--config")
            .arg(&path)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 7777"));
    }
}
