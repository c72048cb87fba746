//! Integration tests for the `fdo-conformance` binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn fdo_cmd() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_fdo-conformance"));
    // keep test output readable
    cmd.env("RUST_LOG", "error");
    cmd.env_remove("FDO_CONFIG");
    cmd
}

mod gen_voucher {
    use super::*;

    #[test]
    fn prints_hex_without_out() {
        fdo_cmd()
            .arg("gen-voucher")
            .args(["--entries", "1"])
            .assert()
            .success()
            .stdout(predicate::str::is_match("^[0-9a-f]+\n$").unwrap());
    }

    #[test]
    fn writes_the_record_to_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.cbor");
        fdo_cmd()
            .arg("gen-voucher")
            .arg("--out")
            .arg(&path)
            .assert()
            .success()
            .stdout(predicate::str::is_empty());
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn rejects_a_non_voucher_fault() {
        fdo_cmd()
            .arg("gen-voucher")
            .args(["--fault", "FIDO_DOT_60_POSITIVE"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("not a voucher test identity"));
    }

    #[test]
    fn accepts_a_voucher_fault() {
        fdo_cmd()
            .arg("gen-voucher")
            .args(["--fault", "FIDO_VOUCHER_HEADER_BAD_PROT_VERSION"])
            .assert()
            .success();
    }
}

mod run {
    use super::*;

    #[test]
    fn requires_target_and_protocol() {
        fdo_cmd()
            .arg("run")
            .env_remove("FDO_TARGET")
            .env_remove("FDO_PROTOCOL")
            .assert()
            .failure()
            .stderr(predicate::str::contains("--target"));
    }

    #[test]
    fn rejects_an_unknown_protocol() {
        fdo_cmd()
            .args(["run", "--target", "http://127.0.0.1:9", "--protocol", "to3"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("unknown protocol"));
    }

    #[test]
    fn unreachable_target_reports_every_identity_and_fails() {
        fdo_cmd()
            .args(["run", "--target", "http://127.0.0.1:9", "--protocol", "to0"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("FAIL  FIDO_RVT_20_POSITIVE"))
            .stderr(predicate::str::contains("tests failed"));
    }
}

mod config {
    use super::*;
    use std::io::Write;

    #[test]
    fn malformed_config_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[listener]\nport = \"not a port\"").unwrap();
        fdo_cmd()
            .arg("--config")
            .arg(file.path())
            .args(["gen-voucher", "--entries", "1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("failed to parse config"));
    }

    #[test]
    fn config_path_from_the_environment() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[voucher]\nrv_urls = []").unwrap();
        fdo_cmd()
            .env("FDO_CONFIG", file.path())
            .args(["gen-voucher", "--entries", "1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("rv_urls must not be empty"));
    }
}
