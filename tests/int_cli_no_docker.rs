use std::process::Command;

fn derivebox(dir: &std::path::Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_derivebox"));
    cmd.current_dir(dir)
        .env("XDG_CONFIG_HOME", dir)
        .env_remove("DERIVEBOX_CONFIG")
        .env("NO_COLOR", "1");
    cmd
}

#[test]
fn int_cli_missing_docker_exits_127() {
    let td = tempfile::tempdir().expect("tmpdir");
    std::fs::write(td.path().join("Dockerfile"), "FROM scratch\n").expect("write");
    // Clear PATH to hide docker for this subprocess
    let out = derivebox(td.path())
        .args([".", "me/app"])
        .env("PATH", "")
        .output()
        .expect("run derivebox");
    assert_eq!(out.status.code(), Some(127));
    let err = String::from_utf8_lossy(&out.stderr);
    assert!(
        err.contains("Docker is required but was not found in PATH."),
        "stderr:\n{err}"
    );
}

#[test]
fn int_cli_explicit_missing_config_exits_1() {
    let td = tempfile::tempdir().expect("tmpdir");
    let out = derivebox(td.path())
        .args(["--config", "nope.yml", ".", "me/app"])
        .output()
        .expect("run derivebox");
    assert_eq!(out.status.code(), Some(1));
    let err = String::from_utf8_lossy(&out.stderr);
    assert!(err.contains("invalid configuration: cannot read nope.yml"), "stderr:\n{err}");
}

#[test]
fn int_cli_rejects_zero_timeout() {
    let td = tempfile::tempdir().expect("tmpdir");
    let out = derivebox(td.path())
        .args(["--timeout", "0s", ".", "me/app"])
        .output()
        .expect("run derivebox");
    assert!(!out.status.success());
    let err = String::from_utf8_lossy(&out.stderr);
    assert!(err.contains("must be greater than zero"), "stderr:\n{err}");
}
