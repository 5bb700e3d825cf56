/*!
Test support helpers shared across integration tests.

- source_tree(..): temp source tree with a Dockerfile and optional overlay
- config(..): ImageConfig shorthand
- write_script(dir, name, body): executable stub on unix

Helpers do not print skip messages themselves so tests keep their own
"skipping: ..." outputs.
*/

use std::fs;
use std::path::{Path, PathBuf};

use derivebox::ImageConfig;

/// Temp source tree holding `Dockerfile`; with `overlay`, also `WORKDIR/hello.txt`.
#[allow(dead_code)]
pub fn source_tree(overlay: bool) -> tempfile::TempDir {
    let td = tempfile::tempdir().expect("tmpdir");
    fs::write(td.path().join("Dockerfile"), "FROM ubuntu:22.04\nCMD [\"sleep\", \"infinity\"]\n")
        .expect("write Dockerfile");
    if overlay {
        fs::create_dir(td.path().join("WORKDIR")).expect("mkdir WORKDIR");
        fs::write(td.path().join("WORKDIR").join("hello.txt"), "hi\n").expect("write overlay");
    }
    td
}

#[allow(dead_code)]
pub fn config(workdir: Option<&str>, cmd: &[&str], env: &[&str]) -> ImageConfig {
    ImageConfig {
        working_dir: workdir.map(str::to_string),
        cmd: cmd.iter().map(|s| s.to_string()).collect(),
        entrypoint: Vec::new(),
        env: env.iter().map(|s| s.to_string()).collect(),
    }
}

/// Write an executable shell script and return its path.
#[cfg(unix)]
#[allow(dead_code)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let p = dir.join(name);
    fs::write(&p, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = fs::metadata(&p).expect("stat").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&p, perms).expect("chmod");
    p
}

/// Return true if `sh` is usable (stub scripts need it).
#[allow(dead_code)]
pub fn have_sh() -> bool {
    Path::new("/bin/sh").exists()
}
