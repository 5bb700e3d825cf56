mod support;

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use derivebox::engine::testing::ScriptedEngine;
use derivebox::{
    run_build, BuildManifest, BuildRequest, Instruction, LogPolicy, ManifestSource,
    PipelineError,
};

fn generated(dir: &std::path::Path, timeout: Duration) -> BuildRequest {
    let manifest: BuildManifest = vec![
        Instruction::From("me/app".into()),
        Instruction::Cmd(vec!["bash".into()]),
    ]
    .into_iter()
    .collect();
    BuildRequest {
        context_dir: dir.to_path_buf(),
        manifest: ManifestSource::Generated {
            name: "Dockerfile.derived".into(),
            manifest,
        },
        tags: vec!["boxlayer.com/me/app".into()],
        timeout,
        build_args: BTreeMap::new(),
    }
}

#[test]
fn int_build_deadline_cancels_and_cleans_up() {
    let td = support::source_tree(false);
    let engine = ScriptedEngine::new().hang_builds();
    let started = Instant::now();
    let err = run_build(
        &engine,
        &generated(td.path(), Duration::from_millis(200)),
        LogPolicy::Strict,
        &mut |_| {},
    )
    .expect_err("times out");
    assert!(matches!(err, PipelineError::Timeout(d) if d == Duration::from_millis(200)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!td.path().join("Dockerfile.derived").exists());
}

#[test]
fn int_build_strict_policy_rejects_malformed_record() {
    let td = support::source_tree(false);
    let engine = ScriptedEngine::new().with_build_records([
        r#"{"stream":"Step 1/2 : FROM me/app\n"}"#,
        "Sending build context to Docker daemon",
        r#"{"stream":"never reached\n"}"#,
    ]);
    let mut seen = Vec::new();
    let err = run_build(
        &engine,
        &generated(td.path(), Duration::from_secs(5)),
        LogPolicy::Strict,
        &mut |l| seen.push(l.raw.clone()),
    )
    .expect_err("malformed");
    match err {
        PipelineError::MalformedLog { line, .. } => {
            assert_eq!(line, "Sending build context to Docker daemon")
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(seen.len(), 1);
    assert!(!td.path().join("Dockerfile.derived").exists());
}

#[test]
fn int_build_lenient_policy_keeps_raw_text() {
    let td = support::source_tree(false);
    let engine = ScriptedEngine::new().with_build_records([
        "plain progress text",
        "",
        r#"{"stream":"Successfully built 0123abcd\n"}"#,
    ]);
    let out = run_build(
        &engine,
        &generated(td.path(), Duration::from_secs(5)),
        LogPolicy::Lenient,
        &mut |_| {},
    )
    .expect("lenient build");
    assert_eq!(out.lines.len(), 2, "blank records are skipped");
    assert_eq!(out.lines[0].stream.as_deref(), Some("plain progress text"));
    assert_eq!(out.image(), "boxlayer.com/me/app");
}

#[test]
fn int_build_engine_rejection_surfaces_as_engine_error() {
    let td = support::source_tree(false);
    let engine = ScriptedEngine::new().fail(derivebox::engine::testing::Op::Build, "daemon down");
    let err = run_build(
        &engine,
        &generated(td.path(), Duration::from_secs(5)),
        LogPolicy::Strict,
        &mut |_| {},
    )
    .expect_err("rejected");
    assert!(matches!(err, PipelineError::Engine(_)));
    assert!(err.to_string().contains("daemon down"));
    assert!(!td.path().join("Dockerfile.derived").exists());
}
