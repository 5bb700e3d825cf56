use derivebox::engine::testing::{Op, ScriptedEngine};
use derivebox::{validate, Conventions};

/// (start fails, exec fails) -> expected teardown and image removal
#[test]
fn unit_validator_cleanup_invariant_across_outcomes() {
    for (fail_start, fail_exec) in [(false, false), (true, false), (false, true), (true, true)] {
        let mut engine = ScriptedEngine::new();
        if fail_start {
            engine = engine.fail(Op::Start, "start refused");
        }
        if fail_exec {
            engine = engine.fail(Op::ExecStart, "exec refused");
        }

        let res = validate(&engine, "boxlayer.com/me/app", &Conventions::default());
        let case = format!("start_fails={fail_start} exec_fails={fail_exec}");

        assert_eq!(engine.count(Op::Stop), 1, "{case}");
        assert_eq!(engine.count(Op::Remove), 1, "{case}");
        let ops = engine.ops();
        let stop_at = ops.iter().position(|o| *o == Op::Stop).expect("stop");
        assert_eq!(ops[stop_at + 1], Op::Remove, "{case}: remove follows stop");

        let expect_failure = fail_start || fail_exec;
        assert_eq!(res.is_err(), expect_failure, "{case}");
        assert_eq!(
            engine.count(Op::RemoveImage),
            usize::from(expect_failure),
            "{case}"
        );
        if fail_start {
            assert_eq!(engine.count(Op::ExecCreate), 0, "{case}: exec skipped");
            let msg = res.expect_err("start failure").to_string();
            assert!(msg.contains("start refused"), "{case}: {msg}");
        } else if fail_exec {
            let msg = res.expect_err("exec failure").to_string();
            assert!(msg.contains("exec refused"), "{case}: {msg}");
        }
    }
}

#[test]
fn unit_validator_create_failure_touches_nothing_else() {
    let engine = ScriptedEngine::new().fail(Op::Create, "no such image");
    let err = validate(&engine, "boxlayer.com/me/app", &Conventions::default())
        .expect_err("create fails");
    assert!(err.is_validation());
    assert_eq!(engine.ops(), vec![Op::Create]);
}
