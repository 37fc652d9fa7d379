#![cfg(feature = "integration-test-api")]

mod support;

use scute_core::config::PipelineOptions;
use scute_core::cut::CutOutcome;
use scute_core::engine::SessionState;
use scute_core::error::AppError;
use scute_core::test_support::FakeMedia;
use support::ScriptedEnv;

fn three_mixed_clips() -> Vec<(&'static str, FakeMedia)> {
    vec![
        ("A.mp4", FakeMedia::new(30.0, 1920, 1080, 100, false)),
        ("B.mp4", FakeMedia::new(30.0, 1920, 1080, 50, false)),
        ("C.mp4", FakeMedia::new(60.0, 1280, 720, 50, false)),
    ]
}

#[test]
fn mixed_specs_are_normalized_before_concat() {
    let mut env = ScriptedEnv::new();
    env.load_clips(&three_mixed_clips());

    let report = env
        .pipeline
        .cut(&PipelineOptions::default(), None)
        .expect("cut");
    let frames: Vec<u64> = env
        .pipeline
        .results()
        .iter()
        .map(|r| r.frame_count())
        .collect();
    assert_eq!(frames, vec![98, 48, 48]);
    assert_eq!(report.cut_count(), 3);
    assert_eq!(env.pipeline.order().as_slice(), &[0, 1, 2]);

    let validation = env.pipeline.validate_merge();
    assert!(validation.can_merge);
    assert_eq!(
        validation.warnings,
        vec![
            "C_cut.mp4: 1280x720 (expected 1920x1080)".to_string(),
            "C_cut.mp4: 60fps (expected 30fps)".to_string(),
        ]
    );

    let before = env.engine.run_count();
    let output = env
        .pipeline
        .merge(&PipelineOptions::default(), None)
        .expect("merge");
    assert_eq!(output.plan.normalize, vec![false, false, true]);
    assert_eq!(output.plan.declared_frames, 98 + 48 + 48);
    assert!(!output.plan.with_audio);
    assert!(output.reported_frames.is_some());

    let commands = env.commands_since(before);
    assert_eq!(commands.len(), 2, "one normalization plus one concat: {:?}", commands);
    assert!(commands[0].contains("scale=1920:1080,format=yuv420p"));
    assert!(commands[0].contains("-r 30"));
    assert!(commands[0].contains("-an"));
    assert!(commands[1].contains("[0:v][1:v][2:v]concat=n=3:v=1:a=0[outv]"));

    let merged = FakeMedia::from_bytes(&output.data).expect("merged media");
    assert_eq!((merged.width, merged.height, merged.fps), (1920, 1080, 30.0));
    assert_eq!(env.pipeline.session_state(), SessionState::Loaded);
}

#[test]
fn merge_follows_the_arranged_order() {
    let mut env = ScriptedEnv::new();
    env.load_clips(&three_mixed_clips());
    env.pipeline
        .cut(&PipelineOptions::default(), None)
        .expect("cut");

    env.pipeline.move_in_order(2, 0).expect("move");
    env.pipeline.duplicate_in_order(0).expect("duplicate");
    assert_eq!(env.pipeline.order().as_slice(), &[2, 2, 0, 1]);

    let before = env.engine.run_count();
    let output = env
        .pipeline
        .merge(&PipelineOptions::default(), None)
        .expect("merge");
    // C now sets the target, so A and B get normalized instead.
    assert_eq!(output.plan.normalize, vec![false, false, true, true]);
    assert_eq!(output.plan.target.width, 1280);
    assert_eq!(output.plan.declared_frames, 48 + 48 + 98 + 48);
    assert_eq!(output.summary.clips, 4);

    let commands = env.commands_since(before);
    assert_eq!(commands.len(), 3);
    assert!(commands[2].contains("-i merge_3.mp4"));
    assert!(commands[2].contains("concat=n=4"));
}

#[test]
fn clip_with_two_frames_is_rejected_not_dropped() {
    let mut env = ScriptedEnv::new();
    env.load_clips(&[
        ("short.mp4", FakeMedia::new(30.0, 640, 360, 2, false)),
        ("ok.mp4", FakeMedia::new(30.0, 640, 360, 10, false)),
    ]);
    let before = env.engine.run_count();

    let report = env
        .pipeline
        .cut(&PipelineOptions::default(), None)
        .expect("cut");
    assert!(matches!(
        &report.outcomes[0],
        CutOutcome::Rejected { name, .. } if name == "short.mp4"
    ));
    assert!(matches!(report.outcomes[1], CutOutcome::Cut { frames: 8, .. }));
    assert!(env.pipeline.clips()[0].cut);
    assert_eq!(env.pipeline.results().len(), 1);
    assert_eq!(env.engine.run_count(), before + 1);

    // Marked cut, so a second batch does not retry it.
    let again = env
        .pipeline
        .cut(&PipelineOptions::default(), None)
        .expect("cut again");
    assert!(again.outcomes.is_empty());
}

#[test]
fn engine_failure_mid_batch_is_isolated() {
    let mut env = ScriptedEnv::new();
    env.load_clips(&[
        ("one.mp4", FakeMedia::new(30.0, 640, 360, 30, true)),
        ("two.mp4", FakeMedia::new(30.0, 640, 360, 30, true)),
        ("three.mp4", FakeMedia::new(30.0, 640, 360, 30, true)),
    ]);
    env.engine.fail_run_at(env.engine.run_count() + 2);

    let report = env
        .pipeline
        .cut(&PipelineOptions::default(), None)
        .expect("cut");
    assert!(!report.aborted);
    assert!(matches!(report.outcomes[0], CutOutcome::Cut { .. }));
    assert!(matches!(
        &report.outcomes[1],
        CutOutcome::Failed { name, .. } if name == "two.mp4"
    ));
    assert!(matches!(report.outcomes[2], CutOutcome::Cut { .. }));

    let names: Vec<&str> = env.pipeline.results().iter().map(|r| r.name()).collect();
    assert_eq!(names, vec!["one_cut.mp4", "three_cut.mp4"]);
    assert!(!env.pipeline.clips()[1].cut);
    assert_eq!(env.pipeline.session_state(), SessionState::Loaded);

    // The failed clip can be retried.
    let retry = env
        .pipeline
        .cut(&PipelineOptions::default(), None)
        .expect("retry");
    assert_eq!(retry.cut_count(), 1);
    assert_eq!(env.pipeline.order().as_slice(), &[0, 1, 2]);
}

#[test]
fn failed_recovery_aborts_the_batch_until_restart() {
    let mut env = ScriptedEnv::new();
    env.load_clips(&[
        ("one.mp4", FakeMedia::new(30.0, 640, 360, 30, false)),
        ("two.mp4", FakeMedia::new(30.0, 640, 360, 30, false)),
        ("three.mp4", FakeMedia::new(30.0, 640, 360, 30, false)),
    ]);
    env.engine.fail_run_at(env.engine.run_count() + 2);
    env.engine.fail_loads_from(env.engine.load_count() + 2);

    let report = env
        .pipeline
        .cut(&PipelineOptions::default(), None)
        .expect("cut");
    assert!(report.aborted);
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(env.pipeline.session_state(), SessionState::Faulted);
    assert!(matches!(
        env.pipeline.cut(&PipelineOptions::default(), None),
        Err(AppError::SessionFaulted)
    ));

    env.engine.allow_loads();
    env.pipeline.restart_session().expect("restart");
    let resumed = env
        .pipeline
        .cut(&PipelineOptions::default(), None)
        .expect("resume");
    assert_eq!(resumed.cut_count(), 2);
    assert!(env.pipeline.clips().iter().all(|c| c.cut));
}

#[test]
fn memory_risk_clip_is_skipped_and_retried_later() {
    let options = PipelineOptions {
        memory_ceiling_bytes: Some(1024 * 1024),
        ..Default::default()
    };
    let mut env = ScriptedEnv::with_options(options.clone());
    env.load_clips(&[("big.mp4", FakeMedia::new(30.0, 1920, 1080, 30, false))]);

    let report = env.pipeline.cut(&options, None).expect("cut");
    assert!(matches!(report.outcomes[0], CutOutcome::Skipped { .. }));
    assert!(!env.pipeline.clips()[0].cut);
    assert!(env.pipeline.clip_views()[0].memory_risk);

    let report = env
        .pipeline
        .cut(&PipelineOptions::default(), None)
        .expect("cut with default ceiling");
    assert_eq!(report.cut_count(), 1);
}

#[test]
fn merge_failure_aborts_with_log_tail() {
    let mut env = ScriptedEnv::new();
    env.load_clips(&[
        ("a.mp4", FakeMedia::new(30.0, 640, 360, 30, true)),
        ("b.mp4", FakeMedia::new(30.0, 640, 360, 30, true)),
    ]);
    env.pipeline
        .cut(&PipelineOptions::default(), None)
        .expect("cut");
    env.engine.fail_next_run();

    let err = env
        .pipeline
        .merge(&PipelineOptions::default(), None)
        .expect_err("merge should fail");
    match err {
        AppError::FfmpegFailed { stderr, .. } => assert!(stderr.contains("Conversion failed!")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(env.pipeline.session_state(), SessionState::Loaded);
    assert!(!env.pipeline.is_processing());
}

#[test]
fn merge_needs_two_entries() {
    let mut env = ScriptedEnv::new();
    env.load_clips(&[("a.mp4", FakeMedia::new(30.0, 640, 360, 30, false))]);
    env.pipeline
        .cut(&PipelineOptions::default(), None)
        .expect("cut");
    assert!(!env.pipeline.validate_merge().can_merge);
    assert!(matches!(
        env.pipeline.merge(&PipelineOptions::default(), None),
        Err(AppError::InvalidInput(_))
    ));
}

#[test]
fn audio_survives_only_when_every_entry_has_it() {
    let mut env = ScriptedEnv::new();
    env.load_clips(&[
        ("loud.mp4", FakeMedia::new(30.0, 640, 360, 30, true)),
        ("quiet.mp4", FakeMedia::new(30.0, 640, 360, 30, false)),
    ]);
    env.pipeline
        .cut(&PipelineOptions::default(), None)
        .expect("cut");
    let audio: Vec<bool> = env.pipeline.results().iter().map(|r| r.has_audio()).collect();
    assert_eq!(audio, vec![true, false]);

    let before = env.engine.run_count();
    let output = env
        .pipeline
        .merge(&PipelineOptions::default(), None)
        .expect("merge");
    assert!(!output.plan.with_audio);
    let commands = env.commands_since(before);
    assert!(commands[0].contains("concat=n=2:v=1:a=0[outv]"));
    assert!(!commands[0].contains("[outa]"));
}
