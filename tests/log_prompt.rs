mod common;

use std::fs;

use common::{HookEnv, write_transcript};

#[test]
fn first_prompt_creates_a_session_note() {
    let env = HookEnv::new();
    let transcript = write_transcript(env.work.path());
    let input = env.payload(
        "UserPromptSubmit",
        &transcript,
        r#", "prompt": "Add a README""#,
    );

    let (code, stdout, stderr) = env.run(&["log"], &input);
    assert_eq!(code, 0);
    assert!(stdout.is_empty(), "expected no stdout, got: {stdout}");
    assert!(stderr.is_empty(), "expected no stderr, got: {stderr}");

    let notes = env.notes();
    assert_eq!(notes.len(), 1);
    let name = notes[0].file_name().unwrap().to_str().unwrap().to_string();
    assert!(name.ends_with("_add-a-readme.md"), "{name}");

    let content = fs::read_to_string(&notes[0]).unwrap();
    assert!(content.starts_with("---\ndate: "));
    assert!(content.contains("session_id: s1\nproject: demo-app\n"));
    assert!(content.contains("# Claude Session - demo-app\n"));
    assert!(content.contains("> [!user]+ #1 - You ("));
    assert!(content.contains("> Add a README\n"));

    let state = fs::read_to_string(env.state.path().join("claude_session_s1.txt")).unwrap();
    let mut lines = state.lines();
    assert_eq!(lines.next(), notes[0].to_str());
    assert_eq!(lines.next(), Some("1"));
}

#[test]
fn later_prompts_are_numbered() {
    let env = HookEnv::new();
    let transcript = write_transcript(env.work.path());
    for prompt in ["first", "second", "third"] {
        let input = env.payload(
            "UserPromptSubmit",
            &transcript,
            &format!(r#", "prompt": "{prompt}""#),
        );
        assert_eq!(env.run(&["log"], &input).0, 0);
    }

    let notes = env.notes();
    assert_eq!(notes.len(), 1);
    let content = fs::read_to_string(&notes[0]).unwrap();
    assert!(content.contains("#1 - You"));
    assert!(content.contains("#3 - You"));
    assert!(content.find("> first\n").unwrap() < content.find("> third\n").unwrap());
}

#[test]
fn empty_prompt_writes_nothing() {
    let env = HookEnv::new();
    let transcript = write_transcript(env.work.path());
    let input = env.payload(
        "UserPromptSubmit",
        &transcript,
        r#", "prompt": "<system-reminder>noise</system-reminder>""#,
    );
    assert_eq!(env.run(&["log"], &input).0, 0);
    assert!(env.notes().is_empty());
    assert!(!env.state.path().join("claude_session_s1.txt").exists());
}
