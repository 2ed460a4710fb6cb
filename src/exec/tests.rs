//! Unit tests for the execution seam.

use super::*;
use crate::test_support::ScriptedRunner;
use rstest::rstest;
use std::time::Duration;

#[rstest]
fn process_runner_captures_output() {
    let runner = ProcessCommandRunner;
    let output = runner
        .run(
            "sh",
            &[
                OsString::from("-c"),
                OsString::from("printf out && printf err 1>&2"),
            ],
        )
        .expect("command should execute");

    assert_eq!(output.code, Some(0));
    assert_eq!(output.stdout, "out");
    assert_eq!(output.stderr, "err");
}

#[rstest]
fn process_runner_propagates_exit_codes() {
    let runner = ProcessCommandRunner;
    let output = runner
        .run("sh", &[OsString::from("-c"), OsString::from("exit 7")])
        .expect("command should execute");

    assert_eq!(output.code, Some(7));
}

#[rstest]
fn process_runner_reports_spawn_failure() {
    let runner = ProcessCommandRunner;
    let result = runner.run("definitely-not-a-real-binary-xyz", &[]);

    assert!(matches!(result, Err(ExecError::Spawn { .. })));
}

#[rstest]
fn streaming_forwards_both_streams() {
    let runner = ProcessCommandRunner;
    let mut out = Vec::new();
    let mut err = Vec::new();
    let code = runner
        .run_streaming(
            "sh",
            &[
                OsString::from("-c"),
                OsString::from("printf 'a\\nb\\n'; printf 'warn\\n' 1>&2"),
            ],
            None,
            &mut out,
            &mut err,
        )
        .expect("command should execute");

    assert_eq!(code, Some(0));
    assert_eq!(String::from_utf8_lossy(&out), "a\nb\n");
    assert_eq!(String::from_utf8_lossy(&err), "warn\n");
}

#[rstest]
fn streaming_honours_working_directory() {
    let tmp = tempfile::TempDir::new().expect("temp dir");
    let runner = ProcessCommandRunner;
    let mut out = Vec::new();
    let mut err = Vec::new();
    let dir = camino::Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 path");
    let code = runner
        .run_streaming(
            "sh",
            &[OsString::from("-c"), OsString::from("pwd")],
            Some(dir.as_path()),
            &mut out,
            &mut err,
        )
        .expect("command should execute");

    assert_eq!(code, Some(0));
    let printed = String::from_utf8_lossy(&out);
    let canonical = dir
        .as_std_path()
        .canonicalize()
        .expect("canonicalize temp dir");
    assert_eq!(printed.trim(), canonical.to_string_lossy());
}

#[rstest]
fn default_streaming_replays_scripted_output() {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(3), "hello\n", "oops\n");
    let mut out = Vec::new();
    let mut err = Vec::new();
    let code = runner
        .run_streaming("fake", &[], None, &mut out, &mut err)
        .expect("scripted response should replay");

    assert_eq!(code, Some(3));
    assert_eq!(String::from_utf8_lossy(&out), "hello\n");
    assert_eq!(String::from_utf8_lossy(&err), "oops\n");
}

#[rstest]
fn ssh_client_builds_batch_mode_invocation() {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let client = SshClient::new(
        "devbox",
        SshOptions {
            connect_timeout: Some(Duration::from_secs(5)),
            config_file: None,
        },
        runner.clone(),
    );

    client.exec("echo ok").expect("scripted exec");

    let calls = runner.calls();
    let (program, args) = calls.first().expect("one invocation");
    assert_eq!(program, "ssh");
    let args_strs: Vec<String> = args
        .iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
    assert!(args_strs.contains(&String::from("BatchMode=yes")));
    assert!(args_strs.contains(&String::from("ConnectTimeout=5")));
    assert_eq!(args_strs.last().map(String::as_str), Some("echo ok"));
    assert!(args_strs.contains(&String::from("devbox")));
}

#[rstest]
fn ssh_client_passes_config_file() {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let client = SshClient::new(
        "devbox",
        SshOptions {
            connect_timeout: None,
            config_file: Some(camino::Utf8PathBuf::from("/tmp/ssh_config")),
        },
        runner.clone(),
    );

    client.exec("true").expect("scripted exec");

    let calls = runner.calls();
    let (_, args) = calls.first().expect("one invocation");
    let args_strs: Vec<String> = args
        .iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
    assert!(args_strs.contains(&String::from("-F")));
    assert!(args_strs.contains(&String::from("/tmp/ssh_config")));
}

#[rstest]
fn ssh_client_is_alive_checks_exit_code() {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let alive_client = SshClient::new("devbox", SshOptions::default(), runner.clone());
    assert!(alive_client.is_alive());

    runner.push_exit_code(255);
    assert!(!alive_client.is_alive());
}
