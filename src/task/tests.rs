//! Unit tests for the task executor, including the literal end-to-end
//! scenarios for single, stop-on-fail, and continue-then-stop tasks.

use super::*;
use crate::exec::{ProcessCommandRunner, SshClient, SshOptions};
use crate::host::{Connection, Host};
use crate::output::{OutputPipeline, PassthroughFormatter};
use crate::test_support::ScriptedRunner;
use rstest::rstest;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Clone, Debug, Default)]
struct SharedSink {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedSink {
    fn contents(&self) -> String {
        let bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for SharedSink {
    fn write(&mut self, chunk: &[u8]) -> std::io::Result<usize> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(chunk);
        Ok(chunk.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn pipeline() -> (OutputPipeline, SharedSink) {
    let sink = SharedSink::default();
    let output = OutputPipeline::new(Box::new(PassthroughFormatter), Box::new(sink.clone()));
    (output, sink)
}

fn test_host() -> Host {
    Host {
        name: String::from("devbox"),
        aliases: vec![String::from("devbox")],
        dir: String::from("~/rr/${PROJECT}-${BRANCH}"),
        shell: None,
        setup_commands: Vec::new(),
        tags: Vec::new(),
    }
}

fn local_executor(connection: &Connection<ProcessCommandRunner>) -> Executor<'_, ProcessCommandRunner> {
    Executor::new(connection, ProcessCommandRunner, "proj", "main")
}

fn step(name: Option<&str>, run: &str, on_fail: OnFail) -> Step {
    Step {
        name: name.map(ToOwned::to_owned),
        run: run.to_owned(),
        on_fail,
    }
}

#[derive(Debug, Default)]
struct RecordingStepObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingStepObserver {
    fn events(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl StepObserver for RecordingStepObserver {
    fn on_step_start(&self, index: usize, total: usize, step: &Step) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!("start {index}/{total} {}", step.display_name(index)));
    }

    fn on_step_complete(
        &self,
        index: usize,
        _total: usize,
        step: &Step,
        _duration: Duration,
        exit_code: i32,
    ) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!(
                "complete {index} {} => {exit_code}",
                step.display_name(index)
            ));
    }
}

#[rstest]
fn simple_echo_on_local_connection() {
    let connection = Connection::local(test_host());
    let (output, sink) = pipeline();

    let result = local_executor(&connection)
        .execute(&Task::Single(String::from("echo hello")), &[], &output)
        .expect("echo should run");

    assert_eq!(result.exit_code, 0);
    assert_eq!(result.failed_step, -1);
    assert!(result.step_results.is_empty());
    assert!(sink.contents().contains("hello\n"));
}

#[rstest]
fn stop_on_fail_chain_skips_later_steps() {
    let connection = Connection::local(test_host());
    let (output, sink) = pipeline();
    let steps = vec![
        step(Some("a"), "echo a", OnFail::Stop),
        step(Some("b"), "exit 1", OnFail::Stop),
        step(Some("c"), "echo c", OnFail::Stop),
    ];

    let result = local_executor(&connection)
        .execute(&Task::Steps(steps), &[], &output)
        .expect("task should run");

    assert_eq!(result.exit_code, 1);
    assert_eq!(result.failed_step, 1);
    assert_eq!(result.step_results.len(), 2);
    assert!(!sink.contents().contains('c'), "step c must not run");
}

#[rstest]
fn continue_then_stop_tracks_first_failure() {
    let connection = Connection::local(test_host());
    let (output, sink) = pipeline();
    let steps = vec![
        step(Some("a"), "exit 1", OnFail::Continue),
        step(Some("b"), "echo b", OnFail::Stop),
        step(Some("c"), "exit 2", OnFail::Stop),
        step(Some("d"), "echo d", OnFail::Stop),
    ];

    let result = local_executor(&connection)
        .execute(&Task::Steps(steps), &[], &output)
        .expect("task should run");

    assert_eq!(result.exit_code, 2, "latest non-zero exit wins");
    assert_eq!(result.failed_step, 0, "first failure is remembered");
    assert_eq!(result.step_results.len(), 3);
    let printed = sink.contents();
    assert!(printed.contains("b\n"), "step b runs under continue");
    assert!(!printed.contains("d\n"), "step d must not run");
}

#[rstest]
fn extra_args_append_to_single_commands() {
    let connection = Connection::local(test_host());
    let (output, sink) = pipeline();

    let result = local_executor(&connection)
        .execute(
            &Task::Single(String::from("echo")),
            &[String::from("one"), String::from("two")],
            &output,
        )
        .expect("echo should run");

    assert_eq!(result.exit_code, 0);
    assert!(sink.contents().contains("one two"));
}

#[rstest]
fn extra_args_are_rejected_for_step_tasks() {
    let connection = Connection::local(test_host());
    let (output, _sink) = pipeline();
    let steps = vec![step(None, "echo", OnFail::Stop)];

    let err = local_executor(&connection)
        .execute(&Task::Steps(steps), &[String::from("x")], &output)
        .expect_err("extra args should be rejected");

    assert!(matches!(err, TaskError::ExtraArgsUnsupported));
}

#[rstest]
fn unnamed_steps_get_one_indexed_default_names() {
    let connection = Connection::local(test_host());
    let (output, _sink) = pipeline();
    let steps = vec![
        step(None, "true", OnFail::Stop),
        step(None, "true", OnFail::Stop),
    ];

    let result = local_executor(&connection)
        .execute(&Task::Steps(steps), &[], &output)
        .expect("task should run");

    let names: Vec<&str> = result
        .step_results
        .iter()
        .map(|step_result| step_result.name.as_str())
        .collect();
    assert_eq!(names, vec!["step 1", "step 2"]);
}

#[rstest]
fn observer_sees_start_and_complete_in_order() {
    let connection = Connection::local(test_host());
    let (output, _sink) = pipeline();
    let observer = RecordingStepObserver::default();
    let steps = vec![
        step(Some("a"), "true", OnFail::Stop),
        step(Some("b"), "exit 3", OnFail::Stop),
    ];

    let executor = local_executor(&connection).with_observer(&observer);
    let result = executor
        .execute(&Task::Steps(steps), &[], &output)
        .expect("task should run");

    assert_eq!(result.exit_code, 3);
    assert_eq!(
        observer.events(),
        vec![
            "start 0/2 a",
            "complete 0 a => 0",
            "start 1/2 b",
            "complete 1 b => 3",
        ]
    );
}

#[rstest]
fn local_execution_uses_the_configured_working_directory() {
    let tmp = tempfile::TempDir::new().expect("temp dir");
    let dir = camino::Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 path");
    let connection = Connection::local(test_host());
    let (output, sink) = pipeline();

    let executor = local_executor(&connection).with_local_dir(dir.clone());
    executor
        .execute(&Task::Single(String::from("pwd")), &[], &output)
        .expect("pwd should run");

    let canonical = dir
        .as_std_path()
        .canonicalize()
        .expect("canonicalize temp dir");
    assert!(sink.contents().contains(&canonical.to_string_lossy().into_owned()));
}

#[rstest]
fn remote_execution_sends_the_assembled_command() {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(0), "ok\n", "");
    let client = SshClient::new("devbox", SshOptions::default(), runner.clone());
    let connection = Connection::remote(test_host(), "devbox", client, Duration::ZERO);
    let (output, _sink) = pipeline();

    let executor = Executor::new(&connection, runner.clone(), "proj", "main");
    let result = executor
        .execute(&Task::Single(String::from("cargo test")), &[], &output)
        .expect("remote run should succeed");
    assert_eq!(result.exit_code, 0);

    let args = runner.call_args(0);
    let remote_command = args.last().expect("remote command argument");
    assert!(
        remote_command.starts_with("${SHELL:-/bin/bash} -c \""),
        "command: {remote_command}"
    );
    assert!(remote_command.contains(".bashrc"));
    assert!(remote_command.contains("cd ~/rr/proj-main"));
    assert!(remote_command.contains("cargo test"));
}

#[rstest]
fn remote_env_is_exported_before_the_command() {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let client = SshClient::new("devbox", SshOptions::default(), runner.clone());
    let connection = Connection::remote(test_host(), "devbox", client, Duration::ZERO);
    let (output, _sink) = pipeline();

    let mut env = std::collections::BTreeMap::new();
    env.insert(String::from("RUST_LOG"), String::from("debug"));
    let executor = Executor::new(&connection, runner.clone(), "proj", "main").with_env(env);
    executor
        .execute(&Task::Single(String::from("cargo test")), &[], &output)
        .expect("remote run should succeed");

    let args = runner.call_args(0);
    let remote_command = args.last().expect("remote command argument");
    let export_pos = remote_command
        .find("export RUST_LOG=")
        .expect("export present");
    let command_pos = remote_command.find("cargo test").expect("command present");
    assert!(export_pos < command_pos);
}

#[rstest]
fn missing_exit_code_is_surfaced() {
    let runner = ScriptedRunner::new();
    runner.push_missing_exit_code();
    let client = SshClient::new("devbox", SshOptions::default(), runner.clone());
    let connection = Connection::remote(test_host(), "devbox", client, Duration::ZERO);
    let (output, _sink) = pipeline();

    let executor = Executor::new(&connection, runner, "proj", "main");
    let err = executor
        .execute(&Task::Single(String::from("cargo test")), &[], &output)
        .expect_err("missing exit code should error");

    assert!(matches!(err, TaskError::MissingExitCode { .. }));
}
