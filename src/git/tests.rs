//! Unit tests for working-tree introspection.

use super::*;
use crate::test_support::ScriptedRunner;
use rstest::rstest;

fn tree(runner: &ScriptedRunner) -> WorkingTree<ScriptedRunner> {
    WorkingTree::new(Utf8PathBuf::from("/work/project"), runner.clone())
}

#[rstest]
fn current_branch_trims_output() {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(0), "feat-auth\n", "");
    let branch = tree(&runner).current_branch().expect("branch");
    assert_eq!(branch, "feat-auth");

    let args = runner.call_args(0);
    assert_eq!(
        args,
        vec!["-C", "/work/project", "rev-parse", "--abbrev-ref", "HEAD"]
    );
}

#[rstest]
fn snapshot_merges_and_sorts_changed_files() {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(0), "main\n", "");
    runner.push_output(Some(0), "src/lib.rs\nsrc/api.rs\n", "");
    runner.push_output(Some(0), "notes.md\nsrc/lib.rs\n", "");

    let snapshot = tree(&runner).snapshot("origin/main").expect("snapshot");

    assert_eq!(snapshot.branch, "main");
    assert_eq!(
        snapshot.changed_files,
        vec!["notes.md", "src/api.rs", "src/lib.rs"]
    );
}

#[rstest]
fn snapshot_reports_clean_tree_as_empty() {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(0), "main\n", "");
    runner.push_output(Some(0), "", "");
    runner.push_output(Some(0), "", "");

    let snapshot = tree(&runner).snapshot("main").expect("snapshot");
    assert!(snapshot.changed_files.is_empty());
}

#[rstest]
fn snapshot_surfaces_git_failures() {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(128), "", "fatal: not a git repository\n");

    let err = tree(&runner)
        .snapshot("main")
        .expect_err("outside a repo should fail");
    let GitError::Command {
        ref command,
        ref stderr,
        ..
    } = err
    else {
        panic!("expected Command error, got {err:?}");
    };
    assert!(command.contains("rev-parse"));
    assert!(stderr.contains("not a git repository"));
}
