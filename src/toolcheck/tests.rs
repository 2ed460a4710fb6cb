//! Unit tests for missing-tool detection, probing, and suggestions,
//! including the literal command-not-found and make-indirect scenarios.

use super::*;
use crate::exec::{SshClient, SshOptions};
use crate::test_support::ScriptedRunner;
use rstest::rstest;

#[rstest]
#[case("bash: go: command not found", "go")]
#[case("bash: line 1: terraform: command not found", "terraform")]
#[case("zsh: command not found: kubectl", "kubectl")]
#[case("sh: 1: node: not found", "node")]
#[case("dash: 3: bun: not found", "bun")]
fn exit_127_shapes_extract_the_tool(#[case] stderr: &str, #[case] expected: &str) {
    assert_eq!(
        detect_missing_tool("irrelevant", stderr, 127).as_deref(),
        Some(expected)
    );
}

#[rstest]
fn exit_127_without_a_match_falls_back_to_first_token() {
    assert_eq!(
        detect_missing_tool("go test ./...", "garbled stderr", 127).as_deref(),
        Some("go")
    );
}

#[rstest]
fn exit_127_with_empty_command_uses_placeholder() {
    assert_eq!(
        detect_missing_tool("", "garbled", 127).as_deref(),
        Some("command")
    );
}

#[rstest]
#[case("make: go: No such file or directory\nmake: *** [test] Error 1", "go")]
#[case("make[2]: protoc: No such file or directory", "protoc")]
#[case("env: node: No such file or directory", "node")]
#[case("env: 'python3': No such file or directory", "python3")]
#[case("/bin/sh: 1: cargo: not found", "cargo")]
#[case("'tsc' is not recognized as an internal or external command", "tsc")]
fn indirect_shapes_extract_the_tool(#[case] stderr: &str, #[case] expected: &str) {
    assert_eq!(
        detect_missing_tool("make test", stderr, 2).as_deref(),
        Some(expected)
    );
}

#[rstest]
#[case("make: *** [Makefile:12: test] Error 2", 2)]
#[case("compilation failed: expected `;`", 1)]
#[case("assertion failed", 101)]
fn non_127_failures_without_patterns_are_not_missing_tools(
    #[case] stderr: &str,
    #[case] exit_code: i32,
) {
    assert_eq!(detect_missing_tool("make test", stderr, exit_code), None);
}

#[rstest]
#[case("/home/u/go/bin", "$HOME/go/bin")]
#[case("/Users/dev/.cargo/bin", "$HOME/.cargo/bin")]
#[case("/root/.local/bin", "$HOME/.local/bin")]
#[case("/root", "$HOME")]
#[case("/opt/homebrew/bin", "/opt/homebrew/bin")]
fn home_prefixes_are_rewritten(#[case] input: &str, #[case] expected: &str) {
    assert_eq!(rewrite_home(input), expected);
}

#[rstest]
fn interactive_only_tool_yields_setup_commands_suggestion() {
    // Command-not-found with the tool present only in interactive shells.
    let probe_result = PathProbeResult {
        command: String::from("go"),
        found_in_login: false,
        found_in_inter: true,
        login_path: None,
        inter_path: Some(String::from("/home/u/go/bin/go")),
        common_paths: Vec::new(),
    };

    let suggestion = build_suggestion("go", "devbox", Some(&probe_result));

    assert!(
        suggestion.contains("'go' is available in interactive shells"),
        "suggestion: {suggestion}"
    );
    assert!(suggestion.contains("setup_commands:"), "suggestion: {suggestion}");
    assert!(
        suggestion.contains("export PATH=$HOME/go/bin:$PATH"),
        "suggestion: {suggestion}"
    );
}

#[rstest]
fn common_path_hit_yields_setup_commands_suggestion() {
    let probe_result = PathProbeResult {
        command: String::from("cargo"),
        found_in_login: false,
        found_in_inter: false,
        login_path: None,
        inter_path: None,
        common_paths: vec![String::from("/home/u/.cargo/bin/cargo")],
    };

    let suggestion = build_suggestion("cargo", "devbox", Some(&probe_result));

    assert!(suggestion.contains("$HOME/.cargo/bin/cargo"), "suggestion: {suggestion}");
    assert!(
        suggestion.contains("export PATH=$HOME/.cargo/bin:$PATH"),
        "suggestion: {suggestion}"
    );
}

#[rstest]
fn unlocated_tool_yields_three_part_remedy() {
    let probe_result = PathProbeResult {
        command: String::from("go"),
        ..PathProbeResult::default()
    };

    let suggestion = build_suggestion("go", "devbox", Some(&probe_result));

    assert!(suggestion.contains("1. Install"), "suggestion: {suggestion}");
    assert!(suggestion.contains("2. Locate"), "suggestion: {suggestion}");
    assert!(suggestion.contains("3. Configure PATH"), "suggestion: {suggestion}");
}

#[rstest]
fn make_indirect_failure_produces_installable_diagnostic() {
    let diagnostic = diagnose::<ScriptedRunner>(
        None,
        "devbox",
        "make test",
        "make: go: No such file or directory\nmake: *** [test] Error 1",
        2,
    )
    .expect("missing go should be diagnosed");

    assert_eq!(diagnostic.tool, "go");
    assert!(diagnostic.can_install);
    assert!(
        diagnostic.suggestion.to_lowercase().contains("install"),
        "suggestion: {}",
        diagnostic.suggestion
    );
}

#[rstest]
fn plain_failures_produce_no_diagnostic() {
    assert!(
        diagnose::<ScriptedRunner>(None, "devbox", "cargo test", "assertion failed", 101).is_none()
    );
}

#[rstest]
fn probe_runs_three_stages_with_exact_commands() {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(0), "", ""); // login: not found
    runner.push_output(Some(0), "/home/u/go/bin/go\n", ""); // interactive
    runner.push_output(Some(0), "", ""); // common dirs: nothing
    let client = SshClient::new("devbox", SshOptions::default(), runner.clone());

    let result = probe_path(&client, "go").expect("probe should run");

    assert!(!result.found_in_login);
    assert!(result.found_in_inter);
    assert_eq!(result.inter_path.as_deref(), Some("/home/u/go/bin/go"));

    let login_args = runner.call_args(0);
    assert_eq!(
        login_args.last().map(String::as_str),
        Some("$SHELL -l -c \"command -v go 2>/dev/null\"")
    );
    let inter_args = runner.call_args(1);
    assert_eq!(
        inter_args.last().map(String::as_str),
        Some("$SHELL -i -c \"command -v go 2>/dev/null\" 2>/dev/null")
    );
    let scan_args = runner.call_args(2);
    let scan = scan_args.last().expect("scan command");
    assert!(scan.contains("test -x $HOME/go/bin/go && echo $HOME/go/bin/go"));
    assert!(scan.contains("$HOME/.cargo/bin"));
    assert!(scan.ends_with("; true"));
}

#[rstest]
fn probe_collects_common_path_hits() {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(0), "", "");
    runner.push_output(Some(0), "", "");
    runner.push_output(Some(0), "/usr/local/go/bin/go\n", "");
    let client = SshClient::new("devbox", SshOptions::default(), runner.clone());

    let result = probe_path(&client, "go").expect("probe should run");
    assert_eq!(result.common_paths, vec!["/usr/local/go/bin/go"]);
}

#[rstest]
fn full_diagnosis_uses_probe_results() {
    // Exit 127 with interactive-only hit, end to end through diagnose.
    let runner = ScriptedRunner::new();
    runner.push_output(Some(0), "", "");
    runner.push_output(Some(0), "/home/u/go/bin/go\n", "");
    runner.push_output(Some(0), "", "");
    let client = SshClient::new("devbox", SshOptions::default(), runner.clone());

    let diagnostic = diagnose(
        Some(&client),
        "devbox",
        "go test ./...",
        "bash: go: command not found",
        127,
    )
    .expect("missing go should be diagnosed");

    assert_eq!(diagnostic.tool, "go");
    assert!(diagnostic.can_install);
    assert!(
        diagnostic
            .suggestion
            .contains("'go' is available in interactive shells"),
        "suggestion: {}",
        diagnostic.suggestion
    );
    assert!(
        diagnostic.suggestion.contains("export PATH=$HOME/go/bin:$PATH"),
        "suggestion: {}",
        diagnostic.suggestion
    );
}

#[rstest]
#[case("brew install jq", "Homebrew package 'jq'")]
#[case("sudo apt-get install -y ripgrep", "APT package 'ripgrep'")]
fn install_commands_are_described_by_idiom(#[case] command: &str, #[case] expected: &str) {
    assert_eq!(describe_install_command(command), expected);
}

#[rstest]
fn rustup_and_vendor_scripts_are_recognised() {
    assert_eq!(
        describe_install_command(
            "curl --proto '=https' --tlsv1.2 -sSf https://sh.rustup.rs | sh -s -- -y"
        ),
        "the rustup installer"
    );
    assert_eq!(
        describe_install_command("curl -fsSL https://bun.sh/install | bash"),
        "the vendor install script"
    );
}

#[rstest]
fn catalog_membership_drives_can_install() {
    assert!(can_install("go"));
    assert!(can_install("cargo"));
    assert!(!can_install("definitely-bespoke-internal-tool"));
}

#[rstest]
fn catalog_entries_carry_path_additions() {
    let entry = installer("go").expect("go is in the catalog");
    assert!(entry.path_additions.contains(&"$HOME/go/bin"));
}
