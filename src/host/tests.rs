//! Unit tests for host selection, probing, and connection caching.

use super::*;
use crate::config::SshSettings;
use crate::test_support::ScriptedRunner;
use rstest::{fixture, rstest};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
struct RecordingObserver {
    events: Mutex<Vec<ConnectionEvent>>,
}

impl RecordingObserver {
    fn events(&self) -> Vec<ConnectionEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ConnectionObserver for RecordingObserver {
    fn on_event(&self, event: &ConnectionEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

fn host(name: &str, aliases: &[&str], tags: &[&str]) -> Host {
    Host {
        name: name.to_owned(),
        aliases: aliases.iter().map(|&a| a.to_owned()).collect(),
        dir: String::from("~/rr/${PROJECT}-${BRANCH}"),
        shell: None,
        setup_commands: Vec::new(),
        tags: tags.iter().map(|&t| t.to_owned()).collect(),
    }
}

fn pool(hosts: Vec<Host>) -> BTreeMap<String, Host> {
    hosts
        .into_iter()
        .map(|entry| (entry.name.clone(), entry))
        .collect()
}

#[fixture]
fn settings() -> SshSettings {
    SshSettings {
        connect_timeout_secs: 5,
        config_file: None,
        local_fallback: false,
    }
}

fn selector_with(
    hosts: Vec<Host>,
    settings: SshSettings,
    runner: &ScriptedRunner,
) -> (Selector<ScriptedRunner>, std::sync::Arc<RecordingObserver>) {
    let observer = std::sync::Arc::new(RecordingObserver::default());
    let selector =
        Selector::new(pool(hosts), settings, runner.clone()).with_observer(observer.clone());
    (selector, observer)
}

#[rstest]
fn select_connects_via_first_alias(settings: SshSettings) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let (selector, observer) = selector_with(
        vec![host("devbox", &["devbox", "devbox-vpn"], &[])],
        settings,
        &runner,
    );

    let connection = selector.select(None).expect("first alias should connect");

    assert_eq!(connection.name(), "devbox");
    assert_eq!(connection.alias(), "devbox");
    assert!(!connection.is_local());

    let events = observer.events();
    assert!(matches!(
        events.first(),
        Some(ConnectionEvent::Trying { alias }) if alias == "devbox"
    ));
    assert!(matches!(
        events.get(1),
        Some(ConnectionEvent::Connected { fallback: false, .. })
    ));
}

#[rstest]
fn select_falls_back_to_next_alias(settings: SshSettings) {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(255), "", "ssh: connect to host devbox: Connection refused\n");
    runner.push_success();
    let (selector, observer) = selector_with(
        vec![host("devbox", &["devbox", "devbox-vpn"], &[])],
        settings,
        &runner,
    );

    let connection = selector.select(None).expect("second alias should connect");

    assert_eq!(connection.alias(), "devbox-vpn");
    let events = observer.events();
    assert!(matches!(
        events.get(1),
        Some(ConnectionEvent::Failed { reason: ProbeReason::Refused, .. })
    ));
    assert!(matches!(
        events.get(3),
        Some(ConnectionEvent::Connected { fallback: true, .. })
    ));
}

#[rstest]
fn select_reuses_cached_connection(settings: SshSettings) {
    let runner = ScriptedRunner::new();
    runner.push_success(); // probe
    runner.push_success(); // health check on reuse
    let (selector, observer) = selector_with(vec![host("devbox", &["devbox"], &[])], settings, &runner);

    let first = selector.select(None).expect("probe should succeed");
    let second = selector.select(None).expect("cache should be reused");

    assert!(first.shares_client_with(&second));
    assert!(
        observer
            .events()
            .iter()
            .any(|event| matches!(event, ConnectionEvent::CacheHit { host } if host == "devbox"))
    );
}

#[rstest]
fn select_replaces_dead_cached_connection(settings: SshSettings) {
    let runner = ScriptedRunner::new();
    runner.push_success(); // probe
    runner.push_exit_code(255); // health check fails
    runner.push_success(); // control master teardown
    runner.push_success(); // fresh probe
    let (selector, _observer) = selector_with(vec![host("devbox", &["devbox"], &[])], settings, &runner);

    let first = selector.select(None).expect("probe should succeed");
    let second = selector.select(None).expect("reconnect should succeed");

    assert!(!first.shares_client_with(&second));
}

#[rstest]
fn select_with_preferred_name_returns_that_host(settings: SshSettings) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let (selector, _observer) = selector_with(
        vec![host("alpha", &["alpha"], &[]), host("bravo", &["bravo"], &[])],
        settings,
        &runner,
    );

    let connection = selector
        .select(Some("bravo"))
        .expect("named host should connect");
    assert_eq!(connection.name(), "bravo");
}

#[rstest]
fn select_unknown_host_lists_known_names(settings: SshSettings) {
    let runner = ScriptedRunner::new();
    let (selector, _observer) = selector_with(
        vec![host("alpha", &["alpha"], &[]), host("bravo", &["bravo"], &[])],
        settings,
        &runner,
    );

    let err = selector
        .select(Some("charlie"))
        .expect_err("unknown host should fail");
    let SelectError::UnknownHost { ref known, .. } = err else {
        panic!("expected UnknownHost, got {err:?}");
    };
    assert_eq!(known, "alpha, bravo");
}

#[rstest]
fn select_without_preference_is_alphabetical(settings: SshSettings) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let (selector, _observer) = selector_with(
        vec![host("zulu", &["zulu"], &[]), host("alpha", &["alpha"], &[])],
        settings,
        &runner,
    );

    let connection = selector.select(None).expect("first host should connect");
    assert_eq!(connection.name(), "alpha");
}

#[rstest]
fn select_by_tag_filters_hosts(settings: SshSettings) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let (selector, _observer) = selector_with(
        vec![
            host("alpha", &["alpha"], &[]),
            host("bravo", &["bravo"], &["gpu"]),
        ],
        settings,
        &runner,
    );

    let connection = selector.select_by_tag("gpu").expect("tagged host connects");
    assert_eq!(connection.name(), "bravo");
}

#[rstest]
fn select_by_tag_unknown_tag_lists_known(settings: SshSettings) {
    let runner = ScriptedRunner::new();
    let (selector, _observer) = selector_with(
        vec![
            host("alpha", &["alpha"], &["cpu"]),
            host("bravo", &["bravo"], &["gpu"]),
        ],
        settings,
        &runner,
    );

    let err = selector
        .select_by_tag("tpu")
        .expect_err("unknown tag should fail");
    let SelectError::UnknownTag { ref known, .. } = err else {
        panic!("expected UnknownTag, got {err:?}");
    };
    assert_eq!(known, "cpu, gpu");
}

#[rstest]
fn select_next_skips_listed_hosts(settings: SshSettings) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let (selector, _observer) = selector_with(
        vec![host("alpha", &["alpha"], &[]), host("bravo", &["bravo"], &[])],
        settings,
        &runner,
    );

    let connection = selector
        .select_next(&[String::from("alpha")])
        .expect("bravo should connect");
    assert_eq!(connection.name(), "bravo");
}

#[rstest]
fn select_next_reports_exhausted_pool(settings: SshSettings) {
    let runner = ScriptedRunner::new();
    runner.push_failure(255);
    runner.push_failure(255);
    let (selector, _observer) = selector_with(
        vec![host("alpha", &["alpha"], &[]), host("bravo", &["bravo"], &[])],
        settings,
        &runner,
    );

    let err = selector
        .select_next(&[])
        .expect_err("unreachable pool should fail");
    let SelectError::NoReachableHost { ref attempted } = err else {
        panic!("expected NoReachableHost, got {err:?}");
    };
    assert_eq!(attempted, &[String::from("alpha"), String::from("bravo")]);
}

#[rstest]
fn select_falls_back_to_local_when_enabled(mut settings: SshSettings) {
    settings.local_fallback = true;
    let runner = ScriptedRunner::new();
    runner.push_failure(255);
    let (selector, observer) = selector_with(vec![host("devbox", &["devbox"], &[])], settings, &runner);

    let connection = selector.select(None).expect("local fallback expected");

    assert!(connection.is_local());
    assert!(connection.client().is_none());
    assert!(matches!(
        observer.events().last(),
        Some(ConnectionEvent::LocalFallback)
    ));

    // Local connections are always alive, so reuse needs no scripted probe.
    let reused = selector.select(Some("devbox")).expect("cache hit expected");
    assert!(connection.shares_client_with(&reused));
}

#[rstest]
fn select_surfaces_every_attempted_alias(settings: SshSettings) {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(255), "", "ssh: connect: Connection timed out\n");
    runner.push_output(Some(255), "", "ssh: connect: No route to host\n");
    let (selector, _observer) = selector_with(
        vec![host("devbox", &["devbox", "devbox-vpn"], &[])],
        settings,
        &runner,
    );

    let err = selector.select(None).expect_err("all aliases fail");
    let SelectError::AllAliasesFailed { ref attempts, .. } = err else {
        panic!("expected AllAliasesFailed, got {err:?}");
    };
    assert_eq!(attempts.len(), 2);
    let message = err.to_string();
    assert!(message.contains("devbox"), "message: {message}");
    assert!(message.contains("devbox-vpn"), "message: {message}");
}

#[rstest]
fn empty_alias_list_is_a_config_error(settings: SshSettings) {
    let runner = ScriptedRunner::new();
    let (selector, _observer) = selector_with(vec![host("devbox", &[], &[])], settings, &runner);

    let err = selector.select(None).expect_err("no aliases should fail");
    assert!(matches!(err, SelectError::EmptyAliases { ref host } if host == "devbox"));
}

#[rstest]
#[case("dial tcp: i/o timeout", ProbeReason::Timeout)]
#[case("connect to host devbox port 22: Connection refused", ProbeReason::Refused)]
#[case("connect: No route to host", ProbeReason::Unreachable)]
#[case("Network is unreachable", ProbeReason::Unreachable)]
#[case("ubuntu@devbox: Permission denied (publickey)", ProbeReason::Auth)]
#[case("unable to authenticate, no supported methods remain", ProbeReason::Auth)]
#[case("Host key verification failed.", ProbeReason::HostKey)]
#[case("something else entirely", ProbeReason::Unknown)]
fn classify_failure_matches_in_order(#[case] text: &str, #[case] expected: ProbeReason) {
    assert_eq!(classify_failure(text), expected);
}

#[test]
fn host_expands_dir_template() {
    let entry = host("devbox", &["devbox"], &[]);
    assert_eq!(
        entry.expand_dir("feat-auth", "myproject"),
        "~/rr/myproject-feat-auth"
    );
}

#[test]
fn connected_event_marks_fallback() {
    let event = ConnectionEvent::Connected {
        alias: String::from("devbox-vpn"),
        latency: Duration::from_millis(42),
        fallback: true,
    };
    let message = event.message();
    assert!(message.contains("42 ms"), "message: {message}");
    assert!(message.ends_with("(fallback)"), "message: {message}");
}

#[test]
fn connection_close_is_idempotent() {
    let runner = ScriptedRunner::new();
    runner.push_success(); // single control master teardown
    let client = crate::exec::SshClient::new("devbox", crate::exec::SshOptions::default(), runner.clone());
    let connection = Connection::remote(
        host("devbox", &["devbox"], &[]),
        "devbox",
        client,
        Duration::from_millis(5),
    );

    connection.close();
    connection.close();

    // Only the first close reaches the runner.
    assert_eq!(runner.call_count(), 1);
    assert!(!connection.is_alive());
}

#[rstest]
fn cache_returns_live_entries_by_identity(settings: SshSettings) {
    let runner = ScriptedRunner::new();
    runner.push_success(); // probe
    runner.push_success(); // health check in get
    let (selector, _observer) = selector_with(vec![host("devbox", &["devbox"], &[])], settings, &runner);
    let connection = selector.select_host("devbox").expect("probe");

    let cache = ConnectionCache::new();
    cache.insert(connection.clone());

    let fetched = cache.get("devbox").expect("live entry");
    assert!(fetched.shares_client_with(&connection));
    assert_eq!(cache.len(), 1);
}

#[rstest]
fn cache_evicts_dead_entries(settings: SshSettings) {
    let runner = ScriptedRunner::new();
    runner.push_success(); // probe
    runner.push_exit_code(255); // health check fails
    runner.push_success(); // teardown during eviction
    let (selector, _observer) = selector_with(vec![host("devbox", &["devbox"], &[])], settings, &runner);
    let connection = selector.select_host("devbox").expect("probe");

    let cache = ConnectionCache::new();
    cache.insert(connection);

    assert!(cache.get("devbox").is_none());
    assert!(cache.is_empty());
}

#[rstest]
fn cache_insert_closes_replaced_entry(settings: SshSettings) {
    let runner = ScriptedRunner::new();
    runner.push_success(); // first probe
    runner.push_success(); // second probe
    runner.push_success(); // teardown of replaced entry
    let (selector, _observer) = selector_with(vec![host("devbox", &["devbox"], &[])], settings, &runner);
    let first = selector.select_host("devbox").expect("probe");
    let second = selector.select_host("devbox").expect("probe");

    let cache = ConnectionCache::new();
    cache.insert(first.clone());
    cache.insert(second);

    assert!(!first.is_alive(), "replaced entry should be closed");
    assert_eq!(cache.len(), 1);
}
