//! End-to-end shell scenarios against the scripted transport

mod common;

use std::time::Duration;

use common::{output_lines, run_shell, session, FakeTransport, Scripted, LATENCY};
use dragonfly_bmc::{BmcError, Method, Transport};
use dragonfly_power::{Shell, PROMPT};
use tokio::io::BufReader;
use tokio::time::Instant;
use tokio_test::io::Builder;

const PAUSE: Duration = Duration::from_secs(30);

fn results_for<'a>(lines: &'a [String], host: &str) -> Vec<&'a str> {
    let prefix = format!("{}: ", host);
    lines
        .iter()
        .filter_map(|line| line.strip_prefix(prefix.as_str()))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_stat_reports_every_host_in_completion_order() {
    let transport = FakeTransport::new()
        .script("n1", vec![Scripted::slow(r#"{"PowerState":"On"}"#, Duration::from_millis(100))])
        .script("n2", vec![Scripted::slow("<html>oops", Duration::from_millis(50))]);
    let input = Builder::new()
        .read(b"stat\n")
        .wait(PAUSE)
        .read(b"quit\n")
        .build();

    let shell = run_shell(session("n[1-2]"), transport, input).await;

    assert_eq!(output_lines(&shell), vec!["n2: parse error", "n1: on"]);
    let subs = &shell.transport().submissions;
    assert_eq!(subs.len(), 2);
    assert!(subs.iter().all(|s| s.request.method == Method::Get));
    assert_eq!(subs[0].request.url, "https://n1/redfish/v1/Systems/1");
    assert_eq!(shell.lifecycle().live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stat_fan_out_produces_one_line_per_host() {
    let mut transport = FakeTransport::new();
    for n in 1..=5 {
        transport = transport.script(&format!("node{}", n), vec![Scripted::power("Off")]);
    }
    let input = Builder::new()
        .read(b"stat\n")
        .wait(PAUSE)
        .read(b"quit\n")
        .build();

    let shell = run_shell(session("node[1-5]"), transport, input).await;

    let lines = output_lines(&shell);
    assert_eq!(lines.len(), 5);
    for n in 1..=5 {
        assert_eq!(results_for(&lines, &format!("node{}", n)), vec!["off"]);
    }
}

#[tokio::test(start_paused = true)]
async fn test_prompt_only_when_idle() {
    let transport = FakeTransport::new().script("n1", vec![Scripted::power("On")]);
    let input = Builder::new()
        .read(b"stat\n")
        .wait(PAUSE)
        .read(b"quit\n")
        .build();

    let shell = run_shell(session("n1"), transport, input).await;

    let output = String::from_utf8(shell.output().clone()).unwrap();
    assert_eq!(output, format!("{p}n1: on\n{p}", p = PROMPT));
}

#[tokio::test(start_paused = true)]
async fn test_on_polls_until_confirmed() {
    let transport = FakeTransport::new().script(
        "n1",
        vec![
            Scripted::body(""),
            Scripted::power("Off"),
            Scripted::power("Off"),
            Scripted::power("On"),
        ],
    );
    let input = Builder::new()
        .read(b"on n1\n")
        .wait(PAUSE)
        .read(b"quit\n")
        .build();

    let shell = run_shell(session("n1"), transport, input).await;

    assert_eq!(output_lines(&shell), vec!["n1: ok"]);

    let subs = &shell.transport().submissions;
    let methods: Vec<_> = subs.iter().map(|s| s.request.method).collect();
    assert_eq!(
        methods,
        vec![Method::Post, Method::Get, Method::Get, Method::Get]
    );
    assert_eq!(subs[0].request.body.as_deref(), Some(r#"{"ResetType":"On"}"#));
    assert!(subs[1..]
        .iter()
        .all(|s| s.request.url == "https://n1/redfish/v1/Systems/1"));
    for pair in subs.windows(2) {
        assert!(pair[1].at - pair[0].at >= Duration::from_secs(1) + LATENCY);
    }
    assert_eq!(shell.lifecycle().live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_off_times_out_when_state_never_changes() {
    let transport = FakeTransport::new()
        .script("n1", vec![Scripted::body(""), Scripted::power("On")]);
    let input = Builder::new()
        .read(b"settimeout 3\noff\n")
        .wait(PAUSE)
        .read(b"quit\n")
        .build();
    let start = Instant::now();

    let shell = run_shell(session("n1"), transport, input).await;

    assert_eq!(output_lines(&shell), vec!["n1: timeout"]);
    let subs = &shell.transport().submissions;
    assert!(subs.len() >= 3, "expected several polls, got {}", subs.len());
    // Polls are only scheduled before the deadline
    let last = subs.last().unwrap();
    assert!(last.at <= start + Duration::from_secs(3) + Duration::from_secs(1) + LATENCY * 2);
    assert_eq!(shell.delayed(), 0);
    assert_eq!(shell.lifecycle().live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_settimeout_does_not_extend_running_chain() {
    let transport = FakeTransport::new()
        .script("n1", vec![Scripted::body(""), Scripted::power("Off")]);
    let input = Builder::new()
        .read(b"settimeout 3\non\n")
        .wait(Duration::from_millis(1500))
        .read(b"settimeout 100\n")
        .wait(PAUSE)
        .read(b"quit\n")
        .build();

    let shell = run_shell(session("n1"), transport, input).await;

    assert_eq!(output_lines(&shell), vec!["n1: timeout"]);
    assert!(shell.transport().submissions.len() <= 5);
    assert_eq!(shell.session().command_timeout, Duration::from_secs(100));
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_is_not_retried() {
    let transport = FakeTransport::new().script(
        "n1",
        vec![Scripted::fail(BmcError::ConnectionFailed("refused".into()))],
    );
    let input = Builder::new()
        .read(b"on\n")
        .wait(PAUSE)
        .read(b"quit\n")
        .build();

    let shell = run_shell(session("n1"), transport, input).await;

    assert_eq!(output_lines(&shell), vec!["n1: error"]);
    assert_eq!(shell.transport().submissions.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_verbose_detail_lines() {
    let transport = FakeTransport::new()
        .script("n1", vec![Scripted::body(r#"{"Id":"1"}"#)])
        .script("n2", vec![Scripted::fail(BmcError::HttpStatus(401))])
        .script("n3", vec![Scripted::slow("{", Duration::from_millis(30))]);
    let input = Builder::new()
        .read(b"stat\n")
        .wait(PAUSE)
        .read(b"quit\n")
        .build();

    let shell = run_shell(session("n[1-3]").with_verbose(true), transport, input).await;

    let lines = output_lines(&shell);
    assert_eq!(results_for(&lines, "n1"), vec!["no PowerState", "no powerstate"]);
    assert_eq!(results_for(&lines, "n2"), vec!["error", "HTTP error status 401"]);
    let n3 = results_for(&lines, "n3");
    assert_eq!(n3.len(), 2);
    assert!(n3[0].starts_with("parse response error "));
    assert_eq!(n3[1], "parse error");
}

#[tokio::test(start_paused = true)]
async fn test_cycle_is_reported_without_polling() {
    let transport = FakeTransport::new().script("n1", vec![Scripted::body("")]);
    let input = Builder::new()
        .read(b"cycle\n")
        .wait(PAUSE)
        .read(b"quit\n")
        .build();

    let shell = run_shell(session("n1"), transport, input).await;

    assert_eq!(output_lines(&shell), vec!["n1: ok"]);
    let subs = &shell.transport().submissions;
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].request.method, Method::Post);
}

#[tokio::test(start_paused = true)]
async fn test_quit_discards_outstanding_operations() {
    let slow = Duration::from_secs(10);
    let transport = FakeTransport::new()
        .script("n1", vec![Scripted::slow(r#"{"PowerState":"On"}"#, slow)])
        .script("n2", vec![Scripted::slow(r#"{"PowerState":"On"}"#, slow)]);
    let input = Builder::new()
        .read(b"stat\n")
        .wait(Duration::from_secs(1))
        .read(b"quit\n")
        .build();

    let shell = run_shell(session("n[1-2]"), transport, input).await;

    assert!(output_lines(&shell).is_empty());
    assert_eq!(shell.lifecycle().live(), 0);
    assert_eq!(shell.in_flight(), 0);
    assert_eq!(shell.transport().cancels.len(), 2);
    assert_eq!(shell.transport().outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_quit_discards_delayed_polls() {
    let transport = FakeTransport::new()
        .script("n1", vec![Scripted::body(""), Scripted::power("Off")]);
    let input = Builder::new()
        .read(b"on\n")
        .wait(Duration::from_millis(500))
        .read(b"quit\n")
        .build();

    let shell = run_shell(session("n1"), transport, input).await;

    assert!(output_lines(&shell).is_empty());
    // Only the POST went out; the poll was still parked
    assert_eq!(shell.transport().submissions.len(), 1);
    assert_eq!(shell.delayed(), 0);
    assert_eq!(shell.lifecycle().live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_end_of_input_exits_cleanly() {
    let transport = FakeTransport::new()
        .script("n1", vec![Scripted::slow(r#"{"PowerState":"On"}"#, Duration::from_secs(5))]);
    let input = Builder::new().read(b"stat\n").build();

    let mut shell = Shell::new(session("n1"), transport, Vec::new());
    shell.run(BufReader::new(input)).await.unwrap();

    assert!(output_lines(&shell).is_empty());
    assert_eq!(shell.lifecycle().live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_new_commands_accepted_while_others_outstanding() {
    let transport = FakeTransport::new()
        .script("n1", vec![Scripted::slow(r#"{"PowerState":"On"}"#, Duration::from_secs(2))])
        .script("n2", vec![Scripted::power("Off")]);
    let input = Builder::new()
        .read(b"stat n1\n")
        .wait(Duration::from_millis(100))
        .read(b"stat n2\n")
        .wait(PAUSE)
        .read(b"quit\n")
        .build();

    let shell = run_shell(session("n[1-2]"), transport, input).await;

    assert_eq!(output_lines(&shell), vec!["n2: off", "n1: on"]);
}

#[tokio::test(start_paused = true)]
async fn test_configuration_errors_create_no_operations() {
    let transport = FakeTransport::new();
    let input = Builder::new()
        .read(b"setonpath\non\nstat n9\nstat n[\nbogus\nauth\nsettimeout 0\n")
        .wait(PAUSE)
        .read(b"quit\n")
        .build();

    let shell = run_shell(session("n[1-2]"), transport, input).await;

    let lines = output_lines(&shell);
    assert_eq!(lines[0], "on path not setup");
    assert_eq!(lines[1], "unknown host specified: n9");
    assert_eq!(lines[2], "illegal hosts input");
    assert_eq!(lines[3], "type \"help\" for a list of commands");
    assert_eq!(lines[4], "Usage: auth user:passwd");
    assert_eq!(lines[5], "invalid timeout specified");
    assert!(shell.transport().submissions.is_empty());
    assert_eq!(shell.lifecycle().live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_auth_and_header_apply_to_later_requests() {
    let transport = FakeTransport::new().script("n1", vec![Scripted::power("On")]);
    let input = Builder::new()
        .read(b"auth root:calvin\nsetheader X-Auth-Token: abc123\nstat\n")
        .wait(PAUSE)
        .read(b"quit\n")
        .build();

    let shell = run_shell(session("n1"), transport, input).await;

    let request = &shell.transport().submissions[0].request;
    assert_eq!(request.credentials.as_ref().unwrap().username, "root");
    assert_eq!(request.header.as_ref().unwrap().to_string(), "X-Auth-Token: abc123");
}

#[tokio::test(start_paused = true)]
async fn test_cleared_stat_path_ends_chain_with_error() {
    let transport = FakeTransport::new()
        .script("n1", vec![Scripted::body(""), Scripted::power("Off")]);
    let input = Builder::new()
        .read(b"on\n")
        .wait(Duration::from_millis(1500))
        .read(b"setstatpath\n")
        .wait(PAUSE)
        .read(b"quit\n")
        .build();

    let shell = run_shell(session("n1").with_verbose(true), transport, input).await;

    assert_eq!(
        output_lines(&shell),
        vec!["n1: error", "n1: Statpath not setup"]
    );
    assert_eq!(shell.lifecycle().live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_help_lists_commands() {
    let input = Builder::new().read(b"help\n").build();

    let shell = run_shell(session("n1"), FakeTransport::new(), input).await;

    let lines = output_lines(&shell);
    assert_eq!(lines[0], "Valid commands are:");
    assert!(lines.iter().any(|l| l.trim() == "setonpath url [data]"));
}

#[tokio::test(start_paused = true)]
async fn test_non_utf8_input_is_reported_and_session_continues() {
    let transport = FakeTransport::new().script("n1", vec![Scripted::power("On")]);
    let input = Builder::new()
        .read(b"\xffstat\nstat n\xe91\nstat\n")
        .wait(PAUSE)
        .read(b"quit\n")
        .build();

    let shell = run_shell(session("n1"), transport, input).await;

    let lines = output_lines(&shell);
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "type \"help\" for a list of commands");
    assert_eq!(lines[1], "unknown host specified: n\u{fffd}1");
    assert_eq!(lines[2], "n1: on");
    assert_eq!(shell.transport().submissions.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_line_split_across_reads_survives_other_wakeups() {
    let transport = FakeTransport::new()
        .script("n1", vec![Scripted::power("On")])
        .script("n2", vec![Scripted::power("Off")]);
    // n1 completes while the second line is only half typed
    let input = Builder::new()
        .read(b"stat n1\nst")
        .wait(Duration::from_millis(200))
        .read(b"at n2\n")
        .wait(PAUSE)
        .read(b"quit\n")
        .build();

    let shell = run_shell(session("n[1-2]"), transport, input).await;

    assert_eq!(output_lines(&shell), vec!["n1: on", "n2: off"]);
}

#[tokio::test(start_paused = true)]
async fn test_input_error_discards_outstanding_operations() {
    let transport = FakeTransport::new()
        .script("n1", vec![Scripted::slow(r#"{"PowerState":"On"}"#, Duration::from_secs(5))]);
    let input = Builder::new()
        .read(b"stat\n")
        .read_error(std::io::Error::new(std::io::ErrorKind::Other, "terminal gone"))
        .build();

    let mut shell = Shell::new(session("n1"), transport, Vec::new());
    let result = shell.run(BufReader::new(input)).await;

    assert!(result.is_err());
    assert_eq!(shell.lifecycle().live(), 0);
    assert_eq!(shell.transport().outstanding(), 0);
}

/// Output that refuses everything past the first `limit` bytes
struct ClosedAfter {
    limit: usize,
    written: Vec<u8>,
}

impl std::io::Write for ClosedAfter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.written.len() + buf.len() > self.limit {
            return Err(std::io::ErrorKind::BrokenPipe.into());
        }
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_output_error_discards_outstanding_operations() {
    let transport = FakeTransport::new()
        .script("n1", vec![Scripted::power("On")])
        .script("n2", vec![Scripted::slow(r#"{"PowerState":"On"}"#, Duration::from_secs(10))]);
    let input = Builder::new().read(b"stat\n").wait(PAUSE).build();
    let out = ClosedAfter {
        limit: PROMPT.len(),
        written: Vec::new(),
    };

    let mut shell = Shell::new(session("n[1-2]"), transport, out);
    let result = shell.run(BufReader::new(input)).await;

    // Writing n1's result fails; n2 must not be left behind
    assert!(result.is_err());
    assert_eq!(shell.output().written, PROMPT.as_bytes());
    assert_eq!(shell.in_flight(), 0);
    assert_eq!(shell.lifecycle().live(), 0);
    let n2 = shell.transport().submissions[1].id;
    assert!(shell.transport().cancels.contains(&n2));
    assert_eq!(shell.transport().outstanding(), 0);
}

/// Power on n1 through one confirmation poll with the given transport hint
async fn power_on_with_hint(hint: Option<Duration>) -> Shell<FakeTransport, Vec<u8>> {
    let transport = FakeTransport::new()
        .script("n1", vec![Scripted::body(""), Scripted::power("On")])
        .with_next_timeout(hint);
    let input = Builder::new()
        .read(b"on n1\n")
        .wait(PAUSE)
        .read(b"quit\n")
        .build();

    run_shell(session("n1"), transport, input).await
}

fn poll_gap(shell: &Shell<FakeTransport, Vec<u8>>) -> Duration {
    let subs = &shell.transport().submissions;
    assert_eq!(subs.len(), 2);
    subs[1].at - subs[0].at
}

#[tokio::test(start_paused = true)]
async fn test_without_transport_hint_loop_wakes_incrementally() {
    let shell = power_on_with_hint(None).await;

    assert_eq!(output_lines(&shell), vec!["n1: ok"]);
    // Two half-second waits cover the one-second poll delay
    assert!(shell.transport().timeout_queries() <= 5);
    assert!(poll_gap(&shell) >= Duration::from_secs(1) + LATENCY);
    assert!(poll_gap(&shell) < Duration::from_millis(1100));
}

#[tokio::test(start_paused = true)]
async fn test_short_transport_hint_wins_over_delayed_poll() {
    let shell = power_on_with_hint(Some(Duration::from_millis(100))).await;

    assert_eq!(output_lines(&shell), vec!["n1: ok"]);
    assert!(shell.transport().timeout_queries() >= 10);
    // Extra wakeups never release the poll early
    assert!(poll_gap(&shell) >= Duration::from_secs(1) + LATENCY);
    assert!(poll_gap(&shell) < Duration::from_millis(1100));
}

#[tokio::test(start_paused = true)]
async fn test_long_transport_hint_does_not_delay_poll() {
    let shell = power_on_with_hint(Some(Duration::from_secs(5))).await;

    assert_eq!(output_lines(&shell), vec!["n1: ok"]);
    assert!(shell.transport().timeout_queries() <= 5);
    assert!(poll_gap(&shell) < Duration::from_millis(1100));
}

#[tokio::test(start_paused = true)]
async fn test_zero_transport_hint_does_not_spin() {
    let shell = power_on_with_hint(Some(Duration::ZERO)).await;

    assert_eq!(output_lines(&shell), vec!["n1: ok"]);
    assert!(shell.transport().timeout_queries() <= 5);
    assert!(poll_gap(&shell) >= Duration::from_secs(1) + LATENCY);
    assert!(poll_gap(&shell) < Duration::from_millis(1100));
}
