use super::commands::{daemon_options, server_addr};
use super::{Args, Command};
use clap::Parser;
use ipcache_test_support::TestPki;
use std::time::Duration;

fn base_args(pki: &TestPki) -> Vec<String> {
    let daemon = pki.issue_client("daemon");
    vec![
        "ipcache-clientd".to_string(),
        "--cert".to_string(),
        daemon.cert_path.display().to_string(),
        "--privatekey".to_string(),
        daemon.key_path.display().to_string(),
        "--server-root-ca-cert".to_string(),
        pki.ca_path().display().to_string(),
    ]
}

#[test]
fn defaults_to_run_against_localhost() {
    let pki = TestPki::new();
    let args = Args::parse_from(base_args(&pki));
    assert_eq!(args.command, None);
    assert_eq!(args.registration_timeout, Duration::from_secs(10));

    let options = daemon_options(&args).expect("options");
    assert_eq!(options.server_addr, "localhost:4430");
    assert_eq!(options.server_name, "localhost");
}

#[test]
fn parses_subcommands_and_durations() {
    let pki = TestPki::new();
    let mut argv = base_args(&pki);
    argv.extend(
        ["--server", "10.0.0.5", "--server-name", "ipcache.internal"]
            .into_iter()
            .chain(["--registration-timeout", "1m30s", "grant", "b64principal=="])
            .map(str::to_string),
    );
    let args = Args::parse_from(argv);
    assert_eq!(args.registration_timeout, Duration::from_secs(90));
    assert_eq!(
        args.command,
        Some(Command::Grant { other: "b64principal==".to_string(), capability: 0 })
    );

    let options = daemon_options(&args).expect("options");
    assert_eq!(options.server_addr, "10.0.0.5:4430");
    assert_eq!(options.server_name, "ipcache.internal");
}

#[test]
fn lookup_requires_at_least_one_owner() {
    let pki = TestPki::new();
    let mut argv = base_args(&pki);
    argv.push("lookup".to_string());
    assert!(Args::try_parse_from(argv).is_err());
}

#[test]
fn rejects_malformed_timeout() {
    let pki = TestPki::new();
    let mut argv = base_args(&pki);
    argv.extend(["--registration-timeout".to_string(), "ten".to_string()]);
    assert!(Args::try_parse_from(argv).is_err());
}

#[test]
fn brackets_ipv6_hosts() {
    assert_eq!(server_addr("::1", 4430), "[::1]:4430");
    assert_eq!(server_addr("[::1]", 4430), "[::1]:4430");
    assert_eq!(server_addr("example.net", 1), "example.net:1");
}
