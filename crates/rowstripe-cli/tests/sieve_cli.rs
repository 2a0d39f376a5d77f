//! Exit codes and output of the `sieve` binary.

use std::process::Command;

fn sieve(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_sieve"))
        .args(args)
        .output()
        .unwrap()
}

#[test]
fn test_counts_primes() {
    let out = sieve(&["100", "2", "-p", "3"]);
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "Number of primes found: 25");

    let timing = String::from_utf8_lossy(&out.stderr);
    let fields: Vec<&str> = timing.trim().rsplit('\n').next().unwrap().split(',').collect();
    assert_eq!(&fields[..2], &["2", "100"]);
    assert!(fields[2].parse::<f64>().is_ok());
}

#[test]
fn test_wrong_argument_count() {
    assert_eq!(sieve(&[]).status.code(), Some(1));
    assert_eq!(sieve(&["100"]).status.code(), Some(1));
    assert_eq!(sieve(&["100", "1", "7"]).status.code(), Some(1));
}

#[test]
fn test_non_positive_arguments() {
    assert_eq!(sieve(&["0", "1"]).status.code(), Some(2));
    assert_eq!(sieve(&["-5", "1"]).status.code(), Some(2));
    assert_eq!(sieve(&["100", "0"]).status.code(), Some(2));
    assert_eq!(sieve(&["many", "1"]).status.code(), Some(2));
}

#[test]
fn test_broadcast_capacity_fails_job() {
    let out = sieve(&["100", "1", "-p", "16", "--strategy", "broadcast"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("Too many processes"));
}
