//! End-to-end integration tests for the capture flow.
//!
//! Tests the full pipeline: parse → save → events → export → import → status

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

const CAPTURE: &str = "\
--------- beginning of main
01-05 10:00:00.100  1234  5678 V FA      : Logging event (FE): screen_view(_vs), Bundle[{ga_screen(_sn)=Home, ga_event_origin(_o)=auto}]
01-05 10:00:01.200  1234  5678 I ActivityManager: Displayed com.example/.MainActivity
01-05 10:00:02.300  1234  5678 V FA-SVC  : Logging event: origin=app,name=purchase,params=Bundle[{currency=USD, value=Double(24.5), items=[Bundle[{item_id=sku123, item_name=String(T-Shirt)}], Bundle[{item_id=sku456}]]}]
01-05 10:00:03.400  1234  5678 W FA      : Invalid default event parameter type. Name, value: cart_total_items, 1
";

fn fa_binary() -> String {
    env!("CARGO_BIN_EXE_fa").to_string()
}

/// Runs `fa` against a database in `temp`, isolated from the user's config.
fn fa(temp: &Path, args: &[&str], stdin: Option<&str>) -> Output {
    let mut child = Command::new(fa_binary())
        .env("HOME", temp)
        .env("XDG_CONFIG_HOME", temp.join("config"))
        .env("FAW_DATABASE_PATH", temp.join("fa.db"))
        .env("FAW_COLOR", "false")
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to run fa");
    if let Some(input) = stdin {
        child
            .stdin
            .take()
            .unwrap()
            .write_all(input.as_bytes())
            .unwrap();
    }
    let output = child.wait_with_output().unwrap();
    assert!(
        output.status.success(),
        "fa {args:?} should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

fn stdout(output: &Output) -> String {
    String::from_utf8(output.stdout.clone()).unwrap()
}

fn json_lines(output: &Output) -> Vec<serde_json::Value> {
    stdout(output)
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn test_parse_save_query_export_import() {
    let temp = TempDir::new().unwrap();
    let capture_path = temp.path().join("capture.log");
    std::fs::write(&capture_path, CAPTURE).unwrap();

    // Parse and save
    let parsed = fa(
        temp.path(),
        &[
            "parse",
            capture_path.to_str().unwrap(),
            "--reference",
            "2025-01-05T12:00:00Z",
            "--json",
            "--save",
        ],
        None,
    );
    let events = json_lines(&parsed);
    assert_eq!(events.len(), 3);
    assert_eq!(events[0]["name"], "screen_view");
    assert_eq!(events[0]["parameters"]["ga_screen"], "Home");
    assert_eq!(events[1]["name"], "purchase");
    assert_eq!(events[1]["items"].as_array().unwrap().len(), 2);
    assert_eq!(events[1]["items"][0]["item_name"], "T-Shirt");
    assert!(events[1]["parameters"].get("items").is_none());
    assert_eq!(events[2]["name"], "fa_invalid_default_param");
    assert_eq!(events[2]["parameters"]["cart_total_items"], "1");

    // Query by name
    let queried = fa(
        temp.path(),
        &["events", "--name", "purchase", "--json"],
        None,
    );
    let stored = json_lines(&queried);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["timestamp"], "2025-01-05T10:00:02.300Z");
    assert_eq!(stored[0]["parameters"]["value"], "24.5");

    // Export to file, import into a fresh database
    let backup_path = temp.path().join("backup.json");
    fa(
        temp.path(),
        &["export", "--output", backup_path.to_str().unwrap()],
        None,
    );
    let backup: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&backup_path).unwrap()).unwrap();
    assert_eq!(backup["version"], 1);
    assert_eq!(backup["data"]["events"].as_array().unwrap().len(), 3);
    assert_eq!(backup["data"]["captures"].as_array().unwrap().len(), 1);

    let other = TempDir::new().unwrap();
    let imported = fa(
        other.path(),
        &["import", "--input", backup_path.to_str().unwrap()],
        None,
    );
    assert_eq!(stdout(&imported).trim(), "Imported 3 events and 1 captures.");

    let status = fa(other.path(), &["status"], None);
    let status = stdout(&status);
    assert!(status.contains("Captures: 1"));
    assert!(status.contains("Events: 3"));
    assert!(status.contains("- purchase: 1"));

    // Importing again is a no-op
    let again = fa(
        other.path(),
        &["import", "--input", backup_path.to_str().unwrap()],
        None,
    );
    assert_eq!(stdout(&again).trim(), "Imported 0 events and 0 captures.");
}

#[test]
fn test_watch_stdin_filters_and_sets_parameters() {
    let temp = TempDir::new().unwrap();

    let output = fa(
        temp.path(),
        &[
            "watch",
            "--input",
            "-",
            "--exclude",
            "screen_view",
            "--set",
            "tester=qa-1",
            "--save",
        ],
        Some(CAPTURE),
    );
    let text = stdout(&output);
    assert!(!text.contains("screen_view"));
    assert!(text.contains("01-05 10:00:02.300  purchase"));
    assert!(text.contains("  * tester = qa-1"));
    assert!(text.contains("        item_name = T-Shirt"));

    // Filtered events are still saved
    let stored = fa(temp.path(), &["events", "--json"], None);
    let stored = json_lines(&stored);
    assert_eq!(stored.len(), 3);
    let screen_view = stored
        .iter()
        .find(|e| e["name"] == "screen_view")
        .unwrap();
    assert_eq!(screen_view["isFiltered"], true);
    assert_eq!(screen_view["manualParameters"]["tester"], "qa-1");
}

#[test]
fn test_watch_json_only() {
    let temp = TempDir::new().unwrap();

    let output = fa(
        temp.path(),
        &["watch", "--input", "-", "--only", "purchase", "--json"],
        Some(CAPTURE),
    );
    let events = json_lines(&output);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["name"], "purchase");
    assert_eq!(events[0]["rawTimestamp"], "01-05 10:00:02.300");
}

#[test]
fn test_import_rejects_unknown_version() {
    let temp = TempDir::new().unwrap();
    let output = Command::new(fa_binary())
        .env("HOME", temp.path())
        .env("XDG_CONFIG_HOME", temp.path().join("config"))
        .env("FAW_DATABASE_PATH", temp.path().join("fa.db"))
        .args(["import"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .and_then(|mut child| {
            child
                .stdin
                .take()
                .unwrap()
                .write_all(br#"{"version":2,"exportTimestamp":"2025-01-01T00:00:00Z","data":{}}"#)?;
            child.wait_with_output()
        })
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unsupported backup version 2"));
}

#[test]
fn test_no_subcommand_prints_help() {
    let temp = TempDir::new().unwrap();
    let output = fa(temp.path(), &[], None);
    assert!(stdout(&output).contains("Usage: fa"));
}
