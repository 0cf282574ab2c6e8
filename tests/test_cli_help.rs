use predicates::prelude::*;

#[test]
fn test_help_lists_subcommands() {
    let mut cmd = assert_cmd::cargo_bin_cmd!("procwatch");
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("watch"))
        .stdout(predicate::str::contains("stream"))
        .stdout(predicate::str::contains("config"))
        .stdout(predicate::str::contains("--version"))
        .stdout(predicate::str::contains("--help"));
}

#[test]
fn test_watch_help_includes_options() {
    let mut cmd = assert_cmd::cargo_bin_cmd!("procwatch");
    cmd.args(["watch", "--help"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("--json"))
        .stdout(predicate::str::contains("--push"))
        .stdout(predicate::str::contains("--interval"))
        .stdout(predicate::str::contains("--max-events"))
        .stdout(predicate::str::contains("--config"));
}

#[test]
fn test_missing_subcommand_shows_usage() {
    let mut cmd = assert_cmd::cargo_bin_cmd!("procwatch");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_invalid_interval_rejected() {
    let mut cmd = assert_cmd::cargo_bin_cmd!("procwatch");
    cmd.args(["watch", "--interval", "0.01"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Invalid polling interval"));
}
