mod util;

use assert_cmd::Command;
use assert_fs::prelude::*;
use authkit_integrate::cli::{Cli, Commands};
use clap::Parser;
use predicates::prelude::*;
use util::*;

fn akit() -> Command {
    let mut cmd = Command::cargo_bin("akit").expect("binary builds");
    cmd.env_remove("AUTHKIT__DEFAULT_PREFIX")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn install_flags_parse() {
    let cli = Cli::parse_from([
        "akit",
        "install",
        "--root",
        "app",
        "--prefix",
        "accounts/",
        "--target",
        "router",
        "--interactive",
        "--dry-run",
    ]);
    assert!(cli.dry_run);
    match cli.command {
        Commands::Install(args) => {
            assert_eq!(args.run.prefix.as_deref(), Some("/accounts"));
            assert_eq!(args.run.targets.len(), 1);
            assert!(args.interactive);
        }
        _ => panic!("expected Install command"),
    }
}

#[test]
fn install_writes_and_reports_done() {
    let tmp = phoenix_app(CLEAN_ROUTER);

    akit()
        .args(["install", "--root"])
        .arg(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("akit: done (prefix /auth_kit)"));

    tmp.child(ROUTER_PATH)
        .assert(predicate::str::contains("auth_kit_routes \"/auth_kit\""));
    tmp.child(LAYOUT_PATH)
        .assert(predicate::str::contains("import AuthKit.Components"));
}

#[test]
fn check_emits_json_and_leaves_files_alone() {
    let tmp = phoenix_app(CLEAN_ROUTER);

    let output = akit()
        .args(["check", "--json", "--prefix", "/accounts", "--root"])
        .arg(tmp.path())
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["outcome"], "done");
    assert_eq!(json["exit_code"], 0);
    assert_eq!(json["run"]["dry_run"], true);
    assert_eq!(json["run"]["requested_prefix"], "/accounts");
    assert_eq!(json["run"]["outcome"]["status"], "success");

    tmp.child(ROUTER_PATH).assert(CLEAN_ROUTER);
}

#[test]
fn dry_run_install_prints_dry_run_headline() {
    let tmp = phoenix_app(CLEAN_ROUTER);

    akit()
        .args(["install", "--dry-run", "--verbosity", "technical", "--root"])
        .arg(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("akit: dry run"))
        .stdout(predicate::str::contains("+  import AuthKit.Router"));

    tmp.child(ROUTER_PATH).assert(CLEAN_ROUTER);
}

#[test]
fn blocked_install_exits_two() {
    let router = r#"defmodule ShopWeb.Router do
  pipeline :browser do
  end

  pipeline :auth_kit do
  end
end
"#;
    let tmp = phoenix_app(router);

    akit()
        .args(["install", "--root"])
        .arg(tmp.path())
        .assert()
        .code(2)
        .stdout(predicate::str::contains("akit: blocked"))
        .stdout(predicate::str::contains("--interactive"));

    tmp.child(ROUTER_PATH).assert(router);
}

#[test]
fn interactive_acknowledgement_from_stdin() {
    let router = r#"defmodule ShopWeb.Router do
  pipeline :browser do
  end

  pipeline :auth_kit do
  end
end
"#;
    let tmp = phoenix_app(router);

    akit()
        .args(["install", "--interactive", "--root"])
        .arg(tmp.path())
        .write_stdin("y\n")
        .assert()
        .success()
        .stderr(predicate::str::contains("acknowledge and continue?"));

    tmp.child(ROUTER_PATH)
        .assert(predicate::str::contains("auth_kit_routes"));
}

#[test]
fn parse_error_exits_three() {
    let tmp = phoenix_app(CLEAN_ROUTER);
    tmp.child(LAYOUT_PATH)
        .write_str("defmodule ShopWeb.Layouts do\n  def broken(, do\n")
        .unwrap();

    akit()
        .args(["install", "--root"])
        .arg(tmp.path())
        .assert()
        .code(3)
        .stdout(predicate::str::contains("fatal (parse_error)"));

    tmp.child(ROUTER_PATH).assert(CLEAN_ROUTER);
}

#[test]
fn empty_project_exits_four() {
    let tmp = assert_fs::TempDir::new().unwrap();

    akit()
        .args(["check", "--root"])
        .arg(tmp.path())
        .assert()
        .code(4)
        .stdout(predicate::str::contains("fatal (target_not_found)"));
}

#[test]
fn invalid_prefix_is_rejected_by_the_parser() {
    let tmp = phoenix_app(CLEAN_ROUTER);

    akit()
        .args(["install", "--prefix", "bad prefix\"", "--root"])
        .arg(tmp.path())
        .assert()
        .failure();

    tmp.child(ROUTER_PATH).assert(CLEAN_ROUTER);
}

#[test]
fn config_file_sets_the_default_prefix() {
    let tmp = phoenix_app(CLEAN_ROUTER);
    tmp.child("authkit.toml")
        .write_str("default_prefix = \"members\"\n")
        .unwrap();

    akit()
        .args(["install", "--root"])
        .arg(tmp.path())
        .assert()
        .success();

    tmp.child(ROUTER_PATH)
        .assert(predicate::str::contains("auth_kit_routes \"/members\""));
}

#[test]
fn backups_list_and_restore() {
    let tmp = phoenix_app(CLEAN_ROUTER);

    akit()
        .args(["install", "--backup", "--root"])
        .arg(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("akit backups restore"));

    let listed = akit()
        .args(["backups", "list", "--json", "--root"])
        .arg(tmp.path())
        .output()
        .unwrap();
    assert!(listed.status.success());
    let sessions: serde_json::Value = serde_json::from_slice(&listed.stdout).unwrap();
    assert_eq!(sessions.as_array().map(Vec::len), Some(1));
    assert_eq!(sessions[0]["files"], 2);

    akit()
        .args(["backups", "restore", "latest", "--root"])
        .arg(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Restored"));

    tmp.child(ROUTER_PATH).assert(CLEAN_ROUTER);
    tmp.child(LAYOUT_PATH).assert(LAYOUT);
}

#[test]
fn init_writes_a_config_once() {
    let tmp = assert_fs::TempDir::new().unwrap();

    akit()
        .arg("init")
        .arg(tmp.path())
        .assert()
        .success();
    tmp.child("authkit.toml")
        .assert(predicate::str::contains("default_prefix = \"/auth_kit\""));

    akit()
        .arg("init")
        .arg(tmp.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--force"));
}

#[test]
fn completions_to_stdout() {
    akit()
        .args(["completions", "bash", "--stdout"])
        .assert()
        .success()
        .stdout(predicate::str::contains("akit"));
}
