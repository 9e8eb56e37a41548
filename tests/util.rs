//! Shared test utilities for integration tests
//!
//! Builds small Phoenix-shaped projects on disk and runs the engine
//! against them.

#![allow(dead_code)]

use assert_fs::prelude::*;
use authkit_integrate::{
    Config,
    core::{RunContext, RunPolicy, RunReport, resolve::ConflictPrompt},
};

pub const ROUTER_PATH: &str = "lib/shop_web/router.ex";
pub const LAYOUT_PATH: &str = "lib/shop_web/components/layouts.ex";

pub const MIX: &str = r#"defmodule Shop.MixProject do
  use Mix.Project

  def project do
    [app: :shop, version: "0.1.0", deps: deps()]
  end

  defp deps do
    [
      {:phoenix, "~> 1.7"},
      {:auth_kit, "~> 0.1"}
    ]
  end
end
"#;

/// Router with the prerequisite pipeline and no auth-kit lines.
pub const CLEAN_ROUTER: &str = r#"defmodule ShopWeb.Router do
  use ShopWeb, :router

  pipeline :browser do
    plug :accepts, ["html"]
    plug :fetch_session
  end

  scope "/", ShopWeb do
    pipe_through :browser
    get "/", PageController, :home
  end
end
"#;

pub const LAYOUT: &str = r#"defmodule ShopWeb.Layouts do
  use ShopWeb, :html

  embed_templates "layouts/*"
end
"#;

/// A project with mix.exs, the given router and the default layout.
pub fn phoenix_app(router: &str) -> assert_fs::TempDir {
    let tmp = assert_fs::TempDir::new().expect("tempdir");
    tmp.child("mix.exs").write_str(MIX).expect("write mix.exs");
    tmp.child(ROUTER_PATH).write_str(router).expect("write router");
    tmp.child(LAYOUT_PATH).write_str(LAYOUT).expect("write layout");
    tmp
}

pub fn read(tmp: &assert_fs::TempDir, rel: &str) -> String {
    std::fs::read_to_string(tmp.path().join(rel)).expect("read fixture file")
}

/// Run with default config and no prompt.
pub fn run_in(tmp: &assert_fs::TempDir, prefix: &str, policy: &RunPolicy) -> RunReport {
    RunContext::new(tmp.path(), Config::default()).execute(prefix, policy, None)
}

/// Run with a prompt answering every manual conflict the same way.
pub fn run_with_prompt(
    tmp: &assert_fs::TempDir,
    prefix: &str,
    policy: &RunPolicy,
    prompt: &mut dyn ConflictPrompt,
) -> RunReport {
    RunContext::new(tmp.path(), Config::default()).execute(prefix, policy, Some(prompt))
}
