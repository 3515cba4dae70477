pub mod run;
pub mod serve;
pub mod subscription;

use anyhow::Context;
use renewal_core::config::Config;
use renewal_core::runtime::WorkflowRuntime;
use std::path::Path;

/// Open the runtime for `root` with its configured collaborators.
pub(crate) fn open_runtime(root: &Path) -> anyhow::Result<WorkflowRuntime> {
    let config = Config::load(root).context("loading config")?;
    WorkflowRuntime::open(root, &config).context("opening run store (is `renewal serve` running?)")
}
