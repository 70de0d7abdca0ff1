pub mod api;
pub mod category;
pub mod cli;
pub mod commands;
pub mod config;
pub mod entity;
pub mod filter;
pub mod network;
pub mod order;
pub mod prefs;
pub mod render;
pub mod store;
pub mod task;
pub mod view;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting taskline CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.config.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let command = cli
    .command
    .unwrap_or_else(|| {
      cli::Command::List(cli::ListArgs {
        filters:
          cli::FilterArgs::default()
      })
    });

  let runtime =
    tokio::runtime::Builder::new_multi_thread()
      .enable_all()
      .build()
      .context(
        "failed to start async runtime"
      )?;

  runtime.block_on(async {
    let mut session =
      commands::Session::open(
        &cfg, &data_dir
      )
      .await?;
    let result = commands::dispatch(
      &mut session,
      command
    )
    .await;
    session.close();
    result
  })?;

  info!("done");
  Ok(())
}
