use anyhow::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

const DEFAULT_FILTER: &str = "info,question_bot=debug,reqwest=warn,hyper=warn";

pub fn init() -> Result<()> {
  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
  fmt().with_env_filter(env_filter).with_target(true).init();
  Ok(())
}
