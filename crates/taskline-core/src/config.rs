use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::time::Duration;

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

pub const DEFAULT_API_URL: &str =
  "http://localhost:3001/api";

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = HashMap::new();
    for (key, value) in [
      ("api.base_url", DEFAULT_API_URL),
      ("api.timeout_secs", "10"),
      (
        "network.probe_interval_secs",
        "5"
      ),
      ("data.location", "~/.taskline"),
      ("color", "on")
    ] {
      map.insert(
        key.to_string(),
        value.to_string()
      );
    }
    Self {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  /// Defaults, then the config file, then `TASKLINE_API_URL`.
  #[tracing::instrument(skip(
    config_override
  ))]
  pub fn load(
    config_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    match resolve_config_path(
      config_override
    ) {
      | Some(path) if path.exists() => {
        info!(config = %path.display(), "loading config");
        cfg.load_file(&path)?;
      }
      | Some(path)
        if config_override.is_some() =>
      {
        return Err(anyhow!(
          "config file {} does not \
           exist",
          path.display()
        ));
      }
      | _ => {
        debug!(
          "no config file found; using \
           defaults"
        );
      }
    }

    if let Ok(url) =
      std::env::var("TASKLINE_API_URL")
      && !url.trim().is_empty()
    {
      debug!(url = %url, "api url from environment");
      cfg.map.insert(
        "api.base_url".to_string(),
        url
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  pub fn api_base_url(&self) -> String {
    self
      .get("api.base_url")
      .unwrap_or_else(|| {
        DEFAULT_API_URL.to_string()
      })
  }

  pub fn api_timeout(
    &self
  ) -> anyhow::Result<Duration> {
    self.seconds("api.timeout_secs", 10)
  }

  pub fn probe_interval(
    &self
  ) -> anyhow::Result<Duration> {
    self.seconds(
      "network.probe_interval_secs",
      5
    )
  }

  pub fn color(&self) -> bool {
    self.get_bool("color").unwrap_or(true)
  }

  fn seconds(
    &self,
    key: &str,
    fallback: u64
  ) -> anyhow::Result<Duration> {
    let secs = match self.map.get(key) {
      | Some(raw) => {
        raw.trim().parse::<u64>().with_context(
          || {
            format!(
              "{key} must be a whole \
               number of seconds, got \
               {raw:?}"
            )
          }
        )?
      }
      | None => fallback
    };
    Ok(Duration::from_secs(secs))
  }

  /// Tables flatten to dotted keys: `[api] base_url = ".."` becomes
  /// `api.base_url`.
  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    let table = toml::from_str::<
      toml::Table
    >(&text)
    .with_context(|| {
      format!(
        "invalid config file {}",
        path.display()
      )
    })?;

    self
      .loaded_files
      .push(path.clone());

    let mut flat = Vec::new();
    flatten("", &table, &mut flat);
    for (key, value) in flat {
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

fn flatten(
  prefix: &str,
  table: &toml::Table,
  out: &mut Vec<(String, String)>
) {
  for (key, value) in table {
    let full = if prefix.is_empty() {
      key.clone()
    } else {
      format!("{prefix}.{key}")
    };
    match value {
      | toml::Value::Table(inner) => {
        flatten(&full, inner, out)
      }
      | toml::Value::String(s) => {
        out.push((full, s.clone()))
      }
      | toml::Value::Integer(n) => {
        out.push((full, n.to_string()))
      }
      | toml::Value::Float(n) => {
        out.push((full, n.to_string()))
      }
      | toml::Value::Boolean(b) => {
        out.push((full, b.to_string()))
      }
      | other => {
        warn!(key = %full, value = %other, "unsupported config value; skipping");
      }
    }
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

fn resolve_config_path(
  override_path: Option<&Path>
) -> Option<PathBuf> {
  if let Some(path) = override_path {
    return Some(path.to_path_buf());
  }

  if let Ok(env_path) =
    std::env::var("TASKLINE_CONFIG")
  {
    if env_path == "/dev/null" {
      return None;
    }
    return Some(PathBuf::from(
      env_path
    ));
  }

  dirs::config_dir().map(|dir| {
    dir
      .join("taskline")
      .join("config.toml")
  })
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(".taskline"))
}

pub fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

pub fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}
