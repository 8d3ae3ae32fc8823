use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

/// Key-value configuration lookup.
///
/// Implementations return `None` for absent keys. Blank values are treated
/// as absent by [`CarrierSettings`](crate::CarrierSettings), so sources do
/// not need to filter them.
pub trait ConfigSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

impl<T: ConfigSource + ?Sized> ConfigSource for Arc<T> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }
}

/// In-memory source.
#[derive(Debug, Clone, Default)]
pub struct MapSource {
    values: BTreeMap<String, String>,
}

impl MapSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapSource {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl ConfigSource for MapSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// TOML file source. Nested tables are flattened into dotted keys, so
///
/// ```toml
/// [carriers.gls.production]
/// guid = "..."
/// ```
///
/// answers `carriers.gls.production.guid`. Top-level keys (including legacy
/// `GLS_GUID`-style names) are available as-is.
#[derive(Debug, Clone, Default)]
pub struct TomlSource {
    values: BTreeMap<String, String>,
}

impl TomlSource {
    /// Load from a file. A missing file yields an empty source.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        content
            .parse()
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::str::FromStr for TomlSource {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(content).context("invalid TOML")?;
        let mut values = BTreeMap::new();
        flatten("", &table, &mut values);
        Ok(Self { values })
    }
}

fn flatten(prefix: &str, table: &toml::Table, out: &mut BTreeMap<String, String>) {
    for (key, value) in table {
        let full = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };

        match value {
            toml::Value::Table(inner) => flatten(&full, inner, out),
            toml::Value::String(s) => {
                out.insert(full, s.clone());
            }
            toml::Value::Integer(i) => {
                out.insert(full, i.to_string());
            }
            toml::Value::Float(f) => {
                out.insert(full, f.to_string());
            }
            toml::Value::Boolean(b) => {
                out.insert(full, b.to_string());
            }
            toml::Value::Datetime(d) => {
                out.insert(full, d.to_string());
            }
            toml::Value::Array(_) => {}
        }
    }
}

impl ConfigSource for TomlSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Environment variable source.
///
/// A key is mapped to a variable name by uppercasing it and replacing `.`
/// and `-` with `_`, then prepending `<prefix>_` when a prefix is set:
/// with prefix `CONSIGN`, `carriers.gls.production.guid` reads
/// `CONSIGN_CARRIERS_GLS_PRODUCTION_GUID`.
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    prefix: String,
}

impl EnvSource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn var_name(&self, key: &str) -> String {
        let name: String = key
            .chars()
            .map(|c| match c {
                '.' | '-' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();

        if self.prefix.is_empty() {
            name
        } else {
            format!("{}_{}", self.prefix, name)
        }
    }
}

impl ConfigSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(self.var_name(key)).ok()
    }
}

/// Sources consulted in order; the first non-blank answer wins.
#[derive(Clone, Default)]
pub struct Layered {
    layers: Vec<Arc<dyn ConfigSource>>,
}

impl Layered {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: impl ConfigSource + 'static) -> Self {
        self.layers.push(Arc::new(source));
        self
    }

    pub fn push(&mut self, source: Arc<dyn ConfigSource>) {
        self.layers.push(source);
    }
}

impl ConfigSource for Layered {
    fn get(&self, key: &str) -> Option<String> {
        self.layers
            .iter()
            .filter_map(|layer| layer.get(key))
            .find(|value| !value.trim().is_empty())
    }
}
