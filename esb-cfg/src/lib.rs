//! Runtime knobs for `esb` itself.
//!
//! These tune the orchestrator (debounce windows, thresholds, where to find external tools).
//! They are _not_ part of a project's build configuration, for that see `esb_types::BuildConfig`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use compact_str::{CompactString, ToCompactString};

/// Prefix for environment variables that override a [`Config`], e.g. `ESB_WATCH_DEBOUNCE`.
pub static ENV_PREFIX: &str = "ESB_";

/// A single configuration setting.
pub struct Config<V: ConfigType> {
    name: &'static str,
    desc: &'static str,
    default: V,
}

impl<V: ConfigType> Config<V> {
    /// Define a new [`Config`] with a default value.
    pub const fn new(name: &'static str, desc: &'static str, default: V) -> Self {
        Config {
            name,
            desc,
            default,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Read the value of this [`Config`] from the provided [`ConfigSet`].
    ///
    /// # Panics
    /// * If this [`Config`] was never registered with the [`ConfigSetBuilder`].
    pub fn read(&self, set: &ConfigSet) -> V::Owned {
        let Some(entry) = set.configs.get(self.name) else {
            panic!("tried to read unregistered config {}", self.name);
        };
        let value = entry.value.read().expect("ConfigSetEntry lock poisoned");
        V::from_value(&value)
    }
}

/// A thread-safe shareable set of [`Config`]s.
#[derive(Clone, Debug)]
pub struct ConfigSet {
    configs: Arc<BTreeMap<CompactString, ConfigSetEntry>>,
}

impl ConfigSet {
    /// Returns a new [`ConfigSetBuilder`].
    pub fn builder() -> ConfigSetBuilder {
        ConfigSetBuilder::default()
    }

    /// Update [`Config`] in this [`ConfigSet`] with the specified value.
    ///
    /// # Panics
    /// * If [`Config`] was not previously registered with the original [`ConfigSetBuilder`].
    pub fn update<V: ConfigType>(&self, config: &'static Config<V>, value: V) {
        let entry = self
            .configs
            .get(config.name)
            .expect("tried to update unregistered config");
        *entry.value.write().expect("ConfigSetEntry lock poisoned") = value.to_value();
    }

    /// Update the [`Config`] named `name` by parsing `value`.
    ///
    /// # Errors
    ///
    /// * If no config named `name` exists in this set.
    /// * If the config specified by `name` cannot parse `value`.
    ///
    pub fn try_update(&self, name: &str, value: &str) -> Result<(), anyhow::Error> {
        let entry = self
            .configs
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("no Config named '{name}' found"))?;
        let mut current = entry.value.write().expect("ConfigSetEntry lock poisoned");
        *current = current.parse_same_kind(value)?;
        Ok(())
    }

    /// Apply overrides from `ESB_<NAME>` environment variables.
    ///
    /// Values that fail to parse are logged and skipped.
    pub fn apply_env(&self) {
        self.apply_overrides(std::env::vars())
    }

    /// Apply overrides from `(ENV_NAME, value)` pairs, see [`ConfigSet::apply_env`].
    pub fn apply_overrides<I, K, V>(&self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let name = name.to_ascii_lowercase();
            if !self.configs.contains_key(name.as_str()) {
                continue;
            }
            match self.try_update(&name, value.as_ref()) {
                Ok(()) => tracing::debug!(%name, value = value.as_ref(), "config overridden"),
                Err(err) => tracing::warn!(%name, %err, "ignoring invalid config override"),
            }
        }
    }
}

impl fmt::Display for ConfigSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, entry) in &*self.configs {
            let value = entry.value.read().expect("ConfigSetEntry lock poisoned");
            writeln!(f, "{name} => {value}\n\t└─ '{}'", entry.desc)?;
        }
        Ok(())
    }
}

/// Single entry within a [`ConfigSet`].
#[derive(Clone, Debug)]
struct ConfigSetEntry {
    value: Arc<RwLock<ConfigValue>>,
    desc: &'static str,
}

/// A builder for a [`ConfigSet`].
#[derive(Default, Debug)]
pub struct ConfigSetBuilder {
    configs: BTreeMap<CompactString, (ConfigValue, &'static str)>,
}

impl ConfigSetBuilder {
    /// Register a [`Config`] into this [`ConfigSetBuilder`] with its default value.
    ///
    /// # Panics
    /// * If a [`Config`] with the same name was already registered.
    pub fn register<V: ConfigType>(&mut self, config: &'static Config<V>) -> &mut Self {
        let prev = self.configs.insert(
            CompactString::const_new(config.name),
            (config.default.to_value(), config.desc),
        );
        if prev.is_some() {
            panic!("config '{}' registered more than once", config.name);
        }
        self
    }

    /// Consumes this [`ConfigSetBuilder`] constructing a [`ConfigSet`].
    pub fn build(self) -> ConfigSet {
        let configs = self
            .configs
            .into_iter()
            .map(|(name, (value, desc))| {
                let entry = ConfigSetEntry {
                    value: Arc::new(RwLock::new(value)),
                    desc,
                };
                (name, entry)
            })
            .collect();
        ConfigSet {
            configs: Arc::new(configs),
        }
    }
}

/// Types that can be the value of a [`Config`].
pub trait ConfigType {
    /// The type handed back when reading a [`Config`].
    type Owned;

    fn to_value(&self) -> ConfigValue;
    fn from_value(val: &ConfigValue) -> Self::Owned;
}

impl ConfigType for bool {
    type Owned = bool;

    fn to_value(&self) -> ConfigValue {
        ConfigValue::Bool(*self)
    }

    fn from_value(val: &ConfigValue) -> bool {
        let ConfigValue::Bool(val) = val else {
            panic!("programming error, found {val:?} for bool")
        };
        *val
    }
}

impl ConfigType for u64 {
    type Owned = u64;

    fn to_value(&self) -> ConfigValue {
        ConfigValue::U64(*self)
    }

    fn from_value(val: &ConfigValue) -> u64 {
        let ConfigValue::U64(val) = val else {
            panic!("programming error, found {val:?} for u64")
        };
        *val
    }
}

impl ConfigType for Duration {
    type Owned = Duration;

    fn to_value(&self) -> ConfigValue {
        ConfigValue::Duration(*self)
    }

    fn from_value(val: &ConfigValue) -> Duration {
        let ConfigValue::Duration(val) = val else {
            panic!("programming error, found {val:?} for Duration")
        };
        *val
    }
}

impl ConfigType for &'static str {
    type Owned = CompactString;

    fn to_value(&self) -> ConfigValue {
        ConfigValue::String(CompactString::const_new(*self))
    }

    fn from_value(val: &ConfigValue) -> CompactString {
        let ConfigValue::String(val) = val else {
            panic!("programming error, found {val:?} for string")
        };
        val.clone()
    }
}

/// "Type erased" configuration values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigValue {
    Bool(bool),
    U64(u64),
    Duration(Duration),
    String(CompactString),
}

impl ConfigValue {
    /// Parse `raw` into a value of the same kind as `self`.
    fn parse_same_kind(&self, raw: &str) -> Result<ConfigValue, anyhow::Error> {
        let value = match self {
            ConfigValue::Bool(_) => ConfigValue::Bool(raw.trim().parse()?),
            ConfigValue::U64(_) => ConfigValue::U64(raw.trim().parse()?),
            ConfigValue::Duration(_) => ConfigValue::Duration(parse_duration(raw)?),
            ConfigValue::String(_) => ConfigValue::String(raw.to_compact_string()),
        };
        Ok(value)
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(val) => write!(f, "{val}"),
            ConfigValue::U64(val) => write!(f, "{val}"),
            ConfigValue::Duration(val) => write!(f, "{}ms", val.as_millis()),
            ConfigValue::String(val) => write!(f, "{val}"),
        }
    }
}

/// Parses `"250ms"`, `"2s"`, or a bare number of milliseconds.
fn parse_duration(raw: &str) -> Result<Duration, anyhow::Error> {
    let raw = raw.trim();
    if let Some(ms) = raw.strip_suffix("ms") {
        return Ok(Duration::from_millis(ms.trim().parse()?));
    }
    if let Some(secs) = raw.strip_suffix('s') {
        return Ok(Duration::from_secs(secs.trim().parse()?));
    }
    Ok(Duration::from_millis(raw.parse()?))
}

#[cfg(test)]
mod test {
    use super::*;

    static TEST_FLAG: Config<bool> = Config::new("test_flag", "A test configuration value.", true);
    static TEST_LIMIT: Config<u64> = Config::new("test_limit", "A test limit.", 100);
    static TEST_DELAY: Config<Duration> =
        Config::new("test_delay", "A test delay.", Duration::from_secs(1));
    static TEST_BIN: Config<&'static str> = Config::new("test_bin", "A test binary.", "tsc");

    fn test_set() -> ConfigSet {
        let mut builder = ConfigSet::builder();
        builder
            .register(&TEST_FLAG)
            .register(&TEST_LIMIT)
            .register(&TEST_DELAY)
            .register(&TEST_BIN);
        builder.build()
    }

    #[test]
    fn smoketest_read() {
        let set = test_set();
        assert!(TEST_FLAG.read(&set));
        assert_eq!(TEST_LIMIT.read(&set), 100);
        assert_eq!(TEST_DELAY.read(&set), Duration::from_secs(1));
        assert_eq!(TEST_BIN.read(&set), "tsc");
    }

    #[test]
    fn updates_are_shared_between_clones() {
        let set = test_set();
        let set_2 = set.clone();

        set.update(&TEST_LIMIT, 5);
        assert_eq!(TEST_LIMIT.read(&set_2), 5);
    }

    #[test]
    fn env_overrides() {
        let set = test_set();
        set.apply_overrides([
            ("ESB_TEST_DELAY", "250ms"),
            ("ESB_TEST_LIMIT", "not a number"),
            ("ESB_TEST_BIN", "/opt/bin/tsc"),
            ("UNRELATED", "1"),
        ]);

        assert_eq!(TEST_DELAY.read(&set), Duration::from_millis(250));
        assert_eq!(TEST_LIMIT.read(&set), 100);
        assert_eq!(TEST_BIN.read(&set), "/opt/bin/tsc");
    }

    #[test]
    fn try_update_unknown() {
        let set = test_set();
        assert!(set.try_update("nope", "1").is_err());
        set.try_update("test_flag", "false").unwrap();
        assert!(!TEST_FLAG.read(&set));
    }
}
