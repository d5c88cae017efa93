//! Configuration flags for `bud` itself.
//!
//! These tune the tool (e.g. how long to wait for the filesystem to calm down), they are _not_
//! how a build description configures its projects, that's the key space in `bud-core`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{
    Arc, PoisonError, RwLock,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use std::time::Duration;

use anyhow::Context;
use bud_ore::assert_none;
use compact_str::CompactString;

/// A single configuration flag, declared as a `static`.
pub struct Config<V: ConfigDefault> {
    name: &'static str,
    desc: &'static str,
    default: V,
}

impl<V: ConfigDefault> Config<V> {
    /// Declare a new [`Config`] with a default value.
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

    /// Read the current value of this [`Config`] from `set`.
    ///
    /// # Panics
    /// * If this [`Config`] was never registered with the [`ConfigSetBuilder`] of `set`.
    pub fn read(&self, set: &ConfigSet) -> V::StoredValue {
        let Some(entry) = set.configs.get(self.name) else {
            panic!("tried to read unregistered config {}", self.name);
        };
        V::from_shared(&entry.value)
    }
}

/// A thread-safe, cheaply cloneable set of [`Config`]s.
///
/// Clones share values, an update through one clone is observed by all of them.
#[derive(Clone, Debug)]
pub struct ConfigSet {
    configs: Arc<BTreeMap<CompactString, ConfigSetEntry>>,
}

impl ConfigSet {
    pub fn builder() -> ConfigSetBuilder {
        ConfigSetBuilder::default()
    }

    /// Update `config` in this set to `value`.
    ///
    /// # Panics
    /// * If `config` was not registered with the original [`ConfigSetBuilder`].
    pub fn update<V: ConfigDefault>(&self, config: &'static Config<V>, value: V) {
        let Some(entry) = self.configs.get(config.name) else {
            panic!("tried to update unregistered config {}", config.name);
        };
        entry.value.store(value.to_stored().into_dyn());
    }

    /// Update the config named `name` by parsing `value`.
    ///
    /// # Errors
    /// * If no config named `name` exists in this set.
    /// * If the config named `name` can't parse `value`.
    pub fn try_update(&self, name: &str, value: &str) -> Result<(), anyhow::Error> {
        let entry = self
            .configs
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("no config named '{name}'"))?;
        entry
            .value
            .store_parsed(value)
            .with_context(|| format!("invalid value '{value}' for config '{name}'"))
    }

    /// Apply overrides from `BUD_<NAME>` environment variables, e.g. `BUD_CALMING_PERIOD=50`.
    pub fn apply_env(&self) -> Result<(), anyhow::Error> {
        for name in self.configs.keys() {
            let var = bud_ore::env::config_var(name);
            if let Ok(value) = std::env::var(&var) {
                self.try_update(name, &value)
                    .with_context(|| format!("from environment variable {var}"))?;
            }
        }
        Ok(())
    }

    /// Names of every registered config, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.configs.keys().map(|name| name.as_str())
    }
}

impl fmt::Display for ConfigSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, entry) in &*self.configs {
            writeln!(f, "{name} = {}\n\t└─ {}", entry.value, entry.desc)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct ConfigSetEntry {
    value: SharedConfigValue,
    desc: &'static str,
}

/// A builder for a [`ConfigSet`].
#[derive(Default, Debug)]
pub struct ConfigSetBuilder {
    configs: BTreeMap<CompactString, (DynConfigValue, &'static str)>,
}

impl ConfigSetBuilder {
    /// Register `config` with its default value.
    ///
    /// # Panics
    /// * If a config with the same name was already registered.
    pub fn register<V: ConfigDefault>(&mut self, config: &'static Config<V>) -> &mut Self {
        let value = config.default.to_stored().into_dyn();
        let prev = self
            .configs
            .insert(CompactString::const_new(config.name), (value, config.desc));
        assert_none!(prev, "config '{}' registered more than once", config.name);
        self
    }

    pub fn build(self) -> ConfigSet {
        let configs = self
            .configs
            .into_iter()
            .map(|(name, (value, desc))| {
                let entry = ConfigSetEntry {
                    value: value.into_shared(),
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

/// Types that can be used as the default of a [`Config`].
pub trait ConfigDefault {
    /// What gets handed back from [`Config::read`].
    type StoredValue: ConfigValue;

    fn to_stored(&self) -> Self::StoredValue;
    fn from_shared(val: &SharedConfigValue) -> Self::StoredValue;
}

impl ConfigDefault for bool {
    type StoredValue = bool;

    fn to_stored(&self) -> bool {
        *self
    }

    fn from_shared(val: &SharedConfigValue) -> bool {
        let SharedConfigValue::Bool(val) = val else {
            panic!("config holds {val:?}, expected a bool")
        };
        val.load(Ordering::SeqCst)
    }
}

impl ConfigDefault for u64 {
    type StoredValue = u64;

    fn to_stored(&self) -> u64 {
        *self
    }

    fn from_shared(val: &SharedConfigValue) -> u64 {
        let SharedConfigValue::U64(val) = val else {
            panic!("config holds {val:?}, expected a u64")
        };
        val.load(Ordering::SeqCst)
    }
}

impl ConfigDefault for &str {
    type StoredValue = CompactString;

    fn to_stored(&self) -> CompactString {
        CompactString::new(self)
    }

    fn from_shared(val: &SharedConfigValue) -> CompactString {
        let SharedConfigValue::String(val) = val else {
            panic!("config holds {val:?}, expected a string")
        };
        val.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl ConfigDefault for Duration {
    type StoredValue = Duration;

    fn to_stored(&self) -> Duration {
        *self
    }

    fn from_shared(val: &SharedConfigValue) -> Duration {
        let SharedConfigValue::Millis(val) = val else {
            panic!("config holds {val:?}, expected a duration")
        };
        Duration::from_millis(val.load(Ordering::SeqCst))
    }
}

pub trait ConfigValue {
    fn into_dyn(self) -> DynConfigValue;
}

impl ConfigValue for bool {
    fn into_dyn(self) -> DynConfigValue {
        DynConfigValue::Bool(self)
    }
}

impl ConfigValue for u64 {
    fn into_dyn(self) -> DynConfigValue {
        DynConfigValue::U64(self)
    }
}

impl ConfigValue for CompactString {
    fn into_dyn(self) -> DynConfigValue {
        DynConfigValue::String(self)
    }
}

impl ConfigValue for Duration {
    fn into_dyn(self) -> DynConfigValue {
        let millis = u64::try_from(self.as_millis()).unwrap_or(u64::MAX);
        DynConfigValue::Millis(millis)
    }
}

/// "Type erased" configuration value.
#[derive(Debug)]
pub enum DynConfigValue {
    Bool(bool),
    U64(u64),
    String(CompactString),
    /// A [`Duration`] with millisecond precision.
    Millis(u64),
}

impl DynConfigValue {
    fn into_shared(self) -> SharedConfigValue {
        match self {
            DynConfigValue::Bool(val) => SharedConfigValue::Bool(Arc::new(AtomicBool::new(val))),
            DynConfigValue::U64(val) => SharedConfigValue::U64(Arc::new(AtomicU64::new(val))),
            DynConfigValue::String(val) => SharedConfigValue::String(Arc::new(RwLock::new(val))),
            DynConfigValue::Millis(val) => SharedConfigValue::Millis(Arc::new(AtomicU64::new(val))),
        }
    }
}

/// Shareable, updatable, [`DynConfigValue`].
#[derive(Clone, Debug)]
pub enum SharedConfigValue {
    Bool(Arc<AtomicBool>),
    U64(Arc<AtomicU64>),
    String(Arc<RwLock<CompactString>>),
    Millis(Arc<AtomicU64>),
}

impl SharedConfigValue {
    fn store(&self, value: DynConfigValue) {
        match (self, value) {
            (SharedConfigValue::Bool(shared), DynConfigValue::Bool(val)) => {
                shared.store(val, Ordering::SeqCst);
            }
            (SharedConfigValue::U64(shared), DynConfigValue::U64(val))
            | (SharedConfigValue::Millis(shared), DynConfigValue::Millis(val)) => {
                shared.store(val, Ordering::SeqCst);
            }
            (SharedConfigValue::String(shared), DynConfigValue::String(val)) => {
                *shared.write().unwrap_or_else(PoisonError::into_inner) = val;
            }
            (shared, val) => unreachable!("config holding {shared:?} updated with {val:?}"),
        }
    }

    fn store_parsed(&self, value: &str) -> Result<(), anyhow::Error> {
        let value = value.trim();
        let parsed = match self {
            SharedConfigValue::Bool(_) => DynConfigValue::Bool(value.parse()?),
            SharedConfigValue::U64(_) => DynConfigValue::U64(value.parse()?),
            SharedConfigValue::String(_) => DynConfigValue::String(CompactString::new(value)),
            SharedConfigValue::Millis(_) => DynConfigValue::Millis(parse_millis(value)?),
        };
        self.store(parsed);
        Ok(())
    }
}

/// Parses `250`, `250ms`, or `2s` into milliseconds.
fn parse_millis(value: &str) -> Result<u64, anyhow::Error> {
    if let Some(millis) = value.strip_suffix("ms") {
        Ok(millis.trim().parse()?)
    } else if let Some(secs) = value.strip_suffix('s') {
        let secs: u64 = secs.trim().parse()?;
        secs.checked_mul(1000)
            .ok_or_else(|| anyhow::anyhow!("{secs}s is too long"))
    } else {
        Ok(value.parse()?)
    }
}

impl fmt::Display for SharedConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SharedConfigValue::Bool(val) => write!(f, "{}", val.load(Ordering::SeqCst)),
            SharedConfigValue::U64(val) => write!(f, "{}", val.load(Ordering::SeqCst)),
            SharedConfigValue::String(val) => {
                let val = val.read().unwrap_or_else(PoisonError::into_inner);
                write!(f, "{}", *val)
            }
            SharedConfigValue::Millis(val) => write!(f, "{}ms", val.load(Ordering::SeqCst)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    static TEST_FLAG: Config<bool> = Config::new("test_flag", "A test flag.", true);
    static TEST_NAME: Config<&'static str> = Config::new("test_name", "A test name.", "Bud.toml");
    static TEST_PERIOD: Config<Duration> =
        Config::new("test_period", "A test period.", Duration::from_millis(300));

    fn test_set() -> ConfigSet {
        let mut builder = ConfigSet::builder();
        builder
            .register(&TEST_FLAG)
            .register(&TEST_NAME)
            .register(&TEST_PERIOD);
        builder.build()
    }

    #[test]
    fn reads_defaults() {
        let set = test_set();
        assert!(TEST_FLAG.read(&set));
        assert_eq!(TEST_NAME.read(&set), "Bud.toml");
        assert_eq!(TEST_PERIOD.read(&set), Duration::from_millis(300));
    }

    #[test]
    fn updates_are_shared_between_clones() {
        let set = test_set();
        let set_2 = set.clone();

        set.update(&TEST_FLAG, false);
        assert!(!TEST_FLAG.read(&set_2));

        set.update(&TEST_PERIOD, Duration::from_secs(1));
        assert_eq!(TEST_PERIOD.read(&set_2), Duration::from_millis(1000));
    }

    #[test]
    fn parses_updates() {
        let set = test_set();

        set.try_update("test_flag", "false").unwrap();
        assert!(!TEST_FLAG.read(&set));

        set.try_update("test_name", "Other.toml").unwrap();
        assert_eq!(TEST_NAME.read(&set), "Other.toml");

        set.try_update("test_period", "50").unwrap();
        assert_eq!(TEST_PERIOD.read(&set), Duration::from_millis(50));
        set.try_update("test_period", "75ms").unwrap();
        assert_eq!(TEST_PERIOD.read(&set), Duration::from_millis(75));
        set.try_update("test_period", "2s").unwrap();
        assert_eq!(TEST_PERIOD.read(&set), Duration::from_secs(2));
    }

    #[test]
    fn parse_errors_name_the_config() {
        let set = test_set();
        let err = set.try_update("test_flag", "maybe").unwrap_err();
        assert!(err.to_string().contains("test_flag"));
        assert!(set.try_update("not_a_config", "1").is_err());
    }

    #[test]
    #[should_panic(expected = "registered more than once")]
    fn double_registration_panics() {
        let mut builder = ConfigSet::builder();
        builder.register(&TEST_FLAG).register(&TEST_FLAG);
    }
}
