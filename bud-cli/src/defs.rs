use std::time::Duration;

use bud_cfg::{Config, ConfigSet};

pub static BUILD_FILENAME: Config<&'static str> = Config::new(
    "build_filename",
    "Name of the build description, relative to the project root.",
    "Bud.toml",
);

pub static CALMING_PERIOD: Config<Duration> = Config::new(
    "calming_period",
    "How long sources have to stay unchanged before they are built again.",
    Duration::from_millis(300),
);

pub static WATCH: Config<bool> = Config::new(
    "watch",
    "Keep printing every observation of stream commands, as if --watch was passed.",
    false,
);

/// Every config `bud` knows about, at their defaults.
pub fn all() -> ConfigSet {
    let mut builder = ConfigSet::builder();
    builder
        .register(&BUILD_FILENAME)
        .register(&CALMING_PERIOD)
        .register(&WATCH);
    builder.build()
}
