//! Single place for registering every [`Config`] of the tool.
//!
//! [`Config`]: esb_cfg::Config

use esb_cfg::{ConfigSet, ConfigSetBuilder};

pub fn all_cfgs(builder: &mut ConfigSetBuilder) {
    crate::register_configs(builder);
    esb_watch::register_configs(builder);
    esb_check::register_configs(builder);
}

/// A [`ConfigSet`] with every config registered and `ESB_*` overrides from the environment
/// applied.
pub fn from_env() -> ConfigSet {
    let mut builder = ConfigSet::builder();
    all_cfgs(&mut builder);
    let configs = builder.build();
    configs.apply_env();
    configs
}
