use std::collections::HashMap;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub manager: RawManager,
    pub command: RawCommand,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawManager {
    pub max_procs: Option<usize>,
    pub synchronized: Option<bool>,
    pub track_groups: Option<bool>,
    pub environment: Option<HashMap<String, String>>,
    pub remote: Option<RawRemote>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawRemote {
    pub host: String,
    pub user: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawCommand {
    pub cmds: Vec<Vec<String>>,
    pub parallel: Option<bool>,
    pub continue_on_error: Option<bool>,
    pub ignore_error: Option<bool>,
    pub background: Option<bool>,
    pub directory: Option<String>,
    pub environment: Option<HashMap<String, String>>,
    pub sudo: Option<bool>,
    pub sudo_user: Option<String>,
    pub tags: Option<Vec<String>>,
    pub timeout_secs: Option<u64>,
    pub implementation: Option<RawImplementation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum RawImplementation {
    Basic,
    Blocking,
}
