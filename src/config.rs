//! Configuration (spec §6) with default/user-override merge semantics.

use std::collections::HashMap;

/// Fully resolved configuration used to construct an `Instance`.
#[derive(Clone, Debug)]
pub struct Config {
    pub name: String,
    pub token: String,
    pub endpoint: String,
    pub insecure: bool,
    pub passthrough: bool,
    pub autocapture: bool,
    pub noop: bool,
    pub attributes: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "backend".to_string(),
            token: String::new(),
            endpoint: "ingress.vigilant.run".to_string(),
            insecure: false,
            passthrough: true,
            autocapture: true,
            noop: false,
            attributes: HashMap::new(),
        }
    }
}

impl Config {
    /// `https://<endpoint>/api/message`, or `http://` when `insecure`.
    pub fn ingest_url(&self) -> String {
        let scheme = if self.insecure { "http" } else { "https" };
        format!("{scheme}://{}/api/message", self.endpoint)
    }
}

/// User-supplied overrides; every field but `name`/`token` is optional and
/// falls back to `Config::default()` when absent (spec §6).
#[derive(Clone, Debug, Default)]
#[must_use = "builders do nothing unless you call .build()"]
pub struct ConfigBuilder {
    name: Option<String>,
    token: Option<String>,
    endpoint: Option<String>,
    insecure: Option<bool>,
    passthrough: Option<bool>,
    autocapture: Option<bool>,
    noop: Option<bool>,
    attributes: HashMap<String, String>,
}

impl ConfigBuilder {
    pub fn new(name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            token: Some(token.into()),
            ..Default::default()
        }
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = Some(insecure);
        self
    }

    pub fn passthrough(mut self, passthrough: bool) -> Self {
        self.passthrough = Some(passthrough);
        self
    }

    pub fn autocapture(mut self, autocapture: bool) -> Self {
        self.autocapture = Some(autocapture);
        self
    }

    pub fn noop(mut self, noop: bool) -> Self {
        self.noop = Some(noop);
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Merge these overrides over `Config::default()`, matching
    /// `original_source/vigilant/instance.py::_merge_config`: only fields
    /// the user actually set replace the default.
    pub fn build(self) -> Config {
        let defaults = Config::default();
        Config {
            name: self.name.unwrap_or(defaults.name),
            token: self.token.unwrap_or(defaults.token),
            endpoint: self.endpoint.unwrap_or(defaults.endpoint),
            insecure: self.insecure.unwrap_or(defaults.insecure),
            passthrough: self.passthrough.unwrap_or(defaults.passthrough),
            autocapture: self.autocapture.unwrap_or(defaults.autocapture),
            noop: self.noop.unwrap_or(defaults.noop),
            attributes: self.attributes,
        }
    }
}
