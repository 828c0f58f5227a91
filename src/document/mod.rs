//! # Canonical Document
//!
//! The serialization-ready declarative configuration the reconciler pushes to (or diffs
//! against) the gateway. It is an isomorphic projection of the desired-state tree in the
//! gateway's declarative file format (`_format_version` 1.1).
//!
//! Beyond structure, a rendered document carries one invariant: every same-type sibling
//! collection is sorted by its natural key. Struct fields serialize in declaration order
//! and configuration maps in key order, so two renders of the same logical state are
//! byte-identical. The fingerprint and every text-level diff depend on that.
//!
//! The same types are used to parse the gateway's live state in diff-apply mode.

pub mod resolve;

pub use resolve::RenderContext;

use serde::{Deserialize, Serialize};

use crate::state::{
    BasicAuth, CaCertificate, Consumer, HmacAuth, JwtAuth, KeyAuth, Oauth2Credential, Plugin,
    Route, Service, Target, Upstream,
};

/// Declarative format version understood by the gateway
pub const FORMAT_VERSION: &str = "1.1";

/// Root of the canonical document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_format_version", default = "default_format_version")]
    pub format_version: String,
    /// Metadata block. Only ever carries selector tags, and is never sent to the bulk
    /// endpoint, which rejects it.
    #[serde(rename = "_info", default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Info>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceEntry>,
    /// Routes without a parent service. Rendering never produces these; dumps may.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upstreams: Vec<UpstreamEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub certificates: Vec<CertificateEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ca_certificates: Vec<CaCertificate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<Plugin>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumers: Vec<ConsumerEntry>,
}

fn default_format_version() -> String {
    FORMAT_VERSION.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub select_tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceEntry {
    #[serde(flatten)]
    pub service: Service,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<Plugin>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteEntry {
    #[serde(flatten)]
    pub route: Route,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<Plugin>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamEntry {
    #[serde(flatten)]
    pub upstream: Upstream,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<Target>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sni {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CertificateEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub snis: Vec<Sni>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsumerEntry {
    #[serde(flatten)]
    pub consumer: Consumer,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<Plugin>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keyauth_credentials: Vec<KeyAuth>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hmacauth_credentials: Vec<HmacAuth>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub basicauth_credentials: Vec<BasicAuth>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jwt_secrets: Vec<JwtAuth>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub oauth2_credentials: Vec<Oauth2Credential>,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            format_version: default_format_version(),
            info: None,
            services: Vec::new(),
            routes: Vec::new(),
            upstreams: Vec::new(),
            certificates: Vec::new(),
            ca_certificates: Vec::new(),
            plugins: Vec::new(),
            consumers: Vec::new(),
        }
    }
}

impl Document {
    /// Selector tags carried in the metadata block, if any
    pub fn select_tags(&self) -> &[String] {
        self.info
            .as_ref()
            .map(|info| info.select_tags.as_slice())
            .unwrap_or_default()
    }

    /// Visit every plugin in the document, wherever it is attached
    pub fn for_each_plugin_mut<F: FnMut(&mut Plugin)>(&mut self, mut visit: F) {
        for service in &mut self.services {
            service.plugins.iter_mut().for_each(&mut visit);
            for route in &mut service.routes {
                route.plugins.iter_mut().for_each(&mut visit);
            }
        }
        for route in &mut self.routes {
            route.plugins.iter_mut().for_each(&mut visit);
        }
        for consumer in &mut self.consumers {
            consumer.plugins.iter_mut().for_each(&mut visit);
        }
        self.plugins.iter_mut().for_each(&mut visit);
    }

    /// Drop every `null` entry from plugin configurations. The bulk endpoint rejects
    /// explicit nulls, which schema defaults may have introduced.
    pub fn strip_plugin_config_nulls(&mut self) {
        self.for_each_plugin_mut(|plugin| {
            if let Some(config) = plugin.config.as_mut() {
                config.retain(|_, value| !value.is_null());
            }
        });
    }
}
