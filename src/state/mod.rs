//! # Desired State
//!
//! The in-memory model of what the gateway configuration should be. It is built
//! upstream (from Kubernetes resources) and handed to the reconciler as an input; the
//! reconciler never mutates it, so the same snapshot can be rendered any number of times.
//!
//! Ownership is tree-shaped: services own routes, upstreams own targets, consumers own
//! their credentials. Plugins hang off services, routes and consumers, and may also sit
//! at the top level carrying a consumer/route/service reference. Those references are
//! back-pointers by id, not ownership.

pub mod entities;

pub use entities::{
    BasicAuth, CaCertificate, Certificate, Configuration, Consumer, EntityRef, HmacAuth,
    JwtAuth, KeyAuth, Oauth2Credential, Plugin, Route, Service, Target, Upstream,
};

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::error::{ReconcileError, ReconcileResult};

/// Root of the desired-state tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    #[serde(default)]
    pub services: Vec<ServiceNode>,
    #[serde(default)]
    pub upstreams: Vec<UpstreamNode>,
    #[serde(default)]
    pub certificates: Vec<Certificate>,
    #[serde(default)]
    pub ca_certificates: Vec<CaCertificate>,
    /// Global plugins, or plugins scoped by reference
    #[serde(default)]
    pub plugins: Vec<Plugin>,
    #[serde(default)]
    pub consumers: Vec<ConsumerNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceNode {
    #[serde(flatten)]
    pub service: Service,
    #[serde(default)]
    pub routes: Vec<RouteNode>,
    #[serde(default)]
    pub plugins: Vec<Plugin>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteNode {
    #[serde(flatten)]
    pub route: Route,
    #[serde(default)]
    pub plugins: Vec<Plugin>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamNode {
    #[serde(flatten)]
    pub upstream: Upstream,
    #[serde(default)]
    pub targets: Vec<Target>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsumerNode {
    #[serde(flatten)]
    pub consumer: Consumer,
    #[serde(default)]
    pub plugins: Vec<Plugin>,
    #[serde(default)]
    pub key_auths: Vec<KeyAuth>,
    #[serde(default)]
    pub hmac_auths: Vec<HmacAuth>,
    #[serde(default)]
    pub basic_auths: Vec<BasicAuth>,
    #[serde(default)]
    pub jwt_auths: Vec<JwtAuth>,
    #[serde(default)]
    pub oauth2_creds: Vec<Oauth2Credential>,
}

impl DesiredState {
    /// Load a desired-state snapshot from a YAML or JSON file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> ReconcileResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            ReconcileError::stage(format!("reading desired state {}", path.display()), e.into())
        })?;

        let state = if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };
        Ok(state)
    }
}
