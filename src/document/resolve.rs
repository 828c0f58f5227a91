//! Rendering a target document against the gateway's current state.
//!
//! In diff-apply mode the rendered document is turned into a target state a second
//! time, now with the live state at hand. Entities keep the ids the gateway already
//! assigned, selector tags are stamped on every owned entity so the next scoped dump
//! finds them, and fields the target gateway version does not know are dropped.

use semver::Version;
use std::collections::{HashMap, HashSet};

use super::{Document, RouteEntry};
use crate::core::error::{ReconcileError, ReconcileResult};
use crate::state::Plugin;

/// Gateways before this version have no route `path_handling` field
const PATH_HANDLING_MIN_VERSION: Version = Version::new(2, 0, 0);

/// Inputs of the second render
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    /// Live state parsed from the gateway dump
    pub current: &'a Document,
    /// Version of the target gateway, when known
    pub gateway_version: Option<&'a Version>,
}

impl Document {
    /// Check the typed-state invariant: natural keys are unique within a collection
    pub fn ensure_unique_keys(&self) -> ReconcileResult<()> {
        ensure_unique("service", self.services.iter().map(|s| s.service.name.as_deref()))?;
        ensure_unique("route", self.all_routes().map(|r| r.route.name.as_deref()))?;
        ensure_unique("upstream", self.upstreams.iter().map(|u| u.upstream.name.as_deref()))?;
        ensure_unique("consumer", self.consumers.iter().map(|c| c.consumer.username.as_deref()))?;
        Ok(())
    }

    /// Produce the target state for a diff against `context.current`
    pub fn resolve_against(&self, context: &RenderContext<'_>) -> ReconcileResult<Document> {
        self.ensure_unique_keys()?;

        let mut target = self.clone();
        let select_tags = target.select_tags().to_vec();
        target.info = None;

        adopt_ids(&mut target, context.current);

        if !select_tags.is_empty() {
            stamp_tags(&mut target, &select_tags);
        }

        if let Some(version) = context.gateway_version {
            if *version < PATH_HANDLING_MIN_VERSION {
                for route in target.all_routes_mut() {
                    route.route.path_handling = None;
                }
            }
        }

        Ok(target)
    }

    fn all_routes(&self) -> impl Iterator<Item = &RouteEntry> {
        self.services
            .iter()
            .flat_map(|s| s.routes.iter())
            .chain(self.routes.iter())
    }

    fn all_routes_mut(&mut self) -> impl Iterator<Item = &mut RouteEntry> {
        self.services
            .iter_mut()
            .flat_map(|s| s.routes.iter_mut())
            .chain(self.routes.iter_mut())
    }
}

fn ensure_unique<'a>(
    kind: &str,
    keys: impl Iterator<Item = Option<&'a str>>,
) -> ReconcileResult<()> {
    let mut seen = HashSet::new();
    for key in keys.flatten() {
        if !seen.insert(key) {
            return Err(ReconcileError::state(format!(
                "{} '{}' is defined more than once",
                kind, key
            )));
        }
    }
    Ok(())
}

/// Index from natural key to the id the gateway assigned
fn id_index<'a, T: 'a>(
    items: impl Iterator<Item = &'a T>,
    key: impl Fn(&T) -> Option<String>,
    id: impl Fn(&T) -> Option<&String>,
) -> HashMap<String, String> {
    items
        .filter_map(|item| Some((key(item)?, id(item)?.clone())))
        .collect()
}

fn adopt(id: &mut Option<String>, key: Option<String>, index: &HashMap<String, String>) {
    if id.is_none() {
        if let Some(existing) = key.and_then(|k| index.get(&k)) {
            *id = Some(existing.clone());
        }
    }
}

/// Parent kinds share a name space in the index, so keys carry the kind
fn plugin_key(kind: &str, parent: Option<&str>, plugin: &Plugin) -> Option<String> {
    let name = plugin.name.as_deref()?;
    Some(format!("{}:{}/{}", kind, parent.unwrap_or_default(), name))
}

fn nested_plugin_ids(kind: &str, parent: Option<&str>, plugins: &[Plugin]) -> HashMap<String, String> {
    id_index(plugins.iter(), |p| plugin_key(kind, parent, p), |p| p.id.as_ref())
}

fn adopt_plugin_ids(
    kind: &str,
    parent: Option<&str>,
    plugins: &mut [Plugin],
    index: &HashMap<String, String>,
) {
    for plugin in plugins {
        let key = plugin_key(kind, parent, plugin);
        adopt(&mut plugin.id, key, index);
    }
}

fn adopt_ids(target: &mut Document, current: &Document) {
    let services = id_index(
        current.services.iter().map(|s| &s.service),
        |s| s.name.clone(),
        |s| s.id.as_ref(),
    );
    let routes = id_index(
        current.all_routes().map(|r| &r.route),
        |r| r.name.clone(),
        |r| r.id.as_ref(),
    );
    let upstreams = id_index(
        current.upstreams.iter().map(|u| &u.upstream),
        |u| u.name.clone(),
        |u| u.id.as_ref(),
    );
    let consumers = id_index(
        current.consumers.iter().map(|c| &c.consumer),
        |c| c.username.clone(),
        |c| c.id.as_ref(),
    );
    let certificates = id_index(current.certificates.iter(), |c| c.cert.clone(), |c| c.id.as_ref());
    let ca_certificates =
        id_index(current.ca_certificates.iter(), |c| c.cert.clone(), |c| c.id.as_ref());
    let global_plugins = id_index(
        current.plugins.iter(),
        |p| p.name.as_ref().map(|_| p.scoped_key()),
        |p| p.id.as_ref(),
    );

    let mut nested_plugins = HashMap::new();
    for service in &current.services {
        let parent = service.service.name.as_deref();
        nested_plugins.extend(nested_plugin_ids("service", parent, &service.plugins));
    }
    for route in current.all_routes() {
        let parent = route.route.name.as_deref();
        nested_plugins.extend(nested_plugin_ids("route", parent, &route.plugins));
    }
    for consumer in &current.consumers {
        let parent = consumer.consumer.username.as_deref();
        nested_plugins.extend(nested_plugin_ids("consumer", parent, &consumer.plugins));
    }

    for service in &mut target.services {
        adopt(&mut service.service.id, service.service.name.clone(), &services);
        let parent = service.service.name.as_deref();
        adopt_plugin_ids("service", parent, &mut service.plugins, &nested_plugins);
    }
    for route in target.all_routes_mut() {
        adopt(&mut route.route.id, route.route.name.clone(), &routes);
        let parent = route.route.name.as_deref();
        adopt_plugin_ids("route", parent, &mut route.plugins, &nested_plugins);
    }
    for upstream in &mut target.upstreams {
        adopt(&mut upstream.upstream.id, upstream.upstream.name.clone(), &upstreams);
    }
    for consumer in &mut target.consumers {
        adopt(&mut consumer.consumer.id, consumer.consumer.username.clone(), &consumers);
        let parent = consumer.consumer.username.as_deref();
        adopt_plugin_ids("consumer", parent, &mut consumer.plugins, &nested_plugins);
    }
    for certificate in &mut target.certificates {
        adopt(&mut certificate.id, certificate.cert.clone(), &certificates);
    }
    for ca_certificate in &mut target.ca_certificates {
        adopt(&mut ca_certificate.id, ca_certificate.cert.clone(), &ca_certificates);
    }
    for plugin in &mut target.plugins {
        let key = plugin.name.as_ref().map(|_| plugin.scoped_key());
        adopt(&mut plugin.id, key, &global_plugins);
    }
}

fn merge_tags(tags: &mut Vec<String>, extra: &[String]) {
    tags.extend(extra.iter().cloned());
    tags.sort();
    tags.dedup();
}

fn stamp_tags(target: &mut Document, select_tags: &[String]) {
    for service in &mut target.services {
        merge_tags(&mut service.service.tags, select_tags);
    }
    for route in target.all_routes_mut() {
        merge_tags(&mut route.route.tags, select_tags);
    }
    for upstream in &mut target.upstreams {
        merge_tags(&mut upstream.upstream.tags, select_tags);
    }
    for consumer in &mut target.consumers {
        merge_tags(&mut consumer.consumer.tags, select_tags);
    }
    for certificate in &mut target.certificates {
        merge_tags(&mut certificate.tags, select_tags);
    }
    for ca_certificate in &mut target.ca_certificates {
        merge_tags(&mut ca_certificate.tags, select_tags);
    }
    target.for_each_plugin_mut(|plugin| merge_tags(&mut plugin.tags, select_tags));
}
