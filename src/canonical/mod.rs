//! # Canonicalizer
//!
//! Renders the desired-state tree into a [`Document`] with deterministic ordering:
//!
//! | Collection | Natural key |
//! |---|---|
//! | services, routes, upstreams | name |
//! | service/route/consumer plugins | plugin name |
//! | top-level plugins | name + consumer id + route id + service id |
//! | consumers | username |
//! | key-auth / jwt credentials | key |
//! | hmac-auth / basic-auth credentials | username |
//! | oauth2 credentials | client id |
//! | targets | target address |
//! | certificates, CA certificates | certificate body |
//!
//! Keys compare byte-wise. Sorting is stable, so entities whose keys collide (two
//! differently-scoped plugins with the same name, say) keep their input order and
//! renders do not churn.
//!
//! Plugins, routes and upstreams pass through the [`DefaultFiller`] on the way. The
//! desired-state tree is only ever read.

use tracing::error;

use crate::defaults::{fill_route, fill_upstream, DefaultFiller};
use crate::document::{
    CertificateEntry, ConsumerEntry, Document, Info, RouteEntry, ServiceEntry, Sni,
    UpstreamEntry,
};
use crate::observability::metrics;
use crate::state::{Certificate, DesiredState, Plugin};

/// Stable sort by an owned natural key
fn sort_by_natural_key<T, F>(items: &mut [T], key: F)
where
    F: FnMut(&T) -> String,
{
    // sort_by_cached_key is stable
    items.sort_by_cached_key(key);
}

fn opt_key(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

pub struct Canonicalizer {
    filler: DefaultFiller,
    selector_tags: Vec<String>,
}

impl Canonicalizer {
    /// `selector_tags` is empty unless the sync is scoped by tag
    pub fn new(filler: DefaultFiller, selector_tags: Vec<String>) -> Self {
        Self {
            filler,
            selector_tags,
        }
    }

    /// Render `state` into its canonical document
    pub async fn render(&self, state: &DesiredState) -> Document {
        let mut document = Document::default();

        for node in &state.services {
            let mut service = ServiceEntry {
                service: node.service.clone(),
                routes: Vec::with_capacity(node.routes.len()),
                plugins: self.fill_plugins(&node.plugins).await,
            };
            sort_by_natural_key(&mut service.plugins, |p| p.name_or_empty().to_string());

            for route_node in &node.routes {
                let mut route = RouteEntry {
                    route: fill_route(&route_node.route),
                    plugins: self.fill_plugins(&route_node.plugins).await,
                };
                sort_by_natural_key(&mut route.plugins, |p| p.name_or_empty().to_string());
                service.routes.push(route);
            }
            sort_by_natural_key(&mut service.routes, |r| opt_key(&r.route.name));

            document.services.push(service);
        }
        sort_by_natural_key(&mut document.services, |s| opt_key(&s.service.name));

        document.plugins = self.fill_plugins(&state.plugins).await;
        sort_by_natural_key(&mut document.plugins, Plugin::scoped_key);

        for node in &state.upstreams {
            let mut upstream = UpstreamEntry {
                upstream: fill_upstream(&node.upstream),
                targets: node.targets.clone(),
            };
            sort_by_natural_key(&mut upstream.targets, |t| opt_key(&t.target));
            document.upstreams.push(upstream);
        }
        sort_by_natural_key(&mut document.upstreams, |u| opt_key(&u.upstream.name));

        document.certificates = state.certificates.iter().map(certificate_entry).collect();
        sort_by_natural_key(&mut document.certificates, |c| opt_key(&c.cert));

        document.ca_certificates = state.ca_certificates.clone();
        sort_by_natural_key(&mut document.ca_certificates, |c| opt_key(&c.cert));

        for node in &state.consumers {
            let mut consumer = ConsumerEntry {
                consumer: node.consumer.clone(),
                plugins: self.fill_plugins(&node.plugins).await,
                keyauth_credentials: node.key_auths.clone(),
                hmacauth_credentials: node.hmac_auths.clone(),
                basicauth_credentials: node.basic_auths.clone(),
                jwt_secrets: node.jwt_auths.clone(),
                oauth2_credentials: node.oauth2_creds.clone(),
            };
            sort_by_natural_key(&mut consumer.plugins, |p| p.name_or_empty().to_string());
            sort_by_natural_key(&mut consumer.keyauth_credentials, |c| opt_key(&c.key));
            sort_by_natural_key(&mut consumer.hmacauth_credentials, |c| opt_key(&c.username));
            sort_by_natural_key(&mut consumer.basicauth_credentials, |c| opt_key(&c.username));
            sort_by_natural_key(&mut consumer.jwt_secrets, |c| opt_key(&c.key));
            sort_by_natural_key(&mut consumer.oauth2_credentials, |c| opt_key(&c.client_id));
            document.consumers.push(consumer);
        }
        sort_by_natural_key(&mut document.consumers, |c| opt_key(&c.consumer.username));

        if !self.selector_tags.is_empty() {
            document.info = Some(Info {
                select_tags: self.selector_tags.clone(),
            });
        }

        document
    }

    /// Fill every plugin, keeping the unfilled copy of any plugin that fails
    async fn fill_plugins(&self, plugins: &[Plugin]) -> Vec<Plugin> {
        let mut filled = Vec::with_capacity(plugins.len());
        for plugin in plugins {
            match self.filler.fill_plugin(plugin).await {
                Ok(plugin) => filled.push(plugin),
                Err(e) => {
                    error!(
                        plugin = plugin.name_or_empty(),
                        error = %e,
                        "Failed to fill in defaults for plugin"
                    );
                    metrics::record_plugin_fill_failure();
                    let mut plugin = plugin.clone();
                    plugin.run_on = None;
                    filled.push(plugin);
                }
            }
        }
        filled
    }
}

fn certificate_entry(certificate: &Certificate) -> CertificateEntry {
    CertificateEntry {
        id: certificate.id.clone(),
        cert: certificate.cert.clone(),
        key: certificate.key.clone(),
        snis: certificate
            .snis
            .iter()
            .map(|name| Sni {
                name: Some(name.clone()),
            })
            .collect(),
        tags: certificate.tags.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{ReconcileError, ReconcileResult};
    use crate::defaults::PluginSchemaStore;
    use crate::state::{
        Configuration, ConsumerNode, EntityRef, KeyAuth, Route, RouteNode, Service, ServiceNode,
        Target, Upstream, UpstreamNode,
    };
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Arc;

    struct EmptySchemas;

    #[async_trait]
    impl PluginSchemaStore for EmptySchemas {
        async fn schema(&self, plugin_name: &str) -> ReconcileResult<Value> {
            if plugin_name == "unknown" {
                return Err(ReconcileError::schema_lookup(plugin_name, "not found"));
            }
            Ok(json!({"fields": [{"config": {"type": "record", "fields": [
                {"flag": {"type": "boolean", "default": true}}
            ]}}]}))
        }
    }

    fn canonicalizer(tags: Vec<String>) -> Canonicalizer {
        Canonicalizer::new(DefaultFiller::new(Arc::new(EmptySchemas)), tags)
    }

    fn named_plugin(name: &str) -> Plugin {
        Plugin {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    fn service(name: &str, routes: &[&str]) -> ServiceNode {
        ServiceNode {
            service: Service {
                name: Some(name.to_string()),
                ..Default::default()
            },
            routes: routes
                .iter()
                .map(|r| RouteNode {
                    route: Route {
                        name: Some(r.to_string()),
                        ..Default::default()
                    },
                    plugins: vec![named_plugin("zipkin"), named_plugin("acl")],
                })
                .collect(),
            plugins: Vec::new(),
        }
    }

    fn sample_state() -> DesiredState {
        DesiredState {
            services: vec![service("b-svc", &["r2", "r1"]), service("a-svc", &["r3"])],
            upstreams: vec![UpstreamNode {
                upstream: Upstream {
                    name: Some("up".to_string()),
                    ..Default::default()
                },
                targets: vec![
                    Target {
                        target: Some("10.0.0.2:80".to_string()),
                        ..Default::default()
                    },
                    Target {
                        target: Some("10.0.0.1:80".to_string()),
                        ..Default::default()
                    },
                ],
            }],
            consumers: vec![ConsumerNode {
                consumer: crate::state::Consumer {
                    username: Some("bob".to_string()),
                    ..Default::default()
                },
                key_auths: vec![
                    KeyAuth {
                        key: Some("k2".to_string()),
                        ..Default::default()
                    },
                    KeyAuth {
                        key: Some("k1".to_string()),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_render_sorts_every_collection() {
        let document = canonicalizer(Vec::new()).render(&sample_state()).await;

        let services: Vec<_> = document.services.iter().map(|s| opt_key(&s.service.name)).collect();
        assert_eq!(services, vec!["a-svc", "b-svc"]);

        let routes: Vec<_> = document.services[1].routes.iter().map(|r| opt_key(&r.route.name)).collect();
        assert_eq!(routes, vec!["r1", "r2"]);

        let plugins: Vec<_> = document.services[1].routes[0]
            .plugins
            .iter()
            .map(|p| p.name_or_empty().to_string())
            .collect();
        assert_eq!(plugins, vec!["acl", "zipkin"]);

        let targets: Vec<_> = document.upstreams[0].targets.iter().map(|t| opt_key(&t.target)).collect();
        assert_eq!(targets, vec!["10.0.0.1:80", "10.0.0.2:80"]);

        let keys: Vec<_> = document.consumers[0].keyauth_credentials.iter().map(|k| opt_key(&k.key)).collect();
        assert_eq!(keys, vec!["k1", "k2"]);
    }

    #[tokio::test]
    async fn test_render_applies_defaults_without_touching_input() {
        let state = sample_state();
        let snapshot = state.clone();

        let document = canonicalizer(Vec::new()).render(&state).await;

        let route = &document.services[0].routes[0];
        assert_eq!(route.route.https_redirect_status_code, Some(426));
        assert_eq!(route.route.path_handling.as_deref(), Some("v0"));
        assert_eq!(route.plugins[0].enabled, Some(true));
        assert_eq!(document.upstreams[0].upstream.algorithm.as_deref(), Some("round-robin"));
        assert_eq!(state, snapshot);
    }

    #[tokio::test]
    async fn test_render_is_deterministic() {
        let canonicalizer = canonicalizer(vec!["managed".to_string()]);
        let first = serde_json::to_vec(&canonicalizer.render(&sample_state()).await).unwrap();
        let second = serde_json::to_vec(&canonicalizer.render(&sample_state()).await).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_colliding_plugin_keys_keep_input_order() {
        let mut first = named_plugin("rate-limiting");
        first.config = Some(Configuration::from_iter([("minute".to_string(), json!(1))]));
        let mut second = named_plugin("rate-limiting");
        second.config = Some(Configuration::from_iter([("minute".to_string(), json!(2))]));

        let state = DesiredState {
            plugins: vec![named_plugin("zipkin"), first, second],
            ..Default::default()
        };

        let document = canonicalizer(Vec::new()).render(&state).await;

        assert_eq!(document.plugins[0].config.as_ref().unwrap()["minute"], json!(1));
        assert_eq!(document.plugins[1].config.as_ref().unwrap()["minute"], json!(2));
        assert_eq!(document.plugins[2].name.as_deref(), Some("zipkin"));
    }

    #[tokio::test]
    async fn test_global_plugins_sort_by_scoped_key() {
        let mut scoped = named_plugin("cors");
        scoped.service = Some(EntityRef::new("svc-a"));
        let state = DesiredState {
            plugins: vec![scoped, named_plugin("cors")],
            ..Default::default()
        };

        let document = canonicalizer(Vec::new()).render(&state).await;

        assert!(document.plugins[0].service.is_none());
        assert_eq!(
            document.plugins[1].service.as_ref().and_then(|s| s.id.as_deref()),
            Some("svc-a")
        );
    }

    #[tokio::test]
    async fn test_failed_plugin_is_still_emitted() {
        let state = DesiredState {
            plugins: vec![named_plugin("unknown"), Plugin::default()],
            ..Default::default()
        };

        let document = canonicalizer(Vec::new()).render(&state).await;

        assert_eq!(document.plugins.len(), 2);
        assert!(document.plugins.iter().all(|p| p.enabled.is_none()));
    }

    #[tokio::test]
    async fn test_failed_plugin_never_carries_run_on() {
        let state = DesiredState {
            plugins: vec![Plugin {
                name: Some("unknown".to_string()),
                run_on: Some("first".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };

        let document = canonicalizer(Vec::new()).render(&state).await;

        assert_eq!(document.plugins.len(), 1);
        assert!(document.plugins[0].run_on.is_none());
        assert_eq!(state.plugins[0].run_on.as_deref(), Some("first"));

        let body = serde_json::to_string(&document).unwrap();
        assert!(!body.contains("run_on"));
    }

    #[tokio::test]
    async fn test_render_sorts_consumers_and_credentials() {
        use crate::state::{BasicAuth, CaCertificate, Consumer, HmacAuth, JwtAuth, Oauth2Credential};

        let consumer = |username: &str| ConsumerNode {
            consumer: Consumer {
                username: Some(username.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut carol = consumer("carol");
        carol.hmac_auths = vec![
            HmacAuth {
                username: Some("h2".to_string()),
                ..Default::default()
            },
            HmacAuth {
                username: Some("h1".to_string()),
                ..Default::default()
            },
        ];
        carol.basic_auths = vec![
            BasicAuth {
                username: Some("b2".to_string()),
                ..Default::default()
            },
            BasicAuth {
                username: Some("b1".to_string()),
                ..Default::default()
            },
        ];
        carol.jwt_auths = vec![
            JwtAuth {
                key: Some("j2".to_string()),
                ..Default::default()
            },
            JwtAuth {
                key: Some("j1".to_string()),
                ..Default::default()
            },
        ];
        carol.oauth2_creds = vec![
            Oauth2Credential {
                client_id: Some("o2".to_string()),
                ..Default::default()
            },
            Oauth2Credential {
                client_id: Some("o1".to_string()),
                ..Default::default()
            },
        ];

        let state = DesiredState {
            consumers: vec![carol, consumer("alice")],
            ca_certificates: vec![
                CaCertificate {
                    cert: Some("CA-2".to_string()),
                    ..Default::default()
                },
                CaCertificate {
                    cert: Some("CA-1".to_string()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let document = canonicalizer(Vec::new()).render(&state).await;

        let consumers: Vec<_> = document.consumers.iter().map(|c| opt_key(&c.consumer.username)).collect();
        assert_eq!(consumers, vec!["alice", "carol"]);

        let carol = &document.consumers[1];
        let hmac: Vec<_> = carol.hmacauth_credentials.iter().map(|c| opt_key(&c.username)).collect();
        assert_eq!(hmac, vec!["h1", "h2"]);
        let basic: Vec<_> = carol.basicauth_credentials.iter().map(|c| opt_key(&c.username)).collect();
        assert_eq!(basic, vec!["b1", "b2"]);
        let jwt: Vec<_> = carol.jwt_secrets.iter().map(|c| opt_key(&c.key)).collect();
        assert_eq!(jwt, vec!["j1", "j2"]);
        let oauth2: Vec<_> = carol.oauth2_credentials.iter().map(|c| opt_key(&c.client_id)).collect();
        assert_eq!(oauth2, vec!["o1", "o2"]);

        let ca: Vec<_> = document.ca_certificates.iter().map(|c| opt_key(&c.cert)).collect();
        assert_eq!(ca, vec!["CA-1", "CA-2"]);

        // input untouched
        assert_eq!(state.consumers[0].consumer.username.as_deref(), Some("carol"));
        assert_eq!(state.ca_certificates[0].cert.as_deref(), Some("CA-2"));
    }

    #[tokio::test]
    async fn test_selector_tags_only_when_scoped() {
        let unscoped = canonicalizer(Vec::new()).render(&DesiredState::default()).await;
        assert!(unscoped.info.is_none());

        let scoped = canonicalizer(vec!["managed".to_string()])
            .render(&DesiredState::default())
            .await;
        assert_eq!(scoped.select_tags(), ["managed".to_string()]);
    }

    #[tokio::test]
    async fn test_certificates_carry_sni_objects() {
        let state = DesiredState {
            certificates: vec![
                Certificate {
                    cert: Some("B".to_string()),
                    snis: vec!["b.example.com".to_string()],
                    ..Default::default()
                },
                Certificate {
                    cert: Some("A".to_string()),
                    snis: vec!["a.example.com".to_string()],
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let document = canonicalizer(Vec::new()).render(&state).await;

        assert_eq!(document.certificates[0].cert.as_deref(), Some("A"));
        assert_eq!(
            document.certificates[0].snis[0].name.as_deref(),
            Some("a.example.com")
        );
    }
}
