//! # Custom Entities
//!
//! Operators can ship configuration the desired-state model does not describe (entities
//! of custom plugins, for instance) as a raw JSON document stored under the `config`
//! key of a Kubernetes secret. In full-push mode that document is merged into the
//! rendered configuration before submission.
//!
//! ## Key Features
//! - `namespace/name` secret references, validated up front
//! - [`SecretStore`] seam with a Kubernetes-backed implementation
//! - Top-level merge where the rendered document always wins on conflicting keys
//!
//! Neither a failed lookup nor a malformed blob stops reconciliation. Both are logged
//! and the rendered document is pushed on its own.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::Api;
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::core::error::{ReconcileError, ReconcileResult};

/// Secret data key holding the custom entities document
pub const CUSTOM_ENTITIES_KEY: &str = "config";

/// Reference to a namespaced secret, written `namespace/name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRef {
    pub namespace: String,
    pub name: String,
}

impl SecretRef {
    pub fn parse(reference: &str) -> ReconcileResult<Self> {
        match reference.split_once('/') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(ReconcileError::config(format!(
                "invalid secret reference '{}', expected 'namespace/name'",
                reference
            ))),
        }
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Source of secret payloads
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch the data map of secret `namespace/name`
    async fn get_secret(&self, namespace: &str, name: &str)
        -> ReconcileResult<BTreeMap<String, Vec<u8>>>;
}

/// Secret store reading from the Kubernetes API
#[derive(Clone)]
pub struct KubeSecretStore {
    client: kube::Client,
}

impl KubeSecretStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// Build a store from the in-cluster or kubeconfig environment
    pub async fn try_default() -> ReconcileResult<Self> {
        Ok(Self::new(kube::Client::try_default().await?))
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> ReconcileResult<BTreeMap<String, Vec<u8>>> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets.get(name).await?;

        Ok(secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, value.0))
            .collect())
    }
}

/// Read the raw custom entities document from the referenced secret
pub async fn fetch_custom_entities(
    store: &dyn SecretStore,
    secret_ref: &str,
) -> ReconcileResult<Vec<u8>> {
    let secret_ref = SecretRef::parse(secret_ref)?;

    let mut data = store
        .get_secret(&secret_ref.namespace, &secret_ref.name)
        .await
        .map_err(|e| ReconcileError::stage("fetching secret", e))?;

    data.remove(CUSTOM_ENTITIES_KEY).ok_or_else(|| {
        ReconcileError::secret_store(format!(
            "'{}' key not found in custom entities secret '{}'",
            CUSTOM_ENTITIES_KEY, secret_ref
        ))
    })
}

/// Merge custom entities into the serialized configuration.
///
/// Keys present in `core` are never overridden. Without custom bytes the core bytes are
/// returned as they are; a custom blob that is not a JSON object is logged and ignored.
pub fn merge_custom_entities(core: &[u8], custom: Option<&[u8]>) -> ReconcileResult<Vec<u8>> {
    let custom = match custom {
        Some(custom) if !custom.is_empty() => custom,
        _ => return Ok(core.to_vec()),
    };

    let mut merged: Map<String, Value> = serde_json::from_slice(core)?;

    match serde_json::from_slice::<Value>(custom) {
        Ok(Value::Object(entities)) => {
            for (key, value) in entities {
                if !merged.contains_key(&key) {
                    merged.insert(key, value);
                } else {
                    debug!(key = %key, "Custom entity key shadowed by rendered configuration");
                }
            }
        }
        Ok(other) => {
            error!(
                kind = json_kind(&other),
                "Custom entities must be a JSON object, ignoring them"
            );
        }
        Err(e) => {
            error!(error = %e, "Failed to unmarshal custom entities from secret data");
        }
    }

    Ok(serde_json::to_vec(&merged)?)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FakeSecrets(Option<BTreeMap<String, Vec<u8>>>);

    #[async_trait]
    impl SecretStore for FakeSecrets {
        async fn get_secret(
            &self,
            namespace: &str,
            name: &str,
        ) -> ReconcileResult<BTreeMap<String, Vec<u8>>> {
            self.0.clone().ok_or_else(|| {
                ReconcileError::secret_store(format!("secret {}/{} not found", namespace, name))
            })
        }
    }

    #[test]
    fn test_parse_secret_ref() {
        let parsed = SecretRef::parse("kong/custom-entities").unwrap();
        assert_eq!(parsed.namespace, "kong");
        assert_eq!(parsed.name, "custom-entities");
        assert_eq!(parsed.to_string(), "kong/custom-entities");

        for bad in ["", "no-namespace", "/name", "ns/", "a/b/c"] {
            assert!(
                matches!(SecretRef::parse(bad), Err(ReconcileError::Configuration { .. })),
                "{} should be rejected",
                bad
            );
        }
    }

    #[tokio::test]
    async fn test_fetch_takes_config_key() {
        let store = FakeSecrets(Some(BTreeMap::from([(
            "config".to_string(),
            br#"{"extra": {}}"#.to_vec(),
        )])));

        let bytes = fetch_custom_entities(&store, "kong/entities").await.unwrap();
        assert_eq!(bytes, br#"{"extra": {}}"#.to_vec());
    }

    #[tokio::test]
    async fn test_fetch_errors() {
        let missing_key = FakeSecrets(Some(BTreeMap::new()));
        let err = fetch_custom_entities(&missing_key, "kong/entities").await.unwrap_err();
        assert!(matches!(err, ReconcileError::SecretStore { .. }));

        let missing_secret = FakeSecrets(None);
        let err = fetch_custom_entities(&missing_secret, "kong/entities").await.unwrap_err();
        assert!(err.to_string().starts_with("fetching secret"));

        let err = fetch_custom_entities(&missing_secret, "malformed").await.unwrap_err();
        assert!(matches!(err, ReconcileError::Configuration { .. }));
    }

    #[test]
    fn test_merge_fast_path_returns_core_bytes() {
        let core = br#"{"_format_version":"1.1","services":[]}"#;
        assert_eq!(merge_custom_entities(core, None).unwrap(), core.to_vec());
        assert_eq!(merge_custom_entities(core, Some(&b""[..])).unwrap(), core.to_vec());
    }

    #[test]
    fn test_merge_core_keys_win() {
        let core = serde_json::to_vec(&json!({"services": [{"name": "core"}]})).unwrap();
        let custom = serde_json::to_vec(&json!({
            "services": [{"name": "custom"}],
            "extra": {"enabled": true}
        }))
        .unwrap();

        let merged: Value =
            serde_json::from_slice(&merge_custom_entities(&core, Some(&custom)).unwrap()).unwrap();

        assert_eq!(
            merged,
            json!({"services": [{"name": "core"}], "extra": {"enabled": true}})
        );
    }

    #[test]
    fn test_merge_ignores_malformed_custom_entities() {
        let core = serde_json::to_vec(&json!({"services": []})).unwrap();

        for custom in [&b"{not json"[..], &b"[1, 2]"[..]] {
            let merged: Value =
                serde_json::from_slice(&merge_custom_entities(&core, Some(custom)).unwrap())
                    .unwrap();
            assert_eq!(merged, json!({"services": []}));
        }
    }
}
