//! External secret lookup and database credential resolution.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_secretsmanager::{config::Region, error::ProvideErrorMetadata, Client};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, DbConfig};

/// Flat key/value view of a named secret.
pub type SecretFields = HashMap<String, String>;

#[async_trait]
pub trait SecretsProvider: Send + Sync {
    /// `None` when the secret is missing, unreadable or not a JSON object.
    async fn fetch(&self, name: &str) -> Option<SecretFields>;
}

/// AWS Secrets Manager backed provider.
pub struct AwsSecretsProvider {
    client: Client,
}

impl AwsSecretsProvider {
    pub async fn connect(region: &str) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        Self {
            client: Client::new(&shared),
        }
    }
}

#[async_trait]
impl SecretsProvider for AwsSecretsProvider {
    async fn fetch(&self, name: &str) -> Option<SecretFields> {
        let output = match self.client.get_secret_value().secret_id(name).send().await {
            Ok(out) => out,
            Err(e) => {
                match e.code() {
                    Some("ResourceNotFoundException") => warn!(secret = %name, "secret not found"),
                    Some("AccessDeniedException") => error!(secret = %name, "access denied to secret"),
                    _ => error!(secret = %name, error = %aws_sdk_secretsmanager::error::DisplayErrorContext(&e), "error fetching secret"),
                }
                return None;
            }
        };

        let Some(raw) = output.secret_string() else {
            warn!(secret = %name, "secret holds binary data, not JSON");
            return None;
        };
        let fields = parse_secret_string(raw);
        if fields.is_none() {
            error!(secret = %name, "secret value is not a JSON object");
        }
        fields
    }
}

/// Parses a JSON object secret. Scalars are stringified; nested values are
/// ignored.
pub fn parse_secret_string(raw: &str) -> Option<SecretFields> {
    let Value::Object(map) = serde_json::from_str::<Value>(raw).ok()? else {
        return None;
    };
    Some(
        map.into_iter()
            .filter_map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s,
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => return None,
                };
                Some((k, v))
            })
            .collect(),
    )
}

/// Database settings with secret fields merged over the configured values.
/// A secret without `password` but with `password_secret_arn` pulls the
/// password from that second, managed secret.
pub async fn resolve_db_config(cfg: &AppConfig, secrets: &dyn SecretsProvider) -> DbConfig {
    let Some(name) = cfg.aws_secret_name.as_deref() else {
        debug!("no secret name configured, using environment database settings");
        return cfg.db.clone();
    };
    let Some(secret) = secrets.fetch(name).await else {
        return cfg.db.clone();
    };

    let mut password = secret.get("password").cloned();
    if password.is_none() {
        if let Some(arn) = secret.get("password_secret_arn") {
            password = secrets
                .fetch(arn)
                .await
                .and_then(|managed| managed.get("password").cloned());
            if password.is_some() {
                info!("retrieved password from managed secret");
            }
        }
    }

    let port = match secret.get("port") {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(value = %raw, "secret port is not a number, keeping configured port");
            cfg.db.port
        }),
        None => cfg.db.port,
    };

    DbConfig {
        host: secret.get("host").cloned().unwrap_or_else(|| cfg.db.host.clone()),
        port,
        name: secret.get("dbname").cloned().unwrap_or_else(|| cfg.db.name.clone()),
        user: secret.get("username").cloned().unwrap_or_else(|| cfg.db.user.clone()),
        password: password.unwrap_or_else(|| cfg.db.password.clone()),
        pool_max: cfg.db.pool_max,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct MapSecrets {
        secrets: HashMap<String, String>,
        fetched: Mutex<Vec<String>>,
    }

    impl MapSecrets {
        fn with(pairs: &[(&str, &str)]) -> Self {
            Self {
                secrets: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl SecretsProvider for MapSecrets {
        async fn fetch(&self, name: &str) -> Option<SecretFields> {
            self.fetched.lock().unwrap().push(name.to_string());
            self.secrets.get(name).and_then(|raw| parse_secret_string(raw))
        }
    }

    fn config(secret_name: Option<&str>) -> AppConfig {
        let mut cfg = AppConfig::from_lookup(|k| (k == "JWT_SECRET").then(|| "s".to_string())).unwrap();
        cfg.aws_secret_name = secret_name.map(str::to_string);
        cfg
    }

    #[test]
    fn parses_scalar_fields() {
        let fields = parse_secret_string(r#"{"host":"db","port":5433,"ssl":true,"nested":{"a":1}}"#).unwrap();
        assert_eq!(fields["host"], "db");
        assert_eq!(fields["port"], "5433");
        assert_eq!(fields["ssl"], "true");
        assert!(!fields.contains_key("nested"));
        assert!(parse_secret_string("not json").is_none());
        assert!(parse_secret_string("[1,2]").is_none());
    }

    #[tokio::test]
    async fn no_secret_name_uses_environment() {
        let secrets = MapSecrets::default();
        let db = resolve_db_config(&config(None), &secrets).await;
        assert_eq!(db.host, "localhost");
        assert!(secrets.fetched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn secret_fields_override_settings() {
        let secrets = MapSecrets::with(&[(
            "prod/db",
            r#"{"host":"rds.internal","port":"6543","username":"app","password":"hunter22"}"#,
        )]);
        let db = resolve_db_config(&config(Some("prod/db")), &secrets).await;
        assert_eq!(db.host, "rds.internal");
        assert_eq!(db.port, 6543);
        assert_eq!(db.user, "app");
        assert_eq!(db.password, "hunter22");
        assert_eq!(db.name, "chatbot");
    }

    #[tokio::test]
    async fn managed_password_is_fetched_from_second_secret() {
        let secrets = MapSecrets::with(&[
            ("prod/db", r#"{"host":"rds.internal","password_secret_arn":"arn:rotating"}"#),
            ("arn:rotating", r#"{"username":"ignored","password":"rotated!"}"#),
        ]);
        let db = resolve_db_config(&config(Some("prod/db")), &secrets).await;
        assert_eq!(db.password, "rotated!");
        assert_eq!(db.user, "postgres");
        assert_eq!(*secrets.fetched.lock().unwrap(), vec!["prod/db", "arn:rotating"]);
    }

    #[tokio::test]
    async fn missing_secret_falls_back_to_settings() {
        let secrets = MapSecrets::default();
        let db = resolve_db_config(&config(Some("absent")), &secrets).await;
        assert_eq!(db.password, "postgres");
        assert_eq!(*secrets.fetched.lock().unwrap(), vec!["absent"]);
    }
}
