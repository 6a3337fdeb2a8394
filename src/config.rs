use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// Connection settings for the user database. Any field may later be
/// overridden by the secrets provider.
#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub pool_max: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BedrockConfig {
    pub model_id: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Argon2 work factor.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HasherConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminBootstrapConfig {
    pub username: String,
    pub password: Option<String>,
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_name: String,
    pub host: String,
    pub port: u16,
    pub debug: bool,
    pub aws_region: String,
    pub aws_secret_name: Option<String>,
    pub db: DbConfig,
    pub bedrock: BedrockConfig,
    pub system_prompt: Option<String>,
    pub history_limit: usize,
    pub auth_enabled: bool,
    pub allow_registration: bool,
    pub jwt: JwtConfig,
    pub hasher: HasherConfig,
    pub admin: AdminBootstrapConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Empty values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let debug = env.parse_or("DEBUG", false)?;

        let jwt_secret = match env.get("JWT_SECRET") {
            Some(secret) => secret,
            // Throwaway key; tokens do not survive a restart.
            None if debug => uuid::Uuid::new_v4().to_string(),
            None => return Err(ConfigError::MissingEnvVar("JWT_SECRET")),
        };

        Ok(Self {
            app_name: env.or("APP_NAME", "Gradio Chatbot"),
            host: env.or("APP_HOST", "0.0.0.0"),
            port: env.parse_or("APP_PORT", 8080)?,
            debug,
            aws_region: env.or("AWS_REGION", "us-east-1"),
            aws_secret_name: env.get("AWS_SECRET_NAME"),
            db: DbConfig {
                host: env.or("DB_HOST", "localhost"),
                port: env.parse_or("DB_PORT", 5432)?,
                name: env.or("DB_NAME", "chatbot"),
                user: env.or("DB_USER", "postgres"),
                password: env.or("DB_PASSWORD", "postgres"),
                pool_max: env.parse_or("DB_POOL_MAX", 15)?,
            },
            bedrock: BedrockConfig {
                model_id: env.or("BEDROCK_MODEL_ID", "mistral.mistral-large-2402-v1:0"),
                max_tokens: env.parse_or("BEDROCK_MAX_TOKENS", 1024)?,
                temperature: env.parse_or("BEDROCK_TEMPERATURE", 0.7)?,
            },
            system_prompt: env.get("CHAT_SYSTEM_PROMPT"),
            history_limit: env.parse_or("CHAT_HISTORY_LIMIT", 20)?,
            auth_enabled: env.parse_or("AUTH_ENABLED", true)?,
            allow_registration: env.parse_or("ALLOW_REGISTRATION", false)?,
            jwt: JwtConfig {
                secret: jwt_secret,
                issuer: env.or("JWT_ISSUER", "chatbot"),
                audience: env.or("JWT_AUDIENCE", "chatbot-users"),
                ttl_minutes: env.parse_or("JWT_TTL_MINUTES", 60 * 8)?,
            },
            hasher: HasherConfig {
                memory_kib: env.parse_or("ARGON2_MEMORY_KIB", 19 * 1024)?,
                iterations: env.parse_or("ARGON2_ITERATIONS", 2)?,
                parallelism: env.parse_or("ARGON2_PARALLELISM", 1)?,
            },
            admin: AdminBootstrapConfig {
                username: env.or("ADMIN_USERNAME", "admin"),
                password: env.get("ADMIN_PASSWORD"),
                email: env.or("ADMIN_EMAIL", "admin@example.com"),
            },
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T: ParseSetting>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            Some(raw) => T::parse_setting(raw.trim())
                .ok_or(ConfigError::InvalidValue { key, value: raw }),
            None => Ok(default),
        }
    }
}

trait ParseSetting: Sized {
    fn parse_setting(raw: &str) -> Option<Self>;
}

macro_rules! parse_setting_via_from_str {
    ($($t:ty),*) => {
        $(impl ParseSetting for $t {
            fn parse_setting(raw: &str) -> Option<Self> {
                raw.parse().ok()
            }
        })*
    };
}

parse_setting_via_from_str!(u16, u32, i64, usize, f32);

impl ParseSetting for bool {
    fn parse_setting(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    }
}
