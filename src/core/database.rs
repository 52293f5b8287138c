//! PostgreSQL connection management for the conversation store.
//!
//! The schema is a single `conversations` table created on startup when
//! missing; messages are kept inline as a JSONB array.

use sqlx::PgPool;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/chat_gateway".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
            idle_timeout_secs: 600,
        }
    }
}

impl DatabaseConfig {
    pub fn from_url(url: &str) -> Self {
        Self {
            url: normalize_database_url(url),
            ..Default::default()
        }
    }
}

/// Rewrite `postgres://` to `postgresql://` and percent-encode reserved
/// characters in the password so that the URL parser accepts it.
fn normalize_database_url(url: &str) -> String {
    let url = match url.strip_prefix("postgres://") {
        Some(rest) => format!("postgresql://{}", rest),
        None => url.to_string(),
    };

    let Some((scheme, after_scheme)) = url.split_once("://") else {
        return url;
    };
    let Some((userinfo, host_and_rest)) = after_scheme.rsplit_once('@') else {
        return url;
    };
    let Some((username, password)) = userinfo.split_once(':') else {
        return url;
    };
    if password.is_empty() {
        return url;
    }

    format!(
        "{}://{}:{}@{}",
        scheme,
        username,
        percent_encode_password(password),
        host_and_rest
    )
}

const RESERVED: &[(char, &str)] = &[
    ('%', "%25"),
    ('$', "%24"),
    ('^', "%5E"),
    ('@', "%40"),
    ('#', "%23"),
    ('&', "%26"),
    ('=', "%3D"),
    ('+', "%2B"),
    ('/', "%2F"),
    ('?', "%3F"),
    (':', "%3A"),
    (' ', "%20"),
];

fn percent_encode_password(password: &str) -> String {
    let mut encoded = String::with_capacity(password.len() * 3);
    for c in password.chars() {
        match RESERVED.iter().find(|(reserved, _)| *reserved == c) {
            Some((_, escaped)) => encoded.push_str(escaped),
            None => encoded.push(c),
        }
    }
    encoded
}

const CREATE_CONVERSATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    messages JSONB NOT NULL DEFAULT '[]'::jsonb,
    model TEXT,
    provider TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_UPDATED_AT_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_conversations_updated_at ON conversations (updated_at DESC)";

/// Database connection manager
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(std::time::Duration::from_secs(config.idle_timeout_secs))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the conversations table and its index if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(CREATE_CONVERSATIONS_TABLE)
            .execute(&self.pool)
            .await?;
        sqlx::query(CREATE_UPDATED_AT_INDEX)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
