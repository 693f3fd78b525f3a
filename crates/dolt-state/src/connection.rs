//! Where a remote Dolt store lives and how to sign in to it

/// Default namespace for Dolt tables
pub const DEFAULT_NAMESPACE: &str = "dolt";

/// Default database for Dolt tables
pub const DEFAULT_DATABASE: &str = "main";

/// Remote SurrealDB target for [`crate::SurrealDoltStore::connect_cloud`].
///
/// `is_root` picks root sign-in; otherwise the credentials are checked
/// against `namespace`/`database`.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// `ws://` or `wss://` URL
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub namespace: String,
    pub database: String,
    pub is_root: bool,
}

impl CloudConfig {
    /// Database-user sign-in against the `dolt`/`main` tables.
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            is_root: false,
        }
    }

    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    pub fn with_root(mut self, is_root: bool) -> Self {
        self.is_root = is_root;
        self
    }

    /// `SURREALDB_ENDPOINT`, `SURREALDB_USERNAME` and `SURREALDB_PASSWORD` must
    /// all be set. `SURREALDB_NAMESPACE` and `SURREALDB_DATABASE` override the
    /// defaults; `SURREALDB_ROOT=true` (or `1`) selects root sign-in.
    pub fn from_env() -> std::result::Result<Self, String> {
        let endpoint =
            std::env::var("SURREALDB_ENDPOINT").map_err(|_| "SURREALDB_ENDPOINT not set")?;
        let username =
            std::env::var("SURREALDB_USERNAME").map_err(|_| "SURREALDB_USERNAME not set")?;
        let password =
            std::env::var("SURREALDB_PASSWORD").map_err(|_| "SURREALDB_PASSWORD not set")?;

        let mut config = Self::new(endpoint, username, password);
        if let Ok(ns) = std::env::var("SURREALDB_NAMESPACE") {
            config = config.with_namespace(ns);
        }
        if let Ok(db) = std::env::var("SURREALDB_DATABASE") {
            config = config.with_database(db);
        }
        let is_root = std::env::var("SURREALDB_ROOT")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);
        Ok(config.with_root(is_root))
    }
}
