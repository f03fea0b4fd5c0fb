/// Database schema definitions
///
/// SQL for the settings, analytics, rate window and token usage tables.
/// This is bootstrap DDL only; schema evolution is owned by the host application.

/// Database schema manager
pub struct DatabaseSchema;

impl DatabaseSchema {
    /// Settings documents keyed by system name
    pub fn create_settings_table_sql() -> &'static str {
        "
        CREATE TABLE IF NOT EXISTS rag_settings (
            name VARCHAR(64) PRIMARY KEY,
            document JSONB NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "
    }

    /// Search telemetry rows
    pub fn create_search_analytics_table_sql() -> &'static str {
        "
        CREATE TABLE IF NOT EXISTS rag_search_analytics (
            id UUID PRIMARY KEY,
            tenant_id VARCHAR(255) NOT NULL,
            query TEXT NOT NULL,
            intent VARCHAR(64),
            results_count INTEGER NOT NULL DEFAULT 0,
            response_time_ms BIGINT NOT NULL DEFAULT 0,
            cache_hit BOOLEAN NOT NULL DEFAULT false,
            client_address VARCHAR(64),
            created_at TIMESTAMPTZ NOT NULL
        )
        "
    }

    /// Performance telemetry rows
    pub fn create_performance_analytics_table_sql() -> &'static str {
        "
        CREATE TABLE IF NOT EXISTS rag_performance_analytics (
            id UUID PRIMARY KEY,
            tenant_id VARCHAR(255),
            operation VARCHAR(128) NOT NULL,
            duration_ms BIGINT NOT NULL,
            success BOOLEAN NOT NULL,
            error_message TEXT,
            metadata JSONB,
            created_at TIMESTAMPTZ NOT NULL
        )
        "
    }

    /// Durable mirror of in-memory rate windows
    pub fn create_rate_windows_table_sql() -> &'static str {
        "
        CREATE TABLE IF NOT EXISTS rag_rate_limit_windows (
            scope VARCHAR(16) NOT NULL,
            identity VARCHAR(255) NOT NULL,
            window_start TIMESTAMPTZ NOT NULL,
            tenant_id VARCHAR(255) NOT NULL,
            request_type VARCHAR(64) NOT NULL,
            window_ms BIGINT NOT NULL,
            request_count INTEGER NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (scope, tenant_id, identity, window_start)
        )
        "
    }

    /// Token usage records
    pub fn create_token_usage_table_sql() -> &'static str {
        "
        CREATE TABLE IF NOT EXISTS rag_token_usage (
            id UUID PRIMARY KEY,
            tenant_id VARCHAR(255) NOT NULL,
            tokens BIGINT NOT NULL,
            operation VARCHAR(128) NOT NULL,
            response_time_ms BIGINT NOT NULL DEFAULT 0,
            metadata JSONB,
            created_at TIMESTAMPTZ NOT NULL
        )
        "
    }

    /// Get SQL for creating standard indexes
    pub fn create_indexes_sql() -> Vec<&'static str> {
        vec![
            "CREATE INDEX IF NOT EXISTS idx_rag_search_tenant_created ON rag_search_analytics(tenant_id, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_rag_performance_operation ON rag_performance_analytics(operation, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_rag_windows_tenant ON rag_rate_limit_windows(tenant_id, window_start)",
            "CREATE INDEX IF NOT EXISTS idx_rag_token_usage_tenant_created ON rag_token_usage(tenant_id, created_at)",
        ]
    }

    /// All statements in dependency order
    pub fn all_statements() -> Vec<&'static str> {
        let mut statements = vec![
            Self::create_settings_table_sql(),
            Self::create_search_analytics_table_sql(),
            Self::create_performance_analytics_table_sql(),
            Self::create_rate_windows_table_sql(),
            Self::create_token_usage_table_sql(),
        ];
        statements.extend(Self::create_indexes_sql());
        statements
    }
}
