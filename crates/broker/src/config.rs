// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for the treelink broker.
#[derive(Debug, Clone, clap::Parser)]
pub struct BrokerConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "TREELINK_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9470, env = "TREELINK_PORT")]
    pub port: u16,

    /// Bearer token links must present at attach. If unset, auth is disabled.
    #[arg(long, env = "TREELINK_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Mount prefix for responder links in the virtual tree.
    #[arg(long, default_value = "/downstream", env = "TREELINK_DOWNSTREAM_PREFIX")]
    pub downstream_prefix: String,

    /// Reconnect grace window in milliseconds. A responder that returns
    /// within this window resumes its streams; after it, they are torn down.
    #[arg(long, default_value_t = 30_000, env = "TREELINK_GRACE_MS")]
    pub grace_ms: u64,
}

impl BrokerConfig {
    pub fn grace(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.grace_ms)
    }
}
