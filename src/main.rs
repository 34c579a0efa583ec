/// RelayFlow: workflow execution engine with multi-provider AI routing
///
/// Main entry point for the RelayFlow server. Loads and validates the
/// configuration, then serves:
/// - Workflow management API at /api/workflows/*
/// - Execution API at /api/workflows/{id}/execute and /api/executions/*
/// - Ad-hoc AI requests at /api/ai/request
/// - Webhook triggers at /webhook/{workflow_id}/*
/// - Health check at /healthz

use relayflow::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to 0.0.0.0:3004 and data/relayflow.db, overridable via RELAYFLOW_* env vars
    let config = Config::default();
    config.validate()?;

    start_server(config).await
}
