/// Background cron scheduler service
///
/// Registers every `Schedule` trigger with tokio-cron-scheduler. Each tick
/// submits a run through the execution coordinator with the idempotency key
/// `"{trigger_id}:{tick timestamp}"`, so a tick delivered twice runs once.

use crate::runtime::engine::{ExecuteRequest, ExecutionCoordinator};
use crate::workflow::registry::WorkflowRegistry;
use crate::workflow::types::{Trigger, TriggerKind, WorkflowDefinition};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// Schedule triggers of a workflow as (trigger, cron expression)
pub fn schedule_triggers(workflow: &WorkflowDefinition) -> Vec<(&Trigger, &str)> {
    workflow
        .triggers
        .iter()
        .filter_map(|trigger| match &trigger.kind {
            TriggerKind::Schedule { cron } => Some((trigger, cron.as_str())),
            _ => None,
        })
        .collect()
}

/// Run request for one scheduler tick
pub fn tick_request(workflow_id: &str, trigger: &Trigger, tick: DateTime<Utc>) -> ExecuteRequest {
    ExecuteRequest::new(workflow_id)
        .with_key(format!("{}:{}", trigger.id, tick.timestamp()))
        .starting_at(trigger.node_id.clone())
        .with_payload(json!({
            "trigger_id": trigger.id,
            "scheduled_at": tick.to_rfc3339(),
        }))
}

/// Hot-reload cron scheduler
///
/// Jobs are keyed `"{workflow_id}:{trigger_id}"`; updating a workflow replaces
/// its jobs, deleting it removes them.
pub struct CronSchedulerService {
    scheduler: Arc<RwLock<JobScheduler>>,
    job_uuid_map: Arc<RwLock<HashMap<String, Uuid>>>,
    registry: Arc<WorkflowRegistry>,
    coordinator: Arc<ExecutionCoordinator>,
}

impl CronSchedulerService {
    pub async fn new(registry: Arc<WorkflowRegistry>, coordinator: Arc<ExecutionCoordinator>) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            job_uuid_map: Arc::new(RwLock::new(HashMap::new())),
            registry,
            coordinator,
        })
    }

    /// Register schedule triggers from every workflow and start ticking
    pub async fn start(&self) -> Result<()> {
        tracing::info!("⏰ Starting cron scheduler service");

        let workflows = self.registry.latest_all();
        let mut total_triggers = 0;
        for workflow in &workflows {
            total_triggers += self.add_or_update_workflow_triggers(workflow).await?;
        }
        tracing::info!("📊 Registered {} cron triggers from {} workflows", total_triggers, workflows.len());

        {
            let scheduler = self.scheduler.read().await;
            scheduler.start().await?;
        }

        tracing::info!("✅ Cron scheduler started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping cron scheduler service ({} jobs)", self.job_count().await);
        self.job_uuid_map.write().await.clear();

        let mut scheduler = self.scheduler.write().await;
        scheduler.shutdown().await?;

        tracing::info!("✅ Cron scheduler stopped");
        Ok(())
    }

    /// Replace the jobs of a workflow with its current schedule triggers
    ///
    /// Returns the number of jobs registered.
    pub async fn add_or_update_workflow_triggers(&self, workflow: &WorkflowDefinition) -> Result<usize> {
        self.remove_workflow_triggers(&workflow.id).await;

        let triggers = schedule_triggers(workflow);
        for (trigger, cron) in &triggers {
            self.add_job(&workflow.id, trigger, cron).await?;
        }

        if !triggers.is_empty() {
            tracing::info!("🔥 Hot-reloaded {} cron triggers for workflow: {}", triggers.len(), workflow.id);
        }
        Ok(triggers.len())
    }

    pub async fn remove_workflow_triggers(&self, workflow_id: &str) {
        let prefix = format!("{}:", workflow_id);
        let mut job_uuid_map = self.job_uuid_map.write().await;
        let keys_to_remove: Vec<String> = job_uuid_map.keys().filter(|key| key.starts_with(&prefix)).cloned().collect();

        for key in keys_to_remove {
            if let Some(job_uuid) = job_uuid_map.remove(&key) {
                let scheduler = self.scheduler.read().await;
                if let Err(e) = scheduler.remove(&job_uuid).await {
                    tracing::warn!("⚠️ Failed to remove job {} from scheduler: {}", key, e);
                } else {
                    tracing::debug!("🛑 Removed cron job: {}", key);
                }
            }
        }
    }

    /// Number of registered cron jobs
    pub async fn job_count(&self) -> usize {
        self.job_uuid_map.read().await.len()
    }

    async fn add_job(&self, workflow_id: &str, trigger: &Trigger, cron: &str) -> Result<()> {
        let job_id = format!("{}:{}", workflow_id, trigger.id);

        let workflow_id_owned = workflow_id.to_string();
        let trigger_owned = trigger.clone();
        let coordinator = Arc::clone(&self.coordinator);

        let job = Job::new_async(cron, move |_uuid, _l| {
            let workflow_id = workflow_id_owned.clone();
            let trigger = trigger_owned.clone();
            let coordinator = Arc::clone(&coordinator);

            Box::pin(async move {
                tracing::debug!("🔔 Cron trigger activated: {} in workflow {}", trigger.id, workflow_id);
                let dispatch = coordinator.submit(tick_request(&workflow_id, &trigger, Utc::now())).await;
                if dispatch.deduplicated {
                    tracing::debug!("⏭️ Tick already handled by execution {}", dispatch.record.id);
                } else {
                    tracing::info!("🚀 Cron-triggered execution {} for workflow {}", dispatch.record.id, workflow_id);
                }
            })
        })
        .map_err(|e| anyhow::anyhow!("Invalid cron expression '{}' for trigger {}: {}", cron, trigger.id, e))?;

        let job_uuid = {
            let scheduler = self.scheduler.read().await;
            scheduler.add(job).await?
        };
        self.job_uuid_map.write().await.insert(job_id.clone(), job_uuid);

        tracing::info!("⏰ Registered cron job: {} ({})", job_id, cron);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::engine::CoordinatorSettings;
    use crate::runtime::executor::{ExecutorSettings, NodeExecutor};
    use crate::runtime::idempotency::IdempotencyStore;
    use crate::runtime::record::MemoryExecutionStore;
    use crate::workflow::types::{Node, NodeType};
    use chrono::TimeZone;

    async fn service() -> CronSchedulerService {
        let registry = Arc::new(WorkflowRegistry::new());
        let coordinator = Arc::new(ExecutionCoordinator::new(
            registry.clone(),
            Arc::new(MemoryExecutionStore::new()),
            Arc::new(NodeExecutor::new(ExecutorSettings::default())),
            Arc::new(IdempotencyStore::new()),
            CoordinatorSettings::default(),
        ));
        CronSchedulerService::new(registry, coordinator).await.unwrap()
    }

    fn workflow() -> WorkflowDefinition {
        WorkflowDefinition {
            id: "wf".into(),
            name: "nightly".into(),
            nodes: vec![Node::new("T", NodeType::Trigger), Node::new("H", NodeType::Trigger)],
            connections: vec![],
            triggers: vec![
                Trigger {
                    id: "nightly".into(),
                    node_id: "T".into(),
                    kind: TriggerKind::Schedule { cron: "0 0 2 * * *".into() },
                },
                Trigger {
                    id: "hook".into(),
                    node_id: "H".into(),
                    kind: TriggerKind::Webhook { path: "in".into() },
                },
            ],
            version: 1,
        }
    }

    #[test]
    fn only_schedule_triggers_are_registered() {
        let wf = workflow();
        let triggers = schedule_triggers(&wf);
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].0.id, "nightly");
        assert_eq!(triggers[0].1, "0 0 2 * * *");
    }

    #[test]
    fn tick_requests_share_a_key_within_the_same_second() {
        let wf = workflow();
        let trigger = &wf.triggers[0];
        let tick = Utc.with_ymd_and_hms(2026, 1, 2, 2, 0, 0).unwrap();

        let request = tick_request("wf", trigger, tick);
        assert_eq!(request.idempotency_key, Some(format!("nightly:{}", tick.timestamp())));
        assert_eq!(request.start_node.as_deref(), Some("T"));
        assert_eq!(request.payload["trigger_id"], "nightly");
        assert_eq!(tick_request("wf", trigger, tick).idempotency_key, request.idempotency_key);
    }

    #[tokio::test]
    async fn jobs_follow_workflow_updates_and_removal() {
        let service = service().await;
        let wf = workflow();

        assert_eq!(service.add_or_update_workflow_triggers(&wf).await.unwrap(), 1);
        assert_eq!(service.job_count().await, 1);

        // Re-publishing replaces jobs rather than stacking them
        service.add_or_update_workflow_triggers(&wf).await.unwrap();
        assert_eq!(service.job_count().await, 1);

        service.remove_workflow_triggers("wf").await;
        assert_eq!(service.job_count().await, 0);
    }

    #[tokio::test]
    async fn invalid_cron_expression_is_rejected() {
        let service = service().await;
        let mut wf = workflow();
        wf.triggers[0].kind = TriggerKind::Schedule { cron: "every night".into() };

        assert!(service.add_or_update_workflow_triggers(&wf).await.is_err());
        assert_eq!(service.job_count().await, 0);
    }
}
