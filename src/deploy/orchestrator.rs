//! Deployment orchestrator
//!
//! A single dispatcher owns one FIFO queue per application; each queue is
//! drained by at most one worker task, which makes "one active deployment
//! per application" structural. Enqueueing behind a waiting deployment
//! replaces it (newest wins); enqueueing the same trigger id twice returns
//! the existing queued deployment.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use uuid::Uuid;

use crate::deploy::{pipeline, PipelineContext};
use crate::errors::{PloyerError, Result};
use crate::models::deployment::image_tag;
use crate::models::{Application, Deployment, DeploymentStatus, Event};
use crate::store::{ApplicationRepository, DeploymentRepository};
use crate::utils::CancelFlag;

/// What caused a deployment to be enqueued.
#[derive(Debug, Clone)]
pub enum DeployTrigger {
    /// Explicit API request
    Manual,
    /// Push webhook; the provider delivery id de-duplicates redeliveries
    Webhook { delivery_id: String },
}

impl DeployTrigger {
    pub fn id(&self) -> Option<&str> {
        match self {
            DeployTrigger::Manual => None,
            DeployTrigger::Webhook { delivery_id } => Some(delivery_id),
        }
    }
}

#[derive(Default)]
struct AppQueue {
    queue: VecDeque<String>,
    draining: bool,
}

pub struct Orchestrator {
    ctx: Arc<PipelineContext>,
    queues: AsyncMutex<HashMap<String, AppQueue>>,
    cancels: Mutex<HashMap<String, CancelFlag>>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<PipelineContext>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            queues: AsyncMutex::new(HashMap::new()),
            cancels: Mutex::new(HashMap::new()),
        })
    }

    /// Create a queued deployment and hand it to the application's worker.
    pub async fn enqueue(
        self: &Arc<Self>,
        app: &Application,
        trigger: DeployTrigger,
    ) -> Result<Deployment> {
        let deployments = DeploymentRepository::new(self.ctx.pool.clone());

        if let Some(trigger_id) = trigger.id() {
            if let Some(existing) = deployments
                .find_queued_by_trigger(&app.id, trigger_id)
                .await?
            {
                info!(
                    "Trigger {} already queued as deployment {}",
                    trigger_id, existing.id
                );
                return Ok(existing);
            }
        }

        let id = Uuid::new_v4().to_string();
        let tag = image_tag(&app.name, &id);
        let deployment = deployments
            .create(&id, &app.id, &app.server_id, &tag, trigger.id())
            .await?;

        {
            let mut cancels = self.cancels.lock().unwrap_or_else(|e| e.into_inner());
            cancels.insert(id.clone(), CancelFlag::new());
        }

        self.ctx.bus.publish(Event::DeploymentStatus {
            deployment_id: id.clone(),
            application_id: app.id.clone(),
            status: DeploymentStatus::Queued,
        });

        // Queue maintenance: only the newest waiting deployment survives
        let (stale, start_worker) = {
            let mut queues = self.queues.lock().await;
            let q = queues.entry(app.id.clone()).or_default();
            let stale: Vec<String> = q.queue.drain(..).collect();
            q.queue.push_back(id.clone());
            let start = !q.draining;
            if start {
                q.draining = true;
            }
            (stale, start)
        };

        for old_id in stale {
            if deployments.cancel(&old_id).await.unwrap_or(false) {
                info!("Collapsed queued deployment {} behind {}", old_id, id);
                self.forget_cancel(&old_id);
                self.ctx.bus.publish(Event::DeploymentStatus {
                    deployment_id: old_id,
                    application_id: app.id.clone(),
                    status: DeploymentStatus::Cancelled,
                });
            }
        }

        if start_worker {
            let orchestrator = self.clone();
            let application_id = app.id.clone();
            tokio::spawn(async move {
                orchestrator.drain(application_id).await;
            });
        }

        Ok(deployment)
    }

    /// Worker loop: runs the application's deployments one at a time.
    async fn drain(self: Arc<Self>, application_id: String) {
        let deployments = DeploymentRepository::new(self.ctx.pool.clone());
        let apps = ApplicationRepository::new(self.ctx.pool.clone());

        loop {
            let next = {
                let mut queues = self.queues.lock().await;
                let q = queues.entry(application_id.clone()).or_default();
                match q.queue.pop_front() {
                    Some(id) => id,
                    None => {
                        q.draining = false;
                        break;
                    }
                }
            };

            let deployment = match deployments.find_by_id(&next).await {
                Ok(Some(d)) => d,
                _ => {
                    self.forget_cancel(&next);
                    continue;
                }
            };

            // Cancelled while waiting, or raced by collapse
            if deployment.status != DeploymentStatus::Queued {
                self.forget_cancel(&next);
                continue;
            }

            let app = match apps.find_by_id(&application_id).await {
                Ok(Some(app)) => app,
                _ => {
                    warn!(
                        "Application {} vanished; cancelling deployment {}",
                        application_id, next
                    );
                    let _ = deployments.cancel(&next).await;
                    self.forget_cancel(&next);
                    continue;
                }
            };

            let cancel = self.cancel_flag(&next);
            pipeline::execute(&self.ctx, app, deployment, cancel).await;
            self.forget_cancel(&next);
        }
    }

    /// Cancel a deployment that has not reached `running`. Conflict
    /// otherwise; a second cancel is a conflict too.
    pub async fn cancel(&self, deployment_id: &str) -> Result<Deployment> {
        let deployments = DeploymentRepository::new(self.ctx.pool.clone());

        let deployment = deployments
            .find_by_id(deployment_id)
            .await?
            .ok_or_else(|| PloyerError::NotFound("deployment not found".to_string()))?;

        if !deployment.status.is_cancellable() {
            return Err(PloyerError::Conflict(format!(
                "deployment is {} and cannot be cancelled",
                deployment.status.as_str()
            )));
        }

        // Signal the pipeline first so an in-flight build stops promptly
        let flag = {
            let cancels = self.cancels.lock().unwrap_or_else(|e| e.into_inner());
            cancels.get(deployment_id).cloned()
        };
        if let Some(flag) = flag {
            flag.cancel();
        }

        if deployments.cancel(deployment_id).await? {
            self.ctx.bus.publish(Event::DeploymentStatus {
                deployment_id: deployment_id.to_string(),
                application_id: deployment.application_id.clone(),
                status: DeploymentStatus::Cancelled,
            });
        }

        deployments
            .find_by_id(deployment_id)
            .await?
            .ok_or_else(|| PloyerError::NotFound("deployment not found".to_string()))
    }

    /// Cancel whatever is queued or in flight for an application; used when
    /// the application is deleted.
    pub async fn cancel_active(&self, application_id: &str) -> Result<()> {
        let deployments = DeploymentRepository::new(self.ctx.pool.clone());

        for deployment in deployments.active_for_app(application_id).await? {
            match self.cancel(&deployment.id).await {
                Ok(_) => {}
                Err(PloyerError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn cancel_flag(&self, deployment_id: &str) -> CancelFlag {
        let mut cancels = self.cancels.lock().unwrap_or_else(|e| e.into_inner());
        cancels
            .entry(deployment_id.to_string())
            .or_default()
            .clone()
    }

    fn forget_cancel(&self, deployment_id: &str) {
        let mut cancels = self.cancels.lock().unwrap_or_else(|e| e.into_inner());
        cancels.remove(deployment_id);
    }
}
