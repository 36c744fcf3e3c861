//! In-memory client and server used by the `simulate` command

use chrono::Utc;
use ferrosync_config::Config;
use ferrosync_core::{LocalSyncClient, MemoryProvider, Relationship, SyncEntity};
use ferrosync_engine::{SyncPair, SyncProfile};
use ferrosync_types::{CancellationContext, Result, SyncId, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// A project owning tasks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
    pub id: i64,
    pub sync_id: SyncId,
    pub created_on: Timestamp,
    pub modified_on: Timestamp,
    pub is_deleted: bool,
    pub name: String,
}

impl SyncEntity for Project {
    const TYPE_NAME: &'static str = "Project";
    ferrosync_core::sync_entity_accessors!();
}

/// A task, optionally in a project
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
    pub id: i64,
    pub sync_id: SyncId,
    pub created_on: Timestamp,
    pub modified_on: Timestamp,
    pub is_deleted: bool,
    pub title: String,
    pub done: bool,
    pub project_id: Option<i64>,
    pub project_sync_id: Option<SyncId>,
}

impl SyncEntity for Task {
    const TYPE_NAME: &'static str = "Task";
    ferrosync_core::sync_entity_accessors!();

    fn relationships() -> Vec<Relationship<Self>> {
        vec![Relationship::to::<Project>(
            "project",
            "project_id",
            "project_sync_id",
            |task| task.project_sync_id,
            |task, id| task.project_id = id,
        )]
    }
}

/// Row counts of one side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub projects: usize,
    pub tasks: usize,
}

/// Two in-memory stores that persist across runs
#[derive(Debug, Clone)]
pub struct Demo {
    client: MemoryProvider,
    server: MemoryProvider,
    sync_order: Vec<String>,
}

impl Demo {
    /// Seed both sides with `records` tasks spread over a few projects
    pub fn seeded(records: usize, latency: Option<Duration>, config: &Config) -> Result<Self> {
        let demo = Self {
            client: provider(latency),
            server: provider(latency),
            sync_order: config.sync.sync_order.clone(),
        };
        demo.seed(&demo.client, "Local", records)?;
        demo.seed(&demo.server, "Remote", records)?;
        Ok(demo)
    }

    fn seed(&self, provider: &MemoryProvider, prefix: &str, records: usize) -> Result<()> {
        let project_count = records.div_ceil(10).max(1);
        let mut projects = Vec::with_capacity(project_count);
        for index in 0..project_count {
            let now = Utc::now();
            projects.push(provider.insert(Project {
                sync_id: Uuid::new_v4(),
                created_on: now,
                modified_on: now,
                name: format!("{} project {}", prefix, index + 1),
                ..Project::default()
            })?);
        }

        for index in 0..records {
            let now = Utc::now();
            let project = &projects[index % projects.len()];
            provider.insert(Task {
                sync_id: Uuid::new_v4(),
                created_on: now,
                modified_on: now,
                title: format!("{} task {}", prefix, index + 1),
                done: index % 3 == 0,
                project_id: Some(project.id),
                project_sync_id: Some(project.sync_id),
                ..Task::default()
            })?;
        }
        Ok(())
    }

    /// Build the client pair for one run
    pub fn pair(&self, profile: &SyncProfile, cancellation: &CancellationContext) -> Result<SyncPair> {
        let client = self.node(format!("{}-client", profile.name), &self.client, cancellation)?;
        let server = self.node(format!("{}-server", profile.name), &self.server, cancellation)?;
        Ok(SyncPair { client, server })
    }

    fn node(
        &self,
        name: String,
        provider: &MemoryProvider,
        cancellation: &CancellationContext,
    ) -> Result<Arc<dyn ferrosync_core::SyncClient>> {
        let client = LocalSyncClient::builder(name, provider.clone())
            .register::<Project>()
            .register::<Task>()
            .with_sync_order(self.sync_order.iter().cloned())
            .with_cancellation(cancellation.clone())
            .build()?;
        Ok(Arc::new(client))
    }

    /// Row counts of the client store
    pub fn client_counts(&self) -> Result<Counts> {
        counts(&self.client)
    }

    /// Row counts of the server store
    pub fn server_counts(&self) -> Result<Counts> {
        counts(&self.server)
    }
}

fn provider(latency: Option<Duration>) -> MemoryProvider {
    let builder = MemoryProvider::builder()
        .with_entity::<Project>()
        .with_entity::<Task>();
    match latency {
        Some(latency) => builder.with_latency(latency).build(),
        None => builder.build(),
    }
}

fn counts(provider: &MemoryProvider) -> Result<Counts> {
    Ok(Counts {
        projects: provider.count::<Project>()?,
        tasks: provider.count::<Task>()?,
    })
}
