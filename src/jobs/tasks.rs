use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use log::warn;
use uuid::Uuid;

use super::ScheduledJob;
use crate::campaigns::dispatch::dispatch_campaigns;
use crate::chat_flow::process_timeouts;
use crate::core::error::AppResult;
use crate::core::shared::schema::tenants;
use crate::core::shared::state::AppState;
use crate::messages::scheduled::dispatch_scheduled;
use crate::settings::{load_settings, TenantSettings};
use crate::tickets::service::close_inactive_tickets;

/// Closes stale tickets per tenant according to its auto-close settings.
pub struct AutoCloseJob;

#[async_trait]
impl ScheduledJob for AutoCloseJob {
    fn name(&self) -> &'static str {
        "auto_close_tickets"
    }

    async fn run(&self, state: &AppState) -> AppResult<usize> {
        let tenants: Vec<(Uuid, TenantSettings)> = state
            .run_db(|conn| {
                let ids: Vec<Uuid> = tenants::table
                    .filter(tenants::status.eq("active"))
                    .select(tenants::id)
                    .load(conn)?;
                ids.into_iter()
                    .map(|id| Ok((id, load_settings(conn, id)?)))
                    .collect::<AppResult<Vec<_>>>()
            })
            .await?;

        let now = Utc::now();
        let mut closed = 0;
        for (tenant_id, settings) in tenants {
            // one tenant failing must not block the others
            match close_inactive_tickets(state, tenant_id, &settings, now).await {
                Ok(n) => closed += n,
                Err(e) => warn!("Auto-close failed for tenant {tenant_id}: {e}"),
            }
        }
        Ok(closed)
    }
}

pub struct CampaignDispatchJob;

#[async_trait]
impl ScheduledJob for CampaignDispatchJob {
    fn name(&self) -> &'static str {
        "campaign_dispatch"
    }

    async fn run(&self, state: &AppState) -> AppResult<usize> {
        dispatch_campaigns(state, Utc::now()).await
    }
}

pub struct ScheduledMessagesJob;

#[async_trait]
impl ScheduledJob for ScheduledMessagesJob {
    fn name(&self) -> &'static str {
        "scheduled_messages"
    }

    async fn run(&self, state: &AppState) -> AppResult<usize> {
        dispatch_scheduled(state, Utc::now()).await
    }
}

pub struct ChatFlowTimeoutJob;

#[async_trait]
impl ScheduledJob for ChatFlowTimeoutJob {
    fn name(&self) -> &'static str {
        "chat_flow_timeouts"
    }

    async fn run(&self, state: &AppState) -> AppResult<usize> {
        process_timeouts(state, Utc::now()).await
    }
}
