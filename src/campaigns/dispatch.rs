//! Background delivery of scheduled campaigns.

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use log::{debug, info, warn};

use super::{compose_campaign_body, render_message, Campaign, CampaignContact, CampaignStatus};
use crate::contacts::Contact;
use crate::core::error::AppResult;
use crate::core::shared::schema::{campaign_contacts, campaigns, contacts};
use crate::core::shared::state::AppState;
use crate::realtime::{emit, EventKind, SocketEvent};
use crate::whatsapp::{find_connection, Whatsapp};

/// Whether a campaign may send its next message, given when it last sent one.
pub fn next_send_due(last_sent: Option<DateTime<Utc>>, delay_seconds: i32, now: DateTime<Utc>) -> bool {
    match last_sent {
        Some(at) => at + Duration::seconds(i64::from(delay_seconds.max(0))) <= now,
        None => true,
    }
}

fn update_status(conn: &mut PgConnection, campaign: &Campaign, status: CampaignStatus) -> QueryResult<Campaign> {
    diesel::update(campaigns::table.find(campaign.id))
        .set((
            campaigns::status.eq(status.as_str()),
            campaigns::updated_at.eq(Utc::now()),
        ))
        .returning(Campaign::as_returning())
        .get_result(conn)
}

fn announce(state: &AppState, campaign: &Campaign) {
    emit(
        state,
        SocketEvent::new(campaign.tenant_id, EventKind::CampaignUpdate, campaign),
    );
}

/// Promotes scheduled campaigns whose start time has passed.
fn activate_due(conn: &mut PgConnection, now: DateTime<Utc>) -> QueryResult<Vec<Campaign>> {
    let due: Vec<Campaign> = campaigns::table
        .filter(campaigns::status.eq(CampaignStatus::Scheduled.as_str()))
        .filter(campaigns::start_at.le(now))
        .select(Campaign::as_select())
        .load(conn)?;
    let mut started = Vec::with_capacity(due.len());
    for campaign in &due {
        started.push(update_status(conn, campaign, CampaignStatus::Processing)?);
        info!("Campaign {} started", campaign.id);
    }
    Ok(started)
}

fn next_recipient(
    conn: &mut PgConnection,
    campaign: &Campaign,
) -> QueryResult<Option<(CampaignContact, Contact)>> {
    campaign_contacts::table
        .inner_join(contacts::table)
        .filter(campaign_contacts::campaign_id.eq(campaign.id))
        .filter(campaign_contacts::sent_at.is_null())
        .order(campaign_contacts::created_at.asc())
        .select((CampaignContact::as_select(), Contact::as_select()))
        .first(conn)
        .optional()
}

fn last_sent_at(conn: &mut PgConnection, campaign: &Campaign) -> QueryResult<Option<DateTime<Utc>>> {
    campaign_contacts::table
        .filter(campaign_contacts::campaign_id.eq(campaign.id))
        .select(diesel::dsl::max(campaign_contacts::sent_at))
        .first(conn)
}

/// What one campaign does on this pass.
enum Step {
    Wait,
    /// Status changed without sending.
    Moved(Campaign),
    Send {
        entry: CampaignContact,
        contact: Contact,
        connection: Whatsapp,
        label: &'static str,
        body: String,
    },
}

fn plan_step(conn: &mut PgConnection, campaign: &Campaign, now: DateTime<Utc>) -> AppResult<Step> {
    let Some((entry, contact)) = next_recipient(conn, campaign)? else {
        info!("Campaign {} finished", campaign.id);
        return Ok(Step::Moved(update_status(conn, campaign, CampaignStatus::Finished)?));
    };
    if !next_send_due(last_sent_at(conn, campaign)?, campaign.delay_seconds, now) {
        return Ok(Step::Wait);
    }

    let Some((label, template)) = campaign.pick_variant(&mut rand::thread_rng()) else {
        warn!("Campaign {} has no message left, canceling", campaign.id);
        return Ok(Step::Moved(update_status(conn, campaign, CampaignStatus::Canceled)?));
    };
    let body = compose_campaign_body(
        &render_message(&template, &contact.name),
        campaign.media_url.as_deref(),
    );
    let connection = find_connection(conn, campaign.tenant_id, campaign.session_id)?;
    Ok(Step::Send {
        entry,
        contact,
        connection,
        label,
        body,
    })
}

/// Sends the next message of one processing campaign, finishing it when no
/// recipient is left. Returns whether a message went out.
async fn advance(state: &AppState, campaign: Campaign, now: DateTime<Utc>) -> AppResult<bool> {
    let campaign_id = campaign.id;
    let step = state
        .run_db(move |conn| plan_step(conn, &campaign, now))
        .await?;
    let (entry, contact, connection, label, body) = match step {
        Step::Wait => return Ok(false),
        Step::Moved(updated) => {
            announce(state, &updated);
            return Ok(false);
        }
        Step::Send {
            entry,
            contact,
            connection,
            label,
            body,
        } => (entry, contact, connection, label, body),
    };

    let (external_id, ack) = match state.channels.send_text(&connection, &contact.number, &body).await {
        Ok(sent) => (sent.external_id, 1),
        Err(e) => {
            warn!("Campaign {campaign_id} failed for contact {}: {e}", contact.id);
            (None, -1)
        }
    };

    state
        .run_db(move |conn| {
            diesel::update(campaign_contacts::table.find(entry.id))
                .set((
                    campaign_contacts::message_random.eq(label),
                    campaign_contacts::body.eq(body.as_str()),
                    campaign_contacts::external_id.eq(external_id),
                    campaign_contacts::ack.eq(ack),
                    campaign_contacts::sent_at.eq(Utc::now()),
                ))
                .execute(conn)?;
            Ok(())
        })
        .await?;
    debug!("Campaign {campaign_id} sent {label} to {}", contact.id);
    Ok(ack >= 0)
}

/// One pass of the campaign dispatcher over every tenant.
pub async fn dispatch_campaigns(state: &AppState, now: DateTime<Utc>) -> AppResult<usize> {
    let (started, running) = state
        .run_db(move |conn| {
            let started = activate_due(conn, now)?;
            let running: Vec<Campaign> = campaigns::table
                .filter(campaigns::status.eq(CampaignStatus::Processing.as_str()))
                .select(Campaign::as_select())
                .load(conn)?;
            Ok((started, running))
        })
        .await?;
    for campaign in &started {
        announce(state, campaign);
    }

    let mut sent = 0;
    for campaign in running {
        let id = campaign.id;
        match advance(state, campaign, now).await {
            Ok(true) => sent += 1,
            Ok(false) => {}
            Err(e) => warn!("Campaign {id} dispatch failed: {e}"),
        }
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_message_is_always_due() {
        assert!(next_send_due(None, 30, Utc::now()));
    }

    #[test]
    fn test_delay_spaces_messages() {
        let now = Utc::now();
        assert!(!next_send_due(Some(now - Duration::seconds(10)), 20, now));
        assert!(next_send_due(Some(now - Duration::seconds(20)), 20, now));
        assert!(next_send_due(Some(now), 0, now));
    }
}
