//! Bulk message campaigns sent through one connection to a list of contacts.

pub mod dispatch;
mod handlers;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::error::{AppError, AppResult};
use crate::core::shared::schema::{campaign_contacts, campaigns};

pub use handlers::configure_campaigns_routes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Pending,
    Scheduled,
    Processing,
    Canceled,
    Finished,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Processing => "processing",
            Self::Canceled => "canceled",
            Self::Finished => "finished",
        }
    }

    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Pending | Self::Canceled)
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "scheduled" => Ok(Self::Scheduled),
            "processing" => Ok(Self::Processing),
            "canceled" => Ok(Self::Canceled),
            "finished" => Ok(Self::Finished),
            _ => Err(AppError::bad_request("ERR_INVALID_CAMPAIGN_STATUS")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = campaigns)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Campaign {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub status: String,
    pub start_at: DateTime<Utc>,
    pub message1: String,
    pub message2: String,
    pub message3: String,
    pub media_url: Option<String>,
    pub session_id: Uuid,
    pub delay_seconds: i32,
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = campaign_contacts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CampaignContact {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub contact_id: Uuid,
    pub ack: i32,
    pub message_random: Option<String>,
    pub body: Option<String>,
    pub external_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    pub fn status(&self) -> CampaignStatus {
        self.status.parse().unwrap_or(CampaignStatus::Pending)
    }

    /// Non-empty message variants with their column label.
    pub fn variants(&self) -> Vec<(&'static str, &str)> {
        [
            ("message1", self.message1.as_str()),
            ("message2", self.message2.as_str()),
            ("message3", self.message3.as_str()),
        ]
        .into_iter()
        .filter(|(_, text)| !text.trim().is_empty())
        .collect()
    }

    /// Picks one variant uniformly at random.
    pub fn pick_variant<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<(&'static str, String)> {
        self.variants()
            .choose(rng)
            .map(|(label, text)| (*label, (*text).to_string()))
    }
}

/// Replaces the `{{name}}` placeholder with the contact's name.
pub fn render_message(template: &str, contact_name: &str) -> String {
    template.replace("{{name}}", contact_name)
}

/// Text actually sent: the rendered message, followed by the campaign's media
/// link on its own line when there is one. Only text goes out on the channel.
pub fn compose_campaign_body(rendered: &str, media_url: Option<&str>) -> String {
    match media_url.map(str::trim).filter(|url| !url.is_empty()) {
        Some(url) if rendered.trim().is_empty() => url.to_string(),
        Some(url) => format!("{rendered}\n{url}"),
        None => rendered.to_string(),
    }
}

/// Checks the preconditions for scheduling a campaign.
pub fn validate_start(campaign: &Campaign, contact_count: i64, now: DateTime<Utc>) -> AppResult<()> {
    if !campaign.status().is_editable() {
        return Err(AppError::bad_request("ERR_CAMPAIGN_NOT_EDITABLE"));
    }
    if contact_count == 0 {
        return Err(AppError::bad_request("ERR_CAMPAIGN_CONTACTS_NOT_EXISTS"));
    }
    if campaign.start_at <= now {
        return Err(AppError::bad_request("ERR_CAMPAIGN_DATE_NOT_FUTURE"));
    }
    if campaign.variants().is_empty() {
        return Err(AppError::bad_request("ERR_CAMPAIGN_MESSAGE_REQUIRED"));
    }
    Ok(())
}

pub fn find_campaign(conn: &mut PgConnection, tenant_id: Uuid, id: Uuid) -> AppResult<Campaign> {
    campaigns::table
        .filter(campaigns::id.eq(id))
        .filter(campaigns::tenant_id.eq(tenant_id))
        .select(Campaign::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("ERR_CAMPAIGN_NOT_FOUND"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn campaign() -> Campaign {
        let now = Utc::now();
        Campaign {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "Black friday".into(),
            status: "pending".into(),
            start_at: now + Duration::hours(1),
            message1: "Hi {{name}}".into(),
            message2: String::new(),
            message3: "Hello {{name}}!".into(),
            media_url: None,
            session_id: Uuid::new_v4(),
            delay_seconds: 20,
            user_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_empty_variants_are_skipped() {
        let c = campaign();
        let labels: Vec<_> = c.variants().into_iter().map(|(l, _)| l).collect();
        assert_eq!(labels, vec!["message1", "message3"]);

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let (label, _) = c.pick_variant(&mut rng).unwrap();
            assert_ne!(label, "message2");
        }
    }

    #[test]
    fn test_render_name_placeholder() {
        assert_eq!(render_message("Hi {{name}}, {{name}}", "Ana"), "Hi Ana, Ana");
    }

    #[test]
    fn test_media_link_follows_message() {
        let url = "https://cdn.example.com/promo.jpg";
        assert_eq!(
            compose_campaign_body("Hi Ana", Some(url)),
            format!("Hi Ana\n{url}")
        );
        assert_eq!(compose_campaign_body("Hi Ana", Some("  ")), "Hi Ana");
        assert_eq!(compose_campaign_body("Hi Ana", None), "Hi Ana");
        assert_eq!(compose_campaign_body(" ", Some(url)), url);
    }

    #[test]
    fn test_start_requires_contacts_and_future_date() {
        let now = Utc::now();
        let mut c = campaign();
        assert!(validate_start(&c, 3, now).is_ok());
        assert_eq!(
            validate_start(&c, 0, now).unwrap_err().to_string(),
            "ERR_CAMPAIGN_CONTACTS_NOT_EXISTS"
        );

        c.start_at = now - Duration::minutes(1);
        assert_eq!(
            validate_start(&c, 3, now).unwrap_err().to_string(),
            "ERR_CAMPAIGN_DATE_NOT_FUTURE"
        );
    }

    #[test]
    fn test_start_requires_a_message() {
        let mut c = campaign();
        c.message1.clear();
        c.message3 = "   ".into();
        assert_eq!(
            validate_start(&c, 1, Utc::now()).unwrap_err().to_string(),
            "ERR_CAMPAIGN_MESSAGE_REQUIRED"
        );
    }

    #[test]
    fn test_only_pending_or_canceled_is_editable() {
        assert!(CampaignStatus::Pending.is_editable());
        assert!(CampaignStatus::Canceled.is_editable());
        assert!(!CampaignStatus::Processing.is_editable());
        assert!(!CampaignStatus::Finished.is_editable());
    }
}
