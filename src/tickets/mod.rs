//! Conversation tickets: the state machine that ties contacts, connections,
//! agents and queues together.

mod handlers;
pub mod lifecycle;
pub mod service;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::contacts::Contact;
use crate::core::shared::schema::{logs_tickets, tickets};

pub use handlers::configure_tickets_routes;
pub use lifecycle::{LogType, TicketChange, TicketStatus};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = tickets)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Ticket {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub contact_id: Uuid,
    pub whatsapp_id: Uuid,
    pub user_id: Option<Uuid>,
    pub queue_id: Option<Uuid>,
    pub status: String,
    pub channel: String,
    pub unread_messages: i32,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub answered: bool,
    pub is_group: bool,
    pub is_farewell_message: bool,
    pub chat_flow_id: Option<Uuid>,
    pub step_chat_flow: Option<String>,
    pub bot_retries: i32,
    pub started_attendance_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    pub fn status(&self) -> TicketStatus {
        self.status.parse().unwrap_or(TicketStatus::Pending)
    }

    pub fn in_chat_flow(&self) -> bool {
        self.chat_flow_id.is_some() && self.step_chat_flow.is_some()
    }

    pub fn state(&self) -> lifecycle::TicketState {
        lifecycle::TicketState {
            status: self.status(),
            user_id: self.user_id,
            queue_id: self.queue_id,
            started_attendance_at: self.started_attendance_at,
        }
    }

    pub fn visibility(&self) -> lifecycle::VisibilityFacts {
        lifecycle::VisibilityFacts {
            user_id: self.user_id,
            queue_id: self.queue_id,
            in_chat_flow: self.in_chat_flow(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = logs_tickets)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TicketLog {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub ticket_id: Uuid,
    pub user_id: Option<Uuid>,
    pub queue_id: Option<Uuid>,
    pub log_type: String,
    pub created_at: DateTime<Utc>,
}

/// Ticket as sent to clients, with its contact inlined.
#[derive(Debug, Clone, Serialize)]
pub struct TicketView {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub contact: Option<Contact>,
}
