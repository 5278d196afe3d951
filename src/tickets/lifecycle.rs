//! Ticket state rules, kept free of I/O so they can be checked in isolation.
//!
//! The service layer loads what these functions need, applies the returned plan
//! and persists the resulting logs.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channels::ChannelType;
use crate::core::error::{AppError, AppResult};
use crate::settings::TenantSettings;

/// A closed conversation newer than this is reopened instead of replaced.
pub const REOPEN_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Pending,
    Open,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            _ => Err(AppError::bad_request("ERR_INVALID_TICKET_STATUS")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogType {
    #[serde(rename = "create")]
    Create,
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "closed")]
    Closed,
    #[serde(rename = "reopen")]
    Reopen,
    #[serde(rename = "transfered")]
    Transfered,
    #[serde(rename = "queue")]
    Queue,
    #[serde(rename = "userDefine")]
    UserDefine,
    #[serde(rename = "autoClose")]
    AutoClose,
    #[serde(rename = "chatBot")]
    ChatBot,
    #[serde(rename = "delete")]
    Delete,
}

impl LogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Open => "open",
            Self::Pending => "pending",
            Self::Closed => "closed",
            Self::Reopen => "reopen",
            Self::Transfered => "transfered",
            Self::Queue => "queue",
            Self::UserDefine => "userDefine",
            Self::AutoClose => "autoClose",
            Self::ChatBot => "chatBot",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for LogType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The routing-relevant part of a ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketState {
    pub status: TicketStatus,
    pub user_id: Option<Uuid>,
    pub queue_id: Option<Uuid>,
    pub started_attendance_at: Option<DateTime<Utc>>,
}

/// Requested changes; `Some(None)` clears the user or queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicketChange {
    pub status: Option<TicketStatus>,
    pub user_id: Option<Option<Uuid>>,
    pub queue_id: Option<Option<Uuid>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub status: TicketStatus,
    pub user_id: Option<Uuid>,
    pub queue_id: Option<Uuid>,
    pub started_attendance_at: Option<DateTime<Utc>>,
    /// `Some` when the closing timestamp changes (set on close, cleared on reopen).
    pub closed_at: Option<Option<DateTime<Utc>>>,
    pub clear_chat_flow: bool,
    pub reopened: bool,
    pub closing: bool,
    pub logs: Vec<LogType>,
}

/// Computes the effect of `change` requested by `actor` on a ticket in `current` state.
/// System actions (auto-close, chat flow) pass no actor.
pub fn plan_transition(
    current: &TicketState,
    change: &TicketChange,
    actor: Option<Uuid>,
    now: DateTime<Utc>,
) -> AppResult<Transition> {
    if current.status == TicketStatus::Closed && change.status == Some(TicketStatus::Closed) {
        return Err(AppError::bad_request("ERR_TICKET_ALREADY_CLOSED"));
    }

    let status = change.status.unwrap_or(current.status);
    let mut user_id = change.user_id.unwrap_or(current.user_id);
    let queue_id = change.queue_id.unwrap_or(current.queue_id);
    let mut started_attendance_at = current.started_attendance_at;
    let mut closed_at = None;
    let mut clear_chat_flow = false;
    let mut logs = Vec::new();

    let reopened = current.status == TicketStatus::Closed && status != TicketStatus::Closed;
    let closing = current.status != TicketStatus::Closed && status == TicketStatus::Closed;

    if reopened {
        closed_at = Some(None);
        logs.push(LogType::Reopen);
    }

    match (current.status, status) {
        (_, TicketStatus::Closed) if closing => {
            closed_at = Some(Some(now));
            clear_chat_flow = true;
            logs.push(LogType::Closed);
        }
        (TicketStatus::Pending | TicketStatus::Closed, TicketStatus::Open) => {
            if user_id.is_none() {
                user_id = actor;
            }
            // accepting a ticket takes it out of the bot
            clear_chat_flow = true;
            logs.push(LogType::Open);
        }
        (from @ (TicketStatus::Open | TicketStatus::Closed), TicketStatus::Pending) => {
            if change.user_id.is_none() {
                user_id = None;
            }
            if from == TicketStatus::Open {
                logs.push(LogType::Pending);
            }
        }
        _ => {}
    }

    if status == TicketStatus::Open && user_id.is_none() {
        user_id = actor;
    }
    if status == TicketStatus::Open && started_attendance_at.is_none() {
        started_attendance_at = Some(now);
    }

    let accepted_by_actor = logs.contains(&LogType::Open) && change.user_id.is_none();
    if status != TicketStatus::Closed && !accepted_by_actor && user_id != current.user_id {
        match (current.user_id, user_id) {
            (Some(_), Some(_)) => logs.push(LogType::Transfered),
            (None, Some(_)) => logs.push(LogType::UserDefine),
            _ => {}
        }
    }
    if queue_id != current.queue_id && queue_id.is_some() {
        logs.push(LogType::Queue);
    }

    Ok(Transition {
        status,
        user_id,
        queue_id,
        started_attendance_at,
        closed_at,
        clear_chat_flow,
        reopened,
        closing,
        logs,
    })
}

/// Unread counter after an inbound message: accumulating channels add up,
/// the others take the count reported with the message.
pub fn next_unread(channel: Option<ChannelType>, current: i32, incoming: i32) -> i32 {
    match channel {
        Some(c) if c.accumulates_unread() && incoming > 0 => current.saturating_add(incoming),
        _ => incoming,
    }
}

pub fn within_reopen_window(updated_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - updated_at <= Duration::hours(REOPEN_WINDOW_HOURS)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTicketPlan {
    pub status: TicketStatus,
    pub user_id: Option<Uuid>,
    pub started_attendance_at: Option<DateTime<Utc>>,
}

/// New tickets start pending, unless wallet routing hands them straight to the
/// contact's first wallet owner.
pub fn plan_new_ticket(
    settings: &TenantSettings,
    wallet_user: Option<Uuid>,
    now: DateTime<Utc>,
) -> NewTicketPlan {
    match wallet_user {
        Some(user_id) if settings.direct_tickets_to_wallets => NewTicketPlan {
            status: TicketStatus::Open,
            user_id: Some(user_id),
            started_attendance_at: Some(now),
        },
        _ => NewTicketPlan {
            status: TicketStatus::Pending,
            user_id: None,
            started_attendance_at: None,
        },
    }
}

/// Chat flow a fresh inbound ticket should enter, if any.
pub fn chat_flow_for_new_ticket(
    connection_flow: Option<Uuid>,
    settings: &TenantSettings,
    user_id: Option<Uuid>,
    is_group: bool,
    from_me: bool,
) -> Option<Uuid> {
    if user_id.is_some() || is_group || from_me {
        return None;
    }
    connection_flow.or(settings.bot_ticket_active)
}

/// Statuses eligible for auto-close and the inactivity cutoff, or `None` when
/// disabled. A window too large to subtract from `now` also disables it.
pub fn auto_close_policy(
    settings: &TenantSettings,
    now: DateTime<Utc>,
) -> Option<(Vec<TicketStatus>, DateTime<Utc>)> {
    if settings.auto_close_tickets_days <= 0 {
        return None;
    }
    let cutoff = Duration::try_days(settings.auto_close_tickets_days)
        .and_then(|window| now.checked_sub_signed(window))?;
    let mut statuses = vec![TicketStatus::Pending];
    if settings.auto_close_open_tickets {
        statuses.push(TicketStatus::Open);
    }
    Some((statuses, cutoff))
}

/// What the service found about a conversation before routing an inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationFacts {
    pub from_me: bool,
    /// The message id belongs to a campaign send.
    pub campaign_echo: bool,
    /// Closed ticket whose farewell message carries the message id.
    pub farewell_ticket: Option<Uuid>,
    /// Open or pending ticket for the contact on the connection.
    pub active_ticket: Option<Uuid>,
    /// Most recently updated ticket of any status, with its `updated_at`.
    pub latest_ticket: Option<(Uuid, DateTime<Utc>)>,
    pub is_group: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketPlan {
    IgnoreCampaignEcho,
    MarkFarewell(Uuid),
    Reuse(Uuid),
    Reopen(Uuid),
    Create,
}

/// Decides which ticket an inbound message lands on. Our own echoes are
/// checked first, then an active ticket is reused, then a recent (or group)
/// ticket is reopened; only when none applies is a ticket created.
pub fn plan_inbound_ticket(facts: &ConversationFacts, now: DateTime<Utc>) -> TicketPlan {
    if facts.from_me {
        if facts.campaign_echo {
            return TicketPlan::IgnoreCampaignEcho;
        }
        if let Some(id) = facts.farewell_ticket {
            return TicketPlan::MarkFarewell(id);
        }
    }
    if let Some(id) = facts.active_ticket {
        return TicketPlan::Reuse(id);
    }
    match facts.latest_ticket {
        Some((id, updated_at)) if facts.is_group || within_reopen_window(updated_at, now) => {
            TicketPlan::Reopen(id)
        }
        _ => TicketPlan::Create,
    }
}

/// Who is looking at tickets.
#[derive(Debug, Clone)]
pub struct Viewer {
    pub user_id: Uuid,
    pub is_admin: bool,
    pub queue_ids: Vec<Uuid>,
}

/// Fields visibility depends on.
#[derive(Debug, Clone)]
pub struct VisibilityFacts {
    pub user_id: Option<Uuid>,
    pub queue_id: Option<Uuid>,
    pub in_chat_flow: bool,
}

/// Tickets a non-admin viewer may see. Checked in memory by [`can_view`] and
/// translated to SQL by the ticket listing, so both read the same rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityScope {
    pub user_id: Uuid,
    /// Unassigned tickets in these queues are visible.
    pub queue_ids: Vec<Uuid>,
    pub unqueued: bool,
    pub assigned_to_others: bool,
    /// Tickets still in a chat flow are hidden unless they are the viewer's own.
    pub hide_chat_flow: bool,
}

impl VisibilityScope {
    pub fn allows(&self, ticket: &VisibilityFacts) -> bool {
        if ticket.user_id == Some(self.user_id) {
            return true;
        }
        if self.hide_chat_flow && ticket.in_chat_flow {
            return false;
        }
        match (ticket.user_id, ticket.queue_id) {
            (Some(_), _) => self.assigned_to_others,
            (None, Some(queue_id)) => self.queue_ids.contains(&queue_id),
            (None, None) => self.unqueued,
        }
    }
}

/// `None` when the viewer sees every ticket of the tenant.
pub fn visibility_scope(viewer: &Viewer, settings: &TenantSettings) -> Option<VisibilityScope> {
    if viewer.is_admin {
        return None;
    }
    Some(VisibilityScope {
        user_id: viewer.user_id,
        queue_ids: viewer.queue_ids.clone(),
        unqueued: !settings.not_view_tickets_queue_undefined,
        assigned_to_others: !settings.not_view_assigned_tickets,
        hide_chat_flow: settings.not_view_tickets_chat_bot,
    })
}

pub fn can_view(viewer: &Viewer, settings: &TenantSettings, ticket: &VisibilityFacts) -> bool {
    visibility_scope(viewer, settings).map_or(true, |scope| scope.allows(ticket))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(status: TicketStatus, user: Option<Uuid>) -> TicketState {
        TicketState {
            status,
            user_id: user,
            queue_id: None,
            started_attendance_at: None,
        }
    }

    #[test]
    fn test_accept_assigns_actor() {
        let actor = Uuid::new_v4();
        let now = Utc::now();
        let change = TicketChange {
            status: Some(TicketStatus::Open),
            ..Default::default()
        };
        let t = plan_transition(&state(TicketStatus::Pending, None), &change, Some(actor), now).unwrap();
        assert_eq!(t.user_id, Some(actor));
        assert_eq!(t.started_attendance_at, Some(now));
        assert_eq!(t.logs, vec![LogType::Open]);
        assert!(!t.reopened);
    }

    #[test]
    fn test_return_to_pending_clears_user() {
        let user = Uuid::new_v4();
        let change = TicketChange {
            status: Some(TicketStatus::Pending),
            ..Default::default()
        };
        let t = plan_transition(&state(TicketStatus::Open, Some(user)), &change, Some(user), Utc::now())
            .unwrap();
        assert_eq!(t.user_id, None);
        assert_eq!(t.logs, vec![LogType::Pending]);
    }

    #[test]
    fn test_close_twice_is_rejected() {
        let change = TicketChange {
            status: Some(TicketStatus::Closed),
            ..Default::default()
        };
        let err = plan_transition(
            &state(TicketStatus::Closed, None),
            &change,
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "ERR_TICKET_ALREADY_CLOSED");
    }

    #[test]
    fn test_transfer_between_users() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let change = TicketChange {
            user_id: Some(Some(b)),
            ..Default::default()
        };
        let t = plan_transition(&state(TicketStatus::Open, Some(a)), &change, Some(a), Utc::now()).unwrap();
        assert_eq!(t.user_id, Some(b));
        assert_eq!(t.logs, vec![LogType::Transfered]);
    }

    #[test]
    fn test_unread_accumulation() {
        assert_eq!(next_unread(Some(ChannelType::Waba), 2, 1), 3);
        assert_eq!(next_unread(Some(ChannelType::WhatsApp), 2, 1), 1);
        assert_eq!(next_unread(Some(ChannelType::Telegram), 2, 0), 0);
        assert_eq!(next_unread(None, 5, 1), 1);
    }

    #[test]
    fn test_visibility_admin_sees_all() {
        let viewer = Viewer {
            user_id: Uuid::new_v4(),
            is_admin: true,
            queue_ids: vec![],
        };
        let facts = VisibilityFacts {
            user_id: Some(Uuid::new_v4()),
            queue_id: None,
            in_chat_flow: true,
        };
        let settings = TenantSettings {
            not_view_assigned_tickets: true,
            not_view_tickets_chat_bot: true,
            ..TenantSettings::default()
        };
        assert!(can_view(&viewer, &settings, &facts));
    }

    #[test]
    fn test_auto_close_policy_bounds() {
        let now = Utc::now();
        let mut settings = TenantSettings {
            auto_close_tickets_days: 2,
            ..TenantSettings::default()
        };
        let (statuses, cutoff) = auto_close_policy(&settings, now).unwrap();
        assert_eq!(statuses, vec![TicketStatus::Pending]);
        assert_eq!(cutoff, now - Duration::days(2));

        settings.auto_close_open_tickets = true;
        let (statuses, _) = auto_close_policy(&settings, now).unwrap();
        assert_eq!(statuses, vec![TicketStatus::Pending, TicketStatus::Open]);

        settings.auto_close_tickets_days = 0;
        assert!(auto_close_policy(&settings, now).is_none());
    }

    #[test]
    fn test_auto_close_policy_huge_window_is_disabled() {
        for days in [9_999_999_999_999, i64::MAX] {
            let settings = TenantSettings {
                auto_close_tickets_days: days,
                ..TenantSettings::default()
            };
            assert!(auto_close_policy(&settings, Utc::now()).is_none());
        }
    }

    fn facts() -> ConversationFacts {
        ConversationFacts::default()
    }

    #[test]
    fn test_plan_campaign_echo_comes_first() {
        let now = Utc::now();
        let f = ConversationFacts {
            from_me: true,
            campaign_echo: true,
            farewell_ticket: Some(Uuid::new_v4()),
            active_ticket: Some(Uuid::new_v4()),
            ..facts()
        };
        assert_eq!(plan_inbound_ticket(&f, now), TicketPlan::IgnoreCampaignEcho);
    }

    #[test]
    fn test_plan_farewell_echo_before_reuse() {
        let closed = Uuid::new_v4();
        let f = ConversationFacts {
            from_me: true,
            farewell_ticket: Some(closed),
            latest_ticket: Some((closed, Utc::now())),
            ..facts()
        };
        assert_eq!(plan_inbound_ticket(&f, Utc::now()), TicketPlan::MarkFarewell(closed));
    }

    #[test]
    fn test_plan_echo_flags_ignored_for_contact_messages() {
        let active = Uuid::new_v4();
        let f = ConversationFacts {
            from_me: false,
            campaign_echo: true,
            farewell_ticket: Some(Uuid::new_v4()),
            active_ticket: Some(active),
            ..facts()
        };
        assert_eq!(plan_inbound_ticket(&f, Utc::now()), TicketPlan::Reuse(active));
    }

    #[test]
    fn test_plan_never_duplicates_active_ticket() {
        let now = Utc::now();
        let active = Uuid::new_v4();
        let f = ConversationFacts {
            active_ticket: Some(active),
            latest_ticket: Some((Uuid::new_v4(), now - Duration::days(30))),
            ..facts()
        };
        assert_eq!(plan_inbound_ticket(&f, now), TicketPlan::Reuse(active));
    }

    #[test]
    fn test_plan_reopens_within_window_only() {
        let now = Utc::now();
        let previous = Uuid::new_v4();
        let recent = ConversationFacts {
            latest_ticket: Some((previous, now - Duration::hours(23))),
            ..facts()
        };
        assert_eq!(plan_inbound_ticket(&recent, now), TicketPlan::Reopen(previous));

        let stale = ConversationFacts {
            latest_ticket: Some((previous, now - Duration::hours(25))),
            ..facts()
        };
        assert_eq!(plan_inbound_ticket(&stale, now), TicketPlan::Create);
    }

    #[test]
    fn test_plan_groups_always_reopen() {
        let now = Utc::now();
        let previous = Uuid::new_v4();
        let f = ConversationFacts {
            is_group: true,
            latest_ticket: Some((previous, now - Duration::days(90))),
            ..facts()
        };
        assert_eq!(plan_inbound_ticket(&f, now), TicketPlan::Reopen(previous));
    }

    #[test]
    fn test_plan_first_contact_creates() {
        assert_eq!(plan_inbound_ticket(&facts(), Utc::now()), TicketPlan::Create);
    }

    #[test]
    fn test_new_ticket_goes_to_wallet_owner() {
        let owner = Uuid::new_v4();
        let now = Utc::now();
        let mut settings = TenantSettings::default();
        assert_eq!(plan_new_ticket(&settings, Some(owner), now).status, TicketStatus::Pending);

        settings.direct_tickets_to_wallets = true;
        let plan = plan_new_ticket(&settings, Some(owner), now);
        assert_eq!(plan.status, TicketStatus::Open);
        assert_eq!(plan.user_id, Some(owner));
        assert_eq!(plan.started_attendance_at, Some(now));
        assert_eq!(plan_new_ticket(&settings, None, now).status, TicketStatus::Pending);
    }

    #[test]
    fn test_visibility_scope_rules() {
        let me = Uuid::new_v4();
        let my_queue = Uuid::new_v4();
        let viewer = Viewer {
            user_id: me,
            is_admin: false,
            queue_ids: vec![my_queue],
        };
        let ticket = |user_id, queue_id, in_chat_flow| VisibilityFacts {
            user_id,
            queue_id,
            in_chat_flow,
        };

        let open = TenantSettings::default();
        assert!(can_view(&viewer, &open, &ticket(None, None, false)));
        assert!(can_view(&viewer, &open, &ticket(Some(Uuid::new_v4()), None, false)));
        assert!(can_view(&viewer, &open, &ticket(None, Some(my_queue), true)));
        assert!(!can_view(&viewer, &open, &ticket(None, Some(Uuid::new_v4()), false)));

        let strict = TenantSettings {
            not_view_assigned_tickets: true,
            not_view_tickets_queue_undefined: true,
            not_view_tickets_chat_bot: true,
            ..TenantSettings::default()
        };
        assert!(!can_view(&viewer, &strict, &ticket(None, None, false)));
        assert!(!can_view(&viewer, &strict, &ticket(Some(Uuid::new_v4()), None, false)));
        assert!(!can_view(&viewer, &strict, &ticket(None, Some(my_queue), true)));
        assert!(can_view(&viewer, &strict, &ticket(None, Some(my_queue), false)));
        assert!(can_view(&viewer, &strict, &ticket(Some(me), None, true)));
    }
}
