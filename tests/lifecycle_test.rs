use chrono::{Duration, Utc};
use uuid::Uuid;

use chatdesk::channels::ChannelType;
use chatdesk::settings::{
    TenantSettings, AUTO_CLOSE_OPEN_TICKETS, AUTO_CLOSE_TICKETS_DAYS, DIRECT_TICKETS_TO_WALLETS,
    NOT_VIEW_ASSIGNED_TICKETS,
};
use chatdesk::tickets::lifecycle::{
    auto_close_policy, can_view, next_unread, plan_inbound_ticket, plan_new_ticket,
    plan_transition, within_reopen_window, ConversationFacts, TicketPlan, TicketState, Viewer,
    VisibilityFacts,
};
use chatdesk::tickets::{LogType, TicketChange, TicketStatus};

fn pending() -> TicketState {
    TicketState {
        status: TicketStatus::Pending,
        user_id: None,
        queue_id: None,
        started_attendance_at: None,
    }
}

#[test]
fn test_ticket_full_lifecycle() {
    let now = Utc::now();
    let agent = Uuid::new_v4();
    let other = Uuid::new_v4();

    let accept = TicketChange {
        status: Some(TicketStatus::Open),
        ..Default::default()
    };
    let opened = plan_transition(&pending(), &accept, Some(agent), now).unwrap();
    assert_eq!(opened.user_id, Some(agent));
    assert_eq!(opened.started_attendance_at, Some(now));
    assert_eq!(opened.logs, vec![LogType::Open]);

    let state = TicketState {
        status: opened.status,
        user_id: opened.user_id,
        queue_id: opened.queue_id,
        started_attendance_at: opened.started_attendance_at,
    };
    let transfer = TicketChange {
        user_id: Some(Some(other)),
        ..Default::default()
    };
    let moved = plan_transition(&state, &transfer, Some(agent), now).unwrap();
    assert_eq!(moved.logs, vec![LogType::Transfered]);

    let close = TicketChange {
        status: Some(TicketStatus::Closed),
        ..Default::default()
    };
    let closed = plan_transition(&state, &close, Some(agent), now).unwrap();
    assert!(closed.closing);
    assert!(closed.clear_chat_flow);
    assert_eq!(closed.closed_at, Some(Some(now)));

    let closed_state = TicketState {
        status: TicketStatus::Closed,
        ..state
    };
    let err = plan_transition(&closed_state, &close, Some(agent), now).unwrap_err();
    assert_eq!(err.to_string(), "ERR_TICKET_ALREADY_CLOSED");
}

#[test]
fn test_unread_accumulates_only_on_cloud_channels() {
    assert_eq!(next_unread(Some(ChannelType::Waba), 2, 1), 3);
    assert_eq!(next_unread(Some(ChannelType::WhatsApp), 2, 1), 1);
    assert_eq!(next_unread(Some(ChannelType::Telegram), 2, 0), 0);
}

#[test]
fn test_reopen_window_is_one_day() {
    let now = Utc::now();
    assert!(within_reopen_window(now - Duration::hours(23), now));
    assert!(!within_reopen_window(now - Duration::hours(25), now));
}

#[test]
fn test_wallet_routing_opens_ticket_for_owner() {
    let owner = Uuid::new_v4();
    let now = Utc::now();
    let settings = TenantSettings::from_pairs([(DIRECT_TICKETS_TO_WALLETS, "enabled")]);
    let plan = plan_new_ticket(&settings, Some(owner), now);
    assert_eq!(plan.status, TicketStatus::Open);
    assert_eq!(plan.user_id, Some(owner));

    let plan = plan_new_ticket(&TenantSettings::from_pairs([]), Some(owner), now);
    assert_eq!(plan.status, TicketStatus::Pending);
    assert_eq!(plan.user_id, None);
}

#[test]
fn test_auto_close_policy_follows_settings() {
    let now = Utc::now();
    assert!(auto_close_policy(&TenantSettings::from_pairs([]), now).is_none());

    let settings =
        TenantSettings::from_pairs([(AUTO_CLOSE_TICKETS_DAYS, "3"), (AUTO_CLOSE_OPEN_TICKETS, "enabled")]);
    let (statuses, cutoff) = auto_close_policy(&settings, now).unwrap();
    assert_eq!(statuses, vec![TicketStatus::Pending, TicketStatus::Open]);
    assert_eq!(cutoff, now - Duration::days(3));
}

#[test]
fn test_agents_do_not_see_colleagues_tickets_when_restricted() {
    let me = Viewer {
        user_id: Uuid::new_v4(),
        is_admin: false,
        queue_ids: Vec::new(),
    };
    let theirs = VisibilityFacts {
        user_id: Some(Uuid::new_v4()),
        queue_id: None,
        in_chat_flow: false,
    };
    let restricted = TenantSettings::from_pairs([(NOT_VIEW_ASSIGNED_TICKETS, "enabled")]);
    assert!(!can_view(&me, &restricted, &theirs));
    assert!(can_view(&me, &TenantSettings::from_pairs([]), &theirs));
}

#[test]
fn test_conversation_keeps_one_ticket_across_messages() {
    let now = Utc::now();
    let ticket = Uuid::new_v4();

    // first message opens a ticket, the next ones land on it
    let first = ConversationFacts::default();
    assert_eq!(plan_inbound_ticket(&first, now), TicketPlan::Create);
    let ongoing = ConversationFacts {
        active_ticket: Some(ticket),
        latest_ticket: Some((ticket, now)),
        ..ConversationFacts::default()
    };
    assert_eq!(plan_inbound_ticket(&ongoing, now), TicketPlan::Reuse(ticket));

    // the farewell sent on close comes back as an echo and is only marked
    let farewell_echo = ConversationFacts {
        from_me: true,
        farewell_ticket: Some(ticket),
        latest_ticket: Some((ticket, now)),
        ..ConversationFacts::default()
    };
    assert_eq!(
        plan_inbound_ticket(&farewell_echo, now),
        TicketPlan::MarkFarewell(ticket)
    );

    // the contact writes again the same day, then a week later
    let closed = ConversationFacts {
        latest_ticket: Some((ticket, now - Duration::hours(3))),
        ..ConversationFacts::default()
    };
    assert_eq!(plan_inbound_ticket(&closed, now), TicketPlan::Reopen(ticket));
    let stale = ConversationFacts {
        latest_ticket: Some((ticket, now - Duration::days(7))),
        ..ConversationFacts::default()
    };
    assert_eq!(plan_inbound_ticket(&stale, now), TicketPlan::Create);
}

#[test]
fn test_out_of_range_auto_close_setting_is_ignored() {
    let settings = TenantSettings::from_pairs([
        (AUTO_CLOSE_TICKETS_DAYS, "9223372036854775807"),
        (AUTO_CLOSE_OPEN_TICKETS, "enabled"),
    ]);
    assert!(auto_close_policy(&settings, Utc::now()).is_none());
}

