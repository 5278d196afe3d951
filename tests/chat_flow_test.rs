use serde_json::json;
use uuid::Uuid;

use chatdesk::chat_flow::{FlowDefinition, FlowTransition};

fn support_flow(sales_queue: Uuid) -> FlowDefinition {
    FlowDefinition::from_value(&json!({
        "nodes": [
            {"type": "start", "id": "start", "next": "welcome"},
            {"type": "node", "id": "welcome",
             "interactions": ["Welcome!", "1 - Sales", "2 - Billing"],
             "conditions": [
                {"type": "keywords", "keywords": ["1", "sales"], "action": {"type": "queue", "queue_id": sales_queue}},
                {"type": "keywords", "keywords": ["2", "billing"], "action": {"type": "next_step", "step": "billing"}}
             ]},
            {"type": "node", "id": "billing",
             "interactions": ["Type your invoice number"],
             "conditions": [{"type": "any", "action": {"type": "queue", "queue_id": sales_queue}}]}
        ],
        "config": {
            "close_keywords": ["bye"],
            "invalid_option_message": "Sorry, I did not understand.",
            "max_retries": {"number": 2, "destiny": {"type": "close"}, "message": "Closing this chat."},
            "no_response": {"minutes": 15, "destiny": {"type": "close"}}
        }
    }))
    .unwrap()
}

#[test]
fn test_conversation_reaches_queue_through_submenu() {
    let queue = Uuid::new_v4();
    let flow = support_flow(queue);
    flow.validate().unwrap();

    let entry = flow.start().unwrap();
    assert_eq!(entry.messages, vec!["Welcome!", "1 - Sales", "2 - Billing"]);
    assert_eq!(entry.transition, FlowTransition::Goto { step: "welcome".into() });

    let billing = flow.evaluate("welcome", 0, " Billing ");
    assert_eq!(billing.messages, vec!["Type your invoice number"]);
    assert_eq!(billing.transition, FlowTransition::Goto { step: "billing".into() });

    let handoff = flow.evaluate("billing", 0, "INV-0042");
    assert_eq!(handoff.transition, FlowTransition::Queue(queue));
    assert!(handoff.messages.is_empty());
}

#[test]
fn test_invalid_answers_exhaust_retries() {
    let flow = support_flow(Uuid::new_v4());

    let first = flow.evaluate("welcome", 0, "what?");
    assert_eq!(first.transition, FlowTransition::Stay { retries: 1 });
    assert_eq!(first.messages[0], "Sorry, I did not understand.");
    assert_eq!(&first.messages[1..], ["Welcome!", "1 - Sales", "2 - Billing"]);

    let second = flow.evaluate("welcome", 1, "still what?");
    assert_eq!(second.transition, FlowTransition::Close);
    assert_eq!(second.messages, vec!["Closing this chat."]);
}

#[test]
fn test_close_keyword_wins_on_any_step() {
    let flow = support_flow(Uuid::new_v4());
    assert_eq!(flow.evaluate("billing", 0, "BYE").transition, FlowTransition::Close);
}

#[test]
fn test_no_response_timeout() {
    let flow = support_flow(Uuid::new_v4());
    let (minutes, outcome) = flow.on_timeout().unwrap();
    assert_eq!(minutes, 15);
    assert_eq!(outcome.transition, FlowTransition::Close);
}

#[test]
fn test_dangling_step_fails_validation() {
    let flow = FlowDefinition::from_value(&json!({
        "nodes": [{"type": "start", "id": "start", "next": "missing"}]
    }))
    .unwrap();
    assert!(flow.validate().is_err());
    assert!(flow.start().is_none());
}
