//! Auto-reply flow definitions and their evaluation.
//!
//! A flow is a set of steps. Entering a step sends its interactions; the
//! contact's reply is matched against the step's conditions in order and the
//! first match decides what happens next. Nothing here touches the database.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Longest silence a flow may wait for (one week).
pub const MAX_NO_RESPONSE_MINUTES: i64 = 7 * 24 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub config: FlowConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node {
    Start {
        id: String,
        next: String,
    },
    Node {
        id: String,
        #[serde(default)]
        interactions: Vec<String>,
        #[serde(default)]
        conditions: Vec<Condition>,
    },
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Node::Start { id, .. } | Node::Node { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionKind {
    Any,
    Keywords,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub action: Action,
}

impl Condition {
    fn matches(&self, reply: &str) -> bool {
        match self.kind {
            ConditionKind::Any => true,
            ConditionKind::Keywords => self.keywords.iter().any(|k| normalize(k) == reply),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    NextStep { step: String },
    Queue { queue_id: Uuid },
    User { user_id: Uuid },
    Close,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    #[serde(default)]
    pub close_keywords: Vec<String>,
    #[serde(default)]
    pub invalid_option_message: Option<String>,
    #[serde(default)]
    pub max_retries: Option<MaxRetries>,
    #[serde(default)]
    pub no_response: Option<NoResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaxRetries {
    pub number: i32,
    pub destiny: Action,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoResponse {
    pub minutes: i64,
    pub destiny: Action,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowTransition {
    /// Remain on the current step with an updated retry count.
    Stay { retries: i32 },
    Goto { step: String },
    Queue(Uuid),
    User(Uuid),
    Close,
    /// The flow cannot continue (missing step); drop out of it.
    Leave,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub messages: Vec<String>,
    pub transition: FlowTransition,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error("flow has no start node")]
    MissingStart,
    #[error("flow has more than one start node")]
    DuplicateStart,
    #[error("duplicated step id: {0}")]
    DuplicateStep(String),
    #[error("unknown step referenced: {0}")]
    UnknownStep(String),
    #[error("max_retries.number must be positive")]
    InvalidRetries,
    #[error("no_response.minutes must be between 1 and 10080")]
    InvalidTimeout,
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

impl FlowDefinition {
    pub fn from_value(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id() == id)
    }

    fn start_node(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| matches!(n, Node::Start { .. }))
    }

    pub fn validate(&self) -> Result<(), FlowError> {
        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id()) {
                return Err(FlowError::DuplicateStep(node.id().to_string()));
            }
        }
        let starts = self
            .nodes
            .iter()
            .filter(|n| matches!(n, Node::Start { .. }))
            .count();
        match starts {
            0 => return Err(FlowError::MissingStart),
            1 => {}
            _ => return Err(FlowError::DuplicateStart),
        }

        let check = |action: &Action| match action {
            Action::NextStep { step } if !ids.contains(step.as_str()) => {
                Err(FlowError::UnknownStep(step.clone()))
            }
            _ => Ok(()),
        };
        for node in &self.nodes {
            match node {
                Node::Start { next, .. } => check(&Action::NextStep { step: next.clone() })?,
                Node::Node { conditions, .. } => {
                    for condition in conditions {
                        check(&condition.action)?;
                    }
                }
            }
        }
        if let Some(max) = &self.config.max_retries {
            if max.number <= 0 {
                return Err(FlowError::InvalidRetries);
            }
            check(&max.destiny)?;
        }
        if let Some(no_response) = &self.config.no_response {
            if !(1..=MAX_NO_RESPONSE_MINUTES).contains(&no_response.minutes) {
                return Err(FlowError::InvalidTimeout);
            }
            check(&no_response.destiny)?;
        }
        Ok(())
    }

    /// Queues and users the flow can hand a ticket to.
    pub fn targets(&self) -> (Vec<Uuid>, Vec<Uuid>) {
        let conditions = self.nodes.iter().flat_map(|node| match node {
            Node::Node { conditions, .. } => conditions.iter().map(|c| &c.action).collect(),
            Node::Start { .. } => Vec::new(),
        });
        let destinies = self
            .config
            .max_retries
            .as_ref()
            .map(|m| &m.destiny)
            .into_iter()
            .chain(self.config.no_response.as_ref().map(|n| &n.destiny));

        let (mut queues, mut users) = (Vec::new(), Vec::new());
        for action in conditions.chain(destinies) {
            match action {
                Action::Queue { queue_id } if !queues.contains(queue_id) => queues.push(*queue_id),
                Action::User { user_id } if !users.contains(user_id) => users.push(*user_id),
                _ => {}
            }
        }
        (queues, users)
    }

    fn interactions(&self, step: &str) -> Option<Vec<String>> {
        match self.node(step)? {
            Node::Node { interactions, .. } => Some(interactions.clone()),
            Node::Start { .. } => None,
        }
    }

    /// Messages plus transition for taking `action`.
    fn act(&self, action: &Action, mut messages: Vec<String>) -> Outcome {
        let transition = match action {
            Action::NextStep { step } => match self.interactions(step) {
                Some(interactions) => {
                    messages.extend(interactions);
                    FlowTransition::Goto { step: step.clone() }
                }
                None => FlowTransition::Leave,
            },
            Action::Queue { queue_id } => FlowTransition::Queue(*queue_id),
            Action::User { user_id } => FlowTransition::User(*user_id),
            Action::Close => FlowTransition::Close,
        };
        Outcome {
            messages,
            transition,
        }
    }

    /// Entering the flow: the step after `start` and its interactions.
    pub fn start(&self) -> Option<Outcome> {
        match self.start_node()? {
            Node::Start { next, .. } => {
                let outcome = self.act(&Action::NextStep { step: next.clone() }, Vec::new());
                (outcome.transition != FlowTransition::Leave).then_some(outcome)
            }
            Node::Node { .. } => None,
        }
    }

    /// Reaction to `body` received while the ticket sits on `step` after `retries`
    /// unmatched replies.
    pub fn evaluate(&self, step: &str, retries: i32, body: &str) -> Outcome {
        let reply = normalize(body);
        if self.config.close_keywords.iter().any(|k| normalize(k) == reply) {
            return Outcome {
                messages: Vec::new(),
                transition: FlowTransition::Close,
            };
        }

        let Some(Node::Node { conditions, interactions, .. }) = self.node(step) else {
            return Outcome {
                messages: Vec::new(),
                transition: FlowTransition::Leave,
            };
        };

        if let Some(condition) = conditions.iter().find(|c| c.matches(&reply)) {
            return self.act(&condition.action, Vec::new());
        }

        let retries = retries + 1;
        if let Some(max) = &self.config.max_retries {
            if retries >= max.number {
                let messages = max.message.clone().into_iter().collect();
                return self.act(&max.destiny, messages);
            }
        }
        let mut messages: Vec<String> = self.config.invalid_option_message.clone().into_iter().collect();
        messages.extend(interactions.iter().cloned());
        Outcome {
            messages,
            transition: FlowTransition::Stay { retries },
        }
    }

    /// Minutes of silence tolerated and what happens after them.
    pub fn on_timeout(&self) -> Option<(i64, Outcome)> {
        let no_response = self.config.no_response.as_ref()?;
        Some((no_response.minutes, self.act(&no_response.destiny, Vec::new())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flow(queue: Uuid) -> FlowDefinition {
        FlowDefinition::from_value(&json!({
            "nodes": [
                {"type": "start", "id": "start", "next": "menu"},
                {"type": "node", "id": "menu",
                 "interactions": ["1 - Sales", "2 - Support"],
                 "conditions": [
                    {"type": "keywords", "keywords": ["1", "sales"], "action": {"type": "queue", "queue_id": queue}},
                    {"type": "keywords", "keywords": ["2"], "action": {"type": "next_step", "step": "support"}}
                 ]},
                {"type": "node", "id": "support", "interactions": ["Describe the issue"],
                 "conditions": [{"type": "any", "action": {"type": "close"}}]}
            ],
            "config": {
                "close_keywords": ["exit"],
                "invalid_option_message": "Invalid option",
                "max_retries": {"number": 2, "destiny": {"type": "close"}, "message": "Bye"},
                "no_response": {"minutes": 10, "destiny": {"type": "queue", "queue_id": queue}}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_start_enters_first_step() {
        let outcome = flow(Uuid::new_v4()).start().unwrap();
        assert_eq!(outcome.transition, FlowTransition::Goto { step: "menu".into() });
        assert_eq!(outcome.messages, vec!["1 - Sales", "2 - Support"]);
    }

    #[test]
    fn test_keyword_match_is_case_insensitive() {
        let queue = Uuid::new_v4();
        let outcome = flow(queue).evaluate("menu", 0, "  SALES ");
        assert_eq!(outcome.transition, FlowTransition::Queue(queue));
        assert!(outcome.messages.is_empty());
    }

    #[test]
    fn test_next_step_sends_its_interactions() {
        let outcome = flow(Uuid::new_v4()).evaluate("menu", 0, "2");
        assert_eq!(outcome.transition, FlowTransition::Goto { step: "support".into() });
        assert_eq!(outcome.messages, vec!["Describe the issue"]);
    }

    #[test]
    fn test_invalid_reply_then_retry_limit() {
        let f = flow(Uuid::new_v4());
        let first = f.evaluate("menu", 0, "what?");
        assert_eq!(first.transition, FlowTransition::Stay { retries: 1 });
        assert_eq!(first.messages[0], "Invalid option");

        let second = f.evaluate("menu", 1, "what?");
        assert_eq!(second.transition, FlowTransition::Close);
        assert_eq!(second.messages, vec!["Bye"]);
    }

    #[test]
    fn test_close_keyword_wins() {
        let outcome = flow(Uuid::new_v4()).evaluate("menu", 0, "Exit");
        assert_eq!(outcome.transition, FlowTransition::Close);
    }

    #[test]
    fn test_missing_step_leaves_flow() {
        let outcome = flow(Uuid::new_v4()).evaluate("gone", 0, "1");
        assert_eq!(outcome.transition, FlowTransition::Leave);
    }

    #[test]
    fn test_timeout_destiny() {
        let queue = Uuid::new_v4();
        let (minutes, outcome) = flow(queue).on_timeout().unwrap();
        assert_eq!(minutes, 10);
        assert_eq!(outcome.transition, FlowTransition::Queue(queue));
    }

    #[test]
    fn test_validate_rejects_dangling_step() {
        let mut f = flow(Uuid::new_v4());
        assert!(f.validate().is_ok());
        f.nodes.retain(|n| n.id() != "support");
        assert_eq!(f.validate(), Err(FlowError::UnknownStep("support".into())));
    }

    #[test]
    fn test_validate_bounds_no_response() {
        let mut f = flow(Uuid::new_v4());
        let no_response = f.config.no_response.as_mut().unwrap();
        no_response.minutes = i64::MAX;
        assert_eq!(f.validate(), Err(FlowError::InvalidTimeout));

        f.config.no_response.as_mut().unwrap().minutes = MAX_NO_RESPONSE_MINUTES;
        assert!(f.validate().is_ok());
        f.config.no_response.as_mut().unwrap().minutes = 0;
        assert_eq!(f.validate(), Err(FlowError::InvalidTimeout));
    }

    #[test]
    fn test_targets_collects_handoffs() {
        let queue = Uuid::new_v4();
        let user = Uuid::new_v4();
        let mut f = flow(queue);
        f.config.max_retries = Some(MaxRetries {
            number: 2,
            destiny: Action::User { user_id: user },
            message: None,
        });
        // the queue appears in a condition and in no_response, listed once
        assert_eq!(f.targets(), (vec![queue], vec![user]));
    }
}
