use serde_json::{json, Value};

pub const METHOD_AUTHORIZE: &str = "mining.authorize";
pub const METHOD_SUBMIT: &str = "mining.submit";
pub const METHOD_SET_DIFFICULTY: &str = "mining.set_difficulty";

/// Sentinel worker label for sessions that never sent a usable authorize.
pub const UNKNOWN_WORKER: &str = "unknown";

/// JSON-RPC correlation identifier.
///
/// Stratum clients almost always use small integers, but the id is allowed
/// to be any JSON scalar; non-integer ids are keyed by their text form so a
/// response still matches its request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageId {
    Number(u64),
    Text(String),
}

impl MessageId {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => match n.as_u64() {
                Some(n) => Some(MessageId::Number(n)),
                None => Some(MessageId::Text(n.to_string())),
            },
            Value::String(s) => Some(MessageId::Text(s.clone())),
            _ => None,
        }
    }

    /// The correlation id of a message, if it carries one.
    pub fn of(message: &Value) -> Option<Self> {
        message.get("id").and_then(Self::from_value)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageId::Number(n) => write!(f, "{}", n),
            MessageId::Text(s) => write!(f, "{}", s),
        }
    }
}

pub fn method(message: &Value) -> Option<&str> {
    message.get("method").and_then(Value::as_str)
}

/// The client-declared worker label of an authorize (its first parameter),
/// or the sentinel when the client sent none.
pub fn worker_label(message: &Value) -> String {
    message
        .get("params")
        .and_then(Value::as_array)
        .and_then(|params| params.first())
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.trim().to_owned())
        .unwrap_or_else(|| UNKNOWN_WORKER.to_owned())
}

/// Replace the authorize params with the upstream credential pair.
pub fn rewrite_credentials(message: &mut Value, identity: &str, password: &str) {
    message["params"] = json!([identity, password]);
}

/// Replace the miner-identity parameter of a submit with the upstream
/// identity and return the correlation id, if the message carries one.
pub fn rewrite_submit(message: &mut Value, identity: &str) -> Option<MessageId> {
    if let Some(params) = message.get_mut("params").and_then(Value::as_array_mut) {
        if let Some(first) = params.first_mut() {
            *first = Value::String(identity.to_owned());
        }
    }

    MessageId::of(message)
}

/// The new difficulty announced by a `mining.set_difficulty`, if this is one.
pub fn set_difficulty(message: &Value) -> Option<f64> {
    if method(message) != Some(METHOD_SET_DIFFICULTY) {
        return None;
    }

    message
        .get("params")
        .and_then(Value::as_array)
        .and_then(|params| params.first())
        .and_then(Value::as_f64)
}

/// Correlation id and accept/reject classification of a message treated as
/// a response. Accepted means `result` is strictly `true`; anything else,
/// including explicit error payloads, is a rejection.
pub fn response_outcome(message: &Value) -> Option<(MessageId, bool)> {
    let id = MessageId::of(message)?;
    let accepted = message.get("result") == Some(&Value::Bool(true));

    Some((id, accepted))
}

/// Split a full worker label into (address, worker) on the first dot.
/// `alice.rig1` -> (`alice`, `rig1`); a bare `alice` keeps an empty worker.
pub fn split_label(label: &str) -> (&str, &str) {
    match label.split_once('.') {
        Some((address, worker)) => (address, worker),
        None => (label, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorize_rewrite_captures_label() {
        let mut msg = json!({
            "id": 1,
            "method": "mining.authorize",
            "params": ["alice.rig1", "x"]
        });

        let label = worker_label(&msg);
        rewrite_credentials(&mut msg, "acct.001", "123");

        assert_eq!(label, "alice.rig1");
        assert_eq!(msg["params"], json!(["acct.001", "123"]));
        assert_eq!(msg["id"], 1);
    }

    #[test]
    fn authorize_without_params_yields_sentinel() {
        let mut msg = json!({"id": 1, "method": "mining.authorize"});

        let label = worker_label(&msg);
        rewrite_credentials(&mut msg, "acct.001", "123");

        assert_eq!(label, UNKNOWN_WORKER);
        assert_eq!(msg["params"], json!(["acct.001", "123"]));
    }

    #[test]
    fn submit_rewrite_swaps_identity_and_returns_id() {
        let mut msg = json!({
            "id": 7,
            "method": "mining.submit",
            "params": ["alice.rig1", "job-1", "00000000", "5f000000", "12345678"]
        });

        let id = rewrite_submit(&mut msg, "acct.001");

        assert_eq!(id, Some(MessageId::Number(7)));
        assert_eq!(msg["params"][0], "acct.001");
        assert_eq!(msg["params"][1], "job-1");
    }

    #[test]
    fn submit_without_id_is_untracked() {
        let mut msg = json!({
            "method": "mining.submit",
            "params": ["alice", "job-1"]
        });

        assert_eq!(rewrite_submit(&mut msg, "acct.001"), None);
        assert_eq!(msg["params"][0], "acct.001");
    }

    #[test]
    fn string_ids_correlate() {
        let request = json!({"id": "a1", "method": "mining.submit", "params": []});
        let response = json!({"id": "a1", "result": true});

        assert_eq!(MessageId::of(&request), Some(MessageId::Text("a1".into())));
        let (id, accepted) = response_outcome(&response).unwrap();
        assert_eq!(id, MessageId::Text("a1".into()));
        assert!(accepted);
    }

    #[test]
    fn set_difficulty_extraction() {
        let msg = json!({"id": null, "method": "mining.set_difficulty", "params": [512.0]});
        assert_eq!(set_difficulty(&msg), Some(512.0));

        let other = json!({"id": 1, "method": "mining.notify", "params": ["job"]});
        assert_eq!(set_difficulty(&other), None);
    }

    #[test]
    fn rejection_classification() {
        let rejected = json!({"id": 7, "result": null, "error": [23, "low difficulty", null]});
        let (_, accepted) = response_outcome(&rejected).unwrap();
        assert!(!accepted);

        let falsy = json!({"id": 8, "result": false});
        let (_, accepted) = response_outcome(&falsy).unwrap();
        assert!(!accepted);

        // `result: "true"` (string) is not an acceptance.
        let stringy = json!({"id": 9, "result": "true"});
        let (_, accepted) = response_outcome(&stringy).unwrap();
        assert!(!accepted);
    }

    #[test]
    fn label_splitting() {
        assert_eq!(split_label("alice.rig1"), ("alice", "rig1"));
        assert_eq!(split_label("alice.rig1.gpu0"), ("alice", "rig1.gpu0"));
        assert_eq!(split_label("alice"), ("alice", ""));
    }
}
