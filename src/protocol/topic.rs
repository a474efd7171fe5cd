//! Topic codec (spec.md §4.2): constructs and parses the hierarchical topic
//! strings the RPC protocol addresses agents, classes, instances and
//! functions with.

use thiserror::Error;

pub const STATIC_INSTANCE: &str = "__static__";
pub const SESSION_CLASS: &str = "Session";
const CLIENT_INFO_SUFFIX: &str = "__clientInfo__";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("topic has {0} segments; a request topic needs exactly 5, or 4 ending in __clientInfo__")]
    UnexpectedShape(usize),
}

/// A parsed 5-segment request topic: `{domain}/{agent}/{class}/{instance}/{function}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTopic {
    pub domain: String,
    pub agent: String,
    pub class: String,
    pub instance: String,
    pub function: String,
}

impl RequestTopic {
    pub fn is_static(&self) -> bool {
        self.instance == STATIC_INSTANCE
    }

    pub fn to_topic_string(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.domain, self.agent, self.class, self.instance, self.function
        )
    }
}

/// Parses an incoming publish topic. `Ok(None)` means the topic was the
/// 4-segment `__clientInfo__` announcement, which the core ignores by
/// design (spec.md §4.2); any other shape is a protocol error.
pub fn parse_request_topic(topic: &str) -> Result<Option<RequestTopic>, TopicError> {
    let segments: Vec<&str> = topic.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [_, _, _, last] if *last == CLIENT_INFO_SUFFIX => Ok(None),
        [domain, agent, class, instance, function] => Ok(Some(RequestTopic {
            domain: (*domain).to_string(),
            agent: (*agent).to_string(),
            class: (*class).to_string(),
            instance: (*instance).to_string(),
            function: (*function).to_string(),
        })),
        other => Err(TopicError::UnexpectedShape(other.len())),
    }
}

pub fn agent_info_topic(domain: &str, agent: &str) -> String {
    format!("{domain}/{agent}/__agentInfo__")
}

pub fn class_info_topic(domain: &str, agent: &str) -> String {
    format!("{domain}/{agent}/{SESSION_CLASS}/__classInfo__")
}

pub fn static_topic_filter(domain: &str, agent: &str) -> String {
    format!("{domain}/{agent}/{SESSION_CLASS}/{STATIC_INSTANCE}/+")
}

pub fn instance_topic_filter(domain: &str, agent: &str, instance: &str) -> String {
    format!("{domain}/{agent}/{SESSION_CLASS}/{instance}/+")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_well_formed_request_topic() {
        let original = "acme/a1/Session/__static__/call";
        let parsed = parse_request_topic(original).unwrap().unwrap();
        assert_eq!(parsed.to_topic_string(), original);
        assert!(parsed.is_static());
    }

    #[test]
    fn member_call_is_not_static() {
        let parsed = parse_request_topic("acme/a1/Session/sess1/myFunc").unwrap().unwrap();
        assert!(!parsed.is_static());
        assert_eq!(parsed.instance, "sess1");
    }

    #[test]
    fn client_info_announcement_is_ignored() {
        assert_eq!(parse_request_topic("acme/a1/Session/__clientInfo__").unwrap(), None);
    }

    #[test]
    fn six_segments_is_a_protocol_error() {
        assert_eq!(
            parse_request_topic("acme/a1/Session/__static__/call/extra"),
            Err(TopicError::UnexpectedShape(6))
        );
    }

    #[test]
    fn three_segments_is_a_protocol_error() {
        assert_eq!(parse_request_topic("acme/a1/Session"), Err(TopicError::UnexpectedShape(3)));
    }
}
