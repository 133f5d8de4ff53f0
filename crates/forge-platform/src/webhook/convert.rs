// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Translation of agent responses into webhook payloads.

use chrono::{DateTime, Utc};
use forge_protocol::{AgentResponse, AgentState, agent_response};

use super::{ErrorInfo, EventType, Payload};

/// Upstream event types that terminate a request.
const COMPLETION_EVENT_TYPES: [&str; 3] =
    ["session.completed", "session.error", "message.completed"];

/// Convert a streamed agent response into the webhook envelope.
pub fn response_to_payload(response: &AgentResponse, agent_id: &str, request_id: &str) -> Payload {
    let timestamp = millis_to_timestamp(response.timestamp);
    let agent_state = AgentState::try_from(response.state)
        .map(AgentState::label)
        .unwrap_or("unknown")
        .to_string();

    let mut payload = Payload {
        event_type: EventType::Event,
        agent_id: agent_id.to_string(),
        request_id: request_id.to_string(),
        session_id: response.session_id.clone(),
        seq: response.seq,
        timestamp,
        is_final: false,
        agent_state,
        opencode_event_type: None,
        event: None,
        error: None,
        success: None,
    };

    match &response.payload {
        Some(agent_response::Payload::Event(event)) => {
            payload.is_final = COMPLETION_EVENT_TYPES.contains(&event.event_type.as_str());
            payload.opencode_event_type = Some(event.event_type.clone());
            // Pass-through: forwarded without interpretation. Events whose
            // JSON does not parse are forwarded with the envelope only.
            payload.event = serde_json::from_slice(&event.event_json).ok();
        }
        Some(agent_response::Payload::Error(error)) => {
            payload.event_type = EventType::Error;
            payload.is_final = true;
            payload.error = Some(ErrorInfo {
                code: error.code.clone(),
                message: error.message.clone(),
                recoverable: !error.fatal,
            });
        }
        Some(agent_response::Payload::Complete(complete)) => {
            payload.event_type = EventType::Complete;
            payload.is_final = true;
            payload.success = Some(complete.success);
        }
        None => {}
    }

    payload
}

/// Build a platform-synthesized error payload (AGENT_UNREACHABLE,
/// SEND_FAILED, STREAM_ERROR). Always final.
pub fn error_payload(
    agent_id: &str,
    request_id: &str,
    seq: u64,
    code: &str,
    message: &str,
    recoverable: bool,
) -> Payload {
    Payload {
        event_type: EventType::Error,
        agent_id: agent_id.to_string(),
        request_id: request_id.to_string(),
        session_id: String::new(),
        seq,
        timestamp: Utc::now(),
        is_final: true,
        agent_state: AgentState::Error.label().to_string(),
        opencode_event_type: None,
        event: None,
        error: Some(ErrorInfo {
            code: code.to_string(),
            message: message.to_string(),
            recoverable,
        }),
        success: None,
    }
}

fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
    if millis == 0 {
        return Utc::now();
    }
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_protocol::{AgentError, AgentEvent, Complete};

    fn event_response(seq: u64, event_type: &str) -> AgentResponse {
        AgentResponse {
            request_id: "req_1".to_string(),
            session_id: "sess_1".to_string(),
            seq,
            timestamp: 1_700_000_000_000,
            state: AgentState::Processing as i32,
            payload: Some(agent_response::Payload::Event(AgentEvent {
                event_type: event_type.to_string(),
                event_json: br#"{"key":"value"}"#.to_vec(),
            })),
        }
    }

    #[test]
    fn test_event_passthrough() {
        let payload = response_to_payload(&event_response(1, "message.part.updated"), "a1", "req_1");

        assert_eq!(payload.event_type, EventType::Event);
        assert_eq!(payload.agent_id, "a1");
        assert_eq!(payload.seq, 1);
        assert_eq!(payload.session_id, "sess_1");
        assert_eq!(payload.agent_state, "processing");
        assert!(!payload.is_final);
        assert_eq!(
            payload.opencode_event_type.as_deref(),
            Some("message.part.updated")
        );
        assert_eq!(payload.event.unwrap()["key"], "value");
    }

    #[test]
    fn test_completion_set_marks_final() {
        for event_type in ["session.completed", "session.error", "message.completed"] {
            let payload = response_to_payload(&event_response(9, event_type), "a1", "req_1");
            assert!(payload.is_final, "{} must be final", event_type);
            assert_eq!(payload.event_type, EventType::Event);
        }
    }

    #[test]
    fn test_ordinary_event_not_final() {
        let payload = response_to_payload(&event_response(2, "message.updated"), "a1", "req_1");
        assert!(!payload.is_final);
    }

    #[test]
    fn test_unparseable_event_json_forwards_envelope_only() {
        let mut response = event_response(1, "message.updated");
        if let Some(agent_response::Payload::Event(event)) = &mut response.payload {
            event.event_json = b"not json".to_vec();
        }
        let payload = response_to_payload(&response, "a1", "req_1");
        assert!(payload.event.is_none());
        assert_eq!(payload.opencode_event_type.as_deref(), Some("message.updated"));
    }

    #[test]
    fn test_agent_error_fatal() {
        let response = AgentResponse {
            state: AgentState::Error as i32,
            payload: Some(agent_response::Payload::Error(AgentError {
                code: "MODEL_ERROR".to_string(),
                message: "provider unavailable".to_string(),
                fatal: true,
            })),
            ..event_response(4, "")
        };

        let payload = response_to_payload(&response, "a1", "req_1");
        assert_eq!(payload.event_type, EventType::Error);
        assert!(payload.is_final);
        assert_eq!(payload.agent_state, "error");
        let error = payload.error.unwrap();
        assert_eq!(error.code, "MODEL_ERROR");
        assert!(!error.recoverable);
    }

    #[test]
    fn test_agent_error_recoverable() {
        let response = AgentResponse {
            payload: Some(agent_response::Payload::Error(AgentError {
                code: "RATE_LIMITED".to_string(),
                message: "slow down".to_string(),
                fatal: false,
            })),
            ..event_response(4, "")
        };

        let payload = response_to_payload(&response, "a1", "req_1");
        assert!(payload.error.unwrap().recoverable);
        // Error payloads are always final regardless of recoverability.
        assert!(payload.is_final);
    }

    #[test]
    fn test_complete_payload() {
        let response = AgentResponse {
            state: AgentState::Idle as i32,
            payload: Some(agent_response::Payload::Complete(Complete { success: true })),
            ..event_response(5, "")
        };

        let payload = response_to_payload(&response, "a1", "req_1");
        assert_eq!(payload.event_type, EventType::Complete);
        assert!(payload.is_final);
        assert_eq!(payload.success, Some(true));
        assert_eq!(payload.agent_state, "idle");
    }

    #[test]
    fn test_timestamp_from_millis() {
        let payload = response_to_payload(&event_response(1, "x"), "a1", "req_1");
        assert_eq!(payload.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_zero_timestamp_uses_now() {
        let mut response = event_response(1, "x");
        response.timestamp = 0;
        let before = Utc::now();
        let payload = response_to_payload(&response, "a1", "req_1");
        assert!(payload.timestamp >= before);
    }

    #[test]
    fn test_unknown_state_label() {
        let mut response = event_response(1, "x");
        response.state = 42;
        let payload = response_to_payload(&response, "a1", "req_1");
        assert_eq!(payload.agent_state, "unknown");
    }

    #[test]
    fn test_synthesized_error_payload() {
        let payload = error_payload("a1", "req_9", 0, "AGENT_UNREACHABLE", "no route", false);
        assert_eq!(payload.event_type, EventType::Error);
        assert!(payload.is_final);
        assert_eq!(payload.seq, 0);
        assert_eq!(payload.agent_state, "error");
        let error = payload.error.unwrap();
        assert_eq!(error.code, "AGENT_UNREACHABLE");
        assert_eq!(error.message, "no route");
        assert!(!error.recoverable);
    }
}
