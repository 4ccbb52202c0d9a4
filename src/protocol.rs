use crate::channels::ChannelCatalog;
use crate::config::SchedulerLimits;
use crate::registry::{RegistryStats, RequestId, RequestRegistry};
use crate::request::ScanRequest;
use crate::schedule::Schedule;
use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_MESSAGE_SIZE: usize = 4096; // one control line from a client
pub const MAX_RESPONSE_SIZE: usize = 16384; // a full 16-bucket schedule fits

pub type MessageBuffer = ArrayString<MAX_MESSAGE_SIZE>;
pub type ResponseBuffer = ArrayString<MAX_RESPONSE_SIZE>;

/// One JSON line from a control client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMessage {
    Register { client: alloc::string::String, request: ScanRequest },
    Unregister { id: RequestId },
    UnregisterClient { client: alloc::string::String },
    GetSchedule,
    GetLimits,
    SetLimits { limits: SchedulerLimits },
    GetStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Success,
    Rejected,
    NotFound,
    InvalidMessage,
    /// Unsolicited push sent to every client after the schedule changed.
    ScheduleUpdate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<SchedulerLimits>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<RegistryStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<alloc::string::String>,
}

impl ControlResponse {
    pub fn new(status: ResponseStatus) -> Self {
        Self {
            status,
            request_id: None,
            schedule: None,
            limits: None,
            stats: None,
            message: None,
        }
    }

    pub fn with_message(status: ResponseStatus, message: impl Into<alloc::string::String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(status)
        }
    }

    pub fn schedule_update(schedule: &Schedule) -> Self {
        Self {
            schedule: Some(schedule.clone()),
            ..Self::new(ResponseStatus::ScheduleUpdate)
        }
    }

    pub fn is_push(&self) -> bool {
        self.status == ResponseStatus::ScheduleUpdate
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("message of {size} bytes exceeds {max}")]
    MessageTooLarge { size: usize, max: usize },
    #[error("invalid message: {0}")]
    InvalidJson(alloc::string::String),
    #[error("serialization failed: {0}")]
    Serialization(alloc::string::String),
}

#[derive(Debug)]
pub struct ProtocolHandler {
    messages_handled: u32,
    message_buffer: MessageBuffer,
    response_buffer: ResponseBuffer,
}

impl ProtocolHandler {
    pub fn new() -> Self {
        Self {
            messages_handled: 0,
            message_buffer: ArrayString::new(),
            response_buffer: ArrayString::new(),
        }
    }

    pub fn parse_message(&mut self, line: &str) -> Result<ControlMessage, ProtocolError> {
        self.message_buffer.clear();
        // Check size before copying into the fixed buffer
        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        self.message_buffer.push_str(line);

        serde_json::from_str::<ControlMessage>(&self.message_buffer)
            .map_err(|e| ProtocolError::InvalidJson(e.to_string()))
    }

    pub fn serialize_response(&mut self, response: &ControlResponse) -> Result<&str, ProtocolError> {
        self.response_buffer.clear();

        let json = serde_json::to_string(response)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        if json.len() > MAX_RESPONSE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: json.len(),
                max: MAX_RESPONSE_SIZE,
            });
        }
        self.response_buffer.push_str(&json);

        Ok(&self.response_buffer)
    }

    /// Applies a message to the registry and builds the reply.
    pub fn handle<C: ChannelCatalog>(
        &mut self,
        registry: &mut RequestRegistry<C>,
        message: ControlMessage,
    ) -> ControlResponse {
        self.messages_handled = self.messages_handled.wrapping_add(1);

        match message {
            ControlMessage::Register { client, request } => match registry.register(&client, request) {
                Ok(id) => ControlResponse {
                    request_id: Some(id),
                    ..ControlResponse::new(ResponseStatus::Success)
                },
                Err(e) => ControlResponse::with_message(ResponseStatus::Rejected, e.to_string()),
            },
            // Unknown ids are the only way unregister fails
            ControlMessage::Unregister { id } => match registry.unregister(id) {
                Ok(()) => ControlResponse {
                    request_id: Some(id),
                    ..ControlResponse::new(ResponseStatus::Success)
                },
                Err(e) => ControlResponse::with_message(ResponseStatus::NotFound, e.to_string()),
            },
            ControlMessage::UnregisterClient { client } => {
                let removed = registry.unregister_client(&client);
                ControlResponse::with_message(
                    ResponseStatus::Success,
                    alloc::format!("{} request(s) removed", removed),
                )
            }
            ControlMessage::GetSchedule => ControlResponse {
                schedule: Some(registry.schedule().clone()),
                ..ControlResponse::new(ResponseStatus::Success)
            },
            ControlMessage::GetLimits => ControlResponse {
                limits: Some(registry.limits()),
                ..ControlResponse::new(ResponseStatus::Success)
            },
            ControlMessage::SetLimits { limits } => match registry.set_limits(limits) {
                Ok(()) => ControlResponse {
                    limits: Some(registry.limits()),
                    ..ControlResponse::new(ResponseStatus::Success)
                },
                Err(e) => ControlResponse::with_message(ResponseStatus::Rejected, e.to_string()),
            },
            ControlMessage::GetStats => ControlResponse {
                stats: Some(registry.stats().clone()),
                ..ControlResponse::new(ResponseStatus::Success)
            },
        }
    }

    pub fn messages_handled(&self) -> u32 {
        self.messages_handled
    }
}

impl Default for ProtocolHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oversized_message_rejected() {
        let mut handler = ProtocolHandler::new();
        let line = " ".repeat(MAX_MESSAGE_SIZE + 1);
        assert!(matches!(
            handler.parse_message(&line),
            Err(ProtocolError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_unit_message_parses() {
        let mut handler = ProtocolHandler::new();
        assert_eq!(handler.parse_message(r#""GetSchedule""#), Ok(ControlMessage::GetSchedule));
    }

    #[test]
    fn test_response_skips_empty_fields() {
        let mut handler = ProtocolHandler::new();
        let json = handler
            .serialize_response(&ControlResponse::new(ResponseStatus::Success))
            .unwrap();
        assert_eq!(json, r#"{"status":"Success"}"#);
    }
}
