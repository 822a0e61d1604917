//! Pure routing of MQTT events
//!
//! Maps raw `rumqttc` events to the small set of session events the messaging
//! client dispatches on.

use bytes::Bytes;
use rumqttc::{Event, Outgoing, Packet, SubscribeReasonCode};
use tracing::warn;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to the session event it represents (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: Bytes::copy_from_slice(publish.topic.as_bytes()),
                    payload: publish.payload.clone(),
                },
                Packet::PubAck(puback) => EventRoute::PublishAcknowledged {
                    packet_id: puback.pkid,
                },
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    granted: Self::validate_subscription_success(&suback.return_codes),
                },
                Packet::Disconnect => EventRoute::Disconnected,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Whether our DISCONNECT packet has been written to the broker
    pub fn is_disconnect_sent(event: &Event) -> bool {
        matches!(event, Event::Outgoing(Outgoing::Disconnect))
    }

    /// Whether every requested subscription was granted (pure function)
    pub fn validate_subscription_success(return_codes: &[SubscribeReasonCode]) -> bool {
        let granted = return_codes
            .iter()
            .all(|code| matches!(code, SubscribeReasonCode::Success(_)));
        if !granted {
            warn!("Subscription refused by broker: {:?}", return_codes);
        }
        granted
    }
}

/// Session events seen by the messaging client
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted the session
    ConnectionAcknowledged,
    /// Message received on a subscribed topic
    MessageReceived { topic: Bytes, payload: Bytes },
    /// Broker acknowledged an at-least-once publish
    PublishAcknowledged { packet_id: u16 },
    /// Subscription answered by the broker
    SubscriptionConfirmed { packet_id: u16, granted: bool },
    /// Session dropped after it was established
    Disconnected,
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

impl EventRoute {
    /// Whether the event is only of interest to the transport itself
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            EventRoute::InfrastructureEvent(_) | EventRoute::OutgoingEvent
        )
    }
}
