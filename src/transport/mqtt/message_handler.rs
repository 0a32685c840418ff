//! Classification of rumqttc v5 events
//!
//! The supervisor only cares about a handful of packets; everything else is
//! reduced to a debug string.

use crate::transport::InboundMessage;
use rumqttc::v5::mqttbytes::v5::{Packet, Publish, SubscribeReasonCode};
use rumqttc::v5::Event;

pub struct MessageHandler;

impl MessageHandler {
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        let Event::Incoming(packet) = event else {
            return EventRoute::Outgoing;
        };
        match packet {
            Packet::ConnAck(_) => EventRoute::ConnAck,
            Packet::Publish(publish) => EventRoute::Message {
                message: Self::inbound(publish),
                subscription_identifiers: publish
                    .properties
                    .as_ref()
                    .map(|properties| properties.subscription_identifiers.clone())
                    .unwrap_or_default(),
            },
            Packet::Disconnect(disconnect) => {
                EventRoute::Disconnect(format!("{:?}", disconnect.reason_code))
            }
            Packet::SubAck(suback) => EventRoute::SubAck {
                packet_id: suback.pkid,
                rejected: suback
                    .return_codes
                    .iter()
                    .filter(|code| !matches!(code, SubscribeReasonCode::Success(_)))
                    .map(|code| format!("{code:?}"))
                    .collect(),
            },
            other => EventRoute::Other(format!("{other:?}")),
        }
    }

    /// Topics are bytes on the wire; invalid UTF-8 is replaced rather than dropped
    fn inbound(publish: &Publish) -> InboundMessage {
        InboundMessage::new(
            String::from_utf8_lossy(&publish.topic).into_owned(),
            publish.payload.clone(),
            publish.qos,
            publish.retain,
        )
    }

    /// Error text when the broker refused any filter in a SUBSCRIBE
    pub fn check_suback(rejected: &[String]) -> Result<(), String> {
        if rejected.is_empty() {
            Ok(())
        } else {
            Err(format!("Broker rejected subscription: {rejected:?}"))
        }
    }
}

#[derive(Debug, Clone)]
pub enum EventRoute {
    ConnAck,
    /// Inbound PUBLISH with the identifiers of the subscriptions it matched
    Message {
        message: InboundMessage,
        subscription_identifiers: Vec<usize>,
    },
    /// Broker-initiated DISCONNECT with its reason code
    Disconnect(String),
    SubAck { packet_id: u16, rejected: Vec<String> },
    /// Pings, acks and other bookkeeping packets
    Other(String),
    Outgoing,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{
        ConnAck, ConnectReturnCode, Disconnect, DisconnectReasonCode, PingResp, PublishProperties,
        SubAck,
    };
    use rumqttc::v5::mqttbytes::QoS;

    #[test]
    fn test_connack_and_disconnect() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::ConnAck
        ));

        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::ServerShuttingDown,
            properties: None,
        }));
        match MessageHandler::route_mqtt_event(&disconnect) {
            EventRoute::Disconnect(reason) => assert!(reason.contains("ServerShuttingDown")),
            other => panic!("expected Disconnect, got {other:?}"),
        }
    }

    #[test]
    fn test_publish_becomes_inbound_message() {
        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: true,
            topic: Bytes::from("zigbee2mqtt/kitchen_light"),
            pkid: 1,
            payload: Bytes::from(r#"{"state":"ON"}"#),
            properties: None,
        }));

        let EventRoute::Message {
            message,
            subscription_identifiers,
        } = MessageHandler::route_mqtt_event(&publish)
        else {
            panic!("expected Message");
        };
        assert!(subscription_identifiers.is_empty());
        assert_eq!(message.topic, "zigbee2mqtt/kitchen_light");
        assert_eq!(message.payload, Bytes::from(r#"{"state":"ON"}"#));
        assert_eq!(message.qos, QoS::AtLeastOnce);
        assert!(message.retain);
    }

    #[test]
    fn test_publish_carries_subscription_identifiers() {
        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: Bytes::from("home/door/front"),
            pkid: 0,
            payload: Bytes::from("open"),
            properties: Some(PublishProperties {
                subscription_identifiers: vec![3, 7],
                ..Default::default()
            }),
        }));

        match MessageHandler::route_mqtt_event(&publish) {
            EventRoute::Message {
                message,
                subscription_identifiers,
            } => {
                assert_eq!(message.topic, "home/door/front");
                assert_eq!(subscription_identifiers, vec![3, 7]);
            }
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[test]
    fn test_suback_collects_rejections() {
        let suback = Event::Incoming(Packet::SubAck(SubAck {
            pkid: 7,
            return_codes: vec![
                SubscribeReasonCode::Success(QoS::AtLeastOnce),
                SubscribeReasonCode::NotAuthorized,
            ],
            properties: None,
        }));

        match MessageHandler::route_mqtt_event(&suback) {
            EventRoute::SubAck { packet_id, rejected } => {
                assert_eq!(packet_id, 7);
                assert_eq!(rejected, vec!["NotAuthorized".to_string()]);
                assert!(MessageHandler::check_suback(&rejected).is_err());
            }
            other => panic!("expected SubAck, got {other:?}"),
        }
        assert!(MessageHandler::check_suback(&[]).is_ok());
    }

    #[test]
    fn test_bookkeeping_packets() {
        let pingresp = Event::Incoming(Packet::PingResp(PingResp));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&pingresp),
            EventRoute::Other(_)
        ));
    }
}
