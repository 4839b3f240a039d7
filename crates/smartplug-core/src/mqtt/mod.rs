//! MQTT 3.1.1 codec, client session, and the plug's topic layout

pub mod client;
pub mod packet;
pub mod topics;

pub use client::{MQTT_BUFFER_SIZE, MqttClient, MqttError};
pub use packet::{CodecError, ConnectOptions, LastWill, Packet, Publish, QoS};
pub use topics::{AVAILABILITY_OFFLINE, AVAILABILITY_ONLINE, Topic, TopicKind, Topics};
