//! MQTT client session over any `embedded-io-async` byte stream

use embassy_time::{Duration, Instant};
use embedded_io_async::{Read, Write};
use log::{debug, warn};
use thiserror_no_std::Error;

use super::packet::{
    self, CodecError, ConnectOptions, Packet, Publish, QoS, SUBACK_FAILURE,
};

/// Transmit and receive buffer size. Bounds the largest packet either way.
pub const MQTT_BUFFER_SIZE: usize = 1024;

#[derive(Error, Debug)]
pub enum MqttError<E: core::fmt::Debug> {
    #[error("transport error: {0:?}")]
    Transport(E),
    #[error("codec error: {0}")]
    Codec(CodecError),
    #[error("connection closed by broker")]
    ConnectionClosed,
    #[error("broker refused connection, code {0}")]
    ConnectionRefused(u8),
    #[error("subscription rejected")]
    SubscribeRejected,
    #[error("unexpected packet while waiting for {0}")]
    UnexpectedPacket(&'static str),
    #[error("broker did not answer keep alive ping")]
    KeepAliveTimeout,
}

impl<E: core::fmt::Debug> From<CodecError> for MqttError<E> {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

/// A connected (or connecting) MQTT session.
///
/// [`MqttClient::poll`] is cancel safe: partially received frames stay in
/// the client's buffer and a PUBACK owed for a returned message is kept
/// until it is fully written, so `poll` can sit in a `select` next to a
/// timer or an outbound queue.
pub struct MqttClient<T> {
    transport: T,
    tx: [u8; MQTT_BUFFER_SIZE],
    rx: [u8; MQTT_BUFFER_SIZE],
    rx_len: usize,
    /// Bytes of the frame handed out by the previous `poll`
    consumed: usize,
    next_packet_id: u16,
    keep_alive: Duration,
    last_sent: Instant,
    ping_sent: Option<Instant>,
    /// PUBACK owed to the broker and how much of it is already written
    ack: [u8; PUBACK_LEN],
    ack_len: usize,
    ack_written: usize,
}

const PUBACK_LEN: usize = 4;

impl<T> MqttClient<T>
where
    T: Read + Write,
{
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            tx: [0; MQTT_BUFFER_SIZE],
            rx: [0; MQTT_BUFFER_SIZE],
            rx_len: 0,
            consumed: 0,
            next_packet_id: 1,
            keep_alive: Duration::from_secs(0),
            last_sent: Instant::now(),
            ping_sent: None,
            ack: [0; PUBACK_LEN],
            ack_len: 0,
            ack_written: 0,
        }
    }

    /// Give the transport back, e.g. to close the socket
    pub fn into_inner(self) -> T {
        self.transport
    }

    fn packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        // Packet id 0 is not allowed
        self.next_packet_id = self.next_packet_id.checked_add(1).unwrap_or(1);
        id
    }

    /// Finish writing an owed PUBACK. Progress is recorded after every
    /// write so a cancelled call resumes where it stopped.
    async fn flush_ack(&mut self) -> Result<(), MqttError<T::Error>> {
        while self.ack_written < self.ack_len {
            let n = self
                .transport
                .write(&self.ack[self.ack_written..self.ack_len])
                .await
                .map_err(MqttError::Transport)?;
            if n == 0 {
                return Err(MqttError::ConnectionClosed);
            }
            self.ack_written += n;
        }
        if self.ack_len > 0 {
            self.transport.flush().await.map_err(MqttError::Transport)?;
            self.ack_len = 0;
            self.ack_written = 0;
            self.last_sent = Instant::now();
        }
        Ok(())
    }

    async fn send(&mut self, len: usize) -> Result<(), MqttError<T::Error>> {
        self.flush_ack().await?;
        self.transport
            .write_all(&self.tx[..len])
            .await
            .map_err(MqttError::Transport)?;
        self.transport.flush().await.map_err(MqttError::Transport)?;
        self.last_sent = Instant::now();
        Ok(())
    }

    /// Send CONNECT and wait for the CONNACK
    pub async fn connect(
        &mut self,
        options: &ConnectOptions<'_>,
    ) -> Result<(), MqttError<T::Error>> {
        self.keep_alive = Duration::from_secs(options.keep_alive_secs as u64);
        let len = packet::encode_connect(&mut self.tx, options)?;
        self.send(len).await?;

        match self.poll().await? {
            Packet::ConnAck { return_code: 0, .. } => {
                debug!("MQTT connected as {}", options.client_id);
                Ok(())
            }
            Packet::ConnAck { return_code, .. } => Err(MqttError::ConnectionRefused(return_code)),
            _ => Err(MqttError::UnexpectedPacket("connack")),
        }
    }

    /// Subscribe to one filter and wait for the SUBACK.
    ///
    /// Messages that arrive before the SUBACK are dropped.
    pub async fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<(), MqttError<T::Error>> {
        let id = self.packet_id();
        let len = packet::encode_subscribe(&mut self.tx, id, filter, qos)?;
        self.send(len).await?;

        loop {
            match self.poll().await? {
                Packet::SubAck {
                    packet_id,
                    return_code,
                } if packet_id == id => {
                    if return_code == SUBACK_FAILURE {
                        return Err(MqttError::SubscribeRejected);
                    }
                    return Ok(());
                }
                Packet::Publish(p) => warn!("Dropping message on {} before SUBACK", p.topic),
                Packet::ConnAck { .. } => return Err(MqttError::UnexpectedPacket("suback")),
                _ => {}
            }
        }
    }

    /// Publish a message. Returns the packet id for QoS 1 so the caller can
    /// match the PUBACK coming back through [`MqttClient::poll`].
    pub async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<Option<u16>, MqttError<T::Error>> {
        let packet_id = match qos {
            QoS::AtMostOnce => None,
            QoS::AtLeastOnce => Some(self.packet_id()),
        };
        let len = packet::encode_publish(
            &mut self.tx,
            &Publish {
                topic,
                payload,
                qos,
                retain,
                dup: false,
                packet_id,
            },
        )?;
        self.send(len).await?;
        Ok(packet_id)
    }

    /// Whether a PINGREQ should go out to keep the session alive
    pub fn ping_due(&self) -> bool {
        if self.keep_alive.as_ticks() == 0 || self.ping_sent.is_some() {
            return false;
        }
        // Ping at half the interval so the broker never sees a full gap
        Instant::now().saturating_duration_since(self.last_sent) >= self.keep_alive / 2
    }

    /// Time until [`MqttClient::keep_alive`] has work to do, for use in a
    /// timer: the next ping, or the deadline of the unanswered one.
    pub fn until_ping(&self) -> Duration {
        if self.keep_alive.as_ticks() == 0 {
            return Duration::from_secs(3600);
        }
        let deadline = match self.ping_sent {
            Some(sent) => sent + self.keep_alive,
            None => self.last_sent + self.keep_alive / 2,
        };
        deadline.saturating_duration_since(Instant::now())
    }

    /// Service the keep alive timer: fail if the outstanding ping went
    /// unanswered for a whole interval, otherwise ping when one is due.
    pub async fn keep_alive(&mut self) -> Result<(), MqttError<T::Error>> {
        if let Some(sent) = self.ping_sent {
            if Instant::now().saturating_duration_since(sent) >= self.keep_alive {
                return Err(MqttError::KeepAliveTimeout);
            }
            return Ok(());
        }
        if self.ping_due() {
            self.ping().await?;
        }
        Ok(())
    }

    /// Send PINGREQ now
    pub async fn ping(&mut self) -> Result<(), MqttError<T::Error>> {
        let len = packet::encode_pingreq(&mut self.tx)?;
        self.send(len).await?;
        self.ping_sent = Some(Instant::now());
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<(), MqttError<T::Error>> {
        let len = packet::encode_disconnect(&mut self.tx)?;
        self.send(len).await
    }

    fn discard_consumed(&mut self) {
        if self.consumed > 0 {
            self.rx.copy_within(self.consumed..self.rx_len, 0);
            self.rx_len -= self.consumed;
            self.consumed = 0;
        }
    }

    /// Wait for the next packet from the broker.
    ///
    /// Incoming QoS 1 publishes are acknowledged at the start of the next
    /// `poll` or send, PINGRESP clears the outstanding ping.
    pub async fn poll(&mut self) -> Result<Packet<'_>, MqttError<T::Error>> {
        self.flush_ack().await?;
        self.discard_consumed();

        let frame_len = loop {
            if let Some(len) = packet::frame_len(&self.rx[..self.rx_len])? {
                break len;
            }
            if self.rx_len == self.rx.len() {
                return Err(MqttError::Codec(CodecError::BufferTooSmall));
            }
            let n = self
                .transport
                .read(&mut self.rx[self.rx_len..])
                .await
                .map_err(MqttError::Transport)?;
            if n == 0 {
                return Err(MqttError::ConnectionClosed);
            }
            self.rx_len += n;
        };
        // No awaits past this point: the frame is handed out exactly once
        self.consumed = frame_len;

        let mut ack = None;
        match packet::decode(&self.rx[..frame_len])? {
            Packet::Publish(Publish {
                packet_id: Some(id),
                ..
            }) => ack = Some(id),
            Packet::PingResp => self.ping_sent = None,
            _ => {}
        }
        if let Some(id) = ack {
            self.ack_len = packet::encode_puback(&mut self.ack, id)?;
            self.ack_written = 0;
        }

        Ok(packet::decode(&self.rx[..frame_len])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::packet::LastWill;
    use alloc::vec::Vec;
    use core::convert::Infallible;
    use embassy_futures::select::{Either, select};
    use embassy_futures::{block_on, yield_now};
    use std::thread::sleep;

    fn count_acks(written: &[u8], id: u8) -> usize {
        written.windows(4).filter(|w| *w == [0x40, 2, 0, id]).count()
    }

    /// Scripted broker: hands out `incoming` in `chunk`-sized reads and
    /// records everything written.
    struct MockTransport {
        incoming: Vec<u8>,
        read_pos: usize,
        chunk: usize,
        written: Vec<u8>,
        /// Writes that yield to the executor once before completing
        slow_writes: usize,
    }

    impl MockTransport {
        fn new(incoming: &[u8], chunk: usize) -> Self {
            Self {
                incoming: incoming.to_vec(),
                read_pos: 0,
                chunk,
                written: Vec::new(),
                slow_writes: 0,
            }
        }
    }

    impl embedded_io_async::ErrorType for MockTransport {
        type Error = Infallible;
    }

    impl Read for MockTransport {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Infallible> {
            let left = self.incoming.len() - self.read_pos;
            let n = left.min(self.chunk).min(buf.len());
            buf[..n].copy_from_slice(&self.incoming[self.read_pos..self.read_pos + n]);
            self.read_pos += n;
            Ok(n)
        }
    }

    impl Write for MockTransport {
        async fn write(&mut self, buf: &[u8]) -> Result<usize, Infallible> {
            if self.slow_writes > 0 {
                self.slow_writes -= 1;
                yield_now().await;
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        async fn flush(&mut self) -> Result<(), Infallible> {
            Ok(())
        }
    }

    fn options() -> ConnectOptions<'static> {
        options_with_keep_alive(60)
    }

    fn options_with_keep_alive(keep_alive_secs: u16) -> ConnectOptions<'static> {
        ConnectOptions {
            client_id: "plug",
            keep_alive_secs,
            username: None,
            password: None,
            will: Some(LastWill {
                topic: "p/availability",
                payload: b"offline",
                qos: QoS::AtLeastOnce,
                retain: true,
            }),
        }
    }

    #[test]
    fn test_connect_accepted() {
        let mut client = MqttClient::new(MockTransport::new(&[0x20, 2, 0, 0], 1));
        block_on(client.connect(&options())).unwrap();
        let transport = client.into_inner();
        assert_eq!(transport.written[0], 0x10);
    }

    #[test]
    fn test_connect_refused() {
        let mut client = MqttClient::new(MockTransport::new(&[0x20, 2, 0, 5], 4));
        let err = block_on(client.connect(&options())).unwrap_err();
        assert!(matches!(err, MqttError::ConnectionRefused(5)));
    }

    #[test]
    fn test_subscribe_waits_for_matching_suback() {
        let incoming = [
            0x20, 2, 0, 0, // connack
            0x90, 3, 0, 1, 1, // suback id 1
        ];
        let mut client = MqttClient::new(MockTransport::new(&incoming, 3));
        block_on(client.connect(&options())).unwrap();
        block_on(client.subscribe("p/cmnd/+", QoS::AtLeastOnce)).unwrap();
    }

    #[test]
    fn test_subscribe_rejected() {
        let incoming = [0x20, 2, 0, 0, 0x90, 3, 0, 1, 0x80];
        let mut client = MqttClient::new(MockTransport::new(&incoming, 16));
        block_on(client.connect(&options())).unwrap();
        let err = block_on(client.subscribe("p/cmnd/+", QoS::AtLeastOnce)).unwrap_err();
        assert!(matches!(err, MqttError::SubscribeRejected));
    }

    #[test]
    fn test_poll_acks_qos1_and_handles_back_to_back_frames() {
        let incoming = [
            0x20, 2, 0, 0, // connack
            0x32, 7, 0, 3, b'a', b'/', b'b', 0, 9, // publish qos1 id 9, empty payload
            0x30, 4, 0, 1, b'c', b'X', // publish qos0 "X"
            0xD0, 0, // pingresp
        ];
        let mut client = MqttClient::new(MockTransport::new(&incoming, 64));
        block_on(client.connect(&options())).unwrap();

        match block_on(client.poll()).unwrap() {
            Packet::Publish(p) => {
                assert_eq!(p.topic, "a/b");
                assert_eq!(p.packet_id, Some(9));
            }
            other => panic!("unexpected {:?}", other),
        }
        match block_on(client.poll()).unwrap() {
            Packet::Publish(p) => {
                assert_eq!(p.topic, "c");
                assert_eq!(p.payload, b"X");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(block_on(client.poll()).unwrap(), Packet::PingResp);

        let written = client.into_inner().written;
        assert!(written.ends_with(&[0x40, 2, 0, 9]));
        assert_eq!(count_acks(&written, 9), 1);
    }

    #[test]
    fn test_poll_cancelled_while_acking_keeps_messages() {
        let incoming = [
            0x20, 2, 0, 0, // connack
            0x32, 7, 0, 3, b'a', b'/', b'b', 0, 9, // publish qos1 id 9
            0x30, 4, 0, 1, b'c', b'X', // publish qos0 "X"
        ];
        let mut client = MqttClient::new(MockTransport::new(&incoming, 64));
        block_on(client.connect(&options())).unwrap();

        match block_on(select(client.poll(), core::future::ready(()))) {
            Either::First(Ok(Packet::Publish(p))) => assert_eq!(p.packet_id, Some(9)),
            _ => panic!("qos1 publish should be returned without waiting on the ack"),
        }

        // The owed PUBACK stalls, so the competing branch wins
        client.transport.slow_writes = 1;
        let cancelled = matches!(
            block_on(select(client.poll(), core::future::ready(()))),
            Either::Second(())
        );
        assert!(cancelled);

        match block_on(client.poll()).unwrap() {
            Packet::Publish(p) => assert_eq!(p.payload, b"X"),
            other => panic!("unexpected {:?}", other),
        }
        let written = client.into_inner().written;
        assert_eq!(count_acks(&written, 9), 1);
    }

    #[test]
    fn test_poll_reports_closed_connection() {
        let mut client = MqttClient::new(MockTransport::new(&[0x30, 5, 0], 8));
        let err = block_on(client.poll()).unwrap_err();
        assert!(matches!(err, MqttError::ConnectionClosed));
    }

    #[test]
    fn test_publish_assigns_packet_ids() {
        let mut client = MqttClient::new(MockTransport::new(&[], 1));
        let first = block_on(client.publish("t", b"1", QoS::AtLeastOnce, false)).unwrap();
        let none = block_on(client.publish("t", b"1", QoS::AtMostOnce, false)).unwrap();
        let second = block_on(client.publish("t", b"1", QoS::AtLeastOnce, false)).unwrap();
        assert_eq!(first, Some(1));
        assert_eq!(none, None);
        assert_eq!(second, Some(2));
    }

    #[test]
    fn test_ping_not_due_right_after_connect() {
        let mut client = MqttClient::new(MockTransport::new(&[0x20, 2, 0, 0], 4));
        block_on(client.connect(&options())).unwrap();
        assert!(!client.ping_due());
        assert!(client.until_ping() <= Duration::from_secs(30));

        block_on(client.ping()).unwrap();
        assert!(!client.ping_due());
        let written = client.into_inner().written;
        assert!(written.ends_with(&[0xC0, 0]));
    }

    #[test]
    fn test_outstanding_ping_waits_for_full_interval() {
        let mut client = MqttClient::new(MockTransport::new(&[0x20, 2, 0, 0], 4));
        block_on(client.connect(&options_with_keep_alive(2))).unwrap();
        block_on(client.ping()).unwrap();

        // Past half the interval the timer must still point at the deadline
        sleep(std::time::Duration::from_millis(1_100));
        assert!(!client.ping_due());
        assert!(client.until_ping() > Duration::from_millis(500));
        block_on(client.keep_alive()).unwrap();
        let pings = client.transport.written.windows(2).filter(|w| *w == [0xC0, 0]);
        assert_eq!(pings.count(), 1);
    }

    #[test]
    fn test_unanswered_ping_times_out() {
        let mut client = MqttClient::new(MockTransport::new(&[0x20, 2, 0, 0], 4));
        block_on(client.connect(&options_with_keep_alive(1))).unwrap();
        block_on(client.ping()).unwrap();

        sleep(std::time::Duration::from_millis(1_050));
        assert_eq!(client.until_ping(), Duration::from_ticks(0));
        let err = block_on(client.keep_alive()).unwrap_err();
        assert!(matches!(err, MqttError::KeepAliveTimeout));
    }
}
