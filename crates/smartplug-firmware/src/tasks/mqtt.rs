use embassy_futures::select::{Either3, select3};
use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::{ConnectError, TcpSocket};
use embassy_net::{IpAddress, Ipv4Address, Stack};
use embassy_time::{Duration, Timer};
use log::{error, info, warn};
use smartplug_core::DeviceId;
use smartplug_core::app_state::{
    APP_STATE, AppError, AppRunState, CONTROL_CHANNEL, OUTBOUND_CHANNEL, describe,
};
use smartplug_core::commands::{CommandError, PlugCommand};
use smartplug_core::config::MqttConfig;
use smartplug_core::mqtt::{
    AVAILABILITY_OFFLINE, AVAILABILITY_ONLINE, ConnectOptions, LastWill, MqttClient, MqttError,
    Packet, QoS, TopicKind, Topics,
};
use smartplug_core::plug::{Outbound, PlugInput};
use smartplug_core::reconnect::Backoff;
use smartplug_core::telemetry;
use thiserror_no_std::Error;

use crate::net::{TcpError, TcpTransport};

const SOCKET_BUFFER_SIZE: usize = 1536;

type Client<'a> = MqttClient<TcpTransport<'a>>;

#[derive(Error, Debug)]
enum SessionError {
    #[error("could not resolve broker host")]
    Dns,
    #[error("TCP connect failed: {0:?}")]
    Connect(ConnectError),
    #[error("{0}")]
    Mqtt(MqttError<TcpError>),
}

impl From<MqttError<TcpError>> for SessionError {
    fn from(e: MqttError<TcpError>) -> Self {
        Self::Mqtt(e)
    }
}

enum SessionEvent {
    Command(Result<PlugCommand, CommandError>),
    Outbound(Outbound),
    PingTimer,
    Other,
}

async fn resolve(stack: Stack<'static>, host: &str) -> Result<IpAddress, SessionError> {
    if let Ok(ip) = host.parse::<Ipv4Address>() {
        return Ok(IpAddress::Ipv4(ip));
    }
    let addresses = stack
        .dns_query(host, DnsQueryType::A)
        .await
        .map_err(|_| SessionError::Dns)?;
    addresses.first().copied().ok_or(SessionError::Dns)
}

/// Wait for whichever comes first: a broker packet, something to publish,
/// or the keep alive timer
async fn next_event(
    client: &mut Client<'_>,
    topics: &Topics,
) -> Result<SessionEvent, SessionError> {
    let ping_in = client.until_ping();
    let polled = select3(
        client.poll(),
        OUTBOUND_CHANNEL.receive(),
        Timer::after(ping_in),
    )
    .await;
    let event = match polled {
        Either3::First(Ok(Packet::Publish(publish))) => {
            SessionEvent::Command(PlugCommand::parse(topics, publish.topic, publish.payload))
        }
        Either3::First(Ok(_)) => SessionEvent::Other,
        Either3::First(Err(e)) => return Err(e.into()),
        Either3::Second(outbound) => SessionEvent::Outbound(outbound),
        Either3::Third(()) => SessionEvent::PingTimer,
    };
    Ok(event)
}

async fn run_session(
    stack: Stack<'static>,
    config: &MqttConfig,
    device_id: &DeviceId,
    topics: &Topics,
    backoff: &mut Backoff,
) -> Result<(), SessionError> {
    let address = resolve(stack, &config.host).await?;
    info!("Connecting to broker {}:{}", address, config.port);

    let mut rx_buffer = [0u8; SOCKET_BUFFER_SIZE];
    let mut tx_buffer = [0u8; SOCKET_BUFFER_SIZE];
    let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
    // Half again the keep alive: a dead broker shows up as a socket timeout
    socket.set_timeout(Some(Duration::from_secs(
        config.keep_alive_secs as u64 * 3 / 2,
    )));
    socket
        .connect((address, config.port))
        .await
        .map_err(SessionError::Connect)?;

    let mut client = MqttClient::new(TcpTransport::new(socket));
    let availability = topics.topic(TopicKind::Availability);
    let options = ConnectOptions {
        client_id: device_id.as_str(),
        keep_alive_secs: config.keep_alive_secs,
        username: (!config.username.is_empty()).then_some(config.username.as_str()),
        password: (!config.password.is_empty()).then_some(config.password.as_bytes()),
        will: Some(LastWill {
            topic: &availability,
            payload: AVAILABILITY_OFFLINE.as_bytes(),
            qos: QoS::AtLeastOnce,
            retain: true,
        }),
    };
    client.connect(&options).await?;
    client
        .subscribe(&topics.command_filter(), QoS::AtLeastOnce)
        .await?;
    client
        .publish(&availability, AVAILABILITY_ONLINE.as_bytes(), QoS::AtLeastOnce, true)
        .await?;

    let ipv4 = APP_STATE.lock().await.ipv4;
    let info = telemetry::info_payload(device_id, ipv4);
    client
        .publish(&topics.topic(TopicKind::Info), info.as_bytes(), QoS::AtMostOnce, true)
        .await?;

    info!("MQTT session up as {}", device_id);
    backoff.reset();
    APP_STATE.lock().await.set_mqtt_connected(true);
    CONTROL_CHANNEL.send(PlugInput::MqttConnected).await;

    loop {
        match next_event(&mut client, topics).await? {
            SessionEvent::Command(Ok(command)) => {
                info!("Command {:?}", command);
                CONTROL_CHANNEL.send(PlugInput::Command(command)).await;
            }
            SessionEvent::Command(Err(e)) => warn!("Ignoring command: {}", e),
            SessionEvent::Outbound(outbound) => {
                // Retained state must not be lost; telemetry can be
                let qos = if outbound.retain {
                    QoS::AtLeastOnce
                } else {
                    QoS::AtMostOnce
                };
                client
                    .publish(
                        &topics.topic(outbound.kind),
                        outbound.payload.as_bytes(),
                        qos,
                        outbound.retain,
                    )
                    .await?;
            }
            SessionEvent::PingTimer => client.keep_alive().await?,
            SessionEvent::Other => {}
        }
    }
}

/// Maintains the broker session: resolve, connect, subscribe, then relay
/// commands in and state out until the connection fails
#[embassy_executor::task]
pub async fn mqtt_task(stack: Stack<'static>, config: MqttConfig, device_id: DeviceId) {
    let Some(topics) = Topics::new(&config.topic_prefix, &device_id) else {
        error!("Topic prefix {} does not fit", config.topic_prefix);
        APP_STATE.lock().await.set_run_state(AppRunState::Error);
        return;
    };
    info!("MQTT topics under {}", topics.base());

    let mut backoff = Backoff::default();
    loop {
        stack.wait_config_up().await;
        {
            let mut state = APP_STATE.lock().await;
            state.ipv4 = stack
                .config_v4()
                .map(|config| config.address.address().octets());
            state.set_run_state(AppRunState::MqttConnecting);
        }

        let ended = run_session(stack, &config, &device_id, &topics, &mut backoff).await;
        {
            let mut state = APP_STATE.lock().await;
            if let Err(e) = ended {
                state.record_error(AppError::Mqtt(describe(format_args!("{}", e))));
            }
            state.set_mqtt_connected(false);
        }

        let delay = backoff.next_delay();
        info!("Reconnecting to broker in {} s", delay.as_secs());
        Timer::after(delay).await;
    }
}
