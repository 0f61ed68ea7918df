use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::select;
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use rumqttc::Outgoing;

use crate::publish::EventPublisher;
use crate::shutdown::Shutdown;

const AVAILABILITY_TOPIC_SUFFIX: &str = "status";
const PAYLOAD_ONLINE: &str = "online";
const PAYLOAD_OFFLINE: &str = "offline";
const RECONNECT_DELAY: Duration = Duration::from_secs(2);
/// How long the connection keeps flushing after shutdown before giving up on a clean disconnect.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttSettings {
    /// `host:port` or `[v6]:port`.
    pub broker_addr: String,
    pub client_id: String,
    pub topic_prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Also publish every live-view JPEG to `<prefix>/live`.
    pub publish_live: bool,
}

impl MqttSettings {
    pub fn validate(&self) -> Result<()> {
        split_host_port(&self.broker_addr)?;
        if self.client_id.trim().is_empty() {
            bail!("mqtt.client_id must not be empty");
        }
        if self.topic_prefix.trim().is_empty() || self.topic_prefix.contains(['#', '+']) {
            bail!("mqtt.topic_prefix must be a plain topic, got {:?}", self.topic_prefix);
        }
        Ok(())
    }

    pub fn topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.topic_prefix.trim_end_matches('/'), suffix)
    }
}

/// Forwards detection events and motion notifications to an MQTT broker.
///
/// Topics: `<prefix>/detections` (event JSON), `<prefix>/motion` (notification JSON),
/// `<prefix>/live` (raw JPEG, opt-in) and `<prefix>/status` (retained availability, with a
/// last will of `offline`). Everything is QoS 1, fire-and-forget.
pub struct MqttForwarder {
    forward_handle: Option<JoinHandle<()>>,
    connection_handle: Option<JoinHandle<()>>,
}

impl MqttForwarder {
    pub fn start(
        settings: MqttSettings,
        publisher: &EventPublisher,
        shutdown: Shutdown,
    ) -> Result<Self> {
        settings.validate()?;
        let (host, port) = split_host_port(&settings.broker_addr)?;
        let status_topic = settings.topic(AVAILABILITY_TOPIC_SUFFIX);

        let mut options = MqttOptions::new(settings.client_id.clone(), host, port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        if let Some(user) = settings.username.as_deref() {
            options.set_credentials(user, settings.password.clone().unwrap_or_default());
        }
        options.set_last_will(LastWill::new(
            status_topic.clone(),
            PAYLOAD_OFFLINE.as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
            None,
        ));
        let (client, connection) = Client::new(options, 64);

        let detections = publisher.subscribe_detections()?;
        let motion = publisher.subscribe_motion()?;
        let live = if settings.publish_live {
            Some(publisher.subscribe_live()?)
        } else {
            None
        };

        let connection_handle = std::thread::Builder::new()
            .name("zonewatch-mqtt-conn".to_string())
            .spawn({
                let shutdown = shutdown.clone();
                move || drive_connection(connection, shutdown)
            })
            .context("failed to spawn MQTT connection thread")?;

        log::info!(
            "mqtt: forwarding to {} under {}/",
            settings.broker_addr,
            settings.topic_prefix
        );

        let forward_handle = std::thread::Builder::new()
            .name("zonewatch-mqtt".to_string())
            .spawn(move || {
                publish(&client, &status_topic, PAYLOAD_ONLINE.as_bytes().to_vec(), true);
                let detections_topic = settings.topic("detections");
                let motion_topic = settings.topic("motion");
                let live_topic = settings.topic("live");
                let never = crossbeam_channel::never();
                let live_rx = live.as_ref().map(|s| s.receiver()).unwrap_or(&never);
                loop {
                    select! {
                        recv(shutdown.receiver()) -> _ => break,
                        recv(detections.receiver()) -> msg => {
                            let Ok(event) = msg else { break };
                            match event.to_json() {
                                Ok(payload) => publish(&client, &detections_topic, payload, false),
                                Err(e) => log::warn!("mqtt: {:#}", e),
                            }
                        }
                        recv(motion.receiver()) -> msg => {
                            let Ok(notification) = msg else { break };
                            match serde_json::to_vec(&notification) {
                                Ok(payload) => publish(&client, &motion_topic, payload, false),
                                Err(e) => log::warn!("mqtt: failed to encode motion notification: {}", e),
                            }
                        }
                        recv(live_rx) -> msg => {
                            let Ok(frame) = msg else { break };
                            publish(&client, &live_topic, frame.jpeg.as_ref().clone(), false);
                        }
                    }
                }
                publish(&client, &status_topic, PAYLOAD_OFFLINE.as_bytes().to_vec(), true);
                if let Err(e) = client.disconnect() {
                    log::warn!("mqtt: disconnect failed: {}", e);
                }
            })
            .context("failed to spawn MQTT forwarder thread")?;

        Ok(Self {
            forward_handle: Some(forward_handle),
            connection_handle: Some(connection_handle),
        })
    }

    /// Wait for the forwarder threads. Call after triggering shutdown.
    pub fn join(mut self) -> Result<()> {
        for handle in [self.forward_handle.take(), self.connection_handle.take()]
            .into_iter()
            .flatten()
        {
            handle
                .join()
                .map_err(|_| anyhow!("MQTT thread panicked"))?;
        }
        Ok(())
    }
}

fn publish(client: &Client, topic: &str, payload: Vec<u8>, retain: bool) {
    if let Err(e) = client.try_publish(topic, QoS::AtLeastOnce, retain, payload) {
        log::debug!("mqtt: dropped message for {}: {}", topic, e);
    }
}

fn drive_connection(mut connection: Connection, shutdown: Shutdown) {
    let mut drain = ShutdownDrain::new(DISCONNECT_GRACE);
    for event in connection.iter() {
        match event {
            Ok(event) => {
                let disconnect_sent = matches!(event, Event::Outgoing(Outgoing::Disconnect));
                if drain.finished(disconnect_sent, shutdown.is_triggered(), Instant::now()) {
                    break;
                }
            }
            Err(e) => {
                if shutdown.is_triggered() {
                    break;
                }
                log::warn!("MQTT connection error: {}", e);
                if shutdown.wait_timeout(RECONNECT_DELAY) {
                    break;
                }
            }
        }
    }
}

/// Decides when the connection loop may stop once shutdown has been requested.
///
/// It stops as soon as the disconnect packet goes out, or after `grace` of further traffic
/// (a full request queue keeps producing pings but never reaches the disconnect).
struct ShutdownDrain {
    grace: Duration,
    since: Option<Instant>,
}

impl ShutdownDrain {
    fn new(grace: Duration) -> Self {
        Self { grace, since: None }
    }

    fn finished(&mut self, disconnect_sent: bool, shutdown: bool, now: Instant) -> bool {
        if disconnect_sent {
            return true;
        }
        if !shutdown {
            return false;
        }
        let since = *self.since.get_or_insert(now);
        now.saturating_duration_since(since) >= self.grace
    }
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
        let port: u16 = port.parse().context("invalid MQTT port")?;
        return Ok((host.to_string(), port));
    }

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
    if host.is_empty() {
        bail!("missing MQTT host in {}", addr);
    }
    let port: u16 = port.parse().context("invalid MQTT port")?;
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(broker: &str) -> MqttSettings {
        MqttSettings {
            broker_addr: broker.to_string(),
            client_id: "zonewatchd".to_string(),
            topic_prefix: "zonewatch/front".to_string(),
            username: None,
            password: None,
            publish_live: false,
        }
    }

    #[test]
    fn parses_broker_addresses() {
        assert_eq!(
            split_host_port("broker.local:1883").unwrap(),
            ("broker.local".to_string(), 1883)
        );
        assert_eq!(
            split_host_port("[::1]:8883").unwrap(),
            ("::1".to_string(), 8883)
        );
        assert!(split_host_port("broker.local").is_err());
        assert!(split_host_port(":1883").is_err());
    }

    #[test]
    fn topics_hang_off_prefix() {
        let s = settings("127.0.0.1:1883");
        assert_eq!(s.topic("detections"), "zonewatch/front/detections");
        assert!(s.validate().is_ok());
    }

    #[test]
    fn connection_loop_stops_after_disconnect_or_grace() {
        let t0 = Instant::now();
        let grace = Duration::from_secs(2);

        let mut running = ShutdownDrain::new(grace);
        assert!(!running.finished(false, false, t0));
        assert!(!running.finished(false, false, t0 + Duration::from_secs(60)));

        let mut clean = ShutdownDrain::new(grace);
        assert!(!clean.finished(false, true, t0));
        assert!(clean.finished(true, true, t0 + Duration::from_millis(10)));

        let mut stuck = ShutdownDrain::new(grace);
        assert!(!stuck.finished(false, true, t0));
        assert!(!stuck.finished(false, true, t0 + Duration::from_secs(1)));
        assert!(stuck.finished(false, true, t0 + Duration::from_secs(3)));
    }

    #[test]
    fn wildcard_prefix_is_rejected() {
        let mut s = settings("127.0.0.1:1883");
        s.topic_prefix = "zonewatch/#".to_string();
        assert!(s.validate().is_err());
    }
}
