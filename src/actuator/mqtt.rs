use std::sync::{Arc, Mutex};
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    Transport,
};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::MqttConfig;

const REQUEST_CHANNEL_CAPACITY: usize = 10;
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);
const FALLBACK_RECONNECT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Something that can open the gate.
pub trait Actuator {
    /// Sends the open command. `false` means the gate was not triggered.
    fn trigger(&self) -> bool;
}

impl<T: Actuator + ?Sized> Actuator for Arc<T> {
    fn trigger(&self) -> bool {
        (**self).trigger()
    }
}

/// Long-lived broker session used to drive the gate servo.
///
/// Connection state lives in a watch channel written only by the event-loop
/// task spawned from [`ActuatorSession::connect`] and by this type's own
/// methods. The session never reconnects by itself once that task exits.
pub struct ActuatorSession {
    config: MqttConfig,
    state: Arc<watch::Sender<ConnectionState>>,
    client: Mutex<Option<AsyncClient>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl ActuatorSession {
    pub fn new(config: MqttConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            state: Arc::new(state),
            client: Mutex::new(None),
            event_task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.host.clone(),
            self.config.port,
        );
        options.set_keep_alive(self.config.keep_alive());
        options.set_clean_session(true);
        if let (Some(user), Some(password)) = (&self.config.username, &self.config.password) {
            options.set_credentials(user.clone(), password.clone());
        }
        if self.config.tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        options
    }

    /// Opens a session and waits up to the connect timeout for the broker's
    /// acknowledgement. Returns whether the session is connected.
    pub async fn connect(&self) -> bool {
        match self.state() {
            ConnectionState::Connected => return true,
            ConnectionState::Connecting => {
                tracing::debug!("broker connection already in progress");
                return false;
            }
            ConnectionState::Disconnected => {}
        }

        self.stop_event_task();
        self.state.send_replace(ConnectionState::Connecting);

        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            tls = self.config.tls,
            "connecting to broker"
        );

        let mut updates = self.state.subscribe();
        let (client, eventloop) = AsyncClient::new(self.options(), REQUEST_CHANNEL_CAPACITY);
        *self.client.lock().unwrap_or_else(|e| e.into_inner()) = Some(client);

        let handle = tokio::spawn(drive_event_loop(eventloop, Arc::clone(&self.state)));
        *self.event_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        let settled = tokio::time::timeout(
            self.config.connect_timeout(),
            updates.wait_for(|s| *s != ConnectionState::Connecting),
        )
        .await
        .ok()
        .and_then(|r| r.ok().map(|s| *s));

        match settled {
            Some(ConnectionState::Connected) => true,
            Some(_) => {
                self.clear_client();
                false
            }
            None => {
                tracing::warn!(
                    timeout_secs = self.config.connect_timeout_secs,
                    "timed out connecting to broker, continuing without gate control"
                );
                self.stop_event_task();
                self.clear_client();
                self.state.send_replace(ConnectionState::Disconnected);
                false
            }
        }
    }

    /// Sends DISCONNECT and stops the event loop.
    pub async fn disconnect(&self) {
        let client = self.client.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(client) = client {
            if let Err(e) = client.disconnect().await {
                tracing::debug!(error = %e, "broker disconnect request failed");
            }
        }

        let handle = self
            .event_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(DISCONNECT_GRACE, &mut handle)
                .await
                .is_err()
            {
                handle.abort();
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        tracing::info!("broker session closed");
    }

    fn stop_event_task(&self) {
        if let Some(handle) = self
            .event_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }

    fn clear_client(&self) {
        self.client.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

impl Actuator for ActuatorSession {
    fn trigger(&self) -> bool {
        if self.state() != ConnectionState::Connected {
            tracing::warn!("broker not connected, gate will not be triggered");
            return false;
        }

        let guard = self.client.lock().unwrap_or_else(|e| e.into_inner());
        let Some(client) = guard.as_ref() else {
            tracing::warn!("broker client missing, gate will not be triggered");
            return false;
        };

        match client.try_publish(
            self.config.topic.clone(),
            QoS::AtLeastOnce,
            false,
            self.config.command.as_bytes().to_vec(),
        ) {
            Ok(()) => {
                tracing::info!(topic = %self.config.topic, "gate open command published");
                true
            }
            Err(e) => {
                tracing::error!(topic = %self.config.topic, error = %e, "failed to publish gate command");
                false
            }
        }
    }
}

impl Drop for ActuatorSession {
    fn drop(&mut self) {
        self.stop_event_task();
    }
}

async fn drive_event_loop(mut eventloop: EventLoop, state: Arc<watch::Sender<ConnectionState>>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    tracing::info!("connected to broker");
                    state.send_replace(ConnectionState::Connected);
                } else {
                    tracing::error!(code = ?ack.code, "broker refused connection");
                    state.send_replace(ConnectionState::Disconnected);
                    return;
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::warn!("broker closed the session");
                state.send_replace(ConnectionState::Disconnected);
                return;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                state.send_replace(ConnectionState::Disconnected);
                return;
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                tracing::debug!(pkid = ack.pkid, "gate command acknowledged");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "disconnected from broker");
                state.send_replace(ConnectionState::Disconnected);
                return;
            }
        }
    }
}

/// Re-opens the broker session whenever it is found disconnected. A zero
/// interval falls back to the default.
pub fn spawn_supervisor(session: Arc<ActuatorSession>, interval: Duration) -> JoinHandle<()> {
    let interval = if interval.is_zero() {
        tracing::warn!(
            fallback_secs = FALLBACK_RECONNECT_INTERVAL.as_secs(),
            "zero broker reconnect interval"
        );
        FALLBACK_RECONNECT_INTERVAL
    } else {
        interval
    };
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if session.state() == ConnectionState::Disconnected {
                tracing::info!("broker session down, reconnecting");
                session.connect().await;
            }
        }
    })
}
