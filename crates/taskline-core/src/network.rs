//! Reachability read model.
//!
//! The tracker only reports; nothing consults it before issuing a request.
//! Stores read it to annotate the errors they record.

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    Online,
    Offline,
}

pub type NetworkTx = broadcast::Sender<NetworkEvent>;
pub type NetworkRx = broadcast::Receiver<NetworkEvent>;

const CAPACITY: usize = 16;

pub fn network_events() -> (NetworkTx, NetworkRx) {
    broadcast::channel(CAPACITY)
}

/// Ambient "are we online right now" check. May block.
pub trait ReachabilityProbe: Send + Sync {
    fn is_online(&self) -> bool;
}

pub struct ReachabilityTracker {
    probe: Arc<dyn ReachabilityProbe>,
    state: watch::Sender<bool>,
}

impl ReachabilityTracker {
    /// Seeds the offline flag from the probe.
    pub fn new(probe: Arc<dyn ReachabilityProbe>) -> Self {
        let offline = !probe.is_online();
        debug!(offline, "reachability seeded");
        let (state, _) = watch::channel(offline);
        Self { probe, state }
    }

    pub fn is_offline(&self) -> bool {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    pub fn handle(&self, event: NetworkEvent) {
        self.set_offline(event == NetworkEvent::Offline);
    }

    /// Re-reads the probe on the blocking pool.
    pub async fn resync(&self) {
        if let Some(online) = probe_online(Arc::clone(&self.probe)).await {
            self.set_offline(!online);
        }
    }

    /// Follows `events` until the sender goes away. The probe is re-read
    /// after attaching and before this returns, so a transition that fired
    /// before `events` existed is still picked up.
    pub async fn listen(self: &Arc<Self>, mut events: NetworkRx) -> JoinHandle<()> {
        self.resync().await;

        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => tracker.handle(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "missed network events; re-reading reachability");
                        tracker.resync().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("network event stream closed");
        })
    }

    fn set_offline(&self, offline: bool) {
        let changed = self.state.send_if_modified(|current| {
            if *current == offline {
                false
            } else {
                *current = offline;
                true
            }
        });
        if changed {
            info!(offline, "reachability changed");
        }
    }
}

/// Considers the network up when a TCP connection to the API host succeeds.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub fn from_base_url(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let url = reqwest::Url::parse(base_url)
            .with_context(|| format!("invalid API base url: {base_url}"))?;
        let host = url
            .host_str()
            .ok_or_else(|| anyhow!("API base url has no host: {base_url}"))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| anyhow!("API base url has no port: {base_url}"))?;
        Ok(Self {
            host,
            port,
            timeout,
        })
    }
}

impl ReachabilityProbe for TcpProbe {
    fn is_online(&self) -> bool {
        let addrs = match (self.host.as_str(), self.port).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(err) => {
                debug!(host = %self.host, error = %err, "cannot resolve API host");
                return false;
            }
        };
        addrs
            .into_iter()
            .any(|addr| TcpStream::connect_timeout(&addr, self.timeout).is_ok())
    }
}

/// `None` when the probe panicked.
async fn probe_online(probe: Arc<dyn ReachabilityProbe>) -> Option<bool> {
    match tokio::task::spawn_blocking(move || probe.is_online()).await {
        Ok(online) => Some(online),
        Err(err) => {
            warn!(error = %err, "reachability probe panicked");
            None
        }
    }
}

/// Polls `probe` every `interval` and emits an event on each transition.
/// Stops once nobody is subscribed to `events`.
pub fn spawn_poller(
    probe: Arc<dyn ReachabilityProbe>,
    interval: Duration,
    events: NetworkTx,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let mut last: Option<bool> = None;
        loop {
            ticker.tick().await;
            let Some(online) = probe_online(Arc::clone(&probe)).await else {
                continue;
            };
            if last == Some(online) {
                continue;
            }
            last = Some(online);
            let event = if online {
                NetworkEvent::Online
            } else {
                NetworkEvent::Offline
            };
            if events.send(event).is_err() {
                debug!("no network listeners left; stopping poller");
                break;
            }
        }
    })
}
