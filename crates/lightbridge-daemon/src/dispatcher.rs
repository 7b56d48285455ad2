//! Bridge dispatcher: the UDP receive loop
//!
//! One socket, one receive loop; every inbound datagram is handled on its
//! own task so a slow connect fan-out never blocks the next receive.
//! Responses go back to the sender's address on the client's listen port.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use lightbridge_core::protocol::{
    build_devices_response, build_stopping_notice, parse_client_message, ClientCommand,
};
use lightbridge_device::DeviceRegistry;
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub struct Dispatcher {
    socket: Arc<UdpSocket>,
    registries: Arc<Vec<Arc<DeviceRegistry>>>,
    reply_port: u16,
}

impl Dispatcher {
    /// Bind the service socket. A bind failure (typically a port conflict
    /// with another bridge instance) is fatal to the process.
    pub async fn bind(
        bind: &str,
        listen_port: u16,
        reply_port: u16,
        registries: Vec<Arc<DeviceRegistry>>,
    ) -> Result<Self> {
        let addr = format!("{bind}:{listen_port}");
        let socket = UdpSocket::bind(&addr)
            .await
            .with_context(|| format!("failed to bind UDP socket on {addr}"))?;
        socket.set_broadcast(true)?;
        info!(address = %addr, "Bridge listening");

        Ok(Self {
            socket: Arc::new(socket),
            registries: Arc::new(registries),
            reply_port,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive loop; runs until the task is dropped at shutdown
    pub async fn run(&self) -> Result<()> {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let (len, peer) = self.socket.recv_from(&mut buf).await?;
            let datagram = buf[..len].to_vec();
            let socket = self.socket.clone();
            let registries = self.registries.clone();
            let reply_port = self.reply_port;
            tokio::spawn(async move {
                handle_datagram(socket, registries, reply_port, peer, datagram).await;
            });
        }
    }

    /// Announce shutdown to clients and release every device
    pub async fn shutdown(&self) {
        let notice = build_stopping_notice();
        for target in [
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V4(Ipv4Addr::BROADCAST),
        ] {
            let addr = SocketAddr::new(target, self.reply_port);
            if let Err(e) = self.socket.send_to(notice.as_bytes(), addr).await {
                debug!(target = %addr, error = %e, "Failed to send stopping notice");
            }
        }

        for registry in self.registries.iter() {
            registry.disconnect_all().await;
        }
        info!("All devices disconnected");
    }
}

async fn handle_datagram(
    socket: Arc<UdpSocket>,
    registries: Arc<Vec<Arc<DeviceRegistry>>>,
    reply_port: u16,
    peer: SocketAddr,
    datagram: Vec<u8>,
) {
    let command = match parse_client_message(&datagram) {
        Ok(command) => command,
        Err(e) => {
            // Broadcast traffic from unrelated software lands here too;
            // nothing to answer.
            debug!(peer = %peer, error = %e, "Ignoring datagram");
            return;
        }
    };

    match command {
        ClientCommand::Devices => {
            let mut tasks = JoinSet::new();
            for registry in registries.iter().cloned() {
                tasks.spawn(async move { registry.connect_all().await });
            }
            let mut announcements = Vec::new();
            while let Some(result) = tasks.join_next().await {
                if let Ok(mut batch) = result {
                    announcements.append(&mut batch);
                }
            }

            debug!(
                peer = %peer,
                devices = announcements.len(),
                "Answering DEVICES query"
            );
            let response = build_devices_response(&announcements);
            let reply_addr = SocketAddr::new(peer.ip(), reply_port);
            if let Err(e) = socket.send_to(response.as_bytes(), reply_addr).await {
                warn!(peer = %reply_addr, error = %e, "Failed to send DEVICES response");
            }
        }
        ClientCommand::SetRgb { identity, frame } => {
            // First identity match wins; identities are unique per registry.
            for registry in registries.iter() {
                if registry.dispatch_frame(&identity, &frame).await {
                    return;
                }
            }
            debug!(identity = %identity, "SETRGB for unknown identity ignored");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lightbridge_core::protocol::{
        build_devices_query, build_setrgb, parse_service_message, ServiceMessage,
    };
    use lightbridge_core::{DeviceIdentity, ProductKind};
    use lightbridge_device::transport::MemoryOpener;
    use lightbridge_device::watch::HardwareInfo;
    use std::time::Duration;

    async fn bridge_with_device(
        opener: Arc<MemoryOpener>,
    ) -> (Dispatcher, Arc<DeviceRegistry>, UdpSocket) {
        let registry = Arc::new(DeviceRegistry::new(ProductKind::Ae5, opener, None));
        registry
            .add(HardwareInfo {
                instance_path: "mem0".to_string(),
                display_name: "Sound BlasterX AE-5".to_string(),
                serial: Some("AE5-001".to_string()),
                parent_instance_id: None,
            })
            .await;

        // The client socket's port doubles as the dispatcher's reply port
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let reply_port = client.local_addr().unwrap().port();

        let dispatcher = Dispatcher::bind("127.0.0.1", 0, reply_port, vec![registry.clone()])
            .await
            .unwrap();
        (dispatcher, registry, client)
    }

    async fn recv_with_timeout(socket: &UdpSocket) -> Vec<u8> {
        let mut buf = vec![0u8; 64 * 1024];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
            .await
            .expect("timed out waiting for datagram")
            .unwrap();
        buf.truncate(len);
        buf
    }

    #[tokio::test]
    async fn test_devices_query_connects_and_lists() {
        let opener = Arc::new(MemoryOpener::new());
        let (dispatcher, _registry, client) = bridge_with_device(opener).await;
        let service_addr = dispatcher.local_addr().unwrap();
        tokio::spawn(async move { dispatcher.run().await });

        client
            .send_to(build_devices_query().as_bytes(), service_addr)
            .await
            .unwrap();

        let response = recv_with_timeout(&client).await;
        match parse_service_message(&response).unwrap() {
            ServiceMessage::Devices(devices) => {
                assert_eq!(devices.len(), 1);
                assert_eq!(devices[0].kind, ProductKind::Ae5);
                assert_eq!(devices[0].identity.as_str(), "AE5-001");
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_connects_are_omitted_from_response() {
        let opener = Arc::new(MemoryOpener::new());
        opener.fail_opens(true);
        let (dispatcher, _registry, client) = bridge_with_device(opener).await;
        let service_addr = dispatcher.local_addr().unwrap();
        tokio::spawn(async move { dispatcher.run().await });

        client
            .send_to(build_devices_query().as_bytes(), service_addr)
            .await
            .unwrap();

        let response = recv_with_timeout(&client).await;
        match parse_service_message(&response).unwrap() {
            ServiceMessage::Devices(devices) => assert!(devices.is_empty()),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_setrgb_routes_frame_to_transport() {
        let opener = Arc::new(MemoryOpener::new());
        let (dispatcher, _registry, client) = bridge_with_device(opener.clone()).await;
        let service_addr = dispatcher.local_addr().unwrap();
        tokio::spawn(async move { dispatcher.run().await });

        // Connect via DEVICES first, as the lighting host does
        client
            .send_to(build_devices_query().as_bytes(), service_addr)
            .await
            .unwrap();
        recv_with_timeout(&client).await;

        let identity = DeviceIdentity::from_serial("AE5-001");
        let frame = vec![0x03, 0x01, 0x02, 0x03];
        client
            .send_to(build_setrgb(&identity, &frame).as_bytes(), service_addr)
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if opener.writes().last() == Some(&frame) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("frame never reached the transport");
    }

    #[tokio::test]
    async fn test_setrgb_for_unknown_identity_is_silent() {
        let opener = Arc::new(MemoryOpener::new());
        let (dispatcher, _registry, client) = bridge_with_device(opener.clone()).await;
        let service_addr = dispatcher.local_addr().unwrap();
        tokio::spawn(async move { dispatcher.run().await });

        let identity = DeviceIdentity::from_serial("X");
        client
            .send_to(build_setrgb(&identity, &[1, 2, 3]).as_bytes(), service_addr)
            .await
            .unwrap();

        // The dispatcher keeps serving afterwards and nothing was written
        client
            .send_to(build_devices_query().as_bytes(), service_addr)
            .await
            .unwrap();
        recv_with_timeout(&client).await;
        assert!(opener.writes().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_datagrams_are_ignored() {
        let opener = Arc::new(MemoryOpener::new());
        let (dispatcher, _registry, client) = bridge_with_device(opener).await;
        let service_addr = dispatcher.local_addr().unwrap();
        tokio::spawn(async move { dispatcher.run().await });

        client
            .send_to(b"M-SEARCH * HTTP/1.1", service_addr)
            .await
            .unwrap();
        client
            .send_to(build_devices_query().as_bytes(), service_addr)
            .await
            .unwrap();

        // Only the real query gets an answer
        let response = recv_with_timeout(&client).await;
        assert!(matches!(
            parse_service_message(&response).unwrap(),
            ServiceMessage::Devices(_)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_sends_stopping_and_disconnects() {
        let opener = Arc::new(MemoryOpener::new());
        let (dispatcher, registry, client) = bridge_with_device(opener).await;
        registry.connect_all().await;

        dispatcher.shutdown().await;

        let notice = recv_with_timeout(&client).await;
        assert_eq!(
            parse_service_message(&notice).unwrap(),
            ServiceMessage::Stopping
        );
        assert!(registry.sessions().await.is_empty());
    }
}
