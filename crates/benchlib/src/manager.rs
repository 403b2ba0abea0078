//! Opening transports from resource strings.
//!
//! [`BenchResourceManager`] turns a parsed [`Resource`] into a connected
//! [`Transport`]. Serial ports and LXI sockets are opened directly. GPIB
//! devices are handed out by a [`Controller`] registered per board, USB-TMC
//! interfaces come from a caller-supplied [`UsbBackend`], and anything else
//! is forwarded to an external VISA [`ResourceManager`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use benchlib_core::error::{Error, Result};
use benchlib_core::resource::Resource;
use benchlib_core::transport::Transport;
use benchlib_prologix::Controller;
use benchlib_scpi::{Session, SessionConfig};
use benchlib_transport::{
    ResourceManager, SerialConfig, SerialTransport, TcpTransport, UsbBulkIo, UsbtmcTransport,
    VisaResource,
};

/// Baud rate used when a serial resource string does not name one.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Opens USB-TMC interfaces by vendor id, product id and serial number.
#[async_trait]
pub trait UsbBackend: Send + Sync {
    async fn open(
        &self,
        vendor_id: u16,
        product_id: u16,
        serial_number: &str,
        interface: Option<u8>,
    ) -> Result<Box<dyn UsbBulkIo>>;
}

/// Resource manager for every bus benchlib can reach.
///
/// ```no_run
/// use benchlib::BenchResourceManager;
///
/// # async fn example() -> benchlib::Result<()> {
/// let manager = BenchResourceManager::new();
/// let session = manager
///     .open_session("TCPIP0::192.168.1.100::5025::SOCKET", Default::default())
///     .await?;
/// println!("{}", session.query("*IDN?").await?);
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct BenchResourceManager {
    gpib: HashMap<u32, Controller>,
    usb: Option<Arc<dyn UsbBackend>>,
    visa: Option<Arc<dyn ResourceManager>>,
}

impl BenchResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reach `GPIB<board>` resources through `controller`.
    pub fn with_gpib_controller(mut self, board: u32, controller: Controller) -> Self {
        self.gpib.insert(board, controller);
        self
    }

    /// Open `USB` resources through `backend`.
    pub fn with_usb_backend(mut self, backend: Arc<dyn UsbBackend>) -> Self {
        self.usb = Some(backend);
        self
    }

    /// Forward VISA-only locators to `manager`.
    pub fn with_visa(mut self, manager: Arc<dyn ResourceManager>) -> Self {
        self.visa = Some(manager);
        self
    }

    /// Parse `resource` and open it.
    pub async fn open_str(&self, resource: &str) -> Result<Box<dyn Transport>> {
        let resource: Resource = resource.parse()?;
        self.open_resource(&resource).await
    }

    /// Parse `resource`, open it and wrap it in a [`Session`].
    pub async fn open_session(&self, resource: &str, config: SessionConfig) -> Result<Session> {
        let transport = self.open_str(resource).await?;
        Ok(Session::new(transport, config))
    }

    /// Open an already parsed resource.
    pub async fn open_resource(&self, resource: &Resource) -> Result<Box<dyn Transport>> {
        debug!(bus = resource.bus(), resource = %resource, "opening resource");
        let transport: Box<dyn Transport> = match resource {
            Resource::Serial {
                port,
                baud,
                framing,
                ..
            } => {
                let baud = baud.unwrap_or(DEFAULT_BAUD_RATE);
                let config = SerialConfig::from_framing(baud, framing.unwrap_or_default())?;
                Box::new(SerialTransport::open_with_config(port, config).await?)
            }
            Resource::Tcp { host, port, .. } => Box::new(TcpTransport::connect(host, *port).await?),
            Resource::Gpib {
                board,
                address,
                secondary,
            } => {
                let controller = self.gpib.get(board).ok_or_else(|| {
                    Error::Connection(format!("no GPIB controller registered for board {board}"))
                })?;
                Box::new(controller.device_at(*address, *secondary)?)
            }
            Resource::Usb {
                vendor_id,
                product_id,
                serial_number,
                interface,
                ..
            } => {
                let backend = self
                    .usb
                    .as_ref()
                    .ok_or_else(|| Error::Connection("no USB backend configured".into()))?;
                let io = backend
                    .open(*vendor_id, *product_id, serial_number, *interface)
                    .await?;
                Box::new(UsbtmcTransport::new(
                    io,
                    *vendor_id,
                    *product_id,
                    serial_number.clone(),
                ))
            }
            Resource::Visa { locator } => {
                let manager = self.visa.as_ref().ok_or_else(|| {
                    Error::Connection(format!("no VISA resource manager for {locator}"))
                })?;
                Box::new(VisaResource::open(manager.as_ref(), resource).await?)
            }
        };
        info!(resource = %resource, "resource opened");
        Ok(transport)
    }
}

#[async_trait]
impl ResourceManager for BenchResourceManager {
    async fn open(&self, resource: &Resource) -> Result<Box<dyn Transport>> {
        self.open_resource(resource).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchlib_prologix::ControllerConfig;
    use benchlib_test_harness::{MockTcpServer, MockTransport, ScpiSimulator};
    use std::sync::Mutex;

    struct SimVisa {
        sim: ScpiSimulator,
        opened: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ResourceManager for SimVisa {
        async fn open(&self, resource: &Resource) -> Result<Box<dyn Transport>> {
            self.opened
                .lock()
                .unwrap()
                .push(resource.to_string());
            Ok(Box::new(self.sim.transport()))
        }
    }

    #[tokio::test]
    async fn socket_resource() {
        let mut server = MockTcpServer::new().await.unwrap();
        server.expect(b"*IDN?\n", b"KIKUSUI,PMX18-5A,AB000001,1.0\n");
        let resource = format!("TCPIP0::127.0.0.1::{}::SOCKET", server.port());
        server.start();

        let manager = BenchResourceManager::new();
        let session = manager
            .open_session(&resource, SessionConfig::default())
            .await
            .unwrap();
        assert_eq!(
            session.query("*IDN?").await.unwrap(),
            "KIKUSUI,PMX18-5A,AB000001,1.0"
        );
        server.wait().await.unwrap();
    }

    #[tokio::test]
    async fn gpib_resource_uses_registered_controller() {
        let mut mock = MockTransport::new();
        let log = mock.wire_log();
        for directive in [
            "++mode 1",
            "++auto 0",
            "++eoi 1",
            "++eos 2",
            "++read_tmo_ms 500",
            "++addr 5",
        ] {
            mock.expect_send(format!("{directive}\n").as_bytes());
        }
        mock.expect_send(b"OUTP OFF\n");
        let gpib = Controller::new(Box::new(mock), ControllerConfig::default())
            .await
            .unwrap();

        let manager = BenchResourceManager::new().with_gpib_controller(0, gpib);
        let mut psu = manager.open_str("GPIB0::5::INSTR").await.unwrap();
        psu.send(b"OUTP OFF\n").await.unwrap();
        assert_eq!(log.count_starting_with("++addr"), 1);

        let err = manager.open_str("GPIB1::5::INSTR").await.err().unwrap();
        assert_eq!(err.kind(), benchlib_core::ErrorKind::Connection);
    }

    #[tokio::test]
    async fn visa_locators_are_delegated() {
        let visa = Arc::new(SimVisa {
            sim: ScpiSimulator::new("Agilent Technologies,33220A,MY44012345,2.02-2.02-22-2"),
            opened: Mutex::new(Vec::new()),
        });
        let manager = BenchResourceManager::new().with_visa(visa.clone());
        let session = manager
            .open_session("TCPIP0::10.0.0.5::inst0::INSTR", SessionConfig::default())
            .await
            .unwrap();
        assert!(session.query("*IDN?").await.unwrap().contains("33220A"));
        assert_eq!(visa.opened.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_backends_and_bad_strings() {
        let manager = BenchResourceManager::new();
        let err = manager
            .open_str("USB0::0x0957::0x0407::MY44035849::INSTR")
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), benchlib_core::ErrorKind::Connection);

        let err = manager.open_str("GPIB0::31::INSTR").await.err().unwrap();
        assert_eq!(err.kind(), benchlib_core::ErrorKind::InvalidResource);

        let err = manager.open_str("not a resource").await.err().unwrap();
        assert_eq!(err.kind(), benchlib_core::ErrorKind::InvalidResource);
    }
}
