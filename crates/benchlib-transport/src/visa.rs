//! Delegation to an external VISA resource layer.
//!
//! benchlib does not link a VISA library. Instead a caller supplies a
//! [`ResourceManager`] that knows how to open locators the core does not
//! drive directly (VXI-11, HiSLIP, PXI), and [`VisaResource`] forwards every
//! transport operation to what it returns.

use async_trait::async_trait;
use std::time::Duration;

use benchlib_core::error::Result;
use benchlib_core::resource::Resource;
use benchlib_core::transport::Transport;

/// Opens a transport for a parsed resource string.
#[async_trait]
pub trait ResourceManager: Send + Sync {
    async fn open(&self, resource: &Resource) -> Result<Box<dyn Transport>>;
}

/// A transport obtained from a [`ResourceManager`].
pub struct VisaResource {
    inner: Box<dyn Transport>,
    resource: String,
}

impl VisaResource {
    /// Ask `manager` to open `resource`.
    pub async fn open(manager: &dyn ResourceManager, resource: &Resource) -> Result<Self> {
        let inner = manager.open(resource).await?;
        tracing::info!(resource = %resource, "VISA resource opened");
        Ok(VisaResource {
            inner,
            resource: resource.to_string(),
        })
    }

    /// The resource string, for diagnostics.
    pub fn resource(&self) -> &str {
        &self.resource
    }
}

#[async_trait]
impl Transport for VisaResource {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.inner.send(data).await
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.inner.receive(buf, timeout).await
    }

    async fn close(&mut self) -> Result<()> {
        tracing::debug!(resource = %self.resource, "closing VISA resource");
        self.inner.close().await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn read_after_write(&self) -> bool {
        self.inner.read_after_write()
    }

    async fn device_clear(&mut self) -> Result<()> {
        self.inner.device_clear().await
    }

    async fn go_to_local(&mut self) -> Result<()> {
        self.inner.go_to_local().await
    }

    async fn local_lockout(&mut self) -> Result<()> {
        self.inner.local_lockout().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchlib_core::error::Error;
    use benchlib_test_harness::MockTransport;

    struct OneShot;

    #[async_trait]
    impl ResourceManager for OneShot {
        async fn open(&self, resource: &Resource) -> Result<Box<dyn Transport>> {
            match resource {
                Resource::Visa { .. } => {
                    let mut mock = MockTransport::new();
                    mock.expect(b"*IDN?\n", b"ACME,VXI,1,1\n");
                    mock.set_read_after_write(true);
                    Ok(Box::new(mock))
                }
                other => Err(Error::Connection(format!("cannot open {other}"))),
            }
        }
    }

    #[tokio::test]
    async fn forwards_to_managed_transport() {
        let resource: Resource = "TCPIP0::10.0.0.5::inst0::INSTR".parse().unwrap();
        let mut t = VisaResource::open(&OneShot, &resource).await.unwrap();
        assert_eq!(t.resource(), "TCPIP0::10.0.0.5::inst0::INSTR");
        assert!(t.read_after_write());

        t.send(b"*IDN?\n").await.unwrap();
        let mut buf = [0u8; 32];
        let n = t.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], b"ACME,VXI,1,1\n");
        assert!(t.device_clear().await.unwrap_err().is_not_supported());

        t.close().await.unwrap();
        assert!(!t.is_connected());
    }

    #[tokio::test]
    async fn manager_errors_propagate() {
        let resource: Resource = "GPIB0::5::INSTR".parse().unwrap();
        let result = VisaResource::open(&OneShot, &resource).await;
        assert!(matches!(result, Err(Error::Connection(_))));
    }
}
