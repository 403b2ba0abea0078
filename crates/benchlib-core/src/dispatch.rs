//! The command dispatch seam between drivers and sessions.
//!
//! Drivers build command text and hand it to a [`CommandDispatcher`]; the
//! dispatcher owns the transport, serializes access, frames the text and
//! classifies failures. The concrete implementation is
//! `benchlib_scpi::Session`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Sends commands and queries to one instrument connection.
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    /// Send an action command that produces no response.
    async fn command(&self, text: &str) -> Result<()>;

    /// Send a query and return the trimmed response payload.
    async fn query(&self, text: &str) -> Result<String>;

    /// Send a query with a per-call response timeout.
    async fn query_with_timeout(&self, text: &str, timeout: Duration) -> Result<String> {
        let _ = timeout;
        self.query(text).await
    }

    /// Send a query, returning whatever arrived if the link ends early.
    async fn query_allow_incomplete(&self, text: &str) -> Result<String> {
        self.query(text).await
    }
}

#[async_trait]
impl<T: CommandDispatcher + ?Sized> CommandDispatcher for Arc<T> {
    async fn command(&self, text: &str) -> Result<()> {
        (**self).command(text).await
    }

    async fn query(&self, text: &str) -> Result<String> {
        (**self).query(text).await
    }

    async fn query_with_timeout(&self, text: &str, timeout: Duration) -> Result<String> {
        (**self).query_with_timeout(text, timeout).await
    }

    async fn query_allow_incomplete(&self, text: &str) -> Result<String> {
        (**self).query_allow_incomplete(text).await
    }
}
