use anyhow::{Context, Result};
use std::{future::Future, sync::Arc};
use tokio::sync::Semaphore;

/// Lets one direct automation-tool invocation run at a time; the rest queue
/// in arrival order.
#[derive(Clone)]
pub struct ToolGate {
    permit: Arc<Semaphore>,
}

impl ToolGate {
    pub fn new() -> Self {
        Self {
            permit: Arc::new(Semaphore::new(1)),
        }
    }

    pub async fn run<F, T>(&self, invocation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _permit = self
            .permit
            .acquire()
            .await
            .context("tool gate closed")?;
        invocation.await
    }
}

impl Default for ToolGate {
    fn default() -> Self {
        Self::new()
    }
}
