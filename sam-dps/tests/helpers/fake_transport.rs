//! In-process stand-in for the downstream services

use async_trait::async_trait;
use sam_dps::services::{RpcError, RpcMethod, RpcTransport};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

/// Records every call; methods listed in `failing` are rejected
#[derive(Default)]
pub struct FakeTransport {
    calls: Mutex<Vec<(RpcMethod, Value, Duration)>>,
    failing: Mutex<HashSet<RpcMethod>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(methods: &[RpcMethod]) -> Self {
        let transport = Self::default();
        transport.failing.lock().unwrap().extend(methods.iter().copied());
        transport
    }

    pub fn recover(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn calls(&self) -> Vec<(RpcMethod, Value, Duration)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, method: RpcMethod) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _, _)| *m == method)
            .count()
    }
}

#[async_trait]
impl RpcTransport for FakeTransport {
    async fn invoke(
        &self,
        method: RpcMethod,
        body: &Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        self.calls.lock().unwrap().push((method, body.clone(), timeout));
        if self.failing.lock().unwrap().contains(&method) {
            return Err(RpcError::Unavailable(format!("{} is down", method.name())));
        }
        Ok(Value::Null)
    }
}
