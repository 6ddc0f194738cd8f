// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{SendOutcome, SmsProvider};

/// A recorded send attempt, for assertions.
#[derive(Debug, Clone)]
pub struct RecordedSend {
    pub to: String,
    pub body: String,
    pub from: String,
}

/// Pre-scripted provider for tests. Each `send` pops the next outcome
/// from the front of the queue; when the queue runs dry every further
/// send is accepted with a generated message id. All sends are recorded.
pub struct ScriptedSmsProvider {
    name: String,
    enabled: bool,
    scripts: Mutex<Vec<SendOutcome>>,
    sends: Mutex<Vec<RecordedSend>>,
    counter: Mutex<u64>,
}

impl ScriptedSmsProvider {
    pub fn new(name: &str, scripts: Vec<SendOutcome>) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            scripts: Mutex::new(scripts),
            sends: Mutex::new(Vec::new()),
            counter: Mutex::new(0),
        }
    }

    /// A provider that accepts everything.
    pub fn accepting(name: &str) -> Self {
        Self::new(name, Vec::new())
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Everything sent through this provider, in order.
    pub fn sent(&self) -> Vec<RecordedSend> {
        self.sends.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sends.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl SmsProvider for ScriptedSmsProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn send(&self, to: &str, body: &str, from: &str) -> SendOutcome {
        self.sends
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedSend {
                to: to.to_string(),
                body: body.to_string(),
                from: from.to_string(),
            });

        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        if scripts.is_empty() {
            let mut counter = self.counter.lock().unwrap_or_else(|e| e.into_inner());
            *counter += 1;
            SendOutcome::accepted(&self.name, format!("{}-msg-{}", self.name, counter))
        } else {
            scripts.remove(0)
        }
    }
}
