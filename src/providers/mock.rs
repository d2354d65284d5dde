use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::models::{Message, OutputSchema, Tool};
use crate::providers::base::{Provider, Usage};

/// A mock provider that returns pre-configured responses for testing
pub struct MockProvider {
    responses: Arc<Mutex<Vec<Message>>>,
    structured: Arc<Mutex<Vec<Value>>>,
    structured_calls: AtomicUsize,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<Message>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            structured: Arc::new(Mutex::new(Vec::new())),
            structured_calls: AtomicUsize::new(0),
        }
    }

    /// Also script the values returned by structured-output calls
    pub fn with_structured(responses: Vec<Message>, structured: Vec<Value>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            structured: Arc::new(Mutex::new(structured)),
            structured_calls: AtomicUsize::new(0),
        }
    }

    /// How many times the structured-output capability was invoked
    pub fn structured_calls(&self) -> usize {
        self.structured_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(
        &self,
        _system: &str,
        _messages: &[Message],
        _tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            // Return empty response if no more pre-configured responses
            Ok((Message::assistant().with_text(""), Usage::default()))
        } else {
            Ok((responses.remove(0), Usage::default()))
        }
    }

    async fn complete_structured(
        &self,
        _system: &str,
        _messages: &[Message],
        schema: &OutputSchema,
    ) -> Result<Value> {
        self.structured_calls.fetch_add(1, Ordering::SeqCst);
        let mut structured = self.structured.lock().unwrap();
        if structured.is_empty() {
            Err(anyhow!("no scripted structured value for '{}'", schema.name))
        } else {
            Ok(structured.remove(0))
        }
    }
}
