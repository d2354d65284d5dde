use anyhow::Result;
use async_stream::try_stream;
use futures::future::join_all;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::conversation::Conversation;
use crate::errors::{AgentError, AgentResult};
use crate::graph::{Edge, Graph, GraphBuilder, Step, END};
use crate::models::{Message, MessageContent, OutputSchema, Role, ToolRequest, ToolResponse};
use crate::providers::base::Provider;
use crate::registry::ToolRegistry;

/// Fixed reply sent back to the model when it names an unregistered tool.
pub const TOOL_NOT_FOUND: &str = "Tool not found, please try again";

/// Cooperative cancellation flag, checked between state transitions only —
/// never mid-tool-call, so tool results stay correlated.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// What to do when the extracted structured output fails schema validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractionPolicy {
    /// Validation failure is fatal for the run
    #[default]
    Strict,
    /// Log and fall back to the raw model output as plain text
    Degrade,
}

/// Terminal result of one run.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutcome {
    /// The final assistant message, verbatim
    Message(Message),
    /// The schema-conformant structured value
    Structured(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentReply {
    pub conversation: Conversation,
    pub outcome: AgentOutcome,
}

enum AgentEvent {
    Message(Message),
    Outcome(AgentOutcome),
}

/// Decide whether the latest model turn requested further action. Pure
/// function of the last message only, and idempotent. Calling it on an
/// empty conversation or after a non-assistant message is a programming
/// error, not a runtime condition.
pub fn should_act(conversation: &Conversation) -> AgentResult<bool> {
    let last = conversation.last().ok_or_else(|| {
        AgentError::Precondition("termination policy evaluated on an empty conversation".into())
    })?;
    if last.role != Role::Assistant {
        return Err(AgentError::Precondition(format!(
            "termination policy evaluated after a {} message",
            last.role
        )));
    }
    Ok(!last.tool_requests().is_empty())
}

fn render_tool_output(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// The agent engine: a compiled state machine that drives a model through
/// invoke/act cycles until the model stops requesting tools, optionally
/// finishing with a structured-extraction step.
pub struct Agent {
    name: String,
    provider: Arc<dyn Provider>,
    system: String,
    registry: Arc<ToolRegistry>,
    output_schema: Option<OutputSchema>,
    extraction_policy: ExtractionPolicy,
    max_turns: Option<usize>,
    cancel: Option<CancelToken>,
    graph: Graph,
}

impl Agent {
    pub fn builder(provider: Arc<dyn Provider>) -> AgentBuilder {
        AgentBuilder::new(provider)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Incremental-stream mode: yields every message the run appends, in
    /// order, handing control back to the caller at each yield point. The
    /// sequence is finite and not restartable; a fatal error is surfaced as
    /// a terminal Err item.
    pub fn reply(&self, messages: &[Message]) -> BoxStream<'_, Result<Message>> {
        let events = self.events(messages.to_vec());
        Box::pin(events.try_filter_map(|event| async move {
            Ok(match event {
                AgentEvent::Message(message) => Some(message),
                AgentEvent::Outcome(_) => None,
            })
        }))
    }

    /// Run-to-completion mode: drives the state machine to its terminal
    /// state and returns the final conversation and outcome. The first
    /// fatal error aborts the run and discards partial state.
    pub async fn run(&self, messages: &[Message]) -> Result<AgentReply> {
        let mut conversation = Conversation::from_messages(messages);
        let mut outcome = None;

        let mut events = self.events(messages.to_vec());
        while let Some(event) = events.next().await {
            match event? {
                AgentEvent::Message(message) => conversation.push(message),
                AgentEvent::Outcome(result) => outcome = Some(result),
            }
        }
        drop(events);

        let outcome = outcome.ok_or_else(|| {
            AgentError::Internal("run ended without reaching a terminal state".into())
        })?;
        Ok(AgentReply {
            conversation,
            outcome,
        })
    }

    /// Checkpointed run: load prior history for the thread, run with the new
    /// message appended, persist the resulting conversation.
    pub async fn resume(
        &self,
        store: &dyn crate::checkpoint::CheckpointStore,
        thread_id: &str,
        message: Message,
    ) -> Result<AgentReply> {
        let mut messages = store.load(thread_id).await?.unwrap_or_default();
        messages.push(message);
        let reply = self.run(&messages).await?;
        store.persist(thread_id, reply.conversation.messages()).await?;
        Ok(reply)
    }

    /// Walk the compiled graph, yielding one event per state transition.
    fn events(&self, initial: Vec<Message>) -> BoxStream<'_, Result<AgentEvent>> {
        Box::pin(try_stream! {
            let mut conversation = Conversation::from(initial);
            let mut node = self.graph.entry().to_string();
            let mut turns = 0usize;
            let mut outcome: Option<AgentOutcome> = None;

            loop {
                if let Some(token) = &self.cancel {
                    if token.is_cancelled() {
                        Err(AgentError::Cancelled)?;
                    }
                }

                let step = self.graph.step(&node).ok_or_else(|| {
                    AgentError::GraphConfig(format!("no node named '{}'", node))
                })?;

                match step {
                    Step::Model => {
                        turns += 1;
                        if let Some(max) = self.max_turns {
                            if turns > max {
                                Err(AgentError::TurnLimitExceeded(max))?;
                            }
                        }
                        debug!(agent = %self.name, turn = turns, "invoking model");
                        let message = self.call_model(&conversation).await?;
                        conversation.push(message.clone());
                        yield AgentEvent::Message(message);
                    }
                    Step::Tools => {
                        let last = conversation.last().cloned().ok_or_else(|| {
                            AgentError::Precondition(
                                "action step reached on an empty conversation".into(),
                            )
                        })?;
                        let batch = self.act(&last).await;
                        conversation.push(batch.clone());
                        yield AgentEvent::Message(batch);
                    }
                    Step::Extract => {
                        let (message, value) = self.extract(&conversation).await?;
                        conversation.push(message.clone());
                        if let Some(value) = value {
                            outcome = Some(AgentOutcome::Structured(value));
                        }
                        yield AgentEvent::Message(message);
                    }
                    Step::Delegate(delegate) => {
                        debug!(agent = %self.name, delegate = %delegate.name(), "running delegate");
                        let reply = delegate.run(conversation.messages()).await?;
                        let message = match reply.outcome {
                            AgentOutcome::Message(message) => message,
                            AgentOutcome::Structured(value) => {
                                Message::assistant().with_text(value.to_string())
                            }
                        };
                        conversation.push(message.clone());
                        yield AgentEvent::Message(message);
                    }
                }

                let edge = self.graph.edge(&node).ok_or_else(|| {
                    AgentError::GraphConfig(format!("node '{}' has no outgoing edge", node))
                })?;
                let next = match edge {
                    Edge::Direct(target) => target.clone(),
                    Edge::Conditional { when_act, otherwise } => {
                        if should_act(&conversation)? {
                            when_act.clone()
                        } else {
                            otherwise.clone()
                        }
                    }
                };
                debug!(agent = %self.name, from = %node, to = %next, "transition");

                if next == END {
                    let terminal = match outcome.take() {
                        Some(result) => result,
                        None => AgentOutcome::Message(conversation.last().cloned().ok_or_else(
                            || {
                                AgentError::Precondition(
                                    "run terminated on an empty conversation".into(),
                                )
                            },
                        )?),
                    };
                    yield AgentEvent::Outcome(terminal);
                    break;
                }
                node = next;
            }
        })
    }

    async fn call_model(&self, conversation: &Conversation) -> Result<Message> {
        let tools = self.registry.descriptors();
        let (message, usage) = self
            .provider
            .complete(&self.system, conversation.messages(), &tools)
            .await?;
        debug!(
            agent = %self.name,
            input_tokens = ?usage.input_tokens,
            output_tokens = ?usage.output_tokens,
            "model responded"
        );
        Ok(message)
    }

    /// Execute one tool call. Every failure mode degrades to a tool-result
    /// the model can read on the next turn; nothing here aborts the run.
    async fn dispatch_tool_call(&self, request: &ToolRequest) -> ToolResponse {
        let content = match &request.tool_call {
            Err(e) => {
                warn!(agent = %self.name, id = %request.id, "malformed tool request");
                format!("Invalid tool request: {}", e)
            }
            Ok(call) => match self.registry.get(&call.name) {
                None => {
                    error!(agent = %self.name, tool = %call.name, "tool not found");
                    TOOL_NOT_FOUND.to_string()
                }
                Some(tool) => match tool.invoke(call.arguments.clone()).await {
                    Ok(value) => render_tool_output(&value),
                    Err(e) => {
                        warn!(agent = %self.name, tool = %call.name, error = %e, "tool failed");
                        format!("Tool execution failed: {}", e)
                    }
                },
            },
        };
        ToolResponse {
            id: request.id.clone(),
            content,
        }
    }

    /// Dispatch every tool call of the latest assistant message concurrently
    /// and collect the results into one batch message whose order matches
    /// request order.
    async fn act(&self, message: &Message) -> Message {
        let requests = message.tool_requests();
        let futures: Vec<_> = requests
            .iter()
            .map(|request| self.dispatch_tool_call(request))
            .collect();
        let responses = join_all(futures).await;

        let mut batch = Message::tool();
        for response in responses {
            batch = batch.with_content(MessageContent::ToolResponse(response));
        }
        batch
    }

    async fn extract(&self, conversation: &Conversation) -> Result<(Message, Option<Value>)> {
        let schema = self.output_schema.as_ref().ok_or_else(|| {
            AgentError::GraphConfig("extract node reached without an output schema".into())
        })?;
        let value = self
            .provider
            .complete_structured(&self.system, conversation.messages(), schema)
            .await?;

        match schema.conforms(&value) {
            Ok(()) => {
                let message = Message::assistant().with_text(value.to_string());
                Ok((message, Some(value)))
            }
            Err(e) => match self.extraction_policy {
                ExtractionPolicy::Strict => Err(e.into()),
                ExtractionPolicy::Degrade => {
                    warn!(agent = %self.name, error = %e, "structured output rejected, degrading to text");
                    Ok((Message::assistant().with_text(value.to_string()), None))
                }
            },
        }
    }
}

/// Builds an agent and compiles its state machine. The default graph is
/// model -> (tools | extract | end), tools -> model, extract -> end.
pub struct AgentBuilder {
    name: String,
    provider: Arc<dyn Provider>,
    system: String,
    registry: ToolRegistry,
    output_schema: Option<OutputSchema>,
    extraction_policy: ExtractionPolicy,
    max_turns: Option<usize>,
    cancel: Option<CancelToken>,
    graph: Option<Graph>,
}

impl AgentBuilder {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        AgentBuilder {
            name: "agent".to_string(),
            provider,
            system: String::new(),
            registry: ToolRegistry::new(),
            output_schema: None,
            extraction_policy: ExtractionPolicy::default(),
            max_turns: None,
            cancel: None,
            graph: None,
        }
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn system<S: Into<String>>(mut self, system: S) -> Self {
        self.system = system.into();
        self
    }

    pub fn registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn output_schema(mut self, schema: OutputSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn extraction_policy(mut self, policy: ExtractionPolicy) -> Self {
        self.extraction_policy = policy;
        self
    }

    /// Safety guard on the otherwise unbounded invoke/act loop
    pub fn max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Replace the default state machine with a custom compiled graph, e.g.
    /// to embed delegate agents.
    pub fn graph(mut self, graph: Graph) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn build(self) -> AgentResult<Agent> {
        let graph = match self.graph {
            Some(graph) => graph,
            None => {
                let builder = GraphBuilder::new()
                    .add_node("model", Step::Model)
                    .add_node("tools", Step::Tools)
                    .set_entry("model")
                    .add_edge("tools", "model");
                if self.output_schema.is_some() {
                    builder
                        .add_node("extract", Step::Extract)
                        .add_conditional_edges("model", "tools", "extract")
                        .add_edge("extract", END)
                        .compile()?
                } else {
                    builder
                        .add_conditional_edges("model", "tools", END)
                        .compile()?
                }
            }
        };

        Ok(Agent {
            name: self.name,
            provider: self.provider,
            system: self.system,
            registry: Arc::new(self.registry),
            output_schema: self.output_schema,
            extraction_policy: self.extraction_policy,
            max_turns: self.max_turns,
            cancel: self.cancel,
            graph,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator;
    use crate::models::ToolCall;
    use crate::providers::mock::MockProvider;
    use serde_json::json;

    fn agent_with(provider: MockProvider) -> Agent {
        Agent::builder(Arc::new(provider))
            .registry(calculator::registry().unwrap())
            .build()
            .unwrap()
    }

    fn collect(reply: AgentReply) -> Vec<Message> {
        reply.conversation.into_messages()
    }

    #[tokio::test]
    async fn test_simple_response_terminates_in_one_turn() {
        let response = Message::assistant().with_text("Hello!");
        let agent = agent_with(MockProvider::new(vec![response.clone()]));

        let reply = agent.run(&[Message::user().with_text("Hi")]).await.unwrap();

        assert_eq!(reply.conversation.len(), 2);
        assert_eq!(reply.outcome, AgentOutcome::Message(response));
    }

    #[tokio::test]
    async fn test_streaming_yields_each_message() {
        let response = Message::assistant().with_text("Hello!");
        let agent = agent_with(MockProvider::new(vec![response.clone()]));

        let mut stream = agent.reply(&[Message::user().with_text("Hi")]);
        let mut messages = Vec::new();
        while let Some(message) = stream.try_next().await.unwrap() {
            messages.push(message);
        }

        assert_eq!(messages, vec![response]);
    }

    #[tokio::test]
    async fn test_tool_calls_dispatched_in_request_order() {
        let agent = agent_with(MockProvider::new(vec![
            Message::assistant()
                .with_tool_request("1", Ok(ToolCall::new("add", json!({"a": 2, "b": 3}))))
                .with_tool_request("2", Ok(ToolCall::new("mul", json!({"a": 4, "b": 5})))),
            Message::assistant().with_text("All done!"),
        ]));

        let reply = agent
            .run(&[Message::user().with_text("2+3 and 4*5")])
            .await
            .unwrap();
        let messages = collect(reply);

        // user, assistant requests, tool batch, final assistant text
        assert_eq!(messages.len(), 4);
        let responses = messages[2].tool_responses();
        assert_eq!(responses.len(), 2);
        assert_eq!((responses[0].id.as_str(), responses[0].content.as_str()), ("1", "5"));
        assert_eq!((responses[1].id.as_str(), responses[1].content.as_str()), ("2", "20"));
        assert_eq!(messages[3].text(), "All done!");
    }

    #[tokio::test]
    async fn test_unknown_tool_yields_sentinel_and_run_continues() {
        let agent = agent_with(MockProvider::new(vec![
            Message::assistant().with_tool_request("1", Ok(ToolCall::new("foo", json!({})))),
            Message::assistant().with_text("Error occurred"),
        ]));

        let reply = agent.run(&[Message::user().with_text("Hi")]).await.unwrap();
        let messages = collect(reply);

        assert_eq!(messages.len(), 4);
        let responses = messages[2].tool_responses();
        assert_eq!(responses[0].content, TOOL_NOT_FOUND);
        assert_eq!(messages[3].text(), "Error occurred");
    }

    #[tokio::test]
    async fn test_handler_failure_degrades_to_tool_result() {
        let agent = agent_with(MockProvider::new(vec![
            Message::assistant()
                .with_tool_request("1", Ok(ToolCall::new("div", json!({"a": 1, "b": 0})))),
            Message::assistant().with_text("Understood"),
        ]));

        let reply = agent.run(&[Message::user().with_text("1/0?")]).await.unwrap();
        let messages = collect(reply);

        let responses = messages[2].tool_responses();
        assert!(responses[0].content.starts_with("Tool execution failed"));
        assert_eq!(messages[3].text(), "Understood");
    }

    #[tokio::test]
    async fn test_malformed_tool_request_is_answered() {
        let agent = agent_with(MockProvider::new(vec![
            Message::assistant().with_tool_request(
                "1",
                Err(AgentError::InvalidParameters("bad json".to_string())),
            ),
            Message::assistant().with_text("Retrying"),
        ]));

        let reply = agent.run(&[Message::user().with_text("Hi")]).await.unwrap();
        let messages = collect(reply);

        let responses = messages[2].tool_responses();
        assert!(responses[0].content.starts_with("Invalid tool request"));
    }

    #[tokio::test]
    async fn test_appends_are_monotonic_across_transitions() {
        let agent = agent_with(MockProvider::new(vec![
            Message::assistant()
                .with_tool_request("1", Ok(ToolCall::new("add", json!({"a": 1, "b": 1})))),
            Message::assistant().with_text("done"),
        ]));

        let initial = vec![Message::user().with_text("Hi")];
        let mut stream = agent.reply(&initial);
        let mut length = initial.len();
        while let Some(message) = stream.try_next().await.unwrap() {
            // each transition appends exactly one message
            length += 1;
            let _ = message;
        }
        assert_eq!(length, 4);
    }

    #[test]
    fn test_should_act_is_idempotent() {
        let mut conversation = Conversation::new();
        conversation.push(Message::user().with_text("Hi"));
        conversation.push(
            Message::assistant().with_tool_request("1", Ok(ToolCall::new("add", json!({})))),
        );

        assert!(should_act(&conversation).unwrap());
        assert!(should_act(&conversation).unwrap());
    }

    #[test]
    fn test_should_act_preconditions() {
        let empty = Conversation::new();
        assert!(matches!(
            should_act(&empty),
            Err(AgentError::Precondition(_))
        ));

        let mut conversation = Conversation::new();
        conversation.push(Message::user().with_text("Hi"));
        assert!(matches!(
            should_act(&conversation),
            Err(AgentError::Precondition(_))
        ));
    }

    #[tokio::test]
    async fn test_structured_extraction_runs_once() {
        let provider = Arc::new(MockProvider::with_structured(
            vec![Message::assistant().with_text("The weather is mild.")],
            vec![json!({"city": "Abidjan", "temperature": 29.5})],
        ));
        let schema = OutputSchema::new(
            "prediction",
            json!({
                "type": "object",
                "required": ["city", "temperature"],
                "properties": {
                    "city": {"type": "string"},
                    "temperature": {"type": "number"}
                }
            }),
        );
        let agent = Agent::builder(provider.clone())
            .output_schema(schema)
            .build()
            .unwrap();

        let reply = agent
            .run(&[Message::user().with_text("Weather in Abidjan?")])
            .await
            .unwrap();

        assert_eq!(provider.structured_calls(), 1);
        assert_eq!(
            reply.outcome,
            AgentOutcome::Structured(json!({"city": "Abidjan", "temperature": 29.5}))
        );
        // the serialized value is also appended as the terminal message
        let last = reply.conversation.last().unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&last.text()).unwrap()["city"],
            "Abidjan"
        );
    }

    #[tokio::test]
    async fn test_extraction_strict_rejects_nonconforming_value() {
        let provider = Arc::new(MockProvider::with_structured(
            vec![Message::assistant().with_text("ok")],
            vec![json!({"city": "Abidjan"})],
        ));
        let schema = OutputSchema::new(
            "prediction",
            json!({"type": "object", "required": ["city", "temperature"]}),
        );
        let agent = Agent::builder(provider)
            .output_schema(schema)
            .build()
            .unwrap();

        let err = agent
            .run(&[Message::user().with_text("Weather?")])
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AgentError>(),
            Some(AgentError::SchemaValidation(_))
        ));
    }

    #[tokio::test]
    async fn test_extraction_degrade_falls_back_to_text() {
        let provider = Arc::new(MockProvider::with_structured(
            vec![Message::assistant().with_text("ok")],
            vec![json!({"city": "Abidjan"})],
        ));
        let schema = OutputSchema::new(
            "prediction",
            json!({"type": "object", "required": ["city", "temperature"]}),
        );
        let agent = Agent::builder(provider)
            .output_schema(schema)
            .extraction_policy(ExtractionPolicy::Degrade)
            .build()
            .unwrap();

        let reply = agent
            .run(&[Message::user().with_text("Weather?")])
            .await
            .unwrap();
        match reply.outcome {
            AgentOutcome::Message(message) => {
                assert!(message.text().contains("Abidjan"));
            }
            AgentOutcome::Structured(_) => panic!("expected degraded text outcome"),
        }
    }

    #[tokio::test]
    async fn test_turn_limit_guard() {
        // the model keeps asking for tools; the guard has to cut the loop
        let looping = (0..10)
            .map(|i| {
                Message::assistant().with_tool_request(
                    i.to_string(),
                    Ok(ToolCall::new("add", json!({"a": 1, "b": 1}))),
                )
            })
            .collect();
        let agent = Agent::builder(Arc::new(MockProvider::new(looping)))
            .registry(calculator::registry().unwrap())
            .max_turns(2)
            .build()
            .unwrap();

        let err = agent
            .run(&[Message::user().with_text("loop forever")])
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AgentError>(),
            Some(AgentError::TurnLimitExceeded(2))
        ));
    }

    #[tokio::test]
    async fn test_cancel_token_stops_the_run() {
        let token = CancelToken::new();
        token.cancel();
        let agent = Agent::builder(Arc::new(MockProvider::new(vec![
            Message::assistant().with_text("never seen"),
        ])))
        .cancel_token(token)
        .build()
        .unwrap();

        let err = agent
            .run(&[Message::user().with_text("Hi")])
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AgentError>(),
            Some(AgentError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_delegate_node_runs_embedded_agent() {
        let inner = Agent::builder(Arc::new(MockProvider::new(vec![
            Message::assistant().with_text("delegate answer"),
        ])))
        .name("helper")
        .build()
        .unwrap();

        let graph = GraphBuilder::new()
            .add_node("helper", Step::Delegate(Arc::new(inner)))
            .set_entry("helper")
            .add_edge("helper", END)
            .compile()
            .unwrap();

        let outer = Agent::builder(Arc::new(MockProvider::new(vec![])))
            .name("router")
            .graph(graph)
            .build()
            .unwrap();

        let reply = outer
            .run(&[Message::user().with_text("Hi")])
            .await
            .unwrap();
        match reply.outcome {
            AgentOutcome::Message(message) => assert_eq!(message.text(), "delegate answer"),
            AgentOutcome::Structured(_) => panic!("expected message outcome"),
        }
    }
}
