use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;

use crate::events::{AgentEvent, EventEnvelope};
use crate::models::message::Message;
use crate::models::tool::ToolCall;
use crate::models::transcript::Transcript;
use crate::providers::base::{Completion, CompletionRequest, Provider, StreamItem};
use crate::providers::configs::RequestOptions;
use crate::tools::ToolRegistry;

/// Default number of provider round trips per run
pub const DEFAULT_MAX_ITERATIONS: usize = 1;

/// Agent drives one provider through a conversation, executing the tool calls
/// the model asks for until it produces a final answer or runs out of budget
#[derive(Clone)]
pub struct Agent {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    model: String,
    options: RequestOptions,
    max_iterations: usize,
}

impl Agent {
    /// Create a new Agent with the specified provider and model and no tools
    pub fn new<S: Into<String>>(provider: Arc<dyn Provider>, model: S) -> Self {
        Self {
            provider,
            tools: Arc::new(ToolRegistry::new()),
            model: model.into(),
            options: RequestOptions::default(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// The cap actually enforced: at least one pass, and at least two when tools
    /// are registered so a tool result can always be answered.
    pub fn effective_max_iterations(&self) -> usize {
        let floor = if self.tools.is_empty() { 1 } else { 2 };
        self.max_iterations.max(floor)
    }

    /// Run the conversation, appending every assistant and tool turn to `transcript`.
    ///
    /// The stream always ends with exactly one `final_message` or `error` event.
    pub fn reply<'a>(
        &'a self,
        transcript: &'a mut Transcript,
        run_id: &'a str,
    ) -> BoxStream<'a, EventEnvelope> {
        let cap = self.effective_max_iterations();
        let tools = self.tools.describe();
        let options = self
            .options
            .resolve(self.provider.provider_type(), &self.model);

        Box::pin(async_stream::stream! {
            let envelope = |event: AgentEvent, iteration: usize| {
                EventEnvelope::new(event, run_id, iteration)
            };
            tracing::info!(
                run_id,
                provider = %self.provider.provider_type(),
                model = %self.model,
                cap,
                "starting conversation run"
            );

            let mut iteration = 0;
            loop {
                iteration += 1;
                let mut calls: Vec<ToolCall> = Vec::new();
                let mut outcome: Option<Result<Completion, String>> = None;

                {
                    let mut stream = self.provider.stream(CompletionRequest {
                        model: &self.model,
                        messages: transcript.messages(),
                        tools: &tools,
                        options: &options,
                    });
                    while let Some(item) = stream.next().await {
                        match item {
                            StreamItem::Delta(delta) => {
                                yield envelope(AgentEvent::TokenDelta { delta }, iteration);
                            }
                            StreamItem::ToolCall(call) => {
                                tracing::debug!(run_id, tool = %call.name, id = %call.id, "model requested tool");
                                yield envelope(AgentEvent::ToolCall { call: call.clone() }, iteration);
                                calls.push(call);
                            }
                            StreamItem::Completed(completion) => {
                                outcome = Some(Ok(completion));
                                break;
                            }
                            StreamItem::Failed(message) => {
                                outcome = Some(Err(message));
                                break;
                            }
                        }
                    }
                }

                let completion = match outcome {
                    Some(Ok(completion)) => completion,
                    Some(Err(message)) => {
                        tracing::warn!(run_id, iteration, error = %message, "provider stream failed");
                        yield envelope(AgentEvent::Error { message }, iteration);
                        return;
                    }
                    None => {
                        let message = "Provider stream ended without a final message".to_string();
                        tracing::warn!(run_id, iteration, "{}", message);
                        yield envelope(AgentEvent::Error { message }, iteration);
                        return;
                    }
                };

                let mut turn = Message::assistant();
                for reasoning in completion.reasoning {
                    turn = turn.with_reasoning(reasoning);
                }
                if !completion.text.is_empty() {
                    turn = turn.with_text(completion.text.clone());
                }

                if calls.is_empty() {
                    transcript.push(turn);
                    tracing::info!(run_id, iteration, "conversation run finished");
                    yield envelope(AgentEvent::FinalMessage { content: completion.text }, iteration);
                    return;
                }

                for call in &calls {
                    turn = turn.with_tool_request(call.clone());
                }
                transcript.push(turn);

                // Let the relayed events reach the consumer before tools start running
                tokio::task::yield_now().await;

                let results = futures::future::join_all(
                    calls.iter().map(|call| self.tools.execute_call(call)),
                )
                .await;

                let mut tool_message = Message::tool();
                for result in results {
                    yield envelope(AgentEvent::ToolResult { result: result.clone() }, iteration);
                    tool_message = tool_message.with_tool_response(result);
                }
                transcript.push(tool_message);

                if iteration >= cap {
                    let message = format!(
                        "Iteration budget of {} exhausted before a final message",
                        cap
                    );
                    tracing::warn!(run_id, iteration, "{}", message);
                    yield envelope(AgentEvent::Error { message }, iteration);
                    return;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::role::Role;
    use crate::models::tool::{ParameterSpec, ParameterType, ToolDefinition};
    use crate::providers::factory::ProviderType;
    use crate::providers::mock::MockProvider;
    use serde_json::json;

    fn add_registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry
            .register_fn(
                ToolDefinition::new("add", "Add two numbers")
                    .with_parameter(
                        ParameterSpec::new("a", "left", ParameterType::Number).required(),
                    )
                    .with_parameter(
                        ParameterSpec::new("b", "right", ParameterType::Number).required(),
                    ),
                |args| {
                    let a = args["a"].as_i64().unwrap_or_default();
                    let b = args["b"].as_i64().unwrap_or_default();
                    Ok(json!(a + b))
                },
            )
            .unwrap();
        Arc::new(registry)
    }

    fn done(text: &str) -> StreamItem {
        StreamItem::Completed(Completion::text(text))
    }

    fn add_call(id: &str) -> StreamItem {
        StreamItem::ToolCall(ToolCall::new(id, "add", json!("{\"a\":1,\"b\":2}")))
    }

    async fn run(agent: &Agent, transcript: &mut Transcript) -> Vec<EventEnvelope> {
        agent.reply(transcript, "run-1").collect().await
    }

    fn kinds(events: &[EventEnvelope]) -> Vec<&'static str> {
        events.iter().map(|e| e.event.kind()).collect()
    }

    #[tokio::test]
    async fn test_simple_response() {
        let provider = Arc::new(MockProvider::new(vec![vec![
            StreamItem::Delta("Hel".into()),
            StreamItem::Delta("lo".into()),
            done("Hello"),
        ]]));
        let agent = Agent::new(provider.clone(), "mock");
        let mut transcript = Transcript::from(vec![Message::user().with_text("Hi")]);

        let events = run(&agent, &mut transcript).await;
        assert_eq!(kinds(&events), vec!["token_delta", "token_delta", "final_message"]);
        assert_eq!(
            events[2].event,
            AgentEvent::FinalMessage {
                content: "Hello".to_string()
            }
        );
        assert!(events.iter().all(|e| e.run_id == "run-1" && e.iteration == 1));

        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.last().unwrap().role, Role::Assistant);
        assert_eq!(transcript.last().unwrap().text(), "Hello");
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_tool_call_round_trip() {
        let provider = Arc::new(MockProvider::new(vec![
            vec![add_call("call_1"), done("")],
            vec![StreamItem::Delta("3".into()), done("3")],
        ]));
        let agent = Agent::new(provider.clone(), "mock")
            .with_tools(add_registry())
            .with_max_iterations(2);
        let mut transcript = Transcript::from(vec![Message::user().with_text("What is 1+2?")]);

        let events = run(&agent, &mut transcript).await;
        assert_eq!(
            kinds(&events),
            vec!["tool_call", "tool_result", "token_delta", "final_message"]
        );
        match &events[1].event {
            AgentEvent::ToolResult { result } => {
                assert_eq!(result.tool_call_id, "call_1");
                assert_eq!(result.output, json!(3));
                assert!(!result.is_error);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(events[0].iteration, 1);
        assert_eq!(events[3].iteration, 2);

        let messages = transcript.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].tool_requests().count(), 1);
        assert_eq!(messages[2].role, Role::Tool);
        assert_eq!(messages[2].tool_responses().next().unwrap().tool_call_id, "call_1");

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tool_names, vec!["add".to_string()]);
        assert_eq!(requests[1].messages.len(), 3);
    }

    #[tokio::test]
    async fn test_multiple_tool_calls_keep_order() {
        let provider = Arc::new(MockProvider::new(vec![
            vec![add_call("call_1"), add_call("call_2"), done("")],
            vec![done("3 and 3")],
        ]));
        let agent = Agent::new(provider, "mock")
            .with_tools(add_registry())
            .with_max_iterations(3);
        let mut transcript = Transcript::from(vec![Message::user().with_text("twice")]);

        let events = run(&agent, &mut transcript).await;
        let result_ids: Vec<String> = events
            .iter()
            .filter_map(|e| match &e.event {
                AgentEvent::ToolResult { result } => Some(result.tool_call_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(result_ids, vec!["call_1", "call_2"]);
        assert_eq!(transcript.messages()[2].tool_responses().count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_reported_to_the_model() {
        let provider = Arc::new(MockProvider::new(vec![
            vec![
                StreamItem::ToolCall(ToolCall::new("call_1", "subtract", json!({}))),
                done(""),
            ],
            vec![done("Sorry, I cannot subtract.")],
        ]));
        let agent = Agent::new(provider, "mock").with_tools(add_registry());
        let mut transcript = Transcript::from(vec![Message::user().with_text("5-3?")]);

        let events = run(&agent, &mut transcript).await;
        match &events[1].event {
            AgentEvent::ToolResult { result } => {
                assert!(result.is_error);
                assert_eq!(result.output["kind"], "tool_not_found");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(
            &events.last().unwrap().event,
            AgentEvent::FinalMessage { content } if content == "Sorry, I cannot subtract."
        ));
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        let provider = Arc::new(MockProvider::new(vec![
            vec![add_call("call_1"), done("")],
            vec![add_call("call_2"), done("")],
            vec![done("never reached")],
        ]));
        let agent = Agent::new(provider.clone(), "mock")
            .with_tools(add_registry())
            .with_max_iterations(2);
        let mut transcript = Transcript::from(vec![Message::user().with_text("loop")]);

        let events = run(&agent, &mut transcript).await;
        assert_eq!(
            kinds(&events),
            vec!["tool_call", "tool_result", "tool_call", "tool_result", "error"]
        );
        assert!(matches!(
            &events[4].event,
            AgentEvent::Error { message } if message.contains("budget")
        ));
        assert_eq!(provider.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_cap_is_raised_when_tools_exist() {
        let agent = Agent::new(Arc::new(MockProvider::new(vec![])), "mock").with_max_iterations(0);
        assert_eq!(agent.effective_max_iterations(), 1);

        let agent = agent.with_tools(add_registry());
        assert_eq!(agent.effective_max_iterations(), 2);

        let agent = agent.with_max_iterations(5);
        assert_eq!(agent.effective_max_iterations(), 5);
    }

    #[tokio::test]
    async fn test_provider_failure() {
        let provider = Arc::new(MockProvider::new(vec![vec![
            StreamItem::Delta("par".into()),
            StreamItem::Failed("Ollama error: boom".into()),
        ]]));
        let agent = Agent::new(provider, "mock");
        let mut transcript = Transcript::from(vec![Message::user().with_text("Hi")]);

        let events = run(&agent, &mut transcript).await;
        assert_eq!(kinds(&events), vec!["token_delta", "error"]);
        assert_eq!(transcript.len(), 1);
    }

    #[tokio::test]
    async fn test_stream_without_terminator() {
        let provider = Arc::new(MockProvider::new(vec![vec![StreamItem::Delta("cut".into())]]));
        let agent = Agent::new(provider, "mock");
        let mut transcript = Transcript::from(vec![Message::user().with_text("Hi")]);

        let events = run(&agent, &mut transcript).await;
        assert_eq!(kinds(&events), vec!["token_delta", "error"]);
    }

    #[tokio::test]
    async fn test_text_with_tool_calls_continues() {
        let provider = Arc::new(MockProvider::new(vec![
            vec![
                StreamItem::Delta("Let me add.".into()),
                add_call("call_1"),
                done("Let me add."),
            ],
            vec![done("3")],
        ]));
        let agent = Agent::new(provider, "mock").with_tools(add_registry());
        let mut transcript = Transcript::from(vec![Message::user().with_text("1+2")]);

        let events = run(&agent, &mut transcript).await;
        assert_eq!(
            kinds(&events),
            vec!["token_delta", "tool_call", "tool_result", "final_message"]
        );
        let assistant = &transcript.messages()[1];
        assert_eq!(assistant.text(), "Let me add.");
        assert_eq!(assistant.tool_requests().count(), 1);
    }

    #[tokio::test]
    async fn test_model_defaults_are_applied() {
        let provider = Arc::new(
            MockProvider::new(vec![vec![done("hi")]]).with_provider_type(ProviderType::Anthropic),
        );
        let agent = Agent::new(provider.clone(), "claude-sonnet-4")
            .with_options(RequestOptions::default().with_temperature(0.2));
        let mut transcript = Transcript::from(vec![Message::user().with_text("Hi")]);

        run(&agent, &mut transcript).await;
        let options = &provider.requests()[0].options;
        assert_eq!(options.max_output_tokens, Some(8192));
        assert_eq!(options.temperature, Some(0.2));
    }
}
