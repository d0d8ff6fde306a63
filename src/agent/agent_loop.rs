//! The agentic tool-calling loop.
//!
//! One [`Agent`] owns one conversation. Each call to [`Agent::run`] appends
//! the user's message and then repeats a round until the model answers
//! without requesting any tool:
//!
//! 1. send the full conversation and tool catalogue to the backend
//! 2. decode the reply, recovering inline JSON tool calls if needed
//! 3. record the assistant turn
//! 4. dispatch the requested tools and record one tool turn per result
//!
//! The backend call is the only suspension point of a round and is where
//! cancellation is honoured.

use crate::agent::conversation::Conversation;
use crate::agent::recovery::recover_tool_calls;
use crate::agent::transport::{ChatBackend, ChatRequest};
use crate::error::AgentError;
use crate::models::{normalize_arguments, ToolArguments, ToolRequest, ToolResult, Turn};
use crate::tools::{build_catalogue, ToolCatalogue, ToolDispatcher, ToolProvider};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for the agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model_name: String,
    /// Upper bound on backend rounds per `run` call.
    pub max_rounds: usize,
    /// Recorded as the first turn of the conversation when set.
    pub system_prompt: Option<String>,
    /// Dispatch the tool requests of one round concurrently.
    pub parallel_tools: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model_name: String::new(),
            max_rounds: 25,
            system_prompt: None,
            parallel_tools: false,
        }
    }
}

/// Decoded assistant message from one backend reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantReply {
    pub thinking: String,
    pub content: String,
    pub tool_calls: Vec<ToolRequest>,
}

impl AssistantReply {
    /// Decode the `message` object of a chat response. Missing or oddly
    /// shaped fields decode as empty.
    pub fn from_response(raw: &Value) -> Self {
        let Some(message) = raw.get("message").and_then(Value::as_object) else {
            return Self::default();
        };

        let text = |key: &str| {
            message
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let tool_calls = message
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(|calls| calls.iter().filter_map(decode_tool_call).collect())
            .unwrap_or_default();

        Self {
            thinking: text("thinking"),
            content: text("content"),
            tool_calls,
        }
    }
}

/// Decode one `{function: {name, arguments}}` entry. Entries without a
/// function or a name are skipped.
fn decode_tool_call(call: &Value) -> Option<ToolRequest> {
    let function = call.get("function")?;
    let name = function.get("name").and_then(Value::as_str)?;
    if name.is_empty() {
        return None;
    }
    let arguments = function
        .get("arguments")
        .map(normalize_arguments)
        .unwrap_or_default();
    Some(ToolRequest::new(name, arguments))
}

/// The tool-calling agent.
pub struct Agent {
    config: AgentConfig,
    backend: Arc<dyn ChatBackend>,
    providers: Vec<Arc<dyn ToolProvider>>,
    catalogue: Option<Arc<ToolCatalogue>>,
    dispatcher: ToolDispatcher,
    conversation: Conversation,
}

impl Agent {
    /// Create a new agent. The tool catalogue is built on first use.
    pub fn new(
        config: AgentConfig,
        backend: Arc<dyn ChatBackend>,
        providers: Vec<Arc<dyn ToolProvider>>,
    ) -> Self {
        info!("Initializing agent with model {}", config.model_name);

        let mut conversation = Conversation::new();
        if let Some(ref prompt) = config.system_prompt {
            conversation.push_system(prompt.clone());
        }

        Self {
            dispatcher: ToolDispatcher::new(config.parallel_tools),
            config,
            backend,
            providers,
            catalogue: None,
            conversation,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// The session catalogue, built from the providers on first call and
    /// never rebuilt afterwards.
    pub async fn catalogue(&mut self) -> Result<Arc<ToolCatalogue>, AgentError> {
        if let Some(ref catalogue) = self.catalogue {
            return Ok(Arc::clone(catalogue));
        }

        let catalogue = Arc::new(build_catalogue(&self.providers).await?);
        self.catalogue = Some(Arc::clone(&catalogue));
        Ok(catalogue)
    }

    /// Call one tool directly, bypassing the model. Nothing is recorded in
    /// the conversation.
    ///
    /// The content is the raw text of the tool, empty when it returned no
    /// text blocks. Unlike model-issued calls there is no JSON fallback.
    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: ToolArguments,
    ) -> Result<ToolResult, AgentError> {
        let catalogue = self.catalogue().await?;
        let request = ToolRequest::new(name, arguments);
        let result = match self.dispatcher.call_provider(&request, &catalogue).await {
            Ok(output) => ToolResult {
                tool_name: request.name,
                content: output.joined_text().unwrap_or_default(),
                is_error: output.is_error,
            },
            Err(result) => result,
        };
        Ok(result)
    }

    /// Run the loop for one user message and return the final answer.
    pub async fn run(&mut self, query: &str, cancel: &CancellationToken) -> Result<String, AgentError> {
        self.conversation.push_user(query);
        let catalogue = self.catalogue().await?;

        let mut round = 0;
        loop {
            if round >= self.config.max_rounds {
                warn!("Stopping after {} rounds", self.config.max_rounds);
                return Err(AgentError::RoundLimitExceeded(self.config.max_rounds));
            }
            round += 1;

            let reply = self.request_reply(&catalogue, cancel, round).await?;
            let (turn, requests) = Self::interpret(reply, &catalogue);
            let final_answer = turn.content.clone();
            self.conversation.push_assistant(turn);

            if requests.is_empty() {
                debug!("Round {} finished without tool calls", round);
                return Ok(final_answer);
            }

            let results = self.dispatcher.execute(&requests, &catalogue).await;
            self.conversation.push_tool_results(&results);
        }
    }

    /// Send the current conversation and wait for the reply, unless
    /// cancelled first.
    async fn request_reply(
        &self,
        catalogue: &ToolCatalogue,
        cancel: &CancellationToken,
        round: usize,
    ) -> Result<AssistantReply, AgentError> {
        let request = ChatRequest {
            model: &self.config.model_name,
            messages: self.conversation.turns(),
            tools: catalogue.definitions(),
            stream: false,
        };

        debug!(
            "Round {}: sending {} messages",
            round,
            self.conversation.len()
        );

        let raw = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Model request cancelled in round {}", round);
                return Err(AgentError::Cancelled);
            }
            reply = self.backend.send(&request) => reply?,
        };

        Ok(AssistantReply::from_response(&raw))
    }

    /// Turn a decoded reply into the assistant turn to record and the tool
    /// requests to dispatch.
    fn interpret(reply: AssistantReply, catalogue: &ToolCatalogue) -> (Turn, Vec<ToolRequest>) {
        let AssistantReply {
            thinking,
            mut content,
            mut tool_calls,
        } = reply;

        if tool_calls.is_empty() && !content.trim().is_empty() {
            if let Some(recovered) = recover_tool_calls(&content, |name| catalogue.contains(name)) {
                info!("Recovered {} inline tool call(s) from model text", recovered.len());
                tool_calls = recovered;
                content.clear();
            }
        }

        debug!("Model requested {} tool call(s)", tool_calls.len());

        let thinking = (!thinking.is_empty()).then_some(thinking);
        let turn = Turn::assistant(content, thinking, tool_calls.clone());
        (turn, tool_calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::models::Role;
    use crate::tools::provider::testing::StaticProvider;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Backend that replays canned responses and records each request.
    struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<Value, TransportError>>>,
        requests: Mutex<Vec<Value>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Value>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().map(Ok).collect()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn failing(error: TransportError) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(VecDeque::from(vec![Err(error)])),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn request(&self, index: usize) -> Value {
            self.requests.lock().unwrap()[index].clone()
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn send(&self, request: &ChatRequest<'_>) -> Result<Value, TransportError> {
            self.requests
                .lock()
                .unwrap()
                .push(serde_json::to_value(request).unwrap());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(json!({"message": {"content": "out of script"}})))
        }
    }

    /// Backend that never answers.
    struct HangingBackend;

    #[async_trait]
    impl ChatBackend for HangingBackend {
        async fn send(&self, _request: &ChatRequest<'_>) -> Result<Value, TransportError> {
            std::future::pending().await
        }
    }

    fn text_reply(content: &str) -> Value {
        json!({"message": {"role": "assistant", "content": content}})
    }

    fn tool_reply(calls: Value) -> Value {
        json!({"message": {"role": "assistant", "content": "", "tool_calls": calls}})
    }

    fn ghidra_provider() -> Arc<StaticProvider> {
        Arc::new(
            StaticProvider::new("ghidra")
                .with_tool("list_functions", "List all functions")
                .with_tool("decompile_function", "Decompile by name")
                .reply(
                    "decompile_function",
                    crate::models::CallToolOutput::text("int main(void) { return 0; }"),
                ),
        )
    }

    fn agent_with(backend: Arc<dyn ChatBackend>, provider: Arc<StaticProvider>) -> Agent {
        let config = AgentConfig {
            model_name: "qwen3".to_string(),
            ..AgentConfig::default()
        };
        let providers: Vec<Arc<dyn ToolProvider>> = vec![provider];
        Agent::new(config, backend, providers)
    }

    #[tokio::test]
    async fn test_single_round_without_tools() {
        let backend = ScriptedBackend::new(vec![text_reply("It is a packer stub.")]);
        let mut agent = agent_with(backend.clone(), ghidra_provider());

        let answer = agent
            .run("what is this binary?", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(answer, "It is a packer stub.");
        assert_eq!(backend.request_count(), 1);
        let last = agent.conversation().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, answer);
    }

    #[tokio::test]
    async fn test_request_payload_shape() {
        let backend = ScriptedBackend::new(vec![text_reply("ok")]);
        let mut agent = agent_with(backend.clone(), ghidra_provider());
        agent.run("hi", &CancellationToken::new()).await.unwrap();

        let payload = backend.request(0);
        assert_eq!(payload["model"], "qwen3");
        assert_eq!(payload["stream"], false);
        assert_eq!(payload["messages"][0]["role"], "user");
        assert_eq!(payload["messages"][0]["content"], "hi");
        assert_eq!(payload["tools"].as_array().unwrap().len(), 2);
        assert_eq!(payload["tools"][0]["type"], "function");
        assert_eq!(payload["tools"][0]["function"]["name"], "list_functions");
    }

    #[tokio::test]
    async fn test_structured_tool_calls_round_trip() {
        let backend = ScriptedBackend::new(vec![
            tool_reply(json!([
                {"function": {"name": "decompile_function", "arguments": {"name": "main"}}},
                {"function": {"name": "list_functions", "arguments": {}}}
            ])),
            text_reply("main returns zero."),
        ]);
        let provider = ghidra_provider();
        let mut agent = agent_with(backend.clone(), provider.clone());

        let answer = agent
            .run("decompile main", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(answer, "main returns zero.");
        assert_eq!(backend.request_count(), 2);

        let turns = agent.conversation().turns();
        let roles: Vec<Role> = turns.iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Tool, Role::Assistant]
        );
        assert_eq!(turns[2].tool_name.as_deref(), Some("decompile_function"));
        assert_eq!(turns[2].content, "int main(void) { return 0; }");
        assert_eq!(turns[3].tool_name.as_deref(), Some("list_functions"));

        let calls = provider.calls();
        assert_eq!(calls[0].0, "decompile_function");
        assert_eq!(calls[0].1["name"], json!("main"));

        // second request carries the tool output back to the model
        let second = backend.request(1);
        assert_eq!(second["messages"].as_array().unwrap().len(), 4);
        assert_eq!(second["messages"][2]["role"], "tool");
        assert_eq!(second["messages"][2]["tool_name"], "decompile_function");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_fed_back_to_model() {
        let backend = ScriptedBackend::new(vec![
            tool_reply(json!([{"function": {"name": "format_disk", "arguments": {}}}])),
            text_reply("That tool does not exist, sorry."),
        ]);
        let mut agent = agent_with(backend.clone(), ghidra_provider());

        let answer = agent.run("wipe it", &CancellationToken::new()).await.unwrap();
        assert_eq!(answer, "That tool does not exist, sorry.");

        let tool_turn = &agent.conversation().turns()[2];
        assert_eq!(tool_turn.role, Role::Tool);
        assert!(tool_turn.content.contains("no provider exposes tool 'format_disk'"));
    }

    #[tokio::test]
    async fn test_recovered_call_clears_content() {
        let inline = "I will decompile it now.\n```json\n{\"name\": \"decompile_function\", \"arguments\": {\"name\": \"main\"}}\n```";
        let backend = ScriptedBackend::new(vec![text_reply(inline), text_reply("Done.")]);
        let provider = ghidra_provider();
        let mut agent = agent_with(backend.clone(), provider.clone());

        let answer = agent.run("decompile main", &CancellationToken::new()).await.unwrap();
        assert_eq!(answer, "Done.");

        let assistant = &agent.conversation().turns()[1];
        assert_eq!(assistant.content, "");
        let requested: Vec<&str> = assistant
            .requested_tool_calls()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(requested, vec!["decompile_function"]);
        assert_eq!(provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_recovery_keeps_content() {
        let text = "Example:\n```json\n{\"name\": \"list_functions\", \"arguments\": {}}\n```\nBroken:\n```json\n{\"name\": \n```";
        let backend = ScriptedBackend::new(vec![text_reply(text)]);
        let provider = ghidra_provider();
        let mut agent = agent_with(backend.clone(), provider.clone());

        let answer = agent.run("explain", &CancellationToken::new()).await.unwrap();
        assert_eq!(answer, text);
        assert!(provider.calls().is_empty());
        assert_eq!(backend.request_count(), 1);
    }

    #[tokio::test]
    async fn test_recovery_ignores_unknown_tool_names() {
        let text = r#"{"name": "launch_missiles", "arguments": {}}"#;
        let backend = ScriptedBackend::new(vec![text_reply(text)]);
        let mut agent = agent_with(backend, ghidra_provider());

        let answer = agent.run("go", &CancellationToken::new()).await.unwrap();
        assert_eq!(answer, text);
    }

    #[tokio::test]
    async fn test_unexpected_reply_shape_ends_with_empty_answer() {
        let backend = ScriptedBackend::new(vec![json!(["not", "an", "object"])]);
        let mut agent = agent_with(backend, ghidra_provider());

        let answer = agent.run("hello", &CancellationToken::new()).await.unwrap();
        assert_eq!(answer, "");
        assert_eq!(agent.conversation().len(), 2);
    }

    #[tokio::test]
    async fn test_thinking_is_recorded() {
        let backend = ScriptedBackend::new(vec![json!({
            "message": {"content": "Answer", "thinking": "considering the imports"}
        })]);
        let mut agent = agent_with(backend, ghidra_provider());
        agent.run("q", &CancellationToken::new()).await.unwrap();

        let turn = agent.conversation().last().unwrap();
        assert_eq!(turn.reasoning_text.as_deref(), Some("considering the imports"));
    }

    #[tokio::test]
    async fn test_transport_error_aborts_run() {
        let backend = ScriptedBackend::failing(TransportError::EmptyResponse);
        let mut agent = agent_with(backend, ghidra_provider());

        let err = agent.run("q", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::Transport(TransportError::EmptyResponse)));
        assert_eq!(agent.conversation().len(), 1);
    }

    #[tokio::test]
    async fn test_round_limit_stops_looping_model() {
        let looping: Vec<Value> = (0..10)
            .map(|_| tool_reply(json!([{"function": {"name": "list_functions", "arguments": {}}}])))
            .collect();
        let backend = ScriptedBackend::new(looping);
        let config = AgentConfig {
            model_name: "qwen3".to_string(),
            max_rounds: 3,
            ..AgentConfig::default()
        };
        let providers: Vec<Arc<dyn ToolProvider>> = vec![ghidra_provider()];
        let mut agent = Agent::new(config, backend.clone(), providers);

        let err = agent.run("loop", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::RoundLimitExceeded(3)));
        assert_eq!(backend.request_count(), 3);
        // every assistant turn has its tool turn
        assert_eq!(agent.conversation().last().unwrap().role, Role::Tool);
    }

    #[tokio::test]
    async fn test_cancellation_leaves_no_partial_turn() {
        let mut agent = agent_with(Arc::new(HangingBackend), ghidra_provider());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = agent.run("slow question", &cancel).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert_eq!(agent.conversation().len(), 1);
        assert_eq!(agent.conversation().last().unwrap().role, Role::User);
    }

    #[tokio::test]
    async fn test_catalogue_failure_is_fatal() {
        let backend = ScriptedBackend::new(vec![text_reply("never sent")]);
        let provider = Arc::new(StaticProvider::new("ghidra").failing_listing());
        let mut agent = agent_with(backend.clone(), provider);

        let err = agent.run("q", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::Registry(_)));
        assert_eq!(backend.request_count(), 0);
    }

    #[tokio::test]
    async fn test_catalogue_built_once() {
        let backend = ScriptedBackend::new(vec![text_reply("a"), text_reply("b")]);
        let mut agent = agent_with(backend, ghidra_provider());

        let first = agent.catalogue().await.unwrap();
        agent.run("one", &CancellationToken::new()).await.unwrap();
        agent.run("two", &CancellationToken::new()).await.unwrap();
        let second = agent.catalogue().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_system_prompt_is_first_turn() {
        let backend = ScriptedBackend::new(vec![text_reply("ok")]);
        let config = AgentConfig {
            model_name: "qwen3".to_string(),
            system_prompt: Some("You are a reverse engineer.".to_string()),
            ..AgentConfig::default()
        };
        let providers: Vec<Arc<dyn ToolProvider>> = vec![ghidra_provider()];
        let mut agent = Agent::new(config, backend.clone(), providers);
        agent.run("hi", &CancellationToken::new()).await.unwrap();

        let payload = backend.request(0);
        assert_eq!(payload["messages"][0]["role"], "system");
        assert_eq!(payload["messages"][1]["role"], "user");
    }

    #[tokio::test]
    async fn test_direct_call_bypasses_conversation() {
        let backend = ScriptedBackend::new(vec![]);
        let mut agent = agent_with(backend.clone(), ghidra_provider());

        let result = agent
            .call_tool("list_functions", ToolArguments::new())
            .await
            .unwrap();
        assert_eq!(result.content, "list_functions ok");
        assert!(agent.conversation().is_empty());
        assert_eq!(backend.request_count(), 0);
    }

    #[tokio::test]
    async fn test_direct_call_without_text_is_empty() {
        let backend = ScriptedBackend::new(vec![]);
        let provider = Arc::new(
            StaticProvider::new("ghidra")
                .with_tool("list_functions", "List all functions")
                .reply("list_functions", crate::models::CallToolOutput::default()),
        );
        let mut agent = agent_with(backend, provider);

        let result = agent
            .call_tool("list_functions", ToolArguments::new())
            .await
            .unwrap();
        assert_eq!(result.content, "");
        assert!(!result.is_error);

        let missing = agent
            .call_tool("rename_data", ToolArguments::new())
            .await
            .unwrap();
        assert!(missing.is_error);
        assert!(missing.content.contains("rename_data"));
    }

    #[tokio::test]
    async fn test_recovery_skips_malformed_earlier_block() {
        let text = "Let me think:\n```json\n{\"name\": \n```\nCalling:\n```json\n{\"name\": \"decompile_function\", \"arguments\": {\"name\": \"entry\"}}\n```";
        let backend = ScriptedBackend::new(vec![text_reply(text), text_reply("entry calls main.")]);
        let provider = ghidra_provider();
        let mut agent = agent_with(backend, provider.clone());

        let answer = agent.run("what does entry do?", &CancellationToken::new()).await.unwrap();
        assert_eq!(answer, "entry calls main.");

        let assistant = &agent.conversation().turns()[1];
        assert_eq!(assistant.content, "");
        let requested: Vec<&str> = assistant
            .requested_tool_calls()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(requested, vec!["decompile_function"]);

        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1["name"], json!("entry"));
    }

    #[test]
    fn test_decode_tool_calls_skips_malformed_entries() {
        let reply = AssistantReply::from_response(&json!({
            "message": {
                "content": null,
                "tool_calls": [
                    {"function": {"name": "list_functions"}},
                    {"function": {"name": ""}},
                    {"not_function": {}},
                    {"function": {"name": "decompile_function", "arguments": "{\"name\": \"main\"}"}}
                ]
            }
        }));

        assert_eq!(reply.content, "");
        assert_eq!(reply.tool_calls.len(), 2);
        assert!(reply.tool_calls[0].arguments.is_empty());
        assert_eq!(reply.tool_calls[1].arguments["name"], json!("main"));
    }
}
