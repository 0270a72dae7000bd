use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt};
use foxvox_lib::{
    core::{
        errors::{AppError, AppResult},
        types::Variant,
    },
    providers::{ChatBackend, ChatReply, ChatRequest, ModelFamily, Role},
    rewriter::{prompts::CRITIQUE_PROMPT, RewriteOptions, Rewriter},
};

/// Replays queued replies in order and keeps every request it saw.
struct ScriptedBackend {
    model: String,
    replies: Mutex<VecDeque<AppResult<ChatReply>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedBackend {
    fn new(model: &str, replies: Vec<AppResult<ChatReply>>) -> Arc<Self> {
        Arc::new(Self {
            model: model.to_string(),
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().expect("lock").clone()
    }
}

impl ChatBackend for ScriptedBackend {
    fn model(&self) -> &str {
        &self.model
    }

    fn complete<'a>(&'a self, _api_key: &'a str, request: &'a ChatRequest) -> BoxFuture<'a, AppResult<ChatReply>> {
        self.requests.lock().expect("lock").push(request.clone());
        let reply = self
            .replies
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Err(AppError::Internal("script exhausted".to_string())));
        async move { reply }.boxed()
    }
}

fn output(html: &str) -> AppResult<ChatReply> {
    Ok(ChatReply::ToolCall {
        name: "output".to_string(),
        arguments: serde_json::json!({ "html": html }).to_string(),
    })
}

fn pirate() -> Variant {
    Variant::new("pirate", "Rewrite the text like a pirate would say it.")
}

const ORIGINAL: &str = "<p>Hello, how are you today?</p>";

#[tokio::test]
async fn chat_models_draft_then_self_review() {
    let backend = ScriptedBackend::new(
        "gpt-4o",
        vec![output("<p>Ahoy, how be ye?</p>"), output("<p>Ahoy matey, how be ye today?</p>")],
    );
    let rewriter = Rewriter::new(
        backend.clone(),
        RewriteOptions {
            max_tokens: 1200,
            custom_instruction: Some("Keep it short.".to_string()),
        },
    );

    let result = rewriter.rewrite("sk-test", &pirate(), ORIGINAL).await;
    assert_eq!(result.as_deref(), Some("<p>Ahoy matey, how be ye today?</p>"));

    let requests = backend.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].messages.len(), 2);
    assert!(requests[0].messages[0].content.starts_with(&pirate().instructions));
    assert!(requests[0].messages[0].content.ends_with("Keep it short."));
    assert_eq!(requests[0].messages[1].content, ORIGINAL);

    let review = &requests[1].messages;
    let roles: Vec<Role> = review.iter().map(|message| message.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
    assert_eq!(review[2].content, r#"{"html":"<p>Ahoy, how be ye?</p>"}"#);
    assert_eq!(review[3].content, CRITIQUE_PROMPT);

    for request in &requests {
        let tool = request.tool.as_ref().expect("output tool offered");
        assert_eq!(tool.name, "output");
        assert_eq!(request.max_tokens, 1200);
    }
}

#[tokio::test]
async fn system_turn_is_exactly_the_variant_instructions_by_default() {
    let backend = ScriptedBackend::new(
        "gpt-4o",
        vec![output("<p>Ahoy, how be ye?</p>"), output("<p>Ahoy matey!</p>")],
    );
    let rewriter = Rewriter::new(backend.clone(), RewriteOptions::default());

    assert!(rewriter.rewrite("sk-test", &pirate(), ORIGINAL).await.is_some());
    let requests = backend.requests();
    assert_eq!(requests[0].messages[0].role, Role::System);
    assert_eq!(requests[0].messages[0].content, pirate().instructions);
    assert_eq!(requests[1].messages[0].content, pirate().instructions);
}

#[tokio::test]
async fn reasoning_models_answer_in_one_turn() {
    let backend = ScriptedBackend::new("o3-mini", vec![output("<p>Ahoy!</p>")]);
    let rewriter = Rewriter::new(backend.clone(), RewriteOptions::default());

    assert_eq!(rewriter.family(), ModelFamily::Reasoning);
    assert_eq!(rewriter.family().token_param(), "max_completion_tokens");
    assert_eq!(
        rewriter.rewrite("sk-test", &pirate(), ORIGINAL).await.as_deref(),
        Some("<p>Ahoy!</p>")
    );

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].messages.len(), 2);
    assert!(requests[0].messages[0].content.contains("'output' tool"));
}

#[tokio::test]
async fn missing_tool_call_skips_the_segment() {
    let backend = ScriptedBackend::new(
        "gpt-4o",
        vec![Ok(ChatReply::Text("Sure! Here you go.".to_string()))],
    );
    let rewriter = Rewriter::new(backend.clone(), RewriteOptions::default());

    assert_eq!(rewriter.rewrite("sk-test", &pirate(), ORIGINAL).await, None);
    assert_eq!(backend.requests().len(), 1);
}

#[tokio::test]
async fn unparseable_arguments_skip_the_segment() {
    let backend = ScriptedBackend::new(
        "gpt-4o",
        vec![
            output("<p>draft</p>"),
            Ok(ChatReply::ToolCall {
                name: "output".to_string(),
                arguments: "{not json".to_string(),
            }),
        ],
    );
    let rewriter = Rewriter::new(backend, RewriteOptions::default());

    assert_eq!(rewriter.rewrite("sk-test", &pirate(), ORIGINAL).await, None);
}

#[tokio::test]
async fn unparseable_draft_stops_before_the_review_turn() {
    let backend = ScriptedBackend::new(
        "gpt-4o",
        vec![
            Ok(ChatReply::ToolCall {
                name: "output".to_string(),
                arguments: "not json at all".to_string(),
            }),
            output("<p>Ahoy!</p>"),
        ],
    );
    let rewriter = Rewriter::new(backend.clone(), RewriteOptions::default());

    assert_eq!(rewriter.rewrite("sk-test", &pirate(), ORIGINAL).await, None);
    assert_eq!(backend.requests().len(), 1);
}

#[tokio::test]
async fn empty_or_unchanged_results_are_skips() {
    let empty = ScriptedBackend::new("gpt-4o", vec![output("<p>draft</p>"), output("   ")]);
    let rewriter = Rewriter::new(empty, RewriteOptions::default());
    assert_eq!(rewriter.rewrite("sk-test", &pirate(), ORIGINAL).await, None);

    let unchanged = ScriptedBackend::new("gpt-4o", vec![output("<p>draft</p>"), output(ORIGINAL)]);
    let rewriter = Rewriter::new(unchanged, RewriteOptions::default());
    assert_eq!(rewriter.rewrite("sk-test", &pirate(), ORIGINAL).await, None);
}

#[tokio::test]
async fn transport_errors_are_skips() {
    let backend = ScriptedBackend::new("gpt-4o", vec![Err(AppError::ProviderRateLimited)]);
    let rewriter = Rewriter::new(backend, RewriteOptions::default());

    assert_eq!(rewriter.rewrite("sk-test", &pirate(), ORIGINAL).await, None);
}
