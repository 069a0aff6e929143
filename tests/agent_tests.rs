//! Integration tests for the agent loop
//!
//! The provider is scripted and the broker is in-memory, so every test
//! observes the exact progress stream and conversation the loop produced.

mod common;

use pretty_assertions::assert_eq;
use serde_json::{json, Map};

use taskforge::llm::{ContentBlock, LlmError, Role, StreamEvent};
use taskforge::progress::{FileAction, ProgressKind};
use taskforge::{AgentType, Task};

use common::{drain_events, drain_mutations, event_names, Harness, ScriptedProvider, TurnScript};

fn task(prompt: &str) -> Task {
    Task::new("demo", "user-1", prompt, AgentType::Code)
}

#[tokio::test]
async fn test_hello_world_scenario() {
    let provider = ScriptedProvider::new(vec![TurnScript::new()
        .text(&["I'll create ", "the page"])
        .tool(
            "toolu_1",
            "create_file",
            json!({"path": "index.html", "content": "<h1>Hello</h1>"}),
        )
        .tool("toolu_2", "mark_complete", json!({"summary": "Created index.html"}))
        .build()]);
    let harness = Harness::new(provider, 20);
    let task = task("create a hello world file");
    let mut progress = harness.progress(&task.task_id).await;
    let mut files = harness.files("demo").await;

    let outcome = harness.controller.run(&task).await;

    assert!(outcome.completed);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.summary.as_deref(), Some("Created index.html"));
    assert!(outcome.error.is_none());

    let events = drain_events(&mut progress);
    assert_eq!(
        event_names(&events),
        vec![
            "task_started",
            "iteration_start",
            "thinking_chunk",
            "thinking_chunk",
            "tool_start",
            "tool_start",
            "tool_executing",
            "tool_result",
            "tool_executing",
            "tool_result",
            "task_completed",
        ]
    );
    assert_eq!(
        events[4].kind,
        ProgressKind::ToolStart {
            tool: "create_file".into(),
            tool_use_id: "toolu_1".into(),
        }
    );
    assert!(matches!(
        &events[7].kind,
        ProgressKind::ToolResult { tool, success: true, .. } if tool == "create_file"
    ));
    assert_eq!(
        events.last().unwrap().kind,
        ProgressKind::TaskCompleted {
            iterations: 1,
            summary: Some("Created index.html".into()),
        }
    );

    let result = outcome.into_result(&task);
    assert!(result.completed);
    assert_eq!(result.iterations, 1);

    let written = std::fs::read_to_string(harness.dir.path().join("demo/index.html")).unwrap();
    assert_eq!(written, "<h1>Hello</h1>");

    let mutations = drain_mutations(&mut files);
    assert_eq!(mutations.len(), 1);
    assert_eq!(mutations[0].action, FileAction::Create);
    assert_eq!(mutations[0].path, "index.html");
    assert_eq!(mutations[0].content, "<h1>Hello</h1>");
}

#[tokio::test]
async fn test_multi_iteration_conversation() {
    let provider = ScriptedProvider::new(vec![
        TurnScript::new()
            .tool("toolu_1", "create_file", json!({"path": "a.txt", "content": "one"}))
            .build(),
        TurnScript::new()
            .tool(
                "toolu_2",
                "edit_file",
                json!({"path": "a.txt", "old_content": "one", "new_content": "two"}),
            )
            .build(),
        TurnScript::new()
            .tool("toolu_3", "mark_complete", json!({"summary": "edited"}))
            .build(),
    ]);
    let harness = Harness::new(provider, 20);
    let task = task("Write then edit");
    let mut files = harness.files("demo").await;

    let outcome = harness.controller.run(&task).await;

    assert!(outcome.completed);
    assert_eq!(outcome.iterations, 3);
    assert_eq!(
        std::fs::read_to_string(harness.dir.path().join("demo/a.txt")).unwrap(),
        "two"
    );
    let actions: Vec<FileAction> = drain_mutations(&mut files).into_iter().map(|m| m.action).collect();
    assert_eq!(actions, vec![FileAction::Create, FileAction::Edit]);

    // user prompt, then assistant / tool_results pairs
    let requests = harness.provider.requests();
    assert_eq!(requests[2].messages.len(), 5);
}

#[tokio::test]
async fn test_never_completing_task_warns_at_cap() {
    let provider = ScriptedProvider::repeating(
        TurnScript::new()
            .text(&["Still looking"])
            .tool("toolu_x", "list_files", json!({}))
            .build(),
    );
    let harness = Harness::new(provider, 3);
    let task = task("Loop forever");
    let mut progress = harness.progress(&task.task_id).await;

    let outcome = harness.controller.run(&task).await;

    assert!(!outcome.completed);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.iterations, 3);
    assert_eq!(harness.provider.calls(), 3);

    let events = drain_events(&mut progress);
    let starts = events
        .iter()
        .filter(|e| matches!(e.kind, ProgressKind::IterationStart { .. }))
        .count();
    assert_eq!(starts, 3);
    assert!(matches!(
        events.last().unwrap().kind,
        ProgressKind::TaskWarning { iterations: 3, .. }
    ));

    let result = outcome.into_result(&task);
    assert!(!result.completed);
    assert!(result.error.is_none());
    assert_eq!(result.iterations, 3);
}

#[tokio::test]
async fn test_response_without_tools_completes_same_iteration() {
    let provider = ScriptedProvider::new(vec![TurnScript::new()
        .text(&["Nothing to do here."])
        .build()]);
    let harness = Harness::new(provider, 20);
    let task = task("Say hi");
    let mut progress = harness.progress(&task.task_id).await;

    let outcome = harness.controller.run(&task).await;

    assert!(outcome.completed);
    assert_eq!(outcome.iterations, 1);
    assert!(outcome.summary.is_none());
    assert_eq!(
        event_names(&drain_events(&mut progress)),
        vec!["task_started", "iteration_start", "thinking_chunk", "task_completed"]
    );
}

#[tokio::test]
async fn test_mark_complete_stops_loop_after_batch() {
    let provider = ScriptedProvider::new(vec![
        TurnScript::new()
            .tool("toolu_1", "mark_complete", json!({"summary": "done"}))
            .tool("toolu_2", "create_file", json!({"path": "late.txt", "content": "x"}))
            .build(),
        TurnScript::new().text(&["should never be requested"]).build(),
    ]);
    let harness = Harness::new(provider, 20);
    let task = task("Finish early");

    let outcome = harness.controller.run(&task).await;

    assert!(outcome.completed);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.summary.as_deref(), Some("done"));
    assert_eq!(harness.provider.calls(), 1);
    assert!(harness.dir.path().join("demo/late.txt").exists());
}

#[tokio::test]
async fn test_thinking_chunks_reconstruct_text_block() {
    let chunks = ["Hel", "lo ", "wor", "ld"];
    let provider = ScriptedProvider::new(vec![
        TurnScript::new()
            .text(&chunks)
            .tool("toolu_1", "list_files", json!({}))
            .build(),
        TurnScript::new().text(&["ok"]).build(),
    ]);
    let harness = Harness::new(provider, 20);
    let task = task("Echo");
    let mut progress = harness.progress(&task.task_id).await;

    harness.controller.run(&task).await;

    let streamed: String = drain_events(&mut progress)
        .into_iter()
        .take_while(|e| !matches!(e.kind, ProgressKind::ToolStart { .. }))
        .filter_map(|e| match e.kind {
            ProgressKind::ThinkingChunk { content } => Some(content),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, "Hello world");

    let requests = harness.provider.requests();
    let assistant = &requests[1].messages[1];
    assert_eq!(assistant.role, Role::Assistant);
    assert_eq!(
        assistant.content[0],
        ContentBlock::Text {
            text: "Hello world".into()
        }
    );
}

#[tokio::test]
async fn test_tool_results_are_batched_in_order() {
    let provider = ScriptedProvider::new(vec![
        TurnScript::new()
            .tool("toolu_a", "create_file", json!({"path": "a.txt", "content": "a"}))
            .tool("toolu_b", "read_file", json!({"path": "a.txt"}))
            .build(),
        TurnScript::new().text(&["done"]).build(),
    ]);
    let harness = Harness::new(provider, 20);
    let task = task("Two tools");
    let mut progress = harness.progress(&task.task_id).await;

    harness.controller.run(&task).await;

    let requests = harness.provider.requests();
    assert_eq!(requests.len(), 2);
    let batch = &requests[1].messages[2];
    assert_eq!(batch.role, Role::User);
    assert_eq!(batch.content.len(), 2);
    match (&batch.content[0], &batch.content[1]) {
        (
            ContentBlock::ToolResult {
                tool_use_id: first,
                is_error: false,
                ..
            },
            ContentBlock::ToolResult {
                tool_use_id: second,
                content,
                is_error: false,
            },
        ) => {
            assert_eq!(first, "toolu_a");
            assert_eq!(second, "toolu_b");
            let value: serde_json::Value = serde_json::from_str(content).unwrap();
            assert_eq!(value["content"], "a");
        }
        other => panic!("unexpected batch: {:?}", other),
    }

    // tool_executing precedes tool_result for each id
    let events = drain_events(&mut progress);
    for id in ["toolu_a", "toolu_b"] {
        let executing = events.iter().position(|e| {
            matches!(&e.kind, ProgressKind::ToolExecuting { tool_use_id, .. } if tool_use_id == id)
        });
        let result = events.iter().position(|e| {
            matches!(&e.kind, ProgressKind::ToolResult { tool_use_id, .. } if tool_use_id == id)
        });
        assert!(executing.unwrap() < result.unwrap());
    }
}

#[tokio::test]
async fn test_requests_carry_prompt_and_catalogue() {
    let provider = ScriptedProvider::new(vec![TurnScript::new().text(&["ok"]).build()]);
    let harness = Harness::new(provider, 20);
    let mut context = Map::new();
    context.insert("framework".into(), json!("react"));
    let task = Task::new("demo", "u", "Style the header", AgentType::Design).with_context(context);

    harness.controller.run(&task).await;

    let request = &harness.provider.requests()[0];
    assert_eq!(request.system, taskforge::agent::system_prompt(AgentType::Design));
    let names: Vec<&str> = request.tools.iter().map(|t| t.name.as_str()).collect();
    assert!(names.contains(&"create_file"));
    assert!(names.contains(&"mark_complete"));
    match &request.messages[0].content[0] {
        ContentBlock::Text { text } => {
            assert!(text.starts_with("Style the header"));
            assert!(text.contains("react"));
        }
        other => panic!("unexpected first block: {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_tool_input_is_a_failed_result() {
    let provider = ScriptedProvider::new(vec![
        TurnScript::new()
            .raw_tool("toolu_bad", "create_file", "{\"path\": \"a.txt\", ")
            .build(),
        TurnScript::new().text(&["giving up"]).build(),
    ]);
    let harness = Harness::new(provider, 20);
    let task = task("Bad json");
    let mut progress = harness.progress(&task.task_id).await;

    let outcome = harness.controller.run(&task).await;

    assert!(outcome.completed);
    assert_eq!(outcome.iterations, 2);
    let failed = drain_events(&mut progress).into_iter().find_map(|e| match e.kind {
        ProgressKind::ToolResult { success, result, .. } => Some((success, result)),
        _ => None,
    });
    let (success, result) = failed.unwrap();
    assert!(!success);
    assert!(result["error"].as_str().unwrap().contains("not valid JSON"));

    let requests = harness.provider.requests();
    assert!(matches!(
        &requests[1].messages[2].content[0],
        ContentBlock::ToolResult { is_error: true, .. }
    ));
}

#[tokio::test]
async fn test_path_escape_is_rejected_and_loop_continues() {
    let provider = ScriptedProvider::new(vec![
        TurnScript::new()
            .tool(
                "toolu_1",
                "create_file",
                json!({"path": "../../escape.txt", "content": "nope"}),
            )
            .build(),
        TurnScript::new()
            .tool("toolu_2", "mark_complete", json!({"summary": "stopped"}))
            .build(),
    ]);
    let harness = Harness::new(provider, 20);
    let task = task("Escape");
    let mut progress = harness.progress(&task.task_id).await;

    let outcome = harness.controller.run(&task).await;

    assert!(outcome.completed);
    assert!(!harness.dir.path().join("escape.txt").exists());
    assert!(!harness.dir.path().parent().unwrap().join("escape.txt").exists());
    let first_result = drain_events(&mut progress).into_iter().find_map(|e| match e.kind {
        ProgressKind::ToolResult { success, .. } => Some(success),
        _ => None,
    });
    assert_eq!(first_result, Some(false));
}

#[tokio::test]
async fn test_edit_with_absent_content_leaves_file() {
    let provider = ScriptedProvider::new(vec![
        TurnScript::new()
            .tool("toolu_1", "create_file", json!({"path": "app.js", "content": "let a = 1;"}))
            .build(),
        TurnScript::new()
            .tool(
                "toolu_2",
                "edit_file",
                json!({"path": "app.js", "old_content": "let b = 2;", "new_content": "let b = 3;"}),
            )
            .build(),
        TurnScript::new().text(&["done"]).build(),
    ]);
    let harness = Harness::new(provider, 20);
    let task = task("Edit");
    let mut files = harness.files("demo").await;

    harness.controller.run(&task).await;

    let content = std::fs::read_to_string(harness.dir.path().join("demo/app.js")).unwrap();
    assert_eq!(content, "let a = 1;");
    let mutations = drain_mutations(&mut files);
    assert_eq!(mutations.len(), 1);
    assert_eq!(mutations[0].action, FileAction::Create);
}

#[tokio::test]
async fn test_provider_open_failure_is_task_error() {
    let provider = ScriptedProvider::default().then_open_failure(LlmError::Http {
        status: 529,
        body: "overloaded".into(),
    });
    let harness = Harness::new(provider, 20);
    let task = task("Fail");
    let mut progress = harness.progress(&task.task_id).await;

    let outcome = harness.controller.run(&task).await;

    assert!(!outcome.completed);
    assert_eq!(outcome.iterations, 1);
    assert!(outcome.error.as_deref().unwrap().contains("529"));
    let events = drain_events(&mut progress);
    assert_eq!(
        event_names(&events),
        vec!["task_started", "iteration_start", "task_error"]
    );
}

#[tokio::test]
async fn test_stream_error_event_is_task_error() {
    let provider = ScriptedProvider::default().then_stream_failure(
        vec![StreamEvent::TextDelta {
            index: 0,
            text: "Working".into(),
        }],
        LlmError::Api {
            kind: "overloaded_error".into(),
            message: "Overloaded".into(),
        },
    );
    let harness = Harness::new(provider, 20);
    let task = task("Fail mid-stream");
    let mut progress = harness.progress(&task.task_id).await;

    let outcome = harness.controller.run(&task).await;

    assert!(!outcome.completed);
    assert!(outcome.error.as_deref().unwrap().contains("Overloaded"));
    let names = event_names(&drain_events(&mut progress));
    assert_eq!(names.last(), Some(&"task_error"));
    assert!(names.contains(&"thinking_chunk"));
}

#[tokio::test]
async fn test_truncated_stream_is_task_error() {
    let provider = ScriptedProvider::new(vec![TurnScript::new().text(&["cut off"]).truncated()]);
    let harness = Harness::new(provider, 20);
    let task = task("Truncated");

    let outcome = harness.controller.run(&task).await;

    assert!(!outcome.completed);
    assert!(outcome.error.unwrap().contains("message_stop"));
}

#[tokio::test]
async fn test_invalid_project_id_fails_before_calling_provider() {
    let provider = ScriptedProvider::new(vec![TurnScript::new().text(&["ok"]).build()]);
    let harness = Harness::new(provider, 20);
    let task = Task::new("../outside", "u", "x", AgentType::Code);

    let outcome = harness.controller.run(&task).await;

    assert!(!outcome.completed);
    assert_eq!(outcome.iterations, 0);
    assert!(outcome.error.is_some());
    assert_eq!(harness.provider.calls(), 0);
}

#[tokio::test]
#[ignore = "Requires ANTHROPIC_API_KEY and network access"]
async fn test_live_provider_simple_task() {
    use std::sync::Arc;
    use std::time::Duration;

    use taskforge::agent::{AgentConfig, AgentController};
    use taskforge::llm::AnthropicClient;
    use taskforge::tools::ToolRegistry;
    use taskforge::{InMemoryBroker, ProgressPublisher, Workspace};

    let api_key = std::env::var("ANTHROPIC_API_KEY").expect("ANTHROPIC_API_KEY");
    let dir = tempfile::tempdir().unwrap();
    let controller = AgentController::new(
        Arc::new(AnthropicClient::new(api_key, "claude-sonnet-4-5")),
        Arc::new(ToolRegistry::with_default_tools()),
        Arc::new(Workspace::new(dir.path())),
        ProgressPublisher::new(Arc::new(InMemoryBroker::new())),
        AgentConfig {
            max_iterations: 5,
            system_prompt: None,
            command_timeout: Duration::from_secs(30),
        },
    );

    let outcome = controller
        .run(&task("Create a file hello.txt containing the word hello, then mark the task complete."))
        .await;

    assert!(outcome.completed, "{:?}", outcome);
    assert!(dir.path().join("demo/hello.txt").exists());
}
