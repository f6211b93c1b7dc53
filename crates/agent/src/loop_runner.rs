//! The agent round loop.
//!
//! Each round appends the pending user turn, sanitizes the log, calls
//! the model through the supervisor, and either returns the text answer
//! or executes the requested tools and feeds their results into the next
//! round. Tool handlers run in spawned workers so cancellation and
//! progress forwarding stay responsive.

use crate::approval::{ApprovalGate, Verdict};
use crate::event::AgentEvent;
use crate::session::{RoundPhase, Session};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use windlass_core::{
    ContentBlock, Error, FragmentKind, ProgressSink, Result, TokenTally, ToolError, ToolRegistry,
    sanitize,
};
use windlass_providers::{CallSupervisor, StreamMode};

/// Orchestrates model calls and tool execution for one session at a time.
pub struct AgentLoop {
    supervisor: CallSupervisor,
    tools: Arc<ToolRegistry>,
    gate: ApprovalGate,
    /// Maximum rounds per turn.
    max_rounds: u32,
}

impl AgentLoop {
    pub fn new(supervisor: CallSupervisor, tools: Arc<ToolRegistry>, gate: ApprovalGate) -> Self {
        Self {
            supervisor,
            tools,
            gate,
            max_rounds: 25,
        }
    }

    pub fn with_max_rounds(mut self, max: u32) -> Self {
        self.max_rounds = max;
        self
    }

    /// Cumulative token usage across this loop's upstream calls.
    pub fn tally(&self) -> TokenTally {
        self.supervisor.tally()
    }

    /// Run one full turn: rounds repeat until the model answers without
    /// requesting tools. Returns the final text answer.
    pub async fn run_turn(
        &mut self,
        session: &mut Session,
        user_blocks: Vec<ContentBlock>,
        events: &mpsc::UnboundedSender<AgentEvent>,
    ) -> Result<String> {
        let mut cancel_rx = session.arm_cancel();
        let specs = self.tools.specs();
        let mut pending = user_blocks;
        let mut rounds = 0u32;
        info!(session = %session.id, "Starting turn");

        loop {
            rounds += 1;
            session.log.push_user(pending);
            session.phase = RoundPhase::Idle;
            session.touch();
            // Safe now: no tool executions are in flight.
            session.log = sanitize(&session.log);

            let events_tx = events.clone();
            let mut sink = move |kind: FragmentKind, fragment: &str| {
                let event = match kind {
                    FragmentKind::Text => AgentEvent::Text {
                        text: fragment.to_string(),
                    },
                    FragmentKind::Thinking => AgentEvent::Thinking {
                        text: fragment.to_string(),
                    },
                };
                let _ = events_tx.send(event);
            };
            let reply = self
                .supervisor
                .invoke(&mut session.log, &specs, StreamMode::Streamed, &mut sink)
                .await
                .map_err(Error::from)?;
            session.log.push_model(reply.blocks.clone());
            session.touch();

            let invocations: Vec<(String, String, serde_json::Value)> = reply
                .tool_uses()
                .iter()
                .map(|(id, name, input)| (id.to_string(), name.to_string(), (*input).clone()))
                .collect();

            if invocations.is_empty() {
                session.phase = RoundPhase::Idle;
                let text = reply.text();
                let _ = events.send(AgentEvent::Done {
                    rounds,
                    usage: self.supervisor.tally(),
                });
                info!(session = %session.id, rounds, "Turn complete");
                return Ok(text);
            }

            if rounds >= self.max_rounds {
                warn!(
                    session = %session.id,
                    rounds,
                    "Round limit reached, stopping before tool execution"
                );
                session.phase = RoundPhase::Idle;
                let _ = events.send(AgentEvent::Done {
                    rounds,
                    usage: self.supervisor.tally(),
                });
                return Ok(reply.text());
            }

            session.phase = RoundPhase::AwaitingToolResults;
            let mut results = Vec::with_capacity(invocations.len());
            for (id, name, input) in invocations {
                let _ = events.send(AgentEvent::ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                });

                let block = match self.gate.decide(&id, &name, &input).await {
                    Verdict::Approved => {
                        self.execute_one(&id, &name, &input, events, &mut cancel_rx)
                            .await
                    }
                    Verdict::Rejected { reason } => {
                        let reason = reason.unwrap_or_else(|| "user declined".into());
                        debug!(tool = %name, %reason, "Invocation rejected");
                        ContentBlock::tool_result(
                            &id,
                            format!("Tool execution skipped: {reason}"),
                            true,
                        )
                    }
                };
                if let ContentBlock::ToolResult {
                    content, is_error, ..
                } = &block
                {
                    let _ = events.send(AgentEvent::ToolResult {
                        id: id.clone(),
                        content: content.clone(),
                        is_error: *is_error,
                    });
                }
                results.push(block);
            }
            pending = results;
        }
    }

    /// Run one approved invocation in a worker task, forwarding progress
    /// lines and honoring cancellation.
    async fn execute_one(
        &self,
        id: &str,
        name: &str,
        input: &serde_json::Value,
        events: &mpsc::UnboundedSender<AgentEvent>,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> ContentBlock {
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let registry = Arc::clone(&self.tools);
        let mut task = {
            let id = id.to_string();
            let name = name.to_string();
            let input = input.clone();
            tokio::spawn(async move {
                let progress = ProgressSink::new(progress_tx);
                registry.dispatch(&id, &name, &input, &progress).await
            })
        };

        let mut cancel_open = true;
        loop {
            tokio::select! {
                joined = &mut task => {
                    // Drain progress that raced with completion.
                    while let Ok(line) = progress_rx.try_recv() {
                        let _ = events.send(AgentEvent::ToolProgress {
                            id: id.to_string(),
                            line,
                        });
                    }
                    return joined.unwrap_or_else(|e| {
                        ContentBlock::tool_result(id, format!("Tool task failed: {e}"), true)
                    });
                }
                Some(line) = progress_rx.recv() => {
                    let _ = events.send(AgentEvent::ToolProgress {
                        id: id.to_string(),
                        line,
                    });
                }
                changed = cancel_rx.changed(), if cancel_open => {
                    match changed {
                        Ok(()) if *cancel_rx.borrow_and_update() => {
                            task.abort();
                            warn!(tool = %name, "Tool execution cancelled");
                            return ContentBlock::tool_result(
                                id,
                                ToolError::Cancelled {
                                    tool_name: name.to_string(),
                                }
                                .to_string(),
                                true,
                            );
                        }
                        Ok(()) => {}
                        Err(_) => cancel_open = false,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ApprovalRequest;
    use async_trait::async_trait;
    use std::result::Result;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use windlass_core::{BlockOpen, Delta, StreamEvent, Tool, TurnLog, UpstreamError};
    use windlass_providers::{ModelClient, ModelReply, ModelRequest};

    /// Scripted model: each call pops one reply; recorded requests let
    /// tests inspect what the model actually saw.
    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<Vec<ContentBlock>, UpstreamError>>>,
        seen_logs: Mutex<Vec<TurnLog>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<Vec<ContentBlock>, UpstreamError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen_logs: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _request: ModelRequest<'_>) -> Result<ModelReply, UpstreamError> {
            unimplemented!()
        }

        async fn stream(
            &self,
            request: ModelRequest<'_>,
        ) -> Result<
            mpsc::Receiver<Result<StreamEvent, UpstreamError>>,
            UpstreamError,
        > {
            self.seen_logs.lock().unwrap().push(request.log.clone());
            let blocks = self.replies.lock().unwrap().pop_front().expect("script exhausted")?;

            let (tx, rx) = mpsc::channel(64);
            tx.send(Ok(StreamEvent::MessageStart { input_tokens: 10 }))
                .await
                .unwrap();
            for (index, block) in blocks.into_iter().enumerate() {
                let events = match block {
                    ContentBlock::Text { text } => vec![
                        StreamEvent::BlockStart {
                            index,
                            open: BlockOpen::Text,
                        },
                        StreamEvent::BlockDelta {
                            index,
                            delta: Delta::Text(text),
                        },
                        StreamEvent::BlockStop { index },
                    ],
                    ContentBlock::ToolUse { id, name, input } => vec![
                        StreamEvent::BlockStart {
                            index,
                            open: BlockOpen::ToolUse { id, name },
                        },
                        StreamEvent::BlockDelta {
                            index,
                            delta: Delta::InputJson(input.to_string()),
                        },
                        StreamEvent::BlockStop { index },
                    ],
                    other => panic!("script only supports text/tool_use, got {other:?}"),
                };
                for event in events {
                    tx.send(Ok(event)).await.unwrap();
                }
            }
            tx.send(Ok(StreamEvent::MessageStop { output_tokens: 5 }))
                .await
                .unwrap();
            Ok(rx)
        }
    }

    struct EchoTool {
        executed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes the input"
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        async fn execute(
            &self,
            input: serde_json::Value,
            _progress: &ProgressSink,
        ) -> Result<String, ToolError> {
            self.executed.store(true, Ordering::SeqCst);
            Ok(input["text"].as_str().unwrap_or("").to_string())
        }
    }

    /// Never finishes on its own; only cancellation ends it.
    struct HangTool;

    #[async_trait]
    impl Tool for HangTool {
        fn name(&self) -> &str {
            "hang"
        }
        fn description(&self) -> &str {
            "Waits forever"
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        async fn execute(
            &self,
            _input: serde_json::Value,
            _progress: &ProgressSink,
        ) -> Result<String, ToolError> {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    fn registry_with(tool: Box<dyn Tool>) -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(tool);
        Arc::new(registry)
    }

    fn agent(
        model: Arc<ScriptedModel>,
        tools: Arc<ToolRegistry>,
        gate: ApprovalGate,
    ) -> AgentLoop {
        let supervisor = CallSupervisor::new(model, "test-model", 1024);
        AgentLoop::new(supervisor, tools, gate)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn plain_text_turn() {
        let model = ScriptedModel::new(vec![Ok(vec![ContentBlock::text("hello there")])]);
        let mut agent = agent(model, Arc::new(ToolRegistry::new()), ApprovalGate::Auto);
        let mut session = Session::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let answer = agent
            .run_turn(&mut session, vec![ContentBlock::text("hi")], &tx)
            .await
            .unwrap();
        assert_eq!(answer, "hello there");
        assert_eq!(session.log.len(), 2);
        assert_eq!(session.phase, RoundPhase::Idle);

        let events = drain(&mut rx);
        assert!(matches!(events.last(), Some(AgentEvent::Done { rounds: 1, .. })));
    }

    #[tokio::test]
    async fn tool_round_feeds_result_into_next_call() {
        let model = ScriptedModel::new(vec![
            Ok(vec![
                ContentBlock::text("let me echo that"),
                ContentBlock::tool_use("t1", "echo", json!({"text": "ping"})),
            ]),
            Ok(vec![ContentBlock::text("done")]),
        ]);
        let executed = Arc::new(AtomicBool::new(false));
        let tools = registry_with(Box::new(EchoTool {
            executed: Arc::clone(&executed),
        }));
        let mut agent = agent(Arc::clone(&model), tools, ApprovalGate::Auto);
        let mut session = Session::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let answer = agent
            .run_turn(&mut session, vec![ContentBlock::text("echo ping")], &tx)
            .await
            .unwrap();
        assert_eq!(answer, "done");
        assert!(executed.load(Ordering::SeqCst));

        // user, model(tool_use), user(tool_result), model(text)
        assert_eq!(session.log.len(), 4);
        assert_eq!(
            session.log.turns()[2].blocks,
            vec![ContentBlock::tool_result("t1", "ping", false)]
        );

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(e, AgentEvent::ToolCall { name, .. } if name == "echo")));
        assert!(events.iter().any(
            |e| matches!(e, AgentEvent::ToolResult { content, is_error: false, .. } if content == "ping")
        ));
        assert!(matches!(events.last(), Some(AgentEvent::Done { rounds: 2, .. })));
    }

    #[tokio::test]
    async fn rejected_invocation_never_executes() {
        let model = ScriptedModel::new(vec![
            Ok(vec![ContentBlock::tool_use("t1", "echo", json!({"text": "x"}))]),
            Ok(vec![ContentBlock::text("understood")]),
        ]);
        let executed = Arc::new(AtomicBool::new(false));
        let tools = registry_with(Box::new(EchoTool {
            executed: Arc::clone(&executed),
        }));

        let (approve_tx, mut approve_rx) = mpsc::channel::<ApprovalRequest>(1);
        tokio::spawn(async move {
            while let Some(request) = approve_rx.recv().await {
                let _ = request.respond.send(Verdict::Rejected { reason: None });
            }
        });

        let mut agent = agent(model, tools, ApprovalGate::Interactive(approve_tx));
        let mut session = Session::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let answer = agent
            .run_turn(&mut session, vec![ContentBlock::text("go")], &tx)
            .await
            .unwrap();
        assert_eq!(answer, "understood");
        assert!(!executed.load(Ordering::SeqCst));

        match &session.log.turns()[2].blocks[0] {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                assert_eq!(tool_use_id, "t1");
                assert!(*is_error);
                assert!(content.contains("skipped"));
            }
            other => panic!("Expected tool_result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn orphaned_results_pruned_before_send() {
        let model = ScriptedModel::new(vec![Ok(vec![ContentBlock::text("noted")])]);
        let mut agent = agent(
            Arc::clone(&model),
            Arc::new(ToolRegistry::new()),
            ApprovalGate::Auto,
        );

        let mut session = Session::new();
        session.log.push_user(vec![ContentBlock::text("start")]);
        session
            .log
            .push_model(vec![ContentBlock::tool_use("t1", "echo", json!({}))]);

        agent
            .run_turn(
                &mut session,
                vec![
                    ContentBlock::tool_result("t1", "ok", false),
                    ContentBlock::tool_result("t9", "stale", false),
                ],
                &mpsc::unbounded_channel().0,
            )
            .await
            .unwrap();

        let seen = model.seen_logs.lock().unwrap();
        let sent_blocks = &seen[0].turns()[2].blocks;
        assert_eq!(sent_blocks, &vec![ContentBlock::tool_result("t1", "ok", false)]);
    }

    #[tokio::test]
    async fn cancellation_aborts_running_tool() {
        let model = ScriptedModel::new(vec![
            Ok(vec![ContentBlock::tool_use("t1", "hang", json!({}))]),
            Ok(vec![ContentBlock::text("after cancel")]),
        ]);
        let tools = registry_with(Box::new(HangTool));
        let mut agent = agent(model, tools, ApprovalGate::Auto);
        let mut session = Session::new();

        let handle = session.cancel_handle();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            handle.cancel();
        });

        let (tx, _rx) = mpsc::unbounded_channel();
        let answer = agent
            .run_turn(&mut session, vec![ContentBlock::text("hang")], &tx)
            .await
            .unwrap();
        assert_eq!(answer, "after cancel");

        match &session.log.turns()[2].blocks[0] {
            ContentBlock::ToolResult {
                content, is_error, ..
            } => {
                assert!(*is_error);
                assert!(content.contains("cancelled"));
            }
            other => panic!("Expected tool_result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn round_limit_stops_before_execution() {
        let model = ScriptedModel::new(vec![Ok(vec![
            ContentBlock::text("one more"),
            ContentBlock::tool_use("t1", "echo", json!({"text": "x"})),
        ])]);
        let executed = Arc::new(AtomicBool::new(false));
        let tools = registry_with(Box::new(EchoTool {
            executed: Arc::clone(&executed),
        }));
        let mut agent = agent(model, tools, ApprovalGate::Auto).with_max_rounds(1);
        let mut session = Session::new();

        let answer = agent
            .run_turn(
                &mut session,
                vec![ContentBlock::text("go")],
                &mpsc::unbounded_channel().0,
            )
            .await
            .unwrap();
        assert_eq!(answer, "one more");
        assert!(!executed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn upstream_error_surfaces() {
        let model = ScriptedModel::new(vec![Err(UpstreamError::Auth("bad key".into()))]);
        let mut agent = agent(model, Arc::new(ToolRegistry::new()), ApprovalGate::Auto);
        let mut session = Session::new();

        let err = agent
            .run_turn(
                &mut session,
                vec![ContentBlock::text("hi")],
                &mpsc::unbounded_channel().0,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upstream(UpstreamError::Auth(_))));
        assert!(!session.log.cache_hint());
    }
}
