//! `windlass chat` - interactive or single-message agent mode.
//!
//! Streams response text as it arrives, prompts for tool approval unless
//! auto-confirm is on, and saves the conversation on exit.

use anyhow::{Context, bail};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use windlass_agent::{
    AgentEvent, AgentLoop, ApprovalGate, ApprovalRequest, Session, Verdict,
};
use windlass_config::AppConfig;
use windlass_core::{ContentBlock, ToolRegistry};
use windlass_providers::{AnthropicClient, CallSupervisor, RetryPolicy};
use windlass_tools::{EditFileDiffTool, OverwriteFileTool, PathPolicy, ShellTool};

pub async fn run(
    message: Option<String>,
    auto_confirm: bool,
    resume: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;

    let Some(api_key) = config.api_key.clone() else {
        bail!(
            "No API key configured. Set WINDLASS_API_KEY or ANTHROPIC_API_KEY, \
             or add api_key to {}",
            AppConfig::config_dir().join("config.toml").display()
        );
    };

    let client = Arc::new(AnthropicClient::new(api_key));
    let mut supervisor = CallSupervisor::new(client, config.model.clone(), config.max_tokens)
        .with_thinking_budget(config.thinking_budget)
        .with_retry(RetryPolicy {
            enabled: config.retry.enabled,
            max_attempts: config.retry.max_attempts,
            base_delay: config.retry.base_delay(),
            max_delay: config.retry.max_delay(),
        });
    if let Some(prompt) = config.resolve_system_prompt()? {
        supervisor = supervisor.with_system(prompt);
    }

    let policy = PathPolicy::new(
        config.shell.allowed_roots.clone(),
        config.shell.forbidden_paths.clone(),
    );
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(ShellTool::new(
        config.shell.allowed_commands.clone(),
        config.shell.timeout_secs,
    )));
    registry.register(Box::new(OverwriteFileTool::new(policy.clone())));
    registry.register(Box::new(EditFileDiffTool::new(policy)));
    let tools = Arc::new(registry);

    let auto = auto_confirm || config.auto_confirm;
    let (approval_tx, mut approval_rx) = mpsc::channel(1);
    let gate = if auto {
        ApprovalGate::Auto
    } else {
        ApprovalGate::Interactive(approval_tx)
    };
    let mut agent = AgentLoop::new(supervisor, tools, gate);

    let mut session = match &resume {
        Some(path) => Session::load(path)
            .await
            .with_context(|| format!("Failed to load snapshot {}", path.display()))?,
        None => Session::new(),
    };

    if let Some(text) = message {
        // Single message mode
        drive_turn(&mut agent, &mut session, text, &mut approval_rx).await?;
    } else {
        println!();
        println!("  Windlass - interactive agent mode");
        println!();
        println!("  Model:    {}", config.model);
        println!("  Tools:    shell, overwrite_file, edit_file_diff");
        println!("  Approval: {}", if auto { "automatic" } else { "prompt" });
        if resume.is_some() {
            println!("  Resumed:  {} turns", session.log.len());
        }
        println!();
        println!("  Type your message and press Enter.");
        println!("  Type 'exit' or 'quit' to leave. Ctrl+C interrupts a running tool.");
        println!();

        loop {
            let Some(line) = read_user_line("  you > ").await else {
                break;
            };
            let text = line.trim().to_string();
            if text.is_empty() {
                continue;
            }
            if text == "exit" || text == "quit" {
                break;
            }

            if let Err(e) = drive_turn(&mut agent, &mut session, text, &mut approval_rx).await {
                eprintln!("  [error] {e}");
            }
            println!();
        }
    }

    if config.session.save_on_exit && !session.log.is_empty() {
        match session.save(&config.snapshot_dir()).await {
            Ok(path) => println!("  Conversation saved to {}", path.display()),
            Err(e) => eprintln!("  [error] Failed to save conversation: {e}"),
        }
    }

    Ok(())
}

/// Run one turn while rendering agent events and answering approval
/// prompts. Ctrl+C cancels in-flight tool executions, not the turn.
async fn drive_turn(
    agent: &mut AgentLoop,
    session: &mut Session,
    text: String,
    approvals: &mut mpsc::Receiver<ApprovalRequest>,
) -> windlass_core::Result<String> {
    let cancel = session.cancel_handle();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut printer = EventPrinter::default();

    let result = {
        let mut turn = Box::pin(agent.run_turn(
            session,
            vec![ContentBlock::text(text)],
            &events_tx,
        ));
        loop {
            tokio::select! {
                result = &mut turn => break result,
                Some(event) = events_rx.recv() => printer.render(&event),
                Some(request) = approvals.recv() => answer_approval(request).await,
                _ = tokio::signal::ctrl_c() => {
                    eprintln!();
                    eprintln!("  Interrupting tool execution");
                    cancel.cancel();
                }
            }
        }
    };

    // Events that raced with completion.
    while let Ok(event) = events_rx.try_recv() {
        printer.render(&event);
    }
    printer.finish();
    result
}

/// Streams text fragments inline and keeps tool chatter on its own lines.
#[derive(Default)]
struct EventPrinter {
    mid_text: bool,
}

impl EventPrinter {
    fn render(&mut self, event: &AgentEvent) {
        match event {
            AgentEvent::Text { text } => {
                print!("{text}");
                let _ = std::io::stdout().flush();
                self.mid_text = true;
            }
            AgentEvent::Thinking { text } => {
                eprint!("{text}");
                let _ = std::io::stderr().flush();
            }
            AgentEvent::ToolCall { name, input, .. } => {
                self.break_line();
                println!("  [{name}] {}", summarize_input(name, input));
            }
            AgentEvent::ToolProgress { line, .. } => {
                self.break_line();
                println!("  | {line}");
            }
            AgentEvent::ToolResult {
                content, is_error, ..
            } => {
                self.break_line();
                if *is_error {
                    println!("  [tool error] {}", first_line(content));
                }
            }
            AgentEvent::Done { rounds, usage } => {
                self.break_line();
                debug!(
                    rounds,
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "Turn finished"
                );
            }
        }
    }

    fn break_line(&mut self) {
        if self.mid_text {
            println!();
            self.mid_text = false;
        }
    }

    fn finish(&mut self) {
        self.break_line();
    }
}

fn summarize_input(name: &str, input: &serde_json::Value) -> String {
    match name {
        "shell" => format!("$ {}", input["command"].as_str().unwrap_or("?")),
        "overwrite_file" | "edit_file_diff" => {
            input["file_path"].as_str().unwrap_or("?").to_string()
        }
        _ => input.to_string(),
    }
}

fn first_line(content: &str) -> &str {
    content.lines().next().unwrap_or("")
}

/// Show the pending invocation and block on a y/N answer.
async fn answer_approval(request: ApprovalRequest) {
    println!();
    println!("  Tool approval needed: {}", request.name);
    match request.name.as_str() {
        "shell" => {
            println!("    $ {}", request.input["command"].as_str().unwrap_or("?"));
        }
        "edit_file_diff" => {
            println!(
                "    file: {}",
                request.input["file_path"].as_str().unwrap_or("?")
            );
            for line in request.input["diff"].as_str().unwrap_or("").lines() {
                println!("    {line}");
            }
        }
        "overwrite_file" => {
            let content = request.input["content"].as_str().unwrap_or("");
            println!(
                "    file: {} ({} bytes)",
                request.input["file_path"].as_str().unwrap_or("?"),
                content.len()
            );
        }
        _ => println!("    {}", request.input),
    }
    print!("  Approve? [y/N] ");
    let _ = std::io::stdout().flush();

    let line = tokio::task::spawn_blocking(|| {
        let mut buf = String::new();
        std::io::stdin().read_line(&mut buf).map(|_| buf)
    })
    .await;

    let approved = matches!(
        &line,
        Ok(Ok(answer)) if matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    );
    let verdict = if approved {
        Verdict::Approved
    } else {
        Verdict::Rejected {
            reason: Some("user declined at the prompt".into()),
        }
    };
    let _ = request.respond.send(verdict);
}

/// Prompt and read one line of user input. `None` on EOF.
async fn read_user_line(prompt: &str) -> Option<String> {
    print!("{prompt}");
    let _ = std::io::stdout().flush();
    tokio::task::spawn_blocking(|| {
        let mut buf = String::new();
        match std::io::stdin().read_line(&mut buf) {
            Ok(0) => None,
            Ok(_) => Some(buf),
            Err(_) => None,
        }
    })
    .await
    .ok()
    .flatten()
}
