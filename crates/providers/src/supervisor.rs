//! Call supervisor: retry, cache hinting, and token accounting around
//! every upstream call.
//!
//! Only rate limiting and server-side failures are retried; auth errors,
//! malformed responses, and interrupted streams surface immediately. The
//! ephemeral cache hint is attached to the turn log before each send and
//! cleared on every exit path, success or failure.

use crate::assembler::assemble;
use crate::client::{ModelClient, ModelReply, ModelRequest};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use windlass_core::{FragmentKind, TokenTally, TokenUsage, ToolSpec, TurnLog, UpstreamError};

/// Display callback for streamed fragments.
pub type FragmentSink<'a> = &'a mut (dyn FnMut(FragmentKind, &str) + Send);

/// Whether a supervised call consumes the event stream or waits for the
/// complete response. Retry, cache hinting, and token accounting apply
/// either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    /// Consume the event stream, forwarding fragments as they arrive.
    #[default]
    Streamed,
    /// Wait for the whole reply; the fragment sink is never called.
    Buffered,
}

/// Retry behavior for transient upstream failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub enabled: bool,
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt `attempt`
    /// (zero-based). Doubles each time, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Owns one model client plus the per-session call settings.
pub struct CallSupervisor {
    client: Arc<dyn ModelClient>,
    model: String,
    system: Option<String>,
    max_tokens: u32,
    thinking_budget: Option<u32>,
    retry: RetryPolicy,
    tally: TokenTally,
}

impl CallSupervisor {
    pub fn new(client: Arc<dyn ModelClient>, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            client,
            model: model.into(),
            system: None,
            max_tokens,
            thinking_budget: None,
            retry: RetryPolicy::default(),
            tally: TokenTally::default(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Enable extended thinking with the given token budget. A budget of
    /// zero disables it.
    pub fn with_thinking_budget(mut self, budget: u32) -> Self {
        self.thinking_budget = (budget > 0).then_some(budget);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Cumulative token usage across every successful call.
    pub fn tally(&self) -> TokenTally {
        self.tally
    }

    /// Run one supervised upstream call over the given log.
    ///
    /// In streamed mode, text and thinking fragments are forwarded to
    /// `sink` as they arrive, which means a retried attempt may replay
    /// fragments the caller already displayed. In buffered mode the call
    /// waits for the complete reply and `sink` is never invoked.
    pub async fn invoke(
        &mut self,
        log: &mut TurnLog,
        tools: &[ToolSpec],
        mode: StreamMode,
        sink: FragmentSink<'_>,
    ) -> Result<ModelReply, UpstreamError> {
        log.set_cache_hint();
        let result = self.invoke_with_retry(log, tools, mode, sink).await;
        log.clear_cache_hint();

        if let Ok(reply) = &result {
            self.tally.add(reply.usage);
            debug!(
                input_tokens = reply.usage.input_tokens,
                output_tokens = reply.usage.output_tokens,
                total = self.tally.total(),
                "Upstream call complete"
            );
        }
        result
    }

    async fn invoke_with_retry(
        &self,
        log: &TurnLog,
        tools: &[ToolSpec],
        mode: StreamMode,
        sink: FragmentSink<'_>,
    ) -> Result<ModelReply, UpstreamError> {
        let mut attempt = 0u32;
        loop {
            let request = ModelRequest {
                model: &self.model,
                system: self.system.as_deref(),
                log,
                tools,
                max_tokens: self.max_tokens,
                thinking_budget: self.thinking_budget,
            };

            let outcome = match mode {
                StreamMode::Streamed => match self.client.stream(request).await {
                    Ok(rx) => assemble(rx, &mut *sink).await.map(|assembled| ModelReply {
                        blocks: assembled.blocks,
                        usage: TokenUsage {
                            input_tokens: assembled.input_tokens,
                            output_tokens: assembled.output_tokens,
                        },
                        stop_reason: assembled.stop_reason,
                    }),
                    Err(e) => Err(e),
                },
                StreamMode::Buffered => self.client.complete(request).await,
            };

            match outcome {
                Ok(reply) => return Ok(reply),
                Err(e)
                    if self.retry.enabled
                        && e.is_transient()
                        && attempt + 1 < self.retry.max_attempts =>
                {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient upstream failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
