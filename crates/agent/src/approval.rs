//! Approval gate: user confirmation before tool execution.
//!
//! The gate decides *before* a handler runs. A rejection never reaches
//! the handler; the loop synthesizes an error result so the model learns
//! the invocation was skipped.

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// The caller's decision on one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Approved,
    Rejected { reason: Option<String> },
}

/// A pending confirmation, sent to whoever answers prompts.
#[derive(Debug)]
pub struct ApprovalRequest {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
    /// Send the verdict here. Dropping it counts as a rejection.
    pub respond: oneshot::Sender<Verdict>,
}

/// How tool invocations get confirmed.
pub enum ApprovalGate {
    /// Approve everything without asking.
    Auto,
    /// Forward each invocation to an interactive approver.
    Interactive(mpsc::Sender<ApprovalRequest>),
}

impl ApprovalGate {
    pub async fn decide(&self, id: &str, name: &str, input: &serde_json::Value) -> Verdict {
        match self {
            Self::Auto => Verdict::Approved,
            Self::Interactive(tx) => {
                let (respond, verdict_rx) = oneshot::channel();
                let request = ApprovalRequest {
                    id: id.to_string(),
                    name: name.to_string(),
                    input: input.clone(),
                    respond,
                };
                if tx.send(request).await.is_err() {
                    debug!(tool = name, "Approver gone, rejecting invocation");
                    return Verdict::Rejected {
                        reason: Some("approval channel closed".into()),
                    };
                }
                verdict_rx.await.unwrap_or(Verdict::Rejected {
                    reason: Some("approver went away".into()),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn auto_gate_approves() {
        let gate = ApprovalGate::Auto;
        let verdict = gate.decide("t1", "shell", &serde_json::json!({})).await;
        assert_eq!(verdict, Verdict::Approved);
    }

    #[tokio::test]
    async fn interactive_gate_forwards_and_waits() {
        let (tx, mut rx) = mpsc::channel(1);
        let gate = ApprovalGate::Interactive(tx);

        let approver = tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            assert_eq!(request.name, "shell");
            request
                .respond
                .send(Verdict::Rejected {
                    reason: Some("too risky".into()),
                })
                .unwrap();
        });

        let verdict = gate
            .decide("t1", "shell", &serde_json::json!({"command": "rm -rf /"}))
            .await;
        assert_eq!(
            verdict,
            Verdict::Rejected {
                reason: Some("too risky".into())
            }
        );
        approver.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_responder_is_rejection() {
        let (tx, mut rx) = mpsc::channel(1);
        let gate = ApprovalGate::Interactive(tx);

        let approver = tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            drop(request.respond);
        });

        let verdict = gate.decide("t1", "shell", &serde_json::json!({})).await;
        assert!(matches!(verdict, Verdict::Rejected { .. }));
        approver.await.unwrap();
    }

    #[tokio::test]
    async fn closed_channel_is_rejection() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let gate = ApprovalGate::Interactive(tx);
        let verdict = gate.decide("t1", "shell", &serde_json::json!({})).await;
        assert!(matches!(verdict, Verdict::Rejected { .. }));
    }
}
