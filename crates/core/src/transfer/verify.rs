//! Post-transfer consistency checks

use super::task::{TaskKind, TaskStatus, TransferTask};
use crate::error::Error;
use crate::provider::ProviderAdapter;

/// Outcome of verifying one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub ok: bool,
    pub reason: Option<String>,
}

impl VerificationResult {
    pub fn passed() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    pub fn mismatch(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
        }
    }

    /// Demote a succeeded task when verification failed
    pub fn apply(&self, task: &mut TransferTask) {
        if self.ok || task.status != TaskStatus::Succeeded {
            return;
        }
        let reason = self.reason.clone().unwrap_or_default();
        task.fail(&Error::IntegrityMismatch(reason));
    }
}

/// Compare the destination of a succeeded copy with its source descriptor
///
/// Size must match. Checksums are compared only when both sides carry one
/// with the same algorithm; anything else is not an error.
pub async fn verify(destination: &dyn ProviderAdapter, task: &TransferTask) -> VerificationResult {
    if task.kind != TaskKind::Copy || task.status != TaskStatus::Succeeded {
        return VerificationResult::passed();
    }

    let written = match destination.stat(&task.destination).await {
        Ok(info) => info,
        Err(err) => {
            return VerificationResult::mismatch(format!(
                "cannot stat {}: {err}",
                task.destination
            ));
        }
    };

    if written.size != task.source.size {
        return VerificationResult::mismatch(format!(
            "{} has {} bytes, expected {}",
            task.destination, written.size, task.source.size
        ));
    }

    if let (Some(expected), Some(actual)) = (&task.source.checksum, &written.checksum) {
        match expected.matches(actual) {
            Some(false) => {
                return VerificationResult::mismatch(format!(
                    "{} checksum {actual} does not match {expected}",
                    task.destination
                ));
            }
            Some(true) => {}
            None => tracing::debug!(
                destination = %task.destination,
                source_algorithm = %expected.algorithm,
                destination_algorithm = %actual.algorithm,
                "checksums not comparable, size check only"
            ),
        }
    }

    VerificationResult::passed()
}
