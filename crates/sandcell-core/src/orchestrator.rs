//! Task orchestrator
//!
//! Classify, then block, ask for approval, or run in a fresh cell.

use crate::config::{ConfigError, SandcellConfig};
use crate::error::OrchestratorError;
use crate::result::{ApprovalGrant, TaskResult};
use sandcell_cell::IsolatedExecutionCell;
use sandcell_classifier::{RiskClassifier, RiskTier, RiskVerdict};
use sandcell_types::{InputArtifact, ProgramText};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Entry point for untrusted programs
///
/// Holds no per-task state; concurrent calls share only the classifier and
/// a bound on how many cells exist at once. A permit is held until the cell
/// is removed, including removals that finish after the caller gave up.
#[derive(Debug, Clone)]
pub struct TaskOrchestrator {
    classifier: Arc<RiskClassifier>,
    cell: IsolatedExecutionCell,
    permits: Arc<Semaphore>,
    max_concurrent_cells: usize,
}

impl TaskOrchestrator {
    /// Wire up an existing classifier and cell
    ///
    /// # Errors
    /// Returns [`OrchestratorError::Config`] if `max_concurrent_cells` is zero
    /// or the classifier and cell disagree on the sandbox roots
    pub fn new(
        classifier: Arc<RiskClassifier>,
        cell: IsolatedExecutionCell,
        max_concurrent_cells: usize,
    ) -> Result<Self, OrchestratorError> {
        if max_concurrent_cells == 0 {
            return Err(ConfigError::Invalid("max_concurrent_cells must be greater than zero".into()).into());
        }
        if classifier.roots() != cell.roots() {
            return Err(ConfigError::Invalid(format!(
                "classifier roots {:?} differ from cell roots {:?}",
                classifier.roots(),
                cell.roots()
            ))
            .into());
        }
        Ok(Self {
            classifier,
            cell,
            permits: Arc::new(Semaphore::new(max_concurrent_cells)),
            max_concurrent_cells,
        })
    }

    /// Build the classifier and a Docker-backed cell from configuration
    ///
    /// # Errors
    /// Returns [`OrchestratorError::Config`] for invalid configuration or
    /// [`OrchestratorError::Environment`] if Docker or the image is missing
    pub async fn from_config(config: SandcellConfig) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let classifier = RiskClassifier::new(&config.classifier, config.roots.clone())?;
        let cell = IsolatedExecutionCell::docker(config.cell, config.roots).await?;
        tracing::info!(
            image = %cell.config().image,
            max_concurrent_cells = config.max_concurrent_cells,
            "orchestrator ready"
        );
        Self::new(Arc::new(classifier), cell, config.max_concurrent_cells)
    }

    /// The classifier
    #[must_use]
    pub fn classifier(&self) -> &RiskClassifier {
        &self.classifier
    }

    /// The execution cell
    #[must_use]
    pub fn cell(&self) -> &IsolatedExecutionCell {
        &self.cell
    }

    /// Configured concurrency bound
    #[must_use]
    pub fn max_concurrent_cells(&self) -> usize {
        self.max_concurrent_cells
    }

    /// Cells that could start right now
    #[must_use]
    pub fn available_cells(&self) -> usize {
        self.permits.available_permits()
    }

    /// Classify `program` and act on the verdict
    ///
    /// HIGH is [`TaskResult::Blocked`], MEDIUM is [`TaskResult::NeedsApproval`]
    /// and never runs, LOW runs and is [`TaskResult::Completed`].
    ///
    /// # Errors
    /// Returns an error for duplicate input names or if no cell can be
    /// allocated
    #[tracing::instrument(skip_all, fields(digest = %program.digest().short(), inputs = inputs.len()))]
    pub async fn execute(
        &self,
        program: ProgramText,
        inputs: Vec<InputArtifact>,
    ) -> Result<TaskResult, OrchestratorError> {
        check_unique(&inputs)?;
        let verdict = self.classify(&program).await?;

        match verdict.risk_tier() {
            RiskTier::High => Ok(blocked(&verdict)),
            RiskTier::Medium => {
                tracing::info!(flagged = ?verdict.flagged_imports(), "awaiting approval");
                let grant = ApprovalGrant::for_program(&program, verdict.flagged_imports().clone());
                Ok(TaskResult::NeedsApproval {
                    rationale: verdict.rationale().unwrap_or_default().to_string(),
                    flagged_imports: verdict.flagged_imports().clone(),
                    allowed_imports: verdict.allowed_imports().clone(),
                    code_preview: program.as_str().to_string(),
                    diagnostics: verdict.diagnostics().to_vec(),
                    grant,
                })
            }
            RiskTier::Low => self.run(&program, &inputs).await,
        }
    }

    /// Run a program a reviewer approved
    ///
    /// The grant must be for exactly this program text. The program is
    /// classified again, and HIGH is still blocked.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::ApprovalMismatch`] for a grant issued for
    /// other text, plus everything [`execute`](Self::execute) returns
    #[tracing::instrument(skip_all, fields(digest = %program.digest().short(), inputs = inputs.len()))]
    pub async fn execute_approved(
        &self,
        program: ProgramText,
        inputs: Vec<InputArtifact>,
        grant: &ApprovalGrant,
    ) -> Result<TaskResult, OrchestratorError> {
        if !grant.covers(&program) {
            tracing::warn!(granted = %grant.digest().short(), "approval grant does not match program");
            return Err(OrchestratorError::ApprovalMismatch {
                granted: grant.digest(),
                submitted: program.digest(),
            });
        }
        check_unique(&inputs)?;
        let verdict = self.classify(&program).await?;

        if verdict.risk_tier() == RiskTier::High {
            return Ok(blocked(&verdict));
        }
        tracing::info!(approved = ?grant.flagged_imports(), "running approved program");
        self.run(&program, &inputs).await
    }

    async fn classify(&self, program: &ProgramText) -> Result<RiskVerdict, OrchestratorError> {
        let classifier = Arc::clone(&self.classifier);
        let program = program.clone();
        tokio::task::spawn_blocking(move || classifier.classify(&program))
            .await
            .map_err(|e| OrchestratorError::Classification(e.to_string()))
    }

    async fn run(
        &self,
        program: &ProgramText,
        inputs: &[InputArtifact],
    ) -> Result<TaskResult, OrchestratorError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| OrchestratorError::Closed)?;
        let outcome = self.cell.run_with_permit(program, inputs, permit).await?;
        Ok(TaskResult::Completed { outcome })
    }
}

fn blocked(verdict: &RiskVerdict) -> TaskResult {
    tracing::warn!(flagged = ?verdict.flagged_imports(), "program blocked");
    TaskResult::Blocked {
        rationale: verdict.rationale().unwrap_or_default().to_string(),
        flagged_imports: verdict.flagged_imports().clone(),
    }
}

fn check_unique(inputs: &[InputArtifact]) -> Result<(), OrchestratorError> {
    let mut seen = BTreeSet::new();
    for input in inputs {
        if !seen.insert(input.name.as_str()) {
            return Err(OrchestratorError::DuplicateArtifact(input.name.to_string()));
        }
    }
    Ok(())
}
