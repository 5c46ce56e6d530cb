use crate::error::PipelineError;
use crate::types::StageKind;

/// Lifecycle of a single stage run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Initialized,
    PlanCaptured,
    TokenIssued,
    ActionsInvoked,
    DecisionMade,
    Delegated,
    Terminal,
}

impl StageState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::PlanCaptured => "plan_captured",
            Self::TokenIssued => "token_issued",
            Self::ActionsInvoked => "actions_invoked",
            Self::DecisionMade => "decision_made",
            Self::Delegated => "delegated",
            Self::Terminal => "terminal",
        }
    }

    pub fn is_final(self) -> bool {
        matches!(self, Self::Delegated | Self::Terminal)
    }
}

/// Enforces plan -> token -> actions -> decision -> {delegated | terminal}.
///
/// A stage that fails before reaching a decision is closed with
/// [`StageMachine::abort`], which is the only transition allowed to skip.
#[derive(Debug, Clone)]
pub struct StageMachine {
    stage: StageKind,
    state: StageState,
}

impl StageMachine {
    pub fn new(stage: StageKind) -> Self {
        Self {
            stage,
            state: StageState::Initialized,
        }
    }

    pub fn stage(&self) -> StageKind {
        self.stage
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    pub fn mark_plan_captured(&mut self) -> Result<(), PipelineError> {
        self.advance(StageState::Initialized, StageState::PlanCaptured)
    }

    pub fn mark_token_issued(&mut self) -> Result<(), PipelineError> {
        self.advance(StageState::PlanCaptured, StageState::TokenIssued)
    }

    pub fn mark_actions_invoked(&mut self) -> Result<(), PipelineError> {
        self.advance(StageState::TokenIssued, StageState::ActionsInvoked)
    }

    pub fn mark_decision_made(&mut self) -> Result<(), PipelineError> {
        self.advance(StageState::ActionsInvoked, StageState::DecisionMade)
    }

    pub fn mark_delegated(&mut self) -> Result<(), PipelineError> {
        self.advance(StageState::DecisionMade, StageState::Delegated)
    }

    pub fn mark_terminal(&mut self) -> Result<(), PipelineError> {
        self.advance(StageState::DecisionMade, StageState::Terminal)
    }

    /// Close a stage that failed before its decision.
    pub fn abort(&mut self) -> Result<(), PipelineError> {
        if self.state.is_final() {
            return Err(PipelineError::stage_order("non-final state", self.state.name()));
        }
        self.state = StageState::Terminal;
        Ok(())
    }

    fn advance(&mut self, expected: StageState, next: StageState) -> Result<(), PipelineError> {
        if self.state != expected {
            return Err(PipelineError::stage_order(expected.name(), self.state.name()));
        }
        self.state = next;
        Ok(())
    }
}
