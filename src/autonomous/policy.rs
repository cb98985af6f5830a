//! Autonomy policy - which gates may be approved unattended
//!
//! Full autonomy approves auto and review gates; supervised approves only
//! gates explicitly marked auto-eligible; human gates always wait for a
//! person regardless of autonomy level.

use crate::domain::{AutonomyLevel, Execution, ExecutionStatus, GateApprovalType};

/// Whether a gate of the given approval type may be approved unattended
/// at the given autonomy level.
pub fn can_auto_approve(approval: GateApprovalType, autonomy: AutonomyLevel) -> bool {
    match autonomy {
        AutonomyLevel::Full => matches!(
            approval,
            GateApprovalType::Auto | GateApprovalType::Review
        ),
        AutonomyLevel::Supervised => matches!(approval, GateApprovalType::Auto),
        AutonomyLevel::Manual => false,
    }
}

/// Whether the autonomous driver should process an execution at all.
pub fn is_eligible(execution: &Execution) -> bool {
    execution.status == ExecutionStatus::Active && execution.autonomy != AutonomyLevel::Manual
}
