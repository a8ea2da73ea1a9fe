//! Workflow FSM tests

use benchctl::update::state::{UpdateFsm, WorkflowEvent, WorkflowState};

#[test]
fn test_fsm_initial_state() {
    let fsm = UpdateFsm::new();
    assert_eq!(fsm.state(), WorkflowState::Idle);
    assert!(fsm.aborted().is_none());
    assert!(!fsm.maintenance_engaged());
    assert_eq!(fsm.history(), &[WorkflowState::Idle]);
}

#[test]
fn test_fsm_full_success_flow() {
    let mut fsm = UpdateFsm::new();

    for state in WorkflowState::range(WorkflowState::Validated, WorkflowState::Done) {
        fsm.process(WorkflowEvent::Completed(state)).unwrap();
        assert_eq!(fsm.state(), state);
    }

    assert!(fsm.is_done());
    assert_eq!(fsm.history(), &WorkflowState::ALL);
}

#[test]
fn test_fsm_rejects_skipped_state() {
    let mut fsm = UpdateFsm::new();
    fsm.process(WorkflowEvent::Completed(WorkflowState::Validated))
        .unwrap();

    // Validated -> BackedUp must pass through MaintenanceOn
    let result = fsm.process(WorkflowEvent::Completed(WorkflowState::BackedUp));
    assert!(result.is_err());
    assert_eq!(fsm.state(), WorkflowState::Validated);
}

#[test]
fn test_fsm_rejects_going_back() {
    let mut fsm = UpdateFsm::resume_from(WorkflowState::Patched);
    assert!(fsm
        .process(WorkflowEvent::Completed(WorkflowState::SourcesUpdated))
        .is_err());
}

#[test]
fn test_fsm_failure_keeps_last_committed_state() {
    let mut fsm = UpdateFsm::new();
    fsm.process(WorkflowEvent::Completed(WorkflowState::Validated))
        .unwrap();
    fsm.process(WorkflowEvent::Completed(WorkflowState::MaintenanceOn))
        .unwrap();

    fsm.process(WorkflowEvent::Failed {
        step: WorkflowState::BackedUp,
        error: "disk full".to_string(),
    })
    .unwrap();

    assert_eq!(fsm.state(), WorkflowState::MaintenanceOn);
    assert_eq!(fsm.aborted(), Some((WorkflowState::BackedUp, "disk full")));
    assert!(fsm.maintenance_engaged());

    // Aborted is terminal
    assert!(fsm
        .process(WorkflowEvent::Completed(WorkflowState::BackedUp))
        .is_err());
}

#[test]
fn test_fsm_failure_after_done_is_rejected() {
    let mut fsm = UpdateFsm::resume_from(WorkflowState::MaintenanceOff);
    fsm.process(WorkflowEvent::Completed(WorkflowState::Done))
        .unwrap();
    assert!(fsm
        .process(WorkflowEvent::Failed {
            step: WorkflowState::Done,
            error: "late".to_string(),
        })
        .is_err());
}

#[test]
fn test_fsm_resume_for_finish_phase() {
    let mut fsm = UpdateFsm::resume_from(WorkflowState::DependenciesInstalled);
    assert!(fsm.maintenance_engaged());
    fsm.process(WorkflowEvent::Completed(WorkflowState::Patched))
        .unwrap();
    assert_eq!(
        fsm.history(),
        &[WorkflowState::DependenciesInstalled, WorkflowState::Patched]
    );
}
