//! Teardown phase machine
//!
//! Tracks where a teardown is using the state-machines crate in dynamic
//! dispatch mode, so an out-of-order step surfaces as an error instead of a
//! silently skipped phase.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use state_machines::state_machine;

state_machine! {
    name: TeardownMachine,
    dynamic: true,
    initial: Start,
    states: [
        Start,
        KillProcesses,
        ReapNestedJails,
        ReapInterfaces,
        EnumerateMounts,
        UnmountOutside,
        AttachToJail,
        SecondPassUnmount,
        DestroyVmmDevices,
        Done
    ],
    events {
        kill {
            transition: { from: Start, to: KillProcesses }
        }
        reap {
            transition: { from: KillProcesses, to: ReapNestedJails }
        }
        detach {
            transition: { from: ReapNestedJails, to: ReapInterfaces }
        }
        enumerate {
            transition: { from: [ReapNestedJails, ReapInterfaces], to: EnumerateMounts }
        }
        unmount {
            transition: { from: EnumerateMounts, to: UnmountOutside }
        }
        attach {
            transition: { from: UnmountOutside, to: AttachToJail }
        }
        probe {
            transition: { from: AttachToJail, to: SecondPassUnmount }
        }
        scrub {
            transition: { from: SecondPassUnmount, to: DestroyVmmDevices }
        }
        finish {
            transition: { from: [UnmountOutside, SecondPassUnmount, DestroyVmmDevices], to: Done }
        }
    }
}

/// Simple phase enum for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Start,
    KillProcesses,
    ReapNestedJails,
    ReapInterfaces,
    EnumerateMounts,
    UnmountOutside,
    AttachToJail,
    SecondPassUnmount,
    DestroyVmmDevices,
    Done,
}

impl Phase {
    /// Parse phase from its state name
    pub fn from_state(s: &str) -> Option<Self> {
        match s {
            "Start" => Some(Phase::Start),
            "KillProcesses" => Some(Phase::KillProcesses),
            "ReapNestedJails" => Some(Phase::ReapNestedJails),
            "ReapInterfaces" => Some(Phase::ReapInterfaces),
            "EnumerateMounts" => Some(Phase::EnumerateMounts),
            "UnmountOutside" => Some(Phase::UnmountOutside),
            "AttachToJail" => Some(Phase::AttachToJail),
            "SecondPassUnmount" => Some(Phase::SecondPassUnmount),
            "DestroyVmmDevices" => Some(Phase::DestroyVmmDevices),
            "Done" => Some(Phase::Done),
            _ => None,
        }
    }
}

/// Phase tracker for a single teardown
pub struct TeardownPhase {
    machine: DynamicTeardownMachine<()>,
}

impl TeardownPhase {
    pub fn new() -> Self {
        Self {
            machine: TeardownMachine::new(()).into_dynamic(),
        }
    }

    pub fn current(&self) -> Phase {
        // Every state name is covered by from_state
        Phase::from_state(self.machine.current_state()).unwrap_or(Phase::Start)
    }

    /// Move to the next phase
    pub fn advance(&mut self, event: TeardownMachineEvent) -> crate::error::Result<Phase> {
        let from = self.machine.current_state().to_string();
        self.machine
            .handle(event)
            .map_err(|e| Error::PhaseTransition(format!("from {}: {:?}", from, e)))?;
        Ok(self.current())
    }
}

impl Default for TeardownPhase {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let machine = TeardownMachine::new(()).into_dynamic();
        assert_eq!(machine.current_state(), "Start");
    }

    #[test]
    fn test_cheap_path() {
        let mut phase = TeardownPhase::new();
        phase.advance(TeardownMachineEvent::Kill).unwrap();
        phase.advance(TeardownMachineEvent::Reap).unwrap();
        phase.advance(TeardownMachineEvent::Enumerate).unwrap();
        phase.advance(TeardownMachineEvent::Unmount).unwrap();
        assert_eq!(
            phase.advance(TeardownMachineEvent::Finish).unwrap(),
            Phase::Done
        );
    }

    #[test]
    fn test_full_path() {
        let mut phase = TeardownPhase::new();
        for event in [
            TeardownMachineEvent::Kill,
            TeardownMachineEvent::Reap,
            TeardownMachineEvent::Detach,
            TeardownMachineEvent::Enumerate,
            TeardownMachineEvent::Unmount,
            TeardownMachineEvent::Attach,
            TeardownMachineEvent::Probe,
        ] {
            phase.advance(event).unwrap();
        }
        assert_eq!(phase.current(), Phase::SecondPassUnmount);

        phase.advance(TeardownMachineEvent::Scrub).unwrap();
        assert_eq!(phase.current(), Phase::DestroyVmmDevices);
        phase.advance(TeardownMachineEvent::Finish).unwrap();
        assert_eq!(phase.current(), Phase::Done);
    }

    #[test]
    fn test_cannot_attach_before_unmounting() {
        let mut phase = TeardownPhase::new();
        phase.advance(TeardownMachineEvent::Kill).unwrap();
        assert!(matches!(
            phase.advance(TeardownMachineEvent::Attach),
            Err(Error::PhaseTransition(_))
        ));
        assert_eq!(phase.current(), Phase::KillProcesses);
    }

    #[test]
    fn test_phase_names_round_trip() {
        assert_eq!(Phase::from_state("AttachToJail"), Some(Phase::AttachToJail));
        assert_eq!(Phase::from_state("Sinking"), None);
    }
}
