//! The capture state machine: one state value and one transition function.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum CaptureState {
    #[default]
    Stopped,
    Active,
    Idle,
    Locked,
    Asleep,
}

impl CaptureState {
    /// Idle, locked and asleep: recording is paused and no session is open.
    pub fn is_paused(self) -> bool {
        matches!(self, CaptureState::Idle | CaptureState::Locked | CaptureState::Asleep)
    }
}

/// Everything that can move the recorder between states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Signal {
    Start,
    Stop,
    /// The foreground application changed.
    AppChanged,
    /// Keyboard/mouse activity.
    UserInput,
    /// No input for longer than the idle threshold.
    IdleTimeout,
    ScreenLocked,
    ScreenUnlocked,
    SystemSleep,
    SystemWake,
    /// Reduced-power mode toggled; only affects the sampling cadence.
    ReducedPower(bool),
}

/// Parses the one-word line protocol a platform helper writes on stdin.
/// `start` and `stop` are owned by the agent and aren't accepted here.
impl FromStr for Signal {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        match line.trim() {
            "app-changed" => Ok(Signal::AppChanged),
            "input" => Ok(Signal::UserInput),
            "idle" => Ok(Signal::IdleTimeout),
            "lock" => Ok(Signal::ScreenLocked),
            "unlock" => Ok(Signal::ScreenUnlocked),
            "sleep" => Ok(Signal::SystemSleep),
            "wake" => Ok(Signal::SystemWake),
            "power-low" => Ok(Signal::ReducedPower(true)),
            "power-normal" => Ok(Signal::ReducedPower(false)),
            other => Err(format!("unknown signal {other:?}")),
        }
    }
}

/// What the recorder has to do as a consequence of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Nothing,
    /// Sample now and open a session for whatever is in front.
    OpenFresh,
    /// Sample now; the open session may or may not end.
    Resample,
    /// Close the open session and do not open another.
    FinalizeOpen,
}

/// Applies `signal` to `state`. Every (state, signal) pair is spelled out.
pub fn transition(state: CaptureState, signal: Signal) -> (CaptureState, Action) {
    use Action::*;
    use CaptureState::*;
    use Signal::*;

    match (state, signal) {
        (_, ReducedPower(_)) => (state, Nothing),

        (Stopped, Start) => (Active, OpenFresh),
        (Stopped, Stop) => (Stopped, Nothing),
        (
            Stopped,
            AppChanged | UserInput | IdleTimeout | ScreenLocked | ScreenUnlocked | SystemSleep
            | SystemWake,
        ) => (Stopped, Nothing),

        (Active, Start) => (Active, Nothing),
        (Active, Stop) => (Stopped, FinalizeOpen),
        (Active, AppChanged) => (Active, Resample),
        (Active, UserInput) => (Active, Nothing),
        (Active, IdleTimeout) => (Idle, FinalizeOpen),
        (Active, ScreenLocked) => (Locked, FinalizeOpen),
        (Active, ScreenUnlocked) => (Active, Nothing),
        (Active, SystemSleep) => (Asleep, FinalizeOpen),
        (Active, SystemWake) => (Active, Nothing),

        (Idle, Start) => (Idle, Nothing),
        (Idle, Stop) => (Stopped, Nothing),
        (Idle, AppChanged | UserInput | ScreenUnlocked) => (Active, OpenFresh),
        (Idle, IdleTimeout | SystemWake) => (Idle, Nothing),
        (Idle, ScreenLocked) => (Locked, Nothing),
        (Idle, SystemSleep) => (Asleep, Nothing),

        (Locked, Start) => (Locked, Nothing),
        (Locked, Stop) => (Stopped, Nothing),
        (Locked, AppChanged | UserInput | ScreenUnlocked) => (Active, OpenFresh),
        (Locked, IdleTimeout | ScreenLocked | SystemWake) => (Locked, Nothing),
        (Locked, SystemSleep) => (Asleep, Nothing),

        (Asleep, Start) => (Asleep, Nothing),
        (Asleep, Stop) => (Stopped, Nothing),
        (Asleep, AppChanged | UserInput | ScreenUnlocked | SystemWake) => (Active, OpenFresh),
        (Asleep, IdleTimeout | SystemSleep) => (Asleep, Nothing),
        (Asleep, ScreenLocked) => (Locked, Nothing),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_helper_lines() {
        assert_eq!("lock\n".parse::<Signal>(), Ok(Signal::ScreenLocked));
        assert_eq!(" input ".parse::<Signal>(), Ok(Signal::UserInput));
        assert_eq!("power-low".parse::<Signal>(), Ok(Signal::ReducedPower(true)));
        assert!("start".parse::<Signal>().is_err());
        assert!("".parse::<Signal>().is_err());
    }

    const ALL_STATES: [CaptureState; 5] = [
        CaptureState::Stopped,
        CaptureState::Active,
        CaptureState::Idle,
        CaptureState::Locked,
        CaptureState::Asleep,
    ];

    const ALL_SIGNALS: [Signal; 11] = [
        Signal::Start,
        Signal::Stop,
        Signal::AppChanged,
        Signal::UserInput,
        Signal::IdleTimeout,
        Signal::ScreenLocked,
        Signal::ScreenUnlocked,
        Signal::SystemSleep,
        Signal::SystemWake,
        Signal::ReducedPower(true),
        Signal::ReducedPower(false),
    ];

    #[test]
    fn start_and_stop() {
        assert_eq!(
            transition(CaptureState::Stopped, Signal::Start),
            (CaptureState::Active, Action::OpenFresh)
        );
        for state in ALL_STATES {
            let (next, _) = transition(state, Signal::Stop);
            assert_eq!(next, CaptureState::Stopped);
        }
        assert_eq!(
            transition(CaptureState::Active, Signal::Stop),
            (CaptureState::Stopped, Action::FinalizeOpen)
        );
    }

    #[test]
    fn pausing_finalizes_without_reopening() {
        for signal in [Signal::IdleTimeout, Signal::ScreenLocked, Signal::SystemSleep] {
            let (next, action) = transition(CaptureState::Active, signal);
            assert!(next.is_paused());
            assert_eq!(action, Action::FinalizeOpen);
        }
    }

    #[test]
    fn resuming_opens_exactly_one_session() {
        let resumes = [
            (CaptureState::Idle, Signal::UserInput),
            (CaptureState::Locked, Signal::ScreenUnlocked),
            (CaptureState::Asleep, Signal::SystemWake),
            (CaptureState::Idle, Signal::AppChanged),
            (CaptureState::Locked, Signal::AppChanged),
            (CaptureState::Asleep, Signal::AppChanged),
        ];
        for (state, signal) in resumes {
            assert_eq!(
                transition(state, signal),
                (CaptureState::Active, Action::OpenFresh),
                "{state:?} + {signal:?}"
            );
        }
    }

    #[test]
    fn stopped_ignores_everything_but_start() {
        for signal in ALL_SIGNALS {
            if signal == Signal::Start {
                continue;
            }
            assert_eq!(
                transition(CaptureState::Stopped, signal),
                (CaptureState::Stopped, Action::Nothing)
            );
        }
    }

    #[test]
    fn only_active_finalizes_or_resamples() {
        for state in ALL_STATES {
            for signal in ALL_SIGNALS {
                let (next, action) = transition(state, signal);
                match action {
                    Action::FinalizeOpen | Action::Resample => {
                        assert_eq!(state, CaptureState::Active, "{state:?} + {signal:?}")
                    }
                    Action::OpenFresh => assert_eq!(next, CaptureState::Active),
                    Action::Nothing => {}
                }
            }
        }
    }

    #[test]
    fn power_signals_never_change_state() {
        for state in ALL_STATES {
            assert_eq!(
                transition(state, Signal::ReducedPower(true)),
                (state, Action::Nothing)
            );
        }
    }
}
