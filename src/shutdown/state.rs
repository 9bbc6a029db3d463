use tokio::time::{Duration, Instant};

/// Where the double-press confirmation currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    Idle,
    ArmedOnce { deadline: Instant },
    Terminated,
}

/// What an input did to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Armed,
    Disarmed,
    Terminate,
    Unchanged,
}

/// Double-press confirmation: a first press arms, a second press within
/// `window` terminates, anything else (or the window running out)
/// disarms.
#[derive(Debug, Clone)]
pub struct Confirmation {
    state: ExitState,
    window: Duration,
}

impl Confirmation {
    pub fn new(window: Duration) -> Self {
        Self {
            state: ExitState::Idle,
            window,
        }
    }

    pub fn state(&self) -> ExitState {
        self.state
    }

    /// Pending reset deadline, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            ExitState::ArmedOnce { deadline } => Some(deadline),
            _ => None,
        }
    }

    pub fn on_confirm(&mut self, now: Instant) -> Transition {
        match self.state {
            ExitState::Terminated => Transition::Unchanged,
            ExitState::ArmedOnce { deadline } if now < deadline => {
                self.state = ExitState::Terminated;
                Transition::Terminate
            }
            // Idle, or armed but the window already ran out
            _ => {
                self.state = ExitState::ArmedOnce {
                    deadline: now + self.window,
                };
                Transition::Armed
            }
        }
    }

    pub fn on_other(&mut self) -> Transition {
        match self.state {
            ExitState::ArmedOnce { .. } => {
                self.state = ExitState::Idle;
                Transition::Disarmed
            }
            _ => Transition::Unchanged,
        }
    }

    pub fn on_timeout(&mut self, now: Instant) -> Transition {
        match self.state {
            ExitState::ArmedOnce { deadline } if now >= deadline => {
                self.state = ExitState::Idle;
                Transition::Disarmed
            }
            _ => Transition::Unchanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(1);

    #[test]
    fn test_starts_idle() {
        let machine = Confirmation::new(WINDOW);
        assert_eq!(machine.state(), ExitState::Idle);
        assert!(machine.deadline().is_none());
    }

    #[test]
    fn test_two_presses_within_window_terminate() {
        let mut machine = Confirmation::new(WINDOW);
        let t0 = Instant::now();

        assert_eq!(machine.on_confirm(t0), Transition::Armed);
        assert_eq!(machine.deadline(), Some(t0 + WINDOW));
        assert_eq!(
            machine.on_confirm(t0 + Duration::from_millis(300)),
            Transition::Terminate
        );
        assert_eq!(machine.state(), ExitState::Terminated);
    }

    #[test]
    fn test_other_key_disarms() {
        let mut machine = Confirmation::new(WINDOW);
        let t0 = Instant::now();

        machine.on_confirm(t0);
        assert_eq!(machine.on_other(), Transition::Disarmed);
        assert_eq!(machine.state(), ExitState::Idle);

        // Next press only arms again
        assert_eq!(
            machine.on_confirm(t0 + Duration::from_millis(100)),
            Transition::Armed
        );
    }

    #[test]
    fn test_other_key_while_idle_is_ignored() {
        let mut machine = Confirmation::new(WINDOW);
        assert_eq!(machine.on_other(), Transition::Unchanged);
        assert_eq!(machine.state(), ExitState::Idle);
    }

    #[test]
    fn test_timeout_disarms() {
        let mut machine = Confirmation::new(WINDOW);
        let t0 = Instant::now();

        machine.on_confirm(t0);
        assert_eq!(
            machine.on_timeout(t0 + Duration::from_millis(500)),
            Transition::Unchanged
        );
        assert_eq!(machine.on_timeout(t0 + WINDOW), Transition::Disarmed);
        assert_eq!(machine.state(), ExitState::Idle);
    }

    #[test]
    fn test_late_second_press_rearms() {
        let mut machine = Confirmation::new(WINDOW);
        let t0 = Instant::now();

        machine.on_confirm(t0);
        // Timer branch has not fired yet, but the window is over
        let late = t0 + WINDOW + Duration::from_millis(1);
        assert_eq!(machine.on_confirm(late), Transition::Armed);
        assert_eq!(machine.deadline(), Some(late + WINDOW));
    }

    #[test]
    fn test_terminated_is_final() {
        let mut machine = Confirmation::new(WINDOW);
        let t0 = Instant::now();

        machine.on_confirm(t0);
        machine.on_confirm(t0);
        assert_eq!(machine.on_confirm(t0), Transition::Unchanged);
        assert_eq!(machine.on_other(), Transition::Unchanged);
        assert_eq!(machine.on_timeout(t0 + WINDOW * 2), Transition::Unchanged);
        assert_eq!(machine.state(), ExitState::Terminated);
    }
}
