/// AMI Session State Machine - Stateright Model
/// Checks that two concurrent callers sharing one session never have more
/// than one command on the wire, and only ever on a logged-in session.
///
/// Run with: cargo test --release ami_model -- --nocapture

use stateright::*;

use super::client::SessionState;

pub const CALLERS: usize = 2;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum CallerState {
    Idle,
    Waiting,
    InFlight,
    Done,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum AmiAction {
    Request(usize),
    Lock(usize),
    Connect,
    LoginOk,
    LoginFail,
    Send,
    Reply,
    IoError,
    GiveUp,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct SessionModel {
    pub session: SessionState,
    pub lock: Option<usize>,
    pub callers: [CallerState; CALLERS],
    pub connects: u8,
}

impl SessionModel {
    fn holder(&self) -> Option<(usize, CallerState)> {
        self.lock.map(|i| (i, self.callers[i]))
    }

    fn release(&mut self) {
        if let Some(i) = self.lock.take() {
            self.callers[i] = CallerState::Done;
        }
    }
}

#[derive(Clone)]
pub struct AmiSessionChecker {
    pub max_connects: u8,
}

impl Default for AmiSessionChecker {
    fn default() -> Self {
        Self { max_connects: 3 }
    }
}

impl Model for AmiSessionChecker {
    type State = SessionModel;
    type Action = AmiAction;

    fn init_states(&self) -> Vec<Self::State> {
        vec![SessionModel {
            session: SessionState::Disconnected,
            lock: None,
            callers: [CallerState::Idle; CALLERS],
            connects: 0,
        }]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        for (i, caller) in state.callers.iter().enumerate() {
            match caller {
                CallerState::Idle => actions.push(AmiAction::Request(i)),
                CallerState::Waiting if state.lock.is_none() => actions.push(AmiAction::Lock(i)),
                _ => {}
            }
        }

        let Some((_, caller)) = state.holder() else {
            return;
        };

        match (state.session, caller) {
            (SessionState::Disconnected, CallerState::Waiting) => {
                if state.connects < self.max_connects {
                    actions.push(AmiAction::Connect);
                } else {
                    actions.push(AmiAction::GiveUp);
                }
            }
            (SessionState::Connecting, _) => {
                actions.push(AmiAction::LoginOk);
                actions.push(AmiAction::LoginFail);
            }
            (SessionState::Ready, CallerState::Waiting) => actions.push(AmiAction::Send),
            (SessionState::Ready, CallerState::InFlight) => {
                actions.push(AmiAction::Reply);
                actions.push(AmiAction::IoError);
            }
            _ => {}
        }
    }

    fn next_state(&self, state: &Self::State, action: Self::Action) -> Option<Self::State> {
        let mut next = state.clone();

        match action {
            AmiAction::Request(i) => next.callers[i] = CallerState::Waiting,
            AmiAction::Lock(i) => next.lock = Some(i),
            AmiAction::Connect => {
                next.session = SessionState::Connecting;
                next.connects += 1;
            }
            AmiAction::LoginOk => next.session = SessionState::Ready,
            AmiAction::LoginFail => {
                // Soft error to the caller, session stays down
                next.session = SessionState::Disconnected;
                next.release();
            }
            AmiAction::Send => {
                if let Some(i) = state.lock {
                    next.callers[i] = CallerState::InFlight;
                }
            }
            AmiAction::Reply => next.release(),
            AmiAction::IoError => {
                next.session = SessionState::Disconnected;
                next.release();
            }
            AmiAction::GiveUp => next.release(),
        }

        Some(next)
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            // Safety: never two commands on the wire
            Property::always("single_in_flight", |_, state: &SessionModel| {
                state
                    .callers
                    .iter()
                    .filter(|c| **c == CallerState::InFlight)
                    .count()
                    <= 1
            }),
            // Safety: commands only travel over a logged-in session
            Property::always("in_flight_only_when_ready", |_, state: &SessionModel| {
                !state.callers.contains(&CallerState::InFlight)
                    || state.session == SessionState::Ready
            }),
            // Safety: the caller on the wire holds the session lock
            Property::always("in_flight_holds_lock", |_, state: &SessionModel| {
                state
                    .callers
                    .iter()
                    .enumerate()
                    .all(|(i, c)| *c != CallerState::InFlight || state.lock == Some(i))
            }),
            // Liveness: every caller gets an answer, reply or soft error
            Property::eventually("all_callers_finish", |_, state: &SessionModel| {
                state.callers.iter().all(|c| *c == CallerState::Done)
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stateright::Checker;

    #[test]
    fn ami_model_check_properties() {
        let checker = AmiSessionChecker::default().checker().spawn_bfs().join();
        println!("States explored: {}", checker.unique_state_count());
        checker.assert_properties();
    }

    #[test]
    fn ami_model_explores_interleavings() {
        let checker = AmiSessionChecker::default().checker().spawn_bfs().join();
        assert!(
            checker.unique_state_count() > 20,
            "Expected more than 20 states, got {}",
            checker.unique_state_count()
        );
    }

    #[test]
    fn ami_model_reconnect_after_io_error() {
        let model = AmiSessionChecker::default();
        let mut state = model.init_states()[0].clone();

        for action in [
            AmiAction::Request(0),
            AmiAction::Request(1),
            AmiAction::Lock(0),
            AmiAction::Connect,
            AmiAction::LoginOk,
            AmiAction::Send,
        ] {
            state = model.next_state(&state, action).unwrap();
        }
        assert_eq!(state.callers[0], CallerState::InFlight);
        assert_eq!(state.session, SessionState::Ready);

        // Second caller cannot take the lock while the first is on the wire
        let mut actions = Vec::new();
        model.actions(&state, &mut actions);
        assert!(!actions.contains(&AmiAction::Lock(1)));

        state = model.next_state(&state, AmiAction::IoError).unwrap();
        assert_eq!(state.session, SessionState::Disconnected);
        assert_eq!(state.callers[0], CallerState::Done);
        assert_eq!(state.lock, None);

        // Next caller logs in again lazily
        state = model.next_state(&state, AmiAction::Lock(1)).unwrap();
        let mut actions = Vec::new();
        model.actions(&state, &mut actions);
        assert_eq!(actions, vec![AmiAction::Connect]);
        state = model.next_state(&state, AmiAction::Connect).unwrap();
        assert_eq!(state.connects, 2);
    }

    #[test]
    fn ami_model_gives_up_after_connect_budget() {
        let model = AmiSessionChecker { max_connects: 1 };
        let mut state = model.init_states()[0].clone();
        for action in [
            AmiAction::Request(0),
            AmiAction::Lock(0),
            AmiAction::Connect,
            AmiAction::LoginFail,
        ] {
            state = model.next_state(&state, action).unwrap();
        }
        assert_eq!(state.callers[0], CallerState::Done);

        state = model.next_state(&state, AmiAction::Request(1)).unwrap();
        state = model.next_state(&state, AmiAction::Lock(1)).unwrap();
        let mut actions = Vec::new();
        model.actions(&state, &mut actions);
        assert_eq!(actions, vec![AmiAction::GiveUp]);
    }
}
