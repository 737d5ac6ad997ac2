use mitto::models::session::RuntimeStatus;

#[test]
fn happy_path_transitions_are_legal() {
    use RuntimeStatus::{Busy, Cancelling, Cold, Ready, Starting};

    assert!(Cold.can_transition_to(Starting));
    assert!(Starting.can_transition_to(Ready));
    assert!(Ready.can_transition_to(Busy));
    assert!(Busy.can_transition_to(Ready));
    assert!(Busy.can_transition_to(Cancelling));
    assert!(Cancelling.can_transition_to(Ready));
}

#[test]
fn any_state_can_transition_to_dead() {
    use RuntimeStatus::{Busy, Cancelling, Cold, Dead, Ready, Starting};

    for state in [Cold, Starting, Ready, Busy, Cancelling, Dead] {
        assert!(state.can_transition_to(Dead), "{state:?} -> Dead should be legal");
    }
}

#[test]
fn skipping_starting_is_illegal() {
    use RuntimeStatus::{Cold, Ready};

    assert!(!Cold.can_transition_to(Ready));
}

#[test]
fn cancelling_cannot_go_straight_to_busy() {
    use RuntimeStatus::{Busy, Cancelling};

    assert!(!Cancelling.can_transition_to(Busy));
}

#[test]
fn ready_cannot_skip_to_cancelling() {
    use RuntimeStatus::{Cancelling, Ready};

    assert!(!Ready.can_transition_to(Cancelling));
}

#[test]
fn dead_is_terminal() {
    use RuntimeStatus::{Dead, Ready, Starting};

    assert!(!Dead.can_transition_to(Ready));
    assert!(!Dead.can_transition_to(Starting));
}
