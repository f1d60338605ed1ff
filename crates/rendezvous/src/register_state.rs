// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registration lifecycle.
//!
//! Every registrable relationship (node, topic publisher, topic subscriber, service server,
//! service client) owns one [`RegisterState`]:
//!
//! ```text
//!             to_registering            to_registered
//! Unregistered ------------> Registering ------------> Registered
//!      ^                         |                         |
//!      |      to_unregistered    |                         | to_unregistering
//!      +-------------------------+                         v
//!      +------------------------------------------- Unregistering
//!                 to_unregistered        (to_registered rolls back)
//! ```
//!
//! A transition from a state that does not permit it fails with [`Error::InvalidState`] and
//! leaves the state unchanged. Each accepted transition records the caller's source location.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::Location;
use tracing::trace;

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum State {
    #[default]
    Unregistered,
    Registering,
    Registered,
    Unregistering,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unregistered => "Unregistered",
            Self::Registering => "Registering",
            Self::Registered => "Registered",
            Self::Unregistering => "Unregistering",
        };
        f.write_str(name)
    }
}

/// State machine with call-site tracking.
#[derive(Debug, Clone)]
pub struct RegisterState {
    state: State,
    site: &'static Location<'static>,
}

impl Default for RegisterState {
    #[track_caller]
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterState {
    #[track_caller]
    pub fn new() -> Self {
        Self {
            state: State::Unregistered,
            site: Location::caller(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Where the last accepted transition was requested.
    pub fn site(&self) -> &'static Location<'static> {
        self.site
    }

    pub fn is_unregistered(&self) -> bool {
        self.state == State::Unregistered
    }

    pub fn is_registering(&self) -> bool {
        self.state == State::Registering
    }

    pub fn is_registered(&self) -> bool {
        self.state == State::Registered
    }

    pub fn is_unregistering(&self) -> bool {
        self.state == State::Unregistering
    }

    /// `Registering` or `Unregistering`.
    pub fn is_transitioning(&self) -> bool {
        matches!(self.state, State::Registering | State::Unregistering)
    }

    #[track_caller]
    pub fn to_registering(&mut self) -> Result<()> {
        self.transition(&[State::Unregistered], State::Registering)
    }

    /// Success of a register, or rollback of a failed unregister.
    #[track_caller]
    pub fn to_registered(&mut self) -> Result<()> {
        self.transition(&[State::Registering, State::Unregistering], State::Registered)
    }

    #[track_caller]
    pub fn to_unregistering(&mut self) -> Result<()> {
        self.transition(&[State::Registered], State::Unregistering)
    }

    /// Success of an unregister, or rollback of a failed register.
    #[track_caller]
    pub fn to_unregistered(&mut self) -> Result<()> {
        self.transition(&[State::Registering, State::Unregistering], State::Unregistered)
    }

    /// Error describing an attempt made from the current state.
    #[track_caller]
    pub fn invalid_state_error(&self) -> Error {
        Error::InvalidState {
            state: self.state,
            site: Location::caller().to_string(),
        }
    }

    #[track_caller]
    fn transition(&mut self, from: &[State], to: State) -> Result<()> {
        if !from.contains(&self.state) {
            return Err(self.invalid_state_error());
        }
        let site = Location::caller();
        trace!(from = %self.state, to = %to, %site, "register state transition");
        self.state = to;
        self.site = site;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Transition = fn(&mut RegisterState) -> Result<()>;

    const TRANSITIONS: [(&str, Transition, &[State], State); 4] = [
        (
            "to_registering",
            RegisterState::to_registering,
            &[State::Unregistered],
            State::Registering,
        ),
        (
            "to_registered",
            RegisterState::to_registered,
            &[State::Registering, State::Unregistering],
            State::Registered,
        ),
        (
            "to_unregistering",
            RegisterState::to_unregistering,
            &[State::Registered],
            State::Unregistering,
        ),
        (
            "to_unregistered",
            RegisterState::to_unregistered,
            &[State::Registering, State::Unregistering],
            State::Unregistered,
        ),
    ];

    const ALL_STATES: [State; 4] = [
        State::Unregistered,
        State::Registering,
        State::Registered,
        State::Unregistering,
    ];

    fn in_state(state: State) -> RegisterState {
        let mut rs = RegisterState::new();
        rs.state = state;
        rs
    }

    #[test]
    fn test_every_transition_from_every_state() {
        for (name, transition, allowed, target) in TRANSITIONS {
            for from in ALL_STATES {
                let mut rs = in_state(from);
                let result = transition(&mut rs);
                if allowed.contains(&from) {
                    assert!(result.is_ok(), "{} from {} should succeed", name, from);
                    assert_eq!(rs.state(), target);
                } else {
                    match result {
                        Err(Error::InvalidState { state, .. }) => assert_eq!(state, from),
                        other => panic!("{} from {}: unexpected {:?}", name, from, other),
                    }
                    assert_eq!(rs.state(), from, "{} must not move state", name);
                }
            }
        }
    }

    #[test]
    fn test_rejection_is_idempotent() {
        let mut rs = in_state(State::Registering);
        for _ in 0..3 {
            assert!(rs.to_registering().is_err());
            assert!(rs.is_registering());
        }
    }

    #[test]
    fn test_full_cycle_records_call_sites() {
        let mut rs = RegisterState::new();
        rs.to_registering().unwrap();
        let registering_site = rs.site();
        rs.to_registered().unwrap();
        assert_ne!(rs.site().line(), registering_site.line());
        rs.to_unregistering().unwrap();
        rs.to_unregistered().unwrap();
        assert!(rs.is_unregistered());
        assert!(rs.site().file().ends_with("register_state.rs"));
    }

    #[test]
    fn test_invalid_state_error_points_at_caller() {
        let rs = RegisterState::new();
        let line = line!() + 1;
        let err = rs.invalid_state_error();
        match err {
            Error::InvalidState { state, site } => {
                assert_eq!(state, State::Unregistered);
                assert!(site.contains(&format!(":{}:", line)), "site was {}", site);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
