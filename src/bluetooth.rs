//! Bluetooth device state machines and adversarial probes
//!
//! [`pairing_machine`] is the minimal discovery/pairing/connection life cycle.
//! [`device_machine`] extends it with the in-connection applications (calls
//! and music) a headset cycles through. Apps always hand back to
//! `connected`; a direct `call_app -> disconnected` drop is deliberately
//! absent so it can be legalized later by the learning loop.

use crate::error::Result;
use crate::state_machine::{StateMachine, StateSpec};

pub const UNKNOWN: &str = "unknown";
pub const DISCOVERY: &str = "discovery";
pub const PAIRING: &str = "pairing";
pub const CONNECTED: &str = "connected";
pub const DISCONNECTED: &str = "disconnected";
pub const CALL_APP: &str = "call_app";
pub const MUSIC_APP: &str = "music_app";

/// Discovery, pairing and connection without applications
pub fn pairing_specs() -> Vec<StateSpec> {
    vec![
        StateSpec::new(UNKNOWN, &[DISCOVERY]),
        StateSpec::new(DISCOVERY, &[UNKNOWN, PAIRING]),
        StateSpec::new(PAIRING, &[CONNECTED, UNKNOWN]),
        StateSpec::new(CONNECTED, &[DISCONNECTED]),
        StateSpec::new(DISCONNECTED, &[CONNECTED, UNKNOWN]),
    ]
}

/// Full headset life cycle including call and music applications
pub fn device_specs() -> Vec<StateSpec> {
    vec![
        StateSpec::new(UNKNOWN, &[DISCOVERY]),
        StateSpec::new(DISCOVERY, &[UNKNOWN, PAIRING]),
        StateSpec::new(PAIRING, &[CONNECTED, UNKNOWN]),
        StateSpec::new(CONNECTED, &[DISCONNECTED, CALL_APP, MUSIC_APP]),
        StateSpec::new(CALL_APP, &[CONNECTED]),
        StateSpec::new(MUSIC_APP, &[CONNECTED]),
        StateSpec::new(DISCONNECTED, &[CONNECTED, UNKNOWN]),
    ]
}

pub fn pairing_machine() -> Result<StateMachine> {
    StateMachine::new(&pairing_specs())
}

pub fn device_machine() -> Result<StateMachine> {
    StateMachine::new(&device_specs())
}

/// A fixed label sequence fed to the detector to check one transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub name: &'static str,
    /// The transition under test, as `(from, to)`
    pub transition: (&'static str, &'static str),
    pub labels: &'static [&'static str],
}

impl Probe {
    /// Newline-separated text accepted by the detector
    pub fn text(&self) -> String {
        self.labels.join("\n")
    }
}

/// A call dropping straight to `disconnected`, plausible but unseen
pub const CALL_DROP_PROBE: Probe = Probe {
    name: "call-drop",
    transition: (CALL_APP, DISCONNECTED),
    labels: &[
        UNKNOWN,
        DISCOVERY,
        PAIRING,
        CONNECTED,
        CALL_APP,
        DISCONNECTED,
        CONNECTED,
        MUSIC_APP,
        CONNECTED,
        DISCONNECTED,
        UNKNOWN,
    ],
};

/// A call jumping back into `discovery`, never legal
pub const CALL_REDISCOVERY_PROBE: Probe = Probe {
    name: "call-rediscovery",
    transition: (CALL_APP, DISCOVERY),
    labels: &[
        UNKNOWN,
        DISCOVERY,
        PAIRING,
        CONNECTED,
        CALL_APP,
        DISCOVERY,
        PAIRING,
        CONNECTED,
        DISCONNECTED,
        UNKNOWN,
    ],
};

pub fn standard_probes() -> Vec<Probe> {
    vec![CALL_DROP_PROBE, CALL_REDISCOVERY_PROBE]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machines_are_valid() {
        assert_eq!(pairing_machine().unwrap().num_states(), 5);
        let device = device_machine().unwrap();
        assert_eq!(device.num_states(), 7);
        assert_eq!(device.state_name(0), UNKNOWN);
    }

    #[test]
    fn test_probe_transitions_are_initially_illegal() {
        let machine = device_machine().unwrap();
        for probe in standard_probes() {
            let (from, to) = probe.transition;
            assert!(!machine.allows(from, to), "{} should be illegal", probe.name);
        }
    }

    #[test]
    fn test_probes_break_only_at_their_transition() {
        let machine = device_machine().unwrap();
        for probe in standard_probes() {
            let illegal: Vec<(&str, &str)> = probe
                .labels
                .windows(2)
                .map(|w| (w[0], w[1]))
                .filter(|&(from, to)| !machine.allows(from, to))
                .collect();
            assert_eq!(illegal, vec![probe.transition], "{}", probe.name);
        }
    }

    #[test]
    fn test_probe_text() {
        let text = CALL_DROP_PROBE.text();
        assert!(text.starts_with("unknown\ndiscovery\n"));
        assert_eq!(text.lines().count(), CALL_DROP_PROBE.labels.len());
    }
}
