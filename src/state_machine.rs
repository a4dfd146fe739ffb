//! Finite-state-machine log generator
//!
//! Simulates a population of independent entities, each performing a
//! uniformly random walk over a shared transition table. Because the grammar
//! of the produced stream is known exactly, generated logs serve as labeled
//! "normal" data for training and as ground truth when checking the
//! detector's false-positive behavior.
//!
//! # Example
//! ```
//! use vigia::state_machine::{LogGenerator, StateMachine};
//!
//! let machine = StateMachine::from_table(&[
//!     ("idle", &["busy"]),
//!     ("busy", &["idle", "busy"]),
//! ])
//! .unwrap();
//! let mut generator = LogGenerator::new(machine, 2, 7).unwrap();
//!
//! let events = generator.generate(10);
//! assert_eq!(events.len(), 12); // 2 priming events + 10 steps
//! ```

use crate::error::{Result, VigiaError};
use fnv::FnvHashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// One state and its allowed successors, as written in configuration files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSpec {
    pub name: String,
    #[serde(default)]
    pub next: Vec<String>,
    /// Intentionally terminal states may have no successors
    #[serde(default)]
    pub terminal: bool,
}

impl StateSpec {
    pub fn new(name: impl Into<String>, next: &[&str]) -> Self {
        Self {
            name: name.into(),
            next: next.iter().map(|s| s.to_string()).collect(),
            terminal: false,
        }
    }
}

/// Validated transition table
///
/// The first declared state is the initial state of every entity.
#[derive(Debug, Clone)]
pub struct StateMachine {
    names: Vec<String>,
    successors: Vec<Vec<usize>>,
    terminal: Vec<bool>,
    index: FnvHashMap<String, usize>,
}

impl StateMachine {
    /// Build a machine from state specs, rejecting dangling targets,
    /// duplicate names, and non-terminal states without successors.
    pub fn new(specs: &[StateSpec]) -> Result<Self> {
        if specs.is_empty() {
            return Err(VigiaError::EmptyStateMachine);
        }

        let mut index = FnvHashMap::default();
        for (i, spec) in specs.iter().enumerate() {
            if index.insert(spec.name.clone(), i).is_some() {
                return Err(VigiaError::DuplicateState(spec.name.clone()));
            }
        }

        let mut successors = Vec::with_capacity(specs.len());
        for spec in specs {
            let mut targets: Vec<usize> = Vec::with_capacity(spec.next.len());
            for target in &spec.next {
                let idx = *index.get(target).ok_or_else(|| VigiaError::UnknownState {
                    state: target.clone(),
                    referenced_by: spec.name.clone(),
                })?;
                if !targets.contains(&idx) {
                    targets.push(idx);
                }
            }
            if targets.is_empty() && !spec.terminal {
                return Err(VigiaError::DeadlockState(spec.name.clone()));
            }
            successors.push(targets);
        }

        Ok(Self {
            names: specs.iter().map(|s| s.name.clone()).collect(),
            successors,
            terminal: specs.iter().map(|s| s.terminal).collect(),
            index,
        })
    }

    /// Convenience constructor from a static `(state, successors)` table
    pub fn from_table(table: &[(&str, &[&str])]) -> Result<Self> {
        let specs: Vec<StateSpec> = table
            .iter()
            .map(|(name, next)| StateSpec::new(*name, next))
            .collect();
        Self::new(&specs)
    }

    pub fn num_states(&self) -> usize {
        self.names.len()
    }

    pub fn state_names(&self) -> &[String] {
        &self.names
    }

    pub fn state_name(&self, idx: usize) -> &str {
        &self.names[idx]
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Successor indices of a state, in declaration order
    pub fn successors(&self, idx: usize) -> &[usize] {
        &self.successors[idx]
    }

    pub fn is_terminal(&self, idx: usize) -> bool {
        self.successors[idx].is_empty()
    }

    /// Whether `from -> to` is a legal transition
    pub fn allows(&self, from: &str, to: &str) -> bool {
        match (self.index_of(from), self.index_of(to)) {
            (Some(f), Some(t)) => self.successors[f].contains(&t),
            _ => false,
        }
    }

    /// Widen the table with `from -> to`
    ///
    /// Returns `false` when the transition was already legal.
    pub fn add_transition(&mut self, from: &str, to: &str) -> Result<bool> {
        let f = self.index_of(from).ok_or_else(|| VigiaError::UnknownState {
            state: from.to_string(),
            referenced_by: format!("{}->{}", from, to),
        })?;
        let t = self.index_of(to).ok_or_else(|| VigiaError::UnknownState {
            state: to.to_string(),
            referenced_by: format!("{}->{}", from, to),
        })?;

        if self.successors[f].contains(&t) {
            return Ok(false);
        }
        self.successors[f].push(t);
        Ok(true)
    }

    /// Export back to specs (for configuration round trips)
    pub fn to_specs(&self) -> Vec<StateSpec> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, name)| StateSpec {
                name: name.clone(),
                next: self.successors[i]
                    .iter()
                    .map(|&t| self.names[t].clone())
                    .collect(),
                terminal: self.terminal[i],
            })
            .collect()
    }
}

/// How an event is rendered as a corpus record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelFormat {
    /// Bare state name, e.g. `connected`
    #[default]
    State,
    /// Entity-qualified, e.g. `3-connected`
    Qualified,
}

/// A simulated entity and its current state index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub id: usize,
    pub state: usize,
}

/// One emitted transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub entity_id: usize,
    pub state: String,
}

impl Event {
    pub fn label(&self, format: LabelFormat) -> String {
        match format {
            LabelFormat::State => self.state.clone(),
            LabelFormat::Qualified => format!("{}-{}", self.entity_id, self.state),
        }
    }
}

/// Join events into newline-separated corpus text
pub fn render_corpus(events: &[Event], format: LabelFormat) -> String {
    events
        .iter()
        .map(|e| e.label(format))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Interleaves random walks of several entities over one state machine
///
/// Entity states persist between calls, so consecutive `generate` calls
/// continue the same timelines. Not safe to share between concurrent
/// producers.
#[derive(Debug)]
pub struct LogGenerator {
    machine: StateMachine,
    entities: Vec<Entity>,
    rng: StdRng,
}

impl LogGenerator {
    pub fn new(machine: StateMachine, entity_count: usize, seed: u64) -> Result<Self> {
        if entity_count == 0 {
            return Err(VigiaError::NoEntities);
        }

        let entities = (0..entity_count).map(|id| Entity { id, state: 0 }).collect();

        Ok(Self {
            machine,
            entities,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Widen the transition table without resetting entity states
    pub fn legalize(&mut self, from: &str, to: &str) -> Result<bool> {
        self.machine.add_transition(from, to)
    }

    /// Advance one randomly chosen entity by one random legal transition
    ///
    /// Returns `None` only when every entity is parked in a terminal state.
    pub fn step(&mut self) -> Option<Event> {
        let movable: Vec<usize> = (0..self.entities.len())
            .filter(|&i| !self.machine.is_terminal(self.entities[i].state))
            .collect();
        if movable.is_empty() {
            return None;
        }

        let which = movable[self.rng.gen_range(0..movable.len())];
        let entity = &mut self.entities[which];
        let choices = self.machine.successors(entity.state);
        entity.state = choices[self.rng.gen_range(0..choices.len())];

        Some(Event {
            entity_id: entity.id,
            state: self.machine.state_name(entity.state).to_string(),
        })
    }

    /// Priming prefix of every entity's current state, then `count` steps
    pub fn generate(&mut self, count: usize) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .entities
            .iter()
            .map(|e| Event {
                entity_id: e.id,
                state: self.machine.state_name(e.state).to_string(),
            })
            .collect();
        events.reserve(count);

        for _ in 0..count {
            match self.step() {
                Some(event) => events.push(event),
                None => {
                    tracing::debug!(
                        emitted = events.len(),
                        "All entities parked in terminal states, stopping generation"
                    );
                    break;
                }
            }
        }

        events
    }
}
