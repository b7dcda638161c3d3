//! Diagnostic session state machine.
//!
//! The session never talks to the knowledge base itself. `handle` applies an
//! event and returns the repository call to perform as an [`Effect`]; the
//! caller runs it and feeds the answer back as [`Event::Fetched`] tagged with
//! the generation it was issued under. Replies from an older generation
//! (anything issued before the latest `Initialize`/`Reset`) are discarded.

use std::fmt;

use serde::Serialize;

use crate::error::{SessionError, TransportError};
use crate::policy::{ChildrenStep, Outcome, TraversalPolicy};
use crate::repository::{Query, Reply, Request};
use crate::symptoms::{CropId, Disease, Symptom, SymptomId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Waiting for the level-1 symptom set
    Loading,
    AwaitingAnswer,
    /// A symptom was answered "yes" and awaits confirmation
    AwaitingConfirmation,
    /// A confirmation is being resolved against the knowledge base
    Resolving,
    Resolved,
    /// No diagnosis and nothing left to ask
    Exhausted,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Loading => "loading",
            SessionState::AwaitingAnswer => "awaiting_answer",
            SessionState::AwaitingConfirmation => "awaiting_confirmation",
            SessionState::Resolving => "resolving",
            SessionState::Resolved => "resolved",
            SessionState::Exhausted => "exhausted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Resolved | SessionState::Exhausted)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Initialize,
    SelectYes(SymptomId),
    /// "No" answer: filters the candidate out, nothing else
    Reject(SymptomId),
    CancelConfirmation,
    Confirm,
    Reset,
    Fetched {
        generation: u64,
        reply: Result<Reply, TransportError>,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Initialize => "initialize",
            Event::SelectYes(_) => "select_yes",
            Event::Reject(_) => "reject",
            Event::CancelConfirmation => "cancel_confirmation",
            Event::Confirm => "confirm",
            Event::Reset => "reset",
            Event::Fetched { .. } => "fetched",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    None,
    Fetch(Request),
    /// Reply from a superseded generation, dropped without effect
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InFlight {
    Loading,
    Children,
    Resolving,
}

/// Read-only view handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub crop_id: CropId,
    pub generation: u64,
    pub state: SessionState,
    pub current_level: u32,
    pub candidates: Vec<Symptom>,
    pub history: Vec<Symptom>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<Symptom>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<Disease>,
}

#[derive(Debug, Clone)]
pub struct DiagnosticSession {
    crop_id: CropId,
    policy: TraversalPolicy,
    generation: u64,
    current_level: u32,
    candidates: Vec<Symptom>,
    history: Vec<Symptom>,
    pending: Option<Symptom>,
    diagnosis: Option<Disease>,
    in_flight: Option<InFlight>,
    loaded: bool,
}

impl DiagnosticSession {
    pub fn new(crop_id: CropId, policy: TraversalPolicy) -> Self {
        Self {
            crop_id,
            policy,
            generation: 0,
            current_level: 1,
            candidates: Vec::new(),
            history: Vec::new(),
            pending: None,
            diagnosis: None,
            in_flight: None,
            loaded: false,
        }
    }

    pub fn crop_id(&self) -> CropId {
        self.crop_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn current_level(&self) -> u32 {
        self.current_level
    }

    pub fn candidates(&self) -> &[Symptom] {
        &self.candidates
    }

    pub fn history(&self) -> &[Symptom] {
        &self.history
    }

    pub fn pending(&self) -> Option<&Symptom> {
        self.pending.as_ref()
    }

    pub fn diagnosis(&self) -> Option<&Disease> {
        self.diagnosis.as_ref()
    }

    /// A repository call is outstanding; only `Reset` and its reply are accepted.
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn state(&self) -> SessionState {
        match self.in_flight {
            Some(InFlight::Loading) => return SessionState::Loading,
            Some(InFlight::Children | InFlight::Resolving) => return SessionState::Resolving,
            None => {}
        }
        if !self.loaded {
            SessionState::Loading
        } else if self.diagnosis.is_some() {
            SessionState::Resolved
        } else if self.pending.is_some() {
            SessionState::AwaitingConfirmation
        } else if !self.candidates.is_empty() {
            SessionState::AwaitingAnswer
        } else {
            SessionState::Exhausted
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            crop_id: self.crop_id,
            generation: self.generation,
            state: self.state(),
            current_level: self.current_level,
            candidates: self.candidates.clone(),
            history: self.history.clone(),
            pending: self.pending.clone(),
            diagnosis: self.diagnosis.clone(),
        }
    }

    /// Apply one event. On a transport failure the revert has already been
    /// applied when the error is returned. Contract violations leave the
    /// session untouched.
    pub fn handle(&mut self, event: Event) -> Result<Effect, SessionError> {
        let operation = event.name();
        let result = match event {
            Event::Initialize => self.initialize(),
            Event::SelectYes(sid) => self.select_yes(&sid),
            Event::Reject(sid) => self.reject(&sid),
            Event::CancelConfirmation => self.cancel_confirmation(),
            Event::Confirm => self.confirm(),
            Event::Reset => Ok(self.reset()),
            Event::Fetched { generation, reply } => self.fetched(generation, reply),
        };

        match &result {
            Ok(effect) => tracing::debug!(
                crop = %self.crop_id,
                generation = self.generation,
                operation,
                state = %self.state(),
                level = self.current_level,
                effect = ?effect,
                "session transition"
            ),
            Err(SessionError::Transport(err)) => tracing::warn!(
                crop = %self.crop_id,
                generation = self.generation,
                state = %self.state(),
                error = %err,
                "knowledge base call failed, session reverted"
            ),
            Err(err) => tracing::error!(
                crop = %self.crop_id,
                operation,
                error = %err,
                "rejected session operation"
            ),
        }

        result
    }

    fn invalid(&self, operation: &'static str) -> SessionError {
        SessionError::InvalidState {
            operation,
            state: self.state(),
        }
    }

    fn begin(&mut self, in_flight: InFlight, query: Query) -> Effect {
        self.in_flight = Some(in_flight);
        Effect::Fetch(Request {
            generation: self.generation,
            query,
        })
    }

    fn level_one(&self) -> Query {
        Query::SymptomsAtLevel {
            crop: self.crop_id,
            level: 1,
        }
    }

    fn initialize(&mut self) -> Result<Effect, SessionError> {
        if self.is_busy() || self.loaded {
            return Err(self.invalid("initialize"));
        }
        self.generation += 1;
        let query = self.level_one();
        Ok(self.begin(InFlight::Loading, query))
    }

    fn reset(&mut self) -> Effect {
        self.generation += 1;
        self.current_level = 1;
        self.candidates.clear();
        self.history.clear();
        self.pending = None;
        self.diagnosis = None;
        self.loaded = false;
        let query = self.level_one();
        self.begin(InFlight::Loading, query)
    }

    fn select_yes(&mut self, sid: &SymptomId) -> Result<Effect, SessionError> {
        if self.state() != SessionState::AwaitingAnswer {
            return Err(self.invalid("select_yes"));
        }
        let symptom = self
            .candidates
            .iter()
            .find(|candidate| &candidate.sid == sid)
            .cloned()
            .ok_or_else(|| SessionError::UnknownSymptom(sid.clone()))?;
        self.pending = Some(symptom);
        Ok(Effect::None)
    }

    fn reject(&mut self, sid: &SymptomId) -> Result<Effect, SessionError> {
        if self.state() != SessionState::AwaitingAnswer {
            return Err(self.invalid("reject"));
        }
        let position = self
            .candidates
            .iter()
            .position(|candidate| &candidate.sid == sid)
            .ok_or_else(|| SessionError::UnknownSymptom(sid.clone()))?;
        self.candidates.remove(position);
        Ok(Effect::None)
    }

    fn cancel_confirmation(&mut self) -> Result<Effect, SessionError> {
        if self.state() != SessionState::AwaitingConfirmation {
            return Err(self.invalid("cancel_confirmation"));
        }
        self.pending = None;
        Ok(Effect::None)
    }

    fn confirm(&mut self) -> Result<Effect, SessionError> {
        if self.state() != SessionState::AwaitingConfirmation {
            return Err(self.invalid("confirm"));
        }
        let Some(symptom) = self.pending.take() else {
            return Err(self.invalid("confirm"));
        };

        // The answer is recorded before any call; a failed call never undoes it.
        self.history.push(symptom.clone());
        let query =
            self.policy
                .after_confirm(self.crop_id, self.current_level, &symptom, &self.history);
        let in_flight = match query {
            Query::ChildrenOf { .. } => InFlight::Children,
            _ => InFlight::Resolving,
        };
        Ok(self.begin(in_flight, query))
    }

    fn fetched(
        &mut self,
        generation: u64,
        reply: Result<Reply, TransportError>,
    ) -> Result<Effect, SessionError> {
        if generation != self.generation {
            tracing::debug!(
                stale_generation = generation,
                generation = self.generation,
                "discarding stale knowledge base reply"
            );
            return Ok(Effect::Ignored);
        }
        let Some(in_flight) = self.in_flight.take() else {
            return Err(self.invalid("fetched"));
        };

        // Candidates are never touched while a call is out, so clearing
        // `in_flight` on failure restores the pre-call view.
        let reply = reply?;

        match (in_flight, reply) {
            (InFlight::Loading, Reply::Symptoms(symptoms)) => {
                self.current_level = 1;
                self.candidates = symptoms;
                self.loaded = true;
                Ok(Effect::None)
            }
            (InFlight::Children, Reply::Symptoms(children)) => {
                match self.policy.after_children(
                    self.crop_id,
                    self.current_level,
                    children,
                    &self.history,
                ) {
                    ChildrenStep::Descend { level, candidates } => {
                        self.current_level = level;
                        self.candidates = candidates;
                        Ok(Effect::None)
                    }
                    ChildrenStep::Fallback(query) => Ok(self.begin(InFlight::Resolving, query)),
                }
            }
            (InFlight::Resolving, Reply::Resolution(resolution)) => {
                match self.policy.after_resolution(resolution) {
                    Outcome::Diagnosed(disease) => {
                        self.diagnosis = Some(disease);
                        self.candidates.clear();
                    }
                    Outcome::Alternatives(symptoms) => self.candidates = symptoms,
                    Outcome::Exhausted => self.candidates.clear(),
                }
                Ok(Effect::None)
            }
            (in_flight, _) => {
                self.in_flight = Some(in_flight);
                Err(self.invalid("fetched"))
            }
        }
    }
}
