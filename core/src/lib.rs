//! Symptom traversal engine for crop disease self-diagnosis.
//!
//! A [`session::DiagnosticSession`] walks a crop's symptom hierarchy one
//! confirmed answer at a time. It is a plain state machine: the knowledge
//! base is reached through the [`repository::SymptomRepository`] trait and
//! [`driver::SessionHandle`] runs the calls asynchronously.

pub mod driver;
pub mod error;
pub mod policy;
pub mod repository;
pub mod session;
pub mod symptoms;

pub use driver::SessionHandle;
pub use error::{SessionError, TransportError};
pub use policy::TraversalPolicy;
pub use repository::SymptomRepository;
pub use session::{DiagnosticSession, SessionSnapshot, SessionState};
pub use symptoms::{CropId, Disease, Id, Resolution, Symptom, SymptomId};
