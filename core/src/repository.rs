use async_trait::async_trait;

use crate::error::TransportError;
use crate::symptoms::{CropId, Resolution, Symptom, SymptomId};

/// Read-only access to the crop knowledge base. Every call is idempotent and
/// safe to retry; an empty symptom list is a valid answer, not an error.
#[async_trait]
pub trait SymptomRepository: Send + Sync {
    /// Full candidate set for a hierarchy level.
    async fn symptoms_at_level(
        &self,
        crop: CropId,
        level: u32,
    ) -> Result<Vec<Symptom>, TransportError>;

    /// Symptoms one level below `parent`. Empty means no finer symptoms exist.
    async fn children_of(
        &self,
        crop: CropId,
        level: u32,
        parent: &SymptomId,
    ) -> Result<Vec<Symptom>, TransportError>;

    /// Diagnosis, alternative questions, or nothing for the confirmed set.
    async fn resolve(
        &self,
        crop: CropId,
        confirmed: &[SymptomId],
    ) -> Result<Resolution, TransportError>;
}

/// A repository call requested by a session transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    SymptomsAtLevel {
        crop: CropId,
        level: u32,
    },
    ChildrenOf {
        crop: CropId,
        level: u32,
        parent: SymptomId,
    },
    Resolve {
        crop: CropId,
        confirmed: Vec<SymptomId>,
    },
}

/// A query tagged with the session generation that issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub generation: u64,
    pub query: Query,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Symptoms(Vec<Symptom>),
    Resolution(Resolution),
}

/// Run a query against the repository.
pub async fn execute<R>(repo: &R, query: &Query) -> Result<Reply, TransportError>
where
    R: SymptomRepository + ?Sized,
{
    match query {
        Query::SymptomsAtLevel { crop, level } => repo
            .symptoms_at_level(*crop, *level)
            .await
            .map(Reply::Symptoms),
        Query::ChildrenOf {
            crop,
            level,
            parent,
        } => repo
            .children_of(*crop, *level, parent)
            .await
            .map(Reply::Symptoms),
        Query::Resolve { crop, confirmed } => repo
            .resolve(*crop, confirmed)
            .await
            .map(Reply::Resolution),
    }
}
