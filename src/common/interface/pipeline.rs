use super::PersistenceSink;
use crate::common::model::{Request, Response};
use crate::errors::Result;
use async_trait::async_trait;

/// Turns fetched pages into records and follow-up requests.
///
/// A body that does not have the expected structure is reported as
/// `ParserError::ContentAnomaly`; it is not a proxy-health signal.
#[async_trait]
pub trait ExtractionPipeline: Send + Sync {
    async fn process(
        &self,
        response: Response,
        sink: &dyn PersistenceSink,
    ) -> Result<Vec<Request>>;
}
