use crate::models::ParseOutcome;

/// Extracts structured fields from a provider's free-text answer.
///
/// Failure is reported through `ParseOutcome::parsed`, never by returning
/// default-looking fields alone.
pub trait AnswerParser: Send + Sync {
    fn parse(&self, brand: &str, raw_text: &str) -> ParseOutcome;
}
