//! Prompt delimiter helpers shared by the LLM stages.

/// Marker bracketing untrusted user input and separating answer steps.
pub const DELIMITER: &str = "####";

/// Wrap a user query in the delimiter on both sides.
///
/// Lets the model tell instructions from user content. This reduces prompt
/// injection; it does not prevent it.
pub fn delimit(query: &str) -> String {
    format!("{DELIMITER}{query}{DELIMITER}")
}
