// Context-window budgeting for embedding inputs
//
// Notes can be arbitrarily long; models silently reject or error on inputs past
// their context window, so documents are cut to an estimated character budget.

use std::borrow::Cow;

use tracing::debug;

use super::models::ModelSpec;

/// Rough characters-per-token estimate for English prose
pub const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
  pub max_tokens: usize,
  pub chars_per_token: usize,
}

impl ContextBudget {
  pub fn for_model(spec: &ModelSpec) -> Self {
    Self {
      max_tokens: spec.max_tokens,
      chars_per_token: CHARS_PER_TOKEN,
    }
  }

  /// Maximum characters allowed based on the token estimate
  pub fn max_chars(&self) -> usize {
    self.max_tokens.saturating_mul(self.chars_per_token)
  }
}

/// Cut `text` to the budget, on a character boundary.
///
/// Borrowed when the text already fits.
pub fn fit_to_budget<'a>(text: &'a str, budget: &ContextBudget) -> Cow<'a, str> {
  let max_chars = budget.max_chars();
  match text.char_indices().nth(max_chars) {
    None => Cow::Borrowed(text),
    Some((byte_end, _)) => {
      debug!(
        original_len = text.len(),
        truncated_len = byte_end,
        max_tokens = budget.max_tokens,
        "Document exceeds model context, truncating"
      );
      Cow::Owned(text[..byte_end].to_string())
    }
  }
}
