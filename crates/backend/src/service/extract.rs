//! Text scanning for search result previews.

/// Excerpt budget in characters
pub const MAX_EXCERPT_CHARS: usize = 500;

/// Byte range of the text between a leading `---` and the next `---`
fn frontmatter_bounds(content: &str) -> Option<(usize, usize)> {
  if !content.starts_with("---") {
    return None;
  }
  content[3..].find("---").map(|offset| (3, 3 + offset))
}

/// Trimmed frontmatter block, or an empty string when there is none
pub fn frontmatter(content: &str) -> String {
  match frontmatter_bounds(content) {
    Some((start, end)) => content[start..end].trim().to_string(),
    None => String::new(),
  }
}

/// Heading lines, trimmed, in document order
pub fn outline(content: &str) -> Vec<String> {
  content
    .lines()
    .map(str::trim)
    .filter(|line| line.starts_with('#'))
    .map(str::to_string)
    .collect()
}

/// Body text after the frontmatter, cut to `max_chars` on a word boundary with `...` appended.
pub fn excerpt(content: &str, max_chars: usize) -> String {
  let body = match frontmatter_bounds(content) {
    Some((_, end)) => content[end + 3..].trim_start(),
    None => content,
  };

  let Some((cut, _)) = body.char_indices().nth(max_chars) else {
    return body.to_string();
  };

  let mut truncated = &body[..cut];
  // Back up to a word boundary only when it lies in the second half
  if let Some(space) = truncated.rfind(' ')
    && truncated[..space].chars().count() > max_chars / 2
  {
    truncated = &truncated[..space];
  }
  format!("{truncated}...")
}
