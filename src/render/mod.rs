/*!

  Size-aware rendering of one output frame. A frame is a template with
  `{{.symbol}}` placeholders filled from the session cache, followed by a menu.
  When the whole thing does not fit the output byte budget, one designated
  *sink* (a symbol with reservation 0, or the menu itself) absorbs the
  leftover bytes and the surplus spills into further pages, split on line
  boundaries.

*/

mod menu;
mod page;
mod sizer;

pub use menu::{BrowseConfig, Menu};
pub use page::Page;
pub use sizer::Sizer;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
  #[error("rendered size {size} exceeds output budget {budget}")]
  Oversize { size: usize, budget: usize },
  #[error("no page {page}, content has {pages} page(s)")]
  NoPage { page: u16, pages: usize },
  #[error("no value for mapped symbol {0}")]
  Missing(String),
  #[error("sink {0} collides with sink {1}")]
  SinkCollision(String, String),
}

/**
  Replaces every `{{.name}}` placeholder with its value. Placeholders without
  a value render as the empty string; malformed trailing braces pass through
  untouched.
*/
pub(crate) fn substitute(template: &str, values: &[(String, String)]) -> String {
  let mut out = String::with_capacity(template.len());
  let mut rest = template;
  while let Some(start) = rest.find("{{.") {
    out.push_str(&rest[..start]);
    let after = &rest[start + 3..];
    match after.find("}}") {
      Some(end) => {
        let name = &after[..end];
        if let Some((_, value)) = values.iter().find(|(k, _)| k == name) {
          out.push_str(value);
        }
        rest = &after[end + 2..];
      }
      None => {
        out.push_str(&rest[start..]);
        rest = "";
      }
    }
  }
  out.push_str(rest);
  out
}
