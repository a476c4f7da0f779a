/*!
  Menu composition: an ordered list of (choice, title) entries rendered one
  per line as `<choice><separator><title>`, with optional browse controls
  appended when the frame spans several pages.
*/

use super::RenderError;

const DEFAULT_SEPARATOR: &str = ":";

/// Selectors and titles for the page browse controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseConfig {
  pub next_selector     : String,
  pub next_title        : String,
  pub previous_selector : String,
  pub previous_title    : String,
}

impl Default for BrowseConfig {
  fn default() -> Self {
    BrowseConfig {
      next_selector: "11".to_string(),
      next_title: "next".to_string(),
      previous_selector: "22".to_string(),
      previous_title: "previous".to_string(),
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct Menu {
  entries    : Vec<(String, String)>,
  separator  : Option<String>,
  browse     : Option<BrowseConfig>,
  sink       : bool,
  page_count : u16,
}

impl Menu {
  pub fn new() -> Self {
    Menu::default()
  }

  /// Marks the menu itself as the sink: its entries paginate instead of the
  /// template content.
  pub fn with_sink(mut self) -> Self {
    self.sink = true;
    self
  }

  pub fn with_separator(mut self, separator: &str) -> Self {
    self.separator = Some(separator.to_string());
    self
  }

  pub fn set_separator(&mut self, separator: &str) {
    self.separator = Some(separator.to_string());
  }

  /// Enables browse controls. Without a browse config no next/previous lines
  /// are emitted, whatever the page count.
  pub fn with_browse_config(mut self, browse: BrowseConfig) -> Self {
    self.browse = Some(browse);
    self
  }

  pub fn with_page_count(mut self, page_count: u16) -> Self {
    self.page_count = page_count;
    self
  }

  pub fn put(&mut self, choice: &str, title: &str) {
    self.entries.push((choice.to_string(), title.to_string()));
  }

  /// Overrides the next-page browse entry, enabling browse if it was off.
  pub fn set_browse_next(&mut self, selector: &str, title: &str) {
    let browse = self.browse.get_or_insert_with(BrowseConfig::default);
    browse.next_selector = selector.to_string();
    browse.next_title = title.to_string();
  }

  /// Overrides the previous-page browse entry, enabling browse if it was off.
  pub fn set_browse_previous(&mut self, selector: &str, title: &str) {
    let browse = self.browse.get_or_insert_with(BrowseConfig::default);
    browse.previous_selector = selector.to_string();
    browse.previous_title = title.to_string();
  }

  pub fn set_page_count(&mut self, page_count: u16) {
    self.page_count = page_count;
  }

  pub fn is_sink(&self) -> bool {
    self.sink
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn separator(&self) -> &str {
    self.separator.as_deref().unwrap_or(DEFAULT_SEPARATOR)
  }

  /// Clears the per-turn entries, keeping separator, browse and sink
  /// configuration.
  pub fn reset(&mut self) {
    self.entries.clear();
    self.page_count = 0;
  }

  pub(crate) fn line(&self, choice: &str, title: &str) -> String {
    format!("{}{}{}", choice, self.separator(), title)
  }

  /// Every entry rendered, in insertion order.
  pub(crate) fn entry_lines(&self) -> Vec<String> {
    self
      .entries
      .iter()
      .map(|(choice, title)| self.line(choice, title))
      .collect()
  }

  /// Browse lines shown on `page` of `page_count`: next when later pages
  /// exist, previous past the first page.
  pub(crate) fn browse_lines(&self, page: u16, page_count: usize) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(browse) = &self.browse {
      if (page as usize + 1) < page_count {
        out.push(self.line(&browse.next_selector, &browse.next_title));
      }
      if page > 0 {
        out.push(self.line(&browse.previous_selector, &browse.previous_title));
      }
    }
    out
  }

  // Reserved lengths for greedy page fills: the next line is reserved on
  // every page, previous only past page 0. Includes the joining newline.
  pub(crate) fn browse_reserve(&self, page: u16) -> usize {
    match &self.browse {
      Some(browse) => {
        let next = 1 + self.line(&browse.next_selector, &browse.next_title).len();
        let previous = match page > 0 {
          true => 1 + self.line(&browse.previous_selector, &browse.previous_title).len(),
          false => 0,
        };
        next + previous
      }
      None => 0,
    }
  }

  /**
    Renders the full menu for `page`, browse controls included. Paging here
    refers to the *frame* page; the entries themselves are all emitted. The
    page-fitted subset form used for a menu sink is composed by the page
    renderer instead.
  */
  pub fn render(&self, page: u16) -> Result<String, RenderError> {
    let page_count = self.page_count.max(1) as usize;
    if page as usize >= page_count {
      return Err(RenderError::NoPage { page, pages: page_count });
    }
    let mut lines = self.entry_lines();
    lines.extend(self.browse_lines(page, page_count));
    Ok(lines.join("\n"))
  }
}
