/*!
  Template expansion and paging for one output frame.

  Mapped symbols are looked up in the cache at render time. The sink — the
  first mapped symbol whose reservation is 0, or the menu when so configured —
  absorbs whatever fits after everything else is placed, and the rest spills
  into further pages split at line boundaries. Page fills are greedy: the
  earliest lines that fit form the page, and capacity always reserves room
  for the `next` browse control (plus `previous` past page 0) so a browse
  line never pushes a page over budget.
*/

use tracing::trace;

use super::{substitute, Menu, RenderError, Sizer};
use crate::memory::Cache;

/// Which part of the frame absorbs leftover bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Sink {
  None,
  Content(String),
  Menu,
}

#[derive(Debug, Clone, Default)]
pub struct Page {
  maps  : Vec<String>,
  sink  : Option<String>,
  menu  : Menu,
  sizer : Option<Sizer>,
}

impl Page {
  pub fn new() -> Self {
    Page::default()
  }

  pub fn with_menu(mut self, menu: Menu) -> Self {
    self.menu = menu;
    self
  }

  pub fn with_sizer(mut self, sizer: Sizer) -> Self {
    self.sizer = Some(sizer);
    self
  }

  pub fn menu(&self) -> &Menu {
    &self.menu
  }

  pub fn menu_mut(&mut self) -> &mut Menu {
    &mut self.menu
  }

  pub fn sizer(&self) -> Option<&Sizer> {
    self.sizer.as_ref()
  }

  pub fn set_sizer(&mut self, sizer: Option<Sizer>) {
    self.sizer = sizer;
  }

  /// Clears all per-turn state: mappings, sink, menu entries and sizer.
  pub fn reset(&mut self) {
    self.maps.clear();
    self.sink = None;
    self.menu.reset();
    self.sizer = None;
  }

  /**
    Marks `symbol` for the next render. The symbol must be defined in the
    cache; a reservation of 0 makes it the sink. Only one content sink may be
    mapped.
  */
  pub fn map(&mut self, cache: &Cache, symbol: &str) -> Result<(), RenderError> {
    let reserve = cache
      .reserved_size(symbol)
      .map_err(|_| RenderError::Missing(symbol.to_string()))?;
    if reserve == 0 {
      match &self.sink {
        Some(existing) if existing != symbol => {
          return Err(RenderError::SinkCollision(existing.clone(), symbol.to_string()));
        }
        _ => self.sink = Some(symbol.to_string()),
      }
    }
    if !self.maps.iter().any(|m| m == symbol) {
      self.maps.push(symbol.to_string());
    }
    Ok(())
  }

  pub fn mapped(&self) -> &[String] {
    &self.maps
  }

  /// Renders page `page` (0-indexed) of the frame.
  pub fn render(&mut self, cache: &Cache, template: &str, page: u16) -> Result<String, RenderError> {
    let budget = match &self.sizer {
      Some(sizer) => sizer.budget() as usize,
      None => 0,
    };

    let mut values: Vec<(String, String)> = Vec::with_capacity(self.maps.len());
    for symbol in &self.maps {
      match cache.get(symbol) {
        Ok(value) => values.push((symbol.clone(), value.to_string())),
        Err(_) => {
          // only the sink may still be outstanding at render time
          if self.sink.as_deref() == Some(symbol.as_str()) {
            values.push((symbol.clone(), String::new()));
          } else {
            return Err(RenderError::Missing(symbol.clone()));
          }
        }
      }
    }

    let sink = match (self.menu.is_sink(), &self.sink) {
      (true, Some(symbol)) => {
        return Err(RenderError::SinkCollision("menu".to_string(), symbol.clone()));
      }
      (true, None) => Sink::Menu,
      (false, Some(symbol)) => Sink::Content(symbol.clone()),
      (false, None) => Sink::None,
    };
    trace!(?sink, budget, page, "render");

    match sink {
      Sink::None => self.render_plain(template, page, &values, budget),
      Sink::Content(symbol) => self.render_content_sink(template, page, values, budget, &symbol),
      Sink::Menu => self.render_menu_sink(template, page, &values, budget),
    }
  }

  // Everything fits or nothing does: a single page.
  fn render_plain(
    &mut self,
    template: &str,
    page: u16,
    values: &[(String, String)],
    budget: usize,
  ) -> Result<String, RenderError> {
    if page > 0 {
      return Err(RenderError::NoPage { page, pages: 1 });
    }
    let body = substitute(template, values);
    self.menu.set_page_count(1);
    let menu_block = self.menu.render(0)?;
    let out = join_frame(body, &menu_block);
    if budget > 0 && out.len() > budget {
      return Err(RenderError::Oversize { size: out.len(), budget });
    }
    Ok(out)
  }

  fn render_content_sink(
    &mut self,
    template: &str,
    page: u16,
    mut values: Vec<(String, String)>,
    budget: usize,
    sink_symbol: &str,
  ) -> Result<String, RenderError> {
    let sink_value = values
      .iter()
      .find(|(k, _)| k == sink_symbol)
      .map(|(_, v)| v.clone())
      .unwrap_or_default();

    // frame cost with the sink empty
    set_value(&mut values, sink_symbol, String::new());
    let base_len = substitute(template, &values).len();
    let menu_len = self.menu_block_len();

    let lines: Vec<&str> = sink_value.split('\n').collect();
    let pages = match budget {
      0 => vec![sink_value.clone()],
      _ => {
        let menu = &self.menu;
        fill_pages(&lines, |page_no| {
          budget
            .checked_sub(base_len + menu_len + menu.browse_reserve(page_no))
            .ok_or(RenderError::Oversize { size: base_len + menu_len, budget })
        })?
      }
    };

    let page_count = pages.len();
    if page as usize >= page_count {
      return Err(RenderError::NoPage { page, pages: page_count });
    }
    set_value(&mut values, sink_symbol, pages[page as usize].clone());
    let body = substitute(template, &values);
    self.menu.set_page_count(page_count as u16);
    let menu_block = self.menu.render(page)?;
    Ok(join_frame(body, &menu_block))
  }

  fn render_menu_sink(
    &mut self,
    template: &str,
    page: u16,
    values: &[(String, String)],
    budget: usize,
  ) -> Result<String, RenderError> {
    let body = substitute(template, values);
    let items = self.menu.entry_lines();
    let separator = match items.is_empty() {
      true => 0,
      false => 1,
    };

    let item_refs: Vec<&str> = items.iter().map(String::as_str).collect();
    let pages = match budget {
      0 => vec![items.join("\n")],
      _ => {
        let base_len = body.len();
        let menu = &self.menu;
        fill_pages(&item_refs, |page_no| {
          budget
            .checked_sub(base_len + separator + menu.browse_reserve(page_no))
            .ok_or(RenderError::Oversize { size: base_len, budget })
        })?
      }
    };

    let page_count = pages.len();
    if page as usize >= page_count {
      return Err(RenderError::NoPage { page, pages: page_count });
    }
    let mut out = body;
    let portion = &pages[page as usize];
    if !portion.is_empty() {
      out.push('\n');
      out.push_str(portion);
    }
    for line in self.menu.browse_lines(page, page_count) {
      out.push('\n');
      out.push_str(&line);
    }
    if budget > 0 && out.len() > budget {
      return Err(RenderError::Oversize { size: out.len(), budget });
    }
    Ok(out)
  }

  fn menu_block_len(&self) -> usize {
    let items = self.menu.entry_lines();
    match items.is_empty() {
      true => 0,
      false => 1 + items.join("\n").len(),
    }
  }
}

fn set_value(values: &mut [(String, String)], key: &str, value: String) {
  if let Some(slot) = values.iter_mut().find(|(k, _)| k == key) {
    slot.1 = value;
  }
}

fn join_frame(body: String, menu_block: &str) -> String {
  match menu_block.is_empty() {
    true => body,
    false => format!("{}\n{}", body, menu_block),
  }
}

/**
  Distributes `lines` over pages. Each page takes the earliest lines that fit
  its capacity; a page that cannot take a single line fails `Oversize`. The
  capacity callback may differ per page because browse reservations do.
*/
fn fill_pages(
  lines: &[&str],
  mut capacity: impl FnMut(u16) -> Result<usize, RenderError>,
) -> Result<Vec<String>, RenderError> {
  let mut pages: Vec<String> = Vec::new();
  let mut idx = 0;
  while idx < lines.len() {
    let cap = capacity(pages.len() as u16)?;
    let consumed_from = idx;
    let mut current = String::new();
    while idx < lines.len() {
      let line = lines[idx];
      let extra = match current.is_empty() {
        true => line.len(),
        false => line.len() + 1,
      };
      if current.len() + extra > cap {
        break;
      }
      if !current.is_empty() {
        current.push('\n');
      }
      current.push_str(line);
      idx += 1;
    }
    if idx == consumed_from {
      return Err(RenderError::Oversize { size: lines[idx].len(), budget: cap });
    }
    pages.push(current);
  }
  if pages.is_empty() {
    pages.push(String::new());
  }
  Ok(pages)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::render::BrowseConfig;

  const LONG: &str = "inky pinky\nblinky clyde sue\ntinkywinky dipsy\nlala poo\none two three four five six seven\neight nine ten\neleven twelve";

  fn sized_cache() -> Cache {
    let mut ca = Cache::new();
    ca.add("foo", "inky", 4).unwrap();
    ca.add("bar", "pinky", 10).unwrap();
    ca.add("baz", "blinky", 20).unwrap();
    ca.add("xyzzy", LONG, 0).unwrap();
    ca
  }

  #[test]
  fn simple_echo() {
    let mut ca = Cache::new();
    ca.add("who", "world", 8).unwrap();
    let mut pg = Page::new().with_sizer(Sizer::new(64));
    pg.map(&ca, "who").unwrap();
    assert_eq!(pg.render(&ca, "hello {{.who}}", 0).unwrap(), "hello world");
  }

  #[test]
  fn no_sink_oversize() {
    let mut ca = Cache::new();
    ca.add("who", "world", 8).unwrap();
    let mut pg = Page::new().with_sizer(Sizer::new(8));
    pg.map(&ca, "who").unwrap();
    let err = pg.render(&ca, "hello {{.who}}", 0).unwrap_err();
    assert_eq!(err, RenderError::Oversize { size: 11, budget: 8 });
  }

  #[test]
  fn map_unknown_symbol() {
    let ca = Cache::new();
    let mut pg = Page::new();
    assert_eq!(
      pg.map(&ca, "ghost").unwrap_err(),
      RenderError::Missing("ghost".into())
    );
  }

  #[test]
  fn two_content_sinks_collide() {
    let mut ca = Cache::new();
    ca.add("a", "x", 0).unwrap();
    ca.add("b", "y", 0).unwrap();
    let mut pg = Page::new();
    pg.map(&ca, "a").unwrap();
    assert_eq!(
      pg.map(&ca, "b").unwrap_err(),
      RenderError::SinkCollision("a".into(), "b".into())
    );
  }

  #[test]
  fn content_sink_pages() {
    let ca = sized_cache();
    let mut mn = Menu::new();
    mn.put("1", "foo the foo");
    mn.put("2", "go to bar");
    let mut pg = Page::new().with_sizer(Sizer::new(128)).with_menu(mn);
    for sym in ["foo", "bar", "baz", "xyzzy"] {
      pg.map(&ca, sym).unwrap();
    }
    let template = "one {{.foo}} two {{.bar}} three {{.baz}}\n{{.xyzzy}}";

    let r = pg.render(&ca, template, 0).unwrap();
    assert_eq!(
      r,
      "one inky two pinky three blinky\ninky pinky\nblinky clyde sue\ntinkywinky dipsy\nlala poo\n1:foo the foo\n2:go to bar"
    );

    let r = pg.render(&ca, template, 1).unwrap();
    assert_eq!(
      r,
      "one inky two pinky three blinky\none two three four five six seven\neight nine ten\neleven twelve\n1:foo the foo\n2:go to bar"
    );

    assert_eq!(
      pg.render(&ca, template, 2).unwrap_err(),
      RenderError::NoPage { page: 2, pages: 2 }
    );
  }

  #[test]
  fn content_sink_resumes_on_line_boundary() {
    let mut ca = Cache::new();
    let content: Vec<String> = (0..12).map(|i| format!("line number {}", i)).collect();
    ca.add("out", &content.join("\n"), 0).unwrap();
    let mut pg = Page::new().with_sizer(Sizer::new(40));
    pg.map(&ca, "out").unwrap();

    let mut collected: Vec<String> = Vec::new();
    let mut page = 0u16;
    loop {
      match pg.render(&ca, "{{.out}}", page) {
        Ok(frame) => {
          assert!(frame.len() <= 40);
          assert!(frame.ends_with(char::is_numeric));
          collected.extend(frame.lines().map(String::from));
          page += 1;
        }
        Err(RenderError::NoPage { .. }) => break,
        Err(e) => panic!("unexpected error: {}", e),
      }
    }
    assert_eq!(collected, content);
  }

  #[test]
  fn unbounded_renders_single_page() {
    let ca = sized_cache();
    let mut pg = Page::new();
    pg.map(&ca, "xyzzy").unwrap();
    let r = pg.render(&ca, "{{.xyzzy}}", 0).unwrap();
    assert_eq!(r, LONG);
    assert!(pg.render(&ca, "{{.xyzzy}}", 1).is_err());
  }

  #[test]
  fn many_sizes_never_overflow() {
    for budget in 60..160u32 {
      let ca = sized_cache();
      let mut pg = Page::new().with_sizer(Sizer::new(budget));
      for sym in ["foo", "bar", "baz", "xyzzy"] {
        pg.map(&ca, sym).unwrap();
      }
      let template = "one {{.foo}} two {{.bar}} three {{.baz}}\n{{.xyzzy}}";
      let r = pg.render(&ca, template, 0).unwrap();
      assert!(r.len() <= budget as usize, "budget {} output {}", budget, r.len());
    }
  }

  #[test]
  fn menu_sink_pages() {
    let mut ca = Cache::new();
    ca.add("baz", "xyzzy", 5).unwrap();

    let mut mn = Menu::new()
      .with_sink()
      .with_browse_config(BrowseConfig::default());
    mn.put("0", "inky");
    mn.put("1", "pinky");
    mn.put("22", "blinky");
    mn.put("3", "clyde");
    mn.put("44", "tinkywinky");

    let mut pg = Page::new().with_sizer(Sizer::new(45)).with_menu(mn);
    pg.map(&ca, "baz").unwrap();

    let template = "bar {{.baz}}";
    assert_eq!(
      pg.render(&ca, template, 0).unwrap(),
      "bar xyzzy\n0:inky\n1:pinky\n22:blinky\n11:next"
    );
    assert_eq!(
      pg.render(&ca, template, 1).unwrap(),
      "bar xyzzy\n3:clyde\n11:next\n22:previous"
    );
    assert_eq!(
      pg.render(&ca, template, 2).unwrap(),
      "bar xyzzy\n44:tinkywinky\n22:previous"
    );
    assert!(pg.render(&ca, template, 3).is_err());
  }

  #[test]
  fn menu_sink_collides_with_content_sink() {
    let mut ca = Cache::new();
    ca.add("inky", "pinky", 5).unwrap();
    ca.add("blinky", "clyde", 0).unwrap();

    let mut pg = Page::new()
      .with_sizer(Sizer::new(30))
      .with_menu(Menu::new().with_sink());
    pg.map(&ca, "inky").unwrap();
    assert!(pg.render(&ca, "bar", 0).is_ok());

    pg.map(&ca, "blinky").unwrap();
    let err = pg.render(&ca, "bar", 0).unwrap_err();
    assert_eq!(err, RenderError::SinkCollision("menu".into(), "blinky".into()));
  }

  #[test]
  fn reset_clears_turn_state() {
    let mut ca = Cache::new();
    ca.add("a", "x", 0).unwrap();
    let mut pg = Page::new().with_sizer(Sizer::new(10));
    pg.map(&ca, "a").unwrap();
    pg.menu_mut().put("1", "one");
    pg.reset();
    assert!(pg.mapped().is_empty());
    assert!(pg.menu().is_empty());
    assert!(pg.sizer().is_none());
  }
}
