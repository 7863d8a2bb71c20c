use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::metrics::Metrics;

/// One page of records plus the cursor for the next request, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_token: None,
        }
    }
}

/// A remote endpoint that can be read one page at a time.
pub trait PageSource {
    type Item;
    type Error;

    fn fetch_page(
        &self,
        page_size: usize,
        token: Option<&str>,
    ) -> Result<Page<Self::Item>, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagerSettings {
    pub page_size: usize,
    pub delay: Duration,
    pub max_pages: usize,
}

impl Default for PagerSettings {
    fn default() -> Self {
        Self {
            page_size: 50,
            delay: Duration::from_millis(250),
            max_pages: 1000,
        }
    }
}

/// Drives a [`PageSource`] until it stops returning a continuation token.
///
/// Pages are fetched strictly one after another with `delay` between them.
/// Iteration also stops when the source hands back the token it was just
/// given, or after `max_pages` pages. Any page error aborts the whole walk.
#[derive(Debug, Clone)]
pub struct Pager {
    settings: PagerSettings,
    pause: fn(Duration),
    metrics: Arc<Metrics>,
}

impl Pager {
    pub fn new(settings: PagerSettings, metrics: Arc<Metrics>) -> Self {
        Self {
            settings: PagerSettings {
                page_size: settings.page_size.max(1),
                max_pages: settings.max_pages.max(1),
                ..settings
            },
            pause: thread::sleep,
            metrics,
        }
    }

    pub fn with_pause(mut self, pause: fn(Duration)) -> Self {
        self.pause = pause;
        self
    }

    /// Same pacing and metrics with a different page size.
    pub fn with_page_size(&self, page_size: usize) -> Self {
        let mut pager = self.clone();
        pager.settings.page_size = page_size.max(1);
        pager
    }

    pub fn settings(&self) -> PagerSettings {
        self.settings
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn collect<S: PageSource>(&self, source: &S) -> Result<Vec<S::Item>, S::Error> {
        let mut all = Vec::new();
        let mut token: Option<String> = None;

        for page_number in 1..=self.settings.max_pages {
            let page = source.fetch_page(self.settings.page_size, token.as_deref())?;
            self.metrics.inc_page();
            let page_len = page.items.len();
            all.extend(page.items);

            let next = page.next_token.filter(|t| !t.is_empty());
            tracing::debug!(
                page = page_number,
                page_len,
                total = all.len(),
                has_next = next.is_some(),
                "fetched page"
            );

            let Some(next) = next else {
                return Ok(all);
            };

            if token.as_deref() == Some(next.as_str()) {
                tracing::warn!(
                    page = page_number,
                    "remote repeated its continuation token; stopping"
                );
                return Ok(all);
            }

            if page_number == self.settings.max_pages {
                tracing::warn!(
                    max_pages = self.settings.max_pages,
                    total = all.len(),
                    "page cap reached with results remaining; stopping"
                );
                return Ok(all);
            }

            self.metrics.inc_page_delay();
            (self.pause)(self.settings.delay);
            token = Some(next);
        }

        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[derive(Debug)]
    struct ScriptedSource {
        pages: Vec<Result<Page<u32>, String>>,
        calls: RefCell<Vec<(usize, Option<String>)>>,
    }

    impl ScriptedSource {
        fn new(pages: Vec<Result<Page<u32>, String>>) -> Self {
            Self {
                pages,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl PageSource for ScriptedSource {
        type Item = u32;
        type Error = String;

        fn fetch_page(&self, page_size: usize, token: Option<&str>) -> Result<Page<u32>, String> {
            let mut calls = self.calls.borrow_mut();
            let index = calls.len();
            calls.push((page_size, token.map(ToString::to_string)));
            self.pages
                .get(index)
                .cloned()
                .unwrap_or_else(|| Err(format!("unexpected page request {index}")))
        }
    }

    fn page(start: u32, len: u32, next: Option<&str>) -> Result<Page<u32>, String> {
        Ok(Page {
            items: (start..start + len).collect(),
            next_token: next.map(ToString::to_string),
        })
    }

    fn pager(settings: PagerSettings) -> (Pager, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let pager = Pager::new(settings, Arc::clone(&metrics)).with_pause(|_| {});
        (pager, metrics)
    }

    #[test]
    fn collects_three_pages_in_order_with_two_delays() {
        let source = ScriptedSource::new(vec![
            page(0, 50, Some("t1")),
            page(50, 50, Some("t2")),
            page(100, 7, None),
        ]);
        let (pager, metrics) = pager(PagerSettings::default());

        let items = pager.collect(&source).expect("collect");

        assert_eq!(items.len(), 107);
        assert_eq!(items, (0..107).collect::<Vec<_>>());
        assert_eq!(metrics.snapshot().page_delays, 2);
        assert_eq!(metrics.snapshot().pages_fetched, 3);
        let tokens: Vec<_> = source.calls.borrow().iter().map(|c| c.1.clone()).collect();
        assert_eq!(tokens, vec![None, Some("t1".into()), Some("t2".into())]);
    }

    #[test]
    fn zero_results_terminates_after_one_request() {
        let source = ScriptedSource::new(vec![Ok(Page::last(Vec::new()))]);
        let (pager, metrics) = pager(PagerSettings::default());

        let items = pager.collect(&source).expect("collect");

        assert!(items.is_empty());
        assert_eq!(source.calls.borrow().len(), 1);
        assert_eq!(metrics.snapshot().page_delays, 0);
    }

    #[test]
    fn page_error_discards_partial_results() {
        let source = ScriptedSource::new(vec![page(0, 50, Some("t1")), Err("boom".into())]);
        let (pager, _) = pager(PagerSettings::default());

        let err = pager.collect(&source).expect_err("second page fails");
        assert_eq!(err, "boom");
    }

    #[test]
    fn repeated_token_is_terminal() {
        let source = ScriptedSource::new(vec![page(0, 2, Some("same")), page(2, 2, Some("same"))]);
        let (pager, _) = pager(PagerSettings::default());

        let items = pager.collect(&source).expect("collect");

        assert_eq!(items, vec![0, 1, 2, 3]);
        assert_eq!(source.calls.borrow().len(), 2);
    }

    #[test]
    fn max_pages_caps_iteration() {
        let source = ScriptedSource::new(vec![
            page(0, 1, Some("a")),
            page(1, 1, Some("b")),
            page(2, 1, Some("c")),
        ]);
        let (pager, metrics) = pager(PagerSettings {
            max_pages: 2,
            ..PagerSettings::default()
        });

        let items = pager.collect(&source).expect("collect");

        assert_eq!(items, vec![0, 1]);
        assert_eq!(source.calls.borrow().len(), 2);
        assert_eq!(metrics.snapshot().page_delays, 1);
    }

    #[test]
    fn empty_token_counts_as_absent() {
        let source = ScriptedSource::new(vec![page(0, 3, Some(""))]);
        let (pager, _) = pager(PagerSettings::default());

        assert_eq!(pager.collect(&source).expect("collect"), vec![0, 1, 2]);
    }

    #[test]
    fn zero_page_size_is_clamped() {
        let source = ScriptedSource::new(vec![Ok(Page::last(vec![1]))]);
        let (pager, _) = pager(PagerSettings {
            page_size: 0,
            ..PagerSettings::default()
        });

        pager.collect(&source).expect("collect");
        assert_eq!(source.calls.borrow()[0].0, 1);
        assert_eq!(pager.with_page_size(0).settings().page_size, 1);
    }
}
