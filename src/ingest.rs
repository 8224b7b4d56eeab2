//! Backward crawl of the upstream feed into the archive.
//!
//! Pages arrive newest first. After each page the cursor moves to the id of
//! the last (oldest) message in it, so the next fetch continues further back.
//! The crawl ends on the first empty page. Individual write failures are
//! logged and skipped; a feed failure ends the run.

use std::thread;
use std::time::Duration;

use indicatif::ProgressBar;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::feed::FeedClient;
use crate::storage::Storage;

/// Default pause between page requests.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(2);

/// Knobs for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Pause between pages. Zero disables the pause.
    pub delay: Duration,
    /// Resume from this cursor instead of the newest message.
    pub start_before: Option<String>,
    /// Stop after this many non-empty pages.
    pub max_pages: Option<usize>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DELAY,
            start_before: None,
            max_pages: None,
        }
    }
}

/// Outcome of an ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct IngestReport {
    /// Non-empty pages processed.
    pub pages: usize,
    /// Messages written.
    pub stored: usize,
    /// Messages whose write failed and was skipped.
    pub failed: usize,
    /// Cursor to pass as `start_before` to resume older history.
    pub last_cursor: Option<String>,
}

/// Drives a [`FeedClient`] into a [`Storage`].
pub struct Ingestor<'a, F> {
    feed: F,
    storage: &'a Storage,
    options: IngestOptions,
    progress: ProgressBar,
}

impl<'a, F: FeedClient> Ingestor<'a, F> {
    pub fn new(feed: F, storage: &'a Storage, options: IngestOptions) -> Self {
        Self {
            feed,
            storage,
            options,
            progress: ProgressBar::hidden(),
        }
    }

    /// Report progress on the given bar.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Crawl until history is exhausted, the page cap is hit, or the feed fails.
    ///
    /// # Errors
    ///
    /// Returns the first feed error. Messages stored before the failure stay
    /// stored; resume with the last logged `next_before_id`.
    pub fn run(&self) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        let mut cursor = self.options.start_before.clone();

        loop {
            if self
                .options
                .max_pages
                .is_some_and(|max| report.pages >= max)
            {
                info!(pages = report.pages, "Page limit reached");
                break;
            }

            let page = self.feed.fetch_page(cursor.as_deref())?;
            let Some(last) = page.messages.last() else {
                debug!(before_id = cursor.as_deref(), "Empty page; history exhausted");
                break;
            };
            let next_cursor = last.id.clone();

            for message in &page.messages {
                match self.storage.upsert_message(message) {
                    Ok(()) => report.stored += 1,
                    Err(e) => {
                        warn!(id = %message.id, error = %e, "Skipping message that failed to store");
                        report.failed += 1;
                    }
                }
            }
            report.pages += 1;

            info!(
                page = report.pages,
                messages = page.messages.len(),
                stored = report.stored,
                next_before_id = %next_cursor,
                "Ingested page"
            );
            self.progress.set_message(format!(
                "{} messages, before {}",
                report.stored, next_cursor
            ));
            self.progress.inc(1);

            if cursor.as_deref() == Some(next_cursor.as_str()) {
                warn!(before_id = %next_cursor, "Feed returned the same cursor twice; stopping");
                report.last_cursor = Some(next_cursor);
                break;
            }
            cursor = Some(next_cursor);
            report.last_cursor.clone_from(&cursor);

            if !self.options.delay.is_zero() {
                thread::sleep(self.options.delay);
            }
        }

        self.progress.finish_and_clear();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VaultError;
    use crate::model::{FeedPage, Message};
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Replays canned pages and records the cursor of every request.
    struct ScriptedFeed {
        pages: RefCell<VecDeque<Result<FeedPage>>>,
        cursors: RefCell<Vec<Option<String>>>,
    }

    impl ScriptedFeed {
        fn new(pages: Vec<Result<FeedPage>>) -> Self {
            Self {
                pages: RefCell::new(pages.into()),
                cursors: RefCell::new(Vec::new()),
            }
        }

        fn cursors(&self) -> Vec<Option<String>> {
            self.cursors.borrow().clone()
        }
    }

    impl FeedClient for ScriptedFeed {
        fn fetch_page(&self, before_id: Option<&str>) -> Result<FeedPage> {
            self.cursors.borrow_mut().push(before_id.map(str::to_string));
            self.pages
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok(FeedPage::default()))
        }
    }

    fn msg(id: &str, created_at: i64) -> Message {
        Message {
            id: id.to_string(),
            source_guid: format!("g{id}"),
            created_at,
            user_id: "1".to_string(),
            group_id: "9".to_string(),
            name: "Ada".to_string(),
            avatar_url: None,
            text: Some(format!("text {id}")),
            system: false,
            favorited_by: vec![],
            attachments: vec![],
        }
    }

    fn page(ids: &[(&str, i64)]) -> Result<FeedPage> {
        let messages: Vec<Message> = ids.iter().map(|(id, ts)| msg(id, *ts)).collect();
        Ok(FeedPage {
            count: i64::try_from(messages.len()).unwrap(),
            messages,
        })
    }

    fn no_delay() -> IngestOptions {
        IngestOptions {
            delay: Duration::ZERO,
            ..IngestOptions::default()
        }
    }

    #[test]
    fn test_cursor_walks_backward_until_empty() {
        let storage = Storage::open_memory().unwrap();
        let feed = ScriptedFeed::new(vec![
            page(&[("30", 300), ("29", 290)]),
            page(&[("28", 280), ("27", 270)]),
            page(&[]),
        ]);

        let report = Ingestor::new(&feed, &storage, no_delay()).run().unwrap();

        assert_eq!(
            feed.cursors(),
            vec![None, Some("29".to_string()), Some("27".to_string())]
        );
        assert_eq!(report.pages, 2);
        assert_eq!(report.stored, 4);
        assert_eq!(report.last_cursor.as_deref(), Some("27"));
        assert_eq!(storage.message_count().unwrap(), 4);
    }

    #[test]
    fn test_empty_first_page_stores_nothing() {
        let storage = Storage::open_memory().unwrap();
        let feed = ScriptedFeed::new(vec![page(&[])]);
        let report = Ingestor::new(&feed, &storage, no_delay()).run().unwrap();
        assert_eq!(report, IngestReport::default());
        assert_eq!(feed.cursors().len(), 1);
    }

    #[test]
    fn test_feed_error_aborts_but_keeps_prior_pages() {
        let storage = Storage::open_memory().unwrap();
        let feed = ScriptedFeed::new(vec![
            page(&[("5", 50), ("4", 40)]),
            Err(VaultError::FeedStatus {
                status: 500,
                url: "https://feed.test".to_string(),
            }),
            page(&[("3", 30)]),
        ]);

        let err = Ingestor::new(&feed, &storage, no_delay()).run().unwrap_err();

        assert!(err.is_feed_error());
        assert_eq!(storage.message_count().unwrap(), 2);
        assert_eq!(feed.cursors().len(), 2);
    }

    #[test]
    fn test_failed_write_is_skipped() {
        let storage = Storage::open_memory().unwrap();
        storage
            .with_conn(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER reject_bad BEFORE INSERT ON messages
                     WHEN NEW.id = 'bad'
                     BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
                )?;
                Ok(())
            })
            .unwrap();
        let feed = ScriptedFeed::new(vec![page(&[("good2", 20), ("bad", 15), ("good1", 10)])]);

        let report = Ingestor::new(&feed, &storage, no_delay()).run().unwrap();

        assert_eq!(report.stored, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.last_cursor.as_deref(), Some("good1"));
        assert!(storage.get_message("bad").unwrap().is_none());
        assert!(storage.get_message("good1").unwrap().is_some());
    }

    #[test]
    fn test_max_pages_limits_run() {
        let storage = Storage::open_memory().unwrap();
        let feed = ScriptedFeed::new(vec![
            page(&[("9", 90)]),
            page(&[("8", 80)]),
            page(&[("7", 70)]),
        ]);
        let options = IngestOptions {
            max_pages: Some(2),
            ..no_delay()
        };

        let report = Ingestor::new(&feed, &storage, options).run().unwrap();

        assert_eq!(report.pages, 2);
        assert_eq!(report.last_cursor.as_deref(), Some("8"));
        assert_eq!(feed.cursors().len(), 2);
    }

    #[test]
    fn test_start_before_resumes_from_cursor() {
        let storage = Storage::open_memory().unwrap();
        let feed = ScriptedFeed::new(vec![page(&[("3", 30)]), page(&[])]);
        let options = IngestOptions {
            start_before: Some("4".to_string()),
            ..no_delay()
        };

        Ingestor::new(&feed, &storage, options).run().unwrap();

        assert_eq!(
            feed.cursors(),
            vec![Some("4".to_string()), Some("3".to_string())]
        );
    }

    #[test]
    fn test_stalled_cursor_stops() {
        let storage = Storage::open_memory().unwrap();
        let feed = ScriptedFeed::new(vec![
            page(&[("2", 20)]),
            page(&[("2", 20)]),
            page(&[("1", 10)]),
        ]);

        let report = Ingestor::new(&feed, &storage, no_delay()).run().unwrap();

        assert_eq!(report.pages, 2);
        assert_eq!(feed.cursors().len(), 2);
        assert_eq!(storage.message_count().unwrap(), 1);
    }

    #[test]
    fn test_reingest_is_idempotent() {
        let storage = Storage::open_memory().unwrap();
        for _ in 0..2 {
            let feed = ScriptedFeed::new(vec![page(&[("2", 20), ("1", 10)])]);
            Ingestor::new(&feed, &storage, no_delay()).run().unwrap();
        }
        assert_eq!(storage.message_count().unwrap(), 2);
    }
}
