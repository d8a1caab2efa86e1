//! Context assembler for outgoing message lists

use std::sync::Arc;

use crate::config::Config;
use crate::session::{SessionState, Turn};
use crate::tools::SearchService;

/// Messages ready to send to the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledContext {
    /// System turn followed by the history window, most recent last
    pub messages: Vec<Turn>,
    /// Whether a search snippet was appended to the last message
    pub augmented: bool,
}

/// Builds the bounded message list for each turn
pub struct ContextAssembler {
    system_prompt: String,
    history_window: usize,
    triggers: Vec<String>,
    search: Arc<dyn SearchService>,
    max_results: usize,
}

impl ContextAssembler {
    /// Create an assembler
    ///
    /// Trigger words are matched case-insensitively. The history window is at
    /// least one turn so the new user text is always sent.
    #[must_use]
    pub fn new(
        system_prompt: impl Into<String>,
        history_window: usize,
        triggers: Vec<String>,
        search: Arc<dyn SearchService>,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            history_window: history_window.max(1),
            triggers: triggers.into_iter().map(|t| t.to_lowercase()).collect(),
            search,
            max_results: 1,
        }
    }

    /// Create an assembler from runtime configuration
    #[must_use]
    pub fn from_config(config: &Config, search: Arc<dyn SearchService>) -> Self {
        Self::new(
            config.llm.system_prompt.clone(),
            config.context.history_window,
            config.search.triggers.clone(),
            search,
        )
        .with_max_results(config.search.max_results)
    }

    /// Set the number of results requested per lookup
    #[must_use]
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    /// Number of history turns included per request
    #[must_use]
    pub const fn history_window(&self) -> usize {
        self.history_window
    }

    /// Append the user turn to history and build the un-augmented message list
    ///
    /// The result holds at most `history_window + 1` messages.
    #[must_use]
    pub fn build(&self, user_text: &str, session: &SessionState) -> Vec<Turn> {
        let window = session.append_and_window(Turn::user(user_text), self.history_window);

        let mut messages = Vec::with_capacity(window.len() + 1);
        messages.push(Turn::system(self.system_prompt.clone()));
        messages.extend(window);
        messages
    }

    /// Whether `user_text` contains a trigger word
    #[must_use]
    pub fn should_augment(&self, user_text: &str) -> bool {
        let lowered = user_text.to_lowercase();
        self.triggers.iter().any(|t| !t.is_empty() && lowered.contains(t.as_str()))
    }

    /// Run one lookup for `user_text` and append the first result to the last message
    ///
    /// Returns true if a snippet was added. Lookup failures and empty results
    /// leave `messages` untouched.
    pub async fn augment(&self, messages: &mut [Turn], user_text: &str) -> bool {
        let results = match self.search.search(user_text, self.max_results).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(error = %e, "search failed, continuing without context");
                return false;
            }
        };

        let Some(first) = results.into_iter().next() else {
            tracing::debug!("search returned no results");
            return false;
        };

        let Some(last) = messages.last_mut() else {
            return false;
        };

        last.content.push_str(&format!("\n[Context: {}]", first.body));
        tracing::debug!(title = %first.title, "augmented message with search result");
        true
    }

    /// Build and, when triggered, augment the message list in one call
    pub async fn assemble(&self, user_text: &str, session: &SessionState) -> AssembledContext {
        let mut messages = self.build(user_text, session);
        let augmented =
            self.should_augment(user_text) && self.augment(&mut messages, user_text).await;
        AssembledContext {
            messages,
            augmented,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::session::Role;
    use crate::tools::SearchResult;
    use crate::{Error, Result};

    #[derive(Default)]
    struct StubSearch {
        body: Option<String>,
        fail: bool,
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SearchService for StubSearch {
        async fn search(&self, query: &str, _max_results: usize) -> Result<Vec<SearchResult>> {
            self.queries.lock().unwrap().push(query.to_string());
            if self.fail {
                return Err(Error::Search("offline".to_string()));
            }
            Ok(self
                .body
                .iter()
                .map(|b| SearchResult {
                    title: "t".to_string(),
                    url: "https://example.com".to_string(),
                    body: b.clone(),
                })
                .collect())
        }
    }

    fn assembler(search: Arc<StubSearch>, k: usize) -> ContextAssembler {
        ContextAssembler::new(
            "You are Sora.",
            k,
            vec!["search".into(), "news".into(), "Weather".into()],
            search,
        )
    }

    #[test]
    fn test_build_windows_history() {
        let session = SessionState::new("m", "v", false);
        for i in 0..10 {
            session.append_turn(Turn::user(format!("old {i}")));
        }

        let a = assembler(Arc::new(StubSearch::default()), 5);
        let messages = a.build("latest", &session);

        assert_eq!(messages.len(), 6);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[5], Turn::user("latest"));
        assert_eq!(session.history().len(), 11);
    }

    #[tokio::test]
    async fn test_zero_window_still_sends_user_text() {
        let search = Arc::new(StubSearch {
            body: Some("Rain later".into()),
            ..StubSearch::default()
        });
        let session = SessionState::new("m", "v", false);
        session.append_turn(Turn::user("earlier"));
        let a = assembler(search, 0);
        assert_eq!(a.history_window(), 1);

        let assembled = a.assemble("weather tonight?", &session).await;

        assert_eq!(assembled.messages.len(), 2);
        assert_eq!(assembled.messages[0], Turn::system("You are Sora."));
        assert_eq!(
            assembled.messages[1],
            Turn::user("weather tonight?\n[Context: Rain later]")
        );
    }

    #[test]
    fn test_should_augment_case_insensitive() {
        let a = assembler(Arc::new(StubSearch::default()), 5);
        assert!(a.should_augment("What's the WEATHER today"));
        assert!(a.should_augment("any news?"));
        assert!(!a.should_augment("hello"));
    }

    #[tokio::test]
    async fn test_assemble_appends_snippet_to_last_message() {
        let search = Arc::new(StubSearch {
            body: Some("Sunny, 21C".into()),
            ..StubSearch::default()
        });
        let session = SessionState::new("m", "v", false);
        let a = assembler(Arc::clone(&search), 5);

        let assembled = a.assemble("what's the weather", &session).await;

        assert!(assembled.augmented);
        assert_eq!(
            assembled.messages.last().unwrap().content,
            "what's the weather\n[Context: Sunny, 21C]"
        );
        // History keeps the plain user text
        assert_eq!(session.history().turns()[0].content, "what's the weather");
        assert_eq!(search.queries.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_search_failure_is_swallowed() {
        let search = Arc::new(StubSearch {
            fail: true,
            ..StubSearch::default()
        });
        let session = SessionState::new("m", "v", false);
        let a = assembler(search, 5);

        let assembled = a.assemble("search rust", &session).await;
        assert!(!assembled.augmented);
        assert_eq!(assembled.messages.last().unwrap().content, "search rust");
    }

    #[tokio::test]
    async fn test_no_lookup_without_trigger() {
        let search = Arc::new(StubSearch::default());
        let session = SessionState::new("m", "v", false);
        let a = assembler(Arc::clone(&search), 5);

        let assembled = a.assemble("hello", &session).await;
        assert!(!assembled.augmented);
        assert!(search.queries.lock().unwrap().is_empty());
    }
}
