// Application State Module

use super::config::Config;
use crate::answers::AnswerBook;
use crate::dispatcher::FailureInjector;
use crate::stats::SharedStats;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub stats: SharedStats,
    pub injector: FailureInjector,
    pub answers: AnswerBook,
}

impl AppState {
    pub fn new(config: Config, stats: SharedStats) -> Self {
        let injector = config.failure_injector();
        let answers = config.answer_book();
        Self {
            config,
            stats,
            injector,
            answers,
        }
    }

    /// Replace the failure injector, e.g. to pin it for tests
    pub fn with_injector(mut self, injector: FailureInjector) -> Self {
        self.injector = injector;
        self
    }
}
