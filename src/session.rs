//! Application context: everything a front end needs to drive the glossary,
//! reached through [`Glossary::dispatch`].

use crate::games::{
    AnswerOutcome, GuessOutcome, HangmanRound, HangmanView, TRIVIA_ADVANCE_DELAY,
    SessionScore, TRIVIA_COMBO_THRESHOLD, TRIVIA_TICK, TickOutcome, TriviaEngine, TriviaStatus,
    TriviaView,
};
use crate::preferences::{KeyValueStore, RecentQueries, Theme};
use crate::schedule::{Scheduler, TaskHandle};
use crate::{DatasetError, SUGGESTION_LIMIT, Term, TermStore, alphabetic_index, category_tagline};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Quiet period after the last keystroke before suggestions are computed.
pub const SEARCH_DEBOUNCE: Duration = Duration::from_millis(250);

const WIN_MESSAGE: &str = "Has demostrado un gran conocimiento técnico.";
const EMPTY_STORE_MESSAGE: &str = "No hay términos disponibles para jugar.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameKind {
    Hangman,
    Trivia,
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameKind::Hangman => write!(f, "hangman"),
            GameKind::Trivia => write!(f, "trivia"),
        }
    }
}

impl FromStr for GameKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "hangman" | "ahorcado" => Ok(GameKind::Hangman),
            "trivia" => Ok(GameKind::Trivia),
            other => Err(format!("unknown game {other:?}")),
        }
    }
}

/// User intent delivered by a front end.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// The search box changed. Suggestions follow after [`SEARCH_DEBOUNCE`].
    QueryChanged(String),
    /// A suggestion or the raw query was chosen.
    Select(String),
    ToggleCategory(String),
    GoHome,
    ShowHistory,
    ToggleTheme,
    StartGame(GameKind),
    NextRound,
    Guess(char),
    Answer(String),
    LeaveGame,
    /// Wall-clock time passed since the previous command.
    Advance(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedTerm {
    pub term: Term,
    pub score: u32,
}

/// Render-ready state emitted back to the front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Home {
        total: usize,
    },
    Suggestions {
        query: String,
        hits: Vec<RankedTerm>,
    },
    RecentQueries {
        queries: Vec<String>,
    },
    Results {
        count: usize,
        terms: Vec<Term>,
    },
    Category {
        category: String,
        tagline: Option<&'static str>,
        count: usize,
        terms: Vec<Term>,
        index: Vec<String>,
    },
    Theme {
        theme: Theme,
    },
    Hangman {
        view: HangmanView,
    },
    Trivia {
        view: TriviaView,
    },
    Countdown {
        remaining_ms: u64,
    },
    Combo {
        combo: u32,
        visible: bool,
    },
    Score {
        points: u32,
    },
    RoundOver {
        won: bool,
        message: String,
        points: u32,
    },
    Hub,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Task {
    Search(String),
    CountdownTick,
    NextTriviaRound,
}

/// The mutable state behind one glossary front end.
pub struct Glossary {
    store: Arc<TermStore>,
    load_error: Option<String>,
    prefs: Box<dyn KeyValueStore>,
    recent: RecentQueries,
    theme: Theme,
    active_category: Option<String>,
    game: Option<GameKind>,
    score: SessionScore,
    hangman: Option<HangmanRound>,
    trivia: TriviaEngine,
    scheduler: Scheduler<Task>,
    pending_search: Option<TaskHandle>,
    pending_advance: Option<TaskHandle>,
    rng: SmallRng,
}

impl Glossary {
    pub fn new(store: Arc<TermStore>, prefs: Box<dyn KeyValueStore>, rng: SmallRng) -> Self {
        let recent = RecentQueries::restore(prefs.as_ref());
        let theme = Theme::restore(prefs.as_ref());
        Self {
            store,
            load_error: None,
            prefs,
            recent,
            theme,
            active_category: None,
            game: None,
            score: SessionScore::default(),
            hangman: None,
            trivia: TriviaEngine::new(),
            scheduler: Scheduler::new(),
            pending_search: None,
            pending_advance: None,
            rng,
        }
    }

    /// Builds a context from a dataset load attempt. A failed load yields an
    /// empty store and remembers the fault for display.
    pub fn from_load(
        loaded: Result<TermStore, DatasetError>,
        prefs: Box<dyn KeyValueStore>,
        rng: SmallRng,
    ) -> Self {
        match loaded {
            Ok(store) => Self::new(Arc::new(store), prefs, rng),
            Err(err) => {
                warn!(error = %err, "running with an empty glossary");
                let mut glossary = Self::new(Arc::new(TermStore::default()), prefs, rng);
                glossary.load_error = Some(err.to_string());
                glossary
            }
        }
    }

    /// Seeded or entropy-backed generator for game sampling.
    pub fn rng_from_seed(seed: Option<u64>) -> SmallRng {
        match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        }
    }

    pub fn store(&self) -> &TermStore {
        &self.store
    }

    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    pub fn recent_queries(&self) -> &[String] {
        self.recent.list()
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn active_category(&self) -> Option<&str> {
        self.active_category.as_deref()
    }

    pub fn active_game(&self) -> Option<GameKind> {
        self.game
    }

    pub fn score(&self) -> u32 {
        self.score.current()
    }

    pub fn combo(&self) -> u32 {
        self.trivia.combo()
    }

    /// Number of timers still waiting to fire.
    pub fn pending_timers(&self) -> usize {
        self.scheduler.pending()
    }

    /// Current game screen, if a round exists.
    pub fn game_view(&self) -> Option<Event> {
        match self.game? {
            GameKind::Hangman => self.hangman.as_ref().map(|round| Event::Hangman {
                view: round.view(),
            }),
            GameKind::Trivia => self.trivia.view().map(|view| Event::Trivia { view }),
        }
    }

    pub fn dispatch(&mut self, command: Command) -> Vec<Event> {
        debug!(?command, "dispatch");
        match command {
            Command::QueryChanged(query) => self.query_changed(query),
            Command::Select(text) => self.select(&text),
            Command::ToggleCategory(category) => self.toggle_category(&category),
            Command::GoHome => self.go_home(),
            Command::ShowHistory => vec![self.recent_event()],
            Command::ToggleTheme => self.toggle_theme(),
            Command::StartGame(kind) => self.start_game(kind),
            Command::NextRound => self.next_round(),
            Command::Guess(letter) => self.guess(letter),
            Command::Answer(term) => self.answer(&term),
            Command::LeaveGame => self.leave_game(),
            Command::Advance(elapsed) => self.advance(elapsed),
        }
    }

    fn query_changed(&mut self, query: String) -> Vec<Event> {
        self.cancel_search();
        if query.trim().is_empty() {
            let mut events = vec![self.recent_event()];
            if self.active_category.is_none() {
                events.push(self.home_event());
            }
            return events;
        }
        let handle = self
            .scheduler
            .schedule_once(SEARCH_DEBOUNCE, Task::Search(query));
        self.pending_search = Some(handle);
        Vec::new()
    }

    fn run_search(&self, query: String) -> Event {
        let hits = self
            .store
            .suggestions(&query, SUGGESTION_LIMIT)
            .into_iter()
            .map(|hit| RankedTerm {
                term: hit.term.clone(),
                score: hit.score,
            })
            .collect();
        Event::Suggestions { query, hits }
    }

    fn select(&mut self, text: &str) -> Vec<Event> {
        self.cancel_search();
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }
        self.recent.record(text);
        self.recent.save(self.prefs.as_ref());
        let terms: Vec<Term> = self.store.lookup(text).into_iter().cloned().collect();
        vec![Event::Results {
            count: terms.len(),
            terms,
        }]
    }

    fn toggle_category(&mut self, category: &str) -> Vec<Event> {
        let category = category.trim().to_lowercase();
        if self.active_category.as_deref() == Some(category.as_str()) {
            return self.go_home();
        }
        let rows = self.store.filter_by_category(&category);
        let index = alphabetic_index(&rows);
        let terms: Vec<Term> = rows.into_iter().cloned().collect();
        self.active_category = Some(category.clone());
        vec![Event::Category {
            tagline: category_tagline(&category),
            category,
            count: terms.len(),
            terms,
            index,
        }]
    }

    fn go_home(&mut self) -> Vec<Event> {
        self.cancel_search();
        self.active_category = None;
        vec![self.home_event()]
    }

    fn toggle_theme(&mut self) -> Vec<Event> {
        self.theme = self.theme.toggled();
        self.theme.save(self.prefs.as_ref());
        vec![Event::Theme { theme: self.theme }]
    }

    fn start_game(&mut self, kind: GameKind) -> Vec<Event> {
        self.end_game_timers();
        self.score.reset_session();
        self.trivia.reset_session();
        self.hangman = None;
        self.game = Some(kind);
        let mut events = vec![self.score_event()];
        events.extend(self.start_round());
        events
    }

    fn next_round(&mut self) -> Vec<Event> {
        let unanswered = self.game == Some(GameKind::Trivia)
            && self
                .trivia
                .round()
                .is_some_and(|round| round.status() == TriviaStatus::AwaitingAnswer);
        if self.game.is_none() || unanswered {
            return Vec::new();
        }
        self.start_round()
    }

    fn start_round(&mut self) -> Vec<Event> {
        self.end_game_timers();
        let started = match self.game {
            Some(GameKind::Hangman) => {
                self.hangman = HangmanRound::start(&self.store, &mut self.rng);
                self.hangman.is_some()
            }
            Some(GameKind::Trivia) => {
                let started = self.trivia.start_round(&self.store, &mut self.rng).is_some();
                if started {
                    let handle = self
                        .scheduler
                        .schedule_repeating(TRIVIA_TICK, Task::CountdownTick);
                    self.trivia.arm(handle);
                }
                started
            }
            None => return Vec::new(),
        };
        if !started {
            return vec![self.round_over(false, EMPTY_STORE_MESSAGE.to_string())];
        }
        self.game_view().into_iter().collect()
    }

    fn guess(&mut self, letter: char) -> Vec<Event> {
        if self.game != Some(GameKind::Hangman) {
            return Vec::new();
        }
        let Some(round) = self.hangman.as_mut() else {
            return Vec::new();
        };
        let outcome = round.guess(letter, &mut self.score);
        let view = round.view();
        match outcome {
            GuessOutcome::Ignored => Vec::new(),
            GuessOutcome::Hit | GuessOutcome::Miss => vec![Event::Hangman { view }],
            GuessOutcome::Won { .. } => vec![
                Event::Hangman { view },
                self.score_event(),
                self.round_over(true, WIN_MESSAGE.to_string()),
            ],
            GuessOutcome::Lost { word } => vec![
                Event::Hangman { view },
                self.round_over(false, format!("La palabra era: {word}")),
            ],
        }
    }

    fn answer(&mut self, term: &str) -> Vec<Event> {
        if self.game != Some(GameKind::Trivia) {
            return Vec::new();
        }
        match self.trivia.answer(term, &mut self.score) {
            AnswerOutcome::Ignored => Vec::new(),
            AnswerOutcome::Correct { combo, .. } => {
                self.cancel_countdown();
                let handle = self
                    .scheduler
                    .schedule_once(TRIVIA_ADVANCE_DELAY, Task::NextTriviaRound);
                self.pending_advance = Some(handle);
                let mut events = vec![self.score_event()];
                if combo >= TRIVIA_COMBO_THRESHOLD {
                    events.push(Event::Combo {
                        combo,
                        visible: true,
                    });
                }
                events.extend(self.game_view());
                events
            }
            AnswerOutcome::Incorrect { translation } => {
                self.cancel_countdown();
                vec![
                    Event::Combo {
                        combo: 0,
                        visible: false,
                    },
                    self.round_over(false, format!("Incorrecto. La traducción era: {translation}")),
                ]
            }
        }
    }

    fn leave_game(&mut self) -> Vec<Event> {
        self.end_game_timers();
        self.game = None;
        self.hangman = None;
        self.trivia.reset_session();
        vec![Event::Hub]
    }

    fn advance(&mut self, elapsed: Duration) -> Vec<Event> {
        let deadline = self.scheduler.now() + elapsed;
        let mut events = Vec::new();
        while let Some(fired) = self.scheduler.poll(deadline) {
            match fired.task {
                Task::Search(query) => {
                    self.pending_search = None;
                    events.push(self.run_search(query));
                }
                Task::CountdownTick => match self.trivia.tick(fired.handle, TRIVIA_TICK) {
                    TickOutcome::Ignored => {
                        self.scheduler.cancel(fired.handle);
                    }
                    TickOutcome::Running { remaining } => events.push(Event::Countdown {
                        remaining_ms: remaining.as_millis() as u64,
                    }),
                    TickOutcome::Expired { translation } => {
                        self.cancel_countdown();
                        self.scheduler.cancel(fired.handle);
                        events.push(Event::Countdown { remaining_ms: 0 });
                        events.push(Event::Combo {
                            combo: 0,
                            visible: false,
                        });
                        events.push(self.round_over(
                            false,
                            format!("¡Tiempo agotado! La traducción era: {translation}"),
                        ));
                    }
                },
                Task::NextTriviaRound => {
                    self.pending_advance = None;
                    if self.game == Some(GameKind::Trivia) {
                        events.extend(self.start_round());
                    }
                }
            }
        }
        self.scheduler.settle(deadline);
        events
    }

    fn cancel_search(&mut self) {
        if let Some(handle) = self.pending_search.take() {
            self.scheduler.cancel(handle);
        }
    }

    fn cancel_countdown(&mut self) {
        if let Some(handle) = self.trivia.disarm() {
            self.scheduler.cancel(handle);
        }
    }

    /// Cancels every game timer: countdown and pending auto-advance.
    fn end_game_timers(&mut self) {
        self.cancel_countdown();
        if let Some(handle) = self.pending_advance.take() {
            self.scheduler.cancel(handle);
        }
    }

    fn home_event(&self) -> Event {
        Event::Home {
            total: self.store.len(),
        }
    }

    fn recent_event(&self) -> Event {
        Event::RecentQueries {
            queries: self.recent.list().to_vec(),
        }
    }

    fn score_event(&self) -> Event {
        Event::Score {
            points: self.score.current(),
        }
    }

    fn round_over(&self, won: bool, message: String) -> Event {
        Event::RoundOver {
            won,
            message,
            points: self.score.current(),
        }
    }
}
