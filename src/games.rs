//! Word games played against the loaded glossary.

use crate::schedule::TaskHandle;
use crate::{Term, TermStore};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::time::Duration;

pub const HANGMAN_ATTEMPTS: u8 = 6;
pub const HANGMAN_WIN_BONUS: u32 = 50;

pub const TRIVIA_OPTIONS: usize = 4;
pub const TRIVIA_TIME: Duration = Duration::from_secs(10);
pub const TRIVIA_TICK: Duration = Duration::from_millis(100);
pub const TRIVIA_POINTS: u32 = 10;
pub const TRIVIA_COMBO_BONUS: u32 = 5;
pub const TRIVIA_COMBO_THRESHOLD: u32 = 3;
/// Pause between a correct answer and the next question.
pub const TRIVIA_ADVANCE_DELAY: Duration = Duration::from_millis(600);

/// Points accumulated over one game session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionScore {
    points: u32,
}

impl SessionScore {
    pub fn reset_session(&mut self) {
        self.points = 0;
    }

    pub fn award(&mut self, points: u32) {
        self.points = self.points.saturating_add(points);
    }

    pub fn current(&self) -> u32 {
        self.points
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HangmanStatus {
    InProgress,
    Won,
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuessOutcome {
    /// Repeated letter, non-letter input, or the round is already over.
    Ignored,
    Hit,
    Miss,
    Won { bonus: u32 },
    Lost { word: String },
}

/// Characters that are never guessed: the mask shows them from the start.
fn shown_free(ch: char) -> bool {
    ch.is_whitespace() || ch.is_control()
}

#[derive(Debug, Clone)]
pub struct HangmanRound {
    word: String,
    guessed: Vec<char>,
    attempts_left: u8,
    hint: String,
    status: HangmanStatus,
}

impl HangmanRound {
    pub fn new(term: &Term) -> Self {
        Self {
            word: term.term.to_uppercase(),
            guessed: Vec::new(),
            attempts_left: HANGMAN_ATTEMPTS,
            hint: term.definition.clone(),
            status: HangmanStatus::InProgress,
        }
    }

    /// Picks a random term with at least one letter to guess.
    pub fn start<R: Rng + ?Sized>(store: &TermStore, rng: &mut R) -> Option<Self> {
        let candidates: Vec<&Term> = store
            .all()
            .iter()
            .filter(|term| term.term.chars().any(|ch| !shown_free(ch)))
            .collect();
        candidates.choose(rng).map(|term| Self::new(term))
    }

    pub fn guess(&mut self, letter: char, score: &mut SessionScore) -> GuessOutcome {
        if self.status != HangmanStatus::InProgress {
            return GuessOutcome::Ignored;
        }
        let mut upper = letter.to_uppercase();
        let (Some(letter), None) = (upper.next(), upper.next()) else {
            return GuessOutcome::Ignored;
        };
        if shown_free(letter) || self.guessed.contains(&letter) {
            return GuessOutcome::Ignored;
        }
        self.guessed.push(letter);
        let hit = self.word.contains(letter);
        if !hit {
            self.attempts_left = self.attempts_left.saturating_sub(1);
        }

        if self.is_solved() {
            self.status = HangmanStatus::Won;
            score.award(HANGMAN_WIN_BONUS);
            GuessOutcome::Won {
                bonus: HANGMAN_WIN_BONUS,
            }
        } else if self.attempts_left == 0 {
            self.status = HangmanStatus::Lost;
            GuessOutcome::Lost {
                word: self.word.clone(),
            }
        } else if hit {
            GuessOutcome::Hit
        } else {
            GuessOutcome::Miss
        }
    }

    fn is_solved(&self) -> bool {
        self.word
            .chars()
            .filter(|ch| !shown_free(*ch))
            .all(|ch| self.guessed.contains(&ch))
    }

    pub fn status(&self) -> HangmanStatus {
        self.status
    }

    pub fn attempts_left(&self) -> u8 {
        self.attempts_left
    }

    pub fn hint(&self) -> &str {
        &self.hint
    }

    /// The target word, only once the round is over.
    pub fn revealed_word(&self) -> Option<&str> {
        (self.status != HangmanStatus::InProgress).then_some(self.word.as_str())
    }

    /// One `_` per unguessed character; whitespace is always shown.
    pub fn masked(&self) -> String {
        self.word
            .chars()
            .map(|ch| {
                if shown_free(ch) || self.guessed.contains(&ch) {
                    ch
                } else {
                    '_'
                }
            })
            .collect()
    }

    pub fn view(&self) -> HangmanView {
        let (hits, misses): (Vec<char>, Vec<char>) = self
            .guessed
            .iter()
            .copied()
            .partition(|letter| self.word.contains(*letter));
        HangmanView {
            masked: self.masked(),
            hint: self.hint.clone(),
            attempts_left: self.attempts_left,
            max_attempts: HANGMAN_ATTEMPTS,
            hits,
            misses,
            status: self.status,
            word: self.revealed_word().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HangmanView {
    pub masked: String,
    pub hint: String,
    pub attempts_left: u8,
    pub max_attempts: u8,
    pub hits: Vec<char>,
    pub misses: Vec<char>,
    pub status: HangmanStatus,
    pub word: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Correct,
    Incorrect,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "verdict", rename_all = "snake_case")]
pub enum TriviaStatus {
    AwaitingAnswer,
    Answered(Verdict),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// No open question, or the term is not one of its options.
    Ignored,
    Correct {
        points: u32,
        combo: u32,
        combo_bonus: bool,
    },
    Incorrect {
        translation: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Stale handle, or no question is waiting for an answer.
    Ignored,
    Running { remaining: Duration },
    Expired { translation: String },
}

#[derive(Debug, Clone)]
pub struct TriviaRound {
    correct: Term,
    options: Vec<Term>,
    remaining: Duration,
    status: TriviaStatus,
    timer: Option<TaskHandle>,
}

impl TriviaRound {
    pub fn correct(&self) -> &Term {
        &self.correct
    }

    pub fn options(&self) -> &[Term] {
        &self.options
    }

    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    pub fn status(&self) -> TriviaStatus {
        self.status
    }
}

/// Sequences trivia questions and tracks the answer streak across them.
#[derive(Debug, Clone, Default)]
pub struct TriviaEngine {
    round: Option<TriviaRound>,
    combo: u32,
}

impl TriviaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops any open question and clears the streak.
    pub fn reset_session(&mut self) {
        self.round = None;
        self.combo = 0;
    }

    pub fn combo(&self) -> u32 {
        self.combo
    }

    pub fn round(&self) -> Option<&TriviaRound> {
        self.round.as_ref()
    }

    /// Opens a new question, keeping the current streak. Returns `None` on an
    /// empty store.
    pub fn start_round<R: Rng + ?Sized>(
        &mut self,
        store: &TermStore,
        rng: &mut R,
    ) -> Option<&TriviaRound> {
        let correct = store.all().choose(rng)?.clone();
        let distractors: Vec<&Term> = store
            .all()
            .iter()
            .filter(|term| term.term != correct.term)
            .collect();
        let mut options: Vec<Term> = distractors
            .choose_multiple(rng, TRIVIA_OPTIONS - 1)
            .map(|term| (*term).clone())
            .collect();
        options.push(correct.clone());
        options.shuffle(rng);
        self.round = Some(TriviaRound {
            correct,
            options,
            remaining: TRIVIA_TIME,
            status: TriviaStatus::AwaitingAnswer,
            timer: None,
        });
        self.round.as_ref()
    }

    /// Binds the countdown task that drives the open question.
    pub fn arm(&mut self, handle: TaskHandle) {
        if let Some(round) = self.round.as_mut() {
            round.timer = Some(handle);
        }
    }

    /// Unbinds and returns the countdown task so the caller can cancel it.
    pub fn disarm(&mut self) -> Option<TaskHandle> {
        self.round.as_mut().and_then(|round| round.timer.take())
    }

    pub fn tick(&mut self, handle: TaskHandle, elapsed: Duration) -> TickOutcome {
        let Some(round) = self.round.as_mut() else {
            return TickOutcome::Ignored;
        };
        if round.status != TriviaStatus::AwaitingAnswer || round.timer != Some(handle) {
            return TickOutcome::Ignored;
        }
        round.remaining = round.remaining.saturating_sub(elapsed);
        if !round.remaining.is_zero() {
            return TickOutcome::Running {
                remaining: round.remaining,
            };
        }
        round.status = TriviaStatus::Answered(Verdict::Timeout);
        round.timer = None;
        self.combo = 0;
        TickOutcome::Expired {
            translation: round.correct.translation.clone(),
        }
    }

    pub fn answer(&mut self, selected: &str, score: &mut SessionScore) -> AnswerOutcome {
        let Some(round) = self.round.as_mut() else {
            return AnswerOutcome::Ignored;
        };
        if round.status != TriviaStatus::AwaitingAnswer
            || !round.options.iter().any(|option| option.term == selected)
        {
            return AnswerOutcome::Ignored;
        }
        if selected != round.correct.term {
            round.status = TriviaStatus::Answered(Verdict::Incorrect);
            self.combo = 0;
            return AnswerOutcome::Incorrect {
                translation: round.correct.translation.clone(),
            };
        }
        round.status = TriviaStatus::Answered(Verdict::Correct);
        self.combo += 1;
        let combo_bonus = self.combo >= TRIVIA_COMBO_THRESHOLD;
        let points = if combo_bonus {
            TRIVIA_POINTS + TRIVIA_COMBO_BONUS
        } else {
            TRIVIA_POINTS
        };
        score.award(points);
        AnswerOutcome::Correct {
            points,
            combo: self.combo,
            combo_bonus,
        }
    }

    pub fn view(&self) -> Option<TriviaView> {
        let round = self.round.as_ref()?;
        Some(TriviaView {
            prompt: round.correct.term.clone(),
            options: round
                .options
                .iter()
                .map(|option| TriviaOption {
                    term: option.term.clone(),
                    translation: option.translation.clone(),
                })
                .collect(),
            remaining_ms: round.remaining.as_millis() as u64,
            combo: self.combo,
            status: round.status,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriviaOption {
    pub term: String,
    pub translation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriviaView {
    pub prompt: String,
    pub options: Vec<TriviaOption>,
    pub remaining_ms: u64,
    pub combo: u32,
    pub status: TriviaStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::Scheduler;
    use crate::tests::record;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn term(word: &str) -> Term {
        Term::from(record(word, &format!("{word}-en"), "informatica"))
    }

    fn store(words: &[&str]) -> TermStore {
        TermStore::load(
            words
                .iter()
                .map(|word| record(word, &format!("{word}-en"), "informatica")),
        )
    }

    fn handle() -> TaskHandle {
        Scheduler::<()>::new().schedule_once(Duration::ZERO, ())
    }

    #[test]
    fn score_resets_and_accumulates() {
        let mut score = SessionScore::default();
        score.award(10);
        score.award(15);
        assert_eq!(score.current(), 25);
        score.reset_session();
        assert_eq!(score.current(), 0);
    }

    #[test]
    fn guessing_every_letter_wins_with_bonus() {
        let mut score = SessionScore::default();
        let mut round = HangmanRound::new(&term("Cloud"));
        assert_eq!(round.masked(), "_____");
        for letter in ['c', 'l', 'o', 'u'] {
            assert_eq!(round.guess(letter, &mut score), GuessOutcome::Hit);
        }
        assert_eq!(round.guess('d', &mut score), GuessOutcome::Won { bonus: 50 });
        assert_eq!(round.status(), HangmanStatus::Won);
        assert_eq!(round.attempts_left(), HANGMAN_ATTEMPTS);
        assert_eq!(score.current(), 50);
        assert_eq!(round.guess('x', &mut score), GuessOutcome::Ignored);
        assert_eq!(round.attempts_left(), HANGMAN_ATTEMPTS);
    }

    #[test]
    fn six_misses_lose_and_reveal_word() {
        let mut score = SessionScore::default();
        let mut round = HangmanRound::new(&term("Cloud"));
        for letter in ['A', 'B', 'E', 'F', 'G'] {
            assert_eq!(round.guess(letter, &mut score), GuessOutcome::Miss);
        }
        assert!(round.revealed_word().is_none());
        assert_eq!(
            round.guess('H', &mut score),
            GuessOutcome::Lost {
                word: "CLOUD".to_string()
            }
        );
        assert_eq!(round.revealed_word(), Some("CLOUD"));
        assert_eq!(score.current(), 0);
        assert_eq!(round.guess('C', &mut score), GuessOutcome::Ignored);
    }

    #[test]
    fn repeated_and_blank_guesses_are_ignored() {
        let mut score = SessionScore::default();
        let mut round = HangmanRound::new(&term("Red"));
        assert_eq!(round.guess('z', &mut score), GuessOutcome::Miss);
        assert_eq!(round.guess('Z', &mut score), GuessOutcome::Ignored);
        assert_eq!(round.guess(' ', &mut score), GuessOutcome::Ignored);
        assert_eq!(round.attempts_left(), HANGMAN_ATTEMPTS - 1);
    }

    #[test]
    fn spaces_are_free_in_multiword_targets() {
        let mut score = SessionScore::default();
        let mut round = HangmanRound::new(&term("Red lan"));
        assert_eq!(round.masked(), "___ ___");
        for letter in ['r', 'e', 'd', 'l', 'a'] {
            round.guess(letter, &mut score);
        }
        assert_eq!(round.masked(), "RED LA_");
        assert_eq!(round.guess('n', &mut score), GuessOutcome::Won { bonus: 50 });
        let view = round.view();
        assert_eq!(view.word.as_deref(), Some("RED LAN"));
        assert!(view.misses.is_empty());
    }

    #[test]
    fn tabs_and_nonbreaking_spaces_are_free_too() {
        let mut score = SessionScore::default();
        let mut round = HangmanRound::new(&term("Ip\tv\u{a0}6"));
        assert_eq!(round.masked(), "__\t_\u{a0}_");
        assert_eq!(round.guess('\u{a0}', &mut score), GuessOutcome::Ignored);
        for letter in ['i', 'p', 'v'] {
            round.guess(letter, &mut score);
        }
        assert_eq!(round.guess('6', &mut score), GuessOutcome::Won { bonus: 50 });
        assert_eq!(round.status(), HangmanStatus::Won);
    }

    #[test]
    fn hangman_needs_a_nonblank_term() {
        let mut rng = SmallRng::seed_from_u64(7);
        assert!(HangmanRound::start(&TermStore::default(), &mut rng).is_none());
        let round = HangmanRound::start(&store(&["Nube"]), &mut rng).unwrap();
        assert_eq!(round.masked(), "____");
        assert_eq!(round.hint(), "");
    }

    #[test]
    fn trivia_round_has_four_distinct_options_including_answer() {
        let store = store(&["API", "Bucle", "Caché", "Dato", "Red", "Nube"]);
        let mut rng = SmallRng::seed_from_u64(42);
        let mut engine = TriviaEngine::new();
        let round = engine.start_round(&store, &mut rng).unwrap();
        assert_eq!(round.options().len(), TRIVIA_OPTIONS);
        assert!(round.options().contains(round.correct()));
        let mut names: Vec<_> = round.options().iter().map(|t| t.term.clone()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), TRIVIA_OPTIONS);
        assert_eq!(round.remaining(), TRIVIA_TIME);
    }

    #[test]
    fn same_seed_same_question() {
        let store = store(&["API", "Bucle", "Caché", "Dato", "Red", "Nube"]);
        let mut first = TriviaEngine::new();
        let mut second = TriviaEngine::new();
        first.start_round(&store, &mut SmallRng::seed_from_u64(9));
        second.start_round(&store, &mut SmallRng::seed_from_u64(9));
        assert_eq!(first.view(), second.view());
    }

    #[test]
    fn small_store_yields_fewer_options() {
        let store = store(&["API", "Bucle"]);
        let mut engine = TriviaEngine::new();
        let round = engine
            .start_round(&store, &mut SmallRng::seed_from_u64(1))
            .unwrap();
        assert_eq!(round.options().len(), 2);
        assert!(engine.start_round(&TermStore::default(), &mut SmallRng::seed_from_u64(1)).is_none());
    }

    #[test]
    fn three_correct_answers_score_thirty_five_then_miss_resets() {
        let store = store(&["API", "Bucle", "Caché", "Dato", "Red", "Nube"]);
        let mut rng = SmallRng::seed_from_u64(3);
        let mut engine = TriviaEngine::new();
        let mut score = SessionScore::default();
        for expected_bonus in [false, false, true] {
            let answer = engine.start_round(&store, &mut rng).unwrap().correct().term.clone();
            let outcome = engine.answer(&answer, &mut score);
            let AnswerOutcome::Correct { combo_bonus, .. } = outcome else {
                panic!("expected a correct answer, got {outcome:?}");
            };
            assert_eq!(combo_bonus, expected_bonus);
        }
        assert_eq!(score.current(), 35);
        assert_eq!(engine.combo(), 3);

        let round = engine.start_round(&store, &mut rng).unwrap();
        let wrong = round
            .options()
            .iter()
            .find(|option| option.term != round.correct().term)
            .unwrap()
            .term
            .clone();
        let translation = round.correct().translation.clone();
        assert_eq!(
            engine.answer(&wrong, &mut score),
            AnswerOutcome::Incorrect { translation }
        );
        assert_eq!(engine.combo(), 0);
        assert_eq!(score.current(), 35);
    }

    #[test]
    fn answers_outside_the_options_or_after_the_round_are_ignored() {
        let store = store(&["API", "Bucle", "Caché", "Dato", "Red", "Nube"]);
        let mut engine = TriviaEngine::new();
        let mut score = SessionScore::default();
        assert_eq!(engine.answer("API", &mut score), AnswerOutcome::Ignored);
        let correct = engine
            .start_round(&store, &mut SmallRng::seed_from_u64(5))
            .unwrap()
            .correct()
            .term
            .clone();
        assert_eq!(engine.answer("Inexistente", &mut score), AnswerOutcome::Ignored);
        assert!(matches!(engine.answer(&correct, &mut score), AnswerOutcome::Correct { .. }));
        assert_eq!(engine.answer(&correct, &mut score), AnswerOutcome::Ignored);
        assert_eq!(score.current(), TRIVIA_POINTS);
    }

    #[test]
    fn countdown_expires_and_breaks_the_streak() {
        let store = store(&["API", "Bucle", "Caché", "Dato"]);
        let mut rng = SmallRng::seed_from_u64(11);
        let mut engine = TriviaEngine::new();
        let mut score = SessionScore::default();
        let answer = engine.start_round(&store, &mut rng).unwrap().correct().term.clone();
        engine.answer(&answer, &mut score);
        assert_eq!(engine.combo(), 1);

        engine.start_round(&store, &mut rng);
        let timer = handle();
        engine.arm(timer);
        for _ in 0..99 {
            assert!(matches!(engine.tick(timer, TRIVIA_TICK), TickOutcome::Running { .. }));
        }
        assert!(matches!(engine.tick(timer, TRIVIA_TICK), TickOutcome::Expired { .. }));
        assert_eq!(engine.combo(), 0);
        assert_eq!(
            engine.round().unwrap().status(),
            TriviaStatus::Answered(Verdict::Timeout)
        );
        assert_eq!(engine.tick(timer, TRIVIA_TICK), TickOutcome::Ignored);
        assert_eq!(score.current(), TRIVIA_POINTS);
    }

    #[test]
    fn ticks_from_a_disarmed_timer_do_nothing() {
        let store = store(&["API", "Bucle", "Caché", "Dato"]);
        let mut engine = TriviaEngine::new();
        engine.start_round(&store, &mut SmallRng::seed_from_u64(2));
        let timer = handle();
        engine.arm(timer);
        assert_eq!(engine.disarm(), Some(timer));
        assert_eq!(engine.tick(timer, TRIVIA_TIME), TickOutcome::Ignored);
        assert_eq!(engine.round().unwrap().remaining(), TRIVIA_TIME);
    }
}
