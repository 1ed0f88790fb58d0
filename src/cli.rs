use std::cmp;
use std::error::Error;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use atty::Stream;
use clap::{Parser, Subcommand};
use glosario_rs::games::{TRIVIA_ADVANCE_DELAY, TriviaStatus, TriviaView, Verdict};
use glosario_rs::offline::{CACHE_VERSION, OfflineCache, VERSION_ASSET, load_dataset};
use glosario_rs::preferences::JsonFileStore;
use glosario_rs::session::{Command as Action, Event, GameKind, Glossary};
use glosario_rs::{
    SUGGESTION_LIMIT, Segment, Term, TermStore, VersionInfo, describe_version, highlight,
};
use serde_json::json;
use termimad::{FmtText, MadSkin, terminal_size};
use tracing::warn;
use tracing_subscriber::EnvFilter;

const STATE_DIR_NAME: &str = "glosario";
const PREFERENCES_FILE: &str = "preferencias.json";
const CACHE_DIR: &str = "cache";

#[derive(Parser, Debug)]
#[command(name = "glosario", about = "Explore the technical glossary", version)]
pub struct Cli {
    /// Emit JSON instead of human-readable output.
    #[arg(long, global = true)]
    json: bool,

    /// Dataset file to load instead of the bundled glossary.
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    /// Where preferences and the offline dataset copy are kept.
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Fixed seed for game sampling.
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rank terms against a query.
    Search {
        query: String,
        /// Maximum number of matches to return.
        #[arg(short, long, default_value_t = SUGGESTION_LIMIT)]
        limit: usize,
    },
    /// Resolve a term and remember the query.
    Show { text: String },
    /// List a category, or every category when no name is given.
    Category { name: Option<String> },
    /// Recently selected queries, newest first.
    History,
    /// Print or flip the display theme.
    Theme {
        #[arg(long)]
        toggle: bool,
    },
    /// Dataset version and update date.
    Version,
    /// Play a word game on stdin (hangman or trivia).
    Play { game: GameKind },
    /// Serve the glossary over HTTP.
    #[cfg(feature = "web")]
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: std::net::SocketAddr,
        /// Public base URL used in generated links.
        #[arg(long)]
        base_url: Option<String>,
    },
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(&cli.command);
    let state_dir = resolve_state_dir(cli.state_dir.clone())?;
    let data = cli.data.clone();
    let open = || open_glossary(data.as_deref(), &state_dir, cli.seed);

    match cli.command {
        Command::Search { query, limit } => handle_search(&open(), &query, limit, cli.json),
        Command::Show { text } => {
            let events = open().dispatch(Action::Select(text));
            emit(&events, cli.json)
        }
        Command::Category { name: Some(name) } => {
            let events = open().dispatch(Action::ToggleCategory(name));
            emit(&events, cli.json)
        }
        Command::Category { name: None } => handle_categories(open().store(), cli.json),
        Command::History => {
            let events = open().dispatch(Action::ShowHistory);
            emit(&events, cli.json)
        }
        Command::Theme { toggle: true } => {
            let events = open().dispatch(Action::ToggleTheme);
            emit(&events, cli.json)
        }
        Command::Theme { toggle: false } => {
            let theme = open().theme();
            emit(&[Event::Theme { theme }], cli.json)
        }
        Command::Version => handle_version(cli.data.as_deref(), &state_dir, cli.json),
        Command::Play { game } => play(&mut open(), game, cli.json, io::stdin().lock()),
        #[cfg(feature = "web")]
        Command::Serve { addr, base_url } => {
            let config = glosario_rs::web::WebConfig {
                addr,
                base_url: base_url.unwrap_or_else(|| format!("http://{addr}")),
                data_path: cli.data.clone(),
                seed: cli.seed,
            };
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(glosario_rs::web::serve(config))?;
            Ok(())
        }
    }
}

fn init_tracing(command: &Command) {
    let default_level = match command {
        #[cfg(feature = "web")]
        Command::Serve { .. } => "info",
        _ => "warn",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn resolve_state_dir(explicit: Option<PathBuf>) -> Result<PathBuf, Box<dyn Error>> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }
    let mut path = dirs::data_local_dir()
        .ok_or("Could not determine a data directory; pass --state-dir")?;
    path.push(STATE_DIR_NAME);
    Ok(path)
}

fn offline_cache(state_dir: &Path) -> OfflineCache {
    let cache = OfflineCache::new(state_dir.join(CACHE_DIR), CACHE_VERSION);
    if let Err(err) = cache.activate() {
        warn!(error = %err, "could not purge stale offline caches");
    }
    cache
}

fn open_glossary(data: Option<&Path>, state_dir: &Path, seed: Option<u64>) -> Glossary {
    let prefs = JsonFileStore::open(state_dir.join(PREFERENCES_FILE));
    let loaded = match data {
        Some(path) => load_dataset(&offline_cache(state_dir), path),
        None => Ok(TermStore::bundled().clone()),
    };
    let glossary = Glossary::from_load(loaded, Box::new(prefs), Glossary::rng_from_seed(seed));
    if let Some(fault) = glossary.load_error() {
        eprintln!("warning: {fault}");
    }
    glossary
}

fn handle_version(data: Option<&Path>, state_dir: &Path, as_json: bool) -> Result<(), Box<dyn Error>> {
    let info = match data {
        Some(path) => {
            let sibling = path.with_file_name(VERSION_ASSET);
            let cache = offline_cache(state_dir);
            match cache.fetch(VERSION_ASSET, |_| fs::read(&sibling)) {
                Ok(bytes) => {
                    let info = VersionInfo::parse(&String::from_utf8_lossy(&bytes));
                    if info.is_some() {
                        if let Err(err) = cache.install(&[(VERSION_ASSET, bytes.as_slice())]) {
                            warn!(error = %err, "failed to refresh offline version copy");
                        }
                    }
                    info
                }
                Err(err) => {
                    warn!(error = %err, "version metadata unavailable");
                    None
                }
            }
        }
        None => VersionInfo::bundled(),
    };

    if as_json {
        let payload = json!({
            "version": info.as_ref().map(|info| info.version.as_str()),
            "date": info.as_ref().map(|info| info.date.as_str()),
            "footer": describe_version(info.as_ref()),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("{}", describe_version(info.as_ref()));
    }
    Ok(())
}

fn handle_search(glossary: &Glossary, query: &str, limit: usize, as_json: bool) -> Result<(), Box<dyn Error>> {
    if query.trim().is_empty() {
        return Err("Search query cannot be empty".into());
    }
    let limit = cmp::max(1, limit);
    let hits = glossary.store().suggestions(query, limit);

    if as_json {
        let payload = json!({
            "query": query,
            "limit": limit,
            "results": hits.iter().map(|hit| {
                json!({"term": hit.term, "score": hit.score})
            }).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }
    if hits.is_empty() {
        println!("No se encontraron resultados para \"{query}\".");
        return Ok(());
    }
    let width = hits
        .iter()
        .map(|hit| hit.term.term.chars().count())
        .max()
        .unwrap_or(4)
        .max("TERM".len());
    println!("{:<width$}  {:>5}  {}", "TERM", "SCORE", "TRANSLATION", width = width);
    println!("{:-<width$}  {:->5}  {}", "", "", "-----------", width = width);
    for hit in &hits {
        let padding = width - hit.term.term.chars().count();
        println!(
            "{}{}  {:>5}  {}",
            emphasize(&hit.term.term, query),
            " ".repeat(padding),
            hit.score,
            hit.term.translation
        );
    }
    Ok(())
}

fn handle_categories(store: &TermStore, as_json: bool) -> Result<(), Box<dyn Error>> {
    let rows: Vec<(&str, usize)> = store
        .categories()
        .into_iter()
        .map(|category| (category, store.filter_by_category(category).len()))
        .collect();
    if as_json {
        let payload = json!({
            "total": store.len(),
            "categories": rows.iter().map(|(name, count)| {
                json!({"name": name, "count": count})
            }).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }
    println!("{} términos", store.len());
    for (name, count) in rows {
        println!("  {name:<16} {count}");
    }
    Ok(())
}

/// Wraps the parts of `text` matching `query` in terminal bold when stdout is
/// a terminal.
fn emphasize(text: &str, query: &str) -> String {
    if !stdout_is_tty() {
        return text.to_string();
    }
    highlight(text, query)
        .into_iter()
        .map(|Segment { text, matched }| {
            if matched {
                format!("\x1b[1m{text}\x1b[0m")
            } else {
                text.to_string()
            }
        })
        .collect()
}

fn play<R: BufRead>(
    glossary: &mut Glossary,
    game: GameKind,
    as_json: bool,
    reader: R,
) -> Result<(), Box<dyn Error>> {
    emit(&glossary.dispatch(Action::StartGame(game)), as_json)?;
    if !as_json {
        print_play_help(game);
    }
    let mut shown = trivia_view(glossary);
    let mut last_input = Instant::now();
    prompt()?;
    for line in reader.lines() {
        let line = line?;
        let now = Instant::now();
        let mut events = glossary.dispatch(Action::Advance(now - last_input));
        last_input = now;

        let input = line.trim();
        match input {
            ":q" | ":salir" => {
                events.extend(glossary.dispatch(Action::LeaveGame));
                emit(&events, as_json)?;
                break;
            }
            ":n" | ":siguiente" => events.extend(glossary.dispatch(Action::NextRound)),
            "" => {}
            _ => match game {
                GameKind::Hangman => {
                    if let Some(letter) = input.chars().next() {
                        events.extend(glossary.dispatch(Action::Guess(letter)));
                    }
                }
                GameKind::Trivia => match resolve_trivia_choice(glossary, shown.as_ref(), input) {
                    Some(term) => events.extend(glossary.dispatch(Action::Answer(term))),
                    None if !as_json => println!("(esa pregunta ya no está abierta)"),
                    None => {}
                },
            },
        }
        emit(&events, as_json)?;

        if awaiting_next_question(glossary) {
            thread::sleep(TRIVIA_ADVANCE_DELAY);
            let now = Instant::now();
            emit(&glossary.dispatch(Action::Advance(now - last_input)), as_json)?;
            last_input = now;
        }
        shown = trivia_view(glossary);
        prompt()?;
    }
    Ok(())
}

fn trivia_view(glossary: &Glossary) -> Option<TriviaView> {
    match glossary.game_view() {
        Some(Event::Trivia { view }) => Some(view),
        _ => None,
    }
}

/// A correct answer leaves the question on screen until auto-advance fires.
fn awaiting_next_question(glossary: &Glossary) -> bool {
    trivia_view(glossary)
        .is_some_and(|view| view.status == TriviaStatus::Answered(Verdict::Correct))
}

/// Maps an option number (1-based) or a term onto the question the player
/// was shown. `None` once that question is no longer the open one.
fn resolve_trivia_choice(
    glossary: &Glossary,
    shown: Option<&TriviaView>,
    input: &str,
) -> Option<String> {
    let shown = shown?;
    let current = trivia_view(glossary)?;
    if current.status != TriviaStatus::AwaitingAnswer
        || current.prompt != shown.prompt
        || current.options != shown.options
    {
        return None;
    }
    let choice = input
        .parse::<usize>()
        .ok()
        .and_then(|index| index.checked_sub(1))
        .and_then(|index| shown.options.get(index))
        .map(|option| option.term.clone())
        .unwrap_or_else(|| input.to_string());
    Some(choice)
}

fn print_play_help(game: GameKind) {
    let action = match game {
        GameKind::Hangman => "type a letter",
        GameKind::Trivia => "type the option number",
    };
    println!("({action}; :n next round, :q quit)");
}

fn prompt() -> io::Result<()> {
    print!("> ");
    io::stdout().flush()
}

fn emit(events: &[Event], as_json: bool) -> Result<(), Box<dyn Error>> {
    if as_json {
        for event in events {
            println!("{}", serde_json::to_string(event)?);
        }
        return Ok(());
    }
    for event in events {
        render_event(event);
    }
    Ok(())
}

fn render_event(event: &Event) {
    match event {
        Event::Home { total } => println!("{total} términos en el glosario"),
        Event::Suggestions { query, hits } => {
            println!("Sugerencias para \"{query}\":");
            for hit in hits {
                println!("  {} ({})", hit.term.term, hit.term.translation);
            }
        }
        Event::RecentQueries { queries } => {
            if queries.is_empty() {
                println!("Sin búsquedas recientes.");
            }
            for query in queries {
                println!("  {query}");
            }
        }
        Event::Results { count, terms } => {
            if *count == 0 {
                println!("No se encontraron resultados.");
            }
            for term in terms {
                render_markdown_block(&term_markdown(term));
            }
        }
        Event::Category {
            category,
            tagline,
            count,
            terms,
            index,
        } => {
            let mut text = format!("# {category} ({count})\n");
            if let Some(tagline) = tagline {
                text.push_str(&format!("\n*{tagline}*\n"));
            }
            if !index.is_empty() {
                text.push_str(&format!("\n{}\n", index.join(" · ")));
            }
            for term in terms {
                text.push_str(&format!("\n* **{}**: {}", term.term, term.translation));
            }
            render_markdown_block(&text);
        }
        Event::Theme { theme } => println!("Tema: {theme}"),
        Event::Hangman { view } => {
            let spaced: Vec<String> = view.masked.chars().map(String::from).collect();
            println!("\n  {}", spaced.join(" "));
            println!(
                "  Intentos: {}/{}  Fallos: {}",
                view.attempts_left,
                view.max_attempts,
                view.misses.iter().collect::<String>()
            );
            if !view.hint.is_empty() {
                println!("  Pista: {}", view.hint);
            }
        }
        Event::Trivia { view } => {
            println!("\n¿Cuál es la traducción de \"{}\"?", view.prompt);
            for (idx, option) in view.options.iter().enumerate() {
                println!("  {}. {}", idx + 1, option.translation);
            }
            println!("  ({} s)", view.remaining_ms / 1000);
        }
        Event::Countdown { .. } => {}
        Event::Combo { combo, visible } => {
            if *visible {
                println!("🔥 Combo x{combo}");
            }
        }
        Event::Score { points } => println!("Puntos: {points}"),
        Event::RoundOver {
            won,
            message,
            points,
        } => {
            let title = if *won { "¡Ganaste!" } else { "Fin de la ronda" };
            println!("{title} {message} (puntos: {points})");
        }
        Event::Hub => println!("Has salido del juego."),
    }
}

fn term_markdown(term: &Term) -> String {
    let mut text = format!("## {} ({})\n", term.term, term.translation);
    if !term.category.is_empty() {
        text.push_str(&format!("*{}*\n", term.category));
    }
    if !term.definition.is_empty() {
        text.push_str(&format!("\n{}\n", term.definition));
    }
    if !term.example.is_empty() {
        text.push_str(&format!("\n> {}\n", term.example));
    }
    text
}

fn stdout_is_tty() -> bool {
    atty::is(Stream::Stdout)
}

fn markdown_width() -> usize {
    let (width, _) = terminal_size();
    width.max(60) as usize
}

fn render_markdown_block(body: &str) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return;
    }
    if stdout_is_tty() {
        let skin = MadSkin::default();
        let formatted = FmtText::from(&skin, trimmed, Some(markdown_width()));
        println!("{formatted}");
    } else {
        println!("{trimmed}\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glosario_rs::preferences::MemoryStore;
    use std::io::Cursor;
    use std::sync::Arc;

    fn glossary() -> Glossary {
        let store = TermStore::from_json(
            br#"[{"palabra": "Nube", "traduccion": "Cloud", "categoria": "informatica"}]"#,
        )
        .unwrap();
        Glossary::new(
            Arc::new(store),
            Box::new(MemoryStore::new()),
            Glossary::rng_from_seed(Some(1)),
        )
    }

    #[test]
    fn hangman_loop_plays_until_quit() {
        let mut glossary = glossary();
        let input = Cursor::new("n\nu\nb\ne\n:n\n:q\n");
        play(&mut glossary, GameKind::Hangman, true, input).unwrap();
        assert_eq!(glossary.score(), 50);
        assert!(glossary.active_game().is_none());
    }

    fn trivia_glossary() -> Glossary {
        let store = TermStore::from_json(
            r#"[
                {"palabra": "API", "traduccion": "API"},
                {"palabra": "Bucle", "traduccion": "Loop"},
                {"palabra": "Caché", "traduccion": "Cache"},
                {"palabra": "Dato", "traduccion": "Data"},
                {"palabra": "Nube", "traduccion": "Cloud"},
                {"palabra": "Red", "traduccion": "Network"}
            ]"#
            .as_bytes(),
        )
        .unwrap();
        Glossary::new(
            Arc::new(store),
            Box::new(MemoryStore::new()),
            Glossary::rng_from_seed(Some(5)),
        )
    }

    fn correct_option(view: &TriviaView) -> usize {
        view.options
            .iter()
            .position(|option| option.term == view.prompt)
            .unwrap()
            + 1
    }

    #[test]
    fn trivia_accepts_option_numbers() {
        let mut glossary = glossary();
        glossary.dispatch(Action::StartGame(GameKind::Trivia));
        let shown = trivia_view(&glossary);
        let choose = |input: &str| resolve_trivia_choice(&glossary, shown.as_ref(), input);
        assert_eq!(choose("1").as_deref(), Some("Nube"));
        assert_eq!(choose("9").as_deref(), Some("9"));
        assert_eq!(choose("Nube").as_deref(), Some("Nube"));
    }

    #[test]
    fn choices_for_a_replaced_question_are_dropped() {
        let mut glossary = trivia_glossary();
        glossary.dispatch(Action::StartGame(GameKind::Trivia));
        let shown = trivia_view(&glossary).unwrap();
        glossary.dispatch(Action::Answer(shown.prompt.clone()));
        glossary.dispatch(Action::Advance(TRIVIA_ADVANCE_DELAY));
        assert_eq!(resolve_trivia_choice(&glossary, Some(&shown), "1"), None);
        assert_eq!(glossary.score(), 10);
        assert_eq!(glossary.combo(), 1);
    }

    #[test]
    fn next_question_is_shown_before_the_next_choice_is_read() {
        let mut twin = trivia_glossary();
        twin.dispatch(Action::StartGame(GameKind::Trivia));
        let first = correct_option(&trivia_view(&twin).unwrap());
        twin.dispatch(Action::Answer(trivia_view(&twin).unwrap().prompt));
        twin.dispatch(Action::Advance(TRIVIA_ADVANCE_DELAY));
        let second = correct_option(&trivia_view(&twin).unwrap());

        let mut glossary = trivia_glossary();
        let input = Cursor::new(format!("{first}\n{second}\n"));
        play(&mut glossary, GameKind::Trivia, true, input).unwrap();
        assert_eq!(glossary.score(), 20);
        assert_eq!(glossary.combo(), 2);
        let view = trivia_view(&glossary).unwrap();
        assert_eq!(view.status, TriviaStatus::AwaitingAnswer);
    }

    #[test]
    fn explicit_state_dir_wins() {
        let dir = PathBuf::from("/tmp/glosario-test");
        assert_eq!(resolve_state_dir(Some(dir.clone())).unwrap(), dir);
    }
}
