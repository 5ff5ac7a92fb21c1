use std::path::PathBuf;

use rs_markov_core::io::{build_output_path, read_file};
use rs_markov_core::model::rank::{scorer, Rank};
use rs_markov_core::model::{Markov, Parser, ReplyInput, ReplyMode, Token};
use rs_markov_core::storage::{MemoryStorage, SqliteStorage, Storage};

/// One sentence per line, words separated by whitespace.
fn tokenize(line: &str) -> Vec<Token> {
    let mut tokens: Vec<Token> = line.split_whitespace().map(Token::from).collect();
    tokens.push(Token::End);
    tokens
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Log level is set with RUST_LOG (ex. RUST_LOG=debug)
    env_logger::init();

    // Corpus: first argument, or "./data/corpus.txt"
    let corpus = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./data/corpus.txt"));
    let lines = read_file(&corpus)?;
    log::info!("Training on {} ({} lines)", corpus.display(), lines.len());

    // State sizes 2 and 1, the window is cleared at the end of each sentence
    let parser = Parser::new(vec![2, 1], true)?;

    // In-memory storage tracking backward links (needed by Start/Reply modes)
    let mut markov = Markov::new(parser, MemoryStorage::new(None, true));
    let mut links = 0;
    for line in &lines {
        links += markov.data(tokenize(line), false, "")?;
    }
    println!("{} sentences, {} links", lines.len(), links);

    // Saved next to the corpus: corpus.json (JSON) and corpus.bin (postcard)
    let json_path = build_output_path(&corpus, "json")?;
    markov.save(Some(json_path.as_path()))?;
    let binary_path = build_output_path(&corpus, "bin")?;
    markov.storage_mut().save_binary(&binary_path)?;

    // Reload from the JSON file, the parser is rebuilt from the stored settings
    let mut markov = Markov::from_storage(MemoryStorage::load(&json_path)?)?;

    // Plain generation from the empty state, at most 30 words
    for i in 0..5 {
        let words = markov
            .generate(None, &[], "", false)?
            .take(30)
            .collect::<Result<Vec<String>, _>>()?;
        println!("Generated sentence {}: {}", i + 1, words.join(" "));
    }

    // Reply modes, the input is an unfinished sentence (no End marker)
    let input: Vec<Token> = "the weather today".split_whitespace().map(Token::from).collect();
    for mode in [ReplyMode::End, ReplyMode::Start, ReplyMode::Reply] {
        let mut reply_input = ReplyInput::new(mode);
        reply_input.max_length = Some(30);
        println!("{:?}: {}", mode, markov.reply(&reply_input, &input)?.join(" "));
    }

    // Ranked reply: 10 candidates, the worst half is dropped
    let rank = Rank::new(10, 0.5, scorer("word_shape")?)?;
    let mut reply_input = ReplyInput::new(ReplyMode::Reply);
    reply_input.max_length = Some(30);
    if let Some(reply) = markov.reply_ranked(&reply_input, &input, &rank)? {
        println!("Ranked reply: {}", reply);
    }

    // Same corpus in a SQLite database (corpus.db), rebuilt on every run
    let db_path = build_output_path(&corpus, "db")?;
    if db_path.exists() {
        std::fs::remove_file(&db_path)?;
    }
    let mut sqlite = Markov::new(Parser::new(vec![2, 1], true)?, SqliteStorage::open(&db_path)?);
    for line in &lines {
        sqlite.data(tokenize(line), false, "")?;
    }
    sqlite.save(None)?;
    let words = sqlite
        .generate(Some(1), &[], "", false)?
        .take(30)
        .collect::<Result<Vec<String>, _>>()?;
    println!("SQLite sentence: {}", words.join(" "));
    println!("SQLite separator: {:?}", sqlite.storage().separator());
    sqlite.close()?;

    Ok(())
}
