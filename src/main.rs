use std::{
    io::{BufRead, Write},
    path::{Path, PathBuf},
};

use clap::Parser;
use curatex::{
    cli::{Cli, Command, ConfigAction},
    completion::ChatClient,
    config::RagConfig,
    config_db::ConfigDb,
    data_dir::DataDir,
    engine::{Answer, Outcome},
    error::{self, Error},
    mcp,
    rag::{NewsRag, QuestionAnswering, SetupReport},
    retriever::RetrievalResult,
    storage::IndexStore,
    text_util::extract_snippet,
};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("CURATEX_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;

    let load_config = || -> error::Result<RagConfig> {
        let mut config = RagConfig::from_settings(&config_db)?;
        if let Some(kind) = cli.embedder {
            config.embedder = kind;
        }
        Ok(config)
    };

    match &cli.command {
        Command::Setup(args) => {
            let rag = NewsRag::from_config(load_config()?, &data_dir)?;
            let report = rag.setup(&args.corpus.dir)?;
            print_report(&report, args.json)?;
        }
        Command::Ingest(args) => {
            let copied = ingest_files(&args.files, &args.corpus.dir)?;
            println!("Copied {copied} file(s) into {}", args.corpus.dir.display());
            let rag = NewsRag::from_config(load_config()?, &data_dir)?;
            let report = rag.setup(&args.corpus.dir)?;
            print_report(&report, args.json)?;
        }
        Command::Ask(args) => {
            let rag = NewsRag::from_config(load_config()?, &data_dir)?;
            rag.setup(&args.corpus.dir)?;
            let session = rag.new_session();
            let answer = runtime()?.block_on(rag.answer(&args.question, &session))?;

            if args.json {
                print_json(&answer_json(&args.question, &answer))?;
            } else {
                println!("{}", answer.text());
                if args.sources {
                    print_sources(&answer.sources, &args.question);
                }
            }
        }
        Command::Chat(args) => {
            let rag = NewsRag::from_config(load_config()?, &data_dir)?;
            rag.setup(&args.corpus.dir)?;
            cmd_chat(&rag, args.sources)?;
        }
        Command::Search(args) => {
            let rag = NewsRag::from_config(load_config()?, &data_dir)?;
            rag.setup(&args.corpus.dir)?;
            let retrieval = runtime()?.block_on(rag.retrieve(&args.query))?;

            if args.json {
                let results: Vec<_> = retrieval
                    .results
                    .iter()
                    .map(|r| source_json(r, &args.query))
                    .collect();
                print_json(&serde_json::json!({
                    "query": args.query,
                    "degraded": retrieval.degraded,
                    "results": results,
                }))?;
            } else if retrieval.is_empty() {
                println!("No results found for \"{}\"", args.query);
            } else {
                print_sources(&retrieval.results, &args.query);
            }
        }
        Command::Config { action } => cmd_config(&config_db, action)?,
        Command::Status(args) => {
            cmd_status(&config_db, &data_dir, load_config()?, args.json)?;
        }
        Command::Mcp(args) => {
            let rag = NewsRag::from_config(load_config()?, &data_dir)?;
            mcp::run_mcp(rag, args.corpus.dir.clone())?;
        }
        Command::Completions(args) => args.generate(),
    }

    Ok(())
}

fn runtime() -> error::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Config(format!("failed to start tokio runtime: {e}")))
}

/// Copy each file into the corpus directory, keeping its file name.
fn ingest_files(files: &[PathBuf], dir: &Path) -> error::Result<usize> {
    std::fs::create_dir_all(dir)?;

    let mut copied = 0;
    for file in files {
        let Some(name) = file.file_name() else {
            return Err(Error::Config(format!(
                "not a file path: {}",
                file.display()
            )));
        };
        if file.extension().and_then(|e| e.to_str()) != Some("txt") {
            tracing::warn!(
                path = %file.display(),
                "only .txt files are indexed, copying anyway"
            );
        }
        std::fs::copy(file, dir.join(name))?;
        copied += 1;
    }
    Ok(copied)
}

fn cmd_chat(rag: &NewsRag<ChatClient>, show_sources: bool) -> error::Result<()> {
    let runtime = runtime()?;
    let session = rag.new_session();
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    println!("Ask about the news. Type 'quit' to leave.");
    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question.to_lowercase().as_str(), "quit" | "exit" | "q") {
            break;
        }

        let answer = runtime.block_on(rag.answer(question, &session))?;
        println!("{}\n", answer.text());
        if show_sources {
            print_sources(&answer.sources, question);
            println!();
        }
    }
    Ok(())
}

fn cmd_config(config_db: &ConfigDb, action: &ConfigAction) -> error::Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            // Reject values the engine would refuse to start with.
            let mut config = RagConfig::from_settings(config_db)?;
            config.apply(key, value)?;
            config.validate()?;
            config_db.set_setting(key, value)?;
            println!("{key} = {value}");
        }
        ConfigAction::Get { key } => match config_db.get_setting(key)? {
            Some(value) => println!("{value}"),
            None => {
                return Err(Error::NotFound {
                    kind: "setting",
                    name: key.clone(),
                });
            }
        },
        ConfigAction::Unset { key } => {
            if config_db.remove_setting(key)? {
                println!("Removed setting '{key}'");
            } else {
                println!("Setting '{key}' was not set");
            }
        }
        ConfigAction::List { all, json } => {
            let stored = config_db.list_settings()?;
            let rows: Vec<(String, String)> = if *all {
                RagConfig::from_settings(config_db)?
                    .settings()
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect()
            } else {
                stored
            };

            if *json {
                let map: serde_json::Map<String, serde_json::Value> = rows
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::String(v)))
                    .collect();
                print_json(&serde_json::Value::Object(map))?;
            } else if rows.is_empty() {
                println!("No settings stored.");
            } else {
                for (key, value) in rows {
                    println!("{key} = {value}");
                }
            }
        }
    }
    Ok(())
}

fn cmd_status(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    config: RagConfig,
    json: bool,
) -> error::Result<()> {
    let index_path = data_dir.index_db();
    let manifest = if index_path.exists() {
        match IndexStore::open(&index_path).and_then(|s| s.manifest()) {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::warn!(error = %e, "index store unreadable");
                None
            }
        }
    } else {
        None
    };
    let settings = config_db.list_settings()?;
    let api_key_set = config.completion_api_key().is_some();

    if json {
        let settings: serde_json::Map<String, serde_json::Value> = settings
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect();
        print_json(&serde_json::json!({
            "dataDir": data_dir.root().display().to_string(),
            "embedder": config.embedder.to_string(),
            "completionModel": config.completion_model,
            "completionBaseUrl": config.completion_base_url,
            "apiKeySet": api_key_set,
            "settings": settings,
            "indexes": manifest,
        }))?;
        return Ok(());
    }

    println!("Data directory:   {}", data_dir.root().display());
    println!("Embedder:         {}", config.embedder);
    println!(
        "Completion:       {} at {}",
        config.completion_model, config.completion_base_url
    );
    println!(
        "API key:          {} ({})",
        if api_key_set { "set" } else { "missing" },
        config.completion_api_key_env
    );
    println!("Stored settings:  {}", settings.len());
    match manifest {
        Some(m) => {
            println!("Persisted index:  {} nodes, {}", m.node_count, m.embedder);
            println!(
                "  chunking {}/{}, dimension {}, corpus {:016x}",
                m.chunk_size, m.chunk_overlap, m.dimension, m.corpus_fingerprint
            );
        }
        None => println!("Persisted index:  none"),
    }
    Ok(())
}

fn print_report(report: &SetupReport, json: bool) -> error::Result<()> {
    if json {
        print_json(report)?;
    } else {
        println!(
            "Ready: {} document(s), {} node(s), indexes {}",
            report.documents, report.nodes, report.source
        );
    }
    Ok(())
}

fn print_sources(results: &[RetrievalResult], query: &str) {
    for (i, r) in results.iter().enumerate() {
        let score = match (r.score, r.matched_terms) {
            (Some(score), _) => format!("{score:.3}"),
            (None, Some(terms)) => format!("{terms} term(s)"),
            (None, None) => "-".to_string(),
        };
        println!(
            "{:>2}. {} {} [{} {}]",
            i + 1,
            r.node.id,
            r.node.source,
            r.strategy,
            score
        );
        if let Some(snippet) = extract_snippet(&r.node.text, query) {
            for line in snippet.lines() {
                println!("      {line}");
            }
        }
    }
}

fn source_json(r: &RetrievalResult, query: &str) -> serde_json::Value {
    serde_json::json!({
        "nodeId": r.node.id.to_string(),
        "source": r.node.source,
        "chunk": r.node.index,
        "strategy": r.strategy,
        "score": r.score,
        "matchedTerms": r.matched_terms,
        "snippet": extract_snippet(&r.node.text, query),
    })
}

fn answer_json(question: &str, answer: &Answer) -> serde_json::Value {
    let (status, failure) = match &answer.outcome {
        Outcome::Completed(_) => ("completed", None),
        Outcome::Failed(failure) => ("failed", Some(failure.to_string())),
    };
    serde_json::json!({
        "question": question,
        "status": status,
        "answer": answer.completed_text(),
        "failure": failure,
        "degraded": answer.degraded,
        "sources": answer
            .sources
            .iter()
            .map(|r| source_json(r, question))
            .collect::<Vec<_>>(),
    })
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> error::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
