use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use log::{LevelFilter, info};

use pyq_creator::ai::ModelFetch;
use pyq_creator::cleanup::PatternList;
use pyq_creator::lexicon::{
    LexiconSource, ReferenceSelection, SelectionMode, find_source, select_all, select_entries,
    select_none,
};
use pyq_creator::logging;
use pyq_creator::prompts::PromptBook;
use pyq_creator::settings::{DEFAULT_NAMESPACE, Keys, Settings};
use pyq_creator::{
    Controller, DirectoryLexicon, FileHost, HostBindings, JsonFileStore, OpenAiClient,
    SettingsStore,
};

#[derive(Parser)]
#[command(name = "pyq_creator")]
#[command(about = "Generate tagged side content from a chat transcript and world info")]
struct Cli {
    /// Settings and log directory
    #[arg(long, env = "PYQ_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Settings namespace of this instance
    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Transcript file (JSON array of messages)
    #[arg(long)]
    chat: Option<PathBuf>,

    /// Directory of world-info `<id>.json` files
    #[arg(long)]
    books: Option<PathBuf>,

    /// World-info ids treated as selected; all files when omitted
    #[arg(long, value_delimiter = ',')]
    select: Vec<String>,

    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show or save the endpoint configuration
    Config {
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        model: Option<String>,
    },
    /// Send a one-word request to the configured model
    Ping,
    /// List models, from cache unless refreshed
    Models {
        #[arg(long)]
        refresh: bool,
    },
    /// Manage task prompts
    Prompt {
        #[command(subcommand)]
        action: PromptAction,
    },
    /// Manage cleanup patterns
    Pattern {
        #[command(subcommand)]
        action: PatternAction,
    },
    /// Set how many trailing messages are sampled
    Count { count: u32 },
    /// Search and select world-info entries
    Book {
        #[command(subcommand)]
        action: BookAction,
    },
    /// Print the request the next generation would send
    Preview,
    /// Generate once and print the result
    Generate {
        #[arg(long, value_enum)]
        inject: Option<Injection>,
    },
    /// Watch the transcript until interrupted
    Watch {
        #[arg(long)]
        auto: bool,
        #[arg(long)]
        hosted: bool,
    },
}

#[derive(Subcommand)]
enum PromptAction {
    List {
        #[arg(long, default_value = "")]
        tag: String,
    },
    Add { text: String },
    Edit { index: usize, text: String },
    Enable { index: usize },
    Disable { index: usize },
    Tag { index: usize, tag: String },
    Untag { index: usize, tag: String },
    Remove { index: usize },
}

#[derive(Subcommand)]
enum PatternAction {
    List,
    Add { pattern: String },
    Edit { index: usize, pattern: String },
    Enable { index: usize },
    Disable { index: usize },
    Remove { index: usize },
}

#[derive(Subcommand)]
enum BookAction {
    /// Show the entries of the first source matching NAME
    Search { name: String },
    /// Save which entries of NAME are used
    Select {
        name: String,
        uids: Vec<String>,
        #[arg(long)]
        dynamic: bool,
        #[arg(long, conflicts_with = "none")]
        all: bool,
        #[arg(long)]
        none: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Injection {
    Chat,
    Swipe,
}

fn mask(key: &str) -> String {
    if key.is_empty() {
        return "(unset)".to_string();
    }
    let head: String = key.chars().take(4).collect();
    format!("{head}***")
}

fn print_listing(enabled: bool, index: usize, text: &str, suffix: &str) {
    let mark = if enabled { 'x' } else { ' ' };
    println!("[{mark}] {index}: {text}{suffix}");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => dir::home_dir()
            .context("Failed to get home directory")?
            .join("pyq_creator")
            .join("data"),
    };
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    logging::init(&data_dir, level).context("Failed to initialise logging")?;

    let backend = Arc::new(
        JsonFileStore::open(data_dir.join("settings.json")).context("Failed to open settings")?,
    );
    let store = SettingsStore::new(backend.clone());
    let keys = Keys::new(cli.namespace);

    let chat = cli.chat.unwrap_or_else(|| data_dir.join("chat.json"));
    let books = cli.books.unwrap_or_else(|| data_dir.join("worlds"));
    let lexicon = Arc::new(DirectoryLexicon::new(books, cli.select));
    let chat_host = Arc::new(FileHost::new(chat));
    let host = HostBindings::from_host(chat_host.clone(), lexicon.clone());
    let client = Arc::new(OpenAiClient::new());
    let mut controller = Controller::new(store.clone(), keys.clone(), &host, client);
    let pipeline = controller.pipeline().clone();

    match cli.command {
        Command::Config { url, key, model } => {
            let current = Settings::load(&store, &keys);
            if url.is_none() && key.is_none() && model.is_none() {
                println!("url:   {}", current.api_url);
                println!("key:   {}", mask(&current.api_key));
                println!("model: {}", current.api_model);
                println!("count: {}", current.sample_count);
                println!("auto:  {}  hosted: {}", current.auto_mode, current.hosted_mode);
                println!("settings: {}", backend.path().display());
                println!("chat:     {}", chat_host.path().display());
                println!(
                    "books:    {} ({} available)",
                    lexicon.dir().display(),
                    lexicon.available().len()
                );
                return Ok(());
            }
            Settings::save_api(
                &store,
                &url.unwrap_or(current.api_url),
                &key.unwrap_or(current.api_key),
                &model.unwrap_or(current.api_model),
            )?;
            println!("Saved");
        }
        Command::Ping => {
            let reply = pipeline.ping().await?;
            println!("Model answered: {reply}");
        }
        Command::Models { refresh } => match pipeline.models(refresh).await? {
            ModelFetch::Cached(cached) => {
                println!(
                    "Fetched at {}, use --refresh to update",
                    cached.fetched_at.with_timezone(&chrono::Local)
                );
                cached.ids.iter().for_each(|id| println!("{id}"));
            }
            ModelFetch::Fetched(fetched) => {
                println!("Fetched {} models", fetched.ids.len());
                fetched.ids.iter().for_each(|id| println!("{id}"));
            }
        },
        Command::Prompt { action } => {
            let mut book = PromptBook::load(store.clone(), &keys);
            let changed = match action {
                PromptAction::List { tag } => {
                    for (index, prompt) in book.filtered(&tag) {
                        let tags = if prompt.tags.is_empty() {
                            String::new()
                        } else {
                            format!("  #{}", prompt.tags.join(" #"))
                        };
                        print_listing(prompt.enabled, index, &prompt.text, &tags);
                    }
                    true
                }
                PromptAction::Add { text } => book.add(&text),
                PromptAction::Edit { index, text } => book.edit(index, &text),
                PromptAction::Enable { index } => book.set_enabled(index, true),
                PromptAction::Disable { index } => book.set_enabled(index, false),
                PromptAction::Tag { index, tag } => book.add_tag(index, &tag),
                PromptAction::Untag { index, tag } => book.remove_tag(index, &tag),
                PromptAction::Remove { index } => book.remove(index).is_some(),
            };
            if !changed {
                bail!("Nothing changed");
            }
        }
        Command::Pattern { action } => {
            let mut list = PatternList::load(store.clone(), &keys);
            let changed = match action {
                PatternAction::List => {
                    for (index, pattern) in list.patterns().iter().enumerate() {
                        print_listing(pattern.enabled, index, &pattern.pattern, "");
                    }
                    true
                }
                PatternAction::Add { pattern } => list.add(&pattern),
                PatternAction::Edit { index, pattern } => list.edit(index, &pattern),
                PatternAction::Enable { index } => list.set_enabled(index, true),
                PatternAction::Disable { index } => list.set_enabled(index, false),
                PatternAction::Remove { index } => list.remove(index).is_some(),
            };
            if !changed {
                bail!("Nothing changed");
            }
        }
        Command::Count { count } => {
            Settings::set_sample_count(&store, &keys, count);
            println!("Sampling the last {count} messages");
        }
        Command::Book { action } => match action {
            BookAction::Search { name } => {
                let Some(file_id) = find_source(&*lexicon, &name) else {
                    bail!("No world info matches \"{name}\"");
                };
                let world = lexicon.load_source(&file_id).await?;
                let static_selection =
                    ReferenceSelection::load(&store, &keys, SelectionMode::Static);
                let dynamic_selection =
                    ReferenceSelection::load(&store, &keys, SelectionMode::Dynamic);
                println!("{name} → {file_id}");
                for (uid, entry) in world.selectable() {
                    let used_in = [
                        (&static_selection, SelectionMode::Static),
                        (&dynamic_selection, SelectionMode::Dynamic),
                    ]
                    .iter()
                    .filter(|(sel, _)| {
                        sel.get(&name)
                            .is_some_and(|book| book.enabled_uids.contains(uid))
                    })
                    .map(|(_, mode)| mode.label())
                    .collect::<Vec<_>>();
                    let suffix = if used_in.is_empty() {
                        String::new()
                    } else {
                        format!(" ({})", used_in.join(", "))
                    };
                    println!("{uid}: {}{suffix}\n    {}", entry.label(), entry.preview());
                }
            }
            BookAction::Select {
                name,
                uids,
                dynamic,
                all,
                none,
            } => {
                let Some(file_id) = find_source(&*lexicon, &name) else {
                    bail!("No world info matches \"{name}\"");
                };
                let mode = if dynamic {
                    SelectionMode::Dynamic
                } else {
                    SelectionMode::Static
                };
                let world = lexicon.load_source(&file_id).await?;
                let mut selection = ReferenceSelection::load(&store, &keys, mode);
                let count = if none {
                    select_none(&mut selection, &name, &file_id);
                    0
                } else if all {
                    select_all(&mut selection, &name, &file_id, &world)
                } else {
                    select_entries(&mut selection, &name, &file_id, &world, &uids)
                };
                selection.save(&store, &keys, mode);
                println!("Saved {count} {} entries for {name}", mode.label());
            }
        },
        Command::Preview => {
            let settings = Settings::load(&store, &keys);
            for message in pipeline.build_request(&settings).await {
                println!("--- {:?}\n{}", message.role, message.content);
            }
        }
        Command::Generate { inject } => {
            let text = controller.generate_now().await?;
            println!("{text}");
            match inject {
                Some(Injection::Chat) => controller.inject_chat()?,
                Some(Injection::Swipe) => controller.inject_swipe()?,
                None => {}
            }
        }
        Command::Watch { auto, hosted } => {
            if auto || hosted {
                if auto {
                    controller.toggle_auto(Some(true));
                }
                if hosted {
                    controller.toggle_hosted(Some(true));
                }
            } else {
                controller.restore();
            }
            if !controller.auto_state().active && !controller.hosted_state().active {
                bail!("Neither auto nor hosted mode is on");
            }
            println!("Watching, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            controller.shutdown();
            info!("Watch ended");
        }
    }

    Ok(())
}
