mod app;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;

use versecache::cache::DEFAULT_TRANSLATION;
use versecache::config::Config;
use versecache::download::DownloadSelection;
use versecache::logging;
use versecache::sync::{EntityKind, NoteDraft, TagDraft};

#[derive(Parser, Debug)]
#[command(name = "versecache")]
#[command(about = "Offline cache and annotation sync for a scripture reader")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/versecache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Log at debug level
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch a path through the cache and print where it came from
  Get { path: String },
  /// Fetch a chapter's passage, interlinear and commentary
  Prefetch {
    book: String,
    chapter: u32,
    #[arg(short, long, default_value = DEFAULT_TRANSLATION)]
    translation: String,
  },
  /// Download resources for offline use
  Download(DownloadArgs),
  /// Show structured store and response cache statistics
  Stats,
  /// Clear the structured store
  Clear {
    /// Also clear the raw response cache
    #[arg(long)]
    responses: bool,
  },
  /// Force offline mode on or off, or show the current state
  Offline {
    #[arg(value_enum)]
    mode: OfflineMode,
  },
  /// Verse notes
  #[command(subcommand)]
  Notes(NotesCommand),
  /// Note tags
  #[command(subcommand)]
  Tags(TagsCommand),
  /// Reading plans
  #[command(subcommand)]
  Plan(PlanCommand),
  /// Sign in with the configured identity, push local changes, then pull
  Sync,
}

#[derive(ClapArgs, Debug, Default)]
struct DownloadArgs {
  /// Translation to download (repeatable)
  #[arg(long = "translation")]
  translations: Vec<String>,
  /// Hebrew and Greek lexicon
  #[arg(long)]
  lexicon: bool,
  /// Commentary source to download (repeatable)
  #[arg(long = "commentary")]
  commentary: Vec<String>,
  #[arg(long)]
  crossrefs: bool,
  #[arg(long)]
  devotionals: bool,
}

impl From<DownloadArgs> for DownloadSelection {
  fn from(args: DownloadArgs) -> Self {
    DownloadSelection {
      translations: args.translations,
      lexicon: args.lexicon,
      commentary_sources: args.commentary,
      crossrefs: args.crossrefs,
      devotionals: args.devotionals,
    }
  }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OfflineMode {
  On,
  Off,
  Status,
}

#[derive(Subcommand, Debug)]
enum NotesCommand {
  List,
  Add {
    book: String,
    chapter: u32,
    verse: u32,
    /// Last verse of the range
    #[arg(long)]
    end: Option<u32>,
    content: String,
  },
  Delete { id: String },
}

#[derive(Subcommand, Debug)]
enum TagsCommand {
  List,
  Add {
    name: String,
    #[arg(long)]
    color: Option<String>,
  },
}

#[derive(Subcommand, Debug)]
enum PlanCommand {
  /// Subscribe to a plan, optionally marking the first N days complete
  Start {
    plan_id: String,
    #[arg(long, default_value_t = 0)]
    catch_up: u32,
  },
  /// Flip one day of a subscription
  Toggle { subscription_id: String, day: u32 },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let data_dir = config.data_dir()?;

  let _logging = logging::init(&config.logging, &data_dir, args.verbose)?;

  let app = app::App::new(config, data_dir).await?;
  run(&app, args.command).await
}

async fn run(app: &app::App, command: Command) -> Result<()> {
  match command {
    Command::Get { path } => {
      let response = app.coordinator().request(&path).await?;
      eprintln!("{} {:?}", response.status, response.origin);
      println!("{}", response.body_text());
    }
    Command::Prefetch {
      book,
      chapter,
      translation,
    } => {
      let fetched = app
        .coordinator()
        .prefetch_chapter(&book, chapter, &translation)
        .await;
      println!("{fetched} resource(s) fetched for {book} {chapter}");
    }
    Command::Download(download) => {
      let summary = app.download(&DownloadSelection::from(download)).await?;
      app::print_json(&summary)?;
    }
    Command::Stats => {
      let stats = serde_json::json!({
        "connectivity": app.connectivity().state(),
        "store": app.store().get_stats()?,
        "responses": app.coordinator().response_stats(),
      });
      app::print_json(&stats)?;
    }
    Command::Clear { responses } => {
      app.store().clear_all()?;
      if responses {
        app.coordinator().clear_responses()?;
      }
      println!("cleared");
    }
    Command::Offline { mode } => {
      let state = match mode {
        OfflineMode::On => app.set_offline(true).await?,
        OfflineMode::Off => app.set_offline(false).await?,
        OfflineMode::Status => app.connectivity().state(),
      };
      app::print_json(&state)?;
    }
    Command::Notes(notes) => {
      let mut engine = app.sync_engine()?;
      app.sign_in(&mut engine).await;
      match notes {
        NotesCommand::List => {
          for note in &engine.collections().notes {
            println!(
              "{}\t{} {}:{}-{}\t{}{}",
              note.id,
              note.book,
              note.chapter,
              note.start_verse,
              note.end_verse,
              note.content,
              if note.synced { "" } else { "\t(unsynced)" }
            );
          }
        }
        NotesCommand::Add {
          book,
          chapter,
          verse,
          end,
          content,
        } => {
          let draft = NoteDraft {
            book,
            chapter,
            start_verse: verse,
            end_verse: end,
            content,
          };
          let note = engine.create(draft.into_entity()).await?;
          println!("{}", note.id());
        }
        NotesCommand::Delete { id } => engine.delete(EntityKind::Note, &id).await?,
      }
    }
    Command::Tags(tags) => {
      let mut engine = app.sync_engine()?;
      app.sign_in(&mut engine).await;
      match tags {
        TagsCommand::List => {
          for tag in &engine.collections().tags {
            println!(
              "{}\t{}\t{}",
              tag.id,
              tag.name,
              tag.color.as_deref().unwrap_or("-")
            );
          }
        }
        TagsCommand::Add { name, color } => {
          let tag = engine.create(TagDraft { name, color }.into_entity()).await?;
          println!("{}", tag.id());
        }
      }
    }
    Command::Plan(plan) => {
      let mut engine = app.sync_engine()?;
      app.sign_in(&mut engine).await;
      match plan {
        PlanCommand::Start { plan_id, catch_up } => {
          let subscription = engine
            .confirm_start_plan_with_catch_up(&plan_id, catch_up)
            .await?;
          println!("{}\tstarted {}", subscription.id, subscription.started_on);
        }
        PlanCommand::Toggle {
          subscription_id,
          day,
        } => {
          let complete = engine.toggle_day(&subscription_id, day).await?;
          println!(
            "day {day} {}",
            if complete { "complete" } else { "not complete" }
          );
        }
      }
    }
    Command::Sync => {
      let identity = app.identity().ok_or_else(|| {
        eyre!("No remote identity. Configure `remote` and set VERSECACHE_REMOTE_TOKEN.")
      })?;
      let mut engine = app.sync_engine()?;
      let report = engine.sign_in(identity).await?;
      app::print_json(&report)?;
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn download_flags_build_selection() {
    let args = Args::try_parse_from([
      "versecache",
      "download",
      "--translation",
      "KJV",
      "--translation",
      "WEB",
      "--commentary",
      "matthew-henry",
      "--lexicon",
    ])
    .unwrap();
    let Command::Download(download) = args.command else {
      panic!("expected download");
    };
    let selection = DownloadSelection::from(download);
    assert_eq!(selection.translations, vec!["KJV", "WEB"]);
    assert_eq!(selection.commentary_sources, vec!["matthew-henry"]);
    assert!(selection.lexicon);
    assert!(!selection.crossrefs);
  }

  #[test]
  fn prefetch_defaults_translation() {
    let args = Args::try_parse_from(["versecache", "-v", "prefetch", "John", "3"]).unwrap();
    assert!(args.verbose);
    match args.command {
      Command::Prefetch {
        book,
        chapter,
        translation,
      } => {
        assert_eq!(book, "John");
        assert_eq!(chapter, 3);
        assert_eq!(translation, DEFAULT_TRANSLATION);
      }
      other => panic!("unexpected command {other:?}"),
    }
  }

  #[test]
  fn plan_start_takes_catch_up() {
    let args =
      Args::try_parse_from(["versecache", "plan", "start", "nt-90", "--catch-up", "5"]).unwrap();
    match args.command {
      Command::Plan(PlanCommand::Start { plan_id, catch_up }) => {
        assert_eq!(plan_id, "nt-90");
        assert_eq!(catch_up, 5);
      }
      other => panic!("unexpected command {other:?}"),
    }
  }
}
