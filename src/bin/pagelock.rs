//! Pagelock CLI - seal and unlock passphrase-locked HTML blocks
//!
//! `seal` is the build-time step that produces an envelope for a page.
//! `unlock` and `verify` run the same pipeline a visitor's browser runs.

use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::process;
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

use pagelock::config::{DEFAULT_SESSION_KEY, UnlockConfig};
use pagelock::error::{ErrorCategory, ErrorKind, PagelockError, Result};
use pagelock::file_ops::{self, FileStorage};
use pagelock::inline::DEFAULT_PRIVATE_CLASS;
use pagelock::kdf::{DEFAULT_ITERATIONS, KdfParams};
use pagelock::passphrase::{PassphraseReader, ReaderPassphraseReader, TerminalPassphraseReader};
use pagelock::session::{MemoryStorage, SessionCache, Storage};

#[derive(Parser)]
#[command(name = "pagelock")]
#[command(version)]
#[command(about = "Passphrase-locked HTML blocks for static pages.", long_about = None)]
struct Cli {
    /// Read passphrase from stdin instead of from terminal
    #[arg(long, global = true)]
    passphrase_stdin: bool,

    /// PBKDF2 iteration count; must match the one used when sealing
    #[arg(long, global = true, env = "PAGELOCK_ITERATIONS", default_value_t = DEFAULT_ITERATIONS)]
    iterations: u32,

    /// Storage slot that holds the cached session
    #[arg(long, global = true, env = "PAGELOCK_SESSION_KEY", default_value = DEFAULT_SESSION_KEY)]
    session_key: String,

    /// Enable debug logging on stderr (PAGELOCK_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seal an HTML file into an envelope
    #[command(alias = "s")]
    Seal {
        /// Path to the HTML whose contents is to be locked
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to the file to write the envelope to
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Treat the input as a page and seal only the element with this class,
        /// writing the page back with the envelope in place
        #[arg(
            long,
            value_name = "CLASS",
            num_args = 0..=1,
            default_missing_value = DEFAULT_PRIVATE_CLASS
        )]
        inline: Option<String>,
    },

    /// Unlock an envelope, trying the cached session before asking for a passphrase
    #[command(alias = "u")]
    Unlock {
        /// Path to the envelope file, or a page sealed with --inline
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to the file to write the revealed HTML to
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// JSON file persisting the cached session between runs
        #[arg(long, value_name = "FILE", env = "PAGELOCK_SESSION_FILE")]
        session_file: Option<PathBuf>,

        /// Number of passphrase attempts before giving up
        #[arg(long, default_value_t = 3)]
        attempts: u32,
    },

    /// Check a passphrase against an envelope without revealing it
    #[command(alias = "v")]
    Verify {
        /// Path to the envelope file
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", render_chain(&e));
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = UnlockConfig {
        kdf: KdfParams::new(cli.iterations)?,
        session_key: cli.session_key,
    };
    let mut reader = get_passphrase_reader(cli.passphrase_stdin);

    match cli.command {
        Commands::Seal {
            input,
            output,
            inline,
        } => match inline {
            Some(class) => {
                file_ops::seal_file_inline(&input, &output, &class, &mut *reader, &config)
            }
            None => file_ops::seal_file(&input, &output, &mut *reader, &config),
        },
        Commands::Unlock {
            input,
            output,
            session_file,
            attempts,
        } => {
            let storage: Rc<dyn Storage> = match session_file {
                Some(path) => Rc::new(FileStorage::new(path)),
                None => Rc::new(MemoryStorage::new()),
            };
            let session = SessionCache::with_key(storage, config.session_key.clone());
            // stdin is read to the end, so it can only supply one attempt.
            let attempts = if cli.passphrase_stdin {
                attempts.min(1)
            } else {
                attempts
            };
            file_ops::unlock_file(&input, &output, session, &mut *reader, &config, attempts)
        }
        Commands::Verify { input } => {
            if file_ops::verify_file(&input, &mut *reader)? {
                println!("passphrase verifies");
                Ok(())
            } else {
                Err(PagelockError::with_kind(
                    ErrorCategory::User,
                    ErrorKind::VerificationFailed,
                    "wrong passphrase or corrupted envelope",
                ))
            }
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("PAGELOCK_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn render_chain(err: &PagelockError) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

fn get_passphrase_reader(use_stdin: bool) -> Box<dyn PassphraseReader> {
    if use_stdin {
        Box::new(ReaderPassphraseReader::new(Box::new(std::io::stdin())))
    } else {
        Box::new(TerminalPassphraseReader)
    }
}
