//! veil: transparent encryption for remote object stores
//!
//! Commands:
//!   encode <name>...                 - map logical names to encrypted names
//!   decode <name>...                 - map encrypted names back
//!   show-cek <name>...               - print per-object content encryption keys
//!   decrypt <remote> <cek> <local>.. - download V2 objects with disclosed CEKs
//!   ls [<dir>]                       - list a directory, names decrypted
//!   put <local> <remote>             - encrypt and upload a file
//!   get <remote> <local>             - download and decrypt a file

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use veil_core::VeilConfig;
use veil_store::{build_cipher, build_operator, VeilRemote};

#[derive(Parser, Debug)]
#[command(
    name = "veil",
    version,
    about = "Transparent encryption layer over an object store",
    long_about = "veil wraps an untrusted object store with encrypted file names \
                  and streaming authenticated encryption of contents."
)]
struct Cli {
    /// Path to veil.toml configuration file
    #[arg(long, short = 'c', env = "VEIL_CONFIG", default_value = "veil.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "VEIL_LOG", default_value = "warn")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt the given file name(s)
    Encode {
        /// Logical file names
        names: Vec<String>,
    },

    /// Decrypt the given encrypted file name(s)
    Decode {
        /// Encrypted file names
        names: Vec<String>,
    },

    /// Show the content encryption key for encrypted file(s)
    ///
    /// The CEK lets its holder decrypt that one object without the master
    /// key. V1 objects have no CEK.
    #[command(name = "show-cek")]
    ShowCek {
        /// Logical file names
        names: Vec<String>,
    },

    /// Decrypt remote objects using disclosed CEKs
    ///
    /// Arguments come in triples: encrypted remote path, CEK in hex,
    /// local destination path. Only V2 objects are supported; password
    /// configuration is irrelevant since the CEK alone decrypts the data.
    Decrypt {
        /// encrypted-path cek-hex local-path, repeated
        #[arg(num_args = 3.., value_names = ["REMOTE", "CEK", "LOCAL"])]
        args: Vec<String>,
    },

    /// List a directory with decrypted names
    Ls {
        /// Directory to list (default: root)
        dir: Option<String>,
    },

    /// Encrypt and upload a local file
    Put {
        local: PathBuf,
        remote: String,
    },

    /// Download and decrypt a remote file
    Get {
        remote: String,
        local: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log);

    let config = load_config(&cli.config).await?;
    let remote = build_remote(&config)?;

    match cli.command {
        Commands::Encode { names } => {
            for encoded in remote.cmd_encode(&names)? {
                println!("{encoded}");
            }
        }
        Commands::Decode { names } => {
            for decoded in remote.cmd_decode(&names)? {
                println!("{decoded}");
            }
        }
        Commands::ShowCek { names } => {
            for cek in remote.cmd_show_cek(&names).await? {
                println!("{cek}");
            }
        }
        Commands::Decrypt { args } => {
            if args.is_empty() || args.len() % 3 != 0 {
                anyhow::bail!("decrypt needs arguments in triples: REMOTE CEK LOCAL");
            }
            for triple in args.chunks(3) {
                remote
                    .cmd_decrypt(&triple[0], &triple[1], triple[2].as_ref())
                    .await
                    .with_context(|| format!("failed copying {:?} to {:?}", triple[0], triple[2]))?;
            }
        }
        Commands::Ls { dir } => {
            let mut entries = remote.list(dir.as_deref().unwrap_or("")).await?;
            entries.sort_by(|a, b| a.path.cmp(&b.path));
            for entry in entries {
                if entry.is_dir {
                    println!("{:>12}  {}/", "-", entry.path);
                } else {
                    match entry.size {
                        Some(size) => println!("{size:>12}  {}", entry.path),
                        None => println!("{:>12}  {}", "?", entry.path),
                    }
                }
            }
        }
        Commands::Put { local, remote: path } => {
            let file = tokio::fs::File::open(&local)
                .await
                .with_context(|| format!("opening {}", local.display()))?;

            let spinner = ProgressBar::new_spinner().with_message(format!("encrypting {path}"));
            let result = remote.put(&path, file).await?;
            spinner.finish_and_clear();

            info!(
                local = %local.display(),
                remote = path,
                bytes = result.plaintext_bytes,
                "uploaded"
            );
            println!(
                "{} -> {} ({} bytes)",
                local.display(),
                path,
                result.plaintext_bytes
            );
        }
        Commands::Get { remote: path, local } => {
            use tokio::io::AsyncWriteExt;

            let info = remote.stat(&path).await?;
            let mut reader = remote.open(&path, 0, None, None).await?;

            if let Some(parent) = local.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            let mut file = tokio::fs::File::create(&local)
                .await
                .with_context(|| format!("creating {}", local.display()))?;

            let bar = transfer_bar(info.size);
            let mut buf = vec![0u8; 256 * 1024];
            let mut total = 0u64;
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                total += n as u64;
                bar.set_position(total);
                file.write_all(&buf[..n]).await?;
            }
            file.flush().await?;
            bar.finish_and_clear();

            println!("{} -> {} ({} bytes)", path, local.display(), total);
        }
    }

    Ok(())
}

async fn load_config(path: &PathBuf) -> Result<VeilConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
}

fn build_remote(config: &VeilConfig) -> Result<VeilRemote> {
    let op = build_operator(&config.remote)?;
    let cipher = build_cipher(&config.crypt)?;
    Ok(VeilRemote::new(op, cipher, &config.crypt))
}

fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn transfer_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template("{bar:30} {bytes}/{total_bytes} {bytes_per_sec}")
            .expect("static progress template is valid"),
    );
    bar
}
