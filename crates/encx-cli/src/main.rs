//! encx: file encryption with key custody and certificate authentication
//!
//! Commands:
//!   encrypt <files...>            - seal files, record key/nonce/tag in the custody store
//!   decrypt <files...>            - restore files (key from --key/--nonce or the store)
//!   verify <file>                 - authenticate a container without writing plaintext
//!   store list|search|delete      - inspect and prune the custody store
//!   ca init|issue                 - bootstrap the local root CA, issue identities
//!   auth --cert --key             - chain validation + proof of possession
//!   config show                   - display current configuration

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::Zeroizing;

use encx_core::config::{expand_tilde, resolve_algorithm, EncxConfig};
use encx_core::ProgressFn;
use encx_identity::authority::CA_CERT_FILE;
use encx_identity::{
    export_bundle, signing_key_from_pem, Bootstrap, Certificate, RootAuthority, SecretString,
};
use encx_ops::{authenticate, BatchReport, KeyMaterial, Pipeline, StreamHooks};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "encx",
    version,
    about = "Authenticated file encryption with key custody",
    long_about = "encx: chunked AES-GCM / ChaCha20-Poly1305 file encryption, a custody store \
                  for keys and nonces, and a local certificate authority for authentication"
)]
struct Cli {
    /// Path to encx.toml configuration file
    #[arg(long, short = 'c', env = "ENCX_CONFIG", default_value = "~/.config/encx/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt files into `<file><extension>` containers
    Encrypt {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Use this base64 key instead of a random one
        #[arg(long, env = "ENCX_KEY", hide_env_values = true)]
        key: Option<String>,
        /// Key size in bits (overrides config): 128, 192 or 256
        #[arg(long)]
        key_size: Option<u16>,
        /// Do not save the custody record; key and nonce are printed instead
        #[arg(long)]
        no_store: bool,
        /// Replace existing containers
        #[arg(long)]
        overwrite: bool,
    },

    /// Decrypt containers back to their original names
    Decrypt {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Base64 key (default: looked up in the custody store)
        #[arg(long, requires = "nonce")]
        key: Option<String>,
        /// Base64 nonce, required with --key
        #[arg(long, requires = "key")]
        nonce: Option<String>,
        /// Replace existing plaintext files
        #[arg(long)]
        overwrite: bool,
    },

    /// Authenticate every chunk of a container without writing plaintext
    Verify {
        file: PathBuf,
        #[arg(long, requires = "nonce")]
        key: Option<String>,
        #[arg(long, requires = "key")]
        nonce: Option<String>,
    },

    /// Custody store management
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },

    /// Local certificate authority
    Ca {
        #[command(subcommand)]
        action: CaAction,
    },

    /// Validate a certificate against the root CA and prove possession of its key
    Auth {
        /// PEM certificate to authenticate
        #[arg(long)]
        cert: PathBuf,
        /// PEM (PKCS#8) private key matching the certificate
        #[arg(long)]
        key: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum StoreAction {
    /// List every record (keys are not shown)
    List,
    /// Show the record for a plaintext hash, a plaintext file, or a container
    Search {
        target: String,
    },
    /// Remove the record for a plaintext hash
    Delete {
        hash: String,
    },
}

#[derive(Subcommand, Debug)]
enum CaAction {
    /// Create the root CA if absent, otherwise load it
    Init,
    /// Issue a key pair and leaf certificate for a subject
    Issue {
        subject: String,
        /// Output directory for certificate.pem, private_key.pem, public_key.pem
        #[arg(long)]
        out: PathBuf,
        /// Also write identity.p12 (password-protected PKCS#12)
        #[arg(long)]
        p12: bool,
        /// PKCS#12 password (prompted when omitted)
        #[arg(long, env = "ENCX_P12_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = EncxConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;
    init_logging(&config.log.level, &config.log.format);

    match cli.command {
        Commands::Encrypt { files, key, key_size, no_store, overwrite } => {
            cmd_encrypt(&config, &files, key.as_deref(), key_size, no_store, overwrite)
        }
        Commands::Decrypt { files, key, nonce, overwrite } => {
            cmd_decrypt(&config, &files, material(key.as_deref(), nonce.as_deref())?, overwrite)
        }
        Commands::Verify { file, key, nonce } => {
            cmd_verify(&config, &file, material(key.as_deref(), nonce.as_deref())?)
        }
        Commands::Store { action: StoreAction::List } => cmd_store_list(&config),
        Commands::Store { action: StoreAction::Search { target } } => {
            cmd_store_search(&config, &target)
        }
        Commands::Store { action: StoreAction::Delete { hash } } => {
            cmd_store_delete(&config, &hash)
        }
        Commands::Ca { action: CaAction::Init } => cmd_ca_init(&config),
        Commands::Ca { action: CaAction::Issue { subject, out, p12, password } } => {
            cmd_ca_issue(&config, &subject, &out, p12, password)
        }
        Commands::Auth { cert, key } => cmd_auth(&config, &cert, &key),
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &config_path),
    }
}

fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn material(key: Option<&str>, nonce: Option<&str>) -> Result<Option<KeyMaterial>> {
    match (key, nonce) {
        (Some(k), Some(n)) => Ok(Some(
            KeyMaterial::from_base64(k, n).context("decoding --key/--nonce")?,
        )),
        _ => Ok(None),
    }
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}"
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn progress_callback(pb: &ProgressBar) -> ProgressFn {
    let pb = pb.clone();
    Box::new(move |done, total, msg| {
        pb.set_length(total);
        pb.set_position(done);
        pb.set_message(msg.to_string());
    })
}

// ── `encx encrypt` ────────────────────────────────────────────────────────────

fn cmd_encrypt(
    config: &EncxConfig,
    files: &[PathBuf],
    key_b64: Option<&str>,
    key_size: Option<u16>,
    no_store: bool,
    overwrite: bool,
) -> Result<()> {
    let mut pipeline = Pipeline::from_config(config).context("opening pipeline")?;
    if let Some(bits) = key_size {
        pipeline.settings_mut().algorithm = resolve_algorithm(config.engine.cipher, bits)?;
    }
    if no_store {
        pipeline.policy_mut().store_record_after_encrypt = false;
    }
    pipeline.settings_mut().overwrite |= overwrite;

    let key = key_b64
        .map(|k| STANDARD.decode(k.trim()).map(Zeroizing::new))
        .transpose()
        .context("--key is not valid base64")?;

    println!(
        "Encrypting {} file(s) with {} (chunk size {})",
        files.len(),
        pipeline.settings().algorithm,
        fmt_bytes(encx_crypto::chunk_size_for_budget(pipeline.settings().memory_budget) as u64),
    );

    let pb = make_progress_bar(0, "encrypt");
    let progress = progress_callback(&pb);

    let report = match &key {
        None => pipeline.encrypt_files(files, Some(&progress), None),
        Some(key) => pipeline.encrypt_files_with_key(files, key, Some(&progress), None),
    };
    pb.finish_and_clear();

    for (path, outcome) in &report.succeeded {
        let record = &outcome.sealed.record;
        println!("{} → {}", path.display(), outcome.sealed.output.display());
        println!("  hash:    {}", record.file_hash);
        println!("  chunks:  {}", outcome.sealed.chunks);
        println!("  bytes:   {}", fmt_bytes(outcome.sealed.bytes));
        if outcome.stored {
            println!("  record:  saved");
        } else {
            println!("  key:     {}", STANDARD.encode(&record.key));
            println!("  nonce:   {}", STANDARD.encode(&record.nonce));
            println!("  (not stored; keep the key and nonce to decrypt)");
        }
        if outcome.source_deleted {
            println!("  source:  deleted");
        }
    }
    finish_report(&report)
}

// ── `encx decrypt` ────────────────────────────────────────────────────────────

fn cmd_decrypt(
    config: &EncxConfig,
    files: &[PathBuf],
    material: Option<KeyMaterial>,
    overwrite: bool,
) -> Result<()> {
    // One key/nonce pair belongs to exactly one container.
    if material.is_some() && files.len() != 1 {
        anyhow::bail!("--key/--nonce decrypt exactly one file, got {}", files.len());
    }

    let mut pipeline = Pipeline::from_config(config).context("opening pipeline")?;
    pipeline.settings_mut().overwrite |= overwrite;

    let pb = make_progress_bar(0, "decrypt");
    let progress = progress_callback(&pb);

    let report = match material {
        None => pipeline.decrypt_files(files, Some(&progress), None),
        Some(material) => {
            let mut report = BatchReport {
                succeeded: Vec::new(),
                failed: Vec::new(),
                skipped: Vec::new(),
            };
            let hooks = StreamHooks { progress: Some(&progress), cancel: None };
            match pipeline.decrypt(&files[0], Some(material), hooks) {
                Ok(outcome) => report.succeeded.push((files[0].clone(), outcome)),
                Err(e) => report.failed.push((files[0].clone(), e)),
            }
            report
        }
    };
    pb.finish_and_clear();

    for (path, outcome) in &report.succeeded {
        println!("{} → {}", path.display(), outcome.opened.output.display());
        println!("  hash:    {} (verified)", outcome.opened.file_hash);
        println!("  bytes:   {}", fmt_bytes(outcome.opened.bytes));
        if outcome.container_deleted {
            println!("  container: deleted");
        }
        if outcome.record_deleted {
            println!("  record:  deleted");
        }
    }
    finish_report(&report)
}

fn finish_report<T>(report: &BatchReport<T>) -> Result<()> {
    for (path, err) in &report.failed {
        eprintln!("error: {}: {err}", path.display());
    }
    for path in &report.skipped {
        eprintln!("skipped: {}", path.display());
    }
    if report.is_clean() {
        Ok(())
    } else {
        anyhow::bail!(
            "{} file(s) failed, {} skipped",
            report.failed.len(),
            report.skipped.len()
        )
    }
}

// ── `encx verify` ─────────────────────────────────────────────────────────────

fn cmd_verify(config: &EncxConfig, file: &Path, material: Option<KeyMaterial>) -> Result<()> {
    let pipeline = Pipeline::from_config(config).context("opening pipeline")?;
    let verified = pipeline
        .verify(file, material)
        .with_context(|| format!("verifying {}", file.display()))?;

    println!("{}: OK", file.display());
    println!("  hash:    {}", verified.file_hash);
    println!("  chunks:  {}", verified.chunks);
    println!("  bytes:   {}", fmt_bytes(verified.bytes));
    Ok(())
}

// ── `encx store` ──────────────────────────────────────────────────────────────

fn cmd_store_list(config: &EncxConfig) -> Result<()> {
    let pipeline = Pipeline::from_config(config).context("opening pipeline")?;
    let records = pipeline.store().list()?;

    println!("# {} ({} records)", pipeline.store().path().display(), records.len());
    for r in &records {
        println!(
            "{}  {:<18} {:>10}  {}",
            r.file_hash, r.algorithm.name(), r.created_at, r.source_address
        );
    }
    Ok(())
}

fn cmd_store_search(config: &EncxConfig, target: &str) -> Result<()> {
    let pipeline = Pipeline::from_config(config).context("opening pipeline")?;
    let path = Path::new(target);

    let record = if path.is_file() {
        if target.ends_with(&pipeline.settings().extension) {
            pipeline.lookup_record(path)?
        } else {
            let hash = encx_crypto::digest(path)?;
            pipeline.store().search(&hash)?
        }
    } else {
        pipeline.store().search(&target.to_ascii_lowercase())?
    };

    match record {
        Some(r) => {
            println!("hash:      {}", r.file_hash);
            println!("algorithm: {}", r.algorithm);
            println!("key:       {}", STANDARD.encode(&r.key));
            println!("nonce:     {}", STANDARD.encode(&r.nonce));
            println!("tag:       {}", STANDARD.encode(&r.tag));
            println!("source:    {}", r.source_address);
        }
        None => println!("no record for {target}"),
    }
    Ok(())
}

fn cmd_store_delete(config: &EncxConfig, hash: &str) -> Result<()> {
    let pipeline = Pipeline::from_config(config).context("opening pipeline")?;
    if pipeline.store().delete(&hash.to_ascii_lowercase())? {
        println!("deleted record {hash}");
    } else {
        println!("no record for {hash}");
    }
    Ok(())
}

// ── `encx ca` ─────────────────────────────────────────────────────────────────

fn cmd_ca_init(config: &EncxConfig) -> Result<()> {
    let ca = RootAuthority::ensure(&config.authority).context("bootstrapping root authority")?;
    let (_, not_after) = ca.certificate().validity()?;

    match ca.bootstrap() {
        Bootstrap::Created => println!("Created root CA in {}", ca.dir().display()),
        Bootstrap::Loaded => println!("Root CA already present in {}", ca.dir().display()),
    }
    println!("  subject:   {}", ca.certificate().subject()?);
    println!("  not after: {not_after} (unix)");
    Ok(())
}

fn cmd_ca_issue(
    config: &EncxConfig,
    subject: &str,
    out: &Path,
    p12: bool,
    password: Option<String>,
) -> Result<()> {
    let ca = RootAuthority::ensure(&config.authority).context("bootstrapping root authority")?;
    let identity = ca
        .issue_identity(subject)
        .with_context(|| format!("issuing identity for {subject}"))?;
    let files = identity
        .write_to(out, config.policy.overwrite_existing)
        .with_context(|| format!("writing identity to {}", out.display()))?;

    println!("Issued {subject}");
    println!("  certificate: {}", files.certificate.display());
    println!("  private key: {}", files.private_key.display());
    println!("  public key:  {}", files.public_key.display());

    if p12 {
        let password = match password {
            Some(p) => SecretString::from(p),
            None => prompt_new_password()?,
        };
        let der = export_bundle(&identity, &password)?;
        let path = out.join("identity.p12");
        encx_core::atomic::write_atomic(&path, &der, config.policy.overwrite_existing)?;
        println!("  pkcs#12:     {}", path.display());
    }
    Ok(())
}

fn prompt_new_password() -> Result<SecretString> {
    let first = Zeroizing::new(
        rpassword::prompt_password("PKCS#12 password: ").context("reading password")?,
    );
    let second = Zeroizing::new(
        rpassword::prompt_password("Confirm password: ").context("reading password")?,
    );
    if *first != *second {
        anyhow::bail!("passwords do not match");
    }
    Ok(SecretString::from(first.as_str()))
}

// ── `encx auth` ───────────────────────────────────────────────────────────────

fn cmd_auth(config: &EncxConfig, cert_path: &Path, key_path: &Path) -> Result<()> {
    let ca_path = config.authority.resolved_dir().join(CA_CERT_FILE);
    let ca = Certificate::load(&ca_path)
        .with_context(|| format!("loading root CA {} (run `encx ca init`)", ca_path.display()))?;
    let cert = Certificate::load(cert_path)
        .with_context(|| format!("loading certificate {}", cert_path.display()))?;
    let key_pem = Zeroizing::new(
        std::fs::read_to_string(key_path)
            .with_context(|| format!("reading private key {}", key_path.display()))?,
    );
    let key = signing_key_from_pem(&key_pem)?;

    authenticate(&ca, &cert, &key)?;
    println!("authenticated: {}", cert.subject()?);
    Ok(())
}

// ── `encx config show` ────────────────────────────────────────────────────────

fn cmd_config_show(config: &EncxConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
