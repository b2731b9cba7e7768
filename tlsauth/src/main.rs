//! tlsauth: approve or reject TLS server certificates from the command line.

mod prompt;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::future::Future;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tlsauth_lib::{
    ActivityTracker, Authenticator, CertificateChain, CertificateProxy, Config, Decision,
    DigestAlgorithm, ExceptionStore, Fingerprint, LocalCertificate, VerificationContext, Verifier,
};
use tokio::task::JoinSet;
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "tlsauth",
    version,
    about = "Decide whether to trust TLS server certificates",
    long_about = "tlsauth verifies server certificate chains against the system trust\n\
                  store, the expected hostname and any configured CRLs. When a chain\n\
                  fails, it asks whether to accept it once, accept and remember it,\n\
                  or reject it. Remembered certificates are trusted for that host\n\
                  on later runs.",
    after_help = "EXAMPLES:\n\
                  \n  tlsauth verify --hostname example.com chain.pem\
                  \n  tlsauth verify --hostname example.com --non-interactive --json a.pem b.pem\
                  \n  tlsauth fingerprint chain.pem\
                  \n  tlsauth exceptions list\
                  \n  tlsauth exceptions add example.com --file chain.pem\
                  \n  cat chain.pem | tlsauth verify --hostname example.com"
)]
struct Cli {
    /// Configuration file (TOML). Defaults apply when omitted.
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log filter (trace, debug, info, warn, error or directives)
    #[arg(long, value_name = "FILTER", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify certificate chains, prompting on failure (exit 0 = accepted, 2 = rejected)
    #[command(
        after_help = "Each FILE is a PEM bundle (leaf first) or a single DER certificate,\n\
                      and counts as one login attempt. Attempts run concurrently;\n\
                      prompts are asked one at a time.\n\
                      \nEXAMPLES:\n\
                      \n  tlsauth verify --hostname example.com chain.pem\
                      \n  tlsauth verify --hostname example.com \\\
                      \n      --reference-identity xmpp.example.com chain.pem\
                      \n  tlsauth verify --hostname example.com --linger 30s chain.pem"
    )]
    Verify {
        /// Chain files. Reads one chain from stdin if omitted.
        files: Vec<PathBuf>,
        /// Hostname the client connected to
        #[arg(long)]
        hostname: String,
        /// Other identities the certificate may match (repeatable)
        #[arg(long = "reference-identity", value_name = "NAME")]
        reference_identities: Vec<String>,
        /// Reject failing chains without asking
        #[arg(long)]
        non_interactive: bool,
        /// Extra PEM file of trust anchors (repeatable)
        #[arg(long = "CAfile", visible_alias = "ca-file", value_name = "FILE")]
        ca_files: Vec<PathBuf>,
        /// CRL file, PEM or DER (repeatable)
        #[arg(long = "CRLfile", visible_alias = "crl-file", value_name = "FILE")]
        crl_files: Vec<PathBuf>,
        /// Verify at a specific Unix timestamp instead of current time
        #[arg(long, value_name = "EPOCH")]
        attime: Option<i64>,
        /// Report every failing check instead of the first
        #[arg(long)]
        composite: bool,
        /// Exit only once no prompt has been open for this long (e.g. 30s, 2m)
        #[arg(long, value_name = "DURATION")]
        linger: Option<String>,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Print the fingerprint exceptions are keyed by
    Fingerprint {
        /// Chain file. Reads from stdin if omitted.
        file: Option<PathBuf>,
        /// Digest: sha256, sha384, sha512 (default: from configuration)
        #[arg(long)]
        digest: Option<String>,
    },
    /// Manage remembered certificates
    Exceptions {
        #[command(subcommand)]
        action: ExceptionAction,
    },
}

#[derive(Subcommand)]
enum ExceptionAction {
    /// List stored exceptions
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Trust a certificate for a host
    Add {
        host: String,
        /// Fingerprint as printed by `tlsauth fingerprint`
        #[arg(required_unless_present = "file", conflicts_with = "file")]
        fingerprint: Option<String>,
        /// Compute the fingerprint from this chain file instead
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Forget the exceptions of a host (or one fingerprint)
    Remove {
        host: String,
        fingerprint: Option<String>,
    },
}

/// Maximum file size for certificate inputs (10 MiB).
const MAX_INPUT_BYTES: u64 = 10 * 1024 * 1024;

fn read_input(file: Option<&PathBuf>) -> Result<Vec<u8>> {
    match file {
        Some(path) => {
            let meta = std::fs::metadata(path)
                .with_context(|| format!("Failed to stat file: {}", path.display()))?;
            if meta.len() > MAX_INPUT_BYTES {
                anyhow::bail!(
                    "File too large ({} bytes, max {} bytes): {}",
                    meta.len(),
                    MAX_INPUT_BYTES,
                    path.display()
                );
            }
            std::fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))
        }
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .take(MAX_INPUT_BYTES)
                .read_to_end(&mut buf)
                .context("Failed to read from stdin")?;
            Ok(buf)
        }
    }
}

fn read_chain(file: Option<&PathBuf>) -> Result<CertificateChain> {
    let input = read_input(file)?;
    let label = file.map_or("stdin".to_string(), |f| f.display().to_string());
    CertificateChain::from_pem_or_der(&input)
        .with_context(|| format!("{}: no usable chain", label))
}

/// Parse a duration string using humantime format.
///
/// Plain numbers (e.g. "30") default to seconds. Otherwise, standard
/// humantime units are accepted: `s`, `m`, `h`, `d`, etc.
fn parse_duration(s: &str) -> Result<Duration> {
    if s.chars().all(|c| c.is_ascii_digit()) {
        let secs: u64 = s.parse().context("Invalid duration value")?;
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).with_context(|| format!("Invalid duration: '{s}'"))
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load configuration: {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn init_logging(directive: &str) {
    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

/// Outcome of one verify attempt, as printed with `--json`.
#[derive(Serialize)]
struct AttemptReport {
    file: String,
    hostname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fingerprint: Option<Fingerprint>,
    #[serde(flatten)]
    decision: Option<Decision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl AttemptReport {
    fn accepted(&self) -> bool {
        self.decision.as_ref().is_some_and(Decision::is_accepted)
    }

    fn print(&self) {
        match (&self.decision, &self.error) {
            (Some(Decision::Accepted(via)), _) => {
                println!("{}: accepted ({:?})", self.file, via);
            }
            (Some(Decision::Rejected(rejection)), _) => {
                eprintln!("{}: rejected: {}", self.file, rejection);
            }
            (None, Some(error)) => eprintln!("{}: FAIL ({})", self.file, error),
            (None, None) => eprintln!("{}: FAIL", self.file),
        }
    }
}

struct VerifyArgs {
    files: Vec<PathBuf>,
    hostname: String,
    reference_identities: Vec<String>,
    non_interactive: bool,
    linger: Option<Duration>,
    json: bool,
}

/// One login attempt: wrap the chain in a local certificate object and
/// run the approval flow on it.
async fn attempt(
    auth: Arc<Authenticator>,
    ctx: Arc<VerificationContext>,
    label: String,
    chain: CertificateChain,
) -> AttemptReport {
    let fingerprint = auth.verifier().fingerprint(&chain);
    let proxy = CertificateProxy::new(Arc::new(LocalCertificate::new(&chain)), label.clone());
    let (decision, error) = match auth.authenticate(&proxy, &ctx).await {
        Ok(decision) => (Some(decision), None),
        Err(e) => (None, Some(e.to_string())),
    };
    AttemptReport {
        file: label,
        hostname: ctx.hostname().to_string(),
        fingerprint: Some(fingerprint),
        decision,
        error,
    }
}

async fn run_verify(config: &Config, args: VerifyArgs) -> Result<usize> {
    let options = config.verify_options()?;
    let trust_store = config.build_trust_store()?;
    debug!(anchors = trust_store.len(), "trust store loaded");
    let verifier = Verifier::new(Arc::new(trust_store), config.open_exception_store()?)
        .with_options(options);

    let reads_stdin = args.files.is_empty();
    let mut interactive = config.client.interactive && !args.non_interactive;
    if interactive && reads_stdin {
        info!("chain read from stdin; failing chains are rejected without asking");
        interactive = false;
    }

    let activity = ActivityTracker::new();
    let mut auth = Authenticator::new(Arc::new(verifier)).with_activity(activity.clone());
    if interactive {
        auth = auth.with_prompt(Arc::new(prompt::TerminalPrompt::new()));
    }
    let auth = Arc::new(auth);
    let ctx = VerificationContext::new(args.hostname)
        .with_reference_identities(args.reference_identities);
    let ctx = Arc::new(ctx);

    let inputs: Vec<Option<&PathBuf>> = if reads_stdin {
        vec![None]
    } else {
        args.files.iter().map(Some).collect()
    };

    let mut reports: Vec<Option<AttemptReport>> = Vec::with_capacity(inputs.len());
    let mut tasks = JoinSet::new();
    for (idx, file) in inputs.into_iter().enumerate() {
        let label = file.map_or("stdin".to_string(), |f| f.display().to_string());
        match read_chain(file) {
            Ok(chain) => {
                reports.push(None);
                let (auth, ctx) = (Arc::clone(&auth), Arc::clone(&ctx));
                tasks.spawn(async move { (idx, attempt(auth, ctx, label, chain).await) });
            }
            Err(e) => reports.push(Some(AttemptReport {
                file: label,
                hostname: ctx.hostname().to_string(),
                fingerprint: None,
                decision: None,
                error: Some(format!("{:#}", e)),
            })),
        }
    }
    let json = args.json;
    let collect = async move {
        while let Some(joined) = tasks.join_next().await {
            let (idx, report) = joined.context("verification task failed")?;
            if let Some(slot) = reports.get_mut(idx) {
                *slot = Some(report);
            }
        }
        let reports: Vec<AttemptReport> = reports.into_iter().flatten().collect();
        if json {
            println!("{}", serde_json::to_string_pretty(&reports)?);
        } else {
            for report in &reports {
                report.print();
            }
        }
        Ok::<_, anyhow::Error>(reports)
    };

    let linger = args.linger.unwrap_or_else(|| config.idle_timeout());
    debug!(?linger, "idle countdown started");
    let reports = finish_when_idle(collect, &activity, linger).await?;

    Ok(reports.iter().filter(|r| !r.accepted()).count())
}

/// Drive `work` to completion while the idle countdown runs alongside it.
/// Resolves once the work is done and no prompt has been open for `linger`.
async fn finish_when_idle<T>(
    work: impl Future<Output = T>,
    activity: &ActivityTracker,
    linger: Duration,
) -> T {
    let (out, ()) = tokio::join!(work, activity.run_until_idle(linger));
    out
}

fn run_exceptions(config: &Config, action: ExceptionAction) -> Result<()> {
    let store = config.open_exception_store()?;
    match action {
        ExceptionAction::List { json } => {
            let entries = store.entries()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in entries {
                    println!("{}\t{}\t{}", entry.host, entry.fingerprint, entry.added_at);
                }
            }
        }
        ExceptionAction::Add {
            host,
            fingerprint,
            file,
        } => {
            let fingerprint = match (fingerprint, file) {
                (Some(fp), _) => fp.parse::<Fingerprint>()?,
                (None, Some(file)) => {
                    read_chain(Some(&file))?.fingerprint(config.verify.fingerprint_digest)
                }
                (None, None) => anyhow::bail!("a fingerprint or --file is required"),
            };
            store.store(&host, &fingerprint)?;
            println!("{}\t{}", host, fingerprint);
        }
        ExceptionAction::Remove { host, fingerprint } => {
            let fingerprint = fingerprint
                .map(|fp| fp.parse::<Fingerprint>())
                .transpose()?;
            let removed = store.remove(&host, fingerprint.as_ref())?;
            println!("removed {} exception(s) for {}", removed, host);
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_logging(cli.log_level.as_deref().unwrap_or(&config.client.log_level));

    match cli.command {
        Commands::Verify {
            files,
            hostname,
            reference_identities,
            non_interactive,
            ca_files,
            crl_files,
            attime,
            composite,
            linger,
            json,
        } => {
            let mut config = config;
            config.trust.ca_files.extend(ca_files);
            config.trust.crl_files.extend(crl_files);
            config.verify.composite |= composite;
            if let Some(ts) = attime {
                config.verify.at_time = Some(tlsauth_lib::util::format_timestamp(ts));
            }
            config.validate()?;

            let args = VerifyArgs {
                files,
                hostname,
                reference_identities,
                non_interactive,
                linger: linger.as_deref().map(parse_duration).transpose()?,
                json,
            };
            let rejected = run_verify(&config, args).await?;
            if rejected > 0 {
                std::process::exit(2);
            }
        }
        Commands::Fingerprint { file, digest } => {
            let algorithm = match digest {
                Some(d) => d.parse::<DigestAlgorithm>()?,
                None => config.verify.fingerprint_digest,
            };
            println!("{}", read_chain(file.as_ref())?.fingerprint(algorithm));
        }
        Commands::Exceptions { action } => run_exceptions(&config, action)?,
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn idle_countdown_overlaps_the_attempts() {
        let activity = ActivityTracker::new();
        let started = tokio::time::Instant::now();
        let work = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            7
        };

        let out = finish_when_idle(work, &activity, Duration::from_secs(5)).await;
        assert_eq!(out, 7);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn open_prompt_extends_the_countdown() {
        let activity = ActivityTracker::new();
        let started = tokio::time::Instant::now();
        let work = async {
            let _window = activity.open_window();
            tokio::time::sleep(Duration::from_secs(8)).await;
        };

        finish_when_idle(work, &activity, Duration::from_secs(5)).await;
        assert_eq!(started.elapsed(), Duration::from_secs(13));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_linger_exits_with_the_last_attempt() {
        let activity = ActivityTracker::new();
        let started = tokio::time::Instant::now();
        finish_when_idle(
            tokio::time::sleep(Duration::from_secs(1)),
            &activity,
            Duration::ZERO,
        )
        .await;
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn parse_plain_seconds() {
        assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn parse_plain_zero() {
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn parse_humantime_units() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(
            parse_duration("1h30m").unwrap(),
            Duration::from_secs(5400)
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("-5").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn verify_takes_repeatable_identities() {
        let cli = Cli::try_parse_from([
            "tlsauth",
            "verify",
            "--hostname",
            "example.com",
            "--reference-identity",
            "a.example.com",
            "--reference-identity",
            "b.example.com",
            "one.pem",
            "two.pem",
        ])
        .unwrap();
        match cli.command {
            Commands::Verify {
                files,
                reference_identities,
                ..
            } => {
                assert_eq!(files.len(), 2);
                assert_eq!(reference_identities, vec!["a.example.com", "b.example.com"]);
            }
            _ => panic!("expected verify"),
        }
    }

    #[test]
    fn exceptions_add_needs_a_fingerprint_source() {
        assert!(Cli::try_parse_from(["tlsauth", "exceptions", "add", "example.com"]).is_err());
        assert!(Cli::try_parse_from([
            "tlsauth",
            "exceptions",
            "add",
            "example.com",
            "sha256:AB",
            "--file",
            "chain.pem"
        ])
        .is_err());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(dir.path().join("absent.toml").as_path())).is_err());
        let path = dir.path().join("tlsauth.toml");
        std::fs::write(&path, "[client]\ninteractive = false\n").unwrap();
        assert!(!load_config(Some(path.as_path())).unwrap().client.interactive);
    }

    #[test]
    fn report_counts_only_accepted_decisions() {
        let report = AttemptReport {
            file: "a.pem".into(),
            hostname: "example.com".into(),
            fingerprint: None,
            decision: None,
            error: Some("unreadable".into()),
        };
        assert!(!report.accepted());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["error"], "unreadable");
        assert!(json.get("decision").is_none());
    }
}
