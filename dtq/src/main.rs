//! dtq: query Dynatrace problems, entities, metrics, logs and DQL from the terminal.

mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Duration;
use clap::{Parser, Subcommand};
use log::{debug, info, warn};
use serde::Serialize;

use dtq_lib::analysis::{ANALYTICS_LOOKBACK_HOURS, DEFAULT_ENRICHMENT_LIMIT, ERROR_LOG_LOOKBACK_HOURS};
use dtq_lib::client::{match_text, LAMBDA_METRICS_LOOKBACK};
use dtq_lib::config::{DEFAULT_ENVIRONMENT, DEFAULT_ENV_DIR};
use dtq_lib::helpers::DEFAULT_LOOKBACK_HOURS;
use dtq_lib::query::{DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_MAX_RESULT_RECORDS};
use dtq_lib::{
    scopes, Analysis, BizEventSummary, Client, Config, Credential, Error, LambdaMetric, QueryRequest,
    ResultSet, Timeframe, TokenProvider,
};
use output::OutputFormat;

const LAMBDA_SELECTOR: &str = "type(AWS_LAMBDA_FUNCTION)";

#[derive(Parser)]
#[command(name = "dtq")]
#[command(version, about = "Dynatrace query CLI - problems, entities, metrics, logs, and DQL", long_about = None)]
struct Cli {
    /// Environment name; settings are read from <env-dir>/.env.<env>
    #[arg(long, env = "DTQ_ENV", default_value = DEFAULT_ENVIRONMENT)]
    env: String,

    /// Directory holding the .env.<env> files
    #[arg(long, env = "DTQ_ENV_DIR", default_value = DEFAULT_ENV_DIR)]
    env_dir: PathBuf,

    /// Output format: plain (human-readable), json (structured)
    #[arg(short, long, default_value = "plain", value_enum)]
    output: OutputFormat,

    /// Log filter (error, warn, info, debug, trace); overrides LOG_LEVEL
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the environment file and print its settings (no network)
    Config,
    /// Acquire an OAuth token and print its expiry and granted scopes
    Token,
    /// List problems
    Problems {
        #[arg(long, default_value = "10")]
        page_size: u32,
        #[arg(long)]
        entity_selector: Option<String>,
        #[arg(long)]
        from: Option<String>,
        /// Keep only problems whose JSON contains this text (case-insensitive)
        #[arg(long)]
        filter: Option<String>,
    },
    /// List monitored entities
    Entities {
        #[arg(long, default_value = LAMBDA_SELECTOR)]
        selector: String,
        #[arg(long, default_value = "displayName,entityId")]
        fields: String,
    },
    /// Errors, duration or invocations of one Lambda function
    LambdaMetrics {
        entity_id: String,
        /// errors, duration, invocations
        #[arg(long, default_value = "errors")]
        metric: LambdaMetric,
        #[arg(long, default_value = LAMBDA_METRICS_LOOKBACK)]
        from: String,
    },
    /// Query a metric selector
    Metrics {
        selector: String,
        #[arg(long, default_value = "now-1h")]
        from: String,
        #[arg(long, default_value = "1m")]
        resolution: String,
    },
    /// List events
    Events {
        #[arg(long, default_value = "now-1h")]
        from: String,
        /// Keep only events whose JSON contains this text (case-insensitive)
        #[arg(long)]
        filter: Option<String>,
    },
    /// Search logs with a DQL filter expression
    Logs {
        filter: String,
        #[arg(long, default_value = "now-1h")]
        from: String,
        #[arg(long, default_value = "100")]
        limit: u32,
    },
    /// Run a DQL query
    Dql {
        query: String,
        #[arg(long, default_value = "now-1h")]
        from: String,
        #[arg(long)]
        to: Option<String>,
        #[arg(long, default_value_t = DEFAULT_MAX_RESULT_RECORDS)]
        limit: u32,
        /// Seconds the query engine may spend fetching data
        #[arg(long, default_value_t = DEFAULT_FETCH_TIMEOUT_SECS)]
        fetch_timeout: u32,
    },
    /// Search business events and summarize them
    Bizevents {
        phrase: String,
        #[arg(long, default_value = "now-24h")]
        from: String,
    },
    /// Per-minute log and business event counts around a phrase
    Correlate {
        query: String,
        #[arg(long, default_value = "now-1h")]
        from: String,
    },
    /// Search every source at once and sum the business impact
    Search {
        query: String,
        #[arg(long, default_value = "now-1h")]
        from: String,
    },
    /// Run a predefined business analytics query
    Analytics {
        /// events-summary, payment-analysis, customer-behavior, revenue-timeseries
        kind: Analysis,
        #[arg(long, default_value = "now-24h")]
        from: String,
    },
    /// ERROR logs mentioning an entity name
    ErrorLogs {
        name: String,
        #[arg(long, default_value = "now-24h")]
        from: String,
    },
    /// Rank entities by ERROR log count
    RankErrors {
        #[arg(long, default_value = LAMBDA_SELECTOR)]
        selector: String,
        #[arg(long, default_value_t = DEFAULT_ENRICHMENT_LIMIT)]
        limit: usize,
        #[arg(long, default_value = "now-24h")]
        from: String,
    },
    /// Show version
    Version,
}

impl Commands {
    /// Scopes requested when exchanging OAuth credentials for this command.
    fn scopes(&self) -> Vec<&'static str> {
        match self {
            Commands::Problems { .. }
            | Commands::Entities { .. }
            | Commands::Metrics { .. }
            | Commands::LambdaMetrics { .. }
            | Commands::Events { .. } => scopes::CLASSIC.to_vec(),
            Commands::Logs { .. } | Commands::Dql { .. } | Commands::ErrorLogs { .. } => {
                scopes::QUERY.to_vec()
            }
            Commands::Bizevents { .. } | Commands::Analytics { .. } | Commands::Correlate { .. } => {
                scopes::BIZEVENTS.to_vec()
            }
            _ => scopes::all(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Version) {
        println!("dtq {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let config = Config::load(&cli.env_dir, &cli.env);
    let level = cli
        .log_level
        .clone()
        .or_else(|| config.as_ref().ok().map(|c| c.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = match config {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    debug!("Loaded {:?}", config);

    match run(&config, cli.command, cli.output).await {
        Ok(code) => code,
        Err(e) => fail(&e),
    }
}

fn fail(e: &Error) -> ExitCode {
    eprintln!("Error: {}", e);
    if let Some(hint) = e.hint() {
        eprintln!("Hint: {}", hint);
    }
    ExitCode::FAILURE
}

fn emit<T: Serialize + ?Sized>(format: OutputFormat, value: &T, plain: impl FnOnce(&T) -> String) -> Result<(), Error> {
    match format {
        OutputFormat::Plain => print!("{}", plain(value)),
        OutputFormat::Json => {
            let json = output::to_json(value)
                .map_err(|e| Error::Other(format!("failed to encode output: {}", e)))?;
            println!("{}", json);
        }
    }
    Ok(())
}

fn timeframe(from: &str, to: Option<&str>, lookback_hours: i64) -> Result<Timeframe, Error> {
    Timeframe::resolve(from, to, Duration::hours(lookback_hours)).map_err(Error::Other)
}

async fn run(config: &Config, cmd: Commands, format: OutputFormat) -> Result<ExitCode, Error> {
    let validation = config.validate();
    if let Commands::Config = cmd {
        #[derive(Serialize)]
        struct Report<'a> {
            validation: &'a dtq_lib::Validation,
            settings: Vec<(String, String)>,
        }
        let report = Report {
            validation: &validation,
            settings: config.summary(),
        };
        emit(format, &report, |r| {
            format!(
                "{}\n{}",
                output::format_validation(r.validation),
                output::format_pairs(&r.settings)
            )
        })?;
        return Ok(if validation.valid {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    for w in &validation.warnings {
        warn!("{}", w);
    }
    if !validation.valid {
        return Err(Error::Config(validation.errors.join("; ")));
    }

    if let Commands::Token = cmd {
        return token(config, format).await;
    }

    let client = Client::connect(config, &cmd.scopes()).await?;
    info!(
        "Connected to {} ({}, {:?})",
        client.base_url(),
        client.dialect(),
        client.auth_method()
    );

    let print_records = |rs: &ResultSet| emit(format, rs, output::format_records);

    match cmd {
        Commands::Problems {
            page_size,
            entity_selector,
            from,
            filter,
        } => {
            let mut problems = client
                .list_problems(page_size, entity_selector.as_deref(), from.as_deref())
                .await?;
            if let Some(f) = filter {
                problems = match_text(&problems, &f);
            }
            print_records(&ResultSet::new(problems))?;
        }
        Commands::Entities { selector, fields } => {
            let entities = client.list_entities(&selector, Some(&fields)).await?;
            print_records(&ResultSet::new(entities))?;
        }
        Commands::Metrics {
            selector,
            from,
            resolution,
        } => {
            let doc = client.query_metrics(&selector, &resolution, &from).await?;
            emit(format, &doc, output::format_value)?;
        }
        Commands::LambdaMetrics {
            entity_id,
            metric,
            from,
        } => {
            let doc = client.lambda_metrics(&entity_id, metric, &from).await?;
            emit(format, &doc, output::format_value)?;
        }
        Commands::Events { from, filter } => {
            let tf = timeframe(&from, None, DEFAULT_LOOKBACK_HOURS)?;
            let mut events = client.list_events(&tf, &[]).await?;
            if let Some(f) = filter {
                events = match_text(&events, &f);
            }
            print_records(&ResultSet::new(events))?;
        }
        Commands::Logs {
            filter,
            from,
            limit,
        } => {
            let tf = timeframe(&from, None, DEFAULT_LOOKBACK_HOURS)?;
            print_records(&client.search_logs(&filter, &tf, limit).await?)?;
        }
        Commands::Dql {
            query,
            from,
            to,
            limit,
            fetch_timeout,
        } => {
            let tf = timeframe(&from, to.as_deref(), DEFAULT_LOOKBACK_HOURS)?;
            let request = QueryRequest::new(query, &tf)
                .with_limit(limit)
                .with_fetch_timeout(fetch_timeout);
            print_records(&client.execute_query(&request).await?)?;
        }
        Commands::Bizevents { phrase, from } => {
            let tf = timeframe(&from, None, ANALYTICS_LOOKBACK_HOURS)?;
            let rs = client.search_business_events(&phrase, &tf).await?;
            let summary = BizEventSummary::from_records(&rs.records);
            #[derive(Serialize)]
            struct BizReport {
                summary: BizEventSummary,
                #[serde(flatten)]
                result: ResultSet,
            }
            emit(format, &BizReport { summary, result: rs }, |r| {
                format!(
                    "{}\n{}",
                    output::format_biz_summary(&r.summary),
                    output::format_records(&r.result)
                )
            })?;
        }
        Commands::Correlate { query, from } => {
            let tf = timeframe(&from, None, DEFAULT_LOOKBACK_HOURS)?;
            print_records(&client.correlate(&query, &tf).await?)?;
        }
        Commands::Search { query, from } => {
            let tf = timeframe(&from, None, DEFAULT_LOOKBACK_HOURS)?;
            let found = client.search_all(&query, &tf).await;
            emit(format, &found, output::format_search)?;
        }
        Commands::Analytics { kind, from } => {
            let tf = timeframe(&from, None, ANALYTICS_LOOKBACK_HOURS)?;
            print_records(&client.run_analysis(kind, &tf).await?)?;
        }
        Commands::ErrorLogs { name, from } => {
            let tf = timeframe(&from, None, ERROR_LOG_LOOKBACK_HOURS)?;
            print_records(&client.error_logs(&name, &tf).await?)?;
        }
        Commands::RankErrors {
            selector,
            limit,
            from,
        } => {
            let tf = timeframe(&from, None, ERROR_LOG_LOOKBACK_HOURS)?;
            let entities = client
                .list_entities(&selector, Some("displayName,entityId"))
                .await?;
            info!("Found {} entities, analyzing up to {}", entities.len(), limit);
            let ranked = client.rank_error_logs(&entities, limit, &tf).await;
            emit(format, ranked.as_slice(), output::format_ranking)?;
        }
        Commands::Config | Commands::Token | Commands::Version => {}
    }
    Ok(ExitCode::SUCCESS)
}

async fn token(config: &Config, format: OutputFormat) -> Result<ExitCode, Error> {
    let Credential::OAuth(cred) = config.credential()? else {
        return Err(Error::Config(
            "the token command needs OAUTH_CLIENT_ID and OAUTH_CLIENT_SECRET".to_string(),
        ));
    };
    let token = TokenProvider::new(&config.transport())?
        .with_sso_url(config.sso_url.clone())
        .acquire_token(&cred, &scopes::all())
        .await?;

    #[derive(Serialize)]
    struct TokenInfo {
        expires_in: u64,
        scope: Option<String>,
    }
    let info = TokenInfo {
        expires_in: token.expires_in,
        scope: token.scope,
    };
    emit(format, &info, |t| {
        output::format_pairs(&[
            ("Expires in".into(), format!("{}s", t.expires_in)),
            (
                "Scopes".into(),
                t.scope.clone().unwrap_or_else(|| "-".into()),
            ),
        ])
    })?;
    Ok(ExitCode::SUCCESS)
}
