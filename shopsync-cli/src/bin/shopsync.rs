use anyhow::anyhow;
use serde_json::Value;
use shopsync::jwt::parse_claims;
use shopsync::{
    ApiClient, ApiRequest, FileStorage, HttpMethod, RegisterRequest, ReportKind, Resource,
};
use shopsync_cli::pretty::{describe_claims, pp_records, pp_user};
use shopsync_cli::*;
use std::collections::HashMap;

use colored_json::to_colored_json_auto;
use log::{self, debug};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use structopt::StructOpt;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

#[derive(StructOpt)]
#[structopt(rename_all = "kebab-case", about = "CLI interface for the ShopSync inventory backend")]
struct Opt {
    #[structopt(
        global = true,
        long = "--api-url",
        env = "SHOPSYNC_API_URL",
        default_value = "http://localhost:8080"
    )]
    api_url: String,

    /// Where the session tokens are kept between runs
    #[structopt(
        global = true,
        long = "--session-file",
        env = "SHOPSYNC_SESSION_FILE",
        default_value = ".shopsync-session.json",
        parse(from_os_str)
    )]
    session_file: PathBuf,

    #[structopt(
        global = true,
        long = "--login-path",
        env = "SHOPSYNC_LOGIN_PATH",
        default_value = "/login"
    )]
    login_path: String,

    /// Log more messages. Pass multiple times for ever more verbosity
    ///
    /// By default, it'll only report errors. Passing `-v` one time also prints
    /// warnings, `-vv` enables info logging, `-vvv` debug, and `-vvvv` trace.
    #[structopt(global = true, long, short = "v", parse(from_occurrences))]
    verbose: i8,

    #[structopt(long = "--shell-completions", hidden = true)]
    shell_completions: Option<structopt::clap::Shell>,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(StructOpt)]
enum AccountCommand {
    /// Register a new account, and log in to it
    Register {
        #[structopt(long, short)]
        name: String,

        #[structopt(long, short)]
        email: String,

        #[structopt(long, short)]
        password: String,
    },
    Login {
        #[structopt(long, short)]
        email: String,

        #[structopt(long, short)]
        password: String,
    },
    Logout,
    /// Show the logged-in user, as the backend sees it
    Info,
    /// Exchange the refresh token for a new access token before the current one expires
    Refresh,
}

#[derive(StructOpt)]
enum Command {
    /// List all records of a collection (products, sales, customers, ...)
    Ls {
        resource: Resource,

        /// Print raw JSON instead of one line per record
        #[structopt(long)]
        json: bool,
    },

    Get {
        resource: Resource,
        id: String,
    },

    Create {
        resource: Resource,
        fields: Vec<ArgField>,
    },

    /// Fetch a record, apply the given fields, and write it back
    Update {
        resource: Resource,
        id: String,
        fields: Vec<ArgField>,
    },

    Delete {
        resource: Resource,
        id: String,
    },

    /// Download a report spreadsheet (vendas, produtos, clientes, estoque)
    Report {
        kind: ReportKind,

        /// Defaults to relatorio-<kind>-<date>.xlsx; '-' writes to stdout
        #[structopt(long, short, parse(from_os_str))]
        output: Option<PathBuf>,
    },

    /// Raw authenticated request, eg: `request post /sales productId=3 quantity=2`
    Request {
        method: HttpMethod,
        path: String,
        fields: Vec<ArgField>,
    },

    /// Sub-commands for managing the session
    Account {
        #[structopt(subcommand)]
        cmd: AccountCommand,
    },

    /// Summarize connection and authentication with API
    Status,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let opt = Opt::from_args();

    let log_level = match opt.verbose {
        std::i8::MIN..=-1 => "none",
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        4..=std::i8::MAX => "trace",
    };
    // hyper logging is very verbose, so crank that down even if everything else is more verbose
    let log_filter = format!("{},hyper=error", log_level);
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_filter))
        .format_timestamp(None)
        .init();

    debug!("Args parsed, starting up");

    #[cfg(windows)]
    colored_json::enable_ansi_support();

    if let Some(shell) = opt.shell_completions {
        Opt::clap().gen_completions_to("shopsync", shell, &mut std::io::stdout());
        std::process::exit(0);
    }

    let result = tokio::runtime::Runtime::new()
        .map_err(anyhow::Error::from)
        .and_then(|rt| rt.block_on(run(opt)));
    if let Err(err) = result {
        // Be graceful about some errors
        if let Some(io_err) = err.root_cause().downcast_ref::<std::io::Error>() {
            if let std::io::ErrorKind::BrokenPipe = io_err.kind() {
                // presumably due to something like writing to stdout and piped to `head -n10` and
                // stdout was closed
                debug!("got BrokenPipe error, assuming stdout closed as expected and exiting with success");
                std::process::exit(0);
            }
        }
        let mut color_stderr = StandardStream::stderr(if atty::is(atty::Stream::Stderr) {
            ColorChoice::Auto
        } else {
            ColorChoice::Never
        });
        color_stderr.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true))?;
        eprintln!("Error: {:?}", err);
        color_stderr.set_color(&ColorSpec::new())?;
        if let Some(api_err) = err.downcast_ref::<shopsync::ApiError>() {
            if api_err.is_auth_failure() {
                eprintln!("Log in again with: shopsync account login --email <email> --password <password>");
            }
        }
        std::process::exit(1);
    }
    Ok(())
}

fn print_result_json(result: Option<Value>) -> Result<()> {
    if let Some(val) = result {
        writeln!(&mut std::io::stdout(), "{}", to_colored_json_auto(&val)?)?
    };
    Ok(())
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if path.as_os_str() == "-" {
        std::io::stdout().write_all(bytes)?;
    } else {
        std::fs::write(path, bytes)?;
        eprintln!("wrote {} bytes to {}", bytes.len(), path.display());
    }
    Ok(())
}

async fn run(opt: Opt) -> Result<()> {
    let storage = Arc::new(FileStorage::new(&opt.session_file));
    let client = ApiClient::http(&opt.api_url, storage)?.with_login_path(&opt.login_path);

    // logging in or out does not need the old session verified first
    let needs_session = !matches!(
        opt.cmd,
        Command::Account {
            cmd: AccountCommand::Login { .. }
                | AccountCommand::Register { .. }
                | AccountCommand::Logout
        }
    );
    let restored = if needs_session {
        client.restore().await
    } else {
        false
    };

    let mut params: HashMap<String, String> = HashMap::new();
    let result = match opt.cmd {
        Command::Status => {
            println!("Configuration");
            println!("  SHOPSYNC_API_URL: {}", opt.api_url);
            println!("  SHOPSYNC_SESSION_FILE: {}", opt.session_file.display());
            println!("  SHOPSYNC_LOGIN_PATH: {}", opt.login_path);
            println!("Session");
            match client.session().snapshot() {
                Some(session) if restored => {
                    println!("  user: {}", session.user.display_name());
                    println!(
                        "  refresh token: {}",
                        if session.refresh_token.is_some() {
                            "<configured>"
                        } else {
                            "none"
                        }
                    );
                    match parse_claims(&session.access_token) {
                        Ok(claims) => {
                            for line in describe_claims(&claims) {
                                println!("  {line}");
                            }
                        }
                        Err(_) => println!("  token: opaque"),
                    }
                }
                _ => println!("  not logged in"),
            }
            None
        }
        Command::Ls { resource, json } => {
            let records = client.resource(resource).list().await?;
            if json {
                Some(Value::Array(records))
            } else {
                pp_records(resource, &records)?;
                None
            }
        }
        Command::Get { resource, id } => Some(client.resource(resource).fetch(&id).await?),
        Command::Create { resource, fields } => {
            update_params_from_fields(&fields, &mut params);
            let val = value_from_fields(fields);
            let req = ApiRequest::post(resource.path(), val).query(params);
            client.request_json(req).await?
        }
        Command::Update {
            resource,
            id,
            fields,
        } => {
            // fetch existing, extend map with fields, put the updated value
            let handle = client.resource(resource);
            let mut record = handle.fetch(&id).await?;
            update_value_from_fields(fields, &mut record);
            handle.update(&id, record).await?
        }
        Command::Delete { resource, id } => {
            client.resource(resource).delete(&id).await?;
            None
        }
        Command::Report { kind, output } => {
            let bytes = client.download_report(kind).await?;
            let path = output
                .unwrap_or_else(|| PathBuf::from(kind.default_filename(shopsync::today_utc())));
            write_output(&path, &bytes)?;
            None
        }
        Command::Request {
            method,
            path,
            fields,
        } => {
            update_params_from_fields(&fields, &mut params);
            let mut req = ApiRequest::new(method, path).query(params);
            if method != HttpMethod::Get {
                req = req.json(value_from_fields(fields));
            }
            client.request_json(req).await?
        }
        Command::Account {
            cmd:
                AccountCommand::Register {
                    name,
                    email,
                    password,
                },
        } => {
            let user = client
                .register(&RegisterRequest {
                    name,
                    email,
                    password,
                })
                .await?;
            pp_user(&user)?;
            None
        }
        Command::Account {
            cmd: AccountCommand::Login { email, password },
        } => {
            let user = client.login(&email, &password).await?;
            pp_user(&user)?;
            None
        }
        Command::Account {
            cmd: AccountCommand::Logout,
        } => {
            client.logout();
            None
        }
        Command::Account {
            cmd: AccountCommand::Info,
        } => {
            if !restored {
                return Err(anyhow!("not logged in"));
            }
            pp_user(&client.me().await?)?;
            None
        }
        Command::Account {
            cmd: AccountCommand::Refresh,
        } => {
            client.refresh().await?;
            println!("access token refreshed");
            None
        }
    };
    print_result_json(result)?;
    Ok(())
}
