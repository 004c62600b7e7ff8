use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use qhub::api::{ApiError, ChatApi, ChatId, GatewayClient, Message, Role, UploadFile};
use qhub::auth::{LoginForm, SignupForm, LOGIN_SUCCESS_NOTICE, SIGNUP_SUCCESS_NOTICE};
use qhub::chat::{ChatController, UPLOAD_FAILED_NOTICE, UPLOAD_SUCCESS_NOTICE};
use qhub::config::Config;
use qhub::documents::{DocumentsPage, DELETE_CONFIRM_PROMPT, DELETE_FAILED_NOTICE, EMPTY_DOCUMENTS_TEXT};
use qhub::error::ClientError;
use qhub::session::SessionStore;
use qhub::views::{self, EMPTY_CHAT_TEXT, EMPTY_SIDEBAR_TEXT, UPLOADING_LABEL};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "qhub")]
#[command(about = "QHub CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Clone)]
struct ConfigArg {
    /// Config file path (default: QHUB_CONFIG_PATH or ~/.qhub/config.json)
    #[arg(long, short, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        #[command(flatten)]
        config: ConfigArg,
    },

    /// Create an account. Prompts for anything not given on the command line.
    Signup {
        #[command(flatten)]
        config: ConfigArg,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },

    /// Log in and store the access and refresh tokens.
    Login {
        #[command(flatten)]
        config: ConfigArg,
        #[arg(long)]
        username: Option<String>,
        /// Password (prompted without echo when omitted)
        #[arg(long)]
        password: Option<String>,
    },

    /// Forget the stored tokens and the remembered chat.
    Logout {
        #[command(flatten)]
        config: ConfigArg,
    },

    /// List chats; the active one is marked with `*`.
    Chats {
        #[command(flatten)]
        config: ConfigArg,
    },

    /// Chat interactively. Type /help for commands.
    Chat {
        #[command(flatten)]
        config: ConfigArg,
        /// Chat to open instead of the remembered one.
        #[arg(long, value_name = "ID")]
        chat: Option<ChatId>,
    },

    /// Upload a document; the chat created for it becomes active.
    Upload {
        #[command(flatten)]
        config: ConfigArg,
        path: PathBuf,
    },

    /// Uploaded documents.
    Docs {
        #[command(subcommand)]
        action: DocsAction,
    },

    /// Access token maintenance.
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Subcommand)]
enum DocsAction {
    List {
        #[command(flatten)]
        config: ConfigArg,
    },
    Delete {
        #[command(flatten)]
        config: ConfigArg,
        id: i64,
        /// Skip the confirmation prompt.
        #[arg(long, short)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Trade the stored refresh token for a new access token.
    Refresh {
        #[command(flatten)]
        config: ConfigArg,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let (what, result) = match cli.command {
        Some(Commands::Version) => {
            println!("qhub {}", env!("CARGO_PKG_VERSION"));
            return;
        }
        Some(Commands::Init { config }) => ("init", run_init(config.config)),
        Some(Commands::Signup {
            config,
            username,
            email,
        }) => ("signup", run_signup(config.config, username, email).await),
        Some(Commands::Login {
            config,
            username,
            password,
        }) => ("login", run_login(config.config, username, password).await),
        Some(Commands::Logout { config }) => ("logout", run_logout(config.config)),
        Some(Commands::Chats { config }) => ("chats", run_chats(config.config).await),
        Some(Commands::Chat { config, chat }) => ("chat", run_chat(config.config, chat).await),
        Some(Commands::Upload { config, path }) => ("upload", run_upload(config.config, path).await),
        Some(Commands::Docs {
            action: DocsAction::List { config },
        }) => ("docs list", run_docs_list(config.config).await),
        Some(Commands::Docs {
            action: DocsAction::Delete { config, id, yes },
        }) => ("docs delete", run_docs_delete(config.config, id, yes).await),
        Some(Commands::Token {
            action: TokenAction::Refresh { config },
        }) => ("token refresh", run_token_refresh(config.config).await),
        None => {
            println!("Run with --help for usage");
            return;
        }
    };

    if let Err(e) = result {
        if is_unauthenticated(&e) {
            eprintln!("{} Run `qhub login`.", ApiError::Unauthenticated.user_message());
        } else {
            log::error!("{} failed: {}", what, describe(&e));
        }
        std::process::exit(1);
    }
}

fn is_unauthenticated(e: &anyhow::Error) -> bool {
    e.downcast_ref::<ApiError>()
        .is_some_and(|e| matches!(e, ApiError::Unauthenticated))
        || e.downcast_ref::<ClientError>()
            .is_some_and(ClientError::is_unauthenticated)
}

/// User-facing text: server payloads verbatim, everything else with its context chain.
fn describe(e: &anyhow::Error) -> String {
    if let Some(api) = e.downcast_ref::<ApiError>() {
        return api.user_message();
    }
    if let Some(client) = e.downcast_ref::<ClientError>() {
        return client.user_message();
    }
    format!("{:#}", e)
}

/// Config, session store, and gateway client for one command.
struct Connection {
    config: Config,
    session: SessionStore,
    client: GatewayClient,
}

fn connect(config_path: Option<PathBuf>) -> anyhow::Result<Connection> {
    let (config, path) = qhub::config::load_config(config_path)?;
    let session_path = qhub::config::resolve_session_path(&config, &path);
    log::debug!("session file {}", session_path.display());
    let session = SessionStore::file(session_path);
    let client = GatewayClient::from_config(&config, session.clone());
    log::debug!("api root {}", client.base_url());
    Ok(Connection {
        config,
        session,
        client,
    })
}

impl Connection {
    fn chat_controller(&self) -> ChatController<GatewayClient> {
        ChatController::new(self.client.clone(), self.session.clone())
            .with_upload_limit(self.config.api.upload_limit_bytes)
    }
}

fn prompt(label: &str) -> io::Result<String> {
    let mut stdout = io::stdout();
    write!(stdout, "{}: ", label)?;
    stdout.flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(qhub::config::default_config_path);
    let dir = qhub::config::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_signup(
    config_path: Option<PathBuf>,
    username: Option<String>,
    email: Option<String>,
) -> anyhow::Result<()> {
    let ctx = connect(config_path)?;
    let mut form = SignupForm::new();
    form.username = match username {
        Some(u) => u,
        None => prompt("Username")?,
    };
    form.email = match email {
        Some(e) => e,
        None => prompt("Email")?,
    };
    form.password = rpassword::prompt_password("Password: ").context("reading password")?;
    form.password2 = rpassword::prompt_password("Confirm password: ").context("reading password")?;
    form.submit(&ctx.client).await?;
    println!("{} You can now log in with `qhub login`.", SIGNUP_SUCCESS_NOTICE);
    Ok(())
}

async fn run_login(
    config_path: Option<PathBuf>,
    username: Option<String>,
    password: Option<String>,
) -> anyhow::Result<()> {
    let ctx = connect(config_path)?;
    let mut form = LoginForm::new();
    form.username = match username {
        Some(u) => u,
        None => prompt("Username")?,
    };
    form.password = match password {
        Some(p) => p,
        None => rpassword::prompt_password("Password: ").context("reading password")?,
    };
    form.submit(&ctx.client, &ctx.session).await?;
    println!("{}", LOGIN_SUCCESS_NOTICE);
    Ok(())
}

fn run_logout(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let ctx = connect(config_path)?;
    ctx.chat_controller().logout();
    println!("logged out");
    Ok(())
}

/// Load the chat list, or fail with `Unauthenticated` when there is no usable session.
async fn mounted(ctx: &Connection) -> anyhow::Result<ChatController<GatewayClient>> {
    let mut chat = ctx.chat_controller();
    chat.mount().await?;
    if chat.redirect().is_some() {
        return Err(ApiError::Unauthenticated.into());
    }
    Ok(chat)
}

fn print_sidebar(chat: &ChatController<GatewayClient>) {
    let items = views::sidebar_items(chat.chats(), chat.active_chat_id());
    if items.is_empty() {
        println!("{}", EMPTY_SIDEBAR_TEXT);
    }
    for item in items {
        let marker = if item.active { "*" } else { " " };
        println!("{} {:>6}  {}", marker, item.id, item.title);
    }
}

fn print_message(message: &Message) {
    match message.role {
        Role::User => println!("> {}", message.content),
        Role::Assistant => println!("< {}", message.content),
    }
}

fn print_messages(chat: &ChatController<GatewayClient>) {
    if chat.messages().is_empty() {
        println!("{}", EMPTY_CHAT_TEXT);
    }
    for m in chat.messages() {
        print_message(m);
    }
}

async fn run_chats(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let ctx = connect(config_path)?;
    let chat = mounted(&ctx).await?;
    print_sidebar(&chat);
    Ok(())
}

async fn upload(chat: &mut ChatController<GatewayClient>, path: &Path) -> anyhow::Result<Option<ChatId>> {
    let file = UploadFile::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    let progress = Arc::new(|loaded: u64, total: u64| {
        eprint!(
            "\r{} {}",
            UPLOADING_LABEL,
            views::progress_label(qhub::chat::percent_of(loaded, total))
        );
    });
    let result = chat.upload_document_with_progress(file, progress).await;
    eprintln!();
    match result {
        Ok(chat_id) => {
            println!("{}", UPLOAD_SUCCESS_NOTICE);
            Ok(chat_id)
        }
        Err(e) => {
            if !e.is_unauthenticated() {
                eprintln!("{}: {}", UPLOAD_FAILED_NOTICE, e.user_message());
            }
            Err(e.into())
        }
    }
}

async fn run_upload(config_path: Option<PathBuf>, path: PathBuf) -> anyhow::Result<()> {
    let ctx = connect(config_path)?;
    let mut chat = mounted(&ctx).await?;
    if let Some(id) = upload(&mut chat, &path).await? {
        println!("active chat is now {}", id);
    }
    Ok(())
}

fn print_documents<A: ChatApi>(page: &DocumentsPage<A>) {
    if page.documents().is_empty() {
        println!("{}", EMPTY_DOCUMENTS_TEXT);
    }
    for doc in page.documents() {
        let linked = doc
            .linked_chat_id
            .map(|id| format!("chat {}", id))
            .unwrap_or_else(|| "-".to_string());
        let uploaded = doc
            .uploaded_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!("{:>6}  {:<40}  {:<10}  {}", doc.id, doc.title, linked, uploaded);
    }
}

async fn run_docs_list(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let ctx = connect(config_path)?;
    let mut page = DocumentsPage::new(ctx.client);
    page.refresh().await?;
    print_documents(&page);
    Ok(())
}

async fn run_docs_delete(config_path: Option<PathBuf>, id: i64, yes: bool) -> anyhow::Result<()> {
    let ctx = connect(config_path)?;
    let mut page = DocumentsPage::new(ctx.client);
    page.request_delete(id);
    if !yes {
        let answer = prompt(&format!("{} [y/N]", DELETE_CONFIRM_PROMPT))?;
        if !answer.eq_ignore_ascii_case("y") && !answer.eq_ignore_ascii_case("yes") {
            page.cancel_delete();
            println!("cancelled");
            return Ok(());
        }
    }
    if let Err(e) = page.confirm_delete().await {
        if !matches!(e, ApiError::Unauthenticated) {
            eprintln!("{}", DELETE_FAILED_NOTICE);
        }
        return Err(e.into());
    }
    print_documents(&page);
    Ok(())
}

async fn run_token_refresh(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let ctx = connect(config_path)?;
    let token = ctx.client.refresh_tokens().await?;
    if token.refresh.is_some() {
        println!("access and refresh tokens renewed");
    } else {
        println!("access token renewed");
    }
    Ok(())
}

const REPL_HELP: &str = "\
/new            start a new chat
/list           list chats
/select <id>    switch to a chat
/upload <path>  upload a document
/docs           list uploaded documents
/logout         log out and leave
/help           show this help
/exit           leave";

async fn run_chat(config_path: Option<PathBuf>, open: Option<ChatId>) -> anyhow::Result<()> {
    let ctx = connect(config_path)?;
    let mut chat = mounted(&ctx).await?;
    if let Some(id) = open {
        chat.select_chat(id).await?;
    }
    match chat.active_chat() {
        Some(c) => println!("-- {} --", views::chat_display_title(c)),
        None => println!("-- {} --", views::NEW_CHAT_TITLE),
    }
    print_messages(&chat);

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let outcome: anyhow::Result<()> = match input.split_once(' ').unwrap_or((input, "")) {
            ("/exit" | "/quit", _) => break,
            ("/help", _) => {
                println!("{}", REPL_HELP);
                Ok(())
            }
            ("/new", _) => match chat.create_chat().await {
                Ok(id) => {
                    println!("-- new chat {} --", id);
                    Ok(())
                }
                Err(e) => Err(e.into()),
            },
            ("/list", _) => {
                print_sidebar(&chat);
                Ok(())
            }
            ("/select", arg) => match arg.trim().parse::<ChatId>() {
                Ok(id) => {
                    let result = chat.select_chat(id).await;
                    print_messages(&chat);
                    result.map_err(Into::into)
                }
                Err(_) => {
                    eprintln!("usage: /select <id>");
                    Ok(())
                }
            },
            ("/upload", arg) if !arg.trim().is_empty() => {
                upload(&mut chat, Path::new(arg.trim())).await.map(|id| {
                    if let Some(id) = id {
                        println!("-- chat {} --", id);
                    }
                })
            }
            ("/upload", _) => {
                eprintln!("usage: /upload <path>");
                Ok(())
            }
            ("/docs", _) => {
                let mut page = DocumentsPage::new(ctx.client.clone());
                let result = page.refresh().await;
                print_documents(&page);
                result.map_err(Into::into)
            }
            ("/logout", _) => {
                chat.logout();
                println!("logged out");
                break;
            }
            (cmd, _) if cmd.starts_with('/') => {
                eprintln!("unknown command {}; /help lists commands", cmd);
                Ok(())
            }
            _ => {
                let result = chat.send_message(input).await;
                // the reply, or the failure text that replaced the placeholder
                if let Some(last) = chat.messages().last().filter(|m| m.role == Role::Assistant) {
                    print_message(last);
                }
                result.map_err(Into::into)
            }
        };

        match outcome {
            Ok(()) => {}
            Err(e) if is_unauthenticated(&e) => return Err(e),
            Err(e) => eprintln!("{}", describe(&e)),
        }
    }

    Ok(())
}
