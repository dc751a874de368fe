// src/cli.rs

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use crate::attachments::prepare_images;
use crate::error::{AppError, ChatError};
use crate::events::StoreEvent;
use crate::settings::{get_config_path, load_config, AuthMode};
use crate::state::AppContext;
use crate::stores::ToastKind;
use crate::types::{ChatUpdate, Conversation, LoginCredentials, Message, MessageUpdate, Registration, Role};
use crate::validation::validate_registration;

#[derive(Parser, Debug)]
#[command(name = "ollachat", version, about = "Terminal client for an Ollama chat server", long_about = None)]
pub struct Args {
    /// Backend base URL (overrides config file and environment)
    #[arg(long)]
    pub api_base: Option<String>,

    /// Path to the config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to the local storage database
    #[arg(long)]
    pub storage: Option<PathBuf>,

    /// Authenticate with server-set cookies instead of bearer tokens
    #[arg(long)]
    pub cookie_auth: bool,
}

const HELP: &str = "\
Commands:
  /login <username> <password>              sign in
  /register <username> <email> <password>   create an account and sign in
  /logout                                    sign out
  /chats                                     list conversations
  /new                                       start a conversation
  /open <n|id>                               open a conversation
  /rename <title>                            rename the current conversation
  /archive                                   archive the current conversation
  /delete [n|id]                             delete a conversation
  /delete-all                                delete every conversation
  /models                                    list available models
  /model <name>                              choose the model
  /stream on|off                             toggle streamed replies
  /attach <file>...                          attach images to the next message
  /edit <n> <text>                           edit message n
  /rm <n>                                    delete message n
  /sidebar                                   toggle the conversation list
  /help                                      show this help
  /quit                                      exit
Anything else is sent as a message.";

pub async fn run(args: Args) -> Result<(), AppError> {
    let config_path = match args.config {
        Some(path) => path,
        None => get_config_path()?,
    };
    let mut config = load_config(&config_path)?;
    config.apply_env();
    if let Some(base) = args.api_base {
        config.api_base_url = base;
    }
    if args.cookie_auth {
        config.auth_mode = AuthMode::Cookie;
    }
    if let Some(storage) = args.storage {
        config.storage_path = Some(storage);
    }

    let ctx = AppContext::open(config)?;
    let renderer = tokio::spawn(render_events(ctx.events.subscribe()));

    ctx.auth.initialize().await;

    println!("--- ollachat ---");
    println!("Server: {}", ctx.config.api_base_url);
    match ctx.auth.user() {
        Some(user) => println!("Signed in as {}", user.username),
        None => match ctx.preferences.saved_username() {
            Some(name) => println!("Not signed in. /login {name} <password>"),
            None => println!("Not signed in. Use /login or /register."),
        },
    }
    println!("Type /help for commands.");

    let mut repl = Repl {
        ctx,
        stream: true,
        pending_images: Vec::new(),
    };
    if repl.ctx.auth.is_authenticated() {
        repl.after_login().await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if !repl.handle(line.trim()).await {
            break;
        }
    }

    repl.ctx.chat.close_event_source();
    renderer.abort();
    Ok(())
}

fn prompt() {
    print!("\n> ");
    let _ = std::io::stdout().flush();
}

/// Prints streamed text, toasts and session changes as they happen.
async fn render_events(mut rx: broadcast::Receiver<StoreEvent>) {
    loop {
        match rx.recv().await {
            Ok(StoreEvent::StreamStarted { .. }) => {
                print!("assistant> ");
                let _ = std::io::stdout().flush();
            }
            Ok(StoreEvent::StreamDelta { delta, .. }) => {
                print!("{delta}");
                let _ = std::io::stdout().flush();
            }
            Ok(StoreEvent::StreamEnded { .. }) => println!(),
            Ok(StoreEvent::ToastAdded { kind, message, .. }) => {
                let label = match kind {
                    ToastKind::Success => "ok",
                    ToastKind::Error => "error",
                    ToastKind::Info => "info",
                    ToastKind::Warning => "warning",
                };
                println!("[{label}] {message}");
            }
            Ok(StoreEvent::SessionChanged { authenticated: false }) => {
                println!("[info] Signed out");
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Renderer lagged behind events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_message(index: usize, msg: &Message) {
    let role = match msg.role {
        Role::User => "you",
        Role::Assistant => "assistant",
        Role::System => "system",
        Role::Tool => "tool",
    };
    let edited = if msg.edited { " (edited)" } else { "" };
    let images = if msg.images.is_empty() {
        String::new()
    } else {
        format!(" [{} image(s)]", msg.images.len())
    };
    println!("{index:>3} {role}{edited}{images}> {}", msg.content);
}

struct Repl {
    ctx: AppContext,
    stream: bool,
    pending_images: Vec<String>,
}

impl Repl {
    /// Returns `false` when the user asked to quit.
    async fn handle(&mut self, line: &str) -> bool {
        if line.is_empty() {
            return true;
        }
        if !line.starts_with('/') {
            self.send(line).await;
            return true;
        }

        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        let args: Vec<&str> = rest.split_whitespace().collect();

        match command {
            "/quit" | "/exit" => return false,
            "/help" => println!("{HELP}"),
            "/login" => self.login(&args).await,
            "/register" => self.register(&args).await,
            "/logout" => {
                if !self.ctx.logout().await {
                    println!("Not signed in.");
                }
            }
            "/chats" => self.list_chats(true).await,
            "/new" => {
                if let Ok(chat) = self.ctx.chat.start_new_conversation().await {
                    println!("Started {} ({})", chat.title, chat.id);
                }
            }
            "/open" => self.open(rest).await,
            "/rename" if !rest.is_empty() => self.update_current(ChatUpdate {
                title: Some(rest.to_string()),
                ..ChatUpdate::default()
            })
            .await,
            "/archive" => self.update_current(ChatUpdate {
                is_archived: Some(true),
                ..ChatUpdate::default()
            })
            .await,
            "/delete" => self.delete(rest).await,
            "/delete-all" => {
                let _ = self.ctx.chat.delete_chats().await;
            }
            "/models" => self.list_models().await,
            "/model" if !rest.is_empty() => self.choose_model(rest).await,
            "/stream" => match rest {
                "on" => self.stream = true,
                "off" => self.stream = false,
                _ => println!("Streaming is {}", if self.stream { "on" } else { "off" }),
            },
            "/attach" if !args.is_empty() => self.attach(&args).await,
            "/edit" => self.edit(rest).await,
            "/rm" => self.remove(rest).await,
            "/sidebar" => {
                if self.ctx.preferences.toggle_sidebar() {
                    self.list_chats(false).await;
                } else {
                    println!("Conversation list hidden.");
                }
            }
            _ => println!("Unknown command or missing argument. Type /help."),
        }
        true
    }

    async fn after_login(&self) {
        let _ = self.ctx.models.fetch_models(false).await;
        println!("{}", self.ctx.models.status_message());
        if self.ctx.preferences.sidebar_visible() {
            self.list_chats(true).await;
        }
    }

    async fn login(&self, args: &[&str]) {
        let [username, password] = args else {
            println!("Usage: /login <username> <password>");
            return;
        };
        let credentials = LoginCredentials {
            username: username.to_string(),
            password: password.to_string(),
        };
        match self.ctx.auth.login(&credentials).await {
            Ok(_) => {
                self.ctx.preferences.set_remember_username(true);
                self.ctx.preferences.save_username(username);
                println!("Signed in as {username}");
                self.after_login().await;
            }
            Err(e) => println!("Login failed: {}", e.user_message()),
        }
    }

    async fn register(&self, args: &[&str]) {
        let [username, email, password] = args else {
            println!("Usage: /register <username> <email> <password>");
            return;
        };
        let registration = Registration {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        };
        if let Err(errors) = validate_registration(&registration) {
            for (field, message) in errors {
                println!("{field}: {message}");
            }
            return;
        }
        match self.ctx.auth.register(&registration).await {
            Ok(_) => {
                println!("Welcome, {username}");
                self.after_login().await;
            }
            Err(e) => {
                println!("Registration failed: {}", e.user_message());
                for field in e.field_errors() {
                    println!("  {}: {}", field.field, field.message);
                }
            }
        }
    }

    async fn list_chats(&self, refresh: bool) {
        let chats = if refresh {
            match self.ctx.chat.fetch_chats().await {
                Ok(chats) => chats,
                Err(_) => return,
            }
        } else {
            self.ctx.chat.conversations()
        };

        if chats.is_empty() {
            println!("No conversations yet. Type a message to start one.");
            return;
        }
        let current = self.ctx.chat.current_conversation().map(|c| c.id);
        for (i, chat) in chats.iter().enumerate() {
            let marker = if current.as_deref() == Some(chat.id.as_str()) { "*" } else { " " };
            let archived = if chat.is_archived { " (archived)" } else { "" };
            println!(
                "{marker}{:>3}. {}{archived}  [{}]",
                i + 1,
                chat.title,
                chat.updated_at.format("%Y-%m-%d %H:%M")
            );
        }
    }

    fn find_chat(&self, key: &str) -> Option<Conversation> {
        let chats = self.ctx.chat.conversations();
        match key.parse::<usize>() {
            Ok(n) if n >= 1 && n <= chats.len() => chats.get(n - 1).cloned(),
            _ => chats.into_iter().find(|c| c.id == key),
        }
    }

    async fn open(&self, key: &str) {
        let Some(chat) = self.find_chat(key) else {
            println!("No such conversation: {key}");
            return;
        };
        if self.ctx.chat.select_conversation(Some(chat)).await.is_ok() {
            if let Some(current) = self.ctx.chat.current_conversation() {
                println!("--- {} ---", current.title);
            }
            for (i, msg) in self.ctx.chat.messages().iter().enumerate() {
                print_message(i + 1, msg);
            }
        }
    }

    async fn update_current(&self, update: ChatUpdate) {
        match self.ctx.chat.current_conversation() {
            Some(chat) => {
                let _ = self.ctx.chat.update_chat(&chat.id, update).await;
            }
            None => println!("{}", ChatError::NoConversation),
        }
    }

    async fn delete(&self, key: &str) {
        let target = if key.is_empty() {
            self.ctx.chat.current_conversation()
        } else {
            self.find_chat(key)
        };
        match target {
            Some(chat) => {
                let _ = self.ctx.chat.delete_chat(&chat.id).await;
            }
            None => println!("No such conversation."),
        }
    }

    async fn list_models(&self) {
        let models = self.ctx.models.refresh_models().await;
        println!("{}", self.ctx.models.status_message());
        let selected = self.model();
        for model in models {
            let marker = if selected.as_deref() == Some(model.name.as_str()) { "*" } else { " " };
            let vision = if model.has_capability("vision") { " [vision]" } else { "" };
            let size = model.details.parameter_size.as_deref().unwrap_or("?");
            println!("{marker} {} ({size}){vision}", model.name);
        }
    }

    async fn choose_model(&mut self, name: &str) {
        let known = self.ctx.models.fetch_models(false).await;
        if !known.is_empty() && !known.iter().any(|m| m.name == name) {
            println!("Unknown model: {name}");
            return;
        }
        self.ctx.preferences.set_preferred_model(name);
        let _ = self.ctx.chat.set_conversation_model(name);
        if !self.pending_images.is_empty() && !self.ctx.models.has_vision_capability(name) {
            self.pending_images.clear();
            self.ctx
                .toasts
                .info("Images cleared - selected model does not support vision");
        }
        println!("Using {name}");
    }

    /// The current conversation's model, else the saved preference.
    fn model(&self) -> Option<String> {
        self.ctx
            .chat
            .current_conversation()
            .and_then(|c| c.model)
            .or_else(|| self.ctx.preferences.preferred_model())
    }

    async fn attach(&mut self, args: &[&str]) {
        let vision = self
            .model()
            .is_some_and(|m| self.ctx.models.has_vision_capability(&m));
        let paths: Vec<PathBuf> = args.iter().map(PathBuf::from).collect();
        match prepare_images(&paths, vision).await {
            Ok(images) => {
                self.ctx
                    .toasts
                    .success(format!("{} image(s) uploaded successfully", images.len()));
                self.pending_images.extend(images);
            }
            Err(e) => {
                self.ctx.toasts.error(e.to_string());
            }
        }
    }

    fn message_at(&self, index: &str) -> Option<Message> {
        let n: usize = index.parse().ok()?;
        self.ctx.chat.messages().get(n.checked_sub(1)?).cloned()
    }

    async fn edit(&self, rest: &str) {
        let Some((index, text)) = rest.split_once(' ') else {
            println!("Usage: /edit <n> <text>");
            return;
        };
        let Some(msg) = self.message_at(index) else {
            println!("No message {index}");
            return;
        };
        let (Some(chat_id), Some(id)) = (msg.chat_id, msg.id) else {
            println!("That message has not been saved yet.");
            return;
        };
        let _ = self
            .ctx
            .chat
            .update_message(&chat_id, &id, MessageUpdate::content(text.trim()))
            .await;
    }

    async fn remove(&self, index: &str) {
        let Some(msg) = self.message_at(index) else {
            println!("No message {index}");
            return;
        };
        let (Some(chat_id), Some(id)) = (msg.chat_id, msg.id) else {
            println!("That message has not been saved yet.");
            return;
        };
        let _ = self.ctx.chat.delete_message(&chat_id, &id).await;
    }

    async fn send(&mut self, text: &str) {
        let model = self.model();
        // Attachments wait for a send that can actually go out.
        let images = match self.ctx.chat.can_send(text, model.as_deref()) {
            Ok(_) => std::mem::take(&mut self.pending_images),
            Err(_) => Vec::new(),
        };

        if self.stream {
            if let Ok(handle) = self
                .ctx
                .chat
                .stream_chat_response(text, model.as_deref(), images)
                .await
            {
                handle.finished().await;
            }
        } else if let Ok(reply) = self
            .ctx
            .chat
            .send_message(text, model.as_deref(), images)
            .await
        {
            println!("assistant> {}", reply.content);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::LocalStorage;
    use crate::settings::ClientConfig;

    fn repl() -> Repl {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let config = ClientConfig {
            api_base_url: format!("http://127.0.0.1:{port}"),
            ..ClientConfig::default()
        };
        Repl {
            ctx: AppContext::new(config, LocalStorage::in_memory().unwrap()).unwrap(),
            stream: false,
            pending_images: vec!["aW1n".to_string()],
        }
    }

    #[tokio::test]
    async fn test_rejected_send_keeps_attachments() {
        let mut repl = repl();

        // No model chosen.
        repl.ctx.api.session().set_tokens("a1".into(), None);
        repl.send("look at this").await;
        assert_eq!(repl.pending_images, vec!["aW1n".to_string()]);

        // Model chosen but signed out.
        repl.ctx.api.session().clear();
        repl.ctx.preferences.set_preferred_model("llava:7b");
        repl.send("look at this").await;
        assert_eq!(repl.pending_images.len(), 1);
        assert!(repl.ctx.chat.messages().is_empty());
    }

    #[tokio::test]
    async fn test_accepted_send_consumes_attachments() {
        let mut repl = repl();
        repl.ctx.api.session().set_tokens("a1".into(), None);
        repl.ctx.preferences.set_preferred_model("llava:7b");

        // The server is unreachable, but the images went out with the send.
        repl.send("look at this").await;
        assert!(repl.pending_images.is_empty());
    }
}
